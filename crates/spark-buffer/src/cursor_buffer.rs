use std::{
    fmt, io, mem,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::{Buf, Bytes, BytesMut};
use spark_core::{CoreError, CursorBuf, error::codes};
use spin::Mutex;

/// `BufferRecycler` 描述租约结束时的回收入口。
///
/// # 设计初衷（Why）
/// - 分配器只负责“租借”，缓冲生命周期结束时如何归还容量由回收器决定；
/// - 在 [`CursorBuffer`] 的 `Drop` 阶段统一通知回收器，避免上层组件散落释放逻辑。
///
/// # 契约定义（What）
/// - 同一租约的全部持有者（缓冲本身与拆分出的 [`SharedBytes`]）都释放后，`reclaim` 恰好被调用一次；
/// - **前置条件**：实现必须线程安全且不得 panic，否则 `Drop` 路径上的 panic 会导致进程中止。
pub trait BufferRecycler: Send + Sync + 'static {
    /// 通知回收器释放一次租约。
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 一次回收动作携带的上下文。
///
/// - `capacity`：租约最终记录的容量，保证池侧统计一致；
/// - `buffer`：若成功夺回底层 `BytesMut` 则为 `Some`，否则回收器只能更新统计。
#[derive(Debug)]
pub struct ReclaimedBuffer {
    capacity: usize,
    buffer: Option<BytesMut>,
}

impl ReclaimedBuffer {
    /// 创建回收上下文。
    pub fn new(capacity: usize, buffer: Option<BytesMut>) -> Self {
        Self { capacity, buffer }
    }

    /// 本次回收的容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 消耗结构并返回可复用的 `BytesMut`。
    pub fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

/// 不回收任何内存的回收器，供非池化缓冲使用。
struct Unpooled;

impl BufferRecycler for Unpooled {
    fn reclaim(&self, _reclaimed: ReclaimedBuffer) {}
}

/// `Lease` 追踪一次租借，并在最后一个持有者释放时触发回收。
///
/// # 角色定位（Why）
/// - 同一块内存可能被拆分为多个视图（累积缓冲与 `split_readable` 产生的帧），
///   只有最后一个视图被销毁时才能归还；`Arc` 的引用计数天然表达“最后一个持有者”。
///
/// # 结构设计（How）
/// - `capacity` 以原子整数记录容量，扩容后即时刷新；
/// - `buffer` 暂存缓冲 `Drop` 时交回的 `BytesMut`，等待 `Lease::drop` 一并交给回收器。
struct Lease {
    recycler: Arc<dyn BufferRecycler>,
    capacity: AtomicUsize,
    buffer: Mutex<Option<BytesMut>>,
}

impl Lease {
    fn new(initial_capacity: usize, recycler: Arc<dyn BufferRecycler>) -> Self {
        Self {
            recycler,
            capacity: AtomicUsize::new(initial_capacity),
            buffer: Mutex::new(None),
        }
    }

    fn update_capacity(&self, new_capacity: usize) {
        self.capacity.store(new_capacity, Ordering::Relaxed);
    }

    fn store_buffer(&self, buffer: BytesMut) {
        let mut slot = self.buffer.lock();
        if slot.is_none() {
            *slot = Some(buffer);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let buffer = self.buffer.lock().take();
        self.recycler.reclaim(ReclaimedBuffer::new(capacity, buffer));
    }
}

/// `CursorBuffer` 是带独立读写游标的可增长字节区域。
///
/// # 设计动机（Why）
/// - 读路径的三个参与者共享同一种视图：传输层在写游标处追加字节，解码器推进读游标，
///   重放机制把读游标倒回检查点；
/// - 以 `BytesMut` 承载数据，写游标即 `BytesMut::len()`，读游标单独记录，
///   回退读游标不需要任何内存搬移。
///
/// # 架构关系（How）
/// - `data`：已写入的字节，长度即写游标；
/// - `read`：读游标，始终满足 `read <= data.len()`；
/// - `lease`：与拆分出的 [`SharedBytes`] 共享，所有持有者释放后通知回收器。
///
/// # 契约说明（What）
/// - **不变量**：`0 <= read_cursor <= write_cursor <= capacity`；
/// - **所有权**：同一时刻只有一个组件持有 `CursorBuffer`（所有权经由移动转移），
///   因此不存在“两个组件都以为自己独占同一区域”的情况；
/// - **释放**：`Drop` 时交回底层 `BytesMut`，租约归零后回收器恰好收到一次通知。
///
/// # 风险与取舍（Trade-offs）
/// - `discard_read_bytes` 通过移动 `BytesMut` 起点回收前缀，容量随之减少；
///   后续 `put_slice` 触发的扩容由 `bytes` 决定是否原地复用。
pub struct CursorBuffer {
    data: BytesMut,
    read: usize,
    lease: Arc<Lease>,
}

impl CursorBuffer {
    /// 使用给定的 `BytesMut` 与回收句柄创建缓冲。
    ///
    /// # 前置条件
    /// - `inner` 尚未被其它视图共享；其已有内容视为已写入、未读取的字节。
    pub fn new(inner: BytesMut, recycler: Arc<dyn BufferRecycler>) -> Self {
        let lease = Arc::new(Lease::new(inner.capacity(), recycler));
        Self {
            data: inner,
            read: 0,
            lease,
        }
    }

    /// 创建不归属任何池的缓冲。
    pub fn unpooled(capacity: usize) -> Self {
        Self::new(BytesMut::with_capacity(capacity), Arc::new(Unpooled))
    }

    /// 以切片内容创建非池化缓冲，写游标位于末尾。
    pub fn from_slice(src: &[u8]) -> Self {
        Self::new(BytesMut::from(src), Arc::new(Unpooled))
    }

    /// 在写游标处读入至多 `max` 字节。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：传输层需要把系统调用的读取结果直接落在缓冲中，避免先读入临时 `Vec` 再复制；
    /// - **步骤 (How)**：
    ///   1. 将数据区零填充扩展 `max` 字节，得到一块已初始化的可写切片；
    ///   2. 交给 `reader` 写入并返回实际字节数 `n`；
    ///   3. 截断到 `write_cursor + n`，错误时恢复到原写游标。
    /// - **契约 (What)**：返回值不超过 `max`；`reader` 报告超过 `max` 的字节数时按 `max` 截断；
    ///   失败时游标与内容保持调用前状态。
    /// - **权衡 (Trade-offs)**：零填充带来一次 `memset`，换取零 `unsafe` 的实现。
    pub fn fill_from<F>(&mut self, max: usize, reader: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let start = self.data.len();
        self.data.resize(start + max, 0);
        let outcome = reader(&mut self.data[start..]);
        let filled = match &outcome {
            Ok(n) => (*n).min(max),
            Err(_) => 0,
        };
        self.data.truncate(start + filled);
        self.refresh_capacity();
        outcome.map(|_| filled)
    }

    /// 从读游标处拆分出 `len` 字节的只读视图。
    ///
    /// 拆分前先丢弃已读前缀，返回的 [`SharedBytes`] 与本缓冲共享租约，
    /// 两者都释放后才会触发回收。
    pub fn split_readable(&mut self, len: usize) -> Result<SharedBytes, CoreError> {
        if len > self.readable_bytes() {
            return Err(out_of_bounds(format!(
                "CursorBuffer::split_readable 超出可读字节：请求 {len}，实际 {}",
                self.readable_bytes()
            )));
        }
        self.discard_read_bytes();
        let bytes = self.data.split_to(len).freeze();
        Ok(SharedBytes {
            bytes,
            _lease: Arc::clone(&self.lease),
        })
    }

    /// 清空内容并将两个游标归零，保留容量。
    pub fn clear(&mut self) {
        self.data.clear();
        self.read = 0;
    }

    fn refresh_capacity(&self) {
        self.lease.update_capacity(self.data.capacity());
    }
}

impl CursorBuf for CursorBuffer {
    fn read_cursor(&self) -> usize {
        self.read
    }

    fn write_cursor(&self) -> usize {
        self.data.len()
    }

    fn capacity(&self) -> usize {
        self.data.capacity()
    }

    fn readable(&self) -> &[u8] {
        &self.data[self.read..]
    }

    fn set_read_cursor(&mut self, pos: usize) -> Result<(), CoreError> {
        if pos > self.data.len() {
            return Err(out_of_bounds(format!(
                "CursorBuffer::set_read_cursor 超出写游标：目标 {pos}，写游标 {}",
                self.data.len()
            )));
        }
        self.read = pos;
        Ok(())
    }

    fn advance(&mut self, len: usize) -> Result<(), CoreError> {
        if len > self.readable_bytes() {
            return Err(out_of_bounds(format!(
                "CursorBuffer::advance 超出可读字节：请求 {len}，实际 {}",
                self.readable_bytes()
            )));
        }
        self.read += len;
        Ok(())
    }

    fn put_slice(&mut self, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        let before = self.data.capacity();
        self.data.extend_from_slice(src);
        if self.data.capacity() != before {
            self.refresh_capacity();
        }
    }

    fn discard_read_bytes(&mut self) {
        if self.read == 0 {
            return;
        }
        self.data.advance(self.read);
        self.read = 0;
    }
}

impl Drop for CursorBuffer {
    fn drop(&mut self) {
        let mut data = mem::take(&mut self.data);
        data.clear();
        self.lease.store_buffer(data);
    }
}

impl fmt::Debug for CursorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorBuffer")
            .field("read_cursor", &self.read)
            .field("write_cursor", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish()
    }
}

/// 从 [`CursorBuffer`] 拆分出的只读字节视图，持有原缓冲的租约。
#[derive(Clone)]
pub struct SharedBytes {
    bytes: Bytes,
    _lease: Arc<Lease>,
}

impl SharedBytes {
    /// 返回底层 `Bytes` 的引用。
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// 脱离租约，返回独立的 `Bytes`。
    ///
    /// 脱离后本视图不再延长租约寿命；`Bytes` 自身的引用计数仍保证内存有效。
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedBytes").field(&self.bytes).finish()
    }
}

fn out_of_bounds(message: String) -> CoreError {
    CoreError::new(codes::BUFFER_OUT_OF_BOUNDS, message)
}
