use crate::error::CoreError;

/// `CursorBuf` 定义带独立读写游标的字节区域契约。
///
/// # 设计背景（Why）
/// - 读路径需要“先写入、后解析、必要时回退”的三段式访问：传输层推进写游标，
///   解码器推进读游标，重放机制把读游标倒回检查点；
/// - 对标 Netty `ByteBuf` 的 `readerIndex`/`writerIndex` 模型，但以 Rust 借用规则替代引用计数 API：
///   独占所有权通过 `&mut self` 表达，释放在 `Drop` 中完成。
///
/// # 逻辑解析（How）
/// - `readable` 暴露 `[read_cursor, write_cursor)` 区间；
/// - `set_read_cursor` 允许在 `[0, write_cursor]` 内任意移动读游标，是检查点回退的唯一入口；
/// - `discard_read_bytes` 丢弃读游标之前的字节并整体左移，两个游标同时减去原读游标值。
///
/// # 契约说明（What）
/// - **不变量**：任意操作结束后 `0 <= read_cursor() <= write_cursor() <= capacity()`；
/// - **前置条件**：`advance(len)` 要求 `len <= readable_bytes()`，越界时返回错误且游标不变；
/// - **后置条件**：`put_slice` 必要时扩容，写游标前移 `src.len()`。
///
/// # 风险提示（Trade-offs）
/// - `discard_read_bytes` 会移动内存，调用方应按节奏（例如每若干次读取）触发而非每次解析后调用。
pub trait CursorBuf: Send + 'static {
    /// 当前读游标。
    fn read_cursor(&self) -> usize;

    /// 当前写游标。
    fn write_cursor(&self) -> usize;

    /// 当前容量。
    fn capacity(&self) -> usize;

    /// 返回 `[read_cursor, write_cursor)` 区间的只读切片。
    fn readable(&self) -> &[u8];

    /// 将读游标移动到 `pos`，`pos` 必须不大于写游标。
    fn set_read_cursor(&mut self, pos: usize) -> Result<(), CoreError>;

    /// 读游标前移 `len` 字节。
    fn advance(&mut self, len: usize) -> Result<(), CoreError>;

    /// 在写游标处追加字节，必要时扩容。
    fn put_slice(&mut self, src: &[u8]);

    /// 丢弃已读字节，回收读游标之前的空间。
    fn discard_read_bytes(&mut self);

    /// 可读字节数。
    fn readable_bytes(&self) -> usize {
        self.write_cursor() - self.read_cursor()
    }

    /// 无需扩容即可写入的字节数。
    fn writable_bytes(&self) -> usize {
        self.capacity() - self.write_cursor()
    }

    /// 是否仍有未读字节。
    fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }
}
