//! 自适应接收分配器。
//!
//! # 模块定位（Why）
//! - 每次读就绪唤醒时，读路径需要回答两个问题：这次系统调用读多少，读完之后是否继续读；
//! - 把“单次读多少”（`attempt_cap`）与“本轮最多读多少”（`cycle_cap`）解耦，
//!   既能在通道饱和时一次唤醒读完大消息，又不会让单个通道饿死同一循环上的其它通道。
//!
//! # 结构概览（What）
//! - [`MaxBytesRecvAllocator`]：可跨线程共享的上限配置，写入与成对读取互斥；
//! - [`MaxBytesRecvHandle`]：每个通道一份的读周期状态，只在事件循环线程上使用；
//! - [`RecvOutcome`]：一次读取的显式结果，替代“负字节数表示结束/错误”的约定。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use spark_core::{BufferAllocator, CoreError};
use tracing::{debug, trace, warn};

use crate::error::RecvConfigError;

/// 整个读周期默认最多读取的字节数。
pub const DEFAULT_MAX_BYTES_PER_READ: usize = 64 * 1024;
/// 单次读取默认最多尝试的字节数。
pub const DEFAULT_MAX_BYTES_PER_INDIVIDUAL_READ: usize = 64 * 1024;

/// 一次读取的结果。
///
/// - `Read(n)`：读到 `n` 字节；
/// - `WouldBlock`：暂时无数据，本轮应让出；
/// - `Closed`：对端关闭，流结束；
/// - `Failed`：底层读取失败，携带错误交由调用方处置。
#[derive(Debug)]
pub enum RecvOutcome {
    Read(usize),
    WouldBlock,
    Closed,
    Failed(CoreError),
}

impl RecvOutcome {
    /// 本次读取产生的字节数，非 `Read` 结果为 0。
    pub fn bytes(&self) -> usize {
        match self {
            RecvOutcome::Read(n) => *n,
            _ => 0,
        }
    }

    /// 是否意味着该通道不会再有后续读取。
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecvOutcome::Closed | RecvOutcome::Failed(_))
    }
}

/// 接收分配器的一组上限。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecvBounds {
    /// 整个读周期最多读取的字节数（`cycle_cap`）。
    pub max_bytes_per_read: usize,
    /// 单次读取最多尝试的字节数（`attempt_cap`）。
    pub max_bytes_per_individual_read: usize,
}

impl RecvBounds {
    /// 构造并校验一组上限。
    pub fn new(
        max_bytes_per_read: usize,
        max_bytes_per_individual_read: usize,
    ) -> Result<Self, RecvConfigError> {
        let bounds = Self {
            max_bytes_per_read,
            max_bytes_per_individual_read,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    fn validate(&self) -> Result<(), RecvConfigError> {
        ensure_positive("max_bytes_per_read", self.max_bytes_per_read)?;
        ensure_positive(
            "max_bytes_per_individual_read",
            self.max_bytes_per_individual_read,
        )?;
        if self.max_bytes_per_individual_read > self.max_bytes_per_read {
            return Err(RecvConfigError::AttemptExceedsCycle {
                attempt: self.max_bytes_per_individual_read,
                cycle: self.max_bytes_per_read,
            });
        }
        Ok(())
    }
}

impl Default for RecvBounds {
    fn default() -> Self {
        Self {
            max_bytes_per_read: DEFAULT_MAX_BYTES_PER_READ,
            max_bytes_per_individual_read: DEFAULT_MAX_BYTES_PER_INDIVIDUAL_READ,
        }
    }
}

fn ensure_positive(field: &'static str, value: usize) -> Result<(), RecvConfigError> {
    if value == 0 {
        return Err(RecvConfigError::NonPositive { field, value });
    }
    Ok(())
}

/// `MaxBytesRecvAllocator` 持有跨线程共享的读上限配置。
///
/// # 设计背景（Why）
/// - 上限是读路径中唯一会被事件循环线程之外修改的状态，配置中心可能随时下发新值；
/// - `attempt_cap <= cycle_cap` 跨越两个字段，单个原子变量无法表达，需要写锁串行化所有写入。
///
/// # 逻辑解析（How）
/// - 两个上限各自存放在 `AtomicUsize` 中，单字段读取无锁；
/// - 所有写入以及需要观察一致组合的 [`bounds`](Self::bounds) 都持有 `writer` 锁；
/// - `Clone` 共享同一份配置，句柄创建后仍能看到之后的更新（在下一次 `reset` 时生效）。
///
/// # 契约说明（What）
/// - **不变量**：任意时刻通过 `bounds()` 观察到的组合都满足 `attempt <= cycle` 且均为正；
/// - **失败语义**：非法更新返回 [`RecvConfigError`]，两个上限保持调用前的值。
///
/// # 风险提示（Trade-offs）
/// - 单字段无锁读取可能观察到“新 cycle + 旧 attempt”的组合，读路径因此只通过 `bounds()` 取值。
#[derive(Clone)]
pub struct MaxBytesRecvAllocator {
    inner: Arc<BoundsCell>,
}

struct BoundsCell {
    max_bytes_per_read: AtomicUsize,
    max_bytes_per_individual_read: AtomicUsize,
    writer: Mutex<()>,
}

impl Default for MaxBytesRecvAllocator {
    fn default() -> Self {
        Self::from_bounds(RecvBounds::default())
    }
}

impl MaxBytesRecvAllocator {
    /// 以给定上限创建分配器。
    pub fn new(
        max_bytes_per_read: usize,
        max_bytes_per_individual_read: usize,
    ) -> Result<Self, RecvConfigError> {
        RecvBounds::new(max_bytes_per_read, max_bytes_per_individual_read).map(Self::from_bounds)
    }

    /// 以已校验的上限创建分配器。
    pub fn from_bounds(bounds: RecvBounds) -> Self {
        Self {
            inner: Arc::new(BoundsCell {
                max_bytes_per_read: AtomicUsize::new(bounds.max_bytes_per_read),
                max_bytes_per_individual_read: AtomicUsize::new(
                    bounds.max_bytes_per_individual_read,
                ),
                writer: Mutex::new(()),
            }),
        }
    }

    /// 整个读周期的上限，无锁读取。
    pub fn max_bytes_per_read(&self) -> usize {
        self.inner.max_bytes_per_read.load(Ordering::Acquire)
    }

    /// 单次读取的上限，无锁读取。
    pub fn max_bytes_per_individual_read(&self) -> usize {
        self.inner
            .max_bytes_per_individual_read
            .load(Ordering::Acquire)
    }

    /// 在写锁保护下读取一致的上限组合。
    pub fn bounds(&self) -> RecvBounds {
        let _guard = self.inner.writer.lock();
        self.load_unguarded()
    }

    /// 更新整个读周期的上限。
    ///
    /// 新值必须为正且不小于当前单次读取上限，否则整次更新被拒绝。
    pub fn set_max_bytes_per_read(&self, value: usize) -> Result<(), RecvConfigError> {
        let _guard = self.inner.writer.lock();
        let candidate = RecvBounds {
            max_bytes_per_read: value,
            ..self.load_unguarded()
        };
        self.apply_locked(candidate)
    }

    /// 更新单次读取的上限。
    pub fn set_max_bytes_per_individual_read(&self, value: usize) -> Result<(), RecvConfigError> {
        let _guard = self.inner.writer.lock();
        let candidate = RecvBounds {
            max_bytes_per_individual_read: value,
            ..self.load_unguarded()
        };
        self.apply_locked(candidate)
    }

    /// 同时更新两个上限，要么全部生效，要么全部拒绝。
    pub fn set_bounds(&self, bounds: RecvBounds) -> Result<(), RecvConfigError> {
        let _guard = self.inner.writer.lock();
        self.apply_locked(bounds)
    }

    /// 为一个通道创建读周期句柄。
    pub fn new_handle(&self) -> MaxBytesRecvHandle {
        MaxBytesRecvHandle::new(self.clone())
    }

    fn load_unguarded(&self) -> RecvBounds {
        RecvBounds {
            max_bytes_per_read: self.max_bytes_per_read(),
            max_bytes_per_individual_read: self.max_bytes_per_individual_read(),
        }
    }

    // 调用方必须持有 `writer` 锁。
    fn apply_locked(&self, candidate: RecvBounds) -> Result<(), RecvConfigError> {
        if let Err(err) = candidate.validate() {
            warn!(
                max_bytes_per_read = candidate.max_bytes_per_read,
                max_bytes_per_individual_read = candidate.max_bytes_per_individual_read,
                error = %err,
                "rejected receive bound update"
            );
            return Err(err);
        }
        self.inner
            .max_bytes_per_read
            .store(candidate.max_bytes_per_read, Ordering::Release);
        self.inner
            .max_bytes_per_individual_read
            .store(candidate.max_bytes_per_individual_read, Ordering::Release);
        debug!(
            max_bytes_per_read = candidate.max_bytes_per_read,
            max_bytes_per_individual_read = candidate.max_bytes_per_individual_read,
            "receive bounds updated"
        );
        Ok(())
    }
}

impl std::fmt::Debug for MaxBytesRecvAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MaxBytesRecvAllocator")
            .field(&self.bounds())
            .finish()
    }
}

/// `MaxBytesRecvHandle` 记录单个通道一轮读周期的状态。
///
/// # 教案式说明
/// - **意图 (Why)**：传输层在一次唤醒内可能多次读取，需要一个随读随记的账本来决定何时让出；
/// - **步骤 (How)**：
///   1. `reset` 以一致的上限组合开启新周期；
///   2. 每次读取前用 `next_guess`（或 `allocate`）确定缓冲大小，并 `record_attempted`；
///   3. 读取后 `record_actual`，再用 `should_continue_reading` 判断是否继续；
///   4. 周期结束调用 `read_complete` 输出汇总日志。
/// - **契约 (What)**：
///   - `next_guess() <= min(attempt_cap, remaining)` 恒成立；
///   - 剩余额度饱和递减，最多被一次读取超出；
///   - `Closed`/`Failed` 立即终止本轮周期。
/// - **权衡 (Trade-offs)**：句柄只在事件循环线程上使用，内部不加锁；需要跨线程时应各自创建句柄。
#[derive(Debug)]
pub struct MaxBytesRecvHandle {
    allocator: MaxBytesRecvAllocator,
    remaining: usize,
    per_attempt_cap: usize,
    attempted: usize,
    last_read: usize,
    total_read: usize,
    halted: bool,
}

impl MaxBytesRecvHandle {
    fn new(allocator: MaxBytesRecvAllocator) -> Self {
        Self {
            allocator,
            remaining: 0,
            per_attempt_cap: 0,
            attempted: 0,
            last_read: 0,
            total_read: 0,
            halted: false,
        }
    }

    /// 开启新的读周期。
    pub fn reset(&mut self) {
        let bounds = self.allocator.bounds();
        self.remaining = bounds.max_bytes_per_read;
        self.per_attempt_cap = bounds.max_bytes_per_individual_read;
        self.attempted = 0;
        self.last_read = 0;
        self.total_read = 0;
        self.halted = false;
    }

    /// 下一次读取应分配的缓冲大小。
    pub fn next_guess(&self) -> usize {
        self.per_attempt_cap.min(self.remaining)
    }

    /// 按 `next_guess` 从缓冲分配器租借一块缓冲。
    pub fn allocate<A>(&self, allocator: &A) -> Result<A::Buffer, CoreError>
    where
        A: BufferAllocator + ?Sized,
    {
        allocator.allocate(self.next_guess())
    }

    /// 记录本次实际提供给读取调用的缓冲大小。
    pub fn record_attempted(&mut self, bytes: usize) {
        self.attempted = bytes;
    }

    /// 记录本次读取的结果。
    pub fn record_actual(&mut self, outcome: &RecvOutcome) {
        match outcome {
            RecvOutcome::Read(bytes) => {
                self.last_read = *bytes;
                self.total_read = self.total_read.saturating_add(*bytes);
                self.remaining = self.remaining.saturating_sub(*bytes);
            }
            RecvOutcome::WouldBlock => {
                self.last_read = 0;
            }
            RecvOutcome::Closed | RecvOutcome::Failed(_) => {
                self.last_read = 0;
                self.remaining = 0;
                self.halted = true;
            }
        }
        trace!(
            attempted = self.attempted,
            last_read = self.last_read,
            remaining = self.remaining,
            "recorded read attempt"
        );
    }

    /// 是否应在本轮继续读取：额度未用尽，且上一次读取填满了提供的缓冲。
    pub fn should_continue_reading(&self) -> bool {
        !self.halted && self.remaining > 0 && self.last_read == self.attempted
    }

    /// 上一次读取的字节数。
    pub fn last_bytes_read(&self) -> usize {
        self.last_read
    }

    /// 上一次提供给读取调用的缓冲大小。
    pub fn attempted_bytes_read(&self) -> usize {
        self.attempted
    }

    /// 本轮累计读取的字节数。
    pub fn total_bytes_read(&self) -> usize {
        self.total_read
    }

    /// 本轮剩余额度。
    pub fn remaining_bytes(&self) -> usize {
        self.remaining
    }

    /// 结束本轮读周期。
    pub fn read_complete(&mut self) {
        debug!(
            total_read = self.total_read,
            remaining = self.remaining,
            halted = self.halted,
            "read cycle complete"
        );
    }
}
