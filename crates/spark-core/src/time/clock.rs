use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// `MonotonicTimePoint` 以相对时间刻度表达单调时钟读数。
///
/// # 设计背景（Why）
/// - 定时任务的截止时间需要可比较、可饱和加减，并且与具体计时源解耦；
/// - 内部以自时钟基准以来的偏移量（`Duration`）表示，避免依赖壁钟时间。
///
/// # 契约说明（What）
/// - **前置条件**：参与比较的时间点必须来自同一个 [`Clock`]；
/// - **后置条件**：全部运算饱和处理，不会因溢出 panic。
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicTimePoint(Duration);

impl MonotonicTimePoint {
    /// 时间原点。
    pub const ZERO: MonotonicTimePoint = MonotonicTimePoint(Duration::ZERO);

    /// 根据基准以来的偏移量构造时间点。
    pub const fn from_offset(offset: Duration) -> Self {
        MonotonicTimePoint(offset)
    }

    /// 以纳秒偏移构造时间点。
    pub const fn from_nanos(nanos: u64) -> Self {
        MonotonicTimePoint(Duration::from_nanos(nanos))
    }

    /// 返回自基准以来的偏移。
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// 返回纳秒偏移，超过 `u64` 表达范围时饱和。
    pub fn as_nanos(&self) -> u64 {
        u64::try_from(self.0.as_nanos()).unwrap_or(u64::MAX)
    }

    /// 计算两个时间点的饱和差值。
    pub fn saturating_duration_since(&self, earlier: MonotonicTimePoint) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// 基于当前时间点叠加偏移量。
    pub fn saturating_add(&self, delta: Duration) -> MonotonicTimePoint {
        MonotonicTimePoint(self.0.saturating_add(delta))
    }
}

impl fmt::Debug for MonotonicTimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T+{}ns", self.0.as_nanos())
    }
}

/// 抽象可注入的单调时钟。
///
/// # 接口约束（What）
/// - `now` 返回当前单调时间点，实现者必须保证读数单调不减；
/// - 推荐以 `Arc<dyn Clock>` 注入事件循环等需要时间能力的组件。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> MonotonicTimePoint;
}

/// 基于 [`Instant`] 的系统时钟，基准为进程内首次读取时刻。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> MonotonicTimePoint {
        let base = monotonic_base();
        MonotonicTimePoint::from_offset(Instant::now().duration_since(base))
    }
}

fn monotonic_base() -> Instant {
    static BASE: OnceLock<Instant> = OnceLock::new();
    *BASE.get_or_init(Instant::now)
}

/// 手动推进的虚拟时钟。
///
/// # 教案式说明
/// - **意图 (Why)**：让定时任务的到期顺序在测试中完全确定，不受调度抖动影响；
/// - **逻辑 (How)**：以原子纳秒计数保存当前读数，克隆共享同一计数；
/// - **契约 (What)**：`advance` 单调推进；`set` 只接受不小于当前读数的目标，较小值被忽略以维持单调性；
/// - **权衡 (Trade-offs)**：读数上限为 `u64::MAX` 纳秒（约 584 年），对测试场景足够。
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    nanos: Arc<AtomicU64>,
}

impl MockClock {
    /// 创建读数为零的虚拟时钟。
    pub fn new() -> Self {
        Self::default()
    }

    /// 推进虚拟时间。
    pub fn advance(&self, delta: Duration) {
        let delta = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta))
            });
    }

    /// 将读数设置为指定时间点；目标早于当前读数时保持不变。
    pub fn set(&self, point: MonotonicTimePoint) {
        self.nanos.fetch_max(point.as_nanos(), Ordering::AcqRel);
    }
}

impl Clock for MockClock {
    fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}
