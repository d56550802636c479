//! 单线程事件循环。
//!
//! # 模块定位（Why）
//! - 通道注册、读就绪回调、解码器调用都只在循环线程上以任务形式执行，
//!   同一通道的任意两个回调因此天然串行，无需为缓冲、检查点与解码状态加锁；
//! - 循环本身是确定性的“轮询 + 排空”原语，不包含 I/O 多路复用，
//!   空闲等待由外部驱动者依据 [`EventLoop::next_scheduled_delay`] 决定。
//!
//! # 结构概览（How）
//! - [`EventLoop`]：唯一的驱动者，持有 `&mut self` 才能运行任务，静态保证不会与自身并发；
//! - [`EventLoopHandle`]：可克隆、可跨线程的投递入口；
//! - [`ScheduledHandle`]：定时任务的取消与状态查询句柄。
//!
//! # 契约说明（What）
//! - 即时任务按 FIFO 恰好执行一次；
//! - 定时任务按截止时间排序，截止时间相同时按提交序号；
//! - 任务 panic 不被捕获，但队列在 panic 之后仍可继续排空。

use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
    time::Duration,
};

use parking_lot::Mutex;
use spark_core::{Clock, MonotonicTimePoint, SystemClock};
use tracing::{debug, trace};

use crate::{config::EventLoopConfig, error::EventLoopError};

/// 事件循环上执行的一次性任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

struct Shared {
    tasks: Mutex<VecDeque<Task>>,
    scheduled: Mutex<TimerQueue>,
    next_seq: AtomicU64,
    shutdown: AtomicBool,
    driver: Mutex<Option<ThreadId>>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn ensure_open(&self) -> Result<(), EventLoopError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(EventLoopError::Shutdown);
        }
        Ok(())
    }
}

/// 定时任务堆与其中已取消条目的计数。
///
/// # 教案式说明
/// - **意图 (Why)**：取消只能改写共享状态，条目本身仍留在堆中；若已取消的条目排在
///   某个较早的有效截止时间之后，它会一直占据堆空间直到那个截止时间过去；
/// - **逻辑 (How)**：任务闭包存放在 [`ScheduledState`] 中，取消时立即释放；
///   堆里只剩空壳条目，`cancelled` 超过堆长度一半时整体清理一次；
/// - **契约 (What)**：`cancelled` 是近似值，只用于触发清理，清理后归零；
///   取消与出队竞争时可能多计一次，最多导致一次提前清理。
#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<ScheduledEntry>,
    cancelled: usize,
}

impl TimerQueue {
    fn push(&mut self, entry: ScheduledEntry) {
        self.heap.push(entry);
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    /// 弹出截止时间不晚于 `now` 的堆顶条目。
    fn pop_due(&mut self, now: MonotonicTimePoint) -> Option<ScheduledEntry> {
        if self.heap.peek()?.deadline > now {
            return None;
        }
        let entry = self.heap.pop()?;
        if entry.state.is_cancelled() {
            self.cancelled = self.cancelled.saturating_sub(1);
        }
        Some(entry)
    }

    /// 丢弃堆顶的已取消条目，返回第一个有效条目的截止时间。
    fn next_live_deadline(&mut self) -> Option<MonotonicTimePoint> {
        while self.heap.peek()?.state.is_cancelled() {
            self.heap.pop();
            self.cancelled = self.cancelled.saturating_sub(1);
        }
        self.heap.peek().map(|entry| entry.deadline)
    }

    fn note_cancelled(&mut self) {
        self.cancelled += 1;
        if self.cancelled * 2 > self.heap.len() {
            let before = self.heap.len();
            self.heap.retain(|entry| !entry.state.is_cancelled());
            self.cancelled = 0;
            trace!(
                purged = before - self.heap.len(),
                remaining = self.heap.len(),
                "purged cancelled scheduled tasks"
            );
        }
    }

    fn drain(&mut self) -> Vec<ScheduledEntry> {
        self.cancelled = 0;
        self.heap.drain().collect()
    }
}

/// `EventLoop` 是任务队列与定时任务队列的唯一驱动者。
///
/// # 设计背景（Why）
/// - “同一循环上的回调永不并发”以构造方式保证：运行方法都要求 `&mut self`，
///   而 `EventLoop` 不可克隆，因此同一时刻只可能有一个线程在驱动它；
/// - 其它线程只能通过 [`EventLoopHandle`] 投递任务，不能执行任务。
///
/// # 逻辑解析（How）
/// - 即时任务存放在 `VecDeque` 中，出队时短暂持锁，释放锁后再执行任务；
/// - 定时任务存放在以 `(deadline, seq)` 逆序排列的 `BinaryHeap` 中，堆顶即最早到期者；
/// - 取消时立即释放任务闭包，堆中留下的空壳条目在出队时跳过，
///   数量超过堆长度一半时由 [`TimerQueue`] 整体清理。
///
/// # 风险提示（Trade-offs）
/// - 任务 panic 会沿调用栈传播给驱动者；由于执行期间不持锁且 `parking_lot` 锁不会中毒，
///   驱动者捕获 panic 后可继续调用运行方法排空剩余任务。
pub struct EventLoop {
    shared: Arc<Shared>,
    max_tasks_per_drain: Option<usize>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl EventLoop {
    /// 使用给定时钟创建事件循环。
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(&EventLoopConfig::default(), clock)
    }

    /// 按配置创建事件循环。
    pub fn with_config(config: &EventLoopConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tasks: Mutex::new(VecDeque::with_capacity(config.initial_task_capacity)),
                scheduled: Mutex::new(TimerQueue::default()),
                next_seq: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                driver: Mutex::new(None),
                clock,
            }),
            max_tasks_per_drain: config.max_tasks_per_drain,
        }
    }

    /// 获取可跨线程投递任务的句柄。
    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 循环使用的时钟读数。
    pub fn now(&self) -> MonotonicTimePoint {
        self.shared.clock.now()
    }

    /// 投递即时任务，等价于 `self.handle().submit(task)`。
    pub fn submit<F>(&self, task: F) -> Result<(), EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().submit(task)
    }

    /// 投递延迟任务，等价于 `self.handle().schedule(task, delay)`。
    pub fn schedule<F>(&self, task: F, delay: Duration) -> Result<ScheduledHandle, EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().schedule(task, delay)
    }

    /// 在当前线程上按 FIFO 执行即时任务，直到队列为空。
    ///
    /// 执行期间新投递的任务同样会在本次调用中执行；配置了 `max_tasks_per_drain` 时，
    /// 达到上限即返回，剩余任务留待下一次调用。返回执行的任务数。
    pub fn run_pending_tasks(&mut self) -> usize {
        let _driver = DriverGuard::enter(&self.shared);
        let mut ran = 0;
        loop {
            if self.max_tasks_per_drain.is_some_and(|limit| ran >= limit) {
                break;
            }
            let next = self.shared.tasks.lock().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "drained pending tasks");
        }
        ran
    }

    /// 执行所有截止时间不晚于 `now` 的定时任务，返回距离下一个待执行截止时间的延迟。
    ///
    /// # 契约说明
    /// - 按截止时间升序执行，截止时间相同时按提交顺序；
    /// - 已取消的条目被跳过且不计入返回值；
    /// - 返回 `None` 表示没有待执行的定时任务。
    pub fn run_due_scheduled_tasks(&mut self, now: MonotonicTimePoint) -> Option<Duration> {
        self.drain_due(now);
        self.next_scheduled_delay(now)
    }

    /// 距离下一个未取消定时任务的截止时间还有多久；已到期时返回零。
    pub fn next_scheduled_delay(&self, now: MonotonicTimePoint) -> Option<Duration> {
        self.shared
            .scheduled
            .lock()
            .next_live_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// 取消并丢弃全部未执行的定时任务，返回被取消的数量。
    pub fn cancel_scheduled_tasks(&mut self) -> usize {
        let drained = self.shared.scheduled.lock().drain();
        let cancelled = drained
            .into_iter()
            .filter(|entry| entry.state.cancel())
            .count();
        debug!(cancelled, "cancelled pending scheduled tasks");
        cancelled
    }

    /// 交替排空即时任务与已到期定时任务，直到当前时刻没有任何可运行的任务。
    ///
    /// 返回执行的任务总数。
    pub fn run_until_idle(&mut self) -> usize {
        let mut total = 0;
        loop {
            let now = self.shared.clock.now();
            let ran = self.run_pending_tasks() + self.drain_due(now);
            if ran == 0 {
                break;
            }
            total += ran;
        }
        total
    }

    /// 是否仍有排队中的即时任务。
    pub fn has_pending_tasks(&self) -> bool {
        !self.shared.tasks.lock().is_empty()
    }

    fn drain_due(&mut self, now: MonotonicTimePoint) -> usize {
        let _driver = DriverGuard::enter(&self.shared);
        let mut ran = 0;
        loop {
            let next = self.shared.scheduled.lock().pop_due(now);
            let Some(entry) = next else {
                break;
            };
            let Some(task) = entry.state.try_start() else {
                continue;
            };
            let _done = DoneGuard(&entry.state);
            trace!(deadline = ?entry.deadline, seq = entry.seq, "running scheduled task");
            task();
            ran += 1;
        }
        ran
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending_tasks", &self.shared.tasks.lock().len())
            .field("scheduled_tasks", &self.shared.scheduled.lock().len())
            .field("shutdown", &self.shared.shutdown.load(Ordering::Acquire))
            .finish()
    }
}

/// 跨线程投递任务的句柄。
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<Shared>,
}

impl EventLoopHandle {
    /// 线程安全地投递即时任务，从不阻塞；循环关闭后返回 [`EventLoopError::Shutdown`]。
    pub fn submit<F>(&self, task: F) -> Result<(), EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.ensure_open()?;
        self.shared.tasks.lock().push_back(Box::new(task));
        Ok(())
    }

    /// 在 `delay` 之后执行任务。
    pub fn schedule<F>(&self, task: F, delay: Duration) -> Result<ScheduledHandle, EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = self.shared.clock.now().saturating_add(delay);
        self.schedule_at(task, deadline)
    }

    /// 在指定截止时间执行任务。
    pub fn schedule_at<F>(
        &self,
        task: F,
        deadline: MonotonicTimePoint,
    ) -> Result<ScheduledHandle, EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.ensure_open()?;
        let state = Arc::new(ScheduledState::new(Box::new(task)));
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        self.shared.scheduled.lock().push(ScheduledEntry {
            deadline,
            seq,
            state: Arc::clone(&state),
        });
        Ok(ScheduledHandle {
            state,
            deadline,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// 当前线程是否正在驱动该循环。
    pub fn in_event_loop(&self) -> bool {
        *self.shared.driver.lock() == Some(thread::current().id())
    }

    /// 关闭循环：之后的投递全部失败，已排队的任务仍可被排空。
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!("event loop shutdown requested");
        }
    }

    /// 循环是否已关闭。
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// 定时任务句柄。
///
/// 在任务被取出执行之前调用 [`cancel`](Self::cancel) 可阻止其运行；开始执行后取消无效。
/// 句柄只弱引用循环，循环销毁后取消仍然有效。
#[derive(Clone)]
pub struct ScheduledHandle {
    state: Arc<ScheduledState>,
    deadline: MonotonicTimePoint,
    shared: Weak<Shared>,
}

impl ScheduledHandle {
    /// 尝试取消任务，成功时返回 `true`。
    ///
    /// 成功取消会立即释放任务闭包及其捕获的值。
    pub fn cancel(&self) -> bool {
        if !self.state.cancel() {
            return false;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.scheduled.lock().note_cancelled();
        }
        debug!(deadline = ?self.deadline, "scheduled task cancelled");
        true
    }

    /// 任务是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// 任务是否已执行完毕（包括执行中 panic 的情况）。
    pub fn is_done(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == DONE
    }

    /// 任务的截止时间。
    pub fn deadline(&self) -> MonotonicTimePoint {
        self.deadline
    }
}

impl fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("deadline", &self.deadline)
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.is_done())
            .finish()
    }
}

/// 定时任务的状态机与尚未执行的闭包，由堆条目与句柄共享。
struct ScheduledState {
    status: AtomicU8,
    task: Mutex<Option<Task>>,
}

impl ScheduledState {
    fn new(task: Task) -> Self {
        Self {
            status: AtomicU8::new(PENDING),
            task: Mutex::new(Some(task)),
        }
    }

    /// 赢得 PENDING→RUNNING 竞争时取出闭包。
    fn try_start(&self) -> Option<Task> {
        if !self.transition(PENDING, RUNNING) {
            return None;
        }
        let task = self.task.lock().take();
        if task.is_none() {
            self.status.store(DONE, Ordering::Release);
        }
        task
    }

    /// 赢得 PENDING→CANCELLED 竞争时释放闭包，闭包在锁外析构。
    fn cancel(&self) -> bool {
        if !self.transition(PENDING, CANCELLED) {
            return false;
        }
        let task = self.task.lock().take();
        drop(task);
        true
    }

    fn is_cancelled(&self) -> bool {
        self.status.load(Ordering::Acquire) == CANCELLED
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.status
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct ScheduledEntry {
    deadline: MonotonicTimePoint,
    seq: u64,
    state: Arc<ScheduledState>,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    // `BinaryHeap` 是最大堆，逆序比较使最早截止（同截止时最小序号）位于堆顶。
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 运行期间登记驱动线程，退出（含 panic 展开）时恢复先前的值。
struct DriverGuard<'a> {
    shared: &'a Shared,
    previous: Option<ThreadId>,
}

impl<'a> DriverGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let previous = shared.driver.lock().replace(thread::current().id());
        Self { shared, previous }
    }
}

impl Drop for DriverGuard<'_> {
    fn drop(&mut self) {
        *self.shared.driver.lock() = self.previous;
    }
}

struct DoneGuard<'a>(&'a ScheduledState);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.status.store(DONE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use spark_core::MockClock;

    fn mock_loop() -> (EventLoop, MockClock) {
        let clock = MockClock::new();
        (EventLoop::new(Arc::new(clock.clone())), clock)
    }

    fn recorder() -> (Arc<PlMutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |name: &'static str| -> Task {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().push(name))
        };
        (log, make)
    }

    #[test]
    fn pending_tasks_run_fifo() {
        let (mut event_loop, _) = mock_loop();
        let (log, make) = recorder();
        for name in ["a", "b", "c"] {
            event_loop.submit(make(name)).expect("投递任务");
        }
        assert_eq!(event_loop.run_pending_tasks(), 3);
        assert_eq!(*log.lock(), ["a", "b", "c"]);
        assert_eq!(event_loop.run_pending_tasks(), 0, "每个任务只执行一次");
    }

    #[test]
    fn drain_limit_leaves_rest_queued() {
        let config = EventLoopConfig {
            max_tasks_per_drain: Some(2),
            ..EventLoopConfig::default()
        };
        let mut event_loop = EventLoop::with_config(&config, Arc::new(MockClock::new()));
        let (log, make) = recorder();
        for name in ["a", "b", "c"] {
            event_loop.submit(make(name)).expect("投递任务");
        }
        assert_eq!(event_loop.run_pending_tasks(), 2);
        assert!(event_loop.has_pending_tasks());
        assert_eq!(event_loop.run_pending_tasks(), 1);
        assert_eq!(*log.lock(), ["a", "b", "c"]);
    }

    #[test]
    fn next_delay_skips_cancelled_head() {
        let (event_loop, _) = mock_loop();
        let first = event_loop
            .schedule(|| {}, Duration::from_nanos(5))
            .expect("调度");
        event_loop
            .schedule(|| {}, Duration::from_nanos(9))
            .expect("调度");
        assert!(first.cancel());
        assert_eq!(
            event_loop.next_scheduled_delay(MonotonicTimePoint::ZERO),
            Some(Duration::from_nanos(9))
        );
    }

    #[test]
    fn cancelled_entries_are_purged_once_they_dominate() {
        let (event_loop, _) = mock_loop();
        event_loop
            .schedule(|| {}, Duration::from_nanos(1_000))
            .expect("调度");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                event_loop
                    .schedule(|| {}, Duration::from_nanos(5_000))
                    .expect("调度")
            })
            .collect();

        assert!(handles[0].cancel());
        assert!(handles[1].cancel());
        assert_eq!(event_loop.shared.scheduled.lock().len(), 5, "未过半时保留空壳条目");

        assert!(handles[2].cancel());
        let queue = event_loop.shared.scheduled.lock();
        assert_eq!(queue.len(), 2, "过半后一次性清理");
        assert_eq!(queue.cancelled, 0);
    }

    #[test]
    fn cancel_after_loop_dropped_still_releases_task() {
        let payload = Arc::new(());
        let captured = Arc::clone(&payload);
        let handle = {
            let (event_loop, _) = mock_loop();
            event_loop
                .schedule(move || drop(captured), Duration::from_nanos(5))
                .expect("调度")
        };
        assert_eq!(Arc::strong_count(&payload), 2, "句柄仍持有未执行的闭包");
        assert!(handle.cancel());
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn in_event_loop_only_while_driving() {
        let (mut event_loop, _) = mock_loop();
        let handle = event_loop.handle();
        assert!(!handle.in_event_loop());
        let observed = Arc::new(AtomicBool::new(false));
        let observer = handle.clone();
        let flag = Arc::clone(&observed);
        event_loop
            .submit(move || flag.store(observer.in_event_loop(), Ordering::SeqCst))
            .expect("投递任务");
        event_loop.run_pending_tasks();
        assert!(observed.load(Ordering::SeqCst));
        assert!(!handle.in_event_loop());
    }
}
