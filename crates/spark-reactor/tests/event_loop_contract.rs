//! `event_loop_contract` 集成测试：验证单线程事件循环的排序、取消与故障恢复契约。
//!
//! # 测试目标（Why）
//! - 定时任务必须严格按截止时间执行，截止时间相同时按提交顺序，较早截止的任务不会被先提交的较晚任务饿死；
//! - 任务 panic 不得破坏队列，后续任务仍能继续排空；
//! - 关闭后拒绝新任务，已排队任务仍可执行。

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use spark_core::{MockClock, MonotonicTimePoint};
use spark_reactor::{EventLoop, EventLoopError};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn push(log: &Log, name: &'static str) -> impl FnOnce() + Send + 'static {
    let log = Arc::clone(log);
    move || log.lock().push(name)
}

fn mock_loop() -> (EventLoop, MockClock) {
    let clock = MockClock::new();
    (EventLoop::new(Arc::new(clock.clone())), clock)
}

fn at(nanos: u64) -> MonotonicTimePoint {
    MonotonicTimePoint::from_nanos(nanos)
}

/// 截止 10 的 A 先提交、截止 5 的 B 后提交，在时刻 12 排空时 B 先于 A 执行。
#[test]
fn earlier_deadline_runs_first() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handle = event_loop.handle();
    handle.schedule_at(push(&log, "A"), at(10)).expect("调度 A");
    handle.schedule_at(push(&log, "B"), at(5)).expect("调度 B");

    let next = event_loop.run_due_scheduled_tasks(at(12));
    assert_eq!(*log.lock(), ["B", "A"]);
    assert_eq!(next, None, "没有剩余定时任务");
}

/// 相同截止时间按提交顺序执行。
#[test]
fn identical_deadlines_run_in_submission_order() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handle = event_loop.handle();
    for name in ["first", "second", "third"] {
        handle.schedule_at(push(&log, name), at(7)).expect("调度");
    }
    event_loop.run_due_scheduled_tasks(at(7));
    assert_eq!(*log.lock(), ["first", "second", "third"]);
}

/// 未到期任务保留在队列中，返回值给出距下一个截止时间的延迟。
#[test]
fn returns_delay_until_next_deadline() {
    let (mut event_loop, clock) = mock_loop();
    let log = Log::default();
    event_loop
        .schedule(push(&log, "late"), Duration::from_nanos(30))
        .expect("调度");
    event_loop
        .schedule(push(&log, "early"), Duration::from_nanos(10))
        .expect("调度");

    clock.advance(Duration::from_nanos(10));
    let now = event_loop.now();
    let next = event_loop.run_due_scheduled_tasks(now);
    assert_eq!(*log.lock(), ["early"]);
    assert_eq!(next, Some(Duration::from_nanos(20)));
}

/// 取消在执行前生效，执行后取消无效。
#[test]
fn cancel_before_run_prevents_execution() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handle = event_loop.handle();
    let cancelled = handle.schedule_at(push(&log, "cancelled"), at(1)).expect("调度");
    let kept = handle.schedule_at(push(&log, "kept"), at(2)).expect("调度");

    assert!(cancelled.cancel());
    assert!(cancelled.is_cancelled());
    event_loop.run_due_scheduled_tasks(at(5));

    assert_eq!(*log.lock(), ["kept"]);
    assert!(kept.is_done());
    assert!(!kept.cancel(), "执行完毕后取消无效");
    assert!(!cancelled.is_done());
}

/// `cancel_scheduled_tasks` 丢弃全部待执行任务。
#[test]
fn cancel_all_scheduled_tasks() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handles: Vec<_> = (1..=3)
        .map(|n| {
            event_loop
                .handle()
                .schedule_at(push(&log, "never"), at(n))
                .expect("调度")
        })
        .collect();
    assert_eq!(event_loop.cancel_scheduled_tasks(), 3);
    assert_eq!(event_loop.run_due_scheduled_tasks(at(100)), None);
    assert!(log.lock().is_empty());
    assert!(handles.iter().all(|handle| handle.is_cancelled()));
}

/// 取消立即释放闭包捕获的值，即使堆顶还压着一个更早的有效任务。
#[test]
fn cancel_releases_captured_values_immediately() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handle = event_loop.handle();
    handle.schedule_at(push(&log, "live"), at(1_000)).expect("调度");

    let payloads: Vec<Arc<Vec<u8>>> = (0..64).map(|_| Arc::new(vec![0; 1024])).collect();
    for payload in &payloads {
        let captured = Arc::clone(payload);
        let scheduled = handle
            .schedule_at(move || drop(captured), at(5_000))
            .expect("调度");
        assert_eq!(Arc::strong_count(payload), 2);
        assert!(scheduled.cancel());
        assert_eq!(Arc::strong_count(payload), 1, "取消后闭包已析构");
    }

    assert_eq!(event_loop.run_due_scheduled_tasks(at(10)), Some(Duration::from_nanos(990)));
    assert!(format!("{event_loop:?}").contains("scheduled_tasks: 1"), "已取消条目被清理");
    assert_eq!(event_loop.run_due_scheduled_tasks(at(1_000)), None);
    assert_eq!(*log.lock(), ["live"]);
}

/// 任务 panic 之后，队列仍能继续排空剩余任务。
#[test]
fn panicking_task_does_not_corrupt_queue() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    event_loop.submit(push(&log, "before")).expect("投递");
    event_loop.submit(|| panic!("task failure")).expect("投递");
    event_loop.submit(push(&log, "after")).expect("投递");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| event_loop.run_pending_tasks()));
    assert!(outcome.is_err(), "panic 应传播给驱动者");
    assert_eq!(event_loop.run_pending_tasks(), 1);
    assert_eq!(*log.lock(), ["before", "after"]);
}

/// 定时任务 panic 后句柄仍标记为完成，后续定时任务照常执行。
#[test]
fn panicking_scheduled_task_is_marked_done() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handle = event_loop.handle();
    let failing = handle
        .schedule_at(|| panic!("scheduled failure"), at(1))
        .expect("调度");
    handle.schedule_at(push(&log, "next"), at(2)).expect("调度");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        event_loop.run_due_scheduled_tasks(at(3))
    }));
    assert!(outcome.is_err());
    assert!(failing.is_done());
    event_loop.run_due_scheduled_tasks(at(3));
    assert_eq!(*log.lock(), ["next"]);
}

/// 其它线程投递的任务在驱动线程上按入队顺序执行。
#[test]
fn submissions_from_other_threads_run_on_driver() {
    let (mut event_loop, _) = mock_loop();
    let handle = event_loop.handle();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..4)
        .map(|id| {
            let handle = handle.clone();
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                let observer = handle.clone();
                handle
                    .submit(move || seen.lock().push((id, observer.in_event_loop())))
                    .expect("跨线程投递");
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("工作线程退出");
    }

    assert_eq!(event_loop.run_pending_tasks(), 4);
    let seen = seen.lock();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|(_, on_loop)| *on_loop));
}

/// 关闭后拒绝新任务，但已排队任务仍会执行。
#[test]
fn shutdown_rejects_new_work_but_drains_queue() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handle = event_loop.handle();
    handle.submit(push(&log, "queued")).expect("投递");
    handle.shutdown();

    assert_eq!(
        handle.submit(push(&log, "rejected")),
        Err(EventLoopError::Shutdown)
    );
    assert!(matches!(
        handle.schedule(push(&log, "rejected"), Duration::ZERO),
        Err(EventLoopError::Shutdown)
    ));
    event_loop.run_pending_tasks();
    assert_eq!(*log.lock(), ["queued"]);
}

/// `run_until_idle` 连同任务执行中新投递的工作一起排空。
#[test]
fn run_until_idle_follows_chained_work() {
    let (mut event_loop, _) = mock_loop();
    let log = Log::default();
    let handle = event_loop.handle();
    let chained_log = Arc::clone(&log);
    let chained_handle = handle.clone();
    handle
        .submit(move || {
            chained_log.lock().push("outer");
            let inner_log = Arc::clone(&chained_log);
            chained_handle
                .schedule(move || inner_log.lock().push("timer"), Duration::ZERO)
                .expect("任务内调度");
        })
        .expect("投递");

    assert_eq!(event_loop.run_until_idle(), 2);
    assert_eq!(*log.lock(), ["outer", "timer"]);
}
