//! 单调时间抽象，为事件循环的定时任务提供可注入的时间源。
//!
//! # 模块定位（Why）
//! - 定时任务队列按截止时间排序，若直接读取系统时钟将导致“截止 5 与截止 10 的先后”这类断言无法在测试中复现；
//! - `Clock` trait 统一 `now` 原语，生产环境使用 [`SystemClock`]，测试注入 [`MockClock`] 手动推进。
//!
//! # 结构概览（What）
//! - [`MonotonicTimePoint`]：以“自时钟基准起的偏移”表达的单调时间点，纳秒精度；
//! - [`Clock`]：时间源 trait；
//! - [`SystemClock`] / [`MockClock`]：真实与虚拟实现。

mod clock;

pub use clock::{Clock, MockClock, MonotonicTimePoint, SystemClock};
