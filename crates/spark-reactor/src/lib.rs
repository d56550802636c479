#![deny(unsafe_code)]
#![doc = "spark-reactor: 单线程事件循环与自适应接收分配器。"]
#![doc = ""]
#![doc = "== 模块职责 =="]
#![doc = "1. `event_loop`：任务队列与按截止时间排序的定时任务队列，以 `&mut self` 保证单一驱动者。"]
#![doc = "2. `recv`：`cycle_cap`/`attempt_cap` 双上限的接收分配器与每通道读周期句柄。"]
#![doc = "3. `config`：TOML 配置加载与校验。"]
#![doc = "4. `telemetry`：全局 tracing 订阅器安装入口。"]

pub mod config;
pub mod error;
pub mod event_loop;
pub mod recv;
pub mod telemetry;

pub use config::{EventLoopConfig, ReactorConfig, RecvConfig};
pub use error::{ConfigError, EventLoopError, RecvConfigError};
pub use event_loop::{EventLoop, EventLoopHandle, ScheduledHandle, Task};
pub use recv::{MaxBytesRecvAllocator, MaxBytesRecvHandle, RecvBounds, RecvOutcome};
