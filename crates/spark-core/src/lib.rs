#![deny(unsafe_code)]
#![doc = "spark-core: 事件驱动 I/O 核心的共享契约。"]
#![doc = ""]
#![doc = "== 模块职责 =="]
#![doc = "1. `error`：跨 crate 的稳定错误域 `CoreError` 与错误码目录。"]
#![doc = "2. `buffer`：读写游标缓冲契约 `CursorBuf` 与租借入口 `BufferAllocator`。"]
#![doc = "3. `time`：单调时间点与可注入时钟，供事件循环排序定时任务。"]

pub mod buffer;
pub mod error;
pub mod time;

pub use buffer::{BufferAllocator, CursorBuf};
pub use error::{CoreError, ErrorCategory, ErrorCause, Result};
pub use time::{Clock, MockClock, MonotonicTimePoint, SystemClock};
