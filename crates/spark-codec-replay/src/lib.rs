#![deny(unsafe_code)]
#![doc = "spark-codec-replay: 基于检查点回放的流式解码器。"]
#![doc = ""]
#![doc = "== 模块职责 =="]
#![doc = "1. `decoder`：累积缓冲、检查点回退与活性检查的驱动器 `ReplayingDecoder`。"]
#![doc = "2. `context`：解码逻辑看到的 `ReplayContext`，字节不足时返回 `NeedMoreData`。"]
#![doc = "3. `inbound`：接收分配器 + 缓冲 + 解码器组成的单通道读周期。"]

mod context;
mod decoder;
mod error;
mod inbound;
mod sink;

pub use context::ReplayContext;
pub use decoder::{DEFAULT_DISCARD_AFTER_READS, ReplayDecoder, ReplayingDecoder};
pub use error::{DecodeInterrupt, ReplayError};
pub use inbound::{InboundChannel, IoRecvSource, ReadCycleOutcome, RecvSource};
pub use sink::{FnSink, MessageSink};
