//! `spark-buffer` 提供 `spark-core` 游标缓冲契约的具体实现。
//!
//! # 模块定位（Why）
//! - 为 [`CursorBuf`](spark_core::CursorBuf) 契约提供基于 `bytes::BytesMut` 的实现，
//!   支撑接收分配器的逐次租借与解码器的累积缓冲；
//! - 通过租约（Lease）与回收器把“最后一个持有者释放时归还内存”落到 `Drop` 上，
//!   所有退出路径（包括解码失败）都不会遗漏释放。
//!
//! # 设计概要（How）
//! - `cursor_buffer` 模块实现 [`CursorBuffer`] 与拆分出的只读视图 [`SharedBytes`]；
//! - `pool` 模块实现带自由链表的 [`RecyclingAllocator`]，并暴露统计快照 [`AllocatorStats`]。

mod cursor_buffer;
mod pool;

pub use cursor_buffer::{BufferRecycler, CursorBuffer, ReclaimedBuffer, SharedBytes};
pub use pool::{AllocatorStats, RecyclingAllocator};
