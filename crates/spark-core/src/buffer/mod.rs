//! 字节游标缓冲契约。
//!
//! # 模块定位（Why）
//! - 接收分配器、传输读路径与重放式解码器都需要同一种“读游标 + 写游标”的字节区域视图，
//!   契约集中在此处，具体实现由 `spark-buffer` 提供，避免核心 crate 绑定内存策略。
//!
//! # 结构概览（What）
//! - [`CursorBuf`]：带独立读写游标的可增长字节区域，满足 `0 <= read <= write <= capacity`；
//! - [`BufferAllocator`]：按容量租借 [`CursorBuf`] 的工厂，由接收分配器在每次读取前调用。

mod allocator;
mod cursor;

pub use allocator::BufferAllocator;
pub use cursor::CursorBuf;
