use super::CursorBuf;
use crate::error::CoreError;

/// `BufferAllocator` 为读路径提供按容量租借缓冲的入口。
///
/// # 设计背景（Why）
/// - 接收分配器只决定“这次读多少”，至于内存来自自由链表还是直接堆分配，由实现者决定；
/// - 以关联类型暴露具体缓冲，读路径可在编译期获得零成本的具体类型。
///
/// # 契约说明（What）
/// - `allocate(capacity)` 返回的缓冲满足 `writable_bytes() >= capacity`，两个游标均为 0；
/// - 实现必须线程安全，配置线程与事件循环线程可能同时持有同一分配器。
pub trait BufferAllocator: Send + Sync {
    /// 分配得到的缓冲类型。
    type Buffer: CursorBuf;

    /// 租借一块至少 `capacity` 字节可写空间的缓冲。
    fn allocate(&self, capacity: usize) -> Result<Self::Buffer, CoreError>;
}
