use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use spark_core::{BufferAllocator, CoreError};
use spin::Mutex;

use crate::cursor_buffer::{BufferRecycler, CursorBuffer, ReclaimedBuffer};

/// 自由链表默认可驻留的缓冲数量。
const DEFAULT_FREE_LIST_LIMIT: usize = 64;

/// `RecyclingAllocator` 基于自由链表复用 `BytesMut`，为读路径租借 [`CursorBuffer`]。
///
/// # 模块角色（Why）
/// - 接收分配器每个读周期都会按 `next_guess` 申请缓冲，若每次都走堆分配，
///   高频小包场景的分配成本会压过系统调用本身；
/// - 借助 [`CursorBuffer`] 的租约，在最后一个持有者释放时把内存放回链表，调用方无需关心回收细节。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用容量足够的块；
/// - `PoolMetrics` 以原子计数记录新分配、复用、活跃租约与未命中次数，支撑 [`AllocatorStats`] 快照；
/// - 自由链表达到上限后，新回收的块直接释放，避免峰值流量后长期驻留内存。
///
/// # 契约说明（What）
/// - **线程安全**：共享状态全部由自旋锁与原子计数保护，满足 `Send + Sync + 'static`；
/// - **后置条件**：`allocate(n)` 返回的缓冲满足 `writable_bytes() >= n`，读写游标均为 0。
///
/// # 设计权衡（Trade-offs）
/// - 首个满足容量的块即被复用，不做最佳匹配，避免持锁期间排序；
/// - `shrink_to_fit` 采取“清空自由链表”的简单策略，便于压测后快速归还峰值内存。
#[derive(Clone)]
pub struct RecyclingAllocator {
    inner: Arc<PoolInner>,
}

impl Default for RecyclingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecyclingAllocator {
    /// 创建空池实例。
    pub fn new() -> Self {
        Self::with_free_list_limit(DEFAULT_FREE_LIST_LIMIT)
    }

    /// 指定自由链表最多驻留的缓冲数量。
    pub fn with_free_list_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner::new(limit)),
        }
    }

    /// 清空自由链表，返回释放的总容量。
    pub fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }

    /// 读取统计快照。
    pub fn statistics(&self) -> AllocatorStats {
        self.inner.snapshot()
    }
}

impl BufferAllocator for RecyclingAllocator {
    type Buffer = CursorBuffer;

    fn allocate(&self, capacity: usize) -> Result<CursorBuffer, CoreError> {
        let raw = self.inner.acquire_buffer(capacity);
        let recycler: Arc<dyn BufferRecycler> = self.inner.clone();
        Ok(CursorBuffer::new(raw, recycler))
    }
}

/// 分配器统计快照。
///
/// - `allocated`：走堆分配的次数；
/// - `recycled`：命中自由链表的次数；
/// - `active_leases`：尚未归还的租约数；
/// - `pool_misses`：自由链表非空但没有容量足够的块、只能重新分配的次数；
/// - `free_slots`：自由链表当前驻留的块数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub allocated: u64,
    pub recycled: u64,
    pub active_leases: usize,
    pub pool_misses: u64,
    pub free_slots: usize,
}

struct PoolInner {
    free_list: Mutex<Vec<BytesMut>>,
    free_list_limit: usize,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn new(free_list_limit: usize) -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            free_list_limit,
            metrics: PoolMetrics::default(),
        }
    }

    /// 从自由链表或堆上获取一个满足容量的 `BytesMut`。
    fn acquire_buffer(&self, min_capacity: usize) -> BytesMut {
        let (reused, missed) = {
            let mut list = self.free_list.lock();
            match list.iter().position(|buf| buf.capacity() >= min_capacity) {
                Some(index) => (Some(list.swap_remove(index)), false),
                None => (None, !list.is_empty()),
            }
        };

        let mut buffer = match reused {
            Some(buf) => {
                self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                if missed {
                    self.metrics.pool_misses.fetch_add(1, Ordering::Relaxed);
                }
                self.metrics.allocated.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(min_capacity)
            }
        };
        buffer.clear();
        self.metrics.active_leases.fetch_add(1, Ordering::Relaxed);
        buffer
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        reclaimed
    }

    fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocated: self.metrics.allocated.load(Ordering::Relaxed),
            recycled: self.metrics.recycled.load(Ordering::Relaxed),
            active_leases: self.metrics.active_leases.load(Ordering::Relaxed),
            pool_misses: self.metrics.pool_misses.load(Ordering::Relaxed),
            free_slots: self.free_list.lock().len(),
        }
    }
}

impl BufferRecycler for PoolInner {
    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        let _ = self.metrics.active_leases.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |prev| Some(prev.saturating_sub(1)),
        );
        let Some(mut buf) = reclaimed.into_buffer() else {
            return;
        };
        // 零容量块没有复用价值。
        if buf.capacity() == 0 {
            return;
        }
        buf.clear();
        let mut list = self.free_list.lock();
        if list.len() < self.free_list_limit {
            list.push(buf);
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated: AtomicU64,
    recycled: AtomicU64,
    active_leases: AtomicUsize,
    pool_misses: AtomicU64,
}
