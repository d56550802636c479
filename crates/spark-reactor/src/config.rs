//! 运行时配置。
//!
//! # 模块定位（Why）
//! - 接收上限与事件循环参数需要在部署期通过配置文件调整，而非重新编译；
//! - 解析与校验分离：反序列化只检查类型，上限组合的合法性在构建运行时对象时统一校验，
//!   与运行期 `set_bounds` 走同一条校验路径。
//!
//! # 配置格式（What）
//! ```toml
//! [recv]
//! max_bytes_per_read = 65536
//! max_bytes_per_individual_read = 16384
//!
//! [event_loop]
//! initial_task_capacity = 32
//! max_tasks_per_drain = 1024
//! ```
//! 所有字段均可省略，省略时使用默认值。

use serde::Deserialize;

use crate::{
    error::{ConfigError, RecvConfigError},
    recv::{
        DEFAULT_MAX_BYTES_PER_INDIVIDUAL_READ, DEFAULT_MAX_BYTES_PER_READ, MaxBytesRecvAllocator,
        RecvBounds,
    },
};

/// 反应器整体配置。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReactorConfig {
    pub recv: RecvConfig,
    pub event_loop: EventLoopConfig,
}

impl ReactorConfig {
    /// 从 TOML 文本解析配置，并校验接收上限组合。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ReactorConfig = toml::from_str(source)?;
        config.recv.bounds()?;
        Ok(config)
    }

    /// 按配置构建接收分配器。
    pub fn build_recv_allocator(&self) -> Result<MaxBytesRecvAllocator, RecvConfigError> {
        self.recv.bounds().map(MaxBytesRecvAllocator::from_bounds)
    }

    /// 将配置中的接收上限整体应用到已有分配器。
    pub fn apply_to(&self, allocator: &MaxBytesRecvAllocator) -> Result<(), RecvConfigError> {
        allocator.set_bounds(self.recv.bounds()?)
    }
}

/// `[recv]` 段：接收分配器上限。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RecvConfig {
    pub max_bytes_per_read: usize,
    pub max_bytes_per_individual_read: usize,
}

impl RecvConfig {
    /// 校验并转换为 [`RecvBounds`]。
    pub fn bounds(&self) -> Result<RecvBounds, RecvConfigError> {
        RecvBounds::new(self.max_bytes_per_read, self.max_bytes_per_individual_read)
    }
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_read: DEFAULT_MAX_BYTES_PER_READ,
            max_bytes_per_individual_read: DEFAULT_MAX_BYTES_PER_INDIVIDUAL_READ,
        }
    }
}

/// `[event_loop]` 段。
///
/// - `initial_task_capacity`：即时任务队列的初始容量；
/// - `max_tasks_per_drain`：单次 `run_pending_tasks` 最多执行的任务数，`None` 表示排空为止。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EventLoopConfig {
    pub initial_task_capacity: usize,
    pub max_tasks_per_drain: Option<usize>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            initial_task_capacity: 16,
            max_tasks_per_drain: None,
        }
    }
}
