//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义事件循环与接收分配器对外暴露的细粒度错误；
//! - 每个枚举都可经 `From` 汇入 [`CoreError`]，调用方可直接用 `?` 传播到统一错误域。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，满足 `Send + Sync + 'static`；
//! - 配置类错误一律表示“整次更新被拒绝”，不存在部分生效的中间态。

use spark_core::{CoreError, error::codes};
use thiserror::Error;

/// 接收分配器上限配置错误。
///
/// # 教案式说明
/// - **意图 (Why)**：`attempt_cap <= cycle_cap` 是跨字段不变量，任何一次写入都可能破坏它，
///   需要把“非正数”与“顺序违规”区分开，便于配置中心给出精确提示；
/// - **契约 (What)**：返回该错误时，分配器的两个上限保持调用前的值。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RecvConfigError {
    /// 上限必须为正数。
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: usize },

    /// 单次读取上限超过了整个读周期上限。
    #[error(
        "max_bytes_per_individual_read ({attempt}) must not exceed max_bytes_per_read ({cycle})"
    )]
    AttemptExceedsCycle { attempt: usize, cycle: usize },
}

impl From<RecvConfigError> for CoreError {
    fn from(err: RecvConfigError) -> Self {
        CoreError::new(codes::RECV_INVALID_BOUND, err.to_string()).with_cause(err)
    }
}

/// 事件循环错误。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum EventLoopError {
    /// 循环已关闭，拒绝新的任务。
    #[error("event loop has been shut down")]
    Shutdown,
}

impl From<EventLoopError> for CoreError {
    fn from(err: EventLoopError) -> Self {
        match err {
            EventLoopError::Shutdown => {
                CoreError::new(codes::EVENT_LOOP_SHUTDOWN, err.to_string())
            }
        }
    }
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 文本无法解析或字段类型不符。
    #[error("failed to parse reactor config: {0}")]
    Parse(#[from] toml::de::Error),

    /// 解析成功但上限组合非法。
    #[error(transparent)]
    InvalidBound(#[from] RecvConfigError),
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Parse(inner) => {
                CoreError::new(codes::CONFIG_PARSE, inner.message().to_owned()).with_cause(inner)
            }
            ConfigError::InvalidBound(inner) => inner.into(),
        }
    }
}
