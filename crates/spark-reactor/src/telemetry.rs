//! 日志安装入口。
//!
//! # 模块定位（Why）
//! - 各 crate 只通过 `tracing` 宏输出结构化事件，是否输出、输出到哪里由宿主进程决定；
//! - 宿主若没有自己的订阅器，可调用 [`install`] 一键获得 `fmt` 输出与 `RUST_LOG` 过滤。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装状态的全局缓存，确保 `install` 仅执行一次。
static INSTALLED: OnceLock<()> = OnceLock::new();

/// 未设置 `RUST_LOG` 时的默认过滤指令。
pub const DEFAULT_DIRECTIVE: &str = "info";

/// 日志安装错误。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `install` 被重复调用。
    #[error("telemetry has already been installed")]
    AlreadyInstalled,
    /// 外部已设置全局 tracing 订阅器。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 设置全局订阅器失败。
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局 `tracing` 订阅器：`fmt` 层 + `EnvFilter`。
///
/// # 教案式说明
/// - **逻辑 (How)**：
///   1. 检查重复安装与外部已存在的订阅器；
///   2. 以 `RUST_LOG` 构建过滤器，缺省时使用 [`DEFAULT_DIRECTIVE`]；
///   3. 组装 `registry + EnvFilter + fmt` 并设为全局默认。
/// - **契约 (What)**：重复调用返回 [`TelemetryError::AlreadyInstalled`]；
///   外部已配置订阅器时返回 [`TelemetryError::SubscriberAlreadySet`]。
pub fn install() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
