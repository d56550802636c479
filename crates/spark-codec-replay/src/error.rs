//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - [`DecodeInterrupt`] 是解码步骤的返回信号：区分“数据不足，稍后重放”与“真实失败”；
//! - [`ReplayError`] 是 `feed`/`on_stream_closed` 对调用方暴露的错误，数据不足永远不会出现在这里。
//!
//! ## 设计要求（What）
//! - 真实失败原样透传，不做重试；
//! - 契约违规与真实失败都意味着调用方应关闭通道。

use spark_core::{CoreError, error::codes};
use thiserror::Error;

/// 解码步骤的中断信号。
///
/// # 教案式说明
/// - **意图 (Why)**：解码逻辑读越过已到达的字节时，需要一种“撤销本次尝试”的控制值，
///   它不是错误，只用于让解码器把读游标倒回检查点并等待更多字节；
/// - **契约 (What)**：
///   - `NeedMoreData`：无状态的控制值，只撤销当前这一次解码尝试；
///   - `Failed`：真实失败，中止本次 `feed` 并原样交给调用方。
/// - **用法 (How)**：`ReplayContext` 的读取方法在字节不足时返回 `NeedMoreData`，
///   解码逻辑用 `?` 传播即可，无需在每个字段前做长度检查。
#[derive(Debug, Error)]
pub enum DecodeInterrupt {
    /// 可读字节不足，等待下一次投喂后重放。
    #[error("insufficient data, replay after more bytes arrive")]
    NeedMoreData,
    /// 解码逻辑报告的真实失败。
    #[error(transparent)]
    Failed(#[from] CoreError),
}

impl DecodeInterrupt {
    /// 以协议解码错误码构造失败。
    pub fn protocol(message: impl Into<std::borrow::Cow<'static, str>>) -> Self {
        DecodeInterrupt::Failed(CoreError::new(codes::PROTOCOL_DECODE, message))
    }

    /// 是否为数据不足信号。
    pub fn is_need_more_data(&self) -> bool {
        matches!(self, DecodeInterrupt::NeedMoreData)
    }
}

/// 重放式解码器对调用方暴露的错误。
#[derive(Debug, Error)]
pub enum ReplayError {
    /// 解码逻辑既未消费字节也未改变状态，继续循环将永不终止。
    #[error("decoder contract violated by `{decoder}`: {detail}")]
    ContractViolation {
        decoder: &'static str,
        detail: &'static str,
    },

    /// 解码逻辑报告的真实失败，原样透传。
    #[error("decode failed: {0}")]
    DecodeFailure(#[source] CoreError),

    /// 流已关闭后仍被投喂。
    #[error("stream already closed, no further input accepted")]
    StreamClosed,
}

impl ReplayError {
    /// 失败对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ReplayError::ContractViolation { .. } => codes::DECODER_CONTRACT_VIOLATION,
            ReplayError::DecodeFailure(err) => err.code(),
            ReplayError::StreamClosed => codes::STREAM_CLOSED,
        }
    }
}

impl From<ReplayError> for CoreError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::DecodeFailure(inner) => inner,
            other => CoreError::new(other.code(), other.to_string()),
        }
    }
}
