use std::{borrow::Cow, error::Error as StdError, fmt};

/// 错误链上的底层原因，要求可跨线程移动。
pub type ErrorCause = Box<dyn StdError + Send + Sync + 'static>;

/// `spark-core` 统一的结果别名。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// `CoreError` 表示 I/O 核心跨层共享的稳定错误域，是所有可观察错误的最终形态。
///
/// # 设计背景（Why）
/// - 事件循环、接收分配器与解码器在不同层次产生的故障需要合流为统一的错误码，
///   以便日志与告警系统执行精确的自动化处置（关闭通道、拒绝配置、重试）。
/// - 叶子 crate 以 `thiserror` 派生各自的细粒度枚举，再通过 `From` 汇入本类型，
///   调用方只需面对一种错误形态。
///
/// # 逻辑解析（How）
/// - `code` 为 `'static` 字符串，承载稳定语义；`message` 面向排障人员；
/// - `category` 描述调用方应采取的处置策略，未显式设置时按错误码查表；
/// - `cause` 保留底层错误链，通过 [`std::error::Error::source`] 暴露。
///
/// # 契约说明（What）
/// - **前置条件**：调用方应使用 [`codes`] 模块中的码值，或遵循 `<域>.<语义>` 约定的自定义码；
/// - **后置条件**：构造后的错误满足 `Send + Sync + 'static`，可在线程间安全移动。
///
/// # 设计取舍与风险（Trade-offs）
/// - 使用 `Cow<'static, str>` 保存消息：静态文案零分配，动态文案付出一次堆分配。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: Option<ErrorCategory>,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 示例（Examples）
    /// ```rust
    /// use spark_core::error::{CoreError, ErrorCategory, codes};
    ///
    /// let err = CoreError::new(codes::PROTOCOL_DECODE, "frame length overflow");
    /// assert_eq!(err.code(), codes::PROTOCOL_DECODE);
    /// assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: None,
            cause: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 显式覆盖错误分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 获取结构化错误分类。
    ///
    /// # 返回契约
    /// - 显式设置的分类优先；
    /// - 否则按 [`codes`] 中的默认映射查表，未登记的错误码回退为 [`ErrorCategory::NonRetryable`]。
    pub fn category(&self) -> ErrorCategory {
        self.category
            .unwrap_or_else(|| codes::default_category(self.code))
    }

    /// 判断该错误是否要求调用方关闭所属通道。
    ///
    /// 协议违规与不可重试错误都意味着继续读取同一连接会破坏“单次在途解析”约束。
    pub fn requires_close(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ProtocolViolation | ErrorCategory::NonRetryable
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

/// `ErrorCategory` 描述调用方面对错误时应采取的处置策略。
///
/// - `NonRetryable`：不可恢复，调用方应终止当前操作；
/// - `Retryable`：可在修正输入或稍后重试；
/// - `ProtocolViolation`：对端或解码逻辑违反协议契约，通道必须关闭；
/// - `Misconfigured`：配置被拒绝，先前配置保持不变，可使用合法值重试；
/// - `Cancelled`：操作因关闭或取消而未执行。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NonRetryable,
    Retryable,
    ProtocolViolation,
    Misconfigured,
    Cancelled,
}

/// 稳定错误码目录。
///
/// # 命名约定
/// - 统一采用 `<域>.<语义>`，域取值 `buffer`、`reactor`、`protocol`、`transport`；
/// - 码值一经发布不得修改语义，只允许新增。
pub mod codes {
    use super::ErrorCategory;

    /// 缓冲游标越界或写入超出可写空间。
    pub const BUFFER_OUT_OF_BOUNDS: &str = "buffer.out_of_bounds";
    /// 接收分配器的上限配置非法（非正数或违反 `attempt <= cycle`）。
    pub const RECV_INVALID_BOUND: &str = "reactor.recv.invalid_bound";
    /// 事件循环已关闭，拒绝新任务。
    pub const EVENT_LOOP_SHUTDOWN: &str = "reactor.event_loop.shutdown";
    /// 配置文本无法解析。
    pub const CONFIG_PARSE: &str = "reactor.config.parse";
    /// 解码逻辑未取得任何进展（未消费字节、未变更状态）。
    pub const DECODER_CONTRACT_VIOLATION: &str = "protocol.decoder_contract_violation";
    /// 解码逻辑报告的真实失败。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    /// 帧长度超过预算。
    pub const PROTOCOL_BUDGET_EXCEEDED: &str = "protocol.budget_exceeded";
    /// 流已关闭后仍继续投喂字节。
    pub const STREAM_CLOSED: &str = "protocol.stream_closed";
    /// 底层读取失败。
    pub const TRANSPORT_IO: &str = "transport.io";

    /// 按错误码返回默认分类。
    pub fn default_category(code: &str) -> ErrorCategory {
        match code {
            RECV_INVALID_BOUND | CONFIG_PARSE => ErrorCategory::Misconfigured,
            DECODER_CONTRACT_VIOLATION | PROTOCOL_DECODE | PROTOCOL_BUDGET_EXCEEDED => {
                ErrorCategory::ProtocolViolation
            }
            EVENT_LOOP_SHUTDOWN | STREAM_CLOSED => ErrorCategory::Cancelled,
            _ => ErrorCategory::NonRetryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn category_defaults_follow_code_table() {
        let err = CoreError::new(codes::RECV_INVALID_BOUND, "bound must be positive");
        assert_eq!(err.category(), ErrorCategory::Misconfigured);
        assert!(!err.requires_close());

        let violation = CoreError::new(codes::DECODER_CONTRACT_VIOLATION, "no progress");
        assert!(violation.requires_close());
    }

    #[test]
    fn explicit_category_overrides_table() {
        let err = CoreError::new(codes::TRANSPORT_IO, "reset by peer")
            .with_category(ErrorCategory::Retryable);
        assert_eq!(err.category(), ErrorCategory::Retryable);
    }

    #[test]
    fn cause_is_exposed_through_source() {
        let err = CoreError::new(codes::TRANSPORT_IO, "read failed")
            .with_cause(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let source = StdError::source(&err).expect("应保留底层原因");
        assert_eq!(source.to_string(), "reset");
        assert_eq!(err.to_string(), "[transport.io] read failed");
    }
}
