//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为逐元素执行契约的全部失败路径提供集中定义：生命周期乱序、标签越界、时间戳偏移超限、
//!   回调自身失败等都在这里归档；
//! - 调度器据此决定重试或放弃整个 bundle，核心自身从不重试、从不静默恢复。
//!
//! ## 设计要求（What）
//! - 所有变体通过 `thiserror::Error` 派生 `std::error::Error`；
//! - 每个变体映射到稳定错误码（见 [`codes`]）与 [`ErrorCategory`]，调用方无需解析字符串；
//! - `FlowError` 实现 `Clone`：能力查询结果（含失败）在单次调用内缓存并可重复返回。

use std::{error::Error as StdError, sync::Arc};

use thiserror::Error;

use crate::time::{Instant, TimestampSkew};

/// `Result` 别名，默认错误类型为 [`FlowError`]。
pub type Result<T, E = FlowError> = core::result::Result<T, E>;

/// 回调或外部协作方附带的底层原因。
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// 稳定错误码，遵循 `flow.<域>.<语义>` 命名。
///
/// 错误码一经发布不得改名；日志、指标与告警均以此为聚合键。
pub mod codes {
    pub const LIFECYCLE_VIOLATION: &str = "flow.lifecycle.violation";
    pub const STALE_CONTEXT: &str = "flow.context.stale";
    pub const CONTEXT_MISUSE: &str = "flow.context.misuse";
    pub const UNKNOWN_TAG: &str = "flow.output.unknown_tag";
    pub const TOO_MANY_OUTPUTS: &str = "flow.output.too_many";
    pub const TAG_TYPE_MISMATCH: &str = "flow.output.type_mismatch";
    pub const SKEW_VIOLATION: &str = "flow.timestamp.skew";
    pub const EMPTY_WINDOW_SET: &str = "flow.window.empty";
    pub const AMBIGUOUS_WINDOW: &str = "flow.window.ambiguous";
    pub const NOT_A_SIDE_INPUT: &str = "flow.side_input.undeclared";
    pub const SIDE_INPUT_TYPE_MISMATCH: &str = "flow.side_input.type_mismatch";
    pub const NO_KEY: &str = "flow.state.no_key";
    pub const UNDECLARED_CAPABILITY: &str = "flow.capability.undeclared";
    pub const CAPABILITY_UNAVAILABLE: &str = "flow.capability.unavailable";
    pub const INVALID_DESCRIPTOR: &str = "flow.descriptor.invalid";
    pub const DUPLICATE_NAME: &str = "flow.registry.duplicate";
    pub const NULL_ARGUMENT: &str = "flow.registry.null_argument";
    pub const INVALID_CONFIGURATION: &str = "flow.config.invalid";
    pub const INTERRUPTED: &str = "flow.runtime.interrupted";
    pub const CALLBACK: &str = "flow.callback.failed";
    pub const COLLABORATOR: &str = "flow.collaborator.failed";
}

/// 错误分类，供调度器选择处置策略。
///
/// - `Usage`：调用方或协作方误用 API，修代码而非重试；
/// - `PolicyViolation`：回调违反了文档化契约（偏移、标签上限、bundle 作用域访问元素）；
/// - `Interrupted`：调度器主动中断，是否重放由调度器决定；
/// - `Callback`：用户回调自身失败；
/// - `Collaborator`：外部 sink / 状态存储 / 旁路输入读取失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Usage,
    PolicyViolation,
    Interrupted,
    Callback,
    Collaborator,
}

/// 执行契约的统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把生命周期、路由、窗口、能力注入、聚合器注册五类失败合流为一个枚举，
///   让 `?` 在整个调用链上直接传播；
/// - **契约 (What)**：变体携带可读上下文；[`FlowError::code`] 返回稳定错误码，
///   [`FlowError::category`] 返回处置分类；
/// - **风险 (Trade-offs)**：`Callback`/`Collaborator` 以 `Arc` 持有底层原因，失去了独占所有权，
///   换取整个枚举可以 `Clone`。
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum FlowError {
    /// 生命周期调用顺序非法，例如 `start` 之前处理元素或 `finish` 之后继续调用。
    #[error("lifecycle violation: `{operation}` is not permitted in phase {phase}")]
    LifecycleViolation {
        operation: &'static str,
        phase: &'static str,
    },

    /// 调用返回后仍在使用其派生的句柄。
    #[error("stale context: `{accessor}` used after its invocation returned")]
    StaleContext { accessor: &'static str },

    /// 在没有触发元素的作用域中读取元素相关数据。
    #[error("context misuse: `{accessor}` is unavailable {scope}")]
    ContextMisuse {
        accessor: &'static str,
        scope: &'static str,
    },

    /// 向未声明的旁路输出标签发射。
    #[error("output tag `{tag}` was not declared for this transform")]
    UnknownTag { tag: String },

    /// 旁路输出标签数量超过上限。
    #[error("side output limit exceeded: {requested} tags requested, limit is {limit}")]
    TooManyOutputs { limit: usize, requested: usize },

    /// 标签绑定的 sink 与发射值的类型不一致。
    #[error("output tag `{tag}` expects values of type `{expected}`")]
    TagTypeMismatch { tag: String, expected: &'static str },

    /// 显式时间戳早于 `输入时间戳 - 允许偏移`。
    #[error(
        "timestamp {timestamp} precedes input timestamp {input_timestamp} by more than the allowed skew {skew}"
    )]
    SkewViolation {
        timestamp: Instant,
        input_timestamp: Instant,
        skew: TimestampSkew,
    },

    /// 窗口函数返回了空窗口集合。
    #[error("window assignment produced an empty window set")]
    EmptyWindowSet,

    /// 当前记录属于多个窗口，但回调未声明逐窗口调用。
    #[error("record spans {count} windows; request per-window invocation to observe a single window")]
    AmbiguousWindow { count: usize },

    /// 读取未声明为旁路输入的视图。
    #[error("view `{view}` was not declared as a side input of this transform")]
    NotASideInput { view: String },

    /// 旁路输入物化值的类型与视图声明不一致。
    #[error("side input `{view}` does not materialize as `{expected}`")]
    SideInputTypeMismatch { view: String, expected: &'static str },

    /// 非键控变换请求键控状态。
    #[error("keyed state requested by a transform that is not keyed")]
    NoKey,

    /// 回调在描述符中未声明却访问了某项能力。
    #[error("capability `{capability}` was not declared for {phase}")]
    UndeclaredCapability {
        capability: &'static str,
        phase: &'static str,
    },

    /// 外部提供方无法构造所需能力。
    #[error("capability `{capability}` is not supported by the extra-context provider")]
    CapabilityUnavailable { capability: &'static str },

    /// 描述符在注册阶段校验失败。
    #[error("invalid callback descriptor: {phase} may not request `{capability}`")]
    InvalidDescriptor {
        phase: &'static str,
        capability: &'static str,
    },

    /// 同一作用域内名称重复。
    #[error("{scope} named `{name}` already exists within this scope")]
    DuplicateName { scope: &'static str, name: String },

    /// 必填参数缺失或为空。
    #[error("argument `{argument}` must not be empty")]
    NullArgument { argument: &'static str },

    /// 配置解析或校验失败。
    #[error("invalid configuration: {detail}")]
    InvalidConfiguration { detail: String },

    /// 调度器中断了当前调用。
    #[error("invocation interrupted: {reason}")]
    Interrupted { reason: String },

    /// 用户回调返回的失败，原样向上传播。
    #[error("callback failed: {source}")]
    Callback { source: ErrorCause },

    /// 外部协作方（sink、状态存储、旁路输入读取）失败。
    #[error("collaborator `{collaborator}` failed: {source}")]
    Collaborator {
        collaborator: &'static str,
        source: ErrorCause,
    },
}

impl FlowError {
    /// 包装用户回调的失败。
    pub fn callback(source: impl StdError + Send + Sync + 'static) -> Self {
        FlowError::Callback {
            source: Arc::new(source),
        }
    }

    /// 包装外部协作方的失败。
    ///
    /// - **契约 (What)**：`collaborator` 为稳定的协作方名称，例如 `"sink"`、`"keyed-state"`。
    pub fn collaborator(
        collaborator: &'static str,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        FlowError::Collaborator {
            collaborator,
            source: Arc::new(source),
        }
    }

    /// 构造中断错误。
    pub fn interrupted(reason: impl Into<String>) -> Self {
        FlowError::Interrupted {
            reason: reason.into(),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::LifecycleViolation { .. } => codes::LIFECYCLE_VIOLATION,
            FlowError::StaleContext { .. } => codes::STALE_CONTEXT,
            FlowError::ContextMisuse { .. } => codes::CONTEXT_MISUSE,
            FlowError::UnknownTag { .. } => codes::UNKNOWN_TAG,
            FlowError::TooManyOutputs { .. } => codes::TOO_MANY_OUTPUTS,
            FlowError::TagTypeMismatch { .. } => codes::TAG_TYPE_MISMATCH,
            FlowError::SkewViolation { .. } => codes::SKEW_VIOLATION,
            FlowError::EmptyWindowSet => codes::EMPTY_WINDOW_SET,
            FlowError::AmbiguousWindow { .. } => codes::AMBIGUOUS_WINDOW,
            FlowError::NotASideInput { .. } => codes::NOT_A_SIDE_INPUT,
            FlowError::SideInputTypeMismatch { .. } => codes::SIDE_INPUT_TYPE_MISMATCH,
            FlowError::NoKey => codes::NO_KEY,
            FlowError::UndeclaredCapability { .. } => codes::UNDECLARED_CAPABILITY,
            FlowError::CapabilityUnavailable { .. } => codes::CAPABILITY_UNAVAILABLE,
            FlowError::InvalidDescriptor { .. } => codes::INVALID_DESCRIPTOR,
            FlowError::DuplicateName { .. } => codes::DUPLICATE_NAME,
            FlowError::NullArgument { .. } => codes::NULL_ARGUMENT,
            FlowError::InvalidConfiguration { .. } => codes::INVALID_CONFIGURATION,
            FlowError::Interrupted { .. } => codes::INTERRUPTED,
            FlowError::Callback { .. } => codes::CALLBACK,
            FlowError::Collaborator { .. } => codes::COLLABORATOR,
        }
    }

    /// 错误分类。
    ///
    /// # 契约说明（What）
    /// - 偏移超限、标签上限、bundle 作用域误读元素、空窗口集合归为 `PolicyViolation`；
    /// - 其余误用归为 `Usage`；
    /// - 查询不修改内部状态，可重复调用。
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowError::SkewViolation { .. }
            | FlowError::TooManyOutputs { .. }
            | FlowError::ContextMisuse { .. }
            | FlowError::EmptyWindowSet => ErrorCategory::PolicyViolation,
            FlowError::Interrupted { .. } => ErrorCategory::Interrupted,
            FlowError::Callback { .. } => ErrorCategory::Callback,
            FlowError::Collaborator { .. } | FlowError::CapabilityUnavailable { .. } => {
                ErrorCategory::Collaborator
            }
            _ => ErrorCategory::Usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn policy_violations_are_classified_apart_from_usage_errors() {
        let skew = FlowError::SkewViolation {
            timestamp: Instant::from_secs(97),
            input_timestamp: Instant::from_secs(100),
            skew: TimestampSkew::bounded(Duration::from_secs(2)),
        };
        assert_eq!(skew.category(), ErrorCategory::PolicyViolation);
        assert_eq!(skew.code(), codes::SKEW_VIOLATION);

        let unknown = FlowError::UnknownTag { tag: "dead".into() };
        assert_eq!(unknown.category(), ErrorCategory::Usage);
        assert_eq!(unknown.code(), codes::UNKNOWN_TAG);
    }

    #[test]
    fn callback_errors_keep_their_source() {
        let err = FlowError::callback(Boom);
        assert_eq!(err.category(), ErrorCategory::Callback);
        assert_eq!(err.to_string(), "callback failed: boom");
        let cloned = err.clone();
        assert!(StdError::source(&cloned).is_some(), "克隆后仍应保留底层原因");
    }
}
