//! # CallbackDescriptor：声明式回调签名
//!
//! ## 核心意图（Why）
//! - 每个阶段需要哪些额外能力（键控状态、窗口、窗口内部信息）由回调显式声明，
//!   在注册时一次性解析与校验，执行期只做查表；
//! - StartBundle / FinishBundle 只拿到 bundle 上下文，不允许请求任何额外能力。
//!
//! ## 行为契约（What）
//! - [`CallbackDescriptor::validate`] 在 bundle 阶段发现能力请求时返回
//!   [`FlowError::InvalidDescriptor`]；
//! - [`PhaseSignature::require`] 在执行期校验访问的能力已被声明，否则返回
//!   [`FlowError::UndeclaredCapability`]。

use std::fmt;

use crate::error::{FlowError, Result};

/// 回调的三个阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackPhase {
    StartBundle,
    ProcessElement,
    FinishBundle,
}

impl CallbackPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackPhase::StartBundle => "start_bundle",
            CallbackPhase::ProcessElement => "process_element",
            CallbackPhase::FinishBundle => "finish_bundle",
        }
    }
}

impl fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可声明的额外能力。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    KeyedState,
    Window,
    WindowingInternals,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::KeyedState => "keyed_state",
            Capability::Window => "window",
            Capability::WindowingInternals => "windowing_internals",
        }
    }
}

/// 单个阶段的能力声明。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseSignature {
    keyed_state: bool,
    window: bool,
    windowing_internals: bool,
}

impl PhaseSignature {
    /// 不请求任何额外能力。
    pub const fn plain() -> Self {
        Self {
            keyed_state: false,
            window: false,
            windowing_internals: false,
        }
    }

    pub const fn with_keyed_state(mut self) -> Self {
        self.keyed_state = true;
        self
    }

    pub const fn with_window(mut self) -> Self {
        self.window = true;
        self
    }

    pub const fn with_windowing_internals(mut self) -> Self {
        self.windowing_internals = true;
        self
    }

    pub fn requests(&self, capability: Capability) -> bool {
        match capability {
            Capability::KeyedState => self.keyed_state,
            Capability::Window => self.window,
            Capability::WindowingInternals => self.windowing_internals,
        }
    }

    /// 第一个被请求的能力，按固定顺序检查。
    fn first_requested(&self) -> Option<Capability> {
        [
            Capability::KeyedState,
            Capability::Window,
            Capability::WindowingInternals,
        ]
        .into_iter()
        .find(|capability| self.requests(*capability))
    }

    pub(crate) fn require(&self, capability: Capability, phase: CallbackPhase) -> Result<()> {
        if self.requests(capability) {
            Ok(())
        } else {
            Err(FlowError::UndeclaredCapability {
                capability: capability.as_str(),
                phase: phase.as_str(),
            })
        }
    }
}

/// ProcessElement 的调用粒度。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvocationGranularity {
    /// 每条记录调用一次，上下文看到完整窗口集合。
    #[default]
    PerRecord,
    /// 属于 N 个窗口的记录拆成 N 次调用，每次只看到一个窗口。
    PerWindow,
}

/// 回调签名的完整声明。
///
/// # 使用示例
/// ```
/// use spark_flow::descriptor::{CallbackDescriptor, InvocationGranularity, PhaseSignature};
///
/// let descriptor = CallbackDescriptor::new()
///     .with_process_element(PhaseSignature::plain().with_window())
///     .with_invocation(InvocationGranularity::PerWindow);
/// assert!(descriptor.validate().is_ok());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallbackDescriptor {
    start_bundle: PhaseSignature,
    process_element: PhaseSignature,
    finish_bundle: PhaseSignature,
    invocation: InvocationGranularity,
}

impl CallbackDescriptor {
    pub const fn new() -> Self {
        Self {
            start_bundle: PhaseSignature::plain(),
            process_element: PhaseSignature::plain(),
            finish_bundle: PhaseSignature::plain(),
            invocation: InvocationGranularity::PerRecord,
        }
    }

    pub const fn with_start_bundle(mut self, signature: PhaseSignature) -> Self {
        self.start_bundle = signature;
        self
    }

    pub const fn with_process_element(mut self, signature: PhaseSignature) -> Self {
        self.process_element = signature;
        self
    }

    pub const fn with_finish_bundle(mut self, signature: PhaseSignature) -> Self {
        self.finish_bundle = signature;
        self
    }

    pub const fn with_invocation(mut self, invocation: InvocationGranularity) -> Self {
        self.invocation = invocation;
        self
    }

    pub fn signature(&self, phase: CallbackPhase) -> PhaseSignature {
        match phase {
            CallbackPhase::StartBundle => self.start_bundle,
            CallbackPhase::ProcessElement => self.process_element,
            CallbackPhase::FinishBundle => self.finish_bundle,
        }
    }

    pub fn invocation(&self) -> InvocationGranularity {
        self.invocation
    }

    /// 注册期校验：bundle 阶段只接收 bundle 上下文。
    pub fn validate(&self) -> Result<()> {
        for phase in [CallbackPhase::StartBundle, CallbackPhase::FinishBundle] {
            if let Some(capability) = self.signature(phase).first_requested() {
                return Err(FlowError::InvalidDescriptor {
                    phase: phase.as_str(),
                    capability: capability.as_str(),
                });
            }
        }
        Ok(())
    }
}
