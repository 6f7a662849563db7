//! # ExtraContextProvider：可选能力的外部来源
//!
//! ## 核心意图（Why）
//! - 键控状态、当前窗口、窗口内部信息都由外部调度协作方构造，核心只负责
//!   “是否声明过”“是否键控”“窗口是否唯一”这些契约检查；
//! - 每次调用内同一能力至多向提供方查询一次，结果（包括错误）在调用内缓存。
//!
//! ## 行为契约（What）
//! - 访问未在描述符中声明的能力：[`FlowError::UndeclaredCapability`]；
//! - 非键控变换请求键控状态：[`FlowError::NoKey`]；
//! - 记录属于多个窗口且未声明逐窗口调用时请求窗口：[`FlowError::AmbiguousWindow`]；
//! - 提供方不支持某项能力：[`FlowError::CapabilityUnavailable`]。
//!
//! ## 风险提示（Trade-offs）
//! - 能力句柄可以被回调克隆并保留到调用返回之后；句柄持有本次调用的租约，
//!   调用结束时租约被撤销，此后任何操作返回 [`FlowError::StaleContext`]。

use std::{
    cell::OnceCell,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    descriptor::{CallbackPhase, Capability, PhaseSignature},
    error::{FlowError, Result},
    lifecycle::InterruptSignal,
    time::Instant,
    window::{Window, WindowSet},
};

/// 按键存取字节值的状态存储。
///
/// 键由调度器根据当前记录的键限定，回调只看到一个键下的命名单元。
pub trait KeyedState: Send + Sync {
    fn lookup(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn store(&self, name: &str, value: Vec<u8>) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;
}

/// 窗格触发时机。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaneTiming {
    Early,
    OnTime,
    Late,
    #[default]
    Unknown,
}

/// 当前记录所在窗格的元数据。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaneInfo {
    pub index: u64,
    pub is_first: bool,
    pub is_last: bool,
    pub timing: PaneTiming,
}

impl PaneInfo {
    /// 未经触发器处理的记录：唯一的、既是首个也是末个的窗格。
    pub const NO_FIRING: PaneInfo = PaneInfo {
        index: 0,
        is_first: true,
        is_last: true,
        timing: PaneTiming::Unknown,
    };
}

impl Default for PaneInfo {
    fn default() -> Self {
        Self::NO_FIRING
    }
}

/// 底层窗口与窗格信息。
pub trait WindowingInternals: Send + Sync {
    fn pane(&self) -> PaneInfo;

    fn windows(&self) -> WindowSet;

    fn timestamp(&self) -> Instant;
}

/// 提供方构造能力时可见的调用信息。
#[derive(Clone, Copy, Debug)]
pub struct InvocationScope<'a> {
    phase: CallbackPhase,
    timestamp: Instant,
    windows: &'a WindowSet,
    keyed: bool,
}

impl<'a> InvocationScope<'a> {
    pub fn new(phase: CallbackPhase, timestamp: Instant, windows: &'a WindowSet, keyed: bool) -> Self {
        Self {
            phase,
            timestamp,
            windows,
            keyed,
        }
    }

    pub fn phase(&self) -> CallbackPhase {
        self.phase
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn windows(&self) -> &'a WindowSet {
        self.windows
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }
}

/// 外部调度协作方实现的能力工厂。
///
/// # 契约说明（What）
/// - 三个方法都是纯访问器；核心保证每次调用内每项能力至多查询一次；
/// - 缺省实现：`window` 返回作用域内唯一的窗口，其余两项返回
///   [`FlowError::CapabilityUnavailable`]。
pub trait ExtraContextProvider: Send + Sync {
    fn keyed_state(&self, scope: &InvocationScope<'_>) -> Result<Arc<dyn KeyedState>> {
        let _ = scope;
        Err(FlowError::CapabilityUnavailable {
            capability: Capability::KeyedState.as_str(),
        })
    }

    fn window(&self, scope: &InvocationScope<'_>) -> Result<Window> {
        let windows = scope.windows();
        windows.only().copied().ok_or(FlowError::AmbiguousWindow {
            count: windows.len(),
        })
    }

    fn windowing_internals(
        &self,
        scope: &InvocationScope<'_>,
    ) -> Result<Arc<dyn WindowingInternals>> {
        let _ = scope;
        Err(FlowError::CapabilityUnavailable {
            capability: Capability::WindowingInternals.as_str(),
        })
    }
}

/// 只提供缺省行为的提供方。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExtraContext;

impl ExtraContextProvider for NoExtraContext {}

/// 一次调用的租约；调用返回后撤销。
#[derive(Clone, Debug)]
pub(crate) struct InvocationLease {
    live: Arc<AtomicBool>,
}

impl InvocationLease {
    pub(crate) fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn revoke(&self) {
        self.live.store(false, Ordering::Release);
    }

    pub(crate) fn ensure_live(&self, accessor: &'static str) -> Result<()> {
        if self.live.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(FlowError::StaleContext { accessor })
        }
    }
}

/// 持有租约直到调用结束；回调正常返回或 panic 展开时都会撤销租约。
pub(crate) struct LeaseGuard(InvocationLease);

impl LeaseGuard {
    pub(crate) fn new() -> Self {
        Self(InvocationLease::new())
    }

    pub(crate) fn lease(&self) -> InvocationLease {
        self.0.clone()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.0.revoke();
    }
}

/// 本次调用内取得的键控状态句柄。
#[derive(Clone)]
pub struct KeyedStateHandle {
    inner: Arc<dyn KeyedState>,
    lease: InvocationLease,
    interrupt: InterruptSignal,
}

impl KeyedStateHandle {
    fn guard(&self) -> Result<()> {
        self.lease.ensure_live("keyed_state")?;
        self.interrupt.check()
    }

    pub fn lookup(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.guard()?;
        self.inner.lookup(name)
    }

    pub fn store(&self, name: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        self.guard()?;
        self.inner.store(name, value.into())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.guard()?;
        self.inner.remove(name)
    }
}

impl fmt::Debug for KeyedStateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStateHandle").finish_non_exhaustive()
    }
}

/// 本次调用内取得的窗口内部信息句柄。
#[derive(Clone)]
pub struct WindowingInternalsHandle {
    inner: Arc<dyn WindowingInternals>,
    lease: InvocationLease,
}

impl WindowingInternalsHandle {
    pub fn pane(&self) -> Result<PaneInfo> {
        self.lease.ensure_live("windowing_internals")?;
        Ok(self.inner.pane())
    }

    pub fn windows(&self) -> Result<WindowSet> {
        self.lease.ensure_live("windowing_internals")?;
        Ok(self.inner.windows())
    }

    pub fn timestamp(&self) -> Result<Instant> {
        self.lease.ensure_live("windowing_internals")?;
        Ok(self.inner.timestamp())
    }
}

impl fmt::Debug for WindowingInternalsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowingInternalsHandle")
            .finish_non_exhaustive()
    }
}

/// 一次 ProcessElement 调用的能力解析器。
///
/// # 执行逻辑（How）
/// 1. 检查中断信号与描述符声明；
/// 2. 执行能力特有的契约检查（键控、窗口唯一）；
/// 3. 首次访问时查询提供方并缓存结果，后续访问直接复用缓存（错误同样复用）。
pub(crate) struct ExtraContext<'a> {
    provider: &'a dyn ExtraContextProvider,
    signature: PhaseSignature,
    scope: InvocationScope<'a>,
    lease: InvocationLease,
    interrupt: &'a InterruptSignal,
    keyed_state: OnceCell<Result<Arc<dyn KeyedState>>>,
    window: OnceCell<Result<Window>>,
    internals: OnceCell<Result<Arc<dyn WindowingInternals>>>,
}

impl<'a> ExtraContext<'a> {
    pub(crate) fn new(
        provider: &'a dyn ExtraContextProvider,
        signature: PhaseSignature,
        scope: InvocationScope<'a>,
        lease: InvocationLease,
        interrupt: &'a InterruptSignal,
    ) -> Self {
        Self {
            provider,
            signature,
            scope,
            lease,
            interrupt,
            keyed_state: OnceCell::new(),
            window: OnceCell::new(),
            internals: OnceCell::new(),
        }
    }

    pub(crate) fn keyed_state(&self) -> Result<KeyedStateHandle> {
        self.interrupt.check()?;
        self.signature
            .require(Capability::KeyedState, self.scope.phase())?;
        if !self.scope.is_keyed() {
            return Err(FlowError::NoKey);
        }
        let inner = self
            .keyed_state
            .get_or_init(|| self.provider.keyed_state(&self.scope))
            .clone()?;
        Ok(KeyedStateHandle {
            inner,
            lease: self.lease.clone(),
            interrupt: self.interrupt.clone(),
        })
    }

    pub(crate) fn window(&self) -> Result<Window> {
        self.signature
            .require(Capability::Window, self.scope.phase())?;
        let count = self.scope.windows().len();
        if count != 1 {
            return Err(FlowError::AmbiguousWindow { count });
        }
        self.window
            .get_or_init(|| self.provider.window(&self.scope))
            .clone()
    }

    pub(crate) fn windowing_internals(&self) -> Result<WindowingInternalsHandle> {
        self.signature
            .require(Capability::WindowingInternals, self.scope.phase())?;
        let inner = self
            .internals
            .get_or_init(|| self.provider.windowing_internals(&self.scope))
            .clone()?;
        Ok(WindowingInternalsHandle {
            inner,
            lease: self.lease.clone(),
        })
    }
}
