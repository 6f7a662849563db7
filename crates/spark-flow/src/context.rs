//! # 执行上下文
//!
//! ## 核心意图（Why）
//! - 两种上下文共享同一组发射能力，由 [`OutputContext`] 描述；逐元素上下文额外暴露
//!   当前元素、时间戳与旁路输入，由更窄的 [`ElementContext`] 描述；
//! - bundle 上下文在类型上就没有 `element()`，把“在 bundle 阶段读取元素”变成编译错误，
//!   剩下的运行期限制只在窗口函数内部出现（见 [`crate::window::BundleAssignContext`]）。
//!
//! ## 行为契约（What）
//! - 每次回调调用得到一个新的上下文，它借用实例内的路由器与聚合器表，
//!   借用期限即调用期限；派生出的能力句柄在调用返回后报告 [`FlowError::StaleContext`]；
//! - 元素作用域内的显式时间戳须满足偏移约束；bundle 作用域不做偏移校验。

use std::fmt;

use crate::{
    aggregator::{Aggregator, AggregatorRegistry, CombineFn},
    assignment::EmissionScope,
    config::PipelineOptions,
    descriptor::CallbackPhase,
    error::{FlowError, Result},
    extra::{ExtraContext, KeyedStateHandle, WindowingInternalsHandle},
    lifecycle::InterruptSignal,
    output::OutputTag,
    router::OutputRouter,
    side_input::{SideInputView, SideInputs},
    time::{Instant, TimestampSkew},
    window::{Window, WindowFn, WindowSet},
};

/// 两种上下文共享的发射与登记能力。
pub trait OutputContext<O> {
    /// 运行器配置的管道选项。
    fn pipeline_options(&self) -> &PipelineOptions;

    /// 向主输出发射，时间戳与窗口按作用域规则确定。
    fn output(&self, value: O) -> Result<()>;

    /// 以显式时间戳向主输出发射。
    fn output_with_timestamp(&self, value: O, timestamp: Instant) -> Result<()>;

    /// 向已声明的旁路输出发射。
    fn side_output<T: Send + 'static>(&self, tag: &OutputTag<T>, value: T) -> Result<()>;

    fn side_output_with_timestamp<T: Send + 'static>(
        &self,
        tag: &OutputTag<T>,
        value: T,
        timestamp: Instant,
    ) -> Result<()>;

    /// 在实例的聚合器表中登记聚合器。
    fn create_aggregator<In, Out, C>(
        &mut self,
        name: impl Into<String>,
        combine: C,
    ) -> Result<Aggregator<In, Out>>
    where
        In: Send + 'static,
        Out: fmt::Debug + Send + 'static,
        C: CombineFn<In, Out>;
}

/// 逐元素上下文在发射能力之外的访问器。
pub trait ElementContext<I, O>: OutputContext<O> {
    fn element(&self) -> &I;

    fn timestamp(&self) -> Instant;

    /// 旁路输入在当前窗口下的物化值。
    fn side_input<T>(&self, view: &SideInputView<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static;
}

/// StartBundle / FinishBundle 的上下文。
pub struct BundleContext<'a, I, O> {
    phase: CallbackPhase,
    router: &'a OutputRouter<O>,
    window_fn: &'a dyn WindowFn<I>,
    options: &'a PipelineOptions,
    aggregators: &'a mut AggregatorRegistry,
}

impl<'a, I, O> BundleContext<'a, I, O> {
    pub(crate) fn new(
        phase: CallbackPhase,
        router: &'a OutputRouter<O>,
        window_fn: &'a dyn WindowFn<I>,
        options: &'a PipelineOptions,
        aggregators: &'a mut AggregatorRegistry,
    ) -> Self {
        Self {
            phase,
            router,
            window_fn,
            options,
            aggregators,
        }
    }

    pub fn phase(&self) -> CallbackPhase {
        self.phase
    }

    fn scope(&self) -> EmissionScope<'a, I> {
        EmissionScope::Bundle {
            window_fn: self.window_fn,
        }
    }
}

impl<I, O: 'static> OutputContext<O> for BundleContext<'_, I, O> {
    fn pipeline_options(&self) -> &PipelineOptions {
        self.options
    }

    fn output(&self, value: O) -> Result<()> {
        self.router.emit_main(&self.scope(), value, None)
    }

    fn output_with_timestamp(&self, value: O, timestamp: Instant) -> Result<()> {
        self.router.emit_main(&self.scope(), value, Some(timestamp))
    }

    fn side_output<T: Send + 'static>(&self, tag: &OutputTag<T>, value: T) -> Result<()> {
        self.router.emit_tagged(&self.scope(), tag, value, None)
    }

    fn side_output_with_timestamp<T: Send + 'static>(
        &self,
        tag: &OutputTag<T>,
        value: T,
        timestamp: Instant,
    ) -> Result<()> {
        self.router
            .emit_tagged(&self.scope(), tag, value, Some(timestamp))
    }

    fn create_aggregator<In, Out, C>(
        &mut self,
        name: impl Into<String>,
        combine: C,
    ) -> Result<Aggregator<In, Out>>
    where
        In: Send + 'static,
        Out: fmt::Debug + Send + 'static,
        C: CombineFn<In, Out>,
    {
        self.aggregators.create_aggregator(name, combine)
    }
}

impl<I, O> fmt::Debug for BundleContext<'_, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// ProcessElement 的上下文，一次调用一个。
pub struct ProcessContext<'a, I, O> {
    element: &'a I,
    timestamp: Instant,
    windows: &'a WindowSet,
    skew: TimestampSkew,
    router: &'a OutputRouter<O>,
    side_inputs: &'a SideInputs,
    extra: ExtraContext<'a>,
    options: &'a PipelineOptions,
    aggregators: &'a mut AggregatorRegistry,
    interrupt: &'a InterruptSignal,
}

/// 构造 [`ProcessContext`] 所需的借用集合。
pub(crate) struct ProcessParts<'a, O> {
    pub(crate) skew: TimestampSkew,
    pub(crate) router: &'a OutputRouter<O>,
    pub(crate) side_inputs: &'a SideInputs,
    pub(crate) extra: ExtraContext<'a>,
    pub(crate) options: &'a PipelineOptions,
    pub(crate) aggregators: &'a mut AggregatorRegistry,
    pub(crate) interrupt: &'a InterruptSignal,
}

impl<'a, I, O> ProcessContext<'a, I, O> {
    pub(crate) fn new(
        element: &'a I,
        timestamp: Instant,
        windows: &'a WindowSet,
        parts: ProcessParts<'a, O>,
    ) -> Self {
        Self {
            element,
            timestamp,
            windows,
            skew: parts.skew,
            router: parts.router,
            side_inputs: parts.side_inputs,
            extra: parts.extra,
            options: parts.options,
            aggregators: parts.aggregators,
            interrupt: parts.interrupt,
        }
    }

    /// 当前调用可见的窗口集合；逐窗口调用时只含一个窗口。
    pub fn windows(&self) -> &WindowSet {
        self.windows
    }

    /// 生效的时间戳偏移。
    pub fn timestamp_skew(&self) -> TimestampSkew {
        self.skew
    }

    /// 键控状态句柄，需要在描述符中声明。
    pub fn keyed_state(&self) -> Result<KeyedStateHandle> {
        self.extra.keyed_state()
    }

    /// 当前窗口；记录属于多个窗口且未声明逐窗口调用时失败。
    pub fn window(&self) -> Result<Window> {
        self.extra.window()
    }

    pub fn windowing_internals(&self) -> Result<WindowingInternalsHandle> {
        self.extra.windowing_internals()
    }

    /// 供长时间运行的回调主动检查调度器是否要求中断。
    pub fn check_interrupted(&self) -> Result<()> {
        self.interrupt.check()
    }

    fn scope(&self) -> EmissionScope<'a, I> {
        EmissionScope::Element {
            timestamp: self.timestamp,
            windows: self.windows,
            skew: self.skew,
        }
    }
}

impl<I, O: 'static> OutputContext<O> for ProcessContext<'_, I, O> {
    fn pipeline_options(&self) -> &PipelineOptions {
        self.options
    }

    fn output(&self, value: O) -> Result<()> {
        self.router.emit_main(&self.scope(), value, None)
    }

    fn output_with_timestamp(&self, value: O, timestamp: Instant) -> Result<()> {
        self.router.emit_main(&self.scope(), value, Some(timestamp))
    }

    fn side_output<T: Send + 'static>(&self, tag: &OutputTag<T>, value: T) -> Result<()> {
        self.router.emit_tagged(&self.scope(), tag, value, None)
    }

    fn side_output_with_timestamp<T: Send + 'static>(
        &self,
        tag: &OutputTag<T>,
        value: T,
        timestamp: Instant,
    ) -> Result<()> {
        self.router
            .emit_tagged(&self.scope(), tag, value, Some(timestamp))
    }

    fn create_aggregator<In, Out, C>(
        &mut self,
        name: impl Into<String>,
        combine: C,
    ) -> Result<Aggregator<In, Out>>
    where
        In: Send + 'static,
        Out: fmt::Debug + Send + 'static,
        C: CombineFn<In, Out>,
    {
        self.aggregators.create_aggregator(name, combine)
    }
}

impl<I, O: 'static> ElementContext<I, O> for ProcessContext<'_, I, O> {
    fn element(&self) -> &I {
        self.element
    }

    fn timestamp(&self) -> Instant {
        self.timestamp
    }

    fn side_input<T>(&self, view: &SideInputView<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.interrupt.check()?;
        self.side_inputs.ensure_declared(view.id())?;
        let window = self.windows.only().ok_or(FlowError::AmbiguousWindow {
            count: self.windows.len(),
        })?;
        self.side_inputs.resolve(view, window)
    }
}

impl<I, O> fmt::Debug for ProcessContext<'_, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("timestamp", &self.timestamp)
            .field("windows", &self.windows)
            .finish_non_exhaustive()
    }
}
