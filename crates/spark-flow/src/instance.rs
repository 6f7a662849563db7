//! # ElementFn 与回调实例
//!
//! ## 核心意图（Why）
//! - [`ElementFn`] 是用户回调：三个阶段方法加一份声明式描述符；
//! - [`ElementFnInstance`] 把回调、绑定、执行配置与聚合器表组装成一个可被调度器反复
//!   打开 bundle 的实例，所有跨调用状态都挂在这里，上下文只是借用。
//!
//! ## 执行逻辑（How）
//! 1. 构造期：校验描述符与配置，解析生效的时间戳偏移，构造路由器，调用 `setup` 登记聚合器；
//! 2. 每个 bundle：[`ElementFnInstance::bundle`] 返回独占借用实例的 [`BundleLifecycle`]；
//! 3. 每次 ProcessElement 调用：检查中断、签发调用租约、构造上下文、调用回调；
//!    租约由守卫持有，回调返回或 panic 展开时撤销。
//!
//! ## 风险提示（Trade-offs）
//! - 实例是 `Send` 但不是 `Sync`：同一实例内的调用严格串行，不同实例可以在不同线程上并行。

use std::{fmt, sync::Arc};

use crate::{
    aggregator::AggregatorRegistry,
    binding::TransformBinding,
    config::{ExecutionSettings, PipelineOptions},
    context::{BundleContext, ProcessContext, ProcessParts},
    descriptor::{CallbackDescriptor, CallbackPhase, InvocationGranularity},
    error::Result,
    extra::{ExtraContext, ExtraContextProvider, InvocationScope, LeaseGuard},
    lifecycle::{BundleLifecycle, InterruptSignal},
    record::Record,
    router::{EmissionCounts, OutputRouter},
    side_input::SideInputs,
    time::{Instant, TimestampSkew},
    window::{WindowFn, WindowSet},
};

/// 用户提供的逐元素回调。
///
/// # 契约说明（What）
/// - 只有 `process_element` 必须实现；其余方法有空的缺省实现；
/// - 任何方法返回的错误原样传播给调度器，所在 bundle 随即失败；
/// - 回调自身的错误类型可通过 [`FlowError::callback`](crate::FlowError::callback) 包装。
pub trait ElementFn<I, O>: Send {
    /// 各阶段所需的额外能力，构造实例时解析一次。
    fn descriptor(&self) -> CallbackDescriptor {
        CallbackDescriptor::new()
    }

    /// 覆盖配置中的时间戳偏移；返回 `None` 时使用配置值。
    fn allowed_timestamp_skew(&self) -> Option<TimestampSkew> {
        None
    }

    /// 实例构造时调用一次，用于登记聚合器。
    fn setup(&mut self, aggregators: &mut AggregatorRegistry) -> Result<()> {
        let _ = aggregators;
        Ok(())
    }

    fn start_bundle(&mut self, ctx: &mut BundleContext<'_, I, O>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn process_element(&mut self, ctx: &mut ProcessContext<'_, I, O>) -> Result<()>;

    fn finish_bundle(&mut self, ctx: &mut BundleContext<'_, I, O>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// 绑定完成、可以执行 bundle 的回调实例。
pub struct ElementFnInstance<I, O, F>
where
    I: 'static,
    O: 'static,
{
    callback: F,
    descriptor: CallbackDescriptor,
    skew: TimestampSkew,
    settings: ExecutionSettings,
    aggregators: AggregatorRegistry,
    router: OutputRouter<O>,
    side_inputs: SideInputs,
    keyed: bool,
    window_fn: Arc<dyn WindowFn<I>>,
    extra: Arc<dyn ExtraContextProvider>,
    pipeline_options: Arc<PipelineOptions>,
    interrupt: InterruptSignal,
    bundles: u64,
}

impl<I, O, F> ElementFnInstance<I, O, F>
where
    I: 'static,
    O: 'static,
    F: ElementFn<I, O>,
{
    /// 组装实例。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`settings` 合法，描述符的 bundle 阶段不请求额外能力；
    /// - **后置条件**：`setup` 已执行，聚合器表就绪；任何一步失败都不会产生实例。
    pub fn new(
        mut callback: F,
        binding: TransformBinding<I, O>,
        settings: ExecutionSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let descriptor = callback.descriptor();
        descriptor.validate()?;
        let skew = callback
            .allowed_timestamp_skew()
            .unwrap_or_else(|| settings.timestamp_skew());

        let TransformBinding {
            main,
            side_outputs,
            side_inputs,
            keyed,
            window_fn,
            extra,
            pipeline_options,
            interrupt,
        } = binding;
        let router = OutputRouter::new(main, side_outputs, settings.max_side_output_tags());

        let mut aggregators = AggregatorRegistry::new();
        callback.setup(&mut aggregators)?;

        tracing::debug!(
            target: "spark_flow::instance",
            skew = %skew,
            side_outputs = router.declared_tags(),
            side_inputs = side_inputs.len(),
            keyed,
            window_fn = window_fn.name(),
            aggregators = aggregators.len(),
            "element fn instance ready"
        );

        Ok(Self {
            callback,
            descriptor,
            skew,
            settings,
            aggregators,
            router,
            side_inputs,
            keyed,
            window_fn,
            extra,
            pipeline_options,
            interrupt,
            bundles: 0,
        })
    }

    /// 打开一个新 bundle。
    pub fn bundle(&mut self) -> BundleLifecycle<'_, I, O, F> {
        self.bundles += 1;
        let id = self.bundles;
        BundleLifecycle::new(self, id)
    }

    pub fn callback(&self) -> &F {
        &self.callback
    }

    pub fn callback_mut(&mut self) -> &mut F {
        &mut self.callback
    }

    pub fn into_callback(self) -> F {
        self.callback
    }

    /// 实例的聚合器表，供外部收集后端读取。
    pub fn aggregators(&self) -> &AggregatorRegistry {
        &self.aggregators
    }

    pub fn descriptor(&self) -> &CallbackDescriptor {
        &self.descriptor
    }

    /// 生效的时间戳偏移。
    pub fn timestamp_skew(&self) -> TimestampSkew {
        self.skew
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn interrupt(&self) -> &InterruptSignal {
        &self.interrupt
    }

    /// 本实例生命周期内已使用过的不同旁路输出标签数。
    pub fn used_side_output_tags(&self) -> usize {
        self.router.used_tags()
    }

    pub(crate) fn reset_counts(&self) -> EmissionCounts {
        self.router.take_counts()
    }

    pub(crate) fn run_start_bundle(&mut self) -> Result<()> {
        self.interrupt.check()?;
        let mut ctx = BundleContext::new(
            CallbackPhase::StartBundle,
            &self.router,
            self.window_fn.as_ref(),
            &self.pipeline_options,
            &mut self.aggregators,
        );
        self.callback.start_bundle(&mut ctx)
    }

    pub(crate) fn run_finish_bundle(&mut self) -> Result<()> {
        self.interrupt.check()?;
        let mut ctx = BundleContext::new(
            CallbackPhase::FinishBundle,
            &self.router,
            self.window_fn.as_ref(),
            &self.pipeline_options,
            &mut self.aggregators,
        );
        self.callback.finish_bundle(&mut ctx)
    }

    /// 处理一条记录，返回实际的 ProcessElement 调用次数。
    pub(crate) fn run_element(&mut self, record: &Record<I>) -> Result<u64> {
        match self.descriptor.invocation() {
            InvocationGranularity::PerRecord => {
                self.invoke(record.value(), record.timestamp(), record.windows())?;
                Ok(1)
            }
            InvocationGranularity::PerWindow => {
                let mut invocations = 0;
                for window in record.windows() {
                    let single = WindowSet::single(*window);
                    self.invoke(record.value(), record.timestamp(), &single)?;
                    invocations += 1;
                }
                Ok(invocations)
            }
        }
    }

    fn invoke(&mut self, element: &I, timestamp: Instant, windows: &WindowSet) -> Result<()> {
        self.interrupt.check()?;
        let guard = LeaseGuard::new();
        let extra = ExtraContext::new(
            self.extra.as_ref(),
            self.descriptor.signature(CallbackPhase::ProcessElement),
            InvocationScope::new(CallbackPhase::ProcessElement, timestamp, windows, self.keyed),
            guard.lease(),
            &self.interrupt,
        );
        let mut ctx = ProcessContext::new(
            element,
            timestamp,
            windows,
            ProcessParts {
                skew: self.skew,
                router: &self.router,
                side_inputs: &self.side_inputs,
                extra,
                options: &self.pipeline_options,
                aggregators: &mut self.aggregators,
                interrupt: &self.interrupt,
            },
        );
        self.callback.process_element(&mut ctx)
    }
}

impl<I, O, F> fmt::Debug for ElementFnInstance<I, O, F>
where
    I: 'static,
    O: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFnInstance")
            .field("descriptor", &self.descriptor)
            .field("skew", &self.skew)
            .field("router", &self.router)
            .field("aggregators", &self.aggregators)
            .field("bundles", &self.bundles)
            .finish_non_exhaustive()
    }
}
