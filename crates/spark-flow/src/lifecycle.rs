//! # BundleLifecycle：bundle 状态机
//!
//! ## 核心意图（Why）
//! - 调度器按 `start → process_element* → finish` 驱动一个 bundle；顺序错误必须立即暴露，
//!   而不是让回调在错误的阶段里运行；
//! - 回调或路由器失败后 bundle 进入终止的 `Failed` 阶段，实例与聚合器保留，
//!   调度器可以重新打开一个 bundle。
//!
//! ## 行为契约（What）
//! - `NotStarted → InBundle`（`start`）；`InBundle → ProcessingElement → InBundle`
//!   （`process_element`）；`InBundle → Finished`（`finish`）；
//! - 非法顺序、`Finished`/`Failed` 之后的任何调用返回 [`FlowError::LifecycleViolation`]；
//! - 每次调用前检查 [`InterruptSignal`]，被中断的调用与普通失败一样使 bundle 失败。
//!
//! ## 风险提示（Trade-offs）
//! - 回调 panic 时阶段停留在 `ProcessingElement`，后续调用同样返回生命周期错误；
//!   核心不捕获 panic。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::Span;

use crate::{
    error::{FlowError, Result},
    instance::{ElementFn, ElementFnInstance},
    record::Record,
};

/// bundle 所处阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BundlePhase {
    NotStarted,
    InBundle,
    ProcessingElement,
    Finished,
    Failed,
}

impl BundlePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            BundlePhase::NotStarted => "NotStarted",
            BundlePhase::InBundle => "InBundle",
            BundlePhase::ProcessingElement => "ProcessingElement",
            BundlePhase::Finished => "Finished",
            BundlePhase::Failed => "Failed",
        }
    }

    /// 判断跃迁是否合法。
    ///
    /// - **契约 (What)**：只有状态图中的边返回 `true`；非终止阶段都可以进入 `Failed`；
    /// - **风险 (Trade-offs)**：若未来新增“暂停”等中间态，需要同步扩充这里的边。
    pub fn can_transition_to(self, target: BundlePhase) -> bool {
        matches!(
            (self, target),
            (BundlePhase::NotStarted, BundlePhase::InBundle)
                | (BundlePhase::InBundle, BundlePhase::ProcessingElement)
                | (BundlePhase::ProcessingElement, BundlePhase::InBundle)
                | (BundlePhase::InBundle, BundlePhase::Finished)
                | (BundlePhase::NotStarted, BundlePhase::Failed)
                | (BundlePhase::InBundle, BundlePhase::Failed)
                | (BundlePhase::ProcessingElement, BundlePhase::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BundlePhase::Finished | BundlePhase::Failed)
    }
}

impl fmt::Display for BundlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调度器与执行核心共享的中断信号。
///
/// 克隆得到的信号指向同一标志；触发后对所有克隆可见，直到 [`clear`](Self::clear)。
#[derive(Clone, Default)]
pub struct InterruptSignal {
    raised: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self, reason: impl Into<String>) {
        *self.reason.lock() = Some(reason.into());
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
        self.reason.lock().take();
    }

    /// 已触发时返回 [`FlowError::Interrupted`]。
    pub fn check(&self) -> Result<()> {
        if !self.is_interrupted() {
            return Ok(());
        }
        let reason = self
            .reason
            .lock()
            .clone()
            .unwrap_or_else(|| "interrupted by scheduler".to_owned());
        Err(FlowError::interrupted(reason))
    }
}

impl fmt::Debug for InterruptSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptSignal")
            .field("raised", &self.is_interrupted())
            .finish()
    }
}

/// 一个 bundle 的统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BundleSummary {
    pub bundle: u64,
    pub elements: u64,
    /// ProcessElement 调用次数；逐窗口调用时可能大于 `elements`。
    pub invocations: u64,
    pub main_outputs: u64,
    pub side_outputs: u64,
}

/// 驱动一个 bundle 的状态机，独占借用回调实例。
pub struct BundleLifecycle<'a, I, O, F>
where
    I: 'static,
    O: 'static,
    F: ElementFn<I, O>,
{
    instance: &'a mut ElementFnInstance<I, O, F>,
    phase: BundlePhase,
    span: Span,
    summary: BundleSummary,
}

impl<'a, I, O, F> BundleLifecycle<'a, I, O, F>
where
    I: 'static,
    O: 'static,
    F: ElementFn<I, O>,
{
    pub(crate) fn new(instance: &'a mut ElementFnInstance<I, O, F>, bundle: u64) -> Self {
        let span = tracing::debug_span!("spark_flow.bundle", bundle);
        Self {
            instance,
            phase: BundlePhase::NotStarted,
            span,
            summary: BundleSummary {
                bundle,
                ..BundleSummary::default()
            },
        }
    }

    pub fn phase(&self) -> BundlePhase {
        self.phase
    }

    pub fn bundle_id(&self) -> u64 {
        self.summary.bundle
    }

    /// 打开 bundle 并调用 StartBundle。
    pub fn start(&mut self) -> Result<()> {
        self.advance("start", BundlePhase::InBundle)?;
        let _entered = self.span.clone().entered();
        self.instance.reset_counts();
        let outcome = self.instance.run_start_bundle();
        self.settle("start", BundlePhase::InBundle, outcome)
    }

    /// 处理一条记录；每次调用都会构造新的上下文。
    pub fn process_element(&mut self, record: Record<I>) -> Result<()> {
        self.advance("process_element", BundlePhase::ProcessingElement)?;
        let _entered = self.span.clone().entered();
        match self.instance.run_element(&record) {
            Ok(invocations) => {
                self.summary.elements += 1;
                self.summary.invocations += invocations;
                self.settle("process_element", BundlePhase::InBundle, Ok(()))
            }
            Err(err) => self.settle("process_element", BundlePhase::InBundle, Err(err)),
        }
    }

    /// 调用 FinishBundle 并关闭 bundle。
    pub fn finish(&mut self) -> Result<BundleSummary> {
        self.advance("finish", BundlePhase::Finished)?;
        let _entered = self.span.clone().entered();
        let outcome = self.instance.run_finish_bundle();
        self.settle("finish", BundlePhase::Finished, outcome)?;

        let counts = self.instance.reset_counts();
        self.summary.main_outputs = counts.main;
        self.summary.side_outputs = counts.side;
        tracing::debug!(
            target: "spark_flow::lifecycle",
            bundle = self.summary.bundle,
            elements = self.summary.elements,
            invocations = self.summary.invocations,
            main_outputs = self.summary.main_outputs,
            side_outputs = self.summary.side_outputs,
            "bundle finished"
        );
        Ok(self.summary)
    }

    /// 校验跃迁；只有 `ProcessingElement` 立即生效，其余目标由 `settle` 在回调返回后落定。
    fn advance(&mut self, operation: &'static str, target: BundlePhase) -> Result<()> {
        if !self.phase.can_transition_to(target) {
            tracing::warn!(
                target: "spark_flow::lifecycle",
                bundle = self.summary.bundle,
                operation,
                phase = self.phase.as_str(),
                "lifecycle violation"
            );
            return Err(FlowError::LifecycleViolation {
                operation,
                phase: self.phase.as_str(),
            });
        }
        if target == BundlePhase::ProcessingElement {
            self.phase = target;
        }
        Ok(())
    }

    fn settle(
        &mut self,
        operation: &'static str,
        target: BundlePhase,
        outcome: Result<()>,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                tracing::debug!(
                    target: "spark_flow::lifecycle",
                    bundle = self.summary.bundle,
                    operation,
                    from = self.phase.as_str(),
                    to = target.as_str(),
                    "phase transition"
                );
                self.phase = target;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    target: "spark_flow::lifecycle",
                    bundle = self.summary.bundle,
                    operation,
                    phase = self.phase.as_str(),
                    code = err.code(),
                    error = %err,
                    "bundle failed"
                );
                self.phase = BundlePhase::Failed;
                Err(err)
            }
        }
    }
}

impl<I, O, F> fmt::Debug for BundleLifecycle<'_, I, O, F>
where
    I: 'static,
    O: 'static,
    F: ElementFn<I, O>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleLifecycle")
            .field("bundle", &self.summary.bundle)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        binding::TransformBinding, config::ExecutionSettings, context::ProcessContext,
        test_stubs::CollectingSink, time::Instant,
    };

    struct Rejecting;

    impl ElementFn<u8, u8> for Rejecting {
        fn process_element(&mut self, _ctx: &mut ProcessContext<'_, u8, u8>) -> Result<()> {
            Err(FlowError::interrupted("rejected"))
        }
    }

    #[test]
    fn transitions_follow_the_bundle_graph() {
        assert!(BundlePhase::NotStarted.can_transition_to(BundlePhase::InBundle));
        assert!(BundlePhase::InBundle.can_transition_to(BundlePhase::ProcessingElement));
        assert!(BundlePhase::ProcessingElement.can_transition_to(BundlePhase::InBundle));
        assert!(BundlePhase::InBundle.can_transition_to(BundlePhase::Finished));

        assert!(!BundlePhase::NotStarted.can_transition_to(BundlePhase::ProcessingElement));
        assert!(!BundlePhase::NotStarted.can_transition_to(BundlePhase::Finished));
        assert!(!BundlePhase::InBundle.can_transition_to(BundlePhase::InBundle));
        assert!(!BundlePhase::Finished.can_transition_to(BundlePhase::Failed));
        assert!(!BundlePhase::Failed.can_transition_to(BundlePhase::InBundle));
        assert!(BundlePhase::Failed.is_terminal());
    }

    #[test]
    fn interrupt_signal_is_shared_between_clones() {
        let signal = InterruptSignal::new();
        let scheduler = signal.clone();
        assert!(signal.check().is_ok());

        scheduler.interrupt("deadline exceeded");
        let err = signal.check().expect_err("已中断");
        assert!(matches!(err, FlowError::Interrupted { ref reason } if reason == "deadline exceeded"));

        scheduler.clear();
        assert!(signal.check().is_ok());
    }

    #[traced_test]
    #[test]
    fn failures_and_violations_are_logged() {
        let binding = TransformBinding::<u8, u8>::builder(CollectingSink::new())
            .build()
            .expect("绑定");
        let mut instance =
            ElementFnInstance::new(Rejecting, binding, ExecutionSettings::default()).expect("实例");
        let mut bundle = instance.bundle();
        bundle.start().expect("start");
        assert!(logs_contain("phase transition"));

        bundle
            .process_element(Record::in_global_window(1, Instant::EPOCH))
            .expect_err("回调拒绝");
        assert!(logs_contain("bundle failed"));
        assert!(logs_contain("interrupted"));

        bundle.finish().expect_err("失败后不能 finish");
        assert!(logs_contain("lifecycle violation"));
    }
}
