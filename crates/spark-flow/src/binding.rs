//! # TransformBinding：回调与外部协作方的绑定
//!
//! ## 核心意图（Why）
//! - 调度器在构造回调实例前一次性给出：主输出 sink、旁路输出标签与 sink、旁路输入视图、
//!   键控标记、窗口函数、额外能力提供方、管道选项与中断信号；
//! - 绑定在构造期完成名称校验，执行期只读。
//!
//! ## 行为契约（What）
//! - 同名旁路输出标签重复声明返回 [`FlowError::DuplicateName`]（scope 为 `output tag`）；
//! - 同名旁路输入视图重复声明返回 [`FlowError::DuplicateName`]（scope 为 `side input`）；
//! - 未指定的协作方使用缺省实现：全局窗口、无旁路输入、[`NoExtraContext`]。

use std::{collections::BTreeSet, fmt, sync::Arc};

use crate::{
    config::PipelineOptions,
    error::{FlowError, Result},
    extra::{ExtraContextProvider, NoExtraContext},
    lifecycle::InterruptSignal,
    output::{OutputSink, OutputTag, TaggedOutput},
    side_input::{NoSideInputs, SideInputReader, SideInputView, SideInputs},
    window::{GlobalWindows, WindowFn},
};

/// 已校验的绑定。
pub struct TransformBinding<I, O> {
    pub(crate) main: Arc<dyn OutputSink<O>>,
    pub(crate) side_outputs: Vec<TaggedOutput>,
    pub(crate) side_inputs: SideInputs,
    pub(crate) keyed: bool,
    pub(crate) window_fn: Arc<dyn WindowFn<I>>,
    pub(crate) extra: Arc<dyn ExtraContextProvider>,
    pub(crate) pipeline_options: Arc<PipelineOptions>,
    pub(crate) interrupt: InterruptSignal,
}

impl<I: 'static, O: 'static> TransformBinding<I, O> {
    pub fn builder(main: impl OutputSink<O> + 'static) -> TransformBindingBuilder<I, O> {
        TransformBindingBuilder {
            main: Arc::new(main),
            side_outputs: Vec::new(),
            side_inputs: Vec::new(),
            reader: Arc::new(NoSideInputs),
            keyed: false,
            window_fn: Arc::new(GlobalWindows),
            extra: Arc::new(NoExtraContext),
            pipeline_options: Arc::new(PipelineOptions::default()),
            interrupt: InterruptSignal::new(),
        }
    }
}

impl<I, O> TransformBinding<I, O> {
    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub fn side_output_count(&self) -> usize {
        self.side_outputs.len()
    }

    pub fn side_input_count(&self) -> usize {
        self.side_inputs.len()
    }

    pub fn interrupt(&self) -> &InterruptSignal {
        &self.interrupt
    }
}

impl<I, O> fmt::Debug for TransformBinding<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.side_outputs.iter().map(|o| &*o.id).collect();
        f.debug_struct("TransformBinding")
            .field("side_outputs", &tags)
            .field("side_inputs", &self.side_inputs)
            .field("keyed", &self.keyed)
            .field("window_fn", &self.window_fn.name())
            .finish_non_exhaustive()
    }
}

/// [`TransformBinding`] 的构建器。
pub struct TransformBindingBuilder<I, O> {
    main: Arc<dyn OutputSink<O>>,
    side_outputs: Vec<TaggedOutput>,
    side_inputs: Vec<Arc<str>>,
    reader: Arc<dyn SideInputReader>,
    keyed: bool,
    window_fn: Arc<dyn WindowFn<I>>,
    extra: Arc<dyn ExtraContextProvider>,
    pipeline_options: Arc<PipelineOptions>,
    interrupt: InterruptSignal,
}

impl<I: 'static, O: 'static> TransformBindingBuilder<I, O> {
    pub fn with_side_output<T>(
        mut self,
        tag: &OutputTag<T>,
        sink: impl OutputSink<T> + 'static,
    ) -> Self
    where
        T: Send + 'static,
    {
        self.side_outputs
            .push(TaggedOutput::new(tag, Arc::new(sink) as Arc<dyn OutputSink<T>>));
        self
    }

    pub fn with_side_input<T>(mut self, view: &SideInputView<T>) -> Self {
        self.side_inputs.push(Arc::from(view.id()));
        self
    }

    pub fn with_side_input_reader(mut self, reader: impl SideInputReader + 'static) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    pub fn keyed(mut self, keyed: bool) -> Self {
        self.keyed = keyed;
        self
    }

    pub fn with_window_fn(mut self, window_fn: impl WindowFn<I> + 'static) -> Self {
        self.window_fn = Arc::new(window_fn);
        self
    }

    pub fn with_extra_context(mut self, provider: impl ExtraContextProvider + 'static) -> Self {
        self.extra = Arc::new(provider);
        self
    }

    pub fn with_pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.pipeline_options = Arc::new(options);
        self
    }

    /// 与调度器共享的中断信号；未指定时使用一个永不触发的独立信号。
    pub fn with_interrupt(mut self, interrupt: InterruptSignal) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn build(self) -> Result<TransformBinding<I, O>> {
        let mut tags = BTreeSet::new();
        for output in &self.side_outputs {
            if !tags.insert(Arc::clone(&output.id)) {
                return Err(FlowError::DuplicateName {
                    scope: "output tag",
                    name: output.id.to_string(),
                });
            }
        }

        let mut views = BTreeSet::new();
        for view in self.side_inputs {
            if views.contains(&view) {
                return Err(FlowError::DuplicateName {
                    scope: "side input",
                    name: view.to_string(),
                });
            }
            views.insert(view);
        }

        Ok(TransformBinding {
            main: self.main,
            side_outputs: self.side_outputs,
            side_inputs: SideInputs::new(views, self.reader),
            keyed: self.keyed,
            window_fn: self.window_fn,
            extra: self.extra,
            pipeline_options: self.pipeline_options,
            interrupt: self.interrupt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::CollectingSink;

    #[test]
    fn duplicate_declarations_are_rejected() {
        let tag = OutputTag::<u8>::new("errors");
        let err = TransformBinding::<u8, u8>::builder(CollectingSink::new())
            .with_side_output(&tag, CollectingSink::new())
            .with_side_output(&tag, CollectingSink::new())
            .build()
            .expect_err("重复标签");
        assert!(matches!(err, FlowError::DuplicateName { scope: "output tag", .. }));

        let view = SideInputView::<u8>::new("lookup");
        let err = TransformBinding::<u8, u8>::builder(CollectingSink::new())
            .with_side_input(&view)
            .with_side_input(&view)
            .build()
            .expect_err("重复视图");
        assert!(matches!(err, FlowError::DuplicateName { scope: "side input", .. }));
    }

    #[test]
    fn defaults_are_unkeyed_global_and_empty() {
        let binding = TransformBinding::<u8, u8>::builder(CollectingSink::new())
            .build()
            .expect("缺省绑定");
        assert!(!binding.is_keyed());
        assert_eq!(binding.side_output_count(), 0);
        assert_eq!(binding.side_input_count(), 0);
        assert!(!binding.interrupt().is_interrupted());
    }
}
