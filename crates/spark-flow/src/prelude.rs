//! # spark-flow Prelude
//!
//! 回调作者最常用的类型一站式导入：`use spark_flow::prelude::*;`。
//! 只收录跨模块高频使用的契约；窗口函数实现、测试桩等仍建议使用完整路径。

pub use crate::{
    aggregator::{Aggregator, AggregatorRegistry, CombineFn, Count, Max, Min, Sum},
    binding::TransformBinding,
    config::{ExecutionSettings, PipelineOptions},
    context::{BundleContext, ElementContext, OutputContext, ProcessContext},
    descriptor::{CallbackDescriptor, InvocationGranularity, PhaseSignature},
    error::{ErrorCategory, FlowError, Result},
    instance::{ElementFn, ElementFnInstance},
    lifecycle::{BundlePhase, BundleSummary, InterruptSignal},
    output::{OutputSink, OutputTag},
    record::Record,
    side_input::SideInputView,
    time::{Instant, TimestampSkew},
    window::{Window, WindowSet},
};
