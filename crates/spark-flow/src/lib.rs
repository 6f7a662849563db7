#![deny(unsafe_code)]
#![doc = "spark-flow: 数据并行变换运行时的逐元素执行契约。"]
#![doc = ""]
#![doc = "回调以 bundle 为单位执行：`start_bundle → process_element* → finish_bundle`。"]
#![doc = "核心负责发射记录的窗口继承与时间戳偏移校验、旁路输出路由、可选能力的按需解析，"]
#![doc = "以及实例级聚合器表；调度、sink、状态存储与窗口函数都是外部协作方。"]

//! ## 模块地图
//! - [`instance`]：用户回调 [`ElementFn`] 与回调实例；
//! - [`lifecycle`]：bundle 状态机与中断信号；
//! - [`context`]：两种执行上下文；
//! - [`assignment`] / [`window`]：发射记录的窗口与时间戳；
//! - [`output`] / [`side_input`]：旁路输出标签、sink 契约与旁路输入；
//! - [`extra`] / [`descriptor`]：声明式能力与其外部提供方；
//! - [`aggregator`]：聚合器表；
//! - [`config`]：执行配置与管道选项；
//! - [`test_stubs`]：测试用协作方桩与 [`FnTester`](test_stubs::FnTester)。

pub mod aggregator;
pub mod assignment;
pub mod binding;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod extra;
pub mod instance;
pub mod lifecycle;
#[cfg(feature = "telemetry")]
pub mod observability;
pub mod output;
pub mod prelude;
pub mod record;
mod router;
pub mod side_input;
pub mod test_stubs;
pub mod time;
pub mod window;

pub use aggregator::{Aggregator, AggregatorRegistry, CombineFn};
pub use binding::{TransformBinding, TransformBindingBuilder};
pub use config::{ExecutionSettings, PipelineOptions};
pub use context::{BundleContext, ElementContext, OutputContext, ProcessContext};
pub use descriptor::{CallbackDescriptor, InvocationGranularity, PhaseSignature};
pub use error::{ErrorCategory, FlowError, Result};
pub use instance::{ElementFn, ElementFnInstance};
pub use lifecycle::{BundleLifecycle, BundlePhase, BundleSummary, InterruptSignal};
pub use output::{ChannelId, OutputSink, OutputTag};
pub use record::Record;
pub use side_input::{SideInputReader, SideInputView};
pub use time::{Instant, TimestampSkew};
pub use window::{Window, WindowFn, WindowSet};
