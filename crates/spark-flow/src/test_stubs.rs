//! 执行契约测试用的协作方桩与回调测试器。
//!
//! # 设计定位（Why）
//! - 单元测试、集成测试与下游回调作者都需要满足 [`OutputSink`]、[`KeyedState`]、
//!   [`SideInputReader`]、[`ExtraContextProvider`] 契约的最小实现；
//! - 集中维护这些桩，接口调整时只需要改一处。
//!
//! # 使用方式（How）
//! - 直接构造 [`CollectingSink`] 等类型交给 [`TransformBinding`] 构建器；
//! - 或使用 [`FnTester`] 一次性跑完 `start → process_element* → finish`，再读取各通道输出。
//!
//! # 风险与权衡（Trade-offs）
//! - 桩对象把所有数据保存在内存中，不适合大规模输入；
//! - 模块公开为稳定测试 API，新增字段或方法时需要同步更新这里的实现。

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    aggregator::AggregatorRegistry,
    binding::{TransformBinding, TransformBindingBuilder},
    config::{ExecutionSettings, PipelineOptions},
    error::{FlowError, Result},
    extra::{
        ExtraContextProvider, InvocationScope, KeyedState, PaneInfo, WindowingInternals,
    },
    instance::{ElementFn, ElementFnInstance},
    lifecycle::{BundleSummary, InterruptSignal},
    output::{OutputSink, OutputTag},
    record::Record,
    side_input::{MaterializedValue, SideInputReader, SideInputView},
    time::Instant,
    window::{Window, WindowFn, WindowSet},
};

/// 把收到的记录按顺序保存在内存中的 sink。
///
/// 克隆得到的 sink 共享同一缓冲区，测试可以保留一份用于断言。
pub struct CollectingSink<T> {
    records: Arc<Mutex<Vec<Record<T>>>>,
}

impl<T> CollectingSink<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// 取出全部记录并清空缓冲区。
    pub fn take(&self) -> Vec<Record<T>> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl<T: Clone> CollectingSink<T> {
    pub fn records(&self) -> Vec<Record<T>> {
        self.records.lock().clone()
    }

    pub fn values(&self) -> Vec<T> {
        self.records
            .lock()
            .iter()
            .map(|record| record.value().clone())
            .collect()
    }
}

impl<T> Clone for CollectingSink<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<T> Default for CollectingSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CollectingSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectingSink")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Send> OutputSink<T> for CollectingSink<T> {
    fn accept(&self, record: Record<T>) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// 总是拒绝记录的 sink，用于验证协作方错误的传播。
#[derive(Clone, Debug)]
pub struct FailingSink {
    message: Arc<str>,
}

impl FailingSink {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<T> OutputSink<T> for FailingSink {
    fn accept(&self, _record: Record<T>) -> Result<()> {
        Err(FlowError::collaborator(
            "sink",
            io::Error::other(self.message.to_string()),
        ))
    }
}

/// 内存中的键控状态。
#[derive(Clone, Debug, Default)]
pub struct InMemoryKeyedState {
    cells: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryKeyedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.cells.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }
}

impl KeyedState for InMemoryKeyedState {
    fn lookup(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(name))
    }

    fn store(&self, name: &str, value: Vec<u8>) -> Result<()> {
        self.cells.lock().insert(name.to_owned(), value);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.cells.lock().remove(name);
        Ok(())
    }
}

/// 预先登记物化值的旁路输入读取方。
///
/// 查找顺序：先按 `(视图, 窗口)` 精确匹配，再退回到视图的窗口无关值。
#[derive(Clone, Default)]
pub struct StaticSideInputReader {
    per_window: HashMap<(String, Window), MaterializedValue>,
    any_window: HashMap<String, MaterializedValue>,
    reads: Arc<AtomicUsize>,
}

impl StaticSideInputReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value<T>(mut self, view: &SideInputView<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.any_window
            .insert(view.id().to_owned(), Arc::new(value) as MaterializedValue);
        self
    }

    pub fn with_window_value<T>(mut self, view: &SideInputView<T>, window: Window, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.per_window.insert(
            (view.id().to_owned(), window),
            Arc::new(value) as MaterializedValue,
        );
        self
    }

    /// 已发生的读取次数。
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SideInputReader for StaticSideInputReader {
    fn read(&self, view: &str, window: &Window) -> Result<MaterializedValue> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.per_window
            .get(&(view.to_owned(), *window))
            .or_else(|| self.any_window.get(view))
            .cloned()
            .ok_or_else(|| {
                FlowError::collaborator(
                    "side input reader",
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no value for `{view}` in window {window}"),
                    ),
                )
            })
    }
}

impl fmt::Debug for StaticSideInputReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSideInputReader")
            .field("reads", &self.reads())
            .finish_non_exhaustive()
    }
}

struct StaticWindowingInternals {
    pane: PaneInfo,
    windows: WindowSet,
    timestamp: Instant,
}

impl WindowingInternals for StaticWindowingInternals {
    fn pane(&self) -> PaneInfo {
        self.pane
    }

    fn windows(&self) -> WindowSet {
        self.windows.clone()
    }

    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// 以固定配置回答能力请求的提供方，并记录每项能力被查询的次数。
#[derive(Clone, Debug, Default)]
pub struct StaticExtraContextProvider {
    state: Option<InMemoryKeyedState>,
    pane: PaneInfo,
    keyed_state_calls: Arc<AtomicUsize>,
    window_calls: Arc<AtomicUsize>,
    internals_calls: Arc<AtomicUsize>,
}

impl StaticExtraContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyed_state(mut self, state: InMemoryKeyedState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_pane(mut self, pane: PaneInfo) -> Self {
        self.pane = pane;
        self
    }

    pub fn keyed_state_calls(&self) -> usize {
        self.keyed_state_calls.load(Ordering::SeqCst)
    }

    pub fn window_calls(&self) -> usize {
        self.window_calls.load(Ordering::SeqCst)
    }

    pub fn internals_calls(&self) -> usize {
        self.internals_calls.load(Ordering::SeqCst)
    }
}

impl ExtraContextProvider for StaticExtraContextProvider {
    fn keyed_state(&self, _scope: &InvocationScope<'_>) -> Result<Arc<dyn KeyedState>> {
        self.keyed_state_calls.fetch_add(1, Ordering::SeqCst);
        match &self.state {
            Some(state) => Ok(Arc::new(state.clone())),
            None => Err(FlowError::CapabilityUnavailable {
                capability: "keyed_state",
            }),
        }
    }

    fn window(&self, scope: &InvocationScope<'_>) -> Result<Window> {
        self.window_calls.fetch_add(1, Ordering::SeqCst);
        let windows = scope.windows();
        windows.only().copied().ok_or(FlowError::AmbiguousWindow {
            count: windows.len(),
        })
    }

    fn windowing_internals(
        &self,
        scope: &InvocationScope<'_>,
    ) -> Result<Arc<dyn WindowingInternals>> {
        self.internals_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StaticWindowingInternals {
            pane: self.pane,
            windows: scope.windows().clone(),
            timestamp: scope.timestamp(),
        }))
    }
}

/// 回调测试器：用收集型 sink 绑定回调，按 bundle 运行样例输入。
///
/// # 使用示例
/// ```
/// use spark_flow::prelude::*;
/// use spark_flow::test_stubs::FnTester;
///
/// struct Upper;
///
/// impl ElementFn<String, String> for Upper {
///     fn process_element(&mut self, ctx: &mut ProcessContext<'_, String, String>) -> Result<()> {
///         ctx.output(ctx.element().to_uppercase())
///     }
/// }
///
/// let mut tester = FnTester::builder(Upper).build().expect("绑定成功");
/// tester
///     .process_bundle([Record::in_global_window("a".to_owned(), Instant::EPOCH)])
///     .expect("bundle 成功");
/// assert_eq!(tester.main_values(), vec!["A".to_owned()]);
/// ```
pub struct FnTester<I, O, F>
where
    I: 'static,
    O: 'static,
{
    instance: ElementFnInstance<I, O, F>,
    main: CollectingSink<O>,
    side: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl<I, O, F> FnTester<I, O, F>
where
    I: 'static,
    O: Send + 'static,
    F: ElementFn<I, O>,
{
    pub fn builder(callback: F) -> FnTesterBuilder<I, O, F> {
        let main = CollectingSink::new();
        FnTesterBuilder {
            callback,
            binding: TransformBinding::builder(main.clone()),
            main,
            side: HashMap::new(),
            reader: StaticSideInputReader::new(),
            settings: ExecutionSettings::default(),
        }
    }

    /// 以一个完整 bundle 处理输入。
    pub fn process_bundle(
        &mut self,
        inputs: impl IntoIterator<Item = Record<I>>,
    ) -> Result<BundleSummary> {
        let mut bundle = self.instance.bundle();
        bundle.start()?;
        for record in inputs {
            bundle.process_element(record)?;
        }
        bundle.finish()
    }

    /// 主输出上收到的全部记录。
    pub fn main_output(&self) -> Vec<Record<O>>
    where
        O: Clone,
    {
        self.main.records()
    }

    pub fn main_values(&self) -> Vec<O>
    where
        O: Clone,
    {
        self.main.values()
    }

    /// 某个旁路输出上收到的记录；标签未登记或类型不符时为空。
    pub fn side_output<T>(&self, tag: &OutputTag<T>) -> Vec<Record<T>>
    where
        T: Clone + Send + 'static,
    {
        self.side
            .get(tag.id())
            .and_then(|sink| sink.downcast_ref::<CollectingSink<T>>())
            .map(CollectingSink::records)
            .unwrap_or_default()
    }

    pub fn instance(&self) -> &ElementFnInstance<I, O, F> {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut ElementFnInstance<I, O, F> {
        &mut self.instance
    }

    pub fn aggregators(&self) -> &AggregatorRegistry {
        self.instance.aggregators()
    }
}

impl<I, O, F> fmt::Debug for FnTester<I, O, F>
where
    I: 'static,
    O: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTester")
            .field("instance", &self.instance)
            .field("main", &self.main)
            .finish_non_exhaustive()
    }
}

/// [`FnTester`] 的构建器。
pub struct FnTesterBuilder<I, O, F> {
    callback: F,
    binding: TransformBindingBuilder<I, O>,
    main: CollectingSink<O>,
    side: HashMap<String, Arc<dyn Any + Send + Sync>>,
    reader: StaticSideInputReader,
    settings: ExecutionSettings,
}

impl<I, O, F> FnTesterBuilder<I, O, F>
where
    I: 'static,
    O: Send + 'static,
    F: ElementFn<I, O>,
{
    /// 声明旁路输出，并为它挂上收集型 sink。
    pub fn with_side_output<T>(mut self, tag: &OutputTag<T>) -> Self
    where
        T: Send + 'static,
    {
        let sink = CollectingSink::<T>::new();
        self.side.insert(
            tag.id().to_owned(),
            Arc::new(sink.clone()) as Arc<dyn Any + Send + Sync>,
        );
        self.binding = self.binding.with_side_output(tag, sink);
        self
    }

    /// 声明旁路输入，并登记其在任意窗口下的物化值。
    pub fn with_side_input<T>(mut self, view: &SideInputView<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.binding = self.binding.with_side_input(view);
        self.reader = self.reader.with_value(view, value);
        self
    }

    pub fn keyed(mut self, keyed: bool) -> Self {
        self.binding = self.binding.keyed(keyed);
        self
    }

    pub fn with_window_fn(mut self, window_fn: impl WindowFn<I> + 'static) -> Self {
        self.binding = self.binding.with_window_fn(window_fn);
        self
    }

    pub fn with_extra_context(mut self, provider: impl ExtraContextProvider + 'static) -> Self {
        self.binding = self.binding.with_extra_context(provider);
        self
    }

    pub fn with_pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.binding = self.binding.with_pipeline_options(options);
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptSignal) -> Self {
        self.binding = self.binding.with_interrupt(interrupt);
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<FnTester<I, O, F>> {
        let binding = self.binding.with_side_input_reader(self.reader).build()?;
        let instance = ElementFnInstance::new(self.callback, binding, self.settings)?;
        Ok(FnTester {
            instance,
            main: self.main,
            side: self.side,
        })
    }
}
