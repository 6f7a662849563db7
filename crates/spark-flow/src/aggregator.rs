//! # AggregatorRegistry：实例级聚合器表
//!
//! ## 核心意图（Why）
//! - 回调在任意阶段都可能登记并更新可交换、可结合的聚合器（计数、求和、极值），
//!   值的收集后端是外部协作方，只经由 [`Aggregator`] 句柄接触；
//! - 注册表归一个回调实例独占，生命周期与实例一致，不在 bundle 之间重置，也不存在全局注册表。
//!
//! ## 行为契约（What）
//! - 名称为空返回 [`FlowError::NullArgument`]；名称重复返回 [`FlowError::DuplicateName`]，
//!   已有句柄不受影响；
//! - 句柄可克隆、可跨线程移动；内部使用 `parking_lot::Mutex`，按顺序调用的前提下锁永不竞争。

use std::{
    any::{Any, type_name},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    ops::Add,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::error::{FlowError, Result};

/// 可交换、可结合的合并逻辑。
pub trait CombineFn<In, Out>: Send + Sync + 'static {
    type Accumulator: Send + 'static;

    fn create_accumulator(&self) -> Self::Accumulator;

    fn add_input(&self, accumulator: &mut Self::Accumulator, input: In);

    fn merge_accumulators(&self, accumulators: Vec<Self::Accumulator>) -> Self::Accumulator;

    fn extract_output(&self, accumulator: &Self::Accumulator) -> Out;
}

/// 求和。
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

impl<T> CombineFn<T, T> for Sum
where
    T: Add<Output = T> + Default + Copy + Send + 'static,
{
    type Accumulator = T;

    fn create_accumulator(&self) -> T {
        T::default()
    }

    fn add_input(&self, accumulator: &mut T, input: T) {
        *accumulator = *accumulator + input;
    }

    fn merge_accumulators(&self, accumulators: Vec<T>) -> T {
        accumulators
            .into_iter()
            .fold(T::default(), |acc, value| acc + value)
    }

    fn extract_output(&self, accumulator: &T) -> T {
        *accumulator
    }
}

/// 计数，忽略输入值本身。
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

impl<T> CombineFn<T, u64> for Count {
    type Accumulator = u64;

    fn create_accumulator(&self) -> u64 {
        0
    }

    fn add_input(&self, accumulator: &mut u64, _input: T) {
        *accumulator += 1;
    }

    fn merge_accumulators(&self, accumulators: Vec<u64>) -> u64 {
        accumulators.into_iter().sum()
    }

    fn extract_output(&self, accumulator: &u64) -> u64 {
        *accumulator
    }
}

/// 最大值；没有输入时为 `None`。
#[derive(Clone, Copy, Debug, Default)]
pub struct Max;

impl<T> CombineFn<T, Option<T>> for Max
where
    T: Ord + Copy + Send + 'static,
{
    type Accumulator = Option<T>;

    fn create_accumulator(&self) -> Option<T> {
        None
    }

    fn add_input(&self, accumulator: &mut Option<T>, input: T) {
        *accumulator = Some(accumulator.map_or(input, |current| current.max(input)));
    }

    fn merge_accumulators(&self, accumulators: Vec<Option<T>>) -> Option<T> {
        accumulators.into_iter().flatten().max()
    }

    fn extract_output(&self, accumulator: &Option<T>) -> Option<T> {
        *accumulator
    }
}

/// 最小值；没有输入时为 `None`。
#[derive(Clone, Copy, Debug, Default)]
pub struct Min;

impl<T> CombineFn<T, Option<T>> for Min
where
    T: Ord + Copy + Send + 'static,
{
    type Accumulator = Option<T>;

    fn create_accumulator(&self) -> Option<T> {
        None
    }

    fn add_input(&self, accumulator: &mut Option<T>, input: T) {
        *accumulator = Some(accumulator.map_or(input, |current| current.min(input)));
    }

    fn merge_accumulators(&self, accumulators: Vec<Option<T>>) -> Option<T> {
        accumulators.into_iter().flatten().min()
    }

    fn extract_output(&self, accumulator: &Option<T>) -> Option<T> {
        *accumulator
    }
}

/// 以“把一批值归约为一个值”的函数构造的合并逻辑。
///
/// 输入先缓冲，缓冲超过 [`SimpleCombine::BUFFER_SIZE`] 时立即归约为单个值，
/// 因此归约函数必须满足交换律与结合律。
pub struct SimpleCombine<F, V> {
    reduce: F,
    _marker: PhantomData<fn(V) -> V>,
}

impl<F, V> SimpleCombine<F, V> {
    pub const BUFFER_SIZE: usize = 20;

    pub fn new(reduce: F) -> Self {
        Self {
            reduce,
            _marker: PhantomData,
        }
    }
}

impl<F, V> CombineFn<V, V> for SimpleCombine<F, V>
where
    F: Fn(Vec<V>) -> V + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    type Accumulator = Vec<V>;

    fn create_accumulator(&self) -> Vec<V> {
        Vec::new()
    }

    fn add_input(&self, accumulator: &mut Vec<V>, input: V) {
        accumulator.push(input);
        if accumulator.len() > Self::BUFFER_SIZE {
            let reduced = (self.reduce)(std::mem::take(accumulator));
            accumulator.push(reduced);
        }
    }

    fn merge_accumulators(&self, accumulators: Vec<Vec<V>>) -> Vec<V> {
        let merged: Vec<V> = accumulators.into_iter().flatten().collect();
        if merged.len() > Self::BUFFER_SIZE {
            vec![(self.reduce)(merged)]
        } else {
            merged
        }
    }

    fn extract_output(&self, accumulator: &Vec<V>) -> V {
        (self.reduce)(accumulator.clone())
    }
}

trait Cell<In, Out>: Send {
    fn add(&mut self, input: In);
    fn output(&self) -> Out;
}

struct CombineCell<C, In, Out>
where
    C: CombineFn<In, Out>,
{
    combine: C,
    accumulator: C::Accumulator,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<C, In, Out> Cell<In, Out> for CombineCell<C, In, Out>
where
    C: CombineFn<In, Out>,
{
    fn add(&mut self, input: In) {
        self.combine.add_input(&mut self.accumulator, input);
    }

    fn output(&self) -> Out {
        self.combine.extract_output(&self.accumulator)
    }
}

struct AggregatorState<In, Out> {
    name: Arc<str>,
    cell: Mutex<Box<dyn Cell<In, Out>>>,
}

/// 注册表视角下擦除类型的聚合器。
trait ErasedAggregator: Send + Sync {
    fn input_type(&self) -> &'static str;
    fn output_type(&self) -> &'static str;
    fn render(&self) -> String;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<In, Out> ErasedAggregator for AggregatorState<In, Out>
where
    In: 'static,
    Out: fmt::Debug + 'static,
{
    fn input_type(&self) -> &'static str {
        type_name::<In>()
    }

    fn output_type(&self) -> &'static str {
        type_name::<Out>()
    }

    fn render(&self) -> String {
        format!("{:?}", self.cell.lock().output())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// 聚合器句柄。
///
/// 在任意阶段都可更新；克隆得到的句柄共享同一累加器。
pub struct Aggregator<In, Out> {
    state: Arc<AggregatorState<In, Out>>,
}

impl<In, Out> Aggregator<In, Out> {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn add_value(&self, input: In) {
        self.state.cell.lock().add(input);
    }

    /// 当前累加结果。
    pub fn value(&self) -> Out {
        self.state.cell.lock().output()
    }
}

impl<In, Out> Clone for Aggregator<In, Out> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<In, Out> fmt::Debug for Aggregator<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.state.name)
            .finish_non_exhaustive()
    }
}

/// 注册表快照中的一项。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorSnapshot {
    pub name: String,
    pub input_type: &'static str,
    pub output_type: &'static str,
    pub value: String,
}

/// 回调实例独占的聚合器表。
#[derive(Default)]
pub struct AggregatorRegistry {
    entries: HashMap<Arc<str>, Arc<dyn ErasedAggregator>>,
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记聚合器并返回句柄。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`name` 非空白，且在本实例内尚未登记；
    /// - **错误**：空串或只含空白的名称视同缺失，返回 [`FlowError::NullArgument`]；
    ///   名称已被占用时返回 [`FlowError::DuplicateName`]；
    /// - **后置条件**：成功时注册表多出一项；失败时注册表与既有句柄均不变。
    pub fn create_aggregator<In, Out, C>(
        &mut self,
        name: impl Into<String>,
        combine: C,
    ) -> Result<Aggregator<In, Out>>
    where
        In: Send + 'static,
        Out: fmt::Debug + Send + 'static,
        C: CombineFn<In, Out>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FlowError::NullArgument { argument: "name" });
        }
        if self.entries.contains_key(name.as_str()) {
            return Err(FlowError::DuplicateName {
                scope: "aggregator",
                name,
            });
        }

        let name: Arc<str> = Arc::from(name);
        let cell = CombineCell {
            accumulator: combine.create_accumulator(),
            combine,
            _marker: PhantomData,
        };
        let state = Arc::new(AggregatorState {
            name: Arc::clone(&name),
            cell: Mutex::new(Box::new(cell) as Box<dyn Cell<In, Out>>),
        });
        self.entries
            .insert(name, Arc::clone(&state) as Arc<dyn ErasedAggregator>);
        tracing::debug!(
            target: "spark_flow::aggregator",
            aggregator = %state.name,
            input = type_name::<In>(),
            "aggregator registered"
        );
        Ok(Aggregator { state })
    }

    /// 以归约函数登记聚合器，见 [`SimpleCombine`]。
    pub fn create_simple_aggregator<V, F>(
        &mut self,
        name: impl Into<String>,
        reduce: F,
    ) -> Result<Aggregator<V, V>>
    where
        V: Clone + fmt::Debug + Send + 'static,
        F: Fn(Vec<V>) -> V + Send + Sync + 'static,
    {
        self.create_aggregator(name, SimpleCombine::new(reduce))
    }

    /// 按名称取回已登记的句柄；类型不符时返回 `None`。
    pub fn get<In, Out>(&self, name: &str) -> Option<Aggregator<In, Out>>
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        let erased = Arc::clone(self.entries.get(name)?);
        let state = erased
            .into_any()
            .downcast::<AggregatorState<In, Out>>()
            .ok()?;
        Some(Aggregator { state })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按名称排序的当前值快照，供外部收集后端读取。
    pub fn snapshot(&self) -> Vec<AggregatorSnapshot> {
        let mut items: Vec<_> = self
            .entries
            .iter()
            .map(|(name, entry)| AggregatorSnapshot {
                name: name.to_string(),
                input_type: entry.input_type(),
                output_type: entry.output_type(),
                value: entry.render(),
            })
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }
}

impl fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("AggregatorRegistry")
            .field("names", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_combine_compacts_large_buffers() {
        let mut registry = AggregatorRegistry::new();
        let longest = registry
            .create_simple_aggregator("longest", |values: Vec<usize>| {
                values.into_iter().max().unwrap_or(0)
            })
            .expect("登记成功");
        for value in 0..100 {
            longest.add_value(value);
        }
        assert_eq!(longest.value(), 99);
    }

    #[test]
    fn typed_lookup_requires_matching_types() {
        let mut registry = AggregatorRegistry::new();
        let total = registry
            .create_aggregator::<i64, i64, _>("total", Sum)
            .expect("登记成功");
        total.add_value(5);

        let same = registry.get::<i64, i64>("total").expect("类型一致");
        same.add_value(7);
        assert_eq!(total.value(), 12, "两个句柄共享同一累加器");
        assert!(registry.get::<u32, u32>("total").is_none());
        assert!(registry.get::<i64, i64>("missing").is_none());
    }

    #[test]
    fn snapshot_renders_current_values() {
        let mut registry = AggregatorRegistry::new();
        let seen = registry
            .create_aggregator::<&'static str, u64, _>("seen", Count)
            .expect("登记成功");
        let peak = registry
            .create_aggregator::<u32, Option<u32>, _>("peak", Max)
            .expect("登记成功");
        seen.add_value("a");
        seen.add_value("b");
        peak.add_value(3);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "peak");
        assert_eq!(snapshot[0].value, "Some(3)");
        assert_eq!(snapshot[1].name, "seen");
        assert_eq!(snapshot[1].value, "2");
    }
}
