//! # 窗口与窗口函数
//!
//! ## 核心意图（Why）
//! - [`Window`] 是记录的分组归属，作为集合元素使用，因此相等、哈希与排序必须稳定；
//! - [`WindowSet`] 在类型层面保证非空：任何经过窗口分配的记录至少属于一个窗口；
//! - [`WindowFn`] 是外部提供的窗口分配函数，核心把它当作黑盒，通过 [`AssignContext`]
//!   控制它能读到哪些元素信息。
//!
//! ## 行为契约（What）
//! - `AssignContext` 的三个访问器在没有对应信息时返回
//!   [`FlowError::ContextMisuse`]，窗口函数应直接以 `?` 传播；
//! - 标准窗口函数：[`GlobalWindows`] 不读取任何元素信息，[`FixedWindows`] 与
//!   [`SlidingWindows`] 只读取时间戳。

use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use crate::{
    error::{FlowError, Result},
    time::Instant,
};

/// 左闭右开的时间区间窗口 `[start, end)`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalWindow {
    start: Instant,
    end: Instant,
}

impl IntervalWindow {
    /// 构造区间窗口；`end` 不晚于 `start` 时返回 `None`。
    pub fn new(start: Instant, end: Instant) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    /// 窗口内可出现的最大时间戳，即 `end - 1ms`。
    pub fn max_timestamp(&self) -> Instant {
        Instant::from_millis(self.end.millis() - 1)
    }

    pub fn contains(&self, timestamp: Instant) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

impl fmt::Display for IntervalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// 记录所属的窗口。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Window {
    /// 覆盖全部时间的单一窗口。
    Global,
    /// 时间区间窗口。
    Interval(IntervalWindow),
}

impl Window {
    /// 窗口的上界，即其中可出现的最大时间戳。
    pub fn max_timestamp(&self) -> Instant {
        match self {
            Window::Global => Instant::MAX,
            Window::Interval(interval) => interval.max_timestamp(),
        }
    }
}

impl From<IntervalWindow> for Window {
    fn from(value: IntervalWindow) -> Self {
        Window::Interval(value)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Global => f.write_str("global"),
            Window::Interval(interval) => interval.fmt(f),
        }
    }
}

/// 非空、有序的窗口集合。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WindowSet(BTreeSet<Window>);

impl WindowSet {
    /// 单窗口集合。
    pub fn single(window: Window) -> Self {
        WindowSet(BTreeSet::from([window]))
    }

    /// 仅包含全局窗口的集合。
    pub fn global() -> Self {
        Self::single(Window::Global)
    }

    /// 由任意窗口序列构造；序列为空时返回 [`FlowError::EmptyWindowSet`]。
    pub fn try_from_windows(windows: impl IntoIterator<Item = Window>) -> Result<Self> {
        let set: BTreeSet<Window> = windows.into_iter().collect();
        if set.is_empty() {
            return Err(FlowError::EmptyWindowSet);
        }
        Ok(WindowSet(set))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 集合恒非空，保留该方法以满足惯用的 `len`/`is_empty` 成对约定。
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, window: &Window) -> bool {
        self.0.contains(window)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.0.iter()
    }

    /// 若集合只含一个窗口则返回它。
    pub fn only(&self) -> Option<&Window> {
        let mut iter = self.0.iter();
        match (iter.next(), iter.next()) {
            (Some(window), None) => Some(window),
            _ => None,
        }
    }
}

impl<'a> IntoIterator for &'a WindowSet {
    type Item = &'a Window;
    type IntoIter = std::collections::btree_set::Iter<'a, Window>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// 窗口函数可见的输入信息。
///
/// # 契约说明（What）
/// - 逐元素分配时三个访问器均可用；
/// - bundle 作用域内 `element()`/`windows()` 恒失败，`timestamp()` 仅在调用方显式提供时间戳时可用；
/// - 失败一律返回 [`FlowError::ContextMisuse`]，窗口函数不应吞掉该错误。
pub trait AssignContext<I> {
    /// 触发分配的输入元素。
    fn element(&self) -> Result<&I>;

    /// 待分配记录的时间戳。
    fn timestamp(&self) -> Result<Instant>;

    /// 输入元素此前所属的窗口。
    fn windows(&self) -> Result<&WindowSet>;
}

/// 外部提供的窗口分配函数。
pub trait WindowFn<I>: Send + Sync {
    /// 为一条记录计算窗口集合。
    fn assign_windows(&self, ctx: &dyn AssignContext<I>) -> Result<WindowSet>;

    /// 名称，用于日志。
    fn name(&self) -> &str {
        "window-fn"
    }
}

impl<I, W> WindowFn<I> for Arc<W>
where
    W: WindowFn<I> + ?Sized,
{
    fn assign_windows(&self, ctx: &dyn AssignContext<I>) -> Result<WindowSet> {
        (**self).assign_windows(ctx)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// 逐元素分配上下文：元素、时间戳与原窗口全部可见。
pub struct ElementAssignContext<'a, I> {
    element: &'a I,
    timestamp: Instant,
    windows: &'a WindowSet,
}

impl<'a, I> ElementAssignContext<'a, I> {
    pub fn new(element: &'a I, timestamp: Instant, windows: &'a WindowSet) -> Self {
        Self {
            element,
            timestamp,
            windows,
        }
    }
}

impl<I> AssignContext<I> for ElementAssignContext<'_, I> {
    fn element(&self) -> Result<&I> {
        Ok(self.element)
    }

    fn timestamp(&self) -> Result<Instant> {
        Ok(self.timestamp)
    }

    fn windows(&self) -> Result<&WindowSet> {
        Ok(self.windows)
    }
}

/// bundle 作用域分配上下文：没有触发元素，只可能有调用方显式提供的时间戳。
pub struct BundleAssignContext {
    timestamp: Option<Instant>,
}

impl BundleAssignContext {
    const SCOPE: &'static str = "outside element processing";

    pub fn new(timestamp: Option<Instant>) -> Self {
        Self { timestamp }
    }
}

impl<I> AssignContext<I> for BundleAssignContext {
    fn element(&self) -> Result<&I> {
        Err(FlowError::ContextMisuse {
            accessor: "element",
            scope: Self::SCOPE,
        })
    }

    fn timestamp(&self) -> Result<Instant> {
        self.timestamp.ok_or(FlowError::ContextMisuse {
            accessor: "timestamp",
            scope: Self::SCOPE,
        })
    }

    fn windows(&self) -> Result<&WindowSet> {
        Err(FlowError::ContextMisuse {
            accessor: "windows",
            scope: Self::SCOPE,
        })
    }
}

/// 把所有记录分配到全局窗口。
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalWindows;

impl<I> WindowFn<I> for GlobalWindows {
    fn assign_windows(&self, _ctx: &dyn AssignContext<I>) -> Result<WindowSet> {
        Ok(WindowSet::global())
    }

    fn name(&self) -> &str {
        "global-windows"
    }
}

/// 把时长换算为窗口算术使用的毫秒数；不足 1 毫秒或超出 `i64` 范围时返回 `None`。
fn positive_millis(span: Duration) -> Option<i64> {
    i64::try_from(span.as_millis()).ok().filter(|millis| *millis > 0)
}

/// 固定长度、互不重叠的区间窗口。
#[derive(Clone, Copy, Debug)]
pub struct FixedWindows {
    size_ms: i64,
    offset_ms: i64,
}

impl FixedWindows {
    /// 构造固定窗口；`size` 不足 1 毫秒或无法以 `i64` 毫秒表示时返回 `None`。
    pub fn of(size: Duration) -> Option<Self> {
        Some(Self {
            size_ms: positive_millis(size)?,
            offset_ms: 0,
        })
    }

    /// 设置窗口起点相对纪元的偏移，偏移按 `size` 取模。
    pub fn with_offset(mut self, offset: Duration) -> Self {
        let size = self.size_ms.unsigned_abs() as u128;
        // 余数小于 size_ms，必然落在 i64 范围内。
        self.offset_ms = i64::try_from(offset.as_millis() % size).unwrap_or(0);
        self
    }

    fn window_for(&self, timestamp: Instant) -> Result<Window> {
        let remainder = timestamp
            .millis()
            .saturating_sub(self.offset_ms)
            .rem_euclid(self.size_ms);
        let start = timestamp
            .millis()
            .checked_sub(remainder)
            .ok_or(FlowError::EmptyWindowSet)?;
        IntervalWindow::new(
            Instant::from_millis(start),
            Instant::from_millis(start.saturating_add(self.size_ms)),
        )
        .map(Window::Interval)
        .ok_or(FlowError::EmptyWindowSet)
    }
}

impl<I> WindowFn<I> for FixedWindows {
    fn assign_windows(&self, ctx: &dyn AssignContext<I>) -> Result<WindowSet> {
        let timestamp = ctx.timestamp()?;
        Ok(WindowSet::single(self.window_for(timestamp)?))
    }

    fn name(&self) -> &str {
        "fixed-windows"
    }
}

/// 按固定步长滑动、可能相互重叠的区间窗口。
#[derive(Clone, Copy, Debug)]
pub struct SlidingWindows {
    size_ms: i64,
    period_ms: i64,
}

impl SlidingWindows {
    /// `size` 或 `period` 不足 1 毫秒或无法以 `i64` 毫秒表示时返回 `None`。
    pub fn of(size: Duration, period: Duration) -> Option<Self> {
        Some(Self {
            size_ms: positive_millis(size)?,
            period_ms: positive_millis(period)?,
        })
    }
}

impl<I> WindowFn<I> for SlidingWindows {
    fn assign_windows(&self, ctx: &dyn AssignContext<I>) -> Result<WindowSet> {
        let timestamp = ctx.timestamp()?.millis();
        let Some(last_start) = timestamp.checked_sub(timestamp.rem_euclid(self.period_ms)) else {
            return Err(FlowError::EmptyWindowSet);
        };
        let lower = timestamp.saturating_sub(self.size_ms);

        let mut windows = Vec::new();
        let mut start = last_start;
        while start > lower {
            let begin = Instant::from_millis(start);
            let end = Instant::from_millis(start.saturating_add(self.size_ms));
            if let Some(window) = IntervalWindow::new(begin, end) {
                windows.push(Window::Interval(window));
            }
            match start.checked_sub(self.period_ms) {
                Some(previous) => start = previous,
                None => break,
            }
        }
        WindowSet::try_from_windows(windows)
    }

    fn name(&self) -> &str {
        "sliding-windows"
    }
}

/// 以闭包实现的窗口函数。
pub struct FnWindowFn<F> {
    name: String,
    assign: F,
}

impl<F> FnWindowFn<F> {
    pub fn new(name: impl Into<String>, assign: F) -> Self {
        Self {
            name: name.into(),
            assign,
        }
    }
}

impl<I, F> WindowFn<I> for FnWindowFn<F>
where
    F: Fn(&dyn AssignContext<I>) -> Result<WindowSet> + Send + Sync,
{
    fn assign_windows(&self, ctx: &dyn AssignContext<I>) -> Result<WindowSet> {
        (self.assign)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
