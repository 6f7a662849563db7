//! 带时间戳与窗口归属的记录。

use crate::{
    time::Instant,
    window::{Window, WindowSet},
};

/// 一条流经变换的记录。
///
/// # 契约说明（What）
/// - 由路由器产出后不可变，只能通过消费式的 [`Record::map_value`] 派生新记录；
/// - `windows` 由 [`WindowSet`] 保证非空。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record<V> {
    value: V,
    timestamp: Instant,
    windows: WindowSet,
}

impl<V> Record<V> {
    pub fn new(value: V, timestamp: Instant, windows: WindowSet) -> Self {
        Self {
            value,
            timestamp,
            windows,
        }
    }

    /// 位于全局窗口中的记录。
    pub fn in_global_window(value: V, timestamp: Instant) -> Self {
        Self::new(value, timestamp, WindowSet::global())
    }

    /// 位于单个窗口中的记录。
    pub fn in_window(value: V, timestamp: Instant, window: Window) -> Self {
        Self::new(value, timestamp, WindowSet::single(window))
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn windows(&self) -> &WindowSet {
        &self.windows
    }

    pub fn into_value(self) -> V {
        self.value
    }

    /// 拆分为 `(value, timestamp, windows)`。
    pub fn into_parts(self) -> (V, Instant, WindowSet) {
        (self.value, self.timestamp, self.windows)
    }

    /// 替换值，保留时间戳与窗口。
    pub fn map_value<U>(self, f: impl FnOnce(V) -> U) -> Record<U> {
        Record {
            value: f(self.value),
            timestamp: self.timestamp,
            windows: self.windows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::IntervalWindow;

    #[test]
    fn map_value_keeps_timestamp_and_windows() {
        let window = Window::Interval(
            IntervalWindow::new(Instant::from_secs(0), Instant::from_secs(10)).expect("区间"),
        );
        let record = Record::in_window(21_u32, Instant::from_secs(3), window);
        let doubled = record.map_value(|value| u64::from(value) * 2);
        assert_eq!(*doubled.value(), 42);
        assert_eq!(doubled.timestamp(), Instant::from_secs(3));
        assert_eq!(doubled.windows(), &WindowSet::single(window));
    }
}
