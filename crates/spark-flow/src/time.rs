//! 事件时间与时间戳偏移。
//!
//! ## 核心意图（Why）
//! - 记录的事件时间以毫秒精度的 [`Instant`] 表示，最小值充当“负无穷”哨兵，
//!   用于 bundle 作用域内没有触发元素的发射；
//! - [`TimestampSkew`] 约束回调把输出时间戳向过去平移的幅度，`Unbounded` 表示不设限。
//!
//! ## 行为契约（What）
//! - `TimestampSkew::permits(input, candidate)` 当且仅当 `candidate >= input - skew` 时成立；
//! - 减法在 `i64` 边界上饱和，保证超大偏移不会回绕成未来时间。

use core::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, de};

/// 毫秒精度的事件时间点。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(i64);

impl Instant {
    /// 可表示的最小时间点，即“负无穷”哨兵。
    pub const MIN: Instant = Instant(i64::MIN);
    /// 可表示的最大时间点。
    pub const MAX: Instant = Instant(i64::MAX);
    /// 纪元零点。
    pub const EPOCH: Instant = Instant(0);

    pub const fn from_millis(millis: i64) -> Self {
        Instant(millis)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Instant(secs.saturating_mul(1_000))
    }

    pub const fn millis(self) -> i64 {
        self.0
    }

    /// 是否为负无穷哨兵。
    pub const fn is_min(self) -> bool {
        self.0 == i64::MIN
    }

    /// 向过去平移，越界时饱和到 [`Instant::MIN`]。
    pub fn saturating_sub(self, span: Duration) -> Instant {
        Instant(self.0.saturating_sub(duration_millis(span)))
    }

    /// 向未来平移，越界时饱和到 [`Instant::MAX`]。
    pub fn saturating_add(self, span: Duration) -> Instant {
        Instant(self.0.saturating_add(duration_millis(span)))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            i64::MIN => f.write_str("-inf"),
            i64::MAX => f.write_str("+inf"),
            millis => write!(f, "{millis}ms"),
        }
    }
}

fn duration_millis(span: Duration) -> i64 {
    i64::try_from(span.as_millis()).unwrap_or(i64::MAX)
}

/// 输出时间戳允许向过去平移的上限。
///
/// # 教案式说明
/// - **意图 (Why)**：偏移由回调定义持有，执行期间只读；默认零偏移表示输出时间戳只能不早于输入；
/// - **契约 (What)**：`Bounded(d)` 允许最多回退 `d`；`Unbounded` 允许任意回退；
/// - **配置 (How)**：反序列化接受毫秒整数或字符串 `"unbounded"`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimestampSkew {
    Bounded(Duration),
    Unbounded,
}

impl TimestampSkew {
    /// 零偏移。
    pub const ZERO: TimestampSkew = TimestampSkew::Bounded(Duration::ZERO);

    pub const fn bounded(span: Duration) -> Self {
        TimestampSkew::Bounded(span)
    }

    /// 判断 `candidate` 相对 `input` 是否在允许的偏移之内。
    pub fn permits(self, input: Instant, candidate: Instant) -> bool {
        match self {
            TimestampSkew::Unbounded => true,
            TimestampSkew::Bounded(span) => candidate >= input.saturating_sub(span),
        }
    }

    /// 允许的最早时间戳；不设限时返回 `None`。
    pub fn earliest_permitted(self, input: Instant) -> Option<Instant> {
        match self {
            TimestampSkew::Unbounded => None,
            TimestampSkew::Bounded(span) => Some(input.saturating_sub(span)),
        }
    }
}

impl Default for TimestampSkew {
    fn default() -> Self {
        TimestampSkew::ZERO
    }
}

impl fmt::Display for TimestampSkew {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampSkew::Bounded(span) => write!(f, "{}ms", span.as_millis()),
            TimestampSkew::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for TimestampSkew {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Keyword(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(TimestampSkew::Bounded(Duration::from_millis(millis))),
            Raw::Keyword(word) if word.eq_ignore_ascii_case("unbounded") => {
                Ok(TimestampSkew::Unbounded)
            }
            Raw::Keyword(word) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&word),
                &"a number of milliseconds or \"unbounded\"",
            )),
        }
    }
}
