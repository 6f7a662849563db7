//! # WindowAssignment：发射记录的窗口与时间戳
//!
//! ## 核心意图（Why）
//! - 同一个发射调用在不同阶段遵循不同的缺省规则：逐元素处理时继承触发记录的窗口，
//!   bundle 作用域内则调用窗口函数重新分配；
//! - 把这些规则集中在一个值类型里，路由器只负责校验标签与交付。
//!
//! ## 行为契约（What）
//! - 元素作用域：窗口原样继承；时间戳缺省取输入时间戳，显式时间戳须满足偏移约束，否则返回
//!   [`FlowError::SkewViolation`]；
//! - bundle 作用域：窗口函数看不到元素；未显式给出时间戳时连时间戳也不可读，结果时间戳为
//!   [`Instant::MIN`]；显式时间戳不做偏移校验。

use crate::{
    error::{FlowError, Result},
    time::{Instant, TimestampSkew},
    window::{BundleAssignContext, WindowFn, WindowSet},
};

/// 发射发生时的作用域。
pub enum EmissionScope<'a, I> {
    /// 逐元素处理中，存在触发记录。
    Element {
        timestamp: Instant,
        windows: &'a WindowSet,
        skew: TimestampSkew,
    },
    /// StartBundle / FinishBundle 中，没有触发记录。
    Bundle { window_fn: &'a dyn WindowFn<I> },
}

/// 一次发射最终采用的时间戳与窗口集合。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowAssignment {
    timestamp: Instant,
    windows: WindowSet,
}

impl WindowAssignment {
    pub fn new(timestamp: Instant, windows: WindowSet) -> Self {
        Self { timestamp, windows }
    }

    /// 按作用域规则计算窗口与时间戳。
    ///
    /// # 执行逻辑（How）
    /// 1. 元素作用域：校验显式时间戳是否落在 `[input - skew, +inf)`，随后克隆输入窗口；
    /// 2. bundle 作用域：以 [`BundleAssignContext`] 调用窗口函数，窗口函数读取元素数据时
    ///    其 `ContextMisuse` 错误原样返回；时间戳取显式值或负无穷。
    pub fn resolve<I>(scope: &EmissionScope<'_, I>, explicit: Option<Instant>) -> Result<Self> {
        match scope {
            EmissionScope::Element {
                timestamp,
                windows,
                skew,
            } => {
                let resolved = match explicit {
                    None => *timestamp,
                    Some(candidate) if skew.permits(*timestamp, candidate) => candidate,
                    Some(candidate) => {
                        return Err(FlowError::SkewViolation {
                            timestamp: candidate,
                            input_timestamp: *timestamp,
                            skew: *skew,
                        });
                    }
                };
                Ok(Self::new(resolved, (*windows).clone()))
            }
            EmissionScope::Bundle { window_fn } => {
                let ctx = BundleAssignContext::new(explicit);
                let windows = window_fn.assign_windows(&ctx)?;
                Ok(Self::new(explicit.unwrap_or(Instant::MIN), windows))
            }
        }
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn windows(&self) -> &WindowSet {
        &self.windows
    }

    pub fn into_parts(self) -> (Instant, WindowSet) {
        (self.timestamp, self.windows)
    }
}
