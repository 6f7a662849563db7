//! # OutputRouter：发射记录的校验与交付
//!
//! ## 核心意图（Why）
//! - 回调的每次发射都经过同一条路径：校验标签、计算窗口与时间戳、同步交付到通道 sink；
//! - 把路由状态（已声明标签、已使用标签、计数器）集中在实例内，两种上下文只借用它。
//!
//! ## 执行逻辑（How）
//! 1. 旁路发射先查标签是否声明（[`FlowError::UnknownTag`]），再检查已使用标签数是否超出上限
//!    （[`FlowError::TooManyOutputs`]）；
//! 2. 调用 [`WindowAssignment::resolve`] 得到时间戳与窗口，偏移违规时不交付任何记录；
//! 3. 标记标签已使用、计数并同步调用 sink，sink 的错误原样返回。
//!
//! ## 风险提示（Trade-offs）
//! - 路由器只在单个实例内按顺序使用，内部状态用 `Cell`/`RefCell` 而非锁；
//!   因此 [`OutputRouter`] 不是 `Sync`，上下文也不能跨线程共享。

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use crate::{
    assignment::{EmissionScope, WindowAssignment},
    error::{FlowError, Result},
    output::{ChannelId, ErasedSink, OutputSink, OutputTag, TaggedOutput},
    record::Record,
    time::Instant,
};

/// 一个 bundle 内的发射计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct EmissionCounts {
    pub(crate) main: u64,
    pub(crate) side: u64,
}

pub(crate) struct OutputRouter<O> {
    main: Arc<dyn OutputSink<O>>,
    tagged: HashMap<Arc<str>, Arc<dyn ErasedSink>>,
    used: RefCell<BTreeSet<Arc<str>>>,
    limit: usize,
    main_count: Cell<u64>,
    side_count: Cell<u64>,
}

impl<O: 'static> OutputRouter<O> {
    /// 声明数量不受上限约束，上限只作用于实际使用过的标签。
    pub(crate) fn new(
        main: Arc<dyn OutputSink<O>>,
        side_outputs: Vec<TaggedOutput>,
        limit: usize,
    ) -> Self {
        let tagged = side_outputs
            .into_iter()
            .map(|output| (output.id, output.sink))
            .collect();
        Self {
            main,
            tagged,
            used: RefCell::new(BTreeSet::new()),
            limit,
            main_count: Cell::new(0),
            side_count: Cell::new(0),
        }
    }

    pub(crate) fn emit_main<I>(
        &self,
        scope: &EmissionScope<'_, I>,
        value: O,
        explicit: Option<Instant>,
    ) -> Result<()> {
        let (timestamp, windows) = WindowAssignment::resolve(scope, explicit)?.into_parts();
        tracing::trace!(
            target: "spark_flow::router",
            channel = %ChannelId::Main,
            timestamp = %timestamp,
            windows = windows.len(),
            "emit"
        );
        self.main_count.set(self.main_count.get() + 1);
        self.main.accept(Record::new(value, timestamp, windows))
    }

    pub(crate) fn emit_tagged<I, T>(
        &self,
        scope: &EmissionScope<'_, I>,
        tag: &OutputTag<T>,
        value: T,
        explicit: Option<Instant>,
    ) -> Result<()>
    where
        T: Send + 'static,
    {
        let (id, sink) = self
            .tagged
            .get_key_value(tag.id())
            .ok_or_else(|| FlowError::UnknownTag {
                tag: tag.id().to_owned(),
            })?;
        self.admit(id)?;

        let (timestamp, windows) = WindowAssignment::resolve(scope, explicit)?.into_parts();
        self.used.borrow_mut().insert(Arc::clone(id));
        tracing::trace!(
            target: "spark_flow::router",
            channel = %tag.channel(),
            timestamp = %timestamp,
            windows = windows.len(),
            "emit"
        );
        self.side_count.set(self.side_count.get() + 1);
        let boxed: Box<dyn Any + Send> = Box::new(value);
        sink.accept_erased(id, Record::new(boxed, timestamp, windows))
    }

    /// 首次使用某标签时检查已使用标签数是否仍在上限内。
    fn admit(&self, id: &Arc<str>) -> Result<()> {
        let used = self.used.borrow();
        if used.contains(id) || used.len() < self.limit {
            return Ok(());
        }
        Err(FlowError::TooManyOutputs {
            limit: self.limit,
            requested: used.len() + 1,
        })
    }

    pub(crate) fn declared_tags(&self) -> usize {
        self.tagged.len()
    }

    pub(crate) fn used_tags(&self) -> usize {
        self.used.borrow().len()
    }

    /// 取出并清零本 bundle 的计数。
    pub(crate) fn take_counts(&self) -> EmissionCounts {
        EmissionCounts {
            main: self.main_count.replace(0),
            side: self.side_count.replace(0),
        }
    }
}

impl<O> fmt::Debug for OutputRouter<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.tagged.keys().collect();
        tags.sort();
        f.debug_struct("OutputRouter")
            .field("tags", &tags)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        test_stubs::CollectingSink,
        time::TimestampSkew,
        window::{GlobalWindows, WindowSet},
    };

    fn router_with_tags(tags: &[&str], limit: usize) -> (OutputRouter<u32>, CollectingSink<u32>) {
        let main = CollectingSink::new();
        let outputs = tags
            .iter()
            .map(|id| {
                TaggedOutput::new(
                    &OutputTag::<u32>::new(*id),
                    Arc::new(CollectingSink::<u32>::new()) as Arc<dyn OutputSink<u32>>,
                )
            })
            .collect();
        let router = OutputRouter::new(Arc::new(main.clone()), outputs, limit);
        (router, main)
    }

    #[test]
    fn distinct_tags_beyond_limit_fail_at_emission() {
        let (router, _) = router_with_tags(&["a", "b", "c"], 2);
        let windows = WindowSet::global();
        let scope: EmissionScope<'_, ()> = EmissionScope::Element {
            timestamp: Instant::EPOCH,
            windows: &windows,
            skew: TimestampSkew::ZERO,
        };
        router
            .emit_tagged(&scope, &OutputTag::new("a"), 1u32, None)
            .expect("a 在上限内");
        router
            .emit_tagged(&scope, &OutputTag::new("a"), 2u32, None)
            .expect("重复使用不增加已用标签数");
        router
            .emit_tagged(&scope, &OutputTag::new("b"), 3u32, None)
            .expect("b 在上限内");
        let err = router
            .emit_tagged(&scope, &OutputTag::new("c"), 4u32, None)
            .expect_err("第三个标签超出上限");
        assert!(matches!(
            err,
            FlowError::TooManyOutputs {
                limit: 2,
                requested: 3
            }
        ));
        router
            .emit_tagged(&scope, &OutputTag::new("b"), 5u32, None)
            .expect("已用标签不受影响");
        assert_eq!(router.used_tags(), 2);
        assert_eq!(router.take_counts(), EmissionCounts { main: 0, side: 4 });
    }

    #[test]
    fn undeclared_tag_is_rejected_before_limit() {
        let (router, _) = router_with_tags(&["a"], 1);
        let windows = WindowSet::global();
        let scope: EmissionScope<'_, ()> = EmissionScope::Element {
            timestamp: Instant::EPOCH,
            windows: &windows,
            skew: TimestampSkew::ZERO,
        };
        let err = router
            .emit_tagged(&scope, &OutputTag::new("zzz"), 1u32, None)
            .expect_err("未声明标签");
        assert!(matches!(err, FlowError::UnknownTag { ref tag } if tag == "zzz"));
        assert_eq!(router.declared_tags(), 1);
    }

    #[test]
    fn skew_violation_forwards_nothing() {
        let (router, main) = router_with_tags(&[], 1);
        let windows = WindowSet::global();
        let scope: EmissionScope<'_, ()> = EmissionScope::Element {
            timestamp: Instant::from_secs(10),
            windows: &windows,
            skew: TimestampSkew::bounded(Duration::from_secs(1)),
        };
        let err = router
            .emit_main(&scope, 7, Some(Instant::from_secs(8)))
            .expect_err("超出偏移");
        assert_eq!(err.code(), crate::error::codes::SKEW_VIOLATION);
        assert!(main.is_empty());

        let bundle: EmissionScope<'_, ()> = EmissionScope::Bundle {
            window_fn: &GlobalWindows,
        };
        router.emit_main(&bundle, 8, None).expect("bundle 作用域");
        assert_eq!(main.records()[0].timestamp(), Instant::MIN);
    }
}
