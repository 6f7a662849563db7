//! 多窗口记录：窗口继承、逐窗口调用、窗口歧义与按窗口读取旁路输入。

use std::time::Duration;

use spark_flow::{
    prelude::*,
    test_stubs::{FnTester, StaticSideInputReader},
    window::{IntervalWindow, SlidingWindows},
};

fn interval(start_secs: i64, end_secs: i64) -> Window {
    Window::Interval(
        IntervalWindow::new(Instant::from_secs(start_secs), Instant::from_secs(end_secs))
            .expect("合法区间"),
    )
}

fn two_windows() -> WindowSet {
    WindowSet::try_from_windows([interval(0, 10), interval(5, 15)]).expect("非空窗口集合")
}

/// 输出当前窗口的起点。
struct WindowProbe {
    granularity: InvocationGranularity,
}

impl ElementFn<&'static str, String> for WindowProbe {
    fn descriptor(&self) -> CallbackDescriptor {
        CallbackDescriptor::new()
            .with_process_element(PhaseSignature::plain().with_window())
            .with_invocation(self.granularity)
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, &'static str, String>,
    ) -> Result<()> {
        let window = ctx.window()?;
        let label = match window {
            Window::Global => "global".to_owned(),
            Window::Interval(interval) => format!("{}@{}", ctx.element(), interval.start()),
        };
        ctx.output(label)
    }
}

#[test]
fn per_window_invocation_sees_one_window_at_a_time() {
    let mut tester = FnTester::builder(WindowProbe {
        granularity: InvocationGranularity::PerWindow,
    })
    .build()
    .expect("绑定");

    let summary = tester
        .process_bundle([Record::new("k", Instant::from_secs(7), two_windows())])
        .expect("bundle");
    assert_eq!(summary.elements, 1);
    assert_eq!(summary.invocations, 2);

    let outputs = tester.main_output();
    assert_eq!(outputs.len(), 2);
    assert_eq!(*outputs[0].value(), "k@0ms");
    assert_eq!(outputs[0].windows(), &WindowSet::single(interval(0, 10)));
    assert_eq!(*outputs[1].value(), "k@5000ms");
    assert_eq!(outputs[1].windows(), &WindowSet::single(interval(5, 15)));
    assert!(
        outputs
            .iter()
            .all(|record| record.timestamp() == Instant::from_secs(7)),
        "时间戳原样继承"
    );
}

#[test]
fn window_is_ambiguous_without_per_window_invocation() {
    let mut tester = FnTester::builder(WindowProbe {
        granularity: InvocationGranularity::PerRecord,
    })
    .build()
    .expect("绑定");

    let err = tester
        .process_bundle([Record::new("k", Instant::from_secs(7), two_windows())])
        .expect_err("多窗口");
    assert!(matches!(err, FlowError::AmbiguousWindow { count: 2 }));
    assert!(tester.main_output().is_empty());
}

#[test]
fn single_window_records_need_no_explosion() {
    let mut tester = FnTester::builder(WindowProbe {
        granularity: InvocationGranularity::PerRecord,
    })
    .build()
    .expect("绑定");
    tester
        .process_bundle([Record::in_global_window("g", Instant::EPOCH)])
        .expect("bundle");
    assert_eq!(tester.main_values(), vec!["global".to_owned()]);
}

/// 未声明窗口能力却访问窗口。
struct Sneaky;

impl ElementFn<u8, u8> for Sneaky {
    fn process_element(&mut self, ctx: &mut ProcessContext<'_, u8, u8>) -> Result<()> {
        ctx.window().map(|_| ())
    }
}

#[test]
fn undeclared_window_access_is_rejected() {
    let mut tester = FnTester::builder(Sneaky).build().expect("绑定");
    let err = tester
        .process_bundle([Record::in_global_window(1, Instant::EPOCH)])
        .expect_err("未声明");
    assert!(matches!(
        err,
        FlowError::UndeclaredCapability {
            capability: "window",
            phase: "process_element"
        }
    ));
}

/// 读取旁路输入中的阈值并过滤元素。
struct Threshold {
    view: SideInputView<u32>,
    granularity: InvocationGranularity,
}

impl ElementFn<u32, u32> for Threshold {
    fn descriptor(&self) -> CallbackDescriptor {
        CallbackDescriptor::new().with_invocation(self.granularity)
    }

    fn process_element(&mut self, ctx: &mut ProcessContext<'_, u32, u32>) -> Result<()> {
        let threshold = ctx.side_input(&self.view)?;
        if *ctx.element() >= threshold {
            ctx.output(*ctx.element())?;
        }
        Ok(())
    }
}

#[test]
fn side_inputs_resolve_against_the_current_window() {
    let view = SideInputView::<u32>::new("threshold");
    let reader = StaticSideInputReader::new()
        .with_window_value(&view, interval(0, 10), 5)
        .with_window_value(&view, interval(5, 15), 50);
    let main = spark_flow::test_stubs::CollectingSink::<u32>::new();
    let binding = TransformBinding::builder(main.clone())
        .with_side_input(&view)
        .with_side_input_reader(reader.clone())
        .build()
        .expect("绑定");
    let mut instance = ElementFnInstance::new(
        Threshold {
            view: view.clone(),
            granularity: InvocationGranularity::PerWindow,
        },
        binding,
        ExecutionSettings::default(),
    )
    .expect("实例");

    let mut bundle = instance.bundle();
    bundle.start().expect("start");
    bundle
        .process_element(Record::new(20, Instant::from_secs(7), two_windows()))
        .expect("element");
    bundle.finish().expect("finish");

    let outputs = main.records();
    assert_eq!(outputs.len(), 1, "只有阈值为 5 的窗口放行");
    assert_eq!(outputs[0].windows(), &WindowSet::single(interval(0, 10)));
    assert_eq!(reader.reads(), 2);
}

#[test]
fn side_input_access_needs_a_single_window() {
    let view = SideInputView::<u32>::new("threshold");
    let mut tester = FnTester::builder(Threshold {
        view: view.clone(),
        granularity: InvocationGranularity::PerRecord,
    })
    .with_side_input(&view, 1)
    .build()
    .expect("绑定");

    let err = tester
        .process_bundle([Record::new(3, Instant::from_secs(7), two_windows())])
        .expect_err("多窗口");
    assert!(matches!(err, FlowError::AmbiguousWindow { count: 2 }));
}

#[test]
fn undeclared_or_mistyped_side_inputs_are_rejected() {
    let declared = SideInputView::<u32>::new("threshold");
    let mut tester = FnTester::builder(Threshold {
        view: SideInputView::new("missing"),
        granularity: InvocationGranularity::PerRecord,
    })
    .with_side_input(&declared, 1)
    .build()
    .expect("绑定");
    let err = tester
        .process_bundle([Record::in_global_window(3, Instant::EPOCH)])
        .expect_err("未声明视图");
    assert!(matches!(err, FlowError::NotASideInput { ref view } if view == "missing"));

    let mistyped = SideInputView::<String>::new("threshold");
    let mut tester = FnTester::builder(Threshold {
        view: declared.clone(),
        granularity: InvocationGranularity::PerRecord,
    })
    .with_side_input(&mistyped, "ten".to_owned())
    .build()
    .expect("绑定");
    let err = tester
        .process_bundle([Record::in_global_window(3, Instant::EPOCH)])
        .expect_err("类型不符");
    assert!(matches!(err, FlowError::SideInputTypeMismatch { .. }));
}

#[test]
fn sliding_windows_assign_every_overlapping_window() {
    use spark_flow::window::{ElementAssignContext, WindowFn};

    let sliding = SlidingWindows::of(Duration::from_secs(10), Duration::from_secs(5)).expect("窗口");
    let input = WindowSet::global();
    let ctx = ElementAssignContext::new(&(), Instant::from_secs(7), &input);
    let windows = WindowFn::<()>::assign_windows(&sliding, &ctx).expect("分配");
    assert_eq!(windows, two_windows());
}
