//! bundle 生命周期的顺序约束与失败语义。
//!
//! - **Why**：调度器只通过 `start → process_element* → finish` 驱动回调，任何顺序错误都必须立即暴露；
//! - **What**：非法顺序返回 `LifecycleViolation`；回调失败使 bundle 进入 `Failed`，
//!   实例与聚合器在新 bundle 中继续可用。

use std::fmt;

use spark_flow::{
    prelude::*,
    test_stubs::{CollectingSink, FailingSink},
};

/// 记录每个阶段被调用的顺序。
#[derive(Default)]
struct Journal {
    calls: Vec<String>,
    fail_on: Option<&'static str>,
}

#[derive(Debug)]
struct Boom;

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("boom")
    }
}

impl std::error::Error for Boom {}

impl ElementFn<&'static str, String> for Journal {
    fn start_bundle(&mut self, _ctx: &mut BundleContext<'_, &'static str, String>) -> Result<()> {
        self.calls.push("start".to_owned());
        Ok(())
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, &'static str, String>,
    ) -> Result<()> {
        let element = *ctx.element();
        self.calls.push(format!("process:{element}"));
        if self.fail_on == Some(element) {
            return Err(FlowError::callback(Boom));
        }
        ctx.output(element.to_uppercase())
    }

    fn finish_bundle(&mut self, _ctx: &mut BundleContext<'_, &'static str, String>) -> Result<()> {
        self.calls.push("finish".to_owned());
        Ok(())
    }
}

fn instance(
    journal: Journal,
) -> (
    ElementFnInstance<&'static str, String, Journal>,
    CollectingSink<String>,
) {
    let main = CollectingSink::new();
    let binding = TransformBinding::builder(main.clone())
        .build()
        .expect("缺省绑定");
    let instance =
        ElementFnInstance::new(journal, binding, ExecutionSettings::default()).expect("实例");
    (instance, main)
}

#[test]
fn phases_run_in_order_and_report_summary() {
    let (mut instance, main) = instance(Journal::default());
    let mut bundle = instance.bundle();
    assert_eq!(bundle.phase(), BundlePhase::NotStarted);

    bundle.start().expect("start");
    assert_eq!(bundle.phase(), BundlePhase::InBundle);
    bundle
        .process_element(Record::in_global_window("a", Instant::from_secs(1)))
        .expect("a");
    bundle
        .process_element(Record::in_global_window("b", Instant::from_secs(2)))
        .expect("b");
    let summary = bundle.finish().expect("finish");
    assert_eq!(bundle.phase(), BundlePhase::Finished);

    assert_eq!(summary.bundle, 1);
    assert_eq!(summary.elements, 2);
    assert_eq!(summary.invocations, 2);
    assert_eq!(summary.main_outputs, 2);
    assert_eq!(summary.side_outputs, 0);
    assert_eq!(main.values(), vec!["A".to_owned(), "B".to_owned()]);
    assert_eq!(
        instance.callback().calls,
        vec!["start", "process:a", "process:b", "finish"]
    );
}

#[test]
fn out_of_order_calls_are_rejected() {
    let (mut instance, _) = instance(Journal::default());
    let mut bundle = instance.bundle();

    let err = bundle
        .process_element(Record::in_global_window("early", Instant::EPOCH))
        .expect_err("start 之前不能处理元素");
    assert!(matches!(
        err,
        FlowError::LifecycleViolation {
            operation: "process_element",
            phase: "NotStarted"
        }
    ));
    assert!(matches!(
        bundle.finish(),
        Err(FlowError::LifecycleViolation { operation: "finish", .. })
    ));

    bundle.start().expect("start");
    assert!(
        matches!(bundle.start(), Err(FlowError::LifecycleViolation { .. })),
        "同一 bundle 不能 start 两次"
    );
    bundle.finish().expect("finish");
    assert!(matches!(
        bundle.process_element(Record::in_global_window("late", Instant::EPOCH)),
        Err(FlowError::LifecycleViolation { phase: "Finished", .. })
    ));
    assert!(matches!(
        bundle.finish(),
        Err(FlowError::LifecycleViolation { .. })
    ));
    assert_eq!(instance.callback().calls, vec!["start", "finish"]);
}

#[test]
fn callback_failure_fails_the_bundle_but_not_the_instance() {
    let journal = Journal {
        fail_on: Some("bad"),
        ..Journal::default()
    };
    let (mut instance, main) = instance(journal);

    {
        let mut bundle = instance.bundle();
        bundle.start().expect("start");
        bundle
            .process_element(Record::in_global_window("ok", Instant::EPOCH))
            .expect("ok");
        let err = bundle
            .process_element(Record::in_global_window("bad", Instant::EPOCH))
            .expect_err("回调失败");
        assert!(matches!(err, FlowError::Callback { .. }));
        assert_eq!(err.category(), ErrorCategory::Callback);
        assert_eq!(bundle.phase(), BundlePhase::Failed);
        assert!(matches!(
            bundle.finish(),
            Err(FlowError::LifecycleViolation { phase: "Failed", .. })
        ));
    }
    assert_eq!(main.values(), vec!["OK".to_owned()], "已交付的输出不会被撤回");

    let mut next = instance.bundle();
    assert_eq!(next.bundle_id(), 2);
    next.start().expect("新 bundle 可以继续");
    next.process_element(Record::in_global_window("again", Instant::EPOCH))
        .expect("again");
    next.finish().expect("finish");
}

#[test]
fn sink_failure_propagates_unmasked() {
    let binding = TransformBinding::<&'static str, String>::builder(FailingSink::new("disk full"))
        .build()
        .expect("绑定");
    let mut instance = ElementFnInstance::new(Journal::default(), binding, ExecutionSettings::default())
        .expect("实例");
    let mut bundle = instance.bundle();
    bundle.start().expect("start");
    let err = bundle
        .process_element(Record::in_global_window("x", Instant::EPOCH))
        .expect_err("sink 失败");
    match err {
        FlowError::Collaborator {
            collaborator,
            source,
        } => {
            assert_eq!(collaborator, "sink");
            assert_eq!(source.to_string(), "disk full");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bundle.phase(), BundlePhase::Failed);
}

#[test]
fn interruption_fails_the_next_invocation() {
    let interrupt = InterruptSignal::new();
    let main = CollectingSink::<String>::new();
    let binding = TransformBinding::builder(main.clone())
        .with_interrupt(interrupt.clone())
        .build()
        .expect("绑定");
    let mut instance = ElementFnInstance::new(Journal::default(), binding, ExecutionSettings::default())
        .expect("实例");
    let mut bundle = instance.bundle();
    bundle.start().expect("start");
    bundle
        .process_element(Record::in_global_window("first", Instant::EPOCH))
        .expect("first");

    interrupt.interrupt("worker shutting down");
    let err = bundle
        .process_element(Record::in_global_window("second", Instant::EPOCH))
        .expect_err("中断");
    assert_eq!(err.category(), ErrorCategory::Interrupted);
    assert_eq!(bundle.phase(), BundlePhase::Failed);
    assert_eq!(main.len(), 1);
}

/// 分块处理长元素，每块之间主动检查中断。
struct Chunked {
    scheduler: InterruptSignal,
    interrupt_after: usize,
    chunks_done: usize,
}

impl ElementFn<usize, usize> for Chunked {
    fn process_element(&mut self, ctx: &mut ProcessContext<'_, usize, usize>) -> Result<()> {
        for chunk in 0..*ctx.element() {
            if chunk == self.interrupt_after {
                self.scheduler.interrupt("deadline exceeded");
            }
            ctx.check_interrupted()?;
            self.chunks_done += 1;
        }
        ctx.output(self.chunks_done)
    }
}

#[test]
fn long_running_callbacks_observe_interruption() {
    let interrupt = InterruptSignal::new();
    let main = CollectingSink::<usize>::new();
    let binding = TransformBinding::builder(main.clone())
        .with_interrupt(interrupt.clone())
        .build()
        .expect("绑定");
    let chunked = Chunked {
        scheduler: interrupt,
        interrupt_after: 3,
        chunks_done: 0,
    };
    let mut instance =
        ElementFnInstance::new(chunked, binding, ExecutionSettings::default()).expect("实例");
    let mut bundle = instance.bundle();
    bundle.start().expect("start");
    let err = bundle
        .process_element(Record::in_global_window(10, Instant::EPOCH))
        .expect_err("处理中途被中断");
    assert!(matches!(err, FlowError::Interrupted { ref reason } if reason == "deadline exceeded"));
    assert_eq!(bundle.phase(), BundlePhase::Failed);
    assert!(main.is_empty());
    assert_eq!(instance.callback().chunks_done, 3, "中断之后不再处理后续分块");
}
