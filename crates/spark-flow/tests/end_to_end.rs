//! 端到端场景：从 TOML 配置构造实例，驱动一个完整 bundle，
//! 同时覆盖时间戳偏移、窗口继承、旁路输出、管道选项与聚合器。

use spark_flow::{
    prelude::*,
    test_stubs::CollectingSink,
    window::IntervalWindow,
};

/// 为每个元素向审计通道记一笔，再发射派生记录：一条在允许偏移之内，一条可选地越界。
struct Annotator {
    audit: OutputTag<String>,
    emit_too_late: bool,
    emitted: Option<Aggregator<u64, u64>>,
}

impl ElementFn<&'static str, String> for Annotator {
    fn setup(&mut self, aggregators: &mut AggregatorRegistry) -> Result<()> {
        self.emitted = Some(aggregators.create_aggregator("emitted", Sum)?);
        Ok(())
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, &'static str, String>,
    ) -> Result<()> {
        let base = *ctx.element();
        let suffix = ctx.pipeline_options().get("suffix").unwrap_or("out").to_owned();
        let input = ctx.timestamp();

        ctx.side_output(&self.audit, format!("seen {base}"))?;
        ctx.output_with_timestamp(
            format!("{base}-{suffix}"),
            Instant::from_millis(input.millis() - 1_000),
        )?;
        if let Some(emitted) = &self.emitted {
            emitted.add_value(1);
        }

        if self.emit_too_late {
            ctx.output_with_timestamp(
                format!("{base}-late"),
                Instant::from_millis(input.millis() - 3_000),
            )?;
            if let Some(emitted) = &self.emitted {
                emitted.add_value(1);
            }
        }
        Ok(())
    }
}

const SETTINGS: &str = r#"
timestamp_skew = 2000
max_side_output_tags = 8
"#;

const OPTIONS: &str = r#"
job_name = "annotate"

[options]
suffix = "out"
"#;

fn w1() -> Window {
    Window::Interval(
        IntervalWindow::new(Instant::from_secs(60), Instant::from_secs(120)).expect("区间"),
    )
}

fn build(
    emit_too_late: bool,
) -> (
    ElementFnInstance<&'static str, String, Annotator>,
    CollectingSink<String>,
    CollectingSink<String>,
) {
    let audit = OutputTag::<String>::new("audit");
    let main = CollectingSink::new();
    let side = CollectingSink::new();
    let binding = TransformBinding::builder(main.clone())
        .with_side_output(&audit, side.clone())
        .with_pipeline_options(PipelineOptions::from_toml_str(OPTIONS).expect("管道选项"))
        .build()
        .expect("绑定");
    let settings = ExecutionSettings::from_toml_str(SETTINGS).expect("执行配置");
    let instance = ElementFnInstance::new(
        Annotator {
            audit,
            emit_too_late,
            emitted: None,
        },
        binding,
        settings,
    )
    .expect("实例");
    (instance, main, side)
}

#[test]
fn permitted_emission_inherits_the_input_window() {
    let (mut instance, main, side) = build(false);
    let mut bundle = instance.bundle();
    bundle.start().expect("start");
    bundle
        .process_element(Record::in_window("a", Instant::from_secs(100), w1()))
        .expect("element");
    let summary = bundle.finish().expect("finish");
    assert_eq!(summary.main_outputs, 1);
    assert_eq!(summary.side_outputs, 1);

    let outputs = main.records();
    assert_eq!(outputs.len(), 1);
    assert_eq!(
        outputs[0],
        Record::in_window("a-out".to_owned(), Instant::from_secs(99), w1())
    );
    let audit = side.records();
    assert_eq!(audit.len(), 1);
    assert_eq!(
        audit[0],
        Record::in_window("seen a".to_owned(), Instant::from_secs(100), w1()),
        "缺省时间戳取输入时间戳"
    );
    assert_eq!(
        instance
            .aggregators()
            .get::<u64, u64>("emitted")
            .expect("聚合器")
            .value(),
        1
    );
}

#[test]
fn emission_beyond_the_skew_fails_and_forwards_nothing() {
    let (mut instance, main, side) = build(true);
    let mut bundle = instance.bundle();
    bundle.start().expect("start");
    let err = bundle
        .process_element(Record::in_window("a", Instant::from_secs(100), w1()))
        .expect_err("97s 早于 100s - 2s");

    match err {
        FlowError::SkewViolation {
            timestamp,
            input_timestamp,
            skew,
        } => {
            assert_eq!(timestamp, Instant::from_secs(97));
            assert_eq!(input_timestamp, Instant::from_secs(100));
            assert_eq!(skew, TimestampSkew::bounded(std::time::Duration::from_secs(2)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bundle.phase(), BundlePhase::Failed);
    assert_eq!(
        main.values(),
        vec!["a-out".to_owned()],
        "越界前的合法输出已交付，a-late 不会被转发"
    );
    assert_eq!(side.values(), vec!["seen a".to_owned()]);
    assert_eq!(
        instance
            .aggregators()
            .get::<u64, u64>("emitted")
            .expect("聚合器")
            .value(),
        1
    );
}
