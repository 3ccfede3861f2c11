use std::sync::Arc;

use spark_sitemap::{
    FixedClock, Parameters, PipelineSettings, ProcessOutcome, ProcessingPipeline, codes,
    test_stubs::RecordingEnvironment,
};

use crate::support::Fixture;

fn xml_pipeline(fixture: &Fixture, serializer: &str, mime_override: Option<&str>) -> ProcessingPipeline {
    let mut pipeline = ProcessingPipeline::new(&PipelineSettings::default());
    assemble(&mut pipeline, fixture, serializer, mime_override);
    pipeline
}

fn assemble(
    pipeline: &mut ProcessingPipeline,
    fixture: &Fixture,
    serializer: &str,
    mime_override: Option<&str>,
) {
    let (stack, gateway) = (&fixture.stack, &fixture.gateway);
    pipeline
        .set_generator(stack, gateway, "generator.static", None, Parameters::new())
        .expect("generator 应成功");
    pipeline
        .add_transformer(stack, gateway, "transformer.upper", None, Parameters::new())
        .expect("transformer 应成功");
    pipeline
        .set_serializer(stack, gateway, serializer, None, Parameters::new(), mime_override)
        .expect("serializer 应成功");
}

fn reader_pipeline(fixture: &Fixture, role: &str, mime_override: Option<&str>) -> ProcessingPipeline {
    let mut pipeline = ProcessingPipeline::new(&PipelineSettings::default());
    pipeline
        .set_reader(
            &fixture.stack,
            &fixture.gateway,
            role,
            None,
            Parameters::new(),
            mime_override,
        )
        .expect("reader 应成功");
    pipeline
}

/// 验证 generator → transformer → serializer 的推送链输出与响应元数据。
#[test]
fn xml_pipeline_streams_through_transformers() {
    let fixture = Fixture::new();
    let mut pipeline = xml_pipeline(&fixture, "serializer.text", None);

    let outcome = pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");

    assert_eq!(outcome, ProcessOutcome::Generated);
    assert_eq!(fixture.environment.body_text(), "<doc>HELLO</doc>");
    assert_eq!(fixture.environment.content_type().as_deref(), Some("text/html"));
    assert_eq!(fixture.environment.content_length(), None);
    assert_eq!(fixture.environment.output_hints(), vec![8192]);
    assert_eq!(pipeline.mime_type(), Some("text/html"));
    assert_eq!(
        pipeline.processor().map(|processor| processor.name().to_owned()),
        Some("root".to_owned())
    );
    assert!(pipeline.is_prepared());
}

/// 验证 sitemap 指定的 MIME 类型优先于 serializer 自身的类型，两者皆无时报错。
#[test]
fn serializer_mime_type_resolution() {
    let fixture = Fixture::new();
    let mut pipeline = xml_pipeline(&fixture, "serializer.text", Some("application/xhtml+xml"));
    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");
    assert_eq!(
        fixture.environment.content_type().as_deref(),
        Some("application/xhtml+xml")
    );

    let fixture = Fixture::new();
    let mut pipeline = xml_pipeline(&fixture, "serializer.bare", None);
    let err = pipeline
        .process(&fixture.stack, fixture.environment())
        .expect_err("无法确定 MIME 类型时必须失败");
    assert_eq!(err.code(), codes::PIPELINE_MIME_UNKNOWN);
    assert!(fixture.environment.body().is_empty(), "失败前不得写出响应体");
}

/// 验证需要 Content-Length 的 serializer 先完整缓冲再写出。
#[test]
fn content_length_is_set_from_buffered_output() {
    let fixture = Fixture::new();
    let mut pipeline = xml_pipeline(&fixture, "serializer.sized", None);

    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");

    let body = fixture.environment.body();
    assert_eq!(body, b"<doc>HELLO</doc>");
    assert_eq!(fixture.environment.content_length(), Some(body.len() as u64));
    assert_eq!(fixture.environment.output_hints(), vec![0]);
}

/// 验证 `outputBufferSize` 参数覆盖配置值，非法值回退到配置值。
#[test]
fn output_buffer_size_parameter() {
    let fixture = Fixture::new();
    let mut pipeline = ProcessingPipeline::new(&PipelineSettings::default());
    pipeline.setup(&Parameters::new().with("outputBufferSize", "0"));
    assemble(&mut pipeline, &fixture, "serializer.text", None);
    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");
    assert_eq!(fixture.environment.output_hints(), vec![0]);
    assert_eq!(fixture.environment.body_text(), "<doc>HELLO</doc>");

    let fixture = Fixture::new();
    let mut pipeline = ProcessingPipeline::new(&PipelineSettings::default());
    pipeline.setup(&Parameters::new().with("outputBufferSize", "lots"));
    assert_eq!(pipeline.output_buffer_size(), 8192);
    assemble(&mut pipeline, &fixture, "serializer.text", None);
    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");
    assert_eq!(fixture.environment.output_hints(), vec![8192]);
}

/// 验证 reader 的条件 GET：客户端副本不旧于资源时只标记未修改，不写出字节。
#[test]
fn reader_honours_conditional_get() {
    for (since, expected) in [
        (1_000, ProcessOutcome::NotModified),
        (2_000, ProcessOutcome::NotModified),
        (999, ProcessOutcome::Generated),
    ] {
        let fixture =
            Fixture::with_environment(RecordingEnvironment::new("/app/").with_if_modified_since(since));
        let mut pipeline = reader_pipeline(&fixture, "reader.static", None);

        let outcome = pipeline
            .process(&fixture.stack, fixture.environment())
            .expect("reader 应执行成功");

        assert_eq!(outcome, expected, "if-modified-since = {since}");
        assert_eq!(fixture.environment.content_type().as_deref(), Some("image/png"));
        match expected {
            ProcessOutcome::NotModified => {
                assert!(fixture.environment.is_not_modified());
                assert!(fixture.environment.body().is_empty());
                assert!(fixture.environment.output_hints().is_empty());
            }
            ProcessOutcome::Generated => {
                assert!(!fixture.environment.is_not_modified());
                assert_eq!(fixture.environment.body_text(), "payload");
            }
        }
    }
}

/// 验证 reader 的 MIME 覆盖；两者皆无时不设置 Content-Type 也不报错。
#[test]
fn reader_mime_type_is_optional() {
    let fixture = Fixture::new();
    let mut pipeline = reader_pipeline(&fixture, "reader.untyped", Some("image/webp"));
    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("reader 应执行成功");
    assert_eq!(fixture.environment.content_type().as_deref(), Some("image/webp"));

    let fixture = Fixture::new();
    let mut pipeline = reader_pipeline(&fixture, "reader.untyped", None);
    let outcome = pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("reader 应执行成功");
    assert_eq!(outcome, ProcessOutcome::Generated);
    assert_eq!(fixture.environment.content_type(), None);
    assert_eq!(pipeline.mime_type(), None);
    assert_eq!(fixture.environment.body_text(), "raw");
}

/// 验证 Expires：配置默认值、参数覆盖与非法参数三种情形。
#[test]
fn expires_headers_follow_policy() {
    let settings = PipelineSettings {
        expires: Some("access plus 1 hours".to_owned()),
        ..PipelineSettings::default()
    };
    let clock = Arc::new(FixedClock::new(1_000_000));

    let fixture = Fixture::new();
    let mut pipeline = ProcessingPipeline::with_clock(&settings, clock.clone());
    assemble(&mut pipeline, &fixture, "serializer.text", None);
    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");
    assert_eq!(fixture.environment.date_header("Expires"), Some(4_600_000));
    assert_eq!(
        fixture.environment.header("Cache-Control").as_deref(),
        Some("max-age=3600, public")
    );
    assert_eq!(fixture.environment().object_model().expires(), Some(4_600_000));

    pipeline.recycle();
    clock.advance(500);
    let fixture = Fixture::new();
    pipeline.setup(&Parameters::new().with("expires", "now plus 1 minutes"));
    assemble(&mut pipeline, &fixture, "serializer.text", None);
    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");
    assert_eq!(fixture.environment.date_header("Expires"), Some(1_060_500));
    assert_eq!(
        fixture.environment.header("Cache-Control").as_deref(),
        Some("max-age=60, public")
    );

    pipeline.recycle();
    assert_eq!(
        pipeline.expires().map(|policy| policy.millis()),
        Some(3_600_000),
        "回收后恢复配置的默认策略"
    );
    let fixture = Fixture::new();
    pipeline.setup(&Parameters::new().with("expires", "tomorrow"));
    assemble(&mut pipeline, &fixture, "serializer.text", None);
    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("非法 Expires 只会跳过响应头");
    assert_eq!(fixture.environment.date_header("Expires"), None);
    assert_eq!(fixture.environment.header("Cache-Control"), None);
    assert_eq!(fixture.environment().object_model().expires(), None);
}

/// 验证 serializer 在准备阶段绑定 sitemap 语句给出的 source 与参数。
#[test]
fn serializer_binds_source_and_parameters() {
    let fixture = Fixture::new();
    let (stack, gateway) = (&fixture.stack, &fixture.gateway);
    let mut pipeline = ProcessingPipeline::new(&PipelineSettings::default());
    pipeline
        .set_generator(stack, gateway, "generator.static", None, Parameters::new())
        .expect("generator 应成功");
    pipeline
        .set_serializer(
            stack,
            gateway,
            "serializer.shared",
            Some("layout.txt"),
            Parameters::new().with("prolog", "<!-- text -->"),
            None,
        )
        .expect("serializer 应成功");
    assert_eq!(fixture.shared_serializer.bound_source(), None, "装配阶段不绑定");

    pipeline
        .process(&fixture.stack, fixture.environment())
        .expect("管道应执行成功");

    assert_eq!(
        fixture.shared_serializer.bound_source().as_deref(),
        Some("layout.txt")
    );
    assert_eq!(fixture.environment.body_text(), "<!-- text --><doc>hello</doc>");
    assert_eq!(fixture.environment.content_type().as_deref(), Some("text/plain"));
}
