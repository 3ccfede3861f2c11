use std::{error::Error as _, io};

use spark_sitemap::{
    Parameters, PipelineSettings, ProcessingPipeline, SaxEvent, SitemapError, codes,
    test_stubs::RecordingEnvironment,
};

use crate::support::Fixture;

fn assembled(fixture: &Fixture, generator: &str) -> ProcessingPipeline {
    let (stack, gateway) = (&fixture.stack, &fixture.gateway);
    let mut pipeline = ProcessingPipeline::new(&PipelineSettings::default());
    pipeline
        .set_generator(stack, gateway, generator, None, Parameters::new())
        .expect("generator 应成功");
    pipeline
        .add_transformer(stack, gateway, "transformer.upper", None, Parameters::new())
        .expect("transformer 应成功");
    pipeline
        .set_serializer(stack, gateway, "serializer.text", None, Parameters::new(), None)
        .expect("serializer 应成功");
    pipeline
}

/// 验证内部管道把事件交给外部消费者而不是 serializer，且不写出响应体。
#[test]
fn process_into_feeds_external_consumer() {
    let fixture = Fixture::new();
    let mut pipeline = assembled(&fixture, "generator.static");

    pipeline
        .prepare_internal(&fixture.stack, fixture.environment())
        .expect("准备应成功");
    let mut collected: Vec<SaxEvent> = Vec::new();
    pipeline
        .process_into(&mut collected)
        .expect("流式执行应成功");

    assert_eq!(
        collected,
        vec![
            SaxEvent::StartDocument,
            SaxEvent::start_element("doc"),
            SaxEvent::characters("HELLO"),
            SaxEvent::end_element("doc"),
            SaxEvent::EndDocument,
        ]
    );
    assert!(fixture.environment.body().is_empty());
    assert!(fixture.environment.output_hints().is_empty());

    let mut again: Vec<SaxEvent> = Vec::new();
    pipeline
        .process_into(&mut again)
        .expect("替换消费者只对单次调用生效");
    assert_eq!(again, collected);
}

/// 验证未准备的管道与 reader 管道不支持流式嵌入。
#[test]
fn process_into_requires_prepared_xml_pipeline() {
    let fixture = Fixture::new();
    let mut pipeline = assembled(&fixture, "generator.static");
    let mut sink: Vec<SaxEvent> = Vec::new();
    let err = pipeline
        .process_into(&mut sink)
        .expect_err("未准备的管道不能流式执行");
    assert_eq!(err.code(), codes::PIPELINE_STREAMING_UNSUPPORTED);

    let mut reader = ProcessingPipeline::new(&PipelineSettings::default());
    reader
        .set_reader(
            &fixture.stack,
            &fixture.gateway,
            "reader.static",
            None,
            Parameters::new(),
            None,
        )
        .expect("reader 应成功");
    reader
        .prepare_internal(&fixture.stack, fixture.environment())
        .expect("准备应成功");
    let err = reader
        .process_into(&mut sink)
        .expect_err("reader 管道不能流式执行");
    assert_eq!(err.code(), codes::PIPELINE_STREAMING_UNSUPPORTED);
    assert!(sink.is_empty());
}

/// 验证写出时客户端断连被归一化为连接重置错误，而不是普通处理失败。
#[test]
fn client_disconnect_is_reported_as_connection_reset() {
    let fixture = Fixture::with_environment(
        RecordingEnvironment::new("/app/").with_failing_output(io::ErrorKind::ConnectionReset),
    );
    let mut pipeline = assembled(&fixture, "generator.static");

    let err = pipeline
        .process(&fixture.stack, fixture.environment())
        .expect_err("输出流失败必须传播");

    assert!(err.is_connection_reset());
    assert_eq!(err.code(), codes::TRANSPORT_CONNECTION_RESET);
    assert!(matches!(err, SitemapError::ConnectionReset { .. }));
}

/// 验证 generator 的失败被包装为带原因的处理错误。
#[test]
fn stage_failure_is_wrapped_with_cause() {
    let fixture = Fixture::new();
    let mut pipeline = assembled(&fixture, "generator.failing");

    let err = pipeline
        .process(&fixture.stack, fixture.environment())
        .expect_err("generator 失败必须传播");

    assert_eq!(err.code(), codes::PIPELINE_STAGE_FAILED);
    assert!(!err.is_connection_reset());
    let cause = err
        .source()
        .and_then(|source| source.downcast_ref::<io::Error>())
        .expect("原始 I/O 错误必须保留在 source 链上");
    assert_eq!(cause.kind(), io::ErrorKind::NotFound);
}
