//! 处理管道集成测试入口。
//!
//! # 模块目的（Why）
//! - 以记录型环境与内存容器驱动真实的装配、准备与执行路径，覆盖装配顺序、回收、条件 GET、
//!   Content-Length、Expires、流式嵌入与断连归一化；
//! - 对齐过滤路径 `cargo test -p spark-sitemap --test pipeline -- tests::pipeline::*`。

mod support {
    use std::{io, sync::Arc};

    use spark_sitemap::{
        Component, ComponentGateway, ComponentHandle, Environment, EnvironmentHandle,
        EnvironmentStack, SitemapSettings,
        test_stubs::{
            FailingGenerator, InMemoryContainer, RecordingEnvironment, StaticGenerator,
            StaticReader, StubProcessor, TextSerializer, UppercaseTransformer,
        },
    };

    fn handle<T: Component>(component: T) -> ComponentHandle {
        Arc::new(component)
    }

    /// 注册测试所需的全部 Stage；`serializer.shared` 每次查找返回同一实例。
    fn stage_container(shared_serializer: &Arc<TextSerializer>) -> InMemoryContainer {
        let shared: ComponentHandle = shared_serializer.clone();
        InMemoryContainer::new()
            .with_shared("serializer.shared", shared)
            .with("generator.static", || handle(StaticGenerator::text("hello")))
            .with("generator.failing", || {
                handle(FailingGenerator::new(io::ErrorKind::NotFound))
            })
            .with("transformer.upper", || handle(UppercaseTransformer))
            .with("serializer.text", || handle(TextSerializer::new(Some("text/html"))))
            .with("serializer.bare", || handle(TextSerializer::new(None)))
            .with("serializer.sized", || {
                handle(TextSerializer::new(Some("text/plain")).with_content_length())
            })
            .with("reader.static", || {
                handle(StaticReader::new("payload", Some("image/png")).with_last_modified(1_000))
            })
            .with("reader.untyped", || handle(StaticReader::new("raw", None)))
    }

    /// 进入一层环境的测试夹具；离开作用域时自动出栈。
    pub struct Fixture {
        pub container: Arc<InMemoryContainer>,
        pub shared_serializer: Arc<TextSerializer>,
        pub gateway: Arc<ComponentGateway>,
        pub environment: Arc<RecordingEnvironment>,
        pub stack: EnvironmentStack,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_environment(RecordingEnvironment::new("/app/"))
        }

        pub fn with_environment(environment: RecordingEnvironment) -> Self {
            let shared_serializer = Arc::new(TextSerializer::new(Some("text/plain")));
            let container = Arc::new(stage_container(&shared_serializer));
            let gateway = ComponentGateway::new(
                "root",
                container.clone(),
                Arc::new(SitemapSettings::default()),
            );
            let environment = Arc::new(environment);
            let mut stack = EnvironmentStack::new();
            let entered: EnvironmentHandle = environment.clone();
            stack.enter_environment(entered, Arc::clone(&gateway), StubProcessor::handle("root"));
            Self {
                container,
                shared_serializer,
                gateway,
                environment,
                stack,
            }
        }

        pub fn environment(&self) -> &dyn Environment {
            self.environment.as_ref()
        }

        /// 容器事件日志中的归还记录。
        pub fn releases(&self) -> Vec<String> {
            self.container
                .events()
                .into_iter()
                .filter(|event| event.starts_with("release:"))
                .collect()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            if !self.stack.is_empty() {
                self.stack.leave_environment();
            }
        }
    }
}

pub mod tests {
    pub mod pipeline {
        pub mod assembly {
            include!("assembly.rs");
        }
        pub mod execution {
            include!("execution.rs");
        }
        pub mod streaming {
            include!("streaming.rs");
        }
    }
}
