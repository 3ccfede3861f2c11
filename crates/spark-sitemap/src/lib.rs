#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "spark-sitemap: sitemap 处理引擎核心，负责环境栈、请求作用域组件生命周期与处理管道执行。"]
#![doc = ""]
#![doc = "== 职责边界 =="]
#![doc = "1. 环境栈：逻辑请求内嵌套进入的 (环境, Processor, 组件网关) 帧，显式传递，派生并发任务时深拷贝。"]
#![doc = "2. 组件网关：按 role 查找组件，保证每请求/全局作用域组件在一次逻辑请求内只初始化一次并在请求结束时统一归还。"]
#![doc = "3. 处理管道：装配 Generator → Transformer* → Serializer 或 Reader，执行推送链并维护响应元数据。"]
#![doc = ""]
#![doc = "sitemap 树构建、容器装配、具体 Stage 实现与 Servlet 抽象均为外部协作方，本 crate 只声明其契约。"]

/// 教案级说明：模块划分。
///
/// # 意图（Why）
/// - `environment` 与 `component` 互相引用（帧持有网关，网关读取当前帧），但对外仍按职责分开暴露；
/// - `pipeline` 只依赖前两者的公开契约，不触碰登记表内部。
///
/// # 合同（What）
/// - 常用类型在 crate 根重导出，调用方通常只需 `use spark_sitemap::*` 中的少数名字；
/// - [`test_stubs`] 为公开测试 API，供集成测试与下游插件测试复用。
pub mod component;
pub mod environment;
pub mod error;
pub mod parameters;
pub mod pipeline;
pub mod settings;
pub mod test_stubs;
pub mod time;

pub use component::{
    Component, ComponentContainer, ComponentHandle, ComponentSelector, Lifecycle, ParentLocator,
    configuration::ConfigurationHolder,
    gateway::ComponentGateway,
    resolver::{SOURCE_RESOLVER_ROLE, Source, SourceHandle, SourceResolver, SourceResolverFacade},
    scope::{AutoRelease, RequestScope},
};
pub use environment::{
    Environment, EnvironmentFrame, EnvironmentHandle, EnvironmentStack, ObjectModel,
    ProcessingToken, Processor, ProcessorHandle, end_processing, last_processor,
    start_processing,
};
pub use error::{BoxError, Result, SitemapError, codes};
pub use parameters::Parameters;
pub use pipeline::{ExpiresPolicy, ProcessOutcome, ProcessingPipeline, SaxEvent, XmlConsumer};
pub use settings::{PipelineSettings, SitemapSettings};
pub use time::{Clock, FixedClock, SystemClock};
