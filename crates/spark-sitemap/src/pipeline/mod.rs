//! # pipeline 模块说明
//!
//! ## 角色定位（Why）
//! - [`processing`]：装配与执行处理管道的状态机；
//! - [`stage`]：Generator/Transformer/Serializer/Reader 契约与推送链；
//! - [`expires`]：Expires 策略迷你语言；
//! - `output`：响应体的缓冲写出策略（crate 内部）。

pub mod expires;
mod output;
pub mod processing;
pub mod stage;

pub use expires::{ExpiresBase, ExpiresPolicy};
pub use processing::{
    EXPIRES_PARAMETER, OUTPUT_BUFFER_SIZE_PARAMETER, ProcessOutcome, ProcessingPipeline,
};
pub use stage::{
    Generator, PushChain, Reader, SaxEvent, Serializer, SerializerSink, SitemapModelComponent,
    Transformer, XmlConsumer,
};
