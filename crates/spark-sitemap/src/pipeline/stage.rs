//! Stage 契约与推送链。
//!
//! # 设计背景（Why）
//! - Generator 单次调用驱动全部下游：事件沿 Generator → Transformer* → 终端消费者单向推送；
//! - 每个生产者只有一个下游，但连线由管道驱动器掌握，Stage 自身不保存“下一个”的可变引用。
//!
//! # 逻辑解析（How）
//! - [`PushChain`] 持有按顺序排列的 Transformer 与终端消费者；事件进入链后，
//!   第 `i` 个 Transformer 拿到的 `next` 是由第 `i + 1..` 个 Transformer 与终端组成的剩余链；
//! - [`SerializerSink`] 把 [`Serializer`] 适配成终端消费者，写入给定的输出流。
//!
//! # 契约说明（What）
//! - Stage 方法接收 `&self`，需要逐请求状态的实现自行使用内部可变性；
//! - Stage 返回 [`BoxError`]，由管道统一归一化为 [`crate::SitemapError`]。

use std::io::Write;

use crate::{
    component::resolver::SourceResolverFacade,
    environment::ObjectModel,
    error::BoxError,
    parameters::Parameters,
};

/// SAX 风格的 XML 事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaxEvent {
    StartDocument,
    EndDocument,
    StartPrefixMapping {
        prefix: String,
        uri: String,
    },
    EndPrefixMapping {
        prefix: String,
    },
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    EndElement {
        name: String,
    },
    Characters(String),
    IgnorableWhitespace(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
    Comment(String),
}

impl SaxEvent {
    pub fn start_element(name: impl Into<String>) -> Self {
        Self::StartElement {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn end_element(name: impl Into<String>) -> Self {
        Self::EndElement { name: name.into() }
    }

    pub fn characters(text: impl Into<String>) -> Self {
        Self::Characters(text.into())
    }
}

/// 推送链中的事件消费者。
pub trait XmlConsumer {
    /// # Errors
    /// 消费失败时返回实现自定义错误，链路随即中止。
    fn consume(&mut self, event: SaxEvent) -> Result<(), BoxError>;
}

/// 收集事件，便于内容聚合与测试。
impl XmlConsumer for Vec<SaxEvent> {
    fn consume(&mut self, event: SaxEvent) -> Result<(), BoxError> {
        self.push(event);
        Ok(())
    }
}

/// 可由 sitemap 语句绑定 source 与参数的 Stage。
pub trait SitemapModelComponent: Send + Sync {
    /// 绑定本次请求的 source 与参数。
    ///
    /// # Errors
    /// 返回的错误由管道归一化为处理错误。
    fn setup(
        &self,
        resolver: &SourceResolverFacade,
        object_model: &ObjectModel,
        source: Option<&str>,
        parameters: &Parameters,
    ) -> Result<(), BoxError>;
}

/// 管道起点。
pub trait Generator: SitemapModelComponent {
    /// 产生完整事件序列并推入 `consumer`。
    ///
    /// # Errors
    /// 生成或下游消费失败。
    fn generate(&self, consumer: &mut dyn XmlConsumer) -> Result<(), BoxError>;
}

/// 中间变换。
pub trait Transformer: SitemapModelComponent {
    /// 处理一个事件，并把零到多个事件推给 `next`。
    ///
    /// # Errors
    /// 变换或下游消费失败。
    fn transform(&self, event: SaxEvent, next: &mut dyn XmlConsumer) -> Result<(), BoxError>;
}

/// 生成器管道的终点：把事件编码为字节。
pub trait Serializer: Send + Sync {
    fn mime_type(&self) -> Option<String> {
        None
    }

    /// 是否需要在写出前知道响应长度。
    fn should_set_content_length(&self) -> bool {
        false
    }

    /// 绑定 sitemap 语句中的 source 与参数，默认忽略。
    ///
    /// # Errors
    /// 返回的错误由管道归一化为处理错误。
    fn setup(
        &self,
        _resolver: &SourceResolverFacade,
        _object_model: &ObjectModel,
        _source: Option<&str>,
        _parameters: &Parameters,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// # Errors
    /// 编码或写出失败。
    fn serialize(&self, event: SaxEvent, output: &mut dyn Write) -> Result<(), BoxError>;
}

/// 读取器管道：直接产出字节，不经过事件链。
pub trait Reader: SitemapModelComponent {
    fn mime_type(&self) -> Option<String> {
        None
    }

    fn should_set_content_length(&self) -> bool {
        false
    }

    /// 资源最后修改时间（纪元毫秒），未知时不做条件 GET 判断。
    fn last_modified(&self) -> Option<u64> {
        None
    }

    /// # Errors
    /// 读取或写出失败。
    fn generate(&self, output: &mut dyn Write) -> Result<(), BoxError>;
}

/// Transformer 序列加终端消费者组成的推送链。
pub struct PushChain<'a, 'd> {
    stages: Vec<&'a dyn Transformer>,
    sink: &'a mut (dyn XmlConsumer + 'd),
}

impl<'a, 'd> PushChain<'a, 'd> {
    pub fn new(stages: Vec<&'a dyn Transformer>, sink: &'a mut (dyn XmlConsumer + 'd)) -> Self {
        Self { stages, sink }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl XmlConsumer for PushChain<'_, '_> {
    fn consume(&mut self, event: SaxEvent) -> Result<(), BoxError> {
        push(&self.stages, &mut *self.sink, event)
    }
}

struct Downstream<'s, 'k, 'd> {
    stages: &'s [&'s dyn Transformer],
    sink: &'k mut (dyn XmlConsumer + 'd),
}

impl XmlConsumer for Downstream<'_, '_, '_> {
    fn consume(&mut self, event: SaxEvent) -> Result<(), BoxError> {
        push(self.stages, &mut *self.sink, event)
    }
}

fn push<'d>(
    stages: &[&dyn Transformer],
    sink: &mut (dyn XmlConsumer + 'd),
    event: SaxEvent,
) -> Result<(), BoxError> {
    match stages.split_first() {
        None => sink.consume(event),
        Some((head, rest)) => head.transform(event, &mut Downstream { stages: rest, sink }),
    }
}

/// 把 [`Serializer`] 适配为终端消费者。
pub struct SerializerSink<'a> {
    serializer: &'a dyn Serializer,
    output: &'a mut dyn Write,
}

impl<'a> SerializerSink<'a> {
    pub fn new(serializer: &'a dyn Serializer, output: &'a mut dyn Write) -> Self {
        Self { serializer, output }
    }
}

impl XmlConsumer for SerializerSink<'_> {
    fn consume(&mut self, event: SaxEvent) -> Result<(), BoxError> {
        self.serializer.serialize(event, &mut *self.output)
    }
}
