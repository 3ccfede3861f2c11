//! 环境、容器与 Stage 的记录型测试桩。
//!
//! # 设计定位（Why）
//! - 生命周期与管道测试都需要一个可断言的环境、一个记录取还顺序的容器，以及几种最小 Stage；
//!   集中在此处，避免各测试文件重复定义，并在契约调整时获得集中的编译错误提示。
//!
//! # 使用方式（How）
//! - [`InMemoryContainer`] 以 role → 工厂闭包注册组件，所有 lookup/release/dispose 按顺序记入事件日志；
//! - [`RecordingEnvironment`] 记录响应元数据与响应体，可模拟客户端缓存时间戳与断连；
//! - Stage 桩按“文本”语义工作：[`TextSerializer`] 把元素写成 `<name>` 形式，便于断言输出。
//!
//! # 风险与权衡（Trade-offs）
//! - 桩对象只覆盖测试所需的行为，不代表真实 XML 语义；仅用于测试或示例环境。

use std::{
    collections::HashMap,
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{
    component::{
        Component, ComponentContainer, ComponentHandle, ComponentSelector, GlobalScoped,
        ParentAware, ParentLocator, Recomposable, RequestScoped, SitemapConfigurable,
        configuration::ConfigurationHolder,
        gateway::ComponentGateway,
        resolver::{Source, SourceHandle, SourceResolver, SourceResolverFacade},
        same_component,
    },
    environment::{AttributeValue, Environment, ObjectModel, Processor, ProcessorHandle},
    error::BoxError,
    parameters::Parameters,
    pipeline::stage::{
        Generator, Reader, SaxEvent, Serializer, SitemapModelComponent, Transformer, XmlConsumer,
    },
};

/// 记录型环境。
pub struct RecordingEnvironment {
    context: String,
    object_model: ObjectModel,
    attributes: Mutex<HashMap<String, AttributeValue>>,
    content_type: Mutex<Option<String>>,
    content_length: Mutex<Option<u64>>,
    headers: Mutex<Vec<(String, String)>>,
    date_headers: Mutex<Vec<(String, u64)>>,
    not_modified: AtomicBool,
    if_modified_since: Option<u64>,
    failing_output: Option<io::ErrorKind>,
    body: Arc<Mutex<Vec<u8>>>,
    output_hints: Mutex<Vec<usize>>,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl RecordingEnvironment {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            object_model: ObjectModel::new(),
            attributes: Mutex::new(HashMap::new()),
            content_type: Mutex::new(None),
            content_length: Mutex::new(None),
            headers: Mutex::new(Vec::new()),
            date_headers: Mutex::new(Vec::new()),
            not_modified: AtomicBool::new(false),
            if_modified_since: None,
            failing_output: None,
            body: Arc::new(Mutex::new(Vec::new())),
            output_hints: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// 模拟客户端携带的缓存时间戳：资源仅在 `last_modified > since` 时视为已修改。
    pub fn with_if_modified_since(mut self, since: u64) -> Self {
        self.if_modified_since = Some(since);
        self
    }

    /// 让输出流在写入时以指定错误失败，用于模拟断连。
    pub fn with_failing_output(mut self, kind: io::ErrorKind) -> Self {
        self.failing_output = Some(kind);
        self
    }

    pub fn content_type(&self) -> Option<String> {
        self.content_type.lock().clone()
    }

    pub fn content_length(&self) -> Option<u64> {
        *self.content_length.lock()
    }

    /// 最后一次写入的同名普通响应头。
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .iter()
            .rev()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.clone())
    }

    pub fn date_header(&self, name: &str) -> Option<u64> {
        self.date_headers
            .lock()
            .iter()
            .rev()
            .find(|(header, _)| header == name)
            .map(|(_, value)| *value)
    }

    pub fn is_not_modified(&self) -> bool {
        self.not_modified.load(Ordering::SeqCst)
    }

    pub fn body(&self) -> Vec<u8> {
        self.body.lock().clone()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body.lock()).into_owned()
    }

    /// 每次 `output_stream` 收到的缓冲建议值。
    pub fn output_hints(&self) -> Vec<usize> {
        self.output_hints.lock().clone()
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Environment for RecordingEnvironment {
    fn object_model(&self) -> &ObjectModel {
        &self.object_model
    }

    fn context(&self) -> &str {
        &self.context
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.lock().get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: AttributeValue) {
        self.attributes.lock().insert(name.to_owned(), value);
    }

    fn remove_attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.lock().remove(name)
    }

    fn starting_processing(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn finishing_processing(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn is_response_modified(&self, last_modified: u64) -> bool {
        self.if_modified_since
            .is_none_or(|since| last_modified > since)
    }

    fn set_response_is_not_modified(&self) {
        self.not_modified.store(true, Ordering::SeqCst);
    }

    fn set_content_type(&self, mime_type: &str) {
        *self.content_type.lock() = Some(mime_type.to_owned());
    }

    fn set_content_length(&self, length: u64) {
        *self.content_length.lock() = Some(length);
    }

    fn set_date_header(&self, name: &str, millis: u64) {
        self.date_headers.lock().push((name.to_owned(), millis));
    }

    fn add_header(&self, name: &str, value: &str) {
        self.headers
            .lock()
            .push((name.to_owned(), value.to_owned()));
    }

    fn output_stream(&self, buffer_hint: usize) -> io::Result<Box<dyn Write + Send>> {
        self.output_hints.lock().push(buffer_hint);
        let stream: Box<dyn Write + Send> = match self.failing_output {
            Some(kind) => Box::new(FailingWriter(kind)),
            None => Box::new(SharedBuffer(Arc::clone(&self.body))),
        };
        Ok(stream)
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct FailingWriter(io::ErrorKind);

impl Write for FailingWriter {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(self.0, "peer went away"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(self.0, "peer went away"))
    }
}

/// 只携带名称的 Processor。
#[derive(Debug)]
pub struct StubProcessor {
    name: String,
}

impl StubProcessor {
    pub fn handle(name: impl Into<String>) -> ProcessorHandle {
        Arc::new(Self { name: name.into() })
    }
}

impl Processor for StubProcessor {
    fn name(&self) -> &str {
        &self.name
    }
}

type Factory = Box<dyn Fn() -> ComponentHandle + Send + Sync>;

/// 内存容器：按 role 调用工厂闭包，并记录 `lookup:<role>`、`release:<role>`、`dispose` 事件。
#[derive(Default)]
pub struct InMemoryContainer {
    factories: RwLock<HashMap<String, Factory>>,
    issued: Mutex<Vec<(String, ComponentHandle)>>,
    parent_aware: Vec<String>,
    events: Mutex<Vec<String>>,
}

impl InMemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂，每次查找生成一个新实例。
    pub fn with(
        self,
        role: impl Into<String>,
        factory: impl Fn() -> ComponentHandle + Send + Sync + 'static,
    ) -> Self {
        self.factories.write().insert(role.into(), Box::new(factory));
        self
    }

    /// 注册单例，每次查找返回同一实例。
    pub fn with_shared(self, role: impl Into<String>, component: ComponentHandle) -> Self {
        self.with(role, move || Arc::clone(&component))
    }

    /// 声明某个 role 需要父容器感知。
    pub fn with_parent_aware(mut self, role: impl Into<String>) -> Self {
        self.parent_aware.push(role.into());
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// 指定事件出现的次数。
    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|recorded| recorded.as_str() == event)
            .count()
    }

    /// 已发出但尚未归还的实例数量。
    pub fn outstanding(&self) -> usize {
        self.issued.lock().len()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl ComponentContainer for InMemoryContainer {
    fn lookup(&self, role: &str) -> Result<ComponentHandle, BoxError> {
        let component = {
            let factories = self.factories.read();
            let factory = factories
                .get(role)
                .ok_or_else(|| format!("no component registered for `{role}`"))?;
            factory()
        };
        self.record(format!("lookup:{role}"));
        self.issued
            .lock()
            .push((role.to_owned(), Arc::clone(&component)));
        Ok(component)
    }

    fn release(&self, component: &ComponentHandle) {
        let role = {
            let mut issued = self.issued.lock();
            issued
                .iter()
                .position(|(_, candidate)| same_component(candidate, component))
                .map(|index| issued.remove(index).0)
        };
        self.record(format!("release:{}", role.as_deref().unwrap_or("?")));
    }

    fn has_component(&self, role: &str) -> bool {
        self.factories.read().contains_key(role)
    }

    fn parent_aware_roles(&self) -> Vec<String> {
        self.parent_aware.clone()
    }

    fn dispose(&self) {
        self.record("dispose".to_owned());
    }
}

/// 生成固定事件序列的 Generator，记录每次 setup 收到的 source。
#[derive(Default)]
pub struct StaticGenerator {
    events: Vec<SaxEvent>,
    sources: Mutex<Vec<Option<String>>>,
}

impl StaticGenerator {
    /// `<doc>text</doc>` 形式的文档。
    pub fn text(text: &str) -> Self {
        Self {
            events: vec![
                SaxEvent::StartDocument,
                SaxEvent::start_element("doc"),
                SaxEvent::characters(text),
                SaxEvent::end_element("doc"),
                SaxEvent::EndDocument,
            ],
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn sources(&self) -> Vec<Option<String>> {
        self.sources.lock().clone()
    }
}

impl Component for StaticGenerator {
    fn as_generator(&self) -> Option<&dyn Generator> {
        Some(self)
    }
}

impl SitemapModelComponent for StaticGenerator {
    fn setup(
        &self,
        _: &SourceResolverFacade,
        _: &ObjectModel,
        source: Option<&str>,
        _: &Parameters,
    ) -> Result<(), BoxError> {
        self.sources.lock().push(source.map(str::to_owned));
        Ok(())
    }
}

impl Generator for StaticGenerator {
    fn generate(&self, consumer: &mut dyn XmlConsumer) -> Result<(), BoxError> {
        for event in &self.events {
            consumer.consume(event.clone())?;
        }
        Ok(())
    }
}

/// 以指定错误失败的 Generator。
pub struct FailingGenerator {
    kind: io::ErrorKind,
}

impl FailingGenerator {
    pub fn new(kind: io::ErrorKind) -> Self {
        Self { kind }
    }
}

impl Component for FailingGenerator {
    fn as_generator(&self) -> Option<&dyn Generator> {
        Some(self)
    }
}

impl SitemapModelComponent for FailingGenerator {
    fn setup(
        &self,
        _: &SourceResolverFacade,
        _: &ObjectModel,
        _: Option<&str>,
        _: &Parameters,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

impl Generator for FailingGenerator {
    fn generate(&self, _: &mut dyn XmlConsumer) -> Result<(), BoxError> {
        Err(io::Error::new(self.kind, "generator source unavailable").into())
    }
}

/// 把字符事件转为大写的 Transformer。
#[derive(Default)]
pub struct UppercaseTransformer;

impl Component for UppercaseTransformer {
    fn as_transformer(&self) -> Option<&dyn Transformer> {
        Some(self)
    }
}

impl SitemapModelComponent for UppercaseTransformer {
    fn setup(
        &self,
        _: &SourceResolverFacade,
        _: &ObjectModel,
        _: Option<&str>,
        _: &Parameters,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

impl Transformer for UppercaseTransformer {
    fn transform(&self, event: SaxEvent, next: &mut dyn XmlConsumer) -> Result<(), BoxError> {
        match event {
            SaxEvent::Characters(text) => next.consume(SaxEvent::Characters(text.to_uppercase())),
            other => next.consume(other),
        }
    }
}

/// 把元素与文本写成 `<name>text</name>` 的 Serializer。
///
/// 参数 `prolog` 在文档开始时原样写出；最近一次绑定的 source 可经 [`TextSerializer::bound_source`] 读取。
#[derive(Default)]
pub struct TextSerializer {
    mime_type: Option<String>,
    content_length: bool,
    source: Mutex<Option<String>>,
    prolog: Mutex<Option<String>>,
}

impl TextSerializer {
    pub fn new(mime_type: Option<&str>) -> Self {
        Self {
            mime_type: mime_type.map(str::to_owned),
            ..Self::default()
        }
    }

    pub fn with_content_length(mut self) -> Self {
        self.content_length = true;
        self
    }

    pub fn bound_source(&self) -> Option<String> {
        self.source.lock().clone()
    }
}

impl Component for TextSerializer {
    fn as_serializer(&self) -> Option<&dyn Serializer> {
        Some(self)
    }
}

impl Serializer for TextSerializer {
    fn mime_type(&self) -> Option<String> {
        self.mime_type.clone()
    }

    fn should_set_content_length(&self) -> bool {
        self.content_length
    }

    fn setup(
        &self,
        _: &SourceResolverFacade,
        _: &ObjectModel,
        source: Option<&str>,
        parameters: &Parameters,
    ) -> Result<(), BoxError> {
        *self.source.lock() = source.map(str::to_owned);
        *self.prolog.lock() = parameters.get("prolog").map(str::to_owned);
        Ok(())
    }

    fn serialize(&self, event: SaxEvent, output: &mut dyn Write) -> Result<(), BoxError> {
        match event {
            SaxEvent::StartDocument => {
                if let Some(prolog) = self.prolog.lock().as_deref() {
                    output.write_all(prolog.as_bytes())?;
                }
            }
            SaxEvent::StartElement { name, .. } => write!(output, "<{name}>")?,
            SaxEvent::EndElement { name } => write!(output, "</{name}>")?,
            SaxEvent::Characters(text) => output.write_all(text.as_bytes())?,
            _ => {}
        }
        Ok(())
    }
}

/// 输出固定字节的 Reader。
pub struct StaticReader {
    body: Vec<u8>,
    mime_type: Option<String>,
    last_modified: Option<u64>,
    content_length: bool,
}

impl StaticReader {
    pub fn new(body: impl Into<Vec<u8>>, mime_type: Option<&str>) -> Self {
        Self {
            body: body.into(),
            mime_type: mime_type.map(str::to_owned),
            last_modified: None,
            content_length: false,
        }
    }

    pub fn with_last_modified(mut self, last_modified: u64) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_content_length(mut self) -> Self {
        self.content_length = true;
        self
    }
}

impl Component for StaticReader {
    fn as_reader(&self) -> Option<&dyn Reader> {
        Some(self)
    }
}

impl SitemapModelComponent for StaticReader {
    fn setup(
        &self,
        _: &SourceResolverFacade,
        _: &ObjectModel,
        _: Option<&str>,
        _: &Parameters,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

impl Reader for StaticReader {
    fn mime_type(&self) -> Option<String> {
        self.mime_type.clone()
    }

    fn should_set_content_length(&self) -> bool {
        self.content_length
    }

    fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    fn generate(&self, output: &mut dyn Write) -> Result<(), BoxError> {
        output.write_all(&self.body)?;
        Ok(())
    }
}

/// 每请求作用域组件，统计初始化次数；`failing` 版本的初始化总是失败。
#[derive(Default)]
pub struct CountingRequestComponent {
    setups: AtomicUsize,
    fail: bool,
    base: Mutex<Option<String>>,
}

impl CountingRequestComponent {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    /// 初始化时收到的解析门面基准。
    pub fn resolver_base(&self) -> Option<String> {
        self.base.lock().clone()
    }
}

impl Component for CountingRequestComponent {
    fn as_request_scoped(&self) -> Option<&dyn RequestScoped> {
        Some(self)
    }
}

impl RequestScoped for CountingRequestComponent {
    fn setup_request(
        &self,
        resolver: &SourceResolverFacade,
        _: &ObjectModel,
    ) -> Result<(), BoxError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        *self.base.lock() = resolver.base().map(str::to_owned);
        if self.fail {
            return Err("request setup refused".into());
        }
        Ok(())
    }
}

/// 全局作用域组件，统计初始化次数。
#[derive(Default)]
pub struct CountingGlobalComponent {
    setups: AtomicUsize,
}

impl CountingGlobalComponent {
    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }
}

impl Component for CountingGlobalComponent {
    fn as_global_scoped(&self) -> Option<&dyn GlobalScoped> {
        Some(self)
    }
}

impl GlobalScoped for CountingGlobalComponent {
    fn setup_global(&self, _: &SourceResolverFacade, _: &ObjectModel) -> Result<(), BoxError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// sitemap 可配置组件：从持有者读取 `value` 字段，解析结果缓存在持有者上。
///
/// 默认是池化组件；[`ConfigurableComponent::request_scoped`] 得到每请求作用域的变体。
#[derive(Default)]
pub struct ConfigurableComponent {
    value: Mutex<Option<String>>,
    parses: Arc<AtomicUsize>,
    request_scoped: bool,
}

impl ConfigurableComponent {
    /// 多个实例共享同一解析计数器。
    pub fn with_counter(parses: Arc<AtomicUsize>) -> Self {
        Self {
            parses,
            ..Self::default()
        }
    }

    pub fn request_scoped() -> Self {
        Self {
            request_scoped: true,
            ..Self::default()
        }
    }

    pub fn value(&self) -> Option<String> {
        self.value.lock().clone()
    }
}

impl Component for ConfigurableComponent {
    fn as_request_scoped(&self) -> Option<&dyn RequestScoped> {
        self.request_scoped.then_some(self as &dyn RequestScoped)
    }

    fn as_sitemap_configurable(&self) -> Option<&dyn SitemapConfigurable> {
        Some(self)
    }
}

impl RequestScoped for ConfigurableComponent {
    fn setup_request(&self, _: &SourceResolverFacade, _: &ObjectModel) -> Result<(), BoxError> {
        Ok(())
    }
}

impl SitemapConfigurable for ConfigurableComponent {
    fn configure(&self, holder: &ConfigurationHolder) -> Result<(), BoxError> {
        let value = match holder.prepared::<String>() {
            Some(prepared) => prepared,
            None => {
                self.parses.fetch_add(1, Ordering::SeqCst);
                let parsed = holder
                    .configuration()
                    .get("value")
                    .and_then(toml::Value::as_str)
                    .ok_or_else(|| format!("role `{}` requires a string `value`", holder.role()))?;
                let parsed = Arc::new(parsed.to_owned());
                holder.set_prepared(Arc::clone(&parsed));
                parsed
            }
        };
        *self.value.lock() = Some(value.as_str().to_owned());
        Ok(())
    }
}

/// 每请求作用域且可重组的组件：记录每次重组收到的网关名，以及初始化时已发生的重组次数。
#[derive(Default)]
pub struct RecomposingComponent {
    gateways: Mutex<Vec<String>>,
    recomposed_before_setup: Mutex<Option<usize>>,
    setups: AtomicUsize,
    refuse: AtomicBool,
}

impl RecomposingComponent {
    /// 拒绝任何重组的实例。
    pub fn failing() -> Self {
        let component = Self::default();
        component.refuse_recompose();
        component
    }

    /// 之后的重组全部失败。
    pub fn refuse_recompose(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// 按顺序收到的网关名。
    pub fn recomposed_by(&self) -> Vec<String> {
        self.gateways.lock().clone()
    }

    pub fn recomposed_before_setup(&self) -> Option<usize> {
        *self.recomposed_before_setup.lock()
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }
}

impl Component for RecomposingComponent {
    fn as_request_scoped(&self) -> Option<&dyn RequestScoped> {
        Some(self)
    }

    fn as_recomposable(&self) -> Option<&dyn Recomposable> {
        Some(self)
    }
}

impl Recomposable for RecomposingComponent {
    fn recompose(&self, gateway: &Arc<ComponentGateway>) -> Result<(), BoxError> {
        self.gateways.lock().push(gateway.name().to_owned());
        if self.refuse.load(Ordering::SeqCst) {
            return Err("recompose refused".into());
        }
        Ok(())
    }
}

impl RequestScoped for RecomposingComponent {
    fn setup_request(&self, _: &SourceResolverFacade, _: &ObjectModel) -> Result<(), BoxError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        *self.recomposed_before_setup.lock() = Some(self.gateways.lock().len());
        Ok(())
    }
}

/// 记录注入定位器的父容器感知组件。
#[derive(Default)]
pub struct ParentAwareComponent {
    locator: Mutex<Option<ParentLocator>>,
}

impl ParentAwareComponent {
    pub fn locator(&self) -> Option<ParentLocator> {
        self.locator.lock().clone()
    }
}

impl Component for ParentAwareComponent {
    fn as_parent_aware(&self) -> Option<&dyn ParentAware> {
        Some(self)
    }
}

impl ParentAware for ParentAwareComponent {
    fn set_parent_locator(&self, locator: ParentLocator) {
        *self.locator.lock() = Some(locator);
    }
}

/// 以 `base + uri` 拼接的方式解析 Source 的解析器。
#[derive(Default)]
pub struct StubSourceResolver {
    resolved: Mutex<Vec<String>>,
    released: AtomicUsize,
}

impl StubSourceResolver {
    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().clone()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Component for StubSourceResolver {
    fn as_source_resolver(&self) -> Option<&dyn SourceResolver> {
        Some(self)
    }
}

impl SourceResolver for StubSourceResolver {
    fn resolve_uri(
        &self,
        uri: &str,
        base: Option<&str>,
        _: &Parameters,
    ) -> Result<SourceHandle, BoxError> {
        if uri.is_empty() {
            return Err("empty uri".into());
        }
        let resolved = match base {
            Some(base) if !uri.contains(':') => format!("{base}{uri}"),
            _ => uri.to_owned(),
        };
        self.resolved.lock().push(resolved.clone());
        Ok(Arc::new(StubSource { uri: resolved }))
    }

    fn release(&self, _: SourceHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`StubSourceResolver`] 产出的 Source。
#[derive(Debug)]
pub struct StubSource {
    uri: String,
}

impl Source for StubSource {
    fn uri(&self) -> &str {
        &self.uri
    }
}

/// 按 hint 选择组件的选择器，记录归还次数。
#[derive(Default)]
pub struct StubSelector {
    choices: HashMap<String, ComponentHandle>,
    released: AtomicUsize,
}

impl StubSelector {
    pub fn with_choice(mut self, hint: impl Into<String>, component: ComponentHandle) -> Self {
        self.choices.insert(hint.into(), component);
        self
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Component for StubSelector {}

impl ComponentSelector for StubSelector {
    fn select(&self, hint: &str) -> Result<ComponentHandle, BoxError> {
        self.choices
            .get(hint)
            .cloned()
            .ok_or_else(|| format!("no choice for hint `{hint}`").into())
    }

    fn release(&self, _: &ComponentHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
