//! 处理管道状态机。
//!
//! # 设计背景（Why）
//! - sitemap 解释器逐条语句装配 Stage，装配顺序错误必须在装配时立刻暴露，而不是执行时才发现；
//! - 同一管道对象会被池化复用，`recycle` 之后不得残留上一次请求的任何引用。
//!
//! # 状态与转换（What）
//! `EMPTY → GENERATOR_SET → TRANSFORMERS_ADDED* → TERMINATED(serializer | reader) → 执行 → RECYCLED`
//! - `set_generator`：已有 generator 或 reader 时失败；
//! - `add_transformer`：已有 reader 或尚无 generator 时失败；
//! - `set_serializer`：已有 serializer、已有 reader 或尚无 generator 时失败；
//! - `set_reader`：已有 reader 或已有 generator 时失败。
//!
//! 所有前置条件在查找组件之前检查，失败时管道状态保持不变。

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{
    expires::ExpiresPolicy,
    output::write_body,
    stage::{
        Generator, PushChain, Reader, Serializer, SerializerSink, SitemapModelComponent,
        Transformer, XmlConsumer,
    },
};
use crate::{
    component::{ComponentHandle, gateway::ComponentGateway, resolver::SourceResolverFacade},
    environment::{Environment, EnvironmentStack, ObjectModel, ProcessorHandle},
    error::{Result, SitemapError, codes},
    parameters::Parameters,
    settings::PipelineSettings,
    time::{Clock, SystemClock},
};

/// `setup` 参数中覆盖管道默认 Expires 的键。
pub const EXPIRES_PARAMETER: &str = "expires";

/// `setup` 参数中覆盖输出缓冲大小的键。
pub const OUTPUT_BUFFER_SIZE_PARAMETER: &str = "outputBufferSize";

/// 一次 `process` 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 已写出响应体。
    Generated,
    /// 条件 GET 命中，响应标记为未修改，未写出任何字节。
    NotModified,
}

struct StageSlot {
    role: String,
    component: ComponentHandle,
    gateway: Arc<ComponentGateway>,
    source: Option<String>,
    parameters: Parameters,
}

impl StageSlot {
    fn release(self) {
        trace!(role = %self.role, gateway = self.gateway.name(), "releasing pipeline stage");
        self.gateway.release(&self.component);
    }

    fn resolver(&self, stack: &EnvironmentStack) -> SourceResolverFacade {
        self.gateway.source_resolver(stack)
    }
}

struct TerminalSlot {
    stage: StageSlot,
    mime_override: Option<String>,
}

/// 处理管道。
///
/// # 教案式说明
/// - **意图 (Why)**：把 Generator + Transformer* + Serializer 或 Reader 组装为可执行的推送链，
///   并负责响应元数据：Content-Type、Content-Length、Expires 与条件 GET。
/// - **逻辑 (How)**：
///   1. 装配方法校验顺序后经网关查找组件，并确认组件具备对应 Stage 能力；
///   2. `process` 先准备（绑定 source/参数、确定 MIME），再按需写 Expires 头；
///   3. Reader 管道先做条件 GET，其余情况连接推送链，仅调用 Generator 驱动全链。
/// - **契约 (What)**：单一所有者使用；`recycle`（或 `Drop`）把所有 Stage 交还各自网关。
/// - **风险 (Trade-offs)**：需要 Content-Length 时整段响应缓存在内存中，大响应应改用流式写出。
pub struct ProcessingPipeline {
    settings: PipelineSettings,
    clock: Arc<dyn Clock>,
    configured_expires: Option<ExpiresPolicy>,
    expires: Option<ExpiresPolicy>,
    output_buffer_size: usize,
    parameters: Parameters,
    generator: Option<StageSlot>,
    transformers: Vec<StageSlot>,
    serializer: Option<TerminalSlot>,
    reader: Option<TerminalSlot>,
    processor: Option<ProcessorHandle>,
    mime_type: Option<String>,
    prepared: bool,
}

impl ProcessingPipeline {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// 使用指定时钟计算 Expires。
    pub fn with_clock(settings: &PipelineSettings, clock: Arc<dyn Clock>) -> Self {
        let configured_expires = settings.expires.as_deref().and_then(ExpiresPolicy::parse);
        Self {
            settings: settings.clone(),
            clock,
            configured_expires,
            expires: configured_expires,
            output_buffer_size: settings.output_buffer_size,
            parameters: Parameters::new(),
            generator: None,
            transformers: Vec::new(),
            serializer: None,
            reader: None,
            processor: None,
            mime_type: None,
            prepared: false,
        }
    }

    /// 应用本次调用的参数。
    ///
    /// `expires` 覆盖管道默认策略（非法值表示不设置 Expires 头）；`outputBufferSize` 无法解析时
    /// 退回配置值。
    pub fn setup(&mut self, parameters: &Parameters) {
        self.parameters = parameters.clone();
        self.expires = match parameters.get(EXPIRES_PARAMETER) {
            Some(text) => ExpiresPolicy::parse(text),
            None => self.configured_expires,
        };
        self.output_buffer_size = match parameters.parse::<usize>(OUTPUT_BUFFER_SIZE_PARAMETER) {
            Some(Ok(size)) => size,
            Some(Err(error)) => {
                warn!(
                    error = %error,
                    fallback = self.settings.output_buffer_size,
                    "invalid outputBufferSize parameter"
                );
                self.settings.output_buffer_size
            }
            None => self.settings.output_buffer_size,
        };
    }

    /// 绑定 Generator。
    ///
    /// # Errors
    /// - 已有 generator 或 reader：[`codes::PIPELINE_ASSEMBLY_ORDER`]；
    /// - 查找失败：透传网关错误；
    /// - 组件不是 Generator：[`codes::COMPONENT_CAPABILITY_MISMATCH`]。
    pub fn set_generator(
        &mut self,
        stack: &EnvironmentStack,
        gateway: &Arc<ComponentGateway>,
        role: &str,
        source: Option<&str>,
        parameters: Parameters,
    ) -> Result<()> {
        if self.generator.is_some() {
            return Err(order_error("generator already set, a pipeline has exactly one generator"));
        }
        if self.reader.is_some() {
            return Err(order_error("cannot set a generator on a pipeline that already has a reader"));
        }
        let slot = acquire(stack, gateway, role, source, parameters, "generator", |c| {
            c.as_generator().is_some()
        })?;
        self.generator = Some(slot);
        Ok(())
    }

    /// 追加 Transformer。
    ///
    /// # Errors
    /// - 已有 reader 或尚无 generator：[`codes::PIPELINE_ASSEMBLY_ORDER`]；
    /// - 查找失败或能力不符：同 [`Self::set_generator`]。
    pub fn add_transformer(
        &mut self,
        stack: &EnvironmentStack,
        gateway: &Arc<ComponentGateway>,
        role: &str,
        source: Option<&str>,
        parameters: Parameters,
    ) -> Result<()> {
        if self.reader.is_some() {
            return Err(order_error("a reader pipeline cannot contain transformers"));
        }
        if self.generator.is_none() {
            return Err(order_error("a generator must be set before adding transformers"));
        }
        let slot = acquire(stack, gateway, role, source, parameters, "transformer", |c| {
            c.as_transformer().is_some()
        })?;
        self.transformers.push(slot);
        Ok(())
    }

    /// 绑定 Serializer。
    ///
    /// # Errors
    /// - 已有 serializer、已有 reader 或尚无 generator：[`codes::PIPELINE_ASSEMBLY_ORDER`]；
    /// - 查找失败或能力不符：同 [`Self::set_generator`]。
    pub fn set_serializer(
        &mut self,
        stack: &EnvironmentStack,
        gateway: &Arc<ComponentGateway>,
        role: &str,
        source: Option<&str>,
        parameters: Parameters,
        mime_override: Option<&str>,
    ) -> Result<()> {
        if self.serializer.is_some() {
            return Err(order_error("serializer already set"));
        }
        if self.reader.is_some() {
            return Err(order_error("cannot set a serializer on a reader pipeline"));
        }
        if self.generator.is_none() {
            return Err(order_error("a generator must be set before the serializer"));
        }
        let stage = acquire(stack, gateway, role, source, parameters, "serializer", |c| {
            c.as_serializer().is_some()
        })?;
        self.serializer = Some(TerminalSlot {
            stage,
            mime_override: mime_override.map(str::to_owned),
        });
        Ok(())
    }

    /// 绑定 Reader。
    ///
    /// # Errors
    /// - 已有 reader 或已有 generator：[`codes::PIPELINE_ASSEMBLY_ORDER`]；
    /// - 查找失败或能力不符：同 [`Self::set_generator`]。
    pub fn set_reader(
        &mut self,
        stack: &EnvironmentStack,
        gateway: &Arc<ComponentGateway>,
        role: &str,
        source: Option<&str>,
        parameters: Parameters,
        mime_override: Option<&str>,
    ) -> Result<()> {
        if self.reader.is_some() {
            return Err(order_error("reader already set"));
        }
        if self.generator.is_some() {
            return Err(order_error("cannot set a reader on a pipeline that has a generator"));
        }
        let stage = acquire(stack, gateway, role, source, parameters, "reader", |c| {
            c.as_reader().is_some()
        })?;
        self.reader = Some(TerminalSlot {
            stage,
            mime_override: mime_override.map(str::to_owned),
        });
        Ok(())
    }

    /// 管道是否完整：有 generator 或 reader，且 generator 管道带 serializer。
    pub fn check_pipeline(&self) -> bool {
        match (&self.generator, &self.reader) {
            (Some(_), _) => self.serializer.is_some(),
            (None, Some(_)) => true,
            (None, None) => false,
        }
    }

    /// 准备管道但不执行，供随后的 [`Self::process_into`] 使用。
    ///
    /// # Errors
    /// 同 `process` 的准备阶段：管道不完整、Stage 绑定失败或无法确定 MIME 类型。
    pub fn prepare_internal(
        &mut self,
        stack: &EnvironmentStack,
        environment: &dyn Environment,
    ) -> Result<()> {
        self.prepare_pipeline(stack, environment)
    }

    fn prepare_pipeline(
        &mut self,
        stack: &EnvironmentStack,
        environment: &dyn Environment,
    ) -> Result<()> {
        self.processor = stack.current_processor().cloned();
        if !self.check_pipeline() {
            return Err(SitemapError::processing(
                codes::PIPELINE_INCOMPLETE,
                "attempted to process an incomplete pipeline",
            ));
        }
        if self.reader.is_some() {
            self.setup_reader(stack, environment)?;
        } else {
            self.setup_pipeline(stack, environment)?;
        }
        self.prepared = true;
        Ok(())
    }

    fn setup_reader(&mut self, stack: &EnvironmentStack, environment: &dyn Environment) -> Result<()> {
        let Some(terminal) = self.reader.as_ref() else {
            return Err(incomplete("reader"));
        };
        let reader = reader_of(&terminal.stage.component)?;
        setup_stage(reader, &terminal.stage, stack, environment.object_model(), "reader")?;

        let mime_type = terminal.mime_override.clone().or_else(|| reader.mime_type());
        if let Some(mime_type) = mime_type.as_deref() {
            environment.set_content_type(mime_type);
        }
        self.mime_type = mime_type;
        Ok(())
    }

    fn setup_pipeline(
        &mut self,
        stack: &EnvironmentStack,
        environment: &dyn Environment,
    ) -> Result<()> {
        let object_model = environment.object_model();
        let Some(slot) = self.generator.as_ref() else {
            return Err(incomplete("generator"));
        };
        setup_stage(generator_of(&slot.component)?, slot, stack, object_model, "generator")?;
        for slot in &self.transformers {
            setup_stage(transformer_of(&slot.component)?, slot, stack, object_model, "transformer")?;
        }

        let Some(terminal) = self.serializer.as_ref() else {
            return Err(incomplete("serializer"));
        };
        let serializer = serializer_of(&terminal.stage.component)?;
        let stage = &terminal.stage;
        serializer
            .setup(
                &stage.resolver(stack),
                object_model,
                stage.source.as_deref(),
                &stage.parameters,
            )
            .map_err(|error| {
                SitemapError::from_stage(error, format!("serializer `{}` setup failed", stage.role))
            })?;
        let Some(mime_type) = terminal.mime_override.clone().or_else(|| serializer.mime_type())
        else {
            return Err(SitemapError::processing(
                codes::PIPELINE_MIME_UNKNOWN,
                format!(
                    "unable to determine the MIME type for serializer `{}`",
                    terminal.stage.role
                ),
            ));
        };
        environment.set_content_type(&mime_type);
        self.mime_type = Some(mime_type);
        Ok(())
    }

    /// 执行管道并写出响应。
    ///
    /// # Errors
    /// - 准备阶段错误（见 [`Self::prepare_internal`]）；
    /// - Stage 执行失败：已是 [`SitemapError`] 的原样透传，其余包装为处理错误；
    /// - 对端断连：[`SitemapError::ConnectionReset`]。
    pub fn process(
        &mut self,
        stack: &EnvironmentStack,
        environment: &dyn Environment,
    ) -> Result<ProcessOutcome> {
        self.prepare_pipeline(stack, environment)?;
        self.apply_expires(environment);

        let outcome = if self.reader.is_some() {
            self.process_reader(environment)
        } else {
            self.process_xml_pipeline(environment)
        };
        if let Err(error) = &outcome
            && error.is_connection_reset()
        {
            debug!(error = %error, "client closed the connection during processing");
        }
        outcome
    }

    /// 以外部消费者替换 Serializer 执行管道，用于把本管道的输出嵌入另一条管道。
    ///
    /// 替换只在本次调用内有效。
    ///
    /// # Errors
    /// - Reader 管道或尚未调用 [`Self::prepare_internal`]：[`codes::PIPELINE_STREAMING_UNSUPPORTED`]；
    /// - Stage 执行失败：同 [`Self::process`]。
    pub fn process_into(&mut self, consumer: &mut dyn XmlConsumer) -> Result<()> {
        if self.reader.is_some() {
            return Err(SitemapError::processing(
                codes::PIPELINE_STREAMING_UNSUPPORTED,
                "streaming of an internal pipeline is not possible with a reader",
            ));
        }
        if !self.prepared {
            return Err(SitemapError::processing(
                codes::PIPELINE_STREAMING_UNSUPPORTED,
                "prepare_internal must be called before streaming",
            ));
        }
        let generator = self.generator_stage()?;
        let chain = self.transformer_stages()?;
        let mut chain = PushChain::new(chain, consumer);
        generator
            .generate(&mut chain)
            .map_err(|error| SitemapError::from_stage(error, "internal pipeline failed"))
    }

    fn apply_expires(&self, environment: &dyn Environment) {
        let Some(policy) = self.expires else {
            return;
        };
        let expires_at = policy.expires_at(self.clock.now_millis());
        environment.set_date_header("Expires", expires_at);
        environment.add_header(
            "Cache-Control",
            &format!("max-age={}, public", policy.max_age_secs()),
        );
        environment
            .object_model()
            .insert(ObjectModel::EXPIRES_KEY, Arc::new(expires_at));
    }

    fn process_reader(&self, environment: &dyn Environment) -> Result<ProcessOutcome> {
        let Some(terminal) = self.reader.as_ref() else {
            return Err(incomplete("reader"));
        };
        let reader = reader_of(&terminal.stage.component)?;
        if let Some(last_modified) = reader.last_modified()
            && !environment.is_response_modified(last_modified)
        {
            environment.set_response_is_not_modified();
            debug!(role = %terminal.stage.role, last_modified, "reader output not modified");
            return Ok(ProcessOutcome::NotModified);
        }
        write_body(
            environment,
            reader.should_set_content_length(),
            self.output_buffer_size,
            |output| reader.generate(output),
        )
        .map_err(|error| SitemapError::from_stage(error, "reader failed"))?;
        Ok(ProcessOutcome::Generated)
    }

    fn process_xml_pipeline(&self, environment: &dyn Environment) -> Result<ProcessOutcome> {
        let generator = self.generator_stage()?;
        let transformers = self.transformer_stages()?;
        let Some(terminal) = self.serializer.as_ref() else {
            return Err(incomplete("serializer"));
        };
        let serializer = serializer_of(&terminal.stage.component)?;
        write_body(
            environment,
            serializer.should_set_content_length(),
            self.output_buffer_size,
            |output| {
                let mut sink = SerializerSink::new(serializer, output);
                let mut chain = PushChain::new(transformers, &mut sink);
                generator.generate(&mut chain)
            },
        )
        .map_err(|error| SitemapError::from_stage(error, "pipeline processing failed"))?;
        Ok(ProcessOutcome::Generated)
    }

    fn generator_stage(&self) -> Result<&dyn Generator> {
        match self.generator.as_ref() {
            Some(slot) => generator_of(&slot.component),
            None => Err(incomplete("generator")),
        }
    }

    fn transformer_stages(&self) -> Result<Vec<&dyn Transformer>> {
        self.transformers
            .iter()
            .map(|slot| transformer_of(&slot.component))
            .collect()
    }

    /// 归还全部 Stage 并清空状态，使管道可以安全地重新入池。
    ///
    /// 归还顺序：reader、generator、各 transformer、serializer。
    pub fn recycle(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stage.release();
        }
        if let Some(generator) = self.generator.take() {
            generator.release();
        }
        for transformer in self.transformers.drain(..) {
            transformer.release();
        }
        if let Some(serializer) = self.serializer.take() {
            serializer.stage.release();
        }
        self.parameters.clear();
        self.processor = None;
        self.mime_type = None;
        self.prepared = false;
        self.expires = self.configured_expires;
        self.output_buffer_size = self.settings.output_buffer_size;
    }

    /// 最近一次准备阶段确定的响应 MIME 类型。
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// 最近一次准备时的当前 Processor。
    pub fn processor(&self) -> Option<&ProcessorHandle> {
        self.processor.as_ref()
    }

    pub fn expires(&self) -> Option<ExpiresPolicy> {
        self.expires
    }

    pub fn output_buffer_size(&self) -> usize {
        self.output_buffer_size
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn has_serializer(&self) -> bool {
        self.serializer.is_some()
    }

    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    pub fn transformer_count(&self) -> usize {
        self.transformers.len()
    }

    /// 管道与各 Stage 持有的参数总数。
    pub fn parameter_count(&self) -> usize {
        let terminals = [self.serializer.as_ref(), self.reader.as_ref()]
            .into_iter()
            .flatten()
            .map(|terminal| &terminal.stage);
        self.parameters.len()
            + self
                .generator
                .iter()
                .chain(&self.transformers)
                .chain(terminals)
                .map(|slot| slot.parameters.len())
                .sum::<usize>()
    }
}

impl Drop for ProcessingPipeline {
    fn drop(&mut self) {
        self.recycle();
    }
}

fn acquire(
    stack: &EnvironmentStack,
    gateway: &Arc<ComponentGateway>,
    role: &str,
    source: Option<&str>,
    parameters: Parameters,
    kind: &'static str,
    capable: impl FnOnce(&ComponentHandle) -> bool,
) -> Result<StageSlot> {
    let component = gateway.lookup(stack, role)?;
    if !capable(&component) {
        gateway.release(&component);
        return Err(SitemapError::lookup(
            codes::COMPONENT_CAPABILITY_MISMATCH,
            role,
            format!("component is not a {kind}"),
        ));
    }
    trace!(role, kind, "pipeline stage acquired");
    Ok(StageSlot {
        role: role.to_owned(),
        component,
        gateway: Arc::clone(gateway),
        source: source.map(str::to_owned),
        parameters,
    })
}

fn setup_stage<S>(
    stage: &S,
    slot: &StageSlot,
    stack: &EnvironmentStack,
    object_model: &ObjectModel,
    kind: &'static str,
) -> Result<()>
where
    S: SitemapModelComponent + ?Sized,
{
    stage
        .setup(
            &slot.resolver(stack),
            object_model,
            slot.source.as_deref(),
            &slot.parameters,
        )
        .map_err(|error| {
            SitemapError::from_stage(error, format!("{kind} `{}` setup failed", slot.role))
        })
}

fn order_error(message: &'static str) -> SitemapError {
    SitemapError::processing(codes::PIPELINE_ASSEMBLY_ORDER, message)
}

fn incomplete(stage: &'static str) -> SitemapError {
    SitemapError::processing(codes::PIPELINE_INCOMPLETE, format!("pipeline has no {stage}"))
}

fn mismatch(kind: &'static str) -> SitemapError {
    SitemapError::processing(
        codes::COMPONENT_CAPABILITY_MISMATCH,
        format!("bound component is no longer a {kind}"),
    )
}

fn generator_of(component: &ComponentHandle) -> Result<&dyn Generator> {
    component.as_generator().ok_or_else(|| mismatch("generator"))
}

fn transformer_of(component: &ComponentHandle) -> Result<&dyn Transformer> {
    component.as_transformer().ok_or_else(|| mismatch("transformer"))
}

fn serializer_of(component: &ComponentHandle) -> Result<&dyn Serializer> {
    component.as_serializer().ok_or_else(|| mismatch("serializer"))
}

fn reader_of(component: &ComponentHandle) -> Result<&dyn Reader> {
    component.as_reader().ok_or_else(|| mismatch("reader"))
}
