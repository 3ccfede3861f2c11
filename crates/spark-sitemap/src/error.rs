//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为组件查找、sitemap 配置注入与管道执行三条路径提供统一错误域，调用方（sitemap 解释器、
//!   管道驱动器）只需匹配一个类型；
//! - 单独区分“对端断开”，让上层在客户端主动断连时降低日志级别，而不是当作故障告警。
//!
//! ## 设计要求（What）
//! - 所有变体都携带稳定错误码（见 [`codes`]），采用 `<域>.<语义>` 命名；
//! - 组件错误必须带上 role 名称，管道错误必须带上人类可读描述，底层原因通过 `source()` 暴露；
//! - 契约违规（栈的 push/pop 不配对、偏移越界）不在此建模：它们属于编程错误，直接 panic。
//!
//! ## 归一化规则（How）
//! - Stage 实现返回 [`BoxError`]；管道调用 [`SitemapError::from_stage`] 归一化：
//!   已是 `SitemapError` 的原样透传，代表连接重置的 `io::Error` 转为 [`SitemapError::ConnectionReset`]，
//!   其余一律包装为 `Processing` 并保留原因。

use std::{borrow::Cow, error::Error as StdError, io};

use thiserror::Error;

/// 跨 Stage 与外部协作方传递的装箱错误。
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// crate 统一的返回值别名，默认错误类型为 [`SitemapError`]。
pub type Result<T, E = SitemapError> = core::result::Result<T, E>;

/// 稳定错误码集合。
///
/// 码值一经发布不得修改语义；新增码值需同步更新 [`SitemapError::code`] 的映射与文档。
pub mod codes {
    /// 查找请求未携带 role。
    pub const COMPONENT_ROLE_MISSING: &str = "component.role_missing";
    /// 底层容器无法提供 role。
    pub const COMPONENT_LOOKUP_FAILED: &str = "component.lookup_failed";
    /// 网关已销毁后仍发起查找。
    pub const COMPONENT_DISPOSED: &str = "component.disposed";
    /// 请求/全局作用域组件的一次性初始化失败。
    pub const COMPONENT_SETUP_FAILED: &str = "component.setup_failed";
    /// 组件缺少调用方要求的能力（例如把 Transformer 当作 Generator 装配）。
    pub const COMPONENT_CAPABILITY_MISMATCH: &str = "component.capability_mismatch";
    /// sitemap 配置注入失败。
    pub const COMPONENT_CONFIGURATION_FAILED: &str = "component.configuration_failed";
    /// 注销自动释放登记时找不到对应组件。
    pub const COMPONENT_AUTO_RELEASE_UNKNOWN: &str = "component.auto_release_unknown";
    /// 请求作用域组件在没有活动环境栈时被查找。
    pub const ENVIRONMENT_MISSING: &str = "environment.missing";
    /// 管道装配顺序违例。
    pub const PIPELINE_ASSEMBLY_ORDER: &str = "pipeline.assembly_order";
    /// 执行时管道不完整。
    pub const PIPELINE_INCOMPLETE: &str = "pipeline.incomplete";
    /// 无法确定响应 MIME 类型。
    pub const PIPELINE_MIME_UNKNOWN: &str = "pipeline.mime_unknown";
    /// 流式嵌入调用不满足前置条件。
    pub const PIPELINE_STREAMING_UNSUPPORTED: &str = "pipeline.streaming_unsupported";
    /// Stage 执行失败。
    pub const PIPELINE_STAGE_FAILED: &str = "pipeline.stage_failed";
    /// Source 解析失败。
    pub const SOURCE_RESOLUTION_FAILED: &str = "source.resolution_failed";
    /// 对端重置或中止连接。
    pub const TRANSPORT_CONNECTION_RESET: &str = "transport.connection_reset";
    /// 配置文件无法解析。
    pub const SETTINGS_INVALID: &str = "settings.invalid";
}

/// sitemap 引擎的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“查找失败 / 配置失败 / 处理失败 / 连接重置”四类故障收敛为一个枚举，
///   便于 sitemap 解释器统一走错误响应路径；
/// - **契约 (What)**：
///   - 所有变体满足 `Send + Sync + 'static`，可跨线程传播；
///   - [`Self::code`] 返回稳定错误码，日志与告警应以码值而非消息文本聚合；
///   - 本层不做重试，是否重试由外部协作方决定。
/// - **设计权衡 (Trade-offs)**：`message` 使用 `Cow<'static, str>`，固定文案零分配，动态文案付出一次分配。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SitemapError {
    /// 组件查找失败：role 缺失、容器无法提供，或请求作用域初始化抛错。
    #[error("[{code}] lookup of role `{role}` failed: {message}")]
    Lookup {
        code: &'static str,
        role: String,
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxError>,
    },

    /// sitemap 可配置组件的配置注入失败，与查找失败刻意区分。
    #[error("[component.configuration_failed] configuring role `{role}` failed: {source}")]
    Configuration {
        role: String,
        #[source]
        source: BoxError,
    },

    /// 管道装配、准备或执行失败。
    #[error("[{code}] {message}")]
    Processing {
        code: &'static str,
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxError>,
    },

    /// 对端重置/中止连接；调用方通常只需 debug 级别记录。
    #[error("[transport.connection_reset] connection closed by peer: {source}")]
    ConnectionReset {
        #[source]
        source: io::Error,
    },

    /// 配置文件解析失败。
    #[error("[settings.invalid] {source}")]
    Settings {
        #[from]
        source: toml::de::Error,
    },
}

impl SitemapError {
    /// 构造查找错误。
    pub fn lookup(
        code: &'static str,
        role: impl Into<String>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::Lookup {
            code,
            role: role.into(),
            message: message.into(),
            source: None,
        }
    }

    /// 构造配置错误。
    pub fn configuration(role: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Configuration {
            role: role.into(),
            source: source.into(),
        }
    }

    /// 构造处理错误。
    pub fn processing(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Processing {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// 为 `Lookup`/`Processing` 附带底层原因；其他变体原样返回。
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::Lookup { source, .. } | Self::Processing { source, .. } => {
                *source = Some(cause.into());
            }
            _ => {}
        }
        self
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lookup { code, .. } | Self::Processing { code, .. } => code,
            Self::Configuration { .. } => codes::COMPONENT_CONFIGURATION_FAILED,
            Self::ConnectionReset { .. } => codes::TRANSPORT_CONNECTION_RESET,
            Self::Settings { .. } => codes::SETTINGS_INVALID,
        }
    }

    /// 涉及的组件 role（仅组件类错误携带）。
    pub fn role(&self) -> Option<&str> {
        match self {
            Self::Lookup { role, .. } | Self::Configuration { role, .. } => Some(role),
            _ => None,
        }
    }

    /// 是否为对端断连。
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, Self::ConnectionReset { .. })
    }

    /// 将 Stage 返回的任意错误归一化为 [`SitemapError`]。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：Stage 由插件作者实现，错误类型五花八门；管道只暴露一种错误域。
    /// - **逻辑 (How)**：
    ///   1. 能向下转型为 `SitemapError` 的原样返回，避免重复包装；
    ///   2. `io::Error` 若判定为连接重置，转为 [`SitemapError::ConnectionReset`]；
    ///   3. 其余包装为 `Processing`，`context` 作为消息，原错误挂在 `source()` 上。
    /// - **契约 (What)**：嵌套在其他错误内部的原因不在此展开，解包是触发方 Stage 的职责。
    pub fn from_stage(error: BoxError, context: impl Into<Cow<'static, str>>) -> Self {
        let error = match error.downcast::<SitemapError>() {
            Ok(sitemap) => return *sitemap,
            Err(other) => other,
        };
        match error.downcast::<io::Error>() {
            Ok(io_error) if is_connection_reset(&io_error) => Self::ConnectionReset {
                source: *io_error,
            },
            Ok(io_error) => {
                Self::processing(codes::PIPELINE_STAGE_FAILED, context).with_cause(*io_error)
            }
            Err(other) => Self::processing(codes::PIPELINE_STAGE_FAILED, context).with_cause(other),
        }
    }
}

/// 判断一次 I/O 失败是否源于对端重置或中止连接。
///
/// 先看 `ErrorKind`，再退回到消息文本匹配：部分 Servlet 风格的宿主只把断连信息写进消息里。
pub fn is_connection_reset(error: &io::Error) -> bool {
    if matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    ) {
        return true;
    }
    let message = error.to_string().to_ascii_lowercase();
    ["connection reset", "broken pipe", "client abort", "connection abort"]
        .iter()
        .any(|needle| message.contains(needle))
}
