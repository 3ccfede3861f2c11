//! Source 解析契约与网关提供的解析门面。
//!
//! 真正的解析器由容器以 [`SOURCE_RESOLVER_ROLE`] 提供；网关按实例缓存一份，并以
//! [`SourceResolverFacade`] 的形式交给组件与 Stage。门面在调用方未给出基准 URI 时，
//! 使用创建它时当前帧环境的 `context()` 作为基准。

use std::{fmt, sync::Arc};

use tracing::debug;

use crate::{
    component::{Component, gateway::ComponentGateway},
    error::{BoxError, Result, SitemapError, codes},
    parameters::Parameters,
};

/// 解析器在容器中的 role。
pub const SOURCE_RESOLVER_ROLE: &str = "source-resolver";

/// 已解析的资源。
pub trait Source: Send + Sync {
    fn uri(&self) -> &str;

    /// 最后修改时间（纪元毫秒），未知时为 `None`。
    fn last_modified(&self) -> Option<u64> {
        None
    }

    fn mime_type(&self) -> Option<&str> {
        None
    }
}

pub type SourceHandle = Arc<dyn Source>;

/// Source 解析器（外部协作方）。
pub trait SourceResolver: Send + Sync {
    /// # Errors
    /// URI 无法解析时返回解析器自定义错误。
    fn resolve_uri(
        &self,
        uri: &str,
        base: Option<&str>,
        parameters: &Parameters,
    ) -> Result<SourceHandle, BoxError>;

    fn release(&self, source: SourceHandle);
}

/// 网关的解析门面。
///
/// # 教案式说明
/// - **意图 (Why)**：组件只拿到门面而不是解析器本体，解析器的获取与归还始终由网关掌控，
///   网关销毁时可以先于其他组件归还解析器。
/// - **契约 (What)**：门面本身作为组件交给调用方时，`release` 对它是空操作。
#[derive(Clone)]
pub struct SourceResolverFacade {
    gateway: Arc<ComponentGateway>,
    base: Option<String>,
}

impl SourceResolverFacade {
    pub(crate) fn new(gateway: Arc<ComponentGateway>, base: Option<String>) -> Self {
        Self { gateway, base }
    }

    /// 未显式给出基准时使用的上下文。
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// 相对门面基准解析 URI。
    ///
    /// # Errors
    /// 解析器不可用或解析失败时返回 [`codes::SOURCE_RESOLUTION_FAILED`]。
    pub fn resolve(&self, uri: &str, parameters: &Parameters) -> Result<SourceHandle> {
        self.resolve_uri(uri, None, parameters).map_err(|cause| {
            SitemapError::processing(
                codes::SOURCE_RESOLUTION_FAILED,
                format!("cannot resolve `{uri}`"),
            )
            .with_cause(cause)
        })
    }

    fn with_resolver<T>(
        &self,
        f: impl FnOnce(&dyn SourceResolver) -> Result<T, BoxError>,
    ) -> Result<T, BoxError> {
        let resolver = self.gateway.cached_resolver()?;
        let Some(capability) = resolver.as_source_resolver() else {
            return Err(SitemapError::lookup(
                codes::COMPONENT_CAPABILITY_MISMATCH,
                SOURCE_RESOLVER_ROLE,
                "component does not resolve sources",
            )
            .into());
        };
        f(capability)
    }
}

impl Component for SourceResolverFacade {
    fn as_source_resolver(&self) -> Option<&dyn SourceResolver> {
        Some(self)
    }
}

impl SourceResolver for SourceResolverFacade {
    fn resolve_uri(
        &self,
        uri: &str,
        base: Option<&str>,
        parameters: &Parameters,
    ) -> Result<SourceHandle, BoxError> {
        let base = base.or(self.base.as_deref());
        self.with_resolver(|resolver| resolver.resolve_uri(uri, base, parameters))
    }

    fn release(&self, source: SourceHandle) {
        if let Err(error) = self.with_resolver(|resolver| {
            resolver.release(source);
            Ok(())
        }) {
            debug!(error = %error, "source released after resolver became unavailable");
        }
    }
}

impl fmt::Debug for SourceResolverFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceResolverFacade")
            .field("gateway", &self.gateway.name())
            .field("base", &self.base)
            .finish()
    }
}
