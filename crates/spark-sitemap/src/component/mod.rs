//! # component 模块说明
//!
//! ## 角色定位（Why）
//! - sitemap 语句按字符串 role 获取组件，但组件的生命周期差异（池化、每请求、整请求全局、
//!   需要 sitemap 配置）必须由网关统一处理，调用方不应关心；
//! - 以封闭的能力访问器集合代替运行时反射：[`Component`] 上每个 `as_*` 方法默认返回 `None`，
//!   实现者按需覆盖，网关据此显式分派。
//!
//! ## 子模块
//! - [`gateway`]：按 role 查找/释放组件，负责一次性初始化与自动释放登记；
//! - [`scope`]：逻辑请求级的组件登记表；
//! - [`resolver`]：Source 解析契约与网关提供的解析门面；
//! - [`configuration`]：按网关缓存的 sitemap 配置持有者。

pub mod configuration;
pub mod gateway;
pub mod resolver;
pub mod scope;

use std::{any::Any, fmt, sync::Arc};

use crate::{
    environment::{EnvironmentStack, ObjectModel},
    error::{BoxError, Result},
    pipeline::stage::{Generator, Reader, Serializer, Transformer},
};

use self::{
    configuration::ConfigurationHolder,
    gateway::ComponentGateway,
    resolver::{SourceResolver, SourceResolverFacade},
};

/// 组件共享句柄。
pub type ComponentHandle = Arc<dyn Component>;

/// 网关可管理的组件。
///
/// # 教案式说明
/// - **意图 (Why)**：同一实例可能同时具备多种能力（例如既是 Transformer 又需要每请求初始化），
///   用一组可选访问器表达，比继承层级更直接，也不需要 `downcast` 试探。
/// - **契约 (What)**：
///   - 访问器必须返回 `self` 的视图，不得返回其他对象；
///   - 同时声明 `as_request_scoped` 与 `as_global_scoped` 时，按每请求作用域处理；
///   - 默认实现全部为 `None`，即普通的池化组件。
pub trait Component: Any + Send + Sync {
    fn as_request_scoped(&self) -> Option<&dyn RequestScoped> {
        None
    }

    fn as_global_scoped(&self) -> Option<&dyn GlobalScoped> {
        None
    }

    fn as_sitemap_configurable(&self) -> Option<&dyn SitemapConfigurable> {
        None
    }

    fn as_recomposable(&self) -> Option<&dyn Recomposable> {
        None
    }

    fn as_parent_aware(&self) -> Option<&dyn ParentAware> {
        None
    }

    fn as_source_resolver(&self) -> Option<&dyn SourceResolver> {
        None
    }

    fn as_generator(&self) -> Option<&dyn Generator> {
        None
    }

    fn as_transformer(&self) -> Option<&dyn Transformer> {
        None
    }

    fn as_serializer(&self) -> Option<&dyn Serializer> {
        None
    }

    fn as_reader(&self) -> Option<&dyn Reader> {
        None
    }
}

/// 网关据以分派的生命周期类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// 由容器管理，每次 `release` 归还。
    Pooled,
    /// 每逻辑请求初始化一次，最外层帧出栈时释放。
    RequestScoped,
    /// 与 `RequestScoped` 相同，但登记在跨嵌套作用域存活的全局表中。
    GlobalScoped,
}

/// 判定组件的生命周期类别。
pub fn lifecycle_of(component: &dyn Component) -> Lifecycle {
    if component.as_request_scoped().is_some() {
        Lifecycle::RequestScoped
    } else if component.as_global_scoped().is_some() {
        Lifecycle::GlobalScoped
    } else {
        Lifecycle::Pooled
    }
}

/// 每逻辑请求初始化一次的组件。
pub trait RequestScoped: Send + Sync {
    /// 一次性初始化。
    ///
    /// # Errors
    /// 返回的错误由网关包装为 [`crate::error::codes::COMPONENT_SETUP_FAILED`]。
    fn setup_request(
        &self,
        resolver: &SourceResolverFacade,
        object_model: &ObjectModel,
    ) -> Result<(), BoxError>;
}

/// 整个逻辑请求内只初始化一次、跨嵌套作用域共享的组件。
pub trait GlobalScoped: Send + Sync {
    /// 一次性初始化。
    ///
    /// # Errors
    /// 返回的错误由网关包装为 [`crate::error::codes::COMPONENT_SETUP_FAILED`]。
    fn setup_global(
        &self,
        resolver: &SourceResolverFacade,
        object_model: &ObjectModel,
    ) -> Result<(), BoxError>;
}

/// 需要读取 sitemap 级配置的组件。
pub trait SitemapConfigurable: Send + Sync {
    /// 注入该 role 在当前网关下的配置持有者。
    ///
    /// # Errors
    /// 返回的错误由网关包装为 [`crate::SitemapError::Configuration`]。
    fn configure(&self, holder: &ConfigurationHolder) -> Result<(), BoxError>;
}

/// 需要在初始化前拿到“当前查找网关”的组件。
pub trait Recomposable: Send + Sync {
    /// # Errors
    /// 返回的错误与初始化失败同等处理。
    fn recompose(&self, gateway: &Arc<ComponentGateway>) -> Result<(), BoxError>;
}

/// 需要委托父容器同名组件的组件。
pub trait ParentAware: Send + Sync {
    fn set_parent_locator(&self, locator: ParentLocator);
}

/// 指向父网关中某个 role 的惰性定位器。
///
/// 定位器只记录位置，不预先持有父组件；通过它取得的组件需交还 [`ParentLocator::release`]。
#[derive(Clone)]
pub struct ParentLocator {
    parent: Arc<ComponentGateway>,
    role: String,
}

impl ParentLocator {
    pub fn new(parent: Arc<ComponentGateway>, role: impl Into<String>) -> Self {
        Self {
            parent,
            role: role.into(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// 从父网关查找该 role。
    ///
    /// # Errors
    /// 透传父网关的查找错误。
    pub fn lookup(&self, stack: &EnvironmentStack) -> Result<ComponentHandle> {
        self.parent.lookup(stack, &self.role)
    }

    pub fn release(&self, component: &ComponentHandle) {
        self.parent.release(component);
    }
}

impl fmt::Debug for ParentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentLocator")
            .field("parent", &self.parent.name())
            .field("role", &self.role)
            .finish()
    }
}

/// 底层组件容器（依赖注入容器的窄接口）。
///
/// # 教案式说明
/// - **意图 (Why)**：Bean 工厂的装配细节不属于本引擎；网关只需要按 role 取、还与探测。
/// - **契约 (What)**：
///   - `lookup` 可返回新实例或池中实例，由容器自行决定；
///   - `release` 必须容忍重复归还同一实例；
///   - `parent_aware_roles` 列出声明了父容器感知的 role，供 [`ComponentGateway::initialize`] 使用；
///   - `dispose` 销毁容器持有的全部组件，之后不再被调用。
pub trait ComponentContainer: Send + Sync {
    /// # Errors
    /// role 无法提供时返回容器自定义错误。
    fn lookup(&self, role: &str) -> Result<ComponentHandle, BoxError>;

    fn release(&self, component: &ComponentHandle);

    fn has_component(&self, role: &str) -> bool;

    fn parent_aware_roles(&self) -> Vec<String> {
        Vec::new()
    }

    fn dispose(&self) {}
}

/// 组件选择器：按 hint 在一组同类实现中挑选。
pub trait ComponentSelector: Component {
    /// # Errors
    /// hint 无对应实现时返回选择器自定义错误。
    fn select(&self, hint: &str) -> Result<ComponentHandle, BoxError>;

    fn release(&self, component: &ComponentHandle);
}

/// 两个句柄是否指向同一组件实例。
pub fn same_component(left: &ComponentHandle, right: &ComponentHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

/// 以具体类型借用组件。
pub fn downcast_component<T: Component>(component: &ComponentHandle) -> Option<&T> {
    let any: &dyn Any = &**component;
    any.downcast_ref::<T>()
}

/// 以具体类型取得组件的共享句柄。
pub fn downcast_arc<T: Component>(component: ComponentHandle) -> Option<Arc<T>> {
    let any: Arc<dyn Any + Send + Sync> = component;
    any.downcast::<T>().ok()
}
