//! 组件查找网关。
//!
//! # 设计背景（Why）
//! - sitemap 解释器按 role 获取 Stage 与辅助组件；网关在容器之上叠加三件事：
//!   逻辑请求内的一次性初始化、sitemap 配置注入、以及请求结束时的统一归还；
//! - 每个 sitemap（含子 sitemap）持有一个网关，子网关可指向父网关以便父容器感知组件委托。
//!
//! # 契约说明（What）
//! - 每请求/全局作用域组件在同一逻辑请求内只初始化一次，之后的查找直接命中登记表；
//! - 这类组件的 `release` 是空操作，它们只在逻辑请求结束时由登记表统一归还；
//! - 网关销毁后的查找返回 [`codes::COMPONENT_DISPOSED`]，与“忘记初始化”区分。

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    ComponentContainer, ComponentHandle, ComponentSelector, Lifecycle, ParentLocator,
    configuration::ConfigurationHolder,
    downcast_component, lifecycle_of,
    resolver::{SOURCE_RESOLVER_ROLE, SourceResolverFacade},
    scope::AutoRelease,
};
use crate::{
    environment::{EnvironmentStack, ObjectModel},
    error::{BoxError, Result, SitemapError, codes},
    settings::SitemapSettings,
};

/// 组件查找网关。
///
/// # 教案式说明
/// - **意图 (Why)**：把“按 role 取组件”背后的生命周期差异收敛到一个入口，调用方只做 lookup/release。
/// - **逻辑 (How)**：
///   1. 解析器 role 直接返回门面，真正的解析器按网关实例懒加载并缓存；
///   2. 当前逻辑请求登记表命中则直接返回；
///   3. 否则向容器取实例，按 [`Lifecycle`] 分派一次性初始化并登记；
///   4. 若组件需要 sitemap 配置，注入本网关缓存的 [`ConfigurationHolder`]。
/// - **契约 (What)**：网关通过 `Arc` 共享；`lookup` 需要 `self: &Arc<Self>`，因为登记表与门面会持有网关引用。
/// - **风险 (Trade-offs)**：登记表里的组件反向引用网关，逻辑请求未正常结束时会延长网关寿命。
pub struct ComponentGateway {
    name: String,
    container: Arc<dyn ComponentContainer>,
    parent: Option<Arc<ComponentGateway>>,
    settings: Arc<SitemapSettings>,
    resolver: Mutex<Option<ComponentHandle>>,
    holders: Mutex<HashMap<String, Arc<ConfigurationHolder>>>,
    disposed: AtomicBool,
}

impl ComponentGateway {
    /// 创建根网关。
    pub fn new(
        name: impl Into<String>,
        container: Arc<dyn ComponentContainer>,
        settings: Arc<SitemapSettings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            container,
            parent: None,
            settings,
            resolver: Mutex::new(None),
            holders: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// 创建子 sitemap 网关，继承父网关的配置。
    pub fn with_parent(
        name: impl Into<String>,
        container: Arc<dyn ComponentContainer>,
        parent: Arc<ComponentGateway>,
    ) -> Arc<Self> {
        let settings = Arc::clone(&parent.settings);
        Arc::new(Self {
            name: name.into(),
            container,
            parent: Some(parent),
            settings,
            resolver: Mutex::new(None),
            holders: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ComponentGateway>> {
        self.parent.as_ref()
    }

    pub fn settings(&self) -> &Arc<SitemapSettings> {
        &self.settings
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// 容器能否提供该 role。
    pub fn has_component(&self, role: &str) -> bool {
        role == SOURCE_RESOLVER_ROLE || self.container.has_component(role)
    }

    /// 按 role 查找组件。
    ///
    /// # Errors
    /// - 网关已销毁：[`codes::COMPONENT_DISPOSED`]；
    /// - role 为空：[`codes::COMPONENT_ROLE_MISSING`]；
    /// - 容器无法提供：[`codes::COMPONENT_LOOKUP_FAILED`]；
    /// - 作用域组件在没有活动环境时被查找：[`codes::ENVIRONMENT_MISSING`]；
    /// - 一次性初始化失败：[`codes::COMPONENT_SETUP_FAILED`]；
    /// - sitemap 配置注入失败：[`SitemapError::Configuration`]。
    pub fn lookup(self: &Arc<Self>, stack: &EnvironmentStack, role: &str) -> Result<ComponentHandle> {
        if self.is_disposed() {
            return Err(SitemapError::lookup(
                codes::COMPONENT_DISPOSED,
                role,
                format!("gateway `{}` has already been disposed", self.name),
            ));
        }
        if role.is_empty() {
            return Err(SitemapError::lookup(
                codes::COMPONENT_ROLE_MISSING,
                role,
                "lookup requires a role",
            ));
        }
        if role == SOURCE_RESOLVER_ROLE {
            return Ok(Arc::new(self.source_resolver(stack)));
        }

        if let Some(scope) = stack.request_scope()
            && let Some(found) = scope.find(role)
        {
            return self.reuse_scoped(role, found);
        }

        let component = self.container.lookup(role).map_err(|cause| {
            SitemapError::lookup(
                codes::COMPONENT_LOOKUP_FAILED,
                role,
                format!("container of `{}` cannot supply the role", self.name),
            )
            .with_cause(cause)
        })?;

        match lifecycle_of(component.as_ref()) {
            Lifecycle::Pooled => {
                self.configure(role, &component)?;
                Ok(component)
            }
            lifecycle => self.setup_scoped(stack, role, component, lifecycle),
        }
    }

    /// 命中登记表：可重组组件先重组到本网关再返回。
    fn reuse_scoped(self: &Arc<Self>, role: &str, found: ComponentHandle) -> Result<ComponentHandle> {
        if let Some(recomposable) = found.as_recomposable() {
            recomposable.recompose(self).map_err(|cause| {
                SitemapError::lookup(codes::COMPONENT_SETUP_FAILED, role, "recompose failed")
                    .with_cause(cause)
            })?;
        }
        trace!(role, gateway = %self.name, "scoped component reused");
        Ok(found)
    }

    /// 注入 sitemap 配置；失败时实例直接交还容器。
    fn configure(&self, role: &str, component: &ComponentHandle) -> Result<()> {
        let Some(configurable) = component.as_sitemap_configurable() else {
            return Ok(());
        };
        let holder = self.configuration_holder(role);
        if let Err(cause) = configurable.configure(&holder) {
            self.container.release(component);
            return Err(SitemapError::configuration(role, cause));
        }
        Ok(())
    }

    /// 作用域组件的一次性初始化与登记。
    ///
    /// 同一 role 的初始化在登记表的 role 守卫下串行：并发副本中后到者会命中先到者登记的实例，
    /// 自己取得的实例原样交还容器，初始化不会重复执行。配置注入先于登记，失败的实例不入表。
    fn setup_scoped(
        self: &Arc<Self>,
        stack: &EnvironmentStack,
        role: &str,
        component: ComponentHandle,
        lifecycle: Lifecycle,
    ) -> Result<ComponentHandle> {
        let Some(environment) = stack.current_environment() else {
            self.container.release(&component);
            return Err(SitemapError::processing(
                codes::ENVIRONMENT_MISSING,
                format!("role `{role}` is request scoped but no environment is active"),
            ));
        };
        let scope = stack.request_scope_or_init()?;
        let guard = scope.setup_guard(role);
        let _serialized = guard.lock();

        if let Some(existing) = scope.find(role) {
            self.container.release(&component);
            return self.reuse_scoped(role, existing);
        }

        let facade = self.source_resolver(stack);
        if let Err(cause) =
            self.run_setup(&component, lifecycle, &facade, environment.object_model())
        {
            self.container.release(&component);
            return Err(
                SitemapError::lookup(codes::COMPONENT_SETUP_FAILED, role, "one-time setup failed")
                    .with_cause(cause),
            );
        }
        self.configure(role, &component)?;

        let existing = match lifecycle {
            Lifecycle::GlobalScoped => {
                scope.register_global(role, Arc::clone(&component), Arc::clone(self))
            }
            _ => scope.register_request(role, Arc::clone(&component), Arc::clone(self)),
        };
        match existing {
            Some(existing) => {
                self.container.release(&component);
                Ok(existing)
            }
            None => {
                debug!(role, gateway = %self.name, lifecycle = ?lifecycle, "scoped component set up");
                Ok(component)
            }
        }
    }

    fn run_setup(
        self: &Arc<Self>,
        component: &ComponentHandle,
        lifecycle: Lifecycle,
        facade: &SourceResolverFacade,
        object_model: &ObjectModel,
    ) -> Result<(), BoxError> {
        if let Some(recomposable) = component.as_recomposable() {
            recomposable.recompose(self)?;
        }
        match lifecycle {
            Lifecycle::RequestScoped => match component.as_request_scoped() {
                Some(scoped) => scoped.setup_request(facade, object_model),
                None => Ok(()),
            },
            Lifecycle::GlobalScoped => match component.as_global_scoped() {
                Some(scoped) => scoped.setup_global(facade, object_model),
                None => Ok(()),
            },
            Lifecycle::Pooled => Ok(()),
        }
    }

    /// 归还组件。
    ///
    /// 作用域组件与解析门面为空操作，其余交还容器。
    pub fn release(&self, component: &ComponentHandle) {
        if lifecycle_of(component.as_ref()) != Lifecycle::Pooled
            || downcast_component::<SourceResolverFacade>(component).is_some()
        {
            return;
        }
        self.container.release(component);
    }

    /// 绕过生命周期判定直接交还容器，供登记表在请求结束时使用。
    pub(crate) fn release_to_container(&self, component: &ComponentHandle) {
        self.container.release(component);
    }

    /// 本网关的解析门面，基准取当前帧环境的上下文。
    pub fn source_resolver(self: &Arc<Self>, stack: &EnvironmentStack) -> SourceResolverFacade {
        let base = stack
            .current_environment()
            .map(|environment| environment.context().to_owned());
        SourceResolverFacade::new(Arc::clone(self), base)
    }

    /// 懒加载并缓存真正的解析器。
    pub(crate) fn cached_resolver(&self) -> Result<ComponentHandle> {
        let mut slot = self.resolver.lock();
        if let Some(resolver) = slot.as_ref() {
            return Ok(Arc::clone(resolver));
        }
        if self.is_disposed() {
            return Err(SitemapError::lookup(
                codes::COMPONENT_DISPOSED,
                SOURCE_RESOLVER_ROLE,
                format!("gateway `{}` has already been disposed", self.name),
            ));
        }
        let resolver = self.container.lookup(SOURCE_RESOLVER_ROLE).map_err(|cause| {
            SitemapError::lookup(
                codes::COMPONENT_LOOKUP_FAILED,
                SOURCE_RESOLVER_ROLE,
                "no source resolver available",
            )
            .with_cause(cause)
        })?;
        *slot = Some(Arc::clone(&resolver));
        Ok(resolver)
    }

    fn configuration_holder(&self, role: &str) -> Arc<ConfigurationHolder> {
        let mut holders = self.holders.lock();
        let holder = holders.entry(role.to_owned()).or_insert_with(|| {
            let table = self.settings.component(role).cloned().unwrap_or_default();
            Arc::new(ConfigurationHolder::new(role, table))
        });
        Arc::clone(holder)
    }

    /// 当前缓存的配置持有者数量。
    pub fn configuration_holder_count(&self) -> usize {
        self.holders.lock().len()
    }

    /// 为父容器感知组件注入父网关定位器。
    ///
    /// 仅处理父网关同样能提供的 role；本地查找得到的实例在注入后立即归还，
    /// 父组件由定位器按需获取。
    ///
    /// # Errors
    /// 本地容器无法提供其声明的 role 时返回 [`codes::COMPONENT_LOOKUP_FAILED`]。
    pub fn initialize(&self) -> Result<()> {
        let Some(parent) = self.parent.as_ref() else {
            return Ok(());
        };
        for role in self.container.parent_aware_roles() {
            if !parent.has_component(&role) {
                continue;
            }
            let local = self.container.lookup(&role).map_err(|cause| {
                SitemapError::lookup(
                    codes::COMPONENT_LOOKUP_FAILED,
                    role.as_str(),
                    "parent aware component unavailable",
                )
                .with_cause(cause)
            })?;
            if let Some(aware) = local.as_parent_aware() {
                aware.set_parent_locator(ParentLocator::new(Arc::clone(parent), role.as_str()));
                debug!(role = %role, gateway = %self.name, "parent locator injected");
            }
            self.container.release(&local);
        }
        Ok(())
    }

    /// 销毁网关。
    ///
    /// 顺序：先归还缓存的解析器（其他组件销毁时可能仍需归还 Source），再销毁容器，
    /// 最后清空解析器缓存与配置持有者并标记已销毁。重复调用为空操作。
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        let resolver = self.resolver.lock().clone();
        if let Some(resolver) = resolver.as_ref() {
            self.container.release(resolver);
        }
        self.container.dispose();
        *self.resolver.lock() = None;
        self.holders.lock().clear();
        self.disposed.store(true, Ordering::Release);
        debug!(gateway = %self.name, "gateway disposed");
    }

    /// 登记组件，保证逻辑请求结束时归还给本网关。
    ///
    /// # Errors
    /// 没有活动环境时返回 [`codes::ENVIRONMENT_MISSING`]。
    pub fn add_for_automatic_release(
        self: &Arc<Self>,
        stack: &EnvironmentStack,
        component: ComponentHandle,
    ) -> Result<()> {
        let scope = stack.request_scope_or_init()?;
        scope.push_auto_release(AutoRelease::Managed {
            component,
            gateway: Arc::clone(self),
        });
        trace!(gateway = %self.name, "registered for automatic release");
        Ok(())
    }

    /// 登记经选择器取得的组件。
    ///
    /// 释放时先交还选择器；`outer` 存在时再把选择器交还 `outer`。
    ///
    /// # Errors
    /// 没有活动环境时返回 [`codes::ENVIRONMENT_MISSING`]。
    pub fn add_selected_for_automatic_release(
        stack: &EnvironmentStack,
        selector: Arc<dyn ComponentSelector>,
        component: ComponentHandle,
        outer: Option<Arc<ComponentGateway>>,
    ) -> Result<()> {
        let scope = stack.request_scope_or_init()?;
        scope.push_auto_release(AutoRelease::Selected {
            component,
            selector,
            outer,
        });
        trace!("registered selected component for automatic release");
        Ok(())
    }

    /// 注销自动释放登记并立即归还。
    ///
    /// # Errors
    /// 组件从未登记时返回 [`codes::COMPONENT_AUTO_RELEASE_UNKNOWN`]。
    pub fn remove_from_automatic_release(
        stack: &EnvironmentStack,
        component: &ComponentHandle,
    ) -> Result<()> {
        let entry = stack
            .request_scope()
            .and_then(|scope| scope.take_auto_release(component))
            .ok_or_else(|| {
                SitemapError::processing(
                    codes::COMPONENT_AUTO_RELEASE_UNKNOWN,
                    "component was never registered for automatic release",
                )
            })?;
        entry.release();
        Ok(())
    }
}

impl fmt::Debug for ComponentGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentGateway")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|parent| parent.name()))
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
