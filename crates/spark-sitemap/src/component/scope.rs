//! 逻辑请求级组件登记表。
//!
//! # 设计背景（Why）
//! - 每请求/全局作用域组件在一次逻辑请求内只初始化一次，之后的查找直接命中登记表；
//! - 自动释放列表兜底那些调用方可能忘记归还的组件。
//!
//! # 契约说明（What）
//! - 登记表挂在最外层环境的对象模型上（强类型槽位），随逻辑请求结束被排空；
//! - [`RequestScope::release_all`] 的顺序固定：自动释放列表（登记顺序）→ 每请求表 → 全局表；
//! - 排空是幂等的，重复调用不会二次释放。

use std::{collections::HashMap, fmt, mem, sync::Arc};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::trace;

use super::{ComponentHandle, ComponentSelector, gateway::ComponentGateway, same_component};

struct ScopedEntry {
    component: ComponentHandle,
    owner: Arc<ComponentGateway>,
}

/// 自动释放登记项。
///
/// 两种归还形态显式区分：经网关取得的组件直接交还网关；经选择器取得的组件先交还选择器，
/// 若选择器本身是从外层网关取得的，再把选择器交还外层网关。
pub enum AutoRelease {
    Managed {
        component: ComponentHandle,
        gateway: Arc<ComponentGateway>,
    },
    Selected {
        component: ComponentHandle,
        selector: Arc<dyn ComponentSelector>,
        outer: Option<Arc<ComponentGateway>>,
    },
}

impl AutoRelease {
    pub fn component(&self) -> &ComponentHandle {
        match self {
            Self::Managed { component, .. } | Self::Selected { component, .. } => component,
        }
    }

    pub(crate) fn release(self) {
        match self {
            Self::Managed { component, gateway } => gateway.release(&component),
            Self::Selected {
                component,
                selector,
                outer,
            } => {
                selector.release(&component);
                if let Some(outer) = outer {
                    let selector: ComponentHandle = selector;
                    outer.release(&selector);
                }
            }
        }
    }
}

impl fmt::Debug for AutoRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed { gateway, .. } => f
                .debug_struct("Managed")
                .field("gateway", &gateway.name())
                .finish_non_exhaustive(),
            Self::Selected { outer, .. } => f
                .debug_struct("Selected")
                .field("outer", &outer.as_ref().map(|gateway| gateway.name()))
                .finish_non_exhaustive(),
        }
    }
}

/// 一次逻辑请求的组件登记表。
///
/// # 教案式说明
/// - **意图 (Why)**：用两张显式的表区分每请求与全局作用域组件，替代字符串键下的弱类型映射。
/// - **逻辑 (How)**：三个集合各自加锁；排空时先整体 `take` 再逐个释放，释放回调里即使再次访问
///   登记表也不会死锁。
/// - **契约 (What)**：同一 role 只登记一次；初始化在 role 守卫下串行，后到者命中先到者的实例，
///   自己取得的实例由调用方归还。
#[derive(Default)]
pub struct RequestScope {
    request: Mutex<HashMap<String, ScopedEntry>>,
    global: Mutex<HashMap<String, ScopedEntry>>,
    auto_release: Mutex<Vec<AutoRelease>>,
    setup_guards: Mutex<HashMap<String, Arc<ReentrantMutex<()>>>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找已完成初始化的组件，先查每请求表再查全局表。
    pub fn find(&self, role: &str) -> Option<ComponentHandle> {
        if let Some(entry) = self.request.lock().get(role) {
            return Some(Arc::clone(&entry.component));
        }
        self.global
            .lock()
            .get(role)
            .map(|entry| Arc::clone(&entry.component))
    }

    /// 登记每请求作用域组件；role 已存在时返回既有实例，新实例不入表。
    pub(crate) fn register_request(
        &self,
        role: &str,
        component: ComponentHandle,
        owner: Arc<ComponentGateway>,
    ) -> Option<ComponentHandle> {
        register(&self.request, role, component, owner)
    }

    /// 登记全局作用域组件；语义同 [`Self::register_request`]。
    pub(crate) fn register_global(
        &self,
        role: &str,
        component: ComponentHandle,
        owner: Arc<ComponentGateway>,
    ) -> Option<ComponentHandle> {
        register(&self.global, role, component, owner)
    }

    /// 某 role 的初始化守卫。
    ///
    /// 可重入：组件初始化期间在同一线程内再次查找同一 role 不会自锁。
    pub(crate) fn setup_guard(&self, role: &str) -> Arc<ReentrantMutex<()>> {
        let mut guards = self.setup_guards.lock();
        let guard = guards
            .entry(role.to_owned())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())));
        Arc::clone(guard)
    }

    pub(crate) fn push_auto_release(&self, entry: AutoRelease) {
        self.auto_release.lock().push(entry);
    }

    /// 摘下某组件的自动释放登记（按实例身份匹配，取最早一条）。
    pub(crate) fn take_auto_release(&self, component: &ComponentHandle) -> Option<AutoRelease> {
        let mut entries = self.auto_release.lock();
        let index = entries
            .iter()
            .position(|entry| same_component(entry.component(), component))?;
        Some(entries.remove(index))
    }

    pub fn request_count(&self) -> usize {
        self.request.lock().len()
    }

    pub fn global_count(&self) -> usize {
        self.global.lock().len()
    }

    pub fn auto_release_count(&self) -> usize {
        self.auto_release.lock().len()
    }

    /// 排空登记表并释放全部组件，返回释放数量。
    pub fn release_all(&self) -> usize {
        let auto_release = mem::take(&mut *self.auto_release.lock());
        let request = mem::take(&mut *self.request.lock());
        let global = mem::take(&mut *self.global.lock());
        self.setup_guards.lock().clear();
        let released = auto_release.len() + request.len() + global.len();

        for entry in auto_release {
            entry.release();
        }
        for (role, entry) in request.into_iter().chain(global) {
            trace!(role = %role, owner = entry.owner.name(), "releasing scoped component");
            entry.owner.release_to_container(&entry.component);
        }
        released
    }
}

fn register(
    table: &Mutex<HashMap<String, ScopedEntry>>,
    role: &str,
    component: ComponentHandle,
    owner: Arc<ComponentGateway>,
) -> Option<ComponentHandle> {
    let mut table = table.lock();
    if let Some(existing) = table.get(role) {
        return Some(Arc::clone(&existing.component));
    }
    table.insert(role.to_owned(), ScopedEntry { component, owner });
    None
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("request", &self.request_count())
            .field("global", &self.global_count())
            .field("auto_release", &self.auto_release_count())
            .finish()
    }
}
