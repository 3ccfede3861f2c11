//! sitemap 配置持有者。
//!
//! 每个网关按 role 懒创建一份持有者，生命周期与网关一致：网关 `dispose` 时整体清空。
//! 组件可以把解析后的配置放进 `prepared` 槽位，避免每次查找都重新解析。

use std::{any::Any, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::environment::AttributeValue;

/// 某 role 在某个网关下的 sitemap 配置。
pub struct ConfigurationHolder {
    role: String,
    configuration: toml::Table,
    prepared: Mutex<Option<AttributeValue>>,
}

impl ConfigurationHolder {
    pub fn new(role: impl Into<String>, configuration: toml::Table) -> Self {
        Self {
            role: role.into(),
            configuration,
            prepared: Mutex::new(None),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// 原始配置表；settings 中没有该 role 时为空表。
    pub fn configuration(&self) -> &toml::Table {
        &self.configuration
    }

    /// 组件此前存放的预处理结果。
    pub fn prepared<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.prepared.lock().clone()?.downcast::<T>().ok()
    }

    pub fn set_prepared<T: Any + Send + Sync>(&self, value: Arc<T>) {
        let value: AttributeValue = value;
        *self.prepared.lock() = Some(value);
    }
}

impl fmt::Debug for ConfigurationHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationHolder")
            .field("role", &self.role)
            .field("configuration", &self.configuration)
            .field("prepared", &self.prepared.lock().is_some())
            .finish()
    }
}
