//! sitemap 引擎的配置层。
//!
//! # 设计目标（Why）
//! - 管道默认值（Expires、输出缓冲）与组件的 sitemap 级配置集中在一份 TOML 中，
//!   由宿主在启动时加载一次，再按 `Arc` 共享给各个网关与管道；
//! - 语句级参数（见 [`crate::pipeline::ProcessingPipeline::setup`]）优先于这里的默认值。
//!
//! # 配置示例（How）
//! ```toml
//! [pipeline]
//! expires = "access plus 1 hours"
//! output_buffer_size = 16384
//!
//! [components."transformer.i18n"]
//! catalogue = "messages"
//! ```
//!
//! # 契约说明（What）
//! - 未知字段被拒绝，防止拼写错误悄无声息地落回默认值；
//! - `output_buffer_size = 0` 表示不额外包裹有界缓冲，直接写入环境提供的输出流。

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::Result;

/// 默认输出缓冲大小（字节）。
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 8192;

/// 顶层配置。
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SitemapSettings {
    /// 管道默认值。
    pub pipeline: PipelineSettings,
    /// 按 role 索引的组件配置，供 sitemap 可配置组件读取。
    pub components: BTreeMap<String, toml::Table>,
}

impl SitemapSettings {
    /// 从 TOML 文本解析。
    ///
    /// # Errors
    /// 文本不是合法 TOML 或包含未知字段时返回 [`crate::SitemapError::Settings`]。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// 读取某个 role 的组件配置。
    pub fn component(&self, role: &str) -> Option<&toml::Table> {
        self.components.get(role)
    }
}

/// 管道默认值。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// 管道级 Expires 策略，语法见 [`crate::pipeline::expires`]。
    pub expires: Option<String>,
    /// 流式输出时包裹的有界缓冲大小。
    pub output_buffer_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            expires: None,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
        }
    }
}
