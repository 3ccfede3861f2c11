//! # environment 模块说明
//!
//! ## 角色定位（Why）
//! - 定义引擎与宿主之间的“每请求上下文”契约：[`Environment`] 暴露对象模型、响应元数据与输出流，
//!   [`Processor`] 代表一棵已编译的 sitemap；二者都是外部协作方，本模块只声明接口；
//! - [`stack`] 维护一次逻辑请求内嵌套进入的帧；[`processing`] 负责最外层请求边界。
//!
//! ## 设计要求（What）
//! - 所有句柄以 `Arc<dyn _>` 传递，帧内只保存共享引用，不持有独占所有权；
//! - 宿主实现需自行处理内部可变性：接口方法一律接收 `&self`，以便同一环境被多层帧同时引用。

pub mod processing;
pub mod stack;

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    io::{self, Write},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::component::scope::RequestScope;

pub use processing::{ProcessingToken, end_processing, start_processing};
pub use stack::{EnvironmentFrame, EnvironmentStack};

/// 环境属性与对象模型中存放的值。
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// 环境共享句柄。
pub type EnvironmentHandle = Arc<dyn Environment>;

/// Processor 共享句柄。
pub type ProcessorHandle = Arc<dyn Processor>;

/// `enter_environment` 在环境属性中登记最近一次进入该环境的 Processor 时使用的键。
pub const LAST_PROCESSOR_ATTRIBUTE: &str = "spark.sitemap.last-processor";

/// 单次请求的执行环境。
///
/// # 教案式说明
/// - **意图 (Why)**：引擎需要读取请求上下文、写入响应元数据并获得输出流，但不关心底层是
///   Servlet、CLI 还是内部子请求；该 trait 即为最小公共面。
/// - **契约 (What)**：
///   - `context()` 返回解析相对 URI 时使用的基准；
///   - `is_response_modified(last_modified)` 由宿主结合客户端缓存时间戳判断，返回 `false`
///     表示客户端副本仍然有效；
///   - `output_stream(buffer_hint)` 中的 `buffer_hint` 仅为建议值，宿主可忽略；
///   - `starting_processing`/`finishing_processing` 默认空实现，供宿主计时或统计。
/// - **风险 (Trade-offs)**：响应头写入接口刻意保持窄口径（日期头 + 普通头），避免把 HTTP
///   细节渗透到引擎；需要更多头部的宿主可在 Stage 中自行扩展。
pub trait Environment: Send + Sync {
    /// 每请求对象模型。
    fn object_model(&self) -> &ObjectModel;

    /// 解析相对 URI 的基准上下文。
    fn context(&self) -> &str;

    fn attribute(&self, name: &str) -> Option<AttributeValue>;

    fn set_attribute(&self, name: &str, value: AttributeValue);

    fn remove_attribute(&self, name: &str) -> Option<AttributeValue>;

    /// 最外层处理开始。
    fn starting_processing(&self) {}

    /// 最外层处理结束。
    fn finishing_processing(&self) {}

    /// 资源自 `last_modified`（纪元毫秒）以来是否对该客户端而言已变化。
    fn is_response_modified(&self, last_modified: u64) -> bool;

    /// 标记响应为“未修改”，不会再写出响应体。
    fn set_response_is_not_modified(&self);

    fn set_content_type(&self, mime_type: &str);

    fn set_content_length(&self, length: u64);

    /// 写入日期类响应头，值为纪元毫秒。
    fn set_date_header(&self, name: &str, millis: u64);

    fn add_header(&self, name: &str, value: &str);

    /// 获取响应输出流。
    ///
    /// # Errors
    /// 宿主无法提供输出流时返回底层 I/O 错误。
    fn output_stream(&self, buffer_hint: usize) -> io::Result<Box<dyn Write + Send>>;
}

/// 已编译 sitemap 的处理器句柄。
///
/// 引擎只把它当作不透明身份：记录“最近进入者”、交给管道做准备阶段的上下文判定。
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;
}

/// 读取最近一次进入 `env` 的 Processor。
pub fn last_processor(env: &dyn Environment) -> Option<ProcessorHandle> {
    env.attribute(LAST_PROCESSOR_ATTRIBUTE)?
        .downcast::<ProcessorHandle>()
        .ok()
        .map(|processor| Arc::clone(&*processor))
}

/// 每请求对象模型。
///
/// # 教案式说明
/// - **意图 (Why)**：Stage 之间通过对象模型共享请求级数据（请求、响应包装、Expires 时间戳等）；
///   逻辑请求的组件登记表同样挂在这里，但使用强类型槽位而非字符串键，避免误取。
/// - **逻辑 (How)**：通用条目使用 `RwLock<HashMap<..>>`；登记表槽位使用独立 `Mutex`，
///   懒创建并允许在请求结束时取走。
/// - **契约 (What)**：所有方法接收 `&self`，可在嵌套帧之间并发读取；同一逻辑请求内的真正并行写入
///   需要调用方自行串行化。
#[derive(Default)]
pub struct ObjectModel {
    entries: RwLock<HashMap<String, AttributeValue>>,
    request_scope: Mutex<Option<Arc<RequestScope>>>,
}

impl ObjectModel {
    /// 管道写入绝对过期时间戳（`u64` 纪元毫秒）时使用的键。
    pub const EXPIRES_KEY: &'static str = "expires";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<AttributeValue> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: AttributeValue) -> Option<AttributeValue> {
        self.entries.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<AttributeValue> {
        self.entries.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// 管道最近一次写入的绝对过期时间。
    pub fn expires(&self) -> Option<u64> {
        self.get(Self::EXPIRES_KEY)?.downcast_ref::<u64>().copied()
    }

    /// 当前逻辑请求的组件登记表（若已创建）。
    pub fn request_scope(&self) -> Option<Arc<RequestScope>> {
        self.request_scope.lock().clone()
    }

    /// 获取或懒创建组件登记表。
    pub(crate) fn request_scope_or_init(&self) -> Arc<RequestScope> {
        Arc::clone(
            self.request_scope
                .lock()
                .get_or_insert_with(|| Arc::new(RequestScope::new())),
        )
    }

    /// 仅当槽位中仍是 `scope` 时将其取走。
    pub(crate) fn detach_request_scope(&self, scope: &Arc<RequestScope>) -> bool {
        let mut slot = self.request_scope.lock();
        let same = slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, scope));
        if same {
            *slot = None;
        }
        same
    }
}

impl fmt::Debug for ObjectModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("ObjectModel")
            .field("keys", &keys)
            .field("has_request_scope", &self.request_scope.lock().is_some())
            .finish()
    }
}
