//! 外层请求边界：`start_processing` / `end_processing`。
//!
//! 与 sitemap 的 enter/leave 不同，这一对调用只在宿主接收与完成一次外部请求时出现各一次。
//! 开始时为请求创建组件登记表并通知环境；结束时通知环境并排空登记表。

use std::sync::Arc;

use tracing::debug;

use super::EnvironmentHandle;
use crate::component::scope::RequestScope;

/// `start_processing` 返回的不透明令牌，必须原样交回 [`end_processing`]。
#[must_use = "the token must be passed back to end_processing"]
#[derive(Debug)]
pub struct ProcessingToken {
    scope: Arc<RequestScope>,
}

impl ProcessingToken {
    /// 本次请求的组件登记表。
    pub fn request_scope(&self) -> &Arc<RequestScope> {
        &self.scope
    }
}

/// 开始处理一次外部请求。
pub fn start_processing(environment: &EnvironmentHandle) -> ProcessingToken {
    let scope = environment.object_model().request_scope_or_init();
    environment.starting_processing();
    debug!(context = environment.context(), "processing started");
    ProcessingToken { scope }
}

/// 结束处理一次外部请求。
///
/// 释放登记表中残留的组件并把它从对象模型上摘下；若最外层帧出栈时已经排空，这里不会重复释放。
pub fn end_processing(environment: &EnvironmentHandle, token: ProcessingToken) {
    environment.finishing_processing();
    let released = token.scope.release_all();
    environment
        .object_model()
        .detach_request_scope(&token.scope);
    debug!(
        context = environment.context(),
        released, "processing finished"
    );
}
