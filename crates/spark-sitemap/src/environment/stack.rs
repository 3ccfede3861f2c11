//! 环境栈：一次逻辑请求内嵌套进入的 (环境, Processor, 组件作用域) 帧序列。
//!
//! # 设计背景（Why）
//! - 内部管道、子 sitemap 与内部 URI 解析会递归重入同一逻辑请求；
//!   组件的“每请求初始化一次”语义必须跨越这些嵌套帧；
//! - 栈以显式值在调用链中传递，而不是藏在线程局部变量里；派生并发任务时通过 [`EnvironmentStack::fork`]
//!   深拷贝，确保各分支互不可见。
//!
//! # 契约说明（What）
//! - `enter_environment`/`leave_environment` 必须严格配对，包括所有异常退出路径；
//! - `offset` 始终指向有效下标（空栈时为 0），`leave_environment` 恢复的是入栈时保存的偏移，
//!   而不是简单减一；
//! - 最外层帧出栈即逻辑请求结束：登记表中所有组件在此时被释放。

use std::{fmt, sync::Arc, thread};

use tracing::debug;

use super::{EnvironmentHandle, LAST_PROCESSOR_ATTRIBUTE, ProcessorHandle};
use crate::{
    component::{gateway::ComponentGateway, scope::RequestScope},
    error::{Result, SitemapError, codes},
};

/// 一次进入环境时压入的帧。
///
/// 帧创建后不可变，由栈槽位独占；`Clone` 只复制共享句柄，用于 [`EnvironmentStack::fork`]。
#[derive(Clone)]
pub struct EnvironmentFrame {
    environment: EnvironmentHandle,
    processor: ProcessorHandle,
    scope: Arc<ComponentGateway>,
    restore_offset: usize,
}

impl EnvironmentFrame {
    pub fn environment(&self) -> &EnvironmentHandle {
        &self.environment
    }

    pub fn processor(&self) -> &ProcessorHandle {
        &self.processor
    }

    /// 该帧所属 sitemap 的组件网关。
    pub fn scope(&self) -> &Arc<ComponentGateway> {
        &self.scope
    }

    /// 出栈时恢复的偏移。
    pub fn restore_offset(&self) -> usize {
        self.restore_offset
    }
}

impl fmt::Debug for EnvironmentFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentFrame")
            .field("context", &self.environment.context())
            .field("processor", &self.processor.name())
            .field("scope", &self.scope.name())
            .field("restore_offset", &self.restore_offset)
            .finish()
    }
}

/// 环境栈。
///
/// # 教案式说明
/// - **意图 (Why)**：为嵌套重入提供“当前帧”视图，同时保留外层帧直至逻辑请求结束再统一清理。
/// - **逻辑 (How)**：`frames` 只在尾部压入/弹出；`offset` 记录 `current_*` 读取的下标，
///   每次入栈把旧偏移写进新帧，出栈时原样恢复；`forked_at` 记录副本继承的帧数，
///   继承来的最外层帧属于父栈，副本把它弹出不代表逻辑请求结束。
/// - **契约 (What)**：
///   - 单一执行流独占（`&mut self`），跨线程必须先 [`fork`](Self::fork)，栈本身不实现 `Clone`；
///   - 配对违规视为编程错误，直接 panic。
/// - **风险 (Trade-offs)**：调用方中途放弃而未调用 `leave_environment` 时，登记表不会被自动清理；
///   本层不提供超时回收。
#[derive(Debug, Default)]
pub struct EnvironmentStack {
    frames: Vec<EnvironmentFrame>,
    offset: usize,
    forked_at: usize,
}

impl EnvironmentStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进入环境：压入新帧并把偏移移到新栈顶。
    ///
    /// 同时在环境属性中登记最近一次进入它的 Processor，见 [`super::last_processor`]。
    pub fn enter_environment(
        &mut self,
        environment: EnvironmentHandle,
        scope: Arc<ComponentGateway>,
        processor: ProcessorHandle,
    ) {
        environment.set_attribute(LAST_PROCESSOR_ATTRIBUTE, Arc::new(Arc::clone(&processor)));
        self.frames.push(EnvironmentFrame {
            environment,
            processor,
            scope,
            restore_offset: self.offset,
        });
        self.offset = self.frames.len() - 1;
        debug!(depth = self.frames.len(), offset = self.offset, "entered environment");
    }

    /// 离开环境：弹出栈顶帧并恢复入栈时的偏移。
    ///
    /// 栈因此变空时视为逻辑请求结束，释放该请求登记表中的全部组件；
    /// fork 出的副本弹空继承帧时不释放，登记表仍归父栈所有。
    ///
    /// # Panics
    /// 栈为空时 panic：说明 enter/leave 不配对。
    pub fn leave_environment(&mut self) {
        let Some(frame) = self.frames.pop() else {
            panic!("leave_environment called without a matching enter_environment");
        };
        self.offset = frame.restore_offset;
        debug!(depth = self.frames.len(), offset = self.offset, "left environment");

        if !self.frames.is_empty() {
            return;
        }
        if self.forked_at > 0 {
            self.forked_at = 0;
            debug!("forked stack unwound inherited frames");
            return;
        }
        if let Some(scope) = frame.environment.object_model().request_scope() {
            let released = scope.release_all();
            debug!(released, "logical request completed");
        }
    }

    /// 诊断检查：预期没有活动帧时调用。
    ///
    /// # Panics
    /// 栈非空时 panic，报告残留深度。
    pub fn check_environment(&self) {
        assert!(
            self.frames.is_empty(),
            "environment stack not empty: {} frame(s) still active",
            self.frames.len()
        );
    }

    /// 偏移所指的当前帧。
    pub fn current_frame(&self) -> Option<&EnvironmentFrame> {
        self.frames.get(self.offset)
    }

    pub fn current_environment(&self) -> Option<&EnvironmentHandle> {
        self.current_frame().map(EnvironmentFrame::environment)
    }

    pub fn current_processor(&self) -> Option<&ProcessorHandle> {
        self.current_frame().map(EnvironmentFrame::processor)
    }

    /// 当前帧所属 sitemap 的组件网关。
    pub fn sitemap_scope(&self) -> Option<&Arc<ComponentGateway>> {
        self.current_frame().map(EnvironmentFrame::scope)
    }

    /// 物理栈深度（含被偏移隐藏的帧）。
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 调整偏移，使 `current_*` 指向更外层的帧。
    ///
    /// 内部管道把事件回流给外层消费者时使用：消费者应看到外层帧作为当前帧。
    ///
    /// # Panics
    /// `offset` 不是有效下标时 panic（空栈只接受 0）。
    pub fn set_offset(&mut self, offset: usize) {
        assert!(
            offset < self.frames.len() || (offset == 0 && self.frames.is_empty()),
            "offset {offset} out of range for depth {}",
            self.frames.len()
        );
        self.offset = offset;
    }

    /// 以临时偏移执行 `f`，返回后恢复原偏移。
    ///
    /// `f` 内部的 enter/leave 必须自行配对。
    pub fn with_offset<T>(&mut self, offset: usize, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.offset;
        self.set_offset(offset);
        let output = f(self);
        self.offset = saved;
        output
    }

    /// 完整物理历史，自最外层起。
    pub fn frames(&self) -> &[EnvironmentFrame] {
        &self.frames
    }

    /// 逻辑请求的最外层帧。
    pub fn outermost_frame(&self) -> Option<&EnvironmentFrame> {
        self.frames.first()
    }

    /// 当前逻辑请求的组件登记表（若已创建）。
    pub fn request_scope(&self) -> Option<Arc<RequestScope>> {
        self.outermost_frame()?
            .environment
            .object_model()
            .request_scope()
    }

    /// 获取或懒创建当前逻辑请求的组件登记表。
    ///
    /// # Errors
    /// 栈为空时返回 [`codes::ENVIRONMENT_MISSING`]。
    pub fn request_scope_or_init(&self) -> Result<Arc<RequestScope>> {
        let frame = self.outermost_frame().ok_or_else(|| {
            SitemapError::processing(
                codes::ENVIRONMENT_MISSING,
                "no active environment for the current logical request",
            )
        })?;
        Ok(frame.environment.object_model().request_scope_or_init())
    }

    /// 深拷贝当前栈，供派生任务独立使用。
    ///
    /// 帧内句柄仍共享同一环境与网关；被复制的是帧序列与偏移，派生方的 push/pop 不影响本栈。
    /// 副本不拥有继承来的逻辑请求：弹空继承帧不会清理父栈仍在使用的登记表。
    pub fn fork(&self) -> Self {
        Self {
            frames: self.frames.clone(),
            offset: self.offset,
            forked_at: self.frames.len(),
        }
    }

    /// 本栈是否拥有当前逻辑请求（最外层帧出栈时负责清理）。
    pub fn owns_request(&self) -> bool {
        self.forked_at == 0
    }

    /// 在新线程中运行 `task`，并交给它一份 fork 出的栈。
    pub fn spawn_forked<F, T>(&self, task: F) -> thread::JoinHandle<T>
    where
        F: FnOnce(EnvironmentStack) -> T + Send + 'static,
        T: Send + 'static,
    {
        let forked = self.fork();
        thread::spawn(move || task(forked))
    }
}
