//! 可注入的墙钟。
//!
//! # 设计背景（Why）
//! - Expires 头需要“当前时间 + 偏移”的绝对时间戳；直接读取系统时钟会让测试无法断言具体数值。
//! - 生产用 [`SystemClock`]，测试用 [`FixedClock`]。
//!
//! # 契约说明（What）
//! - 时间以 Unix 纪元毫秒表示，与 HTTP 日期头、`Last-Modified` 的比较口径一致。

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// 墙钟抽象。
pub trait Clock: Send + Sync + 'static {
    /// 当前 Unix 纪元毫秒。
    fn now_millis(&self) -> u64;
}

/// 读取系统时间；系统时钟早于纪元时返回 0。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// 固定时间的测试时钟，可手动推进。
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// 推进时钟。
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
