// ==========================================
// 内容同步系统 - 同步上下文
// ==========================================
// 职责: 显式传递操作人、流程名、当前时间、运行 ID、取消标记
// 红线: 不使用全局/注入状态，需要上下文的调用一律显式传参
// ==========================================

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ==========================================
// CancelFlag - 协作式取消标记
// ==========================================
// 由外部监督者（超时/作业调度）置位，流水线在块边界检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ==========================================
// SyncContext - 同步上下文
// ==========================================
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub run_id: String,      // 运行 ID（UUID）
    pub actor: String,       // 操作人
    pub process: String,     // 流程名
    pub now: DateTime<Utc>,  // 本次运行的"当前时间"
    pub cancel: CancelFlag,  // 取消标记
}

impl SyncContext {
    pub fn new(actor: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            actor: actor.into(),
            process: process.into(),
            now: Utc::now(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 页脚签名: actor@process
    pub fn stamp(&self) -> String {
        format!("{}@{}", self.actor, self.process)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
