// ==========================================
// 内容同步系统 - 导入结果与导入值
// ==========================================
// 职责: 审计结果（成功/失败）、校验失败回调载荷、导入值
// ==========================================

use crate::domain::content::{ContentEntity, ContentValue, RawRecord};
use crate::domain::types::{FailurePhase, RecordStatus, SuccessKind};
use serde::{Deserialize, Serialize};

// ==========================================
// ImportOutcome - 单条审计结果
// ==========================================
// 只写不读: 流水线从不回读审计结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportOutcome {
    Success {
        kind: SuccessKind,
        content_id: String,
        source: Option<RawRecord>, // 隐式删除没有源记录
    },
    Failure {
        phase: FailurePhase,
        reason: String,
        content_id: Option<String>,
        source: Option<RawRecord>, // 汇总类失败（如超限）没有源记录
    },
}

impl ImportOutcome {
    pub fn success(kind: SuccessKind, content_id: impl Into<String>, source: Option<RawRecord>) -> Self {
        ImportOutcome::Success {
            kind,
            content_id: content_id.into(),
            source,
        }
    }

    pub fn failure(
        phase: FailurePhase,
        reason: impl Into<String>,
        content_id: Option<String>,
        source: Option<RawRecord>,
    ) -> Self {
        ImportOutcome::Failure {
            phase,
            reason: reason.into(),
            content_id,
            source,
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        match self {
            ImportOutcome::Success { content_id, .. } => Some(content_id),
            ImportOutcome::Failure { content_id, .. } => content_id.as_deref(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ImportOutcome::Success { .. })
    }

    pub fn status(&self) -> RecordStatus {
        match self {
            ImportOutcome::Success { kind, .. } => RecordStatus::Succeeded { kind: *kind },
            ImportOutcome::Failure { phase, reason, .. } => RecordStatus::Failed {
                phase: *phase,
                reason: reason.clone(),
            },
        }
    }
}

// ==========================================
// ValidationFailure - 值构造失败
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub content_id: Option<String>, // 能解析出标识时填写
    pub reason: String,
    pub source: RawRecord,
}

// ==========================================
// ImportationValue - 导入值
// ==========================================
// 不变量: 在内容映射中的键 == content.id()
// 溢出格式: {"content": ..., "source": ...}，删除标记仅在为真时写出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportationValue {
    pub content: ContentValue,
    pub source: RawRecord,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deletion_requested: bool,
    #[serde(skip)]
    pub prior: Option<ContentEntity>, // 库中已有实体（乐观锁版本继承）
}

impl ImportationValue {
    pub fn new(content: ContentValue, source: RawRecord) -> Self {
        Self {
            content,
            source,
            deletion_requested: false,
            prior: None,
        }
    }

    pub fn requesting_deletion(mut self) -> Self {
        self.deletion_requested = true;
        self
    }

    pub fn with_prior(mut self, prior: Option<ContentEntity>) -> Self {
        self.prior = prior;
        self
    }

    pub fn key(&self) -> &str {
        self.content.id()
    }
}
