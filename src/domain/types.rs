// ==========================================
// 内容同步系统 - 领域类型定义
// ==========================================
// 职责: 导入结果分类（成功种类 / 失败阶段 / 单条记录状态）
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 成功种类 (Success Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuccessKind {
    Register, // 新增或更新落库
    Deletion, // 逻辑删除（显式/隐式）
}

impl fmt::Display for SuccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessKind::Register => write!(f, "REGISTER"),
            SuccessKind::Deletion => write!(f, "DELETION"),
        }
    }
}

impl FromStr for SuccessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "REGISTER" => Ok(SuccessKind::Register),
            "DELETION" => Ok(SuccessKind::Deletion),
            other => Err(format!("未知的成功种类: {}", other)),
        }
    }
}

// ==========================================
// 失败阶段 (Failure Phase)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePhase {
    Transformation, // 公式求值失败
    Validation,     // 值构造/约束校验失败、主键重复
    Provisioning,   // 隐式删除超限等落库前置条件失败
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePhase::Transformation => write!(f, "TRANSFORMATION"),
            FailurePhase::Validation => write!(f, "VALIDATION"),
            FailurePhase::Provisioning => write!(f, "PROVISIONING"),
        }
    }
}

impl FromStr for FailurePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "TRANSFORMATION" => Ok(FailurePhase::Transformation),
            "VALIDATION" => Ok(FailurePhase::Validation),
            "PROVISIONING" => Ok(FailurePhase::Provisioning),
            other => Err(format!("未知的失败阶段: {}", other)),
        }
    }
}

// ==========================================
// 单条记录最终状态 (Record Status)
// ==========================================
// 用途: 交给 Importer::post_process，决定源数据归档/删除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Unchanged,                                      // 与库中摘要一致，无需落库
    Succeeded { kind: SuccessKind },                // 已落库
    Failed { phase: FailurePhase, reason: String }, // 已记录失败
}

impl RecordStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, RecordStatus::Failed { .. })
    }
}
