// ==========================================
// 内容同步系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、值对象、结果类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod content;
pub mod context;
pub mod outcome;
pub mod types;

// 重导出核心类型
pub use content::{ContentEntity, ContentValue, RawRecord, Validity};
pub use context::{CancelFlag, SyncContext};
pub use outcome::{ImportOutcome, ImportationValue, ValidationFailure};
pub use types::{FailurePhase, RecordStatus, SuccessKind};
