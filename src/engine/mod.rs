// ==========================================
// 内容同步系统 - 引擎层
// ==========================================
// 职责: 摘要、公式转换、内容映射、导入服务与门面
// 红线: Engine 不拼 SQL，存储访问一律经由 ContentDao
// ==========================================

pub mod content_map;
pub mod digest;
pub mod error;
pub mod formula;
pub mod importation_facade;
pub mod importation_service;
pub mod recorder;

// 重导出核心引擎
pub use content_map::{ContentMap, ContentMapBuilder, ContentMapError, ContentMapResult, JsonCodec, ValueCodec};
pub use digest::{DigestGenerator, DigestSource};
pub use error::{SyncError, SyncResult};
pub use formula::{FormulaError, FunctionResolver, StandardFunctions, TransformResult, Transformer};
pub use importation_facade::{ImportationFacade, SyncReport, DUPLICATE_ID_REASON};
pub use importation_service::{ImportationService, RebuildSummary, MAX_ID_LENGTH};
pub use recorder::{InMemoryRecorder, OutcomeRecorder, SqliteRecorder};
