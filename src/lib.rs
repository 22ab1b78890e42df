// ==========================================
// 内容同步系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 外部记录导入 → 公式转换 → 摘要比对 → 分块事务落库
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 同步流水线
pub mod engine;

// 导入层 - 外部记录来源
pub mod importer;

// 配置层 - 同步配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    CancelFlag, ContentEntity, ContentValue, FailurePhase, ImportOutcome, ImportationValue,
    RawRecord, RecordStatus, SuccessKind, SyncContext, Validity,
};

// 引擎
pub use engine::{
    ImportationFacade, ImportationService, InMemoryRecorder, OutcomeRecorder, SqliteRecorder,
    StandardFunctions, SyncError, SyncReport, SyncResult, Transformer,
};

// 配置
pub use config::{ConfigManager, SyncConfig, SyncConfigReader};

// 仓储
pub use repository::{ContentFilter, ContentRepository, ImportRecordRepository};

// 导入器
pub use importer::{FileImporter, Importer, ImporterError};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "内容同步系统";
