// ==========================================
// 内容同步系统 - 同步运行错误类型
// ==========================================
// 工具: thiserror 派生宏
// 红线: 单条记录失败是数据而不是错误；此处只包含中止整次运行的错误
// ==========================================

use crate::config::error::ConfigError;
use crate::engine::content_map::ContentMapError;
use crate::engine::formula::FormulaError;
use crate::importer::error::ImporterError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 同步运行错误类型
#[derive(Error, Debug)]
pub enum SyncError {
    // ===== 中断 =====
    #[error("同步被中断: {0}")]
    Interrupted(String),

    // ===== 各层错误 =====
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("公式编译失败: {0}")]
    Formula(#[from] FormulaError),

    #[error("内容映射错误: {0}")]
    ContentMap(#[from] ContentMapError),

    #[error("仓储错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("导入器错误: {0}")]
    Importer(ImporterError),

    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted(_))
    }

    pub fn is_optimistic_lock_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Repository(RepositoryError::OptimisticLockFailure { .. })
        )
    }
}

// 导入器中断统一归为运行中断
impl From<ImporterError> for SyncError {
    fn from(err: ImporterError) -> Self {
        match err {
            ImporterError::Interrupted(message) => SyncError::Interrupted(message),
            other => SyncError::Importer(other),
        }
    }
}

/// Result 类型别名
pub type SyncResult<T> = Result<T, SyncError>;
