// ==========================================
// 内容同步系统 - 导入器错误类型
// ==========================================
// 工具: thiserror 派生宏
// 红线: Interrupted 表示外部中断，必须中止整次运行
// ==========================================

use thiserror::Error;

/// 导入器错误类型
#[derive(Error, Debug)]
pub enum ImporterError {
    // ===== 中断 =====
    #[error("导入被中断: {0}")]
    Interrupted(String),

    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xls/.csv）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    // ===== 后处理错误 =====
    #[error("后处理失败 ({path}): {message}")]
    PostProcessError { path: String, message: String },

    // ===== 通用错误 =====
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImporterError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ImporterError::Interrupted(_))
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImporterError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            ImporterError::Interrupted(err.to_string())
        } else {
            ImporterError::FileReadError(err.to_string())
        }
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImporterError {
    fn from(err: csv::Error) -> Self {
        ImporterError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImporterError {
    fn from(err: calamine::Error) -> Self {
        ImporterError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImporterResult<T> = Result<T, ImporterError>;
