// ==========================================
// 内容同步系统 - 导入层
// ==========================================
// 职责: 外部记录来源（拉取 + 后处理）
// 支持: 目录下的 Excel / CSV 文件，或调用方实现的 Importer
// ==========================================

pub mod error;
pub mod file_importer;
pub mod file_parser;
pub mod importer_trait;

// 重导出核心类型
pub use error::{ImporterError, ImporterResult};
pub use file_importer::FileImporter;
pub use file_parser::{CsvParser, ExcelParser, UniversalFileParser};

// 重导出 Trait 接口
pub use importer_trait::{FileParser, Importer};
