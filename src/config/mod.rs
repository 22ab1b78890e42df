// ==========================================
// 内容同步系统 - 配置层
// ==========================================
// 职责: 同步运行配置的读取与写入
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod error;
pub mod sync_config;
pub mod sync_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use error::{ConfigError, ConfigResult};
pub use sync_config::SyncConfig;
pub use sync_config_trait::SyncConfigReader;
