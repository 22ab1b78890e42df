// ==========================================
// 内容同步系统 - 同步配置读取 Trait
// ==========================================
// 职责: 定义同步门面所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::error::ConfigResult;
use crate::config::sync_config::SyncConfig;
use async_trait::async_trait;

// ==========================================
// SyncConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait SyncConfigReader: Send + Sync {
    /// 读取某内容类型的同步配置
    ///
    /// # 返回
    /// - 未配置的项使用默认值
    /// - Err: 读取失败或配置值格式错误
    async fn load_sync_config(&self, content_type: &str) -> ConfigResult<SyncConfig>;
}
