// ==========================================
// 内容同步系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (scope_id='global', key = sync/<内容类型>/<配置名>)
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::sync_config::SyncConfig;
use crate::config::sync_config_trait::SyncConfigReader;
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| ConfigError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> ConfigResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 写入整份同步配置（content_type 决定键前缀）
    pub fn save_sync_config(&self, config: &SyncConfig) -> ConfigResult<()> {
        config.validate()?;
        let ct = config.content_type.as_str();
        let entries = [
            (config_keys::CHUNK_SIZE, config.chunk_size.to_string()),
            (config_keys::MEMORY_THRESHOLD, config.memory_threshold.to_string()),
            (config_keys::SPILL_DIR, config.spill_dir.display().to_string()),
            (
                config_keys::IMPLICIT_DELETION_ALLOWED,
                config.implicit_deletion_allowed.to_string(),
            ),
            (config_keys::DELETION_LIMIT, config.deletion_limit.to_string()),
            (config_keys::ID_FIELD, config.id_field.clone()),
            (config_keys::DELETION_FIELD, config.deletion_field.clone()),
            (
                config_keys::REQUIRED_PROPERTIES,
                serde_json::to_string(&config.required_properties)?,
            ),
            (config_keys::FORMULAS, serde_json::to_string(&config.formulas)?),
        ];
        for (name, value) in entries {
            self.set_global_config_value(&config_keys::sync_key(ct, name), &value)?;
        }
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 运行审计时记录当时生效的配置
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.get_conn()?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let config_map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    fn parse_value<T: FromStr>(key: &str, raw: &str) -> ConfigResult<T>
    where
        T::Err: std::fmt::Display,
    {
        raw.trim().parse::<T>().map_err(|e| ConfigError::ConfigValueError {
            key: key.to_string(),
            value: raw.to_string(),
            message: e.to_string(),
        })
    }

    fn parse_json<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> ConfigResult<T> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ConfigValueError {
            key: key.to_string(),
            value: raw.to_string(),
            message: e.to_string(),
        })
    }
}

// ==========================================
// SyncConfigReader Trait 实现
// ==========================================
#[async_trait]
impl SyncConfigReader for ConfigManager {
    async fn load_sync_config(&self, content_type: &str) -> ConfigResult<SyncConfig> {
        let mut config = SyncConfig::for_type(content_type);
        let lookup = |name: &str| -> ConfigResult<Option<(String, String)>> {
            let key = config_keys::sync_key(content_type, name);
            Ok(self.get_global_config_value(&key)?.map(|v| (key, v)))
        };

        if let Some((key, raw)) = lookup(config_keys::CHUNK_SIZE)? {
            config.chunk_size = Self::parse_value(&key, &raw)?;
        }
        if let Some((key, raw)) = lookup(config_keys::MEMORY_THRESHOLD)? {
            config.memory_threshold = Self::parse_value(&key, &raw)?;
        }
        if let Some((_, raw)) = lookup(config_keys::SPILL_DIR)? {
            if !raw.trim().is_empty() {
                config.spill_dir = PathBuf::from(raw.trim());
            }
        }
        if let Some((key, raw)) = lookup(config_keys::IMPLICIT_DELETION_ALLOWED)? {
            config.implicit_deletion_allowed = Self::parse_value(&key, &raw.to_lowercase())?;
        }
        if let Some((key, raw)) = lookup(config_keys::DELETION_LIMIT)? {
            config.deletion_limit = Self::parse_value(&key, &raw)?;
        }
        if let Some((_, raw)) = lookup(config_keys::ID_FIELD)? {
            config.id_field = raw.trim().to_string();
        }
        if let Some((_, raw)) = lookup(config_keys::DELETION_FIELD)? {
            config.deletion_field = raw.trim().to_string();
        }
        if let Some((key, raw)) = lookup(config_keys::REQUIRED_PROPERTIES)? {
            config.required_properties = Self::parse_json(&key, &raw)?;
        }
        if let Some((key, raw)) = lookup(config_keys::FORMULAS)? {
            config.formulas = Self::parse_json(&key, &raw)?;
        }

        if config.formulas.is_empty() {
            warn!(content_type = %content_type, "未配置公式，转换结果将为空字段映射");
        }

        config.validate()?;
        debug!(content_type = %content_type, chunk_size = config.chunk_size, "同步配置已加载");
        Ok(config)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const PREFIX: &str = "sync";

    pub const CHUNK_SIZE: &str = "chunk_size";
    pub const MEMORY_THRESHOLD: &str = "memory_threshold";
    pub const SPILL_DIR: &str = "spill_dir";
    pub const IMPLICIT_DELETION_ALLOWED: &str = "implicit_deletion_allowed";
    pub const DELETION_LIMIT: &str = "deletion_limit";
    pub const ID_FIELD: &str = "id_field";
    pub const DELETION_FIELD: &str = "deletion_field";
    pub const REQUIRED_PROPERTIES: &str = "required_properties"; // JSON 字符串数组
    pub const FORMULAS: &str = "formulas"; // JSON [[字段, 公式], ...]

    /// sync/<内容类型>/<配置名>
    pub fn sync_key(content_type: &str, name: &str) -> String {
        format!("{}/{}/{}", PREFIX, content_type, name)
    }
}
