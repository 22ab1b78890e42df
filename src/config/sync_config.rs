// ==========================================
// 内容同步系统 - 同步运行配置
// ==========================================
// 职责: 单个内容类型一次同步运行所需的全部参数
// 红线: chunk_size 必须大于 0
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 默认块大小
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
/// 默认内容映射内存阈值（值个数）
pub const DEFAULT_MEMORY_THRESHOLD: usize = 10_000;
/// 默认隐式删除上限
pub const DEFAULT_DELETION_LIMIT: usize = 100;

/// 溢出目录默认值: 用户缓存目录下的 content-sync，取不到时退回系统临时目录
pub fn default_spill_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("content-sync"))
        .unwrap_or_else(std::env::temp_dir)
}

// ==========================================
// SyncConfig - 同步配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub content_type: String,            // 内容类型（同步作用域）
    pub chunk_size: usize,               // 每块处理的值个数（一块一个事务）
    pub memory_threshold: usize,         // 内容映射驻留内存的值个数
    pub spill_dir: PathBuf,              // 内容映射溢出目录
    pub implicit_deletion_allowed: bool, // 是否允许隐式删除
    pub deletion_limit: usize,           // 隐式删除条数上限，超过则整体跳过
    pub id_field: String,                // 标识字段
    pub deletion_field: String,          // 显式删除标记字段
    pub required_properties: Vec<String>, // 必填属性
    pub formulas: Vec<[String; 2]>,      // 有序的 [输出字段, 公式]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            content_type: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            spill_dir: default_spill_dir(),
            implicit_deletion_allowed: false,
            deletion_limit: DEFAULT_DELETION_LIMIT,
            id_field: "id".to_string(),
            deletion_field: "deleted".to_string(),
            required_properties: Vec::new(),
            formulas: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn for_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    pub fn with_formula(mut self, field: impl Into<String>, formula: impl Into<String>) -> Self {
        self.formulas.push([field.into(), formula.into()]);
        self
    }

    /// 校验配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.content_type.trim().is_empty() {
            return Err(ConfigError::ValidationError("content_type 不能为空".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError("chunk_size 必须大于 0".to_string()));
        }
        if self.id_field.trim().is_empty() {
            return Err(ConfigError::ValidationError("id_field 不能为空".to_string()));
        }
        Ok(())
    }

    /// 公式定义（字段, 公式）迭代器，保持配置顺序
    pub fn formula_defs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.formulas.iter().map(|[field, formula]| (field.as_str(), formula.as_str()))
    }
}
