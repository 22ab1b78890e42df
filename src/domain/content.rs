// ==========================================
// 内容同步系统 - 内容领域模型
// ==========================================
// 职责: 原始记录 / 内容值（不可变）/ 持久化实体（可变存储形态）
// 红线: 值与实体之间只通过纯映射函数互转，不存在继承关系
// ==========================================

use crate::engine::digest::{DigestGenerator, DigestSource};
use crate::domain::context::SyncContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// RawRecord - 原始源记录
// ==========================================
// 字段名 → 字符串值，每个外部条目一条，仅在本次运行内存在
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(BTreeMap<String, String>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for RawRecord {
    fn from(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ==========================================
// Validity - 有效期窗口
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub from: Option<DateTime<Utc>>, // 生效时间（含），None 表示不限
    pub to: Option<DateTime<Utc>>,   // 失效时间（不含），None 表示不限
    pub ignored: bool,               // 忽略有效期，始终视为有效
}

impl Validity {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// 判断给定时刻是否处于有效期内
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if self.ignored {
            return true;
        }
        let after_start = self.from.map_or(true, |from| from <= now);
        let before_end = self.to.map_or(true, |to| now < to);
        after_start && before_end
    }
}

// ==========================================
// ContentValue - 内容值（不可变）
// ==========================================
// 不变量: digest = 摘要(validity, enabled, properties)
// 反序列化时忽略输入中的 digest，一律重新计算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ContentValueParts")]
pub struct ContentValue {
    id: String,
    enabled: bool,
    validity: Validity,
    properties: BTreeMap<String, String>,
    digest: String,
}

#[derive(Deserialize)]
struct ContentValueParts {
    id: String,
    enabled: bool,
    #[serde(default)]
    validity: Validity,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl From<ContentValueParts> for ContentValue {
    fn from(parts: ContentValueParts) -> Self {
        ContentValue::new(parts.id, parts.enabled, parts.validity, parts.properties)
    }
}

impl ContentValue {
    pub fn new(
        id: impl Into<String>,
        enabled: bool,
        validity: Validity,
        properties: BTreeMap<String, String>,
    ) -> Self {
        let digest = Self::compute_digest(enabled, &validity, &properties);
        Self {
            id: id.into(),
            enabled,
            validity,
            properties,
            digest,
        }
    }

    /// 摘要元素顺序固定为 [validity, enabled, properties]
    pub fn compute_digest(
        enabled: bool,
        validity: &Validity,
        properties: &BTreeMap<String, String>,
    ) -> String {
        DigestGenerator.generate(&[
            DigestSource::Validity(validity),
            DigestSource::Bool(enabled),
            DigestSource::Attributes(properties),
        ])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self::new(self.id.clone(), enabled, self.validity.clone(), self.properties.clone())
    }

    pub fn with_validity(&self, validity: Validity) -> Self {
        Self::new(self.id.clone(), self.enabled, validity, self.properties.clone())
    }

    pub fn with_property(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut properties = self.properties.clone();
        properties.insert(key.into(), value.into());
        Self::new(self.id.clone(), self.enabled, self.validity.clone(), properties)
    }

    /// 当前时刻是否生效（启用且处于有效期内）
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.validity.contains(now)
    }
}

// ==========================================
// ContentEntity - 持久化内容实体
// ==========================================
// 对齐: content 表
// 版本号: 乐观锁，每次摘要变化的登记 +1，逻辑删除 +1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    // ===== 主键 =====
    pub content_type: String, // 内容类型（同步作用域）
    pub content_id: String,   // 内容标识（跨更新稳定）

    // ===== 内容字段 =====
    pub enabled: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub validity_ignored: bool,
    pub active: bool,                        // 派生: 启用且当前在有效期内
    pub digest: String,                      // 派生: 内容摘要
    pub properties: BTreeMap<String, String>, // 属性（JSON 存储）

    // ===== 页脚信息 =====
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,

    // ===== 并发控制 =====
    pub version: i64, // 乐观锁版本号

    // ===== 逻辑删除 =====
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
}

impl ContentEntity {
    /// 内容值 → 实体
    ///
    /// # 参数
    /// - prior: 库中已有实体（含逻辑删除的墓碑），用于继承创建信息和版本号
    ///
    /// # 说明
    /// - 有 prior 时 version = prior.version + 1，否则为 1
    /// - 写出的实体总是未删除状态（墓碑被复活）
    pub fn from_value(
        content_type: &str,
        value: &ContentValue,
        prior: Option<&ContentEntity>,
        ctx: &SyncContext,
    ) -> Self {
        let stamp = ctx.stamp();
        let (created_by, created_at, version) = match prior {
            Some(p) => (p.created_by.clone(), p.created_at, p.version + 1),
            None => (stamp.clone(), ctx.now, 1),
        };

        Self {
            content_type: content_type.to_string(),
            content_id: value.id().to_string(),
            enabled: value.enabled(),
            valid_from: value.validity().from,
            valid_to: value.validity().to,
            validity_ignored: value.validity().ignored,
            active: value.is_active(ctx.now),
            digest: value.digest().to_string(),
            properties: value.properties().clone(),
            created_by,
            created_at,
            updated_by: stamp,
            updated_at: ctx.now,
            version,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
        }
    }

    /// 实体 → 内容值（摘要按当前字段重新计算）
    pub fn to_value(&self) -> ContentValue {
        ContentValue::new(
            self.content_id.clone(),
            self.enabled,
            self.validity(),
            self.properties.clone(),
        )
    }

    pub fn validity(&self) -> Validity {
        Validity {
            from: self.valid_from,
            to: self.valid_to,
            ignored: self.validity_ignored,
        }
    }
}
