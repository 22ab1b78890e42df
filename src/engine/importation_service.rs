// ==========================================
// 内容同步系统 - 导入服务
// ==========================================
// 职责: 转换结果 → 导入值（校验）、暂存、差异计算、登记/删除/重建
// 红线: 不开启、不提交事务，不决定块大小；所有存储访问经由借入的 ContentDao
// 红线: 单条记录的校验失败通过回调上报，绝不 panic
// ==========================================

mod fields;

#[cfg(test)]
mod tests;

use crate::config::SyncConfig;
use crate::domain::content::{ContentEntity, ContentValue, RawRecord, Validity};
use crate::domain::context::SyncContext;
use crate::domain::outcome::{ImportationValue, ValidationFailure};
use crate::engine::content_map::{ContentMap, ContentMapBuilder, ContentMapResult, JsonCodec};
use crate::repository::content_repo::ContentDao;
use crate::repository::error::RepositoryResult;
use fields::{parse_flag, parse_instant};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// 标识最大长度（字符）
pub const MAX_ID_LENGTH: usize = 255;

/// 溢出编码: 每行一个 {"content": ..., "source": ...}
pub type ImportationValueCodec = JsonCodec<ImportationValue>;

pub type ImportationContentMap = ContentMap<ImportationValue, ImportationValueCodec>;

pub type ImportationContentMapBuilder = ContentMapBuilder<ImportationValue, ImportationValueCodec>;

// 保留字段: 映射到内容值的结构化字段，不进入 properties
pub mod reserved_fields {
    pub const ENABLED: &str = "enabled";
    pub const VALID_FROM: &str = "valid_from";
    pub const VALID_TO: &str = "valid_to";
    pub const VALIDITY_IGNORED: &str = "validity_ignored";
}

/// 重建结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub refreshed: usize,  // 派生字段有变化并已回写的行数
    pub properties: usize, // content_property 重建后的行数
}

// ==========================================
// ImportationService - 导入服务（每个内容类型一个实例）
// ==========================================
pub struct ImportationService {
    config: SyncConfig,
}

impl ImportationService {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn content_type(&self) -> &str {
        &self.config.content_type
    }

    // ==========================================
    // 暂存
    // ==========================================

    /// 清空本内容类型的暂存记录
    pub fn initialize_work(&self, dao: &ContentDao<'_>) -> RepositoryResult<usize> {
        let cleared = dao.clear_work(self.content_type())?;
        debug!(content_type = %self.content_type(), cleared, "暂存表已清空");
        Ok(cleared)
    }

    /// 暂存一批导入值的 {id, digest}
    pub fn register_work(&self, dao: &ContentDao<'_>, values: &[ImportationValue]) -> RepositoryResult<usize> {
        dao.append_work(
            self.content_type(),
            values.iter().map(|v| (v.key(), v.content.digest())),
        )
    }

    // ==========================================
    // 导入值构造
    // ==========================================

    /// 从源记录中取标识（转换结果缺失时的回退，也用于失败结果的定位）
    pub fn source_id(&self, source: &RawRecord) -> Option<String> {
        source
            .get(&self.config.id_field)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// 转换成功的字段映射 → 导入值
    ///
    /// # 参数
    /// - fields: 转换输出字段
    /// - source: 原始记录（随导入值一起保留）
    /// - on_failure: 校验失败回调；失败时返回 None
    ///
    /// # 校验
    /// - 标识缺失/空白/超长
    /// - 日期或标志位无法解析、有效期起点晚于终点
    /// - 必填属性缺失
    pub fn to_importation_value<F>(
        &self,
        fields: BTreeMap<String, String>,
        source: RawRecord,
        ctx: &SyncContext,
        mut on_failure: F,
    ) -> Option<ImportationValue>
    where
        F: FnMut(ValidationFailure),
    {
        let id = fields
            .get(&self.config.id_field)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| self.source_id(&source));

        let mut fail = |content_id: Option<String>, reason: String, source: RawRecord| -> Option<ImportationValue> {
            warn!(run_id = %ctx.run_id, content_id = ?content_id, reason = %reason, "记录校验失败");
            on_failure(ValidationFailure {
                content_id,
                reason,
                source,
            });
            None
        };

        let Some(id) = id else {
            return fail(None, "Missing id".to_string(), source);
        };
        if id.chars().count() > MAX_ID_LENGTH {
            return fail(
                Some(id),
                format!("Id exceeds {} characters", MAX_ID_LENGTH),
                source,
            );
        }

        let field = |name: &str| fields.get(name).map(String::as_str);

        let enabled = match parse_flag(field(reserved_fields::ENABLED)) {
            Ok(v) => v.unwrap_or(true),
            Err(raw) => return fail(Some(id), format!("Invalid flag in enabled: {}", raw), source),
        };
        let validity_ignored = match parse_flag(field(reserved_fields::VALIDITY_IGNORED)) {
            Ok(v) => v.unwrap_or(false),
            Err(raw) => {
                return fail(Some(id), format!("Invalid flag in validity_ignored: {}", raw), source)
            }
        };
        let valid_from = match parse_instant(field(reserved_fields::VALID_FROM)) {
            Ok(v) => v,
            Err(raw) => return fail(Some(id), format!("Invalid date in valid_from: {}", raw), source),
        };
        let valid_to = match parse_instant(field(reserved_fields::VALID_TO)) {
            Ok(v) => v,
            Err(raw) => return fail(Some(id), format!("Invalid date in valid_to: {}", raw), source),
        };
        if let (Some(from), Some(to)) = (valid_from, valid_to) {
            if from > to {
                return fail(Some(id), "Validity start is after end".to_string(), source);
            }
        }

        let deletion_raw = field(&self.config.deletion_field).or_else(|| source.get(&self.config.deletion_field));
        let deletion_requested = match parse_flag(deletion_raw) {
            Ok(v) => v.unwrap_or(false),
            Err(raw) => {
                return fail(
                    Some(id),
                    format!("Invalid flag in {}: {}", self.config.deletion_field, raw),
                    source,
                )
            }
        };

        let is_reserved = |name: &str| {
            name == self.config.id_field
                || name == self.config.deletion_field
                || name == reserved_fields::ENABLED
                || name == reserved_fields::VALID_FROM
                || name == reserved_fields::VALID_TO
                || name == reserved_fields::VALIDITY_IGNORED
        };
        let properties: BTreeMap<String, String> = fields
            .iter()
            .filter(|(name, _)| !is_reserved(name.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // 删除请求不要求必填属性
        if !deletion_requested {
            if let Some(missing) = self
                .config
                .required_properties
                .iter()
                .find(|p| properties.get(*p).map_or(true, |v| v.trim().is_empty()))
            {
                return fail(Some(id), format!("Missing required property: {}", missing), source);
            }
        }

        let validity = Validity {
            from: valid_from,
            to: valid_to,
            ignored: validity_ignored,
        };
        let value = ImportationValue::new(ContentValue::new(id, enabled, validity, properties), source);
        Some(if deletion_requested {
            value.requesting_deletion()
        } else {
            value
        })
    }

    /// 导入值 → 内容映射（按标识去重，超过内存阈值溢出）
    pub fn to_content_map<I>(&self, values: I, spill_dir: &Path) -> ContentMapResult<ImportationContentMap>
    where
        I: IntoIterator<Item = ImportationValue>,
    {
        let map = ContentMap::build(
            values.into_iter().map(|v| (v.key().to_string(), v)),
            spill_dir,
            self.config.memory_threshold,
            ImportationValueCodec::new(),
        )?;
        info!(
            content_type = %self.content_type(),
            keys = map.len(),
            duplicates = map.extra_duplicate_count(),
            spilled = map.spilled_entries(),
            "内容映射已构建"
        );
        Ok(map)
    }

    /// 增量构造内容映射（导入值逐条到达时使用）
    pub fn content_map_builder(&self, spill_dir: &Path) -> ContentMapResult<ImportationContentMapBuilder> {
        ContentMapBuilder::new(spill_dir, self.config.memory_threshold, ImportationValueCodec::new())
    }

    // ==========================================
    // 差异计算与应用
    // ==========================================

    /// 待登记的导入值: 新增 ∪ 摘要变化的更新
    ///
    /// # 参数
    /// - staged: 已暂存的非删除导入值（键 = 标识）
    ///
    /// # 返回
    /// - 按 staged 键顺序；更新及复活墓碑的新增附带库中实体（prior）
    pub fn get_to_be_registered(
        &self,
        dao: &ContentDao<'_>,
        staged: &BTreeMap<String, ImportationValue>,
    ) -> RepositoryResult<Vec<ImportationValue>> {
        let ct = self.content_type();
        let ids: Vec<&str> = staged
            .iter()
            .filter(|(_, v)| !v.deletion_requested)
            .map(|(k, _)| k.as_str())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let additions = dao.additions(ct, &ids)?;
        let addition_refs: Vec<&str> = additions.iter().map(String::as_str).collect();

        // 新增中可能包含逻辑删除的墓碑，需要继承其版本
        let mut priors: HashMap<String, ContentEntity> = dao
            .find_by_ids(ct, &addition_refs)?
            .into_iter()
            .map(|e| (e.content_id.clone(), e))
            .collect();
        let revived = priors.len();
        let mut pending: HashSet<String> = additions.iter().cloned().collect();

        let updates = dao.updates(ct, &ids)?;
        let update_count = updates.len();
        for entity in updates {
            pending.insert(entity.content_id.clone());
            priors.insert(entity.content_id.clone(), entity);
        }

        let result: Vec<ImportationValue> = staged
            .iter()
            .filter(|(id, value)| pending.contains(id.as_str()) && !value.deletion_requested)
            .map(|(id, value)| value.clone().with_prior(priors.remove(id)))
            .collect();

        debug!(
            content_type = %ct,
            staged = ids.len(),
            additions = additions.len(),
            revived,
            updates = update_count,
            "差异计算完成"
        );
        Ok(result)
    }

    /// 登记（插入或合并，乐观锁）
    pub fn register(
        &self,
        dao: &ContentDao<'_>,
        value: &ImportationValue,
        ctx: &SyncContext,
    ) -> RepositoryResult<ContentEntity> {
        let entity = ContentEntity::from_value(self.content_type(), &value.content, value.prior.as_ref(), ctx);
        match value.prior {
            Some(_) => dao.merge(&entity)?,
            None => dao.insert(&entity)?,
        }
        Ok(entity)
    }

    /// 逻辑删除（乐观锁）
    pub fn delete(
        &self,
        dao: &ContentDao<'_>,
        entity: &ContentEntity,
        ctx: &SyncContext,
    ) -> RepositoryResult<ContentEntity> {
        dao.soft_delete(entity, &ctx.stamp(), ctx.now)
    }

    /// 重建: 重新计算存活行的 active / digest，并重建属性聚合表
    pub fn rebuild(&self, dao: &ContentDao<'_>, ctx: &SyncContext) -> RepositoryResult<RebuildSummary> {
        let ct = self.content_type();
        let mut refreshed = 0;

        for entity in dao.live_entities(ct)? {
            let value = entity.to_value();
            let active = value.is_active(ctx.now);
            if active != entity.active || value.digest() != entity.digest {
                let updated = ContentEntity {
                    active,
                    digest: value.digest().to_string(),
                    ..entity
                };
                dao.update_derived(&updated)?;
                refreshed += 1;
            }
        }

        let properties = dao.rebuild_dependents(ct)?;
        info!(content_type = %ct, refreshed, properties, "重建完成");
        Ok(RebuildSummary {
            refreshed,
            properties,
        })
    }
}
