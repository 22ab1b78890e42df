use crate::domain::content::ContentEntity;
use crate::repository::content_repo::ContentFilter;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

/// 单条 IN (...) 查询的 id 个数上限
const ID_BATCH: usize = 500;

const ENTITY_COLUMNS: &str = r#"
    c.content_type, c.content_id, c.enabled, c.valid_from, c.valid_to,
    c.validity_ignored, c.active, c.digest, c.properties_json,
    c.created_by, c.created_at, c.updated_by, c.updated_at,
    c.version, c.deleted, c.deleted_at, c.deleted_by
"#;

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(|s| parse_ts(idx, s)).transpose()
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 将数据库行映射为 ContentEntity
fn map_row(row: &Row) -> rusqlite::Result<ContentEntity> {
    let enabled: i64 = row.get(2)?;
    let valid_from: Option<String> = row.get(3)?;
    let valid_to: Option<String> = row.get(4)?;
    let validity_ignored: i64 = row.get(5)?;
    let active: i64 = row.get(6)?;
    let properties_json: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(12)?;
    let deleted: i64 = row.get(14)?;
    let deleted_at: Option<String> = row.get(15)?;

    let properties: BTreeMap<String, String> = serde_json::from_str(&properties_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(ContentEntity {
        content_type: row.get(0)?,
        content_id: row.get(1)?,
        enabled: enabled != 0,
        valid_from: parse_opt_ts(3, valid_from)?,
        valid_to: parse_opt_ts(4, valid_to)?,
        validity_ignored: validity_ignored != 0,
        active: active != 0,
        digest: row.get(7)?,
        properties,
        created_by: row.get(9)?,
        created_at: parse_ts(10, &created_at)?,
        updated_by: row.get(11)?,
        updated_at: parse_ts(12, &updated_at)?,
        version: row.get(13)?,
        deleted: deleted != 0,
        deleted_at: parse_opt_ts(15, deleted_at)?,
        deleted_by: row.get(16)?,
    })
}

// ==========================================
// ContentDao - 绑定到当前事务的数据访问对象
// ==========================================
// 生命周期不超过所属事务；不开启、不提交事务
pub struct ContentDao<'c> {
    conn: &'c Connection,
}

impl<'c> ContentDao<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // ==========================================
    // 暂存表 content_work
    // ==========================================

    /// 清空某内容类型的暂存记录
    pub fn clear_work(&self, content_type: &str) -> RepositoryResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM content_work WHERE content_type = ?1",
            params![content_type],
        )?;
        Ok(n)
    }

    /// 追加暂存记录 {id, digest}
    pub fn append_work<'a, I>(&self, content_type: &str, rows: I) -> RepositoryResult<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO content_work (content_type, content_id, digest) VALUES (?1, ?2, ?3)",
        )?;
        let mut count = 0;
        for (id, digest) in rows {
            count += stmt.execute(params![content_type, id, digest])?;
        }
        Ok(count)
    }

    pub fn count_work(&self, content_type: &str) -> RepositoryResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM content_work WHERE content_type = ?1",
            params![content_type],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    // ==========================================
    // 差异查询
    // ==========================================

    /// 新增: 给定 id 中已暂存但没有存活内容行的
    pub fn additions(&self, content_type: &str, ids: &[&str]) -> RepositoryResult<Vec<String>> {
        let mut found = Vec::new();
        for batch in ids.chunks(ID_BATCH) {
            let sql = format!(
                r#"
                SELECT w.content_id
                FROM content_work w
                WHERE w.content_type = ?1
                  AND w.content_id IN ({})
                  AND NOT EXISTS (
                      SELECT 1 FROM content c
                      WHERE c.content_type = w.content_type
                        AND c.content_id = w.content_id
                        AND c.deleted = 0
                  )
                "#,
                placeholders(2, batch.len())
            );
            let values = std::iter::once(content_type).chain(batch.iter().copied());
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(rows);
        }
        Ok(found)
    }

    /// 更新: 给定 id 中存活且摘要与暂存摘要不同的
    pub fn updates(&self, content_type: &str, ids: &[&str]) -> RepositoryResult<Vec<ContentEntity>> {
        let mut found = Vec::new();
        for batch in ids.chunks(ID_BATCH) {
            let sql = format!(
                r#"
                SELECT {}
                FROM content c
                JOIN content_work w
                  ON w.content_type = c.content_type AND w.content_id = c.content_id
                WHERE c.content_type = ?1
                  AND c.deleted = 0
                  AND c.digest <> w.digest
                  AND c.content_id IN ({})
                "#,
                ENTITY_COLUMNS,
                placeholders(2, batch.len())
            );
            let values = std::iter::once(content_type).chain(batch.iter().copied());
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(rows);
        }
        Ok(found)
    }

    /// 按 id 查询实体（含逻辑删除的墓碑）
    pub fn find_by_ids(&self, content_type: &str, ids: &[&str]) -> RepositoryResult<Vec<ContentEntity>> {
        let mut found = Vec::new();
        for batch in ids.chunks(ID_BATCH) {
            let sql = format!(
                "SELECT {} FROM content c WHERE c.content_type = ?1 AND c.content_id IN ({})",
                ENTITY_COLUMNS,
                placeholders(2, batch.len())
            );
            let values = std::iter::once(content_type).chain(batch.iter().copied());
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(rows);
        }
        Ok(found)
    }

    pub fn find(&self, content_type: &str, content_id: &str) -> RepositoryResult<Option<ContentEntity>> {
        let sql = format!(
            "SELECT {} FROM content c WHERE c.content_type = ?1 AND c.content_id = ?2",
            ENTITY_COLUMNS
        );
        let entity = self
            .conn
            .query_row(&sql, params![content_type, content_id], map_row)
            .optional()?;
        Ok(entity)
    }

    // ==========================================
    // 隐式删除候选（存活、未暂存、满足过滤条件）
    // ==========================================

    fn lost_sql(&self, select: &str, content_type: &str, filter: &ContentFilter) -> (String, Vec<Value>) {
        let (extra, mut extra_values) = filter.to_sql(2);
        let sql = format!(
            r#"
            SELECT {}
            FROM content c
            WHERE c.content_type = ?1
              AND c.deleted = 0
              AND NOT EXISTS (
                  SELECT 1 FROM content_work w
                  WHERE w.content_type = c.content_type AND w.content_id = c.content_id
              ){}
            "#,
            select, extra
        );
        let mut values = vec![Value::from(content_type.to_string())];
        values.append(&mut extra_values);
        (sql, values)
    }

    pub fn count_lost(&self, content_type: &str, filter: &ContentFilter) -> RepositoryResult<usize> {
        let (sql, values) = self.lost_sql("COUNT(*)", content_type, filter);
        let n: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(n as usize)
    }

    /// 取一批隐式删除候选，按 id 排序
    pub fn lost(
        &self,
        content_type: &str,
        filter: &ContentFilter,
        limit: usize,
    ) -> RepositoryResult<Vec<ContentEntity>> {
        let (mut sql, mut values) = self.lost_sql(ENTITY_COLUMNS, content_type, filter);
        sql.push_str(&format!(" ORDER BY c.content_id LIMIT ?{}", values.len() + 1));
        values.push(Value::from(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入新实体
    pub fn insert(&self, entity: &ContentEntity) -> RepositoryResult<()> {
        let properties_json = serde_json::to_string(&entity.properties)?;
        self.conn.execute(
            r#"
            INSERT INTO content (
                content_type, content_id, enabled, valid_from, valid_to,
                validity_ignored, active, digest, properties_json,
                created_by, created_at, updated_by, updated_at,
                version, deleted, deleted_at, deleted_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                entity.content_type,
                entity.content_id,
                entity.enabled,
                entity.valid_from.map(format_ts),
                entity.valid_to.map(format_ts),
                entity.validity_ignored,
                entity.active,
                entity.digest,
                properties_json,
                entity.created_by,
                format_ts(entity.created_at),
                entity.updated_by,
                format_ts(entity.updated_at),
                entity.version,
                entity.deleted,
                entity.deleted_at.map(format_ts),
                entity.deleted_by,
            ],
        )?;
        Ok(())
    }

    /// 合并（更新或复活墓碑）
    ///
    /// # 说明
    /// - 期望库中版本 = entity.version - 1
    /// - 影响行数为 0 → OptimisticLockFailure
    pub fn merge(&self, entity: &ContentEntity) -> RepositoryResult<()> {
        let properties_json = serde_json::to_string(&entity.properties)?;
        let expected_version = entity.version - 1;
        let affected = self.conn.execute(
            r#"
            UPDATE content SET
                enabled = ?3, valid_from = ?4, valid_to = ?5, validity_ignored = ?6,
                active = ?7, digest = ?8, properties_json = ?9,
                updated_by = ?10, updated_at = ?11, version = ?12,
                deleted = ?13, deleted_at = ?14, deleted_by = ?15
            WHERE content_type = ?1 AND content_id = ?2 AND version = ?16
            "#,
            params![
                entity.content_type,
                entity.content_id,
                entity.enabled,
                entity.valid_from.map(format_ts),
                entity.valid_to.map(format_ts),
                entity.validity_ignored,
                entity.active,
                entity.digest,
                properties_json,
                entity.updated_by,
                format_ts(entity.updated_at),
                entity.version,
                entity.deleted,
                entity.deleted_at.map(format_ts),
                entity.deleted_by,
                expected_version,
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::OptimisticLockFailure {
                content_type: entity.content_type.clone(),
                content_id: entity.content_id.clone(),
                expected_version,
            });
        }
        Ok(())
    }

    /// 逻辑删除
    ///
    /// # 返回
    /// - 删除后的实体（version + 1，deleted = true）
    pub fn soft_delete(
        &self,
        entity: &ContentEntity,
        deleted_by: &str,
        deleted_at: DateTime<Utc>,
    ) -> RepositoryResult<ContentEntity> {
        let affected = self.conn.execute(
            r#"
            UPDATE content SET
                deleted = 1, deleted_at = ?3, deleted_by = ?4,
                updated_by = ?4, updated_at = ?3, version = version + 1
            WHERE content_type = ?1 AND content_id = ?2 AND version = ?5 AND deleted = 0
            "#,
            params![
                entity.content_type,
                entity.content_id,
                format_ts(deleted_at),
                deleted_by,
                entity.version,
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::OptimisticLockFailure {
                content_type: entity.content_type.clone(),
                content_id: entity.content_id.clone(),
                expected_version: entity.version,
            });
        }

        Ok(ContentEntity {
            deleted: true,
            deleted_at: Some(deleted_at),
            deleted_by: Some(deleted_by.to_string()),
            updated_by: deleted_by.to_string(),
            updated_at: deleted_at,
            version: entity.version + 1,
            ..entity.clone()
        })
    }

    // ==========================================
    // 重建
    // ==========================================

    pub fn live_entities(&self, content_type: &str) -> RepositoryResult<Vec<ContentEntity>> {
        let sql = format!(
            "SELECT {} FROM content c WHERE c.content_type = ?1 AND c.deleted = 0 ORDER BY c.content_id",
            ENTITY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![content_type], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_live(&self, content_type: &str) -> RepositoryResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM content WHERE content_type = ?1 AND deleted = 0",
            params![content_type],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// 回写派生字段 active / digest（不递增版本，但校验版本）
    pub fn update_derived(&self, entity: &ContentEntity) -> RepositoryResult<()> {
        let affected = self.conn.execute(
            r#"
            UPDATE content SET active = ?3, digest = ?4
            WHERE content_type = ?1 AND content_id = ?2 AND version = ?5
            "#,
            params![
                entity.content_type,
                entity.content_id,
                entity.active,
                entity.digest,
                entity.version,
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::OptimisticLockFailure {
                content_type: entity.content_type.clone(),
                content_id: entity.content_id.clone(),
                expected_version: entity.version,
            });
        }
        Ok(())
    }

    /// 重建属性聚合表 content_property（仅存活行）
    pub fn rebuild_dependents(&self, content_type: &str) -> RepositoryResult<usize> {
        self.conn.execute(
            "DELETE FROM content_property WHERE content_type = ?1",
            params![content_type],
        )?;
        let inserted = self.conn.execute(
            r#"
            INSERT INTO content_property (content_type, content_id, prop_key, prop_value)
            SELECT c.content_type, c.content_id, j.key, CAST(j.value AS TEXT)
            FROM content c, json_each(c.properties_json) j
            WHERE c.content_type = ?1 AND c.deleted = 0
            "#,
            params![content_type],
        )?;
        Ok(inserted)
    }

    pub fn property_values(&self, content_type: &str, content_id: &str) -> RepositoryResult<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare(
            "SELECT prop_key, prop_value FROM content_property WHERE content_type = ?1 AND content_id = ?2",
        )?;
        let rows = stmt
            .query_map(params![content_type, content_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }
}
