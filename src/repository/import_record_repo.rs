// ==========================================
// 内容同步系统 - 导入审计记录仓储
// ==========================================
// 对齐: import_record 表
// 红线: 流水线只写不读；find_by_run 仅供审计方查询
// ==========================================

use crate::domain::content::RawRecord;
use crate::domain::outcome::ImportOutcome;
use crate::domain::types::{FailurePhase, SuccessKind};
use crate::repository::content_repo::format_ts;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

const OUTCOME_SUCCESS: &str = "SUCCESS";
const OUTCOME_FAILURE: &str = "FAILURE";

pub struct ImportRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ImportRecordRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量写入审计结果（单事务）
    ///
    /// # 返回
    /// - 写入条数
    pub fn insert_batch(
        &self,
        run_id: &str,
        content_type: &str,
        outcomes: &[ImportOutcome],
        recorded_at: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        if outcomes.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let recorded_at = format_ts(recorded_at);
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO import_record (
                    run_id, content_type, outcome, success_kind, failure_phase,
                    content_id, reason, source_json, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;

            for outcome in outcomes {
                let (tag, kind, phase, reason, source) = match outcome {
                    ImportOutcome::Success { kind, source, .. } => {
                        (OUTCOME_SUCCESS, Some(kind.to_string()), None, None, source)
                    }
                    ImportOutcome::Failure {
                        phase,
                        reason,
                        source,
                        ..
                    } => (
                        OUTCOME_FAILURE,
                        None,
                        Some(phase.to_string()),
                        Some(reason.as_str()),
                        source,
                    ),
                };
                let source_json = source.as_ref().map(serde_json::to_string).transpose()?;

                count += stmt.execute(params![
                    run_id,
                    content_type,
                    tag,
                    kind,
                    phase,
                    outcome.content_id(),
                    reason,
                    source_json,
                    recorded_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    /// 按运行 ID 查询审计结果（写入顺序）
    pub fn find_by_run(&self, run_id: &str) -> RepositoryResult<Vec<ImportOutcome>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT outcome, success_kind, failure_phase, content_id, reason, source_json
            FROM import_record
            WHERE run_id = ?1
            ORDER BY record_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![run_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_by_run(&self, run_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM import_record WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(RepositoryError::FieldValueError {
            field: "import_record".to_string(),
            message,
        }),
    )
}

/// 将数据库行映射为 ImportOutcome
fn map_row(row: &Row) -> rusqlite::Result<ImportOutcome> {
    let tag: String = row.get(0)?;
    let kind: Option<String> = row.get(1)?;
    let phase: Option<String> = row.get(2)?;
    let content_id: Option<String> = row.get(3)?;
    let reason: Option<String> = row.get(4)?;
    let source_json: Option<String> = row.get(5)?;

    let source: Option<RawRecord> = source_json
        .as_deref()
        .map(serde_json::from_str::<RawRecord>)
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;

    match tag.as_str() {
        OUTCOME_SUCCESS => {
            let kind = kind
                .as_deref()
                .map(SuccessKind::from_str)
                .transpose()
                .map_err(|e| conversion_error(1, e))?
                .ok_or_else(|| conversion_error(1, "缺少 success_kind".to_string()))?;
            Ok(ImportOutcome::Success {
                kind,
                content_id: content_id.unwrap_or_default(),
                source,
            })
        }
        _ => {
            let phase = phase
                .as_deref()
                .map(FailurePhase::from_str)
                .transpose()
                .map_err(|e| conversion_error(2, e))?
                .ok_or_else(|| conversion_error(2, "缺少 failure_phase".to_string()))?;
            Ok(ImportOutcome::Failure {
                phase,
                reason: reason.unwrap_or_default(),
                content_id,
                source,
            })
        }
    }
}
