// ==========================================
// 内容同步系统 - 审计结果记录器
// ==========================================
// 职责: 接收每条记录的成功/失败结果，在块边界落盘
// 红线: 只写不读；flush 在块事务提交之后调用，不与内容事务争锁
// ==========================================

use crate::domain::outcome::ImportOutcome;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_record_repo::ImportRecordRepository;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::debug;

// ==========================================
// OutcomeRecorder Trait
// ==========================================
pub trait OutcomeRecorder: Send {
    fn record(&mut self, outcome: ImportOutcome);

    /// 落盘已缓冲的结果
    fn flush(&mut self) -> RepositoryResult<()>;
}

// ==========================================
// InMemoryRecorder - 内存记录器（嵌入方/测试使用）
// ==========================================
// 克隆共享同一份结果列表，便于运行结束后检查
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    pending: Vec<ImportOutcome>,
    flushed: Arc<Mutex<Vec<ImportOutcome>>>,
    flushes: Arc<Mutex<usize>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已落盘的结果（按记录顺序）
    pub fn outcomes(&self) -> Vec<ImportOutcome> {
        self.flushed.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// 非空 flush 的次数
    pub fn flush_count(&self) -> usize {
        self.flushes.lock().map(|n| *n).unwrap_or_default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl OutcomeRecorder for InMemoryRecorder {
    fn record(&mut self, outcome: ImportOutcome) {
        self.pending.push(outcome);
    }

    fn flush(&mut self) -> RepositoryResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        // 锁失败时保留待落盘结果
        let mut flushed = self
            .flushed
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let mut flushes = self
            .flushes
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        flushed.append(&mut self.pending);
        *flushes += 1;
        Ok(())
    }
}

// ==========================================
// SqliteRecorder - import_record 表记录器
// ==========================================
pub struct SqliteRecorder {
    repo: ImportRecordRepository,
    run_id: String,
    content_type: String,
    pending: Vec<ImportOutcome>,
    written: usize,
}

impl SqliteRecorder {
    pub fn new(conn: Arc<Mutex<rusqlite::Connection>>, run_id: &str, content_type: &str) -> Self {
        Self {
            repo: ImportRecordRepository::new(conn),
            run_id: run_id.to_string(),
            content_type: content_type.to_string(),
            pending: Vec::new(),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl OutcomeRecorder for SqliteRecorder {
    fn record(&mut self, outcome: ImportOutcome) {
        self.pending.push(outcome);
    }

    fn flush(&mut self) -> RepositoryResult<()> {
        let n = self
            .repo
            .insert_batch(&self.run_id, &self.content_type, &self.pending, Utc::now())?;
        self.pending.clear();
        self.written += n;
        if n > 0 {
            debug!(run_id = %self.run_id, written = n, "审计结果已落盘");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SuccessKind;

    #[test]
    fn test_in_memory_recorder_flush() {
        let mut recorder = InMemoryRecorder::new();
        let view = recorder.clone();

        recorder.record(ImportOutcome::success(SuccessKind::Register, "u1", None));
        assert!(view.outcomes().is_empty());
        assert_eq!(recorder.pending_len(), 1);

        recorder.flush().unwrap();
        recorder.flush().unwrap();
        assert_eq!(view.outcomes().len(), 1);
        assert_eq!(view.flush_count(), 1);
    }

    #[test]
    fn test_in_memory_recorder_poisoned_lock_is_reported() {
        let mut recorder = InMemoryRecorder::new();
        let shared = recorder.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.flushed.lock().unwrap();
            panic!("poison");
        })
        .join();

        recorder.record(ImportOutcome::success(SuccessKind::Register, "u1", None));
        let err = recorder.flush().unwrap_err();
        assert!(matches!(err, RepositoryError::LockError(_)));
        assert_eq!(recorder.pending_len(), 1);
    }

    #[test]
    fn test_sqlite_recorder_writes_on_flush() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let mut recorder = SqliteRecorder::new(Arc::clone(&conn), "run-1", "person");
        recorder.record(ImportOutcome::success(SuccessKind::Deletion, "u1", None));

        let repo = ImportRecordRepository::new(conn);
        assert_eq!(repo.count_by_run("run-1").unwrap(), 0);
        recorder.flush().unwrap();
        assert_eq!(repo.count_by_run("run-1").unwrap(), 1);
        assert_eq!(recorder.written(), 1);
    }
}
