use crate::db::open_sqlite_connection;
use crate::repository::content_repo::dao::ContentDao;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

// ==========================================
// ContentRepository - 内容仓储（连接持有者）
// ==========================================
// 事务边界由调用方（门面）通过 with_transaction 决定，
// 闭包内拿到的 ContentDao 绑定在当前事务上
pub struct ContentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ContentRepository {
    /// 创建新的内容仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 按数据库路径打开
    pub fn from_path(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// 共享连接（审计仓储等同库组件使用）
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在单个事务内执行闭包
    ///
    /// # 返回
    /// - 闭包返回 Ok: 提交事务
    /// - 闭包返回 Err: 回滚事务并原样返回错误
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&ContentDao<'_>) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let result = {
            let dao = ContentDao::new(&tx);
            f(&dao)
        };

        match result {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(value)
            }
            Err(err) => {
                debug!("事务闭包返回错误，回滚");
                // Transaction 析构即回滚
                drop(tx);
                Err(err)
            }
        }
    }
}
