// ==========================================
// 通用数据访问层 - SQLite 连接与事务作用域
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键/busy_timeout/journal_mode)
// - 连接池: 空闲连接复用, 打开数受 max_open_conns 约束, 每个事务独占一个连接
// - 可中断执行: 取消令牌/截止时间触发时中断正在执行的语句
// ==========================================

use crate::config::DatabaseConfig;
use crate::context::RequestContext;
use crate::perf::{self, PerfGuard};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::hooks::{AuditHook, HookRegistry, WriteHook};
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::fmt;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 进度回调间隔 (虚拟机指令数)
const PROGRESS_HANDLER_OPS: i32 = 1_000;

/// 等待连接归还时的轮询间隔 (期间检查取消/截止时间)
const POOL_WAIT_SLICE: Duration = Duration::from_millis(20);

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection, config: &DatabaseConfig) -> rusqlite::Result<()> {
    if config.foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    }
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if let Some(mode) = config.journal_mode.as_deref() {
        let applied: String =
            conn.pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))?;
        tracing::debug!(requested = mode, applied = %applied, "journal_mode configured");
    }
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(config: &DatabaseConfig) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(&config.path)?;
    configure_sqlite_connection(&conn, config)?;
    perf::install_statement_trace(&mut conn, config.trace_sql);
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

// ==========================================
// 可中断执行
// ==========================================
struct Interrupt {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Interrupt {
    fn fired(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// 在连接上执行操作; 取消令牌或截止时间触发时中断语句并返回 `Cancelled`
fn run_interruptible<R>(
    conn: &Connection,
    ctx: &RequestContext,
    op: impl FnOnce(&Connection) -> RepositoryResult<R>,
) -> RepositoryResult<R> {
    ctx.check()?;

    let watch = AssertUnwindSafe(Interrupt {
        token: ctx.cancellation_token().clone(),
        deadline: ctx.deadline(),
    });
    conn.progress_handler(PROGRESS_HANDLER_OPS, Some(move || watch.fired()));
    let result = op(conn);
    conn.progress_handler(PROGRESS_HANDLER_OPS, None::<fn() -> bool>);

    result.map_err(|err| {
        if err.is_interrupt() {
            RepositoryError::Cancelled(ctx.interrupt_reason().unwrap_or("语句被中断").to_string())
        } else {
            err
        }
    })
}

// ==========================================
// Database - 连接池句柄
// ==========================================
/// 数据库句柄
///
/// 克隆代价很低 (共享同一个连接池与钩子注册表)。
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    id: Uuid,
    config: DatabaseConfig,
    slow_threshold: Option<Duration>,
    pool: Mutex<PoolState>,
    released: Condvar, // 连接归还或关闭时通知等待者
    hooks: HookRegistry,
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize, // 已打开连接数 (空闲 + 借出)
}

impl DatabaseInner {
    fn lock_pool(&self) -> RepositoryResult<MutexGuard<'_, PoolState>> {
        self.pool.lock().map_err(lock_error)
    }

    /// 归还一个打开名额 (连接已关闭或未能打开)
    fn release_slot(&self) {
        if let Ok(mut state) = self.pool.lock() {
            state.open = state.open.saturating_sub(1);
        }
        self.released.notify_one();
    }
}

fn lock_error<T>(err: PoisonError<T>) -> RepositoryError {
    RepositoryError::LockError(err.to_string())
}

impl Database {
    /// 打开数据库并注册审计钩子
    pub fn open(config: DatabaseConfig) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(&config)
            .map_err(|e| RepositoryError::DatabaseConnectionError(format!("{}: {}", config.path, e)))?;

        let db = Self {
            inner: Arc::new(DatabaseInner {
                id: Uuid::new_v4(),
                slow_threshold: perf::slow_threshold(config.slow_sql_ms),
                config,
                pool: Mutex::new(PoolState {
                    idle: vec![conn],
                    open: 1,
                }),
                released: Condvar::new(),
                hooks: HookRegistry::new(),
            }),
        };
        db.register_hook(Arc::new(AuditHook::new()))?;

        tracing::info!(path = %db.inner.config.path, "database opened");
        Ok(db)
    }

    /// 按路径打开 (其余配置取默认值)
    pub fn open_path(path: impl Into<String>) -> RepositoryResult<Self> {
        Self::open(DatabaseConfig::for_path(path))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// 注册写入钩子
    pub fn register_hook(&self, hook: Arc<dyn WriteHook>) -> RepositoryResult<()> {
        self.inner.hooks.register(hook)
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    /// 慢操作阈值 (None = 不告警)
    pub fn slow_threshold(&self) -> Option<Duration> {
        self.inner.slow_threshold
    }

    /// 为仓储操作计时 (使用本数据库的慢操作阈值)
    pub fn perf_guard(&self, table: &'static str, op: &'static str) -> PerfGuard {
        PerfGuard::start(table, op, self.inner.slow_threshold)
    }

    /// 当前空闲连接数
    pub fn idle_connections(&self) -> usize {
        self.inner.pool.lock().map(|state| state.idle.len()).unwrap_or(0)
    }

    /// 当前打开的连接数 (空闲 + 借出)
    pub fn open_connections(&self) -> usize {
        self.inner.pool.lock().map(|state| state.open).unwrap_or(0)
    }

    /// 获取连接 (优先复用空闲连接)
    ///
    /// 打开数达到 `max_open_conns` 时等待其他调用方归还, 最长 `busy_timeout_ms`。
    pub fn acquire(&self) -> RepositoryResult<PooledConnection> {
        self.checkout(&RequestContext::new())
    }

    /// 获取连接; 等待期间上下文取消或超过截止时间返回 `Cancelled`
    fn checkout(&self, ctx: &RequestContext) -> RepositoryResult<PooledConnection> {
        let max_open = self.inner.config.max_open_conns;
        let give_up_at = Instant::now() + Duration::from_millis(self.inner.config.busy_timeout_ms);
        let mut state = self.inner.lock_pool()?;

        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(self.pooled(conn));
            }

            if max_open == 0 || state.open < max_open {
                state.open += 1;
                drop(state);
                return match open_sqlite_connection(&self.inner.config) {
                    Ok(conn) => Ok(self.pooled(conn)),
                    Err(e) => {
                        self.inner.release_slot();
                        Err(RepositoryError::DatabaseConnectionError(e.to_string()))
                    }
                };
            }

            ctx.check()?;
            let now = Instant::now();
            if now >= give_up_at {
                return Err(RepositoryError::DatabaseConnectionError(format!(
                    "连接池已满: {} 个连接均在使用中",
                    max_open
                )));
            }
            let wait = (give_up_at - now).min(POOL_WAIT_SLICE);
            state = self
                .inner
                .released
                .wait_timeout(state, wait)
                .map_err(lock_error)?
                .0;
        }
    }

    fn pooled(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }

    /// 执行 DDL/批量脚本 (遵循上下文中的事务)
    pub fn execute_batch(&self, ctx: &RequestContext, sql: &str) -> RepositoryResult<()> {
        self.run(ctx, |conn| Ok(conn.execute_batch(sql)?))
    }

    /// 在上下文对应的连接上执行操作
    ///
    /// - 事务上下文: 使用事务独占的连接
    /// - 非事务上下文: 从连接池取连接, 用完归还
    pub(crate) fn run<R>(
        &self,
        ctx: &RequestContext,
        op: impl FnOnce(&Connection) -> RepositoryResult<R>,
    ) -> RepositoryResult<R> {
        match ctx.transaction() {
            Some(tx) => {
                self.ensure_owned(tx)?;
                tx.run(ctx, op)
            }
            None => {
                let conn = self.checkout(ctx)?;
                run_interruptible(&conn, ctx, op)
            }
        }
    }

    // ===== 事务生命周期 =====

    /// 开启事务, 返回绑定事务作用域的新上下文
    ///
    /// 嵌套开启 (上下文已处于事务) 直接拒绝。
    pub fn begin(&self, ctx: &RequestContext) -> RepositoryResult<RequestContext> {
        if let Some(tx) = ctx.transaction() {
            return Err(RepositoryError::NestedTransaction(tx.id().to_string()));
        }

        let conn = self.checkout(ctx)?;
        run_interruptible(&conn, ctx, |c| Ok(c.execute_batch("BEGIN IMMEDIATE")?))?;

        let scope = TxScope {
            id: Uuid::new_v4(),
            database_id: self.inner.id,
            conn: Mutex::new(Some(conn)),
        };
        tracing::debug!(tx_id = %scope.id, "transaction started");
        Ok(ctx.with_transaction(Arc::new(scope)))
    }

    /// 提交事务
    ///
    /// 上下文已取消时回滚并返回 `Cancelled`。
    pub fn commit(&self, ctx: &RequestContext) -> RepositoryResult<()> {
        let tx = ctx.transaction().ok_or(RepositoryError::NoActiveTransaction)?;
        self.ensure_owned(tx)?;

        if let Err(err) = ctx.check() {
            tx.finish(false)?;
            return Err(err);
        }
        tx.finish(true)
    }

    /// 回滚事务
    pub fn rollback(&self, ctx: &RequestContext) -> RepositoryResult<()> {
        let tx = ctx.transaction().ok_or(RepositoryError::NoActiveTransaction)?;
        self.ensure_owned(tx)?;
        tx.finish(false)
    }

    fn ensure_owned(&self, tx: &TxScope) -> RepositoryResult<()> {
        if tx.database_id != self.inner.id {
            return Err(RepositoryError::DatabaseTransactionError(format!(
                "事务 {} 属于其他数据库实例",
                tx.id
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.config.path)
            .field("idle", &self.idle_connections())
            .field("open", &self.open_connections())
            .finish_non_exhaustive()
    }
}

// ==========================================
// PooledConnection - 池化连接
// ==========================================
/// Drop 时归还连接池 (超出空闲上限则关闭并释放打开名额)
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<DatabaseInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        // 残留事务不能带回连接池
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("rollback of leaked transaction failed: {}", e);
                drop(conn);
                self.pool.release_slot();
                return;
            }
        }

        match self.pool.pool.lock() {
            Ok(mut state) => {
                if state.idle.len() < self.pool.config.max_idle_conns {
                    state.idle.push(conn);
                } else {
                    state.open = state.open.saturating_sub(1);
                }
            }
            Err(_) => {
                drop(conn);
            }
        }
        self.pool.released.notify_one();
    }
}

// ==========================================
// TxScope - 事务作用域
// ==========================================
/// 事务独占一个连接, 直到提交/回滚; 未结束即被丢弃时自动回滚
pub(crate) struct TxScope {
    id: Uuid,
    database_id: Uuid,
    conn: Mutex<Option<PooledConnection>>,
}

impl TxScope {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    fn run<R>(
        &self,
        ctx: &RequestContext,
        op: impl FnOnce(&Connection) -> RepositoryResult<R>,
    ) -> RepositoryResult<R> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let conn = guard.as_ref().ok_or(RepositoryError::NoActiveTransaction)?;
        run_interruptible(conn, ctx, op)
    }

    /// 结束事务; 已结束的事务返回 `NoActiveTransaction`
    fn finish(&self, commit: bool) -> RepositoryResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .take()
            .ok_or(RepositoryError::NoActiveTransaction)?;

        if !commit {
            conn.execute_batch("ROLLBACK")?;
            tracing::debug!(tx_id = %self.id, "transaction rolled back");
            return Ok(());
        }

        match conn.execute_batch("COMMIT") {
            Ok(()) => {
                tracing::debug!(tx_id = %self.id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                if !conn.is_autocommit() {
                    if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                        tracing::warn!(tx_id = %self.id, "rollback after failed commit failed: {}", rollback_err);
                    }
                }
                Err(e.into())
            }
        }
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        let leaked = match self.conn.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(conn) = leaked {
            tracing::warn!(tx_id = %self.id, "transaction dropped without commit/rollback, rolling back");
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(tx_id = %self.id, "rollback failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_db() -> (NamedTempFile, Database) {
        let file = NamedTempFile::new().unwrap();
        let db = Database::open_path(file.path().to_str().unwrap()).unwrap();
        (file, db)
    }

    #[test]
    fn test_open_registers_audit_hook() {
        let (_file, db) = temp_db();
        assert_eq!(db.hooks().names().unwrap(), vec!["audit"]);
        assert_eq!(db.idle_connections(), 1);
    }

    #[test]
    fn test_connections_return_to_pool() {
        let (_file, db) = temp_db();
        {
            let a = db.acquire().unwrap();
            let b = db.acquire().unwrap();
            assert!(a.is_autocommit() && b.is_autocommit());
            assert_eq!(db.idle_connections(), 0);
        }
        assert_eq!(db.idle_connections(), 2);
    }

    fn temp_db_with(max_open_conns: usize, busy_timeout_ms: u64) -> (NamedTempFile, Database) {
        let file = NamedTempFile::new().unwrap();
        let config = DatabaseConfig {
            max_open_conns,
            busy_timeout_ms,
            ..DatabaseConfig::for_path(file.path().to_str().unwrap())
        };
        (file, Database::open(config).unwrap())
    }

    #[test]
    fn test_open_connections_are_capped() {
        let (_file, db) = temp_db_with(1, 50);
        let held = db.acquire().unwrap();
        assert_eq!(db.open_connections(), 1);

        let err = db.acquire().err().unwrap();
        assert!(matches!(err, RepositoryError::DatabaseConnectionError(_)));
        assert_eq!(db.open_connections(), 1);

        drop(held);
        assert!(db.acquire().is_ok());
        assert_eq!(db.open_connections(), 1);
    }

    #[test]
    fn test_waiter_receives_returned_connection() {
        let (_file, db) = temp_db_with(1, 5_000);
        let held = db.acquire().unwrap();

        let waiter = {
            let db = db.clone();
            std::thread::spawn(move || db.acquire().map(|conn| conn.is_autocommit()))
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap().unwrap());
        assert_eq!(db.open_connections(), 1);
    }

    #[test]
    fn test_waiting_for_connection_honours_deadline() {
        let (_file, db) = temp_db_with(1, 5_000);
        let _held = db.acquire().unwrap();

        let started = Instant::now();
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(40));
        let result = db.run(&ctx, |conn| Ok(conn.is_autocommit()));
        assert!(matches!(result, Err(RepositoryError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_surplus_connections_are_closed() {
        let file = NamedTempFile::new().unwrap();
        let config = DatabaseConfig {
            max_idle_conns: 1,
            ..DatabaseConfig::for_path(file.path().to_str().unwrap())
        };
        let db = Database::open(config).unwrap();
        {
            let _a = db.acquire().unwrap();
            let _b = db.acquire().unwrap();
            let _c = db.acquire().unwrap();
            assert_eq!(db.open_connections(), 3);
        }
        assert_eq!(db.idle_connections(), 1);
        assert_eq!(db.open_connections(), 1);
    }

    #[test]
    fn test_slow_threshold_is_per_database() {
        let quick_file = NamedTempFile::new().unwrap();
        let quick = Database::open(DatabaseConfig {
            slow_sql_ms: Some(5),
            ..DatabaseConfig::for_path(quick_file.path().to_str().unwrap())
        })
        .unwrap();
        let silent_file = NamedTempFile::new().unwrap();
        let silent = Database::open(DatabaseConfig {
            slow_sql_ms: Some(0),
            ..DatabaseConfig::for_path(silent_file.path().to_str().unwrap())
        })
        .unwrap();

        // 后打开的数据库不影响先打开的
        assert_eq!(quick.slow_threshold(), Some(Duration::from_millis(5)));
        assert_eq!(silent.slow_threshold(), None);
    }

    #[test]
    fn test_connection_pragmas_applied() {
        let (_file, db) = temp_db();
        let conn = db.acquire().unwrap();
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(fk, 1);
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_commit_without_transaction_is_rejected() {
        let (_file, db) = temp_db();
        let ctx = RequestContext::new();
        assert!(matches!(db.commit(&ctx), Err(RepositoryError::NoActiveTransaction)));
        assert!(matches!(db.rollback(&ctx), Err(RepositoryError::NoActiveTransaction)));
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let (_file, db) = temp_db();
        let tx_ctx = db.begin(&RequestContext::new()).unwrap();
        assert!(matches!(
            db.begin(&tx_ctx),
            Err(RepositoryError::NestedTransaction(_))
        ));
        db.rollback(&tx_ctx).unwrap();
        assert!(matches!(db.rollback(&tx_ctx), Err(RepositoryError::NoActiveTransaction)));
    }

    #[test]
    fn test_transaction_from_other_database_is_rejected() {
        let (_f1, db1) = temp_db();
        let (_f2, db2) = temp_db();
        let tx_ctx = db1.begin(&RequestContext::new()).unwrap();
        assert!(matches!(
            db2.commit(&tx_ctx),
            Err(RepositoryError::DatabaseTransactionError(_))
        ));
        db1.commit(&tx_ctx).unwrap();
    }

    #[test]
    fn test_cancelled_context_interrupts_long_statement() {
        let (_file, db) = temp_db();
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));
        let result = db.run(&ctx, |conn| {
            let n: i64 = conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
                [],
                |r| r.get(0),
            )?;
            Ok(n)
        });
        assert!(matches!(result, Err(RepositoryError::Cancelled(_))));
    }

    #[test]
    fn test_read_schema_version_absent() {
        let (_file, db) = temp_db();
        let conn = db.acquire().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
