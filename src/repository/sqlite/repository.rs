// ==========================================
// SQLite 后端 - 通用仓储实现
// ==========================================
// 职责: 以 Entity 元数据驱动的增删改查
// 红线: 不含业务逻辑; 所有值参数化绑定
// 写入管线: 审计钩子 → 参数化 SQL → 存储值回写实体
// 版本号: update 在 SQL 中无条件 +1 并回写存储值; update_checked 额外比较版本
// ==========================================

use super::builder::SqliteQueryBuilder;
use super::{build_count, build_select, FromRow, SqlFragment};
use crate::context::RequestContext;
use crate::db::Database;
use crate::repository::base::{BaseRepository, TransactionalRepository};
use crate::repository::builder::QueryOptions;
use crate::repository::condition::{Condition, Value};
use crate::repository::entity::{
    now_micros, Auditable, Entity, AUDIT_COLUMNS, DELETED_AT_COLUMN, UPDATED_AT_COLUMN,
    VERSION_COLUMN,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::hooks::HookRegistry;
use crate::repository::page::{normalize_page, PageRequest, PageResult};
use crate::repository::queryable::QueryableRepository;
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::fmt;
use std::marker::PhantomData;

const BATCH_SAVEPOINT: &str = "soliton_create_batch";

// ==========================================
// SqliteRepository
// ==========================================
/// 任意实体的 SQLite 仓储
///
/// 只持有数据库句柄; 克隆后共享同一个连接池。
pub struct SqliteRepository<T> {
    db: Database,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SqliteRepository<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SqliteRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteRepository")
            .field("entity", &std::any::type_name::<T>())
            .field("db", &self.db)
            .finish()
    }
}

impl<T: Entity + FromRow> SqliteRepository<T> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ===== 扩展操作 =====

    /// 根据主键查询 (包含已软删除的记录)
    pub fn get_by_id_with_deleted(&self, ctx: &RequestContext, id: &T::Id) -> RepositoryResult<Option<T>> {
        let options = QueryOptions {
            include_deleted: true,
            ..QueryOptions::with_conditions(&[Condition::eq(T::PRIMARY_KEY, id.clone())])
        };
        Ok(self.fetch(ctx, &options)?.into_iter().next())
    }

    /// 带版本比较的更新 (乐观锁)
    ///
    /// # 并发控制
    /// 以实体当前的版本号作为期望值, 与存储中的版本不一致时拒绝写入
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: 版本不匹配 (其他调用方已更新)
    /// - `RepositoryError::NotFound`: 记录不存在或已软删除
    /// - `RepositoryError::InvalidEntity`: 实体不可审计
    pub fn update_checked(&self, ctx: &RequestContext, entity: &mut T) -> RepositoryResult<()> {
        if !T::AUDITED {
            return Err(RepositoryError::InvalidEntity(format!(
                "{} 不可审计, 无法进行版本比较",
                T::TABLE
            )));
        }

        let _perf = self.db.perf_guard(T::TABLE, "update_checked");
        let hooks = self.db.hooks();
        self.db.run(ctx, |conn| {
            let snapshot = AuditSnapshot::take(entity);
            let result = Self::update_compare_and_swap(conn, hooks, entity, snapshot.version);
            if result.is_err() {
                snapshot.restore(entity);
            }
            result
        })?;

        tracing::debug!(table = T::TABLE, id = ?entity.id(), "row updated with version check");
        Ok(())
    }

    /// 恢复软删除的记录 (存活记录视为无操作)
    ///
    /// # 错误
    /// - `RepositoryError::NotFound`: 主键不存在
    pub fn restore(&self, ctx: &RequestContext, id: &T::Id) -> RepositoryResult<()> {
        if !T::AUDITED {
            return Err(RepositoryError::InvalidEntity(format!(
                "{} 不可审计, 没有软删除记录",
                T::TABLE
            )));
        }

        let sql = format!(
            "UPDATE {table} SET {deleted} = NULL, {updated} = ?, {version} = {version} + 1 \
             WHERE {pk} = ? AND {deleted} IS NOT NULL",
            table = T::TABLE,
            deleted = DELETED_AT_COLUMN,
            updated = UPDATED_AT_COLUMN,
            version = VERSION_COLUMN,
            pk = T::PRIMARY_KEY
        );
        let params: Vec<Value> = vec![now_micros().into(), id.clone().into()];

        let _perf = self.db.perf_guard(T::TABLE, "restore");
        let restored = self.db.run(ctx, |conn| {
            let changed = conn.prepare_cached(&sql)?.execute(params_from_iter(params.iter()))?;
            if changed == 0 && !Self::row_exists(conn, id)? {
                return Err(Self::not_found(id));
            }
            Ok(changed)
        })?;

        tracing::debug!(table = T::TABLE, id = ?id, restored, "row restored");
        Ok(())
    }

    // ===== 读取 =====

    pub(crate) fn fetch(&self, ctx: &RequestContext, options: &QueryOptions) -> RepositoryResult<Vec<T>> {
        let stmt = build_select::<T>(options)?;
        let _perf = self.db.perf_guard(T::TABLE, "fetch");
        let items = self.db.run(ctx, |conn| {
            let mut prepared = conn.prepare_cached(&stmt.sql)?;
            let rows = prepared.query_map(params_from_iter(stmt.params.iter()), |row| T::from_row(row))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })?;
        tracing::debug!(table = T::TABLE, rows = items.len(), "rows fetched");
        Ok(items)
    }

    pub(crate) fn count_rows(&self, ctx: &RequestContext, options: &QueryOptions) -> RepositoryResult<i64> {
        let stmt = build_count::<T>(options)?;
        let _perf = self.db.perf_guard(T::TABLE, "count");
        self.db.run(ctx, |conn| {
            let n: i64 = conn
                .prepare_cached(&stmt.sql)?
                .query_row(params_from_iter(stmt.params.iter()), |row| row.get(0))?;
            Ok(n)
        })
    }

    /// 分页: 先计数, 再按推导的 offset/limit 取数
    pub(crate) fn fetch_page(
        &self,
        ctx: &RequestContext,
        options: &QueryOptions,
        page: i64,
        size: i64,
    ) -> RepositoryResult<PageResult<T>> {
        let _perf = self.db.perf_guard(T::TABLE, "page");
        let (page, size) = normalize_page(page, size);

        let total = self.count_rows(ctx, &options.for_count())?;
        let items = if total == 0 {
            Vec::new()
        } else {
            self.fetch(ctx, &options.for_page(page, size))?
        };
        Ok(PageResult::new(items, total, page, size))
    }

    fn row_exists(conn: &Connection, id: &T::Id) -> RepositoryResult<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE {} = ? LIMIT 1", T::TABLE, T::PRIMARY_KEY);
        let key: Value = id.clone().into();
        let found = conn
            .prepare_cached(&sql)?
            .query_row([&key], |_row| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn not_found(id: &T::Id) -> RepositoryError {
        RepositoryError::NotFound {
            entity: T::TABLE.to_string(),
            id: format!("{:?}", id),
        }
    }

    // ===== 写入 =====

    fn data_values(entity: &T) -> RepositoryResult<Vec<Value>> {
        let values = entity.values();
        if values.len() != T::COLUMNS.len() {
            return Err(RepositoryError::InvalidEntity(format!(
                "{}: values() 返回 {} 个值, COLUMNS 声明 {} 列",
                T::TABLE,
                values.len(),
                T::COLUMNS.len()
            )));
        }
        Ok(values)
    }

    fn audit_record(entity: &T) -> RepositoryResult<&dyn Auditable> {
        entity.auditable().ok_or_else(|| {
            RepositoryError::InvalidEntity(format!("{} 声明 AUDITED 但未提供审计字段", T::TABLE))
        })
    }

    fn insert_statement(entity: &mut T) -> RepositoryResult<SqlFragment> {
        let generated = matches!(entity.generated_key_mut(), Some(key) if *key == 0);

        let mut columns: Vec<&str> = Vec::with_capacity(T::COLUMNS.len() + 5);
        let mut params: Vec<Value> = Vec::with_capacity(T::COLUMNS.len() + 5);
        if !generated {
            columns.push(T::PRIMARY_KEY);
            params.push(entity.id().into());
        }
        columns.extend_from_slice(T::COLUMNS);
        params.extend(Self::data_values(entity)?);

        if T::AUDITED {
            let audit = Self::audit_record(entity)?;
            columns.extend_from_slice(&AUDIT_COLUMNS);
            params.push(audit.created_at().into());
            params.push(audit.updated_at().into());
            params.push(audit.deleted_at().into());
            params.push(audit.version().into());
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(SqlFragment {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                T::TABLE,
                columns.join(", "),
                placeholders
            ),
            params,
        })
    }

    /// 插入一行: 审计钩子 → INSERT → 回写自增主键
    fn insert_row(conn: &Connection, hooks: &HookRegistry, entity: &mut T) -> RepositoryResult<()> {
        hooks.before_insert(entity)?;
        let stmt = Self::insert_statement(entity)?;
        conn.prepare_cached(&stmt.sql)?
            .execute(params_from_iter(stmt.params.iter()))?;

        if let Some(key) = entity.generated_key_mut() {
            if *key == 0 {
                *key = conn.last_insert_rowid();
            }
        }
        Ok(())
    }

    /// UPDATE 语句; `expected_version` 为 Some 时追加版本比较
    fn update_statement(entity: &T, expected_version: Option<i64>) -> RepositoryResult<SqlFragment> {
        let mut assignments: Vec<String> = T::COLUMNS.iter().map(|c| format!("{} = ?", c)).collect();
        let mut params = Self::data_values(entity)?;

        if !T::AUDITED {
            if assignments.is_empty() {
                assignments.push(format!("{pk} = {pk}", pk = T::PRIMARY_KEY));
            }
            params.push(entity.id().into());
            return Ok(SqlFragment {
                sql: format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    T::TABLE,
                    assignments.join(", "),
                    T::PRIMARY_KEY
                ),
                params,
            });
        }

        let audit = Self::audit_record(entity)?;
        assignments.push(format!("{} = ?", UPDATED_AT_COLUMN));
        params.push(audit.updated_at().into());
        assignments.push(format!("{v} = {v} + 1", v = VERSION_COLUMN));
        params.push(entity.id().into());

        let mut sql = format!(
            "UPDATE {} SET {} WHERE {} = ? AND {} IS NULL",
            T::TABLE,
            assignments.join(", "),
            T::PRIMARY_KEY,
            DELETED_AT_COLUMN
        );
        if let Some(expected) = expected_version {
            sql.push_str(&format!(" AND {} = ?", VERSION_COLUMN));
            params.push(expected.into());
        }
        sql.push_str(&format!(" RETURNING {}", VERSION_COLUMN));
        Ok(SqlFragment { sql, params })
    }

    /// 更新存活记录; 返回 false 表示没有匹配的行
    fn update_existing(conn: &Connection, hooks: &HookRegistry, entity: &mut T) -> RepositoryResult<bool> {
        hooks.before_update(entity)?;
        let stmt = Self::update_statement(entity, None)?;

        if !T::AUDITED {
            let changed = conn
                .prepare_cached(&stmt.sql)?
                .execute(params_from_iter(stmt.params.iter()))?;
            return Ok(changed > 0);
        }

        let stored: Option<i64> = conn
            .prepare_cached(&stmt.sql)?
            .query_row(params_from_iter(stmt.params.iter()), |row| row.get(0))
            .optional()?;
        match stored {
            Some(version) => {
                if let Some(record) = entity.auditable_mut() {
                    record.set_version(version);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 整行更新, 没有存活记录时退化为插入
    fn upsert_row(conn: &Connection, hooks: &HookRegistry, entity: &mut T) -> RepositoryResult<()> {
        let snapshot = AuditSnapshot::take(entity);
        let result = match Self::update_existing(conn, hooks, entity) {
            Ok(true) => Ok(()),
            Ok(false) => {
                snapshot.restore(entity);
                Self::insert_row(conn, hooks, entity)
            }
            Err(err) => Err(err),
        };
        if result.is_err() {
            snapshot.restore(entity);
        }
        result
    }

    fn update_compare_and_swap(
        conn: &Connection,
        hooks: &HookRegistry,
        entity: &mut T,
        expected: i64,
    ) -> RepositoryResult<()> {
        hooks.before_update(entity)?;
        let stmt = Self::update_statement(entity, Some(expected))?;

        let stored: Option<i64> = conn
            .prepare_cached(&stmt.sql)?
            .query_row(params_from_iter(stmt.params.iter()), |row| row.get(0))
            .optional()?;
        if let Some(version) = stored {
            if let Some(record) = entity.auditable_mut() {
                record.set_version(version);
            }
            return Ok(());
        }

        // 判断是记录不存在还是版本冲突
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? AND {} IS NULL",
            VERSION_COLUMN,
            T::TABLE,
            T::PRIMARY_KEY,
            DELETED_AT_COLUMN
        );
        let id = entity.id();
        let key: Value = id.clone().into();
        let actual: Option<i64> = conn
            .prepare_cached(&sql)?
            .query_row([&key], |row| row.get(0))
            .optional()?;

        match actual {
            Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                entity: T::TABLE.to_string(),
                id: format!("{:?}", id),
                expected,
                actual,
            }),
            None => Err(Self::not_found(&id)),
        }
    }
}

// ==========================================
// AuditSnapshot - 写入失败时恢复实体状态
// ==========================================
struct AuditSnapshot {
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: i64,
    key: Option<i64>,
}

impl AuditSnapshot {
    fn take<T: Entity>(entity: &mut T) -> Self {
        let key = entity.generated_key_mut().map(|k| *k);
        match entity.auditable() {
            Some(audit) => Self {
                created_at: audit.created_at(),
                updated_at: audit.updated_at(),
                version: audit.version(),
                key,
            },
            None => Self {
                created_at: None,
                updated_at: None,
                version: 0,
                key,
            },
        }
    }

    fn restore<T: Entity>(&self, entity: &mut T) {
        if let (Some(key), Some(slot)) = (self.key, entity.generated_key_mut()) {
            *slot = key;
        }
        if let Some(audit) = entity.auditable_mut() {
            audit.set_created_at(self.created_at);
            audit.set_updated_at(self.updated_at);
            audit.set_version(self.version);
        }
    }
}

// ==========================================
// 接口实现
// ==========================================

impl<T: Entity + FromRow> TransactionalRepository for SqliteRepository<T> {
    fn begin_tx(&self, ctx: &RequestContext) -> RepositoryResult<RequestContext> {
        self.db.begin(ctx)
    }

    fn commit(&self, ctx: &RequestContext) -> RepositoryResult<()> {
        self.db.commit(ctx)
    }

    fn rollback(&self, ctx: &RequestContext) -> RepositoryResult<()> {
        self.db.rollback(ctx)
    }
}

impl<T: Entity + FromRow> BaseRepository<T> for SqliteRepository<T> {
    fn create(&self, ctx: &RequestContext, entity: &mut T) -> RepositoryResult<()> {
        let _perf = self.db.perf_guard(T::TABLE, "create");
        let hooks = self.db.hooks();
        self.db.run(ctx, |conn| {
            let snapshot = AuditSnapshot::take(entity);
            let result = Self::insert_row(conn, hooks, entity);
            if result.is_err() {
                snapshot.restore(entity);
            }
            result
        })?;
        tracing::debug!(table = T::TABLE, id = ?entity.id(), "row created");
        Ok(())
    }

    fn create_batch(&self, ctx: &RequestContext, entities: &mut [T]) -> RepositoryResult<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let _perf = self.db.perf_guard(T::TABLE, "create_batch");
        let hooks = self.db.hooks();
        let count = entities.len();
        self.db.run(ctx, |conn| {
            let snapshots: Vec<AuditSnapshot> = entities.iter_mut().map(AuditSnapshot::take).collect();

            conn.execute_batch(&format!("SAVEPOINT {}", BATCH_SAVEPOINT))?;
            let result = entities
                .iter_mut()
                .try_for_each(|entity| Self::insert_row(conn, hooks, entity));

            match result {
                Ok(()) => {
                    conn.execute_batch(&format!("RELEASE {}", BATCH_SAVEPOINT))?;
                    Ok(())
                }
                Err(err) => {
                    let undo = format!("ROLLBACK TO {sp}; RELEASE {sp}", sp = BATCH_SAVEPOINT);
                    if let Err(undo_err) = conn.execute_batch(&undo) {
                        tracing::warn!(table = T::TABLE, "batch savepoint rollback failed: {}", undo_err);
                    }
                    for (entity, snapshot) in entities.iter_mut().zip(&snapshots) {
                        snapshot.restore(entity);
                    }
                    Err(err)
                }
            }
        })?;

        tracing::debug!(table = T::TABLE, count, "rows created in batch");
        Ok(())
    }

    fn get_by_id(&self, ctx: &RequestContext, id: &T::Id) -> RepositoryResult<Option<T>> {
        let options = QueryOptions::with_conditions(&[Condition::eq(T::PRIMARY_KEY, id.clone())]);
        Ok(self.fetch(ctx, &options)?.into_iter().next())
    }

    fn update(&self, ctx: &RequestContext, entity: &mut T) -> RepositoryResult<()> {
        let _perf = self.db.perf_guard(T::TABLE, "update");
        let hooks = self.db.hooks();
        self.db.run(ctx, |conn| Self::upsert_row(conn, hooks, entity))?;
        tracing::debug!(table = T::TABLE, id = ?entity.id(), "row updated");
        Ok(())
    }

    fn delete(&self, ctx: &RequestContext, id: &T::Id) -> RepositoryResult<()> {
        let key: Value = id.clone().into();
        let stmt = if T::AUDITED {
            SqlFragment {
                sql: format!(
                    "UPDATE {table} SET {deleted} = ? WHERE {pk} = ? AND {deleted} IS NULL",
                    table = T::TABLE,
                    deleted = DELETED_AT_COLUMN,
                    pk = T::PRIMARY_KEY
                ),
                params: vec![now_micros().into(), key],
            }
        } else {
            SqlFragment {
                sql: format!("DELETE FROM {} WHERE {} = ?", T::TABLE, T::PRIMARY_KEY),
                params: vec![key],
            }
        };

        let _perf = self.db.perf_guard(T::TABLE, "delete");
        let affected = self.db.run(ctx, |conn| {
            Ok(conn
                .prepare_cached(&stmt.sql)?
                .execute(params_from_iter(stmt.params.iter()))?)
        })?;
        tracing::debug!(table = T::TABLE, id = ?id, affected, soft = T::AUDITED, "row deleted");
        Ok(())
    }

    fn list(&self, ctx: &RequestContext) -> RepositoryResult<Vec<T>> {
        self.fetch(ctx, &QueryOptions::new())
    }

    fn page(&self, ctx: &RequestContext, request: &PageRequest) -> RepositoryResult<PageResult<T>> {
        let options = QueryOptions {
            conditions: request.conditions.clone(),
            order_by: request.order_by.clone(),
            ..QueryOptions::default()
        };
        self.fetch_page(ctx, &options, request.page, request.size)
    }
}

impl<T: Entity + FromRow> QueryableRepository<T> for SqliteRepository<T> {
    type Query = SqliteQueryBuilder<T>;

    fn find_where(&self, ctx: &RequestContext, conditions: &[Condition]) -> RepositoryResult<Vec<T>> {
        self.fetch(ctx, &QueryOptions::with_conditions(conditions))
    }

    fn count(&self, ctx: &RequestContext, conditions: &[Condition]) -> RepositoryResult<i64> {
        self.count_rows(ctx, &QueryOptions::with_conditions(conditions))
    }

    fn query(&self) -> SqliteQueryBuilder<T> {
        SqliteQueryBuilder::new(self.clone())
    }
}
