// ==========================================
// 通用数据访问层 - 写入钩子 (审计/版本)
// ==========================================
// 职责: 在每次插入/更新前拦截可审计实体
// - 插入前: 未设置的时间戳置为当前时间; 版本号 0 → 1
// - 更新前: 更新时间置为当前时间; 版本号无条件 +1
// 约束: 在 Database 上注册一次, 按能力 (Entity::auditable_mut) 分派, 不按类型注册
// ==========================================

use crate::repository::entity::{now_micros, Auditable, Entity};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, RwLock};

/// 时钟
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// ==========================================
// WriteHook - 写入管线拦截器
// ==========================================
/// `record` 为 `None` 表示实体不具备审计能力
pub trait WriteHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn before_insert(
        &self,
        _table: &str,
        _record: Option<&mut dyn Auditable>,
    ) -> RepositoryResult<()> {
        Ok(())
    }

    fn before_update(
        &self,
        _table: &str,
        _record: Option<&mut dyn Auditable>,
    ) -> RepositoryResult<()> {
        Ok(())
    }
}

// ==========================================
// AuditHook - 审计/版本钩子
// ==========================================
pub struct AuditHook {
    clock: Clock,
}

impl AuditHook {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(now_micros),
        }
    }

    /// 注入时钟 (测试用)
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }
}

impl Default for AuditHook {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuditHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditHook").finish_non_exhaustive()
    }
}

impl WriteHook for AuditHook {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn before_insert(&self, _table: &str, record: Option<&mut dyn Auditable>) -> RepositoryResult<()> {
        let Some(record) = record else {
            return Ok(());
        };

        let now = (self.clock)();
        if record.created_at().is_none() {
            record.set_created_at(Some(now));
        }
        if record.updated_at().is_none() {
            record.set_updated_at(Some(now));
        }
        if record.version() <= 0 {
            record.set_version(1);
        }
        Ok(())
    }

    fn before_update(&self, _table: &str, record: Option<&mut dyn Auditable>) -> RepositoryResult<()> {
        let Some(record) = record else {
            return Ok(());
        };

        record.set_updated_at(Some((self.clock)()));
        record.increment_version();
        Ok(())
    }
}

// ==========================================
// HookRegistry - 钩子注册表
// ==========================================
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn WriteHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册钩子 (同名钩子会被替换)
    pub fn register(&self, hook: Arc<dyn WriteHook>) -> RepositoryResult<()> {
        let mut hooks = self
            .hooks
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        hooks.retain(|h| h.name() != hook.name());
        tracing::debug!(hook = hook.name(), "write hook registered");
        hooks.push(hook);
        Ok(())
    }

    pub fn names(&self) -> RepositoryResult<Vec<&'static str>> {
        Ok(self.snapshot()?.iter().map(|h| h.name()).collect())
    }

    fn snapshot(&self) -> RepositoryResult<Vec<Arc<dyn WriteHook>>> {
        self.hooks
            .read()
            .map(|hooks| hooks.clone())
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 声明 (AUDITED) 与能力 (auditable) 必须一致
    fn check_capability<T: Entity>(entity: &T) -> RepositoryResult<()> {
        match (T::AUDITED, entity.auditable().is_some()) {
            (true, false) => Err(RepositoryError::InvalidEntity(format!(
                "{} 声明 AUDITED 但未提供审计字段",
                T::TABLE
            ))),
            (false, true) => Err(RepositoryError::InvalidEntity(format!(
                "{} 提供了审计字段但未声明 AUDITED, 审计列不会被持久化",
                T::TABLE
            ))),
            _ => Ok(()),
        }
    }

    /// 插入前依次执行所有钩子
    pub fn before_insert<T: Entity>(&self, entity: &mut T) -> RepositoryResult<()> {
        Self::check_capability(entity)?;
        for hook in self.snapshot()? {
            hook.before_insert(T::TABLE, entity.auditable_mut())?;
        }
        Ok(())
    }

    /// 更新前依次执行所有钩子
    pub fn before_update<T: Entity>(&self, entity: &mut T) -> RepositoryResult<()> {
        Self::check_capability(entity)?;
        for hook in self.snapshot()? {
            hook.before_update(T::TABLE, entity.auditable_mut())?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names().unwrap_or_default())
            .finish()
    }
}
