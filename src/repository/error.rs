// ==========================================
// 通用数据访问层 - 仓储层错误类型
// ==========================================
// 分类: 未找到 / 约束违反 / 事务状态 / 取消 / 校验 / 引擎错误
// 工具: thiserror 派生宏
// 红线: 仓储层不吞引擎错误，不做重试
// ==========================================

use rusqlite::ffi;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 并发控制错误 =====
    #[error("乐观锁冲突: entity={entity}, id={id}, expected_version={expected}, actual_version={actual}")]
    OptimisticLockFailure {
        entity: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    // ===== 数据库错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    #[error("约束违反: {0}")]
    ConstraintViolation(String),

    #[error("数据库查询失败: {0}")]
    Database(#[source] rusqlite::Error),

    // ===== 事务状态错误 =====
    #[error("上下文中没有活动事务")]
    NoActiveTransaction,

    #[error("不支持嵌套事务: 上下文已绑定事务 {0}")]
    NestedTransaction(String),

    // ===== 取消 =====
    #[error("操作已取消: {0}")]
    Cancelled(String),

    // ===== 校验错误 =====
    #[error("无效的查询条件: {0}")]
    InvalidCondition(String),

    #[error("无效的实体定义: {0}")]
    InvalidEntity(String),

    // ===== 通用错误 =====
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 错误大类，供上层映射为面向用户的响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ConstraintViolation,
    Conflict,
    TransactionState,
    Cancelled,
    Validation,
    Engine,
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound { .. } => ErrorKind::NotFound,
            RepositoryError::UniqueConstraintViolation(_)
            | RepositoryError::ForeignKeyViolation(_)
            | RepositoryError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            RepositoryError::OptimisticLockFailure { .. } => ErrorKind::Conflict,
            RepositoryError::NoActiveTransaction
            | RepositoryError::NestedTransaction(_)
            | RepositoryError::DatabaseTransactionError(_) => ErrorKind::TransactionState,
            RepositoryError::Cancelled(_) => ErrorKind::Cancelled,
            RepositoryError::InvalidCondition(_) | RepositoryError::InvalidEntity(_) => {
                ErrorKind::Validation
            }
            RepositoryError::DatabaseConnectionError(_)
            | RepositoryError::LockError(_)
            | RepositoryError::Database(_)
            | RepositoryError::Other(_) => ErrorKind::Engine,
        }
    }

    /// 是否为语句中断（取消令牌或截止时间触发）
    pub(crate) fn is_interrupt(&self) -> bool {
        matches!(
            self,
            RepositoryError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::OperationInterrupted
        )
    }
}

// 实现 From<rusqlite::Error>
// 约束类错误按扩展错误码归类，其余原样透传
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref e, ref msg) = err {
            if e.code == rusqlite::ErrorCode::ConstraintViolation {
                let message = msg.clone().unwrap_or_else(|| e.to_string());
                return match e.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        RepositoryError::UniqueConstraintViolation(message)
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => RepositoryError::ForeignKeyViolation(message),
                    _ => RepositoryError::ConstraintViolation(message),
                };
            }
        }
        RepositoryError::Database(err)
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
