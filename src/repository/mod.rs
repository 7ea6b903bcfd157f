// ==========================================
// 通用数据访问层 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 为任意实体提供统一的增删改查、过滤、分页、
//       乐观并发版本与事务作用域, 屏蔽数据库细节
// 约束: 所有查询使用参数化, 防止 SQL 注入
// ==========================================

pub mod base;
pub mod builder;
pub mod condition;
pub mod entity;
pub mod error;
pub mod hooks;
pub mod page;
pub mod queryable;
pub mod schema;
pub mod sqlite;

// 重导出核心类型
pub use base::{BaseRepository, TransactionalRepository};
pub use builder::{QueryBuilder, QueryOptions};
pub use condition::{format_timestamp, Condition, ConditionValue, Operator, Value};
pub use entity::{now_micros, AuditFields, Auditable, Entity};
pub use error::{ErrorKind, RepositoryError, RepositoryResult};
pub use hooks::{AuditHook, HookRegistry, WriteHook};
pub use page::{OrderRule, PageRequest, PageResult, DEFAULT_PAGE_SIZE};
pub use queryable::QueryableRepository;
pub use sqlite::{read_audit_fields, read_timestamp, FromRow, SqliteQueryBuilder, SqliteRepository};
