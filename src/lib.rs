// ==========================================
// 通用数据访问层 - 核心库
// ==========================================
// 技术栈: Rust + SQLite (rusqlite, bundled)
// 系统定位: 与存储引擎无关的仓储抽象 + SQLite 实现
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 数据仓储层 - 实体契约/条件/分页/仓储接口/SQLite 实现
pub mod repository;

// 请求上下文 (取消/截止时间/事务作用域)
pub mod context;

// 配置层 - 数据库配置
pub mod config;

// 数据库基础设施（连接池/PRAGMA 统一/事务）
pub mod db;

// 日志系统
pub mod logging;

// 仓储操作计时与 SQL 跟踪
pub mod perf;

// ==========================================
// 重导出核心类型
// ==========================================

pub use config::DatabaseConfig;
pub use context::RequestContext;
pub use db::Database;
pub use repository::{
    AuditFields, Auditable, BaseRepository, Condition, Entity, ErrorKind, FromRow, Operator,
    OrderRule, PageRequest, PageResult, QueryBuilder, QueryableRepository, RepositoryError,
    RepositoryResult, SqliteRepository, TransactionalRepository, Value,
};

// ==========================================
// 常量定义
// ==========================================

// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
