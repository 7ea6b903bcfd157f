// ==========================================
// 通用数据访问层 - 配置层
// ==========================================
// 职责: 数据库连接配置 (路径/busy_timeout/连接池/PRAGMA/慢 SQL 阈值)
// 来源: 默认值 < JSON < 环境变量
// ==========================================

pub mod database_config;

// 重导出核心配置
pub use database_config::{default_db_path, DatabaseConfig};
