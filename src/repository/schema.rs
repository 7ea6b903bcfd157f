// ==========================================
// 通用数据访问层 - 审计列建表辅助
// ==========================================
// 持久化形态: 主键 + created_at / updated_at / deleted_at(可空) / version
// 时间戳以定宽 RFC 3339 文本存储 (见 condition::format_timestamp)
// ==========================================

use crate::repository::condition::validate_identifier;
use crate::repository::error::RepositoryResult;

/// 审计列 DDL 片段 (拼接在业务列之后)
pub const AUDIT_COLUMNS_DDL: &str = "created_at TEXT NOT NULL, \
updated_at TEXT NOT NULL, \
deleted_at TEXT, \
version INTEGER NOT NULL DEFAULT 1";

/// 软删除过滤用的部分索引
pub fn deleted_at_index_ddl(table: &str) -> RepositoryResult<String> {
    validate_identifier(table)?;
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_deleted_at ON {table}(deleted_at)",
        table = table
    ))
}

/// 生成可审计表的建表语句
///
/// `columns` 为主键与业务列定义, 例如 `["id INTEGER PRIMARY KEY AUTOINCREMENT", "name TEXT NOT NULL"]`。
pub fn audited_table_ddl(table: &str, columns: &[&str]) -> RepositoryResult<String> {
    validate_identifier(table)?;
    let mut parts: Vec<&str> = columns.to_vec();
    parts.push(AUDIT_COLUMNS_DDL);
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({});\n{};",
        table,
        parts.join(", "),
        deleted_at_index_ddl(table)?
    ))
}
