// ==========================================
// 通用数据访问层 - SQLite 后端
// ==========================================
// 职责: 把实体契约/查询选项翻译为参数化 SQL
// - 行映射 (FromRow) 与审计字段读取
// - SELECT / COUNT 语句构建
// 约束: 可审计表默认追加 deleted_at IS NULL
// 约束: 有 LIMIT/OFFSET 时追加主键升序作为最终排序键
// ==========================================

pub mod builder;
pub mod predicate;
pub mod repository;

pub use builder::SqliteQueryBuilder;
pub use predicate::{render_condition, render_conditions, SqlFragment};
pub use repository::SqliteRepository;

use crate::repository::builder::QueryOptions;
use crate::repository::condition::Value;
use crate::repository::entity::{
    AuditFields, Entity, AUDIT_COLUMNS, CREATED_AT_COLUMN, DELETED_AT_COLUMN, UPDATED_AT_COLUMN,
    VERSION_COLUMN,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

// ==========================================
// FromRow - 行映射
// ==========================================
/// 从查询结果行构造实体
///
/// 结果行包含: 主键列, `COLUMNS` 中的全部业务列 (未投影的为 NULL),
/// 以及可审计表的四个审计列。建议按列名读取。
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// 读取 RFC 3339 文本时间戳 (NULL → None)
pub fn read_timestamp(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    match raw {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| {
                let idx = row.as_ref().column_index(column).unwrap_or_default();
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            }),
    }
}

/// 读取四个审计列
pub fn read_audit_fields(row: &Row<'_>) -> rusqlite::Result<AuditFields> {
    Ok(AuditFields {
        created_at: read_timestamp(row, CREATED_AT_COLUMN)?,
        updated_at: read_timestamp(row, UPDATED_AT_COLUMN)?,
        deleted_at: read_timestamp(row, DELETED_AT_COLUMN)?,
        version: row.get(VERSION_COLUMN)?,
    })
}

// ==========================================
// 语句构建
// ==========================================

/// 校验投影字段属于实体的业务列
fn check_projection<T: Entity>(fields: &[String]) -> RepositoryResult<()> {
    for field in fields {
        let known = field == T::PRIMARY_KEY
            || T::COLUMNS.contains(&field.as_str())
            || (T::AUDITED && AUDIT_COLUMNS.contains(&field.as_str()));
        if !known {
            return Err(RepositoryError::InvalidCondition(format!(
                "{} 没有列 `{}`",
                T::TABLE,
                field
            )));
        }
    }
    Ok(())
}

/// SELECT 列表: 主键 + 业务列 (未投影的读为 NULL) + 审计列
fn select_columns<T: Entity>(fields: &[String]) -> String {
    let mut columns = vec![T::PRIMARY_KEY.to_string()];
    for column in T::COLUMNS {
        if fields.is_empty() || fields.iter().any(|f| f == column) {
            columns.push((*column).to_string());
        } else {
            columns.push(format!("NULL AS {}", column));
        }
    }
    if T::AUDITED {
        columns.extend(AUDIT_COLUMNS.iter().map(|c| c.to_string()));
    }
    columns.join(", ")
}

/// WHERE 子句 (含软删除过滤); 无条件时返回空片段
fn where_clause<T: Entity>(options: &QueryOptions) -> RepositoryResult<SqlFragment> {
    let mut clauses = Vec::new();
    if T::AUDITED && !options.include_deleted {
        clauses.push(format!("{} IS NULL", DELETED_AT_COLUMN));
    }

    let predicate = render_conditions(&options.conditions)?;
    if !predicate.is_empty() {
        clauses.push(predicate.sql);
    }

    if clauses.is_empty() {
        return Ok(SqlFragment::default());
    }
    Ok(SqlFragment {
        sql: format!(" WHERE {}", clauses.join(" AND ")),
        params: predicate.params,
    })
}

fn order_clause<T: Entity>(options: &QueryOptions) -> String {
    let mut keys: Vec<String> = options
        .order_by
        .iter()
        .map(|rule| format!("{} {}", rule.field, if rule.desc { "DESC" } else { "ASC" }))
        .collect();

    let keyed_by_pk = options.order_by.iter().any(|rule| rule.field == T::PRIMARY_KEY);
    if options.is_windowed() && !keyed_by_pk {
        keys.push(format!("{} ASC", T::PRIMARY_KEY));
    }

    if keys.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", keys.join(", "))
    }
}

fn to_sql_integer(n: u64) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

/// 构建 SELECT 语句
pub(crate) fn build_select<T: Entity>(options: &QueryOptions) -> RepositoryResult<SqlFragment> {
    options.validate()?;
    check_projection::<T>(&options.fields)?;

    let filter = where_clause::<T>(options)?;
    let mut sql = format!(
        "SELECT {} FROM {}{}{}",
        select_columns::<T>(&options.fields),
        T::TABLE,
        filter.sql,
        order_clause::<T>(options)
    );
    let mut params = filter.params;

    match (options.limit, options.offset) {
        (Some(limit), Some(offset)) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(to_sql_integer(limit));
            params.push(to_sql_integer(offset));
        }
        (Some(limit), None) => {
            sql.push_str(" LIMIT ?");
            params.push(to_sql_integer(limit));
        }
        (None, Some(offset)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(to_sql_integer(offset));
        }
        (None, None) => {}
    }

    Ok(SqlFragment { sql, params })
}

/// 构建 COUNT 语句 (只考虑条件与软删除过滤)
pub(crate) fn build_count<T: Entity>(options: &QueryOptions) -> RepositoryResult<SqlFragment> {
    options.validate()?;
    let filter = where_clause::<T>(options)?;
    Ok(SqlFragment {
        sql: format!("SELECT COUNT(*) FROM {}{}", T::TABLE, filter.sql),
        params: filter.params,
    })
}
