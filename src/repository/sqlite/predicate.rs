// ==========================================
// SQLite 后端 - 条件到谓词的映射
// ==========================================
// 映射 (精确):
//   =  !=  >  >=  <  <=  LIKE  IN (...)  NOT IN (...)
//   BETWEEN ? AND ?  IS NULL  IS NOT NULL
// 所有值以参数绑定, 字段名经标识符校验后拼接
// 空 IN → 恒假; 空 NOT IN → 恒真
// ==========================================

use crate::repository::condition::{Condition, ConditionValue, Operator, Value};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// SQL 片段 + 按顺序绑定的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// 单个条件 → 谓词
pub fn render_condition(condition: &Condition) -> RepositoryResult<SqlFragment> {
    condition.validate()?;

    let field = condition.field();
    let op = condition.operator();
    let fragment = match (op, condition.value()) {
        (op, ConditionValue::Single(value)) if op.is_single_valued() => SqlFragment {
            sql: format!("{} {} ?", field, op.as_sql()),
            params: vec![value.clone()],
        },
        (Operator::In, ConditionValue::List(values)) if values.is_empty() => SqlFragment::plain("1 = 0"),
        (Operator::NotIn, ConditionValue::List(values)) if values.is_empty() => SqlFragment::plain("1 = 1"),
        (Operator::In | Operator::NotIn, ConditionValue::List(values)) => SqlFragment {
            sql: format!("{} {} ({})", field, op.as_sql(), placeholders(values.len())),
            params: values.clone(),
        },
        (Operator::Between, ConditionValue::List(values)) => SqlFragment {
            sql: format!("{} BETWEEN ? AND ?", field),
            params: values.clone(),
        },
        (Operator::IsNull | Operator::IsNotNull, ConditionValue::None) => {
            SqlFragment::plain(format!("{} {}", field, op.as_sql()))
        }
        (op, value) => {
            return Err(RepositoryError::InvalidCondition(format!(
                "field={}: 操作符 {} 不接受值 {:?}",
                field, op, value
            )))
        }
    };
    Ok(fragment)
}

/// 条件列表 → AND 组合的谓词 (空列表返回空片段)
pub fn render_conditions(conditions: &[Condition]) -> RepositoryResult<SqlFragment> {
    let mut clauses = Vec::with_capacity(conditions.len());
    let mut params = Vec::new();
    for condition in conditions {
        let fragment = render_condition(condition)?;
        clauses.push(fragment.sql);
        params.extend(fragment.params);
    }
    Ok(SqlFragment {
        sql: clauses.join(" AND "),
        params,
    })
}
