// ==========================================
// 通用数据访问层 - 查询条件模型
// ==========================================
// 职责: 描述单个过滤谓词 (字段, 操作符, 比较值)
// 约束: 条件构造后不可变; 列表中的多个条件以 AND 组合
// 约束: BETWEEN 必须恰好两个值: 同为数值, 或同为 RFC 3339 时间戳
// 约束: IS [NOT] NULL 不携带值
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==========================================
// Operator - 操作符
// ==========================================
// 序列化格式: SQL 拼写 (与谓词映射一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    // 比较操作符
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,

    // 模糊匹配
    #[serde(rename = "LIKE")]
    Like,

    // 集合操作
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,

    // 区间操作
    #[serde(rename = "BETWEEN")]
    Between,

    // 空值检查
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl Operator {
    /// SQL 拼写
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Between => "BETWEEN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// 是否为单值比较类操作符 (含 LIKE)
    pub fn is_single_valued(&self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::NotEqual
                | Operator::GreaterThan
                | Operator::GreaterOrEqual
                | Operator::LessThan
                | Operator::LessOrEqual
                | Operator::Like
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

// ==========================================
// Value - 与引擎无关的标量值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Real(_))
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
        }
    }
}

/// 时间戳统一格式: RFC 3339, 微秒精度, `Z` 结尾 (定宽, 可按字典序比较)
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

macro_rules! impl_integer_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

impl_integer_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Text(format_timestamp(&v))
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

// ==========================================
// ConditionValue - 条件携带的比较值
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    #[default]
    None,
    List(Vec<Value>),
    Single(Value),
}

// ==========================================
// Condition - 查询条件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    field: String,
    operator: Operator,
    #[serde(default)]
    value: ConditionValue,
}

impl Condition {
    /// 创建查询条件 (构造时即校验)
    ///
    /// # 返回
    /// - `Err(InvalidCondition)`: 字段名非法或值与操作符不匹配
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: ConditionValue,
    ) -> RepositoryResult<Self> {
        let condition = Self::unchecked(field, operator, value);
        condition.validate()?;
        Ok(condition)
    }

    /// 区间条件 (值列表来自外部输入时使用)
    pub fn between_values(field: impl Into<String>, values: Vec<Value>) -> RepositoryResult<Self> {
        Self::new(field, Operator::Between, ConditionValue::List(values))
    }

    fn unchecked(field: impl Into<String>, operator: Operator, value: ConditionValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    fn single(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::unchecked(field, operator, ConditionValue::Single(value.into()))
    }

    fn list<I, V>(field: impl Into<String>, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        Self::unchecked(field, operator, ConditionValue::List(values))
    }

    /// 等于条件
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Equal, value)
    }

    /// 不等于条件
    pub fn not_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::NotEqual, value)
    }

    /// 大于条件
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::GreaterThan, value)
    }

    /// 大于等于条件
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::GreaterOrEqual, value)
    }

    /// 小于条件
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::LessThan, value)
    }

    /// 小于等于条件
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::LessOrEqual, value)
    }

    /// 模糊匹配条件
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::single(field, Operator::Like, pattern.into())
    }

    /// 包含条件
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::list(field, Operator::In, values)
    }

    /// 不包含条件
    pub fn not_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::list(field, Operator::NotIn, values)
    }

    /// 区间条件
    pub fn between(
        field: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        Self::unchecked(
            field,
            Operator::Between,
            ConditionValue::List(vec![start.into(), end.into()]),
        )
    }

    /// 为空条件
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::unchecked(field, Operator::IsNull, ConditionValue::None)
    }

    /// 不为空条件
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::unchecked(field, Operator::IsNotNull, ConditionValue::None)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &ConditionValue {
        &self.value
    }

    /// 校验字段名与值的形态
    pub fn validate(&self) -> RepositoryResult<()> {
        validate_identifier(&self.field)?;

        match (self.operator, &self.value) {
            (op, ConditionValue::Single(value)) if op.is_single_valued() => {
                if value.is_null() {
                    return Err(self.invalid("比较值为 NULL, 请使用 is_null/is_not_null"));
                }
                Ok(())
            }
            (Operator::In | Operator::NotIn, ConditionValue::List(_)) => Ok(()),
            (Operator::Between, ConditionValue::List(values)) => self.validate_range(values),
            (Operator::IsNull | Operator::IsNotNull, ConditionValue::None) => Ok(()),
            (op, value) => Err(self.invalid(&format!("操作符 {} 不接受值 {:?}", op, value))),
        }
    }

    fn validate_range(&self, values: &[Value]) -> RepositoryResult<()> {
        let [start, end] = values else {
            return Err(self.invalid(&format!(
                "BETWEEN 需要恰好两个值, 实际 {} 个",
                values.len()
            )));
        };

        let comparable = (start.is_numeric() && end.is_numeric())
            || (is_timestamp_text(start) && is_timestamp_text(end));
        if !comparable {
            return Err(self.invalid(&format!(
                "BETWEEN 边界类型不可比较: {} / {}",
                start.kind_name(),
                end.kind_name()
            )));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> RepositoryError {
        RepositoryError::InvalidCondition(format!("field={}: {}", self.field, reason))
    }
}

/// 文本区间边界只接受时间戳 (存储格式可按字典序比较)
fn is_timestamp_text(value: &Value) -> bool {
    match value {
        Value::Text(text) => DateTime::parse_from_rfc3339(text).is_ok(),
        _ => false,
    }
}

/// 校验 SQL 标识符: `[A-Za-z_][A-Za-z0-9_]*`, 允许一级 `table.column`
pub(crate) fn validate_identifier(name: &str) -> RepositoryResult<()> {
    let mut parts = name.split('.');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(column), None, None) => is_plain_identifier(column),
        (Some(table), Some(column), None) => {
            is_plain_identifier(table) && is_plain_identifier(column)
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RepositoryError::InvalidCondition(format!(
            "非法字段名: `{}`",
            name
        )))
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_constructors() {
        let c = Condition::gte("age", 18);
        assert_eq!(c.field(), "age");
        assert_eq!(c.operator(), Operator::GreaterOrEqual);
        assert_eq!(c.value(), &ConditionValue::Single(Value::Integer(18)));
        assert!(c.validate().is_ok());

        let c = Condition::is_in("status", ["active", "locked"]);
        assert_eq!(
            c.value(),
            &ConditionValue::List(vec![Value::from("active"), Value::from("locked")])
        );

        assert_eq!(Condition::is_null("deleted_at").value(), &ConditionValue::None);
    }

    #[test]
    fn test_between_requires_two_comparable_values() {
        assert!(Condition::between("age", 18, 30).validate().is_ok());
        let from = "2024-01-01T00:00:00.000000Z".parse::<DateTime<Utc>>().unwrap();
        let to = "2024-02-01T00:00:00.000000Z".parse::<DateTime<Utc>>().unwrap();
        assert!(Condition::between("created_at", from, to).validate().is_ok());
        assert!(Condition::between("score", 1, 2.5).validate().is_ok());

        let mixed = Condition::between("age", "eighteen", 30);
        assert!(matches!(
            mixed.validate(),
            Err(RepositoryError::InvalidCondition(_))
        ));

        let three = Condition::between_values(
            "age",
            vec![Value::from(18), Value::from(25), Value::from(30)],
        );
        assert!(matches!(three, Err(RepositoryError::InvalidCondition(_))));

        let one = Condition::between_values("age", vec![Value::from(18)]);
        assert!(one.is_err());

        let with_null = Condition::between("age", Value::Null, 30);
        assert!(with_null.validate().is_err());
    }

    #[test]
    fn test_between_text_bounds_must_be_timestamps() {
        let words = Condition::between("age", "eighteen", "thirty");
        assert!(matches!(
            words.validate(),
            Err(RepositoryError::InvalidCondition(_))
        ));

        let half = Condition::between("created_at", "2024-01-01T00:00:00Z", "soon");
        assert!(half.validate().is_err());

        let stamps = Condition::between_values(
            "created_at",
            vec![
                Value::from("2024-01-01T00:00:00.000000Z"),
                Value::from("2024-12-31T23:59:59.999999Z"),
            ],
        );
        assert!(stamps.is_ok());
    }

    #[test]
    fn test_value_shape_must_match_operator() {
        assert!(Condition::new("age", Operator::IsNull, ConditionValue::Single(Value::from(1))).is_err());
        assert!(Condition::new("age", Operator::Equal, ConditionValue::None).is_err());
        assert!(Condition::new("age", Operator::In, ConditionValue::Single(Value::from(1))).is_err());
        assert!(Condition::eq("age", None::<i64>).validate().is_err());
        assert!(Condition::new("age", Operator::In, ConditionValue::List(vec![])).is_ok());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("age").is_ok());
        assert!(validate_identifier("_private1").is_ok());
        assert!(validate_identifier("users.age").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1age").is_err());
        assert!(validate_identifier("age; DROP TABLE users").is_err());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("name\"").is_err());
    }

    #[test]
    fn test_condition_json_shape() {
        let c = Condition::between("age", 18, 30);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"field": "age", "operator": "BETWEEN", "value": [18, 30]})
        );

        let parsed: Condition =
            serde_json::from_str(r#"{"field":"deleted_at","operator":"IS NULL"}"#).unwrap();
        assert_eq!(parsed, Condition::is_null("deleted_at"));

        let parsed: Condition =
            serde_json::from_str(r#"{"field":"name","operator":"LIKE","value":"al%"}"#).unwrap();
        assert_eq!(parsed, Condition::like("name", "al%"));
    }

    #[test]
    fn test_timestamp_value_is_fixed_width() {
        let at = DateTime::parse_from_rfc3339("2026-10-17T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Value::from(at), Value::Text("2026-10-17T08:30:00.000000Z".to_string()));
    }
}
