// ==========================================
// 通用数据访问层 - 查询构建器
// ==========================================
// 职责: 累积过滤/排序/投影/分页参数, 由终结方法一次性执行
// 约束: 构建方法按值接收并返回自身; 终结方法消费构建器
// 约束: 终结方法执行前不访问存储
// ==========================================

use crate::context::RequestContext;
use crate::repository::condition::{validate_identifier, Condition};
use crate::repository::entity::Entity;
use crate::repository::error::RepositoryResult;
use crate::repository::page::{normalize_page, page_offset, OrderRule, PageResult};

// ==========================================
// QueryOptions - 累积的查询参数
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub conditions: Vec<Condition>, // 过滤条件 (AND 组合)
    pub order_by: Vec<OrderRule>,   // 排序规则 (按添加顺序)
    pub fields: Vec<String>,        // 投影字段 (空 = 全部列)
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub include_deleted: bool, // 是否包含软删除记录
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只带条件的选项 (用于 find_where / count)
    pub fn with_conditions(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
            ..Self::default()
        }
    }

    /// 计数用选项: 只保留条件, 丢弃排序/投影/分页
    pub fn for_count(&self) -> Self {
        Self {
            conditions: self.conditions.clone(),
            include_deleted: self.include_deleted,
            ..Self::default()
        }
    }

    /// 分页用选项: 由页码/每页数量推导 offset/limit
    pub fn for_page(&self, page: i64, size: i64) -> Self {
        let (page, size) = normalize_page(page, size);
        Self {
            limit: Some(size.unsigned_abs()),
            offset: Some(page_offset(page, size).unsigned_abs()),
            ..self.clone()
        }
    }

    pub fn is_windowed(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// 校验所有条件以及排序/投影字段名
    pub fn validate(&self) -> RepositoryResult<()> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        for rule in &self.order_by {
            validate_identifier(&rule.field)?;
        }
        for field in &self.fields {
            validate_identifier(field)?;
        }
        Ok(())
    }
}

// ==========================================
// QueryBuilder - 查询构建器接口
// ==========================================
/// 链式构建方法均有默认实现, 实现方只需提供选项访问与终结方法。
///
/// ```ignore
/// let adults = repo
///     .query()
///     .filter(Condition::gte("age", 18))
///     .order_by_desc("created_at")
///     .limit(20)
///     .find(&ctx)?;
/// ```
pub trait QueryBuilder<T: Entity>: Sized {
    fn options(&self) -> &QueryOptions;

    fn options_mut(&mut self) -> &mut QueryOptions;

    // ===== 构建 =====

    /// 添加过滤条件
    fn filter(mut self, condition: Condition) -> Self {
        self.options_mut().conditions.push(condition);
        self
    }

    /// 追加过滤条件 (与 filter 相同, 以 AND 组合)
    fn and(self, condition: Condition) -> Self {
        self.filter(condition)
    }

    fn order_by(mut self, field: impl Into<String>) -> Self {
        self.options_mut().order_by.push(OrderRule::asc(field));
        self
    }

    fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.options_mut().order_by.push(OrderRule::desc(field));
        self
    }

    fn limit(mut self, limit: u64) -> Self {
        self.options_mut().limit = Some(limit);
        self
    }

    fn offset(mut self, offset: u64) -> Self {
        self.options_mut().offset = Some(offset);
        self
    }

    /// 投影字段 (未投影的业务列按 NULL 读取)
    fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options_mut()
            .fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    // ===== 终结 =====

    fn find(self, ctx: &RequestContext) -> RepositoryResult<Vec<T>>;

    /// 取第一条 (没有则返回 None)
    fn first(self, ctx: &RequestContext) -> RepositoryResult<Option<T>> {
        Ok(self.limit(1).find(ctx)?.into_iter().next())
    }

    /// 计数 (只考虑过滤条件)
    fn count(self, ctx: &RequestContext) -> RepositoryResult<i64>;

    fn exists(self, ctx: &RequestContext) -> RepositoryResult<bool> {
        Ok(self.count(ctx)? > 0)
    }

    /// 分页查询: 先计数, 再按推导的 offset/limit 取数
    fn page(self, ctx: &RequestContext, page: i64, size: i64) -> RepositoryResult<PageResult<T>>;
}
