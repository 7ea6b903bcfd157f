// ==========================================
// 通用数据访问层 - 可查询仓储接口
// ==========================================

use crate::context::RequestContext;
use crate::repository::base::BaseRepository;
use crate::repository::builder::QueryBuilder;
use crate::repository::condition::Condition;
use crate::repository::entity::Entity;
use crate::repository::error::RepositoryResult;

/// 在基础仓储之上增加按条件查询
pub trait QueryableRepository<T: Entity>: BaseRepository<T> {
    type Query: QueryBuilder<T>;

    /// 按条件查询 (条件以 AND 组合; 空列表等同 list)
    fn find_where(&self, ctx: &RequestContext, conditions: &[Condition]) -> RepositoryResult<Vec<T>>;

    fn count(&self, ctx: &RequestContext, conditions: &[Condition]) -> RepositoryResult<i64>;

    fn exists(&self, ctx: &RequestContext, conditions: &[Condition]) -> RepositoryResult<bool> {
        Ok(self.count(ctx, conditions)? > 0)
    }

    /// 新的查询构建器 (只共享连接池句柄)
    fn query(&self) -> Self::Query;
}
