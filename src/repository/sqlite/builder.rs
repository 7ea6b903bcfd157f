// ==========================================
// SQLite 后端 - 查询构建器
// ==========================================

use super::repository::SqliteRepository;
use super::FromRow;
use crate::context::RequestContext;
use crate::repository::builder::{QueryBuilder, QueryOptions};
use crate::repository::entity::Entity;
use crate::repository::error::RepositoryResult;
use crate::repository::page::PageResult;
use std::fmt;

/// 由 `SqliteRepository::query()` 创建; 每次调用得到独立的选项
pub struct SqliteQueryBuilder<T> {
    repo: SqliteRepository<T>,
    options: QueryOptions,
}

impl<T: Entity + FromRow> SqliteQueryBuilder<T> {
    pub(crate) fn new(repo: SqliteRepository<T>) -> Self {
        Self {
            repo,
            options: QueryOptions::new(),
        }
    }

    /// 包含已软删除的记录
    pub fn include_deleted(mut self) -> Self {
        self.options.include_deleted = true;
        self
    }
}

impl<T> fmt::Debug for SqliteQueryBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteQueryBuilder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Entity + FromRow> QueryBuilder<T> for SqliteQueryBuilder<T> {
    fn options(&self) -> &QueryOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut QueryOptions {
        &mut self.options
    }

    fn find(self, ctx: &RequestContext) -> RepositoryResult<Vec<T>> {
        self.repo.fetch(ctx, &self.options)
    }

    fn count(self, ctx: &RequestContext) -> RepositoryResult<i64> {
        self.repo.count_rows(ctx, &self.options.for_count())
    }

    fn page(self, ctx: &RequestContext, page: i64, size: i64) -> RepositoryResult<PageResult<T>> {
        self.repo.fetch_page(ctx, &self.options, page, size)
    }
}
