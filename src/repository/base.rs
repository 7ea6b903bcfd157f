// ==========================================
// 通用数据访问层 - 基础仓储接口
// ==========================================
// 职责: 任意实体的增删改查、分页与事务作用域
// 红线: 仓储不含业务逻辑, 不持有实体实例, 不持有事务状态
// ==========================================

use crate::context::RequestContext;
use crate::repository::entity::Entity;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::page::{PageRequest, PageResult};

// ==========================================
// TransactionalRepository - 事务作用域
// ==========================================
/// 事务保存在上下文中: `begin_tx` 返回绑定事务的新上下文,
/// 之后把该上下文传给任意仓储方法即在同一事务内执行。
pub trait TransactionalRepository {
    /// 开启事务 (上下文已处于事务时返回 `NestedTransaction`)
    fn begin_tx(&self, ctx: &RequestContext) -> RepositoryResult<RequestContext>;

    /// 提交事务
    ///
    /// # 错误
    /// - `NoActiveTransaction`: 上下文不是 begin_tx 产生的, 或事务已结束
    /// - `Cancelled`: 上下文已取消 (事务已回滚)
    fn commit(&self, ctx: &RequestContext) -> RepositoryResult<()>;

    fn rollback(&self, ctx: &RequestContext) -> RepositoryResult<()>;

    /// 在事务内执行闭包: 成功提交, 失败回滚并返回原错误
    ///
    /// 闭包 panic 时事务句柄被丢弃, 同样回滚。
    fn with_tx<R, E, F>(&self, ctx: &RequestContext, f: F) -> Result<R, E>
    where
        Self: Sized,
        E: From<RepositoryError>,
        F: FnOnce(&RequestContext) -> Result<R, E>,
    {
        let tx_ctx = self.begin_tx(ctx)?;
        match f(&tx_ctx) {
            Ok(value) => {
                self.commit(&tx_ctx)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback(&tx_ctx) {
                    tracing::warn!("rollback after failed closure failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

// ==========================================
// BaseRepository - 基础仓储接口
// ==========================================
pub trait BaseRepository<T: Entity>: TransactionalRepository + Send + Sync {
    /// 创建实体 (写入前执行审计钩子; 生成的主键回写到实体)
    fn create(&self, ctx: &RequestContext, entity: &mut T) -> RepositoryResult<()>;

    /// 批量创建 (原子执行; 空切片直接返回)
    fn create_batch(&self, ctx: &RequestContext, entities: &mut [T]) -> RepositoryResult<()>;

    /// 根据主键查询
    ///
    /// # 返回
    /// - `Ok(None)`: 记录不存在或已软删除
    fn get_by_id(&self, ctx: &RequestContext, id: &T::Id) -> RepositoryResult<Option<T>>;

    /// 整行更新 (不存在则插入); 审计钩子在写入前执行
    fn update(&self, ctx: &RequestContext, entity: &mut T) -> RepositoryResult<()>;

    /// 删除 (可审计实体为软删除, 其余为物理删除; 不存在的主键不报错)
    fn delete(&self, ctx: &RequestContext, id: &T::Id) -> RepositoryResult<()>;

    /// 列出所有存活记录
    fn list(&self, ctx: &RequestContext) -> RepositoryResult<Vec<T>>;

    /// 分页查询
    ///
    /// 非事务上下文中计数与取数是两条独立语句, 可能看到不同快照。
    fn page(&self, ctx: &RequestContext, request: &PageRequest) -> RepositoryResult<PageResult<T>>;
}
