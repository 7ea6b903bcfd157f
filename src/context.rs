// ==========================================
// 通用数据访问层 - 请求上下文
// ==========================================
// 职责: 在每次仓储调用之间传递
// - 取消令牌 (CancellationToken)
// - 截止时间 (deadline)
// - 事务作用域 (由 begin_tx 产生)
// 红线: 仓储本身不持有事务状态; 不使用线程局部/全局状态
// ==========================================

use crate::db::TxScope;
use crate::repository::error::{RepositoryError, RepositoryResult};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 请求上下文
///
/// 克隆得到的上下文共享同一个取消令牌与事务作用域。
#[derive(Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    tx: Option<Arc<TxScope>>,
}

impl RequestContext {
    /// 创建新的顶层上下文 (无截止时间, 无事务)
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定外部取消令牌
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..Self::default()
        }
    }

    /// 设置截止时间 (只会收紧, 不会放宽)
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// 设置相对超时
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 触发取消
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 是否处于事务作用域
    pub fn is_transactional(&self) -> bool {
        self.tx.is_some()
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        self.tx.as_ref().map(|tx| tx.id())
    }

    /// 检查取消令牌与截止时间
    pub fn check(&self) -> RepositoryResult<()> {
        match self.interrupt_reason() {
            Some(reason) => Err(RepositoryError::Cancelled(reason.to_string())),
            None => Ok(()),
        }
    }

    pub(crate) fn interrupt_reason(&self) -> Option<&'static str> {
        if self.cancel.is_cancelled() {
            return Some("取消令牌已触发");
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some("已超过截止时间"),
            _ => None,
        }
    }

    pub(crate) fn transaction(&self) -> Option<&Arc<TxScope>> {
        self.tx.as_ref()
    }

    pub(crate) fn with_transaction(&self, tx: Arc<TxScope>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            tx: Some(tx),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .field("transaction", &self.transaction_id())
            .finish()
    }
}
