// ==========================================
// 通用数据访问层 - 实体契约
// ==========================================
// 职责: 定义所有可存储实体必须暴露的最小能力
// - 主键访问
// - 列映射 (与引擎无关的 Value)
// - 可审计能力 (创建/更新时间, 软删除标记, 版本号)
// 约束: 仓储不持有实体实例, 实体生命周期归调用方
// ==========================================

use crate::repository::condition::Value;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 审计列名
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const DELETED_AT_COLUMN: &str = "deleted_at";
pub const VERSION_COLUMN: &str = "version";

/// 审计列 (按持久化顺序)
pub const AUDIT_COLUMNS: [&str; 4] = [
    CREATED_AT_COLUMN,
    UPDATED_AT_COLUMN,
    DELETED_AT_COLUMN,
    VERSION_COLUMN,
];

/// 当前时间 (截断到微秒, 与持久化精度一致)
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ==========================================
// Auditable - 可审计能力
// ==========================================
// 实现此 trait 的实体在写入前由审计钩子自动填充审计字段
pub trait Auditable {
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    fn version(&self) -> i64;

    fn set_created_at(&mut self, at: Option<DateTime<Utc>>);
    fn set_updated_at(&mut self, at: Option<DateTime<Utc>>);
    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>);
    fn set_version(&mut self, version: i64);

    /// 版本号递增
    fn increment_version(&mut self) {
        let next = self.version() + 1;
        self.set_version(next);
    }

    /// 判断是否已删除
    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

// ==========================================
// AuditFields - 审计字段
// ==========================================
// 业务实体通过组合方式嵌入
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    pub created_at: Option<DateTime<Utc>>, // 创建时间 (None = 未设置)
    pub updated_at: Option<DateTime<Utc>>, // 更新时间 (None = 未设置)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>, // 软删除时间 (None = 存活)
    pub version: i64,                      // 版本号, 创建时为 1
}

impl AuditFields {
    /// 更新修改时间
    pub fn touch(&mut self) {
        self.updated_at = Some(now_micros());
    }
}

impl Auditable for AuditFields {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_created_at(&mut self, at: Option<DateTime<Utc>>) {
        self.created_at = at;
    }

    fn set_updated_at(&mut self, at: Option<DateTime<Utc>>) {
        self.updated_at = at;
    }

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) {
        self.deleted_at = at;
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// ==========================================
// Entity - 实体接口
// ==========================================
/// 所有实体必须实现此接口
///
/// `COLUMNS` 只列业务数据列, 不含主键和审计列;
/// `values()` 的顺序必须与 `COLUMNS` 一致。
///
/// `AUDITED = true` 的表带有完整审计列 (created_at / updated_at /
/// deleted_at / version), 删除为软删除; 此时 `auditable()` 与
/// `auditable_mut()` 必须返回 `Some`。
pub trait Entity: Sized + Send {
    /// 主键类型
    type Id: Clone + fmt::Debug + Into<Value> + Send + Sync;

    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";
    const COLUMNS: &'static [&'static str];
    const AUDITED: bool = false;

    /// 获取实体主键
    fn id(&self) -> Self::Id;

    /// 业务数据列的值
    fn values(&self) -> Vec<Value>;

    fn auditable(&self) -> Option<&dyn Auditable> {
        None
    }

    fn auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        None
    }

    /// 引擎生成的整数主键 (0 = 尚未分配)
    ///
    /// 返回 `Some` 且值为 0 时, 插入语句省略主键列, 插入后回写自增值。
    fn generated_key_mut(&mut self) -> Option<&mut i64> {
        None
    }
}
