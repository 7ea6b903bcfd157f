// ==========================================
// 通用数据访问层 - 分页模型
// ==========================================
// 约束: page < 1 归一为 1; size < 1 归一为 DEFAULT_PAGE_SIZE
// 约束: total_pages = ceil(total / size); items.len() <= size
// ==========================================

use crate::repository::condition::Condition;
use serde::{Deserialize, Serialize};

/// 默认每页数量
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// 归一化页码与每页数量
pub fn normalize_page(page: i64, size: i64) -> (i64, i64) {
    let page = if page < 1 { 1 } else { page };
    let size = if size < 1 { DEFAULT_PAGE_SIZE } else { size };
    (page, size)
}

/// 页码对应的偏移量 (已归一化的 page/size; 溢出时饱和)
pub fn page_offset(page: i64, size: i64) -> i64 {
    (page - 1).saturating_mul(size)
}

/// 总页数 = ceil(total / size), 不做 total + size 的加法
pub fn total_pages(total: i64, size: i64) -> i64 {
    total / size + i64::from(total % size != 0)
}

// ==========================================
// OrderRule - 排序规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRule {
    pub field: String, // 排序字段
    #[serde(default)]
    pub desc: bool, // 是否降序
}

impl OrderRule {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: true,
        }
    }
}

// ==========================================
// PageRequest - 分页请求
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPageRequest")]
pub struct PageRequest {
    pub page: i64,                   // 页码 (从 1 开始)
    pub size: i64,                   // 每页数量
    pub conditions: Vec<Condition>,  // 查询条件列表
    pub order_by: Vec<OrderRule>,    // 排序规则
}

// 反序列化入口, 与 PageRequest::new 走同一套归一化
#[derive(Deserialize)]
struct RawPageRequest {
    #[serde(default)]
    page: i64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    order_by: Vec<OrderRule>,
}

impl From<RawPageRequest> for PageRequest {
    fn from(raw: RawPageRequest) -> Self {
        let mut request = PageRequest::new(raw.page, raw.size);
        request.conditions = raw.conditions;
        request.order_by = raw.order_by;
        request
    }
}

impl PageRequest {
    /// 创建分页请求
    pub fn new(page: i64, size: i64) -> Self {
        let (page, size) = normalize_page(page, size);
        Self {
            page,
            size,
            conditions: Vec::new(),
            order_by: Vec::new(),
        }
    }

    /// 添加查询条件
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// 添加排序规则
    pub fn with_order_by(mut self, field: impl Into<String>, desc: bool) -> Self {
        self.order_by.push(OrderRule {
            field: field.into(),
            desc,
        });
        self
    }

    /// 计算偏移量 (溢出时饱和到 i64::MAX)
    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

// ==========================================
// PageResult - 分页结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,     // 当前页数据列表
    pub total: i64,        // 总记录数
    pub page: i64,         // 当前页码
    pub size: i64,         // 每页数量
    pub total_pages: i64,  // 总页数
}

impl<T> PageResult<T> {
    /// 创建分页结果
    pub fn new(items: Vec<T>, total: i64, page: i64, size: i64) -> Self {
        let (page, size) = normalize_page(page, size);
        let total = total.max(0);
        Self {
            items,
            total,
            page,
            size,
            total_pages: total_pages(total, size),
        }
    }

    /// 是否有下一页
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    /// 是否有上一页
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 转换条目类型, 分页数字保持不变
    pub fn map<U, F>(self, f: F) -> PageResult<U>
    where
        F: FnMut(T) -> U,
    {
        PageResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            size: self.size,
            total_pages: self.total_pages,
        }
    }
}
