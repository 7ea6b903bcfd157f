// ==========================================
// 通用数据访问层 - 数据库配置
// ==========================================
// 环境变量:
// - SOLITON_REPO_DB_PATH           数据库文件路径
// - SOLITON_REPO_BUSY_TIMEOUT_MS   busy_timeout (毫秒)
// - SOLITON_REPO_MAX_IDLE_CONNS    最大空闲连接数
// - SOLITON_REPO_MAX_OPEN_CONNS    最大打开连接数 (0 = 不限制)
// - SOLITON_REPO_JOURNAL_MODE      journal_mode (off = 不设置)
// - SOLITON_REPO_SLOW_SQL_MS       慢操作阈值 (毫秒, 0 = 关闭)
// - SOLITON_REPO_TRACE_SQL         语句跟踪 (true/false/1/0)
// ==========================================

use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 默认数据库文件名
const DEFAULT_DB_FILE: &str = "soliton_repo.db";

/// 数据库配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,                 // 数据库文件路径
    pub busy_timeout_ms: u64,         // busy_timeout
    pub max_idle_conns: usize,        // 最大空闲连接数
    pub max_open_conns: usize,        // 最大打开连接数 (0 = 不限制)
    pub journal_mode: Option<String>, // journal_mode (None = 保持引擎默认)
    pub foreign_keys: bool,           // 是否开启外键约束
    pub slow_sql_ms: Option<u64>,     // 慢操作阈值 (None = 按构建类型取默认)
    pub trace_sql: bool,              // 是否以 trace 级别输出每条语句
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_FILE.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_idle_conns: 10,
            max_open_conns: 100,
            journal_mode: Some("WAL".to_string()),
            foreign_keys: true,
            slow_sql_ms: None,
            trace_sql: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// 指定路径, 其余取默认值
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// 从 JSON 读取 (缺省字段取默认值)
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// 默认值 + 环境变量覆写
    pub fn from_env() -> Self {
        let mut config = Self::for_path(default_db_path());
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// 按键读取覆写值; 无法解析的数值忽略并告警
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = read("SOLITON_REPO_DB_PATH") {
            self.path = path;
        }
        if let Some(v) = read("SOLITON_REPO_BUSY_TIMEOUT_MS") {
            match v.parse() {
                Ok(ms) => self.busy_timeout_ms = ms,
                Err(_) => tracing::warn!(value = %v, "invalid SOLITON_REPO_BUSY_TIMEOUT_MS ignored"),
            }
        }
        if let Some(v) = read("SOLITON_REPO_MAX_IDLE_CONNS") {
            match v.parse() {
                Ok(n) => self.max_idle_conns = n,
                Err(_) => tracing::warn!(value = %v, "invalid SOLITON_REPO_MAX_IDLE_CONNS ignored"),
            }
        }
        if let Some(v) = read("SOLITON_REPO_MAX_OPEN_CONNS") {
            match v.parse() {
                Ok(n) => self.max_open_conns = n,
                Err(_) => tracing::warn!(value = %v, "invalid SOLITON_REPO_MAX_OPEN_CONNS ignored"),
            }
        }
        if let Some(mode) = read("SOLITON_REPO_JOURNAL_MODE") {
            self.journal_mode = if mode.eq_ignore_ascii_case("off") {
                None
            } else {
                Some(mode.to_uppercase())
            };
        }
        if let Some(v) = read("SOLITON_REPO_SLOW_SQL_MS") {
            match v.parse() {
                Ok(ms) => self.slow_sql_ms = Some(ms),
                Err(_) => tracing::warn!(value = %v, "invalid SOLITON_REPO_SLOW_SQL_MS ignored"),
            }
        }
        if let Some(v) = read("SOLITON_REPO_TRACE_SQL") {
            match parse_switch(&v) {
                Some(on) => self.trace_sql = on,
                None => tracing::warn!(value = %v, "invalid SOLITON_REPO_TRACE_SQL ignored"),
            }
        }
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// 获取默认数据库路径
///
/// # 返回
/// - 用户数据目录/soliton-repo/soliton_repo.db
/// - 拿不到用户数据目录时回退到 ./soliton_repo.db
pub fn default_db_path() -> String {
    let mut path = PathBuf::from(format!("./{}", DEFAULT_DB_FILE));

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("soliton-repo");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join(DEFAULT_DB_FILE);
        }
    }

    path.to_string_lossy().to_string()
}
