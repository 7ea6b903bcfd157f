// ==========================================
// 通用数据访问层 - 仓储操作计时与 SQL 跟踪
// ==========================================
// - 每个仓储操作按 (表, 操作) 计时, 超过所属数据库的阈值记 slow_sql 警告
// - 阈值随 Database 保存, 同一进程内多个数据库互不影响
// - trace_sql 开启时, 连接上执行的语句以 trace 级别输出
// ==========================================

use rusqlite::Connection;
use std::time::{Duration, Instant};

/// 慢操作默认阈值 (毫秒)
pub const DEBUG_SLOW_OP_MS: u64 = 50;
pub const RELEASE_SLOW_OP_MS: u64 = 200;

const SQL_LOG_MAX_LEN: usize = 420;

/// 解析慢操作阈值
///
/// - `None`: 按构建类型取默认值
/// - `Some(0)`: 关闭慢操作告警
pub fn slow_threshold(configured_ms: Option<u64>) -> Option<Duration> {
    let default_ms = if cfg!(debug_assertions) {
        DEBUG_SLOW_OP_MS
    } else {
        RELEASE_SLOW_OP_MS
    };
    let ms = configured_ms.unwrap_or(default_ms);
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// 安装 (或清除) 连接上的语句跟踪
pub fn install_statement_trace(conn: &mut Connection, enabled: bool) {
    if enabled {
        conn.trace(Some(log_statement));
    } else {
        conn.trace(None);
    }
}

fn log_statement(sql: &str) {
    tracing::trace!(
        target: "soliton_repo::sql",
        sql = %compact_sql(sql, SQL_LOG_MAX_LEN),
        "statement"
    );
}

/// 折叠空白并按字符边界截断
fn compact_sql(sql: &str, max_len: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max_len {
        return flat;
    }
    let mut cut = max_len;
    while !flat.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &flat[..cut])
}

// ==========================================
// PerfGuard - 仓储操作计时
// ==========================================
/// Drop 时输出耗时; 超过阈值记 `slow_sql` 警告, 否则记 `perf` 调试日志
///
/// ```ignore
/// let _perf = db.perf_guard("users", "page");
/// ```
pub struct PerfGuard {
    table: &'static str,
    op: &'static str,
    threshold: Option<Duration>,
    start: Instant,
}

impl PerfGuard {
    pub fn start(table: &'static str, op: &'static str, threshold: Option<Duration>) -> Self {
        Self {
            table,
            op,
            threshold,
            start: Instant::now(),
        }
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        self.threshold.is_some_and(|limit| elapsed >= limit)
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        if self.is_slow(elapsed) {
            tracing::warn!(
                target: "slow_sql",
                table = self.table,
                op = self.op,
                elapsed_ms,
                threshold_ms = self.threshold.map(|t| t.as_millis() as u64),
                "slow repository operation"
            );
        } else {
            tracing::debug!(
                target: "perf",
                table = self.table,
                op = self.op,
                elapsed_ms,
                "done"
            );
        }
    }
}
