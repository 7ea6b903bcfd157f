// ==========================================
// 通用数据访问层 - 命令行冒烟入口
// ==========================================
// 流程: 初始化日志 → 打开数据库 → 建演示表 → 写入 → 分页打印
// 环境变量: 见 config::database_config
// ==========================================

use anyhow::Context;
use soliton_repo::repository::schema::audited_table_ddl;
use soliton_repo::repository::{read_audit_fields, QueryBuilder};
use soliton_repo::{
    logging, AuditFields, Auditable, BaseRepository, Condition, Database, DatabaseConfig, Entity,
    FromRow, PageRequest, QueryableRepository, RequestContext, SqliteRepository, Value,
};

/// 演示实体
#[derive(Debug, Default)]
struct Memo {
    id: i64,
    title: String,
    priority: i64,
    audit: AuditFields,
}

impl Entity for Memo {
    type Id = i64;
    const TABLE: &'static str = "demo_memos";
    const COLUMNS: &'static [&'static str] = &["title", "priority"];
    const AUDITED: bool = true;

    fn id(&self) -> i64 {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![self.title.as_str().into(), self.priority.into()]
    }

    fn auditable(&self) -> Option<&dyn Auditable> {
        Some(&self.audit)
    }

    fn auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        Some(&mut self.audit)
    }

    fn generated_key_mut(&mut self) -> Option<&mut i64> {
        Some(&mut self.id)
    }
}

impl FromRow for Memo {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get::<_, Option<String>>("title")?.unwrap_or_default(),
            priority: row.get::<_, Option<i64>>("priority")?.unwrap_or_default(),
            audit: read_audit_fields(row)?,
        })
    }
}

fn main() -> anyhow::Result<()> {
    logging::init();

    let config = DatabaseConfig::from_env();
    tracing::info!("==================================================");
    tracing::info!("soliton-repo {}", soliton_repo::VERSION);
    tracing::info!("使用数据库: {}", config.path);
    tracing::info!("==================================================");

    let db = Database::open(config).context("打开数据库失败")?;
    let ctx = RequestContext::new();

    let ddl = audited_table_ddl(
        Memo::TABLE,
        &[
            "id INTEGER PRIMARY KEY AUTOINCREMENT",
            "title TEXT NOT NULL",
            "priority INTEGER NOT NULL DEFAULT 0",
        ],
    )?;
    db.execute_batch(&ctx, &ddl).context("创建演示表失败")?;

    let repo: SqliteRepository<Memo> = SqliteRepository::new(db);

    let mut memos: Vec<Memo> = (1..=5)
        .map(|i| Memo {
            title: format!("memo #{}", i),
            priority: i % 3,
            ..Memo::default()
        })
        .collect();
    repo.create_batch(&ctx, &mut memos).context("批量写入失败")?;

    let mut first = repo
        .query()
        .filter(Condition::eq("id", memos[0].id))
        .first(&ctx)?
        .context("刚写入的记录不存在")?;
    first.priority = 9;
    repo.update(&ctx, &mut first)?;
    tracing::info!(id = first.id, version = first.audit.version, "memo updated");

    let request = PageRequest::new(1, 3).with_order_by("priority", true);
    let page = repo.page(&ctx, &request)?;
    println!(
        "page {}/{} (total {}):",
        page.page, page.total_pages, page.total
    );
    for memo in &page.items {
        println!(
            "  #{:<4} {:<12} priority={} version={}",
            memo.id, memo.title, memo.priority, memo.audit.version
        );
    }

    let urgent = repo.count(&ctx, &[Condition::gte("priority", 2)])?;
    println!("priority >= 2: {}", urgent);

    Ok(())
}
