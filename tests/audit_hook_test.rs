// ==========================================
// 审计钩子集成测试
// ==========================================
// 测试目标: 钩子在 Database 上注册一次, 按能力作用于所有实体
// ==========================================


use chrono::{DateTime, Utc};
use rusqlite::Row;
use soliton_repo::repository::{AuditHook, Auditable, RepositoryResult, WriteHook};
use soliton_repo::{
    AuditFields, BaseRepository, Entity, FromRow, RepositoryError, SqliteRepository, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use test_helpers::{ctx, new_user, open_test_database, tag, user_repo, Tag};

fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}

/// 记录钩子调用的测试钩子
#[derive(Default)]
struct RecordingHook {
    inserts: AtomicUsize,
    updates: AtomicUsize,
    tables: Mutex<Vec<(String, bool)>>,
}

impl WriteHook for RecordingHook {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn before_insert(&self, table: &str, record: Option<&mut dyn Auditable>) -> RepositoryResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .push((table.to_string(), record.is_some()));
        Ok(())
    }

    fn before_update(&self, _table: &str, _record: Option<&mut dyn Auditable>) -> RepositoryResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_injected_clock_drives_timestamps() {
    let (_temp_file, db) = open_test_database();

    let clock_value = Arc::new(Mutex::new(at("2026-01-01T08:00:00Z")));
    let source = clock_value.clone();
    db.register_hook(Arc::new(AuditHook::with_clock(Arc::new(move || {
        *source.lock().unwrap()
    }))))
    .unwrap();
    // 同名钩子被替换, 不会重复执行
    assert_eq!(db.hooks().names().unwrap(), vec!["audit"]);

    let repo = user_repo(&db);
    let mut user = new_user("clocked", 30);
    repo.create(&ctx(), &mut user).unwrap();
    assert_eq!(user.audit.created_at, Some(at("2026-01-01T08:00:00Z")));
    assert_eq!(user.audit.updated_at, Some(at("2026-01-01T08:00:00Z")));

    *clock_value.lock().unwrap() = at("2026-02-01T09:30:00Z");
    repo.update(&ctx(), &mut user).unwrap();

    let stored = repo.get_by_id(&ctx(), &user.id).unwrap().unwrap();
    assert_eq!(stored.audit.created_at, Some(at("2026-01-01T08:00:00Z")));
    assert_eq!(stored.audit.updated_at, Some(at("2026-02-01T09:30:00Z")));
    assert_eq!(stored.audit.version, 2);
}

#[test]
fn test_preset_created_at_is_kept() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);

    let mut user = new_user("imported", 30);
    user.audit.created_at = Some(at("2020-05-05T05:05:05.123456Z"));
    repo.create(&ctx(), &mut user).unwrap();

    let stored = repo.get_by_id(&ctx(), &user.id).unwrap().unwrap();
    assert_eq!(stored.audit.created_at, Some(at("2020-05-05T05:05:05.123456Z")));
    assert!(stored.audit.updated_at > stored.audit.created_at);
}

#[test]
fn test_hooks_dispatch_by_capability() {
    let (_temp_file, db) = open_test_database();
    let recorder = Arc::new(RecordingHook::default());
    db.register_hook(recorder.clone()).unwrap();

    let users = user_repo(&db);
    let tags: SqliteRepository<Tag> = SqliteRepository::new(db.clone());

    let mut user = new_user("hooked", 30);
    users.create(&ctx(), &mut user).unwrap();
    users.update(&ctx(), &mut user).unwrap();
    tags.create(&ctx(), &mut tag("t", "T")).unwrap();

    assert_eq!(recorder.inserts.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.updates.load(Ordering::SeqCst), 1);
    assert_eq!(
        *recorder.tables.lock().unwrap(),
        vec![("users".to_string(), true), ("tags".to_string(), false)]
    );
}

#[test]
fn test_timestamps_sort_lexicographically_in_storage() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);

    let mut early = new_user("early", 1);
    early.audit.created_at = Some(at("2024-01-01T00:00:00Z"));
    let mut late = new_user("late", 2);
    late.audit.created_at = Some(at("2024-01-01T00:00:00.5Z"));
    repo.create(&ctx(), &mut late).unwrap();
    repo.create(&ctx(), &mut early).unwrap();

    use soliton_repo::{Condition, QueryBuilder, QueryableRepository};
    let ordered: Vec<String> = repo
        .query()
        .order_by("created_at")
        .find(&ctx())
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(ordered, vec!["early", "late"]);

    let after = repo
        .count(&ctx(), &[Condition::gt("created_at", at("2024-01-01T00:00:00.1Z"))])
        .unwrap();
    assert_eq!(after, 1);
}

/// 写入 tags 表, 携带审计字段却未声明 AUDITED
#[derive(Debug, Clone)]
struct StampedTag {
    code: String,
    label: Option<String>,
    audit: AuditFields,
}

impl Entity for StampedTag {
    type Id = String;
    const TABLE: &'static str = "tags";
    const PRIMARY_KEY: &'static str = "code";
    const COLUMNS: &'static [&'static str] = &["label"];

    fn id(&self) -> String {
        self.code.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![self.label.clone().into()]
    }

    fn auditable(&self) -> Option<&dyn Auditable> {
        Some(&self.audit)
    }

    fn auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        Some(&mut self.audit)
    }
}

impl FromRow for StampedTag {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: row.get("code")?,
            label: row.get("label")?,
            audit: AuditFields::default(),
        })
    }
}

#[test]
fn test_audit_fields_without_audited_declaration_are_rejected() {
    let (_temp_file, db) = open_test_database();
    let repo: SqliteRepository<StampedTag> = SqliteRepository::new(db.clone());

    let mut stamped = StampedTag {
        code: "s".to_string(),
        label: Some("S".to_string()),
        audit: AuditFields::default(),
    };
    let err = repo.create(&ctx(), &mut stamped).unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidEntity(_)));
    assert!(matches!(
        repo.update(&ctx(), &mut stamped),
        Err(RepositoryError::InvalidEntity(_))
    ));

    // 钩子未运行, 实体与存储均未改变
    assert_eq!(stamped.audit, AuditFields::default());
    let tags: SqliteRepository<Tag> = SqliteRepository::new(db.clone());
    assert!(tags.list(&ctx()).unwrap().is_empty());
}
