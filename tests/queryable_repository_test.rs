// ==========================================
// 可查询仓储集成测试
// ==========================================
// 测试目标: 条件查询/计数/存在性 + 各操作符在 SQLite 上的语义
// ==========================================


use soliton_repo::repository::ConditionValue;
use soliton_repo::{
    BaseRepository, Condition, Operator, QueryableRepository, RepositoryError, Value,
};
use test_helpers::{ctx, new_user, open_test_database, seed_users, user_repo};

#[test]
fn test_find_where_empty_conditions_equals_list() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 4);

    let all = repo.find_where(&ctx(), &[]).unwrap();
    assert_eq!(all, repo.list(&ctx()).unwrap());
    assert_eq!(all.len(), 4);
}

#[test]
fn test_conditions_combine_with_and() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 10); // age 20..29

    let found = repo
        .find_where(
            &ctx(),
            &[Condition::gte("age", 22), Condition::lt("age", 25)],
        )
        .unwrap();
    let mut ages: Vec<i64> = found.iter().filter_map(|u| u.age).collect();
    ages.sort();
    assert_eq!(ages, vec![22, 23, 24]);
}

#[test]
fn test_operator_semantics() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 10); // age 20..29

    let mut no_status = new_user("nobody", 40);
    no_status.status = None;
    repo.create(&ctx(), &mut no_status).unwrap();

    let c = ctx();
    let count = |conds: &[Condition]| repo.count(&c, conds).unwrap();

    assert_eq!(count(&[Condition::eq("age", 20)]), 1);
    assert_eq!(count(&[Condition::not_eq("age", 20)]), 10);
    assert_eq!(count(&[Condition::gt("age", 28)]), 2);
    assert_eq!(count(&[Condition::gte("age", 28)]), 3);
    assert_eq!(count(&[Condition::lt("age", 21)]), 1);
    assert_eq!(count(&[Condition::lte("age", 21)]), 2);
    assert_eq!(count(&[Condition::like("name", "user-0%")]), 9);
    assert_eq!(count(&[Condition::is_in("age", [20, 25, 99])]), 2);
    assert_eq!(count(&[Condition::not_in("age", [20, 25])]), 9);
    assert_eq!(count(&[Condition::between("age", 22, 24)]), 3);
    assert_eq!(count(&[Condition::is_null("status")]), 1);
    assert_eq!(count(&[Condition::is_not_null("status")]), 10);
}

#[test]
fn test_empty_in_and_not_in() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 3);

    let none: Vec<i64> = Vec::new();
    assert_eq!(repo.count(&ctx(), &[Condition::is_in("age", none.clone())]).unwrap(), 0);
    assert_eq!(repo.count(&ctx(), &[Condition::not_in("age", none)]).unwrap(), 3);
}

#[test]
fn test_exists_matches_count() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 5);

    let cases = vec![
        vec![],
        vec![Condition::eq("age", 21)],
        vec![Condition::eq("age", 99)],
        vec![Condition::like("name", "user-%"), Condition::gt("age", 23)],
    ];
    for conds in cases {
        let count = repo.count(&ctx(), &conds).unwrap();
        let exists = repo.exists(&ctx(), &conds).unwrap();
        assert_eq!(exists, count > 0, "conditions: {:?}", conds);
    }
}

#[test]
fn test_malformed_between_is_rejected() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 3);

    // 三个值
    let three = Condition::new(
        "age",
        Operator::Between,
        ConditionValue::List(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]),
    );
    assert!(matches!(three, Err(RepositoryError::InvalidCondition(_))));

    // 类型不可比较
    let err = repo
        .find_where(&ctx(), &[Condition::between("age", 20, "x")])
        .unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidCondition(_)));

    // 从 JSON 反序列化得到的畸形条件同样被拒绝
    let from_json: Condition =
        serde_json::from_str(r#"{"field":"age","operator":"BETWEEN","value":[20]}"#).unwrap();
    assert!(matches!(
        repo.count(&ctx(), &[from_json]),
        Err(RepositoryError::InvalidCondition(_))
    ));
}

#[test]
fn test_between_with_word_bounds_is_rejected() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 3);

    let words = Condition::between("age", "eighteen", "thirty");
    assert!(matches!(
        repo.find_where(&ctx(), &[words.clone()]),
        Err(RepositoryError::InvalidCondition(_))
    ));
    assert!(matches!(
        repo.count(&ctx(), &[words]),
        Err(RepositoryError::InvalidCondition(_))
    ));
}

#[test]
fn test_between_timestamps() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);

    let at = |s: &str| s.parse::<chrono::DateTime<chrono::Utc>>().unwrap();
    for (name, created) in [
        ("jan", "2024-01-15T00:00:00Z"),
        ("feb", "2024-02-15T00:00:00Z"),
        ("mar", "2024-03-15T00:00:00Z"),
    ] {
        let mut user = new_user(name, 30);
        user.audit.created_at = Some(at(created));
        repo.create(&ctx(), &mut user).unwrap();
    }

    let found = repo
        .find_where(
            &ctx(),
            &[Condition::between(
                "created_at",
                at("2024-02-01T00:00:00Z"),
                at("2024-03-31T00:00:00Z"),
            )],
        )
        .unwrap();
    let mut names: Vec<String> = found.into_iter().map(|u| u.name).collect();
    names.sort();
    assert_eq!(names, vec!["feb", "mar"]);
}

#[test]
fn test_field_names_cannot_inject_sql() {
    let (_temp_file, db) = open_test_database();
    let repo = user_repo(&db);
    seed_users(&repo, 2);

    let err = repo
        .find_where(&ctx(), &[Condition::eq("age = age OR 1", 1)])
        .unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidCondition(_)));

    // 值始终参数化
    let found = repo
        .find_where(&ctx(), &[Condition::eq("name", "x' OR '1'='1")])
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(repo.list(&ctx()).unwrap().len(), 2);
}
