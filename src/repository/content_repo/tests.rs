use super::{ContentDao, ContentFilter, ContentRepository};
use crate::domain::content::{ContentEntity, ContentValue, Validity};
use crate::domain::context::SyncContext;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const TYPE: &str = "person";

fn setup_repo() -> ContentRepository {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::init_schema(&conn).unwrap();
    ContentRepository::new(Arc::new(Mutex::new(conn)))
}

fn value(id: &str, name: &str) -> ContentValue {
    let mut properties = BTreeMap::new();
    properties.insert("name".to_string(), name.to_string());
    ContentValue::new(id, true, Validity::unbounded(), properties)
}

fn entity(id: &str, name: &str, prior: Option<&ContentEntity>) -> ContentEntity {
    ContentEntity::from_value(TYPE, &value(id, name), prior, &SyncContext::new("tester", "repo"))
}

fn tx<T>(repo: &ContentRepository, f: impl FnOnce(&ContentDao<'_>) -> RepositoryResult<T>) -> T {
    repo.with_transaction(f).unwrap()
}

#[test]
fn test_insert_and_find_round_trip() {
    let repo = setup_repo();
    let e = entity("u1", "Alice", None);
    tx(&repo, |dao| dao.insert(&e));

    let found = tx(&repo, |dao| dao.find(TYPE, "u1")).unwrap();
    assert_eq!(found, e);
    assert!(tx(&repo, |dao| dao.find(TYPE, "nope")).is_none());
    assert!(tx(&repo, |dao| dao.find("other-type", "u1")).is_none());
}

#[test]
fn test_rollback_on_error() {
    let repo = setup_repo();
    let e = entity("u1", "Alice", None);
    let result: RepositoryResult<()> = repo.with_transaction(|dao| {
        dao.insert(&e)?;
        Err(RepositoryError::LockError("boom".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(tx(&repo, |dao| dao.count_live(TYPE)), 0);
}

#[test]
fn test_additions_and_updates() {
    let repo = setup_repo();
    let a = entity("a", "A", None);
    let b = entity("b", "B", None);
    tx(&repo, |dao| {
        dao.insert(&a)?;
        dao.insert(&b)
    });

    let changed = value("b", "B2");
    let new = value("c", "C");
    tx(&repo, |dao| {
        dao.clear_work(TYPE)?;
        dao.append_work(
            TYPE,
            [
                ("a", a.digest.as_str()),
                ("b", changed.digest()),
                ("c", new.digest()),
            ],
        )
    });

    let ids = ["a", "b", "c"];
    let additions = tx(&repo, |dao| dao.additions(TYPE, &ids));
    assert_eq!(additions, vec!["c".to_string()]);

    let updates = tx(&repo, |dao| dao.updates(TYPE, &ids));
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].content_id, "b");
    assert_eq!(updates[0].digest, b.digest);
}

#[test]
fn test_merge_checks_version() {
    let repo = setup_repo();
    let v1 = entity("u1", "Alice", None);
    tx(&repo, |dao| dao.insert(&v1));

    let v2 = entity("u1", "Alicia", Some(&v1));
    tx(&repo, |dao| dao.merge(&v2));
    assert_eq!(tx(&repo, |dao| dao.find(TYPE, "u1")).unwrap().version, 2);

    // 基于过期的 v1 再次合并 → 冲突
    let stale = entity("u1", "Ally", Some(&v1));
    let err = repo.with_transaction(|dao| dao.merge(&stale)).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::OptimisticLockFailure { expected_version: 1, .. }
    ));
}

#[test]
fn test_soft_delete_and_revive() {
    let repo = setup_repo();
    let ctx = SyncContext::new("tester", "repo");
    let v1 = entity("u1", "Alice", None);
    tx(&repo, |dao| dao.insert(&v1));

    let tombstone = tx(&repo, |dao| dao.soft_delete(&v1, &ctx.stamp(), ctx.now));
    assert!(tombstone.deleted);
    assert_eq!(tombstone.version, 2);
    assert_eq!(tx(&repo, |dao| dao.count_live(TYPE)), 0);

    // 二次删除同一版本 → 冲突
    assert!(repo
        .with_transaction(|dao| dao.soft_delete(&v1, "x", ctx.now))
        .is_err());

    // 墓碑不算存活，出现在暂存中即为新增
    tx(&repo, |dao| dao.append_work(TYPE, [("u1", v1.digest.as_str())]));
    assert_eq!(tx(&repo, |dao| dao.additions(TYPE, &["u1"])), vec!["u1".to_string()]);

    let revived = ContentEntity::from_value(TYPE, &value("u1", "Alice"), Some(&tombstone), &ctx);
    tx(&repo, |dao| dao.merge(&revived));
    let stored = tx(&repo, |dao| dao.find(TYPE, "u1")).unwrap();
    assert!(!stored.deleted);
    assert_eq!(stored.version, 3);
    assert_eq!(stored.deleted_at, None);
}

#[test]
fn test_lost_respects_work_table_and_filter() {
    let repo = setup_repo();
    let mut disabled = entity("c", "C", None);
    disabled.enabled = false;
    tx(&repo, |dao| {
        dao.insert(&entity("a", "A", None))?;
        dao.insert(&entity("b", "B", None))?;
        dao.insert(&disabled)?;
        dao.append_work(TYPE, [("a", "whatever")])
    });

    assert_eq!(tx(&repo, |dao| dao.count_lost(TYPE, &ContentFilter::All)), 2);
    assert_eq!(tx(&repo, |dao| dao.count_lost(TYPE, &ContentFilter::Enabled(false))), 1);

    let by_name = ContentFilter::PropertyEquals {
        key: "name".to_string(),
        value: "B".to_string(),
    };
    let lost = tx(&repo, |dao| dao.lost(TYPE, &by_name, 10));
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].content_id, "b");

    let first = tx(&repo, |dao| dao.lost(TYPE, &ContentFilter::All, 1));
    assert_eq!(first[0].content_id, "b");
}

#[test]
fn test_rebuild_dependents() {
    let repo = setup_repo();
    let ctx = SyncContext::new("tester", "repo");
    let a = entity("a", "A", None);
    let b = entity("b", "B", None);
    tx(&repo, |dao| {
        dao.insert(&a)?;
        dao.insert(&b)?;
        dao.soft_delete(&b, &ctx.stamp(), ctx.now)?;
        dao.rebuild_dependents(TYPE)
    });

    let props = tx(&repo, |dao| dao.property_values(TYPE, "a"));
    assert_eq!(props.get("name").map(String::as_str), Some("A"));
    assert!(tx(&repo, |dao| dao.property_values(TYPE, "b")).is_empty());
}

#[test]
fn test_large_id_sets_are_batched() {
    let repo = setup_repo();
    let ids: Vec<String> = (0..1_200).map(|i| format!("id-{:04}", i)).collect();
    tx(&repo, |dao| {
        dao.append_work(TYPE, ids.iter().map(|id| (id.as_str(), "d")))
    });
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    assert_eq!(tx(&repo, |dao| dao.additions(TYPE, &refs)).len(), 1_200);
    assert_eq!(tx(&repo, |dao| dao.count_work(TYPE)), 1_200);
}
