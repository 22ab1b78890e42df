use super::*;
use crate::domain::types::FailurePhase;
use crate::repository::content_repo::ContentRepository;
use chrono::{Duration, TimeZone, Utc};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn service() -> ImportationService {
    ImportationService::new(SyncConfig {
        required_properties: vec!["name".to_string()],
        ..SyncConfig::for_type("person")
    })
}

fn setup_repo() -> ContentRepository {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::init_schema(&conn).unwrap();
    ContentRepository::new(Arc::new(Mutex::new(conn)))
}

fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn build(
    service: &ImportationService,
    pairs: &[(&str, &str)],
) -> (Option<ImportationValue>, Vec<ValidationFailure>) {
    let ctx = SyncContext::new("tester", "service");
    let source: RawRecord = pairs.iter().copied().collect();
    let mut failures = Vec::new();
    let value = service.to_importation_value(fields(pairs), source, &ctx, |f| failures.push(f));
    (value, failures)
}

fn value(id: &str, name: &str) -> ImportationValue {
    build(&service(), &[("id", id), ("name", name)]).0.unwrap()
}

#[test]
fn test_builds_value_with_properties() {
    let (value, failures) = build(
        &service(),
        &[
            ("id", " u1 "),
            ("name", "Alice"),
            ("enabled", "N"),
            ("valid_from", "2025-01-01"),
            ("valid_to", "20251231"),
        ],
    );
    assert!(failures.is_empty());
    let value = value.unwrap();
    assert_eq!(value.key(), "u1");
    assert!(!value.content.enabled());
    assert_eq!(
        value.content.validity().from,
        Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    );
    // 保留字段不进入属性
    assert_eq!(value.content.properties().keys().collect::<Vec<_>>(), vec!["name"]);
    assert!(!value.deletion_requested);
}

#[test]
fn test_id_falls_back_to_source_record() {
    let service = service();
    let ctx = SyncContext::new("tester", "service");
    let source: RawRecord = [("id", "raw-1"), ("name", "Bob")].into_iter().collect();
    let value = service
        .to_importation_value(fields(&[("name", "Bob")]), source, &ctx, |_| {
            panic!("unexpected failure")
        })
        .unwrap();
    assert_eq!(value.key(), "raw-1");
}

#[test]
fn test_validation_failures_are_reported() {
    let long_id = "x".repeat(MAX_ID_LENGTH + 1);
    let cases: Vec<(Vec<(&str, &str)>, &str)> = vec![
        (vec![("name", "NoId")], "Missing id"),
        (vec![("id", "  "), ("name", "Blank")], "Missing id"),
        (vec![("id", long_id.as_str()), ("name", "Long")], "Id exceeds"),
        (vec![("id", "u1"), ("name", "A"), ("enabled", "perhaps")], "Invalid flag in enabled"),
        (vec![("id", "u1"), ("name", "A"), ("valid_to", "31/12/2025")], "Invalid date in valid_to"),
        (
            vec![("id", "u1"), ("name", "A"), ("valid_from", "2026-01-01"), ("valid_to", "2025-01-01")],
            "Validity start is after end",
        ),
        (vec![("id", "u1")], "Missing required property: name"),
    ];

    for (pairs, expected) in cases {
        let (value, failures) = build(&service(), &pairs);
        assert!(value.is_none(), "{:?}", pairs);
        assert_eq!(failures.len(), 1);
        assert!(
            failures[0].reason.starts_with(expected),
            "{} vs {}",
            failures[0].reason,
            expected
        );
        assert_eq!(failures[0].source, pairs.iter().copied().collect::<RawRecord>());
    }
}

#[test]
fn test_deletion_flag() {
    // 删除请求不要求必填属性
    let (value, failures) = build(&service(), &[("id", "u1"), ("deleted", "是")]);
    assert!(failures.is_empty());
    assert!(value.unwrap().deletion_requested);
}

#[test]
fn test_get_to_be_registered_diff() {
    let service = service();
    let repo = setup_repo();
    let ctx = SyncContext::new("tester", "service");

    // 库中已有 a（不变）、b（将变化）、c（已逻辑删除）
    repo.with_transaction(|dao| -> RepositoryResult<()> {
        service.register(dao, &value("a", "A"), &ctx)?;
        service.register(dao, &value("b", "B"), &ctx)?;
        let c = service.register(dao, &value("c", "C"), &ctx)?;
        service.delete(dao, &c, &ctx)?;
        Ok(())
    })
    .unwrap();

    let staged: BTreeMap<String, ImportationValue> = [value("a", "A"), value("b", "B2"), value("c", "C"), value("d", "D")]
        .into_iter()
        .map(|v| (v.key().to_string(), v))
        .collect();
    let values: Vec<ImportationValue> = staged.values().cloned().collect();

    let result = repo
        .with_transaction(|dao| -> RepositoryResult<Vec<ImportationValue>> {
            service.initialize_work(dao)?;
            service.register_work(dao, &values)?;
            service.get_to_be_registered(dao, &staged)
        })
        .unwrap();

    let ids: Vec<&str> = result.iter().map(|v| v.key()).collect();
    assert_eq!(ids, vec!["b", "c", "d"]);
    assert_eq!(result[0].prior.as_ref().map(|p| p.version), Some(1));
    // 墓碑被复活: 继承删除后的版本
    assert_eq!(result[1].prior.as_ref().map(|p| p.version), Some(2));
    assert!(result[2].prior.is_none());

    repo.with_transaction(|dao| -> RepositoryResult<()> {
        for v in &result {
            service.register(dao, v, &ctx)?;
        }
        let c = dao.find("person", "c")?.unwrap();
        assert!(!c.deleted);
        assert_eq!(c.version, 3);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_rebuild_refreshes_active_flag() {
    let service = service();
    let repo = setup_repo();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let ctx = SyncContext::new("tester", "service").at(now);

    let (expiring, _) = build(
        &service,
        &[("id", "u1"), ("name", "A"), ("valid_to", "2025-06-02")],
    );
    repo.with_transaction(|dao| service.register(dao, &expiring.unwrap(), &ctx))
        .unwrap();

    let later = ctx.clone().at(now + Duration::days(2));
    let summary = repo
        .with_transaction(|dao| service.rebuild(dao, &later))
        .unwrap();
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.properties, 1);

    let stored = repo
        .with_transaction(|dao| dao.find("person", "u1"))
        .unwrap()
        .unwrap();
    assert!(!stored.active);
    assert_eq!(stored.version, 1);

    // 再次重建无变化
    let again = repo.with_transaction(|dao| service.rebuild(dao, &later)).unwrap();
    assert_eq!(again.refreshed, 0);
}

#[test]
fn test_content_map_keyed_by_id() {
    let service = service();
    let dir = tempfile::TempDir::new().unwrap();
    let map = service
        .to_content_map(vec![value("a", "A"), value("a", "A2"), value("b", "B")], dir.path())
        .unwrap();
    assert_eq!(map.len(), 2);
    assert!(map.has_duplicates());
    assert_eq!(map.get("a").unwrap().unwrap().content.properties()["name"], "A");
    map.close().unwrap();
}

#[test]
fn test_failure_phase_is_validation_for_callbacks() {
    // 回调载荷只携带原因和源记录，阶段由门面决定
    let (_, failures) = build(&service(), &[("name", "x")]);
    let outcome = crate::domain::outcome::ImportOutcome::failure(
        FailurePhase::Validation,
        failures[0].reason.clone(),
        failures[0].content_id.clone(),
        Some(failures[0].source.clone()),
    );
    assert!(!outcome.is_success());
}
