// ==========================================
// ImportationFacade 集成测试
// ==========================================
// 测试目标: 验证完整的同步运行（拉取 → 差异 → 分块落库 → 隐式删除 → 后处理）
// ==========================================


use content_sync::config::SyncConfig;
use content_sync::domain::{
    CancelFlag, FailurePhase, ImportOutcome, RecordStatus, SuccessKind,
};
use content_sync::engine::{
    InMemoryRecorder, SqliteRecorder, SyncError, DUPLICATE_ID_REASON,
};
use content_sync::logging;
use content_sync::repository::{ContentFilter, ImportRecordRepository, RepositoryResult};
use test_helpers::{deletion, person, test_ctx, TestEnv, VecImporter};

fn stored(env: &TestEnv, id: &str) -> Option<content_sync::ContentEntity> {
    env.repo
        .with_transaction(|dao| dao.find("person", id))
        .expect("Failed to query content")
}

fn successes(outcomes: &[ImportOutcome], kind: SuccessKind) -> Vec<String> {
    outcomes
        .iter()
        .filter_map(|o| match o {
            ImportOutcome::Success { kind: k, content_id, .. } if *k == kind => Some(content_id.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_scenario_a_registers_new_record() {
    logging::init_test();
    let env = TestEnv::new();

    // 只配置 name 公式，标识回退到源记录
    let config = SyncConfig {
        spill_dir: env.spill_dir.path().to_path_buf(),
        ..SyncConfig::for_type("person")
    }
    .with_formula("name", "field(name)");
    let facade = env.facade(config);

    let importer = VecImporter::new(vec![person("u1", "Alice")]);
    let mut recorder = InMemoryRecorder::new();
    let report = facade.run(&importer, &mut recorder, &test_ctx()).await.unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.registered, 1);
    assert_eq!(report.chunks_flushed, 1);
    assert_eq!(
        recorder.outcomes(),
        vec![ImportOutcome::success(SuccessKind::Register, "u1", Some(person("u1", "Alice")))]
    );

    let entity = stored(&env, "u1").unwrap();
    assert_eq!(entity.properties["name"], "Alice");
    assert_eq!(entity.version, 1);
    assert!(entity.active);
    assert_eq!(entity.created_by, "tester@sync-test");

    let statuses = importer.post_processed().unwrap();
    assert_eq!(
        statuses["u1"],
        RecordStatus::Succeeded {
            kind: SuccessKind::Register
        }
    );
    assert_eq!(env.spill_files(), 0);
}

#[tokio::test]
async fn test_scenario_b_unchanged_rerun_produces_no_outcomes() {
    logging::init_test();
    let env = TestEnv::new();
    let facade = env.facade(env.config());
    let records = vec![person("u1", "Alice"), person("u2", "Bob")];

    let mut first = InMemoryRecorder::new();
    facade
        .run(&VecImporter::new(records.clone()), &mut first, &test_ctx())
        .await
        .unwrap();
    assert_eq!(first.outcomes().len(), 2);

    let importer = VecImporter::new(records);
    let mut second = InMemoryRecorder::new();
    let report = facade.run(&importer, &mut second, &test_ctx()).await.unwrap();

    assert_eq!(report.registered, 0);
    assert!(second.outcomes().is_empty());
    assert_eq!(stored(&env, "u1").unwrap().version, 1);
    assert_eq!(importer.post_processed().unwrap()["u2"], RecordStatus::Unchanged);
}

#[tokio::test]
async fn test_scenario_c_duplicate_ids() {
    logging::init_test();
    let env = TestEnv::new();
    let facade = env.facade(env.config());

    let importer = VecImporter::new(vec![person("u1", "Alice"), person("u1", "Alicia")]);
    let mut recorder = InMemoryRecorder::new();
    let report = facade.run(&importer, &mut recorder, &test_ctx()).await.unwrap();

    assert_eq!(report.duplicate_failures, 1);
    assert_eq!(report.registered, 1);

    let outcomes = recorder.outcomes();
    assert_eq!(
        outcomes[0],
        ImportOutcome::failure(
            FailurePhase::Validation,
            DUPLICATE_ID_REASON,
            Some("u1".to_string()),
            Some(person("u1", "Alicia")),
        )
    );
    assert_eq!(successes(&outcomes, SuccessKind::Register), vec!["u1"]);

    // 代表值为首次出现的记录
    assert_eq!(stored(&env, "u1").unwrap().properties["name"], "Alice");
    assert!(importer.post_processed().unwrap()["u1"].is_failure());
}

#[tokio::test]
async fn test_scenario_d_implicit_deletion_within_limit() {
    logging::init_test();
    let env = TestEnv::new();
    let seed = env.facade(env.config());
    seed.run(
        &VecImporter::new(vec![person("u1", "Alice"), person("u2", "Bob")]),
        &mut InMemoryRecorder::new(),
        &test_ctx(),
    )
    .await
    .unwrap();

    let config = SyncConfig {
        implicit_deletion_allowed: true,
        deletion_limit: 10,
        ..env.config()
    };
    let facade = env.facade(config);
    let mut recorder = InMemoryRecorder::new();
    let report = facade
        .run(&VecImporter::new(vec![person("u1", "Alice")]), &mut recorder, &test_ctx())
        .await
        .unwrap();

    assert_eq!(report.deleted_implicit, 1);
    assert!(!report.implicit_deletion_skipped);
    assert_eq!(
        recorder.outcomes(),
        vec![ImportOutcome::success(SuccessKind::Deletion, "u2", None)]
    );

    let u2 = stored(&env, "u2").unwrap();
    assert!(u2.deleted);
    assert_eq!(u2.deleted_by.as_deref(), Some("tester@sync-test"));
    assert_eq!(u2.version, 2);
    assert!(!stored(&env, "u1").unwrap().deleted);
}

#[tokio::test]
async fn test_scenario_d_implicit_deletion_over_limit_is_skipped() {
    logging::init_test();
    let env = TestEnv::new();
    env.facade(env.config())
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), person("u2", "Bob")]),
            &mut InMemoryRecorder::new(),
            &test_ctx(),
        )
        .await
        .unwrap();

    let config = SyncConfig {
        implicit_deletion_allowed: true,
        deletion_limit: 0,
        ..env.config()
    };
    let mut recorder = InMemoryRecorder::new();
    let report = env
        .facade(config)
        .run(&VecImporter::new(vec![person("u1", "Alice")]), &mut recorder, &test_ctx())
        .await
        .unwrap();

    assert!(report.implicit_deletion_skipped);
    assert_eq!(report.deleted_implicit, 0);

    let outcomes = recorder.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        &outcomes[0],
        ImportOutcome::Failure {
            phase: FailurePhase::Provisioning,
            content_id: None,
            source: None,
            ..
        }
    ));
    assert!(!stored(&env, "u2").unwrap().deleted);
}

#[tokio::test]
async fn test_implicit_deletion_respects_filter() {
    logging::init_test();
    let env = TestEnv::new();
    env.facade(env.config())
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), person("u2", "Bob"), person("u3", "Carol")]),
            &mut InMemoryRecorder::new(),
            &test_ctx(),
        )
        .await
        .unwrap();

    let config = SyncConfig {
        implicit_deletion_allowed: true,
        ..env.config()
    };
    let facade = env.facade(config).with_filter(ContentFilter::PropertyEquals {
        key: "name".to_string(),
        value: "Bob".to_string(),
    });
    let report = facade
        .run(&VecImporter::new(vec![]), &mut InMemoryRecorder::new(), &test_ctx())
        .await
        .unwrap();

    assert_eq!(report.deleted_implicit, 1);
    assert!(stored(&env, "u2").unwrap().deleted);
    assert!(!stored(&env, "u1").unwrap().deleted);
    assert!(!stored(&env, "u3").unwrap().deleted);
}

#[tokio::test]
async fn test_explicit_deletion() {
    logging::init_test();
    let env = TestEnv::new();
    let facade = env.facade(env.config());
    facade
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), person("u2", "Bob")]),
            &mut InMemoryRecorder::new(),
            &test_ctx(),
        )
        .await
        .unwrap();

    // u9 不存在: 删除请求被忽略
    let mut recorder = InMemoryRecorder::new();
    let report = facade
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), deletion("u2"), deletion("u9")]),
            &mut recorder,
            &test_ctx(),
        )
        .await
        .unwrap();

    assert_eq!(report.deleted_explicit, 1);
    assert_eq!(report.registered, 0);
    assert_eq!(
        recorder.outcomes(),
        vec![ImportOutcome::success(SuccessKind::Deletion, "u2", Some(deletion("u2")))]
    );
    assert!(stored(&env, "u2").unwrap().deleted);
    assert!(stored(&env, "u9").is_none());

    // 再次出现的 u2 复活墓碑并继承版本
    let report = facade
        .run(&VecImporter::new(vec![person("u2", "Bob")]), &mut InMemoryRecorder::new(), &test_ctx())
        .await
        .unwrap();
    assert_eq!(report.registered, 1);
    let u2 = stored(&env, "u2").unwrap();
    assert!(!u2.deleted);
    assert_eq!(u2.version, 3);
}

#[tokio::test]
async fn test_chunking_flushes_once_per_chunk() {
    logging::init_test();
    let env = TestEnv::new();
    let config = SyncConfig {
        chunk_size: 10,
        memory_threshold: 7,
        ..env.config()
    };
    let facade = env.facade(config);

    let records: Vec<_> = (0..25).map(|i| person(&format!("u{:02}", i), "Name")).collect();
    let mut recorder = InMemoryRecorder::new();
    let report = facade
        .run(&VecImporter::new(records), &mut recorder, &test_ctx())
        .await
        .unwrap();

    assert_eq!(report.chunks_flushed, 3);
    assert_eq!(recorder.flush_count(), 3);
    assert_eq!(report.registered, 25);
    assert_eq!(recorder.outcomes().len(), 25);
    assert_eq!(env.spill_files(), 0);
}

#[tokio::test]
async fn test_only_changed_records_are_registered() {
    logging::init_test();
    let env = TestEnv::new();
    let facade = env.facade(env.config());
    facade
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), person("u2", "Bob")]),
            &mut InMemoryRecorder::new(),
            &test_ctx(),
        )
        .await
        .unwrap();

    let mut recorder = InMemoryRecorder::new();
    facade
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), person("u2", "Robert"), person("u3", "Carol")]),
            &mut recorder,
            &test_ctx(),
        )
        .await
        .unwrap();

    assert_eq!(
        successes(&recorder.outcomes(), SuccessKind::Register),
        vec!["u2", "u3"]
    );
    assert_eq!(stored(&env, "u1").unwrap().version, 1);
    let u2 = stored(&env, "u2").unwrap();
    assert_eq!(u2.version, 2);
    assert_eq!(u2.properties["name"], "Robert");
}

#[tokio::test]
async fn test_transformation_and_validation_failures_are_recorded() {
    logging::init_test();
    let env = TestEnv::new();
    let config = env.config().with_formula("age", "number(age)");
    let facade = env.facade(config);

    let bad_age: content_sync::RawRecord =
        [("id", "u1"), ("name", "Alice"), ("age", "old")].into_iter().collect();
    let no_id: content_sync::RawRecord = [("name", "Nobody")].into_iter().collect();

    let importer = VecImporter::new(vec![bad_age, no_id, person("u3", "Carol")]);
    let mut recorder = InMemoryRecorder::new();
    let report = facade.run(&importer, &mut recorder, &test_ctx()).await.unwrap();

    assert_eq!(report.transformation_failures, 1);
    assert_eq!(report.validation_failures, 1);
    assert_eq!(report.registered, 1);

    let statuses = importer.post_processed().unwrap();
    assert!(matches!(
        &statuses["u1"],
        RecordStatus::Failed {
            phase: FailurePhase::Transformation,
            ..
        }
    ));
    assert!(matches!(
        &statuses["#2"],
        RecordStatus::Failed {
            phase: FailurePhase::Validation,
            reason
        } if reason == "Missing id"
    ));
    assert!(!statuses["u3"].is_failure());
}

#[tokio::test]
async fn test_optimistic_lock_conflict_aborts_run() {
    logging::init_test();
    let env = TestEnv::new();
    let config = SyncConfig {
        chunk_size: 1,
        ..env.config()
    };
    let facade = env.facade(config);
    facade
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), person("u2", "Bob")]),
            &mut InMemoryRecorder::new(),
            &test_ctx(),
        )
        .await
        .unwrap();

    // 模拟并发修改: u2 的更新被忽略，影响行数为 0
    {
        let conn = rusqlite::Connection::open(&env.db_path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER concurrent_edit BEFORE UPDATE ON content
             WHEN OLD.content_id = 'u2'
             BEGIN SELECT RAISE(IGNORE); END;",
        )
        .unwrap();
    }

    let mut recorder = InMemoryRecorder::new();
    let err = facade
        .run(
            &VecImporter::new(vec![person("u1", "Alicia"), person("u2", "Robert")]),
            &mut recorder,
            &test_ctx(),
        )
        .await
        .unwrap_err();
    assert!(err.is_optimistic_lock_failure(), "{}", err);

    // 前一块已提交，冲突块回滚
    assert_eq!(stored(&env, "u1").unwrap().properties["name"], "Alicia");
    assert_eq!(stored(&env, "u2").unwrap().properties["name"], "Bob");
    assert_eq!(successes(&recorder.outcomes(), SuccessKind::Register), vec!["u1"]);
    assert_eq!(env.spill_files(), 0);
}

#[tokio::test]
async fn test_cancellation_aborts_before_next_chunk() {
    logging::init_test();
    let env = TestEnv::new();
    let facade = env.facade(env.config());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let ctx = test_ctx().with_cancel(cancel);

    let importer = VecImporter::new(vec![person("u1", "Alice")]);
    let err = facade
        .run(&importer, &mut InMemoryRecorder::new(), &ctx)
        .await
        .unwrap_err();

    assert!(err.is_interrupted());
    assert!(stored(&env, "u1").is_none());
    assert!(importer.post_processed().is_none());
    assert_eq!(env.spill_files(), 0);
}

#[tokio::test]
async fn test_importer_interrupt_aborts_run() {
    logging::init_test();
    let env = TestEnv::new();
    let facade = env.facade(env.config());

    let importer = VecImporter::new(vec![person("u1", "Alice"), person("u2", "Bob")]).interrupted_after(1);
    let err = facade
        .run(&importer, &mut InMemoryRecorder::new(), &test_ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Interrupted(_)));
    assert!(stored(&env, "u1").is_none());
    assert_eq!(env.spill_files(), 0);
}

#[tokio::test]
async fn test_sqlite_recorder_persists_run_outcomes() {
    logging::init_test();
    let env = TestEnv::new();
    let facade = env.facade(env.config());
    let ctx = test_ctx();

    let mut recorder = SqliteRecorder::new(env.repo.shared_connection(), &ctx.run_id, "person");
    facade
        .run(
            &VecImporter::new(vec![person("u1", "Alice"), person("u1", "Again")]),
            &mut recorder,
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(recorder.written(), 2);

    let audit = ImportRecordRepository::new(env.repo.shared_connection());
    let outcomes = audit.find_by_run(&ctx.run_id).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(!outcomes[0].is_success());
    assert!(outcomes[1].is_success());
}

#[tokio::test]
async fn test_rebuild_populates_property_table() {
    logging::init_test();
    let env = TestEnv::new();
    env.facade(env.config())
        .run(
            &VecImporter::new(vec![person("u1", "Alice")]),
            &mut InMemoryRecorder::new(),
            &test_ctx(),
        )
        .await
        .unwrap();

    let values = env
        .repo
        .with_transaction(|dao| -> RepositoryResult<_> { dao.property_values("person", "u1") })
        .unwrap();
    assert_eq!(values.get("name").map(String::as_str), Some("Alice"));
}
