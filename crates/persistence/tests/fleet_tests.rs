//! Fleet integration tests.
//!
//! Every test runs against in-memory SQLite databases wrapped in
//! [`ControllableBackend`](common::ControllableBackend) so reachability and
//! reported size can be scripted.

mod common;

use std::time::{Duration, Instant};

use serde_json::json;

use common::*;
use nimbus_persistence::error::{
    BackendError, FleetError, ResourceError, StorageError, ValidationError,
};
use nimbus_persistence::registry::{BackendEntry, FailoverOutcome, HealthCheckResult};
use nimbus_persistence::types::{
    Entity, EntityKind, FileEntry, Folder, Notification, NotificationCategory, Share, ShareStatus,
    new_entity_id,
};
use nimbus_persistence::{BackendKind, EntityStorage};

fn primaries(harness: &TestFleet) -> Vec<String> {
    harness
        .fleet
        .get_status()
        .backends
        .into_iter()
        .filter(|d| d.is_primary)
        .map(|d| d.id)
        .collect()
}

// ============================================================================
// Write Routing
// ============================================================================

#[tokio::test]
async fn test_create_targets_primary() {
    let harness = TestFleet::two_backends();

    let created = harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Photos"))
        .await
        .unwrap();

    assert_eq!(harness.backend("db-1").insert_count(), 1);
    assert_eq!(harness.backend("db-2").insert_count(), 0);
    assert!(
        harness
            .backend("db-1")
            .inner()
            .read(created.id())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_create_then_find_round_trip() {
    let harness = TestFleet::two_backends();

    let created = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "report.pdf", 2048))
        .await
        .unwrap();
    let found = harness.fleet.find_by_id(created.id()).await.unwrap();

    assert_eq!(found, Some(created));
}

#[tokio::test]
async fn test_create_keeps_client_id() {
    let harness = TestFleet::two_backends();
    let id = new_entity_id();

    let created = harness
        .fleet
        .create(
            EntityKind::Folder,
            json!({"id": &id, "ownerId": "u-1", "name": "Docs"}),
        )
        .await
        .unwrap();
    assert_eq!(created.id(), id);

    let err = harness
        .fleet
        .create(
            EntityKind::Folder,
            json!({"id": &id, "ownerId": "u-1", "name": "Docs"}),
        )
        .await
        .unwrap_err();
    match err {
        StorageError::Backend(BackendError::WriteRejected {
            backend_name,
            message,
        }) => {
            assert_eq!(backend_name, "db-1");
            assert!(message.contains("already exists"), "{message}");
        }
        other => panic!("expected WriteRejected, got {other:?}"),
    }
    assert_eq!(harness.backend("db-1").insert_count(), 1);
}

#[tokio::test]
async fn test_create_without_primary_is_unavailable() {
    let harness = TestFleet::from_entries(vec![entry("db-1", 1, 100), entry("db-2", 2, 100)]);

    let err = harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Photos"))
        .await
        .unwrap_err();

    assert!(err.is_storage_unavailable());
    assert_eq!(harness.backend("db-1").insert_count(), 0);
    assert_eq!(harness.backend("db-2").insert_count(), 0);
}

#[tokio::test]
async fn test_failed_write_is_not_retried() {
    let harness = TestFleet::two_backends();
    harness.backend("db-1").set_reachable(false);

    let err = harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Photos"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StorageError::Backend(BackendError::WriteRejected { ref backend_name, .. }) if backend_name == "db-1"
    ));
    assert_eq!(harness.backend("db-2").insert_count(), 0);
}

#[tokio::test]
async fn test_create_requires_owner() {
    let harness = TestFleet::two_backends();

    let err = harness
        .fleet
        .create(EntityKind::Folder, json!({"name": "orphan"}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::MissingRequiredField { .. })
    ));
}

// ============================================================================
// Fan-Out Reads
// ============================================================================

#[tokio::test]
async fn test_list_merges_all_backends_sorted() {
    let harness = TestFleet::two_backends();
    for minutes in [1, 3, 5] {
        harness
            .seed("db-1", &file_at("u-1", &format!("a{minutes}"), minutes))
            .await;
    }
    for minutes in [2, 4, 6] {
        harness
            .seed("db-2", &file_at("u-1", &format!("b{minutes}"), minutes))
            .await;
    }
    harness.seed("db-2", &file_at("u-2", "other", 1)).await;

    let files = harness
        .fleet
        .list_by_owner("u-1", EntityKind::File)
        .await
        .unwrap();

    assert_eq!(files.len(), 6);
    assert!(files.windows(2).all(|w| w[0].created_at() >= w[1].created_at()));
    let names: Vec<_> = files.iter().filter_map(|f| f.name()).collect();
    assert_eq!(names, vec!["a1", "b2", "a3", "b4", "a5", "b6"]);
}

#[tokio::test]
async fn test_list_folders_by_name() {
    let harness = TestFleet::two_backends();
    harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "taxes"))
        .await
        .unwrap();
    harness.fleet.switch_primary("db-2").await.unwrap();
    harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Archive"))
        .await
        .unwrap();

    let folders: Vec<Folder> = harness.fleet.list_entities("u-1").await.unwrap();
    let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Archive", "taxes"]);
}

#[tokio::test]
async fn test_list_skips_unreachable_backend() {
    let harness = TestFleet::two_backends();
    let mut expected = Vec::new();
    for minutes in [1, 2, 3] {
        let file = file_at("u-1", &format!("a{minutes}"), minutes);
        expected.push(file.id().to_string());
        harness.seed("db-1", &file).await;
        harness
            .seed("db-2", &file_at("u-1", &format!("b{minutes}"), minutes))
            .await;
    }
    harness.backend("db-2").set_reachable(false);

    let files = harness
        .fleet
        .list_by_owner("u-1", EntityKind::File)
        .await
        .unwrap();

    let ids: Vec<_> = files.iter().map(|f| f.id().to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_list_with_every_backend_down_is_empty() {
    let harness = TestFleet::two_backends();
    harness.seed("db-1", &file_at("u-1", "a", 1)).await;
    harness.backend("db-1").set_reachable(false);
    harness.backend("db-2").set_reachable(false);

    let files = harness
        .fleet
        .list_by_owner("u-1", EntityKind::File)
        .await
        .unwrap();
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_find_by_id_on_any_backend() {
    let harness = TestFleet::two_backends();
    let file = file_at("u-1", "backup-only", 1);
    harness.seed("db-2", &file).await;
    harness.backend("db-1").set_reachable(false);

    let found = harness.fleet.find_by_id(file.id()).await.unwrap();
    assert_eq!(found.map(|f| f.id().to_string()), Some(file.id().to_string()));

    let missing = harness.fleet.find_by_id(&new_entity_id()).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_storage_usage_sums_backends() {
    let harness = TestFleet::two_backends();
    harness.seed("db-1", &file_at("u-1", "a", 1)).await;
    harness.seed("db-1", &file_at("u-1", "b", 2)).await;
    harness.seed("db-2", &file_at("u-1", "c", 3)).await;

    let mut trashed = file_at("u-1", "d", 4);
    trashed.mark_deleted().unwrap();
    harness.seed("db-2", &trashed).await;

    let usage = harness.fleet.storage_usage("u-1").await.unwrap();
    assert_eq!(usage.file_count, 3);
    assert_eq!(usage.total_bytes, 30);
    assert_eq!(usage.trashed_count, 1);
    assert_eq!(usage.trashed_bytes, 10);
}

#[tokio::test]
async fn test_statistics_reports_unreachable() {
    let harness = TestFleet::two_backends();
    harness.seed("db-1", &file_at("u-1", "a", 1)).await;
    harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Photos"))
        .await
        .unwrap();
    harness.seed("db-2", &file_at("u-1", "b", 1)).await;
    harness.backend("db-2").set_reachable(false);

    let stats = harness.fleet.statistics().await.unwrap();
    assert_eq!(stats.count(EntityKind::File), 1);
    assert_eq!(stats.count(EntityKind::Folder), 1);
    assert_eq!(stats.total_file_bytes, 10);
    assert_eq!(stats.unreachable_backends, vec!["db-2".to_string()]);
    assert!(stats.per_backend.contains_key("db-1"));
}

// ============================================================================
// Updates and Deletes
// ============================================================================

#[tokio::test]
async fn test_update_runs_on_holding_backend() {
    let harness = TestFleet::two_backends();
    let folder = nimbus_persistence::StoredEntity::from_payload(
        EntityKind::Folder,
        folder_payload("u-1", "Old"),
    )
    .unwrap();
    harness.seed("db-2", &folder).await;

    let updated = harness
        .fleet
        .update(folder.id(), &json!({"name": "New", "color": "blue"}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name(), Some("New"));
    assert!(updated.updated_at() >= folder.updated_at());

    let on_backup = harness
        .backend("db-2")
        .inner()
        .read(folder.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(on_backup.data()["color"], "blue");
    assert_eq!(harness.backend("db-1").insert_count(), 0);
}

#[tokio::test]
async fn test_update_rejects_identity_fields() {
    let harness = TestFleet::two_backends();
    let created = harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Photos"))
        .await
        .unwrap();

    let err = harness
        .fleet
        .update(created.id(), &json!({"ownerId": "u-2"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::InvalidPatch { .. })
    ));

    let missing = harness
        .fleet
        .update(&new_entity_id(), &json!({"name": "x"}))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_keep_every_field() {
    let harness = TestFleet::two_backends();

    for round in 0..50 {
        let folder = harness
            .fleet
            .create(EntityKind::Folder, folder_payload("u-1", "A"))
            .await
            .unwrap();

        let name_patch = json!({"name": "B"});
        let color_patch = json!({"color": "blue"});
        let (renamed, colored) = tokio::join!(
            harness.fleet.update(folder.id(), &name_patch),
            harness.fleet.update(folder.id(), &color_patch),
        );
        assert!(renamed.unwrap().is_some());
        assert!(colored.unwrap().is_some());

        let stored = harness.fleet.find_by_id(folder.id()).await.unwrap().unwrap();
        assert_eq!(stored.name(), Some("B"), "round {round}");
        assert_eq!(stored.data()["color"], "blue", "round {round}");
    }
}

#[tokio::test]
async fn test_concurrent_soft_delete_and_update() {
    let harness = TestFleet::two_backends();
    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "a.txt", 10))
        .await
        .unwrap();

    let name_patch = json!({"name": "b.txt"});
    let (trashed, renamed) = tokio::join!(
        harness.fleet.soft_delete(file.id()),
        harness.fleet.update(file.id(), &name_patch),
    );
    trashed.unwrap();
    renamed.unwrap();

    let stored = harness.fleet.find_by_id(file.id()).await.unwrap().unwrap();
    assert!(stored.is_deleted());
    assert_eq!(stored.name(), Some("b.txt"));
}

#[tokio::test]
async fn test_soft_delete_and_restore() {
    let harness = TestFleet::two_backends();
    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "draft.txt", 5))
        .await
        .unwrap();

    let trashed = harness.fleet.soft_delete(file.id()).await.unwrap().unwrap();
    assert!(trashed.is_deleted());
    assert!(
        harness
            .fleet
            .list_by_owner("u-1", EntityKind::File)
            .await
            .unwrap()
            .is_empty()
    );
    let trash = harness.fleet.list_trash("u-1").await.unwrap();
    assert_eq!(trash.len(), 1);

    let restored = harness.fleet.restore(file.id()).await.unwrap().unwrap();
    assert!(!restored.is_deleted());
    assert_eq!(
        harness
            .fleet
            .list_by_owner("u-1", EntityKind::File)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(harness.fleet.list_trash("u-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_soft_delete_is_files_only() {
    let harness = TestFleet::two_backends();
    let folder = harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Photos"))
        .await
        .unwrap();

    let err = harness.fleet.soft_delete(folder.id()).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::UnsupportedOperation { .. })
    ));
}

#[tokio::test]
async fn test_hard_delete() {
    let harness = TestFleet::two_backends();
    let note = harness
        .fleet
        .create(EntityKind::Notification, notification_payload("u-1", "hi"))
        .await
        .unwrap();

    assert!(harness.fleet.delete(note.id()).await.unwrap());
    assert!(harness.fleet.find_by_id(note.id()).await.unwrap().is_none());
    assert!(!harness.fleet.delete(note.id()).await.unwrap());
}

// ============================================================================
// Copies
// ============================================================================

#[tokio::test]
async fn test_copy_across_owners() {
    let harness = TestFleet::two_backends();
    let source = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "photo.jpg", 300))
        .await
        .unwrap();

    let copy = harness
        .fleet
        .copy_across_owners(source.id(), "u-2")
        .await
        .unwrap();

    assert_ne!(copy.id(), source.id());
    assert_eq!(copy.owner_id(), "u-2");
    assert_eq!(copy.data()["originalName"], "photo.jpg");
    assert_eq!(copy.data()["copiedFrom"], source.id());
    assert_eq!(copy.data()["filePath"], source.data()["filePath"]);

    let source_after = harness.fleet.find_by_id(source.id()).await.unwrap();
    assert_eq!(source_after, Some(source));
}

#[tokio::test]
async fn test_copy_lands_on_current_primary() {
    let harness = TestFleet::two_backends();
    let source = file_at("u-1", "old.bin", 10);
    harness.seed("db-1", &source).await;
    assert!(harness.fleet.switch_primary("db-2").await.unwrap());

    let copy = harness
        .fleet
        .copy_across_owners(source.id(), "u-2")
        .await
        .unwrap();

    assert_eq!(harness.backend("db-2").insert_count(), 1);
    assert!(
        harness
            .backend("db-2")
            .inner()
            .read(copy.id())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_copy_missing_or_trashed_source() {
    let harness = TestFleet::two_backends();
    let err = harness
        .fleet
        .copy_across_owners(&new_entity_id(), "u-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Resource(ResourceError::NotFound { .. })
    ));

    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "gone.txt", 1))
        .await
        .unwrap();
    harness.fleet.soft_delete(file.id()).await.unwrap();
    let err = harness
        .fleet
        .copy_across_owners(file.id(), "u-2")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Resource(ResourceError::Gone { .. })));
}

// ============================================================================
// Failover
// ============================================================================

#[tokio::test]
async fn test_probe_promotes_backup_over_threshold() {
    let harness = TestFleet::two_backends();
    harness.backend("db-1").set_size_mb(91.0);

    let report = harness.fleet.run_health_checks_now().await;

    assert_eq!(report.promoted(), Some("db-2"));
    assert_eq!(primaries(&harness), vec!["db-2".to_string()]);
    let status = harness.fleet.get_status();
    assert_eq!(status.current_primary_id.as_deref(), Some("db-2"));
    assert!(status.last_auto_switch_at.is_some());

    let old = harness.fleet.registry().descriptor("db-1").unwrap();
    assert!(!old.is_primary);
    assert_eq!(old.observed_size_mb, Some(91.0));
}

#[tokio::test]
async fn test_probe_under_threshold_keeps_primary() {
    let harness = TestFleet::two_backends();
    harness.backend("db-1").set_size_mb(89.0);

    let report = harness.fleet.run_health_checks_now().await;

    assert!(report.failover.is_none());
    assert_eq!(report.healthy_count(), 2);
    assert_eq!(primaries(&harness), vec!["db-1".to_string()]);
}

#[tokio::test]
async fn test_failover_refused_without_healthy_backup() {
    let harness = TestFleet::two_backends();
    harness.backend("db-1").set_size_mb(95.0);
    harness.backend("db-2").set_reachable(false);

    let report = harness.fleet.run_health_checks_now().await;

    match report.failover {
        Some(FailoverOutcome::Refused(FleetError::FailoverNoEligibleBackup {
            primary_id,
            usage_percent,
        })) => {
            assert_eq!(primary_id, "db-1");
            assert!((usage_percent - 95.0).abs() < 1e-9);
        }
        other => panic!("expected refusal, got {other:?}"),
    }
    assert_eq!(primaries(&harness), vec!["db-1".to_string()]);
    assert!(!harness.fleet.registry().failover_to_best_backup().await);
    assert!(harness.fleet.get_status().last_auto_switch_at.is_none());
}

#[tokio::test]
async fn test_failover_skips_full_backup() {
    let harness = TestFleet::from_entries(vec![
        entry("db-1", 1, 100).as_primary(),
        entry("db-2", 2, 100),
        entry("db-3", 3, 100),
    ]);
    harness.backend("db-1").set_size_mb(95.0);
    harness.backend("db-2").set_size_mb(99.0);

    let report = harness.fleet.run_health_checks_now().await;

    assert_eq!(report.promoted(), Some("db-3"));
    assert_eq!(primaries(&harness), vec!["db-3".to_string()]);
}

#[tokio::test]
async fn test_auto_switch_disabled() {
    let harness = TestFleet::with_config(
        vec![entry("db-1", 1, 100).as_primary(), entry("db-2", 2, 100)],
        false,
    );
    harness.backend("db-1").set_size_mb(99.0);

    let report = harness.fleet.run_health_checks_now().await;
    assert!(report.failover.is_none());
    assert_eq!(primaries(&harness), vec!["db-1".to_string()]);

    harness.fleet.set_auto_switch(true);
    let report = harness.fleet.run_health_checks_now().await;
    assert_eq!(report.promoted(), Some("db-2"));
}

#[tokio::test]
async fn test_unhealthy_probe_keeps_stale_size() {
    let harness = TestFleet::two_backends();
    harness.backend("db-2").set_size_mb(12.0);
    harness.fleet.run_health_checks_now().await;

    harness.backend("db-2").set_reachable(false);
    let report = harness.fleet.run_health_checks_now().await;

    assert!(!report.result("db-2").unwrap().is_healthy());
    let descriptor = harness.fleet.registry().descriptor("db-2").unwrap();
    assert!(!descriptor.is_healthy);
    assert_eq!(descriptor.observed_size_mb, Some(12.0));
    assert_eq!(descriptor.consecutive_failures, 1);
    assert!(descriptor.last_error.is_some());
}

#[tokio::test]
async fn test_capacity_scenario() {
    let harness = TestFleet::two_backends();
    let early = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "early.txt", 1))
        .await
        .unwrap();

    harness.backend("db-1").set_size_mb(95.0);
    let report = harness.fleet.run_health_checks_now().await;
    assert_eq!(report.promoted(), Some("db-2"));

    let late = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "late.txt", 1))
        .await
        .unwrap();
    assert_eq!(harness.backend("db-1").insert_count(), 1);
    assert_eq!(harness.backend("db-2").insert_count(), 1);

    let files = harness
        .fleet
        .list_by_owner("u-1", EntityKind::File)
        .await
        .unwrap();
    let ids: Vec<_> = files.iter().map(|f| f.id()).collect();
    assert!(ids.contains(&early.id()));
    assert!(ids.contains(&late.id()));
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_switch_primary() {
    let harness = TestFleet::two_backends();

    assert!(harness.fleet.switch_primary("db-1").await.unwrap());
    assert!(harness.fleet.switch_primary("db-2").await.unwrap());
    assert_eq!(primaries(&harness), vec!["db-2".to_string()]);
    assert!(harness.fleet.get_status().last_auto_switch_at.is_none());

    let err = harness.fleet.switch_primary("db-9").await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Fleet(FleetError::UnknownBackend { .. })
    ));
}

#[tokio::test]
async fn test_switch_primary_refuses_unreachable() {
    let harness = TestFleet::two_backends();
    harness.backend("db-2").set_reachable(false);

    assert!(!harness.fleet.switch_primary("db-2").await.unwrap());
    assert_eq!(primaries(&harness), vec!["db-1".to_string()]);
}

#[tokio::test]
async fn test_deactivate_backend() {
    let harness = TestFleet::two_backends();
    harness.seed("db-2", &file_at("u-1", "b", 1)).await;

    let err = harness
        .fleet
        .set_backend_active("db-1", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Fleet(FleetError::PrimaryDeactivation { .. })
    ));

    harness.fleet.set_backend_active("db-2", false).await.unwrap();
    assert!(
        harness
            .fleet
            .list_by_owner("u-1", EntityKind::File)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(!harness.fleet.switch_primary("db-2").await.unwrap());

    harness.fleet.set_backend_active("db-2", true).await.unwrap();
    assert_eq!(
        harness
            .fleet
            .list_by_owner("u-1", EntityKind::File)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_add_backend_at_runtime() {
    let harness = TestFleet::two_backends();

    let added = harness
        .fleet
        .add_backend(
            BackendEntry::new("db-3", BackendKind::Sqlite, ":memory:")
                .with_priority(3)
                .as_primary(),
        )
        .await
        .unwrap();
    assert!(!added.is_primary);
    assert!(added.is_healthy);
    assert!(added.observed_size_mb.is_some());
    assert_eq!(primaries(&harness), vec!["db-1".to_string()]);

    let ids: Vec<_> = harness
        .fleet
        .get_status()
        .backends
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec!["db-1", "db-2", "db-3"]);

    assert!(harness.fleet.switch_primary("db-3").await.unwrap());
    let created = harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "New"))
        .await
        .unwrap();
    assert_eq!(harness.backend("db-1").insert_count(), 0);
    assert!(harness.fleet.find_by_id(created.id()).await.unwrap().is_some());

    let err = harness
        .fleet
        .add_backend(BackendEntry::new("db-2", BackendKind::Sqlite, ":memory:"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Fleet(FleetError::DuplicateBackend { .. })
    ));
}

#[tokio::test]
async fn test_status_hides_connection() {
    let harness = TestFleet::two_backends();
    let status = harness.fleet.get_status();

    assert!(!status.is_degraded());
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["currentPrimaryId"], "db-1");
    assert!(json["backends"][0].get("connection").is_none());
    assert_eq!(json["backends"][0]["capacityLimitMb"], 100);
}

#[tokio::test]
async fn test_monitor_fails_over_in_background() {
    let harness = TestFleet::two_backends();
    harness.backend("db-1").set_size_mb(97.0);

    assert!(harness.fleet.start_monitor().await);
    assert!(!harness.fleet.start_monitor().await);
    assert!(harness.fleet.monitor_running().await);

    let mut promoted = false;
    for _ in 0..100 {
        if harness.fleet.get_status().current_primary_id.as_deref() == Some("db-2") {
            promoted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(promoted);

    harness.fleet.stop_monitor().await;
    assert!(!harness.fleet.monitor_running().await);
}

// ============================================================================
// Typed Helpers and Sharing
// ============================================================================

#[tokio::test]
async fn test_typed_helpers() {
    let harness = TestFleet::two_backends();
    let folder = Folder {
        id: new_entity_id(),
        owner_id: "u-1".to_string(),
        name: "Music".to_string(),
        parent_id: None,
        created_at: chrono::SubsecRound::trunc_subsecs(chrono::Utc::now(), 6),
    };

    let created = harness.fleet.create_entity(&folder).await.unwrap();
    assert_eq!(created, folder);

    let found: Option<Folder> = harness.fleet.find_entity(&folder.id).await.unwrap();
    assert_eq!(found, Some(folder.clone()));

    let wrong_kind: Option<FileEntry> = harness.fleet.find_entity(&folder.id).await.unwrap();
    assert!(wrong_kind.is_none());

    let listed: Vec<Folder> = harness.fleet.list_entities("u-1").await.unwrap();
    assert_eq!(listed, vec![folder]);
}

#[tokio::test]
async fn test_share_accept_flow() {
    let harness = TestFleet::two_backends();
    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "song.mp3", 4000))
        .await
        .unwrap();

    let share = harness
        .fleet
        .share_file(file.id(), "u-1", "u-2")
        .await
        .unwrap();
    assert_eq!(share.owner_id, "u-2");
    assert_eq!(share.status, ShareStatus::Pending);
    assert_eq!(share.file_name, "song.mp3");

    let incoming: Vec<Notification> = harness.fleet.list_entities("u-2").await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].category, NotificationCategory::ShareReceived);
    assert_eq!(incoming[0].related_id.as_deref(), Some(share.id.as_str()));

    harness.fleet.switch_primary("db-2").await.unwrap();
    let copy = harness.fleet.accept_share(&share.id, "u-2").await.unwrap();
    assert_eq!(copy.owner_id, "u-2");
    assert_eq!(copy.copied_from.as_deref(), Some(file.id()));
    assert_eq!(copy.original_name.as_deref(), Some("song.mp3"));
    assert_eq!(copy.size, 4000);
    assert!(
        harness
            .backend("db-2")
            .inner()
            .read(&copy.id)
            .await
            .unwrap()
            .is_some()
    );

    let share: Share = harness.fleet.find_entity(&share.id).await.unwrap().unwrap();
    assert_eq!(share.status, ShareStatus::Accepted);
    assert_eq!(share.accepted_file_id.as_deref(), Some(copy.id.as_str()));

    let sharer_notes: Vec<Notification> = harness.fleet.list_entities("u-1").await.unwrap();
    assert_eq!(sharer_notes.len(), 1);
    assert_eq!(sharer_notes[0].category, NotificationCategory::ShareAccepted);

    let again = harness.fleet.accept_share(&share.id, "u-2").await.unwrap_err();
    assert!(matches!(
        again,
        StorageError::Validation(ValidationError::InvalidEntity { .. })
    ));

    let original = harness.fleet.find_by_id(file.id()).await.unwrap().unwrap();
    assert_eq!(original.owner_id(), "u-1");
}

#[tokio::test]
async fn test_share_decline_and_permissions() {
    let harness = TestFleet::two_backends();
    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "notes.txt", 12))
        .await
        .unwrap();

    let err = harness
        .fleet
        .share_file(file.id(), "u-3", "u-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::NotPermitted { .. })
    ));

    let share = harness
        .fleet
        .share_file(file.id(), "u-1", "u-2")
        .await
        .unwrap();
    let err = harness
        .fleet
        .decline_share(&share.id, "u-3")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::NotPermitted { .. })
    ));

    let declined = harness.fleet.decline_share(&share.id, "u-2").await.unwrap();
    assert_eq!(declined.status, ShareStatus::Declined);
    assert_eq!(declined.accepted_file_id, None);

    let copies: Vec<FileEntry> = harness.fleet.list_entities("u-2").await.unwrap();
    assert!(copies.is_empty());

    let sharer_notes: Vec<Notification> = harness.fleet.list_entities("u-1").await.unwrap();
    assert_eq!(sharer_notes[0].category, NotificationCategory::ShareDeclined);
    assert_eq!(Notification::KIND, EntityKind::Notification);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_share_accepted_once_under_concurrent_accepts() {
    let harness = TestFleet::two_backends();
    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "song.mp3", 4000))
        .await
        .unwrap();
    let share = harness
        .fleet
        .share_file(file.id(), "u-1", "u-2")
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        harness.fleet.accept_share(&share.id, "u-2"),
        harness.fleet.accept_share(&share.id, "u-2"),
    );
    let (accepted, refused) = match (first, second) {
        (Ok(copy), Err(e)) | (Err(e), Ok(copy)) => (copy, e),
        other => panic!("expected exactly one accept to succeed, got {other:?}"),
    };
    assert!(matches!(
        refused,
        StorageError::Validation(ValidationError::InvalidEntity { .. })
    ));

    let copies: Vec<FileEntry> = harness.fleet.list_entities("u-2").await.unwrap();
    assert_eq!(copies, vec![accepted.clone()]);

    let share: Share = harness.fleet.find_entity(&share.id).await.unwrap().unwrap();
    assert_eq!(share.accepted_file_id.as_deref(), Some(accepted.id.as_str()));
}

#[tokio::test]
async fn test_accept_with_share_backend_unreachable() {
    let harness = TestFleet::two_backends();
    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "song.mp3", 4000))
        .await
        .unwrap();
    let share = harness
        .fleet
        .share_file(file.id(), "u-1", "u-2")
        .await
        .unwrap();

    harness.fleet.switch_primary("db-2").await.unwrap();
    harness.backend("db-1").set_reachable(false);

    let err = harness
        .fleet
        .accept_share(&share.id, "u-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Resource(ResourceError::NotFound { .. })
    ));
    assert_eq!(harness.backend("db-2").insert_count(), 0);

    harness.backend("db-1").set_reachable(true);
    let share: Share = harness.fleet.find_entity(&share.id).await.unwrap().unwrap();
    assert_eq!(share.status, ShareStatus::Pending);
}

#[tokio::test]
async fn test_failed_copy_returns_share_to_pending() {
    let harness = TestFleet::two_backends();
    harness.fleet.switch_primary("db-2").await.unwrap();
    let file = harness
        .fleet
        .create(EntityKind::File, file_payload("u-1", "song.mp3", 4000))
        .await
        .unwrap();
    let share = harness
        .fleet
        .share_file(file.id(), "u-1", "u-2")
        .await
        .unwrap();

    harness.fleet.switch_primary("db-1").await.unwrap();
    harness.backend("db-1").set_reachable(false);

    let err = harness
        .fleet
        .accept_share(&share.id, "u-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Backend(BackendError::WriteRejected { .. })
    ));

    let pending: Share = harness.fleet.find_entity(&share.id).await.unwrap().unwrap();
    assert_eq!(pending.status, ShareStatus::Pending);
    assert_eq!(pending.accepted_file_id, None);

    harness.backend("db-1").set_reachable(true);
    let copy = harness.fleet.accept_share(&share.id, "u-2").await.unwrap();
    let copies: Vec<FileEntry> = harness.fleet.list_entities("u-2").await.unwrap();
    assert_eq!(copies, vec![copy]);
}

// ============================================================================
// Timeouts
// ============================================================================

fn slow_pair() -> TestFleet {
    TestFleet::with_timeouts(
        vec![entry("db-1", 1, 100).as_primary(), entry("db-2", 2, 100)],
        Duration::from_millis(200),
    )
}

#[tokio::test]
async fn test_list_skips_slow_backend() {
    let harness = slow_pair();
    let fast = file_at("u-1", "fast.txt", 2);
    harness.seed("db-1", &fast).await;
    harness.seed("db-2", &file_at("u-1", "slow.txt", 1)).await;
    harness.backend("db-2").set_latency(Duration::from_secs(5));

    let started = Instant::now();
    let files = harness
        .fleet
        .list_by_owner("u-1", EntityKind::File)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    let ids: Vec<_> = files.iter().map(|f| f.id().to_string()).collect();
    assert_eq!(ids, vec![fast.id().to_string()]);
}

#[tokio::test]
async fn test_slow_health_check_counts_as_failure() {
    let harness = slow_pair();
    harness.backend("db-2").set_latency(Duration::from_secs(5));

    let started = Instant::now();
    let result = harness.fleet.registry().probe_one("db-2").await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result, HealthCheckResult::Timeout);
    let descriptor = harness.fleet.registry().descriptor("db-2").unwrap();
    assert!(!descriptor.is_healthy);
    assert_eq!(descriptor.consecutive_failures, 1);
}

#[tokio::test]
async fn test_create_on_slow_primary_is_rejected() {
    let harness = slow_pair();
    harness.backend("db-1").set_latency(Duration::from_secs(5));

    let started = Instant::now();
    let err = harness
        .fleet
        .create(EntityKind::Folder, folder_payload("u-1", "Photos"))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        err,
        StorageError::Backend(BackendError::WriteRejected { ref backend_name, .. }) if backend_name == "db-1"
    ));
    assert_eq!(harness.backend("db-1").insert_count(), 0);
    assert_eq!(harness.backend("db-2").insert_count(), 0);
}
