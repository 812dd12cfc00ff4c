//! Integration tests for the publish pipeline against a scripted node.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use orbit_daemon::publish::{PublishError, PublishOutcome};

#[tokio::test]
async fn test_first_publish_records_version_and_name() {
    let env = common::setup();
    let folder = env.add_folder("site").await;

    let outcome = env.coordinator.publish(folder.id, false).await.unwrap();
    let (cid, name) = match outcome {
        PublishOutcome::Published { cid, name } => (cid, name),
        other => panic!("expected Published, got {:?}", other),
    };

    // The folder's key was generated on demand.
    assert!(env.node.has_key(&folder.key_name()));

    let registry = env.registry.lock().await;
    let versions = registry.versions(&folder.key_name()).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].cid, cid);

    let updated = registry.folder(folder.id).unwrap();
    assert_eq!(updated.published_name.as_deref(), Some(name.as_str()));
    assert!(updated.published_at.is_some());
}

#[tokio::test]
async fn test_republish_unchanged_content_is_skipped() {
    let env = common::setup();
    let folder = env.add_folder("site").await;

    let first = env.coordinator.publish(folder.id, false).await.unwrap();
    assert!(matches!(first, PublishOutcome::Published { .. }));

    let second = env.coordinator.publish(folder.id, false).await.unwrap();
    assert_eq!(second, PublishOutcome::Unchanged);

    // The content was hashed both times but the name was published once.
    assert_eq!(env.node.add_calls.load(Ordering::SeqCst), 2);
    assert_eq!(env.node.publish_calls.load(Ordering::SeqCst), 1);

    let registry = env.registry.lock().await;
    assert_eq!(registry.versions(&folder.key_name()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_content_change_appends_new_version() {
    let env = common::setup();
    let folder = env.add_folder("site").await;

    let first = env.coordinator.publish(folder.id, false).await.unwrap();
    let h1 = match first {
        PublishOutcome::Published { cid, .. } => cid,
        other => panic!("expected Published, got {:?}", other),
    };

    std::fs::write(folder.root_path.join("index.html"), "<h1>edited</h1>").unwrap();

    let second = env.coordinator.publish(folder.id, false).await.unwrap();
    let h2 = match second {
        PublishOutcome::Published { cid, .. } => cid,
        other => panic!("expected Published after edit, got {:?}", other),
    };
    assert_ne!(h1, h2);

    let registry = env.registry.lock().await;
    let versions = registry.versions(&folder.key_name()).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].cid, h1);
    assert_eq!(versions[1].cid, h2);
}

#[tokio::test]
async fn test_force_publish_skips_unchanged_check() {
    let env = common::setup();
    let folder = env.add_folder("site").await;

    env.coordinator.publish(folder.id, false).await.unwrap();
    let outcome = env.coordinator.publish(folder.id, true).await.unwrap();
    assert!(matches!(outcome, PublishOutcome::Published { .. }));
    assert_eq!(env.node.publish_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_publish_for_same_folder_is_rejected() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    env.node.set_add_delay(Duration::from_millis(300));

    let first = {
        let coordinator = env.coordinator.clone();
        let id = folder.id;
        tokio::spawn(async move { coordinator.publish(id, false).await })
    };
    // Give the first call time to claim the in-flight slot.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = env.coordinator.publish(folder.id, false).await;
    assert!(matches!(second, Err(PublishError::InFlight(id)) if id == folder.id));

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, PublishOutcome::Published { .. }));

    // The slot is released once the publish completes.
    assert!(!env.coordinator.is_publishing(folder.id));
}

#[tokio::test]
async fn test_publish_without_capability_fails() {
    let env = common::setup();
    let root = env.dir.path().join("ungranted");
    std::fs::create_dir_all(&root).unwrap();

    let folder = common::folder_without_grant(&env, &root).await;
    let err = env.coordinator.publish(folder.id, false).await.unwrap_err();
    assert!(matches!(err, PublishError::Capability(_)));
}

#[tokio::test]
async fn test_reconcile_publishes_due_marker_and_clears_it() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    {
        let registry = env.registry.lock().await;
        registry.set_auto_publish(true).unwrap();
        registry
            .set_pending(folder.id, Utc::now() - chrono::Duration::seconds(2))
            .unwrap();
    }

    env.coordinator.reconcile().await;

    let registry = env.registry.lock().await;
    assert!(registry.pending_markers().unwrap().is_empty());
    assert_eq!(registry.versions(&folder.key_name()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconcile_unchanged_outcome_clears_marker() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    env.coordinator.publish(folder.id, false).await.unwrap();
    {
        let registry = env.registry.lock().await;
        registry.set_auto_publish(true).unwrap();
        registry.set_pending(folder.id, Utc::now()).unwrap();
    }

    env.coordinator.reconcile().await;

    // Content had not changed, but the marker is consumed, not failed.
    let registry = env.registry.lock().await;
    assert!(registry.pending_markers().unwrap().is_empty());
    assert_eq!(env.node.publish_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconcile_refreshes_name_record_near_expiry() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    env.coordinator.publish(folder.id, false).await.unwrap();

    // Age the last publish past the refresh threshold.
    {
        let registry = env.registry.lock().await;
        registry.set_auto_publish(true).unwrap();
        let mut aged = registry.folder(folder.id).unwrap();
        aged.published_at = Some(Utc::now() - chrono::Duration::hours(24));
        registry.update_folder(&aged).unwrap();
    }

    env.coordinator.reconcile().await;

    // The name was republished even though the content is unchanged.
    assert_eq!(env.node.publish_calls.load(Ordering::SeqCst), 2);
    let registry = env.registry.lock().await;
    let refreshed = registry.folder(folder.id).unwrap();
    assert!(refreshed.published_at.unwrap() > Utc::now() - chrono::Duration::minutes(1));
}

#[tokio::test]
async fn test_reconcile_defers_marker_while_in_flight() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    {
        let registry = env.registry.lock().await;
        registry.set_auto_publish(true).unwrap();
        registry
            .set_pending(folder.id, Utc::now() - chrono::Duration::seconds(2))
            .unwrap();
    }

    env.node.set_add_delay(Duration::from_millis(500));
    let in_flight = {
        let coordinator = env.coordinator.clone();
        let id = folder.id;
        tokio::spawn(async move { coordinator.publish(id, false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    env.coordinator.reconcile().await;

    // The marker moved roughly a day out instead of being retried on the
    // next five-second tick.
    {
        let registry = env.registry.lock().await;
        let markers = registry.pending_markers().unwrap();
        let deferred = markers.get(&folder.id).copied().unwrap();
        let hours = (deferred - Utc::now()).num_hours();
        assert!((23..=24).contains(&hours), "deferred {} hours", hours);
    }

    in_flight.await.unwrap().unwrap();

    // Auto-publish off means reconcile leaves the deferred marker alone.
    {
        let registry = env.registry.lock().await;
        registry.set_auto_publish(false).unwrap();
    }
    env.coordinator.reconcile().await;
    let registry = env.registry.lock().await;
    assert!(registry.pending_markers().unwrap().contains_key(&folder.id));
}
