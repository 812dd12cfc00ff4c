//! Crash-safety tests for the unpublish sequence.

mod common;

use std::sync::atomic::Ordering;

use orbit_daemon::publish::coordinator::VACATED_NAME_LIFETIME;
use orbit_daemon::publish::PublishOutcome;

#[tokio::test]
async fn test_unpublish_vacates_name_and_cleans_up() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    let key = folder.key_name();

    env.coordinator.publish(folder.id, false).await.unwrap();
    std::fs::write(folder.root_path.join("index.html"), "<h1>v2</h1>").unwrap();
    env.coordinator.publish(folder.id, false).await.unwrap();

    env.coordinator.unpublish(&key).await.unwrap();

    // Every recorded version got an unpin attempt.
    assert_eq!(env.node.unpin_attempts.lock().len(), 2);

    // The name now points at an empty payload with a short lifetime.
    let published = env.node.published.lock();
    let vacating = published.last().unwrap();
    assert_eq!(vacating.key, key);
    assert_eq!(vacating.lifetime, VACATED_NAME_LIFETIME);

    // Bookkeeping is gone: journal entry, version history, key material.
    let registry = env.registry.lock().await;
    assert!(registry.journaled_removals().unwrap().is_empty());
    assert!(registry.versions(&key).unwrap().is_empty());
    assert!(!env.node.has_key(&key));
}

#[tokio::test]
async fn test_unpin_failures_do_not_block_unpublish() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    let key = folder.key_name();

    env.coordinator.publish(folder.id, false).await.unwrap();
    env.node.fail_unpin.store(true, Ordering::SeqCst);

    env.coordinator.unpublish(&key).await.unwrap();

    let registry = env.registry.lock().await;
    assert!(registry.journaled_removals().unwrap().is_empty());
    assert!(!env.node.has_key(&key));
}

#[tokio::test]
async fn test_interrupted_unpublish_resumes_on_restart() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    let key = folder.key_name();

    env.coordinator.publish(folder.id, false).await.unwrap();

    // First attempt dies after journalling: unpins fail and the vacating
    // publish errors out.
    env.node.fail_unpin.store(true, Ordering::SeqCst);
    env.node.fail_publish.store(true, Ordering::SeqCst);
    assert!(env.coordinator.unpublish(&key).await.is_err());

    {
        let registry = env.registry.lock().await;
        assert_eq!(registry.journaled_removals().unwrap(), vec![key.clone()]);
        assert!(!registry.versions(&key).unwrap().is_empty());
    }

    // "Restart": fresh registry and coordinator over the same data dir.
    // The node publish works again, but unpins keep failing; the resume
    // must succeed anyway.
    env.node.fail_publish.store(false, Ordering::SeqCst);
    let (registry, coordinator) = env.reopen();

    coordinator.resume_removals().await;

    let registry = registry.lock().await;
    assert!(registry.journaled_removals().unwrap().is_empty());
    assert!(registry.versions(&key).unwrap().is_empty());
    assert!(!env.node.has_key(&key));
}

#[tokio::test]
async fn test_failed_unpublish_leaves_journal_entry() {
    let env = common::setup();
    let folder = env.add_folder("site").await;
    let key = folder.key_name();

    let outcome = env.coordinator.publish(folder.id, false).await.unwrap();
    assert!(matches!(outcome, PublishOutcome::Published { .. }));

    // A publish failure mid-removal leaves the journal entry in place.
    env.node.fail_publish.store(true, Ordering::SeqCst);
    assert!(env.coordinator.unpublish(&key).await.is_err());

    let registry = env.registry.lock().await;
    assert_eq!(registry.journaled_removals().unwrap(), vec![key]);
}
