//! Debounce behavior of the directory change monitor against a real
//! filesystem watcher.

use std::time::Duration;

use uuid::Uuid;

use orbit_daemon::publish::DirectoryChangeMonitor;

#[test]
fn test_event_burst_collapses_into_one_signal() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("page.md");
    std::fs::write(&file, "initial").unwrap();

    let (tx, rx) = flume::unbounded();
    let folder_id = Uuid::new_v4();
    let _monitor = DirectoryChangeMonitor::start(folder_id, dir.path(), tx).unwrap();

    // Let the watcher settle before generating events.
    std::thread::sleep(Duration::from_millis(300));

    for i in 0..10 {
        std::fs::write(&file, format!("edit {i}")).unwrap();
        std::thread::sleep(Duration::from_millis(10));
    }

    let event = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("burst should produce a change signal");
    assert_eq!(event.folder_id, folder_id);

    // The burst produced exactly one signal, not ten.
    assert!(
        rx.recv_timeout(Duration::from_secs(2)).is_err(),
        "burst produced more than one signal"
    );

    // A separate edit after the quiet period fires again.
    std::fs::write(&file, "later edit").unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
}

#[test]
fn test_dropping_monitor_stops_signals() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("page.md");
    std::fs::write(&file, "initial").unwrap();

    let (tx, rx) = flume::unbounded();
    let monitor = DirectoryChangeMonitor::start(Uuid::new_v4(), dir.path(), tx).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    drop(monitor);

    std::fs::write(&file, "after stop").unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).is_err());
}
