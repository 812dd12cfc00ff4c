//! Shared test utilities: a scripted in-memory node and a registry
//! rooted in a scratch directory.
#![allow(dead_code)]

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use common::folder::PublishedFolder;
use orbit_daemon::node::{ApiError, NodeApi};
use orbit_daemon::publish::{PublishedFolderRegistry, PublishingCoordinator};

#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub cid: String,
    pub key: String,
    pub lifetime: String,
}

/// Stand-in for the external node. Content hashes are derived from the
/// directory's actual contents, so editing a file changes the "cid" and
/// re-adding unchanged content reproduces it.
pub struct FakeNode {
    keys: Mutex<HashSet<String>>,
    pub published: Mutex<Vec<PublishedRecord>>,
    pub unpin_attempts: Mutex<Vec<String>>,
    pub fail_unpin: AtomicBool,
    pub fail_publish: AtomicBool,
    pub add_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
    pub add_delay: Mutex<Option<Duration>>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            keys: Mutex::new(HashSet::new()),
            published: Mutex::new(Vec::new()),
            unpin_attempts: Mutex::new(Vec::new()),
            fail_unpin: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            add_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            add_delay: Mutex::new(None),
        })
    }

    pub fn has_key(&self, name: &str) -> bool {
        self.keys.lock().contains(name)
    }

    pub fn set_add_delay(&self, delay: Duration) {
        *self.add_delay.lock() = Some(delay);
    }

    fn scripted_failure(what: &'static str) -> ApiError {
        ApiError::UnexpectedOutput {
            what,
            output: "scripted failure".to_string(),
        }
    }
}

fn hash_dir(path: &Path, hasher: &mut std::collections::hash_map::DefaultHasher) {
    let mut entries: Vec<_> = std::fs::read_dir(path)
        .map(|iter| iter.filter_map(Result::ok).collect())
        .unwrap_or_default();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        entry.file_name().hash(hasher);
        let path = entry.path();
        if path.is_dir() {
            hash_dir(&path, hasher);
        } else if let Ok(contents) = std::fs::read(&path) {
            contents.hash(hasher);
        }
    }
}

#[async_trait]
impl NodeApi for FakeNode {
    async fn add_directory(&self, path: &Path) -> Result<String, ApiError> {
        let delay = *self.add_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hash_dir(path, &mut hasher);
        Ok(format!("bafy{:016x}", hasher.finish()))
    }

    async fn generate_key(&self, name: &str) -> Result<String, ApiError> {
        self.keys.lock().insert(name.to_string());
        Ok(format!("k51-{name}"))
    }

    async fn remove_key(&self, name: &str) -> Result<(), ApiError> {
        self.keys.lock().remove(name);
        Ok(())
    }

    async fn key_exists(&self, name: &str) -> Result<bool, ApiError> {
        Ok(self.keys.lock().contains(name))
    }

    async fn publish_name(&self, cid: &str, key: &str, lifetime: &str) -> Result<String, ApiError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("name/publish"));
        }
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        self.published.lock().push(PublishedRecord {
            cid: cid.to_string(),
            key: key.to_string(),
            lifetime: lifetime.to_string(),
        });
        Ok(format!("k51-{key}"))
    }

    async fn resolve_name(&self, name: &str) -> Result<String, ApiError> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|record| format!("k51-{}", record.key) == name)
            .map(|record| record.cid.clone())
            .ok_or(Self::scripted_failure("name/resolve"))
    }

    async fn pin(&self, _cid: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn unpin(&self, cid: &str) -> Result<(), ApiError> {
        self.unpin_attempts.lock().push(cid.to_string());
        if self.fail_unpin.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("pin/rm"));
        }
        Ok(())
    }
}

pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub node: Arc<FakeNode>,
    pub registry: Arc<AsyncMutex<PublishedFolderRegistry>>,
    pub coordinator: Arc<PublishingCoordinator>,
}

pub fn setup() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let node = FakeNode::new();
    let registry = Arc::new(AsyncMutex::new(PublishedFolderRegistry::new(
        &dir.path().join("data"),
    )));
    let coordinator = Arc::new(PublishingCoordinator::new(node.clone(), registry.clone()));
    TestEnv {
        dir,
        node,
        registry,
        coordinator,
    }
}

impl TestEnv {
    /// Create a directory with one file, register it as a published
    /// folder and grant a capability for it.
    pub async fn add_folder(&self, name: &str) -> PublishedFolder {
        let root = self.dir.path().join(name);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), "<h1>hello</h1>").unwrap();

        let folder = PublishedFolder::new(&root);
        let registry = self.registry.lock().await;
        registry.capabilities().grant(folder.id, &root).unwrap();
        registry.insert_folder(folder.clone()).unwrap();
        folder
    }

    /// Re-open the persisted state as a fresh process would.
    pub fn reopen(&self) -> (Arc<AsyncMutex<PublishedFolderRegistry>>, Arc<PublishingCoordinator>) {
        let registry = Arc::new(AsyncMutex::new(PublishedFolderRegistry::new(
            &self.dir.path().join("data"),
        )));
        let coordinator = Arc::new(PublishingCoordinator::new(
            self.node.clone(),
            registry.clone(),
        ));
        (registry, coordinator)
    }
}

/// Register a folder record with no capability token behind it.
pub async fn folder_without_grant(env: &TestEnv, root: &Path) -> PublishedFolder {
    let folder = PublishedFolder::new(root);
    let registry = env.registry.lock().await;
    registry.insert_folder(folder.clone()).unwrap();
    folder
}
