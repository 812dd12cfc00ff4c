use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use uuid::Uuid;

use common::capability::CapabilityError;
use common::folder::PublishedFolderVersion;

use super::registry::{PublishedFolderRegistry, RegistryError};
use crate::node::{ApiError, NodeApi};

/// Lifetime of a folder's name record.
pub const NAME_LIFETIME: &str = "24h";
/// Lifetime of the empty record that vacates a name during unpublish.
pub const VACATED_NAME_LIFETIME: &str = "5m";
/// How often the reconciliation pass runs while auto-publish is on.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Name records are refreshed this long before they would expire.
fn republish_margin() -> chrono::Duration {
    chrono::Duration::hours(1)
}

fn name_record_ttl() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Deferral applied to a pending marker when its folder is already
/// publishing, instead of retrying on the next tick.
fn in_flight_defer() -> chrono::Duration {
    chrono::Duration::days(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { cid: String, name: String },
    /// Content hash matches the last recorded version; nothing was
    /// published. A skip, not a failure.
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("folder {0} is already publishing")]
    InFlight(Uuid),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("folder access error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("node API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Removes the folder id from the in-flight set on every exit path.
struct InFlightGuard {
    set: Arc<SyncMutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Orchestrates publish and unpublish operations against the node.
///
/// The in-flight set is the concurrency contract: a second publish for
/// the same folder is rejected while the first runs, and the set doubles
/// as the is-publishing status surface. Registry mutation goes through a
/// single async-guarded region so a timer-driven reconcile and a
/// user-triggered publish cannot race each other's writes.
pub struct PublishingCoordinator {
    node: Arc<dyn NodeApi>,
    registry: Arc<Mutex<PublishedFolderRegistry>>,
    in_flight: Arc<SyncMutex<HashSet<Uuid>>>,
}

impl PublishingCoordinator {
    pub fn new(node: Arc<dyn NodeApi>, registry: Arc<Mutex<PublishedFolderRegistry>>) -> Self {
        Self {
            node,
            registry,
            in_flight: Arc::new(SyncMutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> Arc<Mutex<PublishedFolderRegistry>> {
        self.registry.clone()
    }

    pub fn is_publishing(&self, folder_id: Uuid) -> bool {
        self.in_flight.lock().contains(&folder_id)
    }

    /// Record that a folder's content changed; consumed by the next
    /// reconciliation pass.
    pub async fn record_change(&self, folder_id: Uuid) {
        let registry = self.registry.lock().await;
        if let Err(e) = registry.set_pending(folder_id, Utc::now()) {
            tracing::error!(%folder_id, "failed to record pending marker: {}", e);
        }
    }

    /// Publish a folder: ensure its key exists, hash current content,
    /// skip if unchanged (unless told otherwise), then record the new
    /// version and republish the name.
    ///
    /// Concurrent calls for the same folder are rejected immediately
    /// with `PublishError::InFlight` rather than queued.
    pub async fn publish(
        &self,
        folder_id: Uuid,
        skip_unchanged_check: bool,
    ) -> Result<PublishOutcome, PublishError> {
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(folder_id) {
                return Err(PublishError::InFlight(folder_id));
            }
        }
        let _guard = InFlightGuard {
            set: self.in_flight.clone(),
            id: folder_id,
        };

        let (root, key) = {
            let registry = self.registry.lock().await;
            let folder = registry.folder(folder_id)?;
            let root = registry.capabilities().resolve(folder_id)?;
            (root, folder.key_name())
        };

        if !self.node.key_exists(&key).await? {
            self.node.generate_key(&key).await?;
        }

        let cid = self.node.add_directory(&root).await?;

        {
            let registry = self.registry.lock().await;
            if !skip_unchanged_check && registry.latest_cid(&key)?.as_deref() == Some(cid.as_str())
            {
                tracing::info!(%folder_id, %cid, "content unchanged, skipping publish");
                return Ok(PublishOutcome::Unchanged);
            }
            registry.append_version(PublishedFolderVersion::new(folder_id, &cid))?;
        }

        let name = self.node.publish_name(&cid, &key, NAME_LIFETIME).await?;

        {
            let registry = self.registry.lock().await;
            let mut folder = registry.folder(folder_id)?;
            folder.published_at = Some(Utc::now());
            folder.published_name = Some(name.clone());
            registry.update_folder(&folder)?;
        }

        Ok(PublishOutcome::Published { cid, name })
    }

    /// One reconciliation pass. Publishes folders with a due pending
    /// marker, refreshes name records approaching their TTL, and defers
    /// markers for folders that are already publishing. Failures are
    /// isolated per folder and retried on a later pass.
    pub async fn reconcile(&self) {
        let (folders, markers) = {
            let registry = self.registry.lock().await;
            let auto = match registry.auto_publish() {
                Ok(auto) => auto,
                Err(e) => {
                    tracing::error!("failed to read auto-publish option: {}", e);
                    return;
                }
            };
            if !auto {
                return;
            }
            match (registry.folders(), registry.pending_markers()) {
                (Ok(folders), Ok(markers)) => (folders, markers),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!("failed to read registry for reconcile: {}", e);
                    return;
                }
            }
        };

        let now = Utc::now();
        for folder in folders {
            if let Some(marked_at) = markers.get(&folder.id).copied() {
                if marked_at > now {
                    // Deferred marker, not due yet.
                    continue;
                }
                match self.publish(folder.id, false).await {
                    Ok(outcome) => {
                        if matches!(outcome, PublishOutcome::Unchanged) {
                            tracing::debug!(folder_id = %folder.id, "pending change was a no-op");
                        }
                        let registry = self.registry.lock().await;
                        if let Err(e) = registry.clear_pending(folder.id) {
                            tracing::error!(folder_id = %folder.id, "failed to clear marker: {}", e);
                        }
                    }
                    Err(PublishError::InFlight(_)) => {
                        // Somebody else is on it; come back much later
                        // instead of hammering every tick.
                        let registry = self.registry.lock().await;
                        if let Err(e) =
                            registry.set_pending(folder.id, now + in_flight_defer())
                        {
                            tracing::error!(folder_id = %folder.id, "failed to defer marker: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(folder_id = %folder.id, "reconcile publish failed: {}", e);
                    }
                }
            } else if let Some(published_at) = folder.published_at {
                if now - published_at >= name_record_ttl() - republish_margin() {
                    tracing::info!(folder_id = %folder.id, "name record close to expiry, republishing");
                    match self.publish(folder.id, true).await {
                        Ok(_) => {}
                        Err(PublishError::InFlight(_)) => {}
                        Err(e) => {
                            tracing::warn!(folder_id = %folder.id, "republish failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Crash-safe unpublish of a key: journal first, best-effort unpin
    /// of every recorded version, vacate the name with an empty payload,
    /// then delete the key material and the bookkeeping. If any step
    /// after journalling fails, the journal entry survives and the whole
    /// sequence is retried on the next startup.
    pub async fn unpublish(&self, key: &str) -> Result<(), PublishError> {
        let versions = {
            let registry = self.registry.lock().await;
            registry.journal_removal(key)?;
            registry.versions(key)?
        };

        for version in &versions {
            if let Err(e) = self.node.unpin(&version.cid).await {
                tracing::warn!(cid = %version.cid, "unpin failed during unpublish: {}", e);
            }
        }

        let empty = tempfile::tempdir()?;
        let cid = self.node.add_directory(empty.path()).await?;
        self.node
            .publish_name(&cid, key, VACATED_NAME_LIFETIME)
            .await?;

        self.node.remove_key(key).await?;

        {
            let registry = self.registry.lock().await;
            registry.delete_versions(key)?;
            registry.unjournal_removal(key)?;
        }
        tracing::info!(key, "unpublished");
        Ok(())
    }

    /// Retry every unpublish the journal says was interrupted.
    pub async fn resume_removals(&self) {
        let journal = {
            let registry = self.registry.lock().await;
            match registry.journaled_removals() {
                Ok(journal) => journal,
                Err(e) => {
                    tracing::error!("failed to read removal journal: {}", e);
                    return;
                }
            }
        };
        for key in journal {
            tracing::info!(key, "resuming interrupted unpublish");
            if let Err(e) = self.unpublish(&key).await {
                tracing::error!(key, "unpublish retry failed: {}", e);
            }
        }
    }
}
