use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use uuid::Uuid;

use common::capability::CapabilityError;
use common::folder::PublishedFolder;

use super::coordinator::{PublishError, PublishOutcome, PublishingCoordinator};
use super::monitor::{ChangeEvent, DirectoryChangeMonitor, MonitorError};
use super::registry::{PublishedFolderRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("folder access error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
}

/// The folder-management surface exposed to collaborators (the CLI, a
/// future UI). Owns the per-folder change monitors; everything else is
/// delegated to the coordinator and registry.
pub struct PublisherService {
    coordinator: Arc<PublishingCoordinator>,
    registry: Arc<Mutex<PublishedFolderRegistry>>,
    monitors: SyncMutex<HashMap<Uuid, DirectoryChangeMonitor>>,
    change_tx: flume::Sender<ChangeEvent>,
    change_rx: flume::Receiver<ChangeEvent>,
}

impl PublisherService {
    pub fn new(coordinator: Arc<PublishingCoordinator>) -> Self {
        let registry = coordinator.registry();
        let (change_tx, change_rx) = flume::unbounded();
        Self {
            coordinator,
            registry,
            monitors: SyncMutex::new(HashMap::new()),
            change_tx,
            change_rx,
        }
    }

    pub fn coordinator(&self) -> Arc<PublishingCoordinator> {
        self.coordinator.clone()
    }

    /// Receiver side of the change-event queue. Monitors push here; a
    /// dedicated consumer task records pending markers so watch
    /// callbacks never wait on a publish.
    pub fn change_events(&self) -> flume::Receiver<ChangeEvent> {
        self.change_rx.clone()
    }

    /// Designate a directory for publishing. Grants a capability token
    /// and, when auto-publish is on, starts watching it immediately.
    pub async fn add_folder(&self, path: &Path) -> Result<PublishedFolder, ServiceError> {
        if !path.is_dir() {
            return Err(ServiceError::NotADirectory(path.to_path_buf()));
        }

        let folder = PublishedFolder::new(path);
        let auto_publish = {
            let registry = self.registry.lock().await;
            registry.capabilities().grant(folder.id, path)?;
            registry.insert_folder(folder.clone())?;
            registry.auto_publish()?
        };

        if auto_publish {
            self.start_monitor(&folder);
        }

        tracing::info!(folder_id = %folder.id, path = %path.display(), "folder added");
        Ok(folder)
    }

    /// Remove a folder and run the crash-safe unpublish sequence for its
    /// key. The key is journalled before the record disappears, so a
    /// crash mid-way is picked up at the next startup.
    pub async fn remove_folder(&self, id: Uuid) -> Result<(), ServiceError> {
        let folder = {
            let registry = self.registry.lock().await;
            let folder = registry.folder(id)?;
            registry.journal_removal(&folder.key_name())?;
            registry.remove_folder(id)?;
            registry.capabilities().revoke(id)?;
            registry.clear_pending(id)?;
            folder
        };

        self.stop_monitor(id);
        self.coordinator.unpublish(&folder.key_name()).await?;
        Ok(())
    }

    pub async fn publish_folder(
        &self,
        id: Uuid,
        skip_unchanged_check: bool,
    ) -> Result<PublishOutcome, ServiceError> {
        Ok(self.coordinator.publish(id, skip_unchanged_check).await?)
    }

    /// Flip global auto-publish, persist the option, and start or stop
    /// every folder's monitor accordingly.
    pub async fn set_auto_publish(&self, enabled: bool) -> Result<(), ServiceError> {
        {
            let registry = self.registry.lock().await;
            registry.set_auto_publish(enabled)?;
        }
        if enabled {
            self.start_all_monitors().await?;
        } else {
            self.monitors.lock().clear();
            tracing::info!("auto-publish disabled, monitors stopped");
        }
        Ok(())
    }

    /// Start monitors for every folder if auto-publish is enabled.
    /// Called once at service startup.
    pub async fn start_if_auto(&self) -> Result<(), ServiceError> {
        let auto = {
            let registry = self.registry.lock().await;
            registry.auto_publish()?
        };
        if auto {
            self.start_all_monitors().await?;
        }
        Ok(())
    }

    async fn start_all_monitors(&self) -> Result<(), ServiceError> {
        let folders = {
            let registry = self.registry.lock().await;
            registry.folders()?
        };
        for folder in folders {
            self.start_monitor(&folder);
        }
        Ok(())
    }

    /// Per-folder monitor start; a folder whose directory cannot be
    /// resolved is logged and skipped, never blocking the others.
    fn start_monitor(&self, folder: &PublishedFolder) {
        let mut monitors = self.monitors.lock();
        if monitors.contains_key(&folder.id) {
            return;
        }
        match DirectoryChangeMonitor::start(folder.id, &folder.root_path, self.change_tx.clone()) {
            Ok(monitor) => {
                monitors.insert(folder.id, monitor);
            }
            Err(e) => {
                tracing::error!(folder_id = %folder.id, "failed to start monitor: {}", e);
            }
        }
    }

    fn stop_monitor(&self, id: Uuid) {
        if self.monitors.lock().remove(&id).is_some() {
            tracing::debug!(folder_id = %id, "monitor stopped");
        }
    }

    // -- read-only status queries

    pub async fn folders(&self) -> Result<Vec<PublishedFolder>, ServiceError> {
        let registry = self.registry.lock().await;
        Ok(registry.folders()?)
    }

    pub async fn folder(&self, id: Uuid) -> Result<PublishedFolder, ServiceError> {
        let registry = self.registry.lock().await;
        Ok(registry.folder(id)?)
    }

    pub fn is_publishing(&self, id: Uuid) -> bool {
        self.coordinator.is_publishing(id)
    }

    pub async fn auto_publish(&self) -> Result<bool, ServiceError> {
        let registry = self.registry.lock().await;
        Ok(registry.auto_publish()?)
    }
}
