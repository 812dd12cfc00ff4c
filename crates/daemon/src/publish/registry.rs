use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::capability::CapabilityStore;
use common::folder::{PublishedFolder, PublishedFolderVersion};
use common::kv::{JsonStore, KvError};

const FOLDERS_FILE: &str = "folders.json";
const PENDING_FILE: &str = "pending.json";
const REMOVALS_FILE: &str = "removals.json";
const OPTIONS_FILE: &str = "options.json";
const CAPABILITIES_FILE: &str = "capabilities.json";
const VERSIONS_DIR: &str = "versions";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("store error: {0}")]
    Store(#[from] KvError),

    #[error("unknown folder: {0}")]
    UnknownFolder(Uuid),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PublisherOptions {
    #[serde(default)]
    auto_publish: bool,
}

/// Persisted state of the publishing pipeline: the folder list, per-key
/// version histories, pending-publish markers, the removal journal and
/// capability tokens. All writes are atomic document replacements; all
/// mutation is expected to come through the coordinator's guarded region.
#[derive(Debug, Clone)]
pub struct PublishedFolderRegistry {
    folders: JsonStore,
    pending: JsonStore,
    removals: JsonStore,
    options: JsonStore,
    versions_dir: PathBuf,
    capabilities: CapabilityStore,
}

impl PublishedFolderRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            folders: JsonStore::new(data_dir.join(FOLDERS_FILE)),
            pending: JsonStore::new(data_dir.join(PENDING_FILE)),
            removals: JsonStore::new(data_dir.join(REMOVALS_FILE)),
            options: JsonStore::new(data_dir.join(OPTIONS_FILE)),
            versions_dir: data_dir.join(VERSIONS_DIR),
            capabilities: CapabilityStore::new(data_dir.join(CAPABILITIES_FILE)),
        }
    }

    pub fn capabilities(&self) -> &CapabilityStore {
        &self.capabilities
    }

    // -- folders

    /// All folders, newest created first.
    pub fn folders(&self) -> Result<Vec<PublishedFolder>, RegistryError> {
        let mut folders: Vec<PublishedFolder> = self.folders.load()?;
        folders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(folders)
    }

    pub fn folder(&self, id: Uuid) -> Result<PublishedFolder, RegistryError> {
        self.folders()?
            .into_iter()
            .find(|f| f.id == id)
            .ok_or(RegistryError::UnknownFolder(id))
    }

    pub fn insert_folder(&self, folder: PublishedFolder) -> Result<(), RegistryError> {
        self.folders.update(|folders: &mut Vec<PublishedFolder>| {
            folders.retain(|f| f.id != folder.id);
            folders.push(folder);
        })?;
        Ok(())
    }

    pub fn update_folder(&self, folder: &PublishedFolder) -> Result<(), RegistryError> {
        let updated = folder.clone();
        let mut found = false;
        let found_ref = &mut found;
        self.folders.update(|folders: &mut Vec<PublishedFolder>| {
            for slot in folders.iter_mut() {
                if slot.id == updated.id {
                    *slot = updated.clone();
                    *found_ref = true;
                    break;
                }
            }
        })?;
        if !found {
            return Err(RegistryError::UnknownFolder(folder.id));
        }
        Ok(())
    }

    pub fn remove_folder(&self, id: Uuid) -> Result<(), RegistryError> {
        self.folders.update(|folders: &mut Vec<PublishedFolder>| {
            folders.retain(|f| f.id != id);
        })?;
        Ok(())
    }

    // -- version histories, one append-only record per key

    fn versions_store(&self, key: &str) -> JsonStore {
        JsonStore::new(self.versions_dir.join(format!("{key}.json")))
    }

    pub fn versions(&self, key: &str) -> Result<Vec<PublishedFolderVersion>, RegistryError> {
        Ok(self.versions_store(key).load()?)
    }

    /// The content hash of the last recorded version, if any.
    pub fn latest_cid(&self, key: &str) -> Result<Option<String>, RegistryError> {
        Ok(self.versions(key)?.pop().map(|v| v.cid))
    }

    pub fn append_version(&self, version: PublishedFolderVersion) -> Result<(), RegistryError> {
        let key = version.folder_id.to_string();
        self.versions_store(&key)
            .update(|versions: &mut Vec<PublishedFolderVersion>| {
                versions.push(version);
            })?;
        Ok(())
    }

    pub fn delete_versions(&self, key: &str) -> Result<(), RegistryError> {
        self.versions_store(key).remove()?;
        Ok(())
    }

    // -- pending publish markers

    pub fn pending_markers(&self) -> Result<HashMap<Uuid, DateTime<Utc>>, RegistryError> {
        Ok(self.pending.load()?)
    }

    pub fn set_pending(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RegistryError> {
        self.pending
            .update(|markers: &mut HashMap<Uuid, DateTime<Utc>>| {
                markers.insert(id, at);
            })?;
        Ok(())
    }

    pub fn clear_pending(&self, id: Uuid) -> Result<(), RegistryError> {
        self.pending
            .update(|markers: &mut HashMap<Uuid, DateTime<Utc>>| {
                markers.remove(&id);
            })?;
        Ok(())
    }

    // -- removal journal

    /// Journal a key for removal. Persisted before any destructive
    /// unpublish step so the sequence can resume after a crash.
    pub fn journal_removal(&self, key: &str) -> Result<(), RegistryError> {
        let key = key.to_string();
        self.removals.update(|journal: &mut Vec<String>| {
            if !journal.contains(&key) {
                journal.push(key);
            }
        })?;
        Ok(())
    }

    pub fn journaled_removals(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.removals.load()?)
    }

    pub fn unjournal_removal(&self, key: &str) -> Result<(), RegistryError> {
        self.removals.update(|journal: &mut Vec<String>| {
            journal.retain(|entry| entry != key);
        })?;
        Ok(())
    }

    // -- options

    pub fn auto_publish(&self) -> Result<bool, RegistryError> {
        let options: PublisherOptions = self.options.load()?;
        Ok(options.auto_publish)
    }

    pub fn set_auto_publish(&self, enabled: bool) -> Result<(), RegistryError> {
        self.options.update(|options: &mut PublisherOptions| {
            options.auto_publish = enabled;
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (PublishedFolderRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (PublishedFolderRegistry::new(dir.path()), dir)
    }

    #[test]
    fn test_folder_round_trip() {
        let (registry, _dir) = registry();
        let folder = PublishedFolder::new("/tmp/site");
        registry.insert_folder(folder.clone()).unwrap();

        let loaded = registry.folder(folder.id).unwrap();
        assert_eq!(loaded.root_path, folder.root_path);
        assert!(loaded.published_at.is_none());

        registry.remove_folder(folder.id).unwrap();
        assert!(matches!(
            registry.folder(folder.id),
            Err(RegistryError::UnknownFolder(_))
        ));
    }

    #[test]
    fn test_update_unknown_folder_fails() {
        let (registry, _dir) = registry();
        let folder = PublishedFolder::new("/tmp/site");
        assert!(matches!(
            registry.update_folder(&folder),
            Err(RegistryError::UnknownFolder(_))
        ));
    }

    #[test]
    fn test_version_history_is_append_only() {
        let (registry, _dir) = registry();
        let id = Uuid::new_v4();
        let key = id.to_string();

        assert_eq!(registry.latest_cid(&key).unwrap(), None);

        registry
            .append_version(PublishedFolderVersion::new(id, "bafy-one"))
            .unwrap();
        registry
            .append_version(PublishedFolderVersion::new(id, "bafy-two"))
            .unwrap();

        let versions = registry.versions(&key).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].cid, "bafy-one");
        assert_eq!(registry.latest_cid(&key).unwrap().unwrap(), "bafy-two");

        registry.delete_versions(&key).unwrap();
        assert!(registry.versions(&key).unwrap().is_empty());
    }

    #[test]
    fn test_removal_journal_deduplicates() {
        let (registry, _dir) = registry();
        registry.journal_removal("key-a").unwrap();
        registry.journal_removal("key-a").unwrap();
        registry.journal_removal("key-b").unwrap();
        assert_eq!(registry.journaled_removals().unwrap(), vec!["key-a", "key-b"]);

        registry.unjournal_removal("key-a").unwrap();
        assert_eq!(registry.journaled_removals().unwrap(), vec!["key-b"]);
    }

    #[test]
    fn test_auto_publish_option_defaults_off() {
        let (registry, _dir) = registry();
        assert!(!registry.auto_publish().unwrap());
        registry.set_auto_publish(true).unwrap();
        assert!(registry.auto_publish().unwrap());
    }
}
