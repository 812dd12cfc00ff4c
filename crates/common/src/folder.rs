use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-designated directory published under a mutable name.
///
/// Identity is `id`; the directory behind `root_path` is re-validated
/// through a capability token on every use, so renames do not silently
/// repoint the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedFolder {
    pub id: Uuid,
    pub root_path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_name: Option<String>,
}

impl PublishedFolder {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            root_path: root_path.into(),
            created_at: Utc::now(),
            published_at: None,
            published_name: None,
        }
    }

    /// The node keypair backing this folder's mutable name.
    pub fn key_name(&self) -> String {
        self.id.to_string()
    }
}

/// One published content hash of a folder. Histories are append-only;
/// the last entry defines current content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFolderVersion {
    pub folder_id: Uuid,
    pub cid: String,
    pub created_at: DateTime<Utc>,
}

impl PublishedFolderVersion {
    pub fn new(folder_id: Uuid, cid: impl Into<String>) -> Self {
        Self {
            folder_id,
            cid: cid.into(),
            created_at: Utc::now(),
        }
    }
}
