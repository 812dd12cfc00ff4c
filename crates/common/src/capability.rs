use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kv::{JsonStore, KvError};

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("no capability granted for folder {0}")]
    NotGranted(Uuid),

    #[error("granted directory no longer exists: {0}")]
    Missing(PathBuf),

    #[error("store error: {0}")]
    Store(#[from] KvError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque, revalidatable handle on a user-granted directory.
///
/// The canonical path is captured at grant time; if it drifts from the
/// recorded root (a symlinked parent was repointed, a volume remounted),
/// the token is stale and gets re-derived on the next resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub root: PathBuf,
    pub canonical: PathBuf,
    pub granted_at: chrono::DateTime<chrono::Utc>,
}

/// Persisted map of folder id to capability token.
#[derive(Debug, Clone)]
pub struct CapabilityStore {
    store: JsonStore,
}

impl CapabilityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    /// Grant access to `root` on behalf of `folder_id`, replacing any
    /// previous token.
    pub fn grant(&self, folder_id: Uuid, root: &Path) -> Result<CapabilityToken, CapabilityError> {
        if !root.exists() {
            return Err(CapabilityError::Missing(root.to_path_buf()));
        }
        let token = CapabilityToken {
            root: root.to_path_buf(),
            canonical: root.canonicalize()?,
            granted_at: chrono::Utc::now(),
        };
        let inserted = token.clone();
        self.store
            .update(move |tokens: &mut HashMap<Uuid, CapabilityToken>| {
                tokens.insert(folder_id, token);
            })?;
        Ok(inserted)
    }

    /// Resolve a folder's token into a usable path, re-deriving a stale
    /// token in place. Fails if no token was granted or the directory is
    /// gone, in which case the user must re-grant access.
    pub fn resolve(&self, folder_id: Uuid) -> Result<PathBuf, CapabilityError> {
        let tokens: HashMap<Uuid, CapabilityToken> = self.store.load()?;
        let token = tokens
            .get(&folder_id)
            .ok_or(CapabilityError::NotGranted(folder_id))?;

        if !token.root.exists() {
            return Err(CapabilityError::Missing(token.root.clone()));
        }

        let canonical_now = token.root.canonicalize()?;
        if canonical_now != token.canonical {
            tracing::debug!(
                folder_id = %folder_id,
                "capability token is stale, re-deriving"
            );
            self.grant(folder_id, &token.root)?;
        }
        Ok(token.root.clone())
    }

    pub fn revoke(&self, folder_id: Uuid) -> Result<(), CapabilityError> {
        self.store
            .update(|tokens: &mut HashMap<Uuid, CapabilityToken>| {
                tokens.remove(&folder_id);
            })?;
        Ok(())
    }
}
