use std::path::PathBuf;

use clap::Args;

use common::folder::PublishedFolder;
use orbit_daemon::publish::{PublishedFolderRegistry, RegistryError};
use orbit_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Add {
    /// Directory to publish
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum FolderAddError {
    #[error("state error: {0}")]
    State(#[from] orbit_daemon::state::StateError),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("folder access error: {0}")]
    Capability(#[from] common::capability::CapabilityError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Add {
    type Error = FolderAddError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;

        if !self.path.is_dir() {
            return Err(FolderAddError::NotADirectory(self.path.clone()));
        }

        let registry = PublishedFolderRegistry::new(&state.data_path);
        let folder = PublishedFolder::new(&self.path);
        registry.capabilities().grant(folder.id, &self.path)?;
        registry.insert_folder(folder.clone())?;

        Ok(format!(
            "Added folder {} ({})\nRun 'orbit folder publish {}' to publish it",
            self.path.display(),
            folder.id,
            folder.id
        ))
    }
}
