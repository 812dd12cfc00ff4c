use std::path::PathBuf;

use clap::Args;
use uuid::Uuid;

use orbit_daemon::node::ApiError;
use orbit_daemon::publish::{PublishedFolderRegistry, RegistryError};
use orbit_daemon::state::AppState;

/// Restore a folder's keypair from a backup, so an existing folder
/// record publishes under its original name again.
#[derive(Args, Debug, Clone)]
pub struct ImportKey {
    /// Folder ID
    pub folder_id: Uuid,

    /// File holding the previously exported key
    #[arg(short, long)]
    pub input: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum FolderImportKeyError {
    #[error("state error: {0}")]
    State(#[from] orbit_daemon::state::StateError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("node API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for ImportKey {
    type Error = FolderImportKeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let registry = PublishedFolderRegistry::new(&state.data_path);
        let folder = registry.folder(self.folder_id)?;

        let client = super::node_client(&state).await?;
        client
            .import_key(&folder.key_name(), &self.input)
            .await?;

        Ok(format!(
            "Imported key for {} from {}",
            self.folder_id,
            self.input.display()
        ))
    }
}
