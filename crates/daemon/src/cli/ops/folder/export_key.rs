use std::path::PathBuf;

use clap::Args;
use uuid::Uuid;

use orbit_daemon::node::ApiError;
use orbit_daemon::publish::{PublishedFolderRegistry, RegistryError};
use orbit_daemon::state::AppState;

/// Back up the keypair behind a folder's published name, so the name can
/// be restored on another machine.
#[derive(Args, Debug, Clone)]
pub struct ExportKey {
    /// Folder ID
    pub folder_id: Uuid,

    /// Destination file for the exported key
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum FolderExportKeyError {
    #[error("state error: {0}")]
    State(#[from] orbit_daemon::state::StateError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("node API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for ExportKey {
    type Error = FolderExportKeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let registry = PublishedFolderRegistry::new(&state.data_path);
        let folder = registry.folder(self.folder_id)?;

        let client = super::node_client(&state).await?;
        client
            .export_key(&folder.key_name(), &self.output)
            .await?;

        Ok(format!(
            "Exported key for {} to {}",
            self.folder_id,
            self.output.display()
        ))
    }
}
