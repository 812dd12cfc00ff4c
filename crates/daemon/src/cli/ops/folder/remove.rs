use clap::Args;
use uuid::Uuid;

use orbit_daemon::node::ApiError;
use orbit_daemon::publish::ServiceError;
use orbit_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Remove {
    /// Folder ID
    pub folder_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum FolderRemoveError {
    #[error("state error: {0}")]
    State(#[from] orbit_daemon::state::StateError),

    #[error("node API error: {0}")]
    Api(#[from] ApiError),

    #[error("remove failed: {0}")]
    Service(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Remove {
    type Error = FolderRemoveError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let publisher = super::publisher(&state).await?;

        publisher.remove_folder(self.folder_id).await?;
        Ok(format!("Removed folder {} and vacated its name", self.folder_id))
    }
}
