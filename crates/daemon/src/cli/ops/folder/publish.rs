use clap::Args;
use uuid::Uuid;

use orbit_daemon::node::{ApiError, NodeApi};
use orbit_daemon::publish::{PublishOutcome, ServiceError};
use orbit_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Publish {
    /// Folder ID
    pub folder_id: Uuid,

    /// Publish even if the content hash matches the last version
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FolderPublishError {
    #[error("state error: {0}")]
    State(#[from] orbit_daemon::state::StateError),

    #[error("node API error: {0}")]
    Api(#[from] ApiError),

    #[error("publish failed: {0}")]
    Service(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Publish {
    type Error = FolderPublishError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let publisher = super::publisher(&state).await?;

        match publisher.publish_folder(self.folder_id, self.force).await? {
            PublishOutcome::Published { cid, name } => {
                let client = super::node_client(&state).await?;
                // Prewarm the local gateway so the name serves promptly;
                // a failure here is not a publish failure.
                if let Err(e) = client.get_file(&name, "/").await {
                    tracing::debug!(%name, "gateway prewarm failed: {}", e);
                }
                match client.resolve_name(&name).await {
                    Ok(resolved) if resolved == cid => {}
                    Ok(resolved) => tracing::warn!(
                        %resolved, %cid,
                        "name still resolves to an older hash, propagation pending"
                    ),
                    Err(e) => tracing::debug!(%name, "name not resolvable yet: {}", e),
                }
                Ok(format!(
                    "Published {} -> {}\n  content: {}\n  local gateway: {}/ipns/{}",
                    self.folder_id,
                    name,
                    cid,
                    client.gateway_base_url(),
                    name
                ))
            }
            PublishOutcome::Unchanged => {
                Ok("Content unchanged since last publish, nothing to do".to_string())
            }
        }
    }
}
