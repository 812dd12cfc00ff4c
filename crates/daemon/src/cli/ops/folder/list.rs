use clap::Args;

use orbit_daemon::publish::{PublishedFolderRegistry, RegistryError};
use orbit_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct List;

#[derive(Debug, thiserror::Error)]
pub enum FolderListError {
    #[error("state error: {0}")]
    State(#[from] orbit_daemon::state::StateError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for List {
    type Error = FolderListError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let registry = PublishedFolderRegistry::new(&state.data_path);

        let folders = registry.folders()?;
        if folders.is_empty() {
            return Ok("No published folders".to_string());
        }

        let mut lines = Vec::new();
        for folder in folders {
            let published = match (&folder.published_at, &folder.published_name) {
                (Some(at), Some(name)) => format!("{} as {}", at.to_rfc3339(), name),
                _ => "never".to_string(),
            };
            lines.push(format!(
                "{}  {}\n    published: {}",
                folder.id,
                folder.root_path.display(),
                published
            ));
        }
        Ok(lines.join("\n"))
    }
}
