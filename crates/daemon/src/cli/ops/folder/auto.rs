use clap::Args;

use orbit_daemon::publish::{PublishedFolderRegistry, RegistryError};
use orbit_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Auto {
    /// Enable or disable automatic publishing of changed folders
    #[arg(value_parser = clap::builder::BoolishValueParser::new())]
    pub enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FolderAutoError {
    #[error("state error: {0}")]
    State(#[from] orbit_daemon::state::StateError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Auto {
    type Error = FolderAutoError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let registry = PublishedFolderRegistry::new(&state.data_path);
        registry.set_auto_publish(self.enabled)?;
        Ok(if self.enabled {
            "Auto-publish enabled; the daemon watches folders and republishes on change".to_string()
        } else {
            "Auto-publish disabled".to_string()
        })
    }
}
