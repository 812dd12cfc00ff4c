use std::path::PathBuf;

use clap::Args;

use orbit_daemon::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Path to the external node executable (default: "ipfs" on PATH)
    #[arg(long)]
    pub node_executable: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] orbit_daemon::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::default();
        if let Some(exe) = &self.node_executable {
            config.node_executable = exe.clone();
        }

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let output = format!(
            "Initialized orbit directory at: {}\n\
             - Node repository: {}\n\
             - Data: {}\n\
             - Config: {}\n\
             - Node executable: {}",
            state.orbit_dir.display(),
            state.node_repo_path.display(),
            state.data_path.display(),
            state.config_path.display(),
            state.config.node_executable.display()
        );

        Ok(output)
    }
}
