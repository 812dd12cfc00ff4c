use clap::Args;

use orbit_daemon::state::AppState;
use orbit_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] orbit_daemon::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        // Load state from config path (or default ~/.orbit)
        let state = AppState::load(ctx.config_path.clone())?;

        let config = ServiceConfig {
            node_executable: state.config.node_executable.clone(),
            node_repo_path: state.node_repo_path.clone(),
            swarm_ports: state.config.swarm_ports,
            api_ports: state.config.api_ports,
            gateway_ports: state.config.gateway_ports,
            data_path: state.data_path.clone(),
            log_level: tracing::Level::DEBUG,
            log_dir: self.log_dir.clone(),
        };

        spawn_service(&config).await;
        Ok("daemon ended".to_string())
    }
}
