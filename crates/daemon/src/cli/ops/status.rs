use clap::Args;

use orbit_daemon::node::api::resolve_ports;
use orbit_daemon::node::NodeApiClient;
use orbit_daemon::publish::PublishedFolderRegistry;
use orbit_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Status;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("status check failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Status {
    type Error = StatusError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut lines = Vec::new();

        // 1. Config directory
        lines.push("Config:".to_string());
        let state = match AppState::load(ctx.config_path.clone()) {
            Ok(state) => {
                lines.push(format!("  directory:  {}", state.orbit_dir.display()));
                lines.push(format!("  node repo:  {}", state.node_repo_path.display()));
                lines.push(format!(
                    "  executable: {}",
                    state.config.node_executable.display()
                ));
                state
            }
            Err(e) => {
                lines.push(format!("  error: {}", e));
                return Ok(lines.join("\n"));
            }
        };

        // 2. Published folders
        let registry = PublishedFolderRegistry::new(&state.data_path);
        lines.push(String::new());
        lines.push("Folders:".to_string());
        match (registry.folders(), registry.auto_publish()) {
            (Ok(folders), Ok(auto)) => {
                lines.push(format!("  published:    {}", folders.len()));
                lines.push(format!(
                    "  auto-publish: {}",
                    if auto { "on" } else { "off" }
                ));
            }
            (Err(e), _) | (_, Err(e)) => lines.push(format!("  error: {}", e)),
        }

        // 3. Node liveness; unreachable is a status, not an error
        lines.push(String::new());
        lines.push("Node:".to_string());
        let bin = super::folder::node_bin(&state);
        match resolve_ports(&bin).await {
            Ok(ports) => {
                let client = NodeApiClient::new(bin, ports);
                let online = client.probe_online().await;
                lines.push(format!(
                    "  api:     127.0.0.1:{} ({})",
                    ports.api,
                    if online { "online" } else { "offline" }
                ));
                lines.push(format!("  gateway: 127.0.0.1:{}", ports.gateway));
                if online {
                    lines.push(format!("  peers:   {}", client.peer_count().await));
                }
                if let Ok(keys) = client.list_keys().await {
                    lines.push(format!("  keys:    {}", keys.len()));
                }
            }
            Err(e) => {
                lines.push(format!("  not configured ({})", e));
            }
        }

        Ok(lines.join("\n"))
    }
}
