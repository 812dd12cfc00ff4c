use std::path::PathBuf;

use crate::state::PortRange;

#[derive(Debug, Clone)]
pub struct Config {
    // node configuration
    /// Path to the external node executable
    pub node_executable: PathBuf,
    /// Path to the node's on-disk repository
    pub node_repo_path: PathBuf,
    /// Port range scouted for the swarm listener
    pub swarm_ports: PortRange,
    /// Port range scouted for the management API
    pub api_ports: PortRange,
    /// Port range scouted for the gateway
    pub gateway_ports: PortRange,

    // registry configuration
    /// Directory holding the persisted publishing state
    pub data_path: PathBuf,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}
