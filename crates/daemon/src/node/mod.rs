pub mod api;
pub mod supervisor;

pub use api::{ApiError, NodeApi, NodeApiClient};
pub use supervisor::{NodePhase, NodeStatus, NodeSupervisor, SupervisorError};

/// The node's three listener ports, chosen once at startup and immutable
/// for the process lifetime. They live in the node's own config, not in
/// application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePorts {
    pub swarm: u16,
    pub api: u16,
    pub gateway: u16,
}
