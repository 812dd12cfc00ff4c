use std::sync::Arc;

use clap::{Args, Subcommand};
use tokio::sync::Mutex;

use orbit_daemon::node::api::resolve_ports;
use orbit_daemon::node::{ApiError, NodeApiClient};
use orbit_daemon::publish::{PublishedFolderRegistry, PublisherService, PublishingCoordinator};
use orbit_daemon::state::AppState;

use crate::cli::op::Op;
use common::command::NodeBin;

pub mod add;
pub mod auto;
pub mod export_key;
pub mod import_key;
pub mod list;
pub mod publish;
pub mod remove;

crate::command_enum! {
    (Add, add::Add),
    (Remove, remove::Remove),
    (Publish, publish::Publish),
    (List, list::List),
    (Auto, auto::Auto),
    (ExportKey, export_key::ExportKey),
    (ImportKey, import_key::ImportKey),
}

// Rename the generated Command to FolderCommand for clarity
pub type FolderCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Folder {
    #[command(subcommand)]
    pub command: FolderCommand,
}

#[async_trait::async_trait]
impl Op for Folder {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

pub(crate) fn node_bin(state: &AppState) -> NodeBin {
    NodeBin::new(
        state.config.node_executable.clone(),
        state.node_repo_path.clone(),
    )
}

/// Build an API client against the node the daemon is supervising,
/// reading the ports back out of the node repo's config.
pub(crate) async fn node_client(state: &AppState) -> Result<NodeApiClient, ApiError> {
    let bin = node_bin(state);
    let ports = resolve_ports(&bin).await?;
    Ok(NodeApiClient::new(bin, ports))
}

/// Publishing surface for ops that talk to the node.
pub(crate) async fn publisher(state: &AppState) -> Result<PublisherService, ApiError> {
    let client = node_client(state).await?;
    let registry = Arc::new(Mutex::new(PublishedFolderRegistry::new(&state.data_path)));
    let coordinator = Arc::new(PublishingCoordinator::new(Arc::new(client), registry));
    Ok(PublisherService::new(coordinator))
}
