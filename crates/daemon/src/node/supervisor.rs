use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use common::command::{NodeBin, StreamingChild};
use common::ports::{scout_port, PortError};

use super::api::NodeApiClient;
use super::NodePorts;
use crate::state::PortRange;

/// Line the node prints on stdout once its API is serving.
const READY_MARKER: &str = "Daemon is ready";

const INIT_TIMEOUT: Duration = Duration::from_secs(120);
const CONFIG_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known bootstrap peers, kept in sync with
/// https://docs.ipfs.io/how-to/peering-with-content-providers/
fn bootstrap_peers() -> serde_json::Value {
    serde_json::json!([
        {
            "ID": "12D3KooWBJY6ZVV8Tk8UDDFMEqWoxn89Xc8wnpm8uBFSR3ijDkui",
            "Addrs": [
                "/ip4/167.71.172.216/tcp/4001",
                "/ip6/2604:a880:800:10::826:1/tcp/4001",
                "/ip4/167.71.172.216/udp/4001/quic",
                "/ip6/2604:a880:800:10::826:1/udp/4001/quic"
            ]
        },
        {
            "ID": "12D3KooWDaGQ3Fu3iLgFxrrg5Vfef9z5L3DQZoyqFxQJbKKPnCc8",
            "Addrs": [
                "/ip4/143.198.18.166/tcp/4001",
                "/ip6/2604:a880:800:10::735:7001/tcp/4001",
                "/ip4/143.198.18.166/udp/4001/quic",
                "/ip6/2604:a880:800:10::735:7001/udp/4001/quic"
            ]
        },
        {
            "ID": "12D3KooWJ6MTkNM8Bu8DzNiRm1GY3Wqh8U8Pp1zRWap6xY3MvsNw",
            "Addrs": ["/dnsaddr/node-1.ipfs.bit.site"]
        },
        {
            "ID": "12D3KooWQ85aSCFwFkByr5e3pUCQeuheVhobVxGSSs1DrRQHGv1t",
            "Addrs": ["/dnsaddr/node-1.ipfs.4everland.net"]
        },
        {
            "ID": "12D3KooWGtYkBAaqJMJEmywMxaCiNP7LCEFUAFiLEBASe232c2VH",
            "Addrs": ["/dns4/bitswap.filebase.io/tcp/443/wss"]
        }
    ])
}

fn swarm_conn_mgr() -> serde_json::Value {
    serde_json::json!({
        "GracePeriod": "20s",
        "HighWater": 240,
        "LowWater": 120,
        "Type": "basic"
    })
}

fn cors_allow_origin() -> serde_json::Value {
    serde_json::json!(["https://webui.ipfs.io"])
}

fn cors_allow_methods() -> serde_json::Value {
    serde_json::json!(["PUT", "POST"])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Uninitialized,
    Configuring,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// Externally observable node state, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub phase: NodePhase,
    pub online: bool,
    pub peers: usize,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            phase: NodePhase::Uninitialized,
            online: false,
            peers: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("port scouting failed: {0}")]
    Port(#[from] PortError),

    #[error("node process error: {0}")]
    Command(#[from] common::command::CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node is not configured yet")]
    NotConfigured,

    #[error("node process is already running")]
    AlreadyRunning,
}

struct Inner {
    bin: NodeBin,
    swarm_ports: PortRange,
    api_ports: PortRange,
    gateway_ports: PortRange,
    ports: Option<NodePorts>,
    api: Option<NodeApiClient>,
    child: Option<StreamingChild>,
}

/// Owns the external node process: repository bootstrap, port
/// negotiation, config writes, launch/shutdown and health polling.
/// The ports and the subprocess handle never leave this type.
#[derive(Clone)]
pub struct NodeSupervisor {
    inner: Arc<Mutex<Inner>>,
    status_tx: Arc<watch::Sender<NodeStatus>>,
}

impl NodeSupervisor {
    pub fn new(
        executable: PathBuf,
        repo_path: PathBuf,
        swarm_ports: PortRange,
        api_ports: PortRange,
        gateway_ports: PortRange,
    ) -> Self {
        let (status_tx, _) = watch::channel(NodeStatus::default());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                bin: NodeBin::new(executable, repo_path),
                swarm_ports,
                api_ports,
                gateway_ports,
                ports: None,
                api: None,
                child: None,
            })),
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> NodeStatus {
        *self.status_tx.borrow()
    }

    fn set_phase(&self, phase: NodePhase) {
        self.status_tx.send_modify(|status| status.phase = phase);
    }

    /// Bootstrap the node repository and write its config: init on an
    /// empty repo, scout and pin down the three ports, then apply
    /// peering, connection-manager and CORS settings. Any failure here
    /// is fatal to startup.
    pub async fn configure(&self) -> Result<NodePorts, SupervisorError> {
        let mut inner = self.inner.lock().await;
        self.set_phase(NodePhase::Configuring);

        match self.configure_inner(&mut inner).await {
            Ok(ports) => Ok(ports),
            Err(e) => {
                self.set_phase(NodePhase::Failed);
                Err(e)
            }
        }
    }

    async fn configure_inner(&self, inner: &mut Inner) -> Result<NodePorts, SupervisorError> {
        let repo_path = inner.bin.repo_path().to_path_buf();
        let repo_is_empty = match std::fs::read_dir(&repo_path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => {
                std::fs::create_dir_all(&repo_path)?;
                true
            }
        };
        if repo_is_empty {
            tracing::info!(repo = %repo_path.display(), "initializing node repository");
            inner.bin.init().run(INIT_TIMEOUT).await?.require_success()?;
        }

        let swarm = scout_port(inner.swarm_ports.as_range())?;
        inner
            .bin
            .update_swarm_port(swarm)
            .run(CONFIG_TIMEOUT)
            .await?
            .require_success()?;
        tracing::info!(port = swarm, "updated swarm port");

        let api = scout_port(inner.api_ports.as_range())?;
        inner
            .bin
            .update_api_port(api)
            .run(CONFIG_TIMEOUT)
            .await?
            .require_success()?;
        tracing::info!(port = api, "updated API port");

        let gateway = scout_port(inner.gateway_ports.as_range())?;
        inner
            .bin
            .update_gateway_port(gateway)
            .run(CONFIG_TIMEOUT)
            .await?
            .require_success()?;
        tracing::info!(port = gateway, "updated gateway port");

        inner
            .bin
            .set_peers(&bootstrap_peers().to_string())
            .run(CONFIG_TIMEOUT)
            .await?
            .require_success()?;

        inner
            .bin
            .set_swarm_conn_mgr(&swarm_conn_mgr().to_string())
            .run(CONFIG_TIMEOUT)
            .await?
            .require_success()?;

        inner
            .bin
            .set_access_control_allow_origin(&cors_allow_origin().to_string())
            .run(CONFIG_TIMEOUT)
            .await?
            .require_success()?;

        // The node works without this one; log and move on.
        if let Err(e) = inner
            .bin
            .set_access_control_allow_methods(&cors_allow_methods().to_string())
            .run(CONFIG_TIMEOUT)
            .await
            .and_then(|out| out.require_success().map(|_| ()))
        {
            tracing::warn!("failed to set CORS allow-methods: {}", e);
        }

        let ports = NodePorts {
            swarm,
            api,
            gateway,
        };
        inner.ports = Some(ports);
        inner.api = Some(NodeApiClient::new(inner.bin.clone(), ports));
        Ok(ports)
    }

    /// Launch the long-running daemon subcommand. A best-effort
    /// `shutdown` goes out first: its result is ignored, but it clears
    /// any stale lock file a crashed run may have left behind.
    /// Readiness is detected from the stdout marker and flips the phase
    /// asynchronously.
    pub async fn launch(&self) -> Result<(), SupervisorError> {
        let mut inner = self.inner.lock().await;
        if inner.ports.is_none() {
            return Err(SupervisorError::NotConfigured);
        }
        if inner.child.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let _ = inner.bin.shutdown_daemon().run(SHUTDOWN_TIMEOUT).await;

        self.set_phase(NodePhase::Starting);

        let (ready_tx, ready_rx) = flume::bounded::<()>(1);
        let child = inner
            .bin
            .launch_daemon()
            .stream(
                move |line| {
                    tracing::debug!(target: "node::stdout", "{}", line);
                    if line.contains(READY_MARKER) {
                        let _ = ready_tx.try_send(());
                    }
                },
                |line| {
                    tracing::debug!(target: "node::stderr", "{}", line);
                },
            )
            .map_err(|e| {
                self.set_phase(NodePhase::Failed);
                e
            })?;
        tracing::info!(pid = ?child.id(), "node daemon launched");
        inner.child = Some(child);

        let supervisor = self.clone();
        tokio::spawn(async move {
            if ready_rx.recv_async().await.is_ok() {
                tracing::info!("node daemon is ready");
                supervisor.set_phase(NodePhase::Ready);
                supervisor.refresh_health().await;
            }
        });

        Ok(())
    }

    /// Block until the node reports ready, bounded by `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| s.phase == NodePhase::Ready))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Graceful shutdown subcommand, then terminate the child no matter
    /// what the subcommand said.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.set_phase(NodePhase::Stopping);

        match inner.bin.shutdown_daemon().run(SHUTDOWN_TIMEOUT).await {
            Ok(out) if out.success() => tracing::info!("node daemon shut down"),
            Ok(out) => tracing::warn!(
                status = out.status,
                stderr = %out.stderr_trimmed(),
                "node shutdown subcommand failed"
            ),
            Err(e) => tracing::warn!("node shutdown subcommand error: {}", e),
        }

        if let Some(child) = inner.child.take() {
            child.terminate().await;
        }
        self.status_tx.send_modify(|status| {
            status.phase = NodePhase::Stopped;
            status.online = false;
            status.peers = 0;
        });
    }

    /// Probe the node and update the observable status. Failures flip
    /// the status flags; they are never propagated.
    pub async fn refresh_health(&self) {
        let api = {
            let mut inner = self.inner.lock().await;
            if let Some(child) = inner.child.as_mut() {
                match child.try_status() {
                    Ok(Some(status)) => {
                        tracing::error!(status, "node process exited unexpectedly");
                        inner.child = None;
                        self.status_tx.send_modify(|s| {
                            s.phase = NodePhase::Failed;
                            s.online = false;
                            s.peers = 0;
                        });
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("failed to check node process: {}", e),
                }
            }
            inner.api.clone()
        };
        let Some(api) = api else { return };

        let online = api.probe_online().await;
        let peers = if online { api.peer_count().await } else { 0 };
        self.status_tx.send_modify(|status| {
            status.online = online;
            status.peers = peers;
        });
    }

    pub async fn ports(&self) -> Option<NodePorts> {
        self.inner.lock().await.ports
    }

    pub async fn api_client(&self) -> Option<NodeApiClient> {
        self.inner.lock().await.api.clone()
    }
}
