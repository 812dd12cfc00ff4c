pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::node::{NodeStatus, NodeSupervisor};
use crate::publish::coordinator::RECONCILE_INTERVAL;
use crate::publish::{PublishedFolderRegistry, PublisherService, PublishingCoordinator};
use crate::ServiceConfig;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(30);
const NODE_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared handles for the running service.
#[derive(Clone)]
pub struct ServiceState {
    supervisor: NodeSupervisor,
    publisher: Arc<PublisherService>,
}

impl ServiceState {
    pub fn publisher(&self) -> Arc<PublisherService> {
        self.publisher.clone()
    }

    pub fn node_status(&self) -> watch::Receiver<NodeStatus> {
        self.supervisor.subscribe()
    }
}

/// Handle for gracefully shutting down the daemon service.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
    supervisor: NodeSupervisor,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        let _ = self.graceful_waiter.await;

        // The node process goes down first; the background tasks notice
        // the shutdown signal on their own.
        self.supervisor.stop().await;

        if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(self.handles))
            .await
            .is_err()
        {
            tracing::error!(
                "Failed to shut down within {} seconds",
                FINAL_SHUTDOWN_TIMEOUT.as_secs()
            );
            std::process::exit(4);
        }
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
fn init_logging(
    service_config: &ServiceConfig,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    // Stdout layer
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(service_config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    // File layer (if log_dir is set)
    if let Some(log_dir) = &service_config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "orbit.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(service_config.log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Bootstrap the node and the publishing pipeline, spawning all
/// background tasks. The returned `ShutdownHandle` must be kept alive;
/// dropping it does not stop the service.
///
/// Node bootstrap failures (port exhaustion, repo init, config writes)
/// are fatal: the process exits rather than running degraded.
pub async fn start_service(service_config: &ServiceConfig) -> (ServiceState, ShutdownHandle) {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker();

    let supervisor = NodeSupervisor::new(
        service_config.node_executable.clone(),
        service_config.node_repo_path.clone(),
        service_config.swarm_ports,
        service_config.api_ports,
        service_config.gateway_ports,
    );

    if let Err(e) = supervisor.configure().await {
        tracing::error!("error configuring node: {}", e);
        std::process::exit(3);
    }
    if let Err(e) = supervisor.launch().await {
        tracing::error!("error launching node: {}", e);
        std::process::exit(3);
    }

    let api = match supervisor.api_client().await {
        Some(api) => api,
        None => {
            tracing::error!("node API client unavailable after configuration");
            std::process::exit(3);
        }
    };

    let registry = Arc::new(Mutex::new(PublishedFolderRegistry::new(
        &service_config.data_path,
    )));
    let coordinator = Arc::new(PublishingCoordinator::new(Arc::new(api), registry));
    let publisher = Arc::new(PublisherService::new(coordinator.clone()));

    let mut handles = Vec::new();

    // Once the node reports ready: retry interrupted unpublishes, then
    // start monitors if auto-publish is on.
    {
        let supervisor = supervisor.clone();
        let coordinator = coordinator.clone();
        let publisher = publisher.clone();
        handles.push(tokio::spawn(async move {
            if !supervisor.wait_ready(NODE_STARTUP_TIMEOUT).await {
                tracing::warn!("node did not report ready in time");
                return;
            }
            coordinator.resume_removals().await;
            if let Err(e) = publisher.start_if_auto().await {
                tracing::error!("failed to start folder monitors: {}", e);
            }
        }));
    }

    // Health polling
    {
        let supervisor = supervisor.clone();
        let mut rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = interval.tick() => supervisor.refresh_health().await,
                }
            }
        }));
    }

    // Change-event consumer: records pending markers on its own queue so
    // watch callbacks never wait on a publish.
    {
        let coordinator = coordinator.clone();
        let change_rx = publisher.change_events();
        let mut rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    event = change_rx.recv_async() => match event {
                        Ok(event) => coordinator.record_change(event.folder_id).await,
                        Err(_) => break,
                    },
                }
            }
        }));
    }

    // Reconciliation timer
    {
        let coordinator = coordinator.clone();
        let mut rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = interval.tick() => coordinator.reconcile().await,
                }
            }
        }));
    }

    let state = ServiceState {
        supervisor: supervisor.clone(),
        publisher,
    };

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
        supervisor,
    };

    (state, handle)
}

/// Spawns the daemon service: node supervisor + publishing pipeline.
/// Blocks until a shutdown signal is received. Use for CLI binary usage.
pub async fn spawn_service(service_config: &ServiceConfig) {
    let _guards = init_logging(service_config);
    let (_, handle) = start_service(service_config).await;
    handle.wait().await;
}
