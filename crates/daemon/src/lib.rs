// Service modules (daemon functionality)
pub mod node;
pub mod process;
pub mod publish;
pub mod service_config;

// App state (configuration, paths)
pub mod state;

// Re-exports for consumers
pub use process::{spawn_service, start_service, ServiceState, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use state::{AppConfig, AppState, StateError};
