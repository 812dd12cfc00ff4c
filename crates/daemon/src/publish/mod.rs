pub mod coordinator;
pub mod monitor;
pub mod registry;
pub mod service;

pub use coordinator::{PublishError, PublishOutcome, PublishingCoordinator};
pub use monitor::{ChangeEvent, DirectoryChangeMonitor};
pub use registry::{PublishedFolderRegistry, RegistryError};
pub use service::{PublisherService, ServiceError};
