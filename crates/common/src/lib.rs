/**
 * Capability tokens for user-granted directory access.
 *  An opaque, revalidatable handle that survives folder
 *  renames and relocations.
 */
pub mod capability;
/**
 * Builder and runner for subcommands of the external
 *  content node executable, in buffered and streaming
 *  flavors.
 */
pub mod command;
/**
 * Data model for published folders and their
 *  content-hash version history.
 */
pub mod folder;
/**
 * Flat-file JSON persistence with atomic
 *  read-modify-write semantics.
 */
pub mod kv;
/**
 * Scans a port range for a free local TCP port.
 */
pub mod ports;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::capability::{CapabilityError, CapabilityStore, CapabilityToken};
    pub use crate::command::{CommandError, CommandOutput, NodeBin, NodeCommand};
    pub use crate::folder::{PublishedFolder, PublishedFolderVersion};
    pub use crate::kv::{JsonStore, KvError};
    pub use crate::ports::{scout_port, PortError};
    pub use crate::version::build_info;
}
