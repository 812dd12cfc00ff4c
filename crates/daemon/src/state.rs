use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "orbit";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const NODE_REPO_DIR_NAME: &str = "node";
pub const DATA_DIR_NAME: &str = "data";

/// An inclusive port range to scout at node startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn as_range(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the external node executable
    #[serde(default = "default_node_executable")]
    pub node_executable: PathBuf,
    /// Port range scouted for the node's swarm listener
    #[serde(default = "default_swarm_ports")]
    pub swarm_ports: PortRange,
    /// Port range scouted for the node's management API
    #[serde(default = "default_api_ports")]
    pub api_ports: PortRange,
    /// Port range scouted for the node's gateway
    #[serde(default = "default_gateway_ports")]
    pub gateway_ports: PortRange,
}

fn default_node_executable() -> PathBuf {
    PathBuf::from("ipfs")
}

fn default_swarm_ports() -> PortRange {
    PortRange::new(4001, 4011)
}

fn default_api_ports() -> PortRange {
    PortRange::new(5981, 5991)
}

fn default_gateway_ports() -> PortRange {
    PortRange::new(18181, 18191)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_executable: default_node_executable(),
            swarm_ports: default_swarm_ports(),
            api_ports: default_api_ports(),
            gateway_ports: default_gateway_ports(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the orbit directory (~/.orbit)
    pub orbit_dir: PathBuf,
    /// Path to the node's on-disk repository
    pub node_repo_path: PathBuf,
    /// Path to the persisted registry data
    pub data_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the orbit directory path (custom or default ~/.orbit)
    pub fn orbit_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new orbit state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let orbit_dir = Self::orbit_dir(custom_path)?;

        if orbit_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&orbit_dir)?;

        let node_repo_path = orbit_dir.join(NODE_REPO_DIR_NAME);
        fs::create_dir_all(&node_repo_path)?;

        let data_path = orbit_dir.join(DATA_DIR_NAME);
        fs::create_dir_all(&data_path)?;

        let config = config.unwrap_or_default();
        let config_path = orbit_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        Ok(Self {
            orbit_dir,
            node_repo_path,
            data_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the orbit directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let orbit_dir = Self::orbit_dir(custom_path)?;

        if !orbit_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let node_repo_path = orbit_dir.join(NODE_REPO_DIR_NAME);
        let data_path = orbit_dir.join(DATA_DIR_NAME);
        let config_path = orbit_dir.join(CONFIG_FILE_NAME);

        if !node_repo_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", NODE_REPO_DIR_NAME)));
        }
        if !data_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", DATA_DIR_NAME)));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            orbit_dir,
            node_repo_path,
            data_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("orbit directory not initialized. Run 'orbit init' first")]
    NotInitialized,

    #[error("orbit directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("orbit-home");

        let state = AppState::init(Some(root.clone()), None).unwrap();
        assert!(state.node_repo_path.exists());
        assert!(state.data_path.exists());

        let loaded = AppState::load(Some(root)).unwrap();
        assert_eq!(loaded.config.api_ports, PortRange::new(5981, 5991));
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("orbit-home");
        AppState::init(Some(root.clone()), None).unwrap();
        assert!(matches!(
            AppState::init(Some(root), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_uninitialized_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("nope"))),
            Err(StateError::NotInitialized)
        ));
    }
}
