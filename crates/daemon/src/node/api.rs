use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use common::command::{CommandError, NodeBin};

use super::NodePorts;

/// Default timeout for management API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Pin operations are network-bound and routinely slow.
const PIN_TIMEOUT: Duration = Duration::from_secs(120);
/// Name publishing waits on network propagation.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(300);
/// Liveness probe; must fail fast.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
/// Recursive adds hash the whole directory tree.
const ADD_TIMEOUT: Duration = Duration::from_secs(600);
/// Key management subcommands are local-only.
const KEY_TIMEOUT: Duration = Duration::from_secs(30);

const RESOLVED_PATH_PREFIX: &str = "/ipfs/";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode {path} response: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("node process error: {0}")]
    Command(#[from] CommandError),

    #[error("unexpected {what} output: {output:?}")]
    UnexpectedOutput { what: &'static str, output: String },
}

/// The node operations the publishing pipeline needs. The production
/// implementation shells out to the node executable for recursive adds
/// and key management and uses the local HTTP API for the rest; tests
/// substitute a scripted fake.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn add_directory(&self, path: &Path) -> Result<String, ApiError>;
    async fn generate_key(&self, name: &str) -> Result<String, ApiError>;
    async fn remove_key(&self, name: &str) -> Result<(), ApiError>;
    async fn key_exists(&self, name: &str) -> Result<bool, ApiError>;
    async fn publish_name(&self, cid: &str, key: &str, lifetime: &str) -> Result<String, ApiError>;
    async fn resolve_name(&self, name: &str) -> Result<String, ApiError>;
    async fn pin(&self, cid: &str) -> Result<(), ApiError>;
    async fn unpin(&self, cid: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct NamePublished {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    #[allow(dead_code)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct NameResolved {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct SwarmPeers {
    #[serde(rename = "Peers")]
    peers: Option<Vec<serde_json::Value>>,
}

/// Client for the node's local management API and its CLI-only
/// operations. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NodeApiClient {
    bin: NodeBin,
    ports: NodePorts,
    client: Client,
}

impl NodeApiClient {
    pub fn new(bin: NodeBin, ports: NodePorts) -> Self {
        Self {
            bin,
            ports,
            client: Client::new(),
        }
    }

    pub fn ports(&self) -> NodePorts {
        self.ports
    }

    pub fn api_base_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v0", self.ports.api)
    }

    pub fn gateway_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.ports.gateway)
    }

    /// POST `path` with query-encoded args against the management API.
    pub async fn call(
        &self,
        path: &str,
        args: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Bytes, ApiError> {
        let mut url = Url::parse(&format!("{}/{}", self.api_base_url(), path))?;
        for (key, value) in args {
            url.query_pairs_mut().append_pair(key, value);
        }
        let response = self.client.post(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(response.bytes().await?)
    }

    /// Liveness probe against an always-available endpoint. Never errors;
    /// any failure reads as offline.
    pub async fn probe_online(&self) -> bool {
        self.call("id", &[], PROBE_TIMEOUT).await.is_ok()
    }

    /// Connected peer count. Any failure reads as zero; this is a status
    /// signal, not a critical operation.
    pub async fn peer_count(&self) -> usize {
        match self.call("swarm/peers", &[], DEFAULT_TIMEOUT).await {
            Ok(body) => serde_json::from_slice::<SwarmPeers>(&body)
                .ok()
                .and_then(|p| p.peers)
                .map(|p| p.len())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Fetch published content through the local gateway, for verifying
    /// that a name actually serves.
    pub async fn get_file(&self, name: &str, path: &str) -> Result<Bytes, ApiError> {
        let url = format!("{}/ipns/{}{}", self.gateway_base_url(), name, path);
        let response = self
            .client
            .get(&url)
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(response.bytes().await?)
    }

    pub async fn export_key(&self, name: &str, target: &Path) -> Result<(), ApiError> {
        self.bin
            .export_key(name, target)
            .run(KEY_TIMEOUT)
            .await?
            .require_success()?;
        Ok(())
    }

    /// Restore a previously exported folder key into the node keystore.
    pub async fn import_key(&self, name: &str, source: &Path) -> Result<(), ApiError> {
        self.bin
            .import_key(name, source)
            .run(KEY_TIMEOUT)
            .await?
            .require_success()?;
        Ok(())
    }

    /// All key names in the node keystore, excluding the node's own
    /// `self` key.
    pub async fn list_keys(&self) -> Result<Vec<String>, ApiError> {
        let out = self
            .bin
            .list_keys()
            .run(KEY_TIMEOUT)
            .await?
            .require_success()?;
        Ok(out
            .stdout_trimmed()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != "self")
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl NodeApi for NodeApiClient {
    async fn add_directory(&self, path: &Path) -> Result<String, ApiError> {
        let out = self
            .bin
            .add_directory(path)
            .run(ADD_TIMEOUT)
            .await?
            .require_success()?;
        let cid = out.stdout_trimmed();
        if cid.is_empty() || cid.split_whitespace().count() != 1 {
            return Err(ApiError::UnexpectedOutput {
                what: "add",
                output: cid,
            });
        }
        tracing::debug!(path = %path.display(), %cid, "added directory");
        Ok(cid)
    }

    async fn generate_key(&self, name: &str) -> Result<String, ApiError> {
        let out = self
            .bin
            .generate_key(name)
            .run(KEY_TIMEOUT)
            .await?
            .require_success()?;
        let id = out.stdout_trimmed();
        if id.is_empty() {
            return Err(ApiError::UnexpectedOutput {
                what: "key gen",
                output: id,
            });
        }
        tracing::info!(key = name, ipns = %id, "generated keypair");
        Ok(id)
    }

    async fn remove_key(&self, name: &str) -> Result<(), ApiError> {
        self.bin
            .remove_key(name)
            .run(KEY_TIMEOUT)
            .await?
            .require_success()?;
        tracing::info!(key = name, "removed keypair");
        Ok(())
    }

    async fn key_exists(&self, name: &str) -> Result<bool, ApiError> {
        let out = self
            .bin
            .list_keys()
            .run(KEY_TIMEOUT)
            .await?
            .require_success()?;
        Ok(out
            .stdout_trimmed()
            .lines()
            .any(|line| line.trim() == name))
    }

    async fn publish_name(&self, cid: &str, key: &str, lifetime: &str) -> Result<String, ApiError> {
        let body = self
            .call(
                "name/publish",
                &[
                    ("arg", cid),
                    ("allow-offline", "1"),
                    ("key", key),
                    ("quieter", "1"),
                    ("lifetime", lifetime),
                ],
                PUBLISH_TIMEOUT,
            )
            .await?;
        let published: NamePublished =
            serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
                path: "name/publish".to_string(),
                source,
            })?;
        tracing::info!(%cid, key, name = %published.name, "published name");
        Ok(published.name)
    }

    async fn resolve_name(&self, name: &str) -> Result<String, ApiError> {
        let body = self
            .call("name/resolve", &[("arg", name)], DEFAULT_TIMEOUT)
            .await?;
        let resolved: NameResolved =
            serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
                path: "name/resolve".to_string(),
                source,
            })?;
        match resolved.path.strip_prefix(RESOLVED_PATH_PREFIX) {
            Some(cid) => Ok(cid.to_string()),
            None => Err(ApiError::UnexpectedOutput {
                what: "name/resolve",
                output: resolved.path,
            }),
        }
    }

    async fn pin(&self, cid: &str) -> Result<(), ApiError> {
        self.call("pin/add", &[("arg", cid)], PIN_TIMEOUT).await?;
        Ok(())
    }

    async fn unpin(&self, cid: &str) -> Result<(), ApiError> {
        self.call("pin/rm", &[("arg", cid)], PIN_TIMEOUT).await?;
        Ok(())
    }
}

/// Read the listener ports back out of the node's own config. Lets a
/// short-lived CLI invocation reach the daemon the supervisor launched
/// in another process; the ports live in the node repo, not in
/// application state.
pub async fn resolve_ports(bin: &NodeBin) -> Result<NodePorts, ApiError> {
    let api_addr = read_config_value(bin, "Addresses.API").await?;
    let api = multiaddr_port(&api_addr).ok_or(ApiError::UnexpectedOutput {
        what: "Addresses.API",
        output: api_addr,
    })?;

    let gateway_addr = read_config_value(bin, "Addresses.Gateway").await?;
    let gateway = multiaddr_port(&gateway_addr).ok_or(ApiError::UnexpectedOutput {
        what: "Addresses.Gateway",
        output: gateway_addr,
    })?;

    let swarm_out = read_config_value(bin, "Addresses.Swarm").await?;
    let swarm = serde_json::from_str::<Vec<String>>(&swarm_out)
        .ok()
        .and_then(|addrs| addrs.first().and_then(|a| multiaddr_port(a)))
        .or_else(|| multiaddr_port(&swarm_out))
        .ok_or(ApiError::UnexpectedOutput {
            what: "Addresses.Swarm",
            output: swarm_out,
        })?;

    Ok(NodePorts {
        swarm,
        api,
        gateway,
    })
}

async fn read_config_value(bin: &NodeBin, key: &str) -> Result<String, ApiError> {
    let out = bin
        .get_config(key)
        .run(KEY_TIMEOUT)
        .await?
        .require_success()?;
    Ok(out.stdout_trimmed())
}

/// Pull the TCP port out of a multiaddr like `/ip4/127.0.0.1/tcp/5981`.
fn multiaddr_port(addr: &str) -> Option<u16> {
    let mut segments = addr.trim().trim_matches('"').split('/');
    while let Some(segment) = segments.next() {
        if segment == "tcp" || segment == "udp" {
            return segments.next().and_then(|p| p.parse().ok());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiaddr_port() {
        assert_eq!(multiaddr_port("/ip4/127.0.0.1/tcp/5981"), Some(5981));
        assert_eq!(multiaddr_port("\"/ip4/127.0.0.1/tcp/18181\""), Some(18181));
        assert_eq!(multiaddr_port("/ip4/0.0.0.0/udp/4001/quic"), Some(4001));
        assert_eq!(multiaddr_port("not-a-multiaddr"), None);
    }
}
