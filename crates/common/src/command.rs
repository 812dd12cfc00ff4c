use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// The node executable reads its repository location from this variable,
/// keeping the repo out of the user's default location.
pub const REPO_ENV_VAR: &str = "IPFS_PATH";

const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn node process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("node process IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node process timed out after {0:?}")]
    TimedOut(Duration),

    #[error("node process exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
}

/// Captured result of a buffered subcommand run.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Maps a non-zero exit into `CommandError::Failed`.
    pub fn require_success(self) -> Result<CommandOutput, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                status: self.status,
                stderr: self.stderr_trimmed(),
            })
        }
    }
}

/// Locates the node executable and its repository, and builds the
/// subcommand invocations the daemon issues against it.
#[derive(Debug, Clone)]
pub struct NodeBin {
    executable: PathBuf,
    repo_path: PathBuf,
}

impl NodeBin {
    pub fn new(executable: impl Into<PathBuf>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn command<I, S>(&self, args: I) -> NodeCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NodeCommand {
            executable: self.executable.clone(),
            repo_path: self.repo_path.clone(),
            arguments: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn init(&self) -> NodeCommand {
        self.command(["init"])
    }

    pub fn update_api_port(&self, port: u16) -> NodeCommand {
        self.command([
            "config".to_string(),
            "Addresses.API".to_string(),
            format!("/ip4/127.0.0.1/tcp/{port}"),
        ])
    }

    pub fn update_gateway_port(&self, port: u16) -> NodeCommand {
        self.command([
            "config".to_string(),
            "Addresses.Gateway".to_string(),
            format!("/ip4/127.0.0.1/tcp/{port}"),
        ])
    }

    pub fn update_swarm_port(&self, port: u16) -> NodeCommand {
        self.command([
            "config".to_string(),
            "Addresses.Swarm".to_string(),
            format!(
                "[\"/ip4/0.0.0.0/tcp/{port}\", \"/ip6/::/tcp/{port}\", \"/ip4/0.0.0.0/udp/{port}/quic\", \"/ip6/::/udp/{port}/quic\"]"
            ),
            "--json".to_string(),
        ])
    }

    pub fn get_config(&self, key: &str) -> NodeCommand {
        self.command(["config", key])
    }

    pub fn set_peers(&self, peers_json: &str) -> NodeCommand {
        self.command(["config", "Peering.Peers", peers_json, "--json"])
    }

    pub fn set_swarm_conn_mgr(&self, json: &str) -> NodeCommand {
        self.command(["config", "Swarm.ConnMgr", json, "--json"])
    }

    pub fn set_access_control_allow_origin(&self, json: &str) -> NodeCommand {
        self.command([
            "config",
            "API.HTTPHeaders.Access-Control-Allow-Origin",
            json,
            "--json",
        ])
    }

    pub fn set_access_control_allow_methods(&self, json: &str) -> NodeCommand {
        self.command([
            "config",
            "API.HTTPHeaders.Access-Control-Allow-Methods",
            json,
            "--json",
        ])
    }

    pub fn launch_daemon(&self) -> NodeCommand {
        self.command([
            "daemon",
            "--migrate",
            "--enable-namesys-pubsub",
            "--enable-pubsub-experiment",
        ])
    }

    pub fn shutdown_daemon(&self) -> NodeCommand {
        self.command(["shutdown"])
    }

    pub fn add_directory(&self, directory: &Path) -> NodeCommand {
        self.command([
            "add".to_string(),
            "-r".to_string(),
            directory.to_string_lossy().into_owned(),
            "--cid-version=1".to_string(),
            "--quieter".to_string(),
        ])
    }

    pub fn generate_key(&self, name: &str) -> NodeCommand {
        self.command(["key", "gen", name])
    }

    pub fn remove_key(&self, name: &str) -> NodeCommand {
        self.command(["key", "rm", name])
    }

    pub fn list_keys(&self) -> NodeCommand {
        self.command(["key", "list"])
    }

    pub fn export_key(&self, name: &str, target: &Path) -> NodeCommand {
        self.command([
            "key".to_string(),
            "export".to_string(),
            name.to_string(),
            "-o".to_string(),
            target.to_string_lossy().into_owned(),
        ])
    }

    pub fn import_key(&self, name: &str, source: &Path) -> NodeCommand {
        self.command([
            "key".to_string(),
            "import".to_string(),
            name.to_string(),
            source.to_string_lossy().into_owned(),
        ])
    }
}

/// One invocation of the node executable.
#[derive(Debug, Clone)]
pub struct NodeCommand {
    executable: PathBuf,
    repo_path: PathBuf,
    arguments: Vec<String>,
}

impl NodeCommand {
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.arguments)
            .env(REPO_ENV_VAR, &self.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run to completion, capturing stdout and stderr, bounded by `timeout`.
    pub async fn run(&self, timeout: Duration) -> Result<CommandOutput, CommandError> {
        let mut cmd = self.build();
        cmd.kill_on_drop(true);
        let fut = cmd.output();
        let output = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| CommandError::TimedOut(timeout))?
            .map_err(CommandError::Spawn)?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Spawn as a long-running process, delivering stdout/stderr lines to
    /// the given callbacks from dedicated reader tasks.
    pub fn stream<O, E>(&self, on_stdout: O, on_stderr: E) -> Result<StreamingChild, CommandError>
    where
        O: Fn(&str) + Send + 'static,
        E: Fn(&str) + Send + 'static,
    {
        let mut child = self.build().spawn().map_err(CommandError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = stdout.map(|out| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    on_stdout(&line);
                }
            })
        });
        let stderr_task = stderr.map(|err| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    on_stderr(&line);
                }
            })
        });

        Ok(StreamingChild {
            child,
            stdout_task,
            stderr_task,
        })
    }
}

/// Handle to a streaming node process.
pub struct StreamingChild {
    child: Child,
    stdout_task: Option<tokio::task::JoinHandle<()>>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
}

impl StreamingChild {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the process and wait briefly for it to go away. The reader
    /// tasks drain on their own once the pipes close.
    pub async fn terminate(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!("failed to kill node process: {}", e);
        }
        let _ = tokio::time::timeout(KILL_WAIT, self.child.wait()).await;
        if let Some(task) = self.stdout_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    /// Check whether the process has exited without blocking.
    pub fn try_status(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin() -> NodeBin {
        NodeBin::new("/usr/local/bin/node-bin", "/tmp/repo")
    }

    #[test]
    fn test_add_directory_arguments() {
        let cmd = bin().add_directory(Path::new("/data/site"));
        assert_eq!(
            cmd.arguments(),
            ["add", "-r", "/data/site", "--cid-version=1", "--quieter"]
        );
    }

    #[test]
    fn test_swarm_port_is_json_config() {
        let cmd = bin().update_swarm_port(4001);
        assert_eq!(cmd.arguments()[0], "config");
        assert_eq!(cmd.arguments()[1], "Addresses.Swarm");
        assert!(cmd.arguments()[2].contains("/ip4/0.0.0.0/tcp/4001"));
        assert_eq!(cmd.arguments().last().unwrap(), "--json");
    }

    #[test]
    fn test_key_export_import_arguments() {
        let export = bin().export_key("site-key", Path::new("/backups/site.key"));
        assert_eq!(
            export.arguments(),
            ["key", "export", "site-key", "-o", "/backups/site.key"]
        );
        let import = bin().import_key("site-key", Path::new("/backups/site.key"));
        assert_eq!(
            import.arguments(),
            ["key", "import", "site-key", "/backups/site.key"]
        );
    }

    #[test]
    fn test_require_success_maps_exit_code() {
        let out = CommandOutput {
            status: 1,
            stdout: Vec::new(),
            stderr: b"repo is locked".to_vec(),
        };
        let err = out.require_success().unwrap_err();
        assert!(matches!(
            err,
            CommandError::Failed { status: 1, ref stderr } if stderr == "repo is locked"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-node");
        std::fs::write(&script, "#!/bin/sh\necho \"$@\"\necho oops >&2\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let node = NodeBin::new(&script, dir.path());
        let out = node
            .list_keys()
            .run(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_trimmed(), "key list");
        assert_eq!(out.stderr_trimmed(), "oops");
    }
}
