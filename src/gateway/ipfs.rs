//! `StorageGateway` backed by the `ipfs` command line client

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{disk, AddedContent, GatewayError, Health, PinnedContent, StorageGateway};

/// Drives a local IPFS daemon through its CLI
pub struct IpfsCli {
    binary: PathBuf,
    command_timeout: Duration,
    transfer_timeout: Duration,
}

impl IpfsCli {
    pub fn new(binary: PathBuf, command_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            binary,
            command_timeout,
            transfer_timeout,
        }
    }

    /// Find the ipfs executable, either the explicit one or the first on
    /// `search_path`.
    pub fn locate(explicit: Option<&Path>, search_path: &str) -> Option<PathBuf> {
        match explicit {
            Some(path) => which::which(path).ok(),
            None => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                which::which_in("ipfs", Some(search_path), cwd).ok()
            }
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run a short daemon command and return its stdout.
    async fn run(
        &self,
        command: &'static str,
        args: &[&str],
        limit: Duration,
    ) -> Result<Vec<u8>, GatewayError> {
        debug!(command, ?args, "Running ipfs");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match timeout(limit, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GatewayError::Spawn {
                    command,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(GatewayError::Timeout { command }),
        };

        if !output.status.success() {
            return Err(GatewayError::Exit {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    /// Launch the daemon in the background without waiting for it.
    fn start_daemon(&self) {
        let spawned = Command::new(&self.binary)
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => info!(pid = ?child.id(), "Started ipfs daemon"),
            Err(e) => warn!(error = %e, "Failed to start ipfs daemon"),
        }
    }
}

#[async_trait]
impl StorageGateway for IpfsCli {
    async fn identity(&self) -> Result<String, GatewayError> {
        let stdout = self.run("id", &["id"], self.command_timeout).await?;
        parse_identity(&stdout)
    }

    async fn health(&self) -> Health {
        let diag = self
            .run("diag sys", &["diag", "sys"], self.command_timeout)
            .await
            .and_then(|stdout| parse_diag(&stdout));

        match diag {
            Ok(health) => {
                if !health.online {
                    warn!("@@@ IPFS NOT RUNNING !!! Restarting Daemon @@@");
                    self.start_daemon();
                }
                health
            }
            Err(e) => {
                warn!(error = %e, "Daemon diagnostics failed, reporting offline");
                Health::default()
            }
        }
    }

    async fn peer_count(&self) -> u64 {
        match self
            .run("swarm peers", &["swarm", "peers"], self.command_timeout)
            .await
        {
            Ok(stdout) => count_lines(&stdout),
            Err(e) => {
                debug!(error = %e, "Peer listing failed");
                0
            }
        }
    }

    async fn add_stream(
        &self,
        filename: &str,
        mut chunks: mpsc::Receiver<Bytes>,
    ) -> Result<AddedContent, GatewayError> {
        const COMMAND: &str = "add";

        let child = Command::new(&self.binary)
            .args(["add", "-q", "-w", "--stdin-name", filename])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::Spawn {
                command: COMMAND,
                reason: e.to_string(),
            })?;
        let mut process = TransferProcess { child };

        let mut stdin = process.child.stdin.take().ok_or_else(|| GatewayError::Pipe {
            command: COMMAND,
            reason: "stdin not captured".to_string(),
        })?;
        // Drain output while writing so a chatty child never blocks on a full pipe
        let stdout = tokio::spawn(read_pipe(process.child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(process.child.stderr.take()));

        let mut written: u64 = 0;
        let mut pipe_error = None;
        while let Some(chunk) = chunks.recv().await {
            if let Err(e) = stdin.write_all(&chunk).await {
                pipe_error = Some(e.to_string());
                break;
            }
            written += chunk.len() as u64;
        }
        // Closing stdin tells ipfs the file is complete
        drop(stdin);
        drop(chunks);

        let status = match timeout(self.transfer_timeout, process.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(GatewayError::Pipe {
                    command: COMMAND,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(GatewayError::Timeout { command: COMMAND }),
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(GatewayError::Exit {
                command: COMMAND,
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        if let Some(reason) = pipe_error {
            return Err(GatewayError::Pipe {
                command: COMMAND,
                reason,
            });
        }

        debug!(filename, written, "ipfs add finished");
        parse_added(&stdout)
    }

    async fn pin_add(&self, hash: &str) -> Result<(), GatewayError> {
        self.run("pin add", &["pin", "add", hash], self.transfer_timeout)
            .await
            .map(|_| ())
    }

    async fn pin_verify(&self, hash: &str) -> Result<PinnedContent, GatewayError> {
        let stdout = self.run("ls", &["ls", hash], self.command_timeout).await?;
        parse_listing(&stdout)
    }

    async fn pin_remove(&self, hash: &str) {
        if let Err(e) = self
            .run("pin rm", &["pin", "rm", hash], self.command_timeout)
            .await
        {
            debug!(hash, error = %e, "Unpin failed");
        }
    }

    async fn repo_usage(&self) -> u64 {
        let usage = self
            .run("repo stat", &["repo", "stat", "-s"], self.command_timeout)
            .await
            .and_then(|stdout| parse_repo_size(&stdout));

        match usage {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Repo usage query failed");
                0
            }
        }
    }

    fn disk_available(&self, path: &Path) -> u64 {
        disk::available_space(path)
    }
}

/// The `ipfs add` child of one transfer. If the transfer is abandoned before
/// the child exits (timeout, failed download), the child is killed.
struct TransferProcess {
    child: Child,
}

impl Drop for TransferProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = ?self.child.id(), "Terminating unfinished ipfs add");
            if let Err(e) = self.child.start_kill() {
                debug!(error = %e, "Failed to kill ipfs add");
            }
        }
    }
}

async fn read_pipe<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Failed to read ipfs output");
        }
    }
    buf
}

#[derive(Deserialize)]
struct DiagSys {
    ipfs_version: String,
    net: DiagNet,
}

#[derive(Deserialize)]
struct DiagNet {
    online: bool,
}

fn parse_identity(stdout: &[u8]) -> Result<String, GatewayError> {
    let value: serde_json::Value = serde_json::from_slice(stdout).map_err(|e| GatewayError::Output {
        command: "id",
        detail: e.to_string(),
    })?;

    value
        .get("ID")
        .and_then(|id| id.as_str())
        .map(String::from)
        .ok_or_else(|| GatewayError::Output {
            command: "id",
            detail: "missing ID field".to_string(),
        })
}

fn parse_diag(stdout: &[u8]) -> Result<Health, GatewayError> {
    let diag: DiagSys = serde_json::from_slice(stdout).map_err(|e| GatewayError::Output {
        command: "diag sys",
        detail: e.to_string(),
    })?;

    Ok(Health {
        online: diag.net.online,
        version: Some(diag.ipfs_version),
    })
}

fn count_lines(stdout: &[u8]) -> u64 {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count() as u64
}

/// `add -q -w` prints the file hash, then the wrapping directory hash.
fn parse_added(stdout: &[u8]) -> Result<AddedContent, GatewayError> {
    let text = String::from_utf8_lossy(stdout);
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    match (lines.next(), lines.next()) {
        (Some(content), Some(wrapping)) => Ok(AddedContent {
            content_hash: content.to_string(),
            wrapping_hash: wrapping.to_string(),
        }),
        _ => Err(GatewayError::Output {
            command: "add",
            detail: format!("expected two hashes, got {:?}", text.trim()),
        }),
    }
}

/// First listed entry: `<hash> <size> [name]`.
fn parse_listing(stdout: &[u8]) -> Result<PinnedContent, GatewayError> {
    let text = String::from_utf8_lossy(stdout);
    let mut fields = text.trim().split_whitespace();

    let hash = fields.next();
    let length = fields.next().and_then(|l| l.parse::<u64>().ok());

    match (hash, length) {
        (Some(hash), Some(length)) => Ok(PinnedContent {
            hash: hash.to_string(),
            length,
        }),
        _ => Err(GatewayError::Output {
            command: "ls",
            detail: format!("expected '<hash> <size>', got {:?}", text.trim()),
        }),
    }
}

fn parse_repo_size(stdout: &[u8]) -> Result<u64, GatewayError> {
    let text = String::from_utf8_lossy(stdout);

    text.lines()
        .find(|line| line.trim_start().starts_with("RepoSize"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|size| size.trim().parse().ok())
        .ok_or_else(|| GatewayError::Output {
            command: "repo stat",
            detail: "missing RepoSize".to_string(),
        })
}
