//! Mock storage gateway for testing.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::*;

/// Configurable stand-in for the IPFS daemon.
pub struct MockGateway {
    identity: Option<String>,
    health: Health,
    peers: u64,
    add_result: Result<AddedContent, GatewayError>,
    pin_add_result: Result<(), GatewayError>,
    pin_verify_result: Result<PinnedContent, GatewayError>,
    repo_usage: u64,
    disk_available: u64,
    identity_calls: AtomicU32,
    add_calls: AtomicU32,
    pin_add_calls: AtomicU32,
    pin_verify_calls: AtomicU32,
    bytes_added: AtomicU64,
    removed: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            identity: Some("12D3KooWMockNode".to_string()),
            health: Health {
                online: true,
                version: Some("0.29.0".to_string()),
            },
            peers: 8,
            add_result: Ok(AddedContent {
                content_hash: "QmMockFile".to_string(),
                wrapping_hash: "QmMockDir".to_string(),
            }),
            pin_add_result: Ok(()),
            pin_verify_result: Ok(PinnedContent {
                hash: "QmMockListed".to_string(),
                length: 1234,
            }),
            repo_usage: 5_000,
            disk_available: 9_000,
            identity_calls: AtomicU32::new(0),
            add_calls: AtomicU32::new(0),
            pin_add_calls: AtomicU32::new(0),
            pin_verify_calls: AtomicU32::new(0),
            bytes_added: AtomicU64::new(0),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Make the identity query fail.
    pub fn without_identity(mut self) -> Self {
        self.identity = None;
        self
    }

    pub fn with_add_result(mut self, result: Result<AddedContent, GatewayError>) -> Self {
        self.add_result = result;
        self
    }

    pub fn with_pin_add_result(mut self, result: Result<(), GatewayError>) -> Self {
        self.pin_add_result = result;
        self
    }

    pub fn with_pin_verify_result(mut self, result: Result<PinnedContent, GatewayError>) -> Self {
        self.pin_verify_result = result;
        self
    }

    pub fn identity_calls(&self) -> u32 {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> u32 {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn pin_add_calls(&self) -> u32 {
        self.pin_add_calls.load(Ordering::SeqCst)
    }

    pub fn pin_verify_calls(&self) -> u32 {
        self.pin_verify_calls.load(Ordering::SeqCst)
    }

    pub fn bytes_added(&self) -> u64 {
        self.bytes_added.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    /// Total number of daemon operations touched by work execution.
    pub fn storage_calls(&self) -> u32 {
        self.add_calls()
            + self.pin_add_calls()
            + self.pin_verify_calls()
            + self.removed().len() as u32
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// An `Exit` error with the given code, as the CLI would report it.
pub fn exit_error(command: &'static str, code: i32) -> GatewayError {
    GatewayError::Exit {
        command,
        code: Some(code),
        stderr: "Error: mock failure".to_string(),
    }
}

#[async_trait]
impl StorageGateway for MockGateway {
    async fn identity(&self) -> Result<String, GatewayError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        self.identity.clone().ok_or_else(|| exit_error("id", 1))
    }

    async fn health(&self) -> Health {
        self.health.clone()
    }

    async fn peer_count(&self) -> u64 {
        self.peers
    }

    async fn add_stream(
        &self,
        _filename: &str,
        mut chunks: mpsc::Receiver<Bytes>,
    ) -> Result<AddedContent, GatewayError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        while let Some(chunk) = chunks.recv().await {
            self.bytes_added.fetch_add(chunk.len() as u64, Ordering::SeqCst);
        }
        self.add_result.clone()
    }

    async fn pin_add(&self, _hash: &str) -> Result<(), GatewayError> {
        self.pin_add_calls.fetch_add(1, Ordering::SeqCst);
        self.pin_add_result.clone()
    }

    async fn pin_verify(&self, _hash: &str) -> Result<PinnedContent, GatewayError> {
        self.pin_verify_calls.fetch_add(1, Ordering::SeqCst);
        self.pin_verify_result.clone()
    }

    async fn pin_remove(&self, hash: &str) {
        self.removed.lock().unwrap().push(hash.to_string());
    }

    async fn repo_usage(&self) -> u64 {
        self.repo_usage
    }

    fn disk_available(&self, _path: &Path) -> u64 {
        self.disk_available
    }
}

/// Write an executable shell script standing in for `ipfs`.
#[cfg(unix)]
pub fn fake_ipfs(dir: &Path, script: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let binary = dir.join("ipfs");
    std::fs::write(&binary, format!("#!/bin/sh\n{}", script)).unwrap();
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
    binary
}

/// Pid a fake `ipfs` wrote to `pid_file`, waiting for it to show up.
#[cfg(target_os = "linux")]
pub async fn read_pid(pid_file: &Path) -> u32 {
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(pid_file) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("no pid written to {}", pid_file.display());
}

/// Whether `pid` has exited (reaped or zombie) within about two seconds.
#[cfg(target_os = "linux")]
pub async fn process_exited(pid: u32) -> bool {
    for _ in 0..100 {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => return true,
            Ok(stat) => {
                // State is the first field after the parenthesised name
                let state = stat
                    .rsplit(')')
                    .next()
                    .and_then(|rest| rest.trim_start().chars().next());
                if state == Some('Z') {
                    return true;
                }
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}
