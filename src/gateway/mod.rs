//! Storage gateway
//!
//! The `StorageGateway` trait is the only way the rest of the node talks to
//! the local IPFS daemon. `IpfsCli` drives the real `ipfs` executable; tests
//! use `MockGateway`.

pub mod disk;
pub mod ipfs;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use tokio::sync::mpsc;

pub use ipfs::IpfsCli;

/// Code reported when a pin command could not be run at all
pub const PIN_UNAVAILABLE_CODE: i32 = 98;

/// Daemon health snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Health {
    pub online: bool,
    pub version: Option<String>,
}

/// Result of streaming a file into the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedContent {
    /// Hash of the file itself
    pub content_hash: String,
    /// Hash of the directory wrapping the named file
    pub wrapping_hash: String,
}

/// Result of listing a pinned hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedContent {
    pub hash: String,
    pub length: u64,
}

/// Gateway errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to run ipfs {command}: {reason}")]
    Spawn { command: &'static str, reason: String },

    #[error("ipfs {command} exited with {code:?}: {stderr}")]
    Exit {
        command: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("ipfs {command} timed out")]
    Timeout { command: &'static str },

    #[error("Unexpected output from ipfs {command}: {detail}")]
    Output { command: &'static str, detail: String },

    #[error("Failed to stream into ipfs {command}: {reason}")]
    Pipe { command: &'static str, reason: String },
}

impl GatewayError {
    /// Exit code of the daemon command, when it ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            GatewayError::Exit { code, .. } => *code,
            _ => None,
        }
    }
}

/// Operations the work cycle needs from the local storage daemon.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Persistent peer identity of the daemon.
    async fn identity(&self) -> Result<String, GatewayError>;

    /// Online state and version. Implementations restart an offline daemon.
    async fn health(&self) -> Health;

    /// Connected peers, 0 when the query fails.
    async fn peer_count(&self) -> u64;

    /// Add the chunks received on `chunks` as a file named `filename`,
    /// wrapped in a directory. Chunks are written as they arrive; the add is
    /// finalized once the sender side is dropped.
    async fn add_stream(
        &self,
        filename: &str,
        chunks: mpsc::Receiver<Bytes>,
    ) -> Result<AddedContent, GatewayError>;

    async fn pin_add(&self, hash: &str) -> Result<(), GatewayError>;

    /// Confirm a pin by listing it, yielding the listed hash and size.
    async fn pin_verify(&self, hash: &str) -> Result<PinnedContent, GatewayError>;

    /// Best effort unpin; failures are only logged.
    async fn pin_remove(&self, hash: &str);

    /// Bytes used by the repo, 0 when the query fails.
    async fn repo_usage(&self) -> u64;

    /// Free bytes on the volume holding `path`.
    fn disk_available(&self, path: &Path) -> u64;
}
