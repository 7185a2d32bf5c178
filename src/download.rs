//! Episode download pipeline
//!
//! Streams an HTTP response body straight into `ipfs add`:
//!
//! ```text
//! GET url ──> re-chunk (chunk_size) ──> bounded mpsc ──> StorageGateway::add_stream
//! ```
//!
//! The channel bounds memory to roughly `chunk_size * channel_depth`; a slow
//! daemon blocks the reader. Either side failing drops the other, which kills
//! the `ipfs add` child spawned for this transfer.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::TransferConfig;
use crate::gateway::{AddedContent, GatewayError, StorageGateway};

/// Non-2xx status, or no response at all
pub const BAD_RESPONSE_CODE: i32 = 97;
/// Response body was empty
pub const EMPTY_DOWNLOAD_CODE: i32 = 96;
/// Transfer broke off mid-stream or timed out
pub const TRANSFER_FAILED_CODE: i32 = 99;

/// A file committed to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub content: AddedContent,
    pub bytes: u64,
}

/// Download errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    #[error("Download error: HTTP {0}")]
    BadResponse(u16),

    #[error("Download request failed: {0}")]
    Request(String),

    #[error("Empty download")]
    Empty,

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage error: {0}")]
    Storage(GatewayError),
}

impl DownloadError {
    /// Code reported to the coordinator
    pub fn code(&self) -> i32 {
        match self {
            DownloadError::BadResponse(_) | DownloadError::Request(_) => BAD_RESPONSE_CODE,
            DownloadError::Empty => EMPTY_DOWNLOAD_CODE,
            DownloadError::Transfer(_) | DownloadError::Timeout(_) => TRANSFER_FAILED_CODE,
            DownloadError::Storage(e) => e
                .exit_code()
                .filter(|code| *code != 0)
                .unwrap_or(TRANSFER_FAILED_CODE),
        }
    }

    /// Whether the daemon may have been handed part of the stream
    fn interrupted_transfer(&self) -> bool {
        matches!(
            self,
            DownloadError::Transfer(_) | DownloadError::Timeout(_) | DownloadError::Storage(_)
        )
    }
}

/// Downloads files into the local store
pub struct DownloadPipeline {
    client: reqwest::Client,
    timeout: Duration,
    chunk_size: usize,
    channel_depth: usize,
}

impl DownloadPipeline {
    pub fn new(config: &TransferConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DownloadError::Request(e.to_string()))?;

        Ok(Self {
            client,
            timeout: config.timeout(),
            chunk_size: config.chunk_size.max(1),
            channel_depth: config.channel_depth.max(1),
        })
    }

    /// Download `url` and add it to the store as `filename`.
    ///
    /// The transfer timeout bounds each wait (response headers, every body
    /// read, every hand-off to the daemon), not the transfer as a whole.
    pub async fn fetch_and_add(
        &self,
        gateway: &dyn StorageGateway,
        url: &str,
        filename: &str,
    ) -> Result<Downloaded, DownloadError> {
        info!(url, "Downloading");

        let result = self.transfer(gateway, url, filename).await;

        match &result {
            Ok(downloaded) => info!(
                hash = %downloaded.content.content_hash,
                length = downloaded.bytes,
                "Added to IPFS"
            ),
            Err(e) if e.interrupted_transfer() => {
                // The transfer's ipfs add child is killed when its future is dropped
                warn!(url, error = %e, "Error downloading/pinning episode, transfer abandoned");
            }
            Err(e) => warn!(url, error = %e, "Download failed"),
        }

        result
    }

    async fn transfer(
        &self,
        gateway: &dyn StorageGateway,
        url: &str,
        filename: &str,
    ) -> Result<Downloaded, DownloadError> {
        let request = self.client.get(url).send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(response) => response.map_err(|e| DownloadError::Request(e.to_string()))?,
            Err(_) => return Err(DownloadError::Request("no response".to_string())),
        };

        if !response.status().is_success() {
            return Err(DownloadError::BadResponse(response.status().as_u16()));
        }

        self.stream_into(gateway, filename, response.bytes_stream()).await
    }

    /// Pipe `body` into the store, joining both ends so that either failing
    /// drops the other.
    async fn stream_into<S, E>(
        &self,
        gateway: &dyn StorageGateway,
        filename: &str,
        body: S,
    ) -> Result<Downloaded, DownloadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let (tx, rx) = mpsc::channel(self.channel_depth);
        let produce = forward_body(body, tx, self.chunk_size, self.timeout);
        let consume = async {
            gateway
                .add_stream(filename, rx)
                .await
                .map_err(DownloadError::Storage)
        };

        let (bytes, content) = tokio::try_join!(produce, consume)?;

        if bytes == 0 {
            return Err(DownloadError::Empty);
        }

        Ok(Downloaded { content, bytes })
    }
}

/// Forward `body` into `tx` in pieces of exactly `chunk_size` (the last one
/// may be shorter). Returns the number of bytes read from the body.
///
/// A body read or a send that stalls longer than `idle` fails the transfer.
/// If the receiver goes away the add has already failed or finished; its
/// result decides the outcome, so forwarding just stops.
async fn forward_body<S, E>(
    body: S,
    tx: mpsc::Sender<Bytes>,
    chunk_size: usize,
    idle: Duration,
) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    futures::pin_mut!(body);

    let mut pending = BytesMut::with_capacity(chunk_size);
    let mut total: u64 = 0;

    loop {
        let piece = match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(piece)) => piece.map_err(|e| DownloadError::Transfer(e.to_string()))?,
            Ok(None) => break,
            Err(_) => return Err(DownloadError::Timeout(idle)),
        };
        total += piece.len() as u64;
        pending.extend_from_slice(&piece);

        while pending.len() >= chunk_size {
            let chunk = pending.split_to(chunk_size).freeze();
            if !send_chunk(&tx, chunk, idle).await? {
                return Ok(total);
            }
        }
    }

    if !pending.is_empty() {
        send_chunk(&tx, pending.freeze(), idle).await?;
    }

    Ok(total)
}

/// Hand one chunk to the daemon side. `Ok(false)` when the receiver is gone.
async fn send_chunk(
    tx: &mpsc::Sender<Bytes>,
    chunk: Bytes,
    idle: Duration,
) -> Result<bool, DownloadError> {
    match tokio::time::timeout(idle, tx.send(chunk)).await {
        Ok(sent) => Ok(sent.is_ok()),
        Err(_) => Err(DownloadError::Timeout(idle)),
    }
}
