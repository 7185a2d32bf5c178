//! Work dispatcher
//!
//! Executes the actions of one work item in a fixed order:
//! download -> pin -> delete. Each action runs regardless of how the
//! previous ones went; the last download/pin failure is what ends up in
//! the outcome's `error`.

use tracing::{info, warn};

use crate::download::DownloadPipeline;
use crate::gateway::{GatewayError, StorageGateway, PIN_UNAVAILABLE_CODE};
use crate::payload::{OutcomePayload, StatusPayload, WorkItem};

pub struct Dispatcher {
    pipeline: DownloadPipeline,
}

impl Dispatcher {
    pub fn new(pipeline: DownloadPipeline) -> Self {
        Self { pipeline }
    }

    /// Run every action requested by `work` and build the outcome.
    ///
    /// `used`/`avail` are left at zero; the run loop fills them right before
    /// reporting.
    pub async fn dispatch(
        &self,
        gateway: &dyn StorageGateway,
        status: StatusPayload,
        work: &WorkItem,
    ) -> OutcomePayload {
        let mut outcome = OutcomePayload::from_status(status);

        if work.wants_download() {
            self.download(gateway, work, &mut outcome).await;
        }
        if work.wants_pin() {
            pin(gateway, &work.pin, &mut outcome).await;
        }
        if work.wants_delete() {
            delete(gateway, &work.delete, &mut outcome).await;
        }

        outcome
    }

    async fn download(
        &self,
        gateway: &dyn StorageGateway,
        work: &WorkItem,
        outcome: &mut OutcomePayload,
    ) {
        match self
            .pipeline
            .fetch_and_add(gateway, &work.download, &work.filename)
            .await
        {
            Ok(downloaded) => {
                outcome.downloaded = Some(format!(
                    "{}/{}",
                    downloaded.content.content_hash, downloaded.content.wrapping_hash
                ));
                outcome.length = Some(downloaded.bytes);
            }
            Err(e) => outcome.record_error(e.code()),
        }
    }
}

/// Pin an existing hash, then list it to learn the canonical hash and size.
async fn pin(gateway: &dyn StorageGateway, hash: &str, outcome: &mut OutcomePayload) {
    info!(hash, "Pinning hash");

    if let Err(e) = gateway.pin_add(hash).await {
        warn!(hash, error = %e, "Error direct pinning");
        outcome.record_error(pin_error_code(&e));
        return;
    }

    match gateway.pin_verify(hash).await {
        Ok(listed) => {
            outcome.pinned = Some(format!("{}/{}", listed.hash, hash));
            outcome.length = Some(listed.length);
        }
        Err(e) => {
            warn!(hash, error = %e, "Pin verification failed");
            outcome.record_error(pin_error_code(&e));
        }
    }
}

/// Unpin an expired hash. Always reported as deleted.
async fn delete(gateway: &dyn StorageGateway, hash: &str, outcome: &mut OutcomePayload) {
    gateway.pin_remove(hash).await;
    info!(hash, "Unpinned old/expired hash");
    outcome.deleted = Some(hash.to_string());
}

/// The command's own non-zero exit code, or 98 when it never completed.
fn pin_error_code(error: &GatewayError) -> i32 {
    error
        .exit_code()
        .filter(|code| *code != 0)
        .unwrap_or(PIN_UNAVAILABLE_CODE)
}
