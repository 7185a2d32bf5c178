//! Run loop
//!
//! ```text
//! Start (jittered sleep)
//!   -> RequestCycle: status -> request work --(no work)--> Stop
//!   -> Execute: dispatch, attach usage
//!   -> Report
//!   -> Decide: turbo && Success ? RequestCycle : Stop
//! ```

use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::StartupConfig;
use crate::coordinator::Coordinator;
use crate::dispatch::Dispatcher;
use crate::gateway::StorageGateway;
use crate::payload::{OutcomePayload, ReportStatus, StatusPayload};

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Coordinator had nothing, or could not be reached
    NoWork,
    /// One cycle completed outside turbo mode
    SingleRun,
    /// Turbo mode ended on a non-success report
    Reported(ReportStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles that got as far as reporting
    pub cycles: u32,
    pub stop: StopReason,
}

/// Daemon identity, learned once per process
#[derive(Debug, Default)]
pub struct NodeIdentity {
    id: Option<String>,
}

impl NodeIdentity {
    /// Cached identity, querying the daemon only while it is unknown.
    pub async fn resolve(&mut self, gateway: &dyn StorageGateway) -> Option<String> {
        if self.id.is_none() {
            match gateway.identity().await {
                Ok(id) => {
                    info!(node_id = %id, "IPFS identity");
                    self.id = Some(id);
                }
                Err(e) => warn!(error = %e, "Could not read IPFS identity"),
            }
        }
        self.id.clone()
    }
}

/// Uniform random delay in `[min_secs, max_secs]` seconds.
pub fn startup_delay(config: &StartupConfig) -> Duration {
    let secs = rand::thread_rng().gen_range(config.jitter_min_secs..=config.jitter_max_secs);
    Duration::from_secs(secs)
}

pub struct Runner {
    email: String,
    turbo: bool,
    data_path: PathBuf,
    gateway: Arc<dyn StorageGateway>,
    coordinator: Arc<dyn Coordinator>,
    dispatcher: Dispatcher,
    identity: NodeIdentity,
}

impl Runner {
    pub fn new(
        email: impl Into<String>,
        turbo: bool,
        data_path: PathBuf,
        gateway: Arc<dyn StorageGateway>,
        coordinator: Arc<dyn Coordinator>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            email: email.into(),
            turbo,
            data_path,
            gateway,
            coordinator,
            dispatcher,
            identity: NodeIdentity::default(),
        }
    }

    /// Sleep a jittered interval so nodes do not all ask at once, then run.
    pub async fn start(&mut self, startup: &StartupConfig) -> RunSummary {
        let delay = startup_delay(startup);
        info!(seconds = delay.as_secs(), "Sleeping before first request...");
        tokio::time::sleep(delay).await;

        if self.turbo {
            info!("Turbo mode enabled, running in loop...");
        }

        self.run().await
    }

    /// Run cycles until there is no work, a single run is done, or a turbo
    /// report comes back as anything but `Success`.
    pub async fn run(&mut self) -> RunSummary {
        let mut cycles = 0;

        loop {
            let status = self.status().await;

            let Some(work) = self.coordinator.request_work(&status).await else {
                return RunSummary {
                    cycles,
                    stop: StopReason::NoWork,
                };
            };

            let mut outcome = self
                .dispatcher
                .dispatch(self.gateway.as_ref(), status, &work)
                .await;
            self.attach_usage(&mut outcome).await;

            let report = self.coordinator.report_result(&outcome).await;
            cycles += 1;

            if !self.turbo {
                return RunSummary {
                    cycles,
                    stop: StopReason::SingleRun,
                };
            }
            if report != ReportStatus::Success {
                info!(?report, "Stopping turbo mode");
                return RunSummary {
                    cycles,
                    stop: StopReason::Reported(report),
                };
            }

            info!("Continuing in turbo mode...");
        }
    }

    async fn status(&mut self) -> StatusPayload {
        let mut status = StatusPayload::new(self.email.clone());
        status.ipfs_id = self.identity.resolve(self.gateway.as_ref()).await;

        let health = self.gateway.health().await;
        status.online = health.online;
        status.ipfs_ver = health.version;
        status.peers = self.gateway.peer_count().await;

        status
    }

    async fn attach_usage(&self, outcome: &mut OutcomePayload) {
        outcome.used = self.gateway.repo_usage().await;
        outcome.avail = self.gateway.disk_available(&self.data_path);
    }
}
