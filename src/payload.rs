//! Coordinator wire types
//!
//! Requests to the coordinator are form encoded, responses are JSON. Field
//! names follow the coordinator's vocabulary (`ipfs_id`, `avail`, ...).

use serde::{Deserialize, Serialize, Serializer};

/// Protocol version announced to the coordinator
pub const PROTOCOL_VERSION: &str = "0.7p";

/// Prefix of `message` when the coordinator has nothing to hand out
pub const NO_WORK_PREFIX: &str = "No Work";

/// Node status sent with every request, rebuilt each cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub email: String,
    pub version: String,
    #[serde(serialize_with = "serialize_flag")]
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_ver: Option<String>,
    pub peers: u64,
}

impl StatusPayload {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            version: PROTOCOL_VERSION.to_string(),
            online: false,
            ipfs_id: None,
            ipfs_ver: None,
            peers: 0,
        }
    }
}

/// The coordinator has always been sent `True`/`False` for booleans.
fn serialize_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "True" } else { "False" })
}

/// One unit of work; empty strings mean "not requested"
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub download: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub delete: String,
}

impl WorkItem {
    pub fn is_no_work(&self) -> bool {
        self.message.starts_with(NO_WORK_PREFIX)
    }

    pub fn wants_download(&self) -> bool {
        !self.download.is_empty() && !self.filename.is_empty()
    }

    pub fn wants_pin(&self) -> bool {
        !self.pin.is_empty()
    }

    pub fn wants_delete(&self) -> bool {
        !self.delete.is_empty()
    }
}

/// Status plus the result of executing a [`WorkItem`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomePayload {
    #[serde(flatten)]
    pub status: StatusPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<String>,
    pub used: u64,
    pub avail: u64,
}

impl OutcomePayload {
    pub fn from_status(status: StatusPayload) -> Self {
        Self {
            status,
            error: None,
            length: None,
            downloaded: None,
            pinned: None,
            deleted: None,
            used: 0,
            avail: 0,
        }
    }

    /// Record a failure; later failures replace earlier ones
    pub fn record_error(&mut self, code: i32) {
        self.error = Some(code);
    }
}

/// Verdict returned by the coordinator for a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Success,
    Fail,
    Error,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportResponse {
    pub status: ReportStatus,
}
