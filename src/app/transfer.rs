//! Attended transfer (`att_xfer`) result.

use crate::channel::state::HangupCause;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendedTransferStatus {
    /// The transferred party is now bridged to the new destination.
    Transferred,
    /// All three parties were merged.
    Threeway,
    Failed,
    /// The transfer could not be started.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendedTransferResult {
    pub status: AttendedTransferStatus,
    pub hangup_cause: Option<HangupCause>,
}

impl AttendedTransferResult {
    pub fn transferred() -> Self {
        Self {
            status: AttendedTransferStatus::Transferred,
            hangup_cause: None,
        }
    }

    pub fn threeway() -> Self {
        Self {
            status: AttendedTransferStatus::Threeway,
            hangup_cause: None,
        }
    }

    pub fn failed(cause: Option<HangupCause>) -> Self {
        Self {
            status: AttendedTransferStatus::Failed,
            hangup_cause: cause,
        }
    }

    pub fn aborted() -> Self {
        Self {
            status: AttendedTransferStatus::Aborted,
            hangup_cause: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            AttendedTransferStatus::Transferred | AttendedTransferStatus::Threeway
        )
    }
}
