//! Option and result types for dialplan applications run over the event socket.
//!
//! Every result is built from the completion event of the application, or from `None`
//! when the application never ran to completion (channel gone, socket closed, or the
//! channel was not in a state to run it). `None` always yields the unsuccessful default.

pub mod bridge;
pub mod play;
pub mod read;
pub mod say;
pub mod transfer;

use crate::event::ChannelEvent;
use crate::headers::EventHeader;
use serde::{Deserialize, Serialize};

pub use bridge::{BridgeOptions, BridgeResult};
pub use play::{PlayGetDigitsOptions, PlayGetDigitsResult, PlayOptions, PlayResult};
pub use read::{ReadOptions, ReadResult, ReadResultStatus};
pub use say::{SayGender, SayMethod, SayOptions, SayType};
pub use transfer::{AttendedTransferResult, AttendedTransferStatus};

/// Outcome of a plain application execution.
#[derive(Debug, Clone, Default)]
pub struct ApplicationResult {
    /// The application ran to completion.
    pub success: bool,
    /// `Application-Response` of the completion event.
    pub response_text: Option<String>,
    /// The completion event itself.
    pub event: Option<ChannelEvent>,
}

impl ApplicationResult {
    pub fn from_event(event: Option<ChannelEvent>) -> Self {
        match event {
            Some(event) => Self {
                success: true,
                response_text: event
                    .header(EventHeader::ApplicationResponse)
                    .map(str::to_string),
                event: Some(event),
            },
            None => Self::default(),
        }
    }
}

/// Which leg of a bridged call an application targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    #[default]
    A,
    B,
    Both,
}

/// Recording state of a channel, as tracked by the channel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    #[default]
    NotRecording,
    Recording,
    Paused,
}
