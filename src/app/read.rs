//! The `read` application.

use crate::event::ChannelEvent;

/// Arguments of `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub min_digits: u32,
    pub max_digits: u32,
    pub prompt: String,
    pub timeout_ms: u32,
    pub terminators: String,
    pub channel_variable: String,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            min_digits: 1,
            max_digits: 1,
            prompt: "silence_stream://10".to_string(),
            timeout_ms: 5000,
            terminators: "#".to_string(),
            channel_variable: "read_digits_result".to_string(),
        }
    }
}

impl ReadOptions {
    pub fn to_args(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.min_digits,
            self.max_digits,
            self.prompt,
            self.channel_variable,
            self.timeout_ms,
            self.terminators
        )
    }
}

wire_enum! {
    /// `read_result` channel variable.
    pub enum ReadResultStatus: ParseReadResultStatusError("read result") {
        Success => "success",
        Timeout => "timeout",
        Failure => "failure",
    }
}

/// Outcome of `read`.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub status: ReadResultStatus,
    pub digits: Option<String>,
    pub terminator_used: Option<String>,
    pub event: Option<ChannelEvent>,
}

impl Default for ReadResult {
    fn default() -> Self {
        Self {
            status: ReadResultStatus::Failure,
            digits: None,
            terminator_used: None,
            event: None,
        }
    }
}

impl ReadResult {
    pub fn from_event(event: Option<ChannelEvent>, channel_variable: &str) -> Self {
        let Some(event) = event else {
            return Self::default();
        };
        Self {
            status: event
                .variable("read_result")
                .and_then(|s| {
                    s.parse()
                        .ok()
                })
                .unwrap_or(ReadResultStatus::Failure),
            digits: event
                .variable(channel_variable)
                .map(str::to_string),
            terminator_used: event
                .variable("read_terminator_used")
                .map(str::to_string),
            event: Some(event),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReadResultStatus::Success
    }
}
