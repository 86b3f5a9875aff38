//! `playback` and `play_and_get_digits`.

use super::Leg;
use crate::event::ChannelEvent;
use crate::headers::EventHeader;

const FILE_PLAYED: &str = "FILE PLAYED";

/// Options for playing a file on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayOptions {
    pub leg: Leg,
    pub loops: i32,
    /// Sets `playback_terminators` first when it differs from the channel's value.
    pub terminators: Option<String>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            leg: Leg::A,
            loops: 1,
            terminators: None,
        }
    }
}

/// Outcome of `playback`.
#[derive(Debug, Clone, Default)]
pub struct PlayResult {
    /// `Application-Response` was `FILE PLAYED`.
    pub success: bool,
    pub response_text: Option<String>,
    pub event: Option<ChannelEvent>,
}

impl PlayResult {
    pub fn from_event(event: Option<ChannelEvent>) -> Self {
        let Some(event) = event else {
            return Self::default();
        };
        let response_text = event
            .header(EventHeader::ApplicationResponse)
            .map(str::to_string);
        Self {
            success: response_text.as_deref() == Some(FILE_PLAYED),
            response_text,
            event: Some(event),
        }
    }
}

/// Arguments of `play_and_get_digits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayGetDigitsOptions {
    pub min_digits: u32,
    pub max_digits: u32,
    pub max_tries: u32,
    pub timeout_ms: u32,
    pub terminators: String,
    pub prompt_file: String,
    pub bad_input_file: String,
    /// Variable the digits are stored in.
    pub channel_variable: String,
    /// Regular expression the input must match.
    pub valid_digits: String,
    pub digit_timeout_ms: u32,
}

impl Default for PlayGetDigitsOptions {
    fn default() -> Self {
        Self {
            min_digits: 1,
            max_digits: 128,
            max_tries: 1,
            timeout_ms: 5000,
            terminators: "#".to_string(),
            prompt_file: "silence_stream://10".to_string(),
            bad_input_file: "silence_stream://150".to_string(),
            channel_variable: "play_get_digits_result".to_string(),
            valid_digits: "^\\d+$".to_string(),
            digit_timeout_ms: 2000,
        }
    }
}

impl PlayGetDigitsOptions {
    /// Application argument string, in the order `play_and_get_digits` expects.
    pub fn to_args(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {} {} {}",
            self.min_digits,
            self.max_digits,
            self.max_tries,
            self.timeout_ms,
            self.terminators,
            self.prompt_file,
            self.bad_input_file,
            self.channel_variable,
            self.valid_digits,
            self.digit_timeout_ms
        )
    }
}

/// Outcome of `play_and_get_digits`.
#[derive(Debug, Clone, Default)]
pub struct PlayGetDigitsResult {
    /// Any digits were collected.
    pub success: bool,
    pub digits: Option<String>,
    /// `read_terminator_used`
    pub terminator_used: Option<String>,
    pub event: Option<ChannelEvent>,
}

impl PlayGetDigitsResult {
    pub fn from_event(event: Option<ChannelEvent>, channel_variable: &str) -> Self {
        let Some(event) = event else {
            return Self::default();
        };
        let digits = event
            .variable(channel_variable)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Self {
            success: digits.is_some(),
            digits,
            terminator_used: event
                .variable("read_terminator_used")
                .map(str::to_string),
            event: Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EslEvent;
    use crate::headers::HeaderMap;
    use std::sync::Arc;

    fn completion(pairs: &[(&str, &str)]) -> ChannelEvent {
        let mut headers: HeaderMap = pairs
            .iter()
            .copied()
            .collect();
        headers.insert("Event-Name", "CHANNEL_EXECUTE_COMPLETE");
        headers.insert("Unique-ID", "a-leg");
        ChannelEvent::new(Arc::new(EslEvent::from_parts(headers, None).unwrap())).unwrap()
    }

    #[test]
    fn play_succeeds_only_on_file_played() {
        let played = PlayResult::from_event(Some(completion(&[(
            "Application-Response",
            "FILE PLAYED",
        )])));
        assert!(played.success);
        let broken = PlayResult::from_event(Some(completion(&[(
            "Application-Response",
            "PLAYBACK ERROR",
        )])));
        assert!(!broken.success);
        assert!(!PlayResult::from_event(None).success);
    }

    #[test]
    fn play_get_digits_args_order() {
        let options = PlayGetDigitsOptions {
            max_digits: 4,
            max_tries: 3,
            prompt_file: "ivr/pin.wav".into(),
            ..Default::default()
        };
        assert_eq!(
            options.to_args(),
            "1 4 3 5000 # ivr/pin.wav silence_stream://150 play_get_digits_result ^\\d+$ 2000"
        );
    }

    #[test]
    fn digits_read_from_configured_variable() {
        let result = PlayGetDigitsResult::from_event(
            Some(completion(&[
                ("variable_pin", "1234"),
                ("variable_read_terminator_used", "#"),
            ])),
            "pin",
        );
        assert!(result.success);
        assert_eq!(result.digits.as_deref(), Some("1234"));
        assert_eq!(result.terminator_used.as_deref(), Some("#"));

        let empty = PlayGetDigitsResult::from_event(Some(completion(&[("variable_pin", "")])), "pin");
        assert!(!empty.success);
    }
}
