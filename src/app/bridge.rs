//! `bridge` application options and result.

use crate::event::ChannelEvent;
use std::collections::BTreeMap;
use std::fmt;

/// Options for bridging a channel to an endpoint.
///
/// Origination settings go into the `{k='v',...}` prefix of the dial string and apply
/// to the B-leg. [`channel_variables`](Self::channel_variables) are set on the A-leg
/// before the bridge starts.
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    /// `origination_uuid` of the B-leg. Generated when `None`.
    pub uuid: Option<String>,
    /// `leg_timeout`, in seconds.
    pub timeout_seconds: Option<u32>,
    pub caller_id_name: Option<String>,
    pub caller_id_number: Option<String>,
    /// `ignore_early_media=true`
    pub ignore_early_media: bool,
    /// A-leg `ringback`, e.g. `%(2000,4000,440,480)`.
    pub ring_back: Option<String>,
    /// A-leg `hangup_after_bridge`.
    pub hangup_after_bridge: Option<bool>,
    /// A-leg `continue_on_fail`.
    pub continue_on_fail: Option<bool>,
    /// Extra A-leg variables.
    pub a_leg_variables: BTreeMap<String, String>,
    /// Extra B-leg origination variables.
    pub b_leg_variables: BTreeMap<String, String>,
}

impl BridgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_caller_id(mut self, name: impl Into<String>, number: impl Into<String>) -> Self {
        self.caller_id_name = Some(name.into());
        self.caller_id_number = Some(number.into());
        self
    }

    /// Variables to set on the A-leg (`uuid_setvar_multi`) before bridging.
    pub fn channel_variables(&self) -> Vec<(String, String)> {
        let mut variables = Vec::new();
        if let Some(ring_back) = &self.ring_back {
            variables.push(("ringback".to_string(), ring_back.clone()));
        }
        if let Some(hangup) = self.hangup_after_bridge {
            variables.push(("hangup_after_bridge".to_string(), hangup.to_string()));
        }
        if let Some(continue_on_fail) = self.continue_on_fail {
            variables.push(("continue_on_fail".to_string(), continue_on_fail.to_string()));
        }
        variables.extend(
            self.a_leg_variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        variables
    }

    fn origination_variables(&self) -> Vec<(&str, String)> {
        let mut variables = Vec::new();
        if let Some(uuid) = &self.uuid {
            variables.push(("origination_uuid", uuid.clone()));
        }
        if let Some(timeout) = self.timeout_seconds {
            variables.push(("leg_timeout", timeout.to_string()));
        }
        if let Some(name) = &self.caller_id_name {
            variables.push(("origination_caller_id_name", name.clone()));
        }
        if let Some(number) = &self.caller_id_number {
            variables.push(("origination_caller_id_number", number.clone()));
        }
        if self.ignore_early_media {
            variables.push(("ignore_early_media", "true".to_string()));
        }
        for (k, v) in &self.b_leg_variables {
            variables.push((k.as_str(), v.clone()));
        }
        variables
    }
}

/// Dial-string prefix, `{origination_uuid='...',leg_timeout='30'}`. Empty without options.
impl fmt::Display for BridgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variables = self.origination_variables();
        if variables.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (name, value)) in variables
            .iter()
            .enumerate()
        {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}='{}'", name, value)?;
        }
        f.write_str("}")
    }
}

/// Outcome of a bridge attempt.
#[derive(Debug, Clone)]
pub struct BridgeResult {
    /// A B-leg answered and was bridged.
    pub success: bool,
    /// `DIALSTATUS`, or `Aborted` if no outcome event arrived.
    pub response_text: Option<String>,
    /// Unique id of the bridged B-leg.
    pub bridge_uuid: Option<String>,
    pub event: Option<ChannelEvent>,
}

impl BridgeResult {
    /// A bridge succeeded when the deciding event names an other leg.
    pub fn from_event(event: Option<ChannelEvent>) -> Self {
        match event {
            Some(event) => {
                let bridge_uuid = event
                    .other_leg_uuid()
                    .map(str::to_string);
                Self {
                    success: bridge_uuid.is_some(),
                    response_text: event
                        .variable("DIALSTATUS")
                        .map(str::to_string),
                    bridge_uuid,
                    event: Some(event),
                }
            }
            None => Self {
                success: false,
                response_text: Some("Aborted".to_string()),
                bridge_uuid: None,
                event: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EslEvent;
    use crate::headers::HeaderMap;
    use std::sync::Arc;

    fn channel_event(pairs: &[(&str, &str)]) -> ChannelEvent {
        let headers: HeaderMap = pairs
            .iter()
            .copied()
            .collect();
        ChannelEvent::new(Arc::new(EslEvent::from_parts(headers, None).unwrap())).unwrap()
    }

    #[test]
    fn dial_string_prefix() {
        let options = BridgeOptions::new()
            .with_uuid("b-leg")
            .with_timeout(30);
        assert_eq!(options.to_string(), "{origination_uuid='b-leg',leg_timeout='30'}");
        assert_eq!(BridgeOptions::new().to_string(), "");
    }

    #[test]
    fn a_leg_variables_are_separate() {
        let mut options = BridgeOptions::new();
        options.hangup_after_bridge = Some(false);
        options
            .a_leg_variables
            .insert("call_tag".into(), "7".into());
        assert_eq!(
            options.channel_variables(),
            vec![
                ("hangup_after_bridge".to_string(), "false".to_string()),
                ("call_tag".to_string(), "7".to_string()),
            ]
        );
        assert!(!options
            .to_string()
            .contains("hangup_after_bridge"));
    }

    #[test]
    fn bridge_event_is_success() {
        let result = BridgeResult::from_event(Some(channel_event(&[
            ("Event-Name", "CHANNEL_BRIDGE"),
            ("Unique-ID", "a-leg"),
            ("Other-Leg-Unique-ID", "b-leg"),
        ])));
        assert!(result.success);
        assert_eq!(result.bridge_uuid.as_deref(), Some("b-leg"));
    }

    #[test]
    fn hangup_without_other_leg_fails() {
        let result = BridgeResult::from_event(Some(channel_event(&[
            ("Event-Name", "CHANNEL_HANGUP"),
            ("Unique-ID", "a-leg"),
            ("variable_DIALSTATUS", "USER_BUSY"),
        ])));
        assert!(!result.success);
        assert_eq!(result.response_text.as_deref(), Some("USER_BUSY"));
    }

    #[test]
    fn no_event_is_aborted() {
        let result = BridgeResult::from_event(None);
        assert!(!result.success);
        assert_eq!(result.response_text.as_deref(), Some("Aborted"));
    }
}
