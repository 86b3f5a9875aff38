//! Channel state values carried in event headers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel state from `switch_channel_state_t`, carried in `Channel-State` as `CS_ROUTING` etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ChannelState {
    New,
    Init,
    Routing,
    SoftExecute,
    Execute,
    ExchangeMedia,
    Park,
    ConsumeMedia,
    Hibernate,
    Reset,
    Hangup,
    Reporting,
    Destroy,
    None,
}

impl ChannelState {
    const ALL: [ChannelState; 14] = [
        Self::New,
        Self::Init,
        Self::Routing,
        Self::SoftExecute,
        Self::Execute,
        Self::ExchangeMedia,
        Self::Park,
        Self::ConsumeMedia,
        Self::Hibernate,
        Self::Reset,
        Self::Hangup,
        Self::Reporting,
        Self::Destroy,
        Self::None,
    ];

    /// State name without the `CS_` prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Init => "INIT",
            Self::Routing => "ROUTING",
            Self::SoftExecute => "SOFT_EXECUTE",
            Self::Execute => "EXECUTE",
            Self::ExchangeMedia => "EXCHANGE_MEDIA",
            Self::Park => "PARK",
            Self::ConsumeMedia => "CONSUME_MEDIA",
            Self::Hibernate => "HIBERNATE",
            Self::Reset => "RESET",
            Self::Hangup => "HANGUP",
            Self::Reporting => "REPORTING",
            Self::Destroy => "DESTROY",
            Self::None => "NONE",
        }
    }

    /// Parse a `Channel-State` header value, `None` if unrecognised.
    pub fn from_header(value: &str) -> Option<Self> {
        value
            .parse()
            .ok()
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CS_{}", self.name())
    }
}

/// Error returned when parsing an invalid channel state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelStateError(pub String);

impl fmt::Display for ParseChannelStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel state: {}", self.0)
    }
}

impl std::error::Error for ParseChannelStateError {}

impl FromStr for ChannelState {
    type Err = ParseChannelStateError;

    /// Accepts `CS_EXECUTE` or `EXECUTE`, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s
            .trim()
            .to_ascii_uppercase();
        let name = upper
            .strip_prefix("CS_")
            .unwrap_or(&upper);
        Self::ALL
            .into_iter()
            .find(|state| state.name() == name)
            .ok_or_else(|| ParseChannelStateError(s.to_string()))
    }
}

/// Answer state from the `Answer-State` header. Wire format is lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum AnswerState {
    Hangup,
    Answered,
    Early,
    Ringing,
}

impl fmt::Display for AnswerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hangup => "hangup",
            Self::Answered => "answered",
            Self::Early => "early",
            Self::Ringing => "ringing",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an invalid answer state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAnswerStateError(pub String);

impl fmt::Display for ParseAnswerStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown answer state: {}", self.0)
    }
}

impl std::error::Error for ParseAnswerStateError {}

impl FromStr for AnswerState {
    type Err = ParseAnswerStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "hangup" => Ok(Self::Hangup),
            "answered" => Ok(Self::Answered),
            "early" => Ok(Self::Early),
            "ringing" => Ok(Self::Ringing),
            _ => Err(ParseAnswerStateError(s.to_string())),
        }
    }
}

wire_enum! {
    /// Hangup cause from `switch_call_cause_t`, as sent in `Hangup-Cause`,
    /// `originate_disposition` and friends, and as accepted by `uuid_kill`.
    pub enum HangupCause: ParseHangupCauseError("hangup cause") {
        None => "NONE",
        UnallocatedNumber => "UNALLOCATED_NUMBER",
        NoRouteTransitNet => "NO_ROUTE_TRANSIT_NET",
        NoRouteDestination => "NO_ROUTE_DESTINATION",
        ChannelUnacceptable => "CHANNEL_UNACCEPTABLE",
        CallAwardedDelivered => "CALL_AWARDED_DELIVERED",
        NormalClearing => "NORMAL_CLEARING",
        UserBusy => "USER_BUSY",
        NoUserResponse => "NO_USER_RESPONSE",
        NoAnswer => "NO_ANSWER",
        SubscriberAbsent => "SUBSCRIBER_ABSENT",
        CallRejected => "CALL_REJECTED",
        NumberChanged => "NUMBER_CHANGED",
        RedirectionToNewDestination => "REDIRECTION_TO_NEW_DESTINATION",
        ExchangeRoutingError => "EXCHANGE_ROUTING_ERROR",
        DestinationOutOfOrder => "DESTINATION_OUT_OF_ORDER",
        InvalidNumberFormat => "INVALID_NUMBER_FORMAT",
        FacilityRejected => "FACILITY_REJECTED",
        ResponseToStatusEnquiry => "RESPONSE_TO_STATUS_ENQUIRY",
        NormalUnspecified => "NORMAL_UNSPECIFIED",
        NormalCircuitCongestion => "NORMAL_CIRCUIT_CONGESTION",
        NetworkOutOfOrder => "NETWORK_OUT_OF_ORDER",
        NormalTemporaryFailure => "NORMAL_TEMPORARY_FAILURE",
        SwitchCongestion => "SWITCH_CONGESTION",
        AccessInfoDiscarded => "ACCESS_INFO_DISCARDED",
        RequestedChanUnavail => "REQUESTED_CHAN_UNAVAIL",
        PreEmpted => "PRE_EMPTED",
        FacilityNotSubscribed => "FACILITY_NOT_SUBSCRIBED",
        OutgoingCallBarred => "OUTGOING_CALL_BARRED",
        IncomingCallBarred => "INCOMING_CALL_BARRED",
        BearercapabilityNotauth => "BEARERCAPABILITY_NOTAUTH",
        BearercapabilityNotavail => "BEARERCAPABILITY_NOTAVAIL",
        ServiceUnavailable => "SERVICE_UNAVAILABLE",
        BearercapabilityNotimpl => "BEARERCAPABILITY_NOTIMPL",
        ChanNotImplemented => "CHAN_NOT_IMPLEMENTED",
        FacilityNotImplemented => "FACILITY_NOT_IMPLEMENTED",
        ServiceNotImplemented => "SERVICE_NOT_IMPLEMENTED",
        InvalidCallReference => "INVALID_CALL_REFERENCE",
        IncompatibleDestination => "INCOMPATIBLE_DESTINATION",
        InvalidMsgUnspecified => "INVALID_MSG_UNSPECIFIED",
        MandatoryIeMissing => "MANDATORY_IE_MISSING",
        MessageTypeNonexist => "MESSAGE_TYPE_NONEXIST",
        WrongMessage => "WRONG_MESSAGE",
        IeNonexist => "IE_NONEXIST",
        InvalidIeContents => "INVALID_IE_CONTENTS",
        WrongCallState => "WRONG_CALL_STATE",
        RecoveryOnTimerExpire => "RECOVERY_ON_TIMER_EXPIRE",
        MandatoryIeLengthError => "MANDATORY_IE_LENGTH_ERROR",
        ProtocolError => "PROTOCOL_ERROR",
        Interworking => "INTERWORKING",
        Success => "SUCCESS",
        OriginatorCancel => "ORIGINATOR_CANCEL",
        Crash => "CRASH",
        SystemShutdown => "SYSTEM_SHUTDOWN",
        LoseRace => "LOSE_RACE",
        ManagerRequest => "MANAGER_REQUEST",
        BlindTransfer => "BLIND_TRANSFER",
        AttendedTransfer => "ATTENDED_TRANSFER",
        AllottedTimeout => "ALLOTTED_TIMEOUT",
        UserChallenge => "USER_CHALLENGE",
        MediaTimeout => "MEDIA_TIMEOUT",
        PickedOff => "PICKED_OFF",
        UserNotRegistered => "USER_NOT_REGISTERED",
        ProgressTimeout => "PROGRESS_TIMEOUT",
        GatewayDown => "GATEWAY_DOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_state_strips_cs_prefix() {
        assert_eq!(ChannelState::from_header("CS_EXECUTE"), Some(ChannelState::Execute));
        assert_eq!(ChannelState::from_header("cs_soft_execute"), Some(ChannelState::SoftExecute));
        assert_eq!(ChannelState::from_header("ROUTING"), Some(ChannelState::Routing));
        assert_eq!(ChannelState::from_header("CS_BOGUS"), None);
    }

    #[test]
    fn channel_state_displays_with_prefix() {
        assert_eq!(ChannelState::ExchangeMedia.to_string(), "CS_EXCHANGE_MEDIA");
        assert_eq!(ChannelState::None.to_string(), "CS_NONE");
    }

    #[test]
    fn answer_state_is_lowercase_on_the_wire() {
        assert_eq!("EARLY".parse::<AnswerState>(), Ok(AnswerState::Early));
        assert_eq!(AnswerState::Answered.to_string(), "answered");
        assert_eq!(
            serde_json::to_string(&AnswerState::Ringing).unwrap(),
            "\"ringing\""
        );
    }

    #[test]
    fn hangup_cause_parses_dispositions() {
        assert_eq!("NORMAL_CLEARING".parse::<HangupCause>(), Ok(HangupCause::NormalClearing));
        assert_eq!("success".parse::<HangupCause>(), Ok(HangupCause::Success));
        assert!("WHATEVER"
            .parse::<HangupCause>()
            .is_err());
        assert_eq!(HangupCause::UserBusy.to_string(), "USER_BUSY");
    }
}
