//! Event views over parsed messages

use crate::channel::state::{AnswerState, ChannelState, HangupCause};
use crate::error::{EslError, EslResult};
use crate::headers::{EventHeader, HeaderMap};
use crate::protocol::{parse_event_body, parse_header_block, ContentType, EslMessage};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

wire_enum! {
    /// FreeSWITCH event names, spelled as they appear in `Event-Name` and in `event plain`.
    pub enum EslEventType: ParseEventTypeError("event type") {
        Custom => "CUSTOM",
        Clone => "CLONE",
        ChannelCreate => "CHANNEL_CREATE",
        ChannelDestroy => "CHANNEL_DESTROY",
        ChannelState => "CHANNEL_STATE",
        ChannelCallstate => "CHANNEL_CALLSTATE",
        ChannelAnswer => "CHANNEL_ANSWER",
        ChannelHangup => "CHANNEL_HANGUP",
        ChannelHangupComplete => "CHANNEL_HANGUP_COMPLETE",
        ChannelExecute => "CHANNEL_EXECUTE",
        ChannelExecuteComplete => "CHANNEL_EXECUTE_COMPLETE",
        ChannelHold => "CHANNEL_HOLD",
        ChannelUnhold => "CHANNEL_UNHOLD",
        ChannelBridge => "CHANNEL_BRIDGE",
        ChannelUnbridge => "CHANNEL_UNBRIDGE",
        ChannelProgress => "CHANNEL_PROGRESS",
        ChannelProgressMedia => "CHANNEL_PROGRESS_MEDIA",
        ChannelOutgoing => "CHANNEL_OUTGOING",
        ChannelPark => "CHANNEL_PARK",
        ChannelUnpark => "CHANNEL_UNPARK",
        ChannelApplication => "CHANNEL_APPLICATION",
        ChannelOriginate => "CHANNEL_ORIGINATE",
        ChannelUuid => "CHANNEL_UUID",
        ChannelData => "CHANNEL_DATA",
        Api => "API",
        Log => "LOG",
        Startup => "STARTUP",
        Shutdown => "SHUTDOWN",
        Talk => "TALK",
        Notalk => "NOTALK",
        Dtmf => "DTMF",
        Message => "MESSAGE",
        PresenceIn => "PRESENCE_IN",
        MessageWaiting => "MESSAGE_WAITING",
        Codec => "CODEC",
        BackgroundJob => "BACKGROUND_JOB",
        DetectedSpeech => "DETECTED_SPEECH",
        DetectedTone => "DETECTED_TONE",
        Heartbeat => "HEARTBEAT",
        Notify => "NOTIFY",
        SessionHeartbeat => "SESSION_HEARTBEAT",
        CallUpdate => "CALL_UPDATE",
        RecordStart => "RECORD_START",
        RecordStop => "RECORD_STOP",
        PlaybackStart => "PLAYBACK_START",
        PlaybackStop => "PLAYBACK_STOP",
        MediaBugStart => "MEDIA_BUG_START",
        MediaBugStop => "MEDIA_BUG_STOP",
        CallDetail => "CALL_DETAIL",
        DeviceState => "DEVICE_STATE",
        /// Subscribe to every event
        All => "ALL",
    }
}

impl EslEventType {
    /// Case-insensitive lookup that tolerates unknown names.
    pub fn parse_event_type(name: &str) -> Option<Self> {
        name.parse()
            .ok()
    }
}

/// A parsed `text/event-plain` message.
#[derive(Debug, Clone)]
pub struct EslEvent {
    name: String,
    event_type: Option<EslEventType>,
    headers: HeaderMap,
    body: Option<String>,
}

impl EslEvent {
    /// Interpret a message as an event.
    ///
    /// Fails with [`EslError::Protocol`] for any other content type, except a
    /// `command/reply` that carries `Event-Name`.
    pub fn from_message(message: &EslMessage) -> EslResult<Self> {
        match message.content_type() {
            ContentType::EventPlain => {
                let body = message
                    .body()
                    .ok_or_else(|| EslError::protocol_error("event message without a body"))?;
                let (headers, body) = parse_event_body(body);
                Self::from_parts(headers, body)
            }
            ContentType::CommandReply if message
                .headers()
                .contains(EventHeader::EventName) =>
            {
                Self::from_parts(
                    message
                        .headers()
                        .clone(),
                    message
                        .body()
                        .map(str::to_string),
                )
            }
            other => Err(EslError::protocol_error(format!(
                "expected {}, got {}",
                ContentType::EventPlain,
                other
            ))),
        }
    }

    /// Build an event from headers. `Event-Name` is required.
    pub fn from_parts(headers: HeaderMap, body: Option<String>) -> EslResult<Self> {
        let name = headers
            .get(EventHeader::EventName)
            .ok_or_else(|| EslError::protocol_error("event without Event-Name"))?
            .to_string();
        Ok(Self {
            event_type: EslEventType::parse_event_type(&name),
            name,
            headers,
            body,
        })
    }

    /// Parse a channel dump (`uuid_dump` output) as a `CHANNEL_DATA` event.
    pub fn from_channel_dump(text: &str) -> EslResult<Self> {
        let mut headers = parse_header_block(text);
        if !headers.contains(EventHeader::EventName) {
            headers.insert(
                EventHeader::EventName.as_str(),
                EslEventType::ChannelData.as_str(),
            );
        }
        Self::from_parts(headers, None)
    }

    /// `Event-Name` as received.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Typed event name, `None` for names this crate does not know.
    pub fn event_type(&self) -> Option<EslEventType> {
        self.event_type
    }

    pub fn is_event_type(&self, event_type: EslEventType) -> bool {
        self.event_type == Some(event_type)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name)
    }

    /// Inner body, e.g. the result text of a background job.
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.header(EventHeader::UniqueId)
    }

    pub fn job_uuid(&self) -> Option<&str> {
        self.header(EventHeader::JobUuid)
    }

    pub fn event_subclass(&self) -> Option<&str> {
        self.header(EventHeader::EventSubclass)
    }

    pub fn application(&self) -> Option<&str> {
        self.header(EventHeader::Application)
    }

    pub fn application_uuid(&self) -> Option<&str> {
        self.header(EventHeader::ApplicationUuid)
    }

    pub fn application_response(&self) -> Option<&str> {
        self.header(EventHeader::ApplicationResponse)
    }

    /// Channel variable `name`, read from the `variable_{name}` header.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.header(format!("variable_{}", name))
    }
}

/// An event scoped to one channel, i.e. one that carries `Unique-ID`.
///
/// Channel state, answer state and hangup cause are parsed on first access and cached.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    event: Arc<EslEvent>,
    channel_state: OnceLock<Option<ChannelState>>,
    answer_state: OnceLock<Option<AnswerState>>,
    hangup_cause: OnceLock<Option<HangupCause>>,
}

impl ChannelEvent {
    /// `None` for global events without a unique id.
    pub fn new(event: Arc<EslEvent>) -> Option<Self> {
        match event.unique_id() {
            Some(uuid) if !uuid.is_empty() => Some(Self {
                event,
                channel_state: OnceLock::new(),
                answer_state: OnceLock::new(),
                hangup_cause: OnceLock::new(),
            }),
            _ => None,
        }
    }

    pub fn uuid(&self) -> &str {
        self.event
            .unique_id()
            .unwrap_or_default()
    }

    pub fn other_leg_uuid(&self) -> Option<&str> {
        self.event
            .header(EventHeader::OtherLegUniqueId)
            .filter(|uuid| !uuid.is_empty())
    }

    pub fn channel_call_uuid(&self) -> Option<&str> {
        self.event
            .header(EventHeader::ChannelCallUuid)
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        *self
            .channel_state
            .get_or_init(|| {
                self.event
                    .header(EventHeader::ChannelState)
                    .and_then(ChannelState::from_header)
            })
    }

    pub fn answer_state(&self) -> Option<AnswerState> {
        *self
            .answer_state
            .get_or_init(|| {
                self.event
                    .header(EventHeader::AnswerState)
                    .and_then(|v| {
                        v.parse()
                            .ok()
                    })
            })
    }

    pub fn hangup_cause(&self) -> Option<HangupCause> {
        *self
            .hangup_cause
            .get_or_init(|| {
                self.event
                    .header(EventHeader::HangupCause)
                    .and_then(|v| {
                        v.parse()
                            .ok()
                    })
            })
    }

    pub fn event(&self) -> &Arc<EslEvent> {
        &self.event
    }
}

impl Deref for ChannelEvent {
    type Target = EslEvent;

    fn deref(&self) -> &EslEvent {
        &self.event
    }
}

/// Outcome of a `bgapi` command, delivered as a `BACKGROUND_JOB` event.
#[derive(Debug, Clone)]
pub struct BackgroundJobResult {
    pub job_uuid: String,
    pub success: bool,
    pub body: Option<String>,
    pub error_message: Option<String>,
    pub event: Arc<EslEvent>,
}

impl BackgroundJobResult {
    pub fn from_event(event: Arc<EslEvent>) -> EslResult<Self> {
        if !event.is_event_type(EslEventType::BackgroundJob) {
            return Err(EslError::protocol_error(format!(
                "expected BACKGROUND_JOB, got {}",
                event.name()
            )));
        }
        let job_uuid = event
            .job_uuid()
            .ok_or_else(|| EslError::protocol_error("BACKGROUND_JOB without Job-UUID"))?
            .to_string();
        let body = event
            .body()
            .map(|b| {
                b.trim_end_matches('\n')
                    .to_string()
            });
        let success = body
            .as_deref()
            .is_some_and(|b| b.starts_with('+'));
        let error_message = if success {
            None
        } else {
            body.as_deref()
                .map(|b| match b.strip_prefix("-ERR ") {
                    Some(rest) => rest.to_string(),
                    None => b.to_string(),
                })
        };
        Ok(Self {
            job_uuid,
            success,
            body,
            error_message,
            event,
        })
    }
}
