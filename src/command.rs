//! Outbound command encoding and synchronous reply classification

use crate::{
    error::{EslError, EslResult},
    headers::{EventHeader, HeaderMap},
    protocol::{ContentType, EslMessage},
};
use std::fmt;

/// Reject strings that would split a single-line command.
fn validate_no_newlines(s: &str, context: &str) -> EslResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(EslError::InvalidCommand {
            message: format!("{} must not contain newlines", context),
        });
    }
    Ok(())
}

/// Flags for a `sendmsg` `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Queue the application behind the one currently running instead of interleaving.
    pub event_lock: bool,
    /// Return from the dialplan thread immediately.
    pub async_mode: bool,
    /// Repeat count; `-1` loops until interrupted.
    pub loops: i32,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            event_lock: true,
            async_mode: false,
            loops: 1,
        }
    }
}

impl ExecuteOptions {
    /// `async: true`, no event-lock.
    pub fn detached() -> Self {
        Self {
            event_lock: false,
            async_mode: true,
            loops: 1,
        }
    }

    pub fn with_loops(mut self, loops: i32) -> Self {
        self.loops = loops;
        self
    }
}

/// Commands written to the socket.
#[derive(Clone, PartialEq, Eq)]
pub enum EslCommand {
    /// `api <command>`
    Api { command: String },
    /// `bgapi <command> [arg]` tagged with `Job-UUID`
    BgApi {
        command: String,
        arg: Option<String>,
        job_uuid: String,
    },
    /// `sendmsg <uuid>` executing a dialplan application, tagged with `Event-UUID`
    Execute {
        uuid: String,
        app: String,
        args: Option<String>,
        event_uuid: String,
        options: ExecuteOptions,
    },
    /// Outbound-mode handshake
    Connect,
    /// Inbound-mode authentication
    Auth { password: String },
    /// `event plain NAMES... [CUSTOM names...]`
    Events {
        events: Vec<String>,
        custom: Vec<String>,
    },
    /// `filter <header> <value>`
    Filter { header: String, value: String },
    /// `filter delete <header> [value]`
    FilterDelete {
        header: String,
        value: Option<String>,
    },
    Linger,
    NoLinger,
    Exit,
    /// Arbitrary command text, sent as-is followed by a blank line
    Raw(String),
}

impl fmt::Debug for EslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EslCommand::Auth { .. } => f
                .debug_struct("Auth")
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::Api { command } => f
                .debug_struct("Api")
                .field("command", command)
                .finish(),
            EslCommand::BgApi {
                command, job_uuid, ..
            } => f
                .debug_struct("BgApi")
                .field("command", command)
                .field("job_uuid", job_uuid)
                .finish(),
            EslCommand::Execute {
                uuid,
                app,
                event_uuid,
                ..
            } => f
                .debug_struct("Execute")
                .field("uuid", uuid)
                .field("app", app)
                .field("event_uuid", event_uuid)
                .finish(),
            other => f.write_str(&other.summary()),
        }
    }
}

impl EslCommand {
    /// Short description for logs. Never includes secrets or application arguments.
    pub fn summary(&self) -> String {
        match self {
            EslCommand::Api { command } => format!("api {}", command),
            EslCommand::BgApi { command, .. } => format!("bgapi {}", command),
            EslCommand::Execute { uuid, app, .. } => format!("sendmsg {} execute {}", uuid, app),
            EslCommand::Connect => "connect".to_string(),
            EslCommand::Auth { .. } => "auth [REDACTED]".to_string(),
            EslCommand::Events { events, custom } => {
                format!("event plain {} {}", events.join(" "), custom.join(" "))
                    .trim_end()
                    .to_string()
            }
            EslCommand::Filter { header, value } => format!("filter {} {}", header, value),
            EslCommand::FilterDelete { header, .. } => format!("filter delete {}", header),
            EslCommand::Linger => "linger".to_string(),
            EslCommand::NoLinger => "nolinger".to_string(),
            EslCommand::Exit => "exit".to_string(),
            EslCommand::Raw(text) => text
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Encode for the wire, including the terminating blank line.
    pub fn to_wire_format(&self) -> EslResult<String> {
        let wire = match self {
            EslCommand::Api { command } => {
                validate_no_newlines(command, "api command")?;
                format!("api {}\n\n", command)
            }
            EslCommand::BgApi {
                command,
                arg,
                job_uuid,
            } => {
                validate_no_newlines(command, "bgapi command")?;
                let mut line = format!("bgapi {}", command);
                if let Some(arg) = arg {
                    validate_no_newlines(arg, "bgapi argument")?;
                    line.push(' ');
                    line.push_str(arg);
                }
                format!("{}\nJob-UUID: {}\n\n", line, job_uuid)
            }
            EslCommand::Execute {
                uuid,
                app,
                args,
                event_uuid,
                options,
            } => {
                validate_no_newlines(uuid, "channel uuid")?;
                validate_no_newlines(app, "application name")?;
                let mut wire = format!(
                    "sendmsg {}\nEvent-UUID: {}\ncall-command: execute\nexecute-app-name: {}\n",
                    uuid, event_uuid, app
                );
                if options.event_lock {
                    wire.push_str("event-lock: true\n");
                }
                if options.loops != 1 {
                    wire.push_str(&format!("loops: {}\n", options.loops));
                }
                if options.async_mode {
                    wire.push_str("async: true\n");
                }
                match args {
                    Some(args) if !args.is_empty() => {
                        wire.push_str(&format!(
                            "content-type: text/plain\ncontent-length: {}\n\n{}\n",
                            args.len(),
                            args
                        ));
                    }
                    _ => wire.push('\n'),
                }
                wire
            }
            EslCommand::Connect => "connect\n\n".to_string(),
            EslCommand::Auth { password } => {
                validate_no_newlines(password, "password")?;
                format!("auth {}\n\n", password)
            }
            EslCommand::Events { events, custom } => {
                let mut line = String::from("event plain");
                for name in events {
                    validate_no_newlines(name, "event name")?;
                    line.push(' ');
                    line.push_str(name);
                }
                if !custom.is_empty() {
                    line.push_str(" CUSTOM");
                    for name in custom {
                        validate_no_newlines(name, "custom event name")?;
                        line.push(' ');
                        line.push_str(name);
                    }
                }
                format!("{}\n\n", line)
            }
            EslCommand::Filter { header, value } => {
                validate_no_newlines(header, "filter header")?;
                validate_no_newlines(value, "filter value")?;
                format!("filter {} {}\n\n", header, value)
            }
            EslCommand::FilterDelete { header, value } => {
                validate_no_newlines(header, "filter header")?;
                match value {
                    Some(value) => {
                        validate_no_newlines(value, "filter value")?;
                        format!("filter delete {} {}\n\n", header, value)
                    }
                    None => format!("filter delete {}\n\n", header),
                }
            }
            EslCommand::Linger => "linger\n\n".to_string(),
            EslCommand::NoLinger => "nolinger\n\n".to_string(),
            EslCommand::Exit => "exit\n\n".to_string(),
            EslCommand::Raw(text) => format!("{}\n\n", text.trim_end_matches('\n')),
        };
        Ok(wire)
    }
}

fn require_content_type(message: &EslMessage, expected: ContentType) -> EslResult<()> {
    if message.content_type() != &expected {
        return Err(EslError::protocol_error(format!(
            "expected {}, got {}",
            expected,
            message.content_type()
        )));
    }
    Ok(())
}

/// Reply to a synchronous command (`command/reply`).
#[derive(Debug, Clone)]
pub struct CommandReply {
    headers: HeaderMap,
    body: Option<String>,
}

impl TryFrom<&EslMessage> for CommandReply {
    type Error = EslError;

    fn try_from(message: &EslMessage) -> EslResult<Self> {
        require_content_type(message, ContentType::CommandReply)?;
        Ok(Self {
            headers: message
                .headers()
                .clone(),
            body: message
                .body()
                .map(str::to_string),
        })
    }
}

impl CommandReply {
    /// Raw `Reply-Text`, e.g. `+OK accepted` or `-ERR invalid`.
    pub fn reply_text(&self) -> Option<&str> {
        self.headers
            .get(EventHeader::ReplyText)
    }

    /// `Reply-Text` starts with `+`.
    pub fn is_success(&self) -> bool {
        self.reply_text()
            .is_some_and(|text| text.starts_with('+'))
    }

    /// Text after `-ERR `, for failed replies.
    pub fn error_message(&self) -> Option<&str> {
        if self.is_success() {
            return None;
        }
        self.reply_text()
            .map(|text| {
                text.strip_prefix("-ERR")
                    .map(str::trim_start)
                    .unwrap_or(text)
            })
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Convert a `-ERR` reply into [`EslError::CommandFailed`].
    pub fn into_result(self) -> EslResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(EslError::CommandFailed {
                reply_text: self
                    .reply_text()
                    .unwrap_or_default()
                    .to_string(),
            })
        }
    }
}

/// Body text FreeSWITCH returns for API commands that produce no output.
const NO_REPLY_BODY: &str = "-ERR no reply";

/// Response to an `api` command (`api/response`).
#[derive(Debug, Clone)]
pub struct ApiResponse {
    headers: HeaderMap,
    body: Option<String>,
}

impl TryFrom<&EslMessage> for ApiResponse {
    type Error = EslError;

    fn try_from(message: &EslMessage) -> EslResult<Self> {
        require_content_type(message, ContentType::ApiResponse)?;
        Ok(Self {
            headers: message
                .headers()
                .clone(),
            body: message
                .body()
                .map(|body| {
                    body.trim_end_matches('\n')
                        .to_string()
                }),
        })
    }
}

impl ApiResponse {
    /// Body with trailing newlines removed.
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// A body not starting with `-` is a success. A body of exactly `-ERR no reply`
    /// is also a success: FreeSWITCH sends it for commands that print nothing.
    pub fn is_success(&self) -> bool {
        match self.body() {
            Some(body) => body == NO_REPLY_BODY || !body.starts_with('-'),
            None => false,
        }
    }

    /// Text after `-ERR`, for failed responses.
    pub fn error_message(&self) -> Option<&str> {
        if self.is_success() {
            return None;
        }
        self.body()
            .map(|body| {
                body.strip_prefix("-ERR")
                    .map(str::trim_start)
                    .unwrap_or(body)
            })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Convert a failed response into [`EslError::CommandFailed`].
    pub fn into_result(self) -> EslResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(EslError::CommandFailed {
                reply_text: self
                    .body()
                    .unwrap_or_default()
                    .to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EslParser;

    fn message(raw: &str) -> EslMessage {
        let mut parser = EslParser::new();
        parser
            .push(raw.as_bytes())
            .unwrap();
        parser
            .next_message()
            .unwrap()
            .unwrap()
    }

    fn api_message(body: &str) -> EslMessage {
        message(&format!(
            "Content-Type: api/response\nContent-Length: {}\n\n{}",
            body.len(),
            body
        ))
    }

    #[test]
    fn api_wire_format() {
        let cmd = EslCommand::Api {
            command: "status".into(),
        };
        assert_eq!(cmd.to_wire_format().unwrap(), "api status\n\n");
    }

    #[test]
    fn api_rejects_newline_injection() {
        let cmd = EslCommand::Api {
            command: "status\n\nexit".into(),
        };
        assert!(matches!(
            cmd.to_wire_format(),
            Err(EslError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn bgapi_wire_format_carries_job_uuid() {
        let cmd = EslCommand::BgApi {
            command: "originate".into(),
            arg: Some("user/1000 &park".into()),
            job_uuid: "job-1".into(),
        };
        assert_eq!(
            cmd.to_wire_format().unwrap(),
            "bgapi originate user/1000 &park\nJob-UUID: job-1\n\n"
        );
    }

    #[test]
    fn sendmsg_without_args() {
        let cmd = EslCommand::Execute {
            uuid: "abc".into(),
            app: "answer".into(),
            args: None,
            event_uuid: "ev-1".into(),
            options: ExecuteOptions::default(),
        };
        assert_eq!(
            cmd.to_wire_format().unwrap(),
            "sendmsg abc\nEvent-UUID: ev-1\ncall-command: execute\nexecute-app-name: answer\nevent-lock: true\n\n"
        );
    }

    #[test]
    fn sendmsg_with_args_loops_and_async() {
        let cmd = EslCommand::Execute {
            uuid: "abc".into(),
            app: "playback".into(),
            args: Some("ivr/welcome.wav".into()),
            event_uuid: "ev-2".into(),
            options: ExecuteOptions::detached().with_loops(3),
        };
        assert_eq!(
            cmd.to_wire_format().unwrap(),
            "sendmsg abc\nEvent-UUID: ev-2\ncall-command: execute\nexecute-app-name: playback\nloops: 3\nasync: true\ncontent-type: text/plain\ncontent-length: 15\n\nivr/welcome.wav\n"
        );
    }

    #[test]
    fn event_subscription_with_custom_names() {
        let cmd = EslCommand::Events {
            events: vec!["CHANNEL_ANSWER".into(), "DTMF".into()],
            custom: vec!["sofia::register".into()],
        };
        assert_eq!(
            cmd.to_wire_format().unwrap(),
            "event plain CHANNEL_ANSWER DTMF CUSTOM sofia::register\n\n"
        );
    }

    #[test]
    fn filter_wire_formats() {
        let add = EslCommand::Filter {
            header: "Unique-ID".into(),
            value: "abc".into(),
        };
        let delete = EslCommand::FilterDelete {
            header: "Unique-ID".into(),
            value: Some("abc".into()),
        };
        let delete_all = EslCommand::FilterDelete {
            header: "Unique-ID".into(),
            value: None,
        };
        assert_eq!(add.to_wire_format().unwrap(), "filter Unique-ID abc\n\n");
        assert_eq!(delete.to_wire_format().unwrap(), "filter delete Unique-ID abc\n\n");
        assert_eq!(delete_all.to_wire_format().unwrap(), "filter delete Unique-ID\n\n");
    }

    #[test]
    fn auth_debug_is_redacted() {
        let cmd = EslCommand::Auth {
            password: "secret".into(),
        };
        assert!(!format!("{:?}", cmd).contains("secret"));
        assert_eq!(cmd.summary(), "auth [REDACTED]");
        assert_eq!(cmd.to_wire_format().unwrap(), "auth secret\n\n");
    }

    #[test]
    fn command_reply_success_and_error_text() {
        let ok = CommandReply::try_from(&message(
            "Content-Type: command/reply\nReply-Text: +OK accepted\n\n",
        ))
        .unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.error_message(), None);

        let err = CommandReply::try_from(&message(
            "Content-Type: command/reply\nReply-Text: -ERR invalid command\n\n",
        ))
        .unwrap();
        assert!(!err.is_success());
        assert_eq!(err.error_message(), Some("invalid command"));
        assert!(matches!(
            err.into_result(),
            Err(EslError::CommandFailed { .. })
        ));
    }

    #[test]
    fn command_reply_requires_matching_content_type() {
        let result = CommandReply::try_from(&api_message("+OK"));
        assert!(matches!(result, Err(EslError::Protocol { .. })));
    }

    #[test]
    fn api_response_requires_matching_content_type() {
        let result = ApiResponse::try_from(&message(
            "Content-Type: command/reply\nReply-Text: +OK\n\n",
        ));
        assert!(matches!(result, Err(EslError::Protocol { .. })));
    }

    #[test]
    fn api_response_success_trims_trailing_newline() {
        let response = ApiResponse::try_from(&api_message("UP 0 years, 1 day\n")).unwrap();
        assert!(response.is_success());
        assert_eq!(response.body(), Some("UP 0 years, 1 day"));
    }

    #[test]
    fn api_response_error_text_follows_err_prefix() {
        let response = ApiResponse::try_from(&api_message("-ERR no such channel\n")).unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error_message(), Some("no such channel"));
    }

    #[test]
    fn api_response_no_reply_counts_as_success() {
        let response = ApiResponse::try_from(&api_message("-ERR no reply\n")).unwrap();
        assert!(response.is_success());
        assert_eq!(response.error_message(), None);
    }

    #[test]
    fn api_response_other_err_prefixes_are_failures() {
        for body in ["-ERR no replies configured", "-ERR", "-USAGE: uuid_kill <uuid>"] {
            let response = ApiResponse::try_from(&api_message(body)).unwrap();
            assert!(!response.is_success(), "{} should fail", body);
        }
    }
}
