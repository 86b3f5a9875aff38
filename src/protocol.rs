//! Frame parsing: raw socket chunks in, classified messages out

use crate::{
    buffer::EslBuffer,
    constants::{
        CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
        CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_TEXT_EVENT_PLAIN, HEADER_CONTENT_LENGTH,
        HEADER_CONTENT_TYPE, MAX_MESSAGE_SIZE,
    },
    error::FramingError,
    event::EslEvent,
    headers::HeaderMap,
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use percent_encoding::percent_decode_str;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Message classification taken from the `Content-Type` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `auth/request`, sent once when an inbound client connects
    AuthRequest,
    /// `command/reply`
    CommandReply,
    /// `api/response`
    ApiResponse,
    /// `text/event-plain`
    EventPlain,
    /// `text/disconnect-notice`
    DisconnectNotice,
    /// Anything else, including a missing header
    Other(String),
}

impl ContentType {
    pub fn from_header(value: &str) -> Self {
        match value.trim() {
            CONTENT_TYPE_AUTH_REQUEST => Self::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => Self::CommandReply,
            CONTENT_TYPE_API_RESPONSE => Self::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN => Self::EventPlain,
            CONTENT_TYPE_DISCONNECT_NOTICE => Self::DisconnectNotice,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthRequest => CONTENT_TYPE_AUTH_REQUEST,
            Self::CommandReply => CONTENT_TYPE_COMMAND_REPLY,
            Self::ApiResponse => CONTENT_TYPE_API_RESPONSE,
            Self::EventPlain => CONTENT_TYPE_TEXT_EVENT_PLAIN,
            Self::DisconnectNotice => CONTENT_TYPE_DISCONNECT_NOTICE,
            Self::Other(other) => other,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framed protocol message.
///
/// Immutable once parsed and shared by every subscriber through an `Arc`.
/// The event view of a `text/event-plain` body is parsed on first access and cached.
#[derive(Debug)]
pub struct EslMessage {
    content_type: ContentType,
    headers: HeaderMap,
    body: Option<String>,
    event: OnceLock<Option<Arc<EslEvent>>>,
}

impl EslMessage {
    pub fn new(headers: HeaderMap, body: Option<String>) -> Self {
        let content_type = headers
            .get(HEADER_CONTENT_TYPE)
            .map(ContentType::from_header)
            .unwrap_or_else(|| ContentType::Other(String::new()));
        Self {
            content_type,
            headers,
            body,
            event: OnceLock::new(),
        }
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name)
    }

    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Event carried by this message, if it is one.
    ///
    /// `text/event-plain` bodies are re-parsed as a header block. A `command/reply`
    /// carrying `Event-Name` (the outbound `connect` reply) is also viewable as an event.
    pub fn event(&self) -> Option<&Arc<EslEvent>> {
        self.event
            .get_or_init(|| match EslEvent::from_message(self) {
                Ok(event) => Some(Arc::new(event)),
                Err(e) => {
                    if self.content_type == ContentType::EventPlain {
                        debug!("Discarding unparseable event: {}", e);
                    }
                    None
                }
            })
            .as_ref()
    }
}

/// Parse a `Key: value` header block. Values are percent-decoded; lines without a colon are skipped.
pub(crate) fn parse_header_block(block: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((name, raw_value)) => {
                let raw_value = raw_value.trim();
                let value = percent_decode_str(raw_value)
                    .decode_utf8()
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| raw_value.to_string());
                headers.insert(name.trim(), value);
            }
            None => trace!("Skipping malformed header line: {:?}", line),
        }
    }
    headers
}

/// Split an event body into its header block and optional length-prefixed sub-body.
pub(crate) fn parse_event_body(body: &str) -> (HeaderMap, Option<String>) {
    let (block, rest) = match body.split_once("\n\n") {
        Some((block, rest)) => (block, rest),
        None => (body, ""),
    };
    let headers = parse_header_block(block);
    if rest.is_empty() {
        return (headers, None);
    }
    let inner = match headers
        .get(HEADER_CONTENT_LENGTH)
        .and_then(|v| {
            v.trim()
                .parse::<usize>()
                .ok()
        }) {
        Some(len) => {
            let bytes = rest.as_bytes();
            String::from_utf8_lossy(&bytes[..len.min(bytes.len())]).into_owned()
        }
        None => rest.to_string(),
    };
    (headers, Some(inner))
}

#[derive(Debug)]
enum ParseState {
    WaitingForHeaders,
    WaitingForBody { headers: HeaderMap, length: usize },
}

/// Incremental frame parser.
///
/// Feed raw chunks with [`push`](Self::push) and drain complete messages with
/// [`next_message`](Self::next_message). Chunk boundaries never affect the output.
#[derive(Debug)]
pub struct EslParser {
    buffer: EslBuffer,
    state: ParseState,
}

impl Default for EslParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EslParser {
    pub fn new() -> Self {
        Self {
            buffer: EslBuffer::new(),
            state: ParseState::WaitingForHeaders,
        }
    }

    /// Append a chunk of raw bytes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), FramingError> {
        self.buffer
            .extend(chunk)
    }

    /// Next complete message, or `None` until more bytes arrive.
    pub fn next_message(&mut self) -> Result<Option<EslMessage>, FramingError> {
        loop {
            match std::mem::replace(&mut self.state, ParseState::WaitingForHeaders) {
                ParseState::WaitingForHeaders => {
                    self.buffer
                        .skip_leading_newlines();
                    let Some(block) = self
                        .buffer
                        .take_header_block()
                    else {
                        return Ok(None);
                    };
                    let headers = parse_header_block(&String::from_utf8_lossy(&block));
                    if headers.is_empty() {
                        continue;
                    }
                    match content_length(&headers)? {
                        Some(length) if length > 0 => {
                            self.state = ParseState::WaitingForBody { headers, length };
                        }
                        _ => return Ok(Some(EslMessage::new(headers, None))),
                    }
                }
                ParseState::WaitingForBody { headers, length } => {
                    match self
                        .buffer
                        .take_bytes(length)
                    {
                        Some(body) => {
                            let body = String::from_utf8_lossy(&body).into_owned();
                            return Ok(Some(EslMessage::new(headers, Some(body))));
                        }
                        None => {
                            self.state = ParseState::WaitingForBody { headers, length };
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    /// Signal end of input. Fails if a declared body is still incomplete.
    pub fn finish(&mut self) -> Result<(), FramingError> {
        match &self.state {
            ParseState::WaitingForBody { length, .. } => Err(FramingError::Truncated {
                expected: *length,
                received: self
                    .buffer
                    .len(),
            }),
            ParseState::WaitingForHeaders => {
                if !self
                    .buffer
                    .is_empty()
                {
                    trace!(
                        "Discarding {} bytes of incomplete header block at end of stream",
                        self.buffer
                            .len()
                    );
                }
                Ok(())
            }
        }
    }
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, FramingError> {
    let Some(value) = headers.get(HEADER_CONTENT_LENGTH) else {
        return Ok(None);
    };
    let length = value
        .trim()
        .parse::<usize>()
        .map_err(|_| FramingError::InvalidContentLength {
            value: value.to_string(),
        })?;
    if length > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            length,
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(Some(length))
}

/// Turn a stream of raw chunks into a stream of messages.
///
/// The output ends when the input ends. A framing error is yielded once and then
/// the output ends; a body cut off by the end of input yields [`FramingError::Truncated`].
pub fn decode_stream<S>(chunks: S) -> impl Stream<Item = Result<EslMessage, FramingError>>
where
    S: Stream<Item = Bytes> + Unpin,
{
    futures_util::stream::unfold(
        Some((chunks, EslParser::new())),
        |state| async move {
            let (mut chunks, mut parser) = state?;
            loop {
                match parser.next_message() {
                    Ok(Some(message)) => return Some((Ok(message), Some((chunks, parser)))),
                    Ok(None) => {}
                    Err(e) => return Some((Err(e), None)),
                }
                match chunks
                    .next()
                    .await
                {
                    Some(chunk) => {
                        if let Err(e) = parser.push(&chunk) {
                            return Some((Err(e), None));
                        }
                    }
                    None => {
                        return match parser.finish() {
                            Ok(()) => None,
                            Err(e) => Some((Err(e), None)),
                        }
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<EslMessage> {
        let mut parser = EslParser::new();
        parser
            .push(input)
            .unwrap();
        let mut out = Vec::new();
        while let Some(message) = parser
            .next_message()
            .unwrap()
        {
            out.push(message);
        }
        out
    }

    fn event_frame(event_body: &str) -> String {
        format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            event_body.len(),
            event_body
        )
    }

    #[test]
    fn header_only_frame_yields_one_message() {
        let messages = parse_all(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n");
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.content_type(), &ContentType::CommandReply);
        assert_eq!(message.header("reply-text"), Some("+OK accepted"));
        assert_eq!(message.headers().len(), 2);
        assert!(message
            .body()
            .is_none());
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let input = b"Content-Type: command/reply\nReply-Text: +OK\n\n\
Content-Type: api/response\nContent-Length: 3\n\n+OK\
Content-Type: text/disconnect-notice\nContent-Length: 0\n\n";
        let messages = parse_all(input);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].body(), Some("+OK"));
        assert_eq!(messages[2].content_type(), &ContentType::DisconnectNotice);
    }

    #[test]
    fn byte_at_a_time_matches_whole_input() {
        let mut input = String::from("Content-Type: api/response\nContent-Length: 12\n\n+OK done\nxyz");
        input.push_str(&event_frame(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: 1234\nContent-Length: 4\n\n+OK\n",
        ));
        input.push_str("Content-Type: command/reply\nReply-Text: -ERR nope\n\n");

        let whole = parse_all(input.as_bytes());

        let mut parser = EslParser::new();
        let mut split = Vec::new();
        for byte in input.as_bytes() {
            parser
                .push(std::slice::from_ref(byte))
                .unwrap();
            while let Some(message) = parser
                .next_message()
                .unwrap()
            {
                split.push(message);
            }
        }

        assert_eq!(whole.len(), 3);
        assert_eq!(split.len(), whole.len());
        for (a, b) in whole
            .iter()
            .zip(&split)
        {
            assert_eq!(a.headers(), b.headers());
            assert_eq!(a.body(), b.body());
            assert_eq!(a.content_type(), b.content_type());
        }
    }

    #[test]
    fn body_split_thirty_then_twenty_bytes() {
        let body = "Event-Name: HEARTBEAT\nCore-UUID: 0123456789abcde";
        assert_eq!(body.len(), 48);
        let body = format!("{}\n\n", body);
        assert_eq!(body.len(), 50);
        let header = "Content-Length: 50\nContent-Type: text/event-plain\n\n";

        let mut parser = EslParser::new();
        parser
            .push(header.as_bytes())
            .unwrap();
        assert!(parser
            .next_message()
            .unwrap()
            .is_none());
        parser
            .push(&body.as_bytes()[..30])
            .unwrap();
        assert!(parser
            .next_message()
            .unwrap()
            .is_none());
        parser
            .push(&body.as_bytes()[30..49])
            .unwrap();
        assert!(parser
            .next_message()
            .unwrap()
            .is_none());
        parser
            .push(&body.as_bytes()[49..])
            .unwrap();
        let message = parser
            .next_message()
            .unwrap()
            .expect("event after the 20th byte");
        assert_eq!(
            message
                .body()
                .map(str::len),
            Some(50)
        );
        let event = message
            .event()
            .unwrap();
        assert_eq!(event.name(), "HEARTBEAT");
    }

    #[test]
    fn event_body_with_inner_content() {
        let frame = event_frame(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: 7f4de4bc\nContent-Length: 16\n\n+OK Job-UUID: 1\n",
        );
        let messages = parse_all(frame.as_bytes());
        let event = messages[0]
            .event()
            .unwrap();
        assert_eq!(event.header("Job-UUID"), Some("7f4de4bc"));
        assert_eq!(event.body(), Some("+OK Job-UUID: 1\n"));
    }

    #[test]
    fn event_headers_are_percent_decoded() {
        let frame = event_frame("Event-Name: CHANNEL_ANSWER\nUnique-ID: abc\nCaller-Caller-ID-Name: John%20Doe\n\n");
        let messages = parse_all(frame.as_bytes());
        let event = messages[0]
            .event()
            .unwrap();
        assert_eq!(event.header("Caller-Caller-ID-Name"), Some("John Doe"));
    }

    #[test]
    fn invalid_content_length_is_a_framing_error() {
        let mut parser = EslParser::new();
        parser
            .push(b"Content-Type: api/response\nContent-Length: abc\n\n")
            .unwrap();
        assert!(matches!(
            parser.next_message(),
            Err(FramingError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn oversized_content_length_rejected() {
        let mut parser = EslParser::new();
        let input = format!(
            "Content-Type: api/response\nContent-Length: {}\n\n",
            MAX_MESSAGE_SIZE + 1
        );
        parser
            .push(input.as_bytes())
            .unwrap();
        assert!(matches!(
            parser.next_message(),
            Err(FramingError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn missing_content_type_is_other() {
        let messages = parse_all(b"Reply-Text: +OK\n\n");
        assert_eq!(messages[0].content_type(), &ContentType::Other(String::new()));
    }

    #[tokio::test]
    async fn decode_stream_reports_truncated_body() {
        let chunks = futures_util::stream::iter(vec![
            Bytes::from_static(b"Content-Type: api/response\nContent-Length: 10\n\n"),
            Bytes::from_static(b"+OK"),
        ]);
        let results: Vec<_> = decode_stream(chunks)
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0]
                .as_ref()
                .unwrap_err(),
            &FramingError::Truncated {
                expected: 10,
                received: 3
            }
        );
    }

    #[tokio::test]
    async fn decode_stream_ends_cleanly_between_frames() {
        let chunks = futures_util::stream::iter(vec![
            Bytes::from_static(b"Content-Type: command/reply\nReply-"),
            Bytes::from_static(b"Text: +OK\n\n"),
        ]);
        let results: Vec<_> = decode_stream(chunks)
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }
}
