//! Protocol constants and tuning values

use std::time::Duration;

/// Default FreeSWITCH event socket port for inbound connections
pub const DEFAULT_ESL_PORT: u16 = 8021;

/// Default inbound password shipped with FreeSWITCH
pub const DEFAULT_ESL_PASSWORD: &str = "ClueCon";

/// Socket read buffer size (64KB)
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Maximum single message size (8MB), validated against `Content-Length`
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Maximum total parser buffer (16MB). Exceeding it means the peer is not speaking ESL.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Header block terminator
pub const HEADER_TERMINATOR: &[u8] = b"\n\n";

/// Content-Type header values
pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_API_RESPONSE: &str = "api/response";
pub const CONTENT_TYPE_TEXT_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";

/// Protocol framing header names.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const HEADER_REPLY_TEXT: &str = "Reply-Text";

/// Capacity of the raw chunk broadcast between the socket reader and the parser.
pub const CHUNK_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the parsed message broadcast. A subscriber further behind than this lags.
pub const MESSAGE_CHANNEL_CAPACITY: usize = 4096;

/// How long `exit` waits for a disconnect notice before assuming success.
pub const EXIT_NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default response timeout for the inbound handshake.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default linger time before an outbound channel exits after hangup.
pub const DEFAULT_LINGER_TIME: Duration = Duration::from_secs(10);

/// Default tone duration for `send_dtmf`.
pub const DEFAULT_DTMF_DURATION: Duration = Duration::from_millis(2000);
