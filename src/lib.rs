//! FreeSWITCH event socket engine for Rust
//!
//! This crate speaks FreeSWITCH's event socket protocol over tokio: it frames the byte
//! stream into messages, correlates commands with their replies, fans events out to
//! any number of subscribers, and tracks call legs for call control.
//!
//! # Architecture
//!
//! - [`Connection`] owns the TCP stream and broadcasts raw chunks from a reader task.
//! - [`EventSocket`] parses those chunks and runs the protocol: one synchronous command
//!   in flight at a time, application executions and background jobs correlated by id,
//!   and [`Subscription`] handles over the message stream.
//! - [`BasicChannel`] and [`Channel`] follow one call leg and offer call control.
//!
//! # Examples
//!
//! ## Inbound Connection
//!
//! ```rust,no_run
//! use freeswitch_event_socket::{EslConfig, EslError, EslEventType, InboundSocket};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let socket = InboundSocket::connect(&EslConfig::default()).await?;
//!
//!     let status = socket.send_api("status").await?;
//!     println!("{}", status.body().unwrap_or_default());
//!
//!     socket.subscribe_events(&[EslEventType::ChannelAnswer]).await?;
//!     let mut answers = socket.channel_events();
//!     while let Some(event) = answers.recv().await {
//!         println!("answered: {}", event.uuid());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Outbound Mode
//!
//! FreeSWITCH connects to *your* application via the `socket` dialplan application:
//!
//! ```xml
//! <action application="socket" data="127.0.0.1:8084 async full"/>
//! ```
//!
//! ```rust,no_run
//! use freeswitch_event_socket::{BridgeOptions, EslError, OutboundListener, PlayOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let listener = OutboundListener::bind("0.0.0.0:8084").await?;
//!     loop {
//!         let channel = listener.accept().await?;
//!         tokio::spawn(async move {
//!             channel.answer().await?;
//!             channel.play("ivr/ivr-welcome.wav", &PlayOptions::default()).await?;
//!             let result = channel
//!                 .bridge_to("user/1000", &BridgeOptions::new().with_timeout(20))
//!                 .await?;
//!             println!("bridged: {}", result.success);
//!             Ok::<_, EslError>(())
//!         });
//!     }
//! }
//! ```

#[macro_use]
mod macros;

pub mod app;
pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod headers;
pub mod inbound;
pub mod listener;
pub mod notify;
pub mod protocol;
pub mod socket;
pub mod subscription;

pub(crate) mod buffer;

pub use app::{
    ApplicationResult, AttendedTransferResult, AttendedTransferStatus, BridgeOptions, BridgeResult,
    Leg, PlayGetDigitsOptions, PlayGetDigitsResult, PlayOptions, PlayResult, ReadOptions,
    ReadResult, ReadResultStatus, RecordingStatus, SayGender, SayMethod, SayOptions, SayType,
};
pub use channel::{
    AnswerState, BasicChannel, BridgedChannel, Channel, ChannelState, HangupCause, PlaybackHandle,
    TransferArbiter,
};
pub use command::{ApiResponse, CommandReply, EslCommand, ExecuteOptions};
pub use config::EslConfig;
pub use connection::{Connection, ConnectionStatus, DisconnectReason};
pub use constants::DEFAULT_ESL_PORT;
pub use error::{EslError, EslResult, FramingError};
pub use event::{BackgroundJobResult, ChannelEvent, EslEvent, EslEventType};
pub use headers::{EventHeader, HeaderMap};
pub use inbound::InboundSocket;
pub use listener::{Acceptor, OutboundListener};
pub use notify::{
    spawn_answer_publisher, ChannelNotification, ForwardingSink, JsonLinesSink, NotificationSink,
};
pub use protocol::{decode_stream, ContentType, EslMessage, EslParser};
pub use socket::{ApplicationExecution, EventSocket};
pub use subscription::Subscription;
