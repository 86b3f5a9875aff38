//! Publishing channel notifications to an external sink.

use crate::channel::state::{AnswerState, ChannelState};
use crate::connection::lock;
use crate::error::{EslError, EslResult};
use crate::event::{ChannelEvent, EslEventType};
use crate::socket::EventSocket;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A channel event worth telling the outside world about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNotification {
    pub channel_id: String,
    pub event_name: String,
    pub channel_state: Option<ChannelState>,
    pub answer_state: Option<AnswerState>,
    pub hangup_cause: Option<String>,
    pub body_text: Option<String>,
}

impl From<&ChannelEvent> for ChannelNotification {
    fn from(event: &ChannelEvent) -> Self {
        Self {
            channel_id: event
                .uuid()
                .to_string(),
            event_name: event
                .name()
                .to_string(),
            channel_state: event.channel_state(),
            answer_state: event.answer_state(),
            hangup_cause: event
                .hangup_cause()
                .map(|cause| {
                    cause
                        .as_str()
                        .to_string()
                }),
            body_text: event
                .body()
                .map(str::to_string),
        }
    }
}

/// Receives notifications. Called inline from the publishing task and never awaited,
/// so implementations must hand off slow work themselves.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: ChannelNotification);
}

/// Publish one notification per `CHANNEL_ANSWER` until the socket goes away.
///
/// The caller must have subscribed the socket to `CHANNEL_ANSWER`.
pub fn spawn_answer_publisher(
    socket: &EventSocket,
    sink: Arc<dyn NotificationSink>,
) -> JoinHandle<()> {
    let mut answers = socket
        .channel_events()
        .filter(|event| event.is_event_type(EslEventType::ChannelAnswer));
    let id = socket.id();
    tokio::spawn(async move {
        while let Some(event) = answers
            .recv()
            .await
        {
            debug!("({}) [{}] Publishing answer", id, event.uuid());
            sink.publish(ChannelNotification::from(&event));
        }
        debug!("({}) Answer publisher stopped", id);
    })
}

/// Hands each notification to an unbounded channel, so a consumer elsewhere can do
/// blocking or slow work with it.
#[derive(Debug, Clone)]
pub struct ForwardingSink {
    tx: mpsc::UnboundedSender<ChannelNotification>,
}

impl ForwardingSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ForwardingSink {
    fn publish(&self, notification: ChannelNotification) {
        if let Err(mpsc::error::SendError(notification)) = self
            .tx
            .send(notification)
        {
            debug!("[{}] Notification dropped, receiver gone", notification.channel_id);
        }
    }
}

/// Writes each notification as one JSON line.
///
/// Writes and flushes synchronously inside [`publish`](NotificationSink::publish).
/// For stdout or files, run it on a blocking thread behind a [`ForwardingSink`].
pub struct JsonLinesSink<W> {
    writer: StdMutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: StdMutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, notification: &ChannelNotification) -> EslResult<()> {
        let line = serde_json::to_string(notification)
            .map_err(|e| EslError::protocol_error(format!("notification encoding: {}", e)))?;
        let mut writer = lock(&self.writer);
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> NotificationSink for JsonLinesSink<W> {
    fn publish(&self, notification: ChannelNotification) {
        if let Err(e) = self.write_line(&notification) {
            error!("[{}] Failed to write notification: {}", notification.channel_id, e);
        }
    }
}
