//! The event socket: command correlation and event fan-out over one connection

use crate::app::bridge::{BridgeOptions, BridgeResult};
use crate::command::{ApiResponse, CommandReply, EslCommand, ExecuteOptions};
use crate::connection::{lock, Connection};
use crate::constants::{
    EXIT_NOTICE_TIMEOUT, HEADER_CONTENT_DISPOSITION, MESSAGE_CHANNEL_CAPACITY,
};
use crate::error::{EslError, EslResult};
use crate::event::{BackgroundJobResult, ChannelEvent, EslEvent, EslEventType};
use crate::headers::EventHeader;
use crate::protocol::{decode_stream, ContentType, EslMessage};
use crate::subscription::{MessageItem, Subscription};
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Event and custom-event names subscribed on a connection. Only ever grows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SubscriptionRegistry {
    events: BTreeSet<String>,
    custom: BTreeSet<String>,
}

impl SubscriptionRegistry {
    /// The registry with `events` and `custom` added, or `None` if nothing is new.
    fn union<'a>(
        &self,
        events: impl IntoIterator<Item = &'a str>,
        custom: impl IntoIterator<Item = &'a str>,
    ) -> Option<Self> {
        let mut grown = self.clone();
        grown
            .events
            .extend(
                events
                    .into_iter()
                    .map(str::to_ascii_uppercase),
            );
        grown
            .custom
            .extend(
                custom
                    .into_iter()
                    .map(str::to_string),
            );
        (grown != *self).then_some(grown)
    }

    fn command(&self) -> EslCommand {
        let events = if self
            .events
            .contains(EslEventType::All.as_str())
        {
            vec![EslEventType::All.to_string()]
        } else {
            self.events
                .iter()
                .cloned()
                .collect()
        };
        EslCommand::Events {
            events,
            custom: self
                .custom
                .iter()
                .cloned()
                .collect(),
        }
    }
}

/// The one outstanding synchronous command on a connection.
///
/// Holds the command slot until its reply is consumed. If the caller stops waiting
/// after the command was written, the slot stays taken until the orphaned reply has
/// been drained, so the next command cannot pick it up.
struct PendingRequest {
    slot: Option<OwnedMutexGuard<()>>,
    replies: Option<Subscription<Arc<EslMessage>>>,
    cancel: CancellationToken,
    written: bool,
}

impl PendingRequest {
    fn new(
        slot: OwnedMutexGuard<()>,
        replies: Subscription<Arc<EslMessage>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            slot: Some(slot),
            replies: Some(replies),
            cancel,
            written: false,
        }
    }

    async fn wait(&mut self) -> EslResult<Arc<EslMessage>> {
        let replies = self
            .replies
            .as_mut()
            .ok_or(EslError::Disconnected)?;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EslError::Cancelled),
            reply = replies.recv() => reply.ok_or(EslError::Disconnected),
        };
        self.settle();
        result
    }

    fn settle(&mut self) {
        self.replies
            .take();
        self.slot
            .take();
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        let (Some(slot), Some(mut replies)) = (
            self.slot
                .take(),
            self.replies
                .take(),
        ) else {
            return;
        };
        if !self.written {
            return;
        }
        let cancel = self
            .cancel
            .clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = replies.recv() => debug!("Drained reply of an abandoned command"),
                }
                drop(slot);
            });
        }
    }
}

/// An application started with `sendmsg`, waiting for its completion event.
pub struct ApplicationExecution {
    uuid: String,
    app: String,
    completions: Subscription<ChannelEvent>,
    cancel: CancellationToken,
}

impl ApplicationExecution {
    /// The `CHANNEL_EXECUTE_COMPLETE` event, or `None` if the channel hung up
    /// or the connection closed first.
    pub async fn wait(mut self) -> Option<ChannelEvent> {
        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.completions.recv() => event,
        };
        match &event {
            Some(e) if e.is_event_type(EslEventType::ChannelExecuteComplete) => {
                debug!(
                    "[{}] {} completed: {}",
                    self.uuid,
                    self.app,
                    e.application_response()
                        .unwrap_or_default()
                );
                event
            }
            Some(_) => {
                debug!("[{}] Hung up before {} completed", self.uuid, self.app);
                None
            }
            None => {
                debug!("[{}] Connection closed before {} completed", self.uuid, self.app);
                None
            }
        }
    }
}

struct SocketInner {
    connection: Connection,
    messages: StdMutex<Option<broadcast::Sender<MessageItem>>>,
    gate: Arc<Mutex<()>>,
    cancel: CancellationToken,
    registry: Mutex<SubscriptionRegistry>,
    closing: AtomicBool,
    disposed: AtomicBool,
}

/// Protocol engine over one connection to FreeSWITCH.
///
/// Clone is cheap and all clones share the connection. Synchronous commands and API
/// calls are strictly one at a time: the reply to a command is simply the next message
/// of the expected content type. Application executions and background jobs are
/// correlated by id, so any number may be awaited concurrently.
#[derive(Clone)]
pub struct EventSocket {
    inner: Arc<SocketInner>,
}

impl std::fmt::Debug for EventSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSocket")
            .field("connection", &self.inner.connection)
            .field("closing", &self.inner.closing.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventSocket {
    /// Wrap a connected stream and start reading.
    pub fn new(stream: TcpStream) -> Self {
        let socket = Self::from_connection(Connection::new(stream));
        socket.start();
        socket
    }

    /// Build the engine without starting the socket reader, so that callers can
    /// subscribe before the first byte is read.
    pub(crate) fn from_connection(connection: Connection) -> Self {
        let (tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let chunks = connection.subscribe();
        let socket = Self {
            inner: Arc::new(SocketInner {
                connection,
                messages: StdMutex::new(Some(tx.clone())),
                gate: Arc::new(Mutex::new(())),
                cancel: CancellationToken::new(),
                registry: Mutex::new(SubscriptionRegistry::default()),
                closing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        };
        match chunks {
            Some(chunks) => {
                tokio::spawn(pump(socket.clone(), chunks, tx));
            }
            None => socket.dispose(),
        }
        socket
    }

    pub(crate) fn start(&self) {
        self.inner
            .connection
            .start();
    }

    /// Id of the underlying connection, as shown in log lines.
    pub fn id(&self) -> u64 {
        self.inner
            .connection
            .id()
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Connected, not disposed, and no disconnect notice received.
    pub fn is_connected(&self) -> bool {
        !self
            .inner
            .cancel
            .is_cancelled()
            && self
                .inner
                .connection
                .is_connected()
            && !self
                .inner
                .closing
                .load(Ordering::Acquire)
    }

    /// Close the connection and cancel everything pending on it. Idempotent.
    pub fn dispose(&self) {
        if self
            .inner
            .disposed
            .swap(true, Ordering::AcqRel)
        {
            return;
        }
        self.inner
            .cancel
            .cancel();
        self.inner
            .connection
            .dispose();
        lock(&self.inner.messages).take();
        debug!("({}) Event socket disposed", self.id());
    }

    /// Resolves once the socket has been disposed, locally or by the peer.
    pub async fn disposed(&self) {
        self.inner
            .cancel
            .cancelled()
            .await
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn message_receiver(&self) -> Option<broadcast::Receiver<MessageItem>> {
        lock(&self.inner.messages)
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    /// Every message received from now on.
    pub fn messages(&self) -> Subscription<Arc<EslMessage>> {
        Subscription::new(self.message_receiver(), |message| Some(message.clone()))
    }

    /// Every `text/event-plain` event received from now on.
    pub fn events(&self) -> Subscription<Arc<EslEvent>> {
        Subscription::new(self.message_receiver(), |message| {
            if message.content_type() == &ContentType::EventPlain {
                message
                    .event()
                    .cloned()
            } else {
                None
            }
        })
    }

    /// Every event carrying a `Unique-ID` received from now on.
    pub fn channel_events(&self) -> Subscription<ChannelEvent> {
        self.events()
            .filter_map(ChannelEvent::new)
    }

    fn ensure_open(&self) -> EslResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(EslError::Disconnected)
        }
    }

    async fn acquire_slot(&self) -> EslResult<OwnedMutexGuard<()>> {
        let slot = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => return Err(EslError::Cancelled),
            slot = self.inner.gate.clone().lock_owned() => slot,
        };
        if self
            .inner
            .cancel
            .is_cancelled()
        {
            return Err(EslError::Cancelled);
        }
        Ok(slot)
    }

    /// Write a command and wait for the next message of `expected` type.
    async fn round_trip(
        &self,
        command: &EslCommand,
        expected: ContentType,
    ) -> EslResult<Arc<EslMessage>> {
        self.ensure_open()?;
        let wire = command.to_wire_format()?;
        let slot = self
            .acquire_slot()
            .await?;
        let replies = self
            .messages()
            .filter(move |message| message.content_type() == &expected);
        let mut pending = PendingRequest::new(slot, replies, self.inner.cancel.clone());
        trace!("({}) Sending {}", self.id(), command.summary());
        if let Err(e) = self
            .inner
            .connection
            .send(wire.as_bytes())
            .await
        {
            pending.settle();
            return Err(e);
        }
        pending.written = true;
        pending
            .wait()
            .await
    }

    /// Run `api <command>` and return its response.
    pub async fn send_api(&self, command: &str) -> EslResult<ApiResponse> {
        let request = EslCommand::Api {
            command: command.to_string(),
        };
        let result = self
            .round_trip(&request, ContentType::ApiResponse)
            .await
            .and_then(|message| ApiResponse::try_from(&*message));
        match &result {
            Ok(response) if response.is_success() => {
                if command.starts_with("uuid_dump") {
                    debug!("({}) api {} succeeded", self.id(), command);
                } else {
                    debug!(
                        "({}) api {}: {}",
                        self.id(),
                        command,
                        response
                            .body()
                            .unwrap_or_default()
                    );
                }
            }
            Ok(response) => error!(
                "({}) api {} failed: {}",
                self.id(),
                command,
                response
                    .error_message()
                    .unwrap_or_default()
            ),
            Err(e) => error!("({}) api {} failed: {}", self.id(), command, e),
        }
        result
    }

    /// `api <command> [arg]`.
    pub async fn api(&self, command: &str, arg: Option<&str>) -> EslResult<ApiResponse> {
        match arg {
            Some(arg) => {
                self.send_api(&format!("{} {}", command, arg))
                    .await
            }
            None => {
                self.send_api(command)
                    .await
            }
        }
    }

    /// Send a command and return its `command/reply`.
    pub async fn send_command(&self, command: &EslCommand) -> EslResult<CommandReply> {
        let result = self
            .round_trip(command, ContentType::CommandReply)
            .await
            .and_then(|message| CommandReply::try_from(&*message));
        match &result {
            Ok(reply) if reply.is_success() => debug!(
                "({}) {}: {}",
                self.id(),
                command.summary(),
                reply
                    .reply_text()
                    .unwrap_or_default()
            ),
            Ok(reply) => error!(
                "({}) {} failed: {}",
                self.id(),
                command.summary(),
                reply
                    .error_message()
                    .unwrap_or_default()
            ),
            Err(e) => error!("({}) {} failed: {}", self.id(), command.summary(), e),
        }
        result
    }

    /// Execute a dialplan application on `uuid` and wait for it to complete.
    ///
    /// `Ok(None)` means the application did not run to completion: the command was
    /// refused, the channel hung up first, or the connection closed while waiting.
    pub async fn execute_application(
        &self,
        uuid: &str,
        app: &str,
        args: Option<&str>,
        options: ExecuteOptions,
    ) -> EslResult<Option<ChannelEvent>> {
        match self
            .start_application(uuid, app, args, options)
            .await
        {
            Ok(Some(execution)) => Ok(execution
                .wait()
                .await),
            Ok(None) | Err(EslError::Cancelled) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Send the `sendmsg` for an application and return a handle to await its completion.
    ///
    /// `Ok(None)` if FreeSWITCH refused the command.
    pub async fn start_application(
        &self,
        uuid: &str,
        app: &str,
        args: Option<&str>,
        options: ExecuteOptions,
    ) -> EslResult<Option<ApplicationExecution>> {
        self.ensure_open()?;
        self.subscribe_events(&[
            EslEventType::ChannelExecuteComplete,
            EslEventType::ChannelHangupComplete,
        ])
        .await?;

        let event_uuid = Uuid::new_v4().to_string();
        let correlation = event_uuid.clone();
        let channel = uuid.to_string();
        let completions = self
            .channel_events()
            .filter(move |event| {
                (event.is_event_type(EslEventType::ChannelExecuteComplete)
                    && event.application_uuid() == Some(correlation.as_str()))
                    || (event.is_event_type(EslEventType::ChannelHangupComplete)
                        && event.uuid() == channel)
            });

        let reply = self
            .send_command(&EslCommand::Execute {
                uuid: uuid.to_string(),
                app: app.to_string(),
                args: args.map(str::to_string),
                event_uuid,
                options,
            })
            .await?;
        if !reply.is_success() {
            return Ok(None);
        }
        Ok(Some(ApplicationExecution {
            uuid: uuid.to_string(),
            app: app.to_string(),
            completions,
            cancel: self
                .inner
                .cancel
                .clone(),
        }))
    }

    /// Run `bgapi` and wait for the matching `BACKGROUND_JOB` event.
    pub async fn background_job(
        &self,
        command: &str,
        arg: Option<&str>,
        job_uuid: Option<String>,
    ) -> EslResult<BackgroundJobResult> {
        self.ensure_open()?;
        self.subscribe_events(&[EslEventType::BackgroundJob])
            .await?;

        let job_uuid = job_uuid.unwrap_or_else(|| {
            Uuid::new_v4().to_string()
        });
        let correlation = job_uuid.clone();
        let mut results = self
            .events()
            .filter(move |event| {
                event.is_event_type(EslEventType::BackgroundJob)
                    && event.job_uuid() == Some(correlation.as_str())
            });

        self.send_command(&EslCommand::BgApi {
            command: command.to_string(),
            arg: arg.map(str::to_string),
            job_uuid,
        })
        .await?
        .into_result()?;

        let event = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => return Err(EslError::Cancelled),
            event = results.recv() => event.ok_or(EslError::Disconnected)?,
        };
        BackgroundJobResult::from_event(event)
    }

    /// Bridge `uuid` to `endpoint`.
    ///
    /// Resolves on the first of: the `bridge` application completing (it failed before
    /// any B-leg answered) or a bridge or hangup event for `uuid` (a successful bridge
    /// only completes when the call ends).
    pub async fn bridge(
        &self,
        uuid: &str,
        endpoint: &str,
        options: &BridgeOptions,
    ) -> EslResult<BridgeResult> {
        self.ensure_open()?;
        let mut options = options.clone();
        if options
            .uuid
            .is_none()
        {
            options.uuid = Some(
                Uuid::new_v4().to_string(),
            );
        }

        let variables = options.channel_variables();
        if !variables.is_empty() {
            self.set_channel_variables(uuid, &variables)
                .await?;
        }

        self.subscribe_events(&[EslEventType::ChannelBridge, EslEventType::ChannelHangup])
            .await?;
        let leg = uuid.to_string();
        let mut outcomes = self
            .channel_events()
            .filter(move |event| {
                event.uuid() == leg
                    && (event.is_event_type(EslEventType::ChannelBridge)
                        || event.is_event_type(EslEventType::ChannelHangup))
            });

        let bridge_string = format!("{}{}", options, endpoint);
        let execution = match self
            .start_application(uuid, "bridge", Some(&bridge_string), ExecuteOptions::default())
            .await
        {
            Ok(Some(execution)) => execution,
            Ok(None) | Err(EslError::Cancelled) => return Ok(BridgeResult::from_event(None)),
            Err(e) => return Err(e),
        };

        let event = tokio::select! {
            completed = execution.wait() => completed,
            observed = outcomes.recv() => observed,
        };
        let result = BridgeResult::from_event(event);
        debug!(
            "[{}] Bridge to {} finished: success={} {}",
            uuid,
            endpoint,
            result.success,
            result
                .response_text
                .as_deref()
                .unwrap_or_default()
        );
        Ok(result)
    }

    /// Subscribe to more events. Only sends a command when the set actually grows.
    pub async fn subscribe_events(&self, events: &[EslEventType]) -> EslResult<()> {
        self.resubscribe(
            events
                .iter()
                .map(EslEventType::as_str),
            std::iter::empty(),
        )
        .await
    }

    /// Subscribe to more `CUSTOM` event subclasses, e.g. `sofia::register`.
    pub async fn subscribe_custom_events(&self, names: &[&str]) -> EslResult<()> {
        self.resubscribe(
            std::iter::empty(),
            names
                .iter()
                .copied(),
        )
        .await
    }

    /// Send the grown subscription set and record it once FreeSWITCH accepts it.
    ///
    /// The registry stays locked until the reply, so concurrent callers asking for
    /// the same names wait for it to be on the wire. A failed or abandoned send
    /// leaves the registry unchanged.
    async fn resubscribe<'a>(
        &self,
        events: impl IntoIterator<Item = &'a str>,
        custom: impl IntoIterator<Item = &'a str>,
    ) -> EslResult<()> {
        let mut registry = self
            .inner
            .registry
            .lock()
            .await;
        let Some(grown) = registry.union(events, custom) else {
            return Ok(());
        };
        self.send_command(&grown.command())
            .await?
            .into_result()?;
        *registry = grown;
        Ok(())
    }

    /// `filter <header> <value>`
    pub async fn filter(&self, header: &str, value: &str) -> EslResult<CommandReply> {
        self.send_command(&EslCommand::Filter {
            header: header.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// `filter delete <header> [value]`
    pub async fn filter_delete(&self, header: &str, value: Option<&str>) -> EslResult<CommandReply> {
        self.send_command(&EslCommand::FilterDelete {
            header: header.to_string(),
            value: value.map(str::to_string),
        })
        .await
    }

    pub async fn linger(&self) -> EslResult<CommandReply> {
        self.send_command(&EslCommand::Linger)
            .await
    }

    pub async fn nolinger(&self) -> EslResult<CommandReply> {
        self.send_command(&EslCommand::NoLinger)
            .await
    }

    /// `uuid_setvar <uuid> <name> <value>`
    pub async fn set_channel_variable(
        &self,
        uuid: &str,
        name: &str,
        value: &str,
    ) -> EslResult<ApiResponse> {
        self.send_api(&format!("uuid_setvar {} {} {}", uuid, name, value))
            .await
    }

    /// `uuid_setvar_multi <uuid> k='v';k2='v2';`
    pub async fn set_channel_variables(
        &self,
        uuid: &str,
        variables: &[(String, String)],
    ) -> EslResult<ApiResponse> {
        let assignments: String = variables
            .iter()
            .map(|(name, value)| format!("{}='{}';", name, value))
            .collect();
        self.send_api(&format!("uuid_setvar_multi {} {}", uuid, assignments))
            .await
    }

    /// Outbound-mode handshake. Returns the channel data FreeSWITCH sends back.
    pub async fn connect(&self) -> EslResult<ChannelEvent> {
        let message = self
            .round_trip(&EslCommand::Connect, ContentType::CommandReply)
            .await?;
        let channel_data = message
            .event()
            .cloned()
            .and_then(ChannelEvent::new)
            .ok_or_else(|| EslError::protocol_error("connect reply carried no channel data"))?;
        if channel_data.header(EventHeader::SocketMode) == Some("static") {
            warn!(
                "({}) [{}] Socket-Mode is static, events will not be delivered",
                self.id(),
                channel_data.uuid()
            );
        }
        if let Some(control) = channel_data.header(EventHeader::Control) {
            if control != "full" {
                debug!(
                    "({}) [{}] Control is {}, some commands are unavailable",
                    self.id(),
                    channel_data.uuid(),
                    control
                );
            }
        }
        Ok(channel_data)
    }

    /// Inbound-mode authentication.
    pub async fn auth(&self, password: &str) -> EslResult<()> {
        let reply = self
            .send_command(&EslCommand::Auth {
                password: password.to_string(),
            })
            .await?;
        if !reply.is_success() {
            return Err(EslError::auth_failed(
                reply
                    .error_message()
                    .unwrap_or("rejected"),
            ));
        }
        Ok(())
    }

    /// Invoke `callback` once, on the first `CHANNEL_HANGUP` for `uuid`.
    ///
    /// A panicking callback is logged and otherwise ignored.
    pub fn on_hangup<F>(&self, uuid: &str, callback: F)
    where
        F: FnOnce(ChannelEvent) + Send + 'static,
    {
        let leg = uuid.to_string();
        let mut hangups = self
            .channel_events()
            .filter(move |event| {
                event.uuid() == leg && event.is_event_type(EslEventType::ChannelHangup)
            });
        let cancel = self
            .inner
            .cancel
            .clone();
        let uuid = uuid.to_string();
        tokio::spawn(async move {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = hangups.recv() => event,
            };
            if let Some(event) = event {
                if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    error!("[{}] Hangup callback panicked", uuid);
                }
            }
        });
    }

    /// Send `exit` and wait up to two seconds for the disconnect notice.
    ///
    /// A missing notice is not an error.
    pub async fn exit(&self) -> EslResult<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let mut outcome = self
            .messages()
            .filter(|message| {
                matches!(
                    message.content_type(),
                    ContentType::CommandReply | ContentType::DisconnectNotice
                )
            });
        let wire = EslCommand::Exit.to_wire_format()?;
        let slot = self
            .acquire_slot()
            .await?;
        self.inner
            .connection
            .send(wire.as_bytes())
            .await?;
        let noticed = tokio::time::timeout(EXIT_NOTICE_TIMEOUT, async {
            while let Some(message) = outcome
                .recv()
                .await
            {
                match message.content_type() {
                    ContentType::DisconnectNotice => return true,
                    _ => debug!(
                        "({}) exit: {}",
                        self.id(),
                        message
                            .header(EventHeader::ReplyText)
                            .unwrap_or_default()
                    ),
                }
            }
            false
        })
        .await;
        drop(slot);
        match noticed {
            Ok(true) => debug!("({}) Disconnect notice received after exit", self.id()),
            Ok(false) => debug!("({}) Connection closed after exit", self.id()),
            Err(_) => debug!(
                "({}) No disconnect notice within {:?} of exit",
                self.id(),
                EXIT_NOTICE_TIMEOUT
            ),
        }
        Ok(())
    }

    fn on_message(&self, message: &EslMessage) {
        trace!(
            "({}) Received {} ({} headers)",
            self.id(),
            message.content_type(),
            message
                .headers()
                .len()
        );
        if message.content_type() == &ContentType::DisconnectNotice {
            match message.header(HEADER_CONTENT_DISPOSITION) {
                Some("linger") => debug!("({}) Disconnect notice in linger mode", self.id()),
                disposition => {
                    info!(
                        "({}) Disconnect notice from FreeSWITCH ({})",
                        self.id(),
                        disposition.unwrap_or("no disposition")
                    );
                    self.inner
                        .closing
                        .store(true, Ordering::Release);
                }
            }
        }
    }
}

/// Parse the chunk stream and publish every message until the connection ends.
async fn pump(
    socket: EventSocket,
    chunks: broadcast::Receiver<Bytes>,
    messages: broadcast::Sender<MessageItem>,
) {
    let id = socket.id();
    let chunks = Box::pin(futures_util::stream::unfold(chunks, move |mut rx| async move {
        loop {
            match rx
                .recv()
                .await
            {
                Ok(chunk) => return Some((chunk, rx)),
                Err(RecvError::Lagged(missed)) => {
                    error!("({}) Parser fell {} chunks behind the socket", id, missed);
                    return None;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }));
    let mut frames = std::pin::pin!(decode_stream(chunks));
    while let Some(frame) = frames
        .next()
        .await
    {
        match frame {
            Ok(message) => {
                socket.on_message(&message);
                let _ = messages.send(Ok(Arc::new(message)));
            }
            Err(e) => {
                error!("({}) {}", id, e);
                let _ = messages.send(Err(e));
                break;
            }
        }
    }
    debug!("({}) Message stream ended", id);
    drop(messages);
    socket.dispose();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resubscribes_only_when_growing() {
        let registry = SubscriptionRegistry::default();
        let first = registry
            .union(["CHANNEL_ANSWER", "CHANNEL_BRIDGE"], std::iter::empty())
            .unwrap();
        let second = first
            .union(["CHANNEL_BRIDGE", "CHANNEL_HANGUP"], std::iter::empty())
            .unwrap();
        assert_eq!(
            second
                .command()
                .to_wire_format()
                .unwrap(),
            "event plain CHANNEL_ANSWER CHANNEL_BRIDGE CHANNEL_HANGUP\n\n"
        );
        assert!(second
            .union(["channel_answer", "CHANNEL_HANGUP"], std::iter::empty())
            .is_none());
    }

    #[test]
    fn registry_union_leaves_the_original_untouched() {
        let registry = SubscriptionRegistry::default();
        assert!(registry
            .union(["DTMF"], std::iter::empty())
            .is_some());
        assert_eq!(registry, SubscriptionRegistry::default());
    }

    #[test]
    fn registry_collapses_to_all_and_keeps_custom() {
        let registry = SubscriptionRegistry::default()
            .union(["DTMF"], ["sofia::register"])
            .unwrap()
            .union(["ALL"], std::iter::empty())
            .unwrap();
        assert_eq!(
            registry
                .command()
                .to_wire_format()
                .unwrap(),
            "event plain ALL CUSTOM sofia::register\n\n"
        );
        assert!(registry
            .union(std::iter::empty(), ["sofia::register"])
            .is_none());
    }
}
