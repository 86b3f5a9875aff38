//! Call legs: state tracking, call control, bridge tracking and transfers.

pub mod basic;
pub mod state;
mod transfer;

pub use basic::{BasicChannel, PlaybackHandle};
pub use state::{AnswerState, ChannelState, HangupCause};
pub use transfer::TransferArbiter;

use crate::app::{BridgeOptions, BridgeResult};
use crate::connection::lock;
use crate::constants::{DEFAULT_LINGER_TIME, DEFAULT_RESPONSE_TIMEOUT};
use crate::error::EslResult;
use crate::event::{ChannelEvent, EslEvent, EslEventType};
use crate::headers::EventHeader;
use crate::socket::EventSocket;
use crate::subscription::Subscription;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

const BRIDGED_CHANNEL_CAPACITY: usize = 16;

/// Headers each tracked channel gets an event filter on.
const FILTER_HEADERS: [EventHeader; 3] = [
    EventHeader::UniqueId,
    EventHeader::OtherLegUniqueId,
    EventHeader::ChannelCallUuid,
];

/// The leg a [`Channel`] is currently bridged to.
#[derive(Debug, Clone)]
pub struct BridgedChannel(BasicChannel);

impl BridgedChannel {
    fn new(channel_data: ChannelEvent, socket: EventSocket) -> Self {
        Self(BasicChannel::new(channel_data, socket))
    }
}

impl Deref for BridgedChannel {
    type Target = BasicChannel;

    fn deref(&self) -> &BasicChannel {
        &self.0
    }
}

struct Shared {
    other_leg: StdMutex<Option<BridgedChannel>>,
    /// Whose filters are installed. Outlives an unbridge, so the next bridge can
    /// delete them.
    filtered_partner: StdMutex<Option<String>>,
    bridged: broadcast::Sender<BridgedChannel>,
    exit_on_hangup: AtomicBool,
    linger_time_ms: AtomicU64,
    owns_socket: bool,
    disposed: AtomicBool,
}

/// A call leg that also follows its bridges.
///
/// On top of [`BasicChannel`], a `Channel` looks up and tracks the leg it is bridged
/// to ([`other_leg`](Self::other_leg)), keeps the socket's event filters pointed at
/// that leg, and can bridge and transfer. A channel accepted from an outbound
/// connection owns its socket: after hangup it lingers, sends `exit` and closes it.
#[derive(Clone)]
pub struct Channel {
    basic: BasicChannel,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("uuid", &self.uuid())
            .field(
                "other_leg",
                &self
                    .other_leg()
                    .map(|leg| {
                        leg.uuid()
                            .to_string()
                    }),
            )
            .finish()
    }
}

impl Deref for Channel {
    type Target = BasicChannel;

    fn deref(&self) -> &BasicChannel {
        &self.basic
    }
}

impl Channel {
    /// Outbound-mode setup on a freshly accepted socket.
    ///
    /// Sends `connect` and `linger`, subscribes to the channel events the tracker needs
    /// and filters the socket down to this channel.
    pub async fn create(socket: EventSocket) -> EslResult<Self> {
        let channel_data = socket
            .connect()
            .await?;
        socket
            .linger()
            .await?
            .into_result()?;
        socket
            .subscribe_events(&[
                EslEventType::ChannelProgress,
                EslEventType::ChannelBridge,
                EslEventType::ChannelUnbridge,
                EslEventType::ChannelAnswer,
                EslEventType::ChannelHangup,
                EslEventType::ChannelHangupComplete,
                EslEventType::Dtmf,
            ])
            .await?;
        let uuid = channel_data
            .uuid()
            .to_string();
        for header in FILTER_HEADERS {
            socket
                .filter(header.as_str(), &uuid)
                .await?
                .into_result()?;
        }
        Ok(Self::build(channel_data, socket, true))
    }

    /// Track an existing channel on a socket the caller keeps ownership of.
    pub fn new(channel_data: ChannelEvent, socket: EventSocket) -> Self {
        Self::build(channel_data, socket, false)
    }

    fn build(channel_data: ChannelEvent, socket: EventSocket, owns_socket: bool) -> Self {
        let events = socket.channel_events();
        let (bridged, _) = broadcast::channel(BRIDGED_CHANNEL_CAPACITY);
        let channel = Self {
            basic: BasicChannel::new(channel_data, socket),
            shared: Arc::new(Shared {
                other_leg: StdMutex::new(None),
                filtered_partner: StdMutex::new(None),
                bridged,
                exit_on_hangup: AtomicBool::new(owns_socket),
                linger_time_ms: AtomicU64::new(duration_ms(DEFAULT_LINGER_TIME)),
                owns_socket,
                disposed: AtomicBool::new(false),
            }),
        };
        tokio::spawn(react(channel.clone(), events));
        trace!("[{}] Channel subscriptions initialized", channel.uuid());
        channel
    }

    /// The leg this channel is bridged to, if any.
    pub fn other_leg(&self) -> Option<BridgedChannel> {
        lock(&self.shared.other_leg).clone()
    }

    /// Each new bridge partner, from now on.
    pub fn bridged_channels(&self) -> broadcast::Receiver<BridgedChannel> {
        self.shared
            .bridged
            .subscribe()
    }

    pub fn exit_on_hangup(&self) -> bool {
        self.shared
            .exit_on_hangup
            .load(Ordering::Relaxed)
    }

    /// Send `exit` and close the socket after hangup. Only applies to a channel that
    /// owns its socket.
    pub fn set_exit_on_hangup(&self, exit: bool) {
        self.shared
            .exit_on_hangup
            .store(exit, Ordering::Relaxed);
    }

    pub fn linger_time(&self) -> Duration {
        Duration::from_millis(
            self.shared
                .linger_time_ms
                .load(Ordering::Relaxed),
        )
    }

    /// How long to wait after hangup before `exit`, so event subscribers can finish.
    pub fn set_linger_time(&self, linger: Duration) {
        self.shared
            .linger_time_ms
            .store(duration_ms(linger), Ordering::Relaxed);
    }

    /// Bridge to `endpoint`. Only runs when answered or pre-answered.
    ///
    /// On success, waits until the B-leg is tracked as [`other_leg`](Self::other_leg).
    pub async fn bridge_to(&self, endpoint: &str, options: &BridgeOptions) -> EslResult<BridgeResult> {
        self.bridge_with(endpoint, options, None)
            .await
    }

    /// [`bridge_to`](Self::bridge_to), calling `on_progress` on the B-leg's first
    /// `CHANNEL_PROGRESS`.
    pub async fn bridge_to_with_progress<F>(
        &self,
        endpoint: &str,
        options: &BridgeOptions,
        on_progress: F,
    ) -> EslResult<BridgeResult>
    where
        F: FnOnce(ChannelEvent) + Send + 'static,
    {
        self.bridge_with(endpoint, options, Some(Box::new(on_progress)))
            .await
    }

    async fn bridge_with(
        &self,
        endpoint: &str,
        options: &BridgeOptions,
        on_progress: Option<Box<dyn FnOnce(ChannelEvent) + Send>>,
    ) -> EslResult<BridgeResult> {
        if !self.is_answered() && !self.is_pre_answered() {
            return Ok(BridgeResult::from_event(None));
        }
        debug!("[{}] Bridging to {}", self.uuid(), endpoint);
        let mut options = options.clone();
        let origination = options
            .uuid
            .get_or_insert_with(|| {
                Uuid::new_v4().to_string()
            })
            .clone();

        let progress_done = CancellationToken::new();
        if let Some(callback) = on_progress {
            let leg = origination.clone();
            let progress = self
                .socket()
                .channel_events()
                .filter(move |event| {
                    event.uuid() == leg && event.is_event_type(EslEventType::ChannelProgress)
                });
            tokio::spawn(first_progress(progress, progress_done.clone(), callback));
        }
        let mut bridged = self.bridged_channels();

        let result = self
            .socket()
            .bridge(self.uuid(), endpoint, &options)
            .await;
        progress_done.cancel();
        let result = result?;
        debug!(
            "[{}] Bridge complete: {} {}",
            self.uuid(),
            result.success,
            result
                .response_text
                .as_deref()
                .unwrap_or_default()
        );

        if result.success {
            let wait = async {
                loop {
                    match bridged
                        .recv()
                        .await
                    {
                        Ok(leg) if leg.uuid() == origination => return,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            };
            if tokio::time::timeout(DEFAULT_RESPONSE_TIMEOUT, wait)
                .await
                .is_err()
            {
                warn!("[{}] Bridged to {} but the leg is not tracked", self.uuid(), origination);
            }
        }
        Ok(result)
    }

    /// Subscribe to `SESSION_HEARTBEAT` and enable heartbeats every `seconds`.
    /// Also runs when pre-answered.
    pub async fn enable_heartbeat(&self, seconds: u32) -> EslResult<()> {
        if !self.can_run(true) {
            return Ok(());
        }
        self.socket()
            .subscribe_events(&[EslEventType::SessionHeartbeat])
            .await?;
        self.execute("enable_heartbeat", Some(&seconds.to_string()))
            .await?;
        Ok(())
    }

    /// Dispose the channel, its tracked other leg and, if owned, the socket. Idempotent.
    pub fn dispose(&self) {
        if self
            .shared
            .disposed
            .swap(true, Ordering::AcqRel)
        {
            return;
        }
        if let Some(leg) = lock(&self.shared.other_leg).take() {
            leg.dispose();
        }
        self.basic
            .dispose();
        if self
            .shared
            .owns_socket
        {
            self.socket()
                .dispose();
        }
        debug!("[{}] Channel disposed", self.uuid());
    }

    async fn track_other_leg(&self, leg: BridgedChannel) {
        let previous = lock(&self.shared.other_leg).replace(leg.clone());
        if let Some(previous) = previous {
            previous.dispose();
        }
        let previous_uuid = lock(&self.shared.filtered_partner).replace(
            leg.uuid()
                .to_string(),
        );
        let _ = self
            .shared
            .bridged
            .send(leg.clone());
        trace!("[{}] Other leg is now [{}]", self.uuid(), leg.uuid());

        let socket = self.socket();
        if let Some(previous_uuid) = previous_uuid.filter(|p| p != leg.uuid()) {
            for header in FILTER_HEADERS {
                if let Err(e) = socket
                    .filter_delete(header.as_str(), Some(&previous_uuid))
                    .await
                {
                    error!("[{}] filter delete {} failed: {}", self.uuid(), header, e);
                }
            }
        }
        for header in FILTER_HEADERS {
            if let Err(e) = socket
                .filter(header.as_str(), leg.uuid())
                .await
            {
                error!("[{}] filter {} failed: {}", self.uuid(), header, e);
            }
        }
    }

    fn clear_other_leg(&self) {
        if let Some(leg) = lock(&self.shared.other_leg).take() {
            leg.dispose();
        }
    }

    fn other_leg_is(&self, uuid: &str) -> bool {
        lock(&self.shared.other_leg)
            .as_ref()
            .is_some_and(|leg| leg.uuid() == uuid)
    }

    /// Look up the partner of a bridge reported on our own leg.
    async fn on_bridge(&self, other: &str) {
        info!("[{}] Bridged to [{}]", self.uuid(), other);
        let response = match self
            .socket()
            .api("uuid_dump", Some(other))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("[{}] uuid_dump {} failed: {}", self.uuid(), other, e);
                return;
            }
        };
        let channel_data = match response.body() {
            Some(body) if response.is_success() && body != "+OK" => EslEvent::from_channel_dump(body)
                .ok()
                .and_then(|event| ChannelEvent::new(Arc::new(event))),
            _ => None,
        };
        match channel_data {
            Some(channel_data) => {
                let leg = BridgedChannel::new(channel_data, self.socket().clone());
                self.track_other_leg(leg)
                    .await;
            }
            None => error!(
                "[{}] Unable to get channel data from uuid_dump {}: {}",
                self.uuid(),
                other,
                response
                    .body()
                    .unwrap_or_default()
            ),
        }
    }

    /// Returns `false` once the channel is done reacting.
    async fn react_to(&self, event: ChannelEvent) -> bool {
        let own = self.uuid();
        match event.event_type() {
            Some(EslEventType::ChannelBridge) if event.uuid() == own => {
                if let Some(other) = event.other_leg_uuid() {
                    if !self.other_leg_is(other) {
                        self.on_bridge(other)
                            .await;
                    }
                }
            }
            Some(EslEventType::ChannelBridge)
                if event.other_leg_uuid() == Some(own) && !self.other_leg_is(event.uuid()) =>
            {
                info!(
                    "[{}] Bridged to [{}], reported on the other channel",
                    own,
                    event.uuid()
                );
                let leg = BridgedChannel::new(event.clone(), self.socket().clone());
                self.track_other_leg(leg)
                    .await;
            }
            Some(EslEventType::ChannelUnbridge) if event.uuid() == own => {
                // att_xfer fires an unbridge on A when B cancels, without a bridge_hangup_cause
                if let Some(cause) = event.variable("bridge_hangup_cause") {
                    info!(
                        "[{}] Unbridged from [{}] {}",
                        own,
                        event
                            .variable("last_bridge_to")
                            .unwrap_or_default(),
                        cause
                    );
                    self.clear_other_leg();
                }
            }
            Some(EslEventType::ChannelHangupComplete) if event.uuid() == own => {
                if self.shared.owns_socket && self.exit_on_hangup() {
                    self.exit_after_linger()
                        .await;
                }
                return false;
            }
            _ => {}
        }
        true
    }

    async fn exit_after_linger(&self) {
        let linger = self.linger_time();
        if !linger.is_zero() {
            debug!("[{}] Exiting in {:?}", self.uuid(), linger);
            tokio::select! {
                _ = self.socket().disposed() => {}
                _ = tokio::time::sleep(linger) => {}
            }
        }
        if self
            .socket()
            .is_connected()
        {
            info!("[{}] Exiting", self.uuid());
            if let Err(e) = self
                .socket()
                .exit()
                .await
            {
                debug!("[{}] exit failed: {}", self.uuid(), e);
            }
        }
        self.dispose();
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn react(channel: Channel, mut events: Subscription<ChannelEvent>) {
    let cancel = channel
        .socket()
        .cancellation()
        .clone();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        if !channel
            .react_to(event)
            .await
        {
            break;
        }
    }
    trace!("[{}] Channel reactions stopped", channel.uuid());
}

async fn first_progress(
    mut progress: Subscription<ChannelEvent>,
    done: CancellationToken,
    callback: Box<dyn FnOnce(ChannelEvent) + Send>,
) {
    let event = tokio::select! {
        _ = done.cancelled() => return,
        event = progress.recv() => event,
    };
    if let Some(event) = event {
        let uuid = event
            .uuid()
            .to_string();
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            error!("[{}] Progress callback panicked", uuid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_durations_saturate() {
        assert_eq!(duration_ms(Duration::from_secs(10)), 10_000);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
