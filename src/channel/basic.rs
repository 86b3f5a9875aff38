//! Per-channel state tracking and call control.

use crate::app::{
    ApplicationResult, Leg, PlayGetDigitsOptions, PlayGetDigitsResult, PlayOptions, PlayResult,
    ReadOptions, ReadResult, RecordingStatus, SayOptions,
};
use crate::channel::state::{AnswerState, ChannelState, HangupCause};
use crate::command::{ApiResponse, ExecuteOptions};
use crate::connection::lock;
use crate::constants::DEFAULT_DTMF_DURATION;
use crate::error::EslResult;
use crate::event::{ChannelEvent, EslEventType};
use crate::headers::EventHeader;
use crate::socket::EventSocket;
use crate::subscription::Subscription;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type HangupCallback = Box<dyn FnOnce(ChannelEvent) + Send>;

#[derive(Debug, Default)]
struct Recording {
    path: Option<String>,
    status: RecordingStatus,
}

struct ChannelInner {
    uuid: String,
    socket: EventSocket,
    last_event: StdMutex<ChannelEvent>,
    hangup_callback: StdMutex<Option<HangupCallback>>,
    recording: Mutex<Recording>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

/// One call leg on an event socket.
///
/// Tracks the latest event seen for its UUID. State accessors read that event on every
/// call. Call-control operations only run while the channel is answered (some also
/// when pre-answered) and the socket is connected; otherwise they return the
/// operation's default result without touching the wire.
///
/// The channel disposes itself after its `CHANNEL_HANGUP_COMPLETE`.
#[derive(Clone)]
pub struct BasicChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for BasicChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicChannel")
            .field("uuid", &self.inner.uuid)
            .field("answer_state", &self.answer_state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl BasicChannel {
    /// Start tracking the channel described by `initial` on `socket`.
    pub fn new(initial: ChannelEvent, socket: EventSocket) -> Self {
        let uuid = initial
            .uuid()
            .to_string();
        let events = channel_subscription(&socket, &uuid);
        let channel = Self {
            inner: Arc::new(ChannelInner {
                cancel: socket
                    .cancellation()
                    .child_token(),
                uuid,
                socket,
                last_event: StdMutex::new(initial),
                hangup_callback: StdMutex::new(None),
                recording: Mutex::new(Recording::default()),
                disposed: AtomicBool::new(false),
            }),
        };
        tokio::spawn(track(channel.clone(), events));
        channel
    }

    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    pub fn socket(&self) -> &EventSocket {
        &self.inner.socket
    }

    /// The most recent event seen for this channel.
    pub fn last_event(&self) -> ChannelEvent {
        lock(&self.inner.last_event).clone()
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        lock(&self.inner.last_event).channel_state()
    }

    pub fn answer_state(&self) -> Option<AnswerState> {
        lock(&self.inner.last_event).answer_state()
    }

    pub fn hangup_cause(&self) -> Option<HangupCause> {
        lock(&self.inner.last_event).hangup_cause()
    }

    pub fn other_leg_uuid(&self) -> Option<String> {
        lock(&self.inner.last_event)
            .other_leg_uuid()
            .map(str::to_string)
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<String> {
        lock(&self.inner.last_event)
            .header(name)
            .map(str::to_string)
    }

    /// Channel variable from the last event.
    pub fn variable(&self, name: &str) -> Option<String> {
        lock(&self.inner.last_event)
            .variable(name)
            .map(str::to_string)
    }

    pub fn is_answered(&self) -> bool {
        self.answer_state() == Some(AnswerState::Answered)
    }

    pub fn is_pre_answered(&self) -> bool {
        self.answer_state() == Some(AnswerState::Early)
    }

    pub fn is_bridged(&self) -> bool {
        lock(&self.inner.last_event)
            .other_leg_uuid()
            .is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner
            .disposed
            .load(Ordering::Acquire)
    }

    pub async fn recording_status(&self) -> RecordingStatus {
        self.inner
            .recording
            .lock()
            .await
            .status
    }

    /// File the channel is currently recording to.
    pub async fn recording_path(&self) -> Option<String> {
        self.inner
            .recording
            .lock()
            .await
            .path
            .clone()
    }

    /// Events for this channel, from now on.
    pub fn events(&self) -> Subscription<ChannelEvent> {
        channel_subscription(&self.inner.socket, &self.inner.uuid)
    }

    /// DTMF digits pressed on this channel, from now on.
    pub fn dtmf(&self) -> Subscription<String> {
        self.events()
            .filter_map(|event| {
                if event.is_event_type(EslEventType::Dtmf) {
                    event
                        .header(EventHeader::DtmfDigit)
                        .map(str::to_string)
                } else {
                    None
                }
            })
    }

    /// Run `callback` when the channel's `CHANNEL_HANGUP_COMPLETE` arrives. Replaces any
    /// earlier callback. A panicking callback is logged and otherwise ignored.
    pub fn on_hangup<F>(&self, callback: F)
    where
        F: FnOnce(ChannelEvent) + Send + 'static,
    {
        *lock(&self.inner.hangup_callback) = Some(Box::new(callback));
    }

    /// Stop tracking. Idempotent. Does not close the socket.
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
        debug!("[{}] Channel disposed", self.inner.uuid);
    }

    /// Resolves once the channel is disposed, by hangup or by the socket closing.
    pub async fn disposed(&self) {
        self.inner
            .cancel
            .cancelled()
            .await
    }

    pub(crate) fn can_run(&self, or_pre_answered: bool) -> bool {
        !self.is_disposed()
            && self
                .inner
                .socket
                .is_connected()
            && (self.is_answered() || (or_pre_answered && self.is_pre_answered()))
    }

    async fn execute_on(
        &self,
        uuid: &str,
        app: &str,
        args: Option<&str>,
        options: ExecuteOptions,
    ) -> EslResult<Option<ChannelEvent>> {
        self.inner
            .socket
            .execute_application(uuid, app, args, options)
            .await
    }

    async fn api(&self, command: String) -> EslResult<ApiResponse> {
        self.inner
            .socket
            .send_api(&command)
            .await
    }

    /// `uuid_kill`. Also runs when pre-answered.
    pub async fn hangup(&self, cause: HangupCause) -> EslResult<()> {
        if !self.can_run(true) {
            return Ok(());
        }
        self.api(format!("uuid_kill {} {}", self.inner.uuid, cause))
            .await?;
        Ok(())
    }

    /// Play a file on one or both legs. Also runs when pre-answered.
    ///
    /// With [`Leg::Both`] the result is the A-leg's.
    pub async fn play(&self, file: &str, options: &PlayOptions) -> EslResult<PlayResult> {
        if !self.can_run(true) {
            return Ok(PlayResult::default());
        }
        if let Some(terminators) = &options.terminators {
            if self
                .variable("playback_terminators")
                .as_deref()
                != Some(terminators.as_str())
            {
                self.set_variable("playback_terminators", terminators)
                    .await?;
            }
        }
        let execute = ExecuteOptions::default().with_loops(options.loops);
        let b_leg = self.other_leg_uuid();
        match (options.leg, b_leg) {
            (Leg::A, _) | (_, None) => {
                let event = self
                    .execute_on(&self.inner.uuid, "playback", Some(file), execute)
                    .await?;
                Ok(PlayResult::from_event(event))
            }
            (Leg::B, Some(b_leg)) => {
                let event = self
                    .execute_on(&b_leg, "playback", Some(file), execute)
                    .await?;
                Ok(PlayResult::from_event(event))
            }
            (Leg::Both, Some(b_leg)) => {
                let (a, b) = tokio::join!(
                    self.execute_on(&self.inner.uuid, "playback", Some(file), execute),
                    self.execute_on(&b_leg, "playback", Some(file), execute),
                );
                if let Err(e) = b {
                    warn!("[{}] Playback on B-leg {} failed: {}", self.inner.uuid, b_leg, e);
                }
                Ok(PlayResult::from_event(a?))
            }
        }
    }

    /// Play several files back to back via `file_string://`.
    pub async fn play_files(&self, files: &[&str], options: &PlayOptions) -> EslResult<PlayResult> {
        let file = format!("file_string://{}", files.join("!"));
        self.play(&file, options)
            .await
    }

    /// Loop a file until [`PlaybackHandle::stop`] breaks it. Also runs when pre-answered.
    pub async fn play_until_cancelled(&self, file: &str) -> EslResult<PlaybackHandle> {
        if !self.can_run(true) {
            warn!("[{}] Not playing {} on an unanswered channel", self.inner.uuid, file);
            return Ok(PlaybackHandle { channel: None });
        }
        let options = ExecuteOptions {
            event_lock: false,
            ..ExecuteOptions::default()
        }
        .with_loops(-1);
        self.inner
            .socket
            .start_application(&self.inner.uuid, "playback", Some(file), options)
            .await?;
        Ok(PlaybackHandle {
            channel: Some(self.clone()),
        })
    }

    /// `play_and_get_digits`
    pub async fn play_get_digits(
        &self,
        options: &PlayGetDigitsOptions,
    ) -> EslResult<PlayGetDigitsResult> {
        if !self.can_run(false) {
            return Ok(PlayGetDigitsResult::default());
        }
        let event = self
            .execute_on(
                &self.inner.uuid,
                "play_and_get_digits",
                Some(&options.to_args()),
                ExecuteOptions::default(),
            )
            .await?;
        Ok(PlayGetDigitsResult::from_event(event, &options.channel_variable))
    }

    /// `read`
    pub async fn read(&self, options: &ReadOptions) -> EslResult<ReadResult> {
        if !self.can_run(false) {
            return Ok(ReadResult::default());
        }
        let event = self
            .execute_on(
                &self.inner.uuid,
                "read",
                Some(&options.to_args()),
                ExecuteOptions::default(),
            )
            .await?;
        Ok(ReadResult::from_event(event, &options.channel_variable))
    }

    /// `say`
    pub async fn say(&self, options: &SayOptions) -> EslResult<ApplicationResult> {
        if !self.can_run(false) {
            return Ok(ApplicationResult::default());
        }
        self.run_app("say", Some(&options.to_args()))
            .await
    }

    /// Send DTMF tones, each `duration` long (FreeSWITCH default 2s).
    pub async fn send_dtmf(
        &self,
        digits: &str,
        duration: Option<Duration>,
    ) -> EslResult<ApplicationResult> {
        if !self.can_run(false) {
            return Ok(ApplicationResult::default());
        }
        let duration = duration.unwrap_or(DEFAULT_DTMF_DURATION);
        self.run_app(
            "send_dtmf",
            Some(&format!("{}@{}", digits, duration.as_millis())),
        )
        .await
    }

    /// Subscribe to DTMF events and start in-band detection.
    pub async fn start_detecting_inband_dtmf(&self) -> EslResult<()> {
        if !self.can_run(false) {
            return Ok(());
        }
        self.inner
            .socket
            .subscribe_events(&[EslEventType::Dtmf])
            .await?;
        self.run_app("spandsp_start_dtmf", None)
            .await?;
        Ok(())
    }

    pub async fn stop_detecting_inband_dtmf(&self) -> EslResult<()> {
        if !self.can_run(false) {
            return Ok(());
        }
        self.run_app("spandsp_stop_dtmf", None)
            .await?;
        Ok(())
    }

    /// Record the channel to `path`. A recording already running to another path is
    /// stopped first.
    pub async fn start_recording(&self, path: &str, max_seconds: Option<u32>) -> EslResult<()> {
        if !self.can_run(false) {
            return Ok(());
        }
        let mut recording = self
            .inner
            .recording
            .lock()
            .await;
        if recording
            .path
            .as_deref()
            == Some(path)
        {
            return Ok(());
        }
        if let Some(current) = recording
            .path
            .clone()
        {
            warn!(
                "[{}] Asked to record to {} while recording to {}, restarting",
                self.inner.uuid, path, current
            );
            self.api(format!("uuid_record {} stop {}", self.inner.uuid, current))
                .await?;
            recording.path = None;
            recording.status = RecordingStatus::NotRecording;
        }
        let command = match max_seconds {
            Some(limit) => format!("uuid_record {} start {} {}", self.inner.uuid, path, limit),
            None => format!("uuid_record {} start {}", self.inner.uuid, path),
        };
        self.api(command)
            .await?;
        recording.path = Some(path.to_string());
        recording.status = RecordingStatus::Recording;
        debug!("[{}] Recording to {}", self.inner.uuid, path);
        Ok(())
    }

    /// Replace recorded audio with silence until [`unmask_recording`](Self::unmask_recording).
    pub async fn mask_recording(&self) -> EslResult<()> {
        self.recording_command("mask", RecordingStatus::Paused)
            .await
    }

    pub async fn unmask_recording(&self) -> EslResult<()> {
        self.recording_command("unmask", RecordingStatus::Recording)
            .await
    }

    pub async fn stop_recording(&self) -> EslResult<()> {
        self.recording_command("stop", RecordingStatus::NotRecording)
            .await
    }

    async fn recording_command(&self, action: &str, next: RecordingStatus) -> EslResult<()> {
        if !self.can_run(false) {
            return Ok(());
        }
        let mut recording = self
            .inner
            .recording
            .lock()
            .await;
        let Some(path) = recording
            .path
            .clone()
        else {
            warn!("[{}] Cannot {} recording, not recording", self.inner.uuid, action);
            return Ok(());
        };
        self.api(format!("uuid_record {} {} {}", self.inner.uuid, action, path))
            .await?;
        if next == RecordingStatus::NotRecording {
            recording.path = None;
        }
        recording.status = next;
        debug!("[{}] Recording to {}: {}", self.inner.uuid, path, action);
        Ok(())
    }

    pub async fn hold_toggle(&self) -> EslResult<()> {
        self.hold("toggle ")
            .await
    }

    pub async fn hold_on(&self) -> EslResult<()> {
        self.hold("")
            .await
    }

    pub async fn hold_off(&self) -> EslResult<()> {
        self.hold("off ")
            .await
    }

    async fn hold(&self, mode: &str) -> EslResult<()> {
        if !self.can_run(false) {
            return Ok(());
        }
        self.api(format!("uuid_hold {}{}", mode, self.inner.uuid))
            .await?;
        Ok(())
    }

    async fn run_app(&self, app: &str, args: Option<&str>) -> EslResult<ApplicationResult> {
        let event = self
            .execute_on(&self.inner.uuid, app, args, ExecuteOptions::default())
            .await?;
        Ok(ApplicationResult::from_event(event))
    }

    pub async fn answer(&self) -> EslResult<ApplicationResult> {
        self.run_app("answer", None)
            .await
    }

    pub async fn pre_answer(&self) -> EslResult<ApplicationResult> {
        self.run_app("pre_answer", None)
            .await
    }

    pub async fn ring_ready(&self) -> EslResult<ApplicationResult> {
        self.run_app("ring_ready", None)
            .await
    }

    pub async fn park(&self) -> EslResult<ApplicationResult> {
        self.run_app("park", None)
            .await
    }

    pub async fn sleep(&self, duration: Duration) -> EslResult<ApplicationResult> {
        self.run_app("sleep", Some(&duration.as_millis().to_string()))
            .await
    }

    /// Run any dialplan application on this channel.
    pub async fn execute(&self, app: &str, args: Option<&str>) -> EslResult<ApplicationResult> {
        self.run_app(app, args)
            .await
    }

    /// `uuid_setvar`
    pub async fn set_variable(&self, name: &str, value: &str) -> EslResult<ApiResponse> {
        debug!("[{}] Setting {}={}", self.inner.uuid, name, value);
        self.inner
            .socket
            .set_channel_variable(&self.inner.uuid, name, value)
            .await
    }

    /// Send `exit` on the socket.
    pub async fn exit(&self) -> EslResult<()> {
        self.inner
            .socket
            .exit()
            .await
    }

    fn observe(&self, event: ChannelEvent) -> bool {
        *lock(&self.inner.last_event) = event.clone();
        match event.event_type() {
            Some(EslEventType::ChannelAnswer) => {
                info!("[{}] Channel answered", self.inner.uuid);
                false
            }
            Some(EslEventType::ChannelHangupComplete) => {
                info!(
                    "[{}] Hangup detected [{}]",
                    self.inner.uuid,
                    event
                        .hangup_cause()
                        .map(|c| c.as_str())
                        .unwrap_or("UNKNOWN")
                );
                let callback = lock(&self.inner.hangup_callback).take();
                if let Some(callback) = callback {
                    if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                        error!("[{}] Hangup callback panicked", self.inner.uuid);
                    }
                }
                true
            }
            _ => false,
        }
    }
}

fn channel_subscription(socket: &EventSocket, uuid: &str) -> Subscription<ChannelEvent> {
    let uuid = uuid.to_string();
    socket
        .channel_events()
        .filter(move |event| event.uuid() == uuid)
}

async fn track(channel: BasicChannel, mut events: Subscription<ChannelEvent>) {
    let cancel = channel
        .inner
        .cancel
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
        if channel.observe(event) {
            break;
        }
    }
    channel.dispose();
}

/// A `playback` started by [`BasicChannel::play_until_cancelled`].
#[derive(Debug)]
pub struct PlaybackHandle {
    channel: Option<BasicChannel>,
}

impl PlaybackHandle {
    /// Interrupt the playback with `uuid_break`. Failures are logged.
    pub async fn stop(self) {
        let Some(channel) = self.channel else {
            return;
        };
        if !channel.can_run(true) {
            return;
        }
        if let Err(e) = channel
            .api(format!("uuid_break {}", channel.uuid()))
            .await
        {
            error!("[{}] uuid_break failed: {}", channel.uuid(), e);
        }
    }
}
