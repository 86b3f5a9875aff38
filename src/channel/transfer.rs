//! Attended transfer arbitration.
//!
//! `att_xfer` runs on our leg (B) while the party being transferred (A) waits. The
//! outcome is not reported by any single event, so it is decided from the interleaving
//! of hangups, answers and bridges on A, B and the new destination (C), plus the
//! application's completion event on B.

use super::Channel;
use crate::app::{AttendedTransferResult, AttendedTransferStatus};
use crate::channel::state::HangupCause;
use crate::command::ExecuteOptions;
use crate::error::{EslError, EslResult};
use crate::event::{ChannelEvent, EslEventType};
use crate::headers::EventHeader;
use tracing::{debug, warn};

const ATT_XFER: &str = "att_xfer";

/// Decides an attended transfer from channel events, in arrival order.
///
/// The first satisfied outcome wins and later events are ignored:
///
/// 1. A hangs up: failed with A's hangup cause.
/// 2. `att_xfer` completes with an `originate_disposition` other than `SUCCESS`:
///    failed with that disposition.
/// 3. C answered, C hung up, and `att_xfer` completed successfully with a
///    `NORMAL_CLEARING` bridge cause: failed with `NORMAL_CLEARING` (C rang off).
/// 4. `att_xfer` completes with `xfer_uuids` set: three-way.
/// 5. C answered, B hung up, and C bridged to A: transferred.
/// 6. B hung up, C answered, and A bridged to someone other than B: transferred.
#[derive(Debug, Clone)]
pub struct TransferArbiter {
    a_leg: String,
    b_leg: String,
    c_answered: bool,
    c_hung_up: bool,
    b_hung_up: bool,
    c_bridged_to_a: bool,
    a_bridged_elsewhere: bool,
    rang_off_completion: bool,
    settled: bool,
}

impl TransferArbiter {
    pub fn new(a_leg: impl Into<String>, b_leg: impl Into<String>) -> Self {
        Self {
            a_leg: a_leg.into(),
            b_leg: b_leg.into(),
            c_answered: false,
            c_hung_up: false,
            b_hung_up: false,
            c_bridged_to_a: false,
            a_bridged_elsewhere: false,
            rang_off_completion: false,
            settled: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Feed one event; returns the result the first time an outcome is reached.
    pub fn observe(&mut self, event: &ChannelEvent) -> Option<AttendedTransferResult> {
        if self.settled {
            return None;
        }
        let result = self.decide(event);
        if result.is_some() {
            self.settled = true;
        }
        result
    }

    fn is_c_leg(&self, uuid: &str) -> bool {
        uuid != self.a_leg && uuid != self.b_leg
    }

    fn decide(&mut self, event: &ChannelEvent) -> Option<AttendedTransferResult> {
        let uuid = event.uuid();
        match event.event_type()? {
            EslEventType::ChannelHangup if uuid == self.a_leg => {
                debug!("Att xfer: A-leg [{}] hung up", uuid);
                return Some(AttendedTransferResult::failed(event.hangup_cause()));
            }
            EslEventType::ChannelHangup if uuid == self.b_leg => {
                debug!("Att xfer: B-leg [{}] hung up", uuid);
                self.b_hung_up = true;
            }
            EslEventType::ChannelHangup => {
                debug!("Att xfer: C-leg [{}] hung up", uuid);
                self.c_hung_up = true;
            }
            EslEventType::ChannelAnswer if self.is_c_leg(uuid) => {
                debug!("Att xfer: C-leg [{}] answered", uuid);
                self.c_answered = true;
            }
            EslEventType::ChannelBridge if uuid == self.a_leg => {
                if event.other_leg_uuid() != Some(self.b_leg.as_str()) {
                    debug!("Att xfer: A-leg bridged to [{:?}]", event.other_leg_uuid());
                    self.a_bridged_elsewhere = true;
                }
            }
            EslEventType::ChannelBridge if self.is_c_leg(uuid) => {
                if event.other_leg_uuid() == Some(self.a_leg.as_str()) {
                    debug!("Att xfer: C-leg [{}] bridged to A-leg", uuid);
                    self.c_bridged_to_a = true;
                }
            }
            EslEventType::ChannelExecuteComplete
                if uuid == self.b_leg && event.header(EventHeader::Application) == Some(ATT_XFER) =>
            {
                if let Some(result) = self.on_completion(event) {
                    return Some(result);
                }
            }
            _ => return None,
        }
        self.joined_outcome()
    }

    fn on_completion(&mut self, event: &ChannelEvent) -> Option<AttendedTransferResult> {
        let disposition = event.variable("originate_disposition");
        if disposition != Some("SUCCESS") {
            debug!("Att xfer: not answered ({:?})", disposition);
            return Some(AttendedTransferResult::failed(disposition.and_then(|d| {
                d.parse::<HangupCause>()
                    .ok()
            })));
        }
        if event.variable("att_xfer_result") == Some("success")
            && event.variable("last_bridge_hangup_cause") == Some("NORMAL_CLEARING")
        {
            self.rang_off_completion = true;
        }
        if self.rang_off_completion && self.c_answered && self.c_hung_up {
            return self.joined_outcome();
        }
        if event
            .variable("xfer_uuids")
            .is_some_and(|uuids| !uuids.is_empty())
        {
            debug!("Att xfer: three-way");
            return Some(AttendedTransferResult::threeway());
        }
        None
    }

    fn joined_outcome(&self) -> Option<AttendedTransferResult> {
        if self.c_answered && self.c_hung_up && self.rang_off_completion {
            debug!("Att xfer: rejected after C-leg hung up");
            return Some(AttendedTransferResult::failed(Some(HangupCause::NormalClearing)));
        }
        if self.c_answered && self.b_hung_up && self.c_bridged_to_a {
            debug!("Att xfer: transferred, C-leg bridged to A-leg");
            return Some(AttendedTransferResult::transferred());
        }
        if self.b_hung_up && self.c_answered && self.a_bridged_elsewhere {
            debug!("Att xfer: transferred, A-leg bridged after B-leg hung up");
            return Some(AttendedTransferResult::transferred());
        }
        None
    }
}

impl Channel {
    /// Attended transfer of our other leg to `endpoint` via `att_xfer`.
    ///
    /// Needs a bridged other leg; without one the result is failed with no cause.
    pub async fn attended_transfer(&self, endpoint: &str) -> EslResult<AttendedTransferResult> {
        let Some(a_leg) = self.other_leg_uuid() else {
            warn!("[{}] Attended transfer without an other leg", self.uuid());
            return Ok(AttendedTransferResult::failed(None));
        };
        let socket = self.socket();
        socket
            .subscribe_events(&[
                EslEventType::ChannelHangup,
                EslEventType::ChannelAnswer,
                EslEventType::ChannelBridge,
                EslEventType::ChannelExecuteComplete,
            ])
            .await?;

        debug!("[{}] Att xfer starting, A-leg [{}] to {}", self.uuid(), a_leg, endpoint);
        let mut arbiter = TransferArbiter::new(a_leg, self.uuid());
        let mut events = socket.channel_events();
        match socket
            .start_application(self.uuid(), ATT_XFER, Some(endpoint), ExecuteOptions::detached())
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(AttendedTransferResult::aborted()),
            Err(EslError::Cancelled) => return Ok(AttendedTransferResult::failed(None)),
            Err(e) => return Err(e),
        }

        let cancel = socket
            .cancellation()
            .clone();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return Ok(AttendedTransferResult::failed(None));
            };
            if let Some(result) = arbiter.observe(&event) {
                if result.status == AttendedTransferStatus::Failed {
                    debug!("[{}] Att xfer failed: {:?}", self.uuid(), result.hangup_cause);
                }
                return Ok(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EslEvent;
    use crate::headers::HeaderMap;
    use std::sync::Arc;

    fn event(name: &str, uuid: &str, extra: &[(&str, &str)]) -> ChannelEvent {
        let mut headers: HeaderMap = extra
            .iter()
            .copied()
            .collect();
        headers.insert("Event-Name", name);
        headers.insert("Unique-ID", uuid);
        ChannelEvent::new(Arc::new(EslEvent::from_parts(headers, None).unwrap())).unwrap()
    }

    fn completion(vars: &[(&str, &str)]) -> ChannelEvent {
        let mut extra = vec![("Application", "att_xfer")];
        extra.extend_from_slice(vars);
        event("CHANNEL_EXECUTE_COMPLETE", "b", &extra)
    }

    fn run(script: &[ChannelEvent]) -> Option<AttendedTransferResult> {
        let mut arbiter = TransferArbiter::new("a", "b");
        script
            .iter()
            .find_map(|e| arbiter.observe(e))
    }

    #[test]
    fn c_answering_then_ringing_off_is_a_failure() {
        let result = run(&[
            event("CHANNEL_ANSWER", "c", &[]),
            event("CHANNEL_HANGUP", "c", &[("Hangup-Cause", "NORMAL_CLEARING")]),
            completion(&[
                ("variable_originate_disposition", "SUCCESS"),
                ("variable_att_xfer_result", "success"),
                ("variable_last_bridge_hangup_cause", "NORMAL_CLEARING"),
            ]),
        ])
        .unwrap();
        assert_eq!(result.status, AttendedTransferStatus::Failed);
        assert_eq!(result.hangup_cause, Some(HangupCause::NormalClearing));
    }

    #[test]
    fn a_leg_hangup_wins_immediately() {
        let result = run(&[
            event("CHANNEL_ANSWER", "c", &[]),
            event("CHANNEL_HANGUP", "a", &[("Hangup-Cause", "ORIGINATOR_CANCEL")]),
            event("CHANNEL_HANGUP", "b", &[]),
        ])
        .unwrap();
        assert_eq!(result, AttendedTransferResult::failed(Some(HangupCause::OriginatorCancel)));
    }

    #[test]
    fn unanswered_destination_reports_disposition() {
        let result = run(&[completion(&[("variable_originate_disposition", "USER_BUSY")])]).unwrap();
        assert_eq!(result, AttendedTransferResult::failed(Some(HangupCause::UserBusy)));
    }

    #[test]
    fn xfer_uuids_means_threeway() {
        let result = run(&[
            event("CHANNEL_ANSWER", "c", &[]),
            completion(&[
                ("variable_originate_disposition", "SUCCESS"),
                ("variable_xfer_uuids", "c a"),
            ]),
        ])
        .unwrap();
        assert_eq!(result.status, AttendedTransferStatus::Threeway);
    }

    #[test]
    fn c_bridging_to_a_after_b_hangs_up_is_transferred() {
        let result = run(&[
            event("CHANNEL_ANSWER", "c", &[]),
            event("CHANNEL_HANGUP", "b", &[]),
            event("CHANNEL_BRIDGE", "c", &[("Other-Leg-Unique-ID", "a")]),
        ])
        .unwrap();
        assert_eq!(result.status, AttendedTransferStatus::Transferred);
    }

    #[test]
    fn a_bridging_elsewhere_after_b_hangs_up_is_transferred() {
        let result = run(&[
            event("CHANNEL_HANGUP", "b", &[]),
            event("CHANNEL_ANSWER", "c", &[]),
            event("CHANNEL_BRIDGE", "a", &[("Other-Leg-Unique-ID", "c")]),
        ])
        .unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn incomplete_joins_do_not_settle() {
        assert!(run(&[
            event("CHANNEL_ANSWER", "c", &[]),
            event("CHANNEL_BRIDGE", "a", &[("Other-Leg-Unique-ID", "b")]),
            event("CHANNEL_HANGUP", "c", &[]),
        ])
        .is_none());
    }

    #[test]
    fn settles_once() {
        let mut arbiter = TransferArbiter::new("a", "b");
        assert!(arbiter
            .observe(&event("CHANNEL_HANGUP", "a", &[]))
            .is_some());
        assert!(arbiter.is_settled());
        assert!(arbiter
            .observe(&completion(&[("variable_xfer_uuids", "x")]))
            .is_none());
    }
}
