//! INVITE dialog sessions.
//!
//! One [`InviteSession`] covers one media dialog end to end: the INVITE
//! offer/answer, the ACK, mid-dialog playback controls over INFO
//! (see [`control`]), and teardown by BYE or CANCEL. The SIP layer names
//! an established dialog only by an opaque handle, so live sessions are
//! registered in a [`DialogRegistry`] and deregistered at terminal status.

pub mod control;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use gblink_core::sdp::SessionDescription;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SignalingConfig;
use crate::errors::{DialogError, DialogResult};
use crate::sip::{DialogHandle, SipAccess};
use crate::ssrc::SsrcAllocator;

pub use control::ControlHandler;

/// Invite tickets are process-unique and only meaningful to `cancel_invite`.
/// The base is randomized so tickets from a restarted process never collide
/// with ones a SIP stack may still be holding.
fn next_ticket() -> u64 {
    static BASE: OnceLock<u64> = OnceLock::new();
    static OFFSET: AtomicU64 = AtomicU64::new(0);
    let base = *BASE.get_or_init(|| u64::from(rand::random::<u32>()) << 20);
    base + OFFSET.fetch_add(1, Ordering::Relaxed)
}

/// Dialog lifecycle. Ordered so "is terminal" is one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InviteStatus {
    /// Created, offer not yet answered.
    Invite,
    /// Offer sent (or answered locally), waiting for the final step.
    Trying,
    /// Dialog confirmed by ACK.
    Ack,
    Bye,
    Cancel,
    Failed,
}

impl InviteStatus {
    pub fn is_terminal(&self) -> bool {
        *self > InviteStatus::Ack
    }
}

/// The application's answer to an inbound invite.
pub enum InviteDecision {
    /// Answer 200 with this local description.
    Accept(SessionDescription),
    /// Answer with this failure code.
    Reject(u16),
}

/// Process-wide handle → session table for in-dialog routing.
#[derive(Default)]
pub struct DialogRegistry {
    sessions: DashMap<DialogHandle, Arc<InviteSession>>,
}

impl DialogRegistry {
    pub fn resolve(&self, dialog: DialogHandle) -> Option<Arc<InviteSession>> {
        self.sessions.get(&dialog).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub(crate) fn insert(&self, dialog: DialogHandle, session: Arc<InviteSession>) {
        self.sessions.insert(dialog, session);
    }

    pub(crate) fn remove(&self, dialog: DialogHandle) {
        self.sessions.remove(&dialog);
    }

    /// Take every live session out of the table, for shutdown.
    pub(crate) fn drain(&self) -> Vec<Arc<InviteSession>> {
        let handles: Vec<DialogHandle> = self.sessions.iter().map(|entry| *entry.key()).collect();
        handles
            .into_iter()
            .filter_map(|handle| self.sessions.remove(&handle).map(|(_, session)| session))
            .collect()
    }
}

type StatusCallback = Box<dyn Fn(InviteStatus, Option<&str>) + Send>;

#[derive(Debug, Default)]
struct InviteTimes {
    created: Option<Instant>,
    confirmed: Option<Instant>,
    terminated: Option<Instant>,
}

/// One media signaling dialog.
pub struct InviteSession {
    sip: Arc<dyn SipAccess>,
    config: SignalingConfig,
    registry: Arc<DialogRegistry>,
    ssrc: Arc<SsrcAllocator>,
    peer_id: String,
    device_id: String,
    subject: Option<String>,
    ticket: u64,
    local_sdp: Mutex<Option<SessionDescription>>,
    remote_sdp: Mutex<Option<SessionDescription>>,
    dialog: Mutex<Option<DialogHandle>>,
    status: Mutex<InviteStatus>,
    cseq: AtomicU32,
    error: Mutex<Option<String>>,
    times: Mutex<InviteTimes>,
    on_status: Mutex<Option<StatusCallback>>,
    on_control: Mutex<Option<ControlHandler>>,
}

impl InviteSession {
    /// Create an outbound session; the offer is sent by [`invite`](Self::invite).
    pub fn outbound(
        sip: Arc<dyn SipAccess>,
        config: SignalingConfig,
        registry: Arc<DialogRegistry>,
        ssrc: Arc<SsrcAllocator>,
        peer_id: impl Into<String>,
        device_id: impl Into<String>,
        subject: Option<String>,
        local_sdp: SessionDescription,
    ) -> Arc<InviteSession> {
        Arc::new(InviteSession {
            sip,
            config,
            registry,
            ssrc,
            peer_id: peer_id.into(),
            device_id: device_id.into(),
            subject,
            ticket: next_ticket(),
            local_sdp: Mutex::new(Some(local_sdp)),
            remote_sdp: Mutex::new(None),
            dialog: Mutex::new(None),
            status: Mutex::new(InviteStatus::Invite),
            cseq: AtomicU32::new(1),
            error: Mutex::new(None),
            times: Mutex::new(InviteTimes { created: Some(Instant::now()), ..Default::default() }),
            on_status: Mutex::new(None),
            on_control: Mutex::new(None),
        })
    }

    /// Wrap an inbound invite that already carries a dialog handle and a
    /// parsed remote offer.
    pub fn inbound(
        sip: Arc<dyn SipAccess>,
        config: SignalingConfig,
        registry: Arc<DialogRegistry>,
        ssrc: Arc<SsrcAllocator>,
        peer_id: impl Into<String>,
        dialog: DialogHandle,
        remote_sdp: SessionDescription,
    ) -> Arc<InviteSession> {
        let device_id = remote_sdp.origin.owner.clone();
        let session = Arc::new(InviteSession {
            sip,
            config,
            registry,
            ssrc,
            peer_id: peer_id.into(),
            device_id,
            subject: None,
            ticket: next_ticket(),
            local_sdp: Mutex::new(None),
            remote_sdp: Mutex::new(Some(remote_sdp)),
            dialog: Mutex::new(Some(dialog)),
            status: Mutex::new(InviteStatus::Invite),
            cseq: AtomicU32::new(1),
            error: Mutex::new(None),
            times: Mutex::new(InviteTimes { created: Some(Instant::now()), ..Default::default() }),
            on_status: Mutex::new(None),
            on_control: Mutex::new(None),
        });
        session.registry.insert(dialog, session.clone());
        session
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn status(&self) -> InviteStatus {
        *self.status.lock()
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn dialog(&self) -> Option<DialogHandle> {
        *self.dialog.lock()
    }

    pub fn local_sdp(&self) -> Option<SessionDescription> {
        self.local_sdp.lock().clone()
    }

    pub fn remote_sdp(&self) -> Option<SessionDescription> {
        self.remote_sdp.lock().clone()
    }

    pub fn set_status_callback(&self, callback: impl Fn(InviteStatus, Option<&str>) + Send + 'static) {
        *self.on_status.lock() = Some(Box::new(callback));
    }

    /// Handler for inbound PLAY/PAUSE controls.
    pub fn set_control_handler(&self, handler: ControlHandler) {
        *self.on_control.lock() = Some(handler);
    }

    pub(crate) fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::Relaxed)
    }

    /// Send the offer and drive the answer into the dialog.
    ///
    /// Assigns an SSRC to the local description if it has none, using the
    /// playback offset for Playback/Download sessions. A 2xx answer with a
    /// parseable SDP is ACKed and confirms the dialog; any failure tears
    /// the attempt down defensively and lands in `Failed`.
    pub async fn invite(self: &Arc<Self>) -> DialogResult<SessionDescription> {
        if self.status() != InviteStatus::Invite {
            return Err(DialogError::invalid_state("invite already sent"));
        }
        let body = {
            let mut guard = self.local_sdp.lock();
            let sdp = guard
                .as_mut()
                .ok_or_else(|| DialogError::invalid_state("no local session description"))?;
            if sdp.ssrc.is_none() {
                sdp.ssrc = Some(self.ssrc.allocate(sdp.session_type.is_playback()));
            }
            sdp.generate()
        };
        self.set_status(InviteStatus::Trying, None);
        debug!(peer = %self.peer_id, device = %self.device_id, "sending invite");

        let outcome = self
            .sip
            .send_invite(self.ticket, &self.peer_id, self.subject.as_deref(), body)
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                let reason = format!("invite transport failure: {err}");
                self.abort(&reason).await;
                return Err(DialogError::transport(reason));
            }
        };
        if !(200..300).contains(&outcome.code) {
            let reason = format!("invite rejected with {}", outcome.code);
            self.abort(&reason).await;
            return Err(DialogError::rejected(outcome.code, reason));
        }

        let remote = match outcome.body.as_deref().map(SessionDescription::parse) {
            Some(Ok(remote)) => remote,
            Some(Err(err)) => {
                let reason = format!("answer SDP unusable: {err}");
                self.abort(&reason).await;
                return Err(DialogError::protocol(reason));
            }
            None => {
                let reason = "2xx answer without SDP".to_string();
                self.abort(&reason).await;
                return Err(DialogError::protocol(reason));
            }
        };
        let dialog = match outcome.dialog {
            Some(dialog) => dialog,
            None => {
                let reason = "2xx answer without a dialog".to_string();
                self.abort(&reason).await;
                return Err(DialogError::protocol(reason));
            }
        };

        // A crossed cancel or bye may have terminated the session while the
        // answer was in flight. The dialog is committed under the status
        // lock, ordering it against `finish`: a terminal session is never
        // re-registered, and a later `finish` sees the dialog to remove.
        let committed = {
            let status = self.status.lock();
            if status.is_terminal() {
                false
            } else {
                *self.dialog.lock() = Some(dialog);
                self.registry.insert(dialog, self.clone());
                true
            }
        };
        if !committed {
            // The remote end did establish the dialog; take it straight down.
            let _ = self.sip.send_bye(dialog).await;
            return Err(DialogError::invalid_state("session ended while the invite was in flight"));
        }
        if let Err(err) = self.sip.send_ack(dialog).await {
            let reason = format!("ack failed: {err}");
            self.abort(&reason).await;
            return Err(DialogError::transport(reason));
        }

        *self.remote_sdp.lock() = Some(remote.clone());
        self.times.lock().confirmed = Some(Instant::now());
        self.set_status(InviteStatus::Ack, None);
        info!(peer = %self.peer_id, device = %self.device_id, dialog, "dialog established");
        Ok(remote)
    }

    /// Answer an inbound invite with 200 and the local description, then
    /// wait for the ACK under the configured deadline.
    pub async fn accept(self: &Arc<Self>, mut local: SessionDescription) -> DialogResult<()> {
        let dialog = self
            .dialog()
            .ok_or_else(|| DialogError::invalid_state("no dialog to accept"))?;
        if self.status() != InviteStatus::Invite {
            return Err(DialogError::invalid_state("invite already answered"));
        }
        if local.ssrc.is_none() {
            local.ssrc = Some(self.ssrc.allocate(local.session_type.is_playback()));
        }
        let body = local.generate();
        *self.local_sdp.lock() = Some(local);

        self.sip
            .reply(dialog, 200, Some(body))
            .await
            .map_err(|err| DialogError::transport(format!("200 answer failed: {err}")))?;
        self.set_status(InviteStatus::Trying, None);
        self.arm_ack_deadline();
        Ok(())
    }

    /// Refuse an inbound invite.
    pub async fn reject(self: &Arc<Self>, code: u16) -> DialogResult<()> {
        let dialog = self
            .dialog()
            .ok_or_else(|| DialogError::invalid_state("no dialog to reject"))?;
        if self.status() != InviteStatus::Invite {
            return Err(DialogError::invalid_state("invite already answered"));
        }
        let _ = self.sip.reply(dialog, code, None).await;
        self.finish(InviteStatus::Failed, Some(format!("rejected locally with {code}")));
        Ok(())
    }

    fn arm_ack_deadline(self: &Arc<Self>) {
        let weak: Weak<InviteSession> = Arc::downgrade(self);
        let wait = self.config.ack_wait;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(session) = weak.upgrade() {
                if session.status() == InviteStatus::Trying {
                    warn!(peer = %session.peer_id, "no ack within deadline");
                    let _ = session.bye("wait ack timeout").await;
                }
            }
        });
    }

    /// The ACK arrived for an answered inbound invite.
    pub fn on_ack(&self) {
        if self.status() == InviteStatus::Trying {
            self.times.lock().confirmed = Some(Instant::now());
            self.set_status(InviteStatus::Ack, None);
        }
    }

    /// The peer ended the dialog.
    pub fn on_bye(&self) {
        self.finish(InviteStatus::Bye, Some("peer bye".to_string()));
    }

    /// The peer canceled its pending invite.
    pub fn on_cancel(&self) {
        self.finish(InviteStatus::Cancel, Some("peer cancel".to_string()));
    }

    /// End the dialog. Cancels the in-flight invite when no dialog was
    /// ever established, sends BYE otherwise. A no-op once terminal.
    pub async fn bye(self: &Arc<Self>, reason: &str) -> DialogResult<()> {
        if self.status().is_terminal() {
            return Ok(());
        }
        let dialog = self.dialog();
        match dialog {
            None => {
                if let Err(err) = self.sip.cancel_invite(self.ticket).await {
                    warn!(peer = %self.peer_id, %err, "cancel failed");
                }
                self.finish(InviteStatus::Cancel, Some(reason.to_string()));
            }
            Some(dialog) => {
                if let Err(err) = self.sip.send_bye(dialog).await {
                    warn!(peer = %self.peer_id, dialog, %err, "bye failed");
                }
                self.finish(InviteStatus::Bye, Some(reason.to_string()));
            }
        }
        Ok(())
    }

    /// Failure path: signal the peer like `bye` but land in `Failed`.
    async fn abort(self: &Arc<Self>, reason: &str) {
        match self.dialog() {
            None => {
                let _ = self.sip.cancel_invite(self.ticket).await;
            }
            Some(dialog) => {
                let _ = self.sip.send_bye(dialog).await;
            }
        }
        self.finish(InviteStatus::Failed, Some(reason.to_string()));
    }

    /// Terminal transition: record, deregister, notify. Sticky.
    fn finish(&self, status: InviteStatus, reason: Option<String>) {
        {
            let mut current = self.status.lock();
            if current.is_terminal() {
                return;
            }
            *current = status;
        }
        debug_assert!(status.is_terminal());
        self.times.lock().terminated = Some(Instant::now());
        *self.error.lock() = reason.clone();
        if let Some(dialog) = self.dialog() {
            self.registry.remove(dialog);
        }
        debug!(peer = %self.peer_id, ?status, reason = reason.as_deref().unwrap_or(""), "dialog finished");
        if let Some(callback) = self.on_status.lock().as_ref() {
            callback(status, reason.as_deref());
        }
    }

    /// Non-terminal transition. Terminal states are sticky; only `finish`
    /// sets them, and nothing overwrites them afterwards.
    fn set_status(&self, status: InviteStatus, reason: Option<&str>) {
        {
            let mut current = self.status.lock();
            if current.is_terminal() {
                return;
            }
            *current = status;
        }
        if let Some(callback) = self.on_status.lock().as_ref() {
            callback(status, reason);
        }
    }
}

impl Drop for InviteSession {
    fn drop(&mut self) {
        // Last owner going away with the dialog still up: send an implicit
        // bye so the peer does not keep streaming into the void.
        if !self.status.lock().is_terminal() {
            if let Some(dialog) = *self.dialog.lock() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let sip = self.sip.clone();
                    handle.spawn(async move {
                        let _ = sip.send_bye(dialog).await;
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for InviteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteSession")
            .field("peer", &self.peer_id)
            .field("device", &self.device_id)
            .field("status", &self.status())
            .field("dialog", &self.dialog())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_sit_after_ack() {
        assert!(!InviteStatus::Invite.is_terminal());
        assert!(!InviteStatus::Trying.is_terminal());
        assert!(!InviteStatus::Ack.is_terminal());
        assert!(InviteStatus::Bye.is_terminal());
        assert!(InviteStatus::Cancel.is_terminal());
        assert!(InviteStatus::Failed.is_terminal());
    }
}
