//! SUBSCRIBE/NOTIFY sessions.
//!
//! A [`Subscription`] tracks one subscribe relationship in either role:
//! outbound (we subscribe to a peer and keep the subscription renewed) or
//! inbound (a peer subscribed to us and we push NOTIFYs). Renewal fires
//! ahead of expiry by the configured margin, and an inbound NOTIFY whose
//! `expires` outruns our bookkeeping reschedules the renewal instead of
//! wasting a round-trip.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use gblink_core::charset::Transcoder;
use gblink_core::Message;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SignalingConfig;
use crate::errors::{DialogError, DialogResult};
use crate::peer::Peer;
use crate::sip::{SipAccess, SubscribeHandle};
use crate::transaction::RequestProxy;

/// Subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeStatus {
    Active,
    Pending,
    Terminated,
}

/// Why a subscription ended (RFC 3265 reason tokens).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    Deactivated,
    Timeout,
    Rejected,
    NoResource,
    Probation,
    GiveUp,
    Expired,
    Invariant,
    Invalid,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateReason::Deactivated => "deactivated",
            TerminateReason::Timeout => "timeout",
            TerminateReason::Rejected => "rejected",
            TerminateReason::NoResource => "noresource",
            TerminateReason::Probation => "probation",
            TerminateReason::GiveUp => "giveup",
            TerminateReason::Expired => "expired",
            TerminateReason::Invariant => "invariant",
            TerminateReason::Invalid => "invalid",
        }
    }

    pub fn from_token(token: &str) -> TerminateReason {
        match token {
            "deactivated" => TerminateReason::Deactivated,
            "timeout" => TerminateReason::Timeout,
            "rejected" => TerminateReason::Rejected,
            "noresource" => TerminateReason::NoResource,
            "probation" => TerminateReason::Probation,
            "giveup" => TerminateReason::GiveUp,
            "expired" => TerminateReason::Expired,
            "invariant" => TerminateReason::Invariant,
            _ => TerminateReason::Invalid,
        }
    }
}

/// Process-wide handle → subscription table for NOTIFY routing.
#[derive(Default)]
pub struct SubscribeRegistry {
    sessions: DashMap<SubscribeHandle, Arc<Subscription>>,
}

impl SubscribeRegistry {
    pub fn resolve(&self, handle: SubscribeHandle) -> Option<Arc<Subscription>> {
        self.sessions.get(&handle).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub(crate) fn insert(&self, handle: SubscribeHandle, session: Arc<Subscription>) {
        self.sessions.insert(handle, session);
    }

    pub(crate) fn remove(&self, handle: SubscribeHandle) {
        self.sessions.remove(&handle);
    }

    /// Take every live session out of the table, for shutdown.
    pub(crate) fn drain(&self) -> Vec<Arc<Subscription>> {
        let handles: Vec<SubscribeHandle> =
            self.sessions.iter().map(|entry| *entry.key()).collect();
        handles
            .into_iter()
            .filter_map(|handle| self.sessions.remove(&handle).map(|(_, session)| session))
            .collect()
    }
}

type NotifyCallback = Box<dyn Fn(&Message) -> u16 + Send>;

/// One subscribe/notify relationship.
pub struct Subscription {
    sip: Arc<dyn SipAccess>,
    transcoder: Arc<dyn Transcoder>,
    config: SignalingConfig,
    registry: Arc<SubscribeRegistry>,
    peer: Arc<Peer>,
    event: String,
    /// Stable for the life of the session, across resubscribes.
    id: u32,
    incoming: bool,
    expires: AtomicU32,
    status: Mutex<SubscribeStatus>,
    reason: Mutex<Option<TerminateReason>>,
    handle: Mutex<Option<SubscribeHandle>>,
    expiry_at: Mutex<Option<Instant>>,
    renew_at: Mutex<Option<Instant>>,
    renew_epoch: AtomicU64,
    // At most one (re)subscribe transaction in flight per session.
    inflight: AtomicBool,
    on_notify: Mutex<Option<NotifyCallback>>,
}

impl Subscription {
    /// Client role: we will subscribe to `peer` once it is reachable.
    #[allow(clippy::too_many_arguments)]
    pub fn outbound(
        sip: Arc<dyn SipAccess>,
        transcoder: Arc<dyn Transcoder>,
        config: SignalingConfig,
        registry: Arc<SubscribeRegistry>,
        peer: Arc<Peer>,
        event: impl Into<String>,
        id: u32,
        expires: u32,
    ) -> Arc<Subscription> {
        Arc::new(Subscription {
            sip,
            transcoder,
            config,
            registry,
            peer,
            event: event.into(),
            id,
            incoming: false,
            expires: AtomicU32::new(expires),
            status: Mutex::new(SubscribeStatus::Pending),
            reason: Mutex::new(None),
            handle: Mutex::new(None),
            expiry_at: Mutex::new(None),
            renew_at: Mutex::new(None),
            renew_epoch: AtomicU64::new(0),
            inflight: AtomicBool::new(false),
            on_notify: Mutex::new(None),
        })
    }

    /// Server role: wrap a subscription a peer opened towards us.
    #[allow(clippy::too_many_arguments)]
    pub fn inbound(
        sip: Arc<dyn SipAccess>,
        transcoder: Arc<dyn Transcoder>,
        config: SignalingConfig,
        registry: Arc<SubscribeRegistry>,
        peer: Arc<Peer>,
        event: impl Into<String>,
        id: u32,
        expires: u32,
        handle: SubscribeHandle,
    ) -> Arc<Subscription> {
        let session = Arc::new(Subscription {
            sip,
            transcoder,
            config,
            registry,
            peer,
            event: event.into(),
            id,
            incoming: true,
            expires: AtomicU32::new(expires),
            status: Mutex::new(SubscribeStatus::Pending),
            reason: Mutex::new(None),
            handle: Mutex::new(Some(handle)),
            expiry_at: Mutex::new(None),
            renew_at: Mutex::new(None),
            renew_epoch: AtomicU64::new(0),
            inflight: AtomicBool::new(false),
            on_notify: Mutex::new(None),
        });
        session.registry.insert(handle, session.clone());
        session
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    pub fn status(&self) -> SubscribeStatus {
        *self.status.lock()
    }

    pub fn terminate_reason(&self) -> Option<TerminateReason> {
        *self.reason.lock()
    }

    pub fn expires(&self) -> u32 {
        self.expires.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> Option<SubscribeHandle> {
        *self.handle.lock()
    }

    /// Seconds of subscription lifetime left, by local bookkeeping.
    pub fn remaining(&self) -> Option<Duration> {
        let at = *self.expiry_at.lock();
        at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// How far out the renewal timer currently is.
    pub fn renewal_in(&self) -> Option<Duration> {
        let at = *self.renew_at.lock();
        at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Callback for NOTIFY bodies; returns the SIP code to echo.
    pub fn set_notify_callback(&self, callback: impl Fn(&Message) -> u16 + Send + 'static) {
        *self.on_notify.lock() = Some(Box::new(callback));
    }

    /// Begin the relationship.
    ///
    /// Outbound: subscribe now if the peer is online, otherwise wait on
    /// the peer's online watch under the configured `offline_wait`; a peer
    /// that never shows up terminates the session as timed out. Inbound:
    /// confirm with an immediate `active` NOTIFY.
    pub async fn start(self: &Arc<Self>) -> DialogResult<()> {
        if self.incoming {
            let handle = self
                .handle()
                .ok_or_else(|| DialogError::invalid_state("inbound subscription without handle"))?;
            let expires = self.expires();
            let state = format!("active;expires={expires}");
            self.sip
                .send_notify(handle, &state, None)
                .await
                .map_err(|err| DialogError::transport(format!("confirm notify failed: {err}")))?;
            self.activate(expires, false);
            return Ok(());
        }

        if self.peer.is_online() {
            let expires = self.expires();
            return self.subscribe(expires).await;
        }
        debug!(peer = %self.peer.id(), event = %self.event, "peer offline, deferring subscribe");
        let mut rx = self.peer.watch_online();
        let weak: Weak<Subscription> = Arc::downgrade(self);
        let deadline = Instant::now() + self.config.offline_wait;
        tokio::spawn(async move {
            loop {
                if *rx.borrow_and_update() {
                    if let Some(session) = weak.upgrade() {
                        let expires = session.expires();
                        let _ = session.subscribe(expires).await;
                    }
                    return;
                }
                match tokio::time::timeout_at(deadline, rx.changed()).await {
                    // Never came online inside the window.
                    Err(_) => {
                        if let Some(session) = weak.upgrade() {
                            warn!(
                                peer = %session.peer.id(),
                                event = %session.event,
                                "peer stayed offline, abandoning subscribe"
                            );
                            session.terminate(TerminateReason::Timeout);
                        }
                        return;
                    }
                    // The peer itself was dropped.
                    Ok(Err(_)) => {
                        if let Some(session) = weak.upgrade() {
                            session.terminate(TerminateReason::Rejected);
                        }
                        return;
                    }
                    Ok(Ok(())) => {}
                }
            }
        });
        Ok(())
    }

    /// Send a SUBSCRIBE (re-SUBSCRIBE when a handle already exists) and
    /// schedule renewal on success. 5xx replies are retried back to back,
    /// bounded by the configured cap.
    pub async fn subscribe(self: &Arc<Self>, expires: u32) -> DialogResult<()> {
        if self
            .inflight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DialogError::invalid_state("subscribe already in flight"));
        }
        let result = self.subscribe_inner(expires).await;
        self.inflight.store(false, Ordering::Release);
        result
    }

    async fn subscribe_inner(self: &Arc<Self>, expires: u32) -> DialogResult<()> {
        let mut attempts: u32 = 0;
        loop {
            let handle = self.handle();
            let outcome = self
                .sip
                .send_subscribe(self.peer.id(), &self.event, self.id, expires, handle)
                .await;
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.terminate(TerminateReason::Rejected);
                    return Err(DialogError::transport(format!("subscribe failed: {err}")));
                }
            };
            if (200..300).contains(&outcome.code) {
                if let Some(new_handle) = outcome.handle {
                    let mut slot = self.handle.lock();
                    if *slot != Some(new_handle) {
                        if let Some(old) = slot.take() {
                            self.registry.remove(old);
                        }
                        *slot = Some(new_handle);
                        drop(slot);
                        self.registry.insert(new_handle, self.clone());
                    }
                }
                info!(peer = %self.peer.id(), event = %self.event, expires, "subscription active");
                self.activate(expires, true);
                return Ok(());
            }
            if (500..600).contains(&outcome.code) {
                attempts += 1;
                if let Some(cap) = self.config.resubscribe_retry_cap {
                    if attempts > cap {
                        self.terminate(TerminateReason::GiveUp);
                        return Err(DialogError::rejected(outcome.code, "retry cap exhausted"));
                    }
                }
                warn!(peer = %self.peer.id(), code = outcome.code, attempts, "subscribe 5xx, retrying");
                continue;
            }
            self.terminate(TerminateReason::Rejected);
            return Err(DialogError::rejected(outcome.code, "subscribe refused"));
        }
    }

    fn activate(self: &Arc<Self>, expires: u32, schedule: bool) {
        self.expires.store(expires, Ordering::Release);
        *self.status.lock() = SubscribeStatus::Active;
        *self.expiry_at.lock() = Some(Instant::now() + Duration::from_secs(u64::from(expires)));
        if schedule {
            self.schedule_renewal(expires);
        }
    }

    /// Arm the renewal timer at `expires − margin`, clamped so it never
    /// lands after expiry.
    fn schedule_renewal(self: &Arc<Self>, expires: u32) {
        let margin = self.config.renewal_margin.as_secs();
        let delay = Duration::from_secs(u64::from(expires).saturating_sub(margin).max(1));
        *self.renew_at.lock() = Some(Instant::now() + delay);
        let epoch = self.renew_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let weak: Weak<Subscription> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = weak.upgrade() {
                if session.renew_epoch.load(Ordering::Acquire) == epoch
                    && session.status() == SubscribeStatus::Active
                {
                    debug!(peer = %session.peer.id(), event = %session.event, "renewing subscription");
                    let expires = session.expires();
                    let _ = session.subscribe(expires).await;
                }
            }
        });
    }

    /// The peer refreshed an inbound subscription with a re-SUBSCRIBE.
    pub fn refresh(self: &Arc<Self>, expires: u32) {
        self.activate(expires, false);
    }

    /// Handle an inbound NOTIFY. `state` is the Subscription-State header
    /// value; `message` the loaded MANSCDP body, when one was carried.
    /// Returns the SIP code to echo.
    pub fn on_notify(self: &Arc<Self>, state: &str, message: Option<&Message>) -> u16 {
        let mut parts = state.split(';').map(str::trim);
        let phase = parts.next().unwrap_or("");
        let mut expires = None;
        let mut reason = None;
        for item in parts {
            match item.split_once('=') {
                Some(("expires", value)) => expires = value.parse::<u32>().ok(),
                Some(("reason", value)) => reason = Some(TerminateReason::from_token(value)),
                _ => {}
            }
        }

        match phase {
            "terminated" => {
                self.terminate(reason.unwrap_or(TerminateReason::Deactivated));
            }
            "active" => {
                if let Some(granted) = expires {
                    self.note_server_expiry(granted);
                }
            }
            _ => {}
        }

        match message {
            Some(body) => self.on_notify.lock().as_ref().map(|cb| cb(body)).unwrap_or(200),
            None => 200,
        }
    }

    /// A server that silently extended the subscription shows up as a
    /// NOTIFY expiry well past our bookkeeping; adopt it and reschedule
    /// instead of resubscribing early.
    fn note_server_expiry(self: &Arc<Self>, granted: u32) {
        let remaining = self.remaining().map(|d| d.as_secs()).unwrap_or(0);
        if u64::from(granted) > remaining + 5 && granted > 30 {
            debug!(
                peer = %self.peer.id(),
                event = %self.event,
                granted,
                remaining,
                "server extended subscription"
            );
            self.expires.store(granted, Ordering::Release);
            *self.expiry_at.lock() =
                Some(Instant::now() + Duration::from_secs(u64::from(granted)));
            if !self.incoming {
                self.schedule_renewal(granted);
            }
        }
    }

    /// Push a message to the peer: inside the subscription when it is
    /// active, as an ordinary fire-and-forget transaction otherwise, so
    /// delivery survives subscription gaps.
    pub async fn send_notify(self: &Arc<Self>, mut message: Message) -> DialogResult<u16> {
        let handle = self.handle();
        if self.status() == SubscribeStatus::Active {
            if let Some(handle) = handle {
                message.set_encoding(self.peer.encoding());
                if message.sn() == 0 {
                    message.set_sn(self.peer.next_sn());
                }
                let bytes = message.to_wire(self.transcoder.as_ref())?;
                let remaining = self.remaining().map(|d| d.as_secs()).unwrap_or(0);
                let state = format!("active;expires={remaining}");
                return self
                    .sip
                    .send_notify(handle, &state, Some(bytes))
                    .await
                    .map_err(|err| DialogError::transport(format!("notify failed: {err}")));
            }
        }
        let proxy = RequestProxy::new(
            self.peer.clone(),
            self.sip.clone(),
            self.transcoder.clone(),
            self.config.clone(),
            message,
        )?;
        proxy.send().await?;
        Ok(proxy.reply_code())
    }

    /// Tear the session down, sending a terminal NOTIFY first when we are
    /// the notifier of an active inbound subscription.
    pub async fn shutdown(self: &Arc<Self>, reason: TerminateReason) {
        if self.status() == SubscribeStatus::Terminated {
            return;
        }
        if self.incoming && self.status() == SubscribeStatus::Active {
            if let Some(handle) = self.handle() {
                let state = format!("terminated;reason={}", reason.as_str());
                if let Err(err) = self.sip.send_notify(handle, &state, None).await {
                    warn!(peer = %self.peer.id(), %err, "terminal notify not delivered");
                }
            }
        }
        self.terminate(reason);
    }

    /// Terminal transition: sticky, cancels the renewal timer, drops the
    /// routing entry.
    fn terminate(&self, reason: TerminateReason) {
        {
            let mut status = self.status.lock();
            if *status == SubscribeStatus::Terminated {
                return;
            }
            *status = SubscribeStatus::Terminated;
        }
        self.renew_epoch.fetch_add(1, Ordering::AcqRel);
        *self.reason.lock() = Some(reason);
        *self.renew_at.lock() = None;
        if let Some(handle) = self.handle() {
            self.registry.remove(handle);
        }
        debug!(peer = %self.peer.id(), event = %self.event, reason = reason.as_str(), "subscription ended");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("peer", &self.peer.id())
            .field("event", &self.event)
            .field("id", &self.id)
            .field("incoming", &self.incoming)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tokens_round_trip() {
        let reasons = [
            TerminateReason::Deactivated,
            TerminateReason::Timeout,
            TerminateReason::Rejected,
            TerminateReason::NoResource,
            TerminateReason::Probation,
            TerminateReason::GiveUp,
            TerminateReason::Expired,
            TerminateReason::Invariant,
            TerminateReason::Invalid,
        ];
        for reason in reasons {
            assert_eq!(TerminateReason::from_token(reason.as_str()), reason);
        }
        assert_eq!(TerminateReason::from_token("nonsense"), TerminateReason::Invalid);
    }
}
