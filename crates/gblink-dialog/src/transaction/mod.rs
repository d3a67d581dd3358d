//! Request/response transaction engine.
//!
//! One [`RequestProxy`] covers one outbound MANSCDP request and everything
//! that comes back for it: the SIP reply, zero or more Response messages,
//! and the timers that bound the wait. Completion runs exactly once no
//! matter which trigger wins the race; that one atomic flag is the only
//! synchronization the lifecycle needs.

pub mod policy;

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use gblink_core::charset::Transcoder;
use gblink_core::manscdp::detail::MessageDetail;
use gblink_core::manscdp::{CmdKind, RootKind};
use gblink_core::Message;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SignalingConfig;
use crate::errors::{DialogError, DialogResult};
use crate::peer::Peer;
use crate::sip::SipAccess;

pub use policy::{CountAggregate, MaskAggregate, PolicyOutcome, ResponsePolicy, SingleResponse};

/// How many responses an exchange is allowed to expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    NoResponse,
    OneResponse,
    MultipleResponses,
}

/// Derive the exchange shape from the request's addressing.
///
/// Returns `None` for unaddressed messages; those are rejected before a
/// transaction is created.
pub fn classify(message: &Message) -> Option<RequestKind> {
    let root = message.root()?;
    let command = message.command()?;
    Some(match root {
        // The alarm notify is the one notify that solicits a response.
        RootKind::Notify => {
            if matches!(command, CmdKind::Alarm) {
                RequestKind::OneResponse
            } else {
                RequestKind::NoResponse
            }
        }
        RootKind::Response => RequestKind::NoResponse,
        RootKind::Control => match message.detail().control_verb() {
            Some(verb) if verb.is_fire_and_forget() => RequestKind::NoResponse,
            _ => RequestKind::OneResponse,
        },
        RootKind::Query => match command {
            CmdKind::Catalog
            | CmdKind::ConfigDownload
            | CmdKind::RecordInfo
            | CmdKind::PresetQuery
            | CmdKind::CruiseTrackQuery
            | CmdKind::CruiseTrackListQuery => RequestKind::MultipleResponses,
            _ => RequestKind::OneResponse,
        },
    })
}

/// Transaction lifecycle. Ordered so terminal checks are one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestStatus {
    Init,
    Sending,
    Replied,
    Succeeded,
    Timeout,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        *self >= RequestStatus::Succeeded
    }
}

#[derive(Debug, Default)]
struct Timestamps {
    sent: Option<Instant>,
    replied: Option<Instant>,
    first_response: Option<Instant>,
    last_response: Option<Instant>,
}

type ReplyCallback = Box<dyn FnOnce(u16) + Send>;
type ResponseCallback = Box<dyn Fn(&Message) -> u16 + Send>;
type CompletedCallback = Box<dyn FnOnce(&RequestProxy) + Send>;

/// One outbound request and its correlated response(s).
pub struct RequestProxy {
    peer: Arc<Peer>,
    sip: Arc<dyn SipAccess>,
    transcoder: Arc<dyn Transcoder>,
    config: SignalingConfig,
    kind: RequestKind,
    sn: u32,
    request: Mutex<Message>,
    status: Mutex<RequestStatus>,
    completed: AtomicBool,
    reply_code: AtomicU16,
    responses: Mutex<Vec<Message>>,
    policy: Box<dyn ResponsePolicy>,
    times: Mutex<Timestamps>,
    error: Mutex<Option<String>>,
    on_reply: Mutex<Option<ReplyCallback>>,
    on_response: Mutex<Option<ResponseCallback>>,
    on_completed: Mutex<Option<CompletedCallback>>,
    // Bumped whenever a new wait window starts; stale timers see a
    // mismatch and do nothing.
    timer_epoch: AtomicU64,
    done: Notify,
}

impl RequestProxy {
    /// Classify and wrap an outbound request. Assigns the peer's next SN
    /// unless the message already carries one.
    pub fn new(
        peer: Arc<Peer>,
        sip: Arc<dyn SipAccess>,
        transcoder: Arc<dyn Transcoder>,
        config: SignalingConfig,
        mut request: Message,
    ) -> DialogResult<Arc<RequestProxy>> {
        let kind = classify(&request).ok_or_else(|| {
            DialogError::protocol("request is not addressed (missing root or command)")
        })?;
        let sn = if request.sn() != 0 { request.sn() } else { peer.next_sn() };
        request.set_sn(sn);

        let policy: Box<dyn ResponsePolicy> = match kind {
            RequestKind::MultipleResponses => match request.detail() {
                MessageDetail::ConfigDownloadQuery(mask) => Box::new(MaskAggregate::new(*mask)),
                _ => Box::new(CountAggregate::new()),
            },
            _ => Box::new(SingleResponse),
        };

        Ok(Arc::new(RequestProxy {
            peer,
            sip,
            transcoder,
            config,
            kind,
            sn,
            request: Mutex::new(request),
            status: Mutex::new(RequestStatus::Init),
            completed: AtomicBool::new(false),
            reply_code: AtomicU16::new(0),
            responses: Mutex::new(Vec::new()),
            policy,
            times: Mutex::new(Timestamps::default()),
            error: Mutex::new(None),
            on_reply: Mutex::new(None),
            on_response: Mutex::new(None),
            on_completed: Mutex::new(None),
            timer_epoch: AtomicU64::new(0),
            done: Notify::new(),
        }))
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn sn(&self) -> u32 {
        self.sn
    }

    pub fn status(&self) -> RequestStatus {
        *self.status.lock()
    }

    pub fn reply_code(&self) -> u16 {
        self.reply_code.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// The single canonical response, only when exactly one page arrived.
    /// A genuinely multi-page exchange has no merged response; use
    /// [`all_responses`](Self::all_responses).
    pub fn response(&self) -> Option<Message> {
        let responses = self.responses.lock();
        if responses.len() == 1 {
            responses.first().cloned()
        } else {
            None
        }
    }

    pub fn all_responses(&self) -> Vec<Message> {
        self.responses.lock().clone()
    }

    /// One-shot callback fired with the SIP reply code.
    pub fn set_reply_callback(&self, callback: impl FnOnce(u16) + Send + 'static) {
        *self.on_reply.lock() = Some(Box::new(callback));
    }

    /// Fired per response page; returns the SIP code to echo to the sender.
    pub fn set_response_callback(
        &self,
        callback: impl Fn(&Message) -> u16 + Send + 'static,
    ) {
        *self.on_response.lock() = Some(Box::new(callback));
    }

    /// Fired exactly once at terminal status.
    pub fn set_completed_callback(
        &self,
        callback: impl FnOnce(&RequestProxy) + Send + 'static,
    ) {
        *self.on_completed.lock() = Some(Box::new(callback));
    }

    /// Serialize and hand the request to the SIP layer, then drive the
    /// reply into the state machine.
    ///
    /// The proxy registers itself in the peer's SN table before the
    /// transport call so a fast response cannot race past it. A
    /// serialization failure completes Failed synchronously and is the
    /// only error this returns.
    pub async fn send(self: &Arc<Self>) -> DialogResult<()> {
        *self.status.lock() = RequestStatus::Sending;
        let bytes = {
            let mut request = self.request.lock();
            request.set_encoding(self.peer.encoding());
            request.to_wire(self.transcoder.as_ref())
        };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                let reason = format!("serialize failed: {err}");
                self.complete(RequestStatus::Failed, Some(reason.clone()));
                return Err(DialogError::protocol(reason));
            }
        };

        self.peer.register(self.sn, self.clone());
        self.times.lock().sent = Some(Instant::now());
        debug!(peer = %self.peer.id(), sn = self.sn, kind = ?self.kind, "sending request");

        let sent = tokio::time::timeout(
            self.config.reply_wait,
            self.sip.send_message(self.peer.id(), bytes),
        )
        .await;
        match sent {
            Err(_) => self.complete(
                RequestStatus::Timeout,
                Some(format!("no reply within {:?}", self.config.reply_wait)),
            ),
            Ok(Err(err)) => {
                self.complete(RequestStatus::Failed, Some(format!("send failed: {err}")))
            }
            Ok(Ok(code)) => self.handle_reply(code),
        }
        Ok(())
    }

    /// Drive the SIP reply into the state machine.
    ///
    /// The transaction is registered before the transport call, so a fast
    /// device response can complete it while the reply is still in flight;
    /// a reply landing after that must not touch status or the timer.
    fn handle_reply(self: &Arc<Self>, code: u16) {
        if self.completed.load(Ordering::Acquire) {
            debug!(sn = self.sn, code, "reply after completion, ignored");
            return;
        }
        self.reply_code.store(code, Ordering::Release);
        self.times.lock().replied = Some(Instant::now());

        if let Some(callback) = self.on_reply.lock().take() {
            callback(code);
        }

        if (200..300).contains(&code) {
            if self.kind == RequestKind::NoResponse {
                self.complete(RequestStatus::Succeeded, None);
            } else {
                // Re-checked under the lock: `complete` raises the flag
                // before it writes the terminal status, so whichever side
                // wins the lock, a terminal status is never overwritten.
                let mut status = self.status.lock();
                if self.completed.load(Ordering::Acquire) {
                    return;
                }
                *status = RequestStatus::Replied;
                drop(status);
                self.arm_timer(self.config.response_wait);
            }
        } else if code == 408 {
            self.complete(RequestStatus::Timeout, Some("reply timed out (408)".to_string()));
        } else {
            self.complete(RequestStatus::Failed, Some(format!("peer replied {code}")));
        }
    }

    /// Accept one inbound Response page. Returns the SIP code to echo.
    pub fn on_response(self: &Arc<Self>, message: Message) -> u16 {
        if self.completed.load(Ordering::Acquire) {
            warn!(sn = self.sn, "response for a finished transaction");
            return 481;
        }

        {
            let mut times = self.times.lock();
            let now = Instant::now();
            times.first_response.get_or_insert(now);
            times.last_response = Some(now);
        }

        let outcome = self.policy.accept(&message);
        // Without a per-page hook the page is still consumed: it is stored
        // below and drives the policy, so 200 is the correct echo. 400 is
        // reserved for payloads nothing can take delivery of.
        let echo = self
            .on_response
            .lock()
            .as_ref()
            .map(|callback| callback(&message))
            .unwrap_or(200);
        self.responses.lock().push(message);

        match outcome {
            PolicyOutcome::Complete => self.complete(RequestStatus::Succeeded, None),
            PolicyOutcome::Fail(reason) => self.fail_async(reason),
            PolicyOutcome::Continue => self.arm_timer(self.config.page_window),
        }
        echo
    }

    /// Fail off the caller's stack, so completion never re-enters the
    /// dispatch path that noticed the problem.
    pub(crate) fn fail_async(self: &Arc<Self>, reason: String) {
        let proxy = self.clone();
        tokio::spawn(async move {
            proxy.complete(RequestStatus::Failed, Some(reason));
        });
    }

    fn arm_timer(self: &Arc<Self>, window: Duration) {
        let epoch = self.timer_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let weak: Weak<RequestProxy> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(proxy) = weak.upgrade() {
                if proxy.timer_epoch.load(Ordering::Acquire) == epoch {
                    proxy.complete(
                        RequestStatus::Timeout,
                        Some(format!("no response within {window:?}")),
                    );
                }
            }
        });
    }

    /// Terminal transition. The atomic flag makes this a no-op for every
    /// caller but the first, whichever trigger it was.
    fn complete(&self, status: RequestStatus, error: Option<String>) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug_assert!(status.is_terminal());
        // Invalidate any armed timer.
        self.timer_epoch.fetch_add(1, Ordering::AcqRel);
        *self.status.lock() = status;
        if let Some(reason) = &error {
            debug!(sn = self.sn, ?status, reason = %reason, "transaction finished");
        } else {
            debug!(sn = self.sn, ?status, "transaction finished");
        }
        *self.error.lock() = error;

        let callback = self.on_completed.lock().take();
        if let Some(callback) = callback {
            callback(self);
        }
        // Drop remaining callbacks so captured state is released.
        *self.on_reply.lock() = None;
        *self.on_response.lock() = None;

        self.peer.deregister(self.sn);
        self.done.notify_waiters();
    }

    /// Wait for terminal status.
    pub async fn wait(&self) -> RequestStatus {
        loop {
            let notified = self.done.notified();
            let status = self.status();
            if status.is_terminal() {
                return status;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for RequestProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProxy")
            .field("sn", &self.sn)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gblink_core::manscdp::detail::{ConfigMask, ControlVerb};

    fn message(root: RootKind, command: CmdKind) -> Message {
        Message::new(root, command)
    }

    #[test]
    fn classification_is_deterministic() {
        let cases = [
            (message(RootKind::Query, CmdKind::Catalog), RequestKind::MultipleResponses),
            (message(RootKind::Query, CmdKind::RecordInfo), RequestKind::MultipleResponses),
            (message(RootKind::Query, CmdKind::ConfigDownload), RequestKind::MultipleResponses),
            (message(RootKind::Query, CmdKind::PresetQuery), RequestKind::MultipleResponses),
            (message(RootKind::Query, CmdKind::DeviceInfo), RequestKind::OneResponse),
            (message(RootKind::Query, CmdKind::DeviceStatus), RequestKind::OneResponse),
            (message(RootKind::Notify, CmdKind::Keepalive), RequestKind::NoResponse),
            (message(RootKind::Notify, CmdKind::Alarm), RequestKind::OneResponse),
            (message(RootKind::Response, CmdKind::Catalog), RequestKind::NoResponse),
            (message(RootKind::Control, CmdKind::DeviceConfig), RequestKind::OneResponse),
        ];
        for (msg, expected) in cases {
            assert_eq!(classify(&msg), Some(expected), "{:?}/{:?}", msg.root(), msg.command());
        }
    }

    #[test]
    fn fire_and_forget_controls() {
        let mut ptz = message(RootKind::Control, CmdKind::DeviceControl);
        ptz.set_detail(MessageDetail::DeviceControl(ControlVerb::Ptz(
            "A50F01021F0000D4".to_string(),
        )));
        assert_eq!(classify(&ptz), Some(RequestKind::NoResponse));

        let mut boot = message(RootKind::Control, CmdKind::DeviceControl);
        boot.set_detail(MessageDetail::DeviceControl(ControlVerb::TeleBoot));
        assert_eq!(classify(&boot), Some(RequestKind::NoResponse));
    }

    #[test]
    fn unaddressed_requests_are_rejected() {
        assert_eq!(classify(&Message::default()), None);
    }

    #[test]
    fn config_download_query_carries_its_mask() {
        let mut query = message(RootKind::Query, CmdKind::ConfigDownload);
        query.set_detail(MessageDetail::ConfigDownloadQuery(ConfigMask::BASIC_PARAM));
        assert_eq!(classify(&query), Some(RequestKind::MultipleResponses));
        assert_eq!(query.config_mask(), Some(ConfigMask::BASIC_PARAM));
    }

    #[test]
    fn status_ordering_marks_terminals() {
        assert!(!RequestStatus::Init.is_terminal());
        assert!(!RequestStatus::Sending.is_terminal());
        assert!(!RequestStatus::Replied.is_terminal());
        assert!(RequestStatus::Succeeded.is_terminal());
        assert!(RequestStatus::Timeout.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
    }
}
