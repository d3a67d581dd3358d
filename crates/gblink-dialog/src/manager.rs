//! Composition root for the signaling engines.
//!
//! One [`SignalingManager`] per local platform: it owns the peer map, both
//! handle registries, the SSRC allocator and the SIP collaborator, and
//! offers the inbound dispatch entry points the embedding application
//! wires to its SIP stack. No global state; construct it, wire it, drop
//! it.
//!
//! Dispatch answers with the protocol's rejection codes: 400 for bodies
//! that do not parse, 481 for handles no session owns, 404 for unknown
//! peers, 406 for commands nothing handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gblink_core::charset::Transcoder;
use gblink_core::xml::Document;
use gblink_core::{Charset, Message, RootKind, SessionDescription};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SignalingConfig;
use crate::errors::{DialogError, DialogResult};
use crate::invite::{DialogRegistry, InviteDecision, InviteSession};
use crate::peer::Peer;
use crate::sip::{DialogHandle, SipAccess, SubscribeHandle};
use crate::ssrc::SsrcAllocator;
use crate::subscribe::{SubscribeRegistry, Subscription, TerminateReason};
use crate::transaction::RequestProxy;

/// Future returned by an invite handler.
pub type InviteFuture = Pin<Box<dyn Future<Output = InviteDecision> + Send>>;
/// Application hook deciding inbound invites.
pub type InviteHandler = Arc<dyn Fn(Arc<InviteSession>) -> InviteFuture + Send + Sync>;
/// Application hook for inbound Query/Control/Notify messages; returns the
/// SIP code to echo.
pub type MessageHandler = Arc<dyn Fn(&Arc<Peer>, &Message) -> u16 + Send + Sync>;

/// The one object an embedding application holds.
pub struct SignalingManager {
    platform_id: String,
    sip: Arc<dyn SipAccess>,
    transcoder: Arc<dyn Transcoder>,
    config: SignalingConfig,
    peers: DashMap<String, Arc<Peer>>,
    dialogs: Arc<DialogRegistry>,
    subscriptions: Arc<SubscribeRegistry>,
    ssrc: Arc<SsrcAllocator>,
    next_subscription_id: AtomicU32,
    invite_handler: Mutex<Option<InviteHandler>>,
    message_handler: Mutex<Option<MessageHandler>>,
}

impl SignalingManager {
    pub fn new(
        platform_id: impl Into<String>,
        sip: Arc<dyn SipAccess>,
        transcoder: Arc<dyn Transcoder>,
        config: SignalingConfig,
    ) -> Arc<SignalingManager> {
        let platform_id = platform_id.into();
        let ssrc = Arc::new(SsrcAllocator::from_platform_id(&platform_id));
        Arc::new(SignalingManager {
            platform_id,
            sip,
            transcoder,
            config,
            peers: DashMap::new(),
            dialogs: Arc::new(DialogRegistry::default()),
            subscriptions: Arc::new(SubscribeRegistry::default()),
            ssrc,
            next_subscription_id: AtomicU32::new(1),
            invite_handler: Mutex::new(None),
            message_handler: Mutex::new(None),
        })
    }

    pub fn platform_id(&self) -> &str {
        &self.platform_id
    }

    pub fn ssrc(&self) -> &Arc<SsrcAllocator> {
        &self.ssrc
    }

    pub fn dialogs(&self) -> &Arc<DialogRegistry> {
        &self.dialogs
    }

    pub fn subscriptions(&self) -> &Arc<SubscribeRegistry> {
        &self.subscriptions
    }

    pub fn set_invite_handler(&self, handler: InviteHandler) {
        *self.invite_handler.lock() = Some(handler);
    }

    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self.message_handler.lock() = Some(handler);
    }

    pub fn add_peer(&self, id: impl Into<String>, encoding: Charset) -> Arc<Peer> {
        let peer = Peer::new(id, encoding);
        self.peers.insert(peer.id().to_string(), peer.clone());
        peer
    }

    pub fn peer(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|entry| entry.clone())
    }

    pub fn remove_peer(&self, id: &str) {
        self.peers.remove(id);
    }

    /// Wrap an outbound request without sending it, so callbacks can be
    /// attached first.
    pub fn make_request(&self, peer_id: &str, message: Message) -> DialogResult<Arc<RequestProxy>> {
        let peer = self
            .peer(peer_id)
            .ok_or_else(|| DialogError::protocol(format!("unknown peer {peer_id}")))?;
        RequestProxy::new(
            peer,
            self.sip.clone(),
            self.transcoder.clone(),
            self.config.clone(),
            message,
        )
    }

    /// Wrap and send an outbound request. Resolves once the SIP reply is
    /// in; responses keep arriving through [`on_message`](Self::on_message).
    pub async fn request(&self, peer_id: &str, message: Message) -> DialogResult<Arc<RequestProxy>> {
        let proxy = self.make_request(peer_id, message)?;
        proxy.send().await?;
        Ok(proxy)
    }

    /// Create an outbound invite session; send it with
    /// [`InviteSession::invite`].
    pub fn open_invite(
        &self,
        peer_id: &str,
        device_id: &str,
        subject: Option<String>,
        local_sdp: SessionDescription,
    ) -> DialogResult<Arc<InviteSession>> {
        if self.peer(peer_id).is_none() {
            return Err(DialogError::protocol(format!("unknown peer {peer_id}")));
        }
        Ok(InviteSession::outbound(
            self.sip.clone(),
            self.config.clone(),
            self.dialogs.clone(),
            self.ssrc.clone(),
            peer_id,
            device_id,
            subject,
            local_sdp,
        ))
    }

    /// Create an outbound subscription; begin it with
    /// [`Subscription::start`].
    pub fn open_subscription(
        &self,
        peer_id: &str,
        event: &str,
        expires: u32,
    ) -> DialogResult<Arc<Subscription>> {
        let peer = self
            .peer(peer_id)
            .ok_or_else(|| DialogError::protocol(format!("unknown peer {peer_id}")))?;
        Ok(Subscription::outbound(
            self.sip.clone(),
            self.transcoder.clone(),
            self.config.clone(),
            self.subscriptions.clone(),
            peer,
            event,
            self.next_subscription_id.fetch_add(1, Ordering::Relaxed),
            expires,
        ))
    }

    /// Inbound MESSAGE body. Routes responses to their transaction, hands
    /// everything else to the message handler. Returns the code to answer.
    pub fn on_message(&self, peer_id: &str, bytes: &[u8]) -> u16 {
        let Some(peer) = self.peer(peer_id) else {
            warn!(peer = %peer_id, "message from unknown peer");
            return 404;
        };
        let doc = match Document::from_wire(bytes, self.transcoder.as_ref()) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(peer = %peer_id, %err, "unreadable message body");
                return 400;
            }
        };
        let sn = doc.root.child_parse::<u32>("SN").unwrap_or(0);
        let is_response = doc.root.name == RootKind::Response.as_str();
        let message = match Message::load(doc) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %peer_id, sn, %err, "message body rejected");
                if is_response && sn != 0 {
                    // The owning transaction fails as a whole; a bad page
                    // is never silently dropped.
                    peer.fail_transaction(sn, format!("malformed response: {err}"));
                }
                return 400;
            }
        };
        match message.root() {
            Some(RootKind::Response) => peer.dispatch_response(message),
            _ => {
                let handler = self.message_handler.lock().clone();
                match handler {
                    Some(handler) => handler(&peer, &message),
                    None => {
                        debug!(peer = %peer_id, command = %message.command().map(|c| c.to_string()).unwrap_or_default(), "no handler for command");
                        406
                    }
                }
            }
        }
    }

    /// Inbound INVITE. Answers 100 on the spot and leaves the final
    /// answer to the application's invite handler; the returned code is
    /// what was already sent (100, or a rejection).
    pub async fn on_invite(&self, peer_id: &str, dialog: DialogHandle, body: &str) -> u16 {
        if self.peer(peer_id).is_none() {
            warn!(peer = %peer_id, "invite from unknown peer");
            return 404;
        }
        let remote = match SessionDescription::parse(body) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(peer = %peer_id, %err, "invite offer rejected");
                return 400;
            }
        };
        let handler = self.invite_handler.lock().clone();
        let Some(handler) = handler else {
            debug!(peer = %peer_id, "no invite handler, refusing");
            return 488;
        };

        let session = InviteSession::inbound(
            self.sip.clone(),
            self.config.clone(),
            self.dialogs.clone(),
            self.ssrc.clone(),
            peer_id,
            dialog,
            remote,
        );
        if let Err(err) = self.sip.reply(dialog, 100, None).await {
            warn!(dialog, %err, "100 Trying not delivered");
        }
        // The accept/reject decision runs off the dispatch path.
        tokio::spawn(async move {
            match handler(session.clone()).await {
                InviteDecision::Accept(local) => {
                    if let Err(err) = session.accept(local).await {
                        warn!(peer = %session.peer_id(), %err, "accept failed");
                        let _ = session.bye("accept failed").await;
                    }
                }
                InviteDecision::Reject(code) => {
                    let _ = session.reject(code).await;
                }
            }
        });
        100
    }

    pub fn on_ack(&self, dialog: DialogHandle) -> u16 {
        match self.dialogs.resolve(dialog) {
            Some(session) => {
                session.on_ack();
                200
            }
            None => 481,
        }
    }

    pub fn on_bye(&self, dialog: DialogHandle) -> u16 {
        match self.dialogs.resolve(dialog) {
            Some(session) => {
                session.on_bye();
                200
            }
            None => 481,
        }
    }

    pub fn on_cancel(&self, dialog: DialogHandle) -> u16 {
        match self.dialogs.resolve(dialog) {
            Some(session) => {
                session.on_cancel();
                200
            }
            None => 481,
        }
    }

    /// Inbound mid-dialog INFO. The control answer body rides on the SIP
    /// reply this sends.
    pub async fn on_info(&self, dialog: DialogHandle, body: &str) -> u16 {
        let Some(session) = self.dialogs.resolve(dialog) else {
            return 481;
        };
        let (code, answer) = session.on_info(body).await;
        if let Err(err) = self.sip.reply(dialog, code, answer).await {
            warn!(dialog, %err, "info answer not delivered");
        }
        code
    }

    /// Inbound SUBSCRIBE (initial or refresh).
    pub async fn on_subscribe(
        &self,
        peer_id: &str,
        handle: SubscribeHandle,
        event: &str,
        expires: u32,
    ) -> u16 {
        if let Some(existing) = self.subscriptions.resolve(handle) {
            existing.refresh(expires);
            return 200;
        }
        let Some(peer) = self.peer(peer_id) else {
            warn!(peer = %peer_id, "subscribe from unknown peer");
            return 404;
        };
        let session = Subscription::inbound(
            self.sip.clone(),
            self.transcoder.clone(),
            self.config.clone(),
            self.subscriptions.clone(),
            peer,
            event,
            self.next_subscription_id.fetch_add(1, Ordering::Relaxed),
            expires,
            handle,
        );
        // Confirm with the immediate active NOTIFY off the dispatch path.
        tokio::spawn(async move {
            if let Err(err) = session.start().await {
                warn!(%err, "subscription confirm failed");
            }
        });
        200
    }

    /// Inbound NOTIFY for a subscription we hold.
    pub fn on_notify(&self, handle: SubscribeHandle, state: &str, body: Option<&[u8]>) -> u16 {
        let Some(session) = self.subscriptions.resolve(handle) else {
            return 481;
        };
        let message = match body {
            None => None,
            Some(bytes) => match Message::from_wire(bytes, self.transcoder.as_ref()) {
                Ok(message) => Some(message),
                Err(err) => {
                    warn!(handle, %err, "unreadable notify body");
                    return 400;
                }
            },
        };
        session.on_notify(state, message.as_ref())
    }

    /// Explicit teardown: end every dialog and subscription.
    pub async fn shutdown(&self) {
        for session in self.dialogs.drain() {
            let _ = session.bye("shutdown").await;
        }
        for session in self.subscriptions.drain() {
            session.shutdown(TerminateReason::Deactivated).await;
        }
        self.peers.clear();
    }
}
