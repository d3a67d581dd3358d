//! Shared test support: a scriptable SIP collaborator and message builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use gblink_core::manscdp::detail::{CatalogItem, CatalogResponse, MessageDetail};
use gblink_core::sdp::{Origin, SessionDescription, SessionType};
use gblink_core::{CmdKind, Message, RootKind};
use gblink_dialog::errors::{DialogError, DialogResult};
use gblink_dialog::sip::{
    DialogHandle, InfoOutcome, InviteOutcome, SipAccess, SubscribeHandle, SubscribeOutcome,
};
use parking_lot::Mutex;

/// Opt-in log output for debugging a test run (`RUST_LOG=gblink=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scriptable SIP layer. Outcomes queue per primitive; an empty queue
/// falls back to a plain success so teardown paths never block a test.
#[derive(Default)]
pub struct MockSip {
    /// When set, MESSAGE sends never resolve; exercises the reply deadline.
    pub hang_messages: std::sync::atomic::AtomicBool,
    /// When set, MESSAGE sends park until [`Self::release_messages`];
    /// exercises replies that land after the response raced ahead.
    pub hold_messages: std::sync::atomic::AtomicBool,
    message_gate: tokio::sync::Notify,
    /// When set, INVITE sends park until [`Self::release_invites`].
    pub hold_invites: std::sync::atomic::AtomicBool,
    invite_gate: tokio::sync::Notify,
    pub message_replies: Mutex<VecDeque<DialogResult<u16>>>,
    pub invite_outcomes: Mutex<VecDeque<DialogResult<InviteOutcome>>>,
    pub info_outcomes: Mutex<VecDeque<DialogResult<InfoOutcome>>>,
    pub subscribe_outcomes: Mutex<VecDeque<DialogResult<SubscribeOutcome>>>,

    pub sent_messages: Mutex<Vec<(String, Vec<u8>)>>,
    pub sent_invites: Mutex<Vec<(u64, String, String)>>,
    pub sent_infos: Mutex<Vec<(DialogHandle, String)>>,
    pub sent_subscribes: Mutex<Vec<(String, String, u32, u32, Option<SubscribeHandle>)>>,
    pub sent_notifies: Mutex<Vec<(SubscribeHandle, String, Option<Vec<u8>>)>>,
    pub acks: Mutex<Vec<DialogHandle>>,
    pub byes: Mutex<Vec<DialogHandle>>,
    pub cancels: Mutex<Vec<u64>>,
    pub replies: Mutex<Vec<(DialogHandle, u16, Option<String>)>>,
}

impl MockSip {
    pub fn new() -> Arc<MockSip> {
        Arc::new(MockSip::default())
    }

    pub fn queue_message_reply(&self, reply: DialogResult<u16>) {
        self.message_replies.lock().push_back(reply);
    }

    pub fn queue_invite(&self, outcome: DialogResult<InviteOutcome>) {
        self.invite_outcomes.lock().push_back(outcome);
    }

    pub fn queue_info(&self, outcome: DialogResult<InfoOutcome>) {
        self.info_outcomes.lock().push_back(outcome);
    }

    pub fn queue_subscribe(&self, outcome: DialogResult<SubscribeOutcome>) {
        self.subscribe_outcomes.lock().push_back(outcome);
    }

    pub fn release_messages(&self) {
        self.message_gate.notify_one();
    }

    pub fn release_invites(&self) {
        self.invite_gate.notify_one();
    }
}

#[async_trait]
impl SipAccess for MockSip {
    async fn send_message(&self, peer: &str, body: Vec<u8>) -> DialogResult<u16> {
        self.sent_messages.lock().push((peer.to_string(), body));
        if self.hang_messages.load(std::sync::atomic::Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        if self.hold_messages.load(std::sync::atomic::Ordering::Acquire) {
            self.message_gate.notified().await;
        }
        self.message_replies.lock().pop_front().unwrap_or(Ok(200))
    }

    async fn send_invite(
        &self,
        ticket: u64,
        peer: &str,
        _subject: Option<&str>,
        body: String,
    ) -> DialogResult<InviteOutcome> {
        self.sent_invites.lock().push((ticket, peer.to_string(), body));
        if self.hold_invites.load(std::sync::atomic::Ordering::Acquire) {
            self.invite_gate.notified().await;
        }
        self.invite_outcomes
            .lock()
            .pop_front()
            .unwrap_or(Err(DialogError::internal("unscripted invite")))
    }

    async fn send_ack(&self, dialog: DialogHandle) -> DialogResult<()> {
        self.acks.lock().push(dialog);
        Ok(())
    }

    async fn send_bye(&self, dialog: DialogHandle) -> DialogResult<()> {
        self.byes.lock().push(dialog);
        Ok(())
    }

    async fn cancel_invite(&self, ticket: u64) -> DialogResult<()> {
        self.cancels.lock().push(ticket);
        Ok(())
    }

    async fn send_info(&self, dialog: DialogHandle, body: String) -> DialogResult<InfoOutcome> {
        self.sent_infos.lock().push((dialog, body));
        self.info_outcomes
            .lock()
            .pop_front()
            .unwrap_or(Err(DialogError::internal("unscripted info")))
    }

    async fn send_subscribe(
        &self,
        peer: &str,
        event: &str,
        subscription_id: u32,
        expires: u32,
        handle: Option<SubscribeHandle>,
    ) -> DialogResult<SubscribeOutcome> {
        self.sent_subscribes.lock().push((
            peer.to_string(),
            event.to_string(),
            subscription_id,
            expires,
            handle,
        ));
        self.subscribe_outcomes
            .lock()
            .pop_front()
            .unwrap_or(Err(DialogError::internal("unscripted subscribe")))
    }

    async fn send_notify(
        &self,
        handle: SubscribeHandle,
        state: &str,
        body: Option<Vec<u8>>,
    ) -> DialogResult<u16> {
        self.sent_notifies.lock().push((handle, state.to_string(), body));
        Ok(200)
    }

    async fn reply(
        &self,
        dialog: DialogHandle,
        code: u16,
        body: Option<String>,
    ) -> DialogResult<()> {
        self.replies.lock().push((dialog, code, body));
        Ok(())
    }
}

pub const LOCAL_PLATFORM: &str = "34020000002000000001";
pub const PEER_PLATFORM: &str = "34020000001110000009";
pub const CAMERA: &str = "34020000001310000001";

pub fn catalog_query() -> Message {
    let mut message = Message::new(RootKind::Query, CmdKind::Catalog);
    message.set_device_id(CAMERA);
    message
}

pub fn catalog_page(sn: u32, sum: u32, items: usize) -> Message {
    let mut message = Message::new(RootKind::Response, CmdKind::Catalog);
    message.set_sn(sn);
    message.set_device_id(CAMERA);
    message.set_detail(MessageDetail::CatalogResponse(CatalogResponse {
        sum_num: sum,
        items: (0..items)
            .map(|i| CatalogItem {
                device_id: format!("340200000013100000{i:02}"),
                ..Default::default()
            })
            .collect(),
    }));
    message
}

pub fn offer(kind: SessionType) -> SessionDescription {
    let mut sdp = SessionDescription::new(
        kind,
        Origin {
            owner: LOCAL_PLATFORM.to_string(),
            session_id: 0,
            session_version: 0,
            address: "192.168.1.10".to_string(),
        },
    );
    sdp.connection = Some("192.168.1.10".to_string());
    let mut media = gblink_core::sdp::MediaDescription::new("video", 9000, "RTP/AVP");
    media.formats.push(96);
    media.rtpmaps.push(gblink_core::sdp::RtpMap {
        payload: 96,
        encoding: "PS".to_string(),
        clock_rate: 90000,
    });
    sdp.media.push(media);
    sdp
}

pub fn answer_body(kind: SessionType, ssrc: u32) -> String {
    let mut sdp = offer(kind);
    sdp.origin.owner = CAMERA.to_string();
    sdp.ssrc = Some(ssrc);
    sdp.generate()
}
