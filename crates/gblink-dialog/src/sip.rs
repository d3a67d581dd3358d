//! The SIP transaction/dialog collaborator boundary.
//!
//! The real SIP stack lives behind [`SipAccess`]. Dialogs and subscriptions
//! come back from it as opaque integer handles; the engines use them purely
//! as lookup keys and never interpret their value. Tests supply a mock.

use async_trait::async_trait;

use crate::errors::DialogResult;

/// Opaque key for an established INVITE dialog.
pub type DialogHandle = u64;

/// Opaque key for a SUBSCRIBE dialog.
pub type SubscribeHandle = u64;

/// Final outcome of an outbound INVITE.
#[derive(Debug, Clone)]
pub struct InviteOutcome {
    /// Final SIP status code.
    pub code: u16,
    /// SDP answer body, when the reply carried one.
    pub body: Option<String>,
    /// Dialog handle, present once a dialog was established.
    pub dialog: Option<DialogHandle>,
}

/// Outcome of an outbound SUBSCRIBE.
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    pub code: u16,
    pub handle: Option<SubscribeHandle>,
}

/// Outcome of a mid-dialog INFO round-trip.
#[derive(Debug, Clone)]
pub struct InfoOutcome {
    pub code: u16,
    /// Control response body echoed by the peer.
    pub body: Option<String>,
}

/// Black-box SIP send primitives.
///
/// Every method resolves when the transaction reaches its final reply (or
/// transport failure); provisional progress is not surfaced here. `ticket`
/// on the invite path is caller-allocated and only meaningful to
/// `cancel_invite`, which aborts an invite still waiting for its final
/// reply.
#[async_trait]
pub trait SipAccess: Send + Sync {
    /// Send a MESSAGE with a MANSCDP body. Returns the SIP reply code.
    async fn send_message(&self, peer: &str, body: Vec<u8>) -> DialogResult<u16>;

    async fn send_invite(
        &self,
        ticket: u64,
        peer: &str,
        subject: Option<&str>,
        body: String,
    ) -> DialogResult<InviteOutcome>;

    async fn send_ack(&self, dialog: DialogHandle) -> DialogResult<()>;

    async fn send_bye(&self, dialog: DialogHandle) -> DialogResult<()>;

    /// Cancel an invite that has not yet received its final reply.
    async fn cancel_invite(&self, ticket: u64) -> DialogResult<()>;

    /// Send a mid-dialog INFO carrying a playback control body.
    async fn send_info(&self, dialog: DialogHandle, body: String) -> DialogResult<InfoOutcome>;

    /// Send a SUBSCRIBE, or a re-SUBSCRIBE when `handle` is already known.
    #[allow(clippy::too_many_arguments)]
    async fn send_subscribe(
        &self,
        peer: &str,
        event: &str,
        subscription_id: u32,
        expires: u32,
        handle: Option<SubscribeHandle>,
    ) -> DialogResult<SubscribeOutcome>;

    /// Send a NOTIFY inside a subscription dialog.
    async fn send_notify(
        &self,
        handle: SubscribeHandle,
        state: &str,
        body: Option<Vec<u8>>,
    ) -> DialogResult<u16>;

    /// Answer an inbound in-dialog request.
    async fn reply(
        &self,
        dialog: DialogHandle,
        code: u16,
        body: Option<String>,
    ) -> DialogResult<()>;
}
