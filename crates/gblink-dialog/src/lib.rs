//! GB/T 28181 signaling state machines.
//!
//! This crate layers the session engines on top of the wire formats in
//! `gblink-core`:
//!
//! - [`transaction::RequestProxy`]: one outbound MANSCDP request and its
//!   correlated response(s), with timeout and aggregation semantics
//! - [`invite::InviteSession`]: a media dialog from INVITE through ACK to
//!   BYE/CANCEL, including the playback control sub-protocol over INFO
//! - [`subscribe::Subscription`]: a SUBSCRIBE/NOTIFY relationship with
//!   renewal scheduling and notify-driven expiry tracking
//! - [`manager::SignalingManager`]: the composition root that owns the peer
//!   map, the handle registries and the inbound dispatch entry points
//!
//! The actual SIP transaction layer is a collaborator behind the
//! [`sip::SipAccess`] trait; this crate never touches a socket.

pub mod config;
pub mod errors;
pub mod invite;
pub mod manager;
pub mod peer;
pub mod sip;
pub mod ssrc;
pub mod subscribe;
pub mod transaction;

pub use config::SignalingConfig;
pub use errors::{DialogError, DialogResult};
pub use invite::{InviteDecision, InviteSession, InviteStatus};
pub use manager::SignalingManager;
pub use peer::Peer;
pub use sip::{DialogHandle, SipAccess, SubscribeHandle};
pub use ssrc::SsrcAllocator;
pub use subscribe::{SubscribeStatus, Subscription, TerminateReason};
pub use transaction::{RequestKind, RequestProxy, RequestStatus};
