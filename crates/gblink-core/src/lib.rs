//! GB/T 28181 wire formats
//!
//! This crate implements the three wire encodings a GB/T 28181 signaling
//! endpoint speaks, independent of any SIP stack:
//!
//! - **MANSCDP**: the XML control/query/notify envelope carried in SIP
//!   MESSAGE bodies ([`manscdp`])
//! - **SDP**: session descriptions with the GB extensions (`y=`, `f=`,
//!   `a=streamnumber:` and friends) used to negotiate media ([`sdp`])
//! - **MANSRTSP**: the RTSP-style playback control lines tunneled over
//!   mid-dialog SIP INFO ([`mansrtsp`])
//!
//! Character-set conversion is a collaborator behind the [`charset::Transcoder`]
//! trait; the crate itself only tracks which charset a message declares.

pub mod charset;
pub mod error;
pub mod manscdp;
pub mod mansrtsp;
pub mod sdp;
pub mod xml;

pub use charset::{Charset, Transcoder, Utf8Transcoder};
pub use error::{CodecError, CodecResult};
pub use manscdp::{CmdKind, Message, MessageDetail, RootKind};
pub use mansrtsp::{ControlAction, ControlRequest, ControlResponse};
pub use sdp::{MediaDescription, SessionDescription, SessionType};
pub use xml::{Document, XmlNode};

/// Largest MANSCDP body we will emit without engaging the oversize policy.
///
/// GB/T 28181 payloads ride in SIP messages that peers commonly cap at 8192
/// bytes; 500 bytes are reserved for the SIP envelope.
pub const MAX_PAYLOAD: usize = 8192 - 500;
