//! MANSCDP message envelope.
//!
//! Every GB/T 28181 control/query/notify exchange is one XML body with a
//! fixed envelope:
//!
//! ```text
//! <Query>                          root in {Query, Control, Notify, Response}
//!   <CmdType>Catalog</CmdType>
//!   <SN>123</SN>
//!   <DeviceID>3402...0001</DeviceID>   (optional)
//!   <Reason>...</Reason>               (optional, responses)
//!   ... command-specific fields ...
//!   ... vendor extension nodes ...     (outbound only)
//! </Query>
//! ```
//!
//! A [`Message`] lives in one of two lifecycle phases: *loaded* from a
//! received document (fields filled from the tree, document retained), or
//! *parsed* to a document lazily on the send path (idempotent: repeated
//! serialization reuses the cached document unless a rebuild is forced).

pub mod detail;
pub mod extend;

pub use detail::{
    AlarmNotify, CatalogItem, CatalogQuery, CatalogResponse, ConfigDownloadResponse, ConfigMask,
    ControlVerb, DeviceInfoResponse, Keepalive, MessageDetail, RecordInfoQuery, RecordInfoResponse,
    RecordItem, ResultKind,
};
pub use extend::ExtendNode;

use tracing::warn;

use crate::charset::{Charset, Transcoder};
use crate::error::{CodecError, CodecResult};
use crate::xml::{Document, XmlNode};
use crate::MAX_PAYLOAD;

/// The four MANSCDP root elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RootKind {
    Query,
    Control,
    Notify,
    Response,
}

impl RootKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootKind::Query => "Query",
            RootKind::Control => "Control",
            RootKind::Notify => "Notify",
            RootKind::Response => "Response",
        }
    }

    pub fn from_tag(tag: &str) -> Option<RootKind> {
        match tag {
            "Query" => Some(RootKind::Query),
            "Control" => Some(RootKind::Control),
            "Notify" => Some(RootKind::Notify),
            "Response" => Some(RootKind::Response),
            _ => None,
        }
    }
}

impl std::fmt::Display for RootKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `<CmdType>` vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CmdKind {
    DeviceControl,
    DeviceConfig,
    DeviceStatus,
    Catalog,
    DeviceInfo,
    RecordInfo,
    Alarm,
    ConfigDownload,
    PresetQuery,
    MobilePosition,
    HomePositionQuery,
    CruiseTrackListQuery,
    CruiseTrackQuery,
    PtzPosition,
    SdCardStatus,
    Keepalive,
    MediaStatus,
    Broadcast,
    UploadSnapShotFinished,
    VideoUploadNotify,
    DeviceUpgradeResult,
    /// Passthrough for CmdType values this crate does not model.
    Other(String),
}

impl CmdKind {
    pub fn as_str(&self) -> &str {
        match self {
            CmdKind::DeviceControl => "DeviceControl",
            CmdKind::DeviceConfig => "DeviceConfig",
            CmdKind::DeviceStatus => "DeviceStatus",
            CmdKind::Catalog => "Catalog",
            CmdKind::DeviceInfo => "DeviceInfo",
            CmdKind::RecordInfo => "RecordInfo",
            CmdKind::Alarm => "Alarm",
            CmdKind::ConfigDownload => "ConfigDownload",
            CmdKind::PresetQuery => "PresetQuery",
            CmdKind::MobilePosition => "MobilePosition",
            CmdKind::HomePositionQuery => "HomePositionQuery",
            CmdKind::CruiseTrackListQuery => "CruiseTrackListQuery",
            CmdKind::CruiseTrackQuery => "CruiseTrackQuery",
            CmdKind::PtzPosition => "PTZPosition",
            CmdKind::SdCardStatus => "SDCardStatus",
            CmdKind::Keepalive => "Keepalive",
            CmdKind::MediaStatus => "MediaStatus",
            CmdKind::Broadcast => "Broadcast",
            CmdKind::UploadSnapShotFinished => "UploadSnapShotFinished",
            CmdKind::VideoUploadNotify => "VideoUploadNotify",
            CmdKind::DeviceUpgradeResult => "DeviceUpgradeResult",
            CmdKind::Other(name) => name,
        }
    }

    pub fn from_tag(tag: &str) -> CmdKind {
        match tag {
            "DeviceControl" => CmdKind::DeviceControl,
            "DeviceConfig" => CmdKind::DeviceConfig,
            "DeviceStatus" => CmdKind::DeviceStatus,
            "Catalog" => CmdKind::Catalog,
            "DeviceInfo" => CmdKind::DeviceInfo,
            "RecordInfo" => CmdKind::RecordInfo,
            "Alarm" => CmdKind::Alarm,
            "ConfigDownload" => CmdKind::ConfigDownload,
            "PresetQuery" => CmdKind::PresetQuery,
            "MobilePosition" => CmdKind::MobilePosition,
            "HomePositionQuery" => CmdKind::HomePositionQuery,
            "CruiseTrackListQuery" => CmdKind::CruiseTrackListQuery,
            "CruiseTrackQuery" => CmdKind::CruiseTrackQuery,
            "PTZPosition" => CmdKind::PtzPosition,
            "SDCardStatus" => CmdKind::SdCardStatus,
            "Keepalive" => CmdKind::Keepalive,
            "MediaStatus" => CmdKind::MediaStatus,
            "Broadcast" => CmdKind::Broadcast,
            "UploadSnapShotFinished" => CmdKind::UploadSnapShotFinished,
            "VideoUploadNotify" => CmdKind::VideoUploadNotify,
            "DeviceUpgradeResult" => CmdKind::DeviceUpgradeResult,
            other => CmdKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for CmdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One MANSCDP message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    root: Option<RootKind>,
    command: Option<CmdKind>,
    sn: u32,
    device_id: Option<String>,
    reason: Option<String>,
    encoding: Charset,
    detail: MessageDetail,
    extend: Vec<ExtendNode>,
    doc: Option<Document>,
}

impl Message {
    /// Start an outbound (parse-phase) message addressed by root + command.
    pub fn new(root: RootKind, command: CmdKind) -> Message {
        Message { root: Some(root), command: Some(command), ..Default::default() }
    }

    /// Load an inbound (load-phase) message from a parsed document.
    ///
    /// Fails if the root tag is not a MANSCDP root or the command-specific
    /// loader rejects the body. `SN` defaults to 0 when absent or unparsable;
    /// the message charset is seeded from the document's declared encoding.
    pub fn load(doc: Document) -> CodecResult<Message> {
        let root_kind = RootKind::from_tag(&doc.root.name)
            .ok_or_else(|| CodecError::UnknownRoot { tag: doc.root.name.clone() })?;
        let command = CmdKind::from_tag(doc.root.child_text("CmdType").unwrap_or_default());
        let sn = doc.root.child_parse::<u32>("SN").unwrap_or(0);
        let device_id = doc.root.child_text("DeviceID").map(String::from);
        let reason = doc.root.child_text("Reason").map(String::from);
        let encoding = doc.encoding.unwrap_or_default();
        let detail = MessageDetail::load(root_kind, &command, &doc.root)?;
        Ok(Message {
            root: Some(root_kind),
            command: Some(command),
            sn,
            device_id,
            reason,
            encoding,
            detail,
            extend: Vec::new(),
            doc: Some(doc),
        })
    }

    /// Decode wire bytes (transcoding to UTF-8 first) and load.
    pub fn from_wire(bytes: &[u8], transcoder: &dyn Transcoder) -> CodecResult<Message> {
        Message::load(Document::from_wire(bytes, transcoder)?)
    }

    pub fn root(&self) -> Option<RootKind> {
        self.root
    }

    pub fn command(&self) -> Option<&CmdKind> {
        self.command.as_ref()
    }

    pub fn sn(&self) -> u32 {
        self.sn
    }

    pub fn set_sn(&mut self, sn: u32) {
        self.sn = sn;
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn set_device_id(&mut self, device_id: impl Into<String>) {
        self.device_id = Some(device_id.into());
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    pub fn encoding(&self) -> Charset {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: Charset) {
        self.encoding = encoding;
    }

    pub fn detail(&self) -> &MessageDetail {
        &self.detail
    }

    pub fn set_detail(&mut self, detail: MessageDetail) {
        self.detail = detail;
    }

    /// Queue a vendor extension element; emitted only on the outbound path.
    pub fn push_extend(&mut self, node: ExtendNode) {
        self.extend.push(node);
    }

    /// The cached document, if one has been loaded or built.
    pub fn document(&self) -> Option<&Document> {
        self.doc.as_ref()
    }

    /// Build (or reuse) the XML document for this message.
    ///
    /// Idempotent unless `force_rebuild`: a cached document is returned
    /// untouched. Fails if the message is not addressed (no root/command) or
    /// the command body is incomplete; on body failure no document is cached.
    pub fn parse_to_document(&mut self, force_rebuild: bool) -> CodecResult<&Document> {
        if self.doc.is_some() && !force_rebuild {
            return Ok(self.doc.as_ref().unwrap());
        }
        let (root, command) = match (self.root, &self.command) {
            (Some(r), Some(c)) => (r, c),
            _ => return Err(CodecError::NotAddressed),
        };

        let mut children = vec![
            XmlNode::leaf("CmdType", command.as_str()),
            XmlNode::leaf("SN", self.sn.to_string()),
        ];
        if let Some(device_id) = self.device_id.as_deref().filter(|s| !s.is_empty()) {
            children.push(XmlNode::leaf("DeviceID", device_id));
        }
        if let Some(reason) = self.reason.as_deref().filter(|s| !s.is_empty()) {
            children.push(XmlNode::leaf("Reason", reason));
        }

        // Body failure must not leave a half-built document cached.
        self.doc = None;
        children.extend(self.detail.to_nodes()?);
        children.extend(self.extend.iter().map(ExtendNode::to_node));

        self.doc = Some(Document {
            encoding: Some(self.encoding),
            root: XmlNode::branch(root.as_str(), children),
        });
        Ok(self.doc.as_ref().unwrap())
    }

    /// Serialize to wire bytes in the message charset.
    ///
    /// Builds the document if needed, serializes, and transcodes from the
    /// internal UTF-8 to the declared charset. Payloads beyond [`MAX_PAYLOAD`]
    /// engage the oversize policy, which by default logs and sends anyway.
    pub fn to_wire(&mut self, transcoder: &dyn Transcoder) -> CodecResult<Vec<u8>> {
        self.parse_to_document(false)?;
        let text = self.doc.as_ref().unwrap().serialize();
        let bytes = transcoder.convert(text.as_bytes(), Charset::Utf8, self.encoding)?;
        if bytes.len() > MAX_PAYLOAD {
            warn!(
                root = %self.root.map(|r| r.as_str()).unwrap_or("?"),
                sn = self.sn,
                size = bytes.len(),
                "MANSCDP payload exceeds the safe size; sending anyway"
            );
        }
        Ok(bytes)
    }

    /// Total item count claimed by a paginated response body.
    pub fn sum_num(&self) -> Option<u32> {
        self.detail.sum_num()
    }

    /// Items carried by this body, for paginated responses.
    pub fn item_count(&self) -> Option<u32> {
        self.detail.item_count()
    }

    /// Config categories this body requests or carries.
    pub fn config_mask(&self) -> Option<ConfigMask> {
        self.detail.config_mask()
    }

    /// `<Result>` carried by this body, if any.
    pub fn result(&self) -> Option<ResultKind> {
        self.detail.result()
    }
}
