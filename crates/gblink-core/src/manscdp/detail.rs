//! Command-specific message bodies.
//!
//! Every MANSCDP command shares the envelope handled in [`super`]; what
//! differs per command is a flat field list loaded and written by one hook
//! pair. The original protocol surface is ~40 such field lists; they all
//! follow the pattern below, so the tagged union carries the ones the
//! signaling core itself exercises plus a [`MessageDetail::Raw`] passthrough
//! that preserves unrecognized bodies without loss.

use chrono::NaiveDateTime;

use crate::error::{CodecError, CodecResult};
use crate::manscdp::{CmdKind, RootKind};
use crate::xml::XmlNode;

/// Wire form of MANSCDP timestamps (`2024-03-01T08:00:00`).
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `<Result>` element values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ResultKind {
    #[default]
    Ok,
    Error,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Ok => "OK",
            ResultKind::Error => "ERROR",
        }
    }

    pub fn from_str_loose(text: &str) -> ResultKind {
        if text.trim().eq_ignore_ascii_case("ok") {
            ResultKind::Ok
        } else {
            ResultKind::Error
        }
    }
}

/// DeviceControl verbs. The first eight are protocol-defined fire-and-forget
/// controls; everything else expects a `<Result>` response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ControlVerb {
    /// `<PTZCmd>` with the 8-byte hex command string
    Ptz(String),
    /// `<TeleBoot>Boot</TeleBoot>`
    TeleBoot,
    /// `<IFrameCmd>Send</IFrameCmd>`
    IFrame,
    /// `<DragZoomIn>` with the zoom window payload
    DragZoomIn(XmlNode),
    /// `<DragZoomOut>` with the zoom window payload
    DragZoomOut(XmlNode),
    /// `<PtzPreciseCtrl>` payload
    PtzPrecise(XmlNode),
    /// `<FormatSDCard>` with the slot index
    FormatSdCard(u32),
    /// `<TargetTrack>` payload
    TargetTrack(XmlNode),
    /// Any other control element (RecordCmd, GuardCmd, AlarmCmd, ...)
    Other(XmlNode),
}

impl ControlVerb {
    /// Element name the verb is carried in.
    pub fn name(&self) -> &str {
        match self {
            ControlVerb::Ptz(_) => "PTZCmd",
            ControlVerb::TeleBoot => "TeleBoot",
            ControlVerb::IFrame => "IFrameCmd",
            ControlVerb::DragZoomIn(_) => "DragZoomIn",
            ControlVerb::DragZoomOut(_) => "DragZoomOut",
            ControlVerb::PtzPrecise(_) => "PtzPreciseCtrl",
            ControlVerb::FormatSdCard(_) => "FormatSDCard",
            ControlVerb::TargetTrack(_) => "TargetTrack",
            ControlVerb::Other(node) => &node.name,
        }
    }

    /// Whether the protocol defines this control as solicit-no-response.
    pub fn is_fire_and_forget(&self) -> bool {
        !matches!(self, ControlVerb::Other(_))
    }

    fn load(node: &XmlNode) -> CodecResult<ControlVerb> {
        for child in &node.children {
            let verb = match child.name.as_str() {
                "CmdType" | "SN" | "DeviceID" | "Reason" | "Info" => continue,
                "PTZCmd" => ControlVerb::Ptz(
                    child.text.as_deref().unwrap_or_default().trim().to_string(),
                ),
                "TeleBoot" => ControlVerb::TeleBoot,
                "IFrameCmd" => ControlVerb::IFrame,
                "DragZoomIn" => ControlVerb::DragZoomIn(child.clone()),
                "DragZoomOut" => ControlVerb::DragZoomOut(child.clone()),
                "PtzPreciseCtrl" => ControlVerb::PtzPrecise(child.clone()),
                "FormatSDCard" => ControlVerb::FormatSdCard(
                    child.text.as_deref().and_then(|t| t.trim().parse().ok()).unwrap_or(0),
                ),
                "TargetTrack" => ControlVerb::TargetTrack(child.clone()),
                _ => ControlVerb::Other(child.clone()),
            };
            return Ok(verb);
        }
        Err(CodecError::missing_field("control element", "DeviceControl"))
    }

    fn to_node(&self) -> XmlNode {
        match self {
            ControlVerb::Ptz(cmd) => XmlNode::leaf("PTZCmd", cmd.clone()),
            ControlVerb::TeleBoot => XmlNode::leaf("TeleBoot", "Boot"),
            ControlVerb::IFrame => XmlNode::leaf("IFrameCmd", "Send"),
            ControlVerb::DragZoomIn(node)
            | ControlVerb::DragZoomOut(node)
            | ControlVerb::PtzPrecise(node)
            | ControlVerb::TargetTrack(node)
            | ControlVerb::Other(node) => node.clone(),
            ControlVerb::FormatSdCard(slot) => XmlNode::leaf("FormatSDCard", slot.to_string()),
        }
    }
}

/// Bitmask of ConfigDownload categories, combined on the wire as
/// slash-separated names (`BasicParam/VideoParamOpt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ConfigMask(pub u16);

impl ConfigMask {
    pub const BASIC_PARAM: ConfigMask = ConfigMask(1);
    pub const VIDEO_PARAM_OPT: ConfigMask = ConfigMask(1 << 1);
    pub const SVAC_ENCODE: ConfigMask = ConfigMask(1 << 2);
    pub const SVAC_DECODE: ConfigMask = ConfigMask(1 << 3);

    const NAMES: [(u16, &'static str); 4] = [
        (1, "BasicParam"),
        (1 << 1, "VideoParamOpt"),
        (1 << 2, "SVACEncodeConfig"),
        (1 << 3, "SVACDecodeConfig"),
    ];

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: ConfigMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(&self, other: ConfigMask) -> ConfigMask {
        ConfigMask(self.0 | other.0)
    }

    /// Parse the slash-separated wire form. Unknown names are ignored, the
    /// way devices in the field tolerate newer category names.
    pub fn parse(text: &str) -> ConfigMask {
        let mut mask = 0;
        for part in text.split('/') {
            let part = part.trim();
            if let Some((bit, _)) = Self::NAMES.iter().find(|(_, n)| *n == part) {
                mask |= bit;
            }
        }
        ConfigMask(mask)
    }

    pub fn to_wire(&self) -> String {
        let mut names = Vec::new();
        for (bit, name) in Self::NAMES {
            if self.0 & bit != 0 {
                names.push(name);
            }
        }
        names.join("/")
    }
}

impl std::ops::BitOr for ConfigMask {
    type Output = ConfigMask;
    fn bitor(self, rhs: ConfigMask) -> ConfigMask {
        self.union(rhs)
    }
}

/// DeviceInfo response fields.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct DeviceInfoResponse {
    pub result: ResultKind,
    pub device_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub channel: Option<u32>,
}

/// Catalog query window (both bounds optional).
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CatalogQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// One `<Item>` of a catalog page.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CatalogItem {
    pub device_id: String,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub parent_id: Option<String>,
    pub status: Option<String>,
}

/// One page of a catalog response. `sum_num` is the total the peer claims
/// exists across all pages, `items` what this page carries.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CatalogResponse {
    pub sum_num: u32,
    pub items: Vec<CatalogItem>,
}

/// RecordInfo query fields.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct RecordInfoQuery {
    pub start_time: String,
    pub end_time: String,
    pub record_type: Option<String>,
}

impl RecordInfoQuery {
    /// Build a query over a closed time window.
    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> RecordInfoQuery {
        RecordInfoQuery {
            start_time: start.format(TIME_FORMAT).to_string(),
            end_time: end.format(TIME_FORMAT).to_string(),
            record_type: None,
        }
    }
}

/// One `<Item>` of a record listing page.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct RecordItem {
    pub device_id: String,
    pub name: Option<String>,
    pub file_path: Option<String>,
    pub start_time: String,
    pub end_time: String,
}

impl RecordItem {
    /// Recording window, when both timestamps parse. Vendors occasionally
    /// emit empty or non-conforming times; those items are still listed.
    pub fn period(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = NaiveDateTime::parse_from_str(&self.start_time, TIME_FORMAT).ok()?;
        let end = NaiveDateTime::parse_from_str(&self.end_time, TIME_FORMAT).ok()?;
        Some((start, end))
    }
}

/// One page of a record listing response.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct RecordInfoResponse {
    pub name: Option<String>,
    pub sum_num: u32,
    pub items: Vec<RecordItem>,
}

/// One ConfigDownload response page: which categories it carries plus the raw
/// parameter blocks (their inner schema is vendor-elastic and passed through).
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ConfigDownloadResponse {
    pub result: ResultKind,
    pub mask: ConfigMask,
    pub params: Vec<XmlNode>,
}

/// Alarm notify fields.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct AlarmNotify {
    pub priority: Option<String>,
    pub method: Option<String>,
    pub time: Option<String>,
    pub description: Option<String>,
}

/// Keepalive notify: overall status plus device ids reported faulty.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Keepalive {
    pub status: ResultKind,
    pub faulty_devices: Vec<String>,
}

/// The command-specific part of a message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MessageDetail {
    /// Envelope-only body (DeviceInfo query, PresetQuery, ...)
    Empty,
    DeviceInfoResponse(DeviceInfoResponse),
    CatalogQuery(CatalogQuery),
    CatalogResponse(CatalogResponse),
    RecordInfoQuery(RecordInfoQuery),
    RecordInfoResponse(RecordInfoResponse),
    ConfigDownloadQuery(ConfigMask),
    ConfigDownloadResponse(ConfigDownloadResponse),
    DeviceControl(ControlVerb),
    Alarm(AlarmNotify),
    Keepalive(Keepalive),
    /// Bare `<Result>` response body
    SimpleResult(ResultKind),
    /// Unrecognized command: body children preserved verbatim
    Raw(Vec<XmlNode>),
}

impl Default for MessageDetail {
    fn default() -> Self {
        MessageDetail::Empty
    }
}

const ENVELOPE_FIELDS: [&str; 4] = ["CmdType", "SN", "DeviceID", "Reason"];

fn body_children(root: &XmlNode) -> Vec<XmlNode> {
    root.children
        .iter()
        .filter(|c| !ENVELOPE_FIELDS.contains(&c.name.as_str()))
        .cloned()
        .collect()
}

impl MessageDetail {
    /// Load the command-specific fields from an already-validated envelope.
    pub fn load(root_kind: RootKind, command: &CmdKind, root: &XmlNode) -> CodecResult<MessageDetail> {
        use MessageDetail as D;
        let detail = match (root_kind, command) {
            (RootKind::Query, CmdKind::Catalog) => D::CatalogQuery(CatalogQuery {
                start_time: root.child_text("StartTime").map(String::from),
                end_time: root.child_text("EndTime").map(String::from),
            }),
            (RootKind::Response | RootKind::Notify, CmdKind::Catalog) => {
                let sum_num = root
                    .child_parse::<u32>("SumNum")
                    .ok_or_else(|| CodecError::missing_field("SumNum", "Catalog"))?;
                let mut items = Vec::new();
                if let Some(list) = root.child("DeviceList") {
                    for item in list.children.iter().filter(|c| c.name == "Item") {
                        items.push(load_catalog_item(item)?);
                    }
                }
                D::CatalogResponse(CatalogResponse { sum_num, items })
            }
            (RootKind::Query, CmdKind::DeviceInfo) => D::Empty,
            (RootKind::Response, CmdKind::DeviceInfo) => D::DeviceInfoResponse(DeviceInfoResponse {
                result: root
                    .child_text("Result")
                    .map(ResultKind::from_str_loose)
                    .unwrap_or_default(),
                device_name: root.child_text("DeviceName").map(String::from),
                manufacturer: root.child_text("Manufacturer").map(String::from),
                model: root.child_text("Model").map(String::from),
                firmware: root.child_text("Firmware").map(String::from),
                channel: root.child_parse("Channel"),
            }),
            (RootKind::Query, CmdKind::RecordInfo) => D::RecordInfoQuery(RecordInfoQuery {
                start_time: root
                    .child_text("StartTime")
                    .map(String::from)
                    .ok_or_else(|| CodecError::missing_field("StartTime", "RecordInfo"))?,
                end_time: root
                    .child_text("EndTime")
                    .map(String::from)
                    .ok_or_else(|| CodecError::missing_field("EndTime", "RecordInfo"))?,
                record_type: root.child_text("Type").map(String::from),
            }),
            (RootKind::Response, CmdKind::RecordInfo) => {
                let sum_num = root
                    .child_parse::<u32>("SumNum")
                    .ok_or_else(|| CodecError::missing_field("SumNum", "RecordInfo"))?;
                let mut items = Vec::new();
                if let Some(list) = root.child("RecordList") {
                    for item in list.children.iter().filter(|c| c.name == "Item") {
                        items.push(load_record_item(item)?);
                    }
                }
                D::RecordInfoResponse(RecordInfoResponse {
                    name: root.child_text("Name").map(String::from),
                    sum_num,
                    items,
                })
            }
            (RootKind::Query, CmdKind::ConfigDownload) => {
                let text = root
                    .child_text("ConfigType")
                    .ok_or_else(|| CodecError::missing_field("ConfigType", "ConfigDownload"))?;
                D::ConfigDownloadQuery(ConfigMask::parse(text))
            }
            (RootKind::Response, CmdKind::ConfigDownload) => {
                let result = root
                    .child_text("Result")
                    .map(ResultKind::from_str_loose)
                    .unwrap_or_default();
                let mask = root
                    .child_text("ConfigType")
                    .map(ConfigMask::parse)
                    .unwrap_or_default();
                let params = body_children(root)
                    .into_iter()
                    .filter(|c| c.name != "Result" && c.name != "ConfigType")
                    .collect();
                D::ConfigDownloadResponse(ConfigDownloadResponse { result, mask, params })
            }
            (RootKind::Control, CmdKind::DeviceControl) => D::DeviceControl(ControlVerb::load(root)?),
            (RootKind::Notify, CmdKind::Alarm) => D::Alarm(AlarmNotify {
                priority: root.child_text("AlarmPriority").map(String::from),
                method: root.child_text("AlarmMethod").map(String::from),
                time: root.child_text("AlarmTime").map(String::from),
                description: root.child_text("AlarmDescription").map(String::from),
            }),
            (RootKind::Notify, CmdKind::Keepalive) => {
                let status = root
                    .child_text("Status")
                    .map(ResultKind::from_str_loose)
                    .ok_or_else(|| CodecError::missing_field("Status", "Keepalive"))?;
                let faulty_devices = root
                    .child("Info")
                    .map(|info| {
                        info.children
                            .iter()
                            .filter(|c| c.name == "DeviceID")
                            .filter_map(|c| c.text.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                D::Keepalive(Keepalive { status, faulty_devices })
            }
            (RootKind::Response, _) if root.child_text("Result").is_some() && body_children(root).len() == 1 => {
                D::SimpleResult(ResultKind::from_str_loose(root.child_text("Result").unwrap_or("ERROR")))
            }
            _ => {
                let body = body_children(root);
                if body.is_empty() {
                    D::Empty
                } else {
                    D::Raw(body)
                }
            }
        };
        Ok(detail)
    }

    /// Produce the command-specific elements, in schema order.
    pub fn to_nodes(&self) -> CodecResult<Vec<XmlNode>> {
        use MessageDetail as D;
        let nodes = match self {
            D::Empty => Vec::new(),
            D::DeviceInfoResponse(info) => {
                let mut out = vec![XmlNode::leaf("Result", info.result.as_str())];
                push_opt(&mut out, "DeviceName", &info.device_name);
                push_opt(&mut out, "Manufacturer", &info.manufacturer);
                push_opt(&mut out, "Model", &info.model);
                push_opt(&mut out, "Firmware", &info.firmware);
                if let Some(channel) = info.channel {
                    out.push(XmlNode::leaf("Channel", channel.to_string()));
                }
                out
            }
            D::CatalogQuery(q) => {
                let mut out = Vec::new();
                push_opt(&mut out, "StartTime", &q.start_time);
                push_opt(&mut out, "EndTime", &q.end_time);
                out
            }
            D::CatalogResponse(page) => {
                let items: Vec<XmlNode> = page.items.iter().map(catalog_item_node).collect();
                vec![
                    XmlNode::leaf("SumNum", page.sum_num.to_string()),
                    XmlNode::branch("DeviceList", items)
                        .with_attr("Num", page.items.len().to_string()),
                ]
            }
            D::RecordInfoQuery(q) => {
                let mut out = vec![
                    XmlNode::leaf("StartTime", q.start_time.clone()),
                    XmlNode::leaf("EndTime", q.end_time.clone()),
                ];
                push_opt(&mut out, "Type", &q.record_type);
                out
            }
            D::RecordInfoResponse(page) => {
                let mut out = Vec::new();
                push_opt(&mut out, "Name", &page.name);
                out.push(XmlNode::leaf("SumNum", page.sum_num.to_string()));
                let items: Vec<XmlNode> = page.items.iter().map(record_item_node).collect();
                out.push(
                    XmlNode::branch("RecordList", items)
                        .with_attr("Num", page.items.len().to_string()),
                );
                out
            }
            D::ConfigDownloadQuery(mask) => {
                if mask.is_empty() {
                    return Err(CodecError::missing_field("ConfigType", "ConfigDownload"));
                }
                vec![XmlNode::leaf("ConfigType", mask.to_wire())]
            }
            D::ConfigDownloadResponse(resp) => {
                let mut out = vec![XmlNode::leaf("Result", resp.result.as_str())];
                if !resp.mask.is_empty() {
                    out.push(XmlNode::leaf("ConfigType", resp.mask.to_wire()));
                }
                out.extend(resp.params.iter().cloned());
                out
            }
            D::DeviceControl(verb) => vec![verb.to_node()],
            D::Alarm(alarm) => {
                let mut out = Vec::new();
                push_opt(&mut out, "AlarmPriority", &alarm.priority);
                push_opt(&mut out, "AlarmMethod", &alarm.method);
                push_opt(&mut out, "AlarmTime", &alarm.time);
                push_opt(&mut out, "AlarmDescription", &alarm.description);
                out
            }
            D::Keepalive(ka) => {
                let mut out = vec![XmlNode::leaf("Status", ka.status.as_str())];
                if !ka.faulty_devices.is_empty() {
                    out.push(XmlNode::branch(
                        "Info",
                        ka.faulty_devices
                            .iter()
                            .map(|id| XmlNode::leaf("DeviceID", id.clone()))
                            .collect(),
                    ));
                }
                out
            }
            D::SimpleResult(result) => vec![XmlNode::leaf("Result", result.as_str())],
            D::Raw(nodes) => nodes.clone(),
        };
        Ok(nodes)
    }

    /// Total item count the peer claims exists, for paginated responses.
    pub fn sum_num(&self) -> Option<u32> {
        match self {
            MessageDetail::CatalogResponse(page) => Some(page.sum_num),
            MessageDetail::RecordInfoResponse(page) => Some(page.sum_num),
            _ => None,
        }
    }

    /// Items actually carried in this message, for paginated responses.
    pub fn item_count(&self) -> Option<u32> {
        match self {
            MessageDetail::CatalogResponse(page) => Some(page.items.len() as u32),
            MessageDetail::RecordInfoResponse(page) => Some(page.items.len() as u32),
            _ => None,
        }
    }

    /// Config categories this body requests or carries.
    pub fn config_mask(&self) -> Option<ConfigMask> {
        match self {
            MessageDetail::ConfigDownloadQuery(mask) => Some(*mask),
            MessageDetail::ConfigDownloadResponse(resp) => Some(resp.mask),
            _ => None,
        }
    }

    /// The control verb, when this is a DeviceControl body.
    pub fn control_verb(&self) -> Option<&ControlVerb> {
        match self {
            MessageDetail::DeviceControl(verb) => Some(verb),
            _ => None,
        }
    }

    /// `<Result>` carried by this body, when it has one.
    pub fn result(&self) -> Option<ResultKind> {
        match self {
            MessageDetail::SimpleResult(r) => Some(*r),
            MessageDetail::DeviceInfoResponse(info) => Some(info.result),
            MessageDetail::ConfigDownloadResponse(resp) => Some(resp.result),
            MessageDetail::Keepalive(ka) => Some(ka.status),
            _ => None,
        }
    }
}

fn push_opt(out: &mut Vec<XmlNode>, name: &str, value: &Option<String>) {
    if let Some(v) = value {
        if !v.is_empty() {
            out.push(XmlNode::leaf(name, v.clone()));
        }
    }
}

fn load_catalog_item(item: &XmlNode) -> CodecResult<CatalogItem> {
    Ok(CatalogItem {
        device_id: item
            .child_text("DeviceID")
            .map(String::from)
            .ok_or_else(|| CodecError::missing_field("Item/DeviceID", "Catalog"))?,
        name: item.child_text("Name").map(String::from),
        manufacturer: item.child_text("Manufacturer").map(String::from),
        model: item.child_text("Model").map(String::from),
        parent_id: item.child_text("ParentID").map(String::from),
        status: item.child_text("Status").map(String::from),
    })
}

fn catalog_item_node(item: &CatalogItem) -> XmlNode {
    let mut out = vec![XmlNode::leaf("DeviceID", item.device_id.clone())];
    push_opt(&mut out, "Name", &item.name);
    push_opt(&mut out, "Manufacturer", &item.manufacturer);
    push_opt(&mut out, "Model", &item.model);
    push_opt(&mut out, "ParentID", &item.parent_id);
    push_opt(&mut out, "Status", &item.status);
    XmlNode::branch("Item", out)
}

fn load_record_item(item: &XmlNode) -> CodecResult<RecordItem> {
    Ok(RecordItem {
        device_id: item
            .child_text("DeviceID")
            .map(String::from)
            .ok_or_else(|| CodecError::missing_field("Item/DeviceID", "RecordInfo"))?,
        name: item.child_text("Name").map(String::from),
        file_path: item.child_text("FilePath").map(String::from),
        start_time: item
            .child_text("StartTime")
            .map(String::from)
            .ok_or_else(|| CodecError::missing_field("Item/StartTime", "RecordInfo"))?,
        end_time: item
            .child_text("EndTime")
            .map(String::from)
            .ok_or_else(|| CodecError::missing_field("Item/EndTime", "RecordInfo"))?,
    })
}

fn record_item_node(item: &RecordItem) -> XmlNode {
    let mut out = vec![XmlNode::leaf("DeviceID", item.device_id.clone())];
    push_opt(&mut out, "Name", &item.name);
    push_opt(&mut out, "FilePath", &item.file_path);
    out.push(XmlNode::leaf("StartTime", item.start_time.clone()));
    out.push(XmlNode::leaf("EndTime", item.end_time.clone()));
    XmlNode::branch("Item", out)
}
