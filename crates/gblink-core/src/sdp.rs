//! SDP session descriptions with the GB/T 28181 extensions.
//!
//! The GB dialect is standard `v=/o=/s=/c=/t=/m=/a=` SDP plus:
//!
//! - `s=` carries the session type (`Play`, `Playback`, `Download`, `Talk`)
//! - `y=` carries the 10-digit zero-padded SSRC
//! - `f=` carries the compound stream-mode flags string
//! - media attributes `a=streamnumber:`, `a=streammode:`, `a=downloadspeed:`,
//!   `a=filesize:`
//! - ICE attributes (`a=ice-ufrag`, `a=ice-pwd`, `a=candidate:`) per RFC 5245
//!
//! One canonical model covers both directions; unknown attributes are
//! preserved so regenerated descriptions stay faithful.

use crate::error::{CodecError, CodecResult};

/// The `s=` session type.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionType {
    /// Live viewing
    Play,
    /// Historical playback
    Playback,
    /// File download
    Download,
    /// Two-way audio
    Talk,
    Other(String),
}

impl SessionType {
    pub fn as_str(&self) -> &str {
        match self {
            SessionType::Play => "Play",
            SessionType::Playback => "Playback",
            SessionType::Download => "Download",
            SessionType::Talk => "Talk",
            SessionType::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> SessionType {
        match name {
            "Play" => SessionType::Play,
            "Playback" => SessionType::Playback,
            "Download" => SessionType::Download,
            "Talk" => SessionType::Talk,
            other => SessionType::Other(other.to_string()),
        }
    }

    /// Whether this session supports the playback control sub-protocol.
    pub fn is_playback(&self) -> bool {
        matches!(self, SessionType::Playback | SessionType::Download)
    }
}

/// The `o=` origin line (only the IN IP4 form appears in this protocol).
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Origin {
    pub owner: String,
    pub session_id: u64,
    pub session_version: u64,
    pub address: String,
}

/// One media payload mapping (`a=rtpmap:96 PS/90000`).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RtpMap {
    pub payload: u8,
    pub encoding: String,
    pub clock_rate: u32,
}

/// Stream direction attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    SendOnly,
    RecvOnly,
    SendRecv,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::SendOnly => "sendonly",
            Direction::RecvOnly => "recvonly",
            Direction::SendRecv => "sendrecv",
        }
    }
}

/// One ICE candidate (RFC 5245 syntax).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u32,
    pub transport: String,
    pub priority: u64,
    pub address: String,
    pub port: u16,
    pub kind: String,
    pub raddr: Option<String>,
    pub rport: Option<u16>,
}

impl IceCandidate {
    fn parse(value: &str) -> CodecResult<IceCandidate> {
        let mut parts = value.split_ascii_whitespace();
        let mut next = |what: &str| {
            parts
                .next()
                .ok_or_else(|| CodecError::sdp(format!("candidate missing {what}")))
        };
        let foundation = next("foundation")?.to_string();
        let component = next("component")?
            .parse()
            .map_err(|_| CodecError::sdp("bad candidate component"))?;
        let transport = next("transport")?.to_string();
        let priority = next("priority")?
            .parse()
            .map_err(|_| CodecError::sdp("bad candidate priority"))?;
        let address = next("address")?.to_string();
        let port = next("port")?
            .parse()
            .map_err(|_| CodecError::sdp("bad candidate port"))?;
        if next("typ keyword")? != "typ" {
            return Err(CodecError::sdp("candidate missing typ keyword"));
        }
        let kind = next("type")?.to_string();

        let mut raddr = None;
        let mut rport = None;
        let rest: Vec<&str> = parts.collect();
        let mut i = 0;
        while i + 1 < rest.len() {
            match rest[i] {
                "raddr" => raddr = Some(rest[i + 1].to_string()),
                "rport" => {
                    rport = Some(
                        rest[i + 1]
                            .parse()
                            .map_err(|_| CodecError::sdp("bad candidate rport"))?,
                    )
                }
                _ => {}
            }
            i += 2;
        }
        Ok(IceCandidate { foundation, component, transport, priority, address, port, kind, raddr, rport })
    }

    fn to_line(&self) -> String {
        let mut line = format!(
            "a=candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.kind
        );
        if let Some(raddr) = &self.raddr {
            line.push_str(&format!(" raddr {raddr}"));
        }
        if let Some(rport) = self.rport {
            line.push_str(&format!(" rport {rport}"));
        }
        line
    }
}

/// One `m=` block and its attributes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaDescription {
    /// "video" or "audio"
    pub kind: String,
    pub port: u16,
    /// "RTP/AVP" or "TCP/RTP/AVP"
    pub proto: String,
    pub formats: Vec<u8>,
    pub rtpmaps: Vec<RtpMap>,
    pub direction: Option<Direction>,
    /// `a=setup:active|passive` for TCP media
    pub setup: Option<String>,
    /// `a=connection:new`
    pub connection_new: bool,
    pub stream_number: Option<u32>,
    pub stream_mode: Option<String>,
    pub download_speed: Option<u32>,
    pub file_size: Option<u64>,
    pub ice_ufrag: Option<String>,
    pub ice_pwd: Option<String>,
    pub candidates: Vec<IceCandidate>,
    /// Unrecognized attribute values, preserved verbatim
    pub other_attrs: Vec<String>,
}

impl MediaDescription {
    pub fn new(kind: impl Into<String>, port: u16, proto: impl Into<String>) -> Self {
        MediaDescription {
            kind: kind.into(),
            port,
            proto: proto.into(),
            formats: Vec::new(),
            rtpmaps: Vec::new(),
            direction: None,
            setup: None,
            connection_new: false,
            stream_number: None,
            stream_mode: None,
            download_speed: None,
            file_size: None,
            ice_ufrag: None,
            ice_pwd: None,
            candidates: Vec::new(),
            other_attrs: Vec::new(),
        }
    }

    fn apply_attr(&mut self, value: &str) -> CodecResult<()> {
        match value.split_once(':') {
            Some(("rtpmap", rest)) => {
                let (payload, enc) = rest
                    .trim()
                    .split_once(' ')
                    .ok_or_else(|| CodecError::sdp("bad rtpmap"))?;
                let (encoding, rate) = enc
                    .trim()
                    .split_once('/')
                    .ok_or_else(|| CodecError::sdp("bad rtpmap clock"))?;
                self.rtpmaps.push(RtpMap {
                    payload: payload.trim().parse().map_err(|_| CodecError::sdp("bad rtpmap payload"))?,
                    encoding: encoding.to_string(),
                    clock_rate: rate
                        .split('/')
                        .next()
                        .unwrap_or(rate)
                        .parse()
                        .map_err(|_| CodecError::sdp("bad rtpmap rate"))?,
                });
            }
            Some(("setup", rest)) => self.setup = Some(rest.trim().to_string()),
            Some(("streamnumber", rest)) => {
                self.stream_number =
                    Some(rest.trim().parse().map_err(|_| CodecError::sdp("bad streamnumber"))?)
            }
            Some(("streammode", rest)) => self.stream_mode = Some(rest.trim().to_string()),
            Some(("downloadspeed", rest)) => {
                self.download_speed =
                    Some(rest.trim().parse().map_err(|_| CodecError::sdp("bad downloadspeed"))?)
            }
            Some(("filesize", rest)) => {
                self.file_size =
                    Some(rest.trim().parse().map_err(|_| CodecError::sdp("bad filesize"))?)
            }
            Some(("ice-ufrag", rest)) => self.ice_ufrag = Some(rest.trim().to_string()),
            Some(("ice-pwd", rest)) => self.ice_pwd = Some(rest.trim().to_string()),
            Some(("candidate", rest)) => self.candidates.push(IceCandidate::parse(rest)?),
            _ => match value {
                "sendonly" => self.direction = Some(Direction::SendOnly),
                "recvonly" => self.direction = Some(Direction::RecvOnly),
                "sendrecv" => self.direction = Some(Direction::SendRecv),
                "connection:new" => self.connection_new = true,
                other => self.other_attrs.push(other.to_string()),
            },
        }
        Ok(())
    }

    fn write(&self, out: &mut String) {
        out.push_str(&format!("m={} {} {}", self.kind, self.port, self.proto));
        for fmt in &self.formats {
            out.push_str(&format!(" {fmt}"));
        }
        out.push_str("\r\n");
        if let Some(setup) = &self.setup {
            out.push_str(&format!("a=setup:{setup}\r\n"));
        }
        if self.connection_new {
            out.push_str("a=connection:new\r\n");
        }
        if let Some(direction) = self.direction {
            out.push_str(&format!("a={}\r\n", direction.as_str()));
        }
        for map in &self.rtpmaps {
            out.push_str(&format!("a=rtpmap:{} {}/{}\r\n", map.payload, map.encoding, map.clock_rate));
        }
        if let Some(n) = self.stream_number {
            out.push_str(&format!("a=streamnumber:{n}\r\n"));
        }
        if let Some(mode) = &self.stream_mode {
            out.push_str(&format!("a=streammode:{mode}\r\n"));
        }
        if let Some(speed) = self.download_speed {
            out.push_str(&format!("a=downloadspeed:{speed}\r\n"));
        }
        if let Some(size) = self.file_size {
            out.push_str(&format!("a=filesize:{size}\r\n"));
        }
        if let Some(ufrag) = &self.ice_ufrag {
            out.push_str(&format!("a=ice-ufrag:{ufrag}\r\n"));
        }
        if let Some(pwd) = &self.ice_pwd {
            out.push_str(&format!("a=ice-pwd:{pwd}\r\n"));
        }
        for candidate in &self.candidates {
            out.push_str(&candidate.to_line());
            out.push_str("\r\n");
        }
        for attr in &self.other_attrs {
            out.push_str(&format!("a={attr}\r\n"));
        }
    }
}

/// A complete session description.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionDescription {
    pub origin: Origin,
    pub session_type: SessionType,
    /// `u=` line, used by playback/download to name the recording
    pub uri: Option<String>,
    /// `c=` address
    pub connection: Option<String>,
    pub start_time: u64,
    pub stop_time: u64,
    pub media: Vec<MediaDescription>,
    /// `y=` SSRC
    pub ssrc: Option<u32>,
    /// `f=` media parameter flags, passed through verbatim
    pub media_params: Option<String>,
    /// Session-level attributes not modeled above
    pub session_attrs: Vec<String>,
}

impl SessionDescription {
    pub fn new(session_type: SessionType, origin: Origin) -> Self {
        SessionDescription {
            origin,
            session_type,
            uri: None,
            connection: None,
            start_time: 0,
            stop_time: 0,
            media: Vec::new(),
            ssrc: None,
            media_params: None,
            session_attrs: Vec::new(),
        }
    }

    /// Parse CRLF- (or LF-) separated SDP text.
    pub fn parse(text: &str) -> CodecResult<SessionDescription> {
        let mut origin = None;
        let mut session_type = None;
        let mut uri = None;
        let mut connection = None;
        let mut timing = (0u64, 0u64);
        let mut media: Vec<MediaDescription> = Vec::new();
        let mut ssrc = None;
        let mut media_params = None;
        let mut session_attrs = Vec::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| CodecError::sdp(format!("not a key=value line: {line}")))?;
            match key {
                "v" => {
                    if value.trim() != "0" {
                        return Err(CodecError::sdp(format!("unsupported version {value}")));
                    }
                }
                "o" => {
                    let parts: Vec<&str> = value.split_ascii_whitespace().collect();
                    if parts.len() < 6 {
                        return Err(CodecError::sdp("short origin line"));
                    }
                    origin = Some(Origin {
                        owner: parts[0].to_string(),
                        session_id: parts[1].parse().unwrap_or(0),
                        session_version: parts[2].parse().unwrap_or(0),
                        address: parts[5].to_string(),
                    });
                }
                "s" => session_type = Some(SessionType::from_name(value.trim())),
                "u" => uri = Some(value.trim().to_string()),
                "c" => {
                    connection = value.split_ascii_whitespace().nth(2).map(String::from);
                }
                "t" => {
                    let mut parts = value.split_ascii_whitespace();
                    timing.0 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                    timing.1 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                }
                "m" => {
                    let parts: Vec<&str> = value.split_ascii_whitespace().collect();
                    if parts.len() < 3 {
                        return Err(CodecError::sdp("short media line"));
                    }
                    let mut desc = MediaDescription::new(
                        parts[0],
                        parts[1].parse().map_err(|_| CodecError::sdp("bad media port"))?,
                        parts[2],
                    );
                    for fmt in &parts[3..] {
                        if let Ok(payload) = fmt.parse() {
                            desc.formats.push(payload);
                        }
                    }
                    media.push(desc);
                }
                "a" => match media.last_mut() {
                    Some(desc) => desc.apply_attr(value)?,
                    None => session_attrs.push(value.to_string()),
                },
                "y" => {
                    ssrc = Some(
                        value.trim().parse().map_err(|_| CodecError::sdp("bad y= SSRC"))?,
                    )
                }
                "f" => media_params = Some(value.trim().to_string()),
                // i=/e=/p=/b=/r=/z=/k= are legal but carry nothing we act on.
                _ => {}
            }
        }

        Ok(SessionDescription {
            origin: origin.ok_or_else(|| CodecError::sdp("missing o= line"))?,
            session_type: session_type.ok_or_else(|| CodecError::sdp("missing s= line"))?,
            uri,
            connection,
            start_time: timing.0,
            stop_time: timing.1,
            media,
            ssrc,
            media_params,
            session_attrs,
        })
    }

    /// Generate CRLF-separated SDP text.
    pub fn generate(&self) -> String {
        let mut out = String::with_capacity(384);
        out.push_str("v=0\r\n");
        out.push_str(&format!(
            "o={} {} {} IN IP4 {}\r\n",
            self.origin.owner, self.origin.session_id, self.origin.session_version, self.origin.address
        ));
        out.push_str(&format!("s={}\r\n", self.session_type.as_str()));
        if let Some(uri) = &self.uri {
            out.push_str(&format!("u={uri}\r\n"));
        }
        if let Some(addr) = &self.connection {
            out.push_str(&format!("c=IN IP4 {addr}\r\n"));
        }
        out.push_str(&format!("t={} {}\r\n", self.start_time, self.stop_time));
        for attr in &self.session_attrs {
            out.push_str(&format!("a={attr}\r\n"));
        }
        for media in &self.media {
            media.write(&mut out);
        }
        if let Some(ssrc) = self.ssrc {
            out.push_str(&format!("y={ssrc:010}\r\n"));
        }
        if let Some(params) = &self.media_params {
            out.push_str(&format!("f={params}\r\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYBACK_OFFER: &str = "v=0\r\n\
o=34020000001110000009 0 0 IN IP4 192.168.110.254\r\n\
s=Playback\r\n\
u=34020000001310000001:0\r\n\
c=IN IP4 192.168.110.254\r\n\
t=1757289597 1757293200\r\n\
m=video 62874 RTP/AVP 96\r\n\
a=sendonly\r\n\
a=rtpmap:96 PS/90000\r\n\
y=0000004362\r\n\
f=v/2/6/25/1/4096a///\r\n";

    #[test]
    fn parses_playback_offer() {
        let sdp = SessionDescription::parse(PLAYBACK_OFFER).unwrap();
        assert_eq!(sdp.session_type, SessionType::Playback);
        assert!(sdp.session_type.is_playback());
        assert_eq!(sdp.origin.owner, "34020000001110000009");
        assert_eq!(sdp.connection.as_deref(), Some("192.168.110.254"));
        assert_eq!(sdp.start_time, 1757289597);
        assert_eq!(sdp.ssrc, Some(4362));
        assert_eq!(sdp.media_params.as_deref(), Some("v/2/6/25/1/4096a///"));
        let media = &sdp.media[0];
        assert_eq!(media.port, 62874);
        assert_eq!(media.direction, Some(Direction::SendOnly));
        assert_eq!(media.rtpmaps[0].encoding, "PS");
        assert_eq!(media.rtpmaps[0].clock_rate, 90000);
    }

    #[test]
    fn generate_round_trips() {
        let sdp = SessionDescription::parse(PLAYBACK_OFFER).unwrap();
        let text = sdp.generate();
        let reparsed = SessionDescription::parse(&text).unwrap();
        assert_eq!(reparsed, sdp);
        // The SSRC stays 10-digit zero-padded on the wire.
        assert!(text.contains("y=0000004362\r\n"));
    }

    #[test]
    fn tcp_media_with_gb_attributes() {
        let text = "v=0\r\n\
o=34020000001110000009 0 0 IN IP4 10.0.0.1\r\n\
s=Download\r\n\
c=IN IP4 10.0.0.2\r\n\
t=0 0\r\n\
m=video 9000 TCP/RTP/AVP 96\r\n\
a=setup:passive\r\n\
a=connection:new\r\n\
a=recvonly\r\n\
a=rtpmap:96 PS/90000\r\n\
a=streamnumber:1\r\n\
a=downloadspeed:4\r\n\
a=filesize:1048576\r\n";
        let sdp = SessionDescription::parse(text).unwrap();
        let media = &sdp.media[0];
        assert_eq!(media.proto, "TCP/RTP/AVP");
        assert_eq!(media.setup.as_deref(), Some("passive"));
        assert!(media.connection_new);
        assert_eq!(media.stream_number, Some(1));
        assert_eq!(media.download_speed, Some(4));
        assert_eq!(media.file_size, Some(1048576));
        assert_eq!(SessionDescription::parse(&sdp.generate()).unwrap(), sdp);
    }

    #[test]
    fn ice_attributes_round_trip() {
        let text = "v=0\r\n\
o=owner 1 2 IN IP4 10.0.0.1\r\n\
s=Play\r\n\
t=0 0\r\n\
m=video 5000 RTP/AVP 96\r\n\
a=ice-ufrag:F7gI\r\n\
a=ice-pwd:x9cml/YzichV2+XlhiMu8g\r\n\
a=candidate:1 1 UDP 2130706431 10.0.1.1 5000 typ host\r\n\
a=candidate:2 1 UDP 1694498815 192.0.2.3 5002 typ srflx raddr 10.0.1.1 rport 5000\r\n";
        let sdp = SessionDescription::parse(text).unwrap();
        let media = &sdp.media[0];
        assert_eq!(media.ice_ufrag.as_deref(), Some("F7gI"));
        assert_eq!(media.candidates.len(), 2);
        assert_eq!(media.candidates[1].kind, "srflx");
        assert_eq!(media.candidates[1].raddr.as_deref(), Some("10.0.1.1"));
        assert_eq!(media.candidates[1].rport, Some(5000));
        assert_eq!(SessionDescription::parse(&sdp.generate()).unwrap(), sdp);
    }

    #[test]
    fn missing_required_lines_fail() {
        assert!(SessionDescription::parse("v=0\r\ns=Play\r\n").is_err());
        assert!(SessionDescription::parse("v=0\r\no=a 0 0 IN IP4 1.2.3.4\r\n").is_err());
    }
}
