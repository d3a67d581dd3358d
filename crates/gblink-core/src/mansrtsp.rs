//! Playback control messages carried in SIP INFO bodies.
//!
//! These are single RTSP/1.0 request or response heads with no body:
//! `PLAY` (resume, seek, speed change), `PAUSE`, and `TEARDOWN`. Positions
//! use NPT ranges (`Range: npt=now-`, `Range: npt=120-`).

use std::fmt;

use crate::error::{CodecError, CodecResult};

/// The request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ControlAction {
    Play,
    Pause,
    Teardown,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Play => "PLAY",
            ControlAction::Pause => "PAUSE",
            ControlAction::Teardown => "TEARDOWN",
        }
    }

    fn from_method(method: &str) -> CodecResult<ControlAction> {
        match method {
            "PLAY" => Ok(ControlAction::Play),
            "PAUSE" => Ok(ControlAction::Pause),
            "TEARDOWN" => Ok(ControlAction::Teardown),
            other => Err(CodecError::rtsp(format!("unknown method {other}"))),
        }
    }
}

/// A normal-play-time position: `now` or seconds from the start.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum NptTime {
    Now,
    Seconds(f64),
}

impl fmt::Display for NptTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NptTime::Now => f.write_str("now"),
            NptTime::Seconds(s) => {
                if s.fract() == 0.0 {
                    write!(f, "{}", *s as u64)
                } else {
                    write!(f, "{s:.3}")
                }
            }
        }
    }
}

impl NptTime {
    fn parse(text: &str) -> CodecResult<NptTime> {
        if text == "now" {
            return Ok(NptTime::Now);
        }
        text.parse()
            .map(NptTime::Seconds)
            .map_err(|_| CodecError::rtsp(format!("bad npt time {text}")))
    }
}

/// `npt=<start>-[<end>]`
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NptRange {
    pub start: NptTime,
    pub end: Option<f64>,
}

impl NptRange {
    pub fn from_now() -> NptRange {
        NptRange { start: NptTime::Now, end: None }
    }

    pub fn from_seconds(start: f64) -> NptRange {
        NptRange { start: NptTime::Seconds(start), end: None }
    }

    pub fn parse(text: &str) -> CodecResult<NptRange> {
        let spec = text
            .strip_prefix("npt=")
            .ok_or_else(|| CodecError::rtsp(format!("not an npt range: {text}")))?;
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| CodecError::rtsp(format!("npt range missing dash: {text}")))?;
        let end = match end.trim() {
            "" => None,
            value => Some(
                value
                    .parse()
                    .map_err(|_| CodecError::rtsp(format!("bad npt end {value}")))?,
            ),
        };
        Ok(NptRange { start: NptTime::parse(start.trim())?, end })
    }
}

impl fmt::Display for NptRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "npt={}-", self.start)?;
        if let Some(end) = self.end {
            if end.fract() == 0.0 {
                write!(f, "{}", end as u64)?;
            } else {
                write!(f, "{end:.3}")?;
            }
        }
        Ok(())
    }
}

/// A playback control request head.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
    pub cseq: u32,
    pub range: Option<NptRange>,
    /// `Scale: 2.0` for fast-forward / slow-motion
    pub scale: Option<f32>,
    /// `PauseTime: now`
    pub pause_time_now: bool,
}

impl ControlRequest {
    /// Resume from the paused position.
    pub fn resume(cseq: u32) -> ControlRequest {
        ControlRequest {
            action: ControlAction::Play,
            cseq,
            range: Some(NptRange::from_now()),
            scale: None,
            pause_time_now: false,
        }
    }

    /// Jump to an absolute offset in seconds.
    pub fn seek(cseq: u32, seconds: f64) -> ControlRequest {
        ControlRequest {
            action: ControlAction::Play,
            cseq,
            range: Some(NptRange::from_seconds(seconds)),
            scale: None,
            pause_time_now: false,
        }
    }

    /// Change the playback rate.
    pub fn speed(cseq: u32, scale: f32) -> ControlRequest {
        ControlRequest {
            action: ControlAction::Play,
            cseq,
            range: None,
            scale: Some(scale),
            pause_time_now: false,
        }
    }

    pub fn pause(cseq: u32) -> ControlRequest {
        ControlRequest {
            action: ControlAction::Pause,
            cseq,
            range: None,
            scale: None,
            pause_time_now: true,
        }
    }

    pub fn teardown(cseq: u32) -> ControlRequest {
        ControlRequest {
            action: ControlAction::Teardown,
            cseq,
            range: None,
            scale: None,
            pause_time_now: false,
        }
    }

    pub fn parse(text: &str) -> CodecResult<ControlRequest> {
        let mut lines = non_empty_lines(text);
        let start = lines
            .next()
            .ok_or_else(|| CodecError::rtsp("empty control body"))?;
        let (method, version) = start
            .split_once(' ')
            .ok_or_else(|| CodecError::rtsp(format!("bad start line {start}")))?;
        if version.trim() != "RTSP/1.0" {
            return Err(CodecError::rtsp(format!("bad version in {start}")));
        }
        let mut request = ControlRequest {
            action: ControlAction::from_method(method)?,
            cseq: 0,
            range: None,
            scale: None,
            pause_time_now: false,
        };
        let mut saw_cseq = false;
        for line in lines {
            let (name, value) = header(line)?;
            match name.as_str() {
                "cseq" => {
                    request.cseq = value
                        .parse()
                        .map_err(|_| CodecError::rtsp(format!("bad CSeq {value}")))?;
                    saw_cseq = true;
                }
                "range" => request.range = Some(NptRange::parse(value)?),
                "scale" => {
                    request.scale = Some(
                        value
                            .parse()
                            .map_err(|_| CodecError::rtsp(format!("bad Scale {value}")))?,
                    )
                }
                "pausetime" => request.pause_time_now = value == "now",
                _ => {}
            }
        }
        if !saw_cseq {
            return Err(CodecError::rtsp("control request missing CSeq"));
        }
        Ok(request)
    }

    pub fn generate(&self) -> String {
        let mut out = format!("{} RTSP/1.0\r\nCSeq: {}\r\n", self.action.as_str(), self.cseq);
        if let Some(scale) = self.scale {
            out.push_str(&format!("Scale: {scale:.1}\r\n"));
        }
        if self.pause_time_now {
            out.push_str("PauseTime: now\r\n");
        }
        if let Some(range) = self.range {
            out.push_str(&format!("Range: {range}\r\n"));
        }
        out
    }
}

/// RTP resume info on a seek response (`RTP-Info: seq=...;rtptime=...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct RtpInfo {
    pub seq: Option<u32>,
    pub rtptime: Option<u64>,
}

/// A playback control response head.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlResponse {
    pub code: u16,
    pub reason: String,
    pub cseq: u32,
    pub range: Option<NptRange>,
    pub rtp_info: Option<RtpInfo>,
}

impl ControlResponse {
    pub fn ok(cseq: u32) -> ControlResponse {
        ControlResponse { code: 200, reason: "OK".to_string(), cseq, range: None, rtp_info: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn parse(text: &str) -> CodecResult<ControlResponse> {
        let mut lines = non_empty_lines(text);
        let start = lines
            .next()
            .ok_or_else(|| CodecError::rtsp("empty control body"))?;
        let mut parts = start.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        if version != "RTSP/1.0" {
            return Err(CodecError::rtsp(format!("bad status line {start}")));
        }
        let code = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| CodecError::rtsp(format!("bad status code in {start}")))?;
        let reason = parts.next().unwrap_or("").to_string();
        let mut response = ControlResponse { code, reason, cseq: 0, range: None, rtp_info: None };
        for line in lines {
            let (name, value) = header(line)?;
            match name.as_str() {
                "cseq" => {
                    response.cseq = value
                        .parse()
                        .map_err(|_| CodecError::rtsp(format!("bad CSeq {value}")))?
                }
                "range" => response.range = Some(NptRange::parse(value)?),
                "rtp-info" => {
                    let mut info = RtpInfo::default();
                    for item in value.split(';') {
                        match item.trim().split_once('=') {
                            Some(("seq", v)) => info.seq = v.parse().ok(),
                            Some(("rtptime", v)) => info.rtptime = v.parse().ok(),
                            _ => {}
                        }
                    }
                    response.rtp_info = Some(info);
                }
                _ => {}
            }
        }
        Ok(response)
    }

    pub fn generate(&self) -> String {
        let mut out = format!("RTSP/1.0 {} {}\r\nCSeq: {}\r\n", self.code, self.reason, self.cseq);
        if let Some(range) = self.range {
            out.push_str(&format!("Range: {range}\r\n"));
        }
        if let Some(info) = self.rtp_info {
            let mut items = Vec::new();
            if let Some(seq) = info.seq {
                items.push(format!("seq={seq}"));
            }
            if let Some(rtptime) = info.rtptime {
                items.push(format!("rtptime={rtptime}"));
            }
            out.push_str(&format!("RTP-Info: {}\r\n", items.join(";")));
        }
        out
    }
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

fn header(line: &str) -> CodecResult<(String, &str)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| CodecError::rtsp(format!("bad header line {line}")))?;
    Ok((name.trim().to_ascii_lowercase(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_wire_shape() {
        let body = ControlRequest::pause(2).generate();
        assert_eq!(body, "PAUSE RTSP/1.0\r\nCSeq: 2\r\nPauseTime: now\r\n");
        let parsed = ControlRequest::parse(&body).unwrap();
        assert_eq!(parsed.action, ControlAction::Pause);
        assert!(parsed.pause_time_now);
        assert_eq!(parsed.cseq, 2);
    }

    #[test]
    fn resume_and_seek() {
        let resume = ControlRequest::resume(3).generate();
        assert_eq!(resume, "PLAY RTSP/1.0\r\nCSeq: 3\r\nRange: npt=now-\r\n");

        let seek = ControlRequest::seek(4, 120.0).generate();
        assert_eq!(seek, "PLAY RTSP/1.0\r\nCSeq: 4\r\nRange: npt=120-\r\n");
        let parsed = ControlRequest::parse(&seek).unwrap();
        assert_eq!(parsed.range, Some(NptRange::from_seconds(120.0)));
    }

    #[test]
    fn speed_change() {
        let body = ControlRequest::speed(5, 2.0).generate();
        assert_eq!(body, "PLAY RTSP/1.0\r\nCSeq: 5\r\nScale: 2.0\r\n");
        assert_eq!(ControlRequest::parse(&body).unwrap().scale, Some(2.0));
    }

    #[test]
    fn teardown_has_no_extras() {
        let body = ControlRequest::teardown(6).generate();
        assert_eq!(body, "TEARDOWN RTSP/1.0\r\nCSeq: 6\r\n");
    }

    #[test]
    fn response_round_trip() {
        let mut response = ControlResponse::ok(4);
        response.range = Some(NptRange::from_seconds(120.0));
        response.rtp_info = Some(RtpInfo { seq: Some(1234), rtptime: Some(3600000) });
        let body = response.generate();
        assert!(body.starts_with("RTSP/1.0 200 OK\r\nCSeq: 4\r\n"));
        let parsed = ControlResponse::parse(&body).unwrap();
        assert_eq!(parsed, response);
        assert!(parsed.is_success());
    }

    #[test]
    fn failure_status_parses() {
        let parsed = ControlResponse::parse("RTSP/1.0 455 Method Not Valid in This State\r\nCSeq: 7\r\n").unwrap();
        assert_eq!(parsed.code, 455);
        assert!(!parsed.is_success());
        assert_eq!(parsed.reason, "Method Not Valid in This State");
    }

    #[test]
    fn missing_cseq_is_rejected() {
        assert!(ControlRequest::parse("PLAY RTSP/1.0\r\nRange: npt=now-\r\n").is_err());
        assert!(ControlRequest::parse("OPTIONS RTSP/1.0\r\nCSeq: 1\r\n").is_err());
    }
}
