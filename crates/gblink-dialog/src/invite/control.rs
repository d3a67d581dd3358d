//! Playback controls carried over mid-dialog INFO.
//!
//! Only Playback/Download sessions accept these; live Play and Talk have
//! no position to move. Each control is a fire-and-forget INFO round-trip
//! with its own deadline, outside the SN transaction table.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use gblink_core::mansrtsp::{ControlAction, ControlRequest, ControlResponse};
use tracing::{debug, warn};

use crate::errors::{DialogError, DialogResult};
use crate::invite::{InviteSession, InviteStatus};

/// Future returned by an inbound control handler.
pub type ControlFuture = Pin<Box<dyn Future<Output = ControlResponse> + Send>>;

/// Application hook deciding inbound PLAY/PAUSE controls.
pub type ControlHandler = Arc<dyn Fn(ControlRequest) -> ControlFuture + Send + Sync>;

impl InviteSession {
    /// Pause playback at the current position.
    pub async fn pause(self: &Arc<Self>) -> DialogResult<ControlResponse> {
        let cseq = self.next_cseq();
        self.send_control(ControlRequest::pause(cseq)).await
    }

    /// Resume from the paused position.
    pub async fn resume(self: &Arc<Self>) -> DialogResult<ControlResponse> {
        let cseq = self.next_cseq();
        self.send_control(ControlRequest::resume(cseq)).await
    }

    /// Jump to an absolute offset in seconds.
    pub async fn seek(self: &Arc<Self>, seconds: f64) -> DialogResult<ControlResponse> {
        let cseq = self.next_cseq();
        self.send_control(ControlRequest::seek(cseq, seconds)).await
    }

    /// Change the playback rate.
    pub async fn set_scale(self: &Arc<Self>, scale: f32) -> DialogResult<ControlResponse> {
        let cseq = self.next_cseq();
        self.send_control(ControlRequest::speed(cseq, scale)).await
    }

    /// Send a TEARDOWN control, then end the dialog regardless.
    ///
    /// Both signals go out because not every peer honors the control-level
    /// teardown.
    pub async fn teardown(self: &Arc<Self>, reason: &str) -> DialogResult<()> {
        if let Some(dialog) = self.dialog() {
            if self.status() == InviteStatus::Ack {
                let cseq = self.next_cseq();
                let body = ControlRequest::teardown(cseq).generate();
                if let Err(err) = self.sip.send_info(dialog, body).await {
                    warn!(dialog, %err, "teardown control not delivered");
                }
            }
        }
        self.bye(reason).await
    }

    async fn send_control(
        self: &Arc<Self>,
        request: ControlRequest,
    ) -> DialogResult<ControlResponse> {
        {
            let local = self.local_sdp.lock();
            let playback = local
                .as_ref()
                .map(|sdp| sdp.session_type.is_playback())
                .unwrap_or(false);
            if !playback {
                return Err(DialogError::invalid_state(
                    "playback controls need a Playback or Download session",
                ));
            }
        }
        if self.status() != InviteStatus::Ack {
            return Err(DialogError::invalid_state("dialog not established"));
        }
        let dialog = self
            .dialog()
            .ok_or_else(|| DialogError::invalid_state("dialog not established"))?;

        let body = request.generate();
        debug!(dialog, action = request.action.as_str(), cseq = request.cseq, "sending control");
        let outcome = tokio::time::timeout(self.config.control_wait, self.sip.send_info(dialog, body))
            .await
            .map_err(|_| DialogError::timeout("control reply overdue"))?
            .map_err(|err| DialogError::transport(format!("info send failed: {err}")))?;

        if !(200..300).contains(&outcome.code) {
            return Err(DialogError::rejected(outcome.code, "control refused"));
        }
        let body = outcome
            .body
            .ok_or_else(|| DialogError::protocol("control reply without body"))?;
        Ok(ControlResponse::parse(&body)?)
    }

    /// Handle an inbound INFO body. Returns the SIP code to answer with
    /// and the control response body to carry in that answer.
    pub async fn on_info(self: &Arc<Self>, body: &str) -> (u16, Option<String>) {
        let request = match ControlRequest::parse(body) {
            Ok(request) => request,
            Err(err) => {
                warn!(peer = %self.peer_id(), %err, "unreadable control body");
                return (400, None);
            }
        };
        let cseq = request.cseq;
        match request.action {
            ControlAction::Teardown => {
                // Answer first, then drop the dialog locally.
                let session = self.clone();
                tokio::spawn(async move {
                    let _ = session.bye("peer teardown").await;
                });
                (200, Some(ControlResponse::ok(cseq).generate()))
            }
            ControlAction::Play | ControlAction::Pause => {
                let handler = self.on_control.lock().clone();
                let response = match handler {
                    None => ControlResponse::ok(cseq),
                    Some(handler) => {
                        match tokio::time::timeout(self.config.control_wait, handler(request)).await
                        {
                            Ok(response) => response,
                            Err(_) => ControlResponse {
                                code: 408,
                                reason: "Request Timeout".to_string(),
                                cseq,
                                range: None,
                                rtp_info: None,
                            },
                        }
                    }
                };
                (200, Some(response.generate()))
            }
        }
    }
}
