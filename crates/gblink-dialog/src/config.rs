//! Timer and retry settings for the signaling engines.

use std::time::Duration;

/// Deadlines and policies shared by all sessions under one manager.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// How long a sent request may wait for its SIP reply.
    pub reply_wait: Duration,
    /// Silence window after a 200 reply before a pending response times out.
    pub response_wait: Duration,
    /// Inactivity window between pages of a multi-response exchange.
    pub page_window: Duration,
    /// How long an accepted inbound invite may wait for the ACK.
    pub ack_wait: Duration,
    /// Deadline for a playback control round-trip over INFO.
    pub control_wait: Duration,
    /// Renewal fires this long before subscription expiry.
    pub renewal_margin: Duration,
    /// How long a deferred subscribe waits for an offline peer to come
    /// online before giving up.
    pub offline_wait: Duration,
    /// Cap on back-to-back resubscribe attempts after 5xx replies.
    /// `None` retries without bound.
    pub resubscribe_retry_cap: Option<u32>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        SignalingConfig {
            reply_wait: Duration::from_secs(5),
            response_wait: Duration::from_secs(5),
            page_window: Duration::from_secs(8),
            ack_wait: Duration::from_secs(5),
            control_wait: Duration::from_secs(5),
            renewal_margin: Duration::from_secs(30),
            offline_wait: Duration::from_secs(300),
            resubscribe_retry_cap: None,
        }
    }
}
