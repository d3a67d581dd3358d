//! Completion policies for multi-response transactions.
//!
//! The proxy delegates the "is this exchange finished" question to a
//! strategy object so the three response shapes share one send/time-out
//! path: a single response, a count-aggregated page set, and a
//! category-mask-aggregated config download.

use std::sync::atomic::{AtomicU64, Ordering};

use gblink_core::manscdp::detail::{ConfigMask, ResultKind};
use gblink_core::Message;
use parking_lot::Mutex;

/// What the policy decided after seeing one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// More responses expected; re-arm the inactivity window.
    Continue,
    /// The exchange is complete.
    Complete,
    /// The exchange failed; carries the reason.
    Fail(String),
}

pub trait ResponsePolicy: Send + Sync {
    fn accept(&self, message: &Message) -> PolicyOutcome;
}

/// Any one loaded response finishes the exchange.
pub struct SingleResponse;

impl ResponsePolicy for SingleResponse {
    fn accept(&self, _message: &Message) -> PolicyOutcome {
        PolicyOutcome::Complete
    }
}

/// Paginated list aggregation: complete when the cumulative item count
/// reaches the SumNum the first page declared. Later pages' SumNum is
/// ignored; peers are not consistent about repeating it.
pub struct CountAggregate {
    expected: Mutex<Option<u64>>,
    received: AtomicU64,
}

impl CountAggregate {
    pub fn new() -> CountAggregate {
        CountAggregate { expected: Mutex::new(None), received: AtomicU64::new(0) }
    }
}

impl Default for CountAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponsePolicy for CountAggregate {
    fn accept(&self, message: &Message) -> PolicyOutcome {
        let count = u64::from(message.item_count().unwrap_or(0));
        let expected = {
            let mut slot = self.expected.lock();
            // A first page without SumNum is taken as the whole set.
            *slot.get_or_insert_with(|| u64::from(message.sum_num().unwrap_or(0)).max(count))
        };
        let total = self.received.fetch_add(count, Ordering::SeqCst) + count;
        if total >= expected {
            PolicyOutcome::Complete
        } else {
            PolicyOutcome::Continue
        }
    }
}

/// Config-download aggregation: pages are keyed by category bit, not item
/// count. Complete when the OR of received masks covers the requested
/// mask; any ERROR page fails the whole exchange immediately.
pub struct MaskAggregate {
    requested: ConfigMask,
    received: Mutex<ConfigMask>,
}

impl MaskAggregate {
    pub fn new(requested: ConfigMask) -> MaskAggregate {
        MaskAggregate { requested, received: Mutex::new(ConfigMask::default()) }
    }
}

impl ResponsePolicy for MaskAggregate {
    fn accept(&self, message: &Message) -> PolicyOutcome {
        if message.result() == Some(ResultKind::Error) {
            let reason = message.reason().unwrap_or("peer reported ERROR").to_string();
            return PolicyOutcome::Fail(reason);
        }
        let mut received = self.received.lock();
        *received = received.union(message.config_mask().unwrap_or_default());
        if received.contains(self.requested) {
            PolicyOutcome::Complete
        } else {
            PolicyOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gblink_core::manscdp::detail::{CatalogResponse, ConfigDownloadResponse, MessageDetail};
    use gblink_core::manscdp::{CmdKind, RootKind};

    fn catalog_page(sum: u32, items: usize) -> Message {
        let mut message = Message::new(RootKind::Response, CmdKind::Catalog);
        message.set_detail(MessageDetail::CatalogResponse(CatalogResponse {
            sum_num: sum,
            items: (0..items)
                .map(|i| gblink_core::manscdp::detail::CatalogItem {
                    device_id: format!("3402000000132000000{i}"),
                    ..Default::default()
                })
                .collect(),
        }));
        message
    }

    #[test]
    fn count_aggregate_honors_first_sum_only() {
        let policy = CountAggregate::new();
        assert_eq!(policy.accept(&catalog_page(3, 2)), PolicyOutcome::Continue);
        // Second page claims a different total; the first page's 3 rules.
        assert_eq!(policy.accept(&catalog_page(99, 1)), PolicyOutcome::Complete);
    }

    #[test]
    fn mask_aggregate_is_order_independent() {
        let requested = ConfigMask::BASIC_PARAM.union(ConfigMask::VIDEO_PARAM_OPT);
        let policy = MaskAggregate::new(requested);

        let mut page = Message::new(RootKind::Response, CmdKind::ConfigDownload);
        page.set_detail(MessageDetail::ConfigDownloadResponse(ConfigDownloadResponse {
            result: ResultKind::Ok,
            mask: ConfigMask::VIDEO_PARAM_OPT,
            params: Vec::new(),
        }));
        assert_eq!(policy.accept(&page), PolicyOutcome::Continue);

        page.set_detail(MessageDetail::ConfigDownloadResponse(ConfigDownloadResponse {
            result: ResultKind::Ok,
            mask: ConfigMask::BASIC_PARAM,
            params: Vec::new(),
        }));
        assert_eq!(policy.accept(&page), PolicyOutcome::Complete);
    }

    #[test]
    fn mask_aggregate_fails_on_error_page() {
        let policy = MaskAggregate::new(ConfigMask::BASIC_PARAM);
        let mut page = Message::new(RootKind::Response, CmdKind::ConfigDownload);
        page.set_detail(MessageDetail::SimpleResult(ResultKind::Error));
        assert!(matches!(policy.accept(&page), PolicyOutcome::Fail(_)));
    }
}
