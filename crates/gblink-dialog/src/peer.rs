//! Per-peer state: sequence numbers, in-flight transactions, online watch.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gblink_core::{Charset, Message};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::transaction::RequestProxy;

/// One GB/T 28181 peer platform.
///
/// Owns the SN counter and the SN-keyed table of in-flight transactions.
/// Table entries hold strong references so a transaction stays alive while
/// a response can still arrive for it.
pub struct Peer {
    id: String,
    encoding: Charset,
    sn: AtomicU32,
    transactions: DashMap<u32, Arc<RequestProxy>>,
    online_tx: watch::Sender<bool>,
}

impl Peer {
    pub fn new(id: impl Into<String>, encoding: Charset) -> Arc<Peer> {
        let (online_tx, _) = watch::channel(false);
        Arc::new(Peer {
            id: id.into(),
            encoding,
            sn: AtomicU32::new(0),
            transactions: DashMap::new(),
            online_tx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn encoding(&self) -> Charset {
        self.encoding
    }

    /// Next sequence number. Wraps from `i32::MAX` back to 1 so the value
    /// stays valid for peers that store it signed.
    pub fn next_sn(&self) -> u32 {
        let updated = self
            .sn
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current >= i32::MAX as u32 { 1 } else { current + 1 })
            });
        match updated {
            Ok(previous) => {
                if previous >= i32::MAX as u32 {
                    1
                } else {
                    previous + 1
                }
            }
            Err(_) => unreachable!("fetch_update closure never returns None"),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        if self.online_tx.send_replace(online) != online {
            debug!(peer = %self.id, online, "peer state changed");
        }
    }

    /// Watch channel backing deferred subscription starts.
    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    pub fn pending(&self) -> usize {
        self.transactions.len()
    }

    pub(crate) fn register(&self, sn: u32, proxy: Arc<RequestProxy>) {
        self.transactions.insert(sn, proxy);
    }

    pub(crate) fn deregister(&self, sn: u32) {
        self.transactions.remove(&sn);
    }

    pub(crate) fn transaction(&self, sn: u32) -> Option<Arc<RequestProxy>> {
        self.transactions.get(&sn).map(|entry| entry.clone())
    }

    /// Route an inbound Response message to the transaction it answers.
    /// Returns the SIP code to echo: the response callback's code on a
    /// match, 481 when no transaction owns the SN.
    pub fn dispatch_response(&self, message: Message) -> u16 {
        let sn = message.sn();
        match self.transaction(sn) {
            Some(proxy) => proxy.on_response(message),
            None => {
                warn!(peer = %self.id, sn, "response without a matching transaction");
                481
            }
        }
    }

    /// Fail the transaction owning `sn`, if any. Used when a response body
    /// arrives too malformed to build a Message.
    pub(crate) fn fail_transaction(&self, sn: u32, reason: String) {
        if let Some(proxy) = self.transaction(sn) {
            proxy.fail_async(reason);
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("encoding", &self.encoding)
            .field("pending", &self.transactions.len())
            .field("online", &self.is_online())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sn_wraps_to_one() {
        let peer = Peer::new("34020000002000000001", Charset::Utf8);
        assert_eq!(peer.next_sn(), 1);
        assert_eq!(peer.next_sn(), 2);
        peer.sn.store(i32::MAX as u32, Ordering::Relaxed);
        assert_eq!(peer.next_sn(), 1);
    }

    #[test]
    fn online_watch_tracks_state() {
        let peer = Peer::new("34020000002000000001", Charset::Utf8);
        let rx = peer.watch_online();
        assert!(!peer.is_online());
        peer.set_online(true);
        assert!(*rx.borrow());
        assert!(peer.is_online());
    }
}
