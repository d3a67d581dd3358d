//! Domain-scoped SSRC allocation.
//!
//! GB/T 28181 SSRCs are decimal-structured: `domain * 10_000 + counter`,
//! with playback/download streams offset by 1_000_000_000 so they never
//! collide with live streams. The counter runs [1, 9999] and wraps.

use std::sync::atomic::{AtomicU32, Ordering};

const COUNTER_MAX: u32 = 9999;
const PLAYBACK_OFFSET: u32 = 1_000_000_000;

/// Thread-safe per-domain SSRC counter.
#[derive(Debug)]
pub struct SsrcAllocator {
    domain: u32,
    counter: AtomicU32,
}

impl SsrcAllocator {
    pub fn new(domain: u32) -> SsrcAllocator {
        SsrcAllocator { domain, counter: AtomicU32::new(0) }
    }

    /// Derive the domain from the middle digits of a platform id
    /// (digits 4 through 8 of the 20-digit GB id).
    pub fn from_platform_id(platform_id: &str) -> SsrcAllocator {
        let digits: String = platform_id.chars().filter(|c| c.is_ascii_digit()).collect();
        let domain = digits
            .get(3..8)
            .and_then(|window| window.parse().ok())
            .unwrap_or(0);
        SsrcAllocator::new(domain)
    }

    pub fn domain(&self) -> u32 {
        self.domain
    }

    /// Allocate the next SSRC in the requested liveness class.
    pub fn allocate(&self, playback: bool) -> u32 {
        let mut current = self.counter.load(Ordering::Relaxed);
        let seq = loop {
            let next = if current >= COUNTER_MAX { 1 } else { current + 1 };
            match self.counter.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(observed) => current = observed,
            }
        };
        let base = self.domain * 10_000 + seq;
        if playback {
            base + PLAYBACK_OFFSET
        } else {
            base
        }
    }
}
