//! Bounded scan-packet queue shared between the reactor's UDP receive loop
//! and whatever thread calls [`Session::receive_scan_packet`](crate::session::Session::receive_scan_packet).
//!
//! Mirrors the reference SDK's `onScanPacketReceived` drop-oldest policy
//! (spec §4.6): once the queue is full, the oldest buffered packet is
//! discarded to make room for the new one rather than blocking the reactor
//! thread or growing without bound.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Matches `SCAN_BLOCK_BUFFERING_COUNT` in the reference SDK.
pub const CAPACITY: usize = 32;

#[derive(Default)]
struct Inner {
    packets: VecDeque<Vec<u8>>,
}

pub struct ScanQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl Default for ScanQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes a verified scan packet, dropping the oldest buffered one if
    /// the queue is already at [`CAPACITY`].
    pub fn push(&self, packet: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.packets.len() >= CAPACITY {
            inner.packets.pop_front();
        }
        inner.packets.push_back(packet);
        self.not_empty.notify_one();
    }

    /// Blocks until a packet is available or `timeout` elapses.
    pub fn pop(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(packet) = inner.packets.pop_front() {
                return Some(packet);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next_inner, timeout_result) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = next_inner;
            if timeout_result.timed_out() && inner.packets.is_empty() {
                return None;
            }
        }
    }

    /// Discards any buffered packets, e.g. on session close.
    pub fn clear(&self) {
        self.inner.lock().unwrap().packets.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().packets.len()
    }
}
