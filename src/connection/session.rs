// src/connection/session.rs

//! Defines the state shared between the receive loop and the heartbeat loop.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Per-connection state observed from both concurrent loops.
///
/// Each field has a single writer: the receive loop owns `sequence`,
/// `heartbeat_interval_ms` and `message_count` and is the only writer that
/// acknowledges a heartbeat; the heartbeat loop is the only writer that
/// clears the acknowledgement flag. Atomics (and one small mutex for the
/// optional sequence) provide the cross-task visibility.
#[derive(Debug)]
pub struct Session {
    /// Last sequence number seen from any dispatch-carrying frame.
    sequence: Mutex<Option<u64>>,
    /// Heartbeat interval from the hello frame; `0` means not yet known.
    heartbeat_interval_ms: AtomicU64,
    /// Whether the most recent heartbeat has been acknowledged. Starts true
    /// so the first heartbeat is allowed out.
    last_heartbeat_ack: AtomicBool,
    /// Count of successfully decompressed and decoded frames, for log and
    /// archive correlation only.
    message_count: AtomicU64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            sequence: Mutex::new(None),
            heartbeat_interval_ms: AtomicU64::new(0),
            last_heartbeat_ack: AtomicBool::new(true),
            message_count: AtomicU64::new(0),
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        *self.sequence.lock()
    }

    pub fn set_sequence(&self, seq: u64) {
        *self.sequence.lock() = Some(seq);
    }

    /// The heartbeat interval, if the hello frame has arrived.
    pub fn heartbeat_interval_ms(&self) -> Option<u64> {
        match self.heartbeat_interval_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Records the interval from the hello frame. The value is immutable for
    /// the rest of the connection; a repeated hello is ignored.
    pub fn set_heartbeat_interval_ms(&self, ms: u64) {
        if self
            .heartbeat_interval_ms
            .compare_exchange(0, ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Ignoring repeated hello; heartbeat interval already set");
        }
    }

    pub fn heartbeat_acknowledged(&self) -> bool {
        self.last_heartbeat_ack.load(Ordering::Acquire)
    }

    pub fn set_heartbeat_acknowledged(&self, acked: bool) {
        self.last_heartbeat_ack.store(acked, Ordering::Release);
    }

    /// Increments the processed-frame counter and returns the new value.
    pub fn next_message_count(&self) -> u64 {
        self.message_count.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
