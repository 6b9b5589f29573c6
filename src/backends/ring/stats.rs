// SPDX-License-Identifier: GPL-3.0-only

//! Counters for the capture ring
//!
//! Per-frame conditions (drops, overruns, lost races) never surface as errors
//! to the consumer loop; they are only observable here and in the logs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from the producer and consumer threads
#[derive(Debug, Default)]
pub struct RingStats {
    published: AtomicU64,
    acquired: AtomicU64,
    overruns: AtomicU64,
    malformed: AtomicU64,
    held_slot_drops: AtomicU64,
    timeouts: AtomicU64,
    already_consumed: AtomicU64,
}

/// Point-in-time copy of [`RingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingStatsSnapshot {
    /// Frames copied into the ring and signalled
    pub published: u64,
    /// Frames handed to a consumer
    pub acquired: u64,
    /// Published frames that replaced a generation nobody acquired
    pub overruns: u64,
    /// Frames dropped for bad dimensions or size
    pub malformed: u64,
    /// Frames dropped because their target slot was still held
    pub held_slot_drops: u64,
    /// Acquire calls that ran out of budget
    pub timeouts: u64,
    /// Acquire calls that found the latest frame already taken
    pub already_consumed: u64,
}

impl RingStats {
    pub fn published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn held_slot_drop(&self) {
        self.held_slot_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn already_consumed(&self) {
        self.already_consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> RingStatsSnapshot {
        RingStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            held_slot_drops: self.held_slot_drops.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            already_consumed: self.already_consumed.load(Ordering::Relaxed),
        }
    }
}
