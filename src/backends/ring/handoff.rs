// SPDX-License-Identifier: GPL-3.0-only

//! Latest-frame handoff between the producer and the consumer
//!
//! A monitor: one mutex guards the cursor scalars, one condition variable
//! wakes waiting consumers. The producer takes the mutex only for the few
//! instructions that advance the cursor and never waits on the consumer.
//! The consumer always re-checks the cursor after waking; being woken is
//! never taken as proof that a new frame exists.

use crate::errors::{CaptureError, CaptureResult};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Cursor state shared by producer and consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Slot holding the most recently published frame
    pub latest: usize,
    /// Number of frames published so far (0 = nothing yet)
    pub generation: u64,
    /// The frame at `latest` has been handed out
    pub consumed: bool,
    /// The session is closed; waiters must give up
    pub closed: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            latest: 0,
            generation: 0,
            // Nothing published yet, so there is nothing to hand out
            consumed: true,
            closed: false,
        }
    }
}

/// Result of advancing the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Generation number of the frame just published
    pub generation: u64,
    /// The previous generation was never acquired and is now lost
    pub overran: bool,
}

/// Condition-variable monitor over a [`Cursor`]
#[derive(Debug, Default)]
pub struct Handoff {
    cursor: Mutex<Cursor>,
    ready: Condvar,
}

impl Handoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the cursor, recovering from a poisoned mutex
    ///
    /// A consumer that panicked while holding the lock must not wedge the
    /// producer callback.
    fn lock(&self) -> MutexGuard<'_, Cursor> {
        match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Handoff cursor mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Copy of the current cursor
    pub fn cursor(&self) -> Cursor {
        *self.lock()
    }

    /// Slot index of the most recently published frame
    pub fn latest_index(&self) -> usize {
        self.lock().latest
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Publish `index` as the latest frame and wake every waiter
    pub fn advance_and_signal(&self, index: usize) -> Advance {
        let advance = {
            let mut cursor = self.lock();
            let overran = cursor.generation > 0 && !cursor.consumed;
            cursor.latest = index;
            cursor.generation += 1;
            cursor.consumed = false;
            Advance {
                generation: cursor.generation,
                overran,
            }
        };

        self.ready.notify_all();
        advance
    }

    /// Wait up to `timeout` for a frame this caller has not seen yet
    ///
    /// On success `claim` runs with the latest slot index while the cursor
    /// lock is still held, so the producer cannot publish over the claimed
    /// generation before the caller has pinned its slot.
    ///
    /// Outcomes:
    /// - an unconsumed frame is already waiting: claimed immediately
    /// - `timeout` is zero and the latest frame was already taken:
    ///   `AlreadyConsumed` (or `Timeout` if nothing was ever published)
    /// - woken by a publish whose frame another caller claimed first:
    ///   `AlreadyConsumed`
    /// - budget exhausted without a new frame: `Timeout`
    /// - session closed: `Closed`
    pub fn acquire<T>(
        &self,
        timeout: Duration,
        claim: impl FnOnce(usize) -> T,
    ) -> CaptureResult<(T, u64)> {
        let mut cursor = self.lock();

        if cursor.closed {
            return Err(CaptureError::Closed);
        }

        if !cursor.consumed {
            return Ok(Self::claim(&mut cursor, claim));
        }

        if timeout.is_zero() {
            return Err(if cursor.generation == 0 {
                CaptureError::Timeout
            } else {
                CaptureError::AlreadyConsumed
            });
        }

        let entry_generation = cursor.generation;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CaptureError::Timeout);
            }

            cursor = match self.ready.wait_timeout(cursor, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => {
                    warn!("Handoff wait recovered from poisoned mutex");
                    poisoned.into_inner().0
                }
            };

            if cursor.closed {
                return Err(CaptureError::Closed);
            }

            if !cursor.consumed {
                return Ok(Self::claim(&mut cursor, claim));
            }

            if cursor.generation != entry_generation {
                trace!(
                    generation = cursor.generation,
                    "Woken for a frame that was already claimed"
                );
                return Err(CaptureError::AlreadyConsumed);
            }
            // Spurious wakeup: nothing changed, keep waiting
        }
    }

    fn claim<T>(cursor: &mut Cursor, claim: impl FnOnce(usize) -> T) -> (T, u64) {
        cursor.consumed = true;
        (claim(cursor.latest), cursor.generation)
    }

    /// Mark the session closed and wake every waiter
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}
