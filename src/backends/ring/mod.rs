// SPDX-License-Identifier: GPL-3.0-only

//! Capture buffer ring
//!
//! A fixed number of paired host/device buffers, allocated lazily when the
//! first frame defines the byte size. The producer (the pipeline's streaming
//! thread) copies each frame into the slot after the latest one and advances
//! the handoff cursor; the consumer claims the latest slot with a timed wait.
//!
//! Slots are reference counted. A consumer keeps its claimed slot alive for
//! as long as it holds the [`CapturedFrame`]; if the producer wraps around to
//! that slot in the meantime, the incoming frame is dropped instead of
//! overwriting memory the consumer is reading.

mod handoff;
mod stats;

pub use handoff::{Advance, Cursor, Handoff};
pub use stats::{RingStats, RingStatsSnapshot};

use crate::backends::memory::{DeviceAllocator, FrameBuffer};
use crate::backends::types::{FrameLayout, SessionParams};
use crate::constants::{ring, timing};
use crate::errors::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Receiver of frames from the upstream pipeline
///
/// Called on the pipeline's streaming thread, once per decoded frame. Must
/// not block on the consumer.
pub trait FrameSink: Send + Sync {
    fn on_frame_ready(&self, data: &[u8], layout: FrameLayout);
}

struct SlotState {
    buffer: Arc<FrameBuffer>,
    layout: FrameLayout,
}

type Slot = Mutex<SlotState>;

fn lock_slot(slot: &Slot) -> MutexGuard<'_, SlotState> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Ring slot mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Frame handed to the consumer by [`CaptureRing::acquire`]
///
/// Holds a reference to its ring slot; the producer will not write into that
/// slot until this value is dropped.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    slot: usize,
    generation: u64,
    layout: FrameLayout,
    buffer: Arc<FrameBuffer>,
}

impl CapturedFrame {
    /// Ring slot the frame lives in
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Publish count at the time this frame was published (starts at 1)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn width(&self) -> u32 {
        self.layout.width
    }

    pub fn height(&self) -> u32 {
        self.layout.height
    }

    /// Raw frame bytes (host view)
    pub fn data(&self) -> &[u8] {
        self.buffer.host()
    }

    /// Raw frame bytes (device view)
    pub fn device_data(&self) -> &[u8] {
        self.buffer.device()
    }

    pub fn host_address(&self) -> usize {
        self.buffer.host_address()
    }

    pub fn device_address(&self) -> usize {
        self.buffer.device_address()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Ring of capture buffers plus the handoff cursor
pub struct CaptureRing {
    capacity: usize,
    allocator: Arc<dyn DeviceAllocator>,
    slots: OnceLock<Box<[Slot]>>,
    session: OnceLock<SessionParams>,
    handoff: Handoff,
    failed: AtomicBool,
    stats: RingStats,
}

impl CaptureRing {
    /// Create an empty ring with `capacity` slots
    ///
    /// No memory is allocated until the first frame arrives. Capacities below
    /// [`ring::MIN_RING_BUFFERS`] are raised to it: with a single slot the
    /// producer could only ever write into the slot being read.
    pub fn new(capacity: usize, allocator: Arc<dyn DeviceAllocator>) -> Self {
        let capacity = if capacity < ring::MIN_RING_BUFFERS {
            warn!(
                requested = capacity,
                minimum = ring::MIN_RING_BUFFERS,
                "Ring capacity too small, using minimum"
            );
            ring::MIN_RING_BUFFERS
        } else {
            capacity
        };

        Self {
            capacity,
            allocator,
            slots: OnceLock::new(),
            session: OnceLock::new(),
            handoff: Handoff::new(),
            failed: AtomicBool::new(false),
            stats: RingStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the slots have been allocated
    pub fn is_allocated(&self) -> bool {
        self.slots.get().is_some()
    }

    /// Session parameters fixed by the first frame, if one has arrived
    pub fn session(&self) -> Option<SessionParams> {
        self.session.get().copied()
    }

    pub fn stats(&self) -> RingStatsSnapshot {
        self.stats.snapshot()
    }

    /// Copy of the handoff cursor
    pub fn cursor(&self) -> Cursor {
        self.handoff.cursor()
    }

    pub fn is_closed(&self) -> bool {
        self.handoff.is_closed()
    }

    /// Allocate every slot with `size` bytes, once
    ///
    /// Later calls are no-ops. A failed allocation marks the ring unusable:
    /// there is no retry and no partially allocated ring.
    pub fn ensure_allocated(&self, size: usize) -> CaptureResult<()> {
        if self.slots.get().is_some() {
            return Ok(());
        }

        if self.failed.load(Ordering::Acquire) {
            return Err(CaptureError::Allocation(
                "capture ring allocation failed earlier in this session".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(self.capacity);
        for index in 0..self.capacity {
            match self.allocator.allocate(size) {
                Ok(buffer) => slots.push(Mutex::new(SlotState {
                    buffer: Arc::new(buffer),
                    layout: FrameLayout::packed(0, 0),
                })),
                Err(e) => {
                    self.failed.store(true, Ordering::Release);
                    error!(
                        slot = index,
                        bytes = size,
                        allocator = self.allocator.name(),
                        error = %e,
                        "Failed to allocate capture ring"
                    );
                    return Err(e);
                }
            }
        }

        if self.slots.set(slots.into_boxed_slice()).is_ok() {
            info!(
                slots = self.capacity,
                bytes = size,
                allocator = self.allocator.name(),
                "Allocated capture ring"
            );
        }
        Ok(())
    }

    /// Publish a tightly packed frame
    pub fn publish(&self, data: &[u8], width: u32, height: u32) -> CaptureResult<usize> {
        self.publish_with_layout(data, FrameLayout::packed(width, height))
    }

    /// Copy a frame into the next slot and wake the consumer
    ///
    /// Writes into `(latest + 1) % N`, moving on to the following slots when
    /// the consumer still holds that one; the latest slot is never
    /// overwritten. Returns the slot index written. Malformed frames, frames
    /// that do not match the session geometry, and frames for which every
    /// other slot is held are dropped without touching the cursor.
    pub fn publish_with_layout(&self, data: &[u8], layout: FrameLayout) -> CaptureResult<usize> {
        if self.handoff.is_closed() {
            return Err(CaptureError::Closed);
        }

        if !layout.is_valid() || data.is_empty() {
            self.stats.malformed();
            return Err(CaptureError::MalformedFrame(format!(
                "{}x{} with {} bytes",
                layout.width,
                layout.height,
                data.len()
            )));
        }

        match self.session.get() {
            Some(session) => {
                if session.size != data.len()
                    || session.width != layout.width
                    || session.height != layout.height
                {
                    self.stats.malformed();
                    return Err(CaptureError::MalformedFrame(format!(
                        "{}x{} ({} bytes) does not match session {}x{} ({} bytes)",
                        layout.width,
                        layout.height,
                        data.len(),
                        session.width,
                        session.height,
                        session.size
                    )));
                }
            }
            None => {
                self.ensure_allocated(data.len())?;
                let params = SessionParams::from_frame(data.len(), layout.width, layout.height);
                if self.session.set(params).is_ok() {
                    info!(
                        width = params.width,
                        height = params.height,
                        depth = params.depth,
                        bytes = params.size,
                        layout = %layout,
                        "Capture session parameters fixed by first frame"
                    );
                }
            }
        }

        let slots = self.slots.get().ok_or_else(|| {
            CaptureError::Allocation("capture ring is not allocated".to_string())
        })?;

        // Any slot but the latest one may be written; held slots are skipped
        let latest = self.handoff.latest_index();
        let target = (latest + 1) % self.capacity;
        let mut written = None;
        for offset in 1..self.capacity {
            let index = (latest + offset) % self.capacity;
            let mut slot = lock_slot(&slots[index]);
            let Some(buffer) = Arc::get_mut(&mut slot.buffer) else {
                continue;
            };
            buffer.host_mut().copy_from_slice(data);
            buffer.sync_to_device();
            slot.layout = layout;
            written = Some(index);
            break;
        }

        let Some(next) = written else {
            self.stats.held_slot_drop();
            debug!(slot = target, "Every writable slot is held by the consumer, dropping frame");
            return Err(CaptureError::SlotInUse(target));
        };
        if next != target {
            trace!(held = target, slot = next, "Skipping slot still held by consumer");
        }

        let advance = self.handoff.advance_and_signal(next);
        self.stats.published();
        if advance.overran {
            self.stats.overrun();
            trace!(generation = advance.generation, "Previous frame overrun");
        }

        if advance.generation % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                generation = advance.generation,
                slot = next,
                bytes = data.len(),
                "Published frame"
            );
        }

        Ok(next)
    }

    /// Wait up to `timeout` for a frame not yet handed out
    ///
    /// `AlreadyConsumed` reports that the latest frame was already taken and
    /// nothing newer arrived. With a zero `timeout` that is answered at once;
    /// with a non-zero `timeout` the call waits instead, and only returns
    /// `AlreadyConsumed` if it is woken by a frame another caller claimed
    /// first. A caller waiting out its whole budget gets `Timeout`, so poll
    /// with `Duration::ZERO` to tell "nothing new" apart from "no frames".
    pub fn acquire(&self, timeout: Duration) -> CaptureResult<CapturedFrame> {
        let result = self.handoff.acquire(timeout, |index| {
            self.slots.get().map(|slots| {
                let slot = lock_slot(&slots[index]);
                (index, Arc::clone(&slot.buffer), slot.layout)
            })
        });

        match result {
            Ok((Some((slot, buffer, layout)), generation)) => {
                self.stats.acquired();
                Ok(CapturedFrame {
                    slot,
                    generation,
                    layout,
                    buffer,
                })
            }
            Ok((None, _)) => Err(CaptureError::InvalidState(
                "frame signalled before the ring was allocated".to_string(),
            )),
            Err(CaptureError::Timeout) => {
                self.stats.timeout();
                Err(CaptureError::Timeout)
            }
            Err(CaptureError::AlreadyConsumed) => {
                self.stats.already_consumed();
                Err(CaptureError::AlreadyConsumed)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop accepting frames and wake every waiting consumer
    pub fn close(&self) {
        if !self.handoff.is_closed() {
            self.handoff.close();
            debug!(stats = ?self.stats.snapshot(), "Capture ring closed");
        }
    }
}

impl FrameSink for CaptureRing {
    fn on_frame_ready(&self, data: &[u8], layout: FrameLayout) {
        match self.publish_with_layout(data, layout) {
            Ok(_) => {}
            Err(CaptureError::Closed) => trace!("Frame arrived after close, ignoring"),
            Err(CaptureError::SlotInUse(_)) => {}
            Err(e) if e.is_fatal() => error!(error = %e, "Capture ring unusable"),
            Err(e) => warn!(error = %e, "Dropping frame"),
        }
    }
}

impl std::fmt::Debug for CaptureRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRing")
            .field("capacity", &self.capacity)
            .field("allocator", &self.allocator.name())
            .field("session", &self.session.get())
            .field("cursor", &self.handoff.cursor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::UnifiedAllocator;
    use std::sync::atomic::AtomicUsize;

    /// Counts allocations and fails once `fail_after` buffers were handed out
    struct CountingAllocator {
        calls: AtomicUsize,
        fail_after: usize,
    }

    impl CountingAllocator {
        fn new(fail_after: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_after,
            }
        }
    }

    impl DeviceAllocator for CountingAllocator {
        fn name(&self) -> &str {
            "counting"
        }

        fn allocate(&self, size: usize) -> CaptureResult<FrameBuffer> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                return Err(CaptureError::Allocation("injected".to_string()));
            }
            FrameBuffer::aliased(size)
        }
    }

    #[test]
    fn test_lazy_and_idempotent_allocation() {
        let allocator = Arc::new(CountingAllocator::new(usize::MAX));
        let ring = CaptureRing::new(4, allocator.clone());
        assert!(!ring.is_allocated());

        ring.ensure_allocated(64).unwrap();
        ring.ensure_allocated(64).unwrap();
        assert!(ring.is_allocated());
        assert_eq!(allocator.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_allocation_failure_is_final() {
        let allocator = Arc::new(CountingAllocator::new(2));
        let ring = CaptureRing::new(4, allocator.clone());

        let frame = [7u8; 16];
        assert!(matches!(
            ring.publish(&frame, 4, 4),
            Err(CaptureError::Allocation(_))
        ));
        assert!(!ring.is_allocated());

        let calls = allocator.calls.load(Ordering::SeqCst);
        assert!(matches!(
            ring.publish(&frame, 4, 4),
            Err(CaptureError::Allocation(_))
        ));
        assert_eq!(allocator.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_capacity_floor() {
        let ring = CaptureRing::new(1, Arc::new(UnifiedAllocator));
        assert_eq!(ring.capacity(), ring::MIN_RING_BUFFERS);
    }

    #[test]
    fn test_session_fixed_by_first_frame() {
        let ring = CaptureRing::new(2, Arc::new(UnifiedAllocator));
        ring.publish(&[1u8; 800], 20, 20).unwrap();

        let session = ring.session().unwrap();
        assert_eq!(session.depth, 16);
        assert_eq!(session.size, 800);

        assert!(matches!(
            ring.publish(&[1u8; 400], 20, 20),
            Err(CaptureError::MalformedFrame(_))
        ));
        assert!(matches!(
            ring.publish(&[1u8; 800], 40, 10),
            Err(CaptureError::MalformedFrame(_))
        ));
        assert_eq!(ring.stats().malformed, 2);
        assert_eq!(ring.stats().published, 1);
    }

    #[test]
    fn test_publish_alternates_slots() {
        let ring = CaptureRing::new(2, Arc::new(UnifiedAllocator));
        assert_eq!(ring.publish(&[1u8; 4], 2, 2).unwrap(), 1);
        assert_eq!(ring.publish(&[2u8; 4], 2, 2).unwrap(), 0);
        assert_eq!(ring.publish(&[3u8; 4], 2, 2).unwrap(), 1);
        assert_eq!(ring.stats().overruns, 2);
    }

    #[test]
    fn test_closed_ring_rejects_publish() {
        let ring = CaptureRing::new(2, Arc::new(UnifiedAllocator));
        ring.close();
        assert_eq!(ring.publish(&[1u8; 4], 2, 2), Err(CaptureError::Closed));
        assert!(matches!(
            ring.acquire(Duration::from_millis(10)),
            Err(CaptureError::Closed)
        ));
    }
}
