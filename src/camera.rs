// SPDX-License-Identifier: GPL-3.0-only

//! Capture session facade
//!
//! Owns the capture ring, the conversion pool and the frame source, and
//! enforces the session lifecycle:
//!
//! ```text
//! Unopened ──open──► Playing ──close──► Closed
//!     └─────────────close──────────────────┘
//! ```
//!
//! A closed session cannot be reopened. Frames only flow while Playing.

use crate::backends::convert::{ConversionPool, RgbaFrame};
use crate::backends::memory::DeviceAllocator;
use crate::backends::pipeline::{FrameSource, GstSource};
use crate::backends::ring::{CaptureRing, CapturedFrame, FrameSink, RingStatsSnapshot};
use crate::backends::types::SessionParams;
use crate::config::Config;
use crate::errors::{CaptureError, CaptureResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle state of a [`Camera`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Playing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unopened => write!(f, "unopened"),
            SessionState::Playing => write!(f, "playing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// One capture session
pub struct Camera {
    config: Config,
    ring: Arc<CaptureRing>,
    pool: ConversionPool,
    source: Box<dyn FrameSource>,
    state: SessionState,
}

impl Camera {
    /// Build a session around a GStreamer pipeline
    pub fn new(config: Config, allocator: Arc<dyn DeviceAllocator>) -> CaptureResult<Self> {
        let pipeline_config = config.clone();
        Self::with_source(config, allocator, move |sink| {
            Ok(Box::new(GstSource::new(&pipeline_config, sink)?) as Box<dyn FrameSource>)
        })
    }

    /// Build a session around any frame source
    ///
    /// `make_source` receives the sink the source must publish into.
    pub fn with_source<F>(
        config: Config,
        allocator: Arc<dyn DeviceAllocator>,
        make_source: F,
    ) -> CaptureResult<Self>
    where
        F: FnOnce(Arc<dyn FrameSink>) -> CaptureResult<Box<dyn FrameSource>>,
    {
        config.validate()?;

        let ring = Arc::new(CaptureRing::new(
            config.ring_buffers,
            Arc::clone(&allocator),
        ));
        let pool = ConversionPool::new(config.source, allocator, config.ring_buffers);
        let source = make_source(Arc::clone(&ring) as Arc<dyn FrameSink>)?;

        info!(
            source = %config.source,
            width = config.width,
            height = config.height,
            slots = ring.capacity(),
            pipeline = %source.describe(),
            "Capture session created"
        );

        Ok(Self {
            config,
            ring,
            pool,
            source,
            state: SessionState::Unopened,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the frame source
    pub fn open(&mut self) -> CaptureResult<()> {
        match self.state {
            SessionState::Playing => return Ok(()),
            SessionState::Closed => {
                return Err(CaptureError::InvalidState(
                    "a closed capture session cannot be reopened".to_string(),
                ));
            }
            SessionState::Unopened => {}
        }

        self.source.start()?;
        self.state = SessionState::Playing;
        info!("Capture session playing");
        Ok(())
    }

    /// Stop the frame source and release waiting consumers
    ///
    /// Idempotent. After this returns no producer callback touches the ring.
    pub fn close(&mut self) -> CaptureResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let result = if self.state == SessionState::Playing {
            self.source.stop()
        } else {
            Ok(())
        };

        self.ring.close();
        self.state = SessionState::Closed;

        let stats = self.ring.stats();
        info!(
            published = stats.published,
            acquired = stats.acquired,
            overruns = stats.overruns,
            malformed = stats.malformed,
            held_slot_drops = stats.held_slot_drops,
            "Capture session closed"
        );
        result
    }

    /// Wait up to `timeout` for a frame not yet handed out
    pub fn capture(&self, timeout: Duration) -> CaptureResult<CapturedFrame> {
        match self.state {
            SessionState::Playing => self.ring.acquire(timeout),
            SessionState::Closed => Err(CaptureError::Closed),
            SessionState::Unopened => Err(CaptureError::InvalidState(
                "capture session is not open".to_string(),
            )),
        }
    }

    /// Convert a captured frame to float RGBA
    pub fn convert_rgba(
        &mut self,
        frame: &CapturedFrame,
        zero_copy: bool,
    ) -> CaptureResult<RgbaFrame> {
        self.pool.convert(frame, zero_copy)
    }

    /// Session geometry: from the first frame once one arrived, otherwise
    /// the requested size and the source's nominal depth
    pub fn params(&self) -> SessionParams {
        self.ring.session().unwrap_or_else(|| {
            SessionParams::requested(self.config.width, self.config.height, self.config.source)
        })
    }

    pub fn width(&self) -> u32 {
        self.params().width
    }

    pub fn height(&self) -> u32 {
        self.params().height
    }

    /// Bits per pixel
    pub fn pixel_depth(&self) -> u32 {
        self.params().depth
    }

    /// Bytes per frame
    pub fn size(&self) -> usize {
        self.params().size
    }

    pub fn stats(&self) -> RingStatsSnapshot {
        self.ring.stats()
    }

    /// The ring this session publishes into
    pub fn ring(&self) -> &Arc<CaptureRing> {
        &self.ring
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Error closing capture session");
        }
    }
}
