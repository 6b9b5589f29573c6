// SPDX-License-Identifier: GPL-3.0-only

//! Latest-frame handoff between a GStreamer capture pipeline and a pull-based
//! consumer
//!
//! The pipeline's streaming thread copies each decoded frame into a ring of
//! pre-allocated host/device buffers. A single consumer thread asks for the
//! latest frame with a bounded wait and may convert it to float RGBA in a
//! second, independently rotated pool.
//!
//! # Architecture
//!
//! - [`backends::ring`]: capture ring, handoff monitor, counters
//! - [`backends::convert`]: conversion pool and NV12/RGB kernels
//! - [`backends::memory`]: host/device buffer allocation
//! - [`backends::pipeline`]: GStreamer source feeding the ring
//! - [`camera`]: session lifecycle facade
//! - [`config`]: JSON configuration
//!
//! # Example
//!
//! ```ignore
//! let mut camera = Camera::new(Config::default(), Arc::new(UnifiedAllocator))?;
//! camera.open()?;
//! let frame = camera.capture(Duration::from_millis(1000))?;
//! let rgba = camera.convert_rgba(&frame, false)?;
//! ```

pub mod backends;
pub mod camera;
pub mod config;
pub mod constants;
pub mod errors;

pub use backends::convert::{ConversionPool, RgbaF32, RgbaFrame};
pub use backends::frame_loop::{ConsumerLoop, LoopAction, LoopReport};
pub use backends::memory::{DeviceAllocator, FrameBuffer, StagedAllocator, UnifiedAllocator};
pub use backends::pipeline::FrameSource;
pub use backends::ring::{CaptureRing, CapturedFrame, FrameSink, RingStatsSnapshot};
pub use backends::types::{FrameLayout, PlaneStrides, SessionParams, SourceType};
pub use camera::{Camera, SessionState};
pub use config::Config;
pub use errors::{CaptureError, CaptureResult};
