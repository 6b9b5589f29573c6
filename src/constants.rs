// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

/// Ring sizing and session defaults
pub mod ring {
    /// Number of capture slots (and conversion slots) in the reference setup
    pub const RING_BUFFERS: usize = 16;

    /// Smallest ring that still lets the producer write while a frame is held
    pub const MIN_RING_BUFFERS: usize = 2;

    /// Requested width when the configuration does not specify one
    pub const DEFAULT_WIDTH: u32 = 1280;

    /// Requested height when the configuration does not specify one
    pub const DEFAULT_HEIGHT: u32 = 720;
}

/// Pixel layout constants
pub mod pixel {
    /// Bits per pixel of NV12 (onboard sensor output)
    pub const NV12_DEPTH: u32 = 12;

    /// Bits per pixel of packed RGB (external camera output)
    pub const RGB_DEPTH: u32 = 24;

    /// Channels in a converted output pixel
    pub const RGBA_CHANNELS: usize = 4;

    /// Alpha written by the conversion kernels (outputs are in 0..=255)
    pub const OPAQUE_ALPHA: f32 = 255.0;
}

/// GStreamer pipeline settings
pub mod pipeline {
    /// Name of the appsink element the launch description must contain
    pub const APPSINK_NAME: &str = "mysink";

    /// Maximum buffers queued inside appsink before it starts dropping
    pub const MAX_BUFFERS: u32 = 2;
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Log per-frame details every N frames
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Sleep between bus polls while the pipeline settles after `open`
    pub const OPEN_SETTLE: Duration = Duration::from_millis(100);

    /// Upper bound for an asynchronous transition to PLAYING
    pub const OPEN_ASYNC_BUDGET: Duration = Duration::from_secs(5);

    /// Delay after requesting NULL before buffers may be released
    pub const CLOSE_SETTLE: Duration = Duration::from_millis(250);

    /// Default consumer wait for a new frame
    pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 1000;
}
