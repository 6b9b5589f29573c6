// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the capture ring, conversion pool and pipeline

use crate::constants::pixel;
use serde::{Deserialize, Serialize};

/// Which kind of camera feeds the pipeline
///
/// The source decides the raw pixel format delivered to the ring and
/// therefore which conversion kernel the conversion pool dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceType {
    /// Integrated CSI sensor, delivers NV12 (4:2:0 semi-planar)
    #[default]
    Onboard,
    /// External V4L2 camera (e.g. USB), delivers packed 24-bit RGB
    External {
        /// V4L2 device number (`/dev/videoN`)
        device: u32,
    },
}

impl SourceType {
    /// Whether this is the integrated sensor
    pub fn is_onboard(&self) -> bool {
        matches!(self, SourceType::Onboard)
    }

    /// Nominal bits per pixel of the raw format this source delivers
    pub fn pixel_depth(&self) -> u32 {
        match self {
            SourceType::Onboard => pixel::NV12_DEPTH,
            SourceType::External { .. } => pixel::RGB_DEPTH,
        }
    }

    /// GStreamer format string of the raw frames
    pub fn gst_format(&self) -> &'static str {
        match self {
            SourceType::Onboard => "NV12",
            SourceType::External { .. } => "RGB",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Onboard => write!(f, "onboard (NV12)"),
            SourceType::External { device } => write!(f, "/dev/video{} (RGB)", device),
        }
    }
}

/// Row strides and plane offsets of a padded frame
///
/// GStreamer may pad rows (and align the chroma plane) so that the byte size
/// of a buffer is larger than `width * height * depth / 8`. Kernels use these
/// values instead of assuming tightly packed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneStrides {
    /// Bytes per row of the first (luma or packed) plane
    pub stride: u32,
    /// Offset of the interleaved chroma plane (NV12 only, 0 otherwise)
    pub chroma_offset: usize,
    /// Bytes per row of the chroma plane (NV12 only, 0 otherwise)
    pub chroma_stride: u32,
}

/// Geometry of one frame as declared by the upstream caps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    /// Explicit strides, or `None` for tightly packed rows
    pub planes: Option<PlaneStrides>,
}

impl FrameLayout {
    /// Layout with tightly packed rows
    pub fn packed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            planes: None,
        }
    }

    /// Layout with explicit strides
    pub fn with_planes(width: u32, height: u32, planes: PlaneStrides) -> Self {
        Self {
            width,
            height,
            planes: Some(planes),
        }
    }

    /// Both dimensions are non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Build a layout from GStreamer video info values
    ///
    /// `strides` and `offsets` are per plane. Returns `None` when the
    /// dimensions are unusable.
    pub fn from_video_info(
        width: u32,
        height: u32,
        strides: &[i32],
        offsets: &[usize],
    ) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }

        let stride = match strides.first() {
            Some(&s) if s > 0 => s as u32,
            _ => return Some(Self::packed(width, height)),
        };

        let (chroma_offset, chroma_stride) = match (strides.get(1), offsets.get(1)) {
            (Some(&s), Some(&o)) if s > 0 => (o, s as u32),
            _ => (0, 0),
        };

        Some(Self::with_planes(
            width,
            height,
            PlaneStrides {
                stride,
                chroma_offset,
                chroma_stride,
            },
        ))
    }
}

impl std::fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.planes {
            Some(p) => write!(f, "{}x{} (stride {})", self.width, self.height, p.stride),
            None => write!(f, "{}x{}", self.width, self.height),
        }
    }
}

/// Frame geometry that stays fixed for the life of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub width: u32,
    pub height: u32,
    /// Bits per pixel
    pub depth: u32,
    /// Bytes per frame
    pub size: usize,
}

impl SessionParams {
    /// Parameters derived from the first delivered buffer
    ///
    /// The depth is the byte size spread over the declared pixel count, so
    /// row padding shows up as a larger depth.
    pub fn from_frame(size: usize, width: u32, height: u32) -> Self {
        let pixels = (width as u64 * height as u64).max(1);
        Self {
            width,
            height,
            depth: ((size as u64 * 8) / pixels) as u32,
            size,
        }
    }

    /// Parameters expected before any frame has arrived
    pub fn requested(width: u32, height: u32, source: SourceType) -> Self {
        let depth = source.pixel_depth();
        Self {
            width,
            height,
            depth,
            size: (width as usize * height as usize * depth as usize) / 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_from_frame() {
        let params = SessionParams::from_frame(800, 20, 20);
        assert_eq!(params.depth, 16);
        assert_eq!(params.size, 800);

        let nv12 = SessionParams::from_frame(1920 * 1080 * 3 / 2, 1920, 1080);
        assert_eq!(nv12.depth, 12);
    }

    #[test]
    fn test_requested_params() {
        let onboard = SessionParams::requested(1280, 720, SourceType::Onboard);
        assert_eq!(onboard.depth, 12);
        assert_eq!(onboard.size, 1280 * 720 * 3 / 2);

        let usb = SessionParams::requested(640, 480, SourceType::External { device: 1 });
        assert_eq!(usb.depth, 24);
        assert_eq!(usb.size, 640 * 480 * 3);
    }

    #[test]
    fn test_layout_from_video_info() {
        let layout = FrameLayout::from_video_info(1920, 1080, &[2048, 2048], &[0, 2048 * 1088])
            .expect("valid layout");
        let planes = layout.planes.expect("strides present");
        assert_eq!(planes.stride, 2048);
        assert_eq!(planes.chroma_offset, 2048 * 1088);
        assert_eq!(planes.chroma_stride, 2048);

        let packed = FrameLayout::from_video_info(640, 480, &[1920], &[0])
            .and_then(|l| l.planes)
            .expect("single plane");
        assert_eq!(packed.chroma_offset, 0);
        assert_eq!(packed.chroma_stride, 0);

        assert!(FrameLayout::from_video_info(0, 480, &[640], &[0]).is_none());
    }

    #[test]
    fn test_source_serde() {
        let json = serde_json::to_string(&SourceType::External { device: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"external","device":2}"#);
        let back: SourceType = serde_json::from_str(r#"{"type":"onboard"}"#).unwrap();
        assert_eq!(back, SourceType::Onboard);
    }
}
