// SPDX-License-Identifier: GPL-3.0-only

//! Conversion buffer pool
//!
//! Converts captured frames to float RGBA in a second ring of device-visible
//! buffers. The pool rotates its own slots on every successful conversion,
//! independently of the capture ring, so the consumer can keep the previous
//! result while the next one is written.
//!
//! Slots are allocated on the first conversion, sized from that frame. When
//! zero-copy is requested the allocator must hand back buffers whose host and
//! device views share one address; anything else fails the warm-up with
//! [`CaptureError::UnifiedMemoryUnsupported`] and leaves the pool empty.

mod kernels;

pub use kernels::{ConversionKernel, Nv12ToRgbaF32, RgbToRgbaF32};

use crate::backends::memory::{DeviceAllocator, FrameBuffer};
use crate::backends::ring::CapturedFrame;
use crate::backends::types::{FrameLayout, SourceType};
use crate::constants::pixel;
use crate::errors::{CaptureError, CaptureResult};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// One converted pixel, channels in `0.0..=255.0`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct RgbaF32 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Result of one conversion, pinned to its pool slot
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    slot: usize,
    width: u32,
    height: u32,
    buffer: Arc<FrameBuffer>,
}

impl RgbaFrame {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Converted pixels, row-major
    pub fn pixels(&self) -> &[RgbaF32] {
        self.buffer.cast::<RgbaF32>().unwrap_or(&[])
    }

    /// Converted pixels as a flat `width * height * 4` float slice
    pub fn floats(&self) -> &[f32] {
        self.buffer.cast::<f32>().unwrap_or(&[])
    }

    pub fn host_address(&self) -> usize {
        self.buffer.host_address()
    }

    pub fn device_address(&self) -> usize {
        self.buffer.device_address()
    }

    pub fn is_unified(&self) -> bool {
        self.buffer.is_unified()
    }

    /// Quantize to an 8-bit RGBA image
    pub fn to_rgba8(&self) -> Option<RgbaImage> {
        let bytes = self
            .floats()
            .iter()
            .map(|c| c.round().clamp(0.0, 255.0) as u8)
            .collect();
        RgbaImage::from_raw(self.width, self.height, bytes)
    }
}

/// Round-robin pool of float RGBA output buffers
pub struct ConversionPool {
    source: SourceType,
    kernel: Box<dyn ConversionKernel>,
    allocator: Arc<dyn DeviceAllocator>,
    capacity: usize,
    slots: Vec<Arc<FrameBuffer>>,
    dimensions: Option<(u32, u32)>,
    next: usize,
}

impl ConversionPool {
    /// Create an empty pool whose kernel is chosen by `source`
    pub fn new(source: SourceType, allocator: Arc<dyn DeviceAllocator>, capacity: usize) -> Self {
        let kernel: Box<dyn ConversionKernel> = match source {
            SourceType::Onboard => Box::new(Nv12ToRgbaF32),
            SourceType::External { .. } => Box::new(RgbToRgbaF32),
        };
        Self::with_kernel(source, kernel, allocator, capacity)
    }

    /// Create an empty pool with an explicit kernel
    pub fn with_kernel(
        source: SourceType,
        kernel: Box<dyn ConversionKernel>,
        allocator: Arc<dyn DeviceAllocator>,
        capacity: usize,
    ) -> Self {
        Self {
            source,
            kernel,
            allocator,
            capacity: capacity.max(1),
            slots: Vec::new(),
            dimensions: None,
            next: 0,
        }
    }

    pub fn source(&self) -> SourceType {
        self.source
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Slot the next conversion writes into
    pub fn next_index(&self) -> usize {
        self.next
    }

    fn warm_up(&mut self, width: u32, height: u32, zero_copy: bool) -> CaptureResult<()> {
        let size = width as usize
            * height as usize
            * pixel::RGBA_CHANNELS
            * std::mem::size_of::<f32>();

        let mut slots = Vec::with_capacity(self.capacity);
        for index in 0..self.capacity {
            let buffer = if zero_copy {
                self.allocator.allocate_mapped(size)?
            } else {
                self.allocator.allocate(size)?
            };

            if zero_copy && !buffer.is_unified() {
                error!(
                    slot = index,
                    allocator = self.allocator.name(),
                    host = buffer.host_address(),
                    device = buffer.device_address(),
                    "Zero-copy buffer has distinct host and device addresses"
                );
                return Err(CaptureError::UnifiedMemoryUnsupported);
            }

            slots.push(Arc::new(buffer));
        }

        info!(
            slots = self.capacity,
            width,
            height,
            bytes = size,
            zero_copy,
            kernel = self.kernel.name(),
            "Allocated conversion pool"
        );

        self.slots = slots;
        self.dimensions = Some((width, height));
        self.next = 0;
        Ok(())
    }

    /// First slot from `next` onwards that no caller still holds
    fn free_slot(&self) -> Option<usize> {
        (0..self.slots.len())
            .map(|offset| (self.next + offset) % self.slots.len())
            .find(|&index| {
                let slot = &self.slots[index];
                Arc::strong_count(slot) == 1 && Arc::weak_count(slot) == 0
            })
    }

    /// Convert an acquired capture frame
    pub fn convert(&mut self, frame: &CapturedFrame, zero_copy: bool) -> CaptureResult<RgbaFrame> {
        self.convert_raw(frame.data(), &frame.layout(), zero_copy)
    }

    /// Convert raw bytes described by `layout`
    ///
    /// Writes into the slot at the rotation index, or the next one after it
    /// when a previous result is still held; fails only when every slot is
    /// held. On failure the rotation index does not move and the capture ring
    /// is unaffected.
    pub fn convert_raw(
        &mut self,
        input: &[u8],
        layout: &FrameLayout,
        zero_copy: bool,
    ) -> CaptureResult<RgbaFrame> {
        if !layout.is_valid() {
            return Err(CaptureError::ConversionFailure(format!(
                "invalid dimensions {}x{}",
                layout.width, layout.height
            )));
        }

        if self.slots.is_empty() {
            self.warm_up(layout.width, layout.height, zero_copy)?;
        }

        if self.dimensions != Some((layout.width, layout.height)) {
            return Err(CaptureError::ConversionFailure(format!(
                "frame {} does not match pool dimensions {:?}",
                layout, self.dimensions
            )));
        }

        let Some(index) = self.free_slot() else {
            return Err(CaptureError::ConversionFailure(format!(
                "all {} conversion slots are still in use",
                self.capacity
            )));
        };
        if index != self.next {
            trace!(held = self.next, slot = index, "Skipping held conversion slot");
        }
        let slot = &mut self.slots[index];

        if zero_copy && !slot.is_unified() {
            return Err(CaptureError::UnifiedMemoryUnsupported);
        }

        let Some(buffer) = Arc::get_mut(slot) else {
            return Err(CaptureError::ConversionFailure(format!(
                "conversion slot {} is still in use",
                index
            )));
        };

        let pixels = buffer
            .cast_mut::<RgbaF32>()
            .map_err(|e| CaptureError::ConversionFailure(format!("output view: {:?}", e)))?;
        self.kernel
            .convert(input, layout, pixels)
            .map_err(CaptureError::ConversionFailure)?;
        buffer.sync_to_device();

        let frame = RgbaFrame {
            slot: index,
            width: layout.width,
            height: layout.height,
            buffer: Arc::clone(slot),
        };
        self.next = (index + 1) % self.capacity;

        debug!(slot = index, kernel = self.kernel.name(), "Converted frame");
        Ok(frame)
    }
}

impl std::fmt::Debug for ConversionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionPool")
            .field("source", &self.source)
            .field("kernel", &self.kernel.name())
            .field("capacity", &self.capacity)
            .field("allocated", &self.is_allocated())
            .field("next", &self.next)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::UnifiedAllocator;

    #[test]
    fn test_kernel_dispatch() {
        let onboard = ConversionPool::new(SourceType::Onboard, Arc::new(UnifiedAllocator), 2);
        assert_eq!(onboard.kernel_name(), "nv12");

        let usb = ConversionPool::new(
            SourceType::External { device: 0 },
            Arc::new(UnifiedAllocator),
            2,
        );
        assert_eq!(usb.kernel_name(), "rgb");
    }

    #[test]
    fn test_rotation_skips_failed_calls() {
        let mut pool = ConversionPool::new(
            SourceType::External { device: 0 },
            Arc::new(UnifiedAllocator),
            2,
        );
        let layout = FrameLayout::packed(2, 2);

        pool.convert_raw(&[0u8; 12], &layout, false).unwrap();
        assert_eq!(pool.next_index(), 1);

        assert!(pool.convert_raw(&[0u8; 3], &layout, false).is_err());
        assert_eq!(pool.next_index(), 1);
    }

    #[test]
    fn test_to_rgba8() {
        let mut pool = ConversionPool::new(
            SourceType::External { device: 0 },
            Arc::new(UnifiedAllocator),
            1,
        );
        let frame = pool
            .convert_raw(&[1u8, 2, 3], &FrameLayout::packed(1, 1), false)
            .unwrap();
        let image = frame.to_rgba8().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [1, 2, 3, 255]);
    }
}
