// SPDX-License-Identifier: GPL-3.0-only

//! Host/device buffer allocation
//!
//! Every ring slot is a [`FrameBuffer`]: a host-visible region plus a device
//! view. On platforms with unified (mapped) memory the device view aliases
//! the host region and no transfer is needed. Otherwise the device view is a
//! separate region and [`FrameBuffer::sync_to_device`] performs the explicit
//! transfer.
//!
//! ```text
//!  UnifiedAllocator           StagedAllocator
//!  ┌──────────────┐           ┌──────────────┐  sync   ┌──────────────┐
//!  │ host = device│           │     host     │ ──────► │    device    │
//!  └──────────────┘           └──────────────┘         └──────────────┘
//! ```

use crate::errors::{CaptureError, CaptureResult};
use bytemuck::{Pod, PodCastError};

/// Round a byte size up to whole 32-bit words
fn words_for(size: usize) -> usize {
    size.div_ceil(std::mem::size_of::<u32>())
}

/// Allocate zeroed words, reporting allocation failure instead of aborting
fn try_alloc_words(size: usize) -> CaptureResult<Box<[u32]>> {
    if size == 0 {
        return Err(CaptureError::Allocation(
            "refusing to allocate a zero-sized buffer".to_string(),
        ));
    }

    let words = words_for(size);
    let mut storage: Vec<u32> = Vec::new();
    storage
        .try_reserve_exact(words)
        .map_err(|e| CaptureError::Allocation(format!("{} bytes: {}", size, e)))?;
    storage.resize(words, 0);
    Ok(storage.into_boxed_slice())
}

/// Device side of a [`FrameBuffer`]
enum DeviceView {
    /// Same memory as the host region
    Aliased,
    /// Separate region, updated by an explicit transfer
    Mirror(Box<[u32]>),
}

/// A paired host/device buffer of fixed byte size
///
/// Storage is word aligned so the same buffer can be viewed as raw bytes
/// (captured frames) or as `f32` pixels (conversion output).
pub struct FrameBuffer {
    host: Box<[u32]>,
    device: DeviceView,
    len: usize,
}

impl FrameBuffer {
    /// Buffer whose device view aliases host memory
    pub fn aliased(size: usize) -> CaptureResult<Self> {
        Ok(Self {
            host: try_alloc_words(size)?,
            device: DeviceView::Aliased,
            len: size,
        })
    }

    /// Buffer with a separate device region
    pub fn mirrored(size: usize) -> CaptureResult<Self> {
        Ok(Self {
            host: try_alloc_words(size)?,
            device: DeviceView::Mirror(try_alloc_words(size)?),
            len: size,
        })
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Host-visible bytes
    pub fn host(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.host[..])[..self.len]
    }

    /// Mutable host-visible bytes
    pub fn host_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.host[..])[..len]
    }

    /// Device-visible bytes (the host bytes when aliased)
    pub fn device(&self) -> &[u8] {
        match &self.device {
            DeviceView::Aliased => self.host(),
            DeviceView::Mirror(words) => &bytemuck::cast_slice::<u32, u8>(&words[..])[..self.len],
        }
    }

    /// View the host region as plain-old-data elements
    pub fn cast<T: Pod>(&self) -> Result<&[T], PodCastError> {
        bytemuck::try_cast_slice(&self.host[..])
    }

    /// Mutable view of the host region as plain-old-data elements
    pub fn cast_mut<T: Pod>(&mut self) -> Result<&mut [T], PodCastError> {
        bytemuck::try_cast_slice_mut(&mut self.host[..])
    }

    /// Address of the host region
    pub fn host_address(&self) -> usize {
        self.host.as_ptr() as usize
    }

    /// Address of the device region
    pub fn device_address(&self) -> usize {
        match &self.device {
            DeviceView::Aliased => self.host_address(),
            DeviceView::Mirror(words) => words.as_ptr() as usize,
        }
    }

    /// Host and device views share one address
    pub fn is_unified(&self) -> bool {
        self.host_address() == self.device_address()
    }

    /// Copy host contents to the device region (no-op when aliased)
    pub fn sync_to_device(&mut self) {
        if let DeviceView::Mirror(device) = &mut self.device {
            device.copy_from_slice(&self.host[..]);
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.len)
            .field("host", &format_args!("{:#x}", self.host_address()))
            .field("device", &format_args!("{:#x}", self.device_address()))
            .field("unified", &self.is_unified())
            .finish()
    }
}

/// Accelerator allocation backend
///
/// Implementations must be callable from the producer thread (ring warm-up)
/// and the consumer thread (conversion warm-up).
pub trait DeviceAllocator: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Allocate a paired host/device buffer; the views may or may not alias
    fn allocate(&self, size: usize) -> CaptureResult<FrameBuffer>;

    /// Allocate a buffer the caller wants to use zero-copy
    ///
    /// Backends that cannot map one region into both address spaces return a
    /// buffer with distinct views; callers check [`FrameBuffer::is_unified`].
    fn allocate_mapped(&self, size: usize) -> CaptureResult<FrameBuffer> {
        self.allocate(size)
    }
}

/// Allocator for platforms with unified/mapped memory
#[derive(Debug, Clone, Copy, Default)]
pub struct UnifiedAllocator;

impl DeviceAllocator for UnifiedAllocator {
    fn name(&self) -> &str {
        "unified"
    }

    fn allocate(&self, size: usize) -> CaptureResult<FrameBuffer> {
        FrameBuffer::aliased(size)
    }
}

/// Allocator for discrete accelerators: separate device region, explicit transfer
#[derive(Debug, Clone, Copy, Default)]
pub struct StagedAllocator;

impl DeviceAllocator for StagedAllocator {
    fn name(&self) -> &str {
        "staged"
    }

    fn allocate(&self, size: usize) -> CaptureResult<FrameBuffer> {
        FrameBuffer::mirrored(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliased_buffer_is_unified() {
        let buffer = UnifiedAllocator.allocate(10).unwrap();
        assert!(buffer.is_unified());
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.host().len(), 10);
        assert_eq!(buffer.host_address() % std::mem::align_of::<u32>(), 0);
    }

    #[test]
    fn test_mirrored_buffer_needs_sync() {
        let mut buffer = StagedAllocator.allocate(8).unwrap();
        assert!(!buffer.is_unified());

        buffer
            .host_mut()
            .copy_from_slice(&[1u8, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buffer.device(), &[0u8; 8]);

        buffer.sync_to_device();
        assert_eq!(buffer.device(), &[1u8, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            UnifiedAllocator.allocate(0),
            Err(CaptureError::Allocation(_))
        ));
    }

    #[test]
    fn test_float_view() {
        let mut buffer = UnifiedAllocator.allocate(16).unwrap();
        buffer
            .cast_mut::<f32>()
            .unwrap()
            .copy_from_slice(&[1.0f32, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.cast::<f32>().unwrap(), &[1.0f32, 2.0, 3.0, 4.0]);
    }
}
