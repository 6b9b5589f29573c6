// SPDX-License-Identifier: GPL-3.0-only

//! Capture engine building blocks
//!
//! - [`memory`]: paired host/device buffers and allocation backends
//! - [`ring`]: the capture ring and latest-frame handoff
//! - [`convert`]: the float RGBA conversion pool and kernels
//! - [`pipeline`]: the GStreamer frame source
//! - [`frame_loop`]: the consumer thread

pub mod convert;
pub mod frame_loop;
pub mod memory;
pub mod pipeline;
pub mod ring;
pub mod types;
