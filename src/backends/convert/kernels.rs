// SPDX-License-Identifier: GPL-3.0-only

//! CPU colorspace kernels producing float RGBA
//!
//! Output channels are in `0.0..=255.0` with opaque alpha. Both kernels honor
//! the row strides in [`FrameLayout`] and fall back to tightly packed rows when
//! the layout carries none.

use super::RgbaF32;
use crate::backends::types::FrameLayout;
use crate::constants::pixel;

/// A raw-format to float-RGBA conversion
///
/// `output` holds exactly `width * height` pixels. Errors describe why the
/// input could not be converted; they are per-call and never poison the pool.
pub trait ConversionKernel: Send + Sync {
    /// Kernel name for logging
    fn name(&self) -> &'static str;

    fn convert(
        &self,
        input: &[u8],
        layout: &FrameLayout,
        output: &mut [RgbaF32],
    ) -> Result<(), String>;
}

fn check_output(layout: &FrameLayout, output: &[RgbaF32]) -> Result<(), String> {
    if !layout.is_valid() {
        return Err(format!("invalid dimensions {}x{}", layout.width, layout.height));
    }
    if output.len() != layout.pixel_count() {
        return Err(format!(
            "output holds {} pixels, frame has {}",
            output.len(),
            layout.pixel_count()
        ));
    }
    Ok(())
}

#[inline]
fn rgba(r: i32, g: i32, b: i32) -> RgbaF32 {
    RgbaF32 {
        r: r.clamp(0, 255) as f32,
        g: g.clamp(0, 255) as f32,
        b: b.clamp(0, 255) as f32,
        a: pixel::OPAQUE_ALPHA,
    }
}

/// NV12 (Y plane + interleaved half-resolution UV plane), BT.601 limited range
#[derive(Debug, Clone, Copy, Default)]
pub struct Nv12ToRgbaF32;

impl ConversionKernel for Nv12ToRgbaF32 {
    fn name(&self) -> &'static str {
        "nv12"
    }

    fn convert(
        &self,
        input: &[u8],
        layout: &FrameLayout,
        output: &mut [RgbaF32],
    ) -> Result<(), String> {
        check_output(layout, output)?;

        let width = layout.width as usize;
        let height = layout.height as usize;
        let (y_stride, uv_offset, uv_stride) = match layout.planes {
            Some(p) if p.chroma_stride > 0 => {
                (p.stride as usize, p.chroma_offset, p.chroma_stride as usize)
            }
            Some(p) => (p.stride as usize, p.stride as usize * height, p.stride as usize),
            None => (width, width * height, width),
        };

        let chroma_rows = height.div_ceil(2);
        let chroma_row_bytes = width.div_ceil(2) * 2;
        let luma_end = (height - 1) * y_stride + width;
        let chroma_end = uv_offset + (chroma_rows - 1) * uv_stride + chroma_row_bytes;

        if y_stride < width || uv_stride < chroma_row_bytes || uv_offset < luma_end {
            return Err(format!("inconsistent NV12 layout {}", layout));
        }
        if input.len() < chroma_end {
            return Err(format!(
                "NV12 frame {} needs {} bytes, got {}",
                layout,
                chroma_end,
                input.len()
            ));
        }

        let y_plane = &input[..uv_offset];
        let uv_plane = &input[uv_offset..];

        for row in 0..height {
            let y_row = &y_plane[row * y_stride..row * y_stride + width];
            let uv_row_start = (row / 2) * uv_stride;
            let out_row = &mut output[row * width..(row + 1) * width];

            for (x, out) in out_row.iter_mut().enumerate() {
                let uv = uv_row_start + (x / 2) * 2;
                let u = uv_plane[uv] as i32 - 128;
                let v = uv_plane[uv + 1] as i32 - 128;

                let luma = ((y_row[x] as i32 - 16) * 149) >> 7;
                let r_v = (179 * v) >> 7;
                let g_u = (44 * u) >> 7;
                let g_v = (91 * v) >> 7;
                let b_u = (227 * u) >> 7;

                *out = rgba(luma + r_v, luma - g_u - g_v, luma + b_u);
            }
        }

        Ok(())
    }
}

/// Packed 24-bit RGB
#[derive(Debug, Clone, Copy, Default)]
pub struct RgbToRgbaF32;

impl ConversionKernel for RgbToRgbaF32 {
    fn name(&self) -> &'static str {
        "rgb"
    }

    fn convert(
        &self,
        input: &[u8],
        layout: &FrameLayout,
        output: &mut [RgbaF32],
    ) -> Result<(), String> {
        check_output(layout, output)?;

        let width = layout.width as usize;
        let height = layout.height as usize;
        let row_bytes = width * 3;
        let stride = layout
            .planes
            .map(|p| p.stride as usize)
            .unwrap_or(row_bytes);

        if stride < row_bytes {
            return Err(format!("RGB stride {} shorter than a row", stride));
        }

        let needed = (height - 1) * stride + row_bytes;
        if input.len() < needed {
            return Err(format!(
                "RGB frame {} needs {} bytes, got {}",
                layout,
                needed,
                input.len()
            ));
        }

        for row in 0..height {
            let src = &input[row * stride..row * stride + row_bytes];
            let dst = &mut output[row * width..(row + 1) * width];
            for (out, rgb) in dst.iter_mut().zip(src.chunks_exact(3)) {
                *out = rgba(rgb[0] as i32, rgb[1] as i32, rgb[2] as i32);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::types::PlaneStrides;

    fn output(width: u32, height: u32) -> Vec<RgbaF32> {
        vec![RgbaF32::default(); (width * height) as usize]
    }

    #[test]
    fn test_nv12_neutral_gray() {
        let (w, h) = (4u32, 4u32);
        let data = vec![128u8; (w * h * 3 / 2) as usize];
        let mut out = output(w, h);

        Nv12ToRgbaF32
            .convert(&data, &FrameLayout::packed(w, h), &mut out)
            .unwrap();

        // (128 - 16) * 149 >> 7 = 130
        for px in &out {
            assert_eq!(*px, RgbaF32 { r: 130.0, g: 130.0, b: 130.0, a: 255.0 });
        }
    }

    #[test]
    fn test_nv12_clamps_to_range() {
        let (w, h) = (2u32, 2u32);
        // Bright luma with extreme chroma pushes channels past both ends
        let data = vec![255u8, 255, 255, 255, 255, 0];
        let mut out = output(w, h);

        Nv12ToRgbaF32
            .convert(&data, &FrameLayout::packed(w, h), &mut out)
            .unwrap();

        for px in &out {
            for c in [px.r, px.g, px.b] {
                assert!((0.0..=255.0).contains(&c));
            }
        }
        assert_eq!(out[0].b, 255.0);
    }

    #[test]
    fn test_nv12_padded_rows() {
        let (w, h) = (2u32, 2u32);
        let stride = 8usize;
        let mut data = vec![0u8; stride * 2 + stride];
        data[0] = 16;
        data[1] = 16;
        data[stride] = 235;
        data[stride + 1] = 235;
        data[stride * 2] = 128;
        data[stride * 2 + 1] = 128;

        let layout = FrameLayout::with_planes(
            w,
            h,
            PlaneStrides {
                stride: stride as u32,
                chroma_offset: stride * 2,
                chroma_stride: stride as u32,
            },
        );
        let mut out = output(w, h);
        Nv12ToRgbaF32.convert(&data, &layout, &mut out).unwrap();

        // (235 - 16) * 149 >> 7 = 254
        assert_eq!(out[0].r, 0.0);
        assert_eq!(out[2].r, 254.0);
    }

    #[test]
    fn test_nv12_short_input() {
        let mut out = output(4, 4);
        let err = Nv12ToRgbaF32
            .convert(&[0u8; 10], &FrameLayout::packed(4, 4), &mut out)
            .unwrap_err();
        assert!(err.contains("needs 24 bytes"));
    }

    #[test]
    fn test_rgb_copies_channels() {
        let data = vec![10u8, 20, 30, 40, 50, 60];
        let mut out = output(2, 1);
        RgbToRgbaF32
            .convert(&data, &FrameLayout::packed(2, 1), &mut out)
            .unwrap();

        assert_eq!(out[0], RgbaF32 { r: 10.0, g: 20.0, b: 30.0, a: 255.0 });
        assert_eq!(out[1], RgbaF32 { r: 40.0, g: 50.0, b: 60.0, a: 255.0 });
    }

    #[test]
    fn test_output_size_mismatch() {
        let mut out = output(1, 1);
        assert!(RgbToRgbaF32
            .convert(&[0u8; 12], &FrameLayout::packed(2, 2), &mut out)
            .is_err());
    }
}
