// Only the V4L2 backend delivers non-RGBA buffers.
#![cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]

use anyhow::{anyhow, Result};

/// Pixel layouts camera backends hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Rgba32,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"AB24" | b"RGBA" => Some(PixelFormat::Rgba32),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }
}

/// Convert a raw camera buffer into tightly packed RGBA8.
pub(crate) fn normalize_to_rgba(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let pixel_count = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgba32 => {
            expect_len(pixels, pixel_count * 4, "RGBA")?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Rgb24 => {
            expect_len(pixels, pixel_count * 3, "RGB")?;
            let mut rgba = Vec::with_capacity(pixel_count * 4);
            for rgb in pixels.chunks_exact(3) {
                rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
            }
            Ok(rgba)
        }
        PixelFormat::Yuyv => yuyv_to_rgba(pixels, w, h),
        PixelFormat::Nv12 => nv12_to_rgba(pixels, w, h),
    }
}

fn expect_len(pixels: &[u8], expected: usize, label: &str) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

// YUYV packs two pixels per 4 bytes: Y0 U Y1 V.
fn yuyv_to_rgba(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>> {
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", w));
    }
    expect_len(pixels, w * h * 2, "YUYV")?;
    let mut rgba = Vec::with_capacity(w * h * 4);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        rgba.extend_from_slice(&yuv_to_rgba(quad[0] as f32, u, v));
        rgba.extend_from_slice(&yuv_to_rgba(quad[2] as f32, u, v));
    }
    Ok(rgba)
}

fn nv12_to_rgba(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>> {
    let y_plane = w * h;
    expect_len(pixels, y_plane + y_plane / 2, "NV12")?;
    let mut rgba = vec![0u8; y_plane * 4];
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 4;
            rgba[offset..offset + 4].copy_from_slice(&yuv_to_rgba(pixels[j * w + i] as f32, u, v));
        }
    }
    Ok(rgba)
}

fn yuv_to_rgba(y: f32, u: f32, v: f32) -> [u8; 4] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b), 255]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgba = normalize_to_rgba(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgba, [128, 128, 128, 255].repeat(4));

        let yuyv = vec![128u8; 8];
        let rgba = normalize_to_rgba(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(rgba, [128, 128, 128, 255].repeat(4));
        Ok(())
    }

    #[test]
    fn rgb_gains_opaque_alpha() -> Result<()> {
        let rgba = normalize_to_rgba(&[10, 20, 30, 40, 50, 60], 2, 1, PixelFormat::Rgb24)?;
        assert_eq!(rgba, vec![10, 20, 30, 255, 40, 50, 60, 255]);
        Ok(())
    }

    #[test]
    fn length_mismatches_are_rejected() {
        assert!(normalize_to_rgba(&[0; 5], 1, 2, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgba(&[0; 6], 3, 1, PixelFormat::Yuyv).is_err());
        assert!(normalize_to_rgba(&[0; 7], 1, 2, PixelFormat::Rgba32).is_err());
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
