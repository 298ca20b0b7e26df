use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"NV12" => Some(Self::Nv12),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = width
                .checked_mul(height)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            // Drivers may pad the mmap buffer past the image.
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
    }
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            write_rgb(&mut rgb[(j * w + i) * 3..], y, u, v);
        }
    }

    Ok(rgb)
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    if width % 2 != 0 || pixels.len() < pixel_count * 2 {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {} for even width, got {}",
            pixel_count * 2,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; pixel_count * 3];
    for (pair, macro_pixel) in pixels[..pixel_count * 2].chunks_exact(4).enumerate() {
        let u = macro_pixel[1] as f32 - 128.0;
        let v = macro_pixel[3] as f32 - 128.0;
        let offset = pair * 6;
        write_rgb(&mut rgb[offset..], macro_pixel[0] as f32, u, v);
        write_rgb(&mut rgb[offset + 3..], macro_pixel[2] as f32, u, v);
    }
    Ok(rgb)
}

fn write_rgb(out: &mut [u8], y: f32, u: f32, v: f32) {
    out[0] = clamp_to_u8(y + 1.402_f32 * v);
    out[1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
    out[2] = clamp_to_u8(y + 1.772_f32 * u);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![200u8, 128, 60, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![200, 200, 200, 60, 60, 60]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_trims_driver_padding() -> Result<()> {
        let mut pixels = vec![1u8; 9];
        pixels.extend_from_slice(&[0u8; 7]);
        let rgb = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![1u8; 9]);
        assert!(normalize_to_rgb(&[0u8; 8], 1, 3, PixelFormat::Rgb24).is_err());
        Ok(())
    }
}
