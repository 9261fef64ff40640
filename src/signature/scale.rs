//! Aspect-preserving downscale for signature assets

use std::num::NonZeroU32;

use fast_image_resize as fr;
use log::warn;

use crate::pixels::{PixelBuffer, PixelFormat};

/// Shrinks `buffer` to fit within `max_width` x `max_height`.
///
/// Never upscales: a buffer that already fits comes back as an equal copy.
/// Returns `None` for empty buffers or a zero-sized box.
#[must_use]
pub fn scale(buffer: &PixelBuffer, max_width: u32, max_height: u32) -> Option<PixelBuffer> {
    if buffer.is_empty() || max_width == 0 || max_height == 0 {
        warn!(
            "Cannot scale {}x{} into {max_width}x{max_height}",
            buffer.width(),
            buffer.height()
        );
        return None;
    }

    let (width, height) = buffer.dimensions();
    if width <= max_width && height <= max_height {
        return Some(buffer.clone());
    }

    let ratio = (f64::from(max_width) / f64::from(width)).min(f64::from(max_height) / f64::from(height));
    let new_width = ((f64::from(width) * ratio).round() as u32).clamp(1, max_width);
    let new_height = ((f64::from(height) * ratio).round() as u32).clamp(1, max_height);

    match fast_resize(buffer, new_width, new_height) {
        Ok(resized) => Some(resized),
        Err(e) => {
            warn!("Failed to scale {width}x{height} to {new_width}x{new_height}: {e}");
            None
        }
    }
}

fn fast_resize(
    buffer: &PixelBuffer,
    new_width: u32,
    new_height: u32,
) -> Result<PixelBuffer, Box<dyn std::error::Error>> {
    let pixel_type = match buffer.format() {
        PixelFormat::Rgb8 => fr::PixelType::U8x3,
        PixelFormat::Rgba8 => fr::PixelType::U8x4,
    };

    let src = fr::Image::from_vec_u8(
        NonZeroU32::new(buffer.width()).ok_or("Invalid width")?,
        NonZeroU32::new(buffer.height()).ok_or("Invalid height")?,
        buffer.data().to_vec(),
        pixel_type,
    )?;
    let mut dst = fr::Image::new(
        NonZeroU32::new(new_width).ok_or("Invalid target width")?,
        NonZeroU32::new(new_height).ok_or("Invalid target height")?,
        pixel_type,
    );

    let mut resizer = fr::Resizer::new(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3));
    resizer.resize(&src.view(), &mut dst.view_mut())?;

    Ok(PixelBuffer::from_raw(
        new_width,
        new_height,
        buffer.format(),
        dst.into_vec(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_upscales() {
        let buffer = PixelBuffer::filled(400, 200, PixelFormat::Rgba8, [0, 0, 0, 255]);
        let scaled = scale(&buffer, 800, 400).unwrap();
        assert_eq!(scaled, buffer);
    }

    #[test]
    fn shrinks_to_the_tighter_edge() {
        let buffer = PixelBuffer::filled(1000, 250, PixelFormat::Rgba8, [10, 10, 10, 255]);
        let scaled = scale(&buffer, 500, 500).unwrap();
        assert_eq!(scaled.dimensions(), (500, 125));

        let tall = PixelBuffer::filled(300, 900, PixelFormat::Rgb8, [200, 200, 200, 255]);
        let scaled = scale(&tall, 800, 300).unwrap();
        assert_eq!(scaled.dimensions(), (100, 300));
        assert_eq!(scaled.format(), PixelFormat::Rgb8);
    }

    #[test]
    fn rejects_degenerate_sizes() {
        let empty = PixelBuffer::new(0, 5, PixelFormat::Rgba8);
        assert!(scale(&empty, 10, 10).is_none());

        let buffer = PixelBuffer::filled(4, 4, PixelFormat::Rgba8, [0, 0, 0, 255]);
        assert!(scale(&buffer, 0, 10).is_none());
    }
}
