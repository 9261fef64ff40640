//! Owned pixel buffers shared by the render cache and the signature pipeline

use image::{DynamicImage, ImageBuffer};

/// Memory layout of a [`PixelBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 3 bytes per pixel, no alpha. Used for page display.
    Rgb8,
    /// 4 bytes per pixel, straight (non-premultiplied) alpha.
    Rgba8,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }

    #[must_use]
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("invalid buffer dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("{width}x{height} {format:?} buffer needs {expected} bytes, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("crop {x},{y} {width}x{height} exceeds {bounds_width}x{bounds_height} buffer")]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bounds_width: u32,
        bounds_height: u32,
    },
}

/// Rectangular grid of 8-bit samples with an explicit format.
///
/// A buffer has exactly one owner. The render cache shares finished pages as
/// `Arc<PixelBuffer>`, which makes the "borrowed by a view" state explicit.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

fn byte_len(width: u32, height: u32, format: PixelFormat) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(format.bytes_per_pixel())
}

impl PixelBuffer {
    /// Zero-filled buffer: black for `Rgb8`, fully transparent for `Rgba8`.
    ///
    /// # Panics
    /// Panics if the byte length overflows `usize`.
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = byte_len(width, height, format).expect("buffer size overflows usize");
        Self {
            width,
            height,
            format,
            data: vec![0; len],
        }
    }

    /// Buffer filled with one RGBA color (alpha ignored for `Rgb8`).
    #[must_use]
    pub fn filled(width: u32, height: u32, format: PixelFormat, rgba: [u8; 4]) -> Self {
        let mut buffer = Self::new(width, height, format);
        let bpp = format.bytes_per_pixel();
        for px in buffer.data.chunks_exact_mut(bpp) {
            px.copy_from_slice(&rgba[..bpp]);
        }
        buffer
    }

    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, BufferError> {
        let expected =
            byte_len(width, height, format).ok_or(BufferError::InvalidDimensions { width, height })?;
        if data.len() != expected {
            return Err(BufferError::SizeMismatch {
                width,
                height,
                format,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True when the buffer has no pixels at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Size of the pixel storage in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.row_stride() + x as usize * self.format.bytes_per_pixel())
    }

    /// Pixel as RGBA; `Rgb8` pixels report alpha 255.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let at = self.offset(x, y)?;
        let px = &self.data[at..at + self.format.bytes_per_pixel()];
        Some(match self.format {
            PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
        })
    }

    /// Writes an RGBA pixel. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if let Some(at) = self.offset(x, y) {
            let bpp = self.format.bytes_per_pixel();
            self.data[at..at + bpp].copy_from_slice(&rgba[..bpp]);
        }
    }

    /// Copy in `Rgba8` layout; `Rgb8` pixels become opaque.
    #[must_use]
    pub fn to_rgba(&self) -> PixelBuffer {
        match self.format {
            PixelFormat::Rgba8 => self.clone(),
            PixelFormat::Rgb8 => {
                let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
                for px in self.data.chunks_exact(3) {
                    data.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                PixelBuffer {
                    width: self.width,
                    height: self.height,
                    format: PixelFormat::Rgba8,
                    data,
                }
            }
        }
    }

    /// Copies the `width`x`height` rectangle at (`x`, `y`).
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<PixelBuffer, BufferError> {
        let fits = x
            .checked_add(width)
            .zip(y.checked_add(height))
            .is_some_and(|(right, bottom)| right <= self.width && bottom <= self.height);
        if !fits {
            return Err(BufferError::CropOutOfBounds {
                x,
                y,
                width,
                height,
                bounds_width: self.width,
                bounds_height: self.height,
            });
        }

        let bpp = self.format.bytes_per_pixel();
        let stride = self.row_stride();
        let row_bytes = width as usize * bpp;
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in y as usize..(y + height) as usize {
            let start = row * stride + x as usize * bpp;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Ok(PixelBuffer {
            width,
            height,
            format: self.format,
            data,
        })
    }

    /// Converts a decoded image; anything that is not plain RGB becomes `Rgba8`.
    #[must_use]
    pub fn from_image(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageRgb8(rgb) => Self {
                width: rgb.width(),
                height: rgb.height(),
                format: PixelFormat::Rgb8,
                data: rgb.as_raw().clone(),
            },
            other => {
                let rgba = other.to_rgba8();
                Self {
                    width: rgba.width(),
                    height: rgba.height(),
                    format: PixelFormat::Rgba8,
                    data: rgba.into_raw(),
                }
            }
        }
    }

    #[must_use]
    pub fn to_image(&self) -> DynamicImage {
        match self.format {
            PixelFormat::Rgb8 => ImageBuffer::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8),
            PixelFormat::Rgba8 => ImageBuffer::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgba8),
        }
        .unwrap_or_else(|| DynamicImage::new_rgba8(0, 0))
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish_non_exhaustive()
    }
}
