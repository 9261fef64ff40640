//! Signature extraction: grayscale, contrast, threshold, crop

use log::{debug, warn};
use rayon::prelude::*;

use crate::pixels::{BufferError, PixelBuffer};

/// Channel multiplier applied after desaturation
pub const DEFAULT_CONTRAST: f32 = 1.5;

/// Transparent margin kept around the detected ink, in pixels
pub const DEFAULT_PADDING: u32 = 20;

/// Threshold at sensitivity 0; every sensitivity step lowers it by one
pub const BASE_THRESHOLD: i32 = 220;

pub const MAX_SENSITIVITY: u8 = 100;

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("photo has no pixels ({width}x{height})")]
    EmptyPhoto { width: u32, height: u32 },

    #[error("invalid contrast factor {0}")]
    InvalidContrast(f32),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractorConfig {
    pub contrast: f32,
    pub padding: u32,
    pub base_threshold: i32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            contrast: DEFAULT_CONTRAST,
            padding: DEFAULT_PADDING,
            base_threshold: BASE_THRESHOLD,
        }
    }
}

impl ExtractorConfig {
    #[must_use]
    pub fn from_settings() -> Self {
        Self {
            contrast: crate::settings::get_signature_contrast(),
            padding: crate::settings::get_signature_padding(),
            base_threshold: BASE_THRESHOLD,
        }
    }
}

/// Inclusive pixel box around every non-transparent pixel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InkBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

/// Turns a photographed signature into a cropped asset with a transparent
/// background. Stateless; the same photo can be run at many sensitivities.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignatureExtractor {
    config: ExtractorConfig,
}

impl SignatureExtractor {
    #[must_use]
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> ExtractorConfig {
        self.config
    }

    /// Luminance above which a pixel counts as paper.
    ///
    /// Sensitivity is clamped to `0..=100`: 0 keeps almost everything (220),
    /// 100 strips aggressively (120).
    #[must_use]
    pub fn threshold_for(&self, sensitivity: u8) -> i32 {
        self.config.base_threshold - i32::from(sensitivity.min(MAX_SENSITIVITY))
    }

    /// Runs the full pipeline. Any failure yields a plain copy of `photo`.
    #[must_use]
    pub fn extract(&self, photo: &PixelBuffer, sensitivity: u8) -> PixelBuffer {
        match self.try_extract(photo, sensitivity) {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!("Signature extraction failed, keeping original photo: {e}");
                photo.clone()
            }
        }
    }

    pub fn try_extract(&self, photo: &PixelBuffer, sensitivity: u8) -> Result<PixelBuffer, ExtractError> {
        if photo.is_empty() {
            return Err(ExtractError::EmptyPhoto {
                width: photo.width(),
                height: photo.height(),
            });
        }
        let contrast = self.config.contrast;
        if !contrast.is_finite() || contrast < 0.0 {
            return Err(ExtractError::InvalidContrast(contrast));
        }

        let threshold = self.threshold_for(sensitivity);
        let mut work = photo.to_rgba();
        grayscale(&mut work);
        boost_contrast(&mut work, contrast);
        apply_threshold(&mut work, threshold);

        match find_ink_bounds(&work) {
            Some(bounds) => {
                debug!("Signature ink at {bounds:?}, threshold {threshold}");
                Ok(crop_padded(&work, bounds, self.config.padding)?)
            }
            None => {
                debug!("No ink found at threshold {threshold}");
                Ok(work)
            }
        }
    }
}

/// [`SignatureExtractor::extract`] with default constants
#[must_use]
pub fn extract(photo: &PixelBuffer, sensitivity: u8) -> PixelBuffer {
    SignatureExtractor::default().extract(photo, sensitivity)
}

/// Weighted luma, rounded to a whole gray level
#[inline]
fn luminance(r: u8, g: u8, b: u8) -> f32 {
    (LUMA_R * f32::from(r) + LUMA_G * f32::from(g) + LUMA_B * f32::from(b)).round()
}

/// True when a pixel of luminance `l` is paper at `threshold`
#[inline]
#[must_use]
pub fn is_background(l: f32, threshold: i32) -> bool {
    l > threshold as f32
}

/// Gray level written for ink; darker the further below the threshold
#[inline]
#[must_use]
pub fn ink_level(l: f32, threshold: i32) -> u8 {
    (255.0 - (threshold as f32 - l) * 2.0).round().clamp(0.0, 255.0) as u8
}

/// Desaturates an `Rgba8` buffer in place, alpha untouched
pub(crate) fn grayscale(buffer: &mut PixelBuffer) {
    buffer.data_mut().par_chunks_exact_mut(4).for_each(|px| {
        let l = luminance(px[0], px[1], px[2]).min(255.0) as u8;
        px[0] = l;
        px[1] = l;
        px[2] = l;
    });
}

/// Multiplies color channels by `factor`, clamped to 255
pub(crate) fn boost_contrast(buffer: &mut PixelBuffer, factor: f32) {
    buffer.data_mut().par_chunks_exact_mut(4).for_each(|px| {
        for c in &mut px[..3] {
            *c = (f32::from(*c) * factor).clamp(0.0, 255.0) as u8;
        }
    });
}

/// Paper becomes transparent, ink becomes opaque gray. Pixels that were
/// already fully transparent count as paper.
pub(crate) fn apply_threshold(buffer: &mut PixelBuffer, threshold: i32) {
    buffer.data_mut().par_chunks_exact_mut(4).for_each(|px| {
        let l = luminance(px[0], px[1], px[2]);
        if px[3] == 0 || is_background(l, threshold) {
            px.copy_from_slice(&[0, 0, 0, 0]);
        } else {
            let level = ink_level(l, threshold);
            px.copy_from_slice(&[level, level, level, 255]);
        }
    });
}

/// Smallest box holding every pixel with non-zero alpha
#[must_use]
pub fn find_ink_bounds(buffer: &PixelBuffer) -> Option<InkBounds> {
    let mut bounds: Option<InkBounds> = None;
    for y in 0..buffer.height() {
        for x in 0..buffer.width() {
            let Some([_, _, _, alpha]) = buffer.pixel(x, y) else {
                continue;
            };
            if alpha == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => InkBounds {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(b) => InkBounds {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            });
        }
    }
    bounds
}

/// Crops to `bounds` grown by `padding` on every side, clamped to the buffer
pub fn crop_padded(buffer: &PixelBuffer, bounds: InkBounds, padding: u32) -> Result<PixelBuffer, BufferError> {
    let left = bounds.min_x.saturating_sub(padding);
    let top = bounds.min_y.saturating_sub(padding);
    let right = bounds
        .max_x
        .saturating_add(1)
        .saturating_add(padding)
        .min(buffer.width());
    let bottom = bounds
        .max_y
        .saturating_add(1)
        .saturating_add(padding)
        .min(buffer.height());
    buffer.crop(
        left,
        top,
        right.saturating_sub(left),
        bottom.saturating_sub(top),
    )
}
