//! Signature capture: extraction from photos, downscaling, storage

mod extractor;
mod scale;
mod store;

pub use extractor::{
    BASE_THRESHOLD, DEFAULT_CONTRAST, DEFAULT_PADDING, ExtractError, ExtractorConfig, InkBounds,
    MAX_SENSITIVITY, SignatureExtractor, crop_padded, extract, find_ink_bounds, ink_level,
    is_background,
};
pub use scale::scale;
pub use store::{SignatureId, SignatureStore, StoreError, sanitize_name};
