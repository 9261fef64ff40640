pub mod paths;
pub mod pixels;
pub mod preferences;
pub mod render;
pub mod settings;
pub mod signature;

pub use pixels::{PixelBuffer, PixelFormat};
pub use render::{PageSource, PageViewBinder, RenderCache, RenderConfig, SharedSource, SlotId};
pub use signature::{SignatureExtractor, SignatureStore, extract, scale};
