//! Page rasterization infrastructure

mod binder;
mod cache;
#[cfg(feature = "pdf")]
mod mupdf_source;
mod request;
mod service;
mod source;
mod worker;

pub use binder::PageViewBinder;
pub use cache::{CacheEntry, EvictionAnchor, Eviction, PageCache, PendingState};
#[cfg(feature = "pdf")]
pub use mupdf_source::MuPdfSource;
pub use request::{RenderFault, RenderRequest, RenderResponse, RequestId, SlotId};
pub use service::{Delivery, Lookup, RenderCache, RenderConfig};
pub use source::{PageSize, PageSource, RasterSize, SharedSource};

/// Render threads; rasterization itself is serialized by [`SharedSource`]
pub const DEFAULT_WORKERS: usize = 2;

/// Ready pages kept in memory
pub const DEFAULT_CACHE_SIZE: usize = 4;
