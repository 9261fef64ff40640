//! Render request and response types

use crate::pixels::PixelBuffer;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// A view slot (visible row or page view) that binds page indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Rasterize a page at the given width
    Page {
        id: RequestId,
        page: usize,
        target_width: u32,
    },

    /// Stop the worker that receives it
    Shutdown,
}

/// Errors from page sources and render workers
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    #[error("page {page} out of range, document has {page_count} pages")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("invalid target width {0}")]
    InvalidWidth(u32),

    #[error("invalid native page size {width}x{height}")]
    InvalidPageSize { width: f32, height: f32 },

    #[error("rasterizer produced {actual:?}, expected {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Response from render workers
#[derive(Debug)]
pub enum RenderResponse {
    /// Rendered page pixels
    Page {
        id: RequestId,
        page: usize,
        buffer: PixelBuffer,
    },

    /// Error during rendering
    Error {
        id: RequestId,
        page: usize,
        error: RenderFault,
    },
}
