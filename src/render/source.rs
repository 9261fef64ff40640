//! Page sources and the exclusive handle the render workers share

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use super::request::RenderFault;
use crate::pixels::PixelBuffer;

/// Native page dimensions in document units (points for PDF).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Pixel dimensions of one rasterization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterSize {
    pub width: u32,
    pub height: u32,
}

impl RasterSize {
    /// Scales a page so its width is exactly `target_width`, keeping the
    /// native aspect ratio. Height is rounded and never below one pixel.
    pub fn for_page(native: PageSize, target_width: u32) -> Result<Self, RenderFault> {
        if target_width == 0 {
            return Err(RenderFault::InvalidWidth(target_width));
        }
        let valid = native.width.is_finite()
            && native.height.is_finite()
            && native.width > 0.0
            && native.height > 0.0;
        if !valid {
            return Err(RenderFault::InvalidPageSize {
                width: native.width,
                height: native.height,
            });
        }

        let height = (target_width as f32 * native.height / native.width)
            .round()
            .max(1.0);
        Ok(Self {
            width: target_width,
            height: height as u32,
        })
    }
}

/// A document decoder able to rasterize single pages.
///
/// Implementations are not expected to be thread-safe; [`SharedSource`]
/// serializes every call.
pub trait PageSource: Send {
    fn page_count(&self) -> usize;

    fn page_size(&mut self, index: usize) -> Result<PageSize, RenderFault>;

    /// Rasterizes `index` into exactly `size` pixels on an opaque white
    /// background.
    fn rasterize(&mut self, index: usize, size: RasterSize) -> Result<PixelBuffer, RenderFault>;

    /// Renders `index` at `target_width`; height follows the page aspect ratio.
    fn render_page(&mut self, index: usize, target_width: u32) -> Result<PixelBuffer, RenderFault> {
        let page_count = self.page_count();
        if index >= page_count {
            return Err(RenderFault::PageOutOfRange {
                page: index,
                page_count,
            });
        }

        let size = RasterSize::for_page(self.page_size(index)?, target_width)?;
        let buffer = self.rasterize(index, size)?;
        if buffer.dimensions() != (size.width, size.height) {
            return Err(RenderFault::SizeMismatch {
                expected: (size.width, size.height),
                actual: buffer.dimensions(),
            });
        }
        Ok(buffer)
    }
}

/// Shared, mutex-guarded handle to a [`PageSource`].
///
/// Every worker clones this handle, and every render takes the lock, so at
/// most one rasterization runs at a time regardless of the worker count.
/// Extra workers only absorb queueing.
#[derive(Clone)]
pub struct SharedSource {
    inner: Arc<Mutex<Box<dyn PageSource>>>,
    page_count: usize,
}

impl SharedSource {
    pub fn new(source: impl PageSource + 'static) -> Self {
        let page_count = source.page_count();
        Self {
            inner: Arc::new(Mutex::new(Box::new(source))),
            page_count,
        }
    }

    /// Page count captured when the source was wrapped.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Renders with exclusive access. A panicking source is reported as a
    /// fault instead of tearing down the calling worker.
    pub fn render_page(&self, index: usize, target_width: u32) -> Result<PixelBuffer, RenderFault> {
        let mut source = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        catch_unwind(AssertUnwindSafe(|| source.render_page(index, target_width)))
            .unwrap_or_else(|_| Err(RenderFault::generic(format!("rasterizer panicked on page {index}"))))
    }

    pub fn page_size(&self, index: usize) -> Result<PageSize, RenderFault> {
        let mut source = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        source.page_size(index)
    }
}

impl std::fmt::Debug for SharedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSource")
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::PixelFormat;

    struct FixedSource {
        pages: usize,
        size: PageSize,
        shrink_by: u32,
    }

    impl PageSource for FixedSource {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn page_size(&mut self, _index: usize) -> Result<PageSize, RenderFault> {
            Ok(self.size)
        }

        fn rasterize(&mut self, _index: usize, size: RasterSize) -> Result<PixelBuffer, RenderFault> {
            Ok(PixelBuffer::filled(
                size.width,
                size.height - self.shrink_by,
                PixelFormat::Rgb8,
                [255, 255, 255, 255],
            ))
        }
    }

    #[test]
    fn raster_size_follows_aspect_ratio() {
        let letter = PageSize::new(612.0, 792.0);
        let size = RasterSize::for_page(letter, 600).unwrap();
        assert_eq!(size, RasterSize { width: 600, height: 776 });

        let banner = PageSize::new(1000.0, 1.0);
        assert_eq!(RasterSize::for_page(banner, 10).unwrap().height, 1);
    }

    #[test]
    fn raster_size_rejects_degenerate_input() {
        assert!(RasterSize::for_page(PageSize::new(612.0, 792.0), 0).is_err());
        assert!(RasterSize::for_page(PageSize::new(0.0, 792.0), 100).is_err());
        assert!(RasterSize::for_page(PageSize::new(f32::NAN, 792.0), 100).is_err());
    }

    #[test]
    fn render_page_checks_range_and_dimensions() {
        let mut source = FixedSource {
            pages: 2,
            size: PageSize::new(100.0, 200.0),
            shrink_by: 0,
        };
        let page = source.render_page(1, 50).unwrap();
        assert_eq!(page.dimensions(), (50, 100));
        assert!(matches!(
            source.render_page(2, 50),
            Err(RenderFault::PageOutOfRange { page: 2, page_count: 2 })
        ));

        let mut short = FixedSource {
            pages: 1,
            size: PageSize::new(100.0, 200.0),
            shrink_by: 1,
        };
        assert!(matches!(
            short.render_page(0, 50),
            Err(RenderFault::SizeMismatch { .. })
        ));
    }

    struct CrashingSource {
        crashes_left: usize,
    }

    impl PageSource for CrashingSource {
        fn page_count(&self) -> usize {
            3
        }

        fn page_size(&mut self, _index: usize) -> Result<PageSize, RenderFault> {
            Ok(PageSize::new(10.0, 10.0))
        }

        fn rasterize(&mut self, index: usize, size: RasterSize) -> Result<PixelBuffer, RenderFault> {
            if self.crashes_left > 0 {
                self.crashes_left -= 1;
                panic!("decoder crashed on page {index}");
            }
            Ok(PixelBuffer::new(size.width, size.height, PixelFormat::Rgb8))
        }
    }

    #[test]
    fn shared_source_survives_a_panicking_rasterizer() {
        let shared = SharedSource::new(CrashingSource { crashes_left: 1 });

        assert!(matches!(shared.render_page(1, 20), Err(RenderFault::Generic { .. })));
        // The lock is usable again and later pages render normally.
        assert_eq!(shared.render_page(1, 20).unwrap().dimensions(), (20, 20));
        assert!(shared.page_size(2).is_ok());
    }
}
