//! MuPDF-backed page source

use std::path::{Path, PathBuf};

use log::debug;
use mupdf::{Colorspace, Document, Matrix, Page, Pixmap};

use super::request::RenderFault;
use super::source::{PageSize, PageSource, RasterSize};
use crate::pixels::{PixelBuffer, PixelFormat};

/// Page source for anything MuPDF opens (PDF, XPS, CBZ, ...).
///
/// MuPDF documents are bound to the thread that opened them, so only the
/// path is kept and each call opens a fresh document.
pub struct MuPdfSource {
    path: PathBuf,
    page_count: usize,
}

impl MuPdfSource {
    pub fn open(path: &Path) -> Result<Self, RenderFault> {
        let doc = Self::open_document(path)?;
        let page_count = usize::try_from(doc.page_count()?).unwrap_or(0);
        debug!("Opened {path:?} with {page_count} pages");
        Ok(Self {
            path: path.to_path_buf(),
            page_count,
        })
    }

    fn open_document(path: &Path) -> Result<Document, RenderFault> {
        Ok(Document::open(path.to_string_lossy().as_ref())?)
    }

    fn load_page(doc: &Document, index: usize) -> Result<Page, RenderFault> {
        let index = i32::try_from(index)
            .map_err(|_| RenderFault::generic(format!("page index {index} too large")))?;
        Ok(doc.load_page(index)?)
    }

    fn bounds_of(page: &Page) -> Result<PageSize, RenderFault> {
        let bounds = page.bounds()?;
        Ok(PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }

    fn rasterize_page(page: &Page, native: PageSize, size: RasterSize) -> Result<PixelBuffer, RenderFault> {
        let scale_x = size.width as f32 / native.width;
        let scale_y = size.height as f32 / native.height;
        let rgb = Colorspace::device_rgb();
        let pixmap = page.to_pixmap(&Matrix::new_scale(scale_x, scale_y), &rgb, false, true)?;
        pixmap_to_buffer(&pixmap, size)
    }
}

impl PageSource for MuPdfSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size(&mut self, index: usize) -> Result<PageSize, RenderFault> {
        let doc = Self::open_document(&self.path)?;
        Self::bounds_of(&Self::load_page(&doc, index)?)
    }

    fn rasterize(&mut self, index: usize, size: RasterSize) -> Result<PixelBuffer, RenderFault> {
        let doc = Self::open_document(&self.path)?;
        let page = Self::load_page(&doc, index)?;
        let native = Self::bounds_of(&page)?;
        Self::rasterize_page(&page, native, size)
    }

    fn render_page(&mut self, index: usize, target_width: u32) -> Result<PixelBuffer, RenderFault> {
        if index >= self.page_count {
            return Err(RenderFault::PageOutOfRange {
                page: index,
                page_count: self.page_count,
            });
        }
        let doc = Self::open_document(&self.path)?;
        let page = Self::load_page(&doc, index)?;
        let native = Self::bounds_of(&page)?;
        let size = RasterSize::for_page(native, target_width)?;
        Self::rasterize_page(&page, native, size)
    }
}

/// Repacks pixmap rows into an `Rgb8` buffer of exactly `size`.
///
/// Rounding inside MuPDF can leave the pixmap a pixel short or long; missing
/// pixels stay white and extra ones are cut.
fn pixmap_to_buffer(pixmap: &Pixmap, size: RasterSize) -> Result<PixelBuffer, RenderFault> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(RenderFault::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    if samples.len() < stride.saturating_mul(height) || width * n > stride {
        return Err(RenderFault::generic("Pixmap buffer size mismatch"));
    }

    let mut out = PixelBuffer::filled(size.width, size.height, PixelFormat::Rgb8, [255, 255, 255, 255]);
    let out_stride = out.row_stride();
    let copy_width = width.min(size.width as usize);
    let data = out.data_mut();
    for y in 0..height.min(size.height as usize) {
        let row = &samples[y * stride..y * stride + copy_width * n];
        let dst = &mut data[y * out_stride..y * out_stride + copy_width * 3];
        for (px, out_px) in row.chunks_exact(n).zip(dst.chunks_exact_mut(3)) {
            out_px.copy_from_slice(&px[..3]);
        }
    }

    Ok(out)
}
