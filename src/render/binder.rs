//! UI-facing binder between view slots and the render cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::request::SlotId;
use super::service::{Delivery, Lookup, RenderCache};
use crate::pixels::PixelBuffer;

/// Binds view slots to page indices and hands finished pages to a callback.
///
/// The callback runs on whichever thread calls [`PageViewBinder::bind`] or
/// [`PageViewBinder::pump`], which is expected to be the UI thread. A slot
/// keeps a shared handle to the page it displays, so cache eviction never
/// frees pixels that are still on screen.
pub struct PageViewBinder<F>
where
    F: FnMut(SlotId, usize, Option<Arc<PixelBuffer>>),
{
    cache: RenderCache,
    target_width: u32,
    displayed: HashMap<SlotId, (usize, Arc<PixelBuffer>)>,
    on_bind: F,
}

impl<F> PageViewBinder<F>
where
    F: FnMut(SlotId, usize, Option<Arc<PixelBuffer>>),
{
    pub fn new(cache: RenderCache, target_width: u32, on_bind: F) -> Self {
        Self {
            cache,
            target_width,
            displayed: HashMap::new(),
            on_bind,
        }
    }

    /// Show `page` in `slot`. Fires the callback right away on a cache hit or
    /// an unusable page; otherwise the result arrives through `pump`.
    pub fn bind(&mut self, slot: SlotId, page: usize) {
        if self
            .displayed
            .get(&slot)
            .is_some_and(|(shown, _)| *shown != page)
        {
            self.displayed.remove(&slot);
        }

        match self.cache.request(slot, page, self.target_width) {
            Lookup::Ready(image) => {
                self.displayed.insert(slot, (page, Arc::clone(&image)));
                (self.on_bind)(slot, page, Some(image));
            }
            Lookup::Rejected | Lookup::Closed => {
                self.displayed.remove(&slot);
                (self.on_bind)(slot, page, None);
            }
            Lookup::Scheduled(_) | Lookup::Coalesced => {}
        }
    }

    /// Slot left the screen; drop its page and ignore late results for it
    pub fn unbind(&mut self, slot: SlotId) {
        self.displayed.remove(&slot);
        self.cache.release_slot(slot);
    }

    /// Deliver every finished render. Returns the number of callbacks fired.
    pub fn pump(&mut self) -> usize {
        let deliveries = self.cache.poll();
        self.dispatch(deliveries)
    }

    /// Like [`Self::pump`], but waits up to `timeout` for the first result
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        let deliveries = self.cache.poll_timeout(timeout);
        self.dispatch(deliveries)
    }

    fn dispatch(&mut self, deliveries: Vec<Delivery>) -> usize {
        let mut fired = 0;
        for delivery in deliveries {
            if self.cache.bound_page(delivery.slot) != Some(delivery.page) {
                continue;
            }
            match &delivery.image {
                Some(image) => {
                    self.displayed
                        .insert(delivery.slot, (delivery.page, Arc::clone(image)));
                }
                None => {
                    self.displayed.remove(&delivery.slot);
                }
            }
            (self.on_bind)(delivery.slot, delivery.page, delivery.image);
            fired += 1;
        }
        fired
    }

    /// Page pixels currently shown in `slot`
    #[must_use]
    pub fn displayed(&self, slot: SlotId) -> Option<&Arc<PixelBuffer>> {
        self.displayed.get(&slot).map(|(_, image)| image)
    }

    #[must_use]
    pub fn target_width(&self) -> u32 {
        self.target_width
    }

    /// Width used for renders scheduled after this call; cached pages keep theirs
    pub fn set_target_width(&mut self, width: u32) {
        self.target_width = width;
    }

    #[must_use]
    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// Tear down the cache and drop everything on screen
    pub fn cleanup(&mut self) {
        self.cache.cleanup();
        self.displayed.clear();
    }
}
