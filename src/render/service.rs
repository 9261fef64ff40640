//! Render cache - owns the worker pool, the page cache and slot bindings

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use super::cache::{EvictionAnchor, PageCache, PendingState};
use super::request::{RenderRequest, RenderResponse, RequestId, SlotId};
use super::source::SharedSource;
use super::worker::render_worker;
use super::{DEFAULT_CACHE_SIZE, DEFAULT_WORKERS};
use crate::pixels::PixelBuffer;

/// Tuning for a [`RenderCache`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    pub workers: usize,
    pub cache_size: usize,
    pub anchor: EvictionAnchor,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cache_size: DEFAULT_CACHE_SIZE,
            anchor: EvictionAnchor::Inserted,
        }
    }
}

impl RenderConfig {
    /// Values from the user's settings file
    #[must_use]
    pub fn from_settings() -> Self {
        Self {
            workers: crate::settings::get_render_workers(),
            cache_size: crate::settings::get_cache_size(),
            anchor: crate::settings::get_eviction_anchor(),
        }
    }
}

/// Immediate answer to [`RenderCache::request`]
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Page was cached; nothing was scheduled
    Ready(Arc<PixelBuffer>),
    /// A new render was queued
    Scheduled(RequestId),
    /// A render for this page was already in flight; its result will be shared
    Coalesced,
    /// Page index or width is unusable; show "no image"
    Rejected,
    /// The cache was cleaned up
    Closed,
}

/// A finished render for a slot that still wants it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub slot: SlotId,
    pub page: usize,
    /// `None` when the page failed to render
    pub image: Option<Arc<PixelBuffer>>,
}

/// Asynchronous page render cache.
///
/// Not `Sync` by intent: the owning (UI) thread calls `request` and `poll`,
/// and all bookkeeping is mutated there. Workers only produce pixels and send
/// them back over a channel.
pub struct RenderCache {
    cache: PageCache,
    page_count: usize,
    request_tx: Sender<RenderRequest>,
    response_rx: Receiver<RenderResponse>,
    closed: Arc<AtomicBool>,
    num_workers: usize,
    bindings: HashMap<SlotId, usize>,
    in_flight: HashMap<RequestId, usize>,
    next_request_id: u64,
}

impl RenderCache {
    /// Create a render cache with default configuration
    #[must_use]
    pub fn new(source: SharedSource) -> Self {
        Self::with_config(source, RenderConfig::default())
    }

    /// Create a render cache with custom configuration
    #[must_use]
    pub fn with_config(source: SharedSource, config: RenderConfig) -> Self {
        // flume gives an MPMC request queue so every worker can pull from it.
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let num_workers = config.workers.max(1);
        let page_count = source.page_count();

        for n in 0..num_workers {
            let source = source.clone();
            let rx = request_rx.clone();
            let tx = response_tx.clone();
            let closed = Arc::clone(&closed);

            let spawned = std::thread::Builder::new()
                .name(format!("inkpage-render-{n}"))
                .spawn(move || render_worker(source, rx, tx, closed));
            if let Err(e) = spawned {
                warn!("Failed to spawn render worker {n}: {e}");
            }
        }

        info!(
            "Render cache ready: {page_count} pages, {num_workers} workers, capacity {}",
            config.cache_size.max(1)
        );

        Self {
            cache: PageCache::new(config.cache_size, config.anchor),
            page_count,
            request_tx,
            response_rx,
            closed,
            num_workers,
            bindings: HashMap::new(),
            in_flight: HashMap::new(),
            next_request_id: 1,
        }
    }

    /// Bind `slot` to `page` and make sure its pixels are on the way.
    ///
    /// Never blocks. Asynchronous results come back through [`Self::poll`].
    pub fn request(&mut self, slot: SlotId, page: usize, target_width: u32) -> Lookup {
        if self.is_closed() {
            return Lookup::Closed;
        }

        self.bindings.insert(slot, page);
        if page >= self.page_count || target_width == 0 {
            debug!("Rejecting request for page {page} at width {target_width}");
            return Lookup::Rejected;
        }
        self.cache.note_request(page);

        if let Some(image) = self.cache.get(page) {
            return Lookup::Ready(image);
        }

        match self.cache.mark_pending(page, slot) {
            PendingState::Coalesced => Lookup::Coalesced,
            PendingState::Started => {
                let id = self.next_id();
                let sent = self.request_tx.send(RenderRequest::Page {
                    id,
                    page,
                    target_width,
                });
                if sent.is_err() {
                    warn!("Render workers are gone, cannot render page {page}");
                    self.cache.take_waiters(page);
                    return Lookup::Rejected;
                }
                self.in_flight.insert(id, page);
                Lookup::Scheduled(id)
            }
        }
    }

    /// Forget what `slot` was bound to; its pending results become stale
    pub fn release_slot(&mut self, slot: SlotId) {
        self.bindings.remove(&slot);
    }

    /// Page currently bound to `slot`
    #[must_use]
    pub fn bound_page(&self, slot: SlotId) -> Option<usize> {
        self.bindings.get(&slot).copied()
    }

    /// Drain completed renders without blocking
    pub fn poll(&mut self) -> Vec<Delivery> {
        let mut deliveries = vec![];
        while let Ok(response) = self.response_rx.try_recv() {
            self.handle_response(response, &mut deliveries);
        }
        deliveries
    }

    /// Wait up to `timeout` for the first completed render, then drain the rest
    pub fn poll_timeout(&mut self, timeout: Duration) -> Vec<Delivery> {
        let mut deliveries = vec![];
        if self.in_flight.is_empty() {
            return deliveries;
        }

        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => self.handle_response(response, &mut deliveries),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                return deliveries;
            }
        }
        deliveries.extend(self.poll());
        deliveries
    }

    fn handle_response(&mut self, response: RenderResponse, out: &mut Vec<Delivery>) {
        let (id, page, result) = match response {
            RenderResponse::Page { id, page, buffer } => (id, page, Ok(buffer)),
            RenderResponse::Error { id, page, error } => (id, page, Err(error)),
        };
        self.in_flight.remove(&id);

        if self.is_closed() {
            return;
        }

        let live: Vec<SlotId> = self
            .cache
            .take_waiters(page)
            .into_iter()
            .filter(|slot| self.bindings.get(slot) == Some(&page))
            .collect();

        match result {
            Ok(buffer) => {
                if live.is_empty() {
                    debug!("Discarding stale render of page {page}");
                    return;
                }

                let image = Arc::new(buffer);
                for eviction in self.cache.insert(page, Arc::clone(&image)) {
                    if eviction.released {
                        debug!("Evicted page {} from cache", eviction.page);
                    } else {
                        debug!(
                            "Evicted page {} from cache, still displayed",
                            eviction.page
                        );
                    }
                }

                out.extend(live.into_iter().map(|slot| Delivery {
                    slot,
                    page,
                    image: Some(Arc::clone(&image)),
                }));
            }
            Err(error) => {
                warn!("Page {page} unavailable: {error}");
                out.extend(live.into_iter().map(|slot| Delivery {
                    slot,
                    page,
                    image: None,
                }));
            }
        }
    }

    /// Stop the worker pool and release every cached page. Idempotent.
    pub fn cleanup(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(RenderRequest::Shutdown);
        }
        let released = self.cache.clear();
        self.bindings.clear();
        self.in_flight.clear();
        while self.response_rx.try_recv().is_ok() {}

        info!("Render cache closed, released {released} pages");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check if a page is cached
    #[must_use]
    pub fn is_cached(&self, page: usize) -> bool {
        self.cache.contains(page)
    }

    /// Check if a render for `page` is in flight
    #[must_use]
    pub fn is_pending(&self, page: usize) -> bool {
        self.cache.is_pending(page)
    }

    /// Get a cached page if available
    #[must_use]
    pub fn cached_page(&self, page: usize) -> Option<Arc<PixelBuffer>> {
        self.cache.get(page)
    }

    /// Cached page indices in ascending order
    #[must_use]
    pub fn cached_pages(&self) -> Vec<usize> {
        self.cache.ready_pages()
    }

    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.cache.ready_len()
    }

    /// Number of renders sent to workers and not yet answered
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl Drop for RenderCache {
    fn drop(&mut self) {
        self.cleanup();
    }
}
