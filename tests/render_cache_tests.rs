use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use inkpage::pixels::{PixelBuffer, PixelFormat};
use inkpage::render::{
    Delivery, EvictionAnchor, Lookup, PageSize, PageSource, PageViewBinder, RasterSize,
    RenderCache, RenderConfig, RenderFault, SharedSource, SlotId,
};

/// Letter-sized pages tinted by index. Optionally waits on a gate before each
/// rasterization so tests control when renders complete.
struct TestSource {
    pages: usize,
    calls: Arc<AtomicUsize>,
    gate: Option<Receiver<()>>,
    failing: HashSet<usize>,
    panicking: HashSet<usize>,
}

impl TestSource {
    fn new(pages: usize) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Self {
            pages,
            calls: Arc::clone(&calls),
            gate: None,
            failing: HashSet::new(),
            panicking: HashSet::new(),
        };
        (source, calls)
    }

    fn gated(pages: usize) -> (Self, Arc<AtomicUsize>, Sender<()>) {
        let (source, calls) = Self::new(pages);
        let (tx, rx) = flume::unbounded();
        let source = Self {
            gate: Some(rx),
            ..source
        };
        (source, calls, tx)
    }
}

impl PageSource for TestSource {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn page_size(&mut self, _index: usize) -> Result<PageSize, RenderFault> {
        Ok(PageSize::new(612.0, 792.0))
    }

    fn rasterize(&mut self, index: usize, size: RasterSize) -> Result<PixelBuffer, RenderFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        if self.panicking.contains(&index) {
            panic!("decoder crashed on page {index}");
        }
        if self.failing.contains(&index) {
            return Err(RenderFault::generic(format!("page {index} is corrupt")));
        }
        let tint = (index % 256) as u8;
        Ok(PixelBuffer::filled(
            size.width,
            size.height,
            PixelFormat::Rgb8,
            [tint, tint, tint, 255],
        ))
    }
}

fn config(cache_size: usize) -> RenderConfig {
    RenderConfig {
        workers: 2,
        cache_size,
        anchor: EvictionAnchor::Inserted,
    }
}

/// Polls until nothing is in flight
fn drain(cache: &mut RenderCache) -> Vec<Delivery> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut deliveries = Vec::new();
    while cache.in_flight_len() > 0 && Instant::now() < deadline {
        deliveries.extend(cache.poll_timeout(Duration::from_millis(200)));
    }
    assert_eq!(cache.in_flight_len(), 0, "renders did not finish in time");
    deliveries
}

#[test]
fn test_concurrent_requests_share_one_render() {
    let (source, calls, gate) = TestSource::gated(10);
    let mut cache = RenderCache::with_config(SharedSource::new(source), config(4));

    assert!(matches!(cache.request(SlotId(0), 2, 300), Lookup::Scheduled(_)));
    assert!(matches!(cache.request(SlotId(1), 2, 300), Lookup::Coalesced));
    assert!(cache.is_pending(2));

    gate.send(()).unwrap();
    let deliveries = drain(&mut cache);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(deliveries.len(), 2);
    let first = deliveries[0].image.clone().unwrap();
    let second = deliveries[1].image.clone().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.dimensions(), (300, 388));

    // Cached now: answered without another render.
    assert!(matches!(cache.request(SlotId(2), 2, 300), Lookup::Ready(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_rebound_slot_discards_stale_render() {
    let (source, _calls, gate) = TestSource::gated(10);
    let mut cache = RenderCache::with_config(SharedSource::new(source), config(4));

    cache.request(SlotId(0), 3, 200);
    cache.request(SlotId(0), 7, 200);
    gate.send(()).unwrap();
    gate.send(()).unwrap();

    let deliveries = drain(&mut cache);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].slot, SlotId(0));
    assert_eq!(deliveries[0].page, 7);
    assert!(deliveries[0].image.is_some());

    assert!(!cache.is_cached(3));
    assert!(!cache.is_pending(3));
    assert!(cache.is_cached(7));
}

#[test]
fn test_ready_pages_never_exceed_capacity() {
    let (source, _calls) = TestSource::new(12);
    let mut cache = RenderCache::with_config(SharedSource::new(source), config(3));

    let mut first_page = None;
    for page in 0..12 {
        cache.request(SlotId(page), page, 120);
        let deliveries = drain(&mut cache);
        assert_eq!(deliveries.len(), 1);
        if page == 0 {
            first_page = deliveries[0].image.clone();
        }
        assert!(cache.ready_len() <= 3);
    }

    // Page 0 was evicted long ago; the copy held here is the only one left.
    let first_page = first_page.unwrap();
    assert!(!cache.is_cached(0));
    assert_eq!(Arc::strong_count(&first_page), 1);
    assert_eq!(cache.cached_pages(), vec![9, 10, 11]);
}

#[test]
fn test_failed_page_delivers_none_and_can_retry() {
    let (mut source, calls) = TestSource::new(10);
    source.failing.insert(4);
    source.panicking.insert(6);
    let mut cache = RenderCache::with_config(SharedSource::new(source), config(4));

    cache.request(SlotId(0), 4, 100);
    let deliveries = drain(&mut cache);
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].image.is_none());
    assert!(!cache.is_cached(4));

    cache.request(SlotId(0), 6, 100);
    let deliveries = drain(&mut cache);
    assert!(deliveries[0].image.is_none());

    // Neither failure poisons the source or the cache.
    cache.request(SlotId(0), 5, 100);
    let deliveries = drain(&mut cache);
    assert!(deliveries[0].image.is_some());

    assert!(matches!(cache.request(SlotId(0), 4, 100), Lookup::Scheduled(_)));
    drain(&mut cache);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_unusable_requests_are_rejected() {
    let (source, calls) = TestSource::new(3);
    let mut cache = RenderCache::with_config(SharedSource::new(source), config(4));

    assert!(matches!(cache.request(SlotId(0), 3, 100), Lookup::Rejected));
    assert!(matches!(cache.request(SlotId(0), 0, 0), Lookup::Rejected));
    assert_eq!(cache.in_flight_len(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cleanup_is_idempotent_and_ignores_late_results() {
    let (source, _calls, gate) = TestSource::gated(10);
    let mut cache = RenderCache::with_config(SharedSource::new(source), config(4));

    cache.request(SlotId(0), 1, 100);
    cache.cleanup();
    cache.cleanup();
    gate.send(()).unwrap();

    assert!(cache.is_closed());
    assert!(matches!(cache.request(SlotId(0), 2, 100), Lookup::Closed));
    assert!(cache.poll_timeout(Duration::from_millis(200)).is_empty());
    assert!(cache.poll().is_empty());
    assert_eq!(cache.ready_len(), 0);
}

#[test]
fn test_binder_shows_only_the_latest_page() {
    let (source, _calls, gate) = TestSource::gated(10);
    let cache = RenderCache::with_config(SharedSource::new(source), config(4));
    let events = RefCell::new(Vec::new());
    let mut binder = PageViewBinder::new(cache, 150, |slot, page, image: Option<Arc<PixelBuffer>>| {
        events.borrow_mut().push((slot, page, image.is_some()));
    });

    binder.bind(SlotId(0), 3);
    binder.bind(SlotId(0), 7);
    gate.send(()).unwrap();
    gate.send(()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while binder.cache().in_flight_len() > 0 && Instant::now() < deadline {
        binder.pump_timeout(Duration::from_millis(200));
    }

    assert_eq!(*events.borrow(), vec![(SlotId(0), 7, true)]);
    assert!(binder.displayed(SlotId(0)).is_some());

    // A cache hit fires the callback during bind.
    binder.bind(SlotId(1), 7);
    assert_eq!(events.borrow().len(), 2);
    assert_eq!(events.borrow()[1], (SlotId(1), 7, true));

    binder.bind(SlotId(2), 42);
    assert_eq!(events.borrow()[2], (SlotId(2), 42, false));

    binder.unbind(SlotId(0));
    assert!(binder.displayed(SlotId(0)).is_none());
    binder.cleanup();
}
