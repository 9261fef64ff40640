//! Distance-evicting page cache for rendered pages

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::request::SlotId;
use crate::pixels::PixelBuffer;

/// Which page index eviction distances are measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionAnchor {
    /// The page that was just inserted
    #[default]
    Inserted,
    /// The page most recently requested by any slot
    LastRequested,
}

/// One page in the cache
#[derive(Debug)]
pub enum CacheEntry {
    /// Render in flight; slots waiting for it
    Pending { waiters: Vec<SlotId> },
    /// Finished pixels, shared with any view displaying them
    Ready(Arc<PixelBuffer>),
}

/// Result of asking the cache to track a page as in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// No render was in flight; the caller must schedule one
    Started,
    /// A render is already in flight; the slot now waits on it
    Coalesced,
}

/// A page dropped to keep the cache within capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub page: usize,
    /// False when a view still borrows the pixels; they are freed once it lets go
    pub released: bool,
}

/// Page cache keyed by page index.
///
/// Holds at most `capacity` ready pages. Victims are chosen by the greatest
/// distance from the anchor page with a linear scan; ties go to the lowest
/// index. At three to five entries a scan beats any ordered structure.
#[derive(Debug)]
pub struct PageCache {
    entries: HashMap<usize, CacheEntry>,
    capacity: usize,
    anchor: EvictionAnchor,
    last_requested: Option<usize>,
}

impl PageCache {
    /// Create a new cache; capacity is at least one page
    #[must_use]
    pub fn new(capacity: usize, anchor: EvictionAnchor) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            anchor,
            last_requested: None,
        }
    }

    /// Get a ready page
    #[must_use]
    pub fn get(&self, page: usize) -> Option<Arc<PixelBuffer>> {
        match self.entries.get(&page) {
            Some(CacheEntry::Ready(image)) => Some(Arc::clone(image)),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        matches!(self.entries.get(&page), Some(CacheEntry::Ready(_)))
    }

    #[must_use]
    pub fn is_pending(&self, page: usize) -> bool {
        matches!(self.entries.get(&page), Some(CacheEntry::Pending { .. }))
    }

    /// Remember the latest requested page for [`EvictionAnchor::LastRequested`]
    pub fn note_request(&mut self, page: usize) {
        self.last_requested = Some(page);
    }

    /// Track `slot` as waiting for `page`.
    ///
    /// Must not be called for a page that is already ready.
    pub fn mark_pending(&mut self, page: usize, slot: SlotId) -> PendingState {
        match self.entries.get_mut(&page) {
            Some(CacheEntry::Pending { waiters }) => {
                if !waiters.contains(&slot) {
                    waiters.push(slot);
                }
                PendingState::Coalesced
            }
            Some(CacheEntry::Ready(_)) => {
                debug_assert!(false, "page {page} is already cached");
                PendingState::Coalesced
            }
            None => {
                self.entries.insert(
                    page,
                    CacheEntry::Pending {
                        waiters: vec![slot],
                    },
                );
                PendingState::Started
            }
        }
    }

    /// Remove the pending entry for `page` and return who was waiting on it
    pub fn take_waiters(&mut self, page: usize) -> Vec<SlotId> {
        match self.entries.remove(&page) {
            Some(CacheEntry::Pending { waiters }) => waiters,
            Some(ready @ CacheEntry::Ready(_)) => {
                self.entries.insert(page, ready);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Insert a finished page, evicting if over capacity
    pub fn insert(&mut self, page: usize, image: Arc<PixelBuffer>) -> Vec<Eviction> {
        self.entries.insert(page, CacheEntry::Ready(image));

        let anchor = match self.anchor {
            EvictionAnchor::Inserted => page,
            EvictionAnchor::LastRequested => self.last_requested.unwrap_or(page),
        };

        let mut evicted = Vec::new();
        while self.ready_len() > self.capacity {
            let Some(victim) = self.eviction_candidate(anchor, page) else {
                break;
            };
            if let Some(CacheEntry::Ready(image)) = self.entries.remove(&victim) {
                evicted.push(Eviction {
                    page: victim,
                    released: Arc::strong_count(&image) == 1,
                });
            }
        }
        evicted
    }

    /// Ready page farthest from `anchor`, never `keep`
    #[must_use]
    pub fn eviction_candidate(&self, anchor: usize, keep: usize) -> Option<usize> {
        self.entries
            .iter()
            .filter(|(page, entry)| **page != keep && matches!(entry, CacheEntry::Ready(_)))
            .map(|(page, _)| *page)
            .max_by(|a, b| {
                a.abs_diff(anchor)
                    .cmp(&b.abs_diff(anchor))
                    .then_with(|| b.cmp(a))
            })
    }

    /// Drop every entry, pending ones included. Returns the number of ready pages released.
    pub fn clear(&mut self) -> usize {
        let ready = self.ready_len();
        self.entries.clear();
        self.last_requested = None;
        ready
    }

    /// Number of ready pages
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, CacheEntry::Ready(_)))
            .count()
    }

    /// Number of pages with a render in flight
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.entries.len() - self.ready_len()
    }

    /// Ready page indices in ascending order
    #[must_use]
    pub fn ready_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, CacheEntry::Ready(_)))
            .map(|(page, _)| *page)
            .collect();
        pages.sort_unstable();
        pages
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn anchor(&self) -> EvictionAnchor {
        self.anchor
    }
}
