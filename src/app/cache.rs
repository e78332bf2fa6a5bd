use std::sync::{Arc, PoisonError, RwLock};

use super::types::{MetricsSnapshot, PublicationRecord};

/// Everything one successful refresh produced. Published as a unit.
#[derive(Debug, Default)]
pub struct CacheEntry {
    pub metrics: MetricsSnapshot,
    pub publications: Arc<Vec<PublicationRecord>>,
}

/// Last committed scrape result. Writers swap the whole entry, so readers
/// see either the old or the new entry and never a mix.
#[derive(Debug, Default)]
pub struct ScholarCache {
    current: RwLock<Arc<CacheEntry>>,
}

impl ScholarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self) -> Arc<CacheEntry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn read(&self) -> MetricsSnapshot {
        self.entry().metrics.clone()
    }

    pub fn read_publications(&self) -> Arc<Vec<PublicationRecord>> {
        self.entry().publications.clone()
    }

    pub(crate) fn replace(&self, metrics: MetricsSnapshot, publications: Vec<PublicationRecord>) {
        let next = Arc::new(CacheEntry {
            metrics,
            publications: Arc::new(publications),
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}
