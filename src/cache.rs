//! Memoization of derived product datasets within one (area, sector type) scope

use crate::dataset::Dataset;
use crate::errors::Result;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Which derivation a cached dataset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Built on the padded area without re-sectoring
    Padded,
    /// Built on the exact area
    Exact,
    /// Background imagery for fused outputs
    Background,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKind::Padded => "pad_alg_xarrays",
            CacheKind::Exact => "alg_xarrays",
            CacheKind::Background => "bg_alg_xarrays",
        };
        f.write_str(name)
    }
}

/// Holds at most one dataset per (kind, product name).
///
/// A cache is created when a sector-type iteration starts and dropped when it ends, so
/// nothing computed for one area leaks into another.
#[derive(Debug)]
pub struct AlgXarrayCache {
    area_id: String,
    sector_type: String,
    entries: HashMap<(CacheKind, String), Dataset>,
    hits: usize,
    misses: usize,
}

impl AlgXarrayCache {
    pub fn new(area_id: impl Into<String>, sector_type: impl Into<String>) -> Self {
        Self {
            area_id: area_id.into(),
            sector_type: sector_type.into(),
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn area_id(&self) -> &str {
        &self.area_id
    }

    pub fn sector_type(&self) -> &str {
        &self.sector_type
    }

    pub fn get(&self, kind: CacheKind, product_name: &str) -> Option<&Dataset> {
        self.entries.get(&(kind, product_name.to_string()))
    }

    pub fn contains(&self, kind: CacheKind, product_name: &str) -> bool {
        self.get(kind, product_name).is_some()
    }

    pub fn insert(&mut self, kind: CacheKind, product_name: impl Into<String>, dataset: Dataset) {
        self.entries.insert((kind, product_name.into()), dataset);
    }

    /// Return the cached dataset, computing and storing it on a miss.
    ///
    /// A failed computation leaves the cache unchanged.
    pub fn get_or_try_insert_with<F>(&mut self, kind: CacheKind, product_name: &str, compute: F) -> Result<&Dataset>
    where
        F: FnOnce() -> Result<Dataset>,
    {
        match self.entries.entry((kind, product_name.to_string())) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                info!(
                    "REUSING {} {} for {} {}",
                    kind, product_name, self.area_id, self.sector_type
                );
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                self.misses += 1;
                Ok(entry.insert(compute()?))
            }
        }
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for AlgXarrayCache {
    fn drop(&mut self) {
        debug!(
            "Discarding alg xarray cache for {} {}: {} entries, {} hits, {} misses",
            self.area_id,
            self.sector_type,
            self.entries.len(),
            self.hits,
            self.misses
        );
    }
}
