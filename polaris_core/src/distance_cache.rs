//! Memoized pairwise planar distances.
//!
//! Keys are unordered sample-id pairs, so `distance(a, b)` and
//! `distance(b, a)` share one entry. The cache is owned by the run that
//! created it and must be cleared between runs; samples are not mutated
//! after insertion, so entries stay valid for the run's lifetime.
//!
//! The table tolerates concurrent readers and stray writers: the
//! single-threaded tour stage populates most pairs up front, and residual
//! misses during the parallel cluster search go through the write lock.

use crate::sample::{Sample, SampleError};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct DistanceCache {
    table: RwLock<HashMap<(u32, u32), f64>>,
}

fn pair_key(a: u32, b: u32) -> (u32, u32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl DistanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Euclidean distance between two samples' planar positions, cached.
    pub fn distance(&self, a: &Sample, b: &Sample) -> Result<f64, SampleError> {
        let key = pair_key(a.id, b.id);
        if let Some(&d) = self.table.read().expect("distance cache poisoned").get(&key) {
            return Ok(d);
        }

        let (ax, ay) = a.planar()?;
        let (bx, by) = b.planar()?;
        let d = (ax - bx).hypot(ay - by);
        self.table
            .write()
            .expect("distance cache poisoned")
            .entry(key)
            .or_insert(d);
        Ok(d)
    }

    /// Number of distinct unordered pairs stored.
    pub fn len(&self) -> usize {
        self.table.read().expect("distance cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries. Must run between independent runs.
    pub fn clear(&self) {
        self.table.write().expect("distance cache poisoned").clear();
    }
}
