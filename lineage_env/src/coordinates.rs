//! Per-pixel coordinates of merged objects, keyed by (timestep, id).

use crate::observation::{ObjectId, Timestep};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A flat list of integer pixel coordinates with 2 or 3 components each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelCoordinates {
    ndim: usize,
    flat: Vec<i64>,
}

impl PixelCoordinates {
    pub fn new(ndim: usize) -> Self {
        Self::with_capacity(ndim, 0)
    }

    pub fn with_capacity(ndim: usize, pixels: usize) -> Self {
        Self {
            ndim,
            flat: Vec::with_capacity(pixels * ndim),
        }
    }

    /// Appends one coordinate; extra components beyond `ndim` are dropped.
    pub fn push(&mut self, coord: &[i64]) {
        self.flat.extend(coord.iter().take(self.ndim));
        for _ in coord.len()..self.ndim {
            self.flat.push(0);
        }
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        if self.ndim == 0 {
            0
        } else {
            self.flat.len() / self.ndim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &[i64]> {
        self.flat.chunks_exact(self.ndim.max(1))
    }

    /// Mean position, `None` when empty.
    pub fn centroid(&self) -> Option<Vec<f64>> {
        if self.is_empty() {
            return None;
        }
        let mut sum = vec![0.0; self.ndim];
        for coord in self.iter() {
            for (acc, c) in sum.iter_mut().zip(coord) {
                *acc += *c as f64;
            }
        }
        let n = self.len() as f64;
        Some(sum.into_iter().map(|s| s / n).collect())
    }
}

/// Coordinate lists keyed by timestep, then object id.
///
/// Accumulates across tracking runs; entries are only removed explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateMap {
    entries: BTreeMap<Timestep, BTreeMap<ObjectId, PixelCoordinates>>,
}

impl CoordinateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the coordinates of `(t, id)`, replacing only that entry.
    pub fn insert(&mut self, t: Timestep, id: ObjectId, coords: PixelCoordinates) {
        self.entries.entry(t).or_default().insert(id, coords);
    }

    pub fn get(&self, t: Timestep, id: ObjectId) -> Option<&PixelCoordinates> {
        self.entries.get(&t)?.get(&id)
    }

    pub fn contains(&self, t: Timestep, id: ObjectId) -> bool {
        self.get(t, id).is_some()
    }

    /// True if at least one entry exists for `t`.
    pub fn has_timestep(&self, t: Timestep) -> bool {
        self.entries.get(&t).is_some_and(|ids| !ids.is_empty())
    }

    /// Removes every entry of `t`.
    pub fn clear_timestep(&mut self, t: Timestep) {
        self.entries.remove(&t);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of `(t, id)` entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
