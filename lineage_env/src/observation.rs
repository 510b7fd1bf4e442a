//! Observations: detected object instances per timestep.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Frame index along the time axis.
pub type Timestep = u32;

/// Object label inside one frame. Unique per timestep only.
pub type ObjectId = u32;

/// An inclusive range of timesteps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub first: Timestep,
    pub last: Timestep,
}

impl TimeRange {
    pub fn new(first: Timestep, last: Timestep) -> Self {
        Self { first, last }
    }

    #[inline]
    pub fn contains(&self, t: Timestep) -> bool {
        self.first <= t && t <= self.last
    }

    /// Number of timesteps covered (0 for an inverted range).
    pub fn len(&self) -> usize {
        if self.last < self.first {
            0
        } else {
            (self.last - self.first) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Timestep> {
        self.first..=self.last
    }
}

/// Raw measurements of one object as delivered by a feature provider.
///
/// All positions are in pixel units; 2-D data reports z = 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectFeatures {
    /// Region center (mean pixel position)
    pub center: Vector3<f64>,

    /// Inclusive lower corner of the bounding box
    pub lower: [i64; 3],

    /// Inclusive upper corner of the bounding box
    pub upper: [i64; 3],

    /// Pixel count
    pub count: u64,

    /// Object-count classifier output (index = number of objects)
    pub class_probabilities: Option<Vec<f64>>,

    /// Division classifier output
    pub division_probability: Option<f64>,
}

/// Features of all objects in one frame, keyed by object id.
pub type FrameFeatures = BTreeMap<ObjectId, ObjectFeatures>;

/// Features of a range of frames.
pub type FeatureTable = BTreeMap<Timestep, FrameFeatures>;

/// One detected object instance at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestep: Timestep,
    pub id: ObjectId,

    /// Center in physical units (pixel center scaled per axis)
    pub center: Vector3<f64>,

    /// Inclusive bounding box, pixel units
    pub lower: [i64; 3],
    pub upper: [i64; 3],

    /// Pixel count
    pub size: u64,

    pub class_probabilities: Option<Vec<f64>>,
    pub division_probability: Option<f64>,
}

/// Per-timestep observations plus the median object size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationStore {
    frames: BTreeMap<Timestep, Vec<Observation>>,
    median_size: f64,
    ndim: usize,
    /// Largest label per frame of the unfiltered source
    #[serde(default)]
    label_ceilings: BTreeMap<Timestep, ObjectId>,
}

impl ObservationStore {
    /// Creates a store; observations in each frame are kept sorted by id.
    pub fn new(mut frames: BTreeMap<Timestep, Vec<Observation>>, ndim: usize) -> Self {
        for observations in frames.values_mut() {
            observations.sort_by_key(|o| o.id);
        }
        let median_size = median(frames.values().flatten().map(|o| o.size as f64).collect());
        Self {
            frames,
            median_size,
            ndim,
            label_ceilings: BTreeMap::new(),
        }
    }

    /// Records the largest label of each frame of the source the store was
    /// filtered from, so that fresh ids never reuse a dropped object's label.
    pub fn with_label_ceilings(mut self, ceilings: BTreeMap<Timestep, ObjectId>) -> Self {
        self.label_ceilings = ceilings;
        self
    }

    /// Replaces the computed median (user-supplied average size).
    pub fn with_median_size(mut self, size: f64) -> Self {
        self.median_size = size;
        self
    }

    pub fn median_size(&self) -> f64 {
        self.median_size
    }

    /// Spatial dimensionality of the data (2 or 3).
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn timesteps(&self) -> impl Iterator<Item = Timestep> + '_ {
        self.frames.keys().copied()
    }

    pub fn frames(&self) -> impl Iterator<Item = (Timestep, &[Observation])> {
        self.frames.iter().map(|(t, obs)| (*t, obs.as_slice()))
    }

    /// Observations at `t` (empty if the timestep is unknown).
    pub fn frame(&self, t: Timestep) -> &[Observation] {
        self.frames.get(&t).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, t: Timestep, id: ObjectId) -> Option<&Observation> {
        let frame = self.frames.get(&t)?;
        frame
            .binary_search_by_key(&id, |o| o.id)
            .ok()
            .map(|i| &frame[i])
    }

    /// Largest label in use at `t`, 0 if none.
    ///
    /// Includes labels of objects filtered out of the store.
    pub fn max_id(&self, t: Timestep) -> ObjectId {
        let kept = self.frame(t).last().map(|o| o.id).unwrap_or(0);
        kept.max(self.label_ceilings.get(&t).copied().unwrap_or(0))
    }

    /// Total observation count.
    pub fn len(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Spatio-temporal bounding box of the candidate graph, in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub t_start: f64,
    pub lower: [f64; 3],
    pub t_stop: f64,
    pub upper: [f64; 3],
}

impl FieldOfView {
    /// True if a timestep/center pair lies inside the box (bounds inclusive).
    pub fn contains(&self, t: f64, center: &Vector3<f64>) -> bool {
        t >= self.t_start
            && t <= self.t_stop
            && (0..3).all(|i| center[i] >= self.lower[i] && center[i] <= self.upper[i])
    }

    /// True if the z extent collapses to the single value 0.
    pub fn is_flat(&self) -> bool {
        self.lower[2] == 0.0 && self.upper[2] == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn obs(t: Timestep, id: ObjectId, size: u64) -> Observation {
        Observation {
            timestep: t,
            id,
            center: Vector3::zeros(),
            lower: [0; 3],
            upper: [0; 3],
            size,
            class_probabilities: None,
            division_probability: None,
        }
    }

    #[test]
    fn test_store_median_even_and_odd() {
        let mut frames = BTreeMap::new();
        frames.insert(0, vec![obs(0, 2, 10), obs(0, 1, 30)]);
        frames.insert(1, vec![obs(1, 1, 20)]);
        let store = ObservationStore::new(frames.clone(), 2);
        assert_relative_eq!(store.median_size(), 20.0);

        frames.insert(2, vec![obs(2, 1, 40)]);
        let store = ObservationStore::new(frames, 2);
        assert_relative_eq!(store.median_size(), 25.0);
    }

    #[test]
    fn test_store_lookup_sorted_by_id() {
        let mut frames = BTreeMap::new();
        frames.insert(3, vec![obs(3, 7, 1), obs(3, 2, 1)]);
        let store = ObservationStore::new(frames, 3);
        assert_eq!(store.get(3, 7).map(|o| o.id), Some(7));
        assert!(store.get(3, 5).is_none());
        assert!(store.get(4, 7).is_none());
        assert_eq!(store.max_id(3), 7);
        assert_eq!(store.max_id(9), 0);
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(2, 4);
        assert_eq!(range.len(), 3);
        assert!(range.contains(4));
        assert!(!range.contains(5));
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(TimeRange::new(3, 1).is_empty());
    }
}
