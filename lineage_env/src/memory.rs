//! In-memory implementations of the source contracts.

use crate::error::EnvError;
use crate::observation::{FeatureTable, ObjectFeatures, ObjectId, TimeRange, Timestep};
use crate::source::{FeatureProvider, LabelSource};
use crate::types::{LabelArray, Roi, AXES};
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// A label volume held fully in memory.
#[derive(Debug, Clone)]
pub struct InMemoryLabels {
    volume: LabelArray,
}

impl InMemoryLabels {
    pub fn new(volume: LabelArray) -> Self {
        Self { volume }
    }

    pub fn volume(&self) -> &LabelArray {
        &self.volume
    }
}

impl LabelSource for InMemoryLabels {
    fn shape(&self) -> [usize; AXES] {
        self.volume.shape()
    }

    fn read(&self, roi: &Roi) -> Result<LabelArray, EnvError> {
        if !roi.fits(self.volume.shape()) {
            return Err(EnvError::RoiOutOfBounds {
                roi: *roi,
                shape: self.volume.shape(),
            });
        }
        Ok(self.volume.extract(roi))
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    sum: [f64; 3],
    lower: [i64; 3],
    upper: [i64; 3],
    count: u64,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            sum: [0.0; 3],
            lower: [i64::MAX; 3],
            upper: [i64::MIN; 3],
            count: 0,
        }
    }

    fn add(&mut self, pos: [i64; 3]) {
        for axis in 0..3 {
            self.sum[axis] += pos[axis] as f64;
            self.lower[axis] = self.lower[axis].min(pos[axis]);
            self.upper[axis] = self.upper[axis].max(pos[axis]);
        }
        self.count += 1;
    }

    fn finish(self) -> ObjectFeatures {
        let n = self.count.max(1) as f64;
        ObjectFeatures {
            center: Vector3::new(self.sum[0] / n, self.sum[1] / n, self.sum[2] / n),
            lower: self.lower,
            upper: self.upper,
            count: self.count,
            class_probabilities: None,
            division_probability: None,
        }
    }
}

/// Region features (center, bounding box, count) measured directly on a
/// label volume, with optional classifier outputs attached by hand.
#[derive(Debug, Clone, Default)]
pub struct VolumeFeatures {
    table: FeatureTable,
    frames: usize,
    num_labels: Option<usize>,
}

impl VolumeFeatures {
    /// Measures every non-zero label of channel 0 in every frame.
    pub fn from_labels(volume: &LabelArray) -> Self {
        let nt = volume.shape()[0];
        let mut table = FeatureTable::new();
        for t in 0..nt {
            let mut accumulators: BTreeMap<ObjectId, Accumulator> = BTreeMap::new();
            for ((x, y, z), &id) in volume.plane(t, 0).indexed_iter() {
                if id != 0 {
                    accumulators
                        .entry(id)
                        .or_insert_with(Accumulator::new)
                        .add([x as i64, y as i64, z as i64]);
                }
            }
            let frame = accumulators
                .into_iter()
                .map(|(id, acc)| (id, acc.finish()))
                .collect();
            table.insert(t as Timestep, frame);
        }
        Self {
            table,
            frames: nt,
            num_labels: None,
        }
    }

    /// Attaches object-count probabilities to one object.
    pub fn set_class_probabilities(&mut self, t: Timestep, id: ObjectId, probabilities: Vec<f64>) {
        if let Some(features) = self.table.get_mut(&t).and_then(|f| f.get_mut(&id)) {
            features.class_probabilities = Some(probabilities);
        }
    }

    /// Attaches a division probability to one object.
    pub fn set_division_probability(&mut self, t: Timestep, id: ObjectId, probability: f64) {
        if let Some(features) = self.table.get_mut(&t).and_then(|f| f.get_mut(&id)) {
            features.division_probability = Some(probability);
        }
    }

    /// Declares the label count of the attached classifier.
    pub fn with_num_labels(mut self, num_labels: usize) -> Self {
        self.num_labels = Some(num_labels);
        self
    }

    pub fn table(&self) -> &FeatureTable {
        &self.table
    }
}

impl FeatureProvider for VolumeFeatures {
    fn features(&self, range: TimeRange) -> Result<FeatureTable, EnvError> {
        let mut out = FeatureTable::new();
        for t in range.iter() {
            if t as usize >= self.frames {
                return Err(EnvError::MissingTimestep(t));
            }
            out.insert(t, self.table.get(&t).cloned().unwrap_or_default());
        }
        Ok(out)
    }

    fn num_labels(&self) -> Option<usize> {
        self.num_labels
    }
}
