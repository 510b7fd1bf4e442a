//! Upstream data sources: raw segmentation and object features.

use crate::error::EnvError;
use crate::observation::{FeatureTable, TimeRange};
use crate::types::{LabelArray, Roi, AXES};
use std::sync::Arc;

/// A read-only, ROI-addressable label volume.
///
/// Ids share the id space of the [`FeatureProvider`] for the same timestep.
/// Implementations must tolerate concurrent reads.
pub trait LabelSource: Send + Sync {
    /// Full volume shape in `(t, x, y, z, c)` order.
    fn shape(&self) -> [usize; AXES];

    /// Reads a region.
    ///
    /// # Errors
    /// * `EnvError::RoiOutOfBounds` - `roi` does not fit the volume
    /// * any I/O failure of the backing store
    fn read(&self, roi: &Roi) -> Result<LabelArray, EnvError>;
}

/// Supplies per-object measurements for a range of frames.
pub trait FeatureProvider: Send + Sync {
    /// Features for every timestep of `range`.
    ///
    /// A timestep without objects is reported with an empty map.
    fn features(&self, range: TimeRange) -> Result<FeatureTable, EnvError>;

    /// Number of labels of the attached object-count classifier, if any.
    fn num_labels(&self) -> Option<usize> {
        None
    }
}

impl<T: LabelSource + ?Sized> LabelSource for Arc<T> {
    fn shape(&self) -> [usize; AXES] {
        (**self).shape()
    }

    fn read(&self, roi: &Roi) -> Result<LabelArray, EnvError> {
        (**self).read(roi)
    }
}

impl<T: FeatureProvider + ?Sized> FeatureProvider for Arc<T> {
    fn features(&self, range: TimeRange) -> Result<FeatureTable, EnvError> {
        (**self).features(range)
    }

    fn num_labels(&self) -> Option<usize> {
        (**self).num_labels()
    }
}
