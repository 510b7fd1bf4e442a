//! Volume addressing types: regions of interest, dense label arrays, frames.

use crate::error::EnvError;
use ndarray::{s, Array3, Array5, ArrayView3, Axis, Ix5, SliceInfo, SliceInfoElem, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Number of axes of every volume: `(t, x, y, z, c)`.
pub const AXES: usize = 5;

/// A half-open, axis-aligned region of a `(t, x, y, z, c)` volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    /// Inclusive start per axis
    pub start: [usize; AXES],

    /// Exclusive stop per axis
    pub stop: [usize; AXES],
}

impl Roi {
    /// Creates a region from start/stop corners.
    pub fn new(start: [usize; AXES], stop: [usize; AXES]) -> Self {
        Self { start, stop }
    }

    /// The whole volume of the given shape.
    pub fn full(shape: [usize; AXES]) -> Self {
        Self::new([0; AXES], shape)
    }

    /// One complete frame `t` of a volume of the given shape.
    pub fn frame(t: usize, shape: [usize; AXES]) -> Self {
        let mut roi = Self::full(shape);
        roi.start[0] = t;
        roi.stop[0] = t + 1;
        roi
    }

    /// Extent per axis.
    pub fn shape(&self) -> [usize; AXES] {
        std::array::from_fn(|i| self.stop[i].saturating_sub(self.start[i]))
    }

    /// Number of elements covered.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timesteps spanned by this region.
    pub fn timesteps(&self) -> Range<usize> {
        self.start[0]..self.stop[0]
    }

    /// Overlap of two regions, `None` when they are disjoint.
    pub fn intersect(&self, other: &Roi) -> Option<Roi> {
        let start: [usize; AXES] = std::array::from_fn(|i| self.start[i].max(other.start[i]));
        let stop: [usize; AXES] = std::array::from_fn(|i| self.stop[i].min(other.stop[i]));
        if (0..AXES).any(|i| start[i] >= stop[i]) {
            None
        } else {
            Some(Roi::new(start, stop))
        }
    }

    /// True if the region is well-formed and inside a volume of `shape`.
    pub fn fits(&self, shape: [usize; AXES]) -> bool {
        (0..AXES).all(|i| self.start[i] <= self.stop[i] && self.stop[i] <= shape[i])
    }

    /// Re-expresses this region relative to `origin`.
    ///
    /// `origin` must not exceed `start` on any axis.
    pub fn relative_to(&self, origin: [usize; AXES]) -> Roi {
        Roi::new(
            std::array::from_fn(|i| self.start[i] - origin[i]),
            std::array::from_fn(|i| self.stop[i] - origin[i]),
        )
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in 0..AXES {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}..{}", self.start[i], self.stop[i])?;
        }
        write!(f, "]")
    }
}

/// Per-axis slice of a 5-D array covering `roi`.
fn slice_of(roi: &Roi) -> SliceInfo<[SliceInfoElem; AXES], Ix5, Ix5> {
    s![
        roi.start[0]..roi.stop[0],
        roi.start[1]..roi.stop[1],
        roi.start[2]..roi.stop[2],
        roi.start[3]..roi.stop[3],
        roi.start[4]..roi.stop[4]
    ]
}

/// A dense `(t, x, y, z, c)` array of object labels.
///
/// Label 0 is background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelArray {
    data: Array5<u32>,
}

impl LabelArray {
    /// Creates an all-background array.
    pub fn zeros(shape: [usize; AXES]) -> Self {
        Self {
            data: Array5::zeros(shape),
        }
    }

    /// Wraps a row-major buffer, checking its length against `shape`.
    pub fn from_vec(shape: [usize; AXES], data: Vec<u32>) -> Result<Self, EnvError> {
        let expected: usize = shape.iter().product();
        let actual = data.len();
        let data = Array5::from_shape_vec(shape, data).map_err(|_| EnvError::ShapeMismatch { expected, actual })?;
        Ok(Self { data })
    }

    pub fn shape(&self) -> [usize; AXES] {
        let (t, x, y, z, c) = self.data.dim();
        [t, x, y, z, c]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Labels in logical `(t, x, y, z, c)` order.
    pub fn iter(&self) -> impl Iterator<Item = &u32> {
        self.data.iter()
    }

    #[inline]
    pub fn get(&self, index: [usize; AXES]) -> u32 {
        self.data[index]
    }

    #[inline]
    pub fn set(&mut self, index: [usize; AXES], value: u32) {
        self.data[index] = value;
    }

    /// Copies the sub-region `roi` (in this array's local coordinates).
    pub fn extract(&self, roi: &Roi) -> LabelArray {
        LabelArray {
            data: self.data.slice(slice_of(roi)).to_owned(),
        }
    }

    /// Writes `src` into this array with its first element at `at`.
    pub fn paste(&mut self, at: [usize; AXES], src: &LabelArray) {
        let shape = src.shape();
        let target = Roi::new(at, std::array::from_fn(|i| at[i] + shape[i]));
        self.data.slice_mut(slice_of(&target)).assign(&src.data);
    }

    /// Overwrites every position where `top` holds a non-zero label.
    pub fn overlay(&mut self, top: &LabelArray) {
        Zip::from(&mut self.data).and(&top.data).for_each(|out, &value| {
            if value != 0 {
                *out = value;
            }
        });
    }

    /// Read-only `(x, y, z)` view of channel `channel` of local frame `t`.
    pub fn plane(&self, t: usize, channel: usize) -> ArrayView3<'_, u32> {
        self.data.slice(s![t, .., .., .., channel])
    }

    /// Copies channel `channel` of local frame `t` out as a [`Frame`].
    ///
    /// `origin` is the global spatial position of this array's first element.
    pub fn frame(&self, t: usize, channel: usize, origin: [i64; 3]) -> Frame {
        Frame {
            origin,
            data: self.plane(t, channel).to_owned(),
        }
    }

    /// Writes a frame previously taken with [`LabelArray::frame`] back.
    pub fn store_frame(&mut self, t: usize, channel: usize, frame: &Frame) {
        self.data.slice_mut(s![t, .., .., .., channel]).assign(&frame.data);
    }

    /// Zeroes every channel of local frame `t`.
    pub fn clear_frame(&mut self, t: usize) {
        self.data.index_axis_mut(Axis(0), t).fill(0);
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

/// One spatial frame `(x, y, z)` of a label volume, anchored at a global origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    origin: [i64; 3],
    data: Array3<u32>,
}

impl Frame {
    /// Creates an all-background frame.
    pub fn zeros(origin: [i64; 3], shape: [usize; 3]) -> Self {
        Self {
            origin,
            data: Array3::zeros(shape),
        }
    }

    /// Wraps a row-major `(x, y, z)` buffer.
    pub fn from_shape_vec(origin: [i64; 3], shape: [usize; 3], data: Vec<u32>) -> Result<Self, EnvError> {
        let expected: usize = shape.iter().product();
        let actual = data.len();
        let data = Array3::from_shape_vec(shape, data).map_err(|_| EnvError::ShapeMismatch { expected, actual })?;
        Ok(Self { origin, data })
    }

    pub fn origin(&self) -> [i64; 3] {
        self.origin
    }

    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }

    /// Labels in `(x, y, z)` order.
    pub fn to_vec(&self) -> Vec<u32> {
        self.data.iter().copied().collect()
    }

    pub fn fill(&mut self, value: u32) {
        self.data.fill(value);
    }

    /// True when the trailing spatial axis has extent 1 (2-D content).
    pub fn is_planar(&self) -> bool {
        self.data.dim().2 == 1
    }

    pub fn get(&self, local: [usize; 3]) -> u32 {
        self.data[local]
    }

    pub fn set(&mut self, local: [usize; 3], value: u32) {
        self.data[local] = value;
    }

    /// Local index of a global pixel coordinate, `None` if it lies outside.
    ///
    /// Planar frames accept 2-component coordinates; a third component, when
    /// present, must match the frame's z plane. Volumetric frames need three.
    pub fn local_of(&self, coord: &[i64]) -> Option<[usize; 3]> {
        let dims = coord.len().min(3);
        if dims < 2 || (dims == 2 && !self.is_planar()) {
            return None;
        }
        let shape = self.shape();
        let mut local = [0usize; 3];
        for axis in 0..dims {
            let offset = coord[axis] - self.origin[axis];
            if offset < 0 || offset as usize >= shape[axis] {
                return None;
            }
            local[axis] = offset as usize;
        }
        Some(local)
    }

    pub fn map_in_place(&mut self, f: impl FnMut(u32) -> u32) {
        self.data.mapv_inplace(f);
    }
}
