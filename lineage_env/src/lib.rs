//! Lineage Environment Abstraction Layer
//!
//! This crate defines the narrow contracts through which the tracking engine
//! talks to everything it does not own:
//!
//! - **Raw segmentation** (`LabelSource`): an ROI-addressable label volume
//! - **Object features** (`FeatureProvider`): per-object measurements per frame
//! - **Combinatorial solver** (`TrackingSolver`): graph building, tracking and
//!   merger resolution as a black box
//!
//! It also carries the value types exchanged across those contracts
//! (ROIs, label arrays, observations, events, coordinate maps) and in-memory
//! reference sources used by tests and the simulation harness.
//!
//! # Axis Convention
//!
//! Every volume is addressed in `(t, x, y, z, c)` order. Two-dimensional data
//! is embedded with a z extent of 1.
//!
//! # Example
//!
//! ```ignore
//! use lineage_env::{InMemoryLabels, LabelSource, Roi, VolumeFeatures};
//!
//! let labels = InMemoryLabels::new(volume);
//! let features = VolumeFeatures::from_labels(labels.volume());
//! let frame0 = labels.read(&Roi::frame(0, labels.shape()))?;
//! ```

mod coordinates;
mod error;
mod events;
mod memory;
mod observation;
mod solver;
mod source;
mod types;

pub use coordinates::{CoordinateMap, PixelCoordinates};
pub use error::{EnvError, SolverError};
pub use events::{Event, EventSequence};
pub use memory::{InMemoryLabels, VolumeFeatures};
pub use observation::{
    FeatureTable, FieldOfView, FrameFeatures, ObjectFeatures, ObjectId, Observation,
    ObservationStore, TimeRange, Timestep,
};
pub use solver::{GraphParameters, MergerWeights, TrackWeights, TrackingSolver};
pub use source::{FeatureProvider, LabelSource};
pub use types::{Frame, LabelArray, Roi, AXES};
