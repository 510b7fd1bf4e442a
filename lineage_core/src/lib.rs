//! Lineage Core - Incremental Conservation Tracking with Merger Resolution
//!
//! Tracks segmented objects through a time-resolved label volume, splits
//! regions that hold several objects ("mergers") and exposes the result as two
//! ROI-readable volumes:
//!
//! 1. **Output**: tracked labels, colored by lineage, composed over the raw
//!    segmentation
//! 2. **MergerOutput**: merger highlight (object count per merged region),
//!    served through a blockwise cache
//!
//! # Pipeline
//!
//! ```text
//!   FeatureProvider ─► ObservationStore ─► ParameterDiff ─► HypothesisGraph
//!                                                               │
//!   LabelSource ─► merger coordinates ◄─ EventSequence ◄─ solve ┘
//!                        │
//!                        └─► resolve mergers ─► commit (atomic snapshot)
//! ```
//!
//! The expensive graph is only rebuilt when a topology parameter changes;
//! weight-only changes re-solve the existing graph.

pub mod block_cache;
pub mod dispatcher;
pub mod error;
pub mod hypotheses;
pub mod merger_coords;
pub mod merger_resolution;
pub mod observations;
pub mod parameters;
pub mod relabel;
pub mod session;
pub mod solver_adapter;
pub mod state;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use block_cache::{BlockGeometry, BlockIndex, BlockwiseCache, CacheStats};
pub use dispatcher::{OutputKind, RegionDispatcher, RegionRequest, RequestState};
pub use error::TrackingError;
pub use hypotheses::{HypothesisGraphManager, StagedGraph};
pub use merger_resolution::{MergerMap, ResolvedMapping};
pub use parameters::{Configuration, ParamValue, ParameterDiff, ParameterKey, TrackRequest, TrackingParameters};
pub use relabel::ColorAssignment;
pub use session::{SessionConfig, TrackSummary, TrackingSession};
pub use state::CommittedState;
