//! Combinatorial solver contract.

use crate::coordinates::CoordinateMap;
use crate::error::SolverError;
use crate::events::EventSequence;
use crate::observation::{FieldOfView, ObservationStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Detection and division model parameters the hypothesis graph is built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphParameters {
    /// Maximum number of true objects one observation may hold
    pub max_objects: u32,

    /// Use the size-dependent detection model
    pub size_dependent: bool,

    /// Median (or user-supplied average) object size
    pub median_object_size: f64,

    /// Maximum transition distance in physical units
    pub max_distance: f64,

    pub with_divisions: bool,
    pub division_threshold: f64,
}

/// Weights and switches for one tracking solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackWeights {
    pub forbidden_cost: f64,
    pub ep_gap: f64,

    /// Structural hint only; does not change the result contract
    pub with_tracklets: bool,

    pub division_weight: f64,
    pub transition_weight: f64,
    pub disappearance_cost: f64,
    pub appearance_cost: f64,
    pub ndim: usize,
    pub transition_parameter: f64,
    pub border_aware_width: f64,
    pub with_constraints: bool,

    /// Wall-clock limit for the solve, `None` for unbounded
    pub timeout: Option<Duration>,
}

/// Weights and switches for merger resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergerWeights {
    pub ep_gap: f64,
    pub transition_weight: f64,
    pub with_tracklets: bool,
    pub ndim: usize,
    pub transition_parameter: f64,
    pub with_constraints: bool,
    pub with_multi_frame_moves: bool,
    pub timeout: Option<Duration>,
}

/// The external combinatorial solver.
///
/// # Implementations
///
/// - **Production**: a binding to an ILP-based conservation tracker
/// - **Simulation**: `lineage_sim::GreedySolver`
/// - **Tests**: scripted fakes
///
/// The graph type is opaque to the engine: it is built once and then handed
/// back mutably for every solve until it is replaced.
pub trait TrackingSolver: Send + Sync {
    /// Candidate-assignment graph.
    type Graph: Send;

    /// Builds the hypothesis graph for a store, bounded by `fov`.
    fn build_graph(
        &self,
        store: &ObservationStore,
        params: &GraphParameters,
        fov: &FieldOfView,
    ) -> Result<Self::Graph, SolverError>;

    /// Computes the optimal event assignment on `graph`.
    ///
    /// # Errors
    /// * `SolverError::Infeasible` - no assignment satisfies the constraints
    /// * `SolverError::Timeout` - `weights.timeout` was exceeded
    fn track(&self, graph: &mut Self::Graph, weights: &TrackWeights) -> Result<EventSequence, SolverError>;

    /// Splits merger events using the pixel coordinates of merged objects.
    ///
    /// Implementations add coordinate entries for every new id they create
    /// and report each split as a `ResolvedTo` event.
    fn resolve_mergers(
        &self,
        graph: &mut Self::Graph,
        events: &EventSequence,
        coordinates: &mut CoordinateMap,
        weights: &MergerWeights,
    ) -> Result<EventSequence, SolverError>;
}
