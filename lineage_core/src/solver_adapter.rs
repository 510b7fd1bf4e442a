//! Glue between the engine and the external solver's `track` call.

use crate::error::TrackingError;
use crate::parameters::TrackingParameters;
use lineage_env::{EventSequence, MergerWeights, TrackWeights, TrackingSolver};
use std::time::Instant;
use tracing::debug;

/// Cost of forbidden transitions handed to the solver.
pub const FORBIDDEN_COST: f64 = 0.0;

/// Relative optimality gap accepted by the solver.
pub const EP_GAP: f64 = 0.05;

/// Shape parameter of the transition cost.
pub const TRANSITION_PARAMETER: f64 = 5.0;

/// Solver weights for one tracking run.
pub fn track_weights(params: &TrackingParameters, ndim: usize) -> TrackWeights {
    TrackWeights {
        forbidden_cost: FORBIDDEN_COST,
        ep_gap: EP_GAP,
        with_tracklets: params.with_tracklets,
        division_weight: params.div_weight,
        transition_weight: params.trans_weight,
        disappearance_cost: params.disappearance_cost,
        appearance_cost: params.appearance_cost,
        ndim,
        transition_parameter: TRANSITION_PARAMETER,
        border_aware_width: params.border_aware_width,
        with_constraints: true,
        timeout: params.solver_timeout(),
    }
}

/// Solver weights for merger resolution.
pub fn merger_weights(params: &TrackingParameters, ndim: usize) -> MergerWeights {
    MergerWeights {
        ep_gap: EP_GAP,
        transition_weight: params.trans_weight,
        with_tracklets: params.with_tracklets,
        ndim,
        transition_parameter: TRANSITION_PARAMETER,
        with_constraints: true,
        with_multi_frame_moves: false,
        timeout: params.solver_timeout(),
    }
}

/// Runs the solver on `graph`.
///
/// # Errors
/// * `Infeasible` / `Timeout` / `Solver` - mapped from the solver failure
/// * `EmptyResult` - the solver returned no events at all
pub fn solve<S: TrackingSolver>(
    solver: &S,
    graph: &mut S::Graph,
    weights: &TrackWeights,
) -> Result<EventSequence, TrackingError> {
    let started = Instant::now();
    let events = solver.track(graph, weights)?;
    debug!(
        events = events.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        with_tracklets = weights.with_tracklets,
        "solver finished"
    );
    if events.is_empty() {
        return Err(TrackingError::EmptyResult);
    }
    Ok(events)
}
