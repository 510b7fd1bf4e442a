//! Ownership of the long-lived hypothesis graph.
//!
//! Building the candidate graph is the expensive part of tracking. The manager
//! keeps one graph alive across `track()` calls and only rebuilds it when asked
//! to. A rebuilt graph is *staged*: it replaces the owned graph only when the
//! caller installs it after a successful run.

use crate::error::TrackingError;
use lineage_env::{FieldOfView, GraphParameters, ObservationStore, TrackingSolver};
use tracing::info;

/// Owns the current hypothesis graph of a tracking session.
#[derive(Debug)]
pub struct HypothesisGraphManager<G> {
    graph: Option<G>,
    builds: u64,
}

impl<G> Default for HypothesisGraphManager<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> HypothesisGraphManager<G> {
    pub fn new() -> Self {
        Self {
            graph: None,
            builds: 0,
        }
    }

    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }

    /// Number of graphs constructed so far (installed or not).
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Drops the owned graph.
    pub fn teardown(&mut self) {
        self.graph = None;
    }

    /// Returns the graph to solve on, building a new one if required.
    ///
    /// Reuse is O(1). The field of view is validated on every call: a 2-D
    /// request must have a z range collapsed to 0.
    pub fn ensure_graph<S>(
        &mut self,
        solver: &S,
        store: &ObservationStore,
        fov: &FieldOfView,
        params: &GraphParameters,
        rebuild_required: bool,
    ) -> Result<StagedGraph<'_, G>, TrackingError>
    where
        S: TrackingSolver<Graph = G>,
    {
        validate_dimensionality(store.ndim(), fov)?;

        if rebuild_required || self.graph.is_none() {
            info!(
                max_objects = params.max_objects,
                median_object_size = params.median_object_size,
                max_distance = params.max_distance,
                "building new hypothesis graph"
            );
            let graph = solver.build_graph(store, params, fov)?;
            self.builds += 1;
            return Ok(StagedGraph::Rebuilt {
                slot: &mut self.graph,
                graph,
            });
        }

        match self.graph.as_mut() {
            Some(graph) => Ok(StagedGraph::Reused(graph)),
            None => Err(TrackingError::not_ready("hypothesis graph missing")),
        }
    }
}

fn validate_dimensionality(ndim: usize, fov: &FieldOfView) -> Result<(), TrackingError> {
    match ndim {
        2 if !fov.is_flat() => Err(TrackingError::Dimensionality(format!(
            "fov of z must be (0,0) if ndim==2, got ({}, {})",
            fov.lower[2], fov.upper[2]
        ))),
        2 | 3 => Ok(()),
        other => Err(TrackingError::Dimensionality(format!(
            "ndim = {other} instead of 2 or 3"
        ))),
    }
}

/// A graph handed out for one tracking run.
pub enum StagedGraph<'a, G> {
    /// The owned graph, reused as is
    Reused(&'a mut G),

    /// A fresh graph, not yet installed
    Rebuilt { slot: &'a mut Option<G>, graph: G },
}

impl<'a, G> StagedGraph<'a, G> {
    pub fn is_rebuilt(&self) -> bool {
        matches!(self, StagedGraph::Rebuilt { .. })
    }

    pub fn graph_mut(&mut self) -> &mut G {
        match self {
            StagedGraph::Reused(graph) => graph,
            StagedGraph::Rebuilt { graph, .. } => graph,
        }
    }

    /// Makes a rebuilt graph the owned one. Dropping instead discards it.
    pub fn install(self) {
        if let StagedGraph::Rebuilt { slot, graph } = self {
            *slot = Some(graph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::TrackRequest;
    use crate::test_support::{blob_store, FakeSolver};
    use lineage_env::TimeRange;

    fn inputs() -> (ObservationStore, FieldOfView, GraphParameters) {
        let store = blob_store();
        let request = TrackRequest::new(TimeRange::new(0, 2), [3, 8, 6, 1, 1]);
        let params = request.graph_parameters(store.median_size());
        (store, request.field_of_view(), params)
    }

    #[test]
    fn test_reuse_after_install() {
        let solver = FakeSolver::new();
        let (store, fov, params) = inputs();
        let mut manager = HypothesisGraphManager::new();

        let staged = manager.ensure_graph(&solver, &store, &fov, &params, false).unwrap();
        assert!(staged.is_rebuilt());
        staged.install();
        assert!(manager.has_graph());

        let staged = manager.ensure_graph(&solver, &store, &fov, &params, false).unwrap();
        assert!(!staged.is_rebuilt());
        drop(staged);
        assert_eq!(manager.builds(), 1);
    }

    #[test]
    fn test_dropped_rebuild_keeps_old_graph() {
        let solver = FakeSolver::new();
        let (store, fov, params) = inputs();
        let mut manager = HypothesisGraphManager::new();
        manager.ensure_graph(&solver, &store, &fov, &params, true).unwrap().install();

        let mut other = params.clone();
        other.max_objects = 5;
        let staged = manager.ensure_graph(&solver, &store, &fov, &other, true).unwrap();
        drop(staged);

        let mut staged = manager.ensure_graph(&solver, &store, &fov, &params, false).unwrap();
        assert_eq!(staged.graph_mut().params.max_objects, params.max_objects);
        drop(staged);
        assert_eq!(manager.builds(), 2);
    }

    #[test]
    fn test_flat_fov_required_for_2d() {
        let solver = FakeSolver::new();
        let (store, mut fov, params) = inputs();
        fov.upper[2] = 4.0;
        let mut manager = HypothesisGraphManager::new();
        assert!(matches!(
            manager.ensure_graph(&solver, &store, &fov, &params, true),
            Err(TrackingError::Dimensionality(_))
        ));
        assert_eq!(manager.builds(), 0);
    }
}
