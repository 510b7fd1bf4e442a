//! The tracking session: `track()` orchestration, atomic commit and reads.
//!
//! ```text
//!   track(request)                                    read_output(roi)
//!     │ in-flight guard (Mutex<graph manager>)          │ snapshot (Arc)
//!     ├─ observation store                              └─ dispatcher
//!     ├─ parameter diff ──► ensure graph (staged)
//!     ├─ solve                                        read_merger_output(roi)
//!     ├─ merger coordinates ──► resolve                 │ read lock held
//!     └─ commit: install graph, swap state,             └─ blockwise cache
//!               invalidate cache (under write lock)          └─ dispatcher
//! ```
//!
//! `track()` is all-or-nothing: every error is raised before the commit, so
//! readers observe either the old or the new state in full.

use crate::block_cache::{BlockGeometry, BlockwiseCache, CacheStats};
use crate::dispatcher::RegionDispatcher;
use crate::error::TrackingError;
use crate::hypotheses::HypothesisGraphManager;
use crate::merger_coords::extract_merger_coordinates;
use crate::merger_resolution::{resolve_mergers, MergerMap, ResolvedMapping};
use crate::observations::{build_store, check_classifier};
use crate::parameters::{ParameterDiff, ParameterKey, TrackRequest};
use crate::relabel::ColorAssignment;
use crate::solver_adapter::{merger_weights, solve, track_weights};
use crate::state::CommittedState;
use lineage_env::{
    EnvError, FeatureProvider, LabelArray, LabelSource, Roi, TimeRange, Timestep, TrackingSolver, AXES,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Session-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Block shape of the merger cache (default: one full frame per block)
    pub block_shape: Option<[usize; AXES]>,
}

impl SessionConfig {
    pub fn geometry(&self, shape: [usize; AXES]) -> BlockGeometry {
        let block_shape = self.block_shape.unwrap_or_else(|| {
            let mut frame = shape;
            frame[0] = 1;
            frame
        });
        BlockGeometry::new(shape, block_shape)
    }
}

/// Outcome of a successful `track()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub session: Uuid,
    pub version: u64,
    pub time_range: TimeRange,
    pub observations: usize,
    pub median_object_size: f64,
    pub events: usize,
    pub mergers: usize,
    pub resolved: usize,
    pub graph_rebuilt: bool,
    pub graph_builds: u64,
    pub changed: Vec<ParameterKey>,
    pub invalidated_blocks: usize,
    pub elapsed_ms: u64,
}

// ============================================================================
// SESSION
// ============================================================================

/// Owns the solver, the upstream sources and everything derived from them.
pub struct TrackingSession<S: TrackingSolver, F, L> {
    id: Uuid,
    solver: S,
    features: F,
    labels: L,
    config: SessionConfig,

    /// In-flight guard; `track()` holds it for the whole call
    graphs: Mutex<HypothesisGraphManager<S::Graph>>,

    committed: RwLock<Arc<CommittedState>>,
    merger_cache: BlockwiseCache,
}

impl<S, F, L> TrackingSession<S, F, L>
where
    S: TrackingSolver,
    F: FeatureProvider,
    L: LabelSource,
{
    pub fn new(solver: S, features: F, labels: L, config: SessionConfig) -> Self {
        let merger_cache = BlockwiseCache::new(config.geometry(labels.shape()));
        let id = Uuid::new_v4();
        info!(session = %id, shape = ?labels.shape(), "tracking session created");
        Self {
            id,
            solver,
            features,
            labels,
            config,
            graphs: Mutex::new(HypothesisGraphManager::new()),
            committed: RwLock::new(Arc::new(CommittedState::default())),
            merger_cache,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn features(&self) -> &F {
        &self.features
    }

    pub fn labels(&self) -> &L {
        &self.labels
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn graphs(&self) -> MutexGuard<'_, HypothesisGraphManager<S::Graph>> {
        self.graphs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Arc<CommittedState>> {
        self.committed.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Arc<CommittedState>> {
        self.committed.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The current committed state.
    pub fn snapshot(&self) -> Arc<CommittedState> {
        Arc::clone(&self.read_state())
    }

    /// Graphs built so far. Blocks while a `track()` call is running.
    pub fn graph_builds(&self) -> u64 {
        self.graphs().builds()
    }

    /// Runs tracking for `request` and commits the result.
    ///
    /// Concurrent callers are serialized. On error nothing is committed and
    /// a graph built during the call is discarded.
    pub fn track(&self, request: &TrackRequest) -> Result<TrackSummary, TrackingError> {
        let mut graphs = self.graphs();
        let started = Instant::now();
        let range = request.time_range;
        info!(
            session = %self.id,
            first = range.first,
            last = range.last,
            ndim = request.ndim,
            "tracking started"
        );
        self.validate(request)?;

        check_classifier(&self.features, request)?;
        let store = build_store(&self.features, request)?;

        let previous = self.snapshot();
        let configuration = request.to_configuration();
        let diff = ParameterDiff::compute(
            (previous.version > 0).then_some(&previous.configuration),
            &configuration,
            graphs.has_graph(),
            request.force_build,
        );
        debug!(changed = ?diff.changed, rebuild = diff.rebuild_required, "parameter diff");

        let fov = request.field_of_view();
        let graph_params = request.graph_parameters(store.median_size());
        let mut staged = graphs.ensure_graph(&self.solver, &store, &fov, &graph_params, diff.rebuild_required)?;
        let graph_rebuilt = staged.is_rebuilt();

        let params = &request.parameters;
        let mut events = solve(&self.solver, staged.graph_mut(), &track_weights(params, request.ndim))?;

        let mut coordinates = previous.coordinates.clone();
        let resolved = if params.with_merger_resolution {
            let extracted = extract_merger_coordinates(&store, &self.labels, &events, &mut coordinates)?;
            debug!(extracted, "merger coordinates recorded");
            let (refined, resolved) = resolve_mergers(
                &self.solver,
                staged.graph_mut(),
                &events,
                &mut coordinates,
                &merger_weights(params, request.ndim),
                range,
            )?;
            events = refined;
            resolved
        } else {
            ResolvedMapping::from_events(&events, range)
        };

        let mergers = MergerMap::from_events(&events, range);
        let colors = ColorAssignment::from_events(&events);
        let next = CommittedState {
            version: previous.version + 1,
            configuration,
            time_range: Some(range),
            events,
            resolved,
            mergers,
            colors,
            coordinates,
        };

        let (version, events, mergers, resolved) =
            (next.version, next.events.len(), next.mergers.len(), next.resolved.len());

        // commit
        staged.install();
        let shape = self.labels.shape();
        let invalidated: usize = {
            let mut state = self.write_state();
            let stale = highlight_changes(&state, &next, shape[0]);
            *state = Arc::new(next);
            stale
                .into_iter()
                .map(|t| self.merger_cache.invalidate(&Roi::frame(t as usize, shape)))
                .sum()
        };

        let summary = TrackSummary {
            session: self.id,
            version,
            time_range: range,
            observations: store.len(),
            median_object_size: store.median_size(),
            events,
            mergers,
            resolved,
            graph_rebuilt,
            graph_builds: graphs.builds(),
            changed: diff.changed.into_iter().collect(),
            invalidated_blocks: invalidated,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            session = %self.id,
            version,
            events,
            mergers,
            resolved,
            graph_rebuilt,
            "tracking committed"
        );
        Ok(summary)
    }

    fn validate(&self, request: &TrackRequest) -> Result<(), TrackingError> {
        let range = request.time_range;
        let frames = self.labels.shape()[0];
        if range.is_empty() {
            return Err(TrackingError::invalid(format!(
                "time range {}..={} is empty",
                range.first, range.last
            )));
        }
        if range.last as usize >= frames {
            return Err(TrackingError::invalid(format!(
                "time range ends at {} but the volume has {frames} frames",
                range.last
            )));
        }
        Ok(())
    }

    /// Tracked-label volume for `roi`.
    pub fn read_output(&self, roi: &Roi) -> Result<LabelArray, EnvError> {
        let state = self.snapshot();
        RegionDispatcher::new(&self.labels, &state).output(roi)
    }

    /// Merger highlight volume for `roi`, served through the blockwise cache.
    pub fn read_merger_output(&self, roi: &Roi) -> Result<LabelArray, EnvError> {
        // held across the cache read so a commit cannot interleave with block computation
        let state = self.read_state();
        let dispatcher = RegionDispatcher::new(&self.labels, &state);
        self.merger_cache
            .read(roi, |block| dispatcher.merger_output(block))
    }

    /// Drops all accumulated merger coordinates.
    pub fn reset_coordinates(&self) {
        let _guard = self.graphs();
        let mut state = self.write_state();
        let mut next = CommittedState::clone(&state);
        let dropped = next.coordinates.len();
        next.coordinates.clear();
        next.version += 1;
        *state = Arc::new(next);
        info!(session = %self.id, dropped, "merger coordinates reset");
    }

    /// Replaces the committed state, e.g. with one loaded from a project file.
    ///
    /// The hypothesis graph is dropped so the next `track()` rebuilds it.
    pub fn restore_state(&self, restored: CommittedState) {
        let mut graphs = self.graphs();
        graphs.teardown();
        let mut state = self.write_state();
        *state = Arc::new(restored);
        self.merger_cache.invalidate_all();
        info!(session = %self.id, version = state.version, "committed state restored");
    }

    pub fn merger_cache(&self) -> &BlockwiseCache {
        &self.merger_cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.merger_cache.stats()
    }

    /// Clean merger-cache blocks, tagged with the committed version.
    pub fn save_merger_cache(&self) -> Result<Vec<u8>, EnvError> {
        let _guard = self.graphs();
        let saved = SavedMergerCache {
            version: self.read_state().version,
            blocks: self.merger_cache.serialize_clean_blocks()?,
        };
        rmp_serde::to_vec(&saved).map_err(EnvError::serialization)
    }

    /// Restores blocks saved by [`save_merger_cache`](Self::save_merger_cache).
    ///
    /// # Errors
    /// * `EnvError::VersionMismatch` - the blob was saved for another commit
    pub fn restore_merger_cache(&self, blob: &[u8]) -> Result<usize, EnvError> {
        let _guard = self.graphs();
        let saved: SavedMergerCache = rmp_serde::from_slice(blob).map_err(EnvError::serialization)?;
        let current = self.read_state().version;
        if saved.version != current {
            return Err(EnvError::VersionMismatch {
                stored: saved.version,
                current,
            });
        }
        self.merger_cache.restore(&saved.blocks)
    }
}

#[derive(Serialize, Deserialize)]
struct SavedMergerCache {
    version: u64,
    blocks: Vec<u8>,
}

/// Timesteps whose merger highlight differs between two states.
fn highlight_changes(previous: &CommittedState, next: &CommittedState, frames: usize) -> Vec<Timestep> {
    let highlight = |state: &CommittedState, t: Timestep| -> Option<BTreeMap<u32, u32>> {
        if !state.is_tracked(t) {
            return None;
        }
        state.mergers.frame(t).filter(|m| !m.is_empty()).cloned()
    };
    (0..frames as Timestep)
        .filter(|&t| highlight(previous, t) != highlight(next, t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::TrackingParameters;
    use crate::test_support::{blob_features, blob_labels, blob_request, blob_volume, FakeSolver, BLOB_SHAPE};
    use lineage_env::{InMemoryLabels, SolverError, VolumeFeatures};

    type Session = TrackingSession<FakeSolver, VolumeFeatures, InMemoryLabels>;

    fn session() -> Session {
        TrackingSession::new(FakeSolver::new(), blob_features(), blob_labels(), SessionConfig::default())
    }

    fn with_params(f: impl FnOnce(&mut TrackingParameters)) -> TrackRequest {
        let mut request = blob_request();
        f(&mut request.parameters);
        request
    }

    #[test]
    fn test_identical_retrack_reuses_graph() {
        let session = session();
        let first = session.track(&blob_request()).unwrap();
        let events = session.snapshot().events.clone();
        let second = session.track(&blob_request()).unwrap();

        assert!(first.graph_rebuilt);
        assert!(!second.graph_rebuilt);
        assert!(second.changed.is_empty());
        assert_eq!(session.snapshot().events, events);
        assert_eq!(session.graph_builds(), 1);
        assert_eq!(session.solver().builds(), 1);
        assert_eq!(session.solver().tracks(), 2);
    }

    #[test]
    fn test_topology_change_rebuilds_weight_change_does_not() {
        let session = session();
        session.track(&blob_request()).unwrap();

        let retuned = session.track(&with_params(|p| p.trans_weight = 3.0)).unwrap();
        assert!(!retuned.graph_rebuilt);
        assert_eq!(retuned.changed, vec![ParameterKey::TransWeight]);
        assert_eq!(session.solver().last_weights().unwrap().transition_weight, 3.0);
        assert_eq!(session.graph_builds(), 1);

        let rebuilt = session.track(&with_params(|p| p.max_obj = 3)).unwrap();
        assert!(rebuilt.graph_rebuilt);
        assert_eq!(session.graph_builds(), 2);

        let forced = session.track(&with_params(|p| p.max_obj = 3).force_rebuild()).unwrap();
        assert!(forced.graph_rebuilt);
        assert_eq!(session.graph_builds(), 3);
    }

    #[test]
    fn test_merger_split_round_trip() {
        let session = session();
        let summary = session.track(&blob_request()).unwrap();
        assert_eq!(summary.mergers, 1);
        assert_eq!(summary.resolved, 1);

        let state = session.snapshot();
        let new_ids = state.resolved.frame(1).unwrap().get(&1).unwrap().clone();
        assert_eq!(new_ids.len(), 2);

        let out = session.read_output(&Roi::frame(1, BLOB_SHAPE)).unwrap();
        let left = state.colors.color(1, new_ids[0]);
        let right = state.colors.color(1, new_ids[1]);
        assert_ne!(left, right);
        for x in [1, 2] {
            for y in [1, 2] {
                assert_eq!(out.get([0, x, y, 0, 0]), left);
                assert_eq!(out.get([0, x + 4, y, 0, 0]), right);
            }
        }
    }

    #[test]
    fn test_split_ids_skip_labels_of_filtered_objects() {
        // a 9-pixel object next to the merger falls outside the size range
        let mut volume = blob_volume();
        for x in 4..7 {
            for y in 3..6 {
                volume.set([1, x, y, 0, 0], 3);
            }
        }
        let session = TrackingSession::new(
            FakeSolver::new(),
            VolumeFeatures::from_labels(&volume),
            InMemoryLabels::new(volume),
            SessionConfig::default(),
        );
        session.track(&blob_request().with_size_range(0, 9)).unwrap();

        let state = session.snapshot();
        let new_ids = state.resolved.frame(1).unwrap().get(&1).unwrap().clone();
        assert_eq!(new_ids, vec![4, 5]);

        let out = session.read_output(&Roi::frame(1, BLOB_SHAPE)).unwrap();
        for x in 4..7 {
            for y in 3..6 {
                assert_eq!(out.get([0, x, y, 0, 0]), 3, "filtered object recolored at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_output_composition() {
        let session = session();
        session.track(&blob_request()).unwrap();
        let raw = blob_volume();
        let out = session.read_output(&Roi::full(BLOB_SHAPE)).unwrap();

        for (i, (o, r)) in out.iter().zip(raw.iter()).enumerate() {
            if *r == 0 {
                assert_eq!(*o, 0, "background changed at {i}");
            } else {
                assert_ne!(*o, 0, "object lost at {i}");
            }
        }
        assert_eq!(out.extract(&Roi::frame(0, BLOB_SHAPE)), raw.extract(&Roi::frame(0, BLOB_SHAPE)));
    }

    #[test]
    fn test_failed_resolve_leaves_state_untouched() {
        let session = session();
        session.track(&blob_request()).unwrap();
        let before = session.snapshot().to_json().unwrap();

        session.solver().fail_next_resolve(SolverError::Infeasible("no split".into()));
        let result = session.track(&with_params(|p| p.max_obj = 4));
        assert_eq!(result, Err(TrackingError::Infeasible("no split".into())));
        assert_eq!(session.snapshot().to_json().unwrap(), before);

        // the graph built for the failed call was discarded
        assert_eq!(session.graph_builds(), 2);
        let again = session.track(&blob_request()).unwrap();
        assert!(!again.graph_rebuilt);
        assert_eq!(session.graph_builds(), 2);
    }

    #[test]
    fn test_failed_track_is_not_committed() {
        let session = session();
        session.solver().fail_next_track(SolverError::Timeout(std::time::Duration::from_secs(1)));
        assert!(matches!(session.track(&blob_request()), Err(TrackingError::Timeout(_))));
        assert_eq!(session.snapshot().version, 0);
        assert_eq!(session.read_output(&Roi::full(BLOB_SHAPE)).unwrap(), blob_volume());
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut volume = blob_volume();
        volume.clear_frame(2);
        let session = TrackingSession::new(
            FakeSolver::new(),
            VolumeFeatures::from_labels(&volume),
            InMemoryLabels::new(volume),
            SessionConfig::default(),
        );
        assert_eq!(
            session.track(&blob_request()),
            Err(TrackingError::EmptyFrame { timestep: 2 })
        );
        assert_eq!(session.snapshot().version, 0);
        assert_eq!(session.solver().builds(), 0);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let session = session();
        let mut request = blob_request();
        request.time_range = TimeRange::new(1, 3);
        assert!(matches!(session.track(&request), Err(TrackingError::InvalidRequest(_))));
        request.time_range = TimeRange::new(2, 1);
        assert!(matches!(session.track(&request), Err(TrackingError::InvalidRequest(_))));
    }

    #[test]
    fn test_classifier_not_ready() {
        let session = session();
        let request = with_params(|p| p.with_classifier_prior = true);
        assert!(matches!(session.track(&request), Err(TrackingError::NotReady(_))));
    }

    #[test]
    fn test_merger_output_out_of_range_is_zero() {
        let session = session();
        session.track(&blob_request()).unwrap();
        let frame1 = Roi::frame(1, BLOB_SHAPE);
        assert_eq!(session.read_merger_output(&frame1).unwrap().count_nonzero(), 8);

        let mut narrowed = blob_request();
        narrowed.time_range = TimeRange::new(0, 0);
        let summary = session.track(&narrowed).unwrap();
        assert_eq!(summary.invalidated_blocks, 1);
        assert_eq!(session.read_merger_output(&frame1).unwrap().count_nonzero(), 0);
        assert_eq!(session.read_output(&frame1).unwrap(), blob_volume().extract(&frame1));
    }

    #[test]
    fn test_concurrent_reads_compute_blocks_once() {
        let session = session();
        session.track(&blob_request()).unwrap();
        let full = Roi::full(BLOB_SHAPE);

        std::thread::scope(|scope| {
            for i in 0..8 {
                let session = &session;
                scope.spawn(move || {
                    let roi = if i % 2 == 0 { full } else { Roi::frame(i % 3, BLOB_SHAPE) };
                    session.read_merger_output(&roi).unwrap();
                    session.read_output(&roi).unwrap();
                });
            }
        });

        let stats = session.cache_stats();
        assert_eq!(stats.computations, 3);
        assert_eq!(stats.blocks_clean, 3);
    }

    #[test]
    fn test_concurrent_track_calls_are_serialized() {
        let session = session();
        std::thread::scope(|scope| {
            let a = scope.spawn(|| session.track(&blob_request()));
            let b = scope.spawn(|| session.track(&blob_request()));
            assert!(a.join().unwrap().is_ok());
            assert!(b.join().unwrap().is_ok());
        });
        assert_eq!(session.snapshot().version, 2);
        assert_eq!(session.solver().builds(), 1);
    }

    #[test]
    fn test_reset_coordinates_skips_relabeling() {
        let session = session();
        session.track(&blob_request()).unwrap();
        session.reset_coordinates();
        assert!(session.snapshot().coordinates.is_empty());

        let frame1 = Roi::frame(1, BLOB_SHAPE);
        assert_eq!(session.read_output(&frame1).unwrap(), blob_volume().extract(&frame1));
    }

    #[test]
    fn test_restore_state_and_cache() {
        let session = session();
        session.track(&blob_request()).unwrap();
        let full = Roi::full(BLOB_SHAPE);
        let expected = session.read_merger_output(&full).unwrap();
        let json = session.snapshot().to_json().unwrap();
        let blob = session.save_merger_cache().unwrap();

        let reopened = self::session();
        let state: CommittedState = serde_json::from_str(&json).unwrap();
        reopened.restore_state(state);
        assert_eq!(reopened.restore_merger_cache(&blob).unwrap(), 3);
        assert_eq!(reopened.read_merger_output(&full).unwrap(), expected);
        assert_eq!(reopened.cache_stats().computations, 0);
        assert_eq!(reopened.read_output(&full).unwrap(), session.read_output(&full).unwrap());
    }

    #[test]
    fn test_cache_blob_of_other_commit_is_rejected() {
        let session = session();
        session.track(&blob_request()).unwrap();
        session.read_merger_output(&Roi::full(BLOB_SHAPE)).unwrap();
        let blob = session.save_merger_cache().unwrap();

        let fresh = self::session();
        assert_eq!(
            fresh.restore_merger_cache(&blob),
            Err(EnvError::VersionMismatch { stored: 1, current: 0 })
        );
        assert!(fresh.merger_cache().clean_blocks().is_empty());

        session.track(&with_params(|p| p.max_obj = 3)).unwrap();
        assert_eq!(
            session.restore_merger_cache(&blob),
            Err(EnvError::VersionMismatch { stored: 1, current: 2 })
        );
    }

    #[test]
    fn test_without_merger_resolution() {
        let session = session();
        let summary = session.track(&with_params(|p| p.with_merger_resolution = false)).unwrap();
        assert_eq!(summary.mergers, 1);
        assert_eq!(summary.resolved, 0);
        assert_eq!(session.solver().resolves(), 0);
        assert!(session.snapshot().coordinates.is_empty());
        assert_eq!(
            session.read_merger_output(&Roi::frame(1, BLOB_SHAPE)).unwrap().count_nonzero(),
            8
        );
    }
}
