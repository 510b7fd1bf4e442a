//! Shared fixtures: a tiny three-frame blob volume and a scripted solver.
//!
//! ```text
//!   t=0            t=1 (merged)     t=2
//!   . . . . . .    . . . . . .      same as t=0
//!   . 1 1 . 3 3    . 1 1 . 2 2
//!   . 1 1 . 3 3    . 1 1 . 2 2
//!   . . . . . .    . . . . . .
//!   . . . . . .    . . . . . .
//!   . 2 2 . . .    . 1 1 . . .
//!   . 2 2 . . .    . 1 1 . . .
//!   . . . . . .    . . . . . .
//! ```
//! (rows are x, columns are y)

use lineage_env::{
    CoordinateMap, Event, EventSequence, FieldOfView, GraphParameters, InMemoryLabels, LabelArray,
    MergerWeights, ObservationStore, PixelCoordinates, SolverError, TimeRange, TrackWeights,
    TrackingSolver, VolumeFeatures,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::parameters::TrackRequest;

pub const BLOB_SHAPE: [usize; 5] = [3, 8, 6, 1, 1];

fn square(volume: &mut LabelArray, t: usize, xs: [usize; 2], ys: [usize; 2], id: u32) {
    for x in xs {
        for y in ys {
            volume.set([t, x, y, 0, 0], id);
        }
    }
}

/// Three frames; at t=1 objects 1 and 2 of t=0 touch and are labeled as one
/// 8-pixel blob with id 1.
pub fn blob_volume() -> LabelArray {
    let mut volume = LabelArray::zeros(BLOB_SHAPE);
    for t in [0, 2] {
        square(&mut volume, t, [1, 2], [1, 2], 1);
        square(&mut volume, t, [5, 6], [1, 2], 2);
        square(&mut volume, t, [1, 2], [4, 5], 3);
    }
    square(&mut volume, 1, [1, 2], [1, 2], 1);
    square(&mut volume, 1, [5, 6], [1, 2], 1);
    square(&mut volume, 1, [1, 2], [4, 5], 2);
    volume
}

pub fn blob_labels() -> InMemoryLabels {
    InMemoryLabels::new(blob_volume())
}

pub fn blob_features() -> VolumeFeatures {
    VolumeFeatures::from_labels(&blob_volume())
}

pub fn blob_request() -> TrackRequest {
    TrackRequest::new(TimeRange::new(0, 2), BLOB_SHAPE)
}

pub fn blob_store() -> ObservationStore {
    crate::observations::build_store(&blob_features(), &blob_request())
        .expect("blob fixture builds")
}

#[derive(Debug, Clone)]
pub struct FakeGraph {
    pub store: ObservationStore,
    pub params: GraphParameters,
    pub fov: FieldOfView,
}

/// Scripted solver: same-id moves, size-based mergers, sorted-pixel splits.
#[derive(Debug, Default)]
pub struct FakeSolver {
    builds: AtomicUsize,
    tracks: AtomicUsize,
    resolves: AtomicUsize,
    empty: bool,
    track_failure: Mutex<Option<SolverError>>,
    resolve_failure: Mutex<Option<SolverError>>,
    last_weights: Mutex<Option<TrackWeights>>,
}

impl FakeSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `track` succeeds with no events at all.
    pub fn returning_empty(mut self) -> Self {
        self.empty = true;
        self
    }

    pub fn failing_track(self, err: SolverError) -> Self {
        self.fail_next_track(err);
        self
    }

    pub fn failing_resolve(self, err: SolverError) -> Self {
        self.fail_next_resolve(err);
        self
    }

    /// The next `track` call fails with `err`.
    pub fn fail_next_track(&self, err: SolverError) {
        *self.track_failure.lock().unwrap() = Some(err);
    }

    /// The next `resolve_mergers` call fails with `err`.
    pub fn fail_next_resolve(&self, err: SolverError) {
        *self.resolve_failure.lock().unwrap() = Some(err);
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn last_weights(&self) -> Option<TrackWeights> {
        self.last_weights.lock().unwrap().clone()
    }
}

impl TrackingSolver for FakeSolver {
    type Graph = FakeGraph;

    fn build_graph(
        &self,
        store: &ObservationStore,
        params: &GraphParameters,
        fov: &FieldOfView,
    ) -> Result<FakeGraph, SolverError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(FakeGraph {
            store: store.clone(),
            params: params.clone(),
            fov: *fov,
        })
    }

    fn track(&self, graph: &mut FakeGraph, weights: &TrackWeights) -> Result<EventSequence, SolverError> {
        self.tracks.fetch_add(1, Ordering::SeqCst);
        *self.last_weights.lock().unwrap() = Some(weights.clone());
        if let Some(err) = self.track_failure.lock().unwrap().take() {
            return Err(err);
        }
        let mut events = EventSequence::new();
        if self.empty {
            return Ok(events);
        }

        let store = &graph.store;
        let median = store.median_size();
        let mut previous: Option<u32> = None;
        for (t, frame) in store.frames() {
            events.touch(t);
            for obs in frame {
                match previous {
                    Some(p) if store.get(p, obs.id).is_some() => {
                        events.push(t, Event::Move { from: obs.id, to: obs.id })
                    }
                    _ => events.push(t, Event::Appearance { id: obs.id }),
                }
                if graph.params.max_objects >= 2 && median > 0.0 && obs.size as f64 >= 1.5 * median {
                    let count = (obs.size as f64 / median).round() as u32;
                    events.push(
                        t,
                        Event::Merger {
                            id: obs.id,
                            count: count.clamp(2, graph.params.max_objects),
                        },
                    );
                }
            }
            if let Some(p) = previous {
                for gone in store.frame(p).iter().filter(|o| store.get(t, o.id).is_none()) {
                    events.push(t, Event::Disappearance { id: gone.id });
                }
            }
            previous = Some(t);
        }
        Ok(events)
    }

    fn resolve_mergers(
        &self,
        graph: &mut FakeGraph,
        events: &EventSequence,
        coordinates: &mut CoordinateMap,
        _weights: &MergerWeights,
    ) -> Result<EventSequence, SolverError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.resolve_failure.lock().unwrap().take() {
            return Err(err);
        }
        let mut refined = events.clone();
        let mut next_ids: BTreeMap<u32, u32> = BTreeMap::new();
        for (t, id, count) in events.mergers() {
            let Some(pixels) = coordinates.get(t, id) else {
                continue;
            };
            let mut sorted: Vec<Vec<i64>> = pixels.iter().map(<[i64]>::to_vec).collect();
            sorted.sort();
            let ndim = pixels.ndim();
            let chunk = sorted.len().div_ceil(count.max(1) as usize).max(1);

            let next = next_ids.entry(t).or_insert_with(|| graph.store.max_id(t) + 1);
            let mut new_ids = Vec::new();
            for part in sorted.chunks(chunk) {
                let mut coords = PixelCoordinates::with_capacity(ndim, part.len());
                for c in part {
                    coords.push(c);
                }
                coordinates.insert(t, *next, coords);
                new_ids.push(*next);
                *next += 1;
            }
            refined.push(t, Event::ResolvedTo { id, new_ids });
        }
        Ok(refined)
    }
}
