//! Greedy reference solver.
//!
//! A deterministic stand-in for the production conservation tracker:
//! - Object counts from the size model (or the count classifier)
//! - Nearest-neighbor transitions inside `max_distance`, cheapest first
//! - Divisions for objects flagged by the division classifier
//! - K-means splitting of merged regions, handing lineage to the parts

use lineage_env::{
    CoordinateMap, Event, EventSequence, FieldOfView, GraphParameters, MergerWeights, ObjectId,
    Observation, ObservationStore, PixelCoordinates, SolverError, Timestep, TrackWeights,
    TrackingSolver,
};
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Candidate transition between consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub from: ObjectId,
    pub to: ObjectId,
    pub distance: f64,
}

/// Hypothesis graph of the greedy solver.
#[derive(Debug, Clone)]
pub struct GreedyGraph {
    store: ObservationStore,
    params: GraphParameters,

    /// Candidates into frame `t`, sorted by distance
    candidates: BTreeMap<Timestep, Vec<Candidate>>,
}

impl GreedyGraph {
    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn params(&self) -> &GraphParameters {
        &self.params
    }

    pub fn candidates(&self, t: Timestep) -> &[Candidate] {
        self.candidates.get(&t).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.values().map(Vec::len).sum()
    }

    fn object_count(&self, obs: &Observation) -> u32 {
        let max = self.params.max_objects.max(1);
        if let Some(probabilities) = &obs.class_probabilities {
            let best = probabilities
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i as u32)
                .unwrap_or(1);
            return best.clamp(1, max);
        }
        let median = self.params.median_object_size;
        if self.params.size_dependent && median > 0.0 {
            ((obs.size as f64 / median).round() as u32).clamp(1, max)
        } else {
            1
        }
    }

    fn divides(&self, obs: &Observation) -> bool {
        self.params.with_divisions
            && obs
                .division_probability
                .is_some_and(|p| p >= self.params.division_threshold)
    }
}

/// Greedy nearest-neighbor tracker with k-means merger resolution.
#[derive(Debug, Clone)]
pub struct GreedySolver {
    /// Lloyd iterations per merger split
    kmeans_iterations: usize,
}

impl Default for GreedySolver {
    fn default() -> Self {
        Self { kmeans_iterations: 20 }
    }
}

impl GreedySolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kmeans_iterations(mut self, iterations: usize) -> Self {
        self.kmeans_iterations = iterations.max(1);
        self
    }
}

fn check_deadline(started: Instant, timeout: Option<Duration>) -> Result<(), SolverError> {
    match timeout {
        Some(limit) if started.elapsed() >= limit => Err(SolverError::Timeout(limit)),
        _ => Ok(()),
    }
}

impl TrackingSolver for GreedySolver {
    type Graph = GreedyGraph;

    fn build_graph(
        &self,
        store: &ObservationStore,
        params: &GraphParameters,
        fov: &FieldOfView,
    ) -> Result<GreedyGraph, SolverError> {
        if store.is_empty() {
            return Err(SolverError::Infeasible("no observations to build a graph from".into()));
        }

        let inside = |o: &&Observation| fov.contains(o.timestep as f64, &o.center);
        let mut candidates = BTreeMap::new();
        let timesteps: Vec<Timestep> = store.timesteps().collect();
        for pair in timesteps.windows(2) {
            let (prev, t) = (pair[0], pair[1]);
            let mut arcs = Vec::new();
            for a in store.frame(prev).iter().filter(inside) {
                for b in store.frame(t).iter().filter(inside) {
                    let distance = (a.center - b.center).norm();
                    if distance <= params.max_distance {
                        arcs.push(Candidate {
                            from: a.id,
                            to: b.id,
                            distance,
                        });
                    }
                }
            }
            arcs.sort_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then(a.from.cmp(&b.from))
                    .then(a.to.cmp(&b.to))
            });
            candidates.insert(t, arcs);
        }

        let graph = GreedyGraph {
            store: store.clone(),
            params: params.clone(),
            candidates,
        };
        debug!(
            observations = store.len(),
            candidates = graph.candidate_count(),
            "greedy graph built"
        );
        Ok(graph)
    }

    fn track(&self, graph: &mut GreedyGraph, weights: &TrackWeights) -> Result<EventSequence, SolverError> {
        let started = Instant::now();
        let mut events = EventSequence::new();
        let mut previous: Option<Timestep> = None;
        let max_cost = weights.appearance_cost + weights.disappearance_cost;

        for (t, frame) in graph.store.frames() {
            check_deadline(started, weights.timeout)?;
            events.touch(t);
            for obs in frame {
                let count = graph.object_count(obs);
                if count >= 2 {
                    events.push(t, Event::Merger { id: obs.id, count });
                }
            }

            let Some(prev) = previous else {
                for obs in frame {
                    events.push(t, Event::Appearance { id: obs.id });
                }
                previous = Some(t);
                continue;
            };

            let mut out_capacity: BTreeMap<ObjectId, u32> = graph
                .store
                .frame(prev)
                .iter()
                .map(|o| (o.id, graph.object_count(o) + u32::from(graph.divides(o))))
                .collect();
            let mut in_capacity: BTreeMap<ObjectId, u32> =
                frame.iter().map(|o| (o.id, graph.object_count(o))).collect();
            let mut links: BTreeMap<ObjectId, Vec<ObjectId>> = BTreeMap::new();

            for arc in graph.candidates(t) {
                if weights.transition_weight * arc.distance > max_cost {
                    continue;
                }
                let (Some(out), Some(inn)) = (out_capacity.get_mut(&arc.from), in_capacity.get_mut(&arc.to)) else {
                    continue;
                };
                // one link per pair
                if *out == 0 || *inn == 0 || links.get(&arc.from).is_some_and(|tos| tos.contains(&arc.to)) {
                    continue;
                }
                *out -= 1;
                *inn -= 1;
                links.entry(arc.from).or_default().push(arc.to);
            }

            let mut linked_to: Vec<ObjectId> = Vec::new();
            for (from, tos) in &links {
                let parent = graph.store.get(prev, *from);
                let is_division = tos.len() == 2
                    && parent.is_some_and(|p| graph.divides(p) && graph.object_count(p) == 1);
                if is_division {
                    let mut children = [tos[0], tos[1]];
                    children.sort_unstable();
                    events.push(t, Event::Division { parent: *from, children });
                } else {
                    for to in tos {
                        events.push(t, Event::Move { from: *from, to: *to });
                    }
                }
                linked_to.extend(tos);
            }
            for obs in frame {
                if !linked_to.contains(&obs.id) {
                    events.push(t, Event::Appearance { id: obs.id });
                }
            }
            for obs in graph.store.frame(prev) {
                if !links.contains_key(&obs.id) {
                    events.push(t, Event::Disappearance { id: obs.id });
                }
            }
            previous = Some(t);
        }

        if weights.with_constraints && events.is_empty() {
            return Err(SolverError::Infeasible("no events satisfy the constraints".into()));
        }
        debug!(events = events.len(), elapsed_us = started.elapsed().as_micros() as u64, "greedy track");
        Ok(events)
    }

    fn resolve_mergers(
        &self,
        graph: &mut GreedyGraph,
        events: &EventSequence,
        coordinates: &mut CoordinateMap,
        weights: &MergerWeights,
    ) -> Result<EventSequence, SolverError> {
        let started = Instant::now();
        let mut refined = events.clone();
        let mut next_ids: BTreeMap<Timestep, ObjectId> = BTreeMap::new();
        let mut positions = Positions {
            store: &graph.store,
            parts: BTreeMap::new(),
        };

        for (t, id, count) in events.mergers() {
            check_deadline(started, weights.timeout)?;
            let Some(pixels) = coordinates.get(t, id) else {
                warn!(t, id, "merger without coordinates, left unresolved");
                continue;
            };
            if pixels.len() < count as usize {
                warn!(t, id, pixels = pixels.len(), count, "merger too small to split");
                continue;
            }

            let parts = kmeans(pixels, count as usize, self.kmeans_iterations);
            let next = next_ids.entry(t).or_insert_with(|| graph.store.max_id(t) + 1);
            let mut new_ids = Vec::with_capacity(parts.len());
            let mut centers = Vec::with_capacity(parts.len());
            for part in parts {
                let new_id = *next;
                *next += 1;
                let center = centroid3(&part);
                positions.parts.insert((t, new_id), center);
                centers.push((new_id, center, 1));
                coordinates.insert(t, new_id, part);
                new_ids.push(new_id);
            }

            // moves into and out of the merger are rewired to its nearest parts
            if let Some(prev) = graph.store.timesteps().take_while(|p| *p < t).last() {
                let sources: Vec<_> = moves_into(&refined, t, id)
                    .into_iter()
                    .filter_map(|from| positions.get(prev, from).map(|p| (from, p, 1)))
                    .collect();
                for (from, part) in match_nearest(&sources, &centers) {
                    rewire(&mut refined, t, (from, id), &[(from, part)]);
                }
            }
            if let Some(next) = graph.store.timesteps().find(|n| *n > t) {
                let targets: Vec<_> = moves_out_of(&refined, next, id)
                    .into_iter()
                    .filter_map(|to| {
                        let capacity = merger_count(events, next, to).unwrap_or(1);
                        positions.get(next, to).map(|p| (to, p, capacity))
                    })
                    .collect();
                let matched = match_nearest(&centers, &targets);
                for (to, _, _) in &targets {
                    let handed: Vec<_> = matched.iter().copied().filter(|(_, m)| m == to).collect();
                    if !handed.is_empty() {
                        rewire(&mut refined, next, (id, *to), &handed);
                    }
                }
            }

            debug!(t, id, new_ids = ?new_ids, "merger split");
            refined.push(t, Event::ResolvedTo { id, new_ids });
        }
        Ok(refined)
    }
}

/// Pixel-space positions of observations and of the parts split off mergers.
struct Positions<'a> {
    store: &'a ObservationStore,
    parts: BTreeMap<(Timestep, ObjectId), Vector3<f64>>,
}

impl Positions<'_> {
    fn get(&self, t: Timestep, id: ObjectId) -> Option<Vector3<f64>> {
        self.parts
            .get(&(t, id))
            .copied()
            .or_else(|| self.store.get(t, id).map(box_center))
    }
}

fn moves_into(events: &EventSequence, t: Timestep, id: ObjectId) -> Vec<ObjectId> {
    events
        .frame(t)
        .iter()
        .filter_map(|e| match e {
            Event::Move { from, to } if *to == id => Some(*from),
            _ => None,
        })
        .collect()
}

fn moves_out_of(events: &EventSequence, t: Timestep, id: ObjectId) -> Vec<ObjectId> {
    events
        .frame(t)
        .iter()
        .filter_map(|e| match e {
            Event::Move { from, to } if *from == id => Some(*to),
            _ => None,
        })
        .collect()
}

fn merger_count(events: &EventSequence, t: Timestep, id: ObjectId) -> Option<u32> {
    events.frame(t).iter().find_map(|e| match e {
        Event::Merger { id: m, count } if *m == id => Some(*count),
        _ => None,
    })
}

/// Replaces the move `old` at `t` by `new` moves.
fn rewire(events: &mut EventSequence, t: Timestep, old: (ObjectId, ObjectId), new: &[(ObjectId, ObjectId)]) {
    let frame = events.frame_mut(t);
    frame.retain(|e| *e != Event::Move { from: old.0, to: old.1 });
    frame.extend(new.iter().map(|&(from, to)| Event::Move { from, to }));
}

/// Globally greedy nearest pairing of `sources` to `targets` under capacities.
fn match_nearest(
    sources: &[(ObjectId, Vector3<f64>, u32)],
    targets: &[(ObjectId, Vector3<f64>, u32)],
) -> Vec<(ObjectId, ObjectId)> {
    let mut pairs: Vec<(f64, usize, usize)> = sources
        .iter()
        .enumerate()
        .flat_map(|(i, s)| targets.iter().enumerate().map(move |(j, t)| ((s.1 - t.1).norm(), i, j)))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut source_left: Vec<u32> = sources.iter().map(|s| s.2).collect();
    let mut target_left: Vec<u32> = targets.iter().map(|t| t.2).collect();
    let mut matched = Vec::new();
    for (_, i, j) in pairs {
        if source_left[i] > 0 && target_left[j] > 0 {
            source_left[i] -= 1;
            target_left[j] -= 1;
            matched.push((sources[i].0, targets[j].0));
        }
    }
    matched
}

/// Pixel-space center of an observation's bounding box.
fn box_center(obs: &Observation) -> Vector3<f64> {
    Vector3::new(
        (obs.lower[0] + obs.upper[0]) as f64 / 2.0,
        (obs.lower[1] + obs.upper[1]) as f64 / 2.0,
        (obs.lower[2] + obs.upper[2]) as f64 / 2.0,
    )
}

fn centroid3(pixels: &PixelCoordinates) -> Vector3<f64> {
    let c = pixels.centroid().unwrap_or_default();
    Vector3::new(
        c.first().copied().unwrap_or(0.0),
        c.get(1).copied().unwrap_or(0.0),
        c.get(2).copied().unwrap_or(0.0),
    )
}

fn point(coord: &[i64]) -> Vector3<f64> {
    Vector3::new(
        coord.first().copied().unwrap_or(0) as f64,
        coord.get(1).copied().unwrap_or(0) as f64,
        coord.get(2).copied().unwrap_or(0) as f64,
    )
}

/// Deterministic k-means: farthest-point seeding, then Lloyd iterations.
///
/// Returns `k` non-empty parts ordered by their first pixel.
fn kmeans(pixels: &PixelCoordinates, k: usize, iterations: usize) -> Vec<PixelCoordinates> {
    let points: Vec<Vector3<f64>> = pixels.iter().map(point).collect();
    let mut centers = vec![points[0]];
    while centers.len() < k {
        let farthest = points
            .iter()
            .map(|p| {
                centers
                    .iter()
                    .map(|c| (p - c).norm_squared())
                    .fold(f64::INFINITY, f64::min)
            })
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        centers.push(points[farthest]);
    }

    let mut assignment = vec![usize::MAX; points.len()];
    for _ in 0..iterations {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|a, b| (p - a.1).norm_squared().total_cmp(&(p - b.1).norm_squared()))
                .map(|(c, _)| c)
                .unwrap_or(0);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<&Vector3<f64>> =
                points.iter().zip(&assignment).filter(|(_, a)| **a == c).map(|(p, _)| p).collect();
            if !members.is_empty() {
                *center = members.iter().fold(Vector3::zeros(), |acc, p| acc + *p) / members.len() as f64;
            }
        }
    }

    let mut parts: Vec<PixelCoordinates> = (0..k)
        .map(|_| PixelCoordinates::with_capacity(pixels.ndim(), pixels.len() / k + 1))
        .collect();
    for (coord, c) in pixels.iter().zip(&assignment) {
        parts[*c].push(coord);
    }
    parts.retain(|p| !p.is_empty());
    parts.sort_by(|a, b| a.iter().next().cmp(&b.iter().next()));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obs(t: Timestep, id: ObjectId, x: f64, size: u64) -> Observation {
        Observation {
            timestep: t,
            id,
            center: Vector3::new(x, 5.0, 0.0),
            lower: [x as i64 - 1, 4, 0],
            upper: [x as i64 + 1, 6, 0],
            size,
            class_probabilities: None,
            division_probability: None,
        }
    }

    fn params() -> GraphParameters {
        GraphParameters {
            max_objects: 2,
            size_dependent: true,
            median_object_size: 10.0,
            max_distance: 5.0,
            with_divisions: true,
            division_threshold: 0.5,
        }
    }

    fn fov() -> FieldOfView {
        FieldOfView {
            t_start: 0.0,
            lower: [0.0; 3],
            t_stop: 10.0,
            upper: [100.0, 100.0, 0.0],
        }
    }

    fn track_weights() -> TrackWeights {
        TrackWeights {
            forbidden_cost: 0.0,
            ep_gap: 0.05,
            with_tracklets: false,
            division_weight: 10.0,
            transition_weight: 10.0,
            disappearance_cost: 500.0,
            appearance_cost: 500.0,
            ndim: 2,
            transition_parameter: 5.0,
            border_aware_width: 0.0,
            with_constraints: true,
            timeout: None,
        }
    }

    fn merger_weights() -> MergerWeights {
        MergerWeights {
            ep_gap: 0.05,
            transition_weight: 10.0,
            with_tracklets: false,
            ndim: 2,
            transition_parameter: 5.0,
            with_constraints: true,
            with_multi_frame_moves: false,
            timeout: None,
        }
    }

    fn store(frames: Vec<Vec<Observation>>) -> ObservationStore {
        let frames = frames
            .into_iter()
            .enumerate()
            .map(|(t, f)| (t as Timestep, f))
            .collect();
        ObservationStore::new(frames, 2)
    }

    #[test]
    fn test_nearest_neighbor_moves_and_appearance() {
        let solver = GreedySolver::new();
        let store = store(vec![
            vec![obs(0, 1, 10.0, 10), obs(0, 2, 30.0, 10)],
            vec![obs(1, 1, 31.0, 10), obs(1, 2, 12.0, 10), obs(1, 3, 60.0, 10)],
        ]);
        let mut graph = solver.build_graph(&store, &params(), &fov()).unwrap();
        let events = solver.track(&mut graph, &track_weights()).unwrap();

        let frame1 = events.frame(1);
        assert!(frame1.contains(&Event::Move { from: 1, to: 2 }));
        assert!(frame1.contains(&Event::Move { from: 2, to: 1 }));
        assert!(frame1.contains(&Event::Appearance { id: 3 }));
        assert_eq!(events.frame(0).len(), 2);
    }

    #[test]
    fn test_two_objects_move_into_merger() {
        let solver = GreedySolver::new();
        let store = store(vec![
            vec![obs(0, 1, 10.0, 10), obs(0, 2, 14.0, 10)],
            vec![obs(1, 1, 12.0, 20)],
        ]);
        let mut graph = solver.build_graph(&store, &params(), &fov()).unwrap();
        let events = solver.track(&mut graph, &track_weights()).unwrap();
        let frame1 = events.frame(1);
        assert!(frame1.contains(&Event::Merger { id: 1, count: 2 }));
        assert!(frame1.contains(&Event::Move { from: 1, to: 1 }));
        assert!(frame1.contains(&Event::Move { from: 2, to: 1 }));
        assert!(!frame1.iter().any(|e| matches!(e, Event::Disappearance { .. })));
    }

    #[test]
    fn test_division_needs_classifier_flag() {
        let solver = GreedySolver::new();
        let mut mother = obs(0, 1, 20.0, 10);
        mother.division_probability = Some(0.9);
        let frames = vec![vec![mother], vec![obs(1, 1, 18.0, 10), obs(1, 2, 22.0, 10)]];
        let mut graph = solver.build_graph(&store(frames.clone()), &params(), &fov()).unwrap();
        let events = solver.track(&mut graph, &track_weights()).unwrap();
        assert!(events.frame(1).contains(&Event::Division { parent: 1, children: [1, 2] }));

        let mut no_divisions = params();
        no_divisions.with_divisions = false;
        let mut graph = solver.build_graph(&store(frames), &no_divisions, &fov()).unwrap();
        let events = solver.track(&mut graph, &track_weights()).unwrap();
        assert!(events.frame(1).contains(&Event::Appearance { id: 2 }));
    }

    #[test]
    fn test_outside_field_of_view_has_no_candidates() {
        let solver = GreedySolver::new();
        let store = store(vec![vec![obs(0, 1, 10.0, 10)], vec![obs(1, 1, 11.0, 10)]]);
        let narrow = FieldOfView {
            upper: [5.0, 100.0, 0.0],
            ..fov()
        };
        let graph = solver.build_graph(&store, &params(), &narrow).unwrap();
        assert_eq!(graph.candidate_count(), 0);
    }

    #[test]
    fn test_empty_store_is_infeasible() {
        let solver = GreedySolver::new();
        let empty = ObservationStore::new(BTreeMap::new(), 2);
        assert!(matches!(
            solver.build_graph(&empty, &params(), &fov()),
            Err(SolverError::Infeasible(_))
        ));
    }

    #[test]
    fn test_timeout_is_reported() {
        let solver = GreedySolver::new();
        let store = store(vec![vec![obs(0, 1, 10.0, 10)]]);
        let mut graph = solver.build_graph(&store, &params(), &fov()).unwrap();
        let mut weights = track_weights();
        weights.timeout = Some(Duration::ZERO);
        assert_eq!(
            solver.track(&mut graph, &weights),
            Err(SolverError::Timeout(Duration::ZERO))
        );
    }

    #[test]
    fn test_kmeans_splits_two_blobs_and_hands_over_lineage() {
        let solver = GreedySolver::new();
        let store = store(vec![
            vec![obs(0, 1, 2.0, 10), obs(0, 2, 8.0, 10)],
            vec![obs(1, 1, 5.0, 20)],
        ]);
        let mut graph = solver.build_graph(&store, &params(), &fov()).unwrap();
        let events = solver.track(&mut graph, &track_weights()).unwrap();

        let mut pixels = PixelCoordinates::new(2);
        for x in [1, 2, 3, 7, 8, 9] {
            for y in [4, 5] {
                pixels.push(&[x, y]);
            }
        }
        let mut coordinates = CoordinateMap::new();
        coordinates.insert(1, 1, pixels);

        let refined = solver
            .resolve_mergers(&mut graph, &events, &mut coordinates, &merger_weights())
            .unwrap();
        let frame1 = refined.frame(1);
        assert!(frame1.contains(&Event::ResolvedTo { id: 1, new_ids: vec![2, 3] }));
        assert!(frame1.contains(&Event::Move { from: 1, to: 2 }));
        assert!(frame1.contains(&Event::Move { from: 2, to: 3 }));
        assert!(!frame1.contains(&Event::Move { from: 1, to: 1 }));
        assert!(coordinates.get(1, 2).unwrap().iter().all(|c| c[0] <= 3));
        assert!(coordinates.get(1, 3).unwrap().iter().all(|c| c[0] >= 7));
    }

    #[test]
    fn test_parts_continue_after_merger() {
        let solver = GreedySolver::new();
        let store = store(vec![
            vec![obs(0, 1, 2.0, 10), obs(0, 2, 8.0, 10)],
            vec![obs(1, 1, 5.0, 20)],
            vec![obs(2, 1, 2.0, 10), obs(2, 2, 8.0, 10)],
        ]);
        let mut graph = solver.build_graph(&store, &params(), &fov()).unwrap();
        let events = solver.track(&mut graph, &track_weights()).unwrap();
        assert!(events.frame(2).contains(&Event::Move { from: 1, to: 2 }));

        let mut pixels = PixelCoordinates::new(2);
        for x in [1, 2, 3, 7, 8, 9] {
            pixels.push(&[x, 5]);
        }
        let mut coordinates = CoordinateMap::new();
        coordinates.insert(1, 1, pixels);
        let refined = solver
            .resolve_mergers(&mut graph, &events, &mut coordinates, &merger_weights())
            .unwrap();

        let frame2 = refined.frame(2);
        assert!(frame2.contains(&Event::Move { from: 2, to: 1 }));
        assert!(frame2.contains(&Event::Move { from: 3, to: 2 }));
        assert!(!frame2.iter().any(|e| matches!(e, Event::Move { from: 1, .. })));
    }

    #[test]
    fn test_merger_without_coordinates_is_left_alone() {
        let solver = GreedySolver::new();
        let store = store(vec![vec![obs(0, 1, 5.0, 20)]]);
        let mut graph = solver.build_graph(&store, &params(), &fov()).unwrap();
        let events = solver.track(&mut graph, &track_weights()).unwrap();
        let refined = solver
            .resolve_mergers(&mut graph, &events, &mut CoordinateMap::new(), &merger_weights())
            .unwrap();
        assert_eq!(refined, events);
    }

    proptest! {
        #[test]
        fn prop_kmeans_partitions_pixels(
            xs in proptest::collection::vec((0i64..20, 0i64..20), 2..60),
            k in 1usize..4,
        ) {
            let mut pixels = PixelCoordinates::new(2);
            for (x, y) in &xs {
                pixels.push(&[*x, *y]);
            }
            let parts = kmeans(&pixels, k, 10);
            prop_assert_eq!(parts.iter().map(PixelCoordinates::len).sum::<usize>(), xs.len());
            prop_assert!(parts.len() <= k);
            prop_assert!(parts.iter().all(|p| !p.is_empty()));
        }
    }
}
