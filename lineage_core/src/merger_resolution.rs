//! Merger resolution and the per-timestep maps derived from it.

use crate::error::TrackingError;
use lineage_env::{
    CoordinateMap, Event, EventSequence, MergerWeights, ObjectId, TimeRange, Timestep, TrackingSolver,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-timestep mapping of merged id to the ids it was split into.
///
/// Holds an entry (possibly empty) for every timestep of the tracked range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMapping {
    frames: BTreeMap<Timestep, BTreeMap<ObjectId, Vec<ObjectId>>>,
}

impl ResolvedMapping {
    /// Collects the `ResolvedTo` events of `events` inside `range`.
    pub fn from_events(events: &EventSequence, range: TimeRange) -> Self {
        let mut frames: BTreeMap<_, BTreeMap<_, _>> = range.iter().map(|t| (t, BTreeMap::new())).collect();
        for (t, frame) in events.iter().filter(|(t, _)| range.contains(*t)) {
            for event in frame {
                if let Event::ResolvedTo { id, new_ids } = event {
                    frames.entry(t).or_default().insert(*id, new_ids.clone());
                }
            }
        }
        Self { frames }
    }

    /// Split sets at `t`; `None` if `t` was never covered.
    pub fn frame(&self, t: Timestep) -> Option<&BTreeMap<ObjectId, Vec<ObjectId>>> {
        self.frames.get(&t)
    }

    /// True if at least one merger was resolved at `t`.
    pub fn has_resolution(&self, t: Timestep) -> bool {
        self.frames.get(&t).is_some_and(|ids| !ids.is_empty())
    }

    pub fn clear_timestep(&mut self, t: Timestep) {
        if let Some(ids) = self.frames.get_mut(&t) {
            ids.clear();
        }
    }

    /// Number of resolved mergers over all timesteps.
    pub fn len(&self) -> usize {
        self.frames.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-timestep merger ids and the number of objects each one holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergerMap {
    frames: BTreeMap<Timestep, BTreeMap<ObjectId, u32>>,
}

impl MergerMap {
    pub fn from_events(events: &EventSequence, range: TimeRange) -> Self {
        let mut frames: BTreeMap<_, BTreeMap<_, _>> = range.iter().map(|t| (t, BTreeMap::new())).collect();
        for (t, id, count) in events.mergers().filter(|(t, _, _)| range.contains(*t)) {
            frames.entry(t).or_default().insert(id, count);
        }
        Self { frames }
    }

    pub fn frame(&self, t: Timestep) -> Option<&BTreeMap<ObjectId, u32>> {
        self.frames.get(&t)
    }

    pub fn has_mergers(&self, t: Timestep) -> bool {
        self.frames.get(&t).is_some_and(|ids| !ids.is_empty())
    }

    pub fn clear_timestep(&mut self, t: Timestep) {
        if let Some(ids) = self.frames.get_mut(&t) {
            ids.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.frames.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits the mergers of `events` through the solver.
///
/// The solver may add coordinate entries for the ids it creates. Returns the
/// refined events together with the old-to-new id mapping over `range`.
pub fn resolve_mergers<S: TrackingSolver>(
    solver: &S,
    graph: &mut S::Graph,
    events: &EventSequence,
    coordinates: &mut CoordinateMap,
    weights: &MergerWeights,
    range: TimeRange,
) -> Result<(EventSequence, ResolvedMapping), TrackingError> {
    let refined = solver.resolve_mergers(graph, events, coordinates, weights)?;
    if refined.is_empty() {
        return Err(TrackingError::EmptyResult);
    }
    let resolved = ResolvedMapping::from_events(&refined, range);
    info!(resolved = resolved.len(), "mergers resolved");
    debug!(coordinates = coordinates.len(), events = refined.len(), "refined event sequence");
    Ok((refined, resolved))
}
