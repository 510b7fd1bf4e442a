//! Tracking events as produced by the solver.

use crate::observation::{ObjectId, Timestep};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One typed event, stored under a timestep `t`.
///
/// Ids refer to observations at `t`, except `Move::from` and
/// `Division::parent`, which refer to `t - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// `id` has no predecessor
    Appearance { id: ObjectId },

    /// `id` has no successor at `t + 1`
    Disappearance { id: ObjectId },

    /// `from` at `t - 1` continues as `to` at `t`
    Move { from: ObjectId, to: ObjectId },

    /// `parent` at `t - 1` splits into two children at `t`
    Division { parent: ObjectId, children: [ObjectId; 2] },

    /// `id` holds `count` true objects
    Merger { id: ObjectId, count: u32 },

    /// Merged `id` was split into `new_ids`
    ResolvedTo { id: ObjectId, new_ids: Vec<ObjectId> },
}

/// Events ordered by timestep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSequence {
    frames: BTreeMap<Timestep, Vec<Event>>,
}

impl EventSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, t: Timestep, event: Event) {
        self.frames.entry(t).or_default().push(event);
    }

    /// Makes `t` present even if no event happens there.
    pub fn touch(&mut self, t: Timestep) {
        self.frames.entry(t).or_default();
    }

    /// Events at `t` (empty if none).
    pub fn frame(&self, t: Timestep) -> &[Event] {
        self.frames.get(&t).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn frame_mut(&mut self, t: Timestep) -> &mut Vec<Event> {
        self.frames.entry(t).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Timestep, &[Event])> {
        self.frames.iter().map(|(t, events)| (*t, events.as_slice()))
    }

    pub fn timesteps(&self) -> impl Iterator<Item = Timestep> + '_ {
        self.frames.keys().copied()
    }

    /// All `(t, id, count)` merger events.
    pub fn mergers(&self) -> impl Iterator<Item = (Timestep, ObjectId, u32)> + '_ {
        self.iter().flat_map(|(t, events)| {
            events.iter().filter_map(move |e| match e {
                Event::Merger { id, count } => Some((t, *id, *count)),
                _ => None,
            })
        })
    }

    /// Total number of events.
    pub fn len(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
