//! Pixel relabeling of split mergers and stable display colors.

use crate::merger_resolution::ResolvedMapping;
use lineage_env::{CoordinateMap, Event, EventSequence, Frame, ObjectId, Timestep};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Per-timestep id → display color (track id).
///
/// Colors follow lineages: an object that moves keeps the color of its
/// predecessor, everything else (appearances, division children, mergers and
/// split ids) opens a new track. Fresh colors are handed out in ascending id
/// order per timestep, starting at 1, so the assignment is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorAssignment {
    frames: BTreeMap<Timestep, BTreeMap<ObjectId, u32>>,
}

impl ColorAssignment {
    pub fn from_events(events: &EventSequence) -> Self {
        let mut frames: BTreeMap<Timestep, BTreeMap<ObjectId, u32>> = BTreeMap::new();
        let mut next_color = 1u32;
        let mut previous: Option<Timestep> = None;

        for (t, frame) in events.iter() {
            let mut colors = BTreeMap::new();
            let mut fresh = BTreeSet::new();

            let mut moves: Vec<(ObjectId, ObjectId)> = frame
                .iter()
                .filter_map(|e| match e {
                    Event::Move { from, to } => Some((*from, *to)),
                    _ => None,
                })
                .collect();
            moves.sort_by_key(|&(_, to)| to);
            for (from, to) in moves {
                let inherited = previous
                    .and_then(|p| frames.get(&p))
                    .and_then(|prev| prev.get(&from).copied());
                match inherited {
                    Some(color) => {
                        colors.entry(to).or_insert(color);
                    }
                    None => {
                        fresh.insert(to);
                    }
                }
            }

            for event in frame {
                match event {
                    Event::Appearance { id } | Event::Merger { id, .. } => {
                        fresh.insert(*id);
                    }
                    Event::Division { children, .. } => fresh.extend(children.iter().copied()),
                    Event::ResolvedTo { new_ids, .. } => fresh.extend(new_ids.iter().copied()),
                    Event::Move { .. } | Event::Disappearance { .. } => {}
                }
            }
            for id in fresh {
                colors.entry(id).or_insert_with(|| {
                    let color = next_color;
                    next_color += 1;
                    color
                });
            }

            frames.insert(t, colors);
            previous = Some(t);
        }
        Self { frames }
    }

    pub fn frame(&self, t: Timestep) -> Option<&BTreeMap<ObjectId, u32>> {
        self.frames.get(&t)
    }

    /// Color of `id` at `t`, 0 when unassigned.
    pub fn color(&self, t: Timestep, id: ObjectId) -> u32 {
        self.frames
            .get(&t)
            .and_then(|colors| colors.get(&id))
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct tracks.
    pub fn tracks(&self) -> usize {
        self.frames
            .values()
            .flat_map(BTreeMap::values)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Writes every new id of the splits at `t` into the pixels recorded for it.
///
/// Coordinates outside the frame window are ignored. Returns the number of
/// pixels rewritten.
pub fn split_merged_pixels(
    frame: &mut Frame,
    t: Timestep,
    resolved: &ResolvedMapping,
    coordinates: &CoordinateMap,
) -> usize {
    let Some(splits) = resolved.frame(t) else {
        return 0;
    };
    let mut written = 0;
    for new_ids in splits.values() {
        for &new_id in new_ids {
            let Some(pixels) = coordinates.get(t, new_id) else {
                continue;
            };
            for coord in pixels.iter() {
                if let Some(local) = frame.local_of(coord) {
                    frame.set(local, new_id);
                    written += 1;
                }
            }
        }
    }
    written
}

/// Relabels one frame: splits resolved mergers, then maps ids to colors.
///
/// Leaves the frame untouched and returns `false` when the coordinate map has
/// nothing for `t`.
pub fn relabel(
    frame: &mut Frame,
    t: Timestep,
    resolved: &ResolvedMapping,
    coordinates: &CoordinateMap,
    colors: &ColorAssignment,
) -> bool {
    if !coordinates.has_timestep(t) {
        debug!(timestep = t, "skipping merger relabeling: coordinate map empty");
        return false;
    }
    let written = split_merged_pixels(frame, t, resolved, coordinates);
    let palette = colors.frame(t);
    frame.map_in_place(|id| {
        if id == 0 {
            return 0;
        }
        palette.and_then(|p| p.get(&id)).copied().unwrap_or(0)
    });
    debug!(timestep = t, pixels = written, planar = frame.is_planar(), "frame relabeled");
    true
}

/// Replaces merger ids by their object count and clears everything else.
pub fn highlight_mergers(frame: &mut Frame, mergers: &BTreeMap<ObjectId, u32>) {
    frame.map_in_place(|id| mergers.get(&id).copied().unwrap_or(0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_env::{PixelCoordinates, TimeRange};

    fn blob_events() -> EventSequence {
        let mut events = EventSequence::new();
        for id in 1..=3 {
            events.push(0, Event::Appearance { id });
        }
        events.push(1, Event::Move { from: 2, to: 1 });
        events.push(1, Event::Move { from: 3, to: 2 });
        events.push(1, Event::Move { from: 1, to: 1 });
        events.push(1, Event::Merger { id: 1, count: 2 });
        events.push(1, Event::ResolvedTo { id: 1, new_ids: vec![3, 4] });
        events.push(2, Event::Division { parent: 2, children: [5, 6] });
        events
    }

    fn split_coordinates() -> CoordinateMap {
        let mut coordinates = CoordinateMap::new();
        let mut left = PixelCoordinates::new(2);
        left.push(&[0, 0]);
        left.push(&[0, 1]);
        let mut right = PixelCoordinates::new(2);
        right.push(&[1, 0]);
        right.push(&[7, 7]);
        coordinates.insert(1, 3, left);
        coordinates.insert(1, 4, right);
        coordinates
    }

    fn merged_frame() -> Frame {
        Frame::from_shape_vec([0, 0, 0], [2, 2, 1], vec![1, 1, 1, 2]).unwrap()
    }

    #[test]
    fn test_colors_follow_lineages() {
        let colors = ColorAssignment::from_events(&blob_events());
        assert_eq!(colors.color(0, 1), 1);
        assert_eq!(colors.color(0, 3), 3);
        // first move sorted by target wins
        assert_eq!(colors.color(1, 1), 2);
        assert_eq!(colors.color(1, 2), 3);
        assert_eq!(colors.color(1, 3), 4);
        assert_eq!(colors.color(1, 4), 5);
        assert_eq!(colors.color(2, 5), 6);
        assert_eq!(colors.color(2, 6), 7);
        assert_eq!(colors.color(2, 99), 0);
        assert_eq!(colors.tracks(), 7);
    }

    #[test]
    fn test_split_ignores_out_of_window_pixels() {
        let mut events = EventSequence::new();
        events.push(1, Event::ResolvedTo { id: 1, new_ids: vec![3, 4] });
        let resolved = ResolvedMapping::from_events(&events, TimeRange::new(0, 2));
        let mut frame = merged_frame();

        let written = split_merged_pixels(&mut frame, 1, &resolved, &split_coordinates());
        assert_eq!(written, 3);
        assert_eq!(frame.to_vec(), vec![3, 3, 4, 2]);
    }

    #[test]
    fn test_relabel_applies_colors() {
        let events = blob_events();
        let resolved = ResolvedMapping::from_events(&events, TimeRange::new(0, 2));
        let colors = ColorAssignment::from_events(&events);
        let mut frame = merged_frame();

        assert!(relabel(&mut frame, 1, &resolved, &split_coordinates(), &colors));
        assert_eq!(frame.to_vec(), vec![4, 4, 5, 3]);
    }

    #[test]
    fn test_relabel_skips_without_coordinates() {
        let events = blob_events();
        let resolved = ResolvedMapping::from_events(&events, TimeRange::new(0, 2));
        let colors = ColorAssignment::from_events(&events);
        let mut frame = merged_frame();

        assert!(!relabel(&mut frame, 1, &resolved, &CoordinateMap::new(), &colors));
        assert_eq!(frame, merged_frame());
    }

    #[test]
    fn test_volumetric_frames_use_three_components() {
        let mut events = EventSequence::new();
        events.push(0, Event::ResolvedTo { id: 1, new_ids: vec![2] });
        let resolved = ResolvedMapping::from_events(&events, TimeRange::new(0, 0));
        let mut coordinates = CoordinateMap::new();
        let mut pixels = PixelCoordinates::new(3);
        pixels.push(&[0, 0, 1]);
        coordinates.insert(0, 2, pixels);

        let mut frame = Frame::zeros([0, 0, 0], [1, 1, 2]);
        frame.fill(1);
        split_merged_pixels(&mut frame, 0, &resolved, &coordinates);
        assert_eq!(frame.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_highlight_mergers() {
        let mut frame = merged_frame();
        highlight_mergers(&mut frame, &BTreeMap::from([(1, 2)]));
        assert_eq!(frame.to_vec(), vec![2, 2, 2, 0]);
    }
}
