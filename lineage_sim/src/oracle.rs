//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated culture:
//! - True positions of all discs (cells)
//! - Kinematics with seeded jitter, wall bounces and scheduled divisions
//! - Rasterization into a label volume, where touching discs become one
//!   connected component (a merger)

use lineage_env::{LabelArray, ObjectId, Timestep};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A ground truth disc in the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthDisc {
    /// Unique disc ID
    pub id: u64,

    /// Center in pixels (z stays 0)
    pub position: Vector3<f64>,

    /// Displacement per frame in pixels
    pub velocity: Vector3<f64>,

    pub radius: f64,

    /// First frame the disc is visible
    pub born: Timestep,

    /// Frame from which the disc is gone
    pub died: Option<Timestep>,

    /// Mother disc for division children
    pub parent: Option<u64>,
}

impl GroundTruthDisc {
    pub fn is_alive(&self, t: Timestep) -> bool {
        self.born <= t && self.died.map_or(true, |d| t < d)
    }
}

/// Position of a disc in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscSnapshot {
    pub id: u64,
    pub position: Vector3<f64>,
    pub radius: f64,
}

/// Which discs ended up in which connected component of one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTruth {
    pub t: Timestep,

    /// Component label → discs whose center lies in it
    pub components: BTreeMap<ObjectId, Vec<u64>>,
}

impl FrameTruth {
    /// Components holding more than one disc.
    pub fn mergers(&self) -> impl Iterator<Item = (ObjectId, usize)> + '_ {
        self.components
            .iter()
            .filter(|(_, discs)| discs.len() > 1)
            .map(|(label, discs)| (*label, discs.len()))
    }
}

/// A rasterized simulation.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub volume: LabelArray,
    pub truth: Vec<FrameTruth>,
    pub discs: Vec<Vec<DiscSnapshot>>,
}

/// The Oracle - maintains ground truth and renders label volumes.
pub struct Oracle {
    /// RNG for physics (jitter)
    physics_rng: ChaCha8Rng,

    discs: BTreeMap<u64, GroundTruthDisc>,
    next_id: u64,

    /// Current frame
    time: Timestep,

    /// Field size in pixels (x, y)
    extent: [f64; 2],

    /// Position jitter standard deviation per frame (pixels)
    jitter_std: f64,

    /// (frame, disc) pairs that divide when that frame is reached
    divisions: Vec<(Timestep, u64)>,
}

impl Oracle {
    /// Creates an oracle for a `width` x `height` field.
    pub fn new(physics_seed: u64, width: usize, height: usize) -> Self {
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            discs: BTreeMap::new(),
            next_id: 0,
            time: 0,
            extent: [width as f64, height as f64],
            jitter_std: 0.0,
            divisions: Vec::new(),
        }
    }

    pub fn set_jitter(&mut self, std_dev: f64) {
        self.jitter_std = std_dev.max(0.0);
    }

    pub fn time(&self) -> Timestep {
        self.time
    }

    /// Spawns a disc visible from the current frame on.
    pub fn spawn_disc(&mut self, position: Vector3<f64>, velocity: Vector3<f64>, radius: f64) -> u64 {
        self.spawn_disc_at(self.time, position, velocity, radius)
    }

    /// Spawns a disc that becomes visible at frame `born`.
    pub fn spawn_disc_at(
        &mut self,
        born: Timestep,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        radius: f64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.discs.insert(
            id,
            GroundTruthDisc {
                id,
                position,
                velocity,
                radius,
                born,
                died: None,
                parent: None,
            },
        );
        id
    }

    /// Disc `id` is replaced by two children at frame `at`.
    pub fn schedule_division(&mut self, at: Timestep, id: u64) {
        self.divisions.push((at, id));
    }

    pub fn discs(&self) -> impl Iterator<Item = &GroundTruthDisc> {
        self.discs.values()
    }

    /// Discs visible in the current frame.
    pub fn snapshot(&self) -> Vec<DiscSnapshot> {
        self.discs
            .values()
            .filter(|d| d.is_alive(self.time))
            .map(|d| DiscSnapshot {
                id: d.id,
                position: d.position,
                radius: d.radius,
            })
            .collect()
    }

    /// Advances by one frame.
    pub fn step(&mut self) {
        self.time += 1;
        let jitter = Normal::new(0.0, self.jitter_std.max(f64::MIN_POSITIVE)).ok();
        let [width, height] = self.extent;

        for disc in self.discs.values_mut() {
            if !disc.is_alive(self.time) || disc.born == self.time {
                continue;
            }
            let mut next = disc.position + disc.velocity;
            if self.jitter_std > 0.0 {
                if let Some(noise) = &jitter {
                    next.x += noise.sample(&mut self.physics_rng);
                    next.y += noise.sample(&mut self.physics_rng);
                }
            }
            let bounds = [(disc.radius, width - 1.0 - disc.radius), (disc.radius, height - 1.0 - disc.radius)];
            for (axis, (lo, hi)) in bounds.into_iter().enumerate() {
                if next[axis] < lo || next[axis] > hi {
                    disc.velocity[axis] = -disc.velocity[axis];
                    next[axis] = next[axis].clamp(lo, hi.max(lo));
                }
            }
            disc.position = next;
        }

        let due: Vec<u64> = self
            .divisions
            .iter()
            .filter(|(at, _)| *at == self.time)
            .map(|(_, id)| *id)
            .collect();
        for id in due {
            self.divide(id);
        }
    }

    fn divide(&mut self, id: u64) {
        let Some(mother) = self.discs.get_mut(&id) else {
            return;
        };
        if !mother.is_alive(self.time) {
            return;
        }
        mother.died = Some(self.time);
        let (position, velocity, radius) = (mother.position, mother.velocity, mother.radius);

        // children leave along the axis perpendicular to the mother's motion
        let mut axis = Vector3::new(-velocity.y, velocity.x, 0.0);
        if axis.norm() < 1e-9 {
            axis = Vector3::new(0.0, 1.0, 0.0);
        }
        let axis = axis.normalize();
        let offset = axis * (radius * 1.2);
        let speed = axis * velocity.norm().max(1.5);
        for sign in [1.0, -1.0] {
            let child = self.spawn_disc_at(self.time, position + offset * sign, velocity + speed * sign, radius);
            if let Some(c) = self.discs.get_mut(&child) {
                c.parent = Some(id);
            }
        }
    }

    /// Runs `frames` frames from the current state, collecting snapshots.
    pub fn simulate(&mut self, frames: usize) -> Vec<Vec<DiscSnapshot>> {
        let mut out = Vec::with_capacity(frames);
        for f in 0..frames {
            if f > 0 {
                self.step();
            }
            out.push(self.snapshot());
        }
        out
    }
}

/// Rasterizes disc snapshots into a `(t, x, y, 1, 1)` label volume.
///
/// Labels are connected components (4-neighborhood) numbered from 1 in
/// raster order, so overlapping discs share one label.
pub fn rasterize(frames: Vec<Vec<DiscSnapshot>>, width: usize, height: usize) -> Rendered {
    let mut volume = LabelArray::zeros([frames.len(), width, height, 1, 1]);
    let mut truth = Vec::with_capacity(frames.len());

    for (t, discs) in frames.iter().enumerate() {
        let mut mask = vec![false; width * height];
        for disc in discs {
            let r2 = disc.radius * disc.radius;
            for x in 0..width {
                for y in 0..height {
                    let dx = x as f64 - disc.position.x;
                    let dy = y as f64 - disc.position.y;
                    if dx * dx + dy * dy <= r2 {
                        mask[x * height + y] = true;
                    }
                }
            }
        }

        let labels = label_components(&mask, width, height);
        let mut components: BTreeMap<ObjectId, Vec<u64>> = BTreeMap::new();
        for x in 0..width {
            for y in 0..height {
                let label = labels[x * height + y];
                volume.set([t, x, y, 0, 0], label);
                if label != 0 {
                    components.entry(label).or_default();
                }
            }
        }
        for disc in discs {
            let x = disc.position.x.round().clamp(0.0, (width - 1) as f64) as usize;
            let y = disc.position.y.round().clamp(0.0, (height - 1) as f64) as usize;
            let label = labels[x * height + y];
            if label != 0 {
                components.entry(label).or_default().push(disc.id);
            }
        }
        truth.push(FrameTruth {
            t: t as Timestep,
            components,
        });
    }

    Rendered {
        volume,
        truth,
        discs: frames,
    }
}

fn label_components(mask: &[bool], width: usize, height: usize) -> Vec<u32> {
    let mut labels = vec![0u32; mask.len()];
    let mut next = 1u32;
    let mut stack = Vec::new();
    for start in 0..mask.len() {
        if !mask[start] || labels[start] != 0 {
            continue;
        }
        labels[start] = next;
        stack.push(start);
        while let Some(index) = stack.pop() {
            let (x, y) = (index / height, index % height);
            let mut visit = |nx: usize, ny: usize| {
                let n = nx * height + ny;
                if mask[n] && labels[n] == 0 {
                    labels[n] = next;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < width {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < height {
                visit(x, y + 1);
            }
        }
        next += 1;
    }
    labels
}
