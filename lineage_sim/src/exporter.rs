//! JSON exporter for offline inspection of a scenario run.
//!
//! Exports, per frame, the ground truth discs next to what the engine made of
//! them: the display labels of the `Output` volume and the merger highlight.

use crate::error::ScenarioError;
use crate::oracle::DiscSnapshot;
use crate::world::{SimSession, SimWorld};
use lineage_core::TrackSummary;
use lineage_env::{EnvError, LabelArray, ObjectId, Roi, Timestep};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

/// A single frame of exported data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    pub t: Timestep,

    /// Ground truth disc positions
    pub ground_truth: Vec<DiscPosition>,

    /// Regions of the `Output` volume
    pub objects: Vec<TrackedObject>,

    /// Merged regions and their object counts
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mergers: Vec<MergerRegion>,
}

/// Position of a ground truth disc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscPosition {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl From<&DiscSnapshot> for DiscPosition {
    fn from(disc: &DiscSnapshot) -> Self {
        Self {
            id: disc.id,
            x: disc.position.x,
            y: disc.position.y,
            radius: disc.radius,
        }
    }
}

/// One labeled region of the output volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedObject {
    pub label: u32,
    pub x: f64,
    pub y: f64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerRegion {
    pub id: ObjectId,
    pub count: u32,
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Summary of the last successful `track()`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TrackSummary>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
            summary: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.frames.push(frame);
    }

    /// Reads every frame of `session` and records it next to the ground truth.
    pub fn record(&mut self, world: &SimWorld, session: &SimSession) -> Result<(), EnvError> {
        let shape = world.shape();
        let state = session.snapshot();
        for t in 0..shape[0] {
            let output = session.read_output(&Roi::frame(t, shape))?;
            let mergers = state
                .mergers
                .frame(t as Timestep)
                .map(|m| m.iter().map(|(&id, &count)| MergerRegion { id, count }).collect())
                .unwrap_or_default();
            self.add_frame(SimFrame {
                t: t as Timestep,
                ground_truth: world.rendered().discs[t].iter().map(DiscPosition::from).collect(),
                objects: regions(&output),
                mergers,
            });
        }
        Ok(())
    }

    pub fn set_summary(&mut self, summary: TrackSummary) {
        self.summary = Some(summary);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), ScenarioError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Centroid and size of every non-zero label of a single-frame array.
fn regions(frame: &LabelArray) -> Vec<TrackedObject> {
    let [_, nx, ny, _, _] = frame.shape();
    let mut acc: BTreeMap<u32, (f64, f64, u64)> = BTreeMap::new();
    for x in 0..nx {
        for y in 0..ny {
            let label = frame.get([0, x, y, 0, 0]);
            if label != 0 {
                let entry = acc.entry(label).or_insert((0.0, 0.0, 0));
                entry.0 += x as f64;
                entry.1 += y as f64;
                entry.2 += 1;
            }
        }
    }
    acc.into_iter()
        .map(|(label, (sx, sy, n))| TrackedObject {
            label,
            x: sx / n as f64,
            y: sy / n as f64,
            size: n,
        })
        .collect()
}
