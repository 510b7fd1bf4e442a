//! Scenario runner - executes tracking scenarios against the engine.

use crate::error::{ensure, ScenarioError};
use crate::exporter::SimExport;
use crate::oracle::{FrameTruth, Oracle};
use crate::scenarios::ScenarioId;
use crate::solver::GreedySolver;
use crate::world::{SimConfig, SimSession, SimWorld};

use lineage_core::{CommittedState, ParameterKey, TrackSummary, TrackingError, TrackingParameters};
use lineage_env::{Event, ObjectId, Roi, TimeRange, Timestep};
use nalgebra::Vector3;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames rendered
    pub frames: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Successful `track()` calls
    pub track_calls: u32,

    /// Observations in the last committed store
    pub observations: usize,

    pub events: usize,
    pub mergers: usize,
    pub resolved: usize,
    pub divisions: usize,

    /// Mergers present in the ground truth
    pub truth_mergers: usize,

    /// Distinct lineage colors
    pub tracks: usize,

    pub graph_builds: u64,

    /// Merger-output blocks computed (cache misses)
    pub cache_computations: u64,

    pub elapsed_ms: u64,
}

/// Runs tracking scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// World configuration
    config: SimConfig,

    /// Base parameters every scenario starts from
    parameters: TrackingParameters,

    solver: GreedySolver,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: SimConfig {
                seed,
                ..Default::default()
            },
            parameters: TrackingParameters::default(),
            solver: GreedySolver::new(),
        }
    }

    /// Replaces the world configuration; the runner seed wins.
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = SimConfig { seed: self.seed, ..config };
        self
    }

    /// Sets the number of rendered frames.
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.config.frames = frames;
        self
    }

    /// Sets the base tracking parameters.
    pub fn with_parameters(mut self, parameters: TrackingParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and records its frames for export.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let started = Instant::now();
        let mut export = SimExport::new(scenario.name(), self.seed);

        let outcome = self.config.validate().and_then(|()| match scenario {
            ScenarioId::Crossing => self.run_crossing(&mut export),
            ScenarioId::Retune => self.run_retune(&mut export),
            ScenarioId::EmptyFrame => self.run_empty_frame(&mut export),
            ScenarioId::FlatField => self.run_flat_field(&mut export),
            ScenarioId::Division => self.run_division(&mut export),
        });

        let (passed, failure_reason, mut metrics) = match outcome {
            Ok(metrics) => (true, None, metrics),
            Err(e) => (false, Some(e.to_string()), ScenarioMetrics::default()),
        };
        metrics.elapsed_ms = started.elapsed().as_millis() as u64;
        export.finalize(passed, failure_reason.clone());

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            frames: export.frames.len(),
            failure_reason,
            metrics,
        };
        (result, export)
    }

    fn physics_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }

    /// SIM-001: Crossing - two discs meet for one frame in adjacent lanes.
    ///
    /// The merged frame must be detected, split into two objects, highlighted
    /// with count 2, and both lineages must keep their color across it.
    fn run_crossing(&self, export: &mut SimExport) -> Result<ScenarioMetrics, ScenarioError> {
        let r = self.config.radius.max(2.0);
        let config = SimConfig {
            frames: self.config.frames.clamp(8, 12),
            width: self.config.width.max((15.0 * r).ceil() as usize),
            height: self.config.height.max((8.0 * r).ceil() as usize),
            ..self.config.clone()
        };
        let mut oracle = Oracle::new(self.physics_seed(), config.width, config.height);
        oracle.set_jitter(config.noise_std);

        // lanes 1.25 r apart, meeting at frame 5
        let cy = config.height as f64 / 2.0;
        let left = oracle.spawn_disc(Vector3::new(2.5 * r, cy - 0.625 * r, 0.0), Vector3::new(r, 0.0, 0.0), r);
        let right = oracle.spawn_disc(Vector3::new(12.5 * r, cy + 0.625 * r, 0.0), Vector3::new(-r, 0.0, 0.0), r);

        let world = SimWorld::from_oracle(config, oracle);
        let session = world.session(self.solver.clone());
        let summary = session.track(&world.full_request().with_parameters(self.parameters.clone()))?;
        let state = session.snapshot();

        let truth_mergers: Vec<(Timestep, ObjectId, usize)> = world
            .truth()
            .iter()
            .flat_map(|f| f.mergers().map(move |(label, n)| (f.t, label, n)))
            .collect();
        ensure(!truth_mergers.is_empty(), || "discs never touched".into())?;

        let shape = world.shape();
        for &(t, label, n) in &truth_mergers {
            ensure(state.mergers.frame(t).and_then(|m| m.get(&label)) == Some(&(n as u32)), || {
                format!("merger of {n} at t={t} (label {label}) not detected")
            })?;
            ensure(state.resolved.has_resolution(t), || format!("merger at t={t} not resolved"))?;

            let raw = world.volume().extract(&Roi::frame(t as usize, shape));
            let output = session.read_output(&Roi::frame(t as usize, shape))?;
            let highlight = session.read_merger_output(&Roi::frame(t as usize, shape))?;
            let mut split_labels = BTreeSet::new();
            for ((&value, &shown), &marked) in raw.iter().zip(output.iter()).zip(highlight.iter()) {
                if value == label {
                    split_labels.insert(shown);
                    ensure(marked == n as u32, || format!("merger highlight at t={t} is {marked}, expected {n}"))?;
                }
            }
            split_labels.remove(&0);
            ensure(split_labels.len() == n, || {
                format!("merger at t={t} shows {} labels, expected {n}", split_labels.len())
            })?;
        }

        let last = world.truth().len() - 1;
        for disc in [left, right] {
            let first = disc_color(&state, &world.truth()[0], disc);
            let end = disc_color(&state, &world.truth()[last], disc);
            ensure(first.is_some() && first == end, || {
                format!("disc {disc} changed lineage across the crossing: {first:?} -> {end:?}")
            })?;
        }

        export.record(&world, &session)?;
        export.set_summary(summary.clone());
        Ok(collect_metrics(&world, &session, &summary, 1))
    }

    /// SIM-002: Retune - the graph is reused for weight-only changes.
    fn run_retune(&self, export: &mut SimExport) -> Result<ScenarioMetrics, ScenarioError> {
        let world = SimWorld::random(self.config.clone())?;
        let session = world.session(self.solver.clone());
        let request = world.full_request().with_parameters(self.parameters.clone());

        let first = session.track(&request)?;
        ensure(first.graph_rebuilt && first.graph_builds == 1, || {
            format!("first track built {} graphs", first.graph_builds)
        })?;
        session.read_merger_output(&Roi::full(world.shape()))?;

        let mut reweighted = request.clone();
        reweighted.parameters.trans_weight *= 1.5;
        let second = session.track(&reweighted)?;
        ensure(!second.graph_rebuilt && second.graph_builds == 1, || {
            "weight-only change rebuilt the graph".into()
        })?;
        ensure(second.changed == vec![ParameterKey::TransWeight], || {
            format!("unexpected changed keys {:?}", second.changed)
        })?;

        let mut narrowed = reweighted.clone();
        narrowed.parameters.max_dist *= 0.5;
        let third = session.track(&narrowed)?;
        ensure(third.graph_rebuilt && third.graph_builds == 2, || {
            "max distance change did not rebuild the graph".into()
        })?;
        ensure(third.version == 3, || format!("expected version 3, got {}", third.version))?;

        // every block is either clean or was dropped by a commit
        session.read_merger_output(&Roi::full(world.shape()))?;
        let stats = session.cache_stats();
        ensure(stats.blocks_clean == stats.blocks_total, || {
            format!("{} of {} blocks clean after full read", stats.blocks_clean, stats.blocks_total)
        })?;
        debug!(?stats, "merger cache after retune");

        export.record(&world, &session)?;
        export.set_summary(third.clone());
        Ok(collect_metrics(&world, &session, &third, 3))
    }

    /// SIM-003: EmptyFrame - discs only appear at frame 3.
    fn run_empty_frame(&self, export: &mut SimExport) -> Result<ScenarioMetrics, ScenarioError> {
        let config = SimConfig {
            frames: self.config.frames.max(5),
            ..self.config.clone()
        };
        let mut oracle = Oracle::new(self.physics_seed(), config.width, config.height);
        oracle.set_jitter(config.noise_std);
        let r = config.radius;
        let (w, h) = (config.width as f64, config.height as f64);
        oracle.spawn_disc_at(3, Vector3::new(w * 0.3, h * 0.5, 0.0), Vector3::new(1.0, 0.0, 0.0), r);
        oracle.spawn_disc_at(3, Vector3::new(w * 0.7, h * 0.5, 0.0), Vector3::new(-1.0, 0.5, 0.0), r);

        let world = SimWorld::from_oracle(config, oracle);
        let session = world.session(self.solver.clone());
        let request = world.full_request().with_parameters(self.parameters.clone());

        match session.track(&request) {
            Err(TrackingError::EmptyFrame { timestep: 0 }) => {}
            Err(other) => return Err(ScenarioError::assertion(format!("expected EmptyFrame at 0, got {other}"))),
            Ok(_) => return Err(ScenarioError::assertion("tracking over empty frames succeeded")),
        }
        ensure(session.snapshot().version == 0, || "failed track committed a state".into())?;
        ensure(session.graph_builds() == 0, || "failed track built a graph".into())?;
        let full = Roi::full(world.shape());
        ensure(session.read_output(&full)? == world.volume().extract(&full), || {
            "untracked output differs from the raw labels".into()
        })?;

        let mut populated = request.clone();
        populated.time_range = TimeRange::new(3, request.time_range.last);
        let summary = session.track(&populated)?;
        ensure(summary.version == 1, || format!("expected version 1, got {}", summary.version))?;
        ensure(!session.snapshot().is_tracked(2), || "frame 2 reported as tracked".into())?;

        export.record(&world, &session)?;
        export.set_summary(summary.clone());
        Ok(collect_metrics(&world, &session, &summary, 1))
    }

    /// SIM-004: FlatField - 2-D data tracked with a z range of three planes.
    fn run_flat_field(&self, export: &mut SimExport) -> Result<ScenarioMetrics, ScenarioError> {
        let world = SimWorld::random(self.config.clone())?;
        let session = world.session(self.solver.clone());
        let request = world.full_request().with_parameters(self.parameters.clone());
        ensure(request.ndim == 2, || format!("rendered world has ndim {}", request.ndim))?;

        let mut thick = request.clone();
        thick.z_range = (0, 3);
        match session.track(&thick) {
            Err(TrackingError::Dimensionality(_)) => {}
            Err(other) => {
                return Err(ScenarioError::assertion(format!("expected a dimensionality error, got {other}")))
            }
            Ok(_) => return Err(ScenarioError::assertion("2-D tracking accepted a z range of 3")),
        }
        ensure(session.snapshot().version == 0, || "failed track committed a state".into())?;

        let summary = session.track(&request)?;
        export.record(&world, &session)?;
        export.set_summary(summary.clone());
        Ok(collect_metrics(&world, &session, &summary, 1))
    }

    /// SIM-005: Division - a flagged mother splits at frame 4.
    fn run_division(&self, export: &mut SimExport) -> Result<ScenarioMetrics, ScenarioError> {
        const DIVISION_AT: Timestep = 4;
        let config = SimConfig {
            frames: self.config.frames.clamp(7, 12),
            ..self.config.clone()
        };
        let mut oracle = Oracle::new(self.physics_seed(), config.width, config.height);
        oracle.set_jitter(config.noise_std);
        let r = config.radius;
        let (w, h) = (config.width as f64, config.height as f64);
        let mother = oracle.spawn_disc(Vector3::new(w * 0.4, h * 0.5, 0.0), Vector3::new(r * 0.5, 0.0, 0.0), r);
        oracle.spawn_disc(Vector3::new(w * 0.15, h * 0.2, 0.0), Vector3::new(0.0, 0.5, 0.0), r);
        oracle.schedule_division(DIVISION_AT, mother);

        let mut world = SimWorld::from_oracle(config, oracle);
        let before = DIVISION_AT - 1;
        let label = label_of(&world.truth()[before as usize], mother)
            .ok_or_else(|| ScenarioError::assertion("mother not visible before division"))?;
        world.features_mut().set_division_probability(before, label, 0.95);

        let session = world.session(self.solver.clone());
        let request = world.full_request().with_parameters(TrackingParameters {
            with_divisions: true,
            ..self.parameters.clone()
        });
        let summary = session.track(&request)?;
        let state = session.snapshot();

        let children = state
            .events
            .frame(DIVISION_AT)
            .iter()
            .find_map(|e| match e {
                Event::Division { parent, children } if *parent == label => Some(*children),
                _ => None,
            })
            .ok_or_else(|| ScenarioError::assertion(format!("no division of label {label} at t={DIVISION_AT}")))?;
        ensure(count_divisions(&state) == 1, || {
            format!("expected exactly one division, got {}", count_divisions(&state))
        })?;
        let mother_color = state.colors.color(before, label);
        let daughter_colors: BTreeSet<u32> =
            children.iter().map(|c| state.colors.color(DIVISION_AT, *c)).collect();
        ensure(daughter_colors.len() == 2 && !daughter_colors.contains(&mother_color), || {
            format!("daughters {daughter_colors:?} do not open new tracks (mother {mother_color})")
        })?;

        // without the division model the same data yields no division
        let plain = world.session(self.solver.clone());
        let mut without = request.clone();
        without.parameters.with_divisions = false;
        plain.track(&without)?;
        ensure(count_divisions(&plain.snapshot()) == 0, || "division reported with divisions disabled".into())?;

        export.record(&world, &session)?;
        export.set_summary(summary.clone());
        Ok(collect_metrics(&world, &session, &summary, 1))
    }
}

/// Reads tracking parameters from a JSON file; missing keys keep their defaults.
pub fn load_parameters(path: &Path) -> Result<TrackingParameters, ScenarioError> {
    let json = std::fs::read_to_string(path)?;
    Ok(TrackingParameters::from_json_str(&json)?)
}

/// Label of the component holding `disc` in one frame.
fn label_of(truth: &FrameTruth, disc: u64) -> Option<ObjectId> {
    truth
        .components
        .iter()
        .find(|(_, discs)| discs.contains(&disc))
        .map(|(label, _)| *label)
}

fn disc_color(state: &CommittedState, truth: &FrameTruth, disc: u64) -> Option<u32> {
    label_of(truth, disc)
        .map(|label| state.colors.color(truth.t, label))
        .filter(|color| *color != 0)
}

fn count_divisions(state: &CommittedState) -> usize {
    state
        .events
        .iter()
        .flat_map(|(_, frame)| frame)
        .filter(|e| matches!(e, Event::Division { .. }))
        .count()
}

fn collect_metrics(world: &SimWorld, session: &SimSession, summary: &TrackSummary, track_calls: u32) -> ScenarioMetrics {
    let state = session.snapshot();
    ScenarioMetrics {
        track_calls,
        observations: summary.observations,
        events: state.events.len(),
        mergers: state.mergers.len(),
        resolved: state.resolved.len(),
        divisions: count_divisions(&state),
        truth_mergers: world.truth().iter().map(|f| f.mergers().count()).sum(),
        tracks: state.colors.tracks(),
        graph_builds: session.graph_builds(),
        cache_computations: session.cache_stats().computations,
        elapsed_ms: 0,
    }
}
