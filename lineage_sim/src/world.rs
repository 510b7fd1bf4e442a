//! SimWorld - a rendered culture wired up as engine sources.

use crate::error::ScenarioError;
use crate::oracle::{rasterize, FrameTruth, Oracle, Rendered};
use crate::solver::GreedySolver;
use lineage_core::{SessionConfig, TrackRequest, TrackingSession};
use lineage_env::{InMemoryLabels, LabelArray, LabelSource, TimeRange, VolumeFeatures};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::debug;

/// Configuration for a simulated culture.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of frames to render
    pub frames: usize,

    /// Field size in pixels
    pub width: usize,
    pub height: usize,

    /// Number of randomly placed discs
    pub objects: usize,

    /// Disc radius in pixels
    pub radius: f64,

    /// Mean speed in pixels per frame
    pub speed: f64,

    /// Position jitter standard deviation per frame
    pub noise_std: f64,
}

impl SimConfig {
    /// Checks that discs of `radius` fit into the field with a one-pixel margin.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.frames == 0 {
            return Err(ScenarioError::config("at least one frame is required"));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(ScenarioError::config(format!("disc radius {} must be positive", self.radius)));
        }
        if !(self.speed.is_finite() && self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(ScenarioError::config("speed and noise must be finite, noise non-negative"));
        }
        let min_side = 2.0 * (self.radius + 1.0);
        if (self.width as f64) <= min_side || (self.height as f64) <= min_side {
            return Err(ScenarioError::config(format!(
                "field {}x{} too small for radius {} (each side must exceed {})",
                self.width, self.height, self.radius, min_side
            )));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            frames: 12,
            width: 64,
            height: 48,
            objects: 4,
            radius: 4.0,
            speed: 2.0,
            noise_std: 0.2,
        }
    }
}

/// Session type the harness tracks with.
pub type SimSession = TrackingSession<GreedySolver, Arc<VolumeFeatures>, Arc<InMemoryLabels>>;

/// A rendered simulation: label volume, measured features, ground truth.
pub struct SimWorld {
    config: SimConfig,
    labels: Arc<InMemoryLabels>,
    features: VolumeFeatures,
    truth: Vec<FrameTruth>,
    rendered: Rendered,
}

impl SimWorld {
    /// Renders an oracle that was already populated by a scenario.
    pub fn from_oracle(config: SimConfig, mut oracle: Oracle) -> Self {
        let frames = oracle.simulate(config.frames);
        let rendered = rasterize(frames, config.width, config.height);
        Self::from_rendered(config, rendered)
    }

    /// Populates an oracle with `config.objects` random discs and renders it.
    pub fn random(config: SimConfig) -> Result<Self, ScenarioError> {
        config.validate()?;
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut placement = ChaCha8Rng::seed_from_u64(config.seed);
        let mut oracle = Oracle::new(physics_seed, config.width, config.height);
        oracle.set_jitter(config.noise_std);

        let margin = config.radius + 1.0;
        for _ in 0..config.objects {
            let position = Vector3::new(
                placement.gen_range(margin..config.width as f64 - margin),
                placement.gen_range(margin..config.height as f64 - margin),
                0.0,
            );
            let heading = placement.gen_range(0.0..std::f64::consts::TAU);
            let velocity = Vector3::new(heading.cos(), heading.sin(), 0.0) * config.speed;
            oracle.spawn_disc(position, velocity, config.radius);
        }
        Ok(Self::from_oracle(config, oracle))
    }

    pub fn from_rendered(config: SimConfig, rendered: Rendered) -> Self {
        let features = VolumeFeatures::from_labels(&rendered.volume);
        debug!(
            frames = rendered.truth.len(),
            objects = rendered.truth.iter().map(|f| f.components.len()).sum::<usize>(),
            "world rendered"
        );
        Self {
            config,
            labels: Arc::new(InMemoryLabels::new(rendered.volume.clone())),
            features,
            truth: rendered.truth.clone(),
            rendered,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn volume(&self) -> &LabelArray {
        self.labels.volume()
    }

    pub fn shape(&self) -> [usize; 5] {
        self.labels.shape()
    }

    pub fn truth(&self) -> &[FrameTruth] {
        &self.truth
    }

    pub fn rendered(&self) -> &Rendered {
        &self.rendered
    }

    /// Features are editable until a session is opened.
    pub fn features_mut(&mut self) -> &mut VolumeFeatures {
        &mut self.features
    }

    /// Request covering every rendered frame.
    pub fn full_request(&self) -> TrackRequest {
        let last = self.config.frames.saturating_sub(1) as u32;
        TrackRequest::new(TimeRange::new(0, last), self.shape())
    }

    pub fn session(&self, solver: GreedySolver) -> SimSession {
        TrackingSession::new(
            solver,
            Arc::new(self.features.clone()),
            self.labels.clone(),
            SessionConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_world_is_deterministic() {
        let config = SimConfig {
            seed: 11,
            frames: 4,
            ..Default::default()
        };
        let a = SimWorld::random(config.clone()).unwrap();
        let b = SimWorld::random(config).unwrap();
        assert_eq!(a.volume(), b.volume());
        assert_eq!(a.shape(), [4, 64, 48, 1, 1]);
        assert_eq!(a.full_request().time_range, TimeRange::new(0, 3));
    }

    #[test]
    fn test_tiny_field_is_rejected() {
        let config = SimConfig {
            width: 9,
            height: 48,
            radius: 4.0,
            ..Default::default()
        };
        assert!(matches!(SimWorld::random(config), Err(ScenarioError::Config(_))));

        let no_frames = SimConfig {
            frames: 0,
            ..Default::default()
        };
        assert!(no_frames.validate().is_err());
        assert!(SimConfig::default().validate().is_ok());
    }
}
