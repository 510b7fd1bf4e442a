//! Tracking parameters, the flattened configuration map and its change tracker.
//!
//! A [`TrackRequest`] is flattened into a [`Configuration`] of named keys. The
//! [`ParameterDiff`] of two configurations decides whether the hypothesis graph
//! must be rebuilt (a *topology* key changed) or only re-solved (only *weight*
//! keys changed).

use lineage_env::{FieldOfView, GraphParameters, TimeRange, AXES};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

// ============================================================================
// PARAMETERS
// ============================================================================

/// User-facing tracking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingParameters {
    /// Maximum transition distance in physical units (default: 30)
    pub max_dist: f64,

    /// Maximum number of objects per observation (default: 2)
    pub max_obj: u32,

    /// Division probability threshold (default: 0.5)
    pub div_threshold: f64,

    /// Average object size; a positive value overrides the measured median
    pub avg_size: f64,

    pub with_tracklets: bool,
    pub size_dependent: bool,
    pub div_weight: f64,
    pub trans_weight: f64,
    pub with_divisions: bool,
    pub with_optical_correction: bool,

    /// Use object-count classifier probabilities as detection prior
    pub with_classifier_prior: bool,

    pub with_merger_resolution: bool,
    pub border_aware_width: f64,
    pub with_arma_coordinates: bool,
    pub appearance_cost: f64,
    pub disappearance_cost: f64,

    /// Solver wall-clock limit in seconds, unbounded when absent
    pub solver_timeout_secs: Option<f64>,
}

impl Default for TrackingParameters {
    fn default() -> Self {
        Self {
            max_dist: 30.0,
            max_obj: 2,
            div_threshold: 0.5,
            avg_size: 0.0,
            with_tracklets: false,
            size_dependent: true,
            div_weight: 10.0,
            trans_weight: 10.0,
            with_divisions: true,
            with_optical_correction: true,
            with_classifier_prior: false,
            with_merger_resolution: true,
            border_aware_width: 0.0,
            with_arma_coordinates: true,
            appearance_cost: 500.0,
            disappearance_cost: 500.0,
            solver_timeout_secs: None,
        }
    }
}

impl TrackingParameters {
    /// Parses parameters from JSON; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn solver_timeout(&self) -> Option<Duration> {
        self.solver_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

// ============================================================================
// TRACK REQUEST
// ============================================================================

/// Everything one `track()` call needs: ranges, scales and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Inclusive time range
    pub time_range: TimeRange,

    /// Half-open spatial ranges in pixels
    pub x_range: (i64, i64),
    pub y_range: (i64, i64),
    pub z_range: (i64, i64),

    /// Half-open accepted object size range in pixels
    pub size_range: (u64, u64),

    /// Physical size of one pixel per axis
    pub scales: [f64; 3],

    /// Spatial dimensionality, 2 or 3
    pub ndim: usize,

    pub parameters: TrackingParameters,

    /// Rebuild the hypothesis graph even if no topology key changed
    pub force_build: bool,
}

impl TrackRequest {
    /// Request covering the full spatial extent of a volume of `shape`.
    ///
    /// Volumes whose z extent is 1 are tracked as 2-D.
    pub fn new(time_range: TimeRange, shape: [usize; AXES]) -> Self {
        Self {
            time_range,
            x_range: (0, shape[1] as i64),
            y_range: (0, shape[2] as i64),
            z_range: (0, shape[3] as i64),
            size_range: (0, 100_000),
            scales: [1.0; 3],
            ndim: if shape[3] == 1 { 2 } else { 3 },
            parameters: TrackingParameters::default(),
            force_build: false,
        }
    }

    pub fn with_parameters(mut self, parameters: TrackingParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_scales(mut self, scales: [f64; 3]) -> Self {
        self.scales = scales;
        self
    }

    pub fn with_size_range(mut self, min: u64, max: u64) -> Self {
        self.size_range = (min, max);
        self
    }

    pub fn with_ndim(mut self, ndim: usize) -> Self {
        self.ndim = ndim;
        self
    }

    pub fn force_rebuild(mut self) -> Self {
        self.force_build = true;
        self
    }

    pub fn scale_vector(&self) -> Vector3<f64> {
        Vector3::new(self.scales[0], self.scales[1], self.scales[2])
    }

    /// Field of view in physical units; upper bounds are the last pixel.
    pub fn field_of_view(&self) -> FieldOfView {
        let [sx, sy, sz] = self.scales;
        FieldOfView {
            t_start: self.time_range.first as f64,
            lower: [
                self.x_range.0 as f64 * sx,
                self.y_range.0 as f64 * sy,
                self.z_range.0 as f64 * sz,
            ],
            t_stop: self.time_range.last as f64,
            upper: [
                (self.x_range.1 - 1) as f64 * sx,
                (self.y_range.1 - 1) as f64 * sy,
                (self.z_range.1 - 1) as f64 * sz,
            ],
        }
    }

    /// Detection/division model for graph construction.
    pub fn graph_parameters(&self, median_object_size: f64) -> GraphParameters {
        let p = &self.parameters;
        GraphParameters {
            max_objects: p.max_obj,
            size_dependent: p.size_dependent,
            median_object_size,
            max_distance: p.max_dist,
            with_divisions: p.with_divisions,
            division_threshold: p.div_threshold,
        }
    }

    /// Flattens the request into named configuration keys.
    pub fn to_configuration(&self) -> Configuration {
        use ParamValue::*;
        let p = &self.parameters;
        let mut c = Configuration::default();
        c.set(ParameterKey::MaxDist, Float(p.max_dist));
        c.set(ParameterKey::MaxObj, Int(p.max_obj as i64));
        c.set(ParameterKey::DivThreshold, Float(p.div_threshold));
        c.set(ParameterKey::AvgSize, Float(p.avg_size));
        c.set(ParameterKey::WithTracklets, Bool(p.with_tracklets));
        c.set(ParameterKey::SizeDependent, Bool(p.size_dependent));
        c.set(ParameterKey::DivWeight, Float(p.div_weight));
        c.set(ParameterKey::TransWeight, Float(p.trans_weight));
        c.set(ParameterKey::WithDivisions, Bool(p.with_divisions));
        c.set(ParameterKey::WithOpticalCorrection, Bool(p.with_optical_correction));
        c.set(ParameterKey::WithClassifierPrior, Bool(p.with_classifier_prior));
        c.set(ParameterKey::WithMergerResolution, Bool(p.with_merger_resolution));
        c.set(ParameterKey::BorderAwareWidth, Float(p.border_aware_width));
        c.set(ParameterKey::WithArmaCoordinates, Bool(p.with_arma_coordinates));
        c.set(ParameterKey::AppearanceCost, Float(p.appearance_cost));
        c.set(ParameterKey::DisappearanceCost, Float(p.disappearance_cost));
        c.set(
            ParameterKey::SolverTimeout,
            p.solver_timeout_secs.map(Float).unwrap_or(Unset),
        );
        c.set(
            ParameterKey::TimeRange,
            Ints(vec![self.time_range.first as i64, self.time_range.last as i64]),
        );
        c.set(ParameterKey::XRange, Ints(vec![self.x_range.0, self.x_range.1]));
        c.set(ParameterKey::YRange, Ints(vec![self.y_range.0, self.y_range.1]));
        c.set(ParameterKey::ZRange, Ints(vec![self.z_range.0, self.z_range.1]));
        c.set(
            ParameterKey::SizeRange,
            Ints(vec![self.size_range.0 as i64, self.size_range.1 as i64]),
        );
        c.set(ParameterKey::Scales, Floats(self.scales.to_vec()));
        c.set(ParameterKey::Ndim, Int(self.ndim as i64));
        c
    }
}

// ============================================================================
// CONFIGURATION MAP
// ============================================================================

/// Named configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKey {
    MaxDist,
    MaxObj,
    DivThreshold,
    AvgSize,
    WithTracklets,
    SizeDependent,
    DivWeight,
    TransWeight,
    WithDivisions,
    WithOpticalCorrection,
    WithClassifierPrior,
    WithMergerResolution,
    BorderAwareWidth,
    WithArmaCoordinates,
    AppearanceCost,
    DisappearanceCost,
    SolverTimeout,
    TimeRange,
    XRange,
    YRange,
    ZRange,
    SizeRange,
    Scales,
    Ndim,
}

impl ParameterKey {
    /// Keys whose change invalidates the hypothesis graph.
    pub const TOPOLOGY: [ParameterKey; 15] = [
        ParameterKey::MaxObj,
        ParameterKey::SizeDependent,
        ParameterKey::MaxDist,
        ParameterKey::WithDivisions,
        ParameterKey::DivThreshold,
        ParameterKey::AvgSize,
        ParameterKey::WithClassifierPrior,
        ParameterKey::WithOpticalCorrection,
        ParameterKey::TimeRange,
        ParameterKey::XRange,
        ParameterKey::YRange,
        ParameterKey::ZRange,
        ParameterKey::SizeRange,
        ParameterKey::Scales,
        ParameterKey::Ndim,
    ];

    pub fn is_topology(&self) -> bool {
        Self::TOPOLOGY.contains(self)
    }
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Unset,
}

/// Named parameters of one tracking run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    values: BTreeMap<ParameterKey, ParamValue>,
}

impl Configuration {
    pub fn set(&mut self, key: ParameterKey, value: ParamValue) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: ParameterKey) -> Option<&ParamValue> {
        self.values.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = ParameterKey> + '_ {
        self.values.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys of `next` whose value differs from (or is absent in) `self`.
    pub fn changed_keys(&self, next: &Configuration) -> BTreeSet<ParameterKey> {
        next.values
            .iter()
            .filter(|(key, value)| self.values.get(key) != Some(*value))
            .map(|(key, _)| *key)
            .collect()
    }
}

// ============================================================================
// CHANGE TRACKER
// ============================================================================

/// Outcome of comparing a new configuration with the committed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDiff {
    pub changed: BTreeSet<ParameterKey>,
    pub rebuild_required: bool,
}

impl ParameterDiff {
    /// Diffs `next` against `previous` (`None` before the first commit).
    pub fn compute(
        previous: Option<&Configuration>,
        next: &Configuration,
        graph_exists: bool,
        force: bool,
    ) -> Self {
        let changed = match previous {
            Some(previous) => previous.changed_keys(next),
            None => next.keys().collect(),
        };
        let topology_changed = changed.iter().any(ParameterKey::is_topology);
        Self {
            rebuild_required: topology_changed || !graph_exists || force,
            changed,
        }
    }

    pub fn topology_changed(&self) -> bool {
        self.changed.iter().any(ParameterKey::is_topology)
    }

    pub fn weights_changed(&self) -> bool {
        self.changed.iter().any(|key| !key.is_topology())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TrackRequest {
        TrackRequest::new(TimeRange::new(0, 4), [5, 64, 48, 1, 1])
    }

    #[test]
    fn test_request_defaults_from_shape() {
        let req = request();
        assert_eq!(req.ndim, 2);
        assert_eq!(req.x_range, (0, 64));
        let fov = req.field_of_view();
        assert_eq!(fov.upper, [63.0, 47.0, 0.0]);
        assert!(fov.is_flat());
    }

    #[test]
    fn test_first_diff_marks_everything_changed() {
        let config = request().to_configuration();
        let diff = ParameterDiff::compute(None, &config, false, false);
        assert_eq!(diff.changed.len(), config.len());
        assert!(diff.rebuild_required);
    }

    #[test]
    fn test_weight_change_does_not_require_rebuild() {
        let old = request().to_configuration();
        let mut req = request();
        req.parameters.trans_weight = 42.0;
        req.parameters.appearance_cost = 100.0;
        let diff = ParameterDiff::compute(Some(&old), &req.to_configuration(), true, false);

        assert_eq!(
            diff.changed,
            BTreeSet::from([ParameterKey::TransWeight, ParameterKey::AppearanceCost])
        );
        assert!(!diff.rebuild_required);
        assert!(diff.weights_changed());
    }

    #[test]
    fn test_topology_change_requires_rebuild() {
        let old = request().to_configuration();
        let mut req = request();
        req.parameters.max_obj = 3;
        let diff = ParameterDiff::compute(Some(&old), &req.to_configuration(), true, false);
        assert!(diff.topology_changed());
        assert!(diff.rebuild_required);
    }

    #[test]
    fn test_missing_graph_or_force_requires_rebuild() {
        let config = request().to_configuration();
        assert!(ParameterDiff::compute(Some(&config), &config, false, false).rebuild_required);
        assert!(ParameterDiff::compute(Some(&config), &config, true, true).rebuild_required);
        assert!(!ParameterDiff::compute(Some(&config), &config, true, false).rebuild_required);
    }

    #[test]
    fn test_parameters_from_partial_json() {
        let params = TrackingParameters::from_json_str(r#"{"maxObj": 4, "solverTimeoutSecs": 2.5}"#).unwrap();
        assert_eq!(params.max_obj, 4);
        assert_eq!(params.max_dist, 30.0);
        assert_eq!(params.solver_timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_configuration_json_uses_named_keys() {
        let json = serde_json::to_string(&request().to_configuration()).unwrap();
        assert!(json.contains("\"maxObj\""));
        assert!(json.contains("\"timeRange\""));
    }
}
