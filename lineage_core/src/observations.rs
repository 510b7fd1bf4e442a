//! Builds the per-timestep observation store from a feature provider.

use crate::error::TrackingError;
use crate::parameters::TrackRequest;
use lineage_env::{FeatureProvider, ObjectFeatures, Observation, ObservationStore};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Checks that an attached object-count classifier matches `max_obj`.
///
/// Only relevant when the classifier prior is enabled.
pub fn check_classifier<F: FeatureProvider + ?Sized>(
    provider: &F,
    request: &TrackRequest,
) -> Result<(), TrackingError> {
    if !request.parameters.with_classifier_prior {
        return Ok(());
    }
    let expected = request.parameters.max_obj as usize + 1;
    match provider.num_labels() {
        None => Err(TrackingError::not_ready(
            "Classifier not ready yet. Did you forget to train the object count classifier?",
        )),
        Some(found) if found != expected => {
            Err(TrackingError::LabelCountMismatch { expected, found })
        }
        Some(_) => Ok(()),
    }
}

/// Assembles the observation store for `request.time_range`.
///
/// Objects outside the size range or whose center lies outside the spatial
/// ranges are dropped; centers are scaled to physical units.
///
/// # Errors
/// * `TrackingError::EmptyFrame` - a requested timestep has no observations left
/// * `TrackingError::NotReady` / `LabelCountMismatch` - classifier prior enabled
///   but probabilities missing or of the wrong length
/// * `TrackingError::Source` - the provider failed
pub fn build_store<F: FeatureProvider + ?Sized>(
    provider: &F,
    request: &TrackRequest,
) -> Result<ObservationStore, TrackingError> {
    let table = provider.features(request.time_range)?;
    let params = &request.parameters;
    let scales = request.scale_vector();
    let expected_labels = params.max_obj as usize + 1;

    let mut frames = BTreeMap::new();
    for t in request.time_range.iter() {
        let mut observations = Vec::new();
        if let Some(features) = table.get(&t) {
            for (&id, f) in features {
                if id == 0 || !accepts(request, f) {
                    continue;
                }
                let class_probabilities = if params.with_classifier_prior {
                    match &f.class_probabilities {
                        None => {
                            return Err(TrackingError::not_ready(format!(
                                "detection probabilities missing for object {id} at timestep {t}"
                            )))
                        }
                        Some(p) if p.len() != expected_labels => {
                            return Err(TrackingError::LabelCountMismatch {
                                expected: expected_labels,
                                found: p.len(),
                            })
                        }
                        Some(p) => Some(p.clone()),
                    }
                } else {
                    None
                };
                observations.push(Observation {
                    timestep: t,
                    id,
                    center: f.center.component_mul(&scales),
                    lower: f.lower,
                    upper: f.upper,
                    size: f.count,
                    class_probabilities,
                    division_probability: if params.with_divisions {
                        f.division_probability
                    } else {
                        None
                    },
                });
            }
        }
        if observations.is_empty() {
            return Err(TrackingError::EmptyFrame { timestep: t });
        }
        debug!(timestep = t, objects = observations.len(), "frame observations");
        frames.insert(t, observations);
    }

    let ceilings = table
        .iter()
        .filter_map(|(&t, features)| features.keys().next_back().map(|&id| (t, id)))
        .collect();
    let mut store = ObservationStore::new(frames, request.ndim).with_label_ceilings(ceilings);
    if params.avg_size > 0.0 {
        store = store.with_median_size(params.avg_size);
    }
    info!(
        observations = store.len(),
        median_obj_size = store.median_size(),
        "observation store built"
    );
    Ok(store)
}

fn accepts(request: &TrackRequest, f: &ObjectFeatures) -> bool {
    let (min_size, max_size) = request.size_range;
    if f.count < min_size || f.count >= max_size {
        return false;
    }
    let inside = |value: f64, (lo, hi): (i64, i64)| value >= lo as f64 && value < hi as f64;
    inside(f.center.x, request.x_range)
        && inside(f.center.y, request.y_range)
        && (request.ndim == 2 || inside(f.center.z, request.z_range))
}
