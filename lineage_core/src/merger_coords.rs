//! Extraction of per-pixel coordinates for merged observations.

use lineage_env::{
    CoordinateMap, EnvError, EventSequence, LabelSource, ObservationStore, PixelCoordinates, Roi,
};
use tracing::{debug, warn};

/// Records the pixel coordinates of every merger in `events`.
///
/// For each `Merger` event the bounding box of the merged observation is read
/// from `labels` and every pixel carrying the merged id is stored under
/// `(t, id)`. Entries of other keys are left alone. Returns the number of
/// entries written.
pub fn extract_merger_coordinates<L: LabelSource + ?Sized>(
    store: &ObservationStore,
    labels: &L,
    events: &EventSequence,
    coordinates: &mut CoordinateMap,
) -> Result<usize, EnvError> {
    let ndim = store.ndim();
    let mut written = 0;

    for (t, id, _count) in events.mergers() {
        let Some(obs) = store.get(t, id) else {
            warn!(timestep = t, id, "merger id not in observation store, skipping");
            continue;
        };
        let Some(roi) = bounding_roi(t as usize, obs.lower, obs.upper, ndim) else {
            warn!(timestep = t, id, lower = ?obs.lower, "invalid bounding box, skipping");
            continue;
        };

        let excerpt = labels.read(&roi)?;
        let [_, sx, sy, sz, _] = excerpt.shape();
        let mut pixels = PixelCoordinates::with_capacity(ndim, obs.size as usize);
        for x in 0..sx {
            for y in 0..sy {
                for z in 0..sz {
                    if excerpt.get([0, x, y, z, 0]) == id {
                        pixels.push(&[
                            obs.lower[0] + x as i64,
                            obs.lower[1] + y as i64,
                            obs.lower[2] + z as i64,
                        ]);
                    }
                }
            }
        }
        debug!(timestep = t, id, pixels = pixels.len(), "merger coordinates extracted");
        coordinates.insert(t, id, pixels);
        written += 1;
    }
    Ok(written)
}

/// ROI of an inclusive bounding box at `t`; 2-D data reads the single z plane.
fn bounding_roi(t: usize, lower: [i64; 3], upper: [i64; 3], ndim: usize) -> Option<Roi> {
    let axis = |i: usize| -> Option<(usize, usize)> {
        let lo = usize::try_from(lower[i]).ok()?;
        let hi = usize::try_from(upper[i]).ok()?;
        (lo <= hi).then_some((lo, hi + 1))
    };
    let (x0, x1) = axis(0)?;
    let (y0, y1) = axis(1)?;
    let (z0, z1) = if ndim == 3 { axis(2)? } else { (0, 1) };
    Some(Roi::new([t, x0, y0, z0, 0], [t + 1, x1, y1, z1, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{blob_labels, blob_store};
    use lineage_env::Event;

    fn merger_events() -> EventSequence {
        let mut events = EventSequence::new();
        events.push(1, Event::Merger { id: 1, count: 2 });
        events
    }

    #[test]
    fn test_extracts_only_pixels_of_the_merged_id() {
        let store = blob_store();
        let labels = blob_labels();
        let mut coordinates = CoordinateMap::new();

        let written =
            extract_merger_coordinates(&store, &labels, &merger_events(), &mut coordinates).unwrap();
        assert_eq!(written, 1);

        let pixels = coordinates.get(1, 1).unwrap();
        assert_eq!(pixels.ndim(), 2);
        assert_eq!(pixels.len(), 8);
        assert!(pixels.iter().all(|c| c[1] == 1 || c[1] == 2));
        assert!(pixels.iter().any(|c| c == [5, 2]));
    }

    #[test]
    fn test_extraction_is_additive() {
        let store = blob_store();
        let labels = blob_labels();
        let mut coordinates = CoordinateMap::new();
        coordinates.insert(0, 9, PixelCoordinates::new(2));

        extract_merger_coordinates(&store, &labels, &merger_events(), &mut coordinates).unwrap();
        assert!(coordinates.contains(0, 9));
        assert!(coordinates.contains(1, 1));
    }

    #[test]
    fn test_unknown_merger_id_is_skipped() {
        let store = blob_store();
        let labels = blob_labels();
        let mut events = EventSequence::new();
        events.push(1, Event::Merger { id: 42, count: 2 });
        let mut coordinates = CoordinateMap::new();

        let written = extract_merger_coordinates(&store, &labels, &events, &mut coordinates).unwrap();
        assert_eq!(written, 0);
        assert!(coordinates.is_empty());
    }

    #[test]
    fn test_bounding_roi_collapses_z_for_2d() {
        let roi = bounding_roi(3, [1, 2, 7], [4, 5, 9], 2).unwrap();
        assert_eq!(roi, Roi::new([3, 1, 2, 0, 0], [4, 5, 6, 1, 1]));
        let roi = bounding_roi(3, [1, 2, 7], [4, 5, 9], 3).unwrap();
        assert_eq!(roi.stop[3], 10);
        assert!(bounding_roi(0, [-1, 0, 0], [2, 2, 0], 2).is_none());
    }
}
