//! The committed result of the last successful `track()` call.

use crate::merger_resolution::{MergerMap, ResolvedMapping};
use crate::parameters::Configuration;
use crate::relabel::ColorAssignment;
use lineage_env::{CoordinateMap, EventSequence, TimeRange, Timestep};
use serde::{Deserialize, Serialize};

/// Everything region reads depend on, swapped as one unit on commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommittedState {
    /// Number of successful commits so far (0 = never tracked)
    pub version: u64,

    /// Flattened parameters the events were computed with
    pub configuration: Configuration,

    /// Most recently tracked range, `None` before the first commit
    pub time_range: Option<TimeRange>,

    pub events: EventSequence,
    pub resolved: ResolvedMapping,
    pub mergers: MergerMap,
    pub colors: ColorAssignment,

    /// Accumulated merger coordinates
    pub coordinates: CoordinateMap,
}

impl CommittedState {
    /// True if `t` lies in the most recently tracked range.
    pub fn is_tracked(&self, t: Timestep) -> bool {
        self.time_range.is_some_and(|range| range.contains(t))
    }

    /// Pretty JSON rendering, stable across identical commits.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
