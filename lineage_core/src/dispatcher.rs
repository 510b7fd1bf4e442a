//! Region reads of the two output volumes.
//!
//! ```text
//!   NotReady ──► Delegating ──► Masking ──► Composing ──► Done
//!                 raw read      per frame    tracked over raw
//! ```
//!
//! `Output` masks whole frames (untracked frames contribute nothing) but
//! composes per pixel (raw labels show wherever the tracked result is 0).
//! `MergerOutput` only masks; it is served through the blockwise cache.

use crate::relabel::{highlight_mergers, relabel};
use crate::state::CommittedState;
use lineage_env::{EnvError, LabelArray, LabelSource, Roi, Timestep};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Progress of one region request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    NotReady,
    Delegating,
    Masking,
    Composing,
    Done,
}

/// Which output volume a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// Tracked labels composed over the raw segmentation
    Output,

    /// Merger highlight volume
    MergerOutput,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Output => write!(f, "Output"),
            OutputKind::MergerOutput => write!(f, "MergerOutput"),
        }
    }
}

/// One region request and its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRequest {
    pub kind: OutputKind,
    pub roi: Roi,
    state: RequestState,
}

impl RegionRequest {
    pub fn new(kind: OutputKind, roi: Roi) -> Self {
        Self {
            kind,
            roi,
            state: RequestState::NotReady,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    fn advance(&mut self, next: RequestState) {
        trace!(kind = %self.kind, roi = %self.roi, from = ?self.state, to = ?next, "region request");
        self.state = next;
    }
}

/// Answers region reads from a committed state and the raw segmentation.
///
/// Never touches the solver; all inputs are read-only.
pub struct RegionDispatcher<'a, L: ?Sized> {
    labels: &'a L,
    state: &'a CommittedState,
}

impl<'a, L: LabelSource + ?Sized> RegionDispatcher<'a, L> {
    pub fn new(labels: &'a L, state: &'a CommittedState) -> Self {
        Self { labels, state }
    }

    /// Tracked-label volume for `roi`. Source errors pass through unchanged.
    pub fn output(&self, roi: &Roi) -> Result<LabelArray, EnvError> {
        let mut request = RegionRequest::new(OutputKind::Output, *roi);
        self.output_request(&mut request)
    }

    pub fn output_request(&self, request: &mut RegionRequest) -> Result<LabelArray, EnvError> {
        let roi = request.roi;
        request.advance(RequestState::Delegating);
        let mut raw = self.labels.read(&roi)?;

        request.advance(RequestState::Masking);
        let mut tracked = raw.clone();
        let origin = spatial_origin(&roi);
        let state = self.state;
        for (local, t) in timesteps(&roi) {
            if state.is_tracked(t) && state.resolved.has_resolution(t) {
                for channel in channels(&roi) {
                    let mut frame = tracked.frame(local, channel, origin);
                    relabel(&mut frame, t, &state.resolved, &state.coordinates, &state.colors);
                    tracked.store_frame(local, channel, &frame);
                }
            } else {
                tracked.clear_frame(local);
            }
        }

        request.advance(RequestState::Composing);
        raw.overlay(&tracked);

        request.advance(RequestState::Done);
        Ok(raw)
    }

    /// Merger highlight volume for `roi`, computed directly (no cache).
    pub fn merger_output(&self, roi: &Roi) -> Result<LabelArray, EnvError> {
        let mut request = RegionRequest::new(OutputKind::MergerOutput, *roi);
        self.merger_output_request(&mut request)
    }

    pub fn merger_output_request(&self, request: &mut RegionRequest) -> Result<LabelArray, EnvError> {
        let roi = request.roi;
        request.advance(RequestState::Delegating);
        let mut result = self.labels.read(&roi)?;

        request.advance(RequestState::Masking);
        let origin = spatial_origin(&roi);
        for (local, t) in timesteps(&roi) {
            match self.state.mergers.frame(t) {
                Some(mergers) if self.state.is_tracked(t) && !mergers.is_empty() => {
                    for channel in channels(&roi) {
                        let mut frame = result.frame(local, channel, origin);
                        highlight_mergers(&mut frame, mergers);
                        result.store_frame(local, channel, &frame);
                    }
                }
                _ => result.clear_frame(local),
            }
        }

        request.advance(RequestState::Done);
        Ok(result)
    }
}

fn spatial_origin(roi: &Roi) -> [i64; 3] {
    [roi.start[1] as i64, roi.start[2] as i64, roi.start[3] as i64]
}

/// Local channel indices of `roi`; channels share one id space.
fn channels(roi: &Roi) -> std::ops::Range<usize> {
    0..roi.shape()[4]
}

/// (local index, global timestep) pairs of `roi`.
fn timesteps(roi: &Roi) -> impl Iterator<Item = (usize, Timestep)> {
    roi.timesteps()
        .enumerate()
        .map(|(local, t)| (local, t as Timestep))
}
