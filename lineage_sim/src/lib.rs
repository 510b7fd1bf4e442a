//! Lineage Deterministic Simulation Harness
//!
//! Runs the tracking engine end to end against synthetic cultures whose
//! ground truth is known exactly.
//!
//! # Core Principle: Seeded Worlds
//!
//! Every source of variation derives from a single 64-bit seed:
//! - **Placement**: initial disc positions and headings
//! - **Physics**: per-frame position jitter
//! - **Events**: merges come from geometry, divisions are scheduled
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       ScenarioRunner                      │
//! │                                                           │
//! │  ┌──────────┐  rasterize  ┌───────────┐                   │
//! │  │  Oracle  │────────────►│ SimWorld  │  labels+features  │
//! │  │ (discs)  │             └─────┬─────┘                   │
//! │  └────┬─────┘                   ▼                         │
//! │       │ truth        ┌────────────────────┐               │
//! │       │              │  TrackingSession   │◄─ GreedySolver│
//! │       ▼              └─────────┬──────────┘               │
//! │   assertions ◄──── Output / MergerOutput reads            │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lineage_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Crossing);
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod oracle;
mod runner;
mod solver;
mod world;
pub mod scenarios;

pub use error::ScenarioError;
pub use exporter::{DiscPosition, MergerRegion, SimExport, SimFrame, TrackedObject};
pub use oracle::{rasterize, DiscSnapshot, FrameTruth, GroundTruthDisc, Oracle, Rendered};
pub use runner::{load_parameters, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use solver::{Candidate, GreedyGraph, GreedySolver};
pub use world::{SimConfig, SimSession, SimWorld};
