//! StormLink Deterministic Simulation Testing (DST) Harness
//!
//! Builds synthetic storm outbreaks whose ground truth is known, runs the
//! linkage engine on them and checks the result against that truth.
//!
//! # Core Principle: Seeded Ground Truth
//!
//! All sources of non-determinism are controlled:
//! - **Storms**: cells move on straight lines and split or merge on a fixed
//!   tracking interval, so every report's true cell is known
//! - **Reports**: positions are drawn inside (or far from) a chosen cell
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ScenarioRunner                 │
//! │  ┌───────────────┐      ┌─────────────────┐  │
//! │  │  StormOracle  │─────►│ stormlink_core  │  │
//! │  │ (cells, wind, │      │ link / reverse  │  │
//! │  │  tornadoes)   │      │ / reconcile     │  │
//! │  └───────────────┘      └────────┬────────┘  │
//! │          ▲                       │           │
//! │          │  truth                ▼           │
//! │  ┌───────┴───────────────────────────────┐   │
//! │  │ invariant checks + RecordingObserver  │   │
//! │  └───────────────────────────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stormlink_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::SplitLineage);
//! assert!(result.passed);
//! ```

mod error;
mod oracle;
mod recorder;
pub mod scenarios;
mod runner;
mod exporter;

pub use error::SimError;
pub use oracle::{
    StormOracle, SyntheticCell, BASE_TIME_UNIX_SEC, ORIGIN_LATITUDE_DEG, ORIGIN_LONGITUDE_DEG,
    TRACKING_INTERVAL_SEC,
};
pub use recorder::RecordingObserver;
pub use runner::{check_lineage, check_linkage, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use exporter::SimExport;
