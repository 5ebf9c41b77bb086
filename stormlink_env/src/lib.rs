//! StormLink Environment Abstraction Layer
//!
//! This crate provides the reporting seam that lets the StormLink linkage
//! engine run identically in **Production** (structured `tracing` output)
//! and in the **Simulation** harness (notices recorded for assertions).
//!
//! # Core Concept: Injected Observers
//!
//! The linkage engine never prints and never touches global logging state
//! directly. Everything a run wants to report goes through a
//! [`LinkageObserver`] handed in by the caller:
//! - Progress (`progress()`)
//! - Events left without a storm (`unlinked_event()`)
//! - End-of-run tallies (`summary()`)
//! - Cross-period stitching decisions (`reconciliation()`)
//!
//! # Example
//!
//! ```ignore
//! use stormlink_env::{LinkageObserver, TracingObserver};
//!
//! let observer = TracingObserver::new();
//! let result = stormlink_core::link_storms_to_winds(storms, winds, &config, &observer)?;
//! ```

mod observer;
mod types;
mod tracing_impl;

pub use observer::{LinkageObserver, NullObserver};
pub use types::{LatLngBox, LinkageSummary, ReconciliationNotice, TornadoTally, UnlinkedEvent};
pub use tracing_impl::TracingObserver;
