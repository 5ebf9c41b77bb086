//! StormLink Core - Severe-Weather Event to Storm-Cell Linkage
//!
//! This library attaches point hazards (wind reports, tornado tracks) and
//! tornado-warning polygons to the storm cells that produced them:
//! 1. **Projection**: one azimuthal equidistant frame per run, centred on the storms
//! 2. **Lineage**: storm objects as a DAG of secondary cells with splits and mergers
//! 3. **Interpolation**: storm outlines moved to arbitrary event times
//! 4. **Matching**: nearest storm per event, polygon-in test then vertex distance
//! 5. **Reversal**: per-storm event lists, including simple predecessors
//! 6. **Reconciliation**: stitching adjacent processing periods back together

pub mod config;
pub mod error;
pub mod events;
pub mod interpolation;
pub mod linkage;
pub mod matching;
pub mod persistence;
pub mod projection;
pub mod reconciliation;
pub mod reversal;
pub mod storm_graph;
pub mod warnings;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export key types for convenience
pub use config::{EventType, LinkageConfig, LinkageMetadata, TornadoOptions, WarningLinkageConfig};
pub use error::{LinkageError, Result};
pub use events::{EventRecord, TornadoReport, TornadoWarning, WindObservation};
pub use linkage::{link_storms_to_tornadoes, link_storms_to_winds, LinkageResult};
pub use persistence::{share_linkages, LinkageBundle, LinkagePeriod};
pub use projection::AzimuthalEquidistant;
pub use reconciliation::{reconcile_tornado_events, share_linkages_with_predecessors, share_tornado_linkages};
pub use reversal::{LinkedEvent, StormEventLinks};
pub use storm_graph::{StormGraph, StormObject};
pub use warnings::{link_warnings_to_storms, WarningLinkage};
