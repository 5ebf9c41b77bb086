//! Core reporting trait for the StormLink engine.

use crate::types::{LinkageSummary, ReconciliationNotice, UnlinkedEvent};

/// The central interface for reporting from a linkage run.
///
/// This trait abstracts "where messages go" so that the linkage engine can
/// run both in production (tracing) and in the simulation harness.
///
/// # Implementations
///
/// - **Production**: `TracingObserver` - forwards to `tracing` macros
/// - **Simulation**: `RecordingObserver` - keeps every notice in memory
/// - **Silent**: `NullObserver` - drops everything
///
/// # Determinism
///
/// Observers are write-only from the engine's point of view: nothing an
/// observer does can change linkage results.
pub trait LinkageObserver: Send + Sync {
    /// Reports a coarse progress step ("Interpolating storms to ...").
    fn progress(&self, message: &str);
    
    /// Reports one event that ended the run without a storm.
    ///
    /// Called once per unlinked event, after all matching passes.
    fn unlinked_event(&self, event: &UnlinkedEvent);
    
    /// Reports the end-of-run tally for one event table.
    fn summary(&self, summary: &LinkageSummary);
    
    /// Reports a decision taken while stitching adjacent periods.
    fn reconciliation(&self, notice: &ReconciliationNotice);
}

/// Observer that discards every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl LinkageObserver for NullObserver {
    fn progress(&self, _message: &str) {}
    
    fn unlinked_event(&self, _event: &UnlinkedEvent) {}
    
    fn summary(&self, _summary: &LinkageSummary) {}
    
    fn reconciliation(&self, _notice: &ReconciliationNotice) {}
}
