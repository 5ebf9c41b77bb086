//! Production implementation of LinkageObserver using `tracing`.

use crate::types::{LinkageSummary, ReconciliationNotice, UnlinkedEvent};
use crate::LinkageObserver;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Production observer backed by the `tracing` facade.
///
/// This is the "real" implementation used by batch jobs. Progress goes out
/// at DEBUG, unlinked events at WARN and summaries at INFO; the installed
/// subscriber decides what is kept.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    /// Label attached to every record (e.g. the SPC date being processed)
    label: Option<String>,
}

impl TracingObserver {
    /// Creates a new TracingObserver.
    pub fn new() -> Self {
        Self { label: None }
    }
    
    /// Creates an observer that tags every record with `label`.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self { label: Some(label.into()) }
    }
    
    /// Creates an Arc-wrapped observer for sharing across periods.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
    
    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("-")
    }
}

impl LinkageObserver for TracingObserver {
    fn progress(&self, message: &str) {
        debug!(label = self.label(), "{}", message);
    }
    
    fn unlinked_event(&self, event: &UnlinkedEvent) {
        warn!(
            label = self.label(),
            time = event.time_unix_sec,
            "Event at {:.2} deg N and {:.2} deg E (storm box {}) was not linked to any storm",
            event.latitude_deg,
            event.longitude_deg,
            event.storm_box
        );
    }
    
    fn summary(&self, summary: &LinkageSummary) {
        info!(label = self.label(), "{}", summary);
    }
    
    fn reconciliation(&self, notice: &ReconciliationNotice) {
        match notice {
            ReconciliationNotice::SinglePeriod { .. } => warn!(label = self.label(), "{}", notice),
            _ => info!(label = self.label(), "{}", notice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LatLngBox;
    
    #[test]
    fn test_tracing_observer_accepts_all_notices() {
        // No subscriber installed: calls must still be no-ops, not panics.
        let observer = TracingObserver::with_label("20110427");
        observer.progress("Interpolating storms");
        observer.unlinked_event(&UnlinkedEvent {
            time_unix_sec: 0,
            latitude_deg: 35.0,
            longitude_deg: 265.0,
            storm_box: LatLngBox {
                min_latitude_deg: 34.0,
                max_latitude_deg: 36.0,
                min_longitude_deg: 264.0,
                max_longitude_deg: 266.0,
            },
        });
        observer.summary(&LinkageSummary::default());
        observer.reconciliation(&ReconciliationNotice::SinglePeriod { period: "20110427".into() });
        assert_eq!(observer.label(), "20110427");
    }
}
