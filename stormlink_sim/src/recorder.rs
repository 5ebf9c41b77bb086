//! Recording observer for deterministic assertions.

use std::sync::{Arc, Mutex};
use stormlink_env::{LinkageObserver, LinkageSummary, ReconciliationNotice, UnlinkedEvent};

#[derive(Debug, Default)]
struct Recorded {
    progress: Vec<String>,
    unlinked: Vec<UnlinkedEvent>,
    summaries: Vec<LinkageSummary>,
    notices: Vec<ReconciliationNotice>,
}

/// Observer that keeps every notice in memory.
///
/// Clones share the same record, so a runner can hand one clone to the
/// engine and inspect another afterwards.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }
    
    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut guard = self.recorded.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
    
    pub fn progress_count(&self) -> usize {
        self.with(|r| r.progress.len())
    }
    
    pub fn unlinked_events(&self) -> Vec<UnlinkedEvent> {
        self.with(|r| r.unlinked.clone())
    }
    
    pub fn summaries(&self) -> Vec<LinkageSummary> {
        self.with(|r| r.summaries.clone())
    }
    
    pub fn last_summary(&self) -> Option<LinkageSummary> {
        self.with(|r| r.summaries.last().cloned())
    }
    
    pub fn notices(&self) -> Vec<ReconciliationNotice> {
        self.with(|r| r.notices.clone())
    }
    
    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.with(|r| *r = Recorded::default());
    }
}

impl LinkageObserver for RecordingObserver {
    fn progress(&self, message: &str) {
        self.with(|r| r.progress.push(message.to_string()));
    }
    
    fn unlinked_event(&self, event: &UnlinkedEvent) {
        self.with(|r| r.unlinked.push(event.clone()));
    }
    
    fn summary(&self, summary: &LinkageSummary) {
        self.with(|r| r.summaries.push(summary.clone()));
    }
    
    fn reconciliation(&self, notice: &ReconciliationNotice) {
        self.with(|r| r.notices.push(notice.clone()));
    }
}
