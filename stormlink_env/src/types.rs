//! Notice types exchanged between the linkage engine and its observers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Latitude/longitude box spanned by the storm centroids of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLngBox {
    pub min_latitude_deg: f64,
    pub max_latitude_deg: f64,
    pub min_longitude_deg: f64,
    pub max_longitude_deg: f64,
}

impl LatLngBox {
    /// Returns true if the point lies in or on the box.
    pub fn contains(&self, latitude_deg: f64, longitude_deg: f64) -> bool {
        latitude_deg >= self.min_latitude_deg
            && latitude_deg <= self.max_latitude_deg
            && longitude_deg >= self.min_longitude_deg
            && longitude_deg <= self.max_longitude_deg
    }
}

impl fmt::Display for LatLngBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}] deg N x [{:.2}, {:.2}] deg E",
            self.min_latitude_deg,
            self.max_latitude_deg,
            self.min_longitude_deg,
            self.max_longitude_deg
        )
    }
}

/// An event that no storm claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlinkedEvent {
    /// Event time (Unix seconds)
    pub time_unix_sec: i64,
    
    pub latitude_deg: f64,
    
    pub longitude_deg: f64,
    
    /// Storm-centroid box of the run, for comparison
    pub storm_box: LatLngBox,
}

impl UnlinkedEvent {
    /// True if the event sits inside the storm-centroid box.
    pub fn inside_storm_box(&self) -> bool {
        self.storm_box.contains(self.latitude_deg, self.longitude_deg)
    }
}

/// Unlinked-tornado tally (distinct tornado IDs rather than segments).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TornadoTally {
    pub num_tornadoes: usize,
    pub num_unlinked: usize,
    pub num_unlinked_in_box: usize,
}

/// End-of-run tally for one event table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkageSummary {
    /// "wind", "tornado" or "tornadogenesis"
    pub event_type: String,
    
    pub num_events: usize,
    
    pub num_storm_objects: usize,
    
    /// Events with no storm after all passes
    pub num_unlinked: usize,
    
    /// Subset of `num_unlinked` inside the storm-centroid box
    pub num_unlinked_in_box: usize,
    
    /// Present only when the events carry tornado IDs
    pub tornadoes: Option<TornadoTally>,
}

impl fmt::Display for LinkageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Num {} events = {} ... storm objects = {} ... unlinked events (in storm box) = {} ({})",
            self.event_type,
            self.num_events,
            self.num_storm_objects,
            self.num_unlinked,
            self.num_unlinked_in_box
        )?;
        if let Some(t) = &self.tornadoes {
            write!(
                f,
                " ... tornadoes = {} ... unlinked tornadoes (in storm box) = {} ({})",
                t.num_tornadoes, t.num_unlinked, t.num_unlinked_in_box
            )?;
        }
        Ok(())
    }
}

/// Decisions taken while stitching two adjacent processing periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationNotice {
    /// Only one period was given, so there is nothing to stitch.
    SinglePeriod { period: String },
    
    /// A tornado appeared in both periods and one copy was dropped.
    RedundantTornado {
        tornado_id: String,
        kept_early: bool,
    },
    
    /// An unresolved tornado segment was retried against successor storms.
    TornadoRetry {
        tornado_id: String,
        time_unix_sec: i64,
        linked: bool,
    },
    
    /// A period's reconciled linkages were written.
    PeriodWritten { period: String, path: String },
}

impl fmt::Display for ReconciliationNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationNotice::SinglePeriod { period } => {
                write!(f, "Only one period ({}); nothing to share", period)
            }
            ReconciliationNotice::RedundantTornado { tornado_id, kept_early } => write!(
                f,
                "Tornado \"{}\" linked in both periods; keeping the {} copy",
                tornado_id,
                if *kept_early { "early" } else { "late" }
            ),
            ReconciliationNotice::TornadoRetry { tornado_id, time_unix_sec, linked } => write!(
                f,
                "Retried tornado \"{}\" at {} against successor storms: {}",
                tornado_id,
                time_unix_sec,
                if *linked { "linked" } else { "still unlinked" }
            ),
            ReconciliationNotice::PeriodWritten { period, path } => {
                write!(f, "Wrote reconciled linkages for {} to \"{}\"", period, path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    fn sample_box() -> LatLngBox {
        LatLngBox {
            min_latitude_deg: 30.0,
            max_latitude_deg: 40.0,
            min_longitude_deg: 260.0,
            max_longitude_deg: 270.0,
        }
    }
    
    #[test]
    fn test_box_contains_edges() {
        let b = sample_box();
        assert!(b.contains(30.0, 260.0));
        assert!(b.contains(35.0, 265.0));
        assert!(!b.contains(29.99, 265.0));
        assert!(!b.contains(35.0, 270.01));
    }
    
    #[test]
    fn test_summary_display_mentions_tornadoes_only_when_present() {
        let mut summary = LinkageSummary {
            event_type: "wind".to_string(),
            num_events: 10,
            num_storm_objects: 4,
            num_unlinked: 2,
            num_unlinked_in_box: 1,
            tornadoes: None,
        };
        assert!(!summary.to_string().contains("tornadoes"));
        
        summary.tornadoes = Some(TornadoTally { num_tornadoes: 3, num_unlinked: 1, num_unlinked_in_box: 0 });
        assert!(summary.to_string().contains("unlinked tornadoes (in storm box) = 1 (0)"));
    }
}
