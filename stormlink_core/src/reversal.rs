//! Reversal of event-to-storm links into per-storm event lists.
//!
//! Each linked event is pinned to one "main" storm object (the object of its
//! secondary ID closest in time to the recorded storm time). The event is
//! then copied onto every simple predecessor of that object that is not
//! later than the event. Merging predecessors are only flagged; their event
//! lists are filled when adjacent periods are reconciled.

use crate::error::Result;
use crate::events::{EventAttributes, EventRecord};
use crate::storm_graph::{StormGraph, StormObject};
use serde::{Deserialize, Serialize};

/// One event as seen from one storm object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedEvent {
    pub time: i64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub attributes: EventAttributes,
    
    /// Distance recorded when the event was matched
    pub linkage_distance_metres: f64,
    
    /// Event time minus storm-object time
    pub relative_time_sec: i64,
    
    /// True only on the object the event was matched to
    pub main_object: bool,
}

/// A storm object with the events linked to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormEventLinks {
    pub object: StormObject,
    
    pub events: Vec<LinkedEvent>,
    
    /// Reached from some main object only through a merger
    #[serde(default)]
    pub merging_predecessor: bool,
}

impl StormEventLinks {
    pub fn new(object: StormObject) -> Self {
        Self {
            object,
            events: Vec::new(),
            merging_predecessor: false,
        }
    }
    
    /// Number of events for which this is the main object.
    pub fn num_main_events(&self) -> usize {
        self.events.iter().filter(|e| e.main_object).count()
    }
}

/// Builds per-storm event lists for every node of `graph`, in row order.
pub fn reverse_linkages(graph: &StormGraph, events: &[EventRecord]) -> Result<Vec<StormEventLinks>> {
    let mut table: Vec<StormEventLinks> = graph
        .objects()
        .cloned()
        .map(StormEventLinks::new)
        .collect();
    
    for event in events {
        let Some(linkage) = &event.linkage else { continue };
        let Some(main_row) = graph.closest_object_in_cell(&linkage.nearest_secondary_id, linkage.nearest_time)
        else {
            continue;
        };
        
        let predecessors = graph.classify_predecessors(main_row)?;
        for &row in &predecessors.merging {
            table[row].merging_predecessor = true;
        }
        
        for &row in &predecessors.simple {
            let storm_time = graph.node(row).valid_time();
            if storm_time > event.time {
                continue;
            }
            table[row].events.push(LinkedEvent {
                time: event.time,
                latitude_deg: event.latitude_deg,
                longitude_deg: event.longitude_deg,
                attributes: event.attributes.clone(),
                linkage_distance_metres: linkage.distance_metres,
                relative_time_sec: event.time - storm_time,
                main_object: row == main_row,
            });
        }
    }
    
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLinkage;
    use crate::fixtures::{merger_graph, split_graph};
    
    fn linked_tornado(time: i64, secondary_id: &str, nearest_time: i64) -> EventRecord {
        let mut event = EventRecord::new(
            time,
            35.0,
            265.0,
            EventAttributes::Tornado {
                tornado_id: "t1".to_string(),
                ef_rating: "EF2".to_string(),
            },
        );
        event.linkage = Some(EventLinkage {
            nearest_secondary_id: secondary_id.to_string(),
            nearest_time,
            distance_metres: 250.0,
        });
        event
    }
    
    #[test]
    fn test_event_reaches_split_parent() {
        // rows: 0,1 = A; 2 = B; 3 = C
        let graph = split_graph();
        let table = reverse_linkages(&graph, &[linked_tornado(1650, "B", 1600)]).unwrap();
        
        assert_eq!(table[2].events.len(), 1);
        assert!(table[2].events[0].main_object);
        assert_eq!(table[2].events[0].relative_time_sec, 50);
        
        for row in [0, 1] {
            assert_eq!(table[row].events.len(), 1);
            assert!(!table[row].events[0].main_object);
        }
        assert_eq!(table[0].events[0].relative_time_sec, 650);
        assert_eq!(table[0].events[0].linkage_distance_metres, 250.0);
        
        // Sibling gets nothing
        assert!(table[3].events.is_empty());
    }
    
    #[test]
    fn test_merging_predecessors_flagged_not_filled() {
        // rows: 0 = A, 1 = B, 2,3 = C
        let graph = merger_graph();
        let table = reverse_linkages(&graph, &[linked_tornado(1600, "C", 1600)]).unwrap();
        
        assert!(table[0].merging_predecessor && table[1].merging_predecessor);
        assert!(table[0].events.is_empty() && table[1].events.is_empty());
        assert_eq!(table[2].events.len(), 1);
        assert_eq!(table[3].num_main_events(), 1);
    }
    
    #[test]
    fn test_predecessors_after_event_are_skipped() {
        let graph = merger_graph();
        // Matched to C at 1600 but the event itself happened at 1200
        let table = reverse_linkages(&graph, &[linked_tornado(1200, "C", 1600)]).unwrap();
        assert!(table[2].events.is_empty());
        assert!(table[3].events.is_empty());
    }
    
    #[test]
    fn test_unlinked_events_are_ignored() {
        let graph = split_graph();
        let mut event = linked_tornado(1650, "B", 1600);
        event.linkage = None;
        let table = reverse_linkages(&graph, &[event]).unwrap();
        assert_eq!(table.len(), 4);
        assert!(table.iter().all(|s| s.events.is_empty() && !s.merging_predecessor));
    }
}
