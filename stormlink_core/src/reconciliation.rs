//! Stitching linkages of adjacent processing periods.
//!
//! Periods are linked independently, so anything that crosses the boundary
//! between two periods needs a second look:
//! - a tornado whose track spans both periods may be linked twice
//! - a tornado segment left unlinked in one period may belong to a storm
//!   that only the other period knows about
//! - an event matched in the later period also belongs to the simple
//!   predecessors of its main object that live in the earlier period

use crate::error::{LinkageError, Result};
use crate::events::{project_events, EventRecord};
use crate::linkage::link_tornado_to_new_storm;
use crate::projection::AzimuthalEquidistant;
use crate::reversal::{reverse_linkages, LinkedEvent, StormEventLinks};
use crate::storm_graph::{ChangeType, LineageWalk, StormGraph, StormObject};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use stormlink_env::{LinkageObserver, ReconciliationNotice};

// ============================================================================
// REDUNDANT TORNADO LINKAGES
// ============================================================================

/// Earliest row of each tornado (lowest row among ties).
fn first_rows_by_tornado(events: &[EventRecord]) -> BTreeMap<&str, usize> {
    let mut first: BTreeMap<&str, usize> = BTreeMap::new();
    for (row, event) in events.iter().enumerate() {
        let Some(id) = event.tornado_id() else { continue };
        first
            .entry(id)
            .and_modify(|r| {
                if event.time < events[*r].time {
                    *r = row;
                }
            })
            .or_insert(row);
    }
    first
}

/// Keeps each tornado seen in both periods in only one of them.
///
/// The copy whose first segment is unlinked is dropped; if both are linked,
/// the one with the larger first-segment distance is dropped (ties keep the
/// early copy). Fails without touching either table if a shared tornado has
/// different start times in the two periods.
pub fn remove_redundant_tornado_linkages(
    early: &mut Vec<EventRecord>,
    late: &mut Vec<EventRecord>,
    observer: &dyn LinkageObserver,
) -> Result<()> {
    let early_first = first_rows_by_tornado(early);
    let late_first = first_rows_by_tornado(late);
    
    let mut drop_early: HashSet<String> = HashSet::new();
    let mut drop_late: HashSet<String> = HashSet::new();
    
    for (&id, &early_row) in &early_first {
        let Some(&late_row) = late_first.get(id) else { continue };
        let (e, l) = (&early[early_row], &late[late_row]);
        if e.time != l.time {
            return Err(LinkageError::InconsistentTornadoStart {
                tornado_id: id.to_string(),
                early_start_unix_sec: e.time,
                late_start_unix_sec: l.time,
            });
        }
        
        let keep_early = match (&e.linkage, &l.linkage) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(el), Some(ll)) => el.distance_metres <= ll.distance_metres,
        };
        if keep_early {
            drop_late.insert(id.to_string());
        } else {
            drop_early.insert(id.to_string());
        }
        observer.reconciliation(&ReconciliationNotice::RedundantTornado {
            tornado_id: id.to_string(),
            kept_early: keep_early,
        });
    }
    
    early.retain(|e| e.tornado_id().map_or(true, |id| !drop_early.contains(id)));
    late.retain(|e| e.tornado_id().map_or(true, |id| !drop_late.contains(id)));
    Ok(())
}

// ============================================================================
// TORNADO SHARING
// ============================================================================

/// Result of [`share_tornado_linkages`].
#[derive(Debug, Clone)]
pub struct SharedTornadoLinkages {
    pub early_events: Vec<EventRecord>,
    pub late_events: Vec<EventRecord>,
    pub early_storm_to_events: Vec<StormEventLinks>,
    pub late_storm_to_events: Vec<StormEventLinks>,
}

/// Combined storm table of two periods, first copy of each (secondary ID,
/// time) winning, with a per-row flag for objects taken from the early one.
fn combine_storms(early_storms: Vec<StormObject>, late_storms: Vec<StormObject>) -> (Vec<StormObject>, Vec<bool>) {
    let num_early_storms = early_storms.len();
    let mut seen: HashSet<(String, i64)> = HashSet::new();
    let mut storms = Vec::with_capacity(num_early_storms + late_storms.len());
    let mut storm_is_early = Vec::with_capacity(storms.capacity());
    for (k, object) in early_storms.into_iter().chain(late_storms).enumerate() {
        if seen.insert((object.secondary_id.clone(), object.valid_time)) {
            storms.push(object);
            storm_is_early.push(k < num_early_storms);
        }
    }
    (storms, storm_is_early)
}

/// Removes redundant tornado copies, then retries unresolved-but-assigned
/// segments of tornadoes seen in both periods over the combined graph.
fn relink_across_periods(
    graph: &mut StormGraph,
    early_events: &mut Vec<EventRecord>,
    late_events: &mut Vec<EventRecord>,
    max_time_before_start: i64,
    max_time_after_end: i64,
    observer: &dyn LinkageObserver,
) -> Result<()> {
    let early_ids: HashSet<String> = early_events.iter().filter_map(|e| e.tornado_id()).map(String::from).collect();
    let late_ids: HashSet<String> = late_events.iter().filter_map(|e| e.tornado_id()).map(String::from).collect();
    
    remove_redundant_tornado_linkages(early_events, late_events, observer)?;
    if graph.is_empty() {
        return Ok(());
    }
    
    let (lats, lngs): (Vec<f64>, Vec<f64>) = graph
        .objects()
        .map(|o| (o.centroid_latitude_deg, o.centroid_longitude_deg))
        .unzip();
    let projection = AzimuthalEquidistant::centred_on(&lats, &lngs)?;
    graph.project(projection);
    project_events(early_events, &projection);
    project_events(late_events, &projection);
    
    // Tornadoes that appeared in the other period, as one working table
    let mut origin: Vec<(bool, usize)> = Vec::new();
    let mut relevant: Vec<EventRecord> = Vec::new();
    for (row, e) in early_events.iter().enumerate() {
        if e.tornado_id().map_or(false, |id| late_ids.contains(id)) {
            origin.push((true, row));
            relevant.push(e.clone());
        }
    }
    for (row, e) in late_events.iter().enumerate() {
        if e.tornado_id().map_or(false, |id| early_ids.contains(id)) {
            origin.push((false, row));
            relevant.push(e.clone());
        }
    }
    
    let mut order: Vec<usize> = (0..relevant.len()).collect();
    order.sort_by_key(|&r| relevant[r].time);
    for r in order {
        if relevant[r].is_linked() || !relevant[r].tornado_assigned {
            continue;
        }
        let linked = link_tornado_to_new_storm(graph, &mut relevant, r, max_time_before_start, max_time_after_end)?;
        observer.reconciliation(&ReconciliationNotice::TornadoRetry {
            tornado_id: relevant[r].tornado_id().unwrap_or_default().to_string(),
            time_unix_sec: relevant[r].time,
            linked,
        });
    }
    
    for ((is_early, row), event) in origin.into_iter().zip(relevant) {
        if is_early {
            early_events[row] = event;
        } else {
            late_events[row] = event;
        }
    }
    Ok(())
}

/// Reconciles the per-event tornado linkages of two adjacent periods and
/// returns the (early, late) event tables. Storm tables are left to the
/// caller.
pub fn reconcile_tornado_events(
    mut early_events: Vec<EventRecord>,
    mut late_events: Vec<EventRecord>,
    early_storms: Vec<StormObject>,
    late_storms: Vec<StormObject>,
    max_time_before_start: i64,
    max_time_after_end: i64,
    observer: &dyn LinkageObserver,
) -> Result<(Vec<EventRecord>, Vec<EventRecord>)> {
    let (storms, _) = combine_storms(early_storms, late_storms);
    let mut graph = StormGraph::new(storms)?;
    relink_across_periods(
        &mut graph,
        &mut early_events,
        &mut late_events,
        max_time_before_start,
        max_time_after_end,
        observer,
    )?;
    Ok((early_events, late_events))
}

/// Reconciles tornado-track linkages of two adjacent periods.
///
/// Both periods' storms and events are re-projected into one frame. Storm
/// objects present in both periods are kept once, in the early period.
pub fn share_tornado_linkages(
    mut early_events: Vec<EventRecord>,
    mut late_events: Vec<EventRecord>,
    early_storms: Vec<StormObject>,
    late_storms: Vec<StormObject>,
    max_time_before_start: i64,
    max_time_after_end: i64,
    observer: &dyn LinkageObserver,
) -> Result<SharedTornadoLinkages> {
    let (storms, storm_is_early) = combine_storms(early_storms, late_storms);
    let mut graph = StormGraph::new(storms)?;
    relink_across_periods(
        &mut graph,
        &mut early_events,
        &mut late_events,
        max_time_before_start,
        max_time_after_end,
        observer,
    )?;
    
    let all_events: Vec<EventRecord> = early_events.iter().chain(&late_events).cloned().collect();
    
    let mut early_storm_to_events = Vec::new();
    let mut late_storm_to_events = Vec::new();
    for (links, is_early) in reverse_linkages(&graph, &all_events)?.into_iter().zip(storm_is_early) {
        if is_early {
            early_storm_to_events.push(links);
        } else {
            late_storm_to_events.push(links);
        }
    }
    
    Ok(SharedTornadoLinkages {
        early_events,
        late_events,
        early_storm_to_events,
        late_storm_to_events,
    })
}

// ============================================================================
// PREDECESSOR SHARING
// ============================================================================

/// Copies events of late-period main objects onto their simple predecessors
/// in the early period, and spreads the merging-predecessor flag back along
/// each main object's own secondary ID.
///
/// A predecessor only receives events at or after its own valid time, and
/// never the same event (time and attributes) twice.
pub fn share_linkages_with_predecessors(
    early: Vec<StormEventLinks>,
    late: Vec<StormEventLinks>,
) -> Result<(Vec<StormEventLinks>, Vec<StormEventLinks>)> {
    let num_early = early.len();
    let mut table: Vec<StormEventLinks> = early.into_iter().chain(late).collect();
    let graph = StormGraph::from_adjacent_periods(table.iter().map(|s| s.object.clone()).collect())?;
    
    let same_id_walk = LineageWalk::new().max_changes(0, ChangeType::Any).all_on_path();
    
    for row in num_early..table.len() {
        let main_events: Vec<LinkedEvent> =
            table[row].events.iter().filter(|e| e.main_object).cloned().collect();
        if main_events.is_empty() {
            continue;
        }
        
        if table[row].merging_predecessor {
            for r in graph.find_predecessors(row, &same_id_walk)? {
                table[r].merging_predecessor = true;
            }
        }
        
        let row_time = graph.node(row).valid_time();
        let simple: BTreeSet<usize> = graph.classify_predecessors(row)?.simple;
        for pred in simple.into_iter().filter(|&p| p != row && p < num_early) {
            let pred_time = graph.node(pred).valid_time();
            for event in &main_events {
                let event_time = row_time + event.relative_time_sec;
                if pred_time > event_time {
                    continue;
                }
                let already_there = table[pred]
                    .events
                    .iter()
                    .any(|e| e.time == event_time && e.attributes == event.attributes);
                if already_there {
                    continue;
                }
                table[pred].events.push(LinkedEvent {
                    relative_time_sec: event_time - pred_time,
                    main_object: false,
                    ..event.clone()
                });
            }
        }
    }
    
    let late = table.split_off(num_early);
    Ok((table, late))
}
