//! The "LINKAGE" Engine - event-to-storm linkage runs
//!
//! Drives the interpolator and matcher over an event table:
//! 1. Round event times to the interpolation interval and batch by instant
//! 2. Per instant: interpolate storms, match every pending event
//! 3. Tornado tracks: once one segment is matched, fill the rest of the
//!    track along the storm's non-splitting successors
//! 4. Tornado tracks: retry leftover segments against the successors of the
//!    storm the tornado was last linked to
//! 5. Report unlinked events through the observer
//!
//! A run validates everything up front; after that, "no storm found" is a
//! normal outcome recorded on the event, never an error.

use crate::config::{EventType, LinkageConfig, LinkageMetadata, TornadoOptions, LARGE_DISTANCE_METRES};
use crate::error::Result;
use crate::events::{
    filter_events_by_bounding_box, project_events, tornado_events, wind_events, EventLinkage,
    EventRecord, TornadoReport, WindObservation,
};
use crate::interpolation::{interpolate_all_storms_to_time, interpolate_storms_subset};
use crate::matching::find_nearest_storms_one_time;
use crate::projection::AzimuthalEquidistant;
use crate::reversal::{reverse_linkages, StormEventLinks};
use crate::storm_graph::{remove_storms_near_period_start, ChangeType, LineageWalk, StormGraph, StormObject};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use stormlink_env::{LinkageObserver, LinkageSummary, TornadoTally, UnlinkedEvent};

/// Output of one linkage run.
#[derive(Debug, Clone)]
pub struct LinkageResult {
    pub event_type: EventType,
    
    pub metadata: LinkageMetadata,
    
    /// Projection of the run (`None` when there were no storms)
    pub projection: Option<AzimuthalEquidistant>,
    
    /// Per storm object: linked events and flags
    pub storm_to_events: Vec<StormEventLinks>,
    
    /// Per event: nearest storm, time and distance
    pub events: Vec<EventRecord>,
}

// ============================================================================
// PUBLIC ENTRY POINTS
// ============================================================================

/// Links wind observations to storms.
pub fn link_storms_to_winds(
    storms: Vec<StormObject>,
    observations: &[WindObservation],
    config: &LinkageConfig,
    observer: &dyn LinkageObserver,
) -> Result<LinkageResult> {
    config.validate()?;
    run_linkage(storms, config, EventType::Wind, observer, |min_time, max_time| {
        Ok(wind_events(observations, min_time, max_time))
    })
}

/// Links tornado reports to storms (start points or full tracks).
pub fn link_storms_to_tornadoes(
    storms: Vec<StormObject>,
    reports: &[TornadoReport],
    config: &LinkageConfig,
    options: &TornadoOptions,
    observer: &dyn LinkageObserver,
) -> Result<LinkageResult> {
    config.validate()?;
    options.validate()?;
    run_linkage(storms, config, options.event_type(), observer, |min_time, max_time| {
        tornado_events(reports, options, min_time, max_time)
    })
}

fn run_linkage<F>(
    storms: Vec<StormObject>,
    config: &LinkageConfig,
    event_type: EventType,
    observer: &dyn LinkageObserver,
    make_events: F,
) -> Result<LinkageResult>
where
    F: FnOnce(i64, i64) -> Result<Vec<EventRecord>>,
{
    let storms = remove_storms_near_period_start(storms, config.min_time_into_tracking_period_sec);
    
    let time_window = storms
        .iter()
        .map(|s| s.valid_time)
        .fold(None, |acc: Option<(i64, i64)>, t| match acc {
            None => Some((t, t)),
            Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        });
    
    let Some((min_storm_time, max_storm_time)) = time_window else {
        observer.progress("No storm objects; every event stays unlinked");
        let mut events = make_events(i64::MIN, i64::MAX)?;
        reset_linkages(&mut events);
        let graph = StormGraph::default();
        report_unlinked(&graph, &events, event_type, observer);
        return Ok(LinkageResult {
            event_type,
            metadata: config.metadata(),
            projection: None,
            storm_to_events: Vec::new(),
            events,
        });
    };
    
    let mut events = make_events(
        min_storm_time - config.max_time_before_storm_start_sec,
        max_storm_time + config.max_time_after_storm_end_sec,
    )?;
    let mut graph = StormGraph::new(storms)?;
    
    let (lats, lngs): (Vec<f64>, Vec<f64>) = graph
        .objects()
        .map(|o| (o.centroid_latitude_deg, o.centroid_longitude_deg))
        .unzip();
    let projection = AzimuthalEquidistant::centred_on(&lats, &lngs)?;
    graph.project(projection);
    project_events(&mut events, &projection);
    
    if let Some(rect) = graph.xy_bounding_box(config.bounding_box_padding_metres) {
        let before = events.len();
        events = filter_events_by_bounding_box(events, &rect);
        observer.progress(&format!(
            "{} of {} events lie inside the padded storm bounding box",
            events.len(),
            before
        ));
    }
    
    find_nearest_storms(&graph, &mut events, config, event_type, observer)?;
    let storm_to_events = reverse_linkages(&graph, &events)?;
    
    Ok(LinkageResult {
        event_type,
        metadata: config.metadata(),
        projection: Some(projection),
        storm_to_events,
        events,
    })
}

// ============================================================================
// DRIVER
// ============================================================================

/// Rounds to the nearest multiple of `interval`, ties to the even multiple.
pub fn round_to_nearest(time: i64, interval: i64) -> i64 {
    let quotient = time.div_euclid(interval);
    let twice_remainder = 2 * time.rem_euclid(interval);
    let rounded = match twice_remainder.cmp(&interval) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => quotient + quotient.rem_euclid(2),
    };
    rounded * interval
}

fn reset_linkages(events: &mut [EventRecord]) {
    for event in events.iter_mut() {
        event.linkage = None;
        event.tornado_assigned = false;
    }
}

/// Links every event in `events` to its nearest storm, in place.
///
/// `graph` and `events` must already be projected with the same projection.
pub fn find_nearest_storms(
    graph: &StormGraph,
    events: &mut [EventRecord],
    config: &LinkageConfig,
    event_type: EventType,
    observer: &dyn LinkageObserver,
) -> Result<()> {
    config.validate()?;
    reset_linkages(events);
    
    let interval = config.storm_interp_time_interval_sec;
    let rounded: Vec<i64> = events.iter().map(|e| round_to_nearest(e.time, interval)).collect();
    let mut instants: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, &t) in rounded.iter().enumerate() {
        instants.entry(t).or_default().push(row);
    }
    
    let track_mode = event_type == EventType::Tornado;
    
    for (&instant, rows) in &instants {
        let pending: Vec<usize> = if track_mode {
            rows.iter()
                .copied()
                .filter(|&r| !events[r].is_linked() && !events[r].tornado_assigned)
                .collect()
        } else {
            rows.clone()
        };
        if pending.is_empty() {
            continue;
        }
        
        observer.progress(&format!("Linking {} events at ~{} to storms", pending.len(), instant));
        let storms = interpolate_all_storms_to_time(
            graph,
            instant,
            config.max_time_before_storm_start_sec,
            config.max_time_after_storm_end_sec,
        )?;
        
        let xs: Vec<f64> = pending.iter().map(|&r| events[r].x_metres).collect();
        let ys: Vec<f64> = pending.iter().map(|&r| events[r].y_metres).collect();
        let matches = find_nearest_storms_one_time(&storms, &xs, &ys, config.max_link_distance_metres);
        
        for (&row, found) in pending.iter().zip(matches) {
            let Some(found) = found else { continue };
            if track_mode {
                finish_tornado_linkage(
                    graph,
                    events,
                    row,
                    &found.secondary_id,
                    instant,
                    found.distance_metres,
                )?;
            } else {
                events[row].linkage = Some(EventLinkage {
                    nearest_secondary_id: found.secondary_id,
                    nearest_time: instant,
                    distance_metres: found.distance_metres,
                });
            }
        }
    }
    
    if track_mode {
        for rows in instants.values() {
            for &row in rows {
                if !events[row].is_linked() && events[row].tornado_assigned {
                    link_tornado_to_new_storm(
                        graph,
                        events,
                        row,
                        config.max_time_before_storm_start_sec,
                        config.max_time_after_storm_end_sec,
                    )?;
                }
            }
        }
    }
    
    report_unlinked(graph, events, event_type, observer);
    Ok(())
}

// ============================================================================
// TORNADO TRACKS
// ============================================================================

/// Spreads one segment's match over the rest of its tornado's track.
///
/// From the matched storm object, the track is followed along its
/// non-splitting successors. Every still-unlinked segment of the tornado
/// whose time falls between the segments bracketing that storm span (and the
/// matched segment) gets linked to the successor closest to it in time, at
/// the matched distance and at its own event time. Afterwards the whole
/// tornado is marked as assigned.
pub fn finish_tornado_linkage(
    graph: &StormGraph,
    events: &mut [EventRecord],
    tornado_row: usize,
    nearest_secondary_id: &str,
    nearest_storm_time: i64,
    nearest_distance_metres: f64,
) -> Result<()> {
    let event_time = events[tornado_row].time;
    let Some(tornado_id) = events[tornado_row].tornado_id().map(str::to_string) else {
        return Ok(());
    };
    
    let mut relevant_rows: Vec<usize> = (0..events.len())
        .filter(|&r| events[r].tornado_id() == Some(tornado_id.as_str()) && !events[r].is_linked())
        .collect();
    relevant_rows.sort_by_key(|&r| events[r].time);
    
    if let Some(main_row) = graph.closest_object_in_cell(nearest_secondary_id, nearest_storm_time) {
        let successors = graph.find_successors(
            main_row,
            &LineageWalk::new().max_changes(0, ChangeType::Split).all_on_path(),
        )?;
        
        let storm_times = successors.iter().map(|&r| graph.node(r).valid_time());
        let first_good_time = storm_times.clone().min().unwrap_or(event_time).min(event_time);
        let last_good_time = storm_times.max().unwrap_or(event_time).max(event_time);
        
        if !relevant_rows.is_empty() {
            let first_subrow = relevant_rows
                .iter()
                .rposition(|&r| events[r].time <= first_good_time)
                .unwrap_or(0);
            let last_subrow = relevant_rows
                .iter()
                .position(|&r| events[r].time >= last_good_time)
                .unwrap_or(relevant_rows.len() - 1);
            
            if first_subrow <= last_subrow {
                for &r in &relevant_rows[first_subrow..=last_subrow] {
                    let segment_time = events[r].time;
                    let storm_row = successors
                        .iter()
                        .copied()
                        .min_by_key(|&s| ((graph.node(s).valid_time() - segment_time).abs(), s));
                    if let Some(storm_row) = storm_row {
                        events[r].linkage = Some(EventLinkage {
                            nearest_secondary_id: graph.node(storm_row).secondary_id().to_string(),
                            nearest_time: segment_time,
                            distance_metres: nearest_distance_metres,
                        });
                    }
                }
            }
        }
    }
    
    for event in events.iter_mut() {
        if event.tornado_id() == Some(tornado_id.as_str()) {
            event.tornado_assigned = true;
        }
    }
    Ok(())
}

/// Retries one unresolved tornado segment against the successors of the
/// storm its tornado was last linked to. Returns true if it got linked.
pub fn link_tornado_to_new_storm(
    graph: &StormGraph,
    events: &mut [EventRecord],
    tornado_row: usize,
    max_time_before_start: i64,
    max_time_after_end: i64,
) -> Result<bool> {
    let Some(tornado_id) = events[tornado_row].tornado_id().map(str::to_string) else {
        return Ok(false);
    };
    let event_time = events[tornado_row].time;
    
    // Latest already-linked segment of this tornado (lowest row among ties)
    let last_linked = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.tornado_id() == Some(tornado_id.as_str()))
        .filter_map(|(r, e)| e.linkage.as_ref().map(|l| (r, e.time, l)))
        .max_by_key(|&(r, t, _)| (t, std::cmp::Reverse(r)));
    let Some((_, _, linkage)) = last_linked else {
        return Ok(false);
    };
    let Some(last_object) = graph.last_object_in_cell(&linkage.nearest_secondary_id) else {
        return Ok(false);
    };
    
    let relevant_ids: BTreeSet<String> = graph
        .find_successors(last_object, &LineageWalk::new().all_on_path())?
        .into_iter()
        .map(|r| graph.node(r).secondary_id().to_string())
        .collect();
    
    let storms = interpolate_storms_subset(
        graph,
        event_time,
        max_time_before_start,
        max_time_after_end,
        Some(&relevant_ids),
    )?;
    let event = &events[tornado_row];
    let found = find_nearest_storms_one_time(&storms, &[event.x_metres], &[event.y_metres], LARGE_DISTANCE_METRES)
        .into_iter()
        .next()
        .flatten();
    
    match found {
        Some(found) => {
            finish_tornado_linkage(
                graph,
                events,
                tornado_row,
                &found.secondary_id,
                event_time,
                found.distance_metres,
            )?;
            Ok(events[tornado_row].is_linked())
        }
        None => Ok(false),
    }
}

// ============================================================================
// REPORTING
// ============================================================================

/// Sends one notice per unlinked event plus a run summary.
pub fn report_unlinked(
    graph: &StormGraph,
    events: &[EventRecord],
    event_type: EventType,
    observer: &dyn LinkageObserver,
) -> LinkageSummary {
    let storm_box = graph.centroid_latlng_box();
    let mut summary = LinkageSummary {
        event_type: event_type.name().to_string(),
        num_events: events.len(),
        num_storm_objects: graph.len(),
        ..LinkageSummary::default()
    };
    
    let mut tornado_ids: HashSet<&str> = HashSet::new();
    let mut unlinked_ids: HashSet<&str> = HashSet::new();
    let mut unlinked_ids_in_box: HashSet<&str> = HashSet::new();
    
    for event in events {
        if let Some(id) = event.tornado_id() {
            tornado_ids.insert(id);
        }
        if event.is_linked() {
            continue;
        }
        
        summary.num_unlinked += 1;
        let in_box = storm_box.map_or(false, |b| b.contains(event.latitude_deg, event.longitude_deg));
        if in_box {
            summary.num_unlinked_in_box += 1;
        }
        if let Some(id) = event.tornado_id() {
            unlinked_ids.insert(id);
            if in_box {
                unlinked_ids_in_box.insert(id);
            }
        }
        if let Some(storm_box) = storm_box {
            observer.unlinked_event(&UnlinkedEvent {
                time_unix_sec: event.time,
                latitude_deg: event.latitude_deg,
                longitude_deg: event.longitude_deg,
                storm_box,
            });
        }
    }
    
    if event_type.is_tornado() {
        summary.tornadoes = Some(TornadoTally {
            num_tornadoes: tornado_ids.len(),
            num_unlinked: unlinked_ids.len(),
            num_unlinked_in_box: unlinked_ids_in_box.len(),
        });
    }
    observer.summary(&summary);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventAttributes;
    use crate::fixtures::{projection, split_objects, storm, with_cell_times};
    use approx::assert_relative_eq;
    use stormlink_env::NullObserver;
    
    fn projected(objects: Vec<StormObject>) -> StormGraph {
        let mut graph = StormGraph::new(objects).unwrap();
        graph.project(projection());
        graph
    }
    
    fn event_at(time: i64, x: f64, y: f64, tornado_id: Option<&str>) -> EventRecord {
        let (lat, lng) = projection().unproject_point(x, y);
        let attributes = match tornado_id {
            Some(id) => EventAttributes::Tornado {
                tornado_id: id.to_string(),
                ef_rating: "EF1".to_string(),
            },
            None => EventAttributes::Wind {
                station_id: "s".to_string(),
                u_wind_m_s: 25.0,
                v_wind_m_s: 0.0,
            },
        };
        let mut event = EventRecord::new(time, lat, lng, attributes);
        event.x_metres = x;
        event.y_metres = y;
        event
    }
    
    fn tornado_config() -> LinkageConfig {
        LinkageConfig {
            storm_interp_time_interval_sec: 1,
            ..LinkageConfig::tornado_occurrence()
        }
    }
    
    #[test]
    fn test_round_to_nearest_ties_to_even() {
        assert_eq!(round_to_nearest(14, 10), 10);
        assert_eq!(round_to_nearest(16, 10), 20);
        assert_eq!(round_to_nearest(5, 10), 0);
        assert_eq!(round_to_nearest(15, 10), 20);
        assert_eq!(round_to_nearest(25, 10), 20);
        assert_eq!(round_to_nearest(-5, 10), 0);
        assert_eq!(round_to_nearest(1234, 1), 1234);
    }
    
    #[test]
    fn test_wind_events_get_interp_time_and_distance() {
        let graph = projected(with_cell_times(vec![
            storm("A", 1000, (0.0, 0.0), 5000.0, &[], &["A"]),
            storm("A", 1300, (3000.0, 0.0), 5000.0, &["A"], &[]),
        ]));
        let mut events = vec![
            event_at(1004, 1000.0, 0.0, None),       // inside
            event_at(1000, 5000.0 + 3000.0, 5000.0 + 4000.0, None), // 5 km from NE corner
            event_at(1000, 200_000.0, 0.0, None),    // far away
        ];
        find_nearest_storms(&graph, &mut events, &LinkageConfig::wind(), EventType::Wind, &NullObserver).unwrap();
        
        let first = events[0].linkage.as_ref().unwrap();
        assert_eq!(first.nearest_secondary_id, "A");
        assert_eq!(first.nearest_time, 1000);
        assert_eq!(first.distance_metres, 0.0);
        
        assert_relative_eq!(events[1].distance_metres(), 5000.0, epsilon = 1e-6);
        assert!(!events[2].is_linked());
    }
    
    #[test]
    fn test_tornado_track_is_filled_along_successors() {
        // A moves east 3 km per 300 s; segments every 60 s near its centroid
        let graph = projected(with_cell_times(vec![
            storm("A", 1000, (0.0, 0.0), 5000.0, &[], &["A"]),
            storm("A", 1300, (3000.0, 0.0), 5000.0, &["A"], &["A"]),
            storm("A", 1600, (6000.0, 0.0), 5000.0, &["A"], &[]),
        ]));
        let mut events: Vec<EventRecord> = (0..=10)
            .map(|k| event_at(1000 + 60 * k, 600.0 * k as f64, 0.0, Some("t1")))
            .collect();
        find_nearest_storms(&graph, &mut events, &tornado_config(), EventType::Tornado, &NullObserver).unwrap();
        
        for event in &events {
            let linkage = event.linkage.as_ref().unwrap();
            assert_eq!(linkage.nearest_secondary_id, "A");
            assert_eq!(linkage.nearest_time, event.time);
            assert_eq!(linkage.distance_metres, 0.0);
            assert!(event.tornado_assigned);
        }
    }
    
    #[test]
    fn test_finish_window_stops_at_first_segment_after_storm_span() {
        let graph = projected(with_cell_times(vec![
            storm("A", 1000, (0.0, 0.0), 5000.0, &[], &["A"]),
            storm("A", 1300, (3000.0, 0.0), 5000.0, &["A"], &[]),
        ]));
        // Storm span is [1000, 1300]; segments run to 1600
        let mut events: Vec<EventRecord> = [1000, 1200, 1400, 1600]
            .iter()
            .map(|&t| event_at(t, 0.0, 0.0, Some("t1")))
            .collect();
        finish_tornado_linkage(&graph, &mut events, 0, "A", 1000, 0.0).unwrap();
        
        assert!(events[0].is_linked());
        assert!(events[1].is_linked());
        assert!(events[2].is_linked()); // first segment >= 1300
        assert!(!events[3].is_linked());
        assert!(events.iter().all(|e| e.tornado_assigned));
    }
    
    #[test]
    fn test_retry_follows_split_to_new_storm() {
        // A splits into B (north) and C (south) at 1600; the tornado first
        // links to A, then runs into C
        let graph = projected(split_objects());
        let mut events = vec![
            event_at(1300, 3000.0, 0.0, Some("t1")),
            event_at(1600, 6000.0, -4000.0, Some("t1")),
        ];
        find_nearest_storms(&graph, &mut events, &tornado_config(), EventType::Tornado, &NullObserver).unwrap();
        
        let first = events[0].linkage.as_ref().unwrap();
        assert_eq!(first.nearest_secondary_id, "A");
        let second = events[1].linkage.as_ref().unwrap();
        assert_eq!(second.nearest_secondary_id, "C");
        assert_eq!(second.distance_metres, 0.0);
    }
    
    #[test]
    fn test_retry_without_linked_segment_is_noop() {
        let graph = projected(split_objects());
        let mut events = vec![event_at(1600, 6000.0, -4000.0, Some("t1"))];
        events[0].tornado_assigned = true;
        assert!(!link_tornado_to_new_storm(&graph, &mut events, 0, 180, 180).unwrap());
    }
    
    #[test]
    fn test_summary_counts_unlinked_tornadoes() {
        let graph = projected(split_objects());
        let events = vec![
            event_at(1000, 0.0, 0.0, Some("t1")),
            event_at(1060, 500_000.0, 0.0, Some("t2")),
        ];
        let summary = report_unlinked(&graph, &events, EventType::Tornado, &NullObserver);
        assert_eq!(summary.num_events, 2);
        assert_eq!(summary.num_unlinked, 2);
        // t1 sits on A's first centroid, t2 is far outside the storm box
        assert_eq!(summary.num_unlinked_in_box, 1);
        let tally = summary.tornadoes.unwrap();
        assert_eq!(tally.num_tornadoes, 2);
        assert_eq!(tally.num_unlinked, 2);
        assert_eq!(tally.num_unlinked_in_box, 1);
    }
    
    #[test]
    fn test_link_storms_to_winds_end_to_end() {
        let storms = with_cell_times(vec![
            storm("A", 3600, (0.0, 0.0), 5000.0, &[], &["A"]),
            storm("A", 3900, (3000.0, 0.0), 5000.0, &["A"], &[]),
        ]);
        let (lat, lng) = projection().unproject_point(1000.0, 0.0);
        let (far_lat, far_lng) = projection().unproject_point(0.0, 2_000_000.0);
        let obs = |time: i64, latitude_deg: f64, longitude_deg: f64| WindObservation {
            station_id: "KOUN".to_string(),
            time,
            latitude_deg,
            longitude_deg,
            u_wind_m_s: 30.0,
            v_wind_m_s: 0.0,
        };
        let observations = vec![
            obs(3700, lat, lng),
            obs(3700, far_lat, far_lng), // outside the padded box: dropped
            obs(9000, lat, lng),         // outside the time window: dropped
        ];
        
        let result = link_storms_to_winds(storms, &observations, &LinkageConfig::wind(), &NullObserver).unwrap();
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].distance_metres(), 0.0);
        assert_eq!(result.storm_to_events.len(), 2);
        
        // Linked at ~3700 -> main object is the 3600 object, the 3900 one is later than the event
        assert_eq!(result.storm_to_events[0].events.len(), 1);
        assert!(result.storm_to_events[0].events[0].main_object);
        assert!(result.storm_to_events[1].events.is_empty());
    }
    
    #[test]
    fn test_no_storms_leaves_everything_unlinked() {
        let obs = WindObservation {
            station_id: "KOUN".to_string(),
            time: 0,
            latitude_deg: 35.0,
            longitude_deg: 265.0,
            u_wind_m_s: 30.0,
            v_wind_m_s: 0.0,
        };
        let result = link_storms_to_winds(vec![], &[obs], &LinkageConfig::wind(), &NullObserver).unwrap();
        assert_eq!(result.events.len(), 1);
        assert!(!result.events[0].is_linked());
        assert!(result.storm_to_events.is_empty());
        assert!(result.projection.is_none());
    }
    
    #[test]
    fn test_invalid_config_fails_before_work() {
        let config = LinkageConfig {
            bounding_box_padding_metres: 0.0,
            ..LinkageConfig::wind()
        };
        assert!(link_storms_to_winds(vec![], &[], &config, &NullObserver).is_err());
    }
}
