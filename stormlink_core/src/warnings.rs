//! Tornado-warning polygons to storm cells.
//!
//! A warning is linked to every secondary cell that, over the warning's
//! lifetime, stays close to the warning polygon on average:
//! 1. Coarse filter: cells alive around the warning, in primary cells with
//!    a centroid near the warning's lat/lon box
//! 2. Interpolate candidates every `time_step_sec` across the warning
//! 3. Distance per time: 0 if the outline's vertex mean is in/on the
//!    polygon, otherwise the distance from that point to the polygon
//! 4. Drop cells present for less than `min_lifetime_fraction` of the times,
//!    link those with mean distance within `max_distance_metres`

use crate::config::WarningLinkageConfig;
use crate::error::{LinkageError, Result};
use crate::events::TornadoWarning;
use crate::interpolation::interpolate_storms_subset;
use crate::projection::{point_in_or_on_polygon, positive_longitude};
use crate::storm_graph::{filter_storms_by_time, StormGraph};
use geo::{EuclideanDistance, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use stormlink_env::LatLngBox;
use tracing::debug;

/// One warning and the cells it was linked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningLinkage {
    pub warning: TornadoWarning,
    
    /// Linked secondary IDs, ascending
    pub secondary_ids: Vec<String>,
}

/// Links each warning to storm cells of a projected graph.
pub fn link_warnings_to_storms(
    graph: &StormGraph,
    warnings: &[TornadoWarning],
    config: &WarningLinkageConfig,
) -> Result<Vec<WarningLinkage>> {
    config.validate()?;
    let projection = *graph
        .projection()
        .ok_or_else(|| LinkageError::storms("storm graph must be projected before warning linkage"))?;
    
    let mut linked = Vec::with_capacity(warnings.len());
    for warning in warnings {
        if warning.end_time < warning.start_time {
            return Err(LinkageError::events(format!(
                "warning ends ({}) before it starts ({})",
                warning.end_time, warning.start_time
            )));
        }
        let polygon_xy = projection.project_polygon(&warning.polygon_latlng);
        let secondary_ids = link_one_warning(graph, warning, &polygon_xy, config)?;
        linked.push(WarningLinkage {
            warning: warning.clone(),
            secondary_ids,
        });
    }
    Ok(linked)
}

fn warning_box(warning: &TornadoWarning, buffer_deg: f64) -> Option<LatLngBox> {
    let ring = &warning.polygon_latlng.exterior().0;
    if ring.is_empty() {
        return None;
    }
    let mut bbox = LatLngBox {
        min_latitude_deg: f64::INFINITY,
        max_latitude_deg: f64::NEG_INFINITY,
        min_longitude_deg: f64::INFINITY,
        max_longitude_deg: f64::NEG_INFINITY,
    };
    for c in ring {
        let lng = positive_longitude(c.x);
        bbox.min_latitude_deg = bbox.min_latitude_deg.min(c.y);
        bbox.max_latitude_deg = bbox.max_latitude_deg.max(c.y);
        bbox.min_longitude_deg = bbox.min_longitude_deg.min(lng);
        bbox.max_longitude_deg = bbox.max_longitude_deg.max(lng);
    }
    bbox.min_latitude_deg -= buffer_deg;
    bbox.max_latitude_deg += buffer_deg;
    bbox.min_longitude_deg -= buffer_deg;
    bbox.max_longitude_deg += buffer_deg;
    Some(bbox)
}

/// Secondary IDs worth interpolating for one warning.
fn candidate_cells(graph: &StormGraph, warning: &TornadoWarning, config: &WarningLinkageConfig) -> BTreeSet<String> {
    let Some(bbox) = warning_box(warning, config.latlng_buffer_deg) else {
        return BTreeSet::new();
    };
    
    let alive = filter_storms_by_time(
        graph.objects().cloned().collect(),
        warning.end_time + config.storm_time_buffer_sec,
        warning.start_time - config.storm_time_buffer_sec,
    );
    
    let near_primaries: BTreeSet<&str> = alive
        .iter()
        .filter(|o| bbox.contains(o.centroid_latitude_deg, o.centroid_longitude_deg))
        .map(|o| o.primary_id.as_str())
        .collect();
    
    let candidates: BTreeSet<String> = alive
        .iter()
        .filter(|o| near_primaries.contains(o.primary_id.as_str()))
        .map(|o| o.secondary_id.clone())
        .collect();
    debug!(
        "Warning {}-{}: {} candidate cells from {} storm objects",
        warning.start_time,
        warning.end_time,
        candidates.len(),
        graph.len()
    );
    candidates
}

fn link_one_warning(
    graph: &StormGraph,
    warning: &TornadoWarning,
    polygon_xy: &Polygon<f64>,
    config: &WarningLinkageConfig,
) -> Result<Vec<String>> {
    let candidates = candidate_cells(graph, warning, config);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    
    let times: Vec<i64> = (warning.start_time..=warning.end_time)
        .step_by(config.time_step_sec as usize)
        .collect();
    
    // Per cell: distances at the times it exists
    let mut distances: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for &time in &times {
        let storms = interpolate_storms_subset(
            graph,
            time,
            config.max_time_before_storm_start_sec,
            config.max_time_after_storm_end_sec,
            Some(&candidates),
        )?;
        for outline in &storms.outlines {
            let centre = outline.vertex_mean();
            let distance = if point_in_or_on_polygon(polygon_xy, centre.x, centre.y) {
                0.0
            } else {
                Point::new(centre.x, centre.y).euclidean_distance(polygon_xy)
            };
            distances.entry(outline.secondary_id.clone()).or_default().push(distance);
        }
    }
    
    let num_times = times.len() as f64;
    let linked = distances
        .into_iter()
        .filter(|(_, d)| d.len() as f64 / num_times >= config.min_lifetime_fraction)
        .filter(|(_, d)| d.iter().sum::<f64>() / d.len() as f64 <= config.max_distance_metres)
        .map(|(id, _)| id)
        .collect();
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{projection, square_latlng, storm, with_cell_times};
    
    fn warning_graph() -> StormGraph {
        let mut graph = StormGraph::new(with_cell_times(vec![
            storm("A", 1000, (0.0, 0.0), 5000.0, &[], &["A"]),
            storm("A", 1300, (0.0, 0.0), 5000.0, &["A"], &["A"]),
            storm("A", 1600, (0.0, 0.0), 5000.0, &["A"], &[]),
            storm("B", 1000, (60_000.0, 0.0), 5000.0, &[], &["B"]),
            storm("B", 1600, (60_000.0, 0.0), 5000.0, &["B"], &[]),
            storm("C", 1000, (2000.0, 2000.0), 1000.0, &[], &[]),
        ]))
        .unwrap();
        graph.project(projection());
        graph
    }
    
    fn warning(start_time: i64, end_time: i64) -> TornadoWarning {
        TornadoWarning {
            start_time,
            end_time,
            polygon_latlng: square_latlng((0.0, 0.0), 10_000.0),
        }
    }
    
    #[test]
    fn test_links_cell_inside_warning() {
        let linked =
            link_warnings_to_storms(&warning_graph(), &[warning(1000, 1600)], &WarningLinkageConfig::default())
                .unwrap();
        // B is too far away, C lives for too little of the warning
        assert_eq!(linked[0].secondary_ids, vec!["A".to_string()]);
    }
    
    #[test]
    fn test_lifetime_fraction_threshold() {
        let config = WarningLinkageConfig {
            min_lifetime_fraction: 0.3,
            ..WarningLinkageConfig::default()
        };
        let linked = link_warnings_to_storms(&warning_graph(), &[warning(1000, 1600)], &config).unwrap();
        assert_eq!(linked[0].secondary_ids, vec!["A".to_string(), "C".to_string()]);
    }
    
    #[test]
    fn test_warning_far_in_time_links_nothing() {
        let linked =
            link_warnings_to_storms(&warning_graph(), &[warning(9000, 9600)], &WarningLinkageConfig::default())
                .unwrap();
        assert!(linked[0].secondary_ids.is_empty());
    }
    
    #[test]
    fn test_requires_projection() {
        let graph = StormGraph::new(with_cell_times(vec![storm("A", 1000, (0.0, 0.0), 5000.0, &[], &[])])).unwrap();
        let result = link_warnings_to_storms(&graph, &[warning(1000, 1600)], &WarningLinkageConfig::default());
        assert!(matches!(result, Err(LinkageError::MalformedStorms(_))));
    }
}
