//! Small literal storm tables shared by the unit tests.
//!
//! Storms are laid out in metres around (35 N, 265 E) and converted to
//! lat/lon with the same projection the tests project them back with, so
//! projected coordinates match the literals to well under a millimetre.

use crate::projection::AzimuthalEquidistant;
use crate::storm_graph::{StormGraph, StormObject};
use geo::{Coord, LineString, Polygon};
use std::collections::HashMap;

pub(crate) const CENTRE_LATITUDE_DEG: f64 = 35.0;
pub(crate) const CENTRE_LONGITUDE_DEG: f64 = 265.0;

pub(crate) fn projection() -> AzimuthalEquidistant {
    AzimuthalEquidistant::new(CENTRE_LATITUDE_DEG, CENTRE_LONGITUDE_DEG).unwrap()
}

/// Axis-aligned square in x/y, returned as a lat/lon polygon.
pub(crate) fn square_latlng(centre: (f64, f64), half_width: f64) -> Polygon<f64> {
    let proj = projection();
    let corners = [
        (centre.0 - half_width, centre.1 - half_width),
        (centre.0 + half_width, centre.1 - half_width),
        (centre.0 + half_width, centre.1 + half_width),
        (centre.0 - half_width, centre.1 + half_width),
    ];
    let ring: Vec<Coord<f64>> = corners
        .iter()
        .map(|&(x, y)| {
            let (lat, lng) = proj.unproject_point(x, y);
            Coord { x: lng, y: lat }
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// One square storm object in primary cell "P".
pub(crate) fn storm(
    secondary_id: &str,
    valid_time: i64,
    centre: (f64, f64),
    half_width: f64,
    prev: &[&str],
    next: &[&str],
) -> StormObject {
    let (lat, lng) = projection().unproject_point(centre.0, centre.1);
    StormObject {
        primary_id: "P".to_string(),
        secondary_id: secondary_id.to_string(),
        full_id: format!("P_{}", secondary_id),
        valid_time,
        centroid_latitude_deg: lat,
        centroid_longitude_deg: lng,
        polygon_latlng: square_latlng(centre, half_width),
        cell_start_time: valid_time,
        cell_end_time: valid_time,
        prev_secondary_ids: prev.iter().map(|s| s.to_string()).collect(),
        next_secondary_ids: next.iter().map(|s| s.to_string()).collect(),
        tracking_start_time: 0,
        tracking_end_time: 86_400,
    }
}

/// Sets cell start/end times to the span of each secondary ID.
pub(crate) fn with_cell_times(mut objects: Vec<StormObject>) -> Vec<StormObject> {
    let mut spans: HashMap<String, (i64, i64)> = HashMap::new();
    for o in &objects {
        let span = spans.entry(o.secondary_id.clone()).or_insert((o.valid_time, o.valid_time));
        span.0 = span.0.min(o.valid_time);
        span.1 = span.1.max(o.valid_time);
    }
    for o in &mut objects {
        let (start, end) = spans[&o.secondary_id];
        o.cell_start_time = start;
        o.cell_end_time = end;
    }
    objects
}

/// A at 1000/1300 splits into B (north) and C (south) at 1600.
pub(crate) fn split_objects() -> Vec<StormObject> {
    with_cell_times(vec![
        storm("A", 1000, (0.0, 0.0), 5000.0, &[], &["A"]),
        storm("A", 1300, (3000.0, 0.0), 5000.0, &["A"], &["B", "C"]),
        storm("B", 1600, (6000.0, 4000.0), 3000.0, &["A"], &[]),
        storm("C", 1600, (6000.0, -4000.0), 3000.0, &["A"], &[]),
    ])
}

pub(crate) fn split_graph() -> StormGraph {
    StormGraph::new(split_objects()).unwrap()
}

/// A (west) and B (east) at 1000 merge into C at 1300; C continues at 1600.
pub(crate) fn merger_objects() -> Vec<StormObject> {
    with_cell_times(vec![
        storm("A", 1000, (-10_000.0, 0.0), 4000.0, &[], &["C"]),
        storm("B", 1000, (10_000.0, 0.0), 4000.0, &[], &["C"]),
        storm("C", 1300, (0.0, 0.0), 6000.0, &["A", "B"], &["C"]),
        storm("C", 1600, (3000.0, 0.0), 6000.0, &["C"], &[]),
    ])
}

pub(crate) fn merger_graph() -> StormGraph {
    StormGraph::new(merger_objects()).unwrap()
}
