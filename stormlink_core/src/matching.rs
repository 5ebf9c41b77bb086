//! The "MATCHING" Engine - nearest storm for each event at one instant
//!
//! Per event:
//! 1. Coarse box pre-filter (`max(30 km, 2 x max link distance)`)
//! 2. Point-in-polygon over surviving storms, ascending secondary ID;
//!    the first storm containing the event (boundary included) wins at 0 m
//! 3. Otherwise the nearest vertex among storms within the link-distance
//!    box, if it is within the link distance
//! 4. The winner is re-tested for containment: inside means 0 m

use crate::config::MIN_POLYGON_ATTEMPT_DISTANCE_METRES;
use crate::interpolation::InterpolatedStorms;
use geo::{EuclideanDistance, Point};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Nearest storm for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormMatch {
    pub secondary_id: String,
    
    /// 0 if the event is in or on the outline, else distance to the nearest vertex
    pub distance_metres: f64,
}

/// Finds the nearest storm for each event; `None` where nothing is close enough.
pub fn find_nearest_storms_one_time(
    storms: &InterpolatedStorms,
    event_xs: &[f64],
    event_ys: &[f64],
    max_link_distance_metres: f64,
) -> Vec<Option<StormMatch>> {
    let attempt_distance = MIN_POLYGON_ATTEMPT_DISTANCE_METRES.max(2.0 * max_link_distance_metres);
    
    event_xs
        .iter()
        .zip(event_ys)
        .map(|(&x, &y)| match_one_event(storms, x, y, attempt_distance, max_link_distance_metres))
        .collect()
}

fn within_box(vx: f64, vy: f64, x: f64, y: f64, half_width: f64) -> bool {
    (vx - x).abs() <= half_width && (vy - y).abs() <= half_width
}

fn match_one_event(
    storms: &InterpolatedStorms,
    x: f64,
    y: f64,
    attempt_distance: f64,
    max_link_distance: f64,
) -> Option<StormMatch> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    
    // Outlines are already ordered by secondary ID
    let nearby: Vec<usize> = storms
        .outlines
        .iter()
        .enumerate()
        .filter(|(_, o)| o.vertices.iter().any(|v| within_box(v.x, v.y, x, y, attempt_distance)))
        .map(|(i, _)| i)
        .collect();
    if nearby.is_empty() {
        return None;
    }
    
    if let Some(&i) = nearby.iter().find(|&&i| storms.outlines[i].contains(x, y)) {
        return Some(StormMatch {
            secondary_id: storms.outlines[i].secondary_id.clone(),
            distance_metres: 0.0,
        });
    }
    
    // Nearest vertex; first one wins ties
    let event = Point::new(x, y);
    let mut best: Option<(usize, f64)> = None;
    for &i in &nearby {
        for v in &storms.outlines[i].vertices {
            if !within_box(v.x, v.y, x, y, max_link_distance) {
                continue;
            }
            let d = Point::from(*v).euclidean_distance(&event);
            let better = match best {
                None => true,
                Some((_, b)) => d.partial_cmp(&b).unwrap_or(Ordering::Equal) == Ordering::Less,
            };
            if better {
                best = Some((i, d));
            }
        }
    }
    
    let (i, distance) = best?;
    if distance > max_link_distance {
        return None;
    }
    
    let outline = &storms.outlines[i];
    Some(StormMatch {
        secondary_id: outline.secondary_id.clone(),
        distance_metres: if outline.contains(x, y) { 0.0 } else { distance },
    })
}
