//! The "TIME" Engine - storm outlines at arbitrary query times
//!
//! A cell's shape is treated as rigid over short gaps: only its position is
//! interpolated. For one secondary ID at a target time:
//! 1. Gather its own objects plus the immediate predecessors of its first
//!    object and the immediate successors of its last one
//! 2. Per distinct valid time, average the centroids (mergers can put two
//!    objects at one time) and shift each object's vertices onto that mean
//! 3. Linearly interpolate (or extrapolate) the centroid to the target time
//! 4. Translate the vertex set of the nearest valid time onto that centroid

use crate::config::INTERP_SLACK_SEC;
use crate::error::{LinkageError, Result};
use crate::projection::point_in_or_on_polygon;
use crate::storm_graph::StormGraph;
use geo::{Coord, LineString, Polygon};
use nalgebra::Vector2;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// OUTPUT
// ============================================================================

/// One secondary cell's estimated outline at a query time.
#[derive(Debug, Clone)]
pub struct StormOutline {
    pub secondary_id: String,
    
    /// Projected vertices (x/y metres)
    pub vertices: Vec<Coord<f64>>,
    
    /// Interpolated centroid
    pub centroid: Vector2<f64>,
    
    polygon: Polygon<f64>,
}

impl StormOutline {
    pub fn new(secondary_id: String, vertices: Vec<Coord<f64>>, centroid: Vector2<f64>) -> Self {
        let polygon = Polygon::new(LineString::from(vertices.clone()), vec![]);
        Self {
            secondary_id,
            vertices,
            centroid,
            polygon,
        }
    }
    
    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }
    
    /// True if (x, y) is in or on the outline.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        point_in_or_on_polygon(&self.polygon, x, y)
    }
    
    /// Mean of the vertices.
    pub fn vertex_mean(&self) -> Vector2<f64> {
        let n = self.vertices.len().max(1) as f64;
        let (sx, sy) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
        Vector2::new(sx / n, sy / n)
    }
}

/// All cells interpolated to one instant, ordered by secondary ID.
#[derive(Debug, Clone, Default)]
pub struct InterpolatedStorms {
    pub valid_time: i64,
    pub outlines: Vec<StormOutline>,
}

impl InterpolatedStorms {
    pub fn is_empty(&self) -> bool {
        self.outlines.is_empty()
    }
    
    pub fn len(&self) -> usize {
        self.outlines.len()
    }
    
    /// Drops every outline whose secondary ID is not in `ids`.
    pub fn retain_ids(&mut self, ids: &BTreeSet<String>) {
        self.outlines.retain(|o| ids.contains(&o.secondary_id));
    }
    
    pub fn get(&self, secondary_id: &str) -> Option<&StormOutline> {
        self.outlines
            .binary_search_by(|o| o.secondary_id.as_str().cmp(secondary_id))
            .ok()
            .map(|i| &self.outlines[i])
    }
}

// ============================================================================
// INTERPOLATION
// ============================================================================

fn require_projection(graph: &StormGraph) -> Result<()> {
    if graph.projection().is_none() && !graph.is_empty() {
        return Err(LinkageError::config(
            "storm graph must be projected before interpolation",
        ));
    }
    Ok(())
}

/// Interpolates one secondary cell to `target_time`.
///
/// Returns `None` if the secondary ID is unknown.
pub fn interpolate_storm_to_time(
    graph: &StormGraph,
    secondary_id: &str,
    target_time: i64,
) -> Result<Option<StormOutline>> {
    require_projection(graph)?;
    let own_rows = graph.secondary_rows(secondary_id);
    let (Some(&first), Some(&last)) = (own_rows.first(), own_rows.last()) else {
        return Ok(None);
    };
    
    let history: Vec<usize> = graph.node(first).predecessors.iter()
        .chain(own_rows)
        .chain(&graph.node(last).successors)
        .copied()
        .collect();
    
    // Per distinct time: mean centroid and the objects' vertices moved onto it
    let mut by_time: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for &row in &history {
        by_time.entry(graph.node(row).valid_time()).or_default().push(row);
    }
    
    let mut times = Vec::with_capacity(by_time.len());
    let mut centroids = Vec::with_capacity(by_time.len());
    let mut vertex_sets = Vec::with_capacity(by_time.len());
    for (&time, rows) in &by_time {
        let mean = rows
            .iter()
            .fold(Vector2::zeros(), |acc, &r| acc + graph.node(r).centroid_xy)
            / rows.len() as f64;
        
        let mut vertices = Vec::new();
        for &r in rows {
            let shift = mean - graph.node(r).centroid_xy;
            vertices.extend(
                graph.node(r)
                    .vertices_xy()
                    .iter()
                    .map(|c| Coord { x: c.x + shift.x, y: c.y + shift.y }),
            );
        }
        
        times.push(time);
        centroids.push(mean);
        vertex_sets.push(vertices);
    }
    
    let centroid = interp_centroid(&times, &centroids, target_time);
    
    let nearest = (0..times.len())
        .min_by_key(|&i| ((times[i] - target_time).abs(), i))
        .unwrap_or(0);
    let shift = centroid - centroids[nearest];
    let vertices = vertex_sets[nearest]
        .iter()
        .map(|c| Coord { x: c.x + shift.x, y: c.y + shift.y })
        .collect();
    
    Ok(Some(StormOutline::new(secondary_id.to_string(), vertices, centroid)))
}

/// Linear interpolation with linear extrapolation beyond both ends.
fn interp_centroid(times: &[i64], centroids: &[Vector2<f64>], target_time: i64) -> Vector2<f64> {
    if times.len() == 1 {
        return centroids[0];
    }
    
    let upper = times.partition_point(|&t| t <= target_time).clamp(1, times.len() - 1);
    let lower = upper - 1;
    let fraction = (target_time - times[lower]) as f64 / (times[upper] - times[lower]) as f64;
    centroids[lower] + (centroids[upper] - centroids[lower]) * fraction
}

/// Interpolates every cell alive near `target_time`.
///
/// A cell is eligible if its first object is no later than
/// `target_time + max_time_before_start` and its last object no earlier than
/// `target_time - max_time_after_end`.
pub fn interpolate_all_storms_to_time(
    graph: &StormGraph,
    target_time: i64,
    max_time_before_start: i64,
    max_time_after_end: i64,
) -> Result<InterpolatedStorms> {
    interpolate_storms_subset(graph, target_time, max_time_before_start, max_time_after_end, None)
}

/// As [`interpolate_all_storms_to_time`], restricted to `only` when given.
pub fn interpolate_storms_subset(
    graph: &StormGraph,
    target_time: i64,
    max_time_before_start: i64,
    max_time_after_end: i64,
    only: Option<&BTreeSet<String>>,
) -> Result<InterpolatedStorms> {
    require_projection(graph)?;
    let max_start_time = target_time + max_time_before_start;
    let min_end_time = target_time - max_time_after_end;
    
    // Coarse pass with slack, then the exact window per cell
    let candidates: Vec<&str> = graph
        .secondary_ids()
        .into_iter()
        .filter(|id| only.map_or(true, |set| set.contains(*id)))
        .filter(|id| {
            let node = graph.node(graph.secondary_rows(id)[0]);
            node.secondary_start_time <= max_start_time + INTERP_SLACK_SEC
                && node.secondary_end_time >= min_end_time - INTERP_SLACK_SEC
        })
        .collect();
    
    let mut outlines = Vec::with_capacity(candidates.len());
    for id in candidates {
        let rows = graph.secondary_rows(id);
        let first_time = graph.node(rows[0]).valid_time();
        let last_time = graph.node(rows[rows.len() - 1]).valid_time();
        if first_time > max_start_time || last_time < min_end_time {
            continue;
        }
        if let Some(outline) = interpolate_storm_to_time(graph, id, target_time)? {
            outlines.push(outline);
        }
    }
    
    Ok(InterpolatedStorms {
        valid_time: target_time,
        outlines,
    })
}
