//! The "LINEAGE" Engine - storm objects as an arena-indexed DAG
//!
//! Each storm object (one cell at one radar time) is a node. Nodes are linked
//! through the predecessor/successor secondary IDs recorded on every object:
//! - a secondary ID is stable across a non-branching segment of a cell's life
//! - a split gives a node two successors, a merger gives it two predecessors
//! - mid-segment objects list their own secondary ID as predecessor/successor
//!
//! Graph walks are bounded by elapsed time and by the number of secondary-ID
//! changes of a chosen kind (splits, mergers, or any). Walking from a lineage
//! root/leaf is not an error: it yields an empty set.

use crate::error::{LinkageError, Result};
use crate::projection::AzimuthalEquidistant;
use geo::{Coord, LineString, Polygon, Rect};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use stormlink_env::LatLngBox;

// ============================================================================
// STORM OBJECT (Input)
// ============================================================================

/// One storm cell at one valid time, as handed over by the tracking system.
///
/// Times are Unix seconds. The lat/lon polygon uses `x = longitude (deg E)`
/// and `y = latitude (deg N)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormObject {
    /// Stable across the cell's whole life, through splits and mergers
    pub primary_id: String,
    
    /// Stable only across one non-branching segment
    pub secondary_id: String,
    
    /// Primary + secondary ID disambiguator
    pub full_id: String,
    
    pub valid_time: i64,
    
    pub centroid_latitude_deg: f64,
    
    pub centroid_longitude_deg: f64,
    
    /// Storm outline in lat/lon
    pub polygon_latlng: Polygon<f64>,
    
    pub cell_start_time: i64,
    
    pub cell_end_time: i64,
    
    /// Zero, one or two secondary IDs (two = merger)
    pub prev_secondary_ids: Vec<String>,
    
    /// Zero, one or two secondary IDs (two = split)
    pub next_secondary_ids: Vec<String>,
    
    pub tracking_start_time: i64,
    
    pub tracking_end_time: i64,
}

/// Drops objects less than `min_elapsed_sec` into their tracking period.
pub fn remove_storms_near_period_start(
    objects: Vec<StormObject>,
    min_elapsed_sec: i64,
) -> Vec<StormObject> {
    let before = objects.len();
    let kept: Vec<StormObject> = objects
        .into_iter()
        .filter(|o| o.valid_time - o.tracking_start_time >= min_elapsed_sec)
        .collect();
    tracing::debug!(
        "Removed {} of {} storm objects within {} s of tracking start",
        before - kept.len(),
        before,
        min_elapsed_sec
    );
    kept
}

/// Keeps objects whose cell starts by `max_start_time` and ends no earlier
/// than `min_end_time`.
pub fn filter_storms_by_time(
    objects: Vec<StormObject>,
    max_start_time: i64,
    min_end_time: i64,
) -> Vec<StormObject> {
    objects
        .into_iter()
        .filter(|o| o.cell_start_time <= max_start_time && o.cell_end_time >= min_end_time)
        .collect()
}

// ============================================================================
// GRAPH NODES
// ============================================================================

/// A storm object plus everything derived from it during a run.
#[derive(Debug, Clone)]
pub struct StormNode {
    pub object: StormObject,
    
    /// Rows of the immediate predecessors (0-2)
    pub predecessors: Vec<usize>,
    
    /// Rows of the immediate successors (0-2)
    pub successors: Vec<usize>,
    
    /// First valid time of this node's secondary ID
    pub secondary_start_time: i64,
    
    /// Last valid time of this node's secondary ID
    pub secondary_end_time: i64,
    
    /// Projected centroid (NaN until [`StormGraph::project`])
    pub centroid_xy: Vector2<f64>,
    
    /// Projected outline (empty until [`StormGraph::project`])
    pub polygon_xy: Polygon<f64>,
}

impl StormNode {
    pub fn secondary_id(&self) -> &str {
        &self.object.secondary_id
    }
    
    pub fn valid_time(&self) -> i64 {
        self.object.valid_time
    }
    
    /// Exterior vertices of the projected outline.
    pub fn vertices_xy(&self) -> &[Coord<f64>] {
        &self.polygon_xy.exterior().0
    }
}

/// Which secondary-ID changes count against a walk's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Every secondary-ID change counts
    Any,
    
    /// Only changes at splits count
    Split,
    
    /// Only changes at mergers count
    Merger,
}

/// Bounds and output mode of a lineage walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineageWalk {
    /// Maximum time between the start node and any returned node
    pub max_seconds: i64,
    
    /// Maximum number of counted secondary-ID changes
    pub max_id_changes: usize,
    
    pub change_type: ChangeType,
    
    /// true: every node visited (including the start);
    /// false: only nodes where the walk stopped (excluding the start)
    pub return_all_on_path: bool,
}

impl Default for LineageWalk {
    fn default() -> Self {
        Self {
            max_seconds: i64::MAX,
            max_id_changes: usize::MAX,
            change_type: ChangeType::Any,
            return_all_on_path: false,
        }
    }
}

impl LineageWalk {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn within_seconds(mut self, secs: i64) -> Self {
        self.max_seconds = secs;
        self
    }
    
    pub fn max_changes(mut self, count: usize, change_type: ChangeType) -> Self {
        self.max_id_changes = count;
        self.change_type = change_type;
        self
    }
    
    pub fn all_on_path(mut self) -> Self {
        self.return_all_on_path = true;
        self
    }
}

/// Simple and merging predecessors of one storm object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredecessorSets {
    /// At most one ID change and no mergers (includes the object itself)
    pub simple: BTreeSet<usize>,
    
    /// Reached through exactly one merger; disjoint from `simple`
    pub merging: BTreeSet<usize>,
}

#[derive(Clone, Copy)]
enum Direction {
    Backward,
    Forward,
}

// ============================================================================
// STORM GRAPH
// ============================================================================

/// Arena of storm nodes indexed by row, with a per-secondary-ID index.
#[derive(Debug, Clone, Default)]
pub struct StormGraph {
    nodes: Vec<StormNode>,
    
    /// Rows of each secondary ID, sorted by (valid time, row)
    segments: HashMap<String, Vec<usize>>,
    
    projection: Option<AzimuthalEquidistant>,
}

impl StormGraph {
    /// Builds the graph, rejecting duplicate valid times within a secondary ID.
    pub fn new(objects: Vec<StormObject>) -> Result<Self> {
        Self::build(objects, false)
    }
    
    /// Builds the graph from the concatenated tables of adjacent periods.
    ///
    /// The same storm object may appear in both periods; among duplicates the
    /// lowest row wins every neighbour lookup.
    pub fn from_adjacent_periods(objects: Vec<StormObject>) -> Result<Self> {
        Self::build(objects, true)
    }
    
    fn build(objects: Vec<StormObject>, allow_duplicate_times: bool) -> Result<Self> {
        for (row, object) in objects.iter().enumerate() {
            validate_object(row, object)?;
        }
        
        let mut segments: HashMap<String, Vec<usize>> = HashMap::new();
        for (row, object) in objects.iter().enumerate() {
            segments.entry(object.secondary_id.clone()).or_default().push(row);
        }
        for (secondary_id, rows) in segments.iter_mut() {
            rows.sort_by_key(|&r| (objects[r].valid_time, r));
            if !allow_duplicate_times {
                if let Some(pair) = rows
                    .windows(2)
                    .find(|w| objects[w[0]].valid_time == objects[w[1]].valid_time)
                {
                    return Err(LinkageError::storms(format!(
                        "secondary ID \"{}\" has two objects at time {} (rows {} and {}); \
                         valid times must be strictly increasing",
                        secondary_id, objects[pair[0]].valid_time, pair[0], pair[1]
                    )));
                }
            }
        }
        
        let mut nodes: Vec<StormNode> = objects
            .into_iter()
            .map(|object| StormNode {
                object,
                predecessors: Vec::new(),
                successors: Vec::new(),
                secondary_start_time: 0,
                secondary_end_time: 0,
                centroid_xy: Vector2::new(f64::NAN, f64::NAN),
                polygon_xy: Polygon::new(LineString::new(vec![]), vec![]),
            })
            .collect();
        
        for rows in segments.values() {
            let start = nodes[rows[0]].valid_time();
            let end = nodes[rows[rows.len() - 1]].valid_time();
            for &r in rows {
                nodes[r].secondary_start_time = start;
                nodes[r].secondary_end_time = end;
            }
        }
        
        let mut graph = Self {
            nodes,
            segments,
            projection: None,
        };
        for row in 0..graph.nodes.len() {
            let predecessors = graph.link_neighbours(row, Direction::Backward);
            let successors = graph.link_neighbours(row, Direction::Forward);
            graph.nodes[row].predecessors = predecessors;
            graph.nodes[row].successors = successors;
        }
        Ok(graph)
    }
    
    /// Resolves the recorded neighbour IDs of `row` to rows.
    ///
    /// For each neighbour ID: the latest object strictly before (backward) or
    /// the earliest object strictly after (forward) this one.
    fn link_neighbours(&self, row: usize, direction: Direction) -> Vec<usize> {
        let object = &self.nodes[row].object;
        let time = object.valid_time;
        let ids = match direction {
            Direction::Backward => &object.prev_secondary_ids,
            Direction::Forward => &object.next_secondary_ids,
        };
        
        let mut linked = Vec::with_capacity(ids.len());
        let mut seen: Vec<&str> = Vec::with_capacity(ids.len());
        for id in ids.iter().filter(|id| !id.is_empty()) {
            if seen.contains(&id.as_str()) {
                continue;
            }
            seen.push(id.as_str());
            
            let Some(rows) = self.segments.get(id) else { continue };
            let found = match direction {
                Direction::Backward => {
                    let end = rows.partition_point(|&r| self.nodes[r].valid_time() < time);
                    end.checked_sub(1).map(|last| {
                        let t = self.nodes[rows[last]].valid_time();
                        rows[rows.partition_point(|&r| self.nodes[r].valid_time() < t)]
                    })
                }
                Direction::Forward => {
                    let first = rows.partition_point(|&r| self.nodes[r].valid_time() <= time);
                    rows.get(first).copied()
                }
            };
            if let Some(r) = found {
                if r != row && !linked.contains(&r) {
                    linked.push(r);
                }
            }
        }
        linked
    }
    
    // === Accessors ===
    
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    
    pub fn node(&self, row: usize) -> &StormNode {
        &self.nodes[row]
    }
    
    pub fn nodes(&self) -> &[StormNode] {
        &self.nodes
    }
    
    pub fn objects(&self) -> impl Iterator<Item = &StormObject> {
        self.nodes.iter().map(|n| &n.object)
    }
    
    pub fn projection(&self) -> Option<&AzimuthalEquidistant> {
        self.projection.as_ref()
    }
    
    /// Rows of one secondary ID in time order (empty if unknown).
    pub fn secondary_rows(&self, secondary_id: &str) -> &[usize] {
        self.segments.get(secondary_id).map(Vec::as_slice).unwrap_or(&[])
    }
    
    /// All secondary IDs, ascending.
    pub fn secondary_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.segments.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
    
    /// Object of `secondary_id` whose valid time is closest to `time`.
    ///
    /// Ties go to the lowest row.
    pub fn closest_object_in_cell(&self, secondary_id: &str, time: i64) -> Option<usize> {
        self.secondary_rows(secondary_id)
            .iter()
            .copied()
            .min_by_key(|&r| ((self.nodes[r].valid_time() - time).abs(), r))
    }
    
    /// Latest object of `secondary_id` (lowest row among ties).
    pub fn last_object_in_cell(&self, secondary_id: &str) -> Option<usize> {
        self.secondary_rows(secondary_id)
            .iter()
            .copied()
            .max_by_key(|&r| (self.nodes[r].valid_time(), std::cmp::Reverse(r)))
    }
    
    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.nodes.len() {
            return Err(LinkageError::storms(format!(
                "row {} out of range (graph has {} objects)",
                row,
                self.nodes.len()
            )));
        }
        Ok(())
    }
    
    // === Immediate neighbours ===
    
    pub fn find_immediate_predecessors(&self, row: usize) -> Result<&[usize]> {
        self.check_row(row)?;
        Ok(&self.nodes[row].predecessors)
    }
    
    pub fn find_immediate_successors(&self, row: usize) -> Result<&[usize]> {
        self.check_row(row)?;
        Ok(&self.nodes[row].successors)
    }
    
    // === Lineage walks ===
    
    /// Walks predecessor links backward in time from `start`.
    pub fn find_predecessors(&self, start: usize, walk: &LineageWalk) -> Result<BTreeSet<usize>> {
        self.check_row(start)?;
        Ok(self.walk(start, walk, Direction::Backward))
    }
    
    /// Walks successor links forward in time from `start`.
    pub fn find_successors(&self, start: usize, walk: &LineageWalk) -> Result<BTreeSet<usize>> {
        self.check_row(start)?;
        Ok(self.walk(start, walk, Direction::Forward))
    }
    
    fn neighbours(&self, row: usize, direction: Direction) -> &[usize] {
        match direction {
            Direction::Backward => &self.nodes[row].predecessors,
            Direction::Forward => &self.nodes[row].successors,
        }
    }
    
    /// Counted ID changes for one step `from -> to`.
    fn step_cost(&self, from: usize, to: usize, change_type: ChangeType, direction: Direction) -> usize {
        if self.nodes[from].secondary_id() == self.nodes[to].secondary_id() {
            return 0;
        }
        
        let (earlier, later) = match direction {
            Direction::Backward => (to, from),
            Direction::Forward => (from, to),
        };
        let counted = match change_type {
            ChangeType::Any => true,
            ChangeType::Split => self.nodes[earlier].successors.len() >= 2,
            ChangeType::Merger => self.nodes[later].predecessors.len() >= 2,
        };
        usize::from(counted)
    }
    
    /// Admissible (neighbour, cost) steps out of `row` given its cost so far.
    fn admissible_steps<'a>(
        &'a self,
        start_time: i64,
        row: usize,
        cost: usize,
        walk: &'a LineageWalk,
        direction: Direction,
    ) -> impl Iterator<Item = (usize, usize)> + 'a {
        self.neighbours(row, direction).iter().filter_map(move |&next| {
            let elapsed = (self.nodes[next].valid_time() - start_time).abs();
            if elapsed > walk.max_seconds {
                return None;
            }
            let next_cost = cost.saturating_add(self.step_cost(row, next, walk.change_type, direction));
            (next_cost <= walk.max_id_changes).then_some((next, next_cost))
        })
    }
    
    fn walk(&self, start: usize, walk: &LineageWalk, direction: Direction) -> BTreeSet<usize> {
        let start_time = self.nodes[start].valid_time();
        
        // Cheapest known change count per visited row
        let mut best: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut stack = vec![start];
        
        while let Some(row) = stack.pop() {
            let cost = best[&row];
            for (next, next_cost) in self.admissible_steps(start_time, row, cost, walk, direction) {
                if best.get(&next).map_or(true, |&b| next_cost < b) {
                    best.insert(next, next_cost);
                    stack.push(next);
                }
            }
        }
        
        if walk.return_all_on_path {
            return best.into_keys().collect();
        }
        
        best.iter()
            .filter(|&(&row, &cost)| {
                row != start
                    && self
                        .admissible_steps(start_time, row, cost, walk, direction)
                        .next()
                        .is_none()
            })
            .map(|(&row, _)| row)
            .collect()
    }
    
    /// Simple and merging predecessors of `row`.
    ///
    /// simple  = (<= 1 change of any kind) and (0 mergers)
    /// merging = (<= 1 merger) and (<= 1 change of any kind), minus simple
    pub fn classify_predecessors(&self, row: usize) -> Result<PredecessorSets> {
        let one_change = self.find_predecessors(
            row,
            &LineageWalk::new().max_changes(1, ChangeType::Any).all_on_path(),
        )?;
        let zero_mergers = self.find_predecessors(
            row,
            &LineageWalk::new().max_changes(0, ChangeType::Merger).all_on_path(),
        )?;
        let one_merger = self.find_predecessors(
            row,
            &LineageWalk::new().max_changes(1, ChangeType::Merger).all_on_path(),
        )?;
        
        let simple: BTreeSet<usize> = one_change.intersection(&zero_mergers).copied().collect();
        let merging: BTreeSet<usize> = one_merger
            .intersection(&one_change)
            .filter(|r| !simple.contains(r))
            .copied()
            .collect();
        Ok(PredecessorSets { simple, merging })
    }
    
    // === Geometry ===
    
    /// Projects every centroid and outline with the run's projection.
    pub fn project(&mut self, projection: AzimuthalEquidistant) {
        for node in &mut self.nodes {
            let (x, y) = projection.project_point(
                node.object.centroid_latitude_deg,
                node.object.centroid_longitude_deg,
            );
            node.centroid_xy = Vector2::new(x, y);
            node.polygon_xy = projection.project_polygon(&node.object.polygon_latlng);
        }
        self.projection = Some(projection);
    }
    
    /// Box around all projected outline vertices, grown by `padding_metres`.
    pub fn xy_bounding_box(&self, padding_metres: f64) -> Option<Rect<f64>> {
        let mut min = Coord { x: f64::INFINITY, y: f64::INFINITY };
        let mut max = Coord { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };
        for c in self.nodes.iter().flat_map(|n| n.vertices_xy()) {
            if !c.x.is_finite() || !c.y.is_finite() {
                continue;
            }
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        if min.x > max.x {
            return None;
        }
        Some(Rect::new(
            Coord { x: min.x - padding_metres, y: min.y - padding_metres },
            Coord { x: max.x + padding_metres, y: max.y + padding_metres },
        ))
    }
    
    /// Lat/lon box spanned by the storm centroids.
    pub fn centroid_latlng_box(&self) -> Option<LatLngBox> {
        let mut latlng_box: Option<LatLngBox> = None;
        for o in self.objects() {
            let (lat, lng) = (o.centroid_latitude_deg, o.centroid_longitude_deg);
            let b = latlng_box.get_or_insert(LatLngBox {
                min_latitude_deg: lat,
                max_latitude_deg: lat,
                min_longitude_deg: lng,
                max_longitude_deg: lng,
            });
            b.min_latitude_deg = b.min_latitude_deg.min(lat);
            b.max_latitude_deg = b.max_latitude_deg.max(lat);
            b.min_longitude_deg = b.min_longitude_deg.min(lng);
            b.max_longitude_deg = b.max_longitude_deg.max(lng);
        }
        latlng_box
    }
}

fn validate_object(row: usize, object: &StormObject) -> Result<()> {
    if object.secondary_id.is_empty() {
        return Err(LinkageError::storms(format!("row {} has an empty secondary ID", row)));
    }
    if object.prev_secondary_ids.len() > 2 || object.next_secondary_ids.len() > 2 {
        return Err(LinkageError::storms(format!(
            "row {} (\"{}\") lists {} predecessor and {} successor IDs; at most 2 each",
            row,
            object.full_id,
            object.prev_secondary_ids.len(),
            object.next_secondary_ids.len()
        )));
    }
    if !object.centroid_latitude_deg.is_finite() || !object.centroid_longitude_deg.is_finite() {
        return Err(LinkageError::storms(format!(
            "row {} (\"{}\") has a non-finite centroid",
            row, object.full_id
        )));
    }
    if object.polygon_latlng.exterior().0.len() < 3 {
        return Err(LinkageError::storms(format!(
            "row {} (\"{}\") has a degenerate polygon ({} vertices)",
            row,
            object.full_id,
            object.polygon_latlng.exterior().0.len()
        )));
    }
    Ok(())
}
