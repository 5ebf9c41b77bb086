//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of a synthetic outbreak:
//! - True centre and size of every storm cell at any time
//! - The lineage (splits and mergers) a tracker would report
//! - Hazard reports generated from that truth, with position noise
//!
//! Everything is laid out in metres on a fixed azimuthal equidistant plane
//! and converted to lat/lon only when handed to the linkage engine.

use crate::error::SimError;
use geo::{Coord, LineString, Polygon};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use stormlink_core::{AzimuthalEquidistant, StormObject, TornadoReport, TornadoWarning, WindObservation};

/// Centre of the synthetic plane (central Oklahoma).
pub const ORIGIN_LATITUDE_DEG: f64 = 35.0;
pub const ORIGIN_LONGITUDE_DEG: f64 = 265.0;

/// 2011-04-27 18:00:00 UTC
pub const BASE_TIME_UNIX_SEC: i64 = 1_303_927_200;

/// Spacing of storm objects within a cell
pub const TRACKING_INTERVAL_SEC: i64 = 300;

/// Storm objects per generation in [`StormOracle::random_lineage`]
const STEPS_PER_GENERATION: i64 = 4;

/// Upper bound on simultaneously active cells in random lineages
const MAX_ACTIVE_CELLS: usize = 6;

/// One ground-truth storm cell (one secondary ID).
#[derive(Debug, Clone)]
pub struct SyntheticCell {
    pub secondary_id: String,
    
    pub primary_id: String,
    
    /// First and last storm-object times
    pub start_time: i64,
    pub end_time: i64,
    
    /// Centre [x, y] at `start_time` (metres)
    pub start_position: Vector2<f64>,
    
    /// Motion [vx, vy] in m/s
    pub velocity: Vector2<f64>,
    
    /// Half the side of the square outline (metres)
    pub half_width_metres: f64,
    
    pub parents: Vec<String>,
    
    pub children: Vec<String>,
}

impl SyntheticCell {
    /// True centre at `time` (extrapolated outside the lifetime).
    pub fn position_at(&self, time: i64) -> Vector2<f64> {
        self.start_position + self.velocity * (time - self.start_time) as f64
    }
    
    pub fn alive_at(&self, time: i64) -> bool {
        time >= self.start_time && time <= self.end_time
    }
    
    /// Storm-object times, both ends included.
    pub fn object_times(&self) -> Vec<i64> {
        (self.start_time..=self.end_time)
            .step_by(TRACKING_INTERVAL_SEC as usize)
            .collect()
    }
}

/// The Oracle - maintains ground truth and generates hazard reports.
pub struct StormOracle {
    /// RNG for report placement and noise
    physics_rng: ChaCha8Rng,
    
    projection: AzimuthalEquidistant,
    
    /// All cells by secondary ID
    cells: BTreeMap<String, SyntheticCell>,
    
    next_primary: usize,
    
    next_secondary: usize,
    
    /// Report position noise standard deviation (metres)
    position_noise_std: f64,
    
    /// Tracking-period start stamped on every storm object
    tracking_start_time: i64,
}

impl StormOracle {
    /// Creates a new Oracle with the given physics seed.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            projection: AzimuthalEquidistant {
                central_latitude_deg: ORIGIN_LATITUDE_DEG,
                central_longitude_deg: ORIGIN_LONGITUDE_DEG,
            },
            cells: BTreeMap::new(),
            next_primary: 0,
            next_secondary: 0,
            position_noise_std: 200.0,
            tracking_start_time: BASE_TIME_UNIX_SEC - 3 * 3600,
        }
    }
    
    /// Sets the report position noise standard deviation.
    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.position_noise_std = std_dev;
    }
    
    /// Sets the tracking-period start stamped on storm objects.
    pub fn set_tracking_start(&mut self, time: i64) {
        self.tracking_start_time = time;
    }
    
    pub fn projection(&self) -> &AzimuthalEquidistant {
        &self.projection
    }
    
    pub fn cell(&self, secondary_id: &str) -> Result<&SyntheticCell, SimError> {
        self.cells
            .get(secondary_id)
            .ok_or_else(|| SimError::UnknownCell(secondary_id.to_string()))
    }
    
    pub fn cells(&self) -> impl Iterator<Item = &SyntheticCell> {
        self.cells.values()
    }
    
    fn fresh_secondary_id(&mut self) -> String {
        self.next_secondary += 1;
        format!("{:06}", self.next_secondary)
    }
    
    // =========================================================================
    // LINEAGE
    // =========================================================================
    
    /// Spawns a new cell in its own primary track.
    pub fn spawn_cell(
        &mut self,
        secondary_id: &str,
        start_time: i64,
        end_time: i64,
        position: Vector2<f64>,
        velocity: Vector2<f64>,
        half_width_metres: f64,
    ) -> Result<(), SimError> {
        if end_time < start_time {
            return Err(SimError::Setup(format!("cell {} ends before it starts", secondary_id)));
        }
        if self.cells.contains_key(secondary_id) {
            return Err(SimError::Setup(format!("cell {} already exists", secondary_id)));
        }
        let primary_id = format!("P{:03}", self.next_primary);
        self.next_primary += 1;
        self.cells.insert(
            secondary_id.to_string(),
            SyntheticCell {
                secondary_id: secondary_id.to_string(),
                primary_id,
                start_time,
                end_time,
                start_position: position,
                velocity,
                half_width_metres,
                parents: Vec::new(),
                children: Vec::new(),
            },
        );
        Ok(())
    }
    
    /// Ends `parent` and starts its children one tracking step later.
    ///
    /// Each child is `(id, offset from the parent's centre, velocity)`.
    pub fn split_cell(
        &mut self,
        parent: &str,
        children: &[(&str, Vector2<f64>, Vector2<f64>)],
        children_end_time: i64,
        half_width_metres: f64,
    ) -> Result<(), SimError> {
        let parent_cell = self.cell(parent)?.clone();
        let start_time = parent_cell.end_time + TRACKING_INTERVAL_SEC;
        
        for &(id, offset, velocity) in children {
            self.spawn_cell(
                id,
                start_time,
                children_end_time,
                parent_cell.position_at(start_time) + offset,
                velocity,
                half_width_metres,
            )?;
            if let Some(child) = self.cells.get_mut(id) {
                child.primary_id = parent_cell.primary_id.clone();
                child.parents = vec![parent.to_string()];
            }
        }
        if let Some(cell) = self.cells.get_mut(parent) {
            cell.children = children.iter().map(|(id, _, _)| id.to_string()).collect();
        }
        Ok(())
    }
    
    /// Ends `parents` and starts `child` at their mean position.
    pub fn merge_cells(
        &mut self,
        parents: &[&str],
        child: &str,
        velocity: Vector2<f64>,
        child_end_time: i64,
        half_width_metres: f64,
    ) -> Result<(), SimError> {
        if parents.is_empty() {
            return Err(SimError::Setup("a merger needs at least one parent".to_string()));
        }
        let parent_cells = parents
            .iter()
            .map(|p| self.cell(p).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        
        let start_time = parent_cells.iter().map(|c| c.end_time).max().unwrap_or_default()
            + TRACKING_INTERVAL_SEC;
        let position = parent_cells
            .iter()
            .map(|c| c.position_at(start_time))
            .sum::<Vector2<f64>>()
            / parent_cells.len() as f64;
        
        self.spawn_cell(child, start_time, child_end_time, position, velocity, half_width_metres)?;
        if let Some(cell) = self.cells.get_mut(child) {
            cell.primary_id = parent_cells[0].primary_id.clone();
            cell.parents = parents.iter().map(|p| p.to_string()).collect();
        }
        for p in parents {
            if let Some(cell) = self.cells.get_mut(*p) {
                cell.children = vec![child.to_string()];
            }
        }
        Ok(())
    }
    
    /// Grows a random family of cells for `generations` generations.
    ///
    /// Each generation, every active cell either continues, splits in two,
    /// or merges with the next active cell.
    pub fn random_lineage(&mut self, start_time: i64, num_roots: usize, generations: usize) -> Result<(), SimError> {
        let span = STEPS_PER_GENERATION * TRACKING_INTERVAL_SEC;
        
        let mut active = Vec::new();
        for r in 0..num_roots.max(1) {
            let id = self.fresh_secondary_id();
            let y = self.physics_rng.gen_range(-5000.0..5000.0);
            let vy = self.physics_rng.gen_range(-5.0..5.0);
            self.spawn_cell(
                &id,
                start_time,
                start_time + span,
                Vector2::new(r as f64 * 40_000.0, y),
                Vector2::new(15.0, vy),
                6000.0,
            )?;
            active.push(id);
        }
        
        for _ in 0..generations {
            let mut next_active = Vec::new();
            let mut i = 0;
            while i < active.len() {
                let roll: f64 = self.physics_rng.gen();
                let end_time = self.cell(&active[i])?.end_time + TRACKING_INTERVAL_SEC + span;
                
                if roll < 0.3 && active.len() + next_active.len() < MAX_ACTIVE_CELLS {
                    let (north, south) = (self.fresh_secondary_id(), self.fresh_secondary_id());
                    self.split_cell(
                        &active[i],
                        &[
                            (north.as_str(), Vector2::new(0.0, 12_000.0), Vector2::new(15.0, 3.0)),
                            (south.as_str(), Vector2::new(0.0, -12_000.0), Vector2::new(15.0, -3.0)),
                        ],
                        end_time,
                        5000.0,
                    )?;
                    next_active.push(north);
                    next_active.push(south);
                } else if roll < 0.5 && i + 1 < active.len() {
                    let child = self.fresh_secondary_id();
                    self.merge_cells(
                        &[active[i].as_str(), active[i + 1].as_str()],
                        &child,
                        Vector2::new(15.0, 0.0),
                        end_time,
                        7000.0,
                    )?;
                    next_active.push(child);
                    i += 1;
                } else if let Some(cell) = self.cells.get_mut(&active[i]) {
                    cell.end_time = end_time;
                    next_active.push(active[i].clone());
                }
                i += 1;
            }
            active = next_active;
        }
        Ok(())
    }
    
    // =========================================================================
    // STORM OBJECTS
    // =========================================================================
    
    fn square_latlng(&self, centre: Vector2<f64>, half_width: f64) -> Polygon<f64> {
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        let ring: Vec<Coord<f64>> = corners
            .iter()
            .map(|&(sx, sy)| {
                let (lat, lng) = self
                    .projection
                    .unproject_point(centre.x + sx * half_width, centre.y + sy * half_width);
                Coord { x: lng, y: lat }
            })
            .collect();
        Polygon::new(LineString::from(ring), vec![])
    }
    
    fn objects_of(&self, cell: &SyntheticCell) -> Vec<StormObject> {
        let times = cell.object_times();
        let last = times.len().saturating_sub(1);
        times
            .iter()
            .enumerate()
            .map(|(k, &time)| {
                let centre = cell.position_at(time);
                let (lat, lng) = self.projection.unproject_point(centre.x, centre.y);
                StormObject {
                    primary_id: cell.primary_id.clone(),
                    secondary_id: cell.secondary_id.clone(),
                    full_id: format!("{}_{}", cell.primary_id, cell.secondary_id),
                    valid_time: time,
                    centroid_latitude_deg: lat,
                    centroid_longitude_deg: lng,
                    polygon_latlng: self.square_latlng(centre, cell.half_width_metres),
                    cell_start_time: cell.start_time,
                    cell_end_time: cell.end_time,
                    prev_secondary_ids: if k == 0 {
                        cell.parents.clone()
                    } else {
                        vec![cell.secondary_id.clone()]
                    },
                    next_secondary_ids: if k == last {
                        cell.children.clone()
                    } else {
                        vec![cell.secondary_id.clone()]
                    },
                    tracking_start_time: self.tracking_start_time,
                    tracking_end_time: self.tracking_start_time + 86_400,
                }
            })
            .collect()
    }
    
    /// The storm table a tracker would produce, sorted by time then ID.
    pub fn storm_objects(&self) -> Vec<StormObject> {
        let mut objects: Vec<StormObject> = self.cells.values().flat_map(|c| self.objects_of(c)).collect();
        objects.sort_by(|a, b| {
            a.valid_time
                .cmp(&b.valid_time)
                .then_with(|| a.secondary_id.cmp(&b.secondary_id))
        });
        objects
    }
    
    // =========================================================================
    // HAZARD REPORTS
    // =========================================================================
    
    fn noise(&mut self) -> Result<Vector2<f64>, SimError> {
        let normal = Normal::new(0.0, self.position_noise_std)
            .map_err(|e| SimError::Setup(format!("position noise: {}", e)))?;
        Ok(Vector2::new(
            normal.sample(&mut self.physics_rng),
            normal.sample(&mut self.physics_rng),
        ))
    }
    
    /// A wind report at `position` (plus noise).
    pub fn wind_at(&mut self, station_id: &str, time: i64, position: Vector2<f64>) -> Result<WindObservation, SimError> {
        let p = position + self.noise()?;
        let (lat, lng) = self.projection.unproject_point(p.x, p.y);
        let speed = self.physics_rng.gen_range(26.0..40.0);
        Ok(WindObservation {
            station_id: station_id.to_string(),
            time,
            latitude_deg: lat,
            longitude_deg: lng,
            u_wind_m_s: speed,
            v_wind_m_s: 0.0,
        })
    }
    
    /// A random time in `secondary_id`'s life, at least `min_age_sec` after
    /// it starts (or its end time if the cell is younger than that).
    pub fn random_time_in(&mut self, secondary_id: &str, min_age_sec: i64) -> Result<i64, SimError> {
        let cell = self.cell(secondary_id)?;
        let (earliest, latest) = ((cell.start_time + min_age_sec).min(cell.end_time), cell.end_time);
        Ok(self.physics_rng.gen_range(earliest..=latest))
    }
    
    /// A random time in `[earliest, latest]`.
    pub fn random_time_between(&mut self, earliest: i64, latest: i64) -> i64 {
        self.physics_rng.gen_range(earliest..=latest.max(earliest))
    }
    
    /// A random index below `len` (0 when `len` is 0).
    pub fn random_index(&mut self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.physics_rng.gen_range(0..len)
        }
    }
    
    /// A wind report well inside `secondary_id` at `time`.
    pub fn wind_in_cell(&mut self, station_id: &str, secondary_id: &str, time: i64) -> Result<WindObservation, SimError> {
        let cell = self.cell(secondary_id)?;
        let (centre, reach) = (cell.position_at(time), 0.4 * cell.half_width_metres);
        let offset = Vector2::new(
            self.physics_rng.gen_range(-reach..=reach),
            self.physics_rng.gen_range(-reach..=reach),
        );
        self.wind_at(station_id, time, centre + offset)
    }
    
    /// A tornado from the centre of one cell to the centre of another.
    pub fn tornado_between(
        &self,
        tornado_id: &str,
        start_cell: &str,
        start_time: i64,
        end_cell: &str,
        end_time: i64,
    ) -> Result<TornadoReport, SimError> {
        let start = self.cell(start_cell)?.position_at(start_time);
        let end = self.cell(end_cell)?.position_at(end_time);
        let (start_lat, start_lng) = self.projection.unproject_point(start.x, start.y);
        let (end_lat, end_lng) = self.projection.unproject_point(end.x, end.y);
        Ok(TornadoReport {
            tornado_id: tornado_id.to_string(),
            ef_rating: "EF2".to_string(),
            start_time,
            start_latitude_deg: start_lat,
            start_longitude_deg: start_lng,
            end_time,
            end_latitude_deg: end_lat,
            end_longitude_deg: end_lng,
        })
    }
    
    /// A square warning polygon centred on `centre`.
    pub fn warning_around(&self, centre: Vector2<f64>, start_time: i64, end_time: i64, half_width: f64) -> TornadoWarning {
        TornadoWarning {
            start_time,
            end_time,
            polygon_latlng: self.square_latlng(centre, half_width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    
    fn simple_split(oracle: &mut StormOracle) {
        oracle
            .spawn_cell("A", 0, 900, Vector2::zeros(), Vector2::new(10.0, 0.0), 8000.0)
            .unwrap();
        oracle
            .split_cell(
                "A",
                &[
                    ("B", Vector2::new(0.0, 15_000.0), Vector2::new(10.0, 2.0)),
                    ("C", Vector2::new(0.0, -15_000.0), Vector2::new(10.0, -2.0)),
                ],
                2100,
                6000.0,
            )
            .unwrap();
    }
    
    #[test]
    fn test_oracle_split_lineage() {
        let mut oracle = StormOracle::new(42);
        simple_split(&mut oracle);
        
        let b = oracle.cell("B").unwrap();
        assert_eq!(b.start_time, 1200);
        assert_eq!(b.parents, vec!["A".to_string()]);
        assert_relative_eq!(b.start_position.y, 15_000.0);
        assert_relative_eq!(b.start_position.x, 12_000.0);
        assert_eq!(oracle.cell("A").unwrap().children.len(), 2);
    }
    
    #[test]
    fn test_storm_objects_carry_lineage() {
        let mut oracle = StormOracle::new(42);
        simple_split(&mut oracle);
        let objects = oracle.storm_objects();
        
        // A: 0, 300, 600, 900; B and C: 1200 .. 2100
        assert_eq!(objects.len(), 4 + 4 + 4);
        let a_last = objects.iter().find(|o| o.secondary_id == "A" && o.valid_time == 900).unwrap();
        assert_eq!(a_last.next_secondary_ids, vec!["B".to_string(), "C".to_string()]);
        let b_first = objects.iter().find(|o| o.secondary_id == "B" && o.valid_time == 1200).unwrap();
        assert_eq!(b_first.prev_secondary_ids, vec!["A".to_string()]);
        assert_eq!(b_first.primary_id, a_last.primary_id);
    }
    
    #[test]
    fn test_oracle_deterministic_reports() {
        let mut oracle1 = StormOracle::new(42);
        let mut oracle2 = StormOracle::new(42);
        simple_split(&mut oracle1);
        simple_split(&mut oracle2);
        
        // Same seed = same reports
        let t1 = oracle1.random_time_in("B", 0).unwrap();
        let t2 = oracle2.random_time_in("B", 0).unwrap();
        assert_eq!(t1, t2);
        assert!(oracle1.cell("B").unwrap().alive_at(t1));
        assert_eq!(
            oracle1.wind_in_cell("S1", "B", t1).unwrap(),
            oracle2.wind_in_cell("S1", "B", t2).unwrap()
        );
    }
    
    #[test]
    fn test_random_lineage_is_well_formed() {
        let mut oracle = StormOracle::new(7);
        oracle.random_lineage(BASE_TIME_UNIX_SEC, 2, 4).unwrap();
        for cell in oracle.cells() {
            assert!(cell.end_time >= cell.start_time);
            for parent in &cell.parents {
                assert!(oracle.cell(parent).unwrap().end_time < cell.start_time);
            }
        }
        assert!(oracle.cells().count() >= 2);
    }
}
