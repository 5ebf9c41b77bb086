//! Scenario runner - executes linkage scenarios against oracle truth.

use crate::error::SimError;
use crate::oracle::{StormOracle, BASE_TIME_UNIX_SEC, TRACKING_INTERVAL_SEC};
use crate::recorder::RecordingObserver;
use crate::scenarios::ScenarioId;

use nalgebra::Vector2;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use stormlink_core::events::EventAttributes;
use stormlink_core::persistence::{spc_date_to_time_range, time_to_spc_date};
use stormlink_core::storm_graph::LineageWalk;
use stormlink_core::{
    link_storms_to_tornadoes, link_storms_to_winds, link_warnings_to_storms, share_linkages_with_predecessors,
    AzimuthalEquidistant, EventRecord, LinkageConfig, LinkageResult, StormEventLinks, StormGraph, StormObject,
    TornadoOptions, WarningLinkageConfig, WindObservation,
};
use tracing::{debug, info};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,
    
    /// Seed used
    pub seed: u64,
    
    /// Whether scenario passed all assertions
    pub passed: bool,
    
    /// Storm objects handed to the engine
    pub num_storm_objects: usize,
    
    /// Reports handed to the engine (segments for tornado tracks)
    pub num_events: usize,
    
    /// Failure message if any
    pub failure_reason: Option<String>,
    
    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
    
    /// Last linkage run of the scenario, for export
    pub linkage: Option<LinkageResult>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Events matched to a storm
    pub linked_events: usize,
    
    /// Events left without a storm
    pub unlinked_events: usize,
    
    /// Event copies on their main storm object
    pub main_links: usize,
    
    /// Event copies on predecessors of the main object
    pub predecessor_links: usize,
    
    /// Storm objects flagged as merging predecessors
    pub merging_predecessors: usize,
    
    /// Warnings linked to at least one cell
    pub warnings_linked: usize,
    
    /// Reconciliation notices received
    pub notices: usize,
}

impl ScenarioMetrics {
    fn absorb(&mut self, other: ScenarioMetrics) {
        self.linked_events += other.linked_events;
        self.unlinked_events += other.unlinked_events;
        self.main_links += other.main_links;
        self.predecessor_links += other.predecessor_links;
        self.merging_predecessors += other.merging_predecessors;
        self.warnings_linked += other.warnings_linked;
        self.notices += other.notices;
    }
}

/// What a scenario body hands back on success.
#[derive(Default)]
struct Outcome {
    num_storm_objects: usize,
    num_events: usize,
    metrics: ScenarioMetrics,
    linkage: Option<LinkageResult>,
}

/// Runs linkage scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,
    
    /// Reports generated per scenario
    num_reports: usize,
    
    /// Overrides the per-scenario default linkage config
    config: Option<LinkageConfig>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            num_reports: 20,
            config: None,
        }
    }
    
    /// Sets the number of reports per scenario.
    pub fn with_reports(mut self, num_reports: usize) -> Self {
        self.num_reports = num_reports.max(1);
        self
    }
    
    /// Uses `config` instead of the default for every linkage run.
    pub fn with_config(mut self, config: LinkageConfig) -> Self {
        self.config = Some(config);
        self
    }
    
    fn wind_config(&self) -> LinkageConfig {
        self.config.clone().unwrap_or_else(LinkageConfig::wind)
    }
    
    fn tornado_config(&self) -> LinkageConfig {
        self.config.clone().unwrap_or_else(LinkageConfig::tornado_occurrence)
    }
    
    fn oracle(&self) -> StormOracle {
        StormOracle::new(self.seed.wrapping_mul(0x9e3779b97f4a7c15))
    }
    
    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        
        let outcome = match scenario {
            ScenarioId::SingleCell => self.run_single_cell(),
            ScenarioId::SplitLineage => self.run_split_lineage(),
            ScenarioId::MergerLineage => self.run_merger_lineage(),
            ScenarioId::TornadoAcrossSplit => self.run_tornado_across_split(),
            ScenarioId::FarEvents => self.run_far_events(),
            ScenarioId::PeriodBoundary => self.run_period_boundary(),
            ScenarioId::WarningPolygons => self.run_warning_polygons(),
            ScenarioId::RandomOutbreak => self.run_random_outbreak(),
        };
        
        match outcome {
            Ok(outcome) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: true,
                num_storm_objects: outcome.num_storm_objects,
                num_events: outcome.num_events,
                failure_reason: None,
                metrics: outcome.metrics,
                linkage: outcome.linkage,
            },
            Err(e) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                num_storm_objects: 0,
                num_events: 0,
                failure_reason: Some(e.to_string()),
                metrics: ScenarioMetrics::default(),
                linkage: None,
            },
        }
    }
    
    // =========================================================================
    // SCENARIOS
    // =========================================================================
    
    /// DST-001: SingleCell - every report inside the only cell links to it.
    fn run_single_cell(&self) -> Result<Outcome, SimError> {
        info!("DST-001: SingleCell - reports inside one moving cell");
        let mut oracle = self.oracle();
        oracle.spawn_cell(
            "A",
            BASE_TIME_UNIX_SEC,
            BASE_TIME_UNIX_SEC + 3600,
            Vector2::zeros(),
            Vector2::new(15.0, 5.0),
            8000.0,
        )?;
        
        let mut winds = Vec::with_capacity(self.num_reports);
        for k in 0..self.num_reports {
            let time = oracle.random_time_in("A", 0)?;
            winds.push(oracle.wind_in_cell(&station(k), "A", time)?);
        }
        
        let storms = oracle.storm_objects();
        let config = self.wind_config();
        let observer = RecordingObserver::new();
        let result = link_storms_to_winds(storms.clone(), &winds, &config, &observer)?;
        let metrics = check_linkage(&result, &config, true)?;
        check_observer(&observer, &result)?;
        
        for event in &result.events {
            let linkage = event
                .linkage
                .as_ref()
                .ok_or_else(|| SimError::invariant(format!("report at {} inside cell A is unlinked", event.time)))?;
            if linkage.nearest_secondary_id != "A" || linkage.distance_metres != 0.0 {
                return Err(SimError::invariant(format!(
                    "report at {} linked to {} at {:.1} m, expected A at 0 m",
                    event.time, linkage.nearest_secondary_id, linkage.distance_metres
                )));
            }
        }
        expect_count("events", result.events.len(), winds.len())?;
        
        info!("✓ SingleCell complete: {} reports linked", metrics.linked_events);
        Ok(Outcome {
            num_storm_objects: storms.len(),
            num_events: winds.len(),
            metrics,
            linkage: Some(result),
        })
    }
    
    fn split_oracle(&self) -> Result<StormOracle, SimError> {
        let mut oracle = self.oracle();
        let split_time = BASE_TIME_UNIX_SEC + 1800;
        oracle.spawn_cell(
            "A",
            BASE_TIME_UNIX_SEC,
            split_time,
            Vector2::zeros(),
            Vector2::new(15.0, 0.0),
            8000.0,
        )?;
        oracle.split_cell(
            "A",
            &[
                ("B", Vector2::new(0.0, 15_000.0), Vector2::new(15.0, 3.0)),
                ("C", Vector2::new(0.0, -15_000.0), Vector2::new(15.0, -3.0)),
            ],
            split_time + TRACKING_INTERVAL_SEC + 1800,
            6000.0,
        )?;
        Ok(oracle)
    }
    
    /// DST-002: SplitLineage - child reports also land on the parent.
    fn run_split_lineage(&self) -> Result<Outcome, SimError> {
        info!("DST-002: SplitLineage - A splits into B and C");
        let mut oracle = self.split_oracle()?;
        
        let mut expected: HashMap<String, &'static str> = HashMap::new();
        let mut winds = Vec::with_capacity(self.num_reports);
        for k in 0..self.num_reports {
            let cell = ["A", "B", "C"][k % 3];
            // Children only after the parent's extrapolation window has passed
            let min_age = if cell == "A" { 0 } else { 2 * TRACKING_INTERVAL_SEC };
            let time = oracle.random_time_in(cell, min_age)?;
            let wind = oracle.wind_in_cell(&station(k), cell, time)?;
            expected.insert(wind.station_id.clone(), cell);
            winds.push(wind);
        }
        
        let storms = oracle.storm_objects();
        let config = self.wind_config();
        let observer = RecordingObserver::new();
        let result = link_storms_to_winds(storms.clone(), &winds, &config, &observer)?;
        let metrics = check_linkage(&result, &config, true)?;
        check_observer(&observer, &result)?;
        check_expected_cells(&result.events, &expected)?;
        
        // Every child report is copied onto A's last object
        let a_last = last_object_row(&result.storm_to_events, "A")?;
        for event in result.events.iter().filter(|e| expected_cell(e, &expected) != Some("A")) {
            let on_parent = result.storm_to_events[a_last]
                .events
                .iter()
                .any(|linked| !linked.main_object && linked.time == event.time && linked.attributes == event.attributes);
            if !on_parent {
                return Err(SimError::invariant(format!(
                    "child report at {} missing from the parent's last object",
                    event.time
                )));
            }
        }
        
        info!(
            "✓ SplitLineage complete: {} main links, {} predecessor links",
            metrics.main_links, metrics.predecessor_links
        );
        Ok(Outcome {
            num_storm_objects: storms.len(),
            num_events: winds.len(),
            metrics,
            linkage: Some(result),
        })
    }
    
    /// DST-003: MergerLineage - merging parents are flagged but keep no reports.
    fn run_merger_lineage(&self) -> Result<Outcome, SimError> {
        info!("DST-003: MergerLineage - A and B merge into C");
        let mut oracle = self.oracle();
        let merge_time = BASE_TIME_UNIX_SEC + 1800;
        for (id, y) in [("A", 15_000.0), ("B", -15_000.0)] {
            oracle.spawn_cell(
                id,
                BASE_TIME_UNIX_SEC,
                merge_time,
                Vector2::new(0.0, y),
                Vector2::new(15.0, 0.0),
                6000.0,
            )?;
        }
        oracle.merge_cells(
            &["A", "B"],
            "C",
            Vector2::new(15.0, 0.0),
            merge_time + TRACKING_INTERVAL_SEC + 1800,
            8000.0,
        )?;
        
        let mut expected: HashMap<String, &'static str> = HashMap::new();
        let mut winds = Vec::with_capacity(self.num_reports);
        for k in 0..self.num_reports {
            let time = oracle.random_time_in("C", 2 * TRACKING_INTERVAL_SEC)?;
            let wind = oracle.wind_in_cell(&station(k), "C", time)?;
            expected.insert(wind.station_id.clone(), "C");
            winds.push(wind);
        }
        
        let storms = oracle.storm_objects();
        let config = self.wind_config();
        let observer = RecordingObserver::new();
        let result = link_storms_to_winds(storms.clone(), &winds, &config, &observer)?;
        let metrics = check_linkage(&result, &config, true)?;
        check_observer(&observer, &result)?;
        check_expected_cells(&result.events, &expected)?;
        
        for links in result.storm_to_events.iter().filter(|s| s.object.secondary_id != "C") {
            if !links.events.is_empty() {
                return Err(SimError::invariant(format!(
                    "merging parent {} at {} holds {} reports",
                    links.object.secondary_id,
                    links.object.valid_time,
                    links.events.len()
                )));
            }
        }
        for parent in ["A", "B"] {
            let row = last_object_row(&result.storm_to_events, parent)?;
            if !result.storm_to_events[row].merging_predecessor {
                return Err(SimError::invariant(format!("{} is not flagged as merging predecessor", parent)));
            }
        }
        
        info!("✓ MergerLineage complete: {} objects flagged", metrics.merging_predecessors);
        Ok(Outcome {
            num_storm_objects: storms.len(),
            num_events: winds.len(),
            metrics,
            linkage: Some(result),
        })
    }
    
    /// DST-004: TornadoAcrossSplit - every segment of the track is linked.
    fn run_tornado_across_split(&self) -> Result<Outcome, SimError> {
        info!("DST-004: TornadoAcrossSplit - full track through a split");
        let oracle = self.split_oracle()?;
        let split_time = oracle.cell("A")?.end_time;
        let child_start = oracle.cell("B")?.start_time;
        let tornado = oracle.tornado_between("T1", "A", split_time - 900, "B", child_start + 900)?;
        
        let storms = oracle.storm_objects();
        let config = self.tornado_config();
        let options = TornadoOptions::full_tracks();
        let observer = RecordingObserver::new();
        let result = link_storms_to_tornadoes(storms.clone(), &[tornado.clone()], &config, &options, &observer)?;
        let metrics = check_linkage(&result, &config, false)?;
        check_observer(&observer, &result)?;
        
        let segments = tornado.segment_track(options.track_interp_interval_sec);
        expect_count("tornado segments", result.events.len(), segments.len())?;
        
        let lineage: BTreeSet<&str> = ["A", "B", "C"].into_iter().collect();
        for event in &result.events {
            let linkage = event
                .linkage
                .as_ref()
                .ok_or_else(|| SimError::invariant(format!("tornado segment at {} is unlinked", event.time)))?;
            if !lineage.contains(linkage.nearest_secondary_id.as_str()) {
                return Err(SimError::invariant(format!(
                    "segment at {} linked outside the lineage ({})",
                    event.time, linkage.nearest_secondary_id
                )));
            }
        }
        
        let first = result
            .events
            .iter()
            .min_by_key(|e| e.time)
            .and_then(|e| e.linkage.as_ref())
            .ok_or_else(|| SimError::invariant("no tornado segments"))?;
        if first.nearest_secondary_id != "A" || first.distance_metres != 0.0 {
            return Err(SimError::invariant(format!(
                "tornado start linked to {} at {:.1} m, expected A at 0 m",
                first.nearest_secondary_id, first.distance_metres
            )));
        }
        
        let tally = observer
            .last_summary()
            .and_then(|s| s.tornadoes)
            .ok_or_else(|| SimError::invariant("no tornado tally reported"))?;
        expect_count("unlinked tornadoes", tally.num_unlinked, 0)?;
        
        info!("✓ TornadoAcrossSplit complete: {} segments linked", metrics.linked_events);
        Ok(Outcome {
            num_storm_objects: storms.len(),
            num_events: segments.len(),
            metrics,
            linkage: Some(result),
        })
    }
    
    /// DST-005: FarEvents - reports beyond the link distance stay unlinked.
    fn run_far_events(&self) -> Result<Outcome, SimError> {
        info!("DST-005: FarEvents - reports 60 km away from the only cell");
        let mut oracle = self.oracle();
        oracle.spawn_cell(
            "A",
            BASE_TIME_UNIX_SEC,
            BASE_TIME_UNIX_SEC + 3600,
            Vector2::zeros(),
            Vector2::new(15.0, 0.0),
            8000.0,
        )?;
        
        let mut winds = Vec::with_capacity(self.num_reports);
        for k in 0..self.num_reports {
            let time = oracle.random_time_in("A", 0)?;
            let position = oracle.cell("A")?.position_at(time) + Vector2::new(0.0, 60_000.0);
            winds.push(oracle.wind_at(&station(k), time, position)?);
        }
        
        let storms = oracle.storm_objects();
        let config = self.wind_config();
        let observer = RecordingObserver::new();
        let result = link_storms_to_winds(storms.clone(), &winds, &config, &observer)?;
        let metrics = check_linkage(&result, &config, true)?;
        check_observer(&observer, &result)?;
        
        if config.max_link_distance_metres < 40_000.0 {
            expect_count("linked far reports", metrics.linked_events, 0)?;
            expect_count("reported unlinked events", observer.unlinked_events().len(), winds.len())?;
        }
        
        info!("✓ FarEvents complete: {} unlinked", metrics.unlinked_events);
        Ok(Outcome {
            num_storm_objects: storms.len(),
            num_events: winds.len(),
            metrics,
            linkage: Some(result),
        })
    }
    
    /// DST-006: PeriodBoundary - late reports reach early predecessors.
    fn run_period_boundary(&self) -> Result<Outcome, SimError> {
        info!("DST-006: PeriodBoundary - one cell across two SPC dates");
        let (_, last_second) = spc_date_to_time_range(&time_to_spc_date(BASE_TIME_UNIX_SEC)?)?;
        let boundary = last_second + 1;
        
        let mut oracle = self.oracle();
        oracle.set_tracking_start(boundary - 3 * 3600);
        oracle.spawn_cell(
            "A",
            boundary - 1800,
            boundary + 1800,
            Vector2::zeros(),
            Vector2::new(15.0, 0.0),
            8000.0,
        )?;
        
        let half = self.num_reports.div_ceil(2);
        let (mut early_winds, mut late_winds) = (Vec::new(), Vec::new());
        for k in 0..self.num_reports {
            let time = if k < half {
                oracle.random_time_between(boundary - 1800, boundary - 2 * TRACKING_INTERVAL_SEC)
            } else {
                // Late reports must stay on their main object to be shared
                let step = oracle.random_index(5) as i64 + 1;
                boundary + step * TRACKING_INTERVAL_SEC + oracle.random_time_between(0, 140)
            };
            let wind = oracle.wind_in_cell(&station(k), "A", time)?;
            if k < half {
                early_winds.push(wind);
            } else {
                late_winds.push(wind);
            }
        }
        
        let (early_storms, late_storms): (Vec<StormObject>, Vec<StormObject>) =
            oracle.storm_objects().into_iter().partition(|o| o.valid_time < boundary);
        let num_storm_objects = early_storms.len() + late_storms.len();
        
        let config = self.wind_config();
        let observer = RecordingObserver::new();
        let early = link_storms_to_winds(early_storms, &early_winds, &config, &observer)?;
        let late = link_storms_to_winds(late_storms, &late_winds, &config, &observer)?;
        let mut metrics = check_linkage(&early, &config, true)?;
        metrics.absorb(check_linkage(&late, &config, true)?);
        
        let (shared_early, shared_late) =
            share_linkages_with_predecessors(early.storm_to_events.clone(), late.storm_to_events.clone())?;
        expect_count("late storm objects", shared_late.len(), late.storm_to_events.len())?;
        
        let early_last = last_object_row(&shared_early, "A")?;
        let early_last_time = shared_early[early_last].object.valid_time;
        for event in late.events.iter().filter(|e| e.is_linked()) {
            let shared = shared_early[early_last]
                .events
                .iter()
                .find(|linked| linked.time == event.time && linked.attributes == event.attributes)
                .ok_or_else(|| {
                    SimError::invariant(format!("late report at {} not shared with the early period", event.time))
                })?;
            if shared.main_object || shared.relative_time_sec != event.time - early_last_time {
                return Err(SimError::invariant(format!(
                    "shared report at {} has main={} relative time {}",
                    event.time, shared.main_object, shared.relative_time_sec
                )));
            }
        }
        
        let shared_links: usize = shared_early.iter().map(|s| s.events.len()).sum::<usize>()
            - early.storm_to_events.iter().map(|s| s.events.len()).sum::<usize>();
        metrics.predecessor_links += shared_links;
        
        info!("✓ PeriodBoundary complete: {} links shared across the boundary", shared_links);
        Ok(Outcome {
            num_storm_objects,
            num_events: early_winds.len() + late_winds.len(),
            metrics,
            linkage: Some(late),
        })
    }
    
    /// DST-007: WarningPolygons - a warning over A links only A.
    fn run_warning_polygons(&self) -> Result<Outcome, SimError> {
        info!("DST-007: WarningPolygons - warnings over one of two cells");
        let mut oracle = self.oracle();
        for (id, y) in [("A", 0.0), ("D", 80_000.0)] {
            oracle.spawn_cell(
                id,
                BASE_TIME_UNIX_SEC,
                BASE_TIME_UNIX_SEC + 3600,
                Vector2::new(0.0, y),
                Vector2::new(15.0, 0.0),
                8000.0,
            )?;
        }
        
        let (start, end) = (BASE_TIME_UNIX_SEC + 1200, BASE_TIME_UNIX_SEC + 2400);
        let over_a = oracle.cell("A")?.position_at((start + end) / 2);
        let warnings = vec![
            oracle.warning_around(over_a, start, end, 20_000.0),
            oracle.warning_around(Vector2::new(0.0, -150_000.0), start, end, 20_000.0),
        ];
        
        let storms = oracle.storm_objects();
        let mut graph = StormGraph::new(storms.clone())?;
        let (lats, lngs): (Vec<f64>, Vec<f64>) = storms
            .iter()
            .map(|o| (o.centroid_latitude_deg, o.centroid_longitude_deg))
            .unzip();
        graph.project(AzimuthalEquidistant::centred_on(&lats, &lngs)?);
        
        let linked = link_warnings_to_storms(&graph, &warnings, &WarningLinkageConfig::default())?;
        if linked[0].secondary_ids != vec!["A".to_string()] {
            return Err(SimError::invariant(format!(
                "warning over A linked to {:?}",
                linked[0].secondary_ids
            )));
        }
        if !linked[1].secondary_ids.is_empty() {
            return Err(SimError::invariant(format!(
                "warning over empty ground linked to {:?}",
                linked[1].secondary_ids
            )));
        }
        
        let metrics = ScenarioMetrics {
            warnings_linked: linked.iter().filter(|w| !w.secondary_ids.is_empty()).count(),
            ..ScenarioMetrics::default()
        };
        info!("✓ WarningPolygons complete: {} of {} warnings linked", metrics.warnings_linked, warnings.len());
        Ok(Outcome {
            num_storm_objects: storms.len(),
            num_events: warnings.len(),
            metrics,
            linkage: None,
        })
    }
    
    /// DST-008: RandomOutbreak - graph and linkage invariants on a random lineage.
    fn run_random_outbreak(&self) -> Result<Outcome, SimError> {
        info!("DST-008: RandomOutbreak - seeded lineage with splits and mergers");
        let mut oracle = self.oracle();
        oracle.random_lineage(BASE_TIME_UNIX_SEC, 2, 4)?;
        
        let cell_ids: Vec<String> = oracle.cells().map(|c| c.secondary_id.clone()).collect();
        let mut winds: Vec<WindObservation> = Vec::with_capacity(self.num_reports);
        for k in 0..self.num_reports {
            let id = &cell_ids[oracle.random_index(cell_ids.len())];
            let time = oracle.random_time_in(id, 0)?;
            winds.push(oracle.wind_in_cell(&station(k), id, time)?);
        }
        
        let storms = oracle.storm_objects();
        let graph = StormGraph::new(storms.clone())?;
        check_lineage(&graph)?;
        
        let config = self.wind_config();
        let observer = RecordingObserver::new();
        let result = link_storms_to_winds(storms.clone(), &winds, &config, &observer)?;
        let metrics = check_linkage(&result, &config, true)?;
        check_observer(&observer, &result)?;
        expect_count("unlinked reports inside cells", metrics.unlinked_events, 0)?;
        
        debug!("{} cells, {} storm objects", cell_ids.len(), storms.len());
        info!(
            "✓ RandomOutbreak complete: {} cells, {} merging predecessors",
            cell_ids.len(),
            metrics.merging_predecessors
        );
        Ok(Outcome {
            num_storm_objects: storms.len(),
            num_events: winds.len(),
            metrics,
            linkage: Some(result),
        })
    }
}

// =============================================================================
// INVARIANT CHECKS
// =============================================================================

fn station(k: usize) -> String {
    format!("S{:04}", k)
}

fn expect_count(what: &str, got: usize, expected: usize) -> Result<(), SimError> {
    if got == expected {
        Ok(())
    } else {
        Err(SimError::invariant(format!("{}: got {}, expected {}", what, got, expected)))
    }
}

fn expected_cell<'a>(event: &EventRecord, expected: &HashMap<String, &'a str>) -> Option<&'a str> {
    match &event.attributes {
        EventAttributes::Wind { station_id, .. } => expected.get(station_id).copied(),
        EventAttributes::Tornado { .. } => None,
    }
}

fn check_expected_cells(events: &[EventRecord], expected: &HashMap<String, &str>) -> Result<(), SimError> {
    for event in events {
        let want = expected_cell(event, expected);
        let got = event.linkage.as_ref().map(|l| l.nearest_secondary_id.as_str());
        if want != got {
            return Err(SimError::invariant(format!(
                "report at {} linked to {:?}, expected {:?}",
                event.time, got, want
            )));
        }
    }
    Ok(())
}

fn last_object_row(table: &[StormEventLinks], secondary_id: &str) -> Result<usize, SimError> {
    table
        .iter()
        .enumerate()
        .filter(|(_, s)| s.object.secondary_id == secondary_id)
        .max_by_key(|(_, s)| s.object.valid_time)
        .map(|(row, _)| row)
        .ok_or_else(|| SimError::UnknownCell(secondary_id.to_string()))
}

/// Properties every linkage run must satisfy.
pub fn check_linkage(
    result: &LinkageResult,
    config: &LinkageConfig,
    check_distance: bool,
) -> Result<ScenarioMetrics, SimError> {
    let known: BTreeSet<&str> = result
        .storm_to_events
        .iter()
        .map(|s| s.object.secondary_id.as_str())
        .collect();
    
    let mut metrics = ScenarioMetrics::default();
    for event in &result.events {
        let Some(linkage) = &event.linkage else {
            metrics.unlinked_events += 1;
            if !event.distance_metres().is_nan() {
                return Err(SimError::invariant("unlinked event with a finite distance"));
            }
            continue;
        };
        metrics.linked_events += 1;
        if !known.contains(linkage.nearest_secondary_id.as_str()) {
            return Err(SimError::invariant(format!(
                "event linked to unknown cell {}",
                linkage.nearest_secondary_id
            )));
        }
        if check_distance && linkage.distance_metres > config.max_link_distance_metres {
            return Err(SimError::invariant(format!(
                "link distance {:.1} m exceeds {:.1} m",
                linkage.distance_metres, config.max_link_distance_metres
            )));
        }
    }
    
    for links in &result.storm_to_events {
        if links.merging_predecessor {
            metrics.merging_predecessors += 1;
        }
        for event in &links.events {
            if event.main_object {
                metrics.main_links += 1;
            } else {
                metrics.predecessor_links += 1;
                if event.relative_time_sec < 0 {
                    return Err(SimError::invariant(format!(
                        "predecessor {} at {} is later than its event",
                        links.object.secondary_id, links.object.valid_time
                    )));
                }
            }
        }
    }
    // The main object is skipped when it is later than its event
    if metrics.main_links > metrics.linked_events {
        return Err(SimError::invariant(format!(
            "{} main-object links for {} linked events",
            metrics.main_links, metrics.linked_events
        )));
    }
    Ok(metrics)
}

/// Root walks are empty and simple/merging predecessor sets are disjoint.
pub fn check_lineage(graph: &StormGraph) -> Result<(), SimError> {
    for row in 0..graph.len() {
        if graph.find_immediate_predecessors(row)?.is_empty()
            && !graph.find_predecessors(row, &LineageWalk::new())?.is_empty()
        {
            return Err(SimError::invariant(format!("root row {} has predecessors", row)));
        }
        let sets = graph.classify_predecessors(row)?;
        if !sets.simple.is_disjoint(&sets.merging) {
            return Err(SimError::invariant(format!(
                "row {} has predecessors that are both simple and merging",
                row
            )));
        }
    }
    Ok(())
}

fn check_observer(observer: &RecordingObserver, result: &LinkageResult) -> Result<(), SimError> {
    let unlinked = result.events.iter().filter(|e| !e.is_linked()).count();
    let summary = observer
        .last_summary()
        .ok_or_else(|| SimError::invariant("no linkage summary reported"))?;
    expect_count("summary unlinked", summary.num_unlinked, unlinked)?;
    expect_count("unlinked notices", observer.unlinked_events().len(), unlinked)?;
    Ok(())
}
