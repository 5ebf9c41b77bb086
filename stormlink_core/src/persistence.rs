//! Linkage files on disk and multi-day reconciliation.
//!
//! Files are JSON, one per SPC date (or per storm time for one-time runs):
//! - per date: `{top}/{yyyy}/{prefix}_{yyyymmdd}.json`
//! - one time: `{top}/{yyyy}/{yyyymmdd}/{prefix}_{yyyy-mm-dd-HHMMSS}.json`
//!
//! An SPC date `yyyymmdd` covers 1200 UTC on that day through 1159:59 UTC
//! the next day.

use crate::config::{EventType, LinkageMetadata};
use crate::error::{LinkageError, Result};
use crate::events::EventRecord;
use crate::linkage::LinkageResult;
use crate::reconciliation::{reconcile_tornado_events, share_linkages_with_predecessors};
use crate::reversal::{reverse_linkages, StormEventLinks};
use crate::storm_graph::{StormGraph, StormObject};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use stormlink_env::{LinkageObserver, ReconciliationNotice};
use tracing::debug;

const SPC_DATE_FORMAT: &str = "%Y%m%d";
const SECONDS_PER_DAY: i64 = 86_400;
const SPC_DAY_OFFSET_SEC: i64 = 12 * 3600;

// ============================================================================
// SPC DATES
// ============================================================================

fn parse_spc_date(spc_date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(spc_date, SPC_DATE_FORMAT)
        .map_err(|_| LinkageError::InvalidSpcDate(spc_date.to_string()))
}

fn utc(unix_sec: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(unix_sec, 0)
        .ok_or_else(|| LinkageError::events(format!("time {} is out of range", unix_sec)))
}

/// SPC date containing `unix_sec`.
pub fn time_to_spc_date(unix_sec: i64) -> Result<String> {
    Ok(utc(unix_sec - SPC_DAY_OFFSET_SEC)?.format(SPC_DATE_FORMAT).to_string())
}

/// First and last second covered by an SPC date.
pub fn spc_date_to_time_range(spc_date: &str) -> Result<(i64, i64)> {
    let date = parse_spc_date(spc_date)?;
    let start = date
        .and_hms_opt(12, 0, 0)
        .ok_or_else(|| LinkageError::InvalidSpcDate(spc_date.to_string()))?
        .and_utc()
        .timestamp();
    Ok((start, start + SECONDS_PER_DAY - 1))
}

/// Every SPC date from `first` to `last`, inclusive.
pub fn spc_dates_in_range(first: &str, last: &str) -> Result<Vec<String>> {
    let first_date = parse_spc_date(first)?;
    let last_date = parse_spc_date(last)?;
    if last_date < first_date {
        return Err(LinkageError::config(format!(
            "last SPC date {} precedes first SPC date {}",
            last, first
        )));
    }
    
    let mut dates = Vec::new();
    let mut date = first_date;
    while date <= last_date {
        dates.push(date.format(SPC_DATE_FORMAT).to_string());
        date += Duration::days(1);
    }
    Ok(dates)
}

// ============================================================================
// FILES
// ============================================================================

/// What a linkage file covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkagePeriod {
    /// One SPC date, `yyyymmdd`
    SpcDate(String),
    
    /// One storm time, for runs over a single tracking instant
    ValidTime(i64),
}

/// Everything written for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageBundle {
    pub event_type: EventType,
    
    pub metadata: LinkageMetadata,
    
    pub storm_to_events: Vec<StormEventLinks>,
    
    /// Per-event linkages; required to reconcile tornado tracks later
    #[serde(default)]
    pub event_to_storm: Option<Vec<EventRecord>>,
}

impl LinkageBundle {
    pub fn from_result(result: LinkageResult, keep_events: bool) -> Self {
        Self {
            event_type: result.event_type,
            metadata: result.metadata,
            storm_to_events: result.storm_to_events,
            event_to_storm: keep_events.then_some(result.events),
        }
    }
    
    fn storm_objects(&self) -> Vec<StormObject> {
        self.storm_to_events.iter().map(|s| s.object.clone()).collect()
    }
}

/// Path of the linkage file for `period`.
///
/// With `require_exists`, a missing file is an error.
pub fn find_linkage_file(
    top_dir: &Path,
    event_type: EventType,
    period: &LinkagePeriod,
    require_exists: bool,
) -> Result<PathBuf> {
    let prefix = event_type.file_prefix();
    let path = match period {
        LinkagePeriod::SpcDate(spc_date) => {
            parse_spc_date(spc_date)?;
            top_dir
                .join(&spc_date[..4])
                .join(format!("{}_{}.json", prefix, spc_date))
        }
        LinkagePeriod::ValidTime(unix_sec) => {
            let spc_date = time_to_spc_date(*unix_sec)?;
            let stamp = utc(*unix_sec)?.format("%Y-%m-%d-%H%M%S");
            top_dir
                .join(&spc_date[..4])
                .join(&spc_date)
                .join(format!("{}_{}.json", prefix, stamp))
        }
    };
    
    if require_exists && !path.is_file() {
        return Err(LinkageError::MissingFile(path));
    }
    Ok(path)
}

pub fn write_linkage_file(path: &Path, bundle: &LinkageBundle) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(bundle)?)?;
    debug!("Wrote {} storm objects to {}", bundle.storm_to_events.len(), path.display());
    Ok(())
}

pub fn read_linkage_file(path: &Path) -> Result<LinkageBundle> {
    if !path.is_file() {
        return Err(LinkageError::MissingFile(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

// ============================================================================
// MULTI-DAY SHARING
// ============================================================================

/// Reconciles the linkage files of consecutive SPC dates and writes the
/// results to `output_dir`, returning the paths written.
///
/// All periods are held in memory. Tornado tracks are reconciled first,
/// pair by pair; each period's storm table is then rebuilt from its own
/// events and those of both neighbours, so a segment matched to a storm of
/// the next day still shows up in that day's table. Finally events are
/// spliced onto simple predecessors in the earlier period of each pair.
pub fn share_linkages(
    input_dir: &Path,
    output_dir: &Path,
    first_spc_date: &str,
    last_spc_date: &str,
    event_type: EventType,
    observer: &dyn LinkageObserver,
) -> Result<Vec<PathBuf>> {
    let dates = spc_dates_in_range(first_spc_date, last_spc_date)?;
    if dates.len() < 2 {
        observer.reconciliation(&ReconciliationNotice::SinglePeriod {
            period: first_spc_date.to_string(),
        });
    }
    
    let mut bundles = Vec::with_capacity(dates.len());
    for date in &dates {
        let path = find_linkage_file(input_dir, event_type, &LinkagePeriod::SpcDate(date.clone()), true)?;
        observer.progress(&format!("Reading {}", path.display()));
        let bundle = read_linkage_file(&path)?;
        if bundle.event_type != event_type {
            return Err(LinkageError::InvalidEventType(format!(
                "{} holds {} linkages, expected {}",
                path.display(),
                bundle.event_type,
                event_type
            )));
        }
        bundles.push(bundle);
    }
    
    if event_type.is_tornado() {
        share_tornado_tracks(&mut bundles, observer)?;
    }
    
    for k in 1..bundles.len() {
        let early = std::mem::take(&mut bundles[k - 1].storm_to_events);
        let late = std::mem::take(&mut bundles[k].storm_to_events);
        let (early, late) = share_linkages_with_predecessors(early, late)?;
        bundles[k - 1].storm_to_events = early;
        bundles[k].storm_to_events = late;
    }
    
    let mut written = Vec::with_capacity(bundles.len());
    for (date, bundle) in dates.iter().zip(&bundles) {
        let path = find_linkage_file(output_dir, event_type, &LinkagePeriod::SpcDate(date.clone()), false)?;
        write_linkage_file(&path, bundle)?;
        observer.reconciliation(&ReconciliationNotice::PeriodWritten {
            period: date.clone(),
            path: path.display().to_string(),
        });
        written.push(path);
    }
    Ok(written)
}

fn take_events(bundle: &mut LinkageBundle, spc_date_index: usize) -> Result<Vec<EventRecord>> {
    bundle.event_to_storm.take().ok_or_else(|| {
        LinkageError::events(format!(
            "period {} has no per-event linkages; tornado tracks cannot be reconciled",
            spc_date_index
        ))
    })
}

fn share_tornado_tracks(bundles: &mut [LinkageBundle], observer: &dyn LinkageObserver) -> Result<()> {
    for k in 1..bundles.len() {
        let early_events = take_events(&mut bundles[k - 1], k - 1)?;
        let late_events = take_events(&mut bundles[k], k)?;
        let metadata = &bundles[k - 1].metadata;
        let (early_events, late_events) = reconcile_tornado_events(
            early_events,
            late_events,
            bundles[k - 1].storm_objects(),
            bundles[k].storm_objects(),
            metadata.max_time_before_storm_start_sec,
            metadata.max_time_after_storm_end_sec,
            observer,
        )?;
        bundles[k - 1].event_to_storm = Some(early_events);
        bundles[k].event_to_storm = Some(late_events);
    }
    
    // Tables are rebuilt once every period's events are final
    let tables = (0..bundles.len())
        .map(|k| period_table(bundles, k))
        .collect::<Result<Vec<_>>>()?;
    for (bundle, table) in bundles.iter_mut().zip(tables) {
        bundle.storm_to_events = table;
    }
    Ok(())
}

/// Storm table of period `k`, reversed over the events of `k` and its
/// neighbours. Period `k`'s objects come first and win over duplicates.
fn period_table(bundles: &[LinkageBundle], k: usize) -> Result<Vec<StormEventLinks>> {
    let neighbours = k.saturating_sub(1)..(k + 2).min(bundles.len());
    let num_own = bundles[k].storm_to_events.len();
    
    let mut seen: HashSet<(String, i64)> = HashSet::new();
    let mut objects = Vec::new();
    let own = std::iter::once(k).chain(neighbours.clone().filter(|&n| n != k));
    for n in own {
        for object in bundles[n].storm_objects() {
            if seen.insert((object.secondary_id.clone(), object.valid_time)) {
                objects.push(object);
            }
        }
    }
    
    let events: Vec<EventRecord> = neighbours
        .flat_map(|n| bundles[n].event_to_storm.iter().flatten().cloned())
        .collect();
    
    let graph = StormGraph::new(objects)?;
    let mut table = reverse_linkages(&graph, &events)?;
    
    // Merging flags set by earlier runs stay set
    for (links, old) in table.iter_mut().zip(&bundles[k].storm_to_events) {
        links.merging_predecessor |= old.merging_predecessor;
    }
    table.truncate(num_own);
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventAttributes, EventLinkage};
    use crate::fixtures::{projection, storm, with_cell_times};
    use approx::assert_relative_eq;
    use stormlink_env::NullObserver;
    
    #[test]
    fn test_spc_date_boundaries() {
        // 2011-04-27 12:00:00 UTC
        let noon = 1_303_905_600;
        assert_eq!(time_to_spc_date(noon).unwrap(), "20110427");
        assert_eq!(time_to_spc_date(noon - 1).unwrap(), "20110426");
        assert_eq!(time_to_spc_date(noon + SECONDS_PER_DAY - 1).unwrap(), "20110427");
        assert_eq!(spc_date_to_time_range("20110427").unwrap(), (noon, noon + SECONDS_PER_DAY - 1));
    }
    
    #[test]
    fn test_spc_dates_in_range() {
        let dates = spc_dates_in_range("20110228", "20110302").unwrap();
        assert_eq!(dates, vec!["20110228", "20110301", "20110302"]);
        assert!(spc_dates_in_range("20110302", "20110228").is_err());
        assert!(matches!(
            spc_dates_in_range("2011-03-02", "20110303"),
            Err(LinkageError::InvalidSpcDate(_))
        ));
    }
    
    #[test]
    fn test_file_names() {
        let top = Path::new("/data/linkage");
        let per_date = find_linkage_file(
            top,
            EventType::Wind,
            &LinkagePeriod::SpcDate("20110427".to_string()),
            false,
        )
        .unwrap();
        assert_eq!(per_date, Path::new("/data/linkage/2011/storm_to_winds_20110427.json"));
        
        // 2011-04-28 03:04:05 UTC still belongs to SPC date 20110427
        let one_time = find_linkage_file(
            top,
            EventType::Tornado,
            &LinkagePeriod::ValidTime(1_303_959_845),
            false,
        )
        .unwrap();
        assert_eq!(
            one_time,
            Path::new("/data/linkage/2011/20110427/storm_to_tornadoes_2011-04-28-030405.json")
        );
    }
    
    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let period = LinkagePeriod::SpcDate("20110427".to_string());
        let result = find_linkage_file(dir.path(), EventType::Wind, &period, true);
        assert!(matches!(result, Err(LinkageError::MissingFile(_))));
        assert!(matches!(
            read_linkage_file(&dir.path().join("nope.json")),
            Err(LinkageError::MissingFile(_))
        ));
    }
    
    fn wind_at(time: i64, x: f64, secondary_id: &str, storm_time: i64) -> EventRecord {
        let (lat, lng) = projection().unproject_point(x, 0.0);
        let mut event = EventRecord::new(
            time,
            lat,
            lng,
            EventAttributes::Wind {
                station_id: "KOUN".to_string(),
                u_wind_m_s: 30.0,
                v_wind_m_s: 0.0,
            },
        );
        event.linkage = Some(EventLinkage {
            nearest_secondary_id: secondary_id.to_string(),
            nearest_time: storm_time,
            distance_metres: 0.0,
        });
        event
    }
    
    fn tornado_at(time: i64, x: f64, linked_to: Option<(&str, i64)>) -> EventRecord {
        let (lat, lng) = projection().unproject_point(x, 0.0);
        let mut event = EventRecord::new(
            time,
            lat,
            lng,
            EventAttributes::Tornado {
                tornado_id: "t1".to_string(),
                ef_rating: "EF2".to_string(),
            },
        );
        event.linkage = linked_to.map(|(secondary_id, storm_time)| EventLinkage {
            nearest_secondary_id: secondary_id.to_string(),
            nearest_time: storm_time,
            distance_metres: 0.0,
        });
        event.tornado_assigned = true;
        event
    }
    
    fn typed_bundle(event_type: EventType, objects: Vec<StormObject>, events: Vec<EventRecord>) -> LinkageBundle {
        let graph = StormGraph::new(objects).unwrap();
        LinkageBundle {
            event_type,
            metadata: LinkageMetadata::default_for(event_type),
            storm_to_events: reverse_linkages(&graph, &events).unwrap(),
            event_to_storm: Some(events),
        }
    }
    
    fn bundle(objects: Vec<StormObject>, events: Vec<EventRecord>) -> LinkageBundle {
        typed_bundle(EventType::Wind, objects, events)
    }
    
    fn write_days(dir: &Path, event_type: EventType, days: &[(&str, &LinkageBundle)]) {
        for (date, b) in days {
            let period = LinkagePeriod::SpcDate(date.to_string());
            let path = find_linkage_file(dir, event_type, &period, false).unwrap();
            write_linkage_file(&path, b).unwrap();
        }
    }
    
    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let objects = with_cell_times(vec![storm("A", 1000, (0.0, 0.0), 5000.0, &[], &[])]);
        let original = bundle(objects, vec![wind_at(1000, 0.0, "A", 1000)]);
        
        let path = dir.path().join("2011").join("storm_to_winds_20110427.json");
        write_linkage_file(&path, &original).unwrap();
        let restored = read_linkage_file(&path).unwrap();
        
        assert_eq!(restored.metadata, original.metadata);
        assert_eq!(restored.storm_to_events.len(), 1);
        let links = &restored.storm_to_events[0];
        assert_eq!(links.object.secondary_id, "A");
        assert_eq!(links.num_main_events(), 1);
        assert_relative_eq!(
            links.object.centroid_latitude_deg,
            original.storm_to_events[0].object.centroid_latitude_deg,
            epsilon = 1e-12
        );
        
        let event = &restored.event_to_storm.unwrap()[0];
        assert_eq!(event.linkage, original.event_to_storm.unwrap()[0].linkage);
        assert!(event.x_metres.is_nan());
    }
    
    #[test]
    fn test_share_linkages_across_two_days() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (day1, day2) = ("20110427", "20110428");
        let (start2, _) = spc_date_to_time_range(day2).unwrap();
        
        // Storm A crosses the day boundary; the wind is matched on day two
        let early = bundle(
            vec![storm("A", start2 - 300, (0.0, 0.0), 5000.0, &[], &["A"])],
            vec![],
        );
        let late = bundle(
            vec![storm("A", start2 + 300, (3000.0, 0.0), 5000.0, &["A"], &[])],
            vec![wind_at(start2 + 400, 3000.0, "A", start2 + 300)],
        );
        write_days(input.path(), EventType::Wind, &[(day1, &early), (day2, &late)]);
        
        let written =
            share_linkages(input.path(), output.path(), day1, day2, EventType::Wind, &NullObserver).unwrap();
        assert_eq!(written.len(), 2);
        
        let early = read_linkage_file(&written[0]).unwrap();
        let late = read_linkage_file(&written[1]).unwrap();
        assert_eq!(early.storm_to_events[0].events.len(), 1);
        assert_eq!(early.storm_to_events[0].events[0].relative_time_sec, 700);
        assert!(!early.storm_to_events[0].events[0].main_object);
        assert_eq!(late.storm_to_events[0].num_main_events(), 1);
    }
    
    #[test]
    fn test_share_linkages_copies_tornado_once() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (day1, day2) = ("20110427", "20110428");
        let (start2, _) = spc_date_to_time_range(day2).unwrap();
        
        let early = typed_bundle(
            EventType::Tornado,
            vec![storm("A", start2 - 300, (0.0, 0.0), 5000.0, &[], &["A"])],
            vec![],
        );
        let late = typed_bundle(
            EventType::Tornado,
            vec![storm("A", start2 + 300, (3000.0, 0.0), 5000.0, &["A"], &[])],
            vec![tornado_at(start2 + 400, 3000.0, Some(("A", start2 + 300)))],
        );
        write_days(input.path(), EventType::Tornado, &[(day1, &early), (day2, &late)]);
        
        let written =
            share_linkages(input.path(), output.path(), day1, day2, EventType::Tornado, &NullObserver).unwrap();
        
        // The rebuilt day-one table already holds the copy; the predecessor pass adds none
        let early = read_linkage_file(&written[0]).unwrap();
        assert_eq!(early.storm_to_events[0].events.len(), 1);
        assert_eq!(early.storm_to_events[0].events[0].relative_time_sec, 700);
        assert!(!early.storm_to_events[0].events[0].main_object);
        
        let late = read_linkage_file(&written[1]).unwrap();
        assert_eq!(late.storm_to_events[0].events.len(), 1);
        assert_eq!(late.storm_to_events[0].num_main_events(), 1);
    }
    
    #[test]
    fn test_share_linkages_links_tornado_tail_across_days() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (day1, day2) = ("20110427", "20110428");
        let (start2, _) = spc_date_to_time_range(day2).unwrap();
        let storm_early = storm("A", start2 - 300, (0.0, 0.0), 5000.0, &[], &["A"]);
        let storm_late = storm("A", start2 + 300, (3000.0, 0.0), 5000.0, &["A"], &[]);
        
        // Day one linked the first segment only; day two saw the tornado but linked nothing
        let early = typed_bundle(
            EventType::Tornado,
            vec![storm_early],
            vec![
                tornado_at(start2 - 300, 0.0, Some(("A", start2 - 300))),
                tornado_at(start2 + 300, 3000.0, None),
            ],
        );
        let late = typed_bundle(
            EventType::Tornado,
            vec![storm_late],
            vec![tornado_at(start2 - 300, 0.0, None), tornado_at(start2 + 300, 3000.0, None)],
        );
        write_days(input.path(), EventType::Tornado, &[(day1, &early), (day2, &late)]);
        
        let written =
            share_linkages(input.path(), output.path(), day1, day2, EventType::Tornado, &NullObserver).unwrap();
        let early = read_linkage_file(&written[0]).unwrap();
        let late = read_linkage_file(&written[1]).unwrap();
        
        // The unlinked day-two copy is dropped and the tail now points at day two's storm
        assert!(late.event_to_storm.unwrap().is_empty());
        let early_events = early.event_to_storm.unwrap();
        assert_eq!(early_events.len(), 2);
        let tail = early_events[1].linkage.as_ref().unwrap();
        assert_eq!(tail.nearest_secondary_id, "A");
        assert_eq!(tail.nearest_time, start2 + 300);
        
        // Day two's table picks the tail up from day one's events
        assert_eq!(late.storm_to_events[0].num_main_events(), 1);
        assert_eq!(late.storm_to_events[0].events[0].time, start2 + 300);
        
        // Day one's storm holds its own segment and one copy of the tail
        let mut relative: Vec<i64> = early.storm_to_events[0].events.iter().map(|e| e.relative_time_sec).collect();
        relative.sort_unstable();
        assert_eq!(relative, vec![0, 600]);
    }
    
    #[test]
    fn test_share_linkages_needs_tornado_event_tables() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (start2, _) = spc_date_to_time_range("20110428").unwrap();
        let early = typed_bundle(
            EventType::Tornado,
            vec![storm("A", start2 - 300, (0.0, 0.0), 5000.0, &[], &[])],
            vec![],
        );
        let mut late = typed_bundle(
            EventType::Tornado,
            vec![storm("B", start2 + 300, (0.0, 0.0), 5000.0, &[], &[])],
            vec![],
        );
        late.event_to_storm = None;
        write_days(input.path(), EventType::Tornado, &[("20110427", &early), ("20110428", &late)]);
        
        let result = share_linkages(
            input.path(),
            output.path(),
            "20110427",
            "20110428",
            EventType::Tornado,
            &NullObserver,
        );
        assert!(matches!(result, Err(LinkageError::MalformedEvents(_))));
        assert!(!output.path().join("2011").exists());
    }
    
    #[test]
    fn test_share_linkages_requires_every_day() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let result = share_linkages(
            input.path(),
            output.path(),
            "20110427",
            "20110428",
            EventType::Wind,
            &NullObserver,
        );
        assert!(matches!(result, Err(LinkageError::MissingFile(_))));
    }
}
