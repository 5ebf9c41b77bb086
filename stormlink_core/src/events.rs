//! Event tables: wind observations, tornado reports and tornado warnings.
//!
//! Raw reports are turned into [`EventRecord`]s (one point in space and time
//! each) before linkage. Tornado tracks become one record per track segment.

use crate::config::TornadoOptions;
use crate::error::{LinkageError, Result};
use crate::projection::{positive_longitude, AzimuthalEquidistant};
use geo::{Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Wind speeds above this are treated as bad data.
pub const MAX_WIND_SPEED_M_S: f64 = 100.0;

// ============================================================================
// RAW INPUTS
// ============================================================================

/// One damaging-wind observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindObservation {
    pub station_id: String,
    pub time: i64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    
    /// Eastward component (m/s)
    pub u_wind_m_s: f64,
    
    /// Northward component (m/s)
    pub v_wind_m_s: f64,
}

impl WindObservation {
    pub fn speed_m_s(&self) -> f64 {
        self.u_wind_m_s.hypot(self.v_wind_m_s)
    }
}

/// One tornado report (start and end of its track).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TornadoReport {
    pub tornado_id: String,
    
    /// F- or EF-scale rating, e.g. "EF2"
    pub ef_rating: String,
    
    pub start_time: i64,
    pub start_latitude_deg: f64,
    pub start_longitude_deg: f64,
    
    pub end_time: i64,
    pub end_latitude_deg: f64,
    pub end_longitude_deg: f64,
}

impl TornadoReport {
    fn validate(&self) -> Result<()> {
        if self.tornado_id.is_empty() {
            return Err(LinkageError::events("tornado report with empty tornado ID"));
        }
        if self.end_time < self.start_time {
            return Err(LinkageError::events(format!(
                "tornado \"{}\" ends ({}) before it starts ({})",
                self.tornado_id, self.end_time, self.start_time
            )));
        }
        Ok(())
    }
    
    /// Points along the track every `interval_sec`, both ends included.
    pub fn segment_track(&self, interval_sec: i64) -> Vec<(i64, f64, f64)> {
        let duration = self.end_time - self.start_time;
        let start_lng = positive_longitude(self.start_longitude_deg);
        let mut end_lng = positive_longitude(self.end_longitude_deg);
        if end_lng - start_lng > 180.0 {
            end_lng -= 360.0;
        } else if start_lng - end_lng > 180.0 {
            end_lng += 360.0;
        }
        
        let point_at = |time: i64| {
            let fraction = if duration == 0 {
                0.0
            } else {
                (time - self.start_time) as f64 / duration as f64
            };
            (
                time,
                self.start_latitude_deg + fraction * (self.end_latitude_deg - self.start_latitude_deg),
                positive_longitude(start_lng + fraction * (end_lng - start_lng)),
            )
        };
        
        let mut points: Vec<(i64, f64, f64)> = (0..)
            .map(|k| self.start_time + k * interval_sec)
            .take_while(|&t| t < self.end_time)
            .map(point_at)
            .collect();
        points.push(point_at(self.end_time));
        points
    }
}

/// One tornado-warning polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TornadoWarning {
    pub start_time: i64,
    pub end_time: i64,
    
    /// Lat/lon outline (`x` = longitude, `y` = latitude)
    pub polygon_latlng: Polygon<f64>,
}

// ============================================================================
// EVENT RECORDS
// ============================================================================

/// Type-specific attributes carried through linkage and reversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventAttributes {
    Wind {
        station_id: String,
        u_wind_m_s: f64,
        v_wind_m_s: f64,
    },
    Tornado {
        tornado_id: String,
        ef_rating: String,
    },
}

/// Event-to-storm linkage of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLinkage {
    pub nearest_secondary_id: String,
    
    /// Storm time the event was matched at
    pub nearest_time: i64,
    
    /// 0 if inside the storm
    pub distance_metres: f64,
}

fn nan() -> f64 {
    f64::NAN
}

/// One point event, with its linkage once matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub time: i64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub attributes: EventAttributes,
    
    /// Projected position (NaN until projected)
    #[serde(skip, default = "nan")]
    pub x_metres: f64,
    
    #[serde(skip, default = "nan")]
    pub y_metres: f64,
    
    /// `None` = unlinked
    pub linkage: Option<EventLinkage>,
    
    /// Every segment of this tornado has been attempted
    #[serde(default)]
    pub tornado_assigned: bool,
}

impl EventRecord {
    pub fn new(time: i64, latitude_deg: f64, longitude_deg: f64, attributes: EventAttributes) -> Self {
        Self {
            time,
            latitude_deg,
            longitude_deg,
            attributes,
            x_metres: f64::NAN,
            y_metres: f64::NAN,
            linkage: None,
            tornado_assigned: false,
        }
    }
    
    pub fn from_wind(obs: &WindObservation) -> Self {
        Self::new(
            obs.time,
            obs.latitude_deg,
            obs.longitude_deg,
            EventAttributes::Wind {
                station_id: obs.station_id.clone(),
                u_wind_m_s: obs.u_wind_m_s,
                v_wind_m_s: obs.v_wind_m_s,
            },
        )
    }
    
    pub fn tornado_point(report: &TornadoReport, time: i64, latitude_deg: f64, longitude_deg: f64) -> Self {
        Self::new(
            time,
            latitude_deg,
            longitude_deg,
            EventAttributes::Tornado {
                tornado_id: report.tornado_id.clone(),
                ef_rating: report.ef_rating.clone(),
            },
        )
    }
    
    pub fn tornado_id(&self) -> Option<&str> {
        match &self.attributes {
            EventAttributes::Tornado { tornado_id, .. } => Some(tornado_id.as_str()),
            EventAttributes::Wind { .. } => None,
        }
    }
    
    pub fn is_linked(&self) -> bool {
        self.linkage.is_some()
    }
    
    pub fn distance_metres(&self) -> f64 {
        self.linkage.as_ref().map_or(f64::NAN, |l| l.distance_metres)
    }
}

// ============================================================================
// PREPARATION
// ============================================================================

/// Wind records within `[min_time, max_time]`, bad speeds dropped.
pub fn wind_events(observations: &[WindObservation], min_time: i64, max_time: i64) -> Vec<EventRecord> {
    observations
        .iter()
        .filter(|o| o.time >= min_time && o.time <= max_time)
        .filter(|o| o.speed_m_s().is_finite() && o.speed_m_s() <= MAX_WIND_SPEED_M_S)
        .map(EventRecord::from_wind)
        .collect()
}

/// Tornado records within `[min_time, max_time]`.
///
/// Genesis mode keeps the start point of tornadoes starting in the window.
/// Track mode keeps every segment of tornadoes overlapping the window.
pub fn tornado_events(
    reports: &[TornadoReport],
    options: &TornadoOptions,
    min_time: i64,
    max_time: i64,
) -> Result<Vec<EventRecord>> {
    options.validate()?;
    for report in reports {
        report.validate()?;
    }
    
    let mut events = Vec::new();
    for report in reports {
        if options.genesis_only {
            if report.start_time >= min_time && report.start_time <= max_time {
                events.push(EventRecord::tornado_point(
                    report,
                    report.start_time,
                    report.start_latitude_deg,
                    report.start_longitude_deg,
                ));
            }
            continue;
        }
        
        if report.end_time < min_time || report.start_time > max_time {
            continue;
        }
        events.extend(
            report
                .segment_track(options.track_interp_interval_sec)
                .into_iter()
                .map(|(t, lat, lng)| EventRecord::tornado_point(report, t, lat, lng)),
        );
    }
    Ok(events)
}

/// Sets the x/y of every event.
pub fn project_events(events: &mut [EventRecord], projection: &AzimuthalEquidistant) {
    for event in events.iter_mut() {
        let (x, y) = projection.project_point(event.latitude_deg, event.longitude_deg);
        event.x_metres = x;
        event.y_metres = y;
    }
}

/// Keeps events in or on `rect`.
pub fn filter_events_by_bounding_box(events: Vec<EventRecord>, rect: &Rect<f64>) -> Vec<EventRecord> {
    let (min, max) = (rect.min(), rect.max());
    events
        .into_iter()
        .filter(|e| e.x_metres >= min.x && e.x_metres <= max.x && e.y_metres >= min.y && e.y_metres <= max.y)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Coord;
    
    fn sample_tornado() -> TornadoReport {
        TornadoReport {
            tornado_id: "t1".to_string(),
            ef_rating: "EF3".to_string(),
            start_time: 1000,
            start_latitude_deg: 35.0,
            start_longitude_deg: 265.0,
            end_time: 1150,
            end_latitude_deg: 35.3,
            end_longitude_deg: 265.6,
        }
    }
    
    #[test]
    fn test_segment_track_includes_both_ends() {
        let points = sample_tornado().segment_track(60);
        let times: Vec<i64> = points.iter().map(|p| p.0).collect();
        assert_eq!(times, vec![1000, 1060, 1120, 1150]);
        assert_relative_eq!(points[1].1, 35.0 + 0.3 * 60.0 / 150.0, epsilon = 1e-12);
        assert_relative_eq!(points[3].2, 265.6, epsilon = 1e-12);
    }
    
    #[test]
    fn test_segment_track_across_prime_meridian() {
        let mut report = sample_tornado();
        report.start_longitude_deg = 359.9;
        report.end_longitude_deg = 0.1;
        report.end_time = 1120;
        let points = report.segment_track(60);
        assert_relative_eq!(points[1].2, 0.0, epsilon = 1e-9);
    }
    
    #[test]
    fn test_genesis_versus_track_mode() {
        let reports = vec![sample_tornado()];
        let genesis = tornado_events(&reports, &TornadoOptions::default(), 0, 5000).unwrap();
        assert_eq!(genesis.len(), 1);
        assert_eq!(genesis[0].tornado_id(), Some("t1"));
        
        let track = tornado_events(&reports, &TornadoOptions::full_tracks(), 1100, 5000).unwrap();
        assert_eq!(track.len(), 4);
        
        // Starts before the window: no genesis point
        assert!(tornado_events(&reports, &TornadoOptions::default(), 1100, 5000).unwrap().is_empty());
    }
    
    #[test]
    fn test_bad_tornado_rejected() {
        let mut report = sample_tornado();
        report.end_time = 900;
        assert!(matches!(
            tornado_events(&[report], &TornadoOptions::default(), 0, 5000),
            Err(LinkageError::MalformedEvents(_))
        ));
    }
    
    #[test]
    fn test_wind_window_and_speed_filter() {
        let obs = |time: i64, u: f64| WindObservation {
            station_id: "KOUN".to_string(),
            time,
            latitude_deg: 35.0,
            longitude_deg: 265.0,
            u_wind_m_s: u,
            v_wind_m_s: 0.0,
        };
        let events = wind_events(&[obs(10, 30.0), obs(500, 30.0), obs(20, 150.0), obs(30, f64::NAN)], 0, 100);
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_linked());
        assert!(events[0].distance_metres().is_nan());
    }
    
    #[test]
    fn test_bounding_box_filter_is_inclusive() {
        let mut events = vec![
            EventRecord::from_wind(&WindObservation {
                station_id: "a".into(),
                time: 0,
                latitude_deg: 0.0,
                longitude_deg: 0.0,
                u_wind_m_s: 0.0,
                v_wind_m_s: 0.0,
            });
            2
        ];
        events[0].x_metres = 10.0;
        events[0].y_metres = 0.0;
        events[1].x_metres = 10.1;
        events[1].y_metres = 0.0;
        let rect = Rect::new(Coord { x: -10.0, y: -10.0 }, Coord { x: 10.0, y: 10.0 });
        assert_eq!(filter_events_by_bounding_box(events, &rect).len(), 1);
    }
    
    #[test]
    fn test_record_json_has_no_projection() {
        let mut event = EventRecord::tornado_point(&sample_tornado(), 1000, 35.0, 265.0);
        event.x_metres = 5.0;
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"tornado\""));
        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert!(back.x_metres.is_nan());
    }
}
