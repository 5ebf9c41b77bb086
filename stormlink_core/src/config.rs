//! Run configuration for the linkage engine.
//!
//! Every tunable is a named, validated field. Nothing here reads the
//! environment: callers build a config (usually from one of the per-event-type
//! constructors), optionally tweak it, and hand it to a linkage operation,
//! which calls [`LinkageConfig::validate`] before touching any data.

use crate::error::{LinkageError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Slack added around each secondary cell's window before interpolation.
pub const INTERP_SLACK_SEC: i64 = 1800;

/// Lower bound on the coarse polygon pre-filter radius of the matcher.
pub const MIN_POLYGON_ATTEMPT_DISTANCE_METRES: f64 = 30_000.0;

/// Effectively-unbounded link distance used when retrying tornado segments.
pub const LARGE_DISTANCE_METRES: f64 = 1e12;

// ============================================================================
// EVENT TYPE
// ============================================================================

/// Kind of event table being linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Damaging straight-line wind observations
    Wind,
    
    /// Full tornado tracks, segmented in time
    Tornado,
    
    /// Tornado start points only
    Tornadogenesis,
}

impl EventType {
    /// Returns all event types.
    pub fn all() -> Vec<EventType> {
        vec![EventType::Wind, EventType::Tornado, EventType::Tornadogenesis]
    }
    
    /// Returns the canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            EventType::Wind => "wind",
            EventType::Tornado => "tornado",
            EventType::Tornadogenesis => "tornadogenesis",
        }
    }
    
    /// Prefix of persisted linkage files for this type.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            EventType::Wind => "storm_to_winds",
            EventType::Tornado => "storm_to_tornadoes",
            EventType::Tornadogenesis => "storm_to_tornadogenesis",
        }
    }
    
    /// True for the two tornado flavours (events carry tornado IDs).
    pub fn is_tornado(&self) -> bool {
        !matches!(self, EventType::Wind)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EventType {
    type Err = LinkageError;
    
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wind" => Ok(EventType::Wind),
            "tornado" => Ok(EventType::Tornado),
            "tornadogenesis" => Ok(EventType::Tornadogenesis),
            _ => Err(LinkageError::InvalidEventType(s.to_string())),
        }
    }
}

// ============================================================================
// LINKAGE CONFIGURATION
// ============================================================================

/// Configuration shared by every event-to-storm linkage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkageConfig {
    /// Latest an event may occur before its storm cell starts (default: 300 s)
    pub max_time_before_storm_start_sec: i64,
    
    /// Latest an event may occur after its storm cell ends (default: 300 s)
    pub max_time_after_storm_end_sec: i64,
    
    /// Padding around the storm x/y bounding box; events outside are dropped
    /// (default: 100 km, must be >= `max_link_distance_metres`)
    pub bounding_box_padding_metres: f64,
    
    /// Event times are rounded to multiples of this before interpolation
    /// (default: 10 s for wind, 1 s for tornadoes)
    pub storm_interp_time_interval_sec: i64,
    
    /// Maximum event-to-storm distance (default: 30 km)
    pub max_link_distance_metres: f64,
    
    /// Storm objects earlier than this into their tracking period are
    /// discarded before linkage (default: 600 s)
    pub min_time_into_tracking_period_sec: i64,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self::wind()
    }
}

impl LinkageConfig {
    /// Defaults for wind observations.
    pub fn wind() -> Self {
        Self {
            max_time_before_storm_start_sec: 300,
            max_time_after_storm_end_sec: 300,
            bounding_box_padding_metres: 1e5,
            storm_interp_time_interval_sec: 10,
            max_link_distance_metres: 30_000.0,
            min_time_into_tracking_period_sec: 600,
        }
    }
    
    /// Defaults for tornadogenesis points.
    pub fn tornadogenesis() -> Self {
        Self {
            storm_interp_time_interval_sec: 1, // Track fidelity
            ..Self::wind()
        }
    }
    
    /// Defaults for full tornado tracks (narrower extrapolation window).
    pub fn tornado_occurrence() -> Self {
        Self {
            max_time_before_storm_start_sec: 180,
            max_time_after_storm_end_sec: 180,
            ..Self::tornadogenesis()
        }
    }
    
    /// Defaults for the given event type.
    pub fn for_event_type(event_type: EventType) -> Self {
        match event_type {
            EventType::Wind => Self::wind(),
            EventType::Tornado => Self::tornado_occurrence(),
            EventType::Tornadogenesis => Self::tornadogenesis(),
        }
    }
    
    /// Validates the parameter combination.
    pub fn validate(&self) -> Result<()> {
        if self.max_time_before_storm_start_sec < 0 {
            return Err(LinkageError::config(format!(
                "max_time_before_storm_start_sec must be >= 0 (got {})",
                self.max_time_before_storm_start_sec
            )));
        }
        if self.max_time_after_storm_end_sec < 0 {
            return Err(LinkageError::config(format!(
                "max_time_after_storm_end_sec must be >= 0 (got {})",
                self.max_time_after_storm_end_sec
            )));
        }
        if self.storm_interp_time_interval_sec <= 0 {
            return Err(LinkageError::config(format!(
                "storm_interp_time_interval_sec must be > 0 (got {})",
                self.storm_interp_time_interval_sec
            )));
        }
        if !self.max_link_distance_metres.is_finite() || self.max_link_distance_metres < 0.0 {
            return Err(LinkageError::config(format!(
                "max_link_distance_metres must be finite and >= 0 (got {})",
                self.max_link_distance_metres
            )));
        }
        if !self.bounding_box_padding_metres.is_finite()
            || self.bounding_box_padding_metres < self.max_link_distance_metres
        {
            return Err(LinkageError::config(format!(
                "bounding_box_padding_metres ({}) must be finite and >= max_link_distance_metres ({})",
                self.bounding_box_padding_metres, self.max_link_distance_metres
            )));
        }
        if self.min_time_into_tracking_period_sec < 0 {
            return Err(LinkageError::config(format!(
                "min_time_into_tracking_period_sec must be >= 0 (got {})",
                self.min_time_into_tracking_period_sec
            )));
        }
        Ok(())
    }
    
    /// Metadata persisted alongside the linkage tables.
    pub fn metadata(&self) -> LinkageMetadata {
        LinkageMetadata {
            max_time_before_storm_start_sec: self.max_time_before_storm_start_sec,
            max_time_after_storm_end_sec: self.max_time_after_storm_end_sec,
            storm_interp_time_interval_sec: self.storm_interp_time_interval_sec,
            bounding_box_padding_metres: self.bounding_box_padding_metres,
            max_link_distance_metres: self.max_link_distance_metres,
        }
    }
}

/// The validated run parameters, as persisted with each linkage bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageMetadata {
    pub max_time_before_storm_start_sec: i64,
    pub max_time_after_storm_end_sec: i64,
    pub storm_interp_time_interval_sec: i64,
    pub bounding_box_padding_metres: f64,
    pub max_link_distance_metres: f64,
}

impl LinkageMetadata {
    /// Metadata of the default config for `event_type`.
    pub fn default_for(event_type: EventType) -> Self {
        LinkageConfig::for_event_type(event_type).metadata()
    }
}

// ============================================================================
// TORNADO OPTIONS
// ============================================================================

/// Extra knobs for tornado linkage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TornadoOptions {
    /// Link only the start point of each tornado (default: true)
    pub genesis_only: bool,
    
    /// Spacing of track segments when `genesis_only` is false (default: 60 s)
    pub track_interp_interval_sec: i64,
}

impl Default for TornadoOptions {
    fn default() -> Self {
        Self {
            genesis_only: true,
            track_interp_interval_sec: 60,
        }
    }
}

impl TornadoOptions {
    /// Options for full-track linkage.
    pub fn full_tracks() -> Self {
        Self {
            genesis_only: false,
            ..Self::default()
        }
    }
    
    /// Event type implied by these options.
    pub fn event_type(&self) -> EventType {
        if self.genesis_only {
            EventType::Tornadogenesis
        } else {
            EventType::Tornado
        }
    }
    
    pub fn validate(&self) -> Result<()> {
        if !self.genesis_only && self.track_interp_interval_sec <= 0 {
            return Err(LinkageError::config(format!(
                "track_interp_interval_sec must be > 0 (got {})",
                self.track_interp_interval_sec
            )));
        }
        Ok(())
    }
}

// ============================================================================
// WARNING LINKAGE CONFIGURATION
// ============================================================================

/// Configuration for linking tornado-warning polygons to storm cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningLinkageConfig {
    /// Maximum mean centroid-to-polygon distance (default: 5 km)
    pub max_distance_metres: f64,
    
    /// Minimum share of the warning a cell must exist for (default: 0.5)
    pub min_lifetime_fraction: f64,
    
    /// Spacing of evaluation times across the warning (default: 60 s)
    pub time_step_sec: i64,
    
    /// Extrapolation allowed before a cell starts (default: 180 s)
    pub max_time_before_storm_start_sec: i64,
    
    /// Extrapolation allowed after a cell ends (default: 180 s)
    pub max_time_after_storm_end_sec: i64,
    
    /// Time buffer for the coarse storm pre-filter (default: 720 s)
    pub storm_time_buffer_sec: i64,
    
    /// Lat/lon buffer for the coarse storm pre-filter (default: 1 deg)
    pub latlng_buffer_deg: f64,
}

impl Default for WarningLinkageConfig {
    fn default() -> Self {
        Self {
            max_distance_metres: 5000.0,
            min_lifetime_fraction: 0.5,
            time_step_sec: 60,
            max_time_before_storm_start_sec: 180,
            max_time_after_storm_end_sec: 180,
            storm_time_buffer_sec: 720,
            latlng_buffer_deg: 1.0,
        }
    }
}

impl WarningLinkageConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_distance_metres > 0.0) {
            return Err(LinkageError::config(format!(
                "max_distance_metres must be > 0 (got {})",
                self.max_distance_metres
            )));
        }
        if !(self.min_lifetime_fraction > 0.0 && self.min_lifetime_fraction <= 1.0) {
            return Err(LinkageError::config(format!(
                "min_lifetime_fraction must be in (0, 1] (got {})",
                self.min_lifetime_fraction
            )));
        }
        if self.time_step_sec <= 0 {
            return Err(LinkageError::config("time_step_sec must be > 0"));
        }
        if self.max_time_before_storm_start_sec < 0
            || self.max_time_after_storm_end_sec < 0
            || self.storm_time_buffer_sec < 0
        {
            return Err(LinkageError::config("warning time windows must be >= 0"));
        }
        if !(self.latlng_buffer_deg >= 0.0) {
            return Err(LinkageError::config("latlng_buffer_deg must be >= 0"));
        }
        Ok(())
    }
}
