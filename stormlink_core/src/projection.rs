//! The "PROJECTION" Layer - one planar frame per run
//!
//! Storm polygons and point events are compared in a local azimuthal
//! equidistant plane centred on the centroid of the run's storms:
//! - distances from the centre are exact, distances elsewhere are close
//!   enough at storm scales (hundreds of km)
//! - one projection is built per run and never changes mid-run, so every
//!   linkage distance of a run is measured in the same frame
//!
//! Lat/lon polygons are `geo::Polygon`s with `x = longitude (deg E)` and
//! `y = latitude (deg N)`; projected polygons use metres.

use crate::error::{LinkageError, Result};
use geo::{Coord, Intersects, LineString, Polygon};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Spherical earth radius (WGS84 semi-major axis).
pub const EARTH_RADIUS_METRES: f64 = 6_378_137.0;

/// Below this angular distance (radians) the projection scale factor is 1.
const SMALL_ANGLE_RAD: f64 = 1e-12;

// ============================================================================
// AZIMUTHAL EQUIDISTANT PROJECTION
// ============================================================================

/// Spherical azimuthal equidistant projection about a fixed centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AzimuthalEquidistant {
    /// Projection centre latitude (deg N)
    pub central_latitude_deg: f64,
    
    /// Projection centre longitude (deg E, 0-360)
    pub central_longitude_deg: f64,
}

impl AzimuthalEquidistant {
    /// Creates a projection centred on the given point.
    pub fn new(central_latitude_deg: f64, central_longitude_deg: f64) -> Result<Self> {
        if !central_latitude_deg.is_finite() || central_latitude_deg.abs() > 90.0 {
            return Err(LinkageError::config(format!(
                "projection centre latitude must be in [-90, 90] (got {})",
                central_latitude_deg
            )));
        }
        if !central_longitude_deg.is_finite() {
            return Err(LinkageError::config(format!(
                "projection centre longitude must be finite (got {})",
                central_longitude_deg
            )));
        }
        Ok(Self {
            central_latitude_deg,
            central_longitude_deg: positive_longitude(central_longitude_deg),
        })
    }
    
    /// Creates a projection centred on the geodetic centroid of the points.
    pub fn centred_on(latitudes_deg: &[f64], longitudes_deg: &[f64]) -> Result<Self> {
        let (lat, lng) = latlng_centroid(latitudes_deg, longitudes_deg).ok_or_else(|| {
            LinkageError::config("cannot centre a projection on zero finite points")
        })?;
        Self::new(lat, lng)
    }
    
    /// Projects one point. NaN in, NaN out.
    pub fn project_point(&self, latitude_deg: f64, longitude_deg: f64) -> (f64, f64) {
        let phi0 = self.central_latitude_deg.to_radians();
        let phi = latitude_deg.to_radians();
        let d_lambda = (longitude_deg - self.central_longitude_deg).to_radians();
        
        let cos_c = (phi0.sin() * phi.sin() + phi0.cos() * phi.cos() * d_lambda.cos())
            .clamp(-1.0, 1.0);
        let c = cos_c.acos();
        let k = if c < SMALL_ANGLE_RAD { 1.0 } else { c / c.sin() };
        
        let x = EARTH_RADIUS_METRES * k * phi.cos() * d_lambda.sin();
        let y = EARTH_RADIUS_METRES
            * k
            * (phi0.cos() * phi.sin() - phi0.sin() * phi.cos() * d_lambda.cos());
        (x, y)
    }
    
    /// Inverse of [`project_point`](Self::project_point). Longitude in 0-360.
    pub fn unproject_point(&self, x_metres: f64, y_metres: f64) -> (f64, f64) {
        let rho = x_metres.hypot(y_metres);
        if rho == 0.0 {
            return (self.central_latitude_deg, self.central_longitude_deg);
        }
        
        let phi0 = self.central_latitude_deg.to_radians();
        let c = rho / EARTH_RADIUS_METRES;
        let phi = (c.cos() * phi0.sin() + y_metres * c.sin() * phi0.cos() / rho)
            .clamp(-1.0, 1.0)
            .asin();
        let d_lambda = (x_metres * c.sin())
            .atan2(rho * phi0.cos() * c.cos() - y_metres * phi0.sin() * c.sin());
        
        (
            phi.to_degrees(),
            positive_longitude(self.central_longitude_deg + d_lambda.to_degrees()),
        )
    }
    
    /// Vectorized projection of parallel latitude/longitude arrays.
    pub fn project_latlng_to_xy(
        &self,
        latitudes_deg: &[f64],
        longitudes_deg: &[f64],
    ) -> (Vec<f64>, Vec<f64>) {
        latitudes_deg
            .iter()
            .zip(longitudes_deg)
            .map(|(&lat, &lng)| self.project_point(lat, lng))
            .unzip()
    }
    
    /// Vectorized inverse projection.
    pub fn project_xy_to_latlng(
        &self,
        x_metres: &[f64],
        y_metres: &[f64],
    ) -> (Vec<f64>, Vec<f64>) {
        x_metres
            .iter()
            .zip(y_metres)
            .map(|(&x, &y)| self.unproject_point(x, y))
            .unzip()
    }
    
    /// Projects a lat/lon polygon, exterior and holes alike.
    pub fn project_polygon(&self, polygon_latlng: &Polygon<f64>) -> Polygon<f64> {
        let ring = |ls: &LineString<f64>| -> LineString<f64> {
            let (lats, lngs): (Vec<f64>, Vec<f64>) = ls.coords().map(|c| (c.y, c.x)).unzip();
            let (xs, ys) = self.project_latlng_to_xy(&lats, &lngs);
            xs.into_iter().zip(ys).map(|(x, y)| Coord { x, y }).collect()
        };
        
        let exterior = ring(polygon_latlng.exterior());
        let interiors = polygon_latlng.interiors().iter().map(ring).collect();
        Polygon::new(exterior, interiors)
    }
    
    /// Inverse of [`project_polygon`](Self::project_polygon).
    pub fn unproject_polygon(&self, polygon_xy: &Polygon<f64>) -> Polygon<f64> {
        let ring = |ls: &LineString<f64>| -> LineString<f64> {
            let (xs, ys): (Vec<f64>, Vec<f64>) = ls.coords().map(|c| (c.x, c.y)).unzip();
            let (lats, lngs) = self.project_xy_to_latlng(&xs, &ys);
            lngs.into_iter().zip(lats).map(|(x, y)| Coord { x, y }).collect()
        };
        
        let exterior = ring(polygon_xy.exterior());
        let interiors = polygon_xy.interiors().iter().map(ring).collect();
        Polygon::new(exterior, interiors)
    }
}

// ============================================================================
// GEODETIC HELPERS
// ============================================================================

/// Maps any longitude to [0, 360).
pub fn positive_longitude(longitude_deg: f64) -> f64 {
    let wrapped = longitude_deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Geodetic centroid of a point set (mean of unit vectors on the sphere).
///
/// Non-finite points are skipped. Returns `None` when nothing is left or the
/// points cancel out (e.g. antipodal pairs).
pub fn latlng_centroid(latitudes_deg: &[f64], longitudes_deg: &[f64]) -> Option<(f64, f64)> {
    let mut sum = Vector3::zeros();
    let mut count = 0usize;
    
    for (&lat, &lng) in latitudes_deg.iter().zip(longitudes_deg) {
        if !lat.is_finite() || !lng.is_finite() {
            continue;
        }
        let (phi, lambda) = (lat.to_radians(), lng.to_radians());
        sum += Vector3::new(phi.cos() * lambda.cos(), phi.cos() * lambda.sin(), phi.sin());
        count += 1;
    }
    
    if count == 0 || sum.norm() < 1e-12 {
        return None;
    }
    
    let mean = sum / count as f64;
    let latitude = mean.z.atan2(mean.x.hypot(mean.y)).to_degrees();
    let longitude = positive_longitude(mean.y.atan2(mean.x).to_degrees());
    Some((latitude, longitude))
}

/// Point-in-polygon test with the boundary counted as inside ("in or on").
pub fn point_in_or_on_polygon(polygon: &Polygon<f64>, x: f64, y: f64) -> bool {
    if !x.is_finite() || !y.is_finite() {
        return false;
    }
    polygon.intersects(&Coord { x, y })
}
