//! Geographic primitives: bounding boxes, great-circle distance, and the
//! tiler that splits a query area into cacheable sections.

pub mod tiler;

pub use tiler::{Section, TileCoord, tile_bbox};

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Earth radius used for haversine distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_160.0;

/// Rectangular query region in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Builds a validated box.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidBoundingBox`] for non-finite values,
    /// coordinates outside the WGS84 range, or a zero-area/reversed box.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let bbox = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<()> {
        let values = [self.min_lon, self.min_lat, self.max_lon, self.max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidBoundingBox(format!(
                "{self} contains a non-finite coordinate"
            )));
        }
        if !(-180.0..=180.0).contains(&self.min_lon) || !(-180.0..=180.0).contains(&self.max_lon) {
            return Err(PipelineError::InvalidBoundingBox(format!(
                "{self} has a longitude outside [-180, 180]"
            )));
        }
        if !(-90.0..=90.0).contains(&self.min_lat) || !(-90.0..=90.0).contains(&self.max_lat) {
            return Err(PipelineError::InvalidBoundingBox(format!(
                "{self} has a latitude outside [-90, 90]"
            )));
        }
        if self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(PipelineError::InvalidBoundingBox(format!(
                "{self} must satisfy min < max on both axes"
            )));
        }
        Ok(())
    }

    /// Overlap of two boxes, or `None` when they share no area.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let min_lon = self.min_lon.max(other.min_lon);
        let min_lat = self.min_lat.max(other.min_lat);
        let max_lon = self.max_lon.min(other.max_lon);
        let max_lat = self.max_lat.min(other.max_lat);
        if min_lon < max_lon && min_lat < max_lat {
            Some(BoundingBox {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Parses `min_lon,min_lat,max_lon,max_lat`.
impl FromStr for BoundingBox {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::InvalidBoundingBox(format!("'{s}': {e}")))?;

        match parts.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => {
                BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat)
            }
            _ => Err(PipelineError::InvalidBoundingBox(format!(
                "'{s}' must be `min_longitude,min_latitude,max_longitude,max_latitude`"
            ))),
        }
    }
}

/// Great-circle distance between two points in decimal degrees, in meters.
pub fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_M
}
