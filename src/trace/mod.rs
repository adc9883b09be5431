//! GPS trace data model, quality filter, and trace providers.

pub mod filter;
pub mod mapillary;
pub mod provider;
mod routable;

pub use filter::{RejectReason, TraceFilter, TraceFilterConfig};
pub use provider::TraceProvider;

use crate::geo::haversine_m;
use serde::{Deserialize, Serialize};

/// Generated Mapbox Vector Tile types.
pub mod vector_tile {
    include!(concat!(env!("OUT_DIR"), "/vector_tile.rs"));
}

/// One GPS fix. `time` is in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub lon: f64,
    pub lat: f64,
    pub time: f64,
}

/// Time-ordered points recorded along one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSequence {
    pub id: String,
    pub points: Vec<TracePoint>,
}

impl TraceSequence {
    /// Sum of great-circle distances between consecutive points, in meters.
    pub fn total_distance_m(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| haversine_m(w[0].lon, w[0].lat, w[1].lon, w[1].lat))
            .sum()
    }

    /// Time between first and last point, in seconds.
    pub fn elapsed_s(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }

    /// Average speed over the whole sequence in km/h, `None` if no time elapsed.
    pub fn average_speed_kph(&self) -> Option<f64> {
        let elapsed = self.elapsed_s();
        if elapsed <= 0.0 {
            return None;
        }
        Some(self.total_distance_m() / elapsed * 3.6)
    }
}
