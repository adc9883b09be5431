//! Map-matching contract and the per-edge observations it produces.

pub mod filter;
pub mod valhalla;

pub use filter::{MatchFilter, MatchFilterConfig};

use crate::trace::TraceSequence;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of importance buckets for bucketed road classes.
pub const IMPORTANCE_BUCKETS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    Rural,
    Suburban,
    Urban,
}

impl Context {
    pub const ALL: [Context; 3] = [Context::Rural, Context::Suburban, Context::Urban];

    /// Classifies a road density value.
    pub fn from_density(density: f64) -> Self {
        if density < 5.0 {
            Context::Rural
        } else if density < 11.0 {
            Context::Suburban
        } else {
            Context::Urban
        }
    }
}

/// Kind of road segment an observation was measured on.
///
/// Serialized names match the keys of the output profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoadClass {
    #[serde(rename = "way")]
    Way,
    #[serde(rename = "link_exiting")]
    LinkExiting,
    #[serde(rename = "link_turning")]
    LinkTurning,
    #[serde(rename = "roundabout")]
    Roundabout,
    #[serde(rename = "driveway")]
    Driveway,
    #[serde(rename = "alley")]
    Alley,
    #[serde(rename = "parking_aisle")]
    ParkingAisle,
    #[serde(rename = "drive-through")]
    DriveThrough,
}

impl RoadClass {
    pub const ALL: [RoadClass; 8] = [
        RoadClass::Way,
        RoadClass::LinkExiting,
        RoadClass::LinkTurning,
        RoadClass::Roundabout,
        RoadClass::Driveway,
        RoadClass::Alley,
        RoadClass::ParkingAisle,
        RoadClass::DriveThrough,
    ];

    /// Whether speeds for this class are split by road importance.
    pub fn is_bucketed(&self) -> bool {
        matches!(
            self,
            RoadClass::Way | RoadClass::LinkExiting | RoadClass::LinkTurning | RoadClass::Roundabout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoadClass::Way => "way",
            RoadClass::LinkExiting => "link_exiting",
            RoadClass::LinkTurning => "link_turning",
            RoadClass::Roundabout => "roundabout",
            RoadClass::Driveway => "driveway",
            RoadClass::Alley => "alley",
            RoadClass::ParkingAisle => "parking_aisle",
            RoadClass::DriveThrough => "drive-through",
        }
    }
}

impl fmt::Display for RoadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance bucket (1 = motorway .. 8 = service) for an OSM highway class.
pub fn importance_for_highway(class: &str) -> Option<u8> {
    match class {
        "motorway" => Some(1),
        "trunk" => Some(2),
        "primary" => Some(3),
        "secondary" => Some(4),
        "tertiary" => Some(5),
        "unclassified" => Some(6),
        "residential" => Some(7),
        "service" | "service_other" => Some(8),
        _ => None,
    }
}

/// One speed measurement on one matched edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeObservation {
    pub iso3166_1: Option<String>,
    pub iso3166_2: Option<String>,
    pub context: Context,
    pub road_class: RoadClass,
    /// 1..=8, absent when the road's class is not one we bucket by.
    pub importance: Option<u8>,
    /// km/h
    pub speed: f64,
    pub matched: bool,
}

/// Everything a matcher reports for one sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMatchResult {
    pub sequence_id: String,
    /// Fraction of input points that snapped to the road network, 0..=1.
    pub match_ratio: f64,
    pub observations: Vec<EdgeObservation>,
}

impl MapMatchResult {
    /// A result for a trace the matcher could not place at all.
    pub fn unmatched(sequence_id: impl Into<String>) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            match_ratio: 0.0,
            observations: Vec::new(),
        }
    }
}

/// Snaps a trace onto the road network and measures per-edge speeds.
///
/// Errors are treated as transient and retried by the driver; a trace that
/// simply cannot be matched should come back as [`MapMatchResult::unmatched`].
#[async_trait::async_trait]
pub trait MapMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn match_sequence(&self, seq: &TraceSequence) -> Result<MapMatchResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_thresholds() {
        assert_eq!(Context::from_density(0.0), Context::Rural);
        assert_eq!(Context::from_density(4.99), Context::Rural);
        assert_eq!(Context::from_density(5.0), Context::Suburban);
        assert_eq!(Context::from_density(10.9), Context::Suburban);
        assert_eq!(Context::from_density(11.0), Context::Urban);
    }

    #[test]
    fn test_importance() {
        assert_eq!(importance_for_highway("motorway"), Some(1));
        assert_eq!(importance_for_highway("service_other"), Some(8));
        assert_eq!(importance_for_highway("track"), None);
    }

    #[test]
    fn test_road_class_names_round_trip_through_serde() {
        for class in RoadClass::ALL {
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{}\"", class.as_str()));
        }
        assert_eq!(RoadClass::ALL.iter().filter(|c| c.is_bucketed()).count(), 4);
    }
}
