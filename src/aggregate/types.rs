//! Output profile types, serialized to `speeds.json`.

use crate::matching::{Context, IMPORTANCE_BUCKETS, RoadClass};
use serde::{Deserialize, Serialize};

/// Speeds for one road class: a per-importance profile or a single value.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassSpeed {
    Bucketed([u32; IMPORTANCE_BUCKETS]),
    Scalar(u32),
}

/// Speeds for one density context. Classes without data are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSpeeds {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub way: Option<[u32; IMPORTANCE_BUCKETS]>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub link_exiting: Option<[u32; IMPORTANCE_BUCKETS]>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub link_turning: Option<[u32; IMPORTANCE_BUCKETS]>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub roundabout: Option<[u32; IMPORTANCE_BUCKETS]>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub driveway: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alley: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parking_aisle: Option<u32>,
    #[serde(
        rename = "drive-through",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub drive_through: Option<u32>,
}

impl ContextSpeeds {
    pub fn set(&mut self, class: RoadClass, speed: ClassSpeed) {
        match (class, speed) {
            (RoadClass::Way, ClassSpeed::Bucketed(v)) => self.way = Some(v),
            (RoadClass::LinkExiting, ClassSpeed::Bucketed(v)) => self.link_exiting = Some(v),
            (RoadClass::LinkTurning, ClassSpeed::Bucketed(v)) => self.link_turning = Some(v),
            (RoadClass::Roundabout, ClassSpeed::Bucketed(v)) => self.roundabout = Some(v),
            (RoadClass::Driveway, ClassSpeed::Scalar(v)) => self.driveway = Some(v),
            (RoadClass::Alley, ClassSpeed::Scalar(v)) => self.alley = Some(v),
            (RoadClass::ParkingAisle, ClassSpeed::Scalar(v)) => self.parking_aisle = Some(v),
            (RoadClass::DriveThrough, ClassSpeed::Scalar(v)) => self.drive_through = Some(v),
            (class, speed) => {
                tracing::warn!(%class, ?speed, "Speed shape does not fit road class, ignoring");
            }
        }
    }

    pub fn bucketed(&self, class: RoadClass) -> Option<&[u32; IMPORTANCE_BUCKETS]> {
        match class {
            RoadClass::Way => self.way.as_ref(),
            RoadClass::LinkExiting => self.link_exiting.as_ref(),
            RoadClass::LinkTurning => self.link_turning.as_ref(),
            RoadClass::Roundabout => self.roundabout.as_ref(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One entry of the output array. World-level entries carry no codes,
/// country-level entries carry only `iso3166-1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionSpeeds {
    #[serde(rename = "iso3166-1", skip_serializing_if = "Option::is_none", default)]
    pub iso3166_1: Option<String>,
    #[serde(rename = "iso3166-2", skip_serializing_if = "Option::is_none", default)]
    pub iso3166_2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rural: Option<ContextSpeeds>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub suburban: Option<ContextSpeeds>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub urban: Option<ContextSpeeds>,
}

impl RegionSpeeds {
    pub fn context(&self, context: Context) -> Option<&ContextSpeeds> {
        match context {
            Context::Rural => self.rural.as_ref(),
            Context::Suburban => self.suburban.as_ref(),
            Context::Urban => self.urban.as_ref(),
        }
    }

    pub fn context_mut(&mut self, context: Context) -> &mut Option<ContextSpeeds> {
        match context {
            Context::Rural => &mut self.rural,
            Context::Suburban => &mut self.suburban,
            Context::Urban => &mut self.urban,
        }
    }
}
