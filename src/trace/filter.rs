//! Quality heuristics that keep bad traces away from the map matcher.
//!
//! Checks run cheapest first and stop at the first failure. A rejected
//! sequence is a normal outcome, not an error.

use super::TraceSequence;
use crate::geo::haversine_m;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceFilterConfig {
    pub min_points: usize,
    pub min_distance_m: f64,
    pub min_duration_s: f64,
    /// Mean speeds below this look like walking or standing still.
    pub min_speed_kph: f64,
    /// Mean speeds above this look like trains or bad fixes.
    pub max_speed_kph: f64,
    pub max_gap_m: f64,
    pub max_gap_s: f64,
    pub max_point_speed_kph: f64,
}

impl Default for TraceFilterConfig {
    fn default() -> Self {
        Self {
            min_points: 5,
            min_distance_m: 1000.0,
            min_duration_s: 120.0,
            min_speed_kph: 10.0,
            max_speed_kph: 160.0,
            max_gap_m: 500.0,
            max_gap_s: 5.0,
            max_point_speed_kph: 160.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TooFewPoints,
    TooShort,
    TooBrief,
    SpeedOutOfRange,
    Gap,
    OutOfOrder,
    PointSpeed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::TooFewPoints => "too_few_points",
            RejectReason::TooShort => "too_short",
            RejectReason::TooBrief => "too_brief",
            RejectReason::SpeedOutOfRange => "speed_out_of_range",
            RejectReason::Gap => "gap",
            RejectReason::OutOfOrder => "out_of_order",
            RejectReason::PointSpeed => "point_speed",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    config: TraceFilterConfig,
}

impl TraceFilter {
    pub fn new(config: TraceFilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TraceFilterConfig {
        &self.config
    }

    pub fn accepts(&self, seq: &TraceSequence) -> bool {
        self.check(seq).is_ok()
    }

    /// Runs every check in order and reports the first one that fails.
    pub fn check(&self, seq: &TraceSequence) -> Result<(), RejectReason> {
        let c = &self.config;

        if seq.points.len() < c.min_points.max(2) {
            return Err(RejectReason::TooFewPoints);
        }

        let distance_m = seq.total_distance_m();
        if distance_m < c.min_distance_m {
            return Err(RejectReason::TooShort);
        }

        let elapsed_s = seq.elapsed_s();
        if elapsed_s < c.min_duration_s || elapsed_s <= 0.0 {
            return Err(RejectReason::TooBrief);
        }

        let mean_kph = distance_m / elapsed_s * 3.6;
        if !(c.min_speed_kph..=c.max_speed_kph).contains(&mean_kph) {
            return Err(RejectReason::SpeedOutOfRange);
        }

        let mut out_of_order = false;
        let mut too_fast = false;
        for w in seq.points.windows(2) {
            let d = haversine_m(w[0].lon, w[0].lat, w[1].lon, w[1].lat);
            let t = w[1].time - w[0].time;

            if d > c.max_gap_m || t > c.max_gap_s {
                return Err(RejectReason::Gap);
            }
            if t < 0.0 {
                out_of_order = true;
            } else if t > 0.0 && d / t * 3.6 > c.max_point_speed_kph {
                too_fast = true;
            }
        }

        if out_of_order {
            return Err(RejectReason::OutOfOrder);
        }
        if too_fast {
            return Err(RejectReason::PointSpeed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TracePoint;

    /// Straight northbound trace, `n` points spaced `dt` seconds apart at `kph`.
    fn driving(n: usize, kph: f64, dt: f64) -> TraceSequence {
        let meters_per_step = kph / 3.6 * dt;
        let deg_per_step = meters_per_step / 111_318.8;
        TraceSequence {
            id: "seq".into(),
            points: (0..n)
                .map(|i| TracePoint {
                    lon: 13.4,
                    lat: 52.5 + i as f64 * deg_per_step,
                    time: 1_600_000_000.0 + i as f64 * dt,
                })
                .collect(),
        }
    }

    #[test]
    fn test_accepts_normal_drive() {
        let filter = TraceFilter::default();
        assert_eq!(filter.check(&driving(100, 40.0, 2.0)), Ok(()));
    }

    #[test]
    fn test_rejects_sparse() {
        let filter = TraceFilter::default();
        let mut seq = driving(100, 40.0, 2.0);
        seq.points.truncate(3);
        assert_eq!(filter.check(&seq), Err(RejectReason::TooFewPoints));
    }

    #[test]
    fn test_rejects_short_distance() {
        let filter = TraceFilter::default();
        // 200 s at 15 km/h is ~830 m
        assert_eq!(filter.check(&driving(101, 15.0, 2.0)), Err(RejectReason::TooShort));
    }

    #[test]
    fn test_rejects_walking_speed() {
        let filter = TraceFilter::default();
        // 2 km/h for 2000 s covers ~1.1 km: long enough, but far too slow
        assert_eq!(
            filter.check(&driving(1001, 2.0, 2.0)),
            Err(RejectReason::SpeedOutOfRange)
        );
    }

    #[test]
    fn test_rejects_rail_speed() {
        let config = TraceFilterConfig {
            max_gap_m: 10_000.0,
            max_point_speed_kph: 1000.0,
            ..Default::default()
        };
        let filter = TraceFilter::new(config);
        assert_eq!(
            filter.check(&driving(100, 250.0, 2.0)),
            Err(RejectReason::SpeedOutOfRange)
        );
    }

    #[test]
    fn test_zero_elapsed_time_rejected_regardless_of_point_count() {
        let filter = TraceFilter::default();
        let mut seq = driving(1000, 40.0, 2.0);
        for p in &mut seq.points {
            p.time = 1_600_000_000.0;
        }
        assert_eq!(filter.check(&seq), Err(RejectReason::TooBrief));
    }

    #[test]
    fn test_rejects_distance_gap() {
        let filter = TraceFilter::default();
        let mut seq = driving(200, 25.0, 2.0);
        // Teleport 5 km north halfway through.
        for p in &mut seq.points[100..] {
            p.lat += 5000.0 / 111_318.8;
        }
        assert_eq!(filter.check(&seq), Err(RejectReason::Gap));
    }

    #[test]
    fn test_rejects_time_gap() {
        let filter = TraceFilter::default();
        let mut seq = driving(200, 40.0, 2.0);
        for p in &mut seq.points[100..] {
            p.time += 30.0;
        }
        assert_eq!(filter.check(&seq), Err(RejectReason::Gap));
    }

    #[test]
    fn test_rejects_out_of_order() {
        let filter = TraceFilter::default();
        let mut seq = driving(100, 40.0, 2.0);
        seq.points.swap(50, 51);
        assert_eq!(filter.check(&seq), Err(RejectReason::OutOfOrder));
    }

    #[test]
    fn test_rejects_point_speed_spike() {
        let config = TraceFilterConfig {
            max_point_speed_kph: 60.0,
            ..Default::default()
        };
        let filter = TraceFilter::new(config);
        let mut seq = driving(100, 40.0, 2.0);
        // One fix 40 m ahead of where it should be: ~112 km/h into it.
        seq.points[50].lat += 40.0 / 111_318.8;
        assert_eq!(filter.check(&seq), Err(RejectReason::PointSpeed));
    }

    #[test]
    fn test_each_failing_threshold_rejects_alone() {
        let good = driving(100, 40.0, 2.0);
        let strict = [
            TraceFilterConfig { min_points: 1000, ..Default::default() },
            TraceFilterConfig { min_distance_m: 1e6, ..Default::default() },
            TraceFilterConfig { min_duration_s: 1e6, ..Default::default() },
            TraceFilterConfig { min_speed_kph: 100.0, ..Default::default() },
            TraceFilterConfig { max_speed_kph: 20.0, ..Default::default() },
            TraceFilterConfig { max_gap_m: 1.0, ..Default::default() },
            TraceFilterConfig { max_gap_s: 1.0, ..Default::default() },
            TraceFilterConfig { max_point_speed_kph: 20.0, ..Default::default() },
        ];
        for config in strict {
            assert!(!TraceFilter::new(config.clone()).accepts(&good), "{config:?}");
        }
    }
}
