//! Reduction of per-edge speed observations into per-region speed profiles.

pub mod interp;
pub mod percentile;
pub mod types;

pub use interp::{Bucket, fill_buckets};
pub use percentile::ReductionPolicy;
pub use types::{ClassSpeed, ContextSpeeds, RegionSpeeds};

use crate::matching::{Context, EdgeObservation, IMPORTANCE_BUCKETS, RoadClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub policy: ReductionPolicy,
    /// Emit a separate suburban context instead of folding it into urban.
    pub suburban: bool,
    /// Emit country-level and world-level entries.
    pub rollups: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            policy: ReductionPolicy::Median,
            suburban: false,
            rollups: true,
        }
    }
}

/// Observed speeds above this (km/h) are treated as matcher noise.
pub const MAX_PLAUSIBLE_SPEED: f64 = 300.0;

/// (country, region); `(None, None)` is the world.
type RegionKey = (Option<String>, Option<String>);

/// (context, class, bucket index); the bucket is 0 for scalar classes.
type SampleKey = (Context, RoadClass, usize);

#[derive(Debug, Default)]
struct Samples(BTreeMap<SampleKey, Vec<f64>>);

impl Samples {
    fn push(&mut self, key: SampleKey, speed: f64) {
        self.0.entry(key).or_default().push(speed);
    }
}

/// Collects observations and reduces them once at the end.
///
/// The output depends only on the multiset of observations added, never on
/// the order they arrive in.
#[derive(Debug)]
pub struct Aggregator {
    config: AggregationConfig,
    regions: BTreeMap<RegionKey, Samples>,
    ignored: usize,
}

impl Aggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            regions: BTreeMap::new(),
            ignored: 0,
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Observations that could not be placed (unmatched, no bucket, bad speed).
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn add(&mut self, obs: &EdgeObservation) {
        let Some(sample_key) = self.sample_key(obs) else {
            self.ignored += 1;
            return;
        };

        let country = obs.iso3166_1.clone().filter(|c| !c.is_empty());
        let region = obs.iso3166_2.clone().filter(|r| !r.is_empty());

        let mut targets: Vec<RegionKey> = Vec::with_capacity(3);
        if let (Some(c), Some(r)) = (&country, &region) {
            targets.push((Some(c.clone()), Some(r.clone())));
        }
        if self.config.rollups {
            if let Some(c) = &country {
                targets.push((Some(c.clone()), None));
            }
            targets.push((None, None));
        }
        if targets.is_empty() {
            self.ignored += 1;
            return;
        }

        for target in targets {
            self.regions.entry(target).or_default().push(sample_key, obs.speed);
        }
    }

    pub fn extend<'a>(&mut self, observations: impl IntoIterator<Item = &'a EdgeObservation>) {
        for obs in observations {
            self.add(obs);
        }
    }

    fn sample_key(&self, obs: &EdgeObservation) -> Option<SampleKey> {
        if !obs.matched || !(0.0..=MAX_PLAUSIBLE_SPEED).contains(&obs.speed) {
            return None;
        }
        let context = match obs.context {
            Context::Suburban if !self.config.suburban => Context::Urban,
            c => c,
        };
        let bucket = if obs.road_class.is_bucketed() {
            let importance = obs.importance?;
            if !(1..=IMPORTANCE_BUCKETS as u8).contains(&importance) {
                return None;
            }
            usize::from(importance - 1)
        } else {
            0
        };
        Some((context, obs.road_class, bucket))
    }

    /// Reduces everything collected so far.
    ///
    /// Order: the world entry, then for each country its regions followed by
    /// the country entry. Regions with no usable data are left out.
    pub fn finish(&self) -> Vec<RegionSpeeds> {
        let mut out = Vec::new();

        if let Some(world) = self.regions.get(&(None, None)) {
            out.extend(self.reduce_region(None, None, world));
        }

        let mut rollup: Option<RegionSpeeds> = None;
        let mut current_country: Option<&String> = None;
        for ((country, region), samples) in &self.regions {
            let Some(country) = country else { continue };
            if current_country != Some(country) {
                out.extend(rollup.take());
                current_country = Some(country);
            }
            match region {
                None => rollup = self.reduce_region(Some(country), None, samples),
                Some(region) => {
                    out.extend(self.reduce_region(Some(country), Some(region), samples));
                }
            }
        }
        out.extend(rollup);

        out
    }

    fn reduce_region(
        &self,
        country: Option<&String>,
        region: Option<&String>,
        samples: &Samples,
    ) -> Option<RegionSpeeds> {
        let mut speeds = RegionSpeeds {
            iso3166_1: country.cloned(),
            iso3166_2: region.cloned(),
            ..Default::default()
        };

        for context in Context::ALL {
            let mut ctx = ContextSpeeds::default();
            for class in RoadClass::ALL {
                if let Some(speed) = self.reduce_class(samples, context, class) {
                    ctx.set(class, speed);
                }
            }
            if !ctx.is_empty() {
                *speeds.context_mut(context) = Some(ctx);
            }
        }

        if speeds.rural.is_none() && speeds.suburban.is_none() && speeds.urban.is_none() {
            return None;
        }
        Some(speeds)
    }

    fn reduce_class(&self, samples: &Samples, context: Context, class: RoadClass) -> Option<ClassSpeed> {
        let policy = self.config.policy;
        if !class.is_bucketed() {
            let values = samples.0.get(&(context, class, 0))?;
            let v = policy.reduce(values)?;
            return Some(ClassSpeed::Scalar(to_kph(v.round() as i64)));
        }

        let buckets: Vec<Option<Bucket>> = (0..IMPORTANCE_BUCKETS)
            .map(|b| {
                let values = samples.0.get(&(context, class, b))?;
                policy.reduce(values).map(|v| Bucket::new(v, values.len()))
            })
            .collect();

        let filled = fill_buckets(&buckets)?;
        let mut out = [0u32; IMPORTANCE_BUCKETS];
        for (slot, v) in out.iter_mut().zip(filled) {
            *slot = to_kph(v);
        }
        Some(ClassSpeed::Bucketed(out))
    }
}

fn to_kph(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

/// Convenience wrapper for a one-shot reduction.
pub fn aggregate<'a>(
    config: AggregationConfig,
    observations: impl IntoIterator<Item = &'a EdgeObservation>,
) -> Vec<RegionSpeeds> {
    let mut aggregator = Aggregator::new(config);
    aggregator.extend(observations);
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(
        country: Option<&str>,
        region: Option<&str>,
        context: Context,
        road_class: RoadClass,
        importance: Option<u8>,
        speed: f64,
    ) -> EdgeObservation {
        EdgeObservation {
            iso3166_1: country.map(str::to_string),
            iso3166_2: region.map(str::to_string),
            context,
            road_class,
            importance,
            speed,
            matched: true,
        }
    }

    fn way(country: &str, region: &str, importance: u8, speed: f64) -> EdgeObservation {
        obs(
            Some(country),
            Some(region),
            Context::Rural,
            RoadClass::Way,
            Some(importance),
            speed,
        )
    }

    #[test]
    fn test_median_of_bucket() {
        let observations: Vec<_> = [20.0, 22.0, 24.0, 26.0, 28.0]
            .into_iter()
            .map(|s| way("US", "US-PA", 3, s))
            .collect();
        let out = aggregate(AggregationConfig::default(), &observations);

        let region = out
            .iter()
            .find(|r| r.iso3166_2.as_deref() == Some("US-PA"))
            .unwrap();
        let profile = region.rural.as_ref().unwrap().way.unwrap();
        assert_eq!(profile[2], 24);
        assert_eq!(profile, [24; 8]);
    }

    #[test]
    fn test_output_order_and_rollups() {
        let observations = vec![
            way("US", "US-PA", 1, 100.0),
            way("DE", "DE-BY", 1, 120.0),
            way("DE", "DE-BE", 1, 80.0),
            obs(Some("FR"), None, Context::Rural, RoadClass::Way, Some(1), 110.0),
            obs(None, None, Context::Rural, RoadClass::Way, Some(1), 90.0),
        ];
        let out = aggregate(AggregationConfig::default(), &observations);
        let keys: Vec<(Option<&str>, Option<&str>)> = out
            .iter()
            .map(|r| (r.iso3166_1.as_deref(), r.iso3166_2.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (None, None),
                (Some("DE"), Some("DE-BE")),
                (Some("DE"), Some("DE-BY")),
                (Some("DE"), None),
                (Some("FR"), None),
                (Some("US"), Some("US-PA")),
                (Some("US"), None),
            ]
        );

        // World sees every observation: median of 80, 90, 100, 110, 120.
        assert_eq!(out[0].rural.as_ref().unwrap().way.unwrap()[0], 100);
        // Germany: median of 80 and 120.
        assert_eq!(out[3].rural.as_ref().unwrap().way.unwrap()[0], 100);
    }

    #[test]
    fn test_without_rollups() {
        let observations = vec![
            way("US", "US-PA", 1, 100.0),
            obs(Some("FR"), None, Context::Rural, RoadClass::Way, Some(1), 110.0),
        ];
        let config = AggregationConfig {
            rollups: false,
            ..Default::default()
        };
        let out = aggregate(config, &observations);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].iso3166_2.as_deref(), Some("US-PA"));
    }

    #[test]
    fn test_no_data_is_absent() {
        let observations = vec![way("US", "US-PA", 2, 90.0)];
        let out = aggregate(AggregationConfig::default(), &observations);
        for region in &out {
            assert!(region.urban.is_none());
            assert!(region.suburban.is_none());
            let rural = region.rural.as_ref().unwrap();
            assert!(rural.roundabout.is_none());
            assert!(rural.driveway.is_none());
        }

        let json = serde_json::to_string(&out).unwrap();
        assert!(!json.contains("null"));
        assert!(!json.contains("roundabout"));
    }

    #[test]
    fn test_unmatched_and_unbucketed_are_ignored() {
        let mut unmatched = way("US", "US-PA", 1, 50.0);
        unmatched.matched = false;
        let no_bucket = obs(Some("US"), Some("US-PA"), Context::Urban, RoadClass::Way, None, 50.0);

        let mut aggregator = Aggregator::new(AggregationConfig::default());
        aggregator.extend([&unmatched, &no_bucket]);
        assert_eq!(aggregator.ignored(), 2);
        assert!(aggregator.finish().is_empty());
    }

    #[test]
    fn test_implausible_speeds_are_ignored() {
        let observations = [
            way("US", "US-PA", 1, 1e300),
            way("US", "US-PA", 1, f64::INFINITY),
            way("US", "US-PA", 1, -5.0),
            way("US", "US-PA", 1, 301.0),
            way("US", "US-PA", 1, 80.0),
        ];
        let mut aggregator = Aggregator::new(AggregationConfig {
            rollups: false,
            ..Default::default()
        });
        aggregator.extend(&observations);
        assert_eq!(aggregator.ignored(), 4);

        let out = aggregator.finish();
        assert_eq!(out[0].rural.as_ref().unwrap().way.unwrap(), [80; 8]);
    }

    #[test]
    fn test_suburban_folding() {
        let observations = vec![
            obs(Some("US"), Some("US-PA"), Context::Suburban, RoadClass::Alley, None, 12.0),
            obs(Some("US"), Some("US-PA"), Context::Urban, RoadClass::Alley, None, 8.0),
        ];

        let folded = aggregate(AggregationConfig::default(), &observations);
        assert!(folded.iter().all(|r| r.suburban.is_none()));
        assert_eq!(folded[0].urban.as_ref().unwrap().alley, Some(10));

        let split = aggregate(
            AggregationConfig {
                suburban: true,
                ..Default::default()
            },
            &observations,
        );
        assert_eq!(split[0].suburban.as_ref().unwrap().alley, Some(12));
        assert_eq!(split[0].urban.as_ref().unwrap().alley, Some(8));
    }

    #[test]
    fn test_percentile_policy() {
        let observations: Vec<_> = (1..=5).map(|i| way("US", "US-PA", 1, i as f64 * 10.0)).collect();
        let config = AggregationConfig {
            policy: ReductionPolicy::Percentile(85.0),
            ..Default::default()
        };
        let out = aggregate(config, &observations);
        // rank 3.4 between 40 and 50
        assert_eq!(out[0].rural.as_ref().unwrap().way.unwrap()[0], 44);
    }

    #[test]
    fn test_order_independent() {
        let mut observations: Vec<_> = (0..40)
            .map(|i| way("US", if i % 2 == 0 { "US-PA" } else { "US-NY" }, 1 + (i % 8) as u8, 20.0 + i as f64))
            .collect();
        let forward = serde_json::to_string(&aggregate(AggregationConfig::default(), &observations)).unwrap();
        observations.reverse();
        let backward = serde_json::to_string(&aggregate(AggregationConfig::default(), &observations)).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_bucketed_profiles_are_non_increasing() {
        let observations: Vec<_> = (0..64)
            .map(|i| way("US", "US-PA", 1 + (i % 8) as u8, ((i * 37) % 130) as f64 + 5.0))
            .collect();
        for region in aggregate(AggregationConfig::default(), &observations) {
            let profile = region.rural.unwrap().way.unwrap();
            assert!(profile.windows(2).all(|w| w[0] >= w[1]), "{profile:?}");
        }
    }
}
