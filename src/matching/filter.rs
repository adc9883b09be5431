use super::MapMatchResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchFilterConfig {
    /// Minimum fraction of points that must snap to a road.
    pub match_ratio_threshold: f64,
}

impl Default for MatchFilterConfig {
    fn default() -> Self {
        Self {
            match_ratio_threshold: 0.75,
        }
    }
}

/// Drops matches where too much of the trace fell off the road network.
#[derive(Debug, Clone, Default)]
pub struct MatchFilter {
    config: MatchFilterConfig,
}

impl MatchFilter {
    pub fn new(config: MatchFilterConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.match_ratio_threshold
    }

    pub fn accepts(&self, result: &MapMatchResult) -> bool {
        result.match_ratio >= self.config.match_ratio_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ratio(match_ratio: f64) -> MapMatchResult {
        MapMatchResult {
            match_ratio,
            ..MapMatchResult::unmatched("s")
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let filter = MatchFilter::default();
        assert!(filter.accepts(&with_ratio(0.75)));
        assert!(filter.accepts(&with_ratio(0.9)));
        assert!(!filter.accepts(&with_ratio(0.74)));
        assert!(!filter.accepts(&with_ratio(0.0)));
    }

    #[test]
    fn test_custom_threshold() {
        let filter = MatchFilter::new(MatchFilterConfig {
            match_ratio_threshold: 0.95,
        });
        assert!(!filter.accepts(&with_ratio(0.9)));
    }
}
