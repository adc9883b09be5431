//! Run configuration and collaborator construction.

use crate::aggregate::AggregationConfig;
use crate::error::{PipelineError, Result};
use crate::fetch::{BasicClient, RateLimited};
use crate::fetch::auth::{StaticHeaders, UrlParam};
use crate::geo::tiler::{DEFAULT_SECTION_ZOOM, MAX_ZOOM, SECTION_COUNT_WARNING};
use crate::matching::valhalla::{ValhallaConfig, ValhallaMatcher};
use crate::matching::{MapMatcher, MatchFilterConfig};
use crate::pipeline::retry::RetryPolicy;
use crate::trace::mapillary::{MapillaryConfig, MapillaryProvider};
use crate::trace::{TraceFilterConfig, TraceProvider};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when the trace config has no token.
pub const ACCESS_TOKEN_ENV: &str = "MAPILLARY_ACCESS_TOKEN";

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum TraceProviderConfig {
    Mapillary(MapillaryConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum MapMatchingConfig {
    Valhalla(ValhallaConfig),
}

/// Parses a JSON config given inline (`{...}`) or as a path to a file.
fn load_json<T: serde::de::DeserializeOwned>(what: &str, arg: &str) -> Result<T> {
    let text = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).map_err(|e| {
            PipelineError::InvalidInput(format!("cannot read {what} from '{arg}': {e}"))
        })?
    };
    serde_json::from_str(&text).map_err(|e| PipelineError::InvalidInput(format!("{what}: {e}")))
}

impl TraceProviderConfig {
    pub fn load(arg: &str) -> Result<Self> {
        let config: Self = load_json("trace config", arg)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TraceProviderConfig::Mapillary(c) => c
                .validate()
                .map_err(|e| PipelineError::InvalidInput(format!("trace config: {e:#}"))),
        }
    }

    /// Builds the provider. A Mapillary token falls back to
    /// [`ACCESS_TOKEN_ENV`].
    pub fn build(&self) -> anyhow::Result<Box<dyn TraceProvider>> {
        match self {
            TraceProviderConfig::Mapillary(c) => {
                let token = c
                    .access_token
                    .clone()
                    .filter(|t| !t.is_empty())
                    .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        PipelineError::InvalidInput(format!(
                            "no Mapillary access token: set access_token in the trace config or {ACCESS_TOKEN_ENV}"
                        ))
                    })?;
                let client = RateLimited::per_minute(
                    UrlParam::access_token(BasicClient::with_timeout(HTTP_TIMEOUT)?, token),
                    c.max_calls_per_minute,
                );
                Ok(Box::new(MapillaryProvider::new(client, c.clone())?))
            }
        }
    }
}

impl MapMatchingConfig {
    pub fn load(arg: &str) -> Result<Self> {
        let config: Self = load_json("map-matching config", arg)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            MapMatchingConfig::Valhalla(c) => {
                let url = c.base_url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(PipelineError::InvalidInput(format!(
                        "map-matching config: base_url '{url}' is not an http(s) URL"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn build(&self) -> anyhow::Result<Box<dyn MapMatcher>> {
        match self {
            MapMatchingConfig::Valhalla(c) => {
                let client = StaticHeaders::new(BasicClient::with_timeout(HTTP_TIMEOUT)?, &c.headers)?;
                Ok(Box::new(ValhallaMatcher::new(client, c)))
            }
        }
    }
}

/// Everything the driver needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub zoom: u8,
    pub concurrency: usize,
    pub trace_filter: TraceFilterConfig,
    pub match_filter: MatchFilterConfig,
    pub aggregation: AggregationConfig,
    pub retry: RetryPolicy,
    /// Log a warning when a run produces more sections than this.
    pub section_warning: usize,
}

impl PipelineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            zoom: DEFAULT_SECTION_ZOOM,
            concurrency: default_concurrency(),
            trace_filter: TraceFilterConfig::default(),
            match_filter: MatchFilterConfig::default(),
            aggregation: AggregationConfig::default(),
            retry: RetryPolicy::default(),
            section_warning: SECTION_COUNT_WARNING,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.zoom > MAX_ZOOM {
            return Err(PipelineError::InvalidInput(format!(
                "zoom {} is above the maximum of {MAX_ZOOM}",
                self.zoom
            )));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidInput("concurrency must be at least 1".into()));
        }
        let threshold = self.match_filter.match_ratio_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PipelineError::InvalidInput(format!(
                "match ratio threshold {threshold} is outside 0..=1"
            )));
        }
        let p = self.aggregation.policy.percentile();
        if !(0.0..=100.0).contains(&p) {
            return Err(PipelineError::InvalidInput(format!("percentile {p} is outside 0..=100")));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::InvalidInput("max attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.output_dir.join("cache")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("results")
    }

    pub fn speeds_path(&self) -> PathBuf {
        self.results_dir().join("speeds.json")
    }

    pub fn failed_sections_path(&self) -> PathBuf {
        self.results_dir().join("failed_sections.json")
    }

    pub fn run_stats_path(&self) -> PathBuf {
        self.results_dir().join("run_stats.csv")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(Path::new("output"))
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ReductionPolicy;

    #[test]
    fn test_mapillary_config_inline() {
        let config = TraceProviderConfig::load(
            r#"{"provider": "mapillary", "access_token": "abc", "skip_if_fewer_images_than": 5}"#,
        )
        .unwrap();
        let TraceProviderConfig::Mapillary(c) = config;
        assert_eq!(c.access_token.as_deref(), Some("abc"));
        assert_eq!(c.skip_if_fewer_images_than, 5);
        assert_eq!(c.sequences_per_section, 500);
    }

    #[test]
    fn test_unknown_provider_is_invalid_input() {
        let err = TraceProviderConfig::load(r#"{"provider": "kartaview"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)), "{err}");

        let err = MapMatchingConfig::load(r#"{"provider": "osrm", "base_url": "http://x/"}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)), "{err}");
    }

    #[test]
    fn test_malformed_json_is_invalid_input() {
        let err = MapMatchingConfig::load(r#"{"provider": "valhalla", "#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_valhalla_requires_base_url() {
        let err = MapMatchingConfig::load(r#"{"provider": "valhalla"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let err = MapMatchingConfig::load(r#"{"provider": "valhalla", "base_url": "localhost"}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_valhalla_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valhalla.json");
        std::fs::write(
            &path,
            r#"{"provider": "valhalla", "base_url": "https://valhalla.example/", "headers": {"x-api-key": "k"}}"#,
        )
        .unwrap();

        let config = MapMatchingConfig::load(path.to_str().unwrap()).unwrap();
        let MapMatchingConfig::Valhalla(c) = &config;
        assert_eq!(c.headers.get("x-api-key").map(String::as_str), Some("k"));
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_missing_config_file() {
        let err = TraceProviderConfig::load("/nonexistent/trace.json").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_pipeline_config_validation() {
        let mut config = PipelineConfig::new("out");
        assert!(config.validate().is_ok());
        assert!(config.concurrency >= 1);

        config.zoom = 23;
        assert!(config.validate().is_err());
        config.zoom = 14;

        config.match_filter.match_ratio_threshold = 1.5;
        assert!(config.validate().is_err());
        config.match_filter.match_ratio_threshold = 0.8;

        config.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_percentile_is_invalid_input() {
        let mut config = PipelineConfig::new("out");
        for p in [150.0, -1.0, f64::NAN] {
            config.aggregation.policy = ReductionPolicy::from_percentile(Some(p));
            assert!(matches!(config.validate(), Err(PipelineError::InvalidInput(_))));
        }
        config.aggregation.policy = ReductionPolicy::from_percentile(Some(100.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_result_paths() {
        let config = PipelineConfig::new("/data/run");
        assert_eq!(config.cache_dir(), PathBuf::from("/data/run/cache"));
        assert_eq!(config.speeds_path(), PathBuf::from("/data/run/results/speeds.json"));
    }
}
