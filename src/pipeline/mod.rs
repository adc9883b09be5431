//! Section-by-section orchestration of the fetch, filter, match and
//! aggregate stages.

pub mod config;
pub mod driver;
pub mod retry;
pub mod stats;

pub use config::{MapMatchingConfig, PipelineConfig, TraceProviderConfig};
pub use driver::{Driver, RunOutcome, aggregate_cached};
pub use retry::RetryPolicy;
pub use stats::{FailedSection, RunStats, SectionReport, SequenceOutcome};

/// Cache stage names.
pub mod stage {
    /// Tiles kept by the provider's coverage pass, per `zoom/bbox`.
    pub const COVERAGE: &str = "coverage";
    /// Sequence ids found in each section.
    pub const SEQUENCES: &str = "sequences";
    /// Raw trace per sequence id.
    pub const TRACES: &str = "traces";
    /// Raw map-match result per sequence id.
    pub const MATCHES: &str = "matches";
    /// Accepted observations per `country/region/sequence`.
    pub const OBSERVATIONS: &str = "observations";
    /// Completion record per section, written last.
    pub const SECTIONS: &str = "sections";
}
