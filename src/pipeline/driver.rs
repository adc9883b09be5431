use super::config::PipelineConfig;
use super::stage;
use super::stats::{RunStats, SectionReport, SequenceOutcome};
use crate::aggregate::{Aggregator, RegionSpeeds};
use crate::cache::{CacheKey, CacheStore};
use crate::error::{PipelineError, Result};
use crate::geo::{BoundingBox, Section, TileCoord, tile_bbox};
use crate::matching::{EdgeObservation, MapMatchResult, MapMatcher, MatchFilter};
use crate::output;
use crate::trace::{TraceFilter, TraceProvider, TraceSequence};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Cache segment used when a country or region is unknown.
const UNKNOWN_REGION: &str = "_";

/// What a finished [`Driver::run`] produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub stats: RunStats,
    /// `None` when the run was cancelled before aggregation.
    pub speeds: Option<Vec<RegionSpeeds>>,
}

/// State shared by every section task.
struct Shared {
    config: PipelineConfig,
    cache: CacheStore,
    provider: Arc<dyn TraceProvider>,
    matcher: Arc<dyn MapMatcher>,
    trace_filter: TraceFilter,
    match_filter: MatchFilter,
    cancel: CancellationToken,
    /// Sequence ids already counted by a section of this run.
    claimed: Mutex<HashSet<String>>,
}

/// Runs the section stages with bounded concurrency and aggregates the
/// cached observations into speed profiles.
pub struct Driver {
    shared: Arc<Shared>,
}

impl Driver {
    /// Validates `config` and opens the cache under its output directory.
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn TraceProvider>,
        matcher: Arc<dyn MapMatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = CacheStore::open(config.cache_dir())?;
        let trace_filter = TraceFilter::new(config.trace_filter.clone());
        let match_filter = MatchFilter::new(config.match_filter.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                cache,
                provider,
                matcher,
                trace_filter,
                match_filter,
                cancel: CancellationToken::new(),
                claimed: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Token that stops the run when cancelled. Work in flight is dropped
    /// and nothing it was computing is marked complete.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.shared.cache
    }

    /// Processes every section of `bbox`, then aggregates.
    ///
    /// Sections whose collaborators stay unavailable are recorded as failed
    /// and the run carries on. Fatal errors (an unwritable cache) abort.
    #[tracing::instrument(skip_all, fields(bbox = %bbox))]
    pub async fn run(&self, bbox: &BoundingBox) -> Result<RunOutcome> {
        let config = &self.shared.config;
        let candidates = tile_bbox(bbox, config.zoom)?;
        let candidate_count = candidates.len();
        let sections = match self.shared.select_sections(bbox, candidates).await {
            Ok(sections) => sections,
            Err(PipelineError::Cancelled) => {
                warn!("Run cancelled during coverage pass");
                let mut stats = RunStats::new(candidate_count, 0);
                stats.cancelled = true;
                return Ok(RunOutcome { stats, speeds: None });
            }
            Err(e) => return Err(e),
        };
        if sections.len() > config.section_warning {
            warn!(
                sections = sections.len(),
                threshold = config.section_warning,
                "Large number of sections, consider a smaller bounding box"
            );
        }
        info!(
            candidates = candidate_count,
            sections = sections.len(),
            zoom = config.zoom,
            concurrency = config.concurrency,
            provider = self.shared.provider.name(),
            matcher = self.shared.matcher.name(),
            "Starting run"
        );

        let mut stats = RunStats::new(candidate_count, sections.len());
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let mut tasks = JoinSet::new();
        let mut section_of: HashMap<tokio::task::Id, String> = HashMap::new();

        for section in sections {
            let shared = self.shared.clone();
            let semaphore = semaphore.clone();
            let span = tracing::info_span!("section", section = %section.key());

            let handle = tasks.spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return Err(PipelineError::Cancelled);
                    };
                    tokio::select! {
                        biased;
                        _ = shared.cancel.cancelled() => Err(PipelineError::Cancelled),
                        r = shared.process_section(&section) => r,
                    }
                }
                .instrument(span),
            );
            section_of.insert(handle.id(), section.key());
        }

        let mut fatal = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            let id = match &joined {
                Ok((id, _)) => *id,
                Err(join_error) => join_error.id(),
            };
            let key = section_of.remove(&id).unwrap_or_else(|| format!("task {id}"));
            match joined {
                Ok((_, Ok((report, skipped)))) => {
                    stats.merge(&report, skipped);
                    let done =
                        stats.sections_completed + stats.sections_skipped + stats.sections_failed;
                    info!(
                        section = %key,
                        skipped,
                        done,
                        total = stats.sections_total,
                        observations = report.observations,
                        "Section finished"
                    );
                }
                Ok((_, Err(PipelineError::Cancelled))) => {
                    stats.cancelled = true;
                }
                Ok((_, Err(e))) if e.is_fatal() => {
                    error!(section = %key, error = %e, "Fatal error, stopping run");
                    self.shared.cancel.cancel();
                    fatal.get_or_insert(e);
                }
                Ok((_, Err(e))) => {
                    error!(section = %key, error = %e, "Section failed");
                    stats.record_failure(key, &e);
                }
                Err(join_error) => {
                    error!(section = %key, error = %join_error, "Section task panicked");
                    stats.record_failure(key, &join_error);
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        stats.cancelled |= self.shared.cancel.is_cancelled();

        output::write_json_atomic(&config.failed_sections_path(), &stats.failed)?;
        let row = stats.to_row(&bbox.to_string());
        if let Err(e) = output::append_record(&config.run_stats_path(), &row) {
            warn!(error = %e, "Failed to append run statistics");
        }

        if stats.cancelled {
            warn!(
                completed = stats.sections_completed,
                total = stats.sections_total,
                "Run cancelled, skipping aggregation"
            );
            return Ok(RunOutcome { stats, speeds: None });
        }

        if stats.sections_failed > 0 {
            warn!(
                failed = stats.sections_failed,
                path = %config.failed_sections_path().display(),
                "Some sections failed, aggregating what is available"
            );
        }

        let speeds = self.aggregate()?;
        info!(
            completed = stats.sections_completed,
            skipped = stats.sections_skipped,
            failed = stats.sections_failed,
            sequences = stats.sequences_found,
            shared = stats.sequences_shared,
            observations = stats.observations,
            regions = speeds.len(),
            "Run finished"
        );
        Ok(RunOutcome {
            stats,
            speeds: Some(speeds),
        })
    }

    /// Reduces every cached observation into speed profiles and writes them
    /// to `results/speeds.json`. Depends only on the cache contents.
    pub fn aggregate(&self) -> Result<Vec<RegionSpeeds>> {
        aggregate_cached(&self.shared.config, &self.shared.cache)
    }
}

/// Aggregates whatever the `observations` stage of `cache` holds, without
/// touching any collaborator, and writes `results/speeds.json`.
#[tracing::instrument(skip_all, fields(cache = %cache.root().display()))]
pub fn aggregate_cached(config: &PipelineConfig, cache: &CacheStore) -> Result<Vec<RegionSpeeds>> {
    let keys = cache
        .keys(stage::OBSERVATIONS, &CacheKey::root())
        .map_err(|e| PipelineError::CacheUnwritable {
            path: cache.root().join(stage::OBSERVATIONS),
            source: std::io::Error::other(e.to_string()),
        })?;

    let mut aggregator = Aggregator::new(config.aggregation.clone());
    for key in &keys {
        if let Some(observations) = cache.lookup::<Vec<EdgeObservation>>(stage::OBSERVATIONS, key) {
            aggregator.extend(&observations);
        }
    }
    if aggregator.ignored() > 0 {
        debug!(ignored = aggregator.ignored(), "Observations left out of aggregation");
    }

    let speeds = aggregator.finish();
    output::write_json_atomic(&config.speeds_path(), &speeds)?;
    info!(
        entries = keys.len(),
        regions = speeds.len(),
        path = %config.speeds_path().display(),
        "Wrote speed profiles"
    );
    Ok(speeds)
}

impl Shared {
    /// Lets the provider drop sections without data. The kept tiles are
    /// cached per zoom and box so a resumed run works on the same sections.
    async fn select_sections(&self, bbox: &BoundingBox, candidates: Vec<Section>) -> Result<Vec<Section>> {
        let key = CacheKey::from_segments([self.config.zoom.to_string(), bbox.to_string()]);
        let policy = self.config.retry;
        let (provider, all) = (&self.provider, &candidates);
        let kept: Vec<TileCoord> = self
            .cache
            .get_or_compute(stage::COVERAGE, &key, || {
                policy.run("coverage", &self.cancel, move || async move {
                    let selected = provider.select_sections(all.clone()).await?;
                    Ok(selected.into_iter().map(|s| s.tile).collect())
                })
            })
            .await?;
        let kept: HashSet<TileCoord> = kept.into_iter().collect();
        Ok(candidates.into_iter().filter(|s| kept.contains(&s.tile)).collect())
    }

    /// Runs one section through every stage. Returns its report and whether
    /// an earlier run had already completed it.
    async fn process_section(&self, section: &Section) -> Result<(SectionReport, bool)> {
        let section_key = CacheKey::from_segments([section.key()]);

        if let Some(report) = self.cache.lookup::<SectionReport>(stage::SECTIONS, &section_key) {
            if self.observations_present(&report) {
                debug!("Section already complete");
                return Ok((report, true));
            }
            warn!("Section report present but observations missing, recomputing");
        }

        let mut report = SectionReport::new(section.key());
        let ids = self.sequence_ids(section, &section_key).await?;

        for id in &ids {
            let (outcome, keys) = self.process_sequence(id).await?;
            report.observation_keys.extend(keys);

            let first = self
                .claimed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id.clone());
            if first {
                report.sequences_found += 1;
                report.record(outcome);
            } else {
                debug!(sequence = %id, "Sequence already handled by another section");
                report.sequences_shared += 1;
            }
        }

        self.cache.put(stage::SECTIONS, &section_key, &report)?;
        Ok((report, false))
    }

    /// Fetches, filters and matches one sequence, storing its accepted
    /// observations per region. Every stage is cached under the sequence id,
    /// so a sequence crossing several sections is downloaded and matched once.
    async fn process_sequence(&self, id: &str) -> Result<(SequenceOutcome, Vec<CacheKey>)> {
        let Some(seq) = self.fetch_trace(id).await? else {
            return Ok((SequenceOutcome::Declined, Vec::new()));
        };

        if let Err(reason) = self.trace_filter.check(&seq) {
            debug!(sequence = %seq.id, reason = reason.as_str(), "Trace rejected");
            return Ok((SequenceOutcome::Rejected(reason), Vec::new()));
        }

        let result = self.match_trace(&seq).await?;
        if !self.match_filter.accepts(&result) {
            debug!(
                sequence = %seq.id,
                match_ratio = result.match_ratio,
                threshold = self.match_filter.threshold(),
                "Match rejected"
            );
            return Ok((SequenceOutcome::Unmatched, Vec::new()));
        }

        let mut by_region: BTreeMap<(String, String), Vec<EdgeObservation>> = BTreeMap::new();
        for obs in result.observations.into_iter().filter(|o| o.matched) {
            let country = obs.iso3166_1.clone().unwrap_or_else(|| UNKNOWN_REGION.into());
            let region = obs.iso3166_2.clone().unwrap_or_else(|| UNKNOWN_REGION.into());
            by_region.entry((country, region)).or_default().push(obs);
        }

        let mut observations = 0;
        let mut keys = Vec::with_capacity(by_region.len());
        for ((country, region), entries) in &by_region {
            let key = CacheKey::from_segments([country.as_str(), region.as_str(), id]);
            // Same sequence, same content: an existing entry is left alone.
            if !self.cache.contains(stage::OBSERVATIONS, &key) {
                self.cache.put(stage::OBSERVATIONS, &key, entries)?;
            }
            observations += entries.len();
            keys.push(key);
        }
        Ok((SequenceOutcome::Matched { observations }, keys))
    }

    async fn sequence_ids(&self, section: &Section, key: &CacheKey) -> Result<Vec<String>> {
        let policy = self.config.retry;
        self.cache
            .get_or_compute(stage::SEQUENCES, key, || {
                policy.run("sequences", &self.cancel, || self.provider.sequence_ids(section))
            })
            .await
    }

    async fn fetch_trace(&self, id: &str) -> Result<Option<TraceSequence>> {
        let policy = self.config.retry;
        let key = CacheKey::from_segments([id]);
        self.cache
            .get_or_compute(stage::TRACES, &key, || {
                policy.run("traces", &self.cancel, || self.provider.fetch_sequence(id))
            })
            .await
    }

    async fn match_trace(&self, seq: &TraceSequence) -> Result<MapMatchResult> {
        let policy = self.config.retry;
        let key = CacheKey::from_segments([seq.id.as_str()]);
        self.cache
            .get_or_compute(stage::MATCHES, &key, || {
                policy.run("matches", &self.cancel, || self.matcher.match_sequence(seq))
            })
            .await
    }

    fn observations_present(&self, report: &SectionReport) -> bool {
        report
            .observation_keys
            .iter()
            .all(|key| self.cache.contains(stage::OBSERVATIONS, key))
    }
}
