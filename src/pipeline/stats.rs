//! Counters describing what a run did.

use crate::cache::CacheKey;
use crate::trace::RejectReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where one sequence ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// The provider had too little data to return a trace.
    Declined,
    Rejected(RejectReason),
    /// Matched below the match-ratio threshold.
    Unmatched,
    Matched { observations: usize },
}

/// Outcome of one fully processed section, cached as the section's
/// completion record.
///
/// Counters cover only the sequences this section handled first; a
/// sequence already handled by another section of the same run is counted
/// in `sequences_shared` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionReport {
    pub section: String,
    pub sequences_found: usize,
    pub sequences_shared: usize,
    pub traces_declined: usize,
    pub traces_fetched: usize,
    pub traces_accepted: usize,
    pub traces_rejected: BTreeMap<RejectReason, usize>,
    pub matches_accepted: usize,
    pub matches_rejected: usize,
    pub observations: usize,
    /// Observation entries holding this section's data, shared ones included.
    pub observation_keys: Vec<CacheKey>,
}

impl SectionReport {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            ..Default::default()
        }
    }

    pub fn reject(&mut self, reason: RejectReason) {
        *self.traces_rejected.entry(reason).or_default() += 1;
    }

    pub fn record(&mut self, outcome: SequenceOutcome) {
        if outcome == SequenceOutcome::Declined {
            self.traces_declined += 1;
            return;
        }
        self.traces_fetched += 1;
        match outcome {
            SequenceOutcome::Declined => {}
            SequenceOutcome::Rejected(reason) => self.reject(reason),
            SequenceOutcome::Unmatched => {
                self.traces_accepted += 1;
                self.matches_rejected += 1;
            }
            SequenceOutcome::Matched { observations } => {
                self.traces_accepted += 1;
                self.matches_accepted += 1;
                self.observations += observations;
            }
        }
    }
}

/// A section that could not be completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSection {
    pub section: String,
    pub error: String,
}

/// Run-wide counters, merged from section reports as sections finish.
///
/// Only work done by this run is counted: sections completed by an earlier
/// run add to `sections_skipped` and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Sections produced by tiling the bounding box.
    pub sections_candidate: usize,
    /// Sections left after the provider's coverage pass.
    pub sections_total: usize,
    pub sections_completed: usize,
    /// Completed by an earlier run and skipped.
    pub sections_skipped: usize,
    pub sections_failed: usize,
    pub sequences_found: usize,
    pub sequences_shared: usize,
    pub traces_declined: usize,
    pub traces_fetched: usize,
    pub traces_accepted: usize,
    pub traces_rejected: BTreeMap<RejectReason, usize>,
    pub matches_accepted: usize,
    pub matches_rejected: usize,
    pub observations: usize,
    pub failed: Vec<FailedSection>,
    pub cancelled: bool,
}

impl RunStats {
    pub fn new(sections_candidate: usize, sections_total: usize) -> Self {
        Self {
            sections_candidate,
            sections_total,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, report: &SectionReport, skipped: bool) {
        if skipped {
            self.sections_skipped += 1;
            return;
        }
        self.sections_completed += 1;
        self.sequences_found += report.sequences_found;
        self.sequences_shared += report.sequences_shared;
        self.traces_declined += report.traces_declined;
        self.traces_fetched += report.traces_fetched;
        self.traces_accepted += report.traces_accepted;
        for (reason, count) in &report.traces_rejected {
            *self.traces_rejected.entry(*reason).or_default() += count;
        }
        self.matches_accepted += report.matches_accepted;
        self.matches_rejected += report.matches_rejected;
        self.observations += report.observations;
    }

    pub fn record_failure(&mut self, section: impl Into<String>, error: impl ToString) {
        self.sections_failed += 1;
        self.failed.push(FailedSection {
            section: section.into(),
            error: error.to_string(),
        });
    }

    pub fn rejected(&self, reason: RejectReason) -> usize {
        self.traces_rejected.get(&reason).copied().unwrap_or(0)
    }

    /// Flattens the stats into one CSV row.
    pub fn to_row(&self, bbox: &str) -> RunStatsRow {
        RunStatsRow {
            timestamp: Utc::now(),
            bbox: bbox.to_string(),
            sections_candidate: self.sections_candidate,
            sections_total: self.sections_total,
            sections_completed: self.sections_completed,
            sections_skipped: self.sections_skipped,
            sections_failed: self.sections_failed,
            sequences_found: self.sequences_found,
            sequences_shared: self.sequences_shared,
            traces_declined: self.traces_declined,
            traces_fetched: self.traces_fetched,
            traces_accepted: self.traces_accepted,
            rejected_too_few_points: self.rejected(RejectReason::TooFewPoints),
            rejected_too_short: self.rejected(RejectReason::TooShort),
            rejected_too_brief: self.rejected(RejectReason::TooBrief),
            rejected_speed_out_of_range: self.rejected(RejectReason::SpeedOutOfRange),
            rejected_gap: self.rejected(RejectReason::Gap),
            rejected_out_of_order: self.rejected(RejectReason::OutOfOrder),
            rejected_point_speed: self.rejected(RejectReason::PointSpeed),
            matches_accepted: self.matches_accepted,
            matches_rejected: self.matches_rejected,
            observations: self.observations,
            cancelled: self.cancelled,
        }
    }
}

/// One line of `run_stats.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatsRow {
    pub timestamp: DateTime<Utc>,
    pub bbox: String,
    pub sections_candidate: usize,
    pub sections_total: usize,
    pub sections_completed: usize,
    pub sections_skipped: usize,
    pub sections_failed: usize,
    pub sequences_found: usize,
    pub sequences_shared: usize,
    pub traces_declined: usize,
    pub traces_fetched: usize,
    pub traces_accepted: usize,
    pub rejected_too_few_points: usize,
    pub rejected_too_short: usize,
    pub rejected_too_brief: usize,
    pub rejected_speed_out_of_range: usize,
    pub rejected_gap: usize,
    pub rejected_out_of_order: usize,
    pub rejected_point_speed: usize,
    pub matches_accepted: usize,
    pub matches_rejected: usize,
    pub observations: usize,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let mut report = SectionReport::new("14-1-1");
        report.record(SequenceOutcome::Declined);
        report.record(SequenceOutcome::Rejected(RejectReason::Gap));
        report.record(SequenceOutcome::Unmatched);
        report.record(SequenceOutcome::Matched { observations: 5 });

        assert_eq!(report.traces_declined, 1);
        assert_eq!(report.traces_fetched, 3);
        assert_eq!(report.traces_accepted, 2);
        assert_eq!(report.traces_rejected[&RejectReason::Gap], 1);
        assert_eq!(report.matches_accepted, 1);
        assert_eq!(report.matches_rejected, 1);
        assert_eq!(report.observations, 5);
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut a = SectionReport::new("14-1-1");
        a.record(SequenceOutcome::Rejected(RejectReason::Gap));
        a.record(SequenceOutcome::Rejected(RejectReason::Gap));
        a.record(SequenceOutcome::Matched { observations: 5 });
        a.sequences_shared = 1;

        let mut b = SectionReport::new("14-1-2");
        b.record(SequenceOutcome::Rejected(RejectReason::TooShort));

        let mut stats = RunStats::new(4, 3);
        stats.merge(&a, false);
        stats.merge(&b, false);
        stats.record_failure("14-1-3", "boom");

        assert_eq!(stats.sections_completed, 2);
        assert_eq!(stats.sections_failed, 1);
        assert_eq!(stats.traces_fetched, 4);
        assert_eq!(stats.sequences_shared, 1);
        assert_eq!(stats.rejected(RejectReason::Gap), 2);
        assert_eq!(stats.rejected(RejectReason::TooShort), 1);
        assert_eq!(stats.observations, 5);
        assert_eq!(stats.failed[0].section, "14-1-3");
    }

    #[test]
    fn test_skipped_section_adds_no_work() {
        let mut earlier = SectionReport::new("14-1-1");
        earlier.record(SequenceOutcome::Matched { observations: 5 });

        let mut stats = RunStats::new(1, 1);
        stats.merge(&earlier, true);

        assert_eq!(stats.sections_skipped, 1);
        assert_eq!(stats.sections_completed, 0);
        assert_eq!(stats.traces_fetched, 0);
        assert_eq!(stats.matches_accepted, 0);
        assert_eq!(stats.observations, 0);
    }

    #[test]
    fn test_row_flattens_rejections() {
        let mut stats = RunStats::new(2, 1);
        let mut report = SectionReport::new("s");
        report.record(SequenceOutcome::Rejected(RejectReason::SpeedOutOfRange));
        stats.merge(&report, false);

        let row = stats.to_row("0,0,1,1");
        assert_eq!(row.rejected_speed_out_of_range, 1);
        assert_eq!(row.rejected_gap, 0);
        assert_eq!(row.sections_candidate, 2);
        assert_eq!(row.bbox, "0,0,1,1");
    }

    #[test]
    fn test_report_round_trips_through_json() {
        let mut report = SectionReport::new("14-1-1");
        report.reject(RejectReason::OutOfOrder);
        report
            .observation_keys
            .push(CacheKey::from_segments(["US", "US-PA", "seq/1"]));
        let json = serde_json::to_string(&report).unwrap();
        let back: SectionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
