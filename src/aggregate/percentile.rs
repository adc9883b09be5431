use serde::{Deserialize, Serialize};

/// How a bag of observed speeds is reduced to one representative value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "p")]
pub enum ReductionPolicy {
    #[default]
    Median,
    /// 0..=100
    Percentile(f64),
}

impl ReductionPolicy {
    /// Builds a policy from an optional CLI percentile; 50 is the median.
    /// Out-of-range values are kept as given and fail validation.
    pub fn from_percentile(p: Option<f64>) -> Self {
        match p {
            None => ReductionPolicy::Median,
            Some(p) if p == 50.0 => ReductionPolicy::Median,
            Some(p) => ReductionPolicy::Percentile(p),
        }
    }

    pub fn percentile(&self) -> f64 {
        match self {
            ReductionPolicy::Median => 50.0,
            ReductionPolicy::Percentile(p) => *p,
        }
    }

    /// Reduces `values`, `None` when there is nothing to reduce.
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        percentile(values, self.percentile())
    }
}

/// Percentile with linear interpolation between the closest ranks.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
