//! Cross-episode statistics.
//!
//! Pure, side-effect-free functions over immutable score vectors: mean,
//! sample standard deviation, 95% confidence intervals, min/max/range, and
//! Fleiss' kappa inter-rater agreement over binary judge matrices. Nothing
//! here mutates its arguments or keeps state between calls.

use serde::{Deserialize, Serialize};

/// Threshold at which a score counts as agreement when binarizing judge
/// scores for the kappa matrix.
pub const BINARIZE_THRESHOLD: f64 = 0.5;

/// Arithmetic mean; 0 for an empty vector.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation `sqrt(Σ(x−mean)² / (n−1))`.
///
/// Defined as 0 when n < 2: no variance is estimable from one sample.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (n - 1) as f64).sqrt()
}

/// Two-sided 95% Student's-t critical value by sample size.
///
/// Exact for n in [2,9] (df = n−1). For n >= 10 the df = 9 value 2.262 is
/// reused for every sample size; published intervals keep this approximation
/// for comparability with earlier runs.
fn t_critical_95(n: usize) -> f64 {
    match n {
        2 => 12.706,
        3 => 4.303,
        4 => 3.182,
        5 => 2.776,
        6 => 2.571,
        7 => 2.447,
        8 => 2.365,
        9 => 2.306,
        _ => 2.262,
    }
}

/// A two-sided confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// 95% confidence interval for the mean: `mean ± t·stdDev/√n`.
///
/// For n < 2 there is no spread to estimate and the interval degenerates to
/// a point: `[v, v]` for one sample, `[0, 0]` for none.
pub fn confidence_interval_95(values: &[f64]) -> ConfidenceInterval {
    let n = values.len();
    let m = mean(values);
    if n < 2 {
        return ConfidenceInterval { lower: m, upper: m };
    }
    let margin = t_critical_95(n) * sample_std_dev(values) / (n as f64).sqrt();
    ConfidenceInterval {
        lower: m - margin,
        upper: m + margin,
    }
}

/// Minimum, maximum and spread of a value vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

/// Range statistics; all zeros for empty input.
pub fn range_stats(values: &[f64]) -> RangeStats {
    if values.is_empty() {
        return RangeStats {
            min: 0.0,
            max: 0.0,
            range: 0.0,
        };
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        min = min.min(v);
        max = max.max(v);
    }
    RangeStats {
        min,
        max,
        range: max - min,
    }
}

/// Binarize judge scores at `threshold` (scores at or above map to 1).
pub fn binarize_scores(scores: &[f64], threshold: f64) -> Vec<u8> {
    scores
        .iter()
        .map(|&s| if s >= threshold { 1 } else { 0 })
        .collect()
}

/// Fleiss' kappa over a binary judge-score matrix shaped items × judges.
///
/// Requires at least one item, at least 2 judges, and a rectangular matrix;
/// otherwise returns `None`. Defined as 1 when chance agreement reaches 1
/// (all cells identical), where the usual formula would divide by zero.
pub fn fleiss_kappa(matrix: &[Vec<u8>]) -> Option<f64> {
    let n_items = matrix.len();
    if n_items == 0 {
        return None;
    }
    let k = matrix[0].len();
    if k < 2 || matrix.iter().any(|row| row.len() != k) {
        return None;
    }

    let kf = k as f64;
    let mut total_ones = 0usize;
    let mut p_sum = 0.0;

    for row in matrix {
        let ones = row.iter().filter(|&&v| v != 0).count();
        let zeros = k - ones;
        total_ones += ones;
        let ones = ones as f64;
        let zeros = zeros as f64;
        // Per-item agreement: proportion of agreeing judge pairs.
        p_sum += (ones * ones + zeros * zeros - kf) / (kf * (kf - 1.0));
    }

    let p_bar = p_sum / n_items as f64;

    let total_cells = (n_items * k) as f64;
    let p_ones = total_ones as f64 / total_cells;
    let p_zeros = 1.0 - p_ones;
    let p_e = p_ones * p_ones + p_zeros * p_zeros;

    if (1.0 - p_e).abs() < f64::EPSILON {
        return Some(1.0);
    }
    Some((p_bar - p_e) / (1.0 - p_e))
}

/// Interpretation bands for a kappa value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementBand {
    None,
    Slight,
    Fair,
    Moderate,
    Substantial,
    AlmostPerfect,
}

impl AgreementBand {
    /// Band for a kappa value.
    pub fn from_kappa(kappa: f64) -> Self {
        if kappa < 0.0 {
            AgreementBand::None
        } else if kappa <= 0.20 {
            AgreementBand::Slight
        } else if kappa <= 0.40 {
            AgreementBand::Fair
        } else if kappa <= 0.60 {
            AgreementBand::Moderate
        } else if kappa <= 0.80 {
            AgreementBand::Substantial
        } else {
            AgreementBand::AlmostPerfect
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            AgreementBand::None => "none",
            AgreementBand::Slight => "slight",
            AgreementBand::Fair => "fair",
            AgreementBand::Moderate => "moderate",
            AgreementBand::Substantial => "substantial",
            AgreementBand::AlmostPerfect => "almost perfect",
        }
    }
}

impl std::fmt::Display for AgreementBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Summary statistics over the final scores of repeated episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSummary {
    /// Number of episodes.
    pub episodes: usize,
    /// Mean final score.
    pub mean: f64,
    /// Sample standard deviation of final scores.
    pub std_dev: f64,
    /// 95% confidence interval for the mean.
    pub confidence_interval: ConfidenceInterval,
    /// Min/max/range of final scores.
    pub range: RangeStats,
}

/// Summarize per-episode final scores.
pub fn summarize_episodes(final_scores: &[f64]) -> EpisodeSummary {
    EpisodeSummary {
        episodes: final_scores.len(),
        mean: mean(final_scores),
        std_dev: sample_std_dev(final_scores),
        confidence_interval: confidence_interval_95(final_scores),
        range: range_stats(final_scores),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[0.2, 0.4, 0.6]) - 0.4).abs() < EPSILON);
    }

    #[test]
    fn test_sample_std_dev() {
        assert_eq!(sample_std_dev(&[]), 0.0);
        assert_eq!(sample_std_dev(&[0.7]), 0.0);
        // Values 2, 4, 4, 4, 5, 5, 7, 9: sample std dev = sqrt(32/7).
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sample_std_dev(&values) - (32.0f64 / 7.0).sqrt()).abs() < EPSILON);
    }

    #[test]
    fn test_confidence_interval_degenerate() {
        let ci = confidence_interval_95(&[0.42]);
        assert_eq!(ci.lower, 0.42);
        assert_eq!(ci.upper, 0.42);

        let ci = confidence_interval_95(&[]);
        assert_eq!(ci.lower, 0.0);
        assert_eq!(ci.upper, 0.0);
    }

    #[test]
    fn test_confidence_interval_two_samples() {
        let values = [0.4, 0.6];
        let ci = confidence_interval_95(&values);
        let expected_margin = 12.706 * sample_std_dev(&values) / 2.0f64.sqrt();
        assert!((ci.lower - (0.5 - expected_margin)).abs() < EPSILON);
        assert!((ci.upper - (0.5 + expected_margin)).abs() < EPSILON);
    }

    #[test]
    fn test_confidence_interval_large_n_uses_fixed_critical() {
        let values: Vec<f64> = (0..20).map(|i| i as f64 / 20.0).collect();
        let ci = confidence_interval_95(&values);
        let expected_margin = 2.262 * sample_std_dev(&values) / 20.0f64.sqrt();
        let m = mean(&values);
        assert!((ci.lower - (m - expected_margin)).abs() < EPSILON);
        assert!((ci.upper - (m + expected_margin)).abs() < EPSILON);
    }

    #[test]
    fn test_identical_values_give_point_interval() {
        let ci = confidence_interval_95(&[0.5, 0.5, 0.5]);
        assert!((ci.lower - 0.5).abs() < EPSILON);
        assert!((ci.upper - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_range_stats() {
        let r = range_stats(&[]);
        assert_eq!((r.min, r.max, r.range), (0.0, 0.0, 0.0));

        let r = range_stats(&[0.3, 0.9, 0.1, 0.5]);
        assert!((r.min - 0.1).abs() < EPSILON);
        assert!((r.max - 0.9).abs() < EPSILON);
        assert!((r.range - 0.8).abs() < EPSILON);
    }

    #[test]
    fn test_binarize() {
        assert_eq!(binarize_scores(&[0.4, 0.5, 0.9, 0.0], 0.5), vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_kappa_perfect_agreement() {
        // All rows unanimous, mixed labels across rows: P_e < 1, kappa = 1.
        let matrix = vec![vec![1, 1, 1], vec![0, 0, 0], vec![1, 1, 1]];
        let kappa = fleiss_kappa(&matrix).unwrap();
        assert!((kappa - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_kappa_all_cells_identical() {
        // P_e = 1; the division would be 0/0, defined as 1.
        let matrix = vec![vec![1, 1], vec![1, 1]];
        assert_eq!(fleiss_kappa(&matrix), Some(1.0));
    }

    #[test]
    fn test_kappa_known_value() {
        // Rows: [1,1], [0,0], [1,0]. P_1 = P_2 = 1, P_3 = 0, P̄ = 2/3.
        // p_ones = 0.5 so P_e = 0.5; kappa = (2/3 - 1/2)/(1/2) = 1/3.
        let matrix = vec![vec![1, 1], vec![0, 0], vec![1, 0]];
        let kappa = fleiss_kappa(&matrix).unwrap();
        assert!((kappa - 1.0 / 3.0).abs() < EPSILON);
    }

    #[test]
    fn test_kappa_rejects_bad_shapes() {
        assert_eq!(fleiss_kappa(&[]), None);
        assert_eq!(fleiss_kappa(&[vec![1]]), None);
        assert_eq!(fleiss_kappa(&[vec![1, 0], vec![1]]), None);
    }

    #[test]
    fn test_agreement_bands() {
        assert_eq!(AgreementBand::from_kappa(-0.2), AgreementBand::None);
        assert_eq!(AgreementBand::from_kappa(0.0), AgreementBand::Slight);
        assert_eq!(AgreementBand::from_kappa(0.20), AgreementBand::Slight);
        assert_eq!(AgreementBand::from_kappa(0.35), AgreementBand::Fair);
        assert_eq!(AgreementBand::from_kappa(0.55), AgreementBand::Moderate);
        assert_eq!(AgreementBand::from_kappa(0.75), AgreementBand::Substantial);
        assert_eq!(AgreementBand::from_kappa(0.95), AgreementBand::AlmostPerfect);
        assert_eq!(AgreementBand::from_kappa(1.0), AgreementBand::AlmostPerfect);
    }

    #[test]
    fn test_summarize_episodes() {
        let summary = summarize_episodes(&[0.6, 0.8, 0.7]);
        assert_eq!(summary.episodes, 3);
        assert!((summary.mean - 0.7).abs() < EPSILON);
        assert!(summary.std_dev > 0.0);
        assert!(summary.confidence_interval.lower < summary.mean);
        assert!(summary.confidence_interval.upper > summary.mean);
        assert!((summary.range.range - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_statistics_do_not_mutate_input() {
        let values = vec![0.1, 0.9, 0.5];
        let snapshot = values.clone();
        let _ = mean(&values);
        let _ = sample_std_dev(&values);
        let _ = confidence_interval_95(&values);
        let _ = range_stats(&values);
        assert_eq!(values, snapshot);
    }
}
