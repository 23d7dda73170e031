//! Composite scoring of binary classifiers
//!
//! **Problem**: ROC-AUC rewards ranking but ignores whether probabilities mean
//! anything; calibration error ignores ranking entirely.
//!
//! **Solution**: Harmonic mean of discrimination (ROC-AUC) and calibration
//! quality (1 − ECE). The harmonic mean collapses toward the weaker signal.
//!
//! All functions are pure and take probabilities and 0/1 labels of equal
//! length.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of equal-width bins used by the expected calibration error.
pub const CALIBRATION_BINS: usize = 10;

/// Decision threshold for the thresholded metrics (accuracy, precision, ...).
const DECISION_THRESHOLD: f64 = 0.5;

/// Full metric set reported once per growth-loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Fraction of correct thresholded predictions
    pub accuracy: f64,
    /// TP / (TP + FP), 0 when nothing is predicted positive
    pub precision: f64,
    /// TP / (TP + FN), 0 when there are no positives
    pub recall: f64,
    /// Harmonic mean of precision and recall
    pub f1: f64,
    /// Area under the ROC curve
    pub roc_auc: f64,
    /// Expected calibration error over [`CALIBRATION_BINS`] bins
    pub calibration_error: f64,
    /// Harmonic mean of ROC-AUC and 1 − ECE
    pub composite_score: f64,
}

fn validate(probabilities: ArrayView1<'_, f64>, labels: ArrayView1<'_, f64>) -> Result<()> {
    if probabilities.len() != labels.len() {
        return Err(Error::InvalidInput(format!(
            "probabilities ({}) and labels ({}) must have the same length",
            probabilities.len(),
            labels.len()
        )));
    }
    if probabilities.is_empty() {
        return Err(Error::InvalidInput(
            "cannot score an empty prediction set".to_string(),
        ));
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(Error::InvalidInput(
            "probabilities must be finite".to_string(),
        ));
    }
    Ok(())
}

/// Area under the ROC curve via the Mann-Whitney rank statistic.
///
/// Tied probabilities receive their average rank. A label set with a single
/// class has no defined discrimination and scores 0.5.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on length mismatch, empty input or
/// non-finite probabilities.
#[allow(clippy::cast_precision_loss)]
pub fn roc_auc(probabilities: ArrayView1<'_, f64>, labels: ArrayView1<'_, f64>) -> Result<f64> {
    validate(probabilities, labels)?;

    let n_pos = labels.iter().filter(|&&y| y > 0.5).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Ok(0.5);
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && probabilities[order[end]] == probabilities[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; the tie group [start, end) shares the mean rank.
        let average_rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            if labels[idx] > 0.5 {
                positive_rank_sum += average_rank;
            }
        }
        start = end;
    }

    let n_pos_f = n_pos as f64;
    let n_neg_f = n_neg as f64;
    Ok((positive_rank_sum - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg_f))
}

/// Expected calibration error over `n_bins` equal-width bins.
///
/// ECE = Σ (|Bᵢ| / n) · |acc(Bᵢ) − conf(Bᵢ)|
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on length mismatch, empty input or
/// non-finite probabilities.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn expected_calibration_error(
    probabilities: ArrayView1<'_, f64>,
    labels: ArrayView1<'_, f64>,
    n_bins: usize,
) -> Result<f64> {
    validate(probabilities, labels)?;

    let n_bins = n_bins.max(1);
    let bin_width = 1.0 / n_bins as f64;

    let mut confidence_sums = vec![0.0; n_bins];
    let mut positive_sums = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];

    for (&p, &y) in probabilities.iter().zip(labels.iter()) {
        let p = p.clamp(0.0, 1.0);
        let bin = ((p / bin_width) as usize).min(n_bins - 1);
        confidence_sums[bin] += p;
        positive_sums[bin] += y;
        counts[bin] += 1;
    }

    let n = probabilities.len() as f64;
    let ece = counts
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .map(|(bin, &count)| {
            let count = count as f64;
            let confidence = confidence_sums[bin] / count;
            let accuracy = positive_sums[bin] / count;
            (count / n) * (accuracy - confidence).abs()
        })
        .sum();

    Ok(ece)
}

/// Harmonic mean of ROC-AUC and calibration quality (1 − ECE).
///
/// Returns 0 unless both components are strictly positive.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on length mismatch, empty input or
/// non-finite probabilities.
///
/// # Example
///
/// ```rust
/// use ndarray::array;
/// use subset_ensemble::scoring::composite_score;
///
/// let probs = array![0.1, 0.2, 0.8, 0.9];
/// let labels = array![0.0, 0.0, 1.0, 1.0];
/// let score = composite_score(probs.view(), labels.view())?;
/// assert!(score > 0.8);
/// # Ok::<(), subset_ensemble::Error>(())
/// ```
pub fn composite_score(
    probabilities: ArrayView1<'_, f64>,
    labels: ArrayView1<'_, f64>,
) -> Result<f64> {
    let auc = roc_auc(probabilities, labels)?;
    let ece = expected_calibration_error(probabilities, labels, CALIBRATION_BINS)?;
    Ok(harmonic_composite(auc, 1.0 - ece))
}

fn harmonic_composite(auc: f64, calibration_quality: f64) -> f64 {
    if auc > 0.0 && calibration_quality > 0.0 {
        2.0 * auc * calibration_quality / (auc + calibration_quality)
    } else {
        0.0
    }
}

/// Compute every reported metric in one pass over the predictions.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on length mismatch, empty input or
/// non-finite probabilities.
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(
    probabilities: ArrayView1<'_, f64>,
    labels: ArrayView1<'_, f64>,
) -> Result<EvaluationMetrics> {
    let roc_auc = roc_auc(probabilities, labels)?;
    let calibration_error =
        expected_calibration_error(probabilities, labels, CALIBRATION_BINS)?;

    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (&p, &y) in probabilities.iter().zip(labels.iter()) {
        match (p >= DECISION_THRESHOLD, y > 0.5) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Ok(EvaluationMetrics {
        accuracy: ratio(tp + tn, probabilities.len()),
        precision,
        recall,
        f1,
        roc_auc,
        calibration_error,
        composite_score: harmonic_composite(roc_auc, 1.0 - calibration_error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let labels = array![0.0, 0.0, 1.0, 1.0];
        let perfect = array![0.1, 0.2, 0.8, 0.9];
        let inverted = array![0.9, 0.8, 0.2, 0.1];

        assert!((roc_auc(perfect.view(), labels.view()).unwrap() - 1.0).abs() < 1e-12);
        assert!(roc_auc(inverted.view(), labels.view()).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_ties_average() {
        let labels = array![0.0, 1.0];
        let tied = array![0.5, 0.5];
        assert!((roc_auc(tied.view(), labels.view()).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_single_class() {
        let labels = array![1.0, 1.0, 1.0];
        let probs = array![0.2, 0.6, 0.9];
        assert!((roc_auc(probs.view(), labels.view()).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ece_perfectly_calibrated_bin() {
        // Bin [0.5, 0.6): confidence 0.5, half positive -> zero error
        let probs = array![0.5, 0.5, 0.5, 0.5];
        let labels = array![1.0, 0.0, 1.0, 0.0];
        let ece = expected_calibration_error(probs.view(), labels.view(), 10).unwrap();
        assert!(ece.abs() < 1e-12);
    }

    #[test]
    fn test_ece_overconfident() {
        let probs = array![0.95, 0.95];
        let labels = array![0.0, 0.0];
        let ece = expected_calibration_error(probs.view(), labels.view(), 10).unwrap();
        assert!((ece - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_probability_one_lands_in_last_bin() {
        let probs = array![1.0];
        let labels = array![1.0];
        let ece = expected_calibration_error(probs.view(), labels.view(), 10).unwrap();
        assert!(ece.abs() < 1e-12);
    }

    #[test]
    fn test_composite_is_harmonic_mean() {
        assert!((harmonic_composite(1.0, 0.5) - 2.0 / 3.0).abs() < 1e-12);
        assert!(harmonic_composite(0.0, 0.9).abs() < f64::EPSILON);
        assert!(harmonic_composite(0.9, 0.0).abs() < f64::EPSILON);
        assert!(harmonic_composite(0.9, -0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_composite_penalizes_weaker_signal() {
        // Perfect ranking, terrible calibration
        let probs = array![0.51, 0.52, 0.98, 0.99];
        let labels = array![0.0, 0.0, 1.0, 1.0];
        let score = composite_score(probs.view(), labels.view()).unwrap();
        let auc = 1.0;
        let cal = 1.0
            - expected_calibration_error(probs.view(), labels.view(), CALIBRATION_BINS).unwrap();
        assert!(score < (auc + cal) / 2.0);
        assert!(score > cal);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let probs = array![0.1, 0.2];
        let labels = array![0.0];
        assert!(matches!(
            composite_score(probs.view(), labels.view()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_rejected() {
        let empty = ndarray::Array1::<f64>::zeros(0);
        assert!(composite_score(empty.view(), empty.view()).is_err());
    }

    #[test]
    fn test_nan_rejected() {
        let probs = array![f64::NAN, 0.2];
        let labels = array![0.0, 1.0];
        assert!(roc_auc(probs.view(), labels.view()).is_err());
    }

    #[test]
    fn test_evaluate_confusion_metrics() {
        let probs = array![0.9, 0.8, 0.3, 0.6, 0.1];
        let labels = array![1.0, 1.0, 1.0, 0.0, 0.0];
        let m = evaluate(probs.view(), labels.view()).unwrap();

        // tp=2, fp=1, tn=1, fn=1
        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
        let composite = composite_score(probs.view(), labels.view()).unwrap();
        assert!((m.composite_score - composite).abs() < 1e-12);
    }
}
