//! Metrics history - one record per committed iteration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::EvaluationMetrics;

/// Metrics of the working model as committed at the end of one iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationMetrics {
    iteration: u64,
    seed_feature: String,
    feature_subset: Vec<String>,
    replaced: bool,
    metrics: EvaluationMetrics,
    timestamp: DateTime<Utc>,
}

impl IterationMetrics {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(
        iteration: u64,
        seed_feature: impl Into<String>,
        feature_subset: Vec<String>,
        metrics: EvaluationMetrics,
    ) -> Self {
        Self::builder(iteration, seed_feature, feature_subset, metrics).build()
    }

    /// Builder with the required fields.
    #[must_use]
    pub fn builder(
        iteration: u64,
        seed_feature: impl Into<String>,
        feature_subset: Vec<String>,
        metrics: EvaluationMetrics,
    ) -> IterationMetricsBuilder {
        IterationMetricsBuilder {
            iteration,
            seed_feature: seed_feature.into(),
            feature_subset,
            replaced: false,
            metrics,
            timestamp: Utc::now(),
        }
    }

    /// Zero-based iteration number.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Seed feature of the iteration.
    #[must_use]
    pub fn seed_feature(&self) -> &str {
        &self.seed_feature
    }

    /// Working model's features, in model input order.
    #[must_use]
    pub fn feature_subset(&self) -> &[String] {
        &self.feature_subset
    }

    /// Whether the working model changed during the iteration.
    #[must_use]
    pub const fn replaced(&self) -> bool {
        self.replaced
    }

    /// Full evaluation of the working model.
    #[must_use]
    pub const fn metrics(&self) -> &EvaluationMetrics {
        &self.metrics
    }

    /// When the iteration was committed.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for [`IterationMetrics`].
#[derive(Debug)]
pub struct IterationMetricsBuilder {
    iteration: u64,
    seed_feature: String,
    feature_subset: Vec<String>,
    replaced: bool,
    metrics: EvaluationMetrics,
    timestamp: DateTime<Utc>,
}

impl IterationMetricsBuilder {
    /// Mark whether the working model changed.
    #[must_use]
    pub const fn replaced(mut self, replaced: bool) -> Self {
        self.replaced = replaced;
        self
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the record.
    #[must_use]
    pub fn build(self) -> IterationMetrics {
        IterationMetrics {
            iteration: self.iteration,
            seed_feature: self.seed_feature,
            feature_subset: self.feature_subset,
            replaced: self.replaced,
            metrics: self.metrics,
            timestamp: self.timestamp,
        }
    }
}

/// One field of [`EvaluationMetrics`], for time-series queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    /// Thresholded accuracy
    Accuracy,
    /// Thresholded precision
    Precision,
    /// Thresholded recall
    Recall,
    /// F1 score
    F1,
    /// Area under the ROC curve
    RocAuc,
    /// Expected calibration error
    CalibrationError,
    /// Composite score
    Composite,
}

impl MetricKey {
    /// Every key, in report order.
    pub const ALL: [Self; 7] = [
        Self::Accuracy,
        Self::Precision,
        Self::Recall,
        Self::F1,
        Self::RocAuc,
        Self::CalibrationError,
        Self::Composite,
    ];

    /// Field name as written to reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::RocAuc => "roc_auc",
            Self::CalibrationError => "calibration_error",
            Self::Composite => "composite_score",
        }
    }

    /// Read this field from `metrics`.
    #[must_use]
    pub const fn value(&self, metrics: &EvaluationMetrics) -> f64 {
        match self {
            Self::Accuracy => metrics.accuracy,
            Self::Precision => metrics.precision,
            Self::Recall => metrics.recall,
            Self::F1 => metrics.f1,
            Self::RocAuc => metrics.roc_auc,
            Self::CalibrationError => metrics.calibration_error,
            Self::Composite => metrics.composite_score,
        }
    }
}

/// Rolling history of committed iterations, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MetricsHistory {
    records: Vec<IterationMetrics>,
}

impl MetricsHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a committed iteration.
    pub fn push(&mut self, record: IterationMetrics) {
        self.records.push(record);
    }

    /// Number of committed iterations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[IterationMetrics] {
        &self.records
    }

    /// Most recent record.
    #[must_use]
    pub fn latest(&self) -> Option<&IterationMetrics> {
        self.records.last()
    }

    /// `(iteration, value)` pairs for one metric, ordered by iteration.
    #[must_use]
    pub fn series(&self, key: MetricKey) -> Vec<(u64, f64)> {
        let mut points: Vec<(u64, f64)> = self
            .records
            .iter()
            .map(|r| (r.iteration, key.value(&r.metrics)))
            .collect();
        points.sort_by_key(|&(iteration, _)| iteration);
        points
    }

    /// Highest committed composite score.
    #[must_use]
    pub fn best_composite(&self) -> Option<f64> {
        self.records
            .iter()
            .map(|r| r.metrics.composite_score)
            .max_by(f64::total_cmp)
    }
}
