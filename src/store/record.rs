//! Feature Subset Record - one ranked row per feature subset

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FeatureSetKey;
use crate::hyperparams::HyperParameters;
use crate::model::ModelArtifact;

/// Best known result for one feature subset, plus the effort spent on it.
///
/// `composite_score`, `hyperparameters` and `model_artifact` always describe
/// the same training run once an artifact is present; the counter grows with
/// every merge attempt regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSubsetRecord {
    key: FeatureSetKey,
    composite_score: Option<f64>,
    num_grid_searches_performed: u64,
    hyperparameters: Option<HyperParameters>,
    model_artifact: Option<ModelArtifact>,
    tier: i64,
    last_updated: Option<DateTime<Utc>>,
}

impl FeatureSubsetRecord {
    /// Create an empty record: no score, no artifact, zero effort.
    #[must_use]
    pub const fn new(key: FeatureSetKey) -> Self {
        Self {
            key,
            composite_score: None,
            num_grid_searches_performed: 0,
            hyperparameters: None,
            model_artifact: None,
            tier: 0,
            last_updated: None,
        }
    }

    /// Create a builder for a record with optional fields set.
    #[must_use]
    pub const fn builder(key: FeatureSetKey) -> FeatureSubsetRecordBuilder {
        FeatureSubsetRecordBuilder::new(key)
    }

    /// Get the feature-set key.
    #[must_use]
    pub const fn key(&self) -> &FeatureSetKey {
        &self.key
    }

    /// Best composite score ever recorded, if any.
    #[must_use]
    pub const fn composite_score(&self) -> Option<f64> {
        self.composite_score
    }

    /// Number of merge attempts against this key.
    #[must_use]
    pub const fn num_grid_searches_performed(&self) -> u64 {
        self.num_grid_searches_performed
    }

    /// Hyperparameters that produced the stored score.
    #[must_use]
    pub const fn hyperparameters(&self) -> Option<&HyperParameters> {
        self.hyperparameters.as_ref()
    }

    /// Serialized model that produced the stored score.
    #[must_use]
    pub const fn model_artifact(&self) -> Option<&ModelArtifact> {
        self.model_artifact.as_ref()
    }

    /// Priority bucket (reserved, default 0).
    #[must_use]
    pub const fn tier(&self) -> i64 {
        self.tier
    }

    /// Time of the last write to this record.
    #[must_use]
    pub const fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub(crate) fn set_provisional(
        &mut self,
        score: f64,
        hyperparameters: HyperParameters,
        at: DateTime<Utc>,
    ) {
        self.composite_score = Some(score);
        self.hyperparameters = Some(hyperparameters);
        self.last_updated = Some(at);
    }

    pub(crate) fn set_result(
        &mut self,
        score: f64,
        hyperparameters: HyperParameters,
        artifact: ModelArtifact,
    ) {
        self.composite_score = Some(score);
        self.hyperparameters = Some(hyperparameters);
        self.model_artifact = Some(artifact);
    }

    pub(crate) fn record_attempt(&mut self, at: DateTime<Utc>) {
        self.num_grid_searches_performed += 1;
        self.last_updated = Some(at);
    }
}

/// Builder for `FeatureSubsetRecord`.
#[derive(Debug)]
pub struct FeatureSubsetRecordBuilder {
    record: FeatureSubsetRecord,
}

impl FeatureSubsetRecordBuilder {
    /// Create a new builder for `key`.
    #[must_use]
    pub const fn new(key: FeatureSetKey) -> Self {
        Self {
            record: FeatureSubsetRecord::new(key),
        }
    }

    /// Set the composite score.
    #[must_use]
    pub const fn composite_score(mut self, score: f64) -> Self {
        self.record.composite_score = Some(score);
        self
    }

    /// Set the effort counter.
    #[must_use]
    pub const fn num_grid_searches_performed(mut self, n: u64) -> Self {
        self.record.num_grid_searches_performed = n;
        self
    }

    /// Set the hyperparameters.
    #[must_use]
    pub const fn hyperparameters(mut self, params: HyperParameters) -> Self {
        self.record.hyperparameters = Some(params);
        self
    }

    /// Set the model artifact.
    #[must_use]
    pub fn model_artifact(mut self, artifact: ModelArtifact) -> Self {
        self.record.model_artifact = Some(artifact);
        self
    }

    /// Set the tier.
    #[must_use]
    pub const fn tier(mut self, tier: i64) -> Self {
        self.record.tier = tier;
        self
    }

    /// Set the last-updated timestamp.
    #[must_use]
    pub const fn last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.record.last_updated = Some(at);
        self
    }

    /// Build the `FeatureSubsetRecord`.
    #[must_use]
    pub fn build(self) -> FeatureSubsetRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FeatureSetKey {
        FeatureSetKey::from_features(["a", "b"]).unwrap()
    }

    #[test]
    fn test_new_record_is_empty() {
        let record = FeatureSubsetRecord::new(key());
        assert_eq!(record.composite_score(), None);
        assert_eq!(record.num_grid_searches_performed(), 0);
        assert!(record.model_artifact().is_none());
        assert_eq!(record.tier(), 0);
        assert!(record.last_updated().is_none());
    }

    #[test]
    fn test_builder_sets_fields() {
        let now = Utc::now();
        let record = FeatureSubsetRecord::builder(key())
            .composite_score(0.7)
            .num_grid_searches_performed(3)
            .tier(2)
            .last_updated(now)
            .build();
        assert_eq!(record.composite_score(), Some(0.7));
        assert_eq!(record.num_grid_searches_performed(), 3);
        assert_eq!(record.tier(), 2);
        assert_eq!(record.last_updated(), Some(now));
    }

    #[test]
    fn test_record_attempt_increments() {
        let mut record = FeatureSubsetRecord::new(key());
        record.record_attempt(Utc::now());
        record.record_attempt(Utc::now());
        assert_eq!(record.num_grid_searches_performed(), 2);
        assert!(record.last_updated().is_some());
    }
}
