//! In-memory ranking store using `DashMap`.
//!
//! Same merge semantics as the `SQLite` backend; data is lost on process
//! restart.

use std::cmp::Reverse;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{
    check_score, decide_merge, FeatureSetKey, FeatureSubsetRecord, MergeOutcome, RankingStore,
};
use crate::hyperparams::HyperParameters;
use crate::model::ModelArtifact;
use crate::topk::{select_top_k, SortOrder, TotalF64};
use crate::Result;

/// Non-durable ranking store.
///
/// Each merge runs under the shard lock of its key, so the decision and the
/// counter update are atomic with respect to other callers.
pub struct MemoryRankingStore {
    records: DashMap<FeatureSetKey, FeatureSubsetRecord>,
}

impl MemoryRankingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Create with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: DashMap::with_capacity(capacity),
        }
    }

    /// Seed the store with existing records (replacing any with the same key).
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = FeatureSubsetRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.records.insert(record.key().clone(), record);
        }
        store
    }

    /// Snapshot of every record, in no particular order.
    #[must_use]
    pub fn records(&self) -> Vec<FeatureSubsetRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

impl Default for MemoryRankingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RankingStore for MemoryRankingStore {
    fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    fn upsert_score(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
    ) -> Result<()> {
        check_score(score)?;
        self.records
            .entry(key.clone())
            .or_insert_with(|| FeatureSubsetRecord::new(key.clone()))
            .set_provisional(score, *hyperparameters, Utc::now());
        Ok(())
    }

    fn merge_or_keep(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
        artifact: &ModelArtifact,
    ) -> Result<MergeOutcome> {
        check_score(score)?;
        let now = Utc::now();
        let outcome = match self.records.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                let outcome = decide_merge(
                    Some((record.composite_score(), record.model_artifact().is_some())),
                    score,
                );
                if outcome.is_win() {
                    record.set_result(score, *hyperparameters, artifact.clone());
                }
                record.record_attempt(now);
                outcome
            }
            Entry::Vacant(entry) => {
                let mut record = FeatureSubsetRecord::new(key.clone());
                record.set_result(score, *hyperparameters, artifact.clone());
                record.record_attempt(now);
                entry.insert(record);
                MergeOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    fn top_k(&self, k: usize) -> Result<Vec<FeatureSubsetRecord>> {
        let scored = self
            .records
            .iter()
            .filter(|r| r.value().composite_score().is_some())
            .map(|r| r.value().clone());
        select_top_k(scored, k, SortOrder::Descending, |record| {
            (
                TotalF64(record.composite_score().unwrap_or(f64::NEG_INFINITY)),
                Reverse(record.key().clone()),
            )
        })
    }

    fn get(&self, key: &FeatureSetKey) -> Result<Option<FeatureSubsetRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Compression, Model, NeuralNetwork};

    fn key(names: &[&str]) -> FeatureSetKey {
        FeatureSetKey::from_features(names).unwrap()
    }

    fn params() -> HyperParameters {
        HyperParameters::builder().num_layers(1).first_layer_width(4).build().unwrap()
    }

    fn artifact(seed: u64) -> ModelArtifact {
        let model = Model::Network(NeuralNetwork::build(2, &params(), seed).unwrap());
        ModelArtifact::encode(&model, Compression::Lz4).unwrap()
    }

    #[test]
    fn test_merge_keeps_better_score() {
        let store = MemoryRankingStore::new();
        let k = key(&["a", "b"]);
        let first = artifact(1);

        assert_eq!(store.merge_or_keep(&k, 0.62, &params(), &first).unwrap(), MergeOutcome::Inserted);
        assert_eq!(store.merge_or_keep(&k, 0.58, &params(), &artifact(2)).unwrap(), MergeOutcome::Kept);

        let record = store.get(&k).unwrap().unwrap();
        assert_eq!(record.composite_score(), Some(0.62));
        assert_eq!(record.num_grid_searches_performed(), 2);
        assert_eq!(record.model_artifact(), Some(&first));
    }

    #[test]
    fn test_merge_replaces_on_strict_improvement() {
        let store = MemoryRankingStore::new();
        let k = key(&["a"]);
        store.merge_or_keep(&k, 0.5, &params(), &artifact(1)).unwrap();
        assert_eq!(store.merge_or_keep(&k, 0.5, &params(), &artifact(2)).unwrap(), MergeOutcome::Kept);
        assert_eq!(store.merge_or_keep(&k, 0.51, &params(), &artifact(3)).unwrap(), MergeOutcome::Replaced);

        let record = store.get(&k).unwrap().unwrap();
        assert_eq!(record.model_artifact(), Some(&artifact(3)));
        assert_eq!(record.num_grid_searches_performed(), 3);
    }

    #[test]
    fn test_upsert_leaves_counter_and_artifact() {
        let store = MemoryRankingStore::new();
        let k = key(&["a"]);
        store.upsert_score(&k, 0.9, &params()).unwrap();
        let record = store.get(&k).unwrap().unwrap();
        assert_eq!(record.num_grid_searches_performed(), 0);
        assert!(record.model_artifact().is_none());

        // A record without an artifact loses to any candidate
        assert_eq!(store.merge_or_keep(&k, 0.1, &params(), &artifact(1)).unwrap(), MergeOutcome::Replaced);
        assert_eq!(store.get(&k).unwrap().unwrap().composite_score(), Some(0.1));
    }

    #[test]
    fn test_non_finite_score_rejected_without_side_effects() {
        let store = MemoryRankingStore::new();
        let k = key(&["a"]);
        assert!(store.merge_or_keep(&k, f64::NAN, &params(), &artifact(1)).is_err());
        assert!(store.upsert_score(&k, f64::INFINITY, &params()).is_err());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_top_k_orders_and_breaks_ties_by_key() {
        let store = MemoryRankingStore::new();
        store.merge_or_keep(&key(&["c"]), 0.7, &params(), &artifact(1)).unwrap();
        store.merge_or_keep(&key(&["b"]), 0.7, &params(), &artifact(1)).unwrap();
        store.merge_or_keep(&key(&["a"]), 0.9, &params(), &artifact(1)).unwrap();
        store.merge_or_keep(&key(&["d"]), 0.1, &params(), &artifact(1)).unwrap();

        let top: Vec<String> = store
            .top_k(3)
            .unwrap()
            .iter()
            .map(|r| r.key().to_string())
            .collect();
        assert_eq!(top, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_top_k_zero_is_error() {
        assert!(MemoryRankingStore::new().top_k(0).is_err());
    }

    #[test]
    fn test_with_records_seeds_store() {
        let record = FeatureSubsetRecord::builder(key(&["x"]))
            .composite_score(0.4)
            .num_grid_searches_performed(7)
            .build();
        let store = MemoryRankingStore::with_records([record.clone()]);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get(&key(&["x"])).unwrap(), Some(record));
        assert_eq!(store.records().len(), 1);
    }
}
