//! Ranking store: one persistent record per feature subset
//!
//! **Problem**: training is noisy. Overwriting a stored result with every new
//! run lets one unlucky initialization throw away a good, already-serialized
//! model, and it loses track of how much effort each subset has received.
//!
//! **Solution**: every authoritative write goes through
//! [`RankingStore::merge_or_keep`], a compare-and-swap that replaces the stored
//! score and artifact only on strict improvement while counting the attempt
//! either way. Score answers "has this subset converged", the counter answers
//! "how much have we invested".
//!
//! Two backends share the same semantics:
//! - [`SqliteRankingStore`]: durable, bundled `SQLite` in WAL mode
//! - [`MemoryRankingStore`]: `DashMap`-backed, for tests and dry runs
//!
//! # Example
//!
//! ```rust
//! use subset_ensemble::hyperparams::HyperParameters;
//! use subset_ensemble::model::{Compression, Model, ModelArtifact, NeuralNetwork};
//! use subset_ensemble::store::{FeatureSetKey, MemoryRankingStore, MergeOutcome, RankingStore};
//!
//! # fn main() -> subset_ensemble::Result<()> {
//! let store = MemoryRankingStore::new();
//! let key = FeatureSetKey::from_features(["income", "age"])?;
//! let params = HyperParameters::builder().build()?;
//! let model = Model::Network(NeuralNetwork::build(2, &params, 7)?);
//! let artifact = ModelArtifact::encode(&model, Compression::Lz4)?;
//!
//! assert_eq!(store.merge_or_keep(&key, 0.62, &params, &artifact)?, MergeOutcome::Inserted);
//! assert_eq!(store.merge_or_keep(&key, 0.58, &params, &artifact)?, MergeOutcome::Kept);
//!
//! let record = store.get(&key)?.expect("record exists");
//! assert_eq!(record.composite_score(), Some(0.62));
//! assert_eq!(record.num_grid_searches_performed(), 2);
//! # Ok(())
//! # }
//! ```

mod memory;
mod record;
mod sqlite;

pub use memory::MemoryRankingStore;
pub use record::{FeatureSubsetRecord, FeatureSubsetRecordBuilder};
pub use sqlite::SqliteRankingStore;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hyperparams::HyperParameters;
use crate::model::ModelArtifact;
use crate::{Error, Result};

/// Separator between feature names inside a key.
pub const KEY_SEPARATOR: char = ',';

/// Order-independent identity of a feature subset.
///
/// Sorted, deduplicated feature names joined by [`KEY_SEPARATOR`]. Two subsets
/// with the same members in any order map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeatureSetKey(String);

impl FeatureSetKey {
    /// Build the canonical key for a set of feature names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the set is empty, or if a name is
    /// empty or contains the separator.
    pub fn from_features<I, S>(features: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in features {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(Error::InvalidInput("feature name cannot be empty".to_string()));
            }
            if name.contains(KEY_SEPARATOR) {
                return Err(Error::InvalidInput(format!(
                    "feature name `{name}` contains the key separator `{KEY_SEPARATOR}`"
                )));
            }
            names.push(name.to_string());
        }
        if names.is_empty() {
            return Err(Error::InvalidInput(
                "feature set key needs at least one feature".to_string(),
            ));
        }
        names.sort_unstable();
        names.dedup();
        Ok(Self(names.join(&KEY_SEPARATOR.to_string())))
    }

    /// Parse a key read back from storage, re-canonicalizing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the string holds no feature names.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_features(raw.split(KEY_SEPARATOR))
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Member feature names, sorted.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.0.split(KEY_SEPARATOR)
    }

    /// Number of member features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features().count()
    }

    /// Always false: a key has at least one feature.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Stable 64-bit fingerprint, used to derive per-subset training seeds.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        trueno::hash_key(self.as_str())
    }
}

impl fmt::Display for FeatureSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FeatureSetKey {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<FeatureSetKey> for String {
    fn from(key: FeatureSetKey) -> Self {
        key.0
    }
}

/// Result of a compare-and-swap merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// No record existed; the candidate was inserted
    Inserted,
    /// The candidate beat the stored record (or the record had no artifact)
    Replaced,
    /// The stored record was at least as good; only the counter moved
    Kept,
}

impl MergeOutcome {
    /// Whether the candidate's score and artifact were written.
    #[must_use]
    pub const fn is_win(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// Decide a merge given what is currently stored for the key.
///
/// `existing` is `None` when there is no row, otherwise the stored score and
/// whether an artifact is present.
pub(crate) fn decide_merge(existing: Option<(Option<f64>, bool)>, candidate: f64) -> MergeOutcome {
    match existing {
        None => MergeOutcome::Inserted,
        Some((_, false) | (None, _)) => MergeOutcome::Replaced,
        Some((Some(stored), true)) => {
            if candidate > stored {
                MergeOutcome::Replaced
            } else {
                MergeOutcome::Kept
            }
        }
    }
}

pub(crate) fn check_score(score: f64) -> Result<()> {
    if score.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("composite score must be finite, got {score}")))
    }
}

/// Persistent ranking of feature subsets.
///
/// All methods take `&self`; backends synchronize internally. A single
/// orchestrator per store is assumed: concurrent orchestrators against one
/// database file are not supported.
pub trait RankingStore: Send {
    /// Create the table if absent and add any missing columns. Idempotent and
    /// never destructive; safe to call on every start.
    ///
    /// # Errors
    ///
    /// Returns error if the schema cannot be created or migrated.
    fn ensure_schema(&self) -> Result<()>;

    /// Provisional write: set score, hyperparameters and timestamp
    /// unconditionally, inserting the record if absent. The counter and
    /// artifact are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a non-finite score, or a storage
    /// error if the write fails.
    fn upsert_score(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
    ) -> Result<()>;

    /// Authoritative compare-and-swap.
    ///
    /// The candidate wins if there is no record, the record has no artifact,
    /// or `score` is strictly greater than the stored score. The counter is
    /// incremented and the timestamp refreshed in every branch, atomically
    /// with the decision: a failed write changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a non-finite score, or a storage
    /// error if the transaction fails.
    fn merge_or_keep(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
        artifact: &ModelArtifact,
    ) -> Result<MergeOutcome>;

    /// The `k` highest-scoring records, best first. Ties are broken by key
    /// ascending; records without a score are excluded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `k` is zero, or a storage error.
    fn top_k(&self, k: usize) -> Result<Vec<FeatureSubsetRecord>>;

    /// Look up one record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    fn get(&self, key: &FeatureSetKey) -> Result<Option<FeatureSubsetRecord>>;

    /// Number of records, scored or not.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    fn len(&self) -> Result<usize>;

    /// Whether the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<S: RankingStore + Sync + ?Sized> RankingStore for std::sync::Arc<S> {
    fn ensure_schema(&self) -> Result<()> {
        (**self).ensure_schema()
    }

    fn upsert_score(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
    ) -> Result<()> {
        (**self).upsert_score(key, score, hyperparameters)
    }

    fn merge_or_keep(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
        artifact: &ModelArtifact,
    ) -> Result<MergeOutcome> {
        (**self).merge_or_keep(key, score, hyperparameters, artifact)
    }

    fn top_k(&self, k: usize) -> Result<Vec<FeatureSubsetRecord>> {
        (**self).top_k(k)
    }

    fn get(&self, key: &FeatureSetKey) -> Result<Option<FeatureSubsetRecord>> {
        (**self).get(key)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}
