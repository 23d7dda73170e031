//! Per-run search context
//!
//! Everything a run needs (configuration, ranking store, worker launcher,
//! train/test data, seeded RNG) lives in one [`SearchContext`] created at the
//! start of a run and passed to the growth loop and the exploiter. There is no
//! process-wide state.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::config::{EngineConfig, Isolation};
use crate::data::{Dataset, Smote};
use crate::model::ModelArtifact;
use crate::store::{FeatureSetKey, MemoryRankingStore, RankingStore, SqliteRankingStore};
use crate::subset::{self, CandidateSubset};
use crate::trainer::{
    ConcatJob, ProcessLauncher, SearchPlan, ThreadLauncher, TrainJob, WorkerLauncher,
};
use crate::{Error, Result};

/// Explicit state of one search run.
pub struct SearchContext {
    config: EngineConfig,
    store: Box<dyn RankingStore>,
    launcher: Box<dyn WorkerLauncher>,
    train: Dataset,
    test: Dataset,
    rng: StdRng,
}

impl SearchContext {
    /// Assemble a context from parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid config, [`Error::Data`] if the
    /// test data lacks a training feature, or a storage error if the schema
    /// cannot be ensured.
    pub fn new(
        config: EngineConfig,
        store: Box<dyn RankingStore>,
        launcher: Box<dyn WorkerLauncher>,
        train: Dataset,
        test: Dataset,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(missing) = train.feature_names().iter().find(|f| !test.has_feature(f)) {
            return Err(Error::Data(format!(
                "feature `{missing}` is in the training data but not the test data"
            )));
        }
        store.ensure_schema()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            store,
            launcher,
            train,
            test,
            rng,
        })
    }

    /// Build the store and launcher the config asks for.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened, the worker program cannot
    /// be located, or [`new`](Self::new) rejects the parts.
    pub fn from_config(config: EngineConfig, train: Dataset, test: Dataset) -> Result<Self> {
        config.validate()?;
        let store: Box<dyn RankingStore> = match &config.store_path {
            Some(path) => Box::new(SqliteRankingStore::open(path)?),
            None => Box::new(MemoryRankingStore::new()),
        };
        let launcher: Box<dyn WorkerLauncher> = match config.isolation {
            Isolation::Process => {
                let program = match &config.worker_program {
                    Some(path) => path.clone(),
                    None => ProcessLauncher::default_program()?,
                };
                Box::new(ProcessLauncher::new(program, config.worker_timeout())?)
            }
            Isolation::Thread => Box::new(ThreadLauncher::new(config.worker_timeout())),
        };
        if !config.isolation.kills_on_timeout() {
            warn!(
                timeout = ?config.worker_timeout(),
                "thread isolation: timed-out rounds are detached, not killed, and keep their CPU and memory"
            );
        }
        info!(
            isolation = ?config.isolation,
            store = ?config.store_path,
            features = train.feature_names().len(),
            train_rows = train.num_rows(),
            test_rows = test.num_rows(),
            "search context ready"
        );
        Self::new(config, store, launcher, train, test)
    }

    /// Load train and test Parquet files using the config's label column.
    ///
    /// # Errors
    ///
    /// Returns error if either file cannot be loaded, or see
    /// [`from_config`](Self::from_config).
    pub fn load_parquet(
        config: EngineConfig,
        train_path: impl AsRef<Path>,
        test_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let train = Dataset::load_parquet(train_path, &config.label_column)?;
        let test = Dataset::load_parquet(test_path, &config.label_column)?;
        Self::from_config(config, train, test)
    }

    /// Run configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ranking store.
    #[must_use]
    pub fn store(&self) -> &dyn RankingStore {
        self.store.as_ref()
    }

    /// Worker launcher.
    #[must_use]
    pub fn launcher(&self) -> &dyn WorkerLauncher {
        self.launcher.as_ref()
    }

    /// Training data.
    #[must_use]
    pub const fn train(&self) -> &Dataset {
        &self.train
    }

    /// Held-out data.
    #[must_use]
    pub const fn test(&self) -> &Dataset {
        &self.test
    }

    /// Run RNG.
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Next worker seed for `key`: a fresh draw from the run RNG mixed with
    /// the key's fingerprint.
    pub fn round_seed(&mut self, key: &FeatureSetKey) -> u64 {
        self.rng.gen::<u64>() ^ key.fingerprint()
    }

    /// Candidate subsets around `seed_feature`, drawn with the run RNG.
    ///
    /// # Errors
    ///
    /// See [`subset::build_subsets`](crate::subset::build_subsets).
    pub fn build_subsets(&mut self, seed_feature: &str) -> Result<Vec<CandidateSubset>> {
        subset::build_subsets(
            seed_feature,
            self.config.subsets_per_seed,
            self.train.feature_names(),
            &self.train,
            self.config.completeness_threshold,
            self.config.subset_size,
            &mut self.rng,
        )
    }

    /// Training round for `features` (model input order).
    ///
    /// Training rows are complete over `features` and class-balanced with
    /// SMOTE; test rows are complete over `features`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if a feature is missing or no row is complete.
    pub fn train_job(&mut self, features: &[String], plan: SearchPlan) -> Result<TrainJob> {
        let key = FeatureSetKey::from_features(features)?;
        let seed = self.round_seed(&key);
        let train = self.train.labeled(features)?.balanced(&Smote::new(seed));
        let test = self.test.labeled(features)?;
        Ok(TrainJob {
            train,
            test,
            feature_names: features.to_vec(),
            plan,
            seed,
            compression: self.config.compression,
        })
    }

    /// Sampling plan from the configured space.
    #[must_use]
    pub fn sample_plan(&self, num_samples: usize) -> SearchPlan {
        SearchPlan::Sample {
            space: self.config.hyperparameter_space.clone(),
            num_samples,
        }
    }

    /// Concatenation round folding `addition` into `base`.
    ///
    /// The union keeps `base_features` first, then any new features of
    /// `addition_features` in their order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] if no row is complete over the union.
    pub fn concat_job(
        &mut self,
        base: &ModelArtifact,
        base_features: &[String],
        addition: &ModelArtifact,
        addition_features: &[String],
    ) -> Result<ConcatJob> {
        let union = feature_union(base_features, addition_features);
        let key = FeatureSetKey::from_features(&union)?;
        let seed = self.round_seed(&key);
        let train = self.train.labeled(&union)?.balanced(&Smote::new(seed));
        let test = self.test.labeled(&union)?;
        Ok(ConcatJob {
            base: base.clone(),
            base_features: base_features.to_vec(),
            addition: addition.clone(),
            addition_features: addition_features.to_vec(),
            union,
            train,
            test,
            head: self.config.head,
            compression: self.config.compression,
        })
    }
}

/// `base` followed by the members of `addition` it lacks, order preserved.
#[must_use]
pub fn feature_union(base: &[String], addition: &[String]) -> Vec<String> {
    let mut union = base.to_vec();
    for name in addition {
        if !union.contains(name) {
            union.push(name.clone());
        }
    }
    union
}
