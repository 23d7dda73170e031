//! Isolated trainer
//!
//! **Problem**: hundreds of sequential training rounds in one process let
//! whatever the model primitive accumulates (allocator fragmentation, caches,
//! leaked native state) build up until the orchestrator falls over. A hung
//! round would also block the whole search.
//!
//! **Solution**: every model fit runs behind a [`WorkerLauncher`]. A round is
//! one [`WorkerRequest`] in, one [`WorkerResponse`] out, with a bounded wait:
//!
//! - [`ProcessLauncher`]: a fresh `subset-worker` process per round, JSON over
//!   stdin/stdout, killed on timeout; memory goes back to the OS on exit
//! - [`ThreadLauncher`]: the same worker body on a dedicated thread; the model
//!   is an owned value dropped when the thread finishes
//!
//! A failed or timed-out round is an `Err` for the caller and leaves no trace
//! in the ranking store.

mod launcher;
pub mod worker;

pub use launcher::{ProcessLauncher, ThreadLauncher, WORKER_BINARY};

use ndarray::Axis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::LabeledData;
use crate::hyperparams::{HyperParameterSpace, HyperParameters};
use crate::model::{
    Compression, ConcatenatedModel, FrozenMember, HeadConfig, Model, ModelArtifact, NeuralNetwork,
};
use crate::scoring::composite_score;
use crate::{Error, Result};

/// How a training round chooses hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum SearchPlan {
    /// Draw `num_samples` distinct combinations from `space`
    Sample {
        /// Discrete search space
        space: HyperParameterSpace,
        /// Distinct combinations to try
        num_samples: usize,
    },
    /// Retrain one known combination
    Fixed {
        /// The combination to train
        hyperparameters: HyperParameters,
    },
}

/// One sub-model training round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainJob {
    /// Balanced complete-case training rows, columns in `feature_names` order
    pub train: LabeledData,
    /// Held-out rows used for scoring, same columns
    pub test: LabeledData,
    /// Column names of `train` and `test`
    pub feature_names: Vec<String>,
    /// Hyperparameter plan
    pub plan: SearchPlan,
    /// Seed for the worker's RNG
    pub seed: u64,
    /// Codec for the returned artifact
    #[serde(default)]
    pub compression: Compression,
}

/// Best result of a training round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    /// Composite score on the test rows
    pub score: f64,
    /// Hyperparameters of the best trial
    pub hyperparameters: HyperParameters,
    /// Serialized best model
    pub model_artifact: ModelArtifact,
    /// Features the model reads, in input order
    pub feature_subset: Vec<String>,
    /// Trials evaluated
    pub trials: usize,
}

/// One concatenation round: freeze two models, train a head over both.
///
/// `train` and `test` carry the columns of `union`; each member reads its own
/// features out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatJob {
    /// Current working model
    pub base: ModelArtifact,
    /// Features the working model reads, in its input order
    pub base_features: Vec<String>,
    /// Sub-model to fold in
    pub addition: ModelArtifact,
    /// Features the sub-model reads, in its input order
    pub addition_features: Vec<String>,
    /// Column names of `train` and `test`
    pub union: Vec<String>,
    /// Rows complete over the union, for fitting the head
    pub train: LabeledData,
    /// Held-out rows complete over the union
    pub test: LabeledData,
    /// Head schedule
    #[serde(default)]
    pub head: HeadConfig,
    /// Codec for the returned artifact
    #[serde(default)]
    pub compression: Compression,
}

/// Concatenation result, with both models scored on the same rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatOutcome {
    /// Composite score of the concatenation
    pub candidate_score: f64,
    /// Composite score of the unmodified base model on the same rows
    pub baseline_score: f64,
    /// Serialized concatenation
    pub model_artifact: ModelArtifact,
    /// Features the concatenation reads (the union)
    pub feature_subset: Vec<String>,
}

/// Message sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Train and score a sub-model
    Train(TrainJob),
    /// Train a concatenation head
    Concatenate(ConcatJob),
}

impl WorkerRequest {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Train(_) => "train",
            Self::Concatenate(_) => "concatenate",
        }
    }
}

/// Message returned by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// Training round finished
    Trained(TrainOutcome),
    /// Concatenation round finished
    Concatenated(ConcatOutcome),
    /// The job raised an error; the round produced nothing usable
    Failed {
        /// Error message from the worker
        message: String,
    },
}

impl WorkerResponse {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Trained(_) => "trained",
            Self::Concatenated(_) => "concatenated",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Runs worker requests behind an isolation boundary.
pub trait WorkerLauncher: Send + Sync {
    /// Run one request to completion or timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerFailed`] or [`Error::WorkerTimeout`] when the
    /// worker does not produce a response.
    fn run(&self, request: WorkerRequest) -> Result<WorkerResponse>;

    /// Run a training round.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if the job failed inside the worker, or any
    /// error from [`run`](Self::run).
    fn train(&self, job: TrainJob) -> Result<TrainOutcome> {
        match self.run(WorkerRequest::Train(job))? {
            WorkerResponse::Trained(outcome) => Ok(outcome),
            other => Err(unexpected(other, "trained")),
        }
    }

    /// Run a concatenation round.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if the job failed inside the worker, or any
    /// error from [`run`](Self::run).
    fn concatenate(&self, job: ConcatJob) -> Result<ConcatOutcome> {
        match self.run(WorkerRequest::Concatenate(job))? {
            WorkerResponse::Concatenated(outcome) => Ok(outcome),
            other => Err(unexpected(other, "concatenated")),
        }
    }
}

fn unexpected(response: WorkerResponse, expected: &str) -> Error {
    match response {
        WorkerResponse::Failed { message } => Error::Training(message),
        other => Error::WorkerFailed {
            status: "protocol".to_string(),
            stderr: format!("expected a `{expected}` response, got `{}`", other.kind()),
        },
    }
}

/// Worker body: dispatch a request and fold any error into
/// [`WorkerResponse::Failed`].
#[must_use]
pub fn execute(request: WorkerRequest) -> WorkerResponse {
    let kind = request.kind();
    let result = match request {
        WorkerRequest::Train(job) => train_subset(&job).map(WorkerResponse::Trained),
        WorkerRequest::Concatenate(job) => concatenate(&job).map(WorkerResponse::Concatenated),
    };
    result.unwrap_or_else(|e| {
        warn!(kind, error = %e, "worker job failed");
        WorkerResponse::Failed {
            message: e.to_string(),
        }
    })
}

fn check_columns(data: &LabeledData, names: &[String], what: &str) -> Result<()> {
    if data.num_features() == names.len() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{what} has {} columns for {} feature names",
            data.num_features(),
            names.len()
        )))
    }
}

/// Train and score one sub-model per hyperparameter draw; keep the best.
///
/// Draws are distinct (rejection sampling against a seen-set) and evaluated
/// in draw order; on equal scores the earlier draw wins. A failing trial
/// fails the whole round.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on shape mismatch, a zero sample count, or
/// a sample count above the space's cardinality; [`Error::Training`] if a fit
/// diverges.
pub fn train_subset(job: &TrainJob) -> Result<TrainOutcome> {
    check_columns(&job.train, &job.feature_names, "training data")?;
    check_columns(&job.test, &job.feature_names, "test data")?;
    if job.train.is_empty() || job.test.is_empty() {
        return Err(Error::Data("training round needs non-empty train and test rows".to_string()));
    }

    let mut rng = StdRng::seed_from_u64(job.seed);
    let candidates = match &job.plan {
        SearchPlan::Sample { space, num_samples } => {
            if *num_samples == 0 {
                return Err(Error::InvalidInput("num_samples must be at least 1".to_string()));
            }
            space.sample_distinct(*num_samples, &mut rng)?
        }
        SearchPlan::Fixed { hyperparameters } => vec![*hyperparameters],
    };

    let mut best: Option<(f64, HyperParameters, NeuralNetwork)> = None;
    for (trial, params) in candidates.iter().enumerate() {
        let model_seed: u64 = rng.gen();
        let mut net = NeuralNetwork::build(job.train.num_features(), params, model_seed)?;
        net.fit(job.train.x(), job.train.y(), params, model_seed)?;
        let probabilities = net.predict(job.test.x())?;
        let score = composite_score(probabilities.view(), job.test.y().view())?;
        debug!(trial, score, "trial scored");

        if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
            best = Some((score, *params, net));
        }
    }

    let (score, hyperparameters, net) = best.ok_or_else(|| {
        Error::Training("no hyperparameter trial was evaluated".to_string())
    })?;
    let model_artifact = ModelArtifact::encode(&Model::Network(net), job.compression)?;
    Ok(TrainOutcome {
        score,
        hyperparameters,
        model_artifact,
        feature_subset: job.feature_names.clone(),
        trials: candidates.len(),
    })
}

/// Positions of `features` within `union`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if a feature is not in the union.
pub fn column_indices(union: &[String], features: &[String]) -> Result<Vec<usize>> {
    features
        .iter()
        .map(|name| {
            union.iter().position(|u| u == name).ok_or_else(|| {
                Error::InvalidInput(format!("feature `{name}` is not part of the union"))
            })
        })
        .collect()
}

/// Freeze base and addition, fit a logistic head over both, and score the
/// result and the untouched base on the same held-out rows.
///
/// # Errors
///
/// Returns error if an artifact cannot be decoded, a feature is missing from
/// the union, shapes disagree, or the head diverges.
pub fn concatenate(job: &ConcatJob) -> Result<ConcatOutcome> {
    check_columns(&job.train, &job.union, "training data")?;
    check_columns(&job.test, &job.union, "test data")?;
    if job.train.is_empty() || job.test.is_empty() {
        return Err(Error::Data(
            "concatenation needs non-empty train and test rows over the union".to_string(),
        ));
    }

    let base = job.base.decode()?;
    let addition = job.addition.decode()?;
    let base_columns = column_indices(&job.union, &job.base_features)?;
    let addition_columns = column_indices(&job.union, &job.addition_features)?;

    let baseline = base.predict(&job.test.x().select(Axis(1), &base_columns))?;
    let baseline_score = composite_score(baseline.view(), job.test.y().view())?;

    let mut members = FrozenMember::flatten(base, base_columns)?;
    members.extend(FrozenMember::flatten(addition, addition_columns)?);
    let mut concat = ConcatenatedModel::new(job.union.len(), members)?;
    concat.fit_head(job.train.x(), job.train.y(), job.head)?;
    let probabilities = concat.predict(job.test.x())?;
    let candidate_score = composite_score(probabilities.view(), job.test.y().view())?;
    debug!(candidate_score, baseline_score, "concatenation scored");

    Ok(ConcatOutcome {
        candidate_score,
        baseline_score,
        model_artifact: ModelArtifact::encode(&Model::Concatenation(concat), job.compression)?,
        feature_subset: job.union.clone(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    /// Two informative features plus noise, labels from their sum.
    pub(crate) fn synthetic(n: usize, seed: u64) -> LabeledData {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Array2::zeros((n, 3));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let a: f64 = rng.gen_range(-1.0..1.0);
            let b: f64 = rng.gen_range(-1.0..1.0);
            x[[i, 0]] = a;
            x[[i, 1]] = b;
            x[[i, 2]] = rng.gen_range(-1.0..1.0);
            y[i] = if a + b > 0.0 { 1.0 } else { 0.0 };
        }
        LabeledData::new(x, y).unwrap()
    }

    pub(crate) fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    pub(crate) fn small_space() -> HyperParameterSpace {
        HyperParameterSpace {
            num_layers: vec![1],
            first_layer_width: vec![4, 8],
            shrink_factor: vec![0.5],
            dropout: vec![0.0],
            weight_decay: vec![0.0],
            learning_rate: vec![0.05, 0.1],
            epochs: vec![40],
            batch_size: vec![16],
        }
    }

    pub(crate) fn train_job(seed: u64) -> TrainJob {
        TrainJob {
            train: synthetic(120, seed),
            test: synthetic(60, seed + 1),
            feature_names: names(3),
            plan: SearchPlan::Sample {
                space: small_space(),
                num_samples: 2,
            },
            seed,
            compression: Compression::Lz4,
        }
    }

    #[test]
    fn test_train_subset_keeps_best_trial() {
        let outcome = train_subset(&train_job(1)).unwrap();
        assert_eq!(outcome.trials, 2);
        assert_eq!(outcome.feature_subset, names(3));
        assert!(outcome.score > 0.5, "score {}", outcome.score);
        let model = outcome.model_artifact.decode().unwrap();
        assert_eq!(model.input_dim(), 3);
    }

    #[test]
    fn test_train_subset_is_deterministic() {
        let a = train_subset(&train_job(7)).unwrap();
        let b = train_subset(&train_job(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fixed_plan_trains_once() {
        let mut job = train_job(2);
        let params = HyperParameters::builder().num_layers(1).first_layer_width(4).epochs(20).build().unwrap();
        job.plan = SearchPlan::Fixed { hyperparameters: params };
        let outcome = train_subset(&job).unwrap();
        assert_eq!(outcome.trials, 1);
        assert_eq!(outcome.hyperparameters, params);
    }

    #[test]
    fn test_oversized_sample_request_is_rejected() {
        let mut job = train_job(3);
        job.plan = SearchPlan::Sample {
            space: small_space(),
            num_samples: 5,
        };
        assert!(matches!(train_subset(&job), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_column_mismatch_is_rejected() {
        let mut job = train_job(4);
        job.feature_names.pop();
        assert!(train_subset(&job).is_err());
    }

    #[test]
    fn test_execute_folds_errors_into_failed() {
        let mut job = train_job(5);
        job.plan = SearchPlan::Sample {
            space: small_space(),
            num_samples: 0,
        };
        let response = execute(WorkerRequest::Train(job));
        assert!(matches!(response, WorkerResponse::Failed { .. }));
    }

    #[test]
    fn test_concatenate_scores_both_models() {
        let outcome = train_subset(&train_job(6)).unwrap();
        let job = ConcatJob {
            base: outcome.model_artifact.clone(),
            base_features: names(3),
            addition: outcome.model_artifact,
            addition_features: vec!["f0".to_string(), "f1".to_string(), "f2".to_string()],
            union: names(3),
            train: synthetic(120, 6),
            test: synthetic(60, 7),
            head: HeadConfig::default(),
            compression: Compression::Zstd,
        };
        let result = concatenate(&job).unwrap();
        assert_eq!(result.feature_subset, names(3));
        assert!(result.baseline_score > 0.0);
        let model = result.model_artifact.decode().unwrap();
        assert!(matches!(model, Model::Concatenation(_)));
    }

    #[test]
    fn test_repeated_concatenation_stays_decodable() {
        let single = train_subset(&train_job(10)).unwrap().model_artifact;
        let mut ensemble = single.clone();
        for round in 0..45 {
            let job = ConcatJob {
                base: ensemble,
                base_features: names(3),
                addition: single.clone(),
                addition_features: names(3),
                union: names(3),
                train: synthetic(60, 10),
                test: synthetic(30, 11),
                head: HeadConfig { epochs: 10, learning_rate: 0.5 },
                compression: Compression::Lz4,
            };
            ensemble = concatenate(&job).unwrap().model_artifact;

            let Model::Concatenation(concat) = ensemble.decode().unwrap() else {
                panic!("round {round} did not produce a concatenation");
            };
            assert_eq!(concat.members().len(), round + 2);
            assert!(concat.members().iter().all(|m| matches!(m.model(), Model::Network(_))));
        }
    }

    #[test]
    fn test_concatenate_rejects_feature_outside_union() {
        let outcome = train_subset(&train_job(8)).unwrap();
        let job = ConcatJob {
            base: outcome.model_artifact.clone(),
            base_features: names(3),
            addition: outcome.model_artifact,
            addition_features: vec!["zzz".to_string(), "f1".to_string(), "f2".to_string()],
            union: names(3),
            train: synthetic(40, 8),
            test: synthetic(20, 9),
            head: HeadConfig::default(),
            compression: Compression::Lz4,
        };
        assert!(concatenate(&job).is_err());
    }

    #[test]
    fn test_column_indices() {
        let union = names(4);
        assert_eq!(column_indices(&union, &["f3".to_string(), "f0".to_string()]).unwrap(), vec![3, 0]);
        assert!(column_indices(&union, &["x".to_string()]).is_err());
    }

    #[test]
    fn test_request_round_trips_through_json() {
        let request = WorkerRequest::Train(train_job(9));
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"request\":\"train\""));
        let back: WorkerRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }
}
