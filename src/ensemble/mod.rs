//! Ensemble growth loop
//!
//! **Problem**: a single sub-model only sees a handful of features. Retraining
//! one large model on every feature a good sub-model ever used throws away
//! what was already learned and needs rows complete over all of them.
//!
//! **Solution**: grow a working model one seed feature at a time. Each
//! iteration builds and trains candidate subsets around a seed, records every
//! result in the ranking store, and then challenges the working model with the
//! best stored sub-models: both are frozen, a small logistic head is fitted
//! over their outputs, and the concatenation replaces the working model only
//! if it scores strictly higher on the same held-out rows.
//!
//! ```text
//! Seed ──▶ TrainCandidates ──▶ SelectBest (no working model yet)
//!                          └─▶ Challenge  (later iterations)   ──▶ Commit
//! ```

mod history;
mod report;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use history::{IterationMetrics, IterationMetricsBuilder, MetricKey, MetricsHistory};
pub use report::{JsonReportSink, MemoryReportSink, ReportSink, BEST_MODEL_FILE, HISTORY_FILE};

use crate::context::SearchContext;
use crate::data::Dataset;
use crate::error::skip_retryable;
use crate::hyperparams::HyperParameters;
use crate::model::ModelArtifact;
use crate::scoring::{evaluate, EvaluationMetrics};
use crate::store::FeatureSetKey;
use crate::trainer::{SearchPlan, TrainOutcome};
use crate::Result;

/// Growth loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Build candidate subsets around the seed feature
    Seed,
    /// Train and record every candidate
    TrainCandidates,
    /// Adopt the best candidate as the first working model
    SelectBest,
    /// Try concatenations of stored sub-models onto the working model
    Challenge,
    /// Evaluate and report the working model
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seed => "seed",
            Self::TrainCandidates => "train_candidates",
            Self::SelectBest => "select_best",
            Self::Challenge => "challenge",
            Self::Commit => "commit",
        })
    }
}

/// The model the loop is growing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingModel {
    feature_subset: Vec<String>,
    model_artifact: ModelArtifact,
    best_score: f64,
}

impl WorkingModel {
    /// Working model over `feature_subset` (model input order).
    #[must_use]
    pub const fn new(
        feature_subset: Vec<String>,
        model_artifact: ModelArtifact,
        best_score: f64,
    ) -> Self {
        Self {
            feature_subset,
            model_artifact,
            best_score,
        }
    }

    /// Features consumed so far, in model input order.
    #[must_use]
    pub fn feature_subset(&self) -> &[String] {
        &self.feature_subset
    }

    /// Serialized model.
    #[must_use]
    pub const fn model_artifact(&self) -> &ModelArtifact {
        &self.model_artifact
    }

    /// Score that won the model its place.
    #[must_use]
    pub const fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Canonical key of the consumed features.
    ///
    /// # Errors
    ///
    /// Returns error if a feature name cannot be part of a key.
    pub fn key(&self) -> Result<FeatureSetKey> {
        FeatureSetKey::from_features(&self.feature_subset)
    }

    /// Whether `features` brings anything the model does not consume yet.
    #[must_use]
    pub fn is_extended_by<S: AsRef<str>>(&self, features: &[S]) -> bool {
        features
            .iter()
            .any(|f| !self.feature_subset.iter().any(|own| own == f.as_ref()))
    }

    /// Full metrics on the rows of `test` complete over the model's features.
    ///
    /// # Errors
    ///
    /// Returns error if the artifact cannot be decoded, no row is complete, or
    /// prediction fails.
    pub fn evaluate(&self, test: &Dataset) -> Result<EvaluationMetrics> {
        let model = self.model_artifact.decode()?;
        let data = test.labeled(&self.feature_subset)?;
        let probabilities = model.predict(data.x())?;
        evaluate(probabilities.view(), data.y().view())
    }
}

impl From<TrainOutcome> for WorkingModel {
    fn from(outcome: TrainOutcome) -> Self {
        Self::new(outcome.feature_subset, outcome.model_artifact, outcome.score)
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSummary {
    /// Zero-based iteration number
    pub iteration: u64,
    /// Seed feature of the iteration
    pub seed_feature: String,
    /// Candidate subsets built
    pub subsets: usize,
    /// Sub-models trained and recorded (candidates and challengers)
    pub trained: usize,
    /// Rounds skipped after a retryable failure
    pub failed_rounds: usize,
    /// Concatenations evaluated
    pub challenges: usize,
    /// Whether the working model changed
    pub replaced: bool,
    /// Committed metrics, if a working model exists
    pub committed: Option<EvaluationMetrics>,
}

impl IterationSummary {
    fn new(iteration: u64, seed_feature: &str) -> Self {
        Self {
            iteration,
            seed_feature: seed_feature.to_string(),
            subsets: 0,
            trained: 0,
            failed_rounds: 0,
            challenges: 0,
            replaced: false,
            committed: None,
        }
    }
}

/// Iterates Seed → TrainCandidates → SelectBest/Challenge → Commit over a
/// sequence of seed features.
///
/// # Example
///
/// ```no_run
/// use subset_ensemble::config::EngineConfig;
/// use subset_ensemble::context::SearchContext;
/// use subset_ensemble::ensemble::{GrowthLoop, JsonReportSink};
///
/// # fn main() -> subset_ensemble::Result<()> {
/// let config = EngineConfig::from_json_file("search.json")?;
/// let mut ctx = SearchContext::load_parquet(config, "train.parquet", "test.parquet")?;
/// let mut growth = GrowthLoop::new(JsonReportSink::new("reports")?);
/// let seeds = ctx.train().feature_names().to_vec();
/// growth.run(&mut ctx, seeds)?;
/// # Ok(())
/// # }
/// ```
pub struct GrowthLoop<K> {
    sink: K,
    working: Option<WorkingModel>,
    history: MetricsHistory,
    next_iteration: u64,
}

impl<K: ReportSink> GrowthLoop<K> {
    /// Fresh loop with no working model.
    #[must_use]
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            working: None,
            history: MetricsHistory::new(),
            next_iteration: 0,
        }
    }

    /// Resume growing an existing working model.
    #[must_use]
    pub fn with_working_model(sink: K, working: WorkingModel) -> Self {
        Self {
            working: Some(working),
            ..Self::new(sink)
        }
    }

    /// Current working model.
    #[must_use]
    pub const fn working_model(&self) -> Option<&WorkingModel> {
        self.working.as_ref()
    }

    /// Committed iterations.
    #[must_use]
    pub const fn history(&self) -> &MetricsHistory {
        &self.history
    }

    /// Report sink.
    #[must_use]
    pub const fn sink(&self) -> &K {
        &self.sink
    }

    /// Consume into working model, history and sink.
    #[must_use]
    pub fn into_parts(self) -> (Option<WorkingModel>, MetricsHistory, K) {
        (self.working, self.history, self.sink)
    }

    /// Run one iteration per seed, up to `max_iterations`.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, such as a store failure or an
    /// unknown seed feature. Retryable round failures and report failures are
    /// logged and skipped.
    pub fn run<I, S>(&mut self, ctx: &mut SearchContext, seeds: I) -> Result<Vec<IterationSummary>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cap = ctx.config().max_iterations;
        let summaries = seeds
            .into_iter()
            .take(cap)
            .map(|seed| self.step(ctx, seed.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        info!(
            iterations = summaries.len(),
            best = ?self.history.best_composite(),
            "growth loop finished"
        );
        Ok(summaries)
    }

    /// Run a single iteration around `seed_feature`.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn step(&mut self, ctx: &mut SearchContext, seed_feature: &str) -> Result<IterationSummary> {
        let iteration = self.next_iteration;
        self.next_iteration += 1;
        let mut summary = IterationSummary::new(iteration, seed_feature);
        info!(iteration, seed = seed_feature, "iteration started");

        debug!(iteration, phase = %Phase::Seed, "phase entered");
        let subsets = skip_retryable(ctx.build_subsets(seed_feature), "subset construction")?
            .unwrap_or_default();
        summary.subsets = subsets.len();

        debug!(iteration, phase = %Phase::TrainCandidates, "phase entered");
        let plan = ctx.sample_plan(ctx.config().num_samples);
        let mut best: Option<TrainOutcome> = None;
        for subset in &subsets {
            let Some(outcome) = train_and_record(ctx, subset.features(), plan.clone(), &mut summary)?
            else {
                continue;
            };
            if best.as_ref().map_or(true, |b| outcome.score > b.score) {
                best = Some(outcome);
            }
        }

        if self.working.is_none() {
            debug!(iteration, phase = %Phase::SelectBest, "phase entered");
            if let Some(best) = best {
                info!(iteration, score = best.score, features = ?best.feature_subset, "working model created");
                self.working = Some(best.into());
                summary.replaced = true;
            }
        } else {
            debug!(iteration, phase = %Phase::Challenge, "phase entered");
            self.challenge(ctx, &mut summary)?;
        }

        debug!(iteration, phase = %Phase::Commit, "phase entered");
        self.commit(ctx, &mut summary)?;
        Ok(summary)
    }

    fn challenge(&mut self, ctx: &mut SearchContext, summary: &mut IterationSummary) -> Result<()> {
        let Some(working) = self.working.as_ref() else {
            return Ok(());
        };
        let challengers: Vec<(Vec<String>, HyperParameters)> = ctx
            .store()
            .top_k(ctx.config().top_k_pool)?
            .into_iter()
            .filter_map(|record| {
                let hyperparameters = *record.hyperparameters()?;
                let features: Vec<String> = record.key().features().map(str::to_string).collect();
                working
                    .is_extended_by(&features)
                    .then_some((features, hyperparameters))
            })
            .take(ctx.config().challengers)
            .collect();

        for (features, hyperparameters) in challengers {
            let plan = SearchPlan::Fixed { hyperparameters };
            let Some(retrained) = train_and_record(ctx, &features, plan, summary)? else {
                continue;
            };
            let Some(working) = self.working.as_ref() else {
                return Ok(());
            };
            let job = ctx.concat_job(
                &working.model_artifact,
                &working.feature_subset,
                &retrained.model_artifact,
                &retrained.feature_subset,
            );
            let Some(job) = skip_retryable(job, "concatenation")? else {
                summary.failed_rounds += 1;
                continue;
            };
            let Some(candidate) =
                skip_retryable(ctx.launcher().concatenate(job), "concatenation")?
            else {
                summary.failed_rounds += 1;
                continue;
            };
            summary.challenges += 1;

            if candidate.candidate_score > candidate.baseline_score {
                info!(
                    candidate = candidate.candidate_score,
                    baseline = candidate.baseline_score,
                    features = ?candidate.feature_subset,
                    "working model replaced by concatenation"
                );
                self.working = Some(WorkingModel::new(
                    candidate.feature_subset,
                    candidate.model_artifact,
                    candidate.candidate_score,
                ));
                summary.replaced = true;
            } else {
                debug!(
                    candidate = candidate.candidate_score,
                    baseline = candidate.baseline_score,
                    "working model kept"
                );
            }
        }
        Ok(())
    }

    fn commit(&mut self, ctx: &SearchContext, summary: &mut IterationSummary) -> Result<()> {
        let Some(working) = self.working.as_ref() else {
            info!(iteration = summary.iteration, "nothing to commit: no working model yet");
            return Ok(());
        };
        let Some(metrics) = skip_retryable(working.evaluate(ctx.test()), "commit")? else {
            return Ok(());
        };

        let record = IterationMetrics::builder(
            summary.iteration,
            summary.seed_feature.clone(),
            working.feature_subset.clone(),
            metrics,
        )
        .replaced(summary.replaced)
        .build();
        self.history.push(record);
        if let Err(e) = self.sink.report(&self.history, &working.model_artifact) {
            warn!(
                iteration = summary.iteration,
                error = %e,
                "report not written; the next commit rewrites it"
            );
        }

        info!(
            iteration = summary.iteration,
            score = metrics.composite_score,
            roc_auc = metrics.roc_auc,
            features = working.feature_subset.len(),
            replaced = summary.replaced,
            "iteration committed"
        );
        summary.committed = Some(metrics);
        Ok(())
    }
}

/// Train one sub-model in isolation and record it with `merge_or_keep`.
///
/// Returns `None` if the round failed retryably; nothing is written then.
fn train_and_record(
    ctx: &mut SearchContext,
    features: &[String],
    plan: SearchPlan,
    summary: &mut IterationSummary,
) -> Result<Option<TrainOutcome>> {
    let Some(job) = skip_retryable(ctx.train_job(features, plan), "training data")? else {
        summary.failed_rounds += 1;
        return Ok(None);
    };
    let Some(outcome) = skip_retryable(ctx.launcher().train(job), "training")? else {
        summary.failed_rounds += 1;
        return Ok(None);
    };
    let key = FeatureSetKey::from_features(&outcome.feature_subset)?;
    let merged = ctx.store().merge_or_keep(
        &key,
        outcome.score,
        &outcome.hyperparameters,
        &outcome.model_artifact,
    )?;
    debug!(key = %key, score = outcome.score, ?merged, "sub-model recorded");
    summary.trained += 1;
    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{config, context, dataset};
    use crate::store::{MemoryRankingStore, RankingStore};
    use crate::trainer::{
        execute, ConcatOutcome, ThreadLauncher, WorkerLauncher, WorkerRequest, WorkerResponse,
    };
    use crate::Error;
    use std::sync::Arc;
    use std::time::Duration;

    /// Trains for real; answers every concatenation with a fixed verdict.
    struct RiggedLauncher {
        concat_wins: bool,
    }

    impl WorkerLauncher for RiggedLauncher {
        fn run(&self, request: WorkerRequest) -> Result<WorkerResponse> {
            match request {
                WorkerRequest::Concatenate(job) => {
                    let (candidate_score, baseline_score) =
                        if self.concat_wins { (0.9, 0.6) } else { (0.4, 0.6) };
                    Ok(WorkerResponse::Concatenated(ConcatOutcome {
                        candidate_score,
                        baseline_score,
                        model_artifact: job.addition,
                        feature_subset: job.union,
                    }))
                }
                train => Ok(execute(train)),
            }
        }
    }

    struct FailingLauncher;

    impl WorkerLauncher for FailingLauncher {
        fn run(&self, _request: WorkerRequest) -> Result<WorkerResponse> {
            Err(Error::WorkerFailed {
                status: "signal: 9".to_string(),
                stderr: "out of memory".to_string(),
            })
        }
    }

    fn rigged(concat_wins: bool, store: Arc<MemoryRankingStore>) -> SearchContext {
        let mut config = config();
        config.subset_size = 1;
        SearchContext::new(
            config,
            Box::new(store),
            Box::new(RiggedLauncher { concat_wins }),
            dataset(160, 0),
            dataset(80, 1000),
        )
        .unwrap()
    }

    #[test]
    fn test_first_iteration_selects_best_candidate() {
        let store = Arc::new(MemoryRankingStore::new());
        let mut ctx = rigged(false, Arc::clone(&store));
        let mut growth = GrowthLoop::new(MemoryReportSink::new());

        let summary = growth.step(&mut ctx, "x0").unwrap();
        assert_eq!(summary.subsets, 2);
        assert_eq!(summary.trained, 2);
        assert!(summary.replaced);
        assert_eq!(summary.challenges, 0);

        let working = growth.working_model().unwrap();
        assert_eq!(working.feature_subset(), ["x0"]);
        let record = store.get(&working.key().unwrap()).unwrap().unwrap();
        // both candidates share the key {x0}
        assert_eq!(record.num_grid_searches_performed(), 2);
        assert_eq!(record.composite_score(), Some(working.best_score()));
        assert_eq!(growth.sink().commits().len(), 1);
    }

    #[test]
    fn test_losing_concatenation_keeps_identical_artifact() {
        let store = Arc::new(MemoryRankingStore::new());
        let mut ctx = rigged(false, store);
        let mut growth = GrowthLoop::new(MemoryReportSink::new());
        growth.step(&mut ctx, "x0").unwrap();
        let before = growth.working_model().unwrap().clone();

        let summary = growth.step(&mut ctx, "x1").unwrap();
        assert!(summary.challenges >= 1);
        assert!(!summary.replaced);
        let after = growth.working_model().unwrap();
        assert_eq!(after.model_artifact().as_bytes(), before.model_artifact().as_bytes());
        assert_eq!(after, &before);
        assert_eq!(growth.history().len(), 2);
        assert!(!growth.history().records()[1].replaced());
    }

    #[test]
    fn test_winning_concatenation_replaces_working_model() {
        let store = Arc::new(MemoryRankingStore::new());
        let mut ctx = rigged(true, store);
        let mut growth = GrowthLoop::new(MemoryReportSink::new());
        growth.step(&mut ctx, "x0").unwrap();

        let summary = growth.step(&mut ctx, "x1").unwrap();
        assert!(summary.replaced);
        let working = growth.working_model().unwrap();
        assert_eq!(working.feature_subset(), ["x0", "x1"]);
        assert!((working.best_score() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_rounds_leave_store_untouched() {
        let store = Arc::new(MemoryRankingStore::new());
        let mut ctx = SearchContext::new(
            config(),
            Box::new(Arc::clone(&store)),
            Box::new(FailingLauncher),
            dataset(60, 0),
            dataset(30, 500),
        )
        .unwrap();
        let mut growth = GrowthLoop::new(MemoryReportSink::new());

        let summaries = growth.run(&mut ctx, ["x0", "x1"]).unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.trained == 0 && s.failed_rounds == s.subsets));
        assert!(store.is_empty().unwrap());
        assert!(growth.working_model().is_none());
        assert!(growth.sink().commits().is_empty());
    }

    /// Sink whose disk is always full.
    struct BrokenSink;

    impl ReportSink for BrokenSink {
        fn report(&mut self, _: &MetricsHistory, _: &ModelArtifact) -> Result<()> {
            Err(Error::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_report_failure_does_not_stop_run() {
        let store = Arc::new(MemoryRankingStore::new());
        let mut ctx = rigged(true, store);
        let mut growth = GrowthLoop::new(BrokenSink);

        let summaries = growth.run(&mut ctx, ["x0", "x1"]).unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.committed.is_some()));
        assert_eq!(growth.history().len(), 2);
        assert_eq!(growth.working_model().unwrap().feature_subset(), ["x0", "x1"]);
    }

    #[test]
    fn test_incomplete_seed_trains_nothing() {
        let store = Arc::new(MemoryRankingStore::new());
        let mut ctx = rigged(false, Arc::clone(&store));
        let mut growth = GrowthLoop::new(MemoryReportSink::new());

        // x3 is missing on a third of the rows, below the 0.9 threshold
        let summary = growth.step(&mut ctx, "x3").unwrap();
        assert_eq!(summary.subsets, 0);
        assert_eq!(summary.trained, 0);
        assert!(summary.committed.is_none());
        assert!(store.is_empty().unwrap());
        assert!(growth.working_model().is_none());
    }

    #[test]
    fn test_unknown_seed_aborts_run() {
        let mut ctx = context();
        let mut growth = GrowthLoop::new(MemoryReportSink::new());
        let err = growth.run(&mut ctx, ["missing"]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_run_respects_iteration_cap() {
        let mut config = config();
        config.max_iterations = 1;
        let mut ctx = SearchContext::new(
            config,
            Box::new(MemoryRankingStore::new()),
            Box::new(ThreadLauncher::new(Duration::from_secs(120))),
            dataset(120, 0),
            dataset(60, 700),
        )
        .unwrap();
        let mut growth = GrowthLoop::new(MemoryReportSink::new());
        let summaries = growth.run(&mut ctx, ["x0", "x1", "x2"]).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(growth.history().len(), 1);
    }

    #[test]
    fn test_working_model_extension_check() {
        let working = WorkingModel::new(
            vec!["a".into(), "b".into()],
            ModelArtifact::from_bytes(vec![0]),
            0.5,
        );
        assert!(!working.is_extended_by(&["b", "a"]));
        assert!(working.is_extended_by(&["a", "c"]));
        assert_eq!(working.key().unwrap().as_str(), "a,b");
    }

    #[test]
    fn test_resume_challenges_immediately() {
        let store = Arc::new(MemoryRankingStore::new());
        let mut ctx = rigged(false, store);
        let mut first = GrowthLoop::new(MemoryReportSink::new());
        first.step(&mut ctx, "x0").unwrap();
        let (working, _, _) = first.into_parts();

        let mut resumed = GrowthLoop::with_working_model(MemoryReportSink::new(), working.unwrap());
        let summary = resumed.step(&mut ctx, "x2").unwrap();
        assert!(summary.challenges >= 1);
        assert_eq!(summary.iteration, 0);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::TrainCandidates.to_string(), "train_candidates");
        assert_eq!(Phase::Commit.to_string(), "commit");
    }
}
