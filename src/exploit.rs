//! Exploitation phase
//!
//! Spends additional training rounds on subsets already in the ranking store.
//! Each round asks the balancer which key to deepen, retrains it with a fresh
//! hyperparameter sample, and folds the result back with `merge_or_keep`, so
//! the balancer sees the new effort on its next call.

use tracing::{debug, info};

use crate::balancer::{select_with_reason, Group};
use crate::context::SearchContext;
use crate::error::skip_retryable;
use crate::store::{FeatureSetKey, MergeOutcome};
use crate::Result;

/// Result of one exploitation round.
#[derive(Debug, Clone, PartialEq)]
pub struct ExploitRound {
    /// Key the balancer chose
    pub key: FeatureSetKey,
    /// Group it was drawn from
    pub group: Group,
    /// Best score of this round's trials, `None` if the round failed
    pub score: Option<f64>,
    /// Merge decision, `None` if the round failed
    pub outcome: Option<MergeOutcome>,
}

impl ExploitRound {
    /// Whether the round produced a result.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Drives balancer-guided retraining over a [`SearchContext`].
pub struct Exploiter<'a> {
    ctx: &'a mut SearchContext,
}

impl<'a> Exploiter<'a> {
    /// Exploiter over `ctx`.
    pub fn new(ctx: &'a mut SearchContext) -> Self {
        Self { ctx }
    }

    /// Run up to `rounds` rounds. Stops early if the store has no scored
    /// record to select.
    ///
    /// A failed round is logged and reported without touching the store.
    ///
    /// # Errors
    ///
    /// Returns a storage error, or any non-retryable training error.
    pub fn deepen(&mut self, rounds: usize) -> Result<Vec<ExploitRound>> {
        let mut report = Vec::with_capacity(rounds);
        for round in 0..rounds {
            let config = self.ctx.config();
            let Some(selection) = select_with_reason(
                self.ctx.store(),
                config.top_n,
                config.top_k_pool,
                config.top_n_effort_fraction,
            )?
            else {
                info!(round, "nothing to exploit: store has no scored record");
                break;
            };
            debug!(
                round,
                key = %selection.key,
                group = ?selection.group,
                top_fraction = ?selection.top_fraction,
                "balancer selection"
            );
            report.push(self.retrain(selection.key, selection.group)?);
        }
        let wins = report
            .iter()
            .filter(|r| r.outcome.is_some_and(MergeOutcome::is_win))
            .count();
        info!(rounds = report.len(), wins, "exploitation finished");
        Ok(report)
    }

    fn retrain(&mut self, key: FeatureSetKey, group: Group) -> Result<ExploitRound> {
        let features: Vec<String> = key.features().map(str::to_string).collect();
        let plan = self.ctx.sample_plan(self.ctx.config().exploit_num_samples);
        let failed = |key| ExploitRound {
            key,
            group,
            score: None,
            outcome: None,
        };

        let Some(job) = skip_retryable(self.ctx.train_job(&features, plan), "exploit data")? else {
            return Ok(failed(key));
        };
        let Some(trained) = skip_retryable(self.ctx.launcher().train(job), "exploit")? else {
            return Ok(failed(key));
        };
        let outcome = self.ctx.store().merge_or_keep(
            &key,
            trained.score,
            &trained.hyperparameters,
            &trained.model_artifact,
        )?;
        info!(key = %key, score = trained.score, ?outcome, "exploitation round merged");
        Ok(ExploitRound {
            key,
            group,
            score: Some(trained.score),
            outcome: Some(outcome),
        })
    }
}
