//! Candidate selection balancer
//!
//! **Problem**: the exploitation phase has to split its training budget
//! between deepening the best subsets and revisiting the long tail. A fixed
//! schedule drifts as scores change rank.
//!
//! **Solution**: a proportional-fairness rule re-evaluated on every call. The
//! top `top_n` records of a `top_k_pool` window form the elite group; if the
//! elite group's share of recorded effort is below the target fraction, its
//! least-searched member is picked, otherwise the least-searched member of the
//! rest. Feeding results back through the ranking store keeps the effort
//! ratio near the target.

use tracing::debug;

use crate::store::{FeatureSetKey, FeatureSubsetRecord, RankingStore};
use crate::{Error, Result};

/// Which group a selection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// Rank `1..=top_n`
    Top,
    /// Rank `top_n+1..=top_k_pool`
    Rest,
}

/// A balancer decision, with the numbers that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Key to train next
    pub key: FeatureSetKey,
    /// Group the key was drawn from
    pub group: Group,
    /// Elite share of effort before this selection (`None` on cold start)
    pub top_fraction: Option<f64>,
}

/// Pick the next feature subset to deepen.
///
/// Returns `None` when the store holds no scored record.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `top_k_pool` is zero or the fraction is
/// outside `[0, 1]`, or a storage error if the pool cannot be read.
pub fn select_next<S: RankingStore + ?Sized>(
    store: &S,
    top_n: usize,
    top_k_pool: usize,
    top_n_effort_fraction: f64,
) -> Result<Option<FeatureSetKey>> {
    Ok(select_with_reason(store, top_n, top_k_pool, top_n_effort_fraction)?.map(|s| s.key))
}

/// Same as [`select_next`], also reporting which group was chosen and why.
///
/// # Errors
///
/// See [`select_next`].
pub fn select_with_reason<S: RankingStore + ?Sized>(
    store: &S,
    top_n: usize,
    top_k_pool: usize,
    top_n_effort_fraction: f64,
) -> Result<Option<Selection>> {
    if !(0.0..=1.0).contains(&top_n_effort_fraction) {
        return Err(Error::InvalidInput(format!(
            "top_n_effort_fraction must lie in [0, 1], got {top_n_effort_fraction}"
        )));
    }
    let pool = store.top_k(top_k_pool)?;
    Ok(choose(&pool, top_n, top_n_effort_fraction))
}

/// Pure selection rule over a ranked pool (best first).
#[allow(clippy::cast_precision_loss)]
fn choose(pool: &[FeatureSubsetRecord], top_n: usize, target: f64) -> Option<Selection> {
    let first = pool.first()?;
    let split = top_n.min(pool.len());
    let (top, rest) = pool.split_at(split);

    let effort = |group: &[FeatureSubsetRecord]| -> u64 {
        group.iter().map(FeatureSubsetRecord::num_grid_searches_performed).sum()
    };
    let total = effort(pool);
    if total == 0 {
        debug!(key = %first.key(), "cold start: deepening the best record");
        return Some(Selection {
            key: first.key().clone(),
            group: if split > 0 { Group::Top } else { Group::Rest },
            top_fraction: None,
        });
    }

    let top_fraction = effort(top) as f64 / total as f64;
    let (preferred, fallback) = if top_fraction < target {
        ((top, Group::Top), (rest, Group::Rest))
    } else {
        ((rest, Group::Rest), (top, Group::Top))
    };
    let (group, label) = if preferred.0.is_empty() { fallback } else { preferred };

    let chosen = least_searched(group)?;
    debug!(
        key = %chosen.key(),
        ?label,
        top_fraction,
        searches = chosen.num_grid_searches_performed(),
        "balancer selection"
    );
    Some(Selection {
        key: chosen.key().clone(),
        group: label,
        top_fraction: Some(top_fraction),
    })
}

/// Fewest searches wins; on a tie the better-ranked (earlier) record wins.
fn least_searched(group: &[FeatureSubsetRecord]) -> Option<&FeatureSubsetRecord> {
    group
        .iter()
        .enumerate()
        .min_by_key(|(rank, record)| (record.num_grid_searches_performed(), *rank))
        .map(|(_, record)| record)
}
