//! Subset constructor
//!
//! Greedy construction of data-complete feature subsets around a seed
//! feature. Candidates are tried in a fresh random order per subset and kept
//! only if the selected set stays at or above the completeness threshold, so
//! a feature rejected in one subset may still be accepted in the next.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::data::Dataset;
use crate::store::FeatureSetKey;
use crate::{Error, Result};

/// Feature names built around one seed, in selection order (seed first).
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSubset {
    features: Vec<String>,
    completeness: f64,
    target_size: usize,
}

impl CandidateSubset {
    /// Selected features, seed first.
    #[must_use]
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Seed feature the subset was built around.
    #[must_use]
    pub fn seed(&self) -> &str {
        &self.features[0]
    }

    /// Fraction of training rows complete across the whole subset.
    #[must_use]
    pub const fn completeness(&self) -> f64 {
        self.completeness
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Always false: a subset contains at least its seed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether construction stalled before reaching the requested size.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.features.len() < self.target_size
    }

    /// Canonical ranking-store key for this subset.
    ///
    /// # Errors
    ///
    /// Returns error if a feature name cannot be part of a key.
    pub fn key(&self) -> Result<FeatureSetKey> {
        FeatureSetKey::from_features(&self.features)
    }

    /// Consume into the feature list.
    #[must_use]
    pub fn into_features(self) -> Vec<String> {
        self.features
    }
}

/// Build `count` candidate subsets of up to `subset_size` features around
/// `seed_feature`.
///
/// Each subset starts as `{seed_feature}`; the remaining features are shuffled
/// and tried one at a time. A feature is accepted if the fraction of rows in
/// `training_data` complete across the selected features plus the candidate
/// stays at or above `completeness_threshold`. A subset that runs out of
/// acceptable features is returned short and logged at `warn`. A seed whose
/// own completeness is below the threshold yields no subsets, also logged at
/// `warn`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `seed_feature` is not a feature of
/// `training_data`, `subset_size` is zero, or the threshold is outside
/// `[0, 1]`; [`Error::Data`] if a listed feature is missing from the data.
pub fn build_subsets<S, R>(
    seed_feature: &str,
    count: usize,
    all_features: &[S],
    training_data: &Dataset,
    completeness_threshold: f64,
    subset_size: usize,
    rng: &mut R,
) -> Result<Vec<CandidateSubset>>
where
    S: AsRef<str>,
    R: Rng + ?Sized,
{
    if !training_data.has_feature(seed_feature) {
        return Err(Error::InvalidInput(format!(
            "seed feature `{seed_feature}` is not a column of the training data"
        )));
    }
    if subset_size == 0 {
        return Err(Error::InvalidInput("subset_size must be at least 1".to_string()));
    }
    if !(0.0..=1.0).contains(&completeness_threshold) {
        return Err(Error::InvalidInput(format!(
            "completeness_threshold must lie in [0, 1], got {completeness_threshold}"
        )));
    }

    let mut pool: Vec<&str> = all_features
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| *name != seed_feature)
        .collect();
    pool.sort_unstable();
    pool.dedup();

    let seed_completeness = training_data.complete_fraction(&[seed_feature])?;
    if seed_completeness < completeness_threshold {
        warn!(
            seed = seed_feature,
            completeness = seed_completeness,
            threshold = completeness_threshold,
            "seed feature alone is below the completeness threshold; no subsets built"
        );
        return Ok(Vec::new());
    }
    (0..count)
        .map(|_| {
            build_one(
                seed_feature,
                seed_completeness,
                &mut pool,
                training_data,
                completeness_threshold,
                subset_size,
                rng,
            )
        })
        .collect()
}

fn build_one<R: Rng + ?Sized>(
    seed_feature: &str,
    seed_completeness: f64,
    pool: &mut [&str],
    data: &Dataset,
    threshold: f64,
    subset_size: usize,
    rng: &mut R,
) -> Result<CandidateSubset> {
    let mut selected = vec![seed_feature.to_string()];
    let mut completeness = seed_completeness;

    pool.shuffle(rng);
    for &candidate in pool.iter() {
        if selected.len() >= subset_size {
            break;
        }
        selected.push(candidate.to_string());
        let fraction = data.complete_fraction(&selected)?;
        if fraction >= threshold {
            completeness = fraction;
        } else {
            selected.pop();
        }
    }

    if selected.len() < subset_size {
        warn!(
            seed = seed_feature,
            size = selected.len(),
            requested = subset_size,
            threshold,
            "subset construction stalled: no remaining feature keeps completeness above threshold"
        );
    } else {
        debug!(seed = seed_feature, features = ?selected, completeness, "subset built");
    }

    Ok(CandidateSubset {
        features: selected,
        completeness,
        target_size: subset_size,
    })
}
