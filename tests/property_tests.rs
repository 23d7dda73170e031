//! Property-based tests for the ranking store and the scorer
//!
//! - Store invariants hold on both backends: one record per key, counter +1
//!   per merge attempt, stored score is the running maximum
//! - Run with `ProptestConfig::with_cases(64)`

use std::collections::HashMap;

use ndarray::Array1;
use proptest::prelude::*;
use subset_ensemble::hyperparams::HyperParameters;
use subset_ensemble::model::ModelArtifact;
use subset_ensemble::scoring::{composite_score, evaluate};
use subset_ensemble::store::{
    FeatureSetKey, MemoryRankingStore, MergeOutcome, RankingStore, SqliteRankingStore,
};

// ============================================================================
// Strategies
// ============================================================================

const KEYS: [&[&str]; 4] = [&["a"], &["b", "a"], &["c"], &["a", "b", "c"]];

/// Merge attempts as (key index, score).
fn arb_merges() -> impl Strategy<Value = Vec<(usize, f64)>> {
    proptest::collection::vec((0..KEYS.len(), 0.0f64..=1.0), 1..40)
}

fn key(index: usize) -> FeatureSetKey {
    FeatureSetKey::from_features(KEYS[index]).unwrap()
}

/// Reference model of one key: (best score, artifact tag, attempts).
type Expected = HashMap<usize, (f64, usize, u64)>;

fn apply<S: RankingStore>(store: &S, merges: &[(usize, f64)]) -> Result<Expected, TestCaseError> {
    let params = HyperParameters::builder().build().unwrap();
    let mut expected: Expected = HashMap::new();

    for (tag, &(index, score)) in merges.iter().enumerate() {
        let artifact = ModelArtifact::from_bytes(tag.to_le_bytes().to_vec());
        let before = store.get(&key(index)).unwrap();
        let outcome = store.merge_or_keep(&key(index), score, &params, &artifact).unwrap();

        let entry = expected.entry(index).or_insert((f64::NEG_INFINITY, usize::MAX, 0));
        entry.2 += 1;
        if score > entry.0 {
            entry.0 = score;
            entry.1 = tag;
            prop_assert!(outcome.is_win());
        } else {
            prop_assert_eq!(outcome, MergeOutcome::Kept);
        }

        let after = store.get(&key(index)).unwrap().unwrap();
        let prior = before.map_or(0, |r| r.num_grid_searches_performed());
        prop_assert_eq!(after.num_grid_searches_performed(), prior + 1);
    }
    Ok(expected)
}

fn check<S: RankingStore>(store: &S, merges: &[(usize, f64)]) -> Result<(), TestCaseError> {
    let expected = apply(store, merges)?;

    // Uniqueness: one record per distinct key
    prop_assert_eq!(store.len().unwrap(), expected.len());

    for (&index, &(score, tag, attempts)) in &expected {
        let record = store.get(&key(index)).unwrap().unwrap();
        prop_assert_eq!(record.composite_score(), Some(score));
        prop_assert_eq!(record.num_grid_searches_performed(), attempts);
        let artifact = record.model_artifact().unwrap();
        let tag_bytes = tag.to_le_bytes();
        prop_assert_eq!(artifact.as_bytes(), tag_bytes.as_slice());
    }

    let ranked = store.top_k(KEYS.len()).unwrap();
    for pair in ranked.windows(2) {
        prop_assert!(pair[0].composite_score() >= pair[1].composite_score());
    }
    Ok(())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: memory store keeps uniqueness, counter and running maximum
    #[test]
    fn prop_memory_store_invariants(merges in arb_merges()) {
        check(&MemoryRankingStore::new(), &merges)?;
    }

    /// Property: SQLite store keeps uniqueness, counter and running maximum
    #[test]
    fn prop_sqlite_store_invariants(merges in arb_merges()) {
        let store = SqliteRankingStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        check(&store, &merges)?;
    }

    /// Property: both backends agree record for record
    #[test]
    fn prop_backends_agree(merges in arb_merges()) {
        let memory = MemoryRankingStore::new();
        let sqlite = SqliteRankingStore::open_in_memory().unwrap();
        sqlite.ensure_schema().unwrap();
        apply(&memory, &merges)?;
        apply(&sqlite, &merges)?;

        let left = memory.top_k(KEYS.len()).unwrap();
        let right = sqlite.top_k(KEYS.len()).unwrap();
        prop_assert_eq!(left.len(), right.len());
        for (l, r) in left.iter().zip(&right) {
            prop_assert_eq!(l.key(), r.key());
            prop_assert_eq!(l.composite_score(), r.composite_score());
            prop_assert_eq!(l.num_grid_searches_performed(), r.num_grid_searches_performed());
        }
    }

    /// Property: composite score stays in [0, 1]
    #[test]
    fn prop_composite_score_bounded(
        rows in proptest::collection::vec((0.0f64..=1.0, any::<bool>()), 1..200)
    ) {
        let probabilities: Array1<f64> = rows.iter().map(|&(p, _)| p).collect();
        let labels: Array1<f64> = rows.iter().map(|&(_, y)| if y { 1.0 } else { 0.0 }).collect();
        let score = composite_score(probabilities.view(), labels.view()).unwrap();
        prop_assert!((0.0..=1.0).contains(&score));

        let metrics = evaluate(probabilities.view(), labels.view()).unwrap();
        prop_assert!((metrics.composite_score - score).abs() < 1e-12);
        prop_assert!((0.0..=1.0).contains(&metrics.roc_auc));
        prop_assert!((0.0..=1.0).contains(&metrics.calibration_error));
    }
}
