//! SMOTE class balancing for binary training slices

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Ordered float for BinaryHeap-based partial sort
#[derive(Debug, Clone, Copy)]
struct DistIdx(f64, usize);

impl PartialEq for DistIdx {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for DistIdx {}
impl PartialOrd for DistIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DistIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Synthetic Minority Over-sampling for 0/1 labels.
///
/// Synthetic minority rows are interpolated between a random minority row and
/// one of its `k` nearest minority neighbours until both classes have the
/// same count. Original rows come first in the output, unchanged.
#[derive(Debug, Clone, Copy)]
pub struct Smote {
    k_neighbors: usize,
    seed: u64,
}

impl Smote {
    /// Create a sampler with 5 neighbours.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            k_neighbors: 5,
            seed,
        }
    }

    /// Set number of neighbours (at least 1).
    #[must_use]
    pub fn with_k_neighbors(mut self, k: usize) -> Self {
        self.k_neighbors = k.max(1);
        self
    }

    fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(ai, bi)| (ai - bi).powi(2)).sum()
    }

    /// k nearest neighbours of `data[of]` within `data`, excluding itself.
    fn find_neighbors(&self, of: usize, data: &[Vec<f64>]) -> Vec<usize> {
        let mut heap: BinaryHeap<DistIdx> = BinaryHeap::with_capacity(self.k_neighbors + 1);
        for (i, d) in data.iter().enumerate() {
            if i == of {
                continue;
            }
            let dist = Self::squared_distance(&data[of], d);
            if heap.len() < self.k_neighbors {
                heap.push(DistIdx(dist, i));
            } else if let Some(&DistIdx(max_dist, _)) = heap.peek() {
                if dist < max_dist {
                    heap.pop();
                    heap.push(DistIdx(dist, i));
                }
            }
        }
        let mut neighbors: Vec<usize> = heap.into_iter().map(|DistIdx(_, i)| i).collect();
        neighbors.sort_unstable();
        neighbors
    }

    /// Balance the two classes. Inputs with a single class, or already
    /// balanced, are returned unchanged.
    #[must_use]
    pub fn fit_resample(&self, x: &Array2<f64>, y: &Array1<f64>) -> (Array2<f64>, Array1<f64>) {
        let positives: Vec<usize> = (0..y.len()).filter(|&i| y[i] > 0.5).collect();
        let negatives: Vec<usize> = (0..y.len()).filter(|&i| y[i] <= 0.5).collect();

        if positives.is_empty() || negatives.is_empty() || positives.len() == negatives.len() {
            return (x.clone(), y.clone());
        }

        let deficit = positives.len().abs_diff(negatives.len());
        let (minority, minority_label) = if positives.len() < negatives.len() {
            (positives, 1.0)
        } else {
            (negatives, 0.0)
        };

        let samples: Vec<Vec<f64>> = minority.iter().map(|&i| x.row(i).to_vec()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut synthetic: Vec<Vec<f64>> = Vec::with_capacity(deficit);

        while synthetic.len() < deficit {
            let idx = rng.gen_range(0..samples.len());
            let neighbors = self.find_neighbors(idx, &samples);
            let row = if neighbors.is_empty() {
                // Lone minority row: duplicate it.
                samples[idx].clone()
            } else {
                let neighbor = &samples[neighbors[rng.gen_range(0..neighbors.len())]];
                let gap: f64 = rng.gen();
                samples[idx]
                    .iter()
                    .zip(neighbor)
                    .map(|(&p, &n)| p + gap * (n - p))
                    .collect()
            };
            synthetic.push(row);
        }

        let n_original = x.nrows();
        let result_x = Array2::from_shape_fn((n_original + deficit, x.ncols()), |(i, j)| {
            if i < n_original {
                x[[i, j]]
            } else {
                synthetic[i - n_original][j]
            }
        });
        let mut labels = y.to_vec();
        labels.extend(std::iter::repeat(minority_label).take(deficit));

        (result_x, Array1::from_vec(labels))
    }
}
