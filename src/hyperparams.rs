//! Tagged hyperparameter record and its discrete search space
//!
//! Every recognized hyperparameter is a named field with a declared domain.
//! Values are checked when a record is built or deserialized, so an invalid
//! combination never reaches a training worker.

use rand::Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of tunable fields in [`HyperParameters`].
const DIMENSIONS: usize = 8;

/// One fully specified hyperparameter combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHyperParameters")]
pub struct HyperParameters {
    num_layers: usize,
    first_layer_width: usize,
    shrink_factor: f64,
    dropout: f64,
    weight_decay: f64,
    learning_rate: f64,
    epochs: usize,
    batch_size: usize,
}

/// Unchecked wire form; converted through [`HyperParameters::try_from`].
#[derive(Deserialize)]
struct RawHyperParameters {
    num_layers: usize,
    first_layer_width: usize,
    shrink_factor: f64,
    dropout: f64,
    weight_decay: f64,
    learning_rate: f64,
    epochs: usize,
    batch_size: usize,
}

impl TryFrom<RawHyperParameters> for HyperParameters {
    type Error = Error;

    fn try_from(raw: RawHyperParameters) -> Result<Self> {
        Self::builder()
            .num_layers(raw.num_layers)
            .first_layer_width(raw.first_layer_width)
            .shrink_factor(raw.shrink_factor)
            .dropout(raw.dropout)
            .weight_decay(raw.weight_decay)
            .learning_rate(raw.learning_rate)
            .epochs(raw.epochs)
            .batch_size(raw.batch_size)
            .build()
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> Error {
    Error::InvalidHyperParameter {
        name,
        reason: reason.into(),
    }
}

fn check_num_layers(v: usize) -> Result<usize> {
    if (1..=8).contains(&v) {
        Ok(v)
    } else {
        Err(invalid("num_layers", format!("{v} not in 1..=8")))
    }
}

fn check_width(v: usize) -> Result<usize> {
    if (1..=4096).contains(&v) {
        Ok(v)
    } else {
        Err(invalid("first_layer_width", format!("{v} not in 1..=4096")))
    }
}

fn check_shrink(v: f64) -> Result<f64> {
    if v > 0.0 && v <= 1.0 {
        Ok(v)
    } else {
        Err(invalid("shrink_factor", format!("{v} not in (0, 1]")))
    }
}

fn check_dropout(v: f64) -> Result<f64> {
    if (0.0..0.95).contains(&v) {
        Ok(v)
    } else {
        Err(invalid("dropout", format!("{v} not in [0, 0.95)")))
    }
}

fn check_weight_decay(v: f64) -> Result<f64> {
    if (0.0..1.0).contains(&v) {
        Ok(v)
    } else {
        Err(invalid("weight_decay", format!("{v} not in [0, 1)")))
    }
}

fn check_learning_rate(v: f64) -> Result<f64> {
    if v > 0.0 && v <= 1.0 {
        Ok(v)
    } else {
        Err(invalid("learning_rate", format!("{v} not in (0, 1]")))
    }
}

fn check_epochs(v: usize) -> Result<usize> {
    if (1..=100_000).contains(&v) {
        Ok(v)
    } else {
        Err(invalid("epochs", format!("{v} not in 1..=100000")))
    }
}

fn check_batch_size(v: usize) -> Result<usize> {
    if v >= 1 {
        Ok(v)
    } else {
        Err(invalid("batch_size", "must be at least 1"))
    }
}

impl HyperParameters {
    /// Create a builder pre-filled with a small, fast configuration.
    #[must_use]
    pub const fn builder() -> HyperParametersBuilder {
        HyperParametersBuilder {
            num_layers: 2,
            first_layer_width: 16,
            shrink_factor: 0.5,
            dropout: 0.0,
            weight_decay: 0.0,
            learning_rate: 0.05,
            epochs: 50,
            batch_size: 32,
        }
    }

    /// Number of hidden layers.
    #[must_use]
    pub const fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Width of the first hidden layer.
    #[must_use]
    pub const fn first_layer_width(&self) -> usize {
        self.first_layer_width
    }

    /// Multiplier applied to the width of each successive hidden layer.
    #[must_use]
    pub const fn shrink_factor(&self) -> f64 {
        self.shrink_factor
    }

    /// Dropout probability on hidden activations during training.
    #[must_use]
    pub const fn dropout(&self) -> f64 {
        self.dropout
    }

    /// L2 weight decay coefficient.
    #[must_use]
    pub const fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    /// SGD step size.
    #[must_use]
    pub const fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Passes over the training data.
    #[must_use]
    pub const fn epochs(&self) -> usize {
        self.epochs
    }

    /// Mini-batch size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Hidden layer widths implied by depth, first width and shrink factor.
    ///
    /// Each layer is at least one unit wide.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn hidden_widths(&self) -> Vec<usize> {
        let mut widths = Vec::with_capacity(self.num_layers);
        let mut width = self.first_layer_width as f64;
        for _ in 0..self.num_layers {
            widths.push((width.round() as usize).max(1));
            width *= self.shrink_factor;
        }
        widths
    }
}

/// Builder for [`HyperParameters`]; `build` validates every field.
#[derive(Debug, Clone, Copy)]
pub struct HyperParametersBuilder {
    num_layers: usize,
    first_layer_width: usize,
    shrink_factor: f64,
    dropout: f64,
    weight_decay: f64,
    learning_rate: f64,
    epochs: usize,
    batch_size: usize,
}

impl HyperParametersBuilder {
    /// Set the number of hidden layers.
    #[must_use]
    pub const fn num_layers(mut self, v: usize) -> Self {
        self.num_layers = v;
        self
    }

    /// Set the first hidden layer width.
    #[must_use]
    pub const fn first_layer_width(mut self, v: usize) -> Self {
        self.first_layer_width = v;
        self
    }

    /// Set the per-layer width multiplier.
    #[must_use]
    pub const fn shrink_factor(mut self, v: f64) -> Self {
        self.shrink_factor = v;
        self
    }

    /// Set the dropout probability.
    #[must_use]
    pub const fn dropout(mut self, v: f64) -> Self {
        self.dropout = v;
        self
    }

    /// Set the L2 weight decay.
    #[must_use]
    pub const fn weight_decay(mut self, v: f64) -> Self {
        self.weight_decay = v;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub const fn learning_rate(mut self, v: f64) -> Self {
        self.learning_rate = v;
        self
    }

    /// Set the number of epochs.
    #[must_use]
    pub const fn epochs(mut self, v: usize) -> Self {
        self.epochs = v;
        self
    }

    /// Set the mini-batch size.
    #[must_use]
    pub const fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHyperParameter`] naming the first field outside
    /// its domain.
    pub fn build(self) -> Result<HyperParameters> {
        Ok(HyperParameters {
            num_layers: check_num_layers(self.num_layers)?,
            first_layer_width: check_width(self.first_layer_width)?,
            shrink_factor: check_shrink(self.shrink_factor)?,
            dropout: check_dropout(self.dropout)?,
            weight_decay: check_weight_decay(self.weight_decay)?,
            learning_rate: check_learning_rate(self.learning_rate)?,
            epochs: check_epochs(self.epochs)?,
            batch_size: check_batch_size(self.batch_size)?,
        })
    }
}

/// Discrete search space: a list of candidate values per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameterSpace {
    /// Candidate hidden-layer counts
    pub num_layers: Vec<usize>,
    /// Candidate first-layer widths
    pub first_layer_width: Vec<usize>,
    /// Candidate shrink factors
    pub shrink_factor: Vec<f64>,
    /// Candidate dropout probabilities
    pub dropout: Vec<f64>,
    /// Candidate weight decays
    pub weight_decay: Vec<f64>,
    /// Candidate learning rates
    pub learning_rate: Vec<f64>,
    /// Candidate epoch counts
    pub epochs: Vec<usize>,
    /// Candidate batch sizes
    pub batch_size: Vec<usize>,
}

impl Default for HyperParameterSpace {
    fn default() -> Self {
        Self {
            num_layers: vec![1, 2, 3],
            first_layer_width: vec![8, 16, 32],
            shrink_factor: vec![0.5, 0.75],
            dropout: vec![0.0, 0.1, 0.2],
            weight_decay: vec![0.0, 1e-4, 1e-3],
            learning_rate: vec![0.01, 0.03, 0.1],
            epochs: vec![30, 60],
            batch_size: vec![32, 64],
        }
    }
}

impl HyperParameterSpace {
    /// Space containing exactly one combination.
    #[must_use]
    pub fn fixed(params: &HyperParameters) -> Self {
        Self {
            num_layers: vec![params.num_layers],
            first_layer_width: vec![params.first_layer_width],
            shrink_factor: vec![params.shrink_factor],
            dropout: vec![params.dropout],
            weight_decay: vec![params.weight_decay],
            learning_rate: vec![params.learning_rate],
            epochs: vec![params.epochs],
            batch_size: vec![params.batch_size],
        }
    }

    fn domain_sizes(&self) -> [usize; DIMENSIONS] {
        [
            self.num_layers.len(),
            self.first_layer_width.len(),
            self.shrink_factor.len(),
            self.dropout.len(),
            self.weight_decay.len(),
            self.learning_rate.len(),
            self.epochs.len(),
            self.batch_size.len(),
        ]
    }

    /// Number of distinct combinations (saturating).
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.domain_sizes()
            .iter()
            .fold(1usize, |acc, &n| acc.saturating_mul(n))
    }

    /// Check that every domain is non-empty and every value is valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHyperParameter`] for the first bad value, or
    /// [`Error::InvalidInput`] for an empty domain.
    pub fn validate(&self) -> Result<()> {
        if self.domain_sizes().contains(&0) {
            return Err(Error::InvalidInput(
                "every hyperparameter domain needs at least one value".to_string(),
            ));
        }
        self.num_layers.iter().try_for_each(|&v| check_num_layers(v).map(drop))?;
        self.first_layer_width.iter().try_for_each(|&v| check_width(v).map(drop))?;
        self.shrink_factor.iter().try_for_each(|&v| check_shrink(v).map(drop))?;
        self.dropout.iter().try_for_each(|&v| check_dropout(v).map(drop))?;
        self.weight_decay.iter().try_for_each(|&v| check_weight_decay(v).map(drop))?;
        self.learning_rate.iter().try_for_each(|&v| check_learning_rate(v).map(drop))?;
        self.epochs.iter().try_for_each(|&v| check_epochs(v).map(drop))?;
        self.batch_size.iter().try_for_each(|&v| check_batch_size(v).map(drop))?;
        Ok(())
    }

    fn combination(&self, idx: &[usize; DIMENSIONS]) -> Result<HyperParameters> {
        HyperParameters::builder()
            .num_layers(self.num_layers[idx[0]])
            .first_layer_width(self.first_layer_width[idx[1]])
            .shrink_factor(self.shrink_factor[idx[2]])
            .dropout(self.dropout[idx[3]])
            .weight_decay(self.weight_decay[idx[4]])
            .learning_rate(self.learning_rate[idx[5]])
            .epochs(self.epochs[idx[6]])
            .batch_size(self.batch_size[idx[7]])
            .build()
    }

    fn sample_indices<R: Rng + ?Sized>(&self, rng: &mut R) -> [usize; DIMENSIONS] {
        let sizes = self.domain_sizes();
        let mut idx = [0usize; DIMENSIONS];
        for (slot, &size) in idx.iter_mut().zip(sizes.iter()) {
            *slot = rng.gen_range(0..size);
        }
        idx
    }

    /// Draw one combination uniformly at random.
    ///
    /// # Errors
    ///
    /// Returns an error if the space is invalid.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<HyperParameters> {
        self.validate()?;
        let idx = self.sample_indices(rng);
        self.combination(&idx)
    }

    /// Draw `n` pairwise-distinct combinations by rejection sampling.
    ///
    /// Order follows the draw order, which is what breaks score ties later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `n` exceeds [`cardinality`](Self::cardinality),
    /// or an error if the space is invalid.
    pub fn sample_distinct<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<HyperParameters>> {
        self.validate()?;
        let cardinality = self.cardinality();
        if n > cardinality {
            return Err(Error::InvalidInput(format!(
                "requested {n} distinct hyperparameter samples from a space of {cardinality}"
            )));
        }

        let mut seen: FxHashSet<[usize; DIMENSIONS]> = FxHashSet::default();
        let mut samples = Vec::with_capacity(n);
        while samples.len() < n {
            let idx = self.sample_indices(rng);
            if seen.insert(idx) {
                samples.push(self.combination(&idx)?);
            }
        }
        Ok(samples)
    }
}
