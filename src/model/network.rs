//! Feedforward binary classifier (multi-layer perceptron)
//!
//! ReLU hidden layers shrinking by a constant factor, sigmoid output,
//! mini-batch SGD on binary cross-entropy with inverted dropout and L2 weight
//! decay. Inputs are standardized with statistics captured at fit time and
//! stored alongside the weights.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::sigmoid;
use crate::hyperparams::HyperParameters;
use crate::{Error, Result};

/// Shape of the network; everything needed to rebuild it except weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    /// Number of input features
    pub input_dim: usize,
    /// Hidden layer widths, first to last
    pub hidden: Vec<usize>,
    /// Dropout probability applied to hidden activations while training
    pub dropout: f64,
}

/// One fully connected layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// Trainable MLP with a single probability output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetwork {
    architecture: Architecture,
    layers: Vec<DenseLayer>,
    feature_mean: Array1<f64>,
    feature_scale: Array1<f64>,
}

impl NeuralNetwork {
    /// Build an untrained network for `input_dim` features.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `input_dim` is zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn build(input_dim: usize, params: &HyperParameters, seed: u64) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidInput(
                "network needs at least one input feature".to_string(),
            ));
        }

        let architecture = Architecture {
            input_dim,
            hidden: params.hidden_widths(),
            dropout: params.dropout(),
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut sizes = vec![input_dim];
        sizes.extend(&architecture.hidden);
        sizes.push(1);

        let layers = sizes
            .windows(2)
            .map(|pair| {
                let (n_in, n_out) = (pair[0], pair[1]);
                // Xavier/Glorot uniform
                let scale = (6.0 / (n_in + n_out) as f64).sqrt();
                DenseLayer {
                    weights: Array2::from_shape_fn((n_in, n_out), |_| {
                        rng.gen::<f64>().mul_add(2.0 * scale, -scale)
                    }),
                    bias: Array1::zeros(n_out),
                }
            })
            .collect();

        Ok(Self {
            architecture,
            layers,
            feature_mean: Array1::zeros(input_dim),
            feature_scale: Array1::ones(input_dim),
        })
    }

    /// Network shape.
    #[must_use]
    pub const fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// Number of input features.
    #[must_use]
    pub const fn input_dim(&self) -> usize {
        self.architecture.input_dim
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() == self.input_dim() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "expected {} input columns, got {}",
                self.input_dim(),
                x.ncols()
            )))
        }
    }

    fn standardize(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.feature_mean) / &self.feature_scale
    }

    /// Train on `x` (rows × features) against 0/1 labels `y`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on shape mismatch or empty data, and
    /// [`Error::Training`] if the loss diverges.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        params: &HyperParameters,
        seed: u64,
    ) -> Result<()> {
        self.check_input(x)?;
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(Error::InvalidInput(format!(
                "cannot fit on {} rows with {} labels",
                x.nrows(),
                y.len()
            )));
        }

        self.feature_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        self.feature_scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let x = self.standardize(x);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> = (0..x.nrows()).collect();
        let batch_size = params.batch_size().min(x.nrows());
        let lr = params.learning_rate();
        let decay = params.weight_decay();
        let dropout = self.architecture.dropout;

        for _epoch in 0..params.epochs() {
            indices.shuffle(&mut rng);
            for batch in indices.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                self.sgd_step(&xb, &yb, lr, decay, dropout, &mut rng)?;
            }
        }
        Ok(())
    }

    fn sgd_step(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        lr: f64,
        decay: f64,
        dropout: f64,
        rng: &mut StdRng,
    ) -> Result<()> {
        let n_hidden = self.layers.len() - 1;
        let keep = 1.0 - dropout;

        // Forward: activations[l] is the input of layer l; gates[l] = relu' * dropout mask
        let mut activations: Vec<Array2<f64>> = Vec::with_capacity(self.layers.len());
        let mut gates: Vec<Array2<f64>> = Vec::with_capacity(n_hidden);
        activations.push(x.clone());
        for layer in &self.layers[..n_hidden] {
            let z = activations[activations.len() - 1].dot(&layer.weights) + &layer.bias;
            let gate = z.mapv(|v| {
                let relu = if v > 0.0 { 1.0 } else { 0.0 };
                if dropout > 0.0 {
                    if rng.gen::<f64>() < keep {
                        relu / keep
                    } else {
                        0.0
                    }
                } else {
                    relu
                }
            });
            activations.push(&z * &gate);
            gates.push(gate);
        }
        let output = &self.layers[n_hidden];
        let logits = activations[n_hidden].dot(&output.weights) + &output.bias;
        let probs = logits.mapv(sigmoid);

        if probs.iter().any(|p| !p.is_finite()) {
            return Err(Error::Training("non-finite activations during training".to_string()));
        }

        // Backward: BCE with sigmoid gives delta = p - y at the output
        let n = x.nrows() as f64;
        let mut delta = (&probs - &y.view().insert_axis(Axis(1))) / n;
        for l in (0..self.layers.len()).rev() {
            let grad_w = activations[l].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            let next_delta = if l > 0 {
                Some(delta.dot(&self.layers[l].weights.t()) * &gates[l - 1])
            } else {
                None
            };

            let layer = &mut self.layers[l];
            layer.weights.zip_mut_with(&grad_w, |w, &g| *w -= lr * decay.mul_add(*w, g));
            layer.bias.zip_mut_with(&grad_b, |b, &g| *b -= lr * g);

            if let Some(next) = next_delta {
                delta = next;
            }
        }
        Ok(())
    }

    /// Positive-class probability per row. Dropout is inactive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on column-count mismatch.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_input(x)?;
        let n_hidden = self.layers.len() - 1;
        let mut a = self.standardize(x);
        for layer in &self.layers[..n_hidden] {
            a = (a.dot(&layer.weights) + &layer.bias).mapv(|v| v.max(0.0));
        }
        let output = &self.layers[n_hidden];
        let logits = a.dot(&output.weights) + &output.bias;
        Ok(logits.column(0).mapv(sigmoid))
    }
}
