//! Frozen-member concatenation with a trainable logistic head
//!
//! Each member is an already-trained [`Model`] reading its own columns of the
//! concatenated input. Member outputs are turned into logits, concatenated,
//! and fed to a logistic-regression head. Fitting touches only the head.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::Model;
use crate::{Error, Result};

/// Probabilities are clipped to this distance from 0 and 1 before the logit.
const LOGIT_EPSILON: f64 = 1e-6;

/// Head training schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadConfig {
    /// Full-batch gradient steps
    pub epochs: usize,
    /// Step size
    pub learning_rate: f64,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            epochs: 300,
            learning_rate: 0.5,
        }
    }
}

/// A frozen sub-model and the input columns it reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenMember {
    model: Box<Model>,
    columns: Vec<usize>,
}

impl FrozenMember {
    /// Member reading `columns` (indices into the concatenated input).
    #[must_use]
    pub fn new(model: Model, columns: Vec<usize>) -> Self {
        Self {
            model: Box::new(model),
            columns,
        }
    }

    /// The frozen model.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Input columns routed to this member.
    #[must_use]
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Members for `model` reading `columns`, with a concatenation replaced
    /// by its own members.
    ///
    /// Inner member columns index the concatenation's input, so they are
    /// remapped through `columns`. The inner head is dropped. The result never
    /// contains a [`Model::Concatenation`], which keeps artifact nesting at a
    /// fixed depth however many times an ensemble is extended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an inner column is out of range for
    /// `columns`.
    pub fn flatten(model: Model, columns: Vec<usize>) -> Result<Vec<Self>> {
        match model {
            Model::Concatenation(concat) => {
                let mut flat = Vec::with_capacity(concat.members.len());
                for member in concat.members {
                    let remapped = member
                        .columns
                        .iter()
                        .map(|&c| {
                            columns.get(c).copied().ok_or_else(|| {
                                Error::InvalidInput(format!(
                                    "inner column {c} out of range for {} outer columns",
                                    columns.len()
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    flat.extend(Self::flatten(*member.model, remapped)?);
                }
                Ok(flat)
            }
            model => Ok(vec![Self::new(model, columns)]),
        }
    }
}

/// Concatenation of frozen members under a logistic head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatenatedModel {
    input_dim: usize,
    members: Vec<FrozenMember>,
    head_weights: Array1<f64>,
    head_bias: f64,
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPSILON, 1.0 - LOGIT_EPSILON);
    (p / (1.0 - p)).ln()
}

impl ConcatenatedModel {
    /// Assemble an untrained head over `members`.
    ///
    /// The head starts as the average of member logits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if there are no members, a member's
    /// column count disagrees with its model, or a column is out of range.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(input_dim: usize, members: Vec<FrozenMember>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::InvalidInput(
                "concatenation needs at least one member".to_string(),
            ));
        }
        for (i, member) in members.iter().enumerate() {
            if member.columns.len() != member.model.input_dim() {
                return Err(Error::InvalidInput(format!(
                    "member {i} reads {} columns but its model expects {}",
                    member.columns.len(),
                    member.model.input_dim()
                )));
            }
            if let Some(&bad) = member.columns.iter().find(|&&c| c >= input_dim) {
                return Err(Error::InvalidInput(format!(
                    "member {i} column {bad} out of range for {input_dim} inputs"
                )));
            }
        }
        let n = members.len();
        Ok(Self {
            input_dim,
            members,
            head_weights: Array1::from_elem(n, 1.0 / n as f64),
            head_bias: 0.0,
        })
    }

    /// Number of input columns.
    #[must_use]
    pub const fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Frozen members in head-input order.
    #[must_use]
    pub fn members(&self) -> &[FrozenMember] {
        &self.members
    }

    /// Member logits, one column per member.
    fn member_logits(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.input_dim {
            return Err(Error::InvalidInput(format!(
                "expected {} input columns, got {}",
                self.input_dim,
                x.ncols()
            )));
        }
        let mut features = Array2::zeros((x.nrows(), self.members.len()));
        for (j, member) in self.members.iter().enumerate() {
            let slice = x.select(Axis(1), &member.columns);
            let probs = member.model.predict(&slice)?;
            features.column_mut(j).assign(&probs.mapv(logit));
        }
        Ok(features)
    }

    /// Fit the head only; members stay frozen.
    ///
    /// # Errors
    ///
    /// Returns error on shape mismatch, empty data, or if a member fails to
    /// predict.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit_head(&mut self, x: &Array2<f64>, y: &Array1<f64>, config: HeadConfig) -> Result<()> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(Error::InvalidInput(format!(
                "cannot fit head on {} rows with {} labels",
                x.nrows(),
                y.len()
            )));
        }
        let features = self.member_logits(x)?;
        let n = x.nrows() as f64;
        for _ in 0..config.epochs {
            let z = features.dot(&self.head_weights) + self.head_bias;
            let residual = z.mapv(super::sigmoid) - y;
            let grad_w = features.t().dot(&residual) / n;
            let grad_b = residual.sum() / n;
            self.head_weights.scaled_add(-config.learning_rate, &grad_w);
            self.head_bias -= config.learning_rate * grad_b;
        }
        if !self.head_bias.is_finite() || self.head_weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::Training("concatenation head diverged".to_string()));
        }
        Ok(())
    }

    /// Positive-class probability per row.
    ///
    /// # Errors
    ///
    /// Returns error on shape mismatch or if a member fails to predict.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let features = self.member_logits(x)?;
        Ok((features.dot(&self.head_weights) + self.head_bias).mapv(super::sigmoid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::HyperParameters;
    use crate::model::NeuralNetwork;
    use ndarray::array;

    fn member(input_dim: usize, seed: u64) -> Model {
        let params = HyperParameters::builder().num_layers(1).first_layer_width(4).build().unwrap();
        Model::Network(NeuralNetwork::build(input_dim, &params, seed).unwrap())
    }

    #[test]
    fn test_new_validates_columns() {
        assert!(ConcatenatedModel::new(3, vec![]).is_err());
        assert!(ConcatenatedModel::new(3, vec![FrozenMember::new(member(2, 0), vec![0])]).is_err());
        assert!(ConcatenatedModel::new(3, vec![FrozenMember::new(member(2, 0), vec![0, 3])]).is_err());
        assert!(ConcatenatedModel::new(3, vec![FrozenMember::new(member(2, 0), vec![0, 2])]).is_ok());
    }

    #[test]
    fn test_fit_head_leaves_members_frozen() {
        let a = member(1, 1);
        let b = member(2, 2);
        let mut concat = ConcatenatedModel::new(
            3,
            vec![FrozenMember::new(a.clone(), vec![0]), FrozenMember::new(b.clone(), vec![1, 2])],
        )
        .unwrap();

        let x = array![[0.0, 1.0, 2.0], [1.0, 0.0, 1.0], [2.0, 2.0, 0.0], [3.0, 1.0, 1.0]];
        let y = array![0.0, 1.0, 0.0, 1.0];
        concat.fit_head(&x, &y, HeadConfig::default()).unwrap();

        assert_eq!(concat.members()[0].model(), &a);
        assert_eq!(concat.members()[1].model(), &b);
        let probs = concat.predict(&x).unwrap();
        assert_eq!(probs.len(), 4);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_flatten_remaps_inner_columns() {
        let inner = ConcatenatedModel::new(
            3,
            vec![FrozenMember::new(member(1, 1), vec![2]), FrozenMember::new(member(2, 2), vec![0, 1])],
        )
        .unwrap();

        let flat = FrozenMember::flatten(Model::Concatenation(inner), vec![4, 0, 3]).unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].columns(), [3]);
        assert_eq!(flat[1].columns(), [4, 0]);
        assert!(flat.iter().all(|m| matches!(m.model(), Model::Network(_))));

        let single = FrozenMember::flatten(member(2, 3), vec![1, 0]).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].columns(), [1, 0]);
    }

    #[test]
    fn test_flatten_rejects_short_column_map() {
        let inner =
            ConcatenatedModel::new(3, vec![FrozenMember::new(member(1, 1), vec![2])]).unwrap();
        assert!(FrozenMember::flatten(Model::Concatenation(inner), vec![0, 1]).is_err());
    }

    #[test]
    fn test_head_learns_to_trust_informative_member() {
        let x = array![[0.0], [0.0], [1.0], [1.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let params = HyperParameters::builder()
            .num_layers(1)
            .first_layer_width(4)
            .learning_rate(0.2)
            .epochs(200)
            .build()
            .unwrap();
        let mut net = NeuralNetwork::build(1, &params, 4).unwrap();
        net.fit(&x, &y, &params, 4).unwrap();

        let mut concat =
            ConcatenatedModel::new(1, vec![FrozenMember::new(Model::Network(net), vec![0])])
                .unwrap();
        concat.fit_head(&x, &y, HeadConfig::default()).unwrap();
        let probs = concat.predict(&x).unwrap();

        assert!(probs[0] < 0.5 && probs[1] < 0.5);
        assert!(probs[2] > 0.5 && probs[3] > 0.5);
    }
}
