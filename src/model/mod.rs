//! Model primitive
//!
//! The rest of the crate treats models as opaque: build, fit, predict,
//! serialize. [`Model`] is the closed set of shapes that can appear in the
//! ranking store or as a working model:
//!
//! - [`Model::Network`]: one MLP trained on one feature subset
//! - [`Model::Concatenation`]: frozen members under a trained logistic head
//!
//! Artifacts ([`ModelArtifact`]) are the serialized form; they round-trip
//! through the ranking store and the worker protocol untouched.

mod codec;
mod concat;
mod network;

pub use codec::{Compression, ModelArtifact};
pub use concat::{ConcatenatedModel, FrozenMember, HeadConfig};
pub use network::{Architecture, DenseLayer, NeuralNetwork};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::Result;

#[inline]
pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z.clamp(-500.0, 500.0)).exp())
}

/// Any trained model the search can score, store or concatenate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    /// Single network over one feature subset
    Network(NeuralNetwork),
    /// Frozen members under a logistic head
    Concatenation(ConcatenatedModel),
}

impl Model {
    /// Number of input columns the model reads.
    #[must_use]
    pub const fn input_dim(&self) -> usize {
        match self {
            Self::Network(net) => net.input_dim(),
            Self::Concatenation(concat) => concat.input_dim(),
        }
    }

    /// Positive-class probability per row.
    ///
    /// # Errors
    ///
    /// Returns error on column-count mismatch.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            Self::Network(net) => net.predict(x),
            Self::Concatenation(concat) => concat.predict(x),
        }
    }
}
