//! Engine configuration
//!
//! One serde record with defaults for every knob of a run. Load it from JSON
//! with [`EngineConfig::from_json_file`] or assemble it in code with
//! [`EngineConfig::builder`]; both paths end in [`EngineConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::DEFAULT_LABEL_COLUMN;
use crate::hyperparams::HyperParameterSpace;
use crate::model::{Compression, HeadConfig};
use crate::{Error, Result};

/// Isolation primitive for training rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Fresh worker process per round (default)
    #[default]
    Process,
    /// Dedicated thread per round
    Thread,
}

impl Isolation {
    /// Whether a timed-out round is forcibly stopped. A thread cannot be
    /// killed; it is detached and keeps running until it finishes.
    #[must_use]
    pub const fn kills_on_timeout(self) -> bool {
        matches!(self, Self::Process)
    }
}

/// Every tunable of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `SQLite` ranking store; `None` keeps rankings in memory
    pub store_path: Option<PathBuf>,
    /// Directory for `history.json` and `best_model.bin`; `None` disables
    pub report_dir: Option<PathBuf>,
    /// Label column of the training and test data
    pub label_column: String,
    /// Minimum complete-row fraction a subset must keep
    pub completeness_threshold: f64,
    /// Features per candidate subset
    pub subset_size: usize,
    /// Candidate subsets built around each seed feature
    pub subsets_per_seed: usize,
    /// Hyperparameter draws per sub-model training round
    pub num_samples: usize,
    /// Hyperparameter draws per exploitation round
    pub exploit_num_samples: usize,
    /// Growth loop iteration cap
    pub max_iterations: usize,
    /// Historical sub-models challenged against the working model per iteration
    pub challengers: usize,
    /// Size of the elite group for the balancer
    pub top_n: usize,
    /// Records the balancer considers
    pub top_k_pool: usize,
    /// Target share of effort for the elite group
    pub top_n_effort_fraction: f64,
    /// Bounded wait per training round, in seconds
    pub worker_timeout_secs: u64,
    /// Isolation primitive
    pub isolation: Isolation,
    /// Worker binary; `None` looks next to the running executable
    pub worker_program: Option<PathBuf>,
    /// Base seed for the run
    pub seed: u64,
    /// Artifact codec
    pub compression: Compression,
    /// Concatenation head schedule
    pub head: HeadConfig,
    /// Hyperparameter search space
    pub hyperparameter_space: HyperParameterSpace,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            report_dir: None,
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            completeness_threshold: 0.9,
            subset_size: 5,
            subsets_per_seed: 4,
            num_samples: 3,
            exploit_num_samples: 5,
            max_iterations: 10,
            challengers: 3,
            top_n: 10,
            top_k_pool: 100,
            top_n_effort_fraction: 0.5,
            worker_timeout_secs: 600,
            isolation: Isolation::Process,
            worker_program: None,
            seed: 0,
            compression: Compression::Lz4,
            head: HeadConfig::default(),
            hyperparameter_space: HyperParameterSpace::default(),
        }
    }
}

fn reject(reason: impl Into<String>) -> Error {
    Error::Config(reason.into())
}

impl EngineConfig {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load and validate a JSON config file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed, or a
    /// value is out of range.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| reject(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| reject(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Bounded wait per training round.
    #[must_use]
    pub const fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    /// Check every value against its domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.completeness_threshold) {
            return Err(reject(format!(
                "completeness_threshold must lie in [0, 1], got {}",
                self.completeness_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.top_n_effort_fraction) {
            return Err(reject(format!(
                "top_n_effort_fraction must lie in [0, 1], got {}",
                self.top_n_effort_fraction
            )));
        }
        for (name, value) in [
            ("subset_size", self.subset_size),
            ("subsets_per_seed", self.subsets_per_seed),
            ("num_samples", self.num_samples),
            ("exploit_num_samples", self.exploit_num_samples),
            ("max_iterations", self.max_iterations),
            ("top_k_pool", self.top_k_pool),
        ] {
            if value == 0 {
                return Err(reject(format!("{name} must be at least 1")));
            }
        }
        if self.worker_timeout_secs == 0 {
            return Err(reject("worker_timeout_secs must be at least 1"));
        }
        if self.label_column.is_empty() {
            return Err(reject("label_column cannot be empty"));
        }
        if self.head.epochs == 0
            || !self.head.learning_rate.is_finite()
            || self.head.learning_rate <= 0.0
        {
            return Err(reject("head needs at least one epoch and a positive learning rate"));
        }

        self.hyperparameter_space
            .validate()
            .map_err(|e| reject(format!("hyperparameter_space: {e}")))?;
        let cardinality = self.hyperparameter_space.cardinality();
        for (name, value) in [
            ("num_samples", self.num_samples),
            ("exploit_num_samples", self.exploit_num_samples),
        ] {
            if value > cardinality {
                return Err(reject(format!(
                    "{name} = {value} exceeds the {cardinality} distinct combinations in hyperparameter_space"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for `EngineConfig`.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Persist rankings in `SQLite` at `path`.
    #[must_use]
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    /// Write reports to `dir`.
    #[must_use]
    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_dir = Some(dir.into());
        self
    }

    /// Set the label column.
    #[must_use]
    pub fn label_column(mut self, name: impl Into<String>) -> Self {
        self.config.label_column = name.into();
        self
    }

    /// Set the completeness threshold.
    #[must_use]
    pub const fn completeness_threshold(mut self, v: f64) -> Self {
        self.config.completeness_threshold = v;
        self
    }

    /// Set the subset size.
    #[must_use]
    pub const fn subset_size(mut self, v: usize) -> Self {
        self.config.subset_size = v;
        self
    }

    /// Set subsets built per seed.
    #[must_use]
    pub const fn subsets_per_seed(mut self, v: usize) -> Self {
        self.config.subsets_per_seed = v;
        self
    }

    /// Set hyperparameter draws per training round.
    #[must_use]
    pub const fn num_samples(mut self, v: usize) -> Self {
        self.config.num_samples = v;
        self
    }

    /// Set hyperparameter draws per exploitation round.
    #[must_use]
    pub const fn exploit_num_samples(mut self, v: usize) -> Self {
        self.config.exploit_num_samples = v;
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub const fn max_iterations(mut self, v: usize) -> Self {
        self.config.max_iterations = v;
        self
    }

    /// Set challengers per iteration.
    #[must_use]
    pub const fn challengers(mut self, v: usize) -> Self {
        self.config.challengers = v;
        self
    }

    /// Set balancer parameters.
    #[must_use]
    pub const fn balancer(mut self, top_n: usize, top_k_pool: usize, fraction: f64) -> Self {
        self.config.top_n = top_n;
        self.config.top_k_pool = top_k_pool;
        self.config.top_n_effort_fraction = fraction;
        self
    }

    /// Set the bounded wait per round.
    #[must_use]
    pub const fn worker_timeout_secs(mut self, v: u64) -> Self {
        self.config.worker_timeout_secs = v;
        self
    }

    /// Set the isolation primitive.
    #[must_use]
    pub const fn isolation(mut self, v: Isolation) -> Self {
        self.config.isolation = v;
        self
    }

    /// Set the worker binary.
    #[must_use]
    pub fn worker_program(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.worker_program = Some(path.into());
        self
    }

    /// Set the base seed.
    #[must_use]
    pub const fn seed(mut self, v: u64) -> Self {
        self.config.seed = v;
        self
    }

    /// Set the artifact codec.
    #[must_use]
    pub const fn compression(mut self, v: Compression) -> Self {
        self.config.compression = v;
        self
    }

    /// Set the concatenation head schedule.
    #[must_use]
    pub const fn head(mut self, v: HeadConfig) -> Self {
        self.config.head = v;
        self
    }

    /// Set the hyperparameter space.
    #[must_use]
    pub fn hyperparameter_space(mut self, space: HyperParameterSpace) -> Self {
        self.config.hyperparameter_space = space;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is out of range.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.subset_size, 5);
        assert!((config.completeness_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.worker_timeout(), Duration::from_secs(600));
        assert_eq!(config.isolation, Isolation::Process);
        assert!(config.isolation.kills_on_timeout());
        assert!(!Isolation::Thread.kills_on_timeout());
    }

    #[test]
    fn test_builder_validates() {
        assert!(EngineConfig::builder().completeness_threshold(1.5).build().is_err());
        assert!(EngineConfig::builder().balancer(10, 0, 0.5).build().is_err());
        assert!(EngineConfig::builder().balancer(10, 100, -0.1).build().is_err());
        assert!(EngineConfig::builder().subset_size(0).build().is_err());
        assert!(EngineConfig::builder().worker_timeout_secs(0).build().is_err());

        let config = EngineConfig::builder()
            .subset_size(3)
            .isolation(Isolation::Thread)
            .seed(42)
            .build()
            .unwrap();
        assert_eq!(config.subset_size, 3);
        assert_eq!(config.isolation, Isolation::Thread);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_sample_count_bounded_by_space() {
        let space = HyperParameterSpace {
            num_layers: vec![1],
            first_layer_width: vec![4],
            shrink_factor: vec![0.5],
            dropout: vec![0.0],
            weight_decay: vec![0.0],
            learning_rate: vec![0.1, 0.01],
            epochs: vec![10],
            batch_size: vec![8],
        };
        let result = EngineConfig::builder()
            .hyperparameter_space(space.clone())
            .num_samples(3)
            .exploit_num_samples(2)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        EngineConfig::builder()
            .hyperparameter_space(space)
            .num_samples(2)
            .exploit_num_samples(2)
            .build()
            .unwrap();
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"subset_size": 3, "isolation": "thread", "compression": "zstd"}}"#)
            .unwrap();
        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.subset_size, 3);
        assert_eq!(config.isolation, Isolation::Thread);
        assert_eq!(config.compression, Compression::Zstd);
        assert_eq!(config.max_iterations, 10);
    }

    #[test]
    fn test_from_json_file_errors() {
        assert!(matches!(
            EngineConfig::from_json_file("/nonexistent/config.json"),
            Err(Error::Config(_))
        ));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"top_n_effort_fraction": 2.0}}"#).unwrap();
        assert!(matches!(EngineConfig::from_json_file(file.path()), Err(Error::Config(_))));
    }
}
