//! # subset-ensemble: Persistent Feature-Subset Search
//!
//! Searches the space of feature subsets for binary classifiers, remembers
//! every result in a persistent ranking store, and grows the best sub-models
//! into one ensemble.
//!
//! ## Design Principles
//!
//! - **Effort is tracked, not guessed**: every training attempt on a subset
//!   increments its search counter in the same write that decides whether the
//!   result is kept
//! - **Strict improvement only**: a stored score or artifact is replaced only
//!   by a strictly better one; the working model likewise
//! - **Isolation per round**: each training round runs in a fresh worker and
//!   is bounded by a timeout
//! - **Explicit context**: one [`context::SearchContext`] per run, no globals
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use subset_ensemble::config::EngineConfig;
//! use subset_ensemble::context::SearchContext;
//! use subset_ensemble::ensemble::{GrowthLoop, JsonReportSink};
//! use subset_ensemble::exploit::Exploiter;
//!
//! let config = EngineConfig::builder()
//!     .store_path("rankings.db")
//!     .report_dir("reports")
//!     .build()?;
//! let mut ctx = SearchContext::load_parquet(config, "train.parquet", "test.parquet")?;
//!
//! // Grow the ensemble one seed feature at a time
//! let mut growth = GrowthLoop::new(JsonReportSink::from_config(ctx.config())?);
//! let seeds = ctx.train().feature_names().to_vec();
//! growth.run(&mut ctx, seeds)?;
//!
//! // Spend extra rounds on promising subsets
//! Exploiter::new(&mut ctx).deepen(20)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod balancer;
pub mod config;
pub mod context;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod exploit;
pub mod hyperparams;
pub mod logging;
pub mod model;
pub mod scoring;
pub mod store;
pub mod subset;
pub mod topk;
pub mod trainer;

pub use error::{Error, Result};
