//! Report sinks: where each committed iteration goes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::history::{IterationMetrics, MetricsHistory};
use crate::config::EngineConfig;
use crate::model::ModelArtifact;
use crate::Result;

/// File holding the full metrics history as a JSON array.
pub const HISTORY_FILE: &str = "history.json";

/// File holding the working model artifact of the latest commit.
pub const BEST_MODEL_FILE: &str = "best_model.bin";

/// Receives the history and the working model after every commit.
pub trait ReportSink {
    /// Publish the state after a commit. `history` already contains the
    /// newest record.
    ///
    /// # Errors
    ///
    /// Returns error if the report cannot be written.
    fn report(&mut self, history: &MetricsHistory, artifact: &ModelArtifact) -> Result<()>;
}

impl<T: ReportSink + ?Sized> ReportSink for &mut T {
    fn report(&mut self, history: &MetricsHistory, artifact: &ModelArtifact) -> Result<()> {
        (**self).report(history, artifact)
    }
}

/// `None` discards reports.
impl<T: ReportSink> ReportSink for Option<T> {
    fn report(&mut self, history: &MetricsHistory, artifact: &ModelArtifact) -> Result<()> {
        match self {
            Some(sink) => sink.report(history, artifact),
            None => Ok(()),
        }
    }
}

/// Rewrites `history.json` and `best_model.bin` in a directory per commit.
///
/// Both files are written to a temporary name and renamed into place, so a
/// reader never sees a half-written report.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    /// Sink writing into `dir`, created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Sink for the config's `report_dir`, or `None` if reporting is off.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the directory cannot be created.
    pub fn from_config(config: &EngineConfig) -> Result<Option<Self>> {
        config.report_dir.as_ref().map(Self::new).transpose()
    }

    /// Report directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the history file.
    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Path of the model file.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(BEST_MODEL_FILE)
    }

    fn replace(&self, name: &str, contents: &[u8]) -> Result<()> {
        let target = self.dir.join(name);
        let staging = self.dir.join(format!(".{name}.tmp"));
        fs::write(&staging, contents)?;
        fs::rename(&staging, &target)?;
        Ok(())
    }
}

impl ReportSink for JsonReportSink {
    fn report(&mut self, history: &MetricsHistory, artifact: &ModelArtifact) -> Result<()> {
        let json = serde_json::to_vec_pretty(history)?;
        self.replace(HISTORY_FILE, &json)?;
        self.replace(BEST_MODEL_FILE, artifact.as_bytes())?;
        debug!(dir = %self.dir.display(), iterations = history.len(), "report written");
        Ok(())
    }
}

/// Keeps every commit in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReportSink {
    commits: Vec<(IterationMetrics, ModelArtifact)>,
}

impl MemoryReportSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit so far: latest record and the artifact reported with it.
    #[must_use]
    pub fn commits(&self) -> &[(IterationMetrics, ModelArtifact)] {
        &self.commits
    }

    /// Artifact of the latest commit.
    #[must_use]
    pub fn latest_artifact(&self) -> Option<&ModelArtifact> {
        self.commits.last().map(|(_, artifact)| artifact)
    }
}

impl ReportSink for MemoryReportSink {
    fn report(&mut self, history: &MetricsHistory, artifact: &ModelArtifact) -> Result<()> {
        if let Some(latest) = history.latest() {
            self.commits.push((latest.clone(), artifact.clone()));
        }
        Ok(())
    }
}
