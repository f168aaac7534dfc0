//! Single stochastic trial: generate rules, simulate, score.
//!
//! Every trial runs inside its own [`TrialWorkspace`]; the workspace and all
//! artifacts in it are deleted when the trial returns, on success or failure.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;

use crate::schema::{ParameterVector, ReferenceDataset};

/// File name of the persisted parameter table inside a workspace.
pub const PARAMETERS_FILE: &str = "parameters.json";

/// Output of a rule generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRules {
    /// Simulator artifact (typically generated source).
    pub artifact: PathBuf,
    /// Human-readable rule description.
    pub rules_text: String,
    /// Individual rules in order.
    pub rule_list: Vec<String>,
}

/// Result of one successful trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    /// Divergence from the reference (lower is better).
    pub score: f64,
    /// Outcome document produced by the simulator.
    pub raw_outcome: Value,
    /// Rule description from the generator.
    pub rules_text: String,
    /// Rule list from the generator.
    pub rule_list: Vec<String>,
}

/// Turns a parameter table into a simulator artifact.
pub trait RuleGenerator: Send + Sync {
    fn generate(
        &self,
        vector: &ParameterVector,
        symbols: &[String],
        workspace: &TrialWorkspace,
    ) -> Result<GeneratedRules, TrialError>;
}

/// Executes a simulator artifact and returns its outcome document.
pub trait ExternalSimulator: Send + Sync {
    fn simulate(&self, artifact: &Path, workspace: &TrialWorkspace) -> Result<Value, TrialError>;
}

/// Scores an outcome against the reference dataset.
pub trait Comparator: Send + Sync {
    fn compare(
        &self,
        outcome: &Value,
        reference: &ReferenceDataset,
        workspace: &TrialWorkspace,
    ) -> Result<f64, TrialError>;
}

impl<F> RuleGenerator for F
where
    F: Fn(&ParameterVector, &[String], &TrialWorkspace) -> Result<GeneratedRules, TrialError>
        + Send
        + Sync,
{
    fn generate(
        &self,
        vector: &ParameterVector,
        symbols: &[String],
        workspace: &TrialWorkspace,
    ) -> Result<GeneratedRules, TrialError> {
        self(vector, symbols, workspace)
    }
}

impl<F> ExternalSimulator for F
where
    F: Fn(&Path, &TrialWorkspace) -> Result<Value, TrialError> + Send + Sync,
{
    fn simulate(&self, artifact: &Path, workspace: &TrialWorkspace) -> Result<Value, TrialError> {
        self(artifact, workspace)
    }
}

impl<F> Comparator for F
where
    F: Fn(&Value, &ReferenceDataset, &TrialWorkspace) -> Result<f64, TrialError> + Send + Sync,
{
    fn compare(
        &self,
        outcome: &Value,
        reference: &ReferenceDataset,
        workspace: &TrialWorkspace,
    ) -> Result<f64, TrialError> {
        self(outcome, reference, workspace)
    }
}

/// Uniquely named scratch directory owned by one trial.
#[derive(Debug)]
pub struct TrialWorkspace {
    dir: TempDir,
}

impl TrialWorkspace {
    /// Create a fresh workspace under `root` (system temp dir when `None`).
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("trial-");
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the persisted parameter table.
    pub fn parameters_path(&self) -> PathBuf {
        self.dir.path().join(PARAMETERS_FILE)
    }

    /// Path of a file inside the workspace.
    pub fn join<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Runs trials against shared read-only inputs.
pub struct TrialRunner {
    reference: Arc<ReferenceDataset>,
    generator: Arc<dyn RuleGenerator>,
    simulator: Arc<dyn ExternalSimulator>,
    comparator: Arc<dyn Comparator>,
    scratch_dir: Option<PathBuf>,
}

impl TrialRunner {
    /// Create a runner from its collaborators.
    pub fn new(
        reference: Arc<ReferenceDataset>,
        generator: Arc<dyn RuleGenerator>,
        simulator: Arc<dyn ExternalSimulator>,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        Self {
            reference,
            generator,
            simulator,
            comparator,
            scratch_dir: None,
        }
    }

    /// Place trial workspaces under `dir`.
    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn reference(&self) -> &ReferenceDataset {
        &self.reference
    }

    /// Execute one trial.
    pub fn run(&self, vector: &ParameterVector, symbols: &[String]) -> Result<TrialResult, TrialError> {
        let workspace =
            TrialWorkspace::create(self.scratch_dir.as_deref()).map_err(TrialError::Workspace)?;

        fs::write(workspace.parameters_path(), vector.to_json_pretty()?)
            .map_err(TrialError::Workspace)?;

        let rules = self.generator.generate(vector, symbols, &workspace)?;
        let outcome = self.simulator.simulate(&rules.artifact, &workspace)?;
        let score = self.comparator.compare(&outcome, &self.reference, &workspace)?;

        if !score.is_finite() || score < 0.0 {
            return Err(TrialError::InvalidScore(score));
        }

        log::trace!("Trial in {} scored {score}", workspace.path().display());

        Ok(TrialResult {
            score,
            raw_outcome: outcome,
            rules_text: rules.rules_text,
            rule_list: rules.rule_list,
        })
    }
}

/// Failure of a single trial. Never aborts sibling trials.
#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    #[error("Trial workspace error: {0}")]
    Workspace(#[source] io::Error),
    #[error("Failed to serialize parameter table: {0}")]
    Parameters(#[from] serde_json::Error),
    #[error("Rule generation failed: {0}")]
    Generation(String),
    #[error("Simulator execution failed: {0}")]
    Execution(String),
    #[error("Malformed simulator output: {0}")]
    MalformedOutput(String),
    #[error("Comparison failed: {0}")]
    Comparison(String),
    #[error("Comparator returned invalid score {0}")]
    InvalidScore(f64),
    #[error("Trial panicked: {0}")]
    Panicked(String),
}
