//! Collaborators backed by external programs.
//!
//! Argument templates may reference `{parameters}`, `{symbols}`,
//! `{workspace}`, `{artifact}`, `{binary}`, `{output}`, `{outcome}` and
//! `{reference}`; each is replaced with a trial-specific path or value.
//! Commands always run with the trial workspace as working directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

use super::trial::{
    Comparator, ExternalSimulator, GeneratedRules, RuleGenerator, TrialError, TrialWorkspace,
};
use crate::schema::{CommandSpec, ParameterVector, ReferenceDataset, SimulatorConfig};

/// Maximum stderr characters kept in an error message.
const STDERR_TAIL: usize = 2000;

/// Replace `{name}` placeholders.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

/// Run a command template to completion inside `cwd`.
fn run_command(spec: &CommandSpec, vars: &[(&str, &str)], cwd: &Path) -> Result<Output, String> {
    let program = render(&spec.program, vars);
    let args: Vec<String> = spec.args.iter().map(|arg| render(arg, vars)).collect();

    log::debug!("Running {program} {}", args.join(" "));

    let output = Command::new(&program)
        .args(&args)
        .current_dir(cwd)
        .output()
        .map_err(|e| format!("failed to spawn {program}: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr_tail(&output.stderr)
        ));
    }

    Ok(output)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL);
    text.chars().skip(skip).collect()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Rule generator program.
///
/// Must print `{"artifact": ..., "rules_text": ..., "rule_list": [...]}` on
/// stdout. A relative artifact path is resolved against the workspace.
#[derive(Debug, Clone)]
pub struct CommandRuleGenerator {
    spec: CommandSpec,
}

impl CommandRuleGenerator {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl RuleGenerator for CommandRuleGenerator {
    fn generate(
        &self,
        _vector: &ParameterVector,
        symbols: &[String],
        workspace: &TrialWorkspace,
    ) -> Result<GeneratedRules, TrialError> {
        let parameters = path_str(&workspace.parameters_path());
        let dir = path_str(workspace.path());
        let symbols = symbols.join(",");
        let vars = [
            ("parameters", parameters.as_str()),
            ("symbols", symbols.as_str()),
            ("workspace", dir.as_str()),
        ];

        let output =
            run_command(&self.spec, &vars, workspace.path()).map_err(TrialError::Generation)?;

        let mut rules: GeneratedRules = serde_json::from_slice(&output.stdout)
            .map_err(|e| TrialError::Generation(format!("invalid generator output: {e}")))?;

        if rules.artifact.is_relative() {
            rules.artifact = workspace.join(&rules.artifact);
        }
        if !rules.artifact.exists() {
            return Err(TrialError::Generation(format!(
                "artifact {} was not created",
                rules.artifact.display()
            )));
        }

        Ok(rules)
    }
}

/// Build-and-run simulator.
#[derive(Debug, Clone)]
pub struct CommandSimulator {
    config: SimulatorConfig,
}

impl CommandSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

impl ExternalSimulator for CommandSimulator {
    fn simulate(&self, artifact: &Path, workspace: &TrialWorkspace) -> Result<Value, TrialError> {
        let binary = workspace.join(&self.config.binary_file);
        let output = workspace.join(&self.config.output_file);

        let artifact = path_str(artifact);
        let binary_str = path_str(&binary);
        let output_str = path_str(&output);
        let dir = path_str(workspace.path());
        let vars = [
            ("artifact", artifact.as_str()),
            ("binary", binary_str.as_str()),
            ("output", output_str.as_str()),
            ("workspace", dir.as_str()),
        ];

        if let Some(build) = &self.config.build {
            run_command(build, &vars, workspace.path())
                .map_err(|e| TrialError::Execution(format!("build failed: {e}")))?;
        }

        run_command(&self.config.run, &vars, workspace.path()).map_err(TrialError::Execution)?;

        let content = fs::read_to_string(&output).map_err(|e| {
            TrialError::MalformedOutput(format!("cannot read {}: {e}", output.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| TrialError::MalformedOutput(e.to_string()))
    }
}

/// Comparator program printing a single non-negative number on stdout.
#[derive(Debug, Clone)]
pub struct CommandComparator {
    spec: CommandSpec,
}

impl CommandComparator {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    /// Path of the reference document, writing a copy into the workspace
    /// when the dataset was not loaded from disk.
    fn reference_path(
        reference: &ReferenceDataset,
        workspace: &TrialWorkspace,
    ) -> Result<PathBuf, TrialError> {
        if let Some(source) = reference.source() {
            return Ok(source.to_path_buf());
        }
        let path = workspace.join("reference.json");
        let json = serde_json::to_string_pretty(reference.table())?;
        fs::write(&path, json).map_err(TrialError::Workspace)?;
        Ok(path)
    }
}

impl Comparator for CommandComparator {
    fn compare(
        &self,
        outcome: &Value,
        reference: &ReferenceDataset,
        workspace: &TrialWorkspace,
    ) -> Result<f64, TrialError> {
        let outcome_path = workspace.join("comparison-outcome.json");
        fs::write(&outcome_path, serde_json::to_string(outcome)?).map_err(TrialError::Workspace)?;
        let reference_path = Self::reference_path(reference, workspace)?;

        let outcome_str = path_str(&outcome_path);
        let reference_str = path_str(&reference_path);
        let dir = path_str(workspace.path());
        let vars = [
            ("outcome", outcome_str.as_str()),
            ("reference", reference_str.as_str()),
            ("workspace", dir.as_str()),
        ];

        let output =
            run_command(&self.spec, &vars, workspace.path()).map_err(TrialError::Comparison)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|e| TrialError::Comparison(format!("unparseable score {:?}: {e}", stdout.trim())))
    }
}
