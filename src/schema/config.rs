//! Search configuration: problem definition, GA settings, evaluation width,
//! external collaborators and output location.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{ReferenceDataset, ReferenceError};

/// Top-level configuration for a search run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchConfig {
    /// Reference data and symbol names.
    #[serde(default)]
    pub problem: ProblemConfig,
    /// Population and generation settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Selection, crossover and mutation settings.
    #[serde(default)]
    pub operators: OperatorConfig,
    /// Trials per evaluation and concurrency width.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// External rule generator, simulator and comparator.
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
    /// Where run artifacts are written.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Problem definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Path to the reference frequency document.
    #[serde(default = "default_reference_path")]
    pub reference: PathBuf,
    /// Symbol names, one per position of a combination key.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            reference: default_reference_path(),
            symbols: default_symbols(),
        }
    }
}

fn default_reference_path() -> PathBuf {
    PathBuf::from("reference.json")
}
fn default_symbols() -> Vec<String> {
    ["x1", "x2", "x3", "x4"].iter().map(|s| s.to_string()).collect()
}

/// Population and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of individuals in population.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Maximum number of generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            max_generations: default_max_generations(),
            random_seed: None,
        }
    }
}

fn default_population_size() -> usize {
    150
}
fn default_max_generations() -> usize {
    100
}

/// Genetic operator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Probability that an adjacent offspring pair is recombined.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Probability that an offspring is mutated.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Probability that each gene of a mutated offspring is perturbed.
    #[serde(default = "default_gene_mutation_rate")]
    pub gene_mutation_rate: f64,
    /// Tournament size (aspirants drawn with replacement).
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Polynomial mutation distribution index. Larger values keep children
    /// closer to their parent.
    #[serde(default = "default_eta")]
    pub eta: f64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            gene_mutation_rate: default_gene_mutation_rate(),
            tournament_size: default_tournament_size(),
            eta: default_eta(),
        }
    }
}

fn default_crossover_rate() -> f64 {
    0.9
}
fn default_mutation_rate() -> f64 {
    0.2
}
fn default_gene_mutation_rate() -> f64 {
    0.1
}
fn default_tournament_size() -> usize {
    15
}
fn default_eta() -> f64 {
    20.0
}

/// Fitness evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Stochastic trials launched per evaluation.
    #[serde(default = "default_trials")]
    pub trials: usize,
    /// Maximum trials running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Directory for per-trial workspaces (system temp dir when unset).
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            concurrency: default_concurrency(),
            scratch_dir: None,
        }
    }
}

fn default_trials() -> usize {
    50
}
fn default_concurrency() -> usize {
    50
}

/// An external program and its argument template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments; `{placeholder}` tokens are substituted per trial.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Anchor relative tokens that name existing files under `base`.
    ///
    /// Tokens holding a `{placeholder}` and names that do not exist under
    /// `base` (`python3`, `-O3`) are kept verbatim.
    pub fn resolve_against(&self, base: &Path) -> Self {
        let anchor = |token: &String| {
            if token.is_empty() || token.contains('{') || Path::new(token).is_absolute() {
                return token.clone();
            }
            let candidate = base.join(token);
            if candidate.exists() {
                candidate.to_string_lossy().into_owned()
            } else {
                token.clone()
            }
        };
        Self {
            program: anchor(&self.program),
            args: self.args.iter().map(anchor).collect(),
        }
    }
}

/// Compile-and-run simulator commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Optional build step turning `{artifact}` into `{binary}`.
    #[serde(default = "default_simulator_build")]
    pub build: Option<CommandSpec>,
    /// Execution step; must write the outcome document to `{output}`.
    #[serde(default = "default_simulator_run")]
    pub run: CommandSpec,
    /// File name of the compiled binary inside the trial workspace.
    #[serde(default = "default_binary_file")]
    pub binary_file: String,
    /// File name of the outcome document inside the trial workspace.
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            build: default_simulator_build(),
            run: default_simulator_run(),
            binary_file: default_binary_file(),
            output_file: default_output_file(),
        }
    }
}

fn default_simulator_build() -> Option<CommandSpec> {
    Some(CommandSpec::new(
        "g++",
        &[
            "-DOUTPUT_FILE=\"{output}\"",
            "-O3",
            "-fopenmp",
            "-x",
            "c++",
            "{artifact}",
            "-o",
            "{binary}",
        ],
    ))
}
fn default_simulator_run() -> CommandSpec {
    CommandSpec::new("{binary}", &[])
}
fn default_binary_file() -> String {
    "simulator.bin".to_string()
}
fn default_output_file() -> String {
    "outcome.json".to_string()
}

/// External collaborators driven by the trial runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Turns a parameter table into simulator source plus rule text.
    #[serde(default = "default_generator")]
    pub generator: CommandSpec,
    /// Builds and executes the generated artifact.
    #[serde(default)]
    pub simulator: SimulatorConfig,
    /// Scores an outcome document against the reference; prints one number.
    #[serde(default = "default_comparator")]
    pub comparator: CommandSpec,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            generator: default_generator(),
            simulator: SimulatorConfig::default(),
            comparator: default_comparator(),
        }
    }
}

fn default_generator() -> CommandSpec {
    CommandSpec::new(
        "python3",
        &["rule_creator.py", "{parameters}", "{symbols}", "{workspace}"],
    )
}
fn default_comparator() -> CommandSpec {
    CommandSpec::new("python3", &["file_comparison.py", "{outcome}", "{reference}"])
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving dumps, snapshots and logs.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("optimization_output")
}

// ============================================================================
// Loading and validation
// ============================================================================

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Invalid probability for {name}: {value} (must be within 0..=1)")]
    InvalidProbability { name: &'static str, value: f64 },
    #[error("Tournament size must be at least 1")]
    InvalidTournamentSize,
    #[error("Mutation eta must be a finite non-negative number, got {0}")]
    InvalidEta(f64),
    #[error("Trials per evaluation must be at least 1")]
    NoTrials,
    #[error("Concurrency width must be at least 1")]
    InvalidConcurrency,
    #[error("At least one symbol is required")]
    NoSymbols,
    #[error("Collaborator {0} has an empty program")]
    EmptyCommand(&'static str),
    #[error("{symbols} symbols given but reference keys have arity {arity}")]
    SymbolArityMismatch { symbols: usize, arity: usize },
    #[error("Reference data: {0}")]
    Reference(#[from] ReferenceError),
}

impl SearchConfig {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Rewrite relative paths against `base`.
    ///
    /// Collaborator commands run inside per-trial workspaces, so script and
    /// data paths must not depend on the working directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        anchor(&mut self.problem.reference);
        anchor(&mut self.output.dir);
        if let Some(dir) = &mut self.evaluation.scratch_dir {
            anchor(dir);
        }

        let collaborators = &mut self.collaborators;
        collaborators.generator = collaborators.generator.resolve_against(base);
        collaborators.comparator = collaborators.comparator.resolve_against(base);
        collaborators.simulator.run = collaborators.simulator.run.resolve_against(base);
        if let Some(build) = &mut collaborators.simulator.build {
            *build = build.resolve_against(base);
        }
    }

    /// Validate settings that do not depend on the reference data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population.size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }

        let check_probability = |value: f64, name: &'static str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidProbability { name, value })
            }
        };

        check_probability(self.operators.crossover_rate, "crossover_rate")?;
        check_probability(self.operators.mutation_rate, "mutation_rate")?;
        check_probability(self.operators.gene_mutation_rate, "gene_mutation_rate")?;

        if self.operators.tournament_size == 0 {
            return Err(ConfigError::InvalidTournamentSize);
        }
        if !self.operators.eta.is_finite() || self.operators.eta < 0.0 {
            return Err(ConfigError::InvalidEta(self.operators.eta));
        }

        if self.evaluation.trials == 0 {
            return Err(ConfigError::NoTrials);
        }
        if self.evaluation.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if let Ok(available) = std::thread::available_parallelism()
            && self.evaluation.concurrency > available.get()
        {
            log::warn!(
                "Concurrency width {} exceeds available parallelism {}; trials will oversubscribe the CPU",
                self.evaluation.concurrency,
                available
            );
        }

        if self.problem.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }

        let collaborators = &self.collaborators;
        if collaborators.generator.program.trim().is_empty() {
            return Err(ConfigError::EmptyCommand("generator"));
        }
        if collaborators.simulator.run.program.trim().is_empty() {
            return Err(ConfigError::EmptyCommand("simulator.run"));
        }
        if let Some(build) = &collaborators.simulator.build
            && build.program.trim().is_empty()
        {
            return Err(ConfigError::EmptyCommand("simulator.build"));
        }
        if collaborators.comparator.program.trim().is_empty() {
            return Err(ConfigError::EmptyCommand("comparator"));
        }

        Ok(())
    }

    /// Check that the symbol list matches the reference key arity.
    pub fn validate_against(&self, reference: &ReferenceDataset) -> Result<(), ConfigError> {
        if self.problem.symbols.len() != reference.arity() {
            return Err(ConfigError::SymbolArityMismatch {
                symbols: self.problem.symbols.len(),
                arity: reference.arity(),
            });
        }
        Ok(())
    }

    /// Load the reference dataset named by the config and check it against
    /// the symbol list.
    pub fn load_reference(&self) -> Result<ReferenceDataset, ConfigError> {
        let reference = ReferenceDataset::load(&self.problem.reference)?;
        self.validate_against(&reference)?;
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.operators.tournament_size, 15);
        assert_eq!(config.evaluation.trials, 50);
        assert_eq!(config.evaluation.concurrency, 50);
        assert_eq!(config.population.max_generations, 100);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let json = r#"{
            "problem": { "reference": "emt.json", "symbols": ["NICD", "Notch"] },
            "population": { "size": 5 }
        }"#;
        let config: SearchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.population.size, 5);
        assert_eq!(config.population.max_generations, 100);
        assert_eq!(config.operators.crossover_rate, 0.9);
        assert_eq!(config.operators.eta, 20.0);
        assert_eq!(config.problem.symbols.len(), 2);
    }

    #[test]
    fn test_invalid_probability() {
        let mut config = SearchConfig::default();
        config.operators.mutation_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability { name: "mutation_rate", .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = SearchConfig::default();
        config.evaluation.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConcurrency)));
    }

    #[test]
    fn test_symbol_arity_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.json");
        fs::write(&path, r#"{"[0, 1]": [["a", 50.0], ["b", 50.0]]}"#).unwrap();

        let mut config = SearchConfig::default();
        config.problem.reference = path;
        config.problem.symbols = vec!["a".into(), "b".into(), "c".into()];

        assert!(matches!(
            config.load_reference(),
            Err(ConfigError::SymbolArityMismatch { symbols: 3, arity: 2 })
        ));
    }

    #[test]
    fn test_resolve_paths_anchors_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rule_creator.py"), "").unwrap();
        fs::write(dir.path().join("file_comparison.py"), "").unwrap();

        let mut config = SearchConfig::default();
        config.evaluation.scratch_dir = Some(PathBuf::from("scratch"));
        config.resolve_paths(dir.path());

        let generator = &config.collaborators.generator;
        assert_eq!(generator.program, "python3");
        assert_eq!(
            generator.args[0],
            dir.path().join("rule_creator.py").to_string_lossy()
        );
        assert_eq!(generator.args[1], "{parameters}");

        let comparator = &config.collaborators.comparator;
        assert_eq!(
            comparator.args[0],
            dir.path().join("file_comparison.py").to_string_lossy()
        );
        assert!(comparator.args[1..].iter().all(|a| a.starts_with('{')));

        assert_eq!(config.collaborators.simulator.run.program, "{binary}");

        assert_eq!(config.problem.reference, dir.path().join("reference.json"));
        assert!(config.output.dir.is_absolute());
        assert_eq!(config.evaluation.scratch_dir, Some(dir.path().join("scratch")));
    }

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("/usr/bin/env", &["/opt/score.py", ""]);
        assert_eq!(spec.resolve_against(dir.path()), spec);

        let mut config = SearchConfig::default();
        config.problem.reference = PathBuf::from("/data/reference.json");
        config.resolve_paths(dir.path());
        assert_eq!(config.problem.reference, PathBuf::from("/data/reference.json"));
    }

    #[test]
    fn test_serialization() {
        let config = SearchConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SearchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.population.size, config.population.size);
        assert_eq!(parsed.collaborators.generator, config.collaborators.generator);
    }
}
