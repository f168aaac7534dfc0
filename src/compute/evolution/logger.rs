//! Run artifacts: per-evaluation dumps, running score log and generation summary.
//!
//! Layout under the output directory:
//!
//! - `fitness-GGG-EEE.txt`: every trial of one evaluation
//! - `run-GGG-EEE.json`: parameter table that was evaluated
//! - `scores.txt`: trial scores and the best score per evaluation
//! - `generations.txt`: `generation<TAB>min<TAB>max` per generation
//! - `result.json`: final run result

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::compute::{TrialFailure, TrialResult};
use crate::schema::{EvolutionResult, GenerationRecord, ParameterVector};

pub const SCORES_FILE: &str = "scores.txt";
pub const GENERATIONS_FILE: &str = "generations.txt";
pub const RESULT_FILE: &str = "result.json";

/// Writes run artifacts. Callers treat every error as non-fatal.
#[derive(Debug, Clone)]
pub struct RunLogger {
    dir: PathBuf,
}

impl RunLogger {
    /// Create the output directory and start fresh running logs.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, LogError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| LogError::io(&dir, source))?;

        let logger = Self { dir };
        for name in [SCORES_FILE, GENERATIONS_FILE] {
            let path = logger.dir.join(name);
            fs::write(&path, "").map_err(|source| LogError::io(&path, source))?;
        }
        Ok(logger)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dump path for one evaluation.
    pub fn dump_path(&self, generation: usize, evaluation: usize) -> PathBuf {
        self.dir
            .join(format!("fitness-{generation:03}-{evaluation:03}.txt"))
    }

    /// Parameter snapshot path for one evaluation.
    pub fn snapshot_path(&self, generation: usize, evaluation: usize) -> PathBuf {
        self.dir.join(format!("run-{generation:03}-{evaluation:03}.json"))
    }

    /// Record one evaluation. `best` is `None` when every trial failed.
    pub fn record_evaluation(
        &self,
        generation: usize,
        evaluation: usize,
        vector: &ParameterVector,
        results: &[TrialResult],
        failures: &[TrialFailure],
        best: Option<f64>,
    ) -> Result<(), LogError> {
        let dump = self.dump_path(generation, evaluation);
        fs::write(&dump, format_dump(results, failures)).map_err(|e| LogError::io(&dump, e))?;

        let snapshot = self.snapshot_path(generation, evaluation);
        fs::write(&snapshot, vector.to_json_pretty()?).map_err(|e| LogError::io(&snapshot, e))?;

        let mut lines = String::new();
        for result in results {
            let _ = writeln!(lines, "  {}", result.score);
        }
        match best {
            Some(score) => {
                let _ = writeln!(lines, "{evaluation}\t{score}");
            }
            None => {
                let _ = writeln!(lines, "{evaluation}\tunevaluated");
            }
        }
        self.append(SCORES_FILE, &lines)
    }

    /// Close a generation: separator in the score log, summary line.
    pub fn end_generation(&self, record: &GenerationRecord) -> Result<(), LogError> {
        self.append(SCORES_FILE, "\n")?;

        let cell = |value: Option<f64>| value.map_or_else(|| "-".to_string(), |v| v.to_string());
        let line = format!(
            "{}\t{}\t{}\n",
            record.index,
            cell(record.min_fitness),
            cell(record.max_fitness)
        );
        self.append(GENERATIONS_FILE, &line)
    }

    /// Persist the final result.
    pub fn write_result(&self, result: &EvolutionResult) -> Result<PathBuf, LogError> {
        let path = self.dir.join(RESULT_FILE);
        let json = serde_json::to_string_pretty(result)?;
        fs::write(&path, json).map_err(|e| LogError::io(&path, e))?;
        Ok(path)
    }

    fn append(&self, name: &str, text: &str) -> Result<(), LogError> {
        let path = self.dir.join(name);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(text.as_bytes()))
            .map_err(|e| LogError::io(&path, e))
    }
}

fn format_dump(results: &[TrialResult], failures: &[TrialFailure]) -> String {
    let mut out = String::new();

    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(out, "=== trial {i} ===");
        let _ = writeln!(out, "score: {}", result.score);
        let _ = writeln!(out, "{}", result.rules_text);
        out.push_str(&format_outcome(&result.raw_outcome));
        for (n, rule) in result.rule_list.iter().enumerate() {
            let _ = writeln!(out, "{}. {rule}", n + 1);
        }
        out.push('\n');
    }

    if !failures.is_empty() {
        let _ = writeln!(out, "=== failed trials ===");
        for failure in failures {
            let _ = writeln!(out, "{}: {}", failure.trial, failure.error);
        }
    }

    out
}

/// `key -> label freq` lines for `[[key, [[label, freq], ...]], ...]`
/// outcomes; pretty JSON for anything else.
fn format_outcome(outcome: &Value) -> String {
    let Some(rows) = outcome.as_array() else {
        return pretty(outcome);
    };

    let mut out = String::new();
    for row in rows {
        let (key, pairs) = match row.as_array().map(Vec::as_slice) {
            Some([key, Value::Array(pairs)]) => (key, pairs),
            _ => return pretty(outcome),
        };

        let key = plain(key);
        for (n, pair) in pairs.iter().enumerate() {
            let (label, freq) = match pair.as_array().map(Vec::as_slice) {
                Some([label, freq]) => (plain(label), plain(freq)),
                _ => (plain(pair), String::new()),
            };
            if n == 0 {
                let _ = writeln!(out, "{key} -> {label} {freq}");
            } else {
                let _ = writeln!(out, "{:>15}{label} {freq}", "");
            }
        }
    }
    out
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pretty(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}

/// Run artifact errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize run artifact: {0}")]
    Json(#[from] serde_json::Error),
}

impl LogError {
    fn io(path: &Path, source: io::Error) -> Self {
        LogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::TrialError;
    use crate::compute::trial::tests::{test_reference, test_vector};
    use serde_json::json;
    use tempfile::tempdir;

    fn result(score: f64) -> TrialResult {
        TrialResult {
            score,
            raw_outcome: json!([["[0, 1]", [["on", 41.0], ["off", 59.0]]]]),
            rules_text: "x1 & x2".into(),
            rule_list: vec!["x1 -> x2".into(), "x2 -> !x1".into()],
        }
    }

    #[test]
    fn test_record_evaluation_files() {
        let dir = tempdir().unwrap();
        let logger = RunLogger::create(dir.path()).unwrap();
        let reference = test_reference();
        let vector = test_vector(&reference);

        let failures = vec![TrialFailure {
            trial: 2,
            error: TrialError::Execution("crashed".into()),
        }];
        logger
            .record_evaluation(1, 4, &vector, &[result(2.5), result(1.5)], &failures, Some(1.5))
            .unwrap();

        let dump = fs::read_to_string(dir.path().join("fitness-001-004.txt")).unwrap();
        assert!(dump.contains("score: 2.5"));
        assert!(dump.contains("[0, 1] -> on 41.0"));
        assert!(dump.contains(&format!("{:>15}off 59.0", "")));
        assert!(dump.contains("2. x2 -> !x1"));
        assert!(dump.contains("2: Simulator execution failed: crashed"));

        let snapshot = fs::read_to_string(dir.path().join("run-001-004.json")).unwrap();
        assert_eq!(snapshot, vector.to_json_pretty().unwrap());

        let scores = fs::read_to_string(dir.path().join(SCORES_FILE)).unwrap();
        assert_eq!(scores, "  2.5\n  1.5\n4\t1.5\n");
    }

    #[test]
    fn test_unevaluated_and_generation_lines() {
        let dir = tempdir().unwrap();
        let logger = RunLogger::create(dir.path()).unwrap();
        let reference = test_reference();
        let vector = test_vector(&reference);

        logger.record_evaluation(0, 0, &vector, &[], &[], None).unwrap();
        logger
            .end_generation(&GenerationRecord {
                index: 0,
                min_fitness: None,
                max_fitness: None,
                evaluated: 1,
                unevaluated: 1,
            })
            .unwrap();
        logger
            .end_generation(&GenerationRecord {
                index: 1,
                min_fitness: Some(0.5),
                max_fitness: Some(2.0),
                evaluated: 3,
                unevaluated: 0,
            })
            .unwrap();

        let scores = fs::read_to_string(dir.path().join(SCORES_FILE)).unwrap();
        assert_eq!(scores, "0\tunevaluated\n\n\n");

        let generations = fs::read_to_string(dir.path().join(GENERATIONS_FILE)).unwrap();
        assert_eq!(generations, "0\t-\t-\n1\t0.5\t2\n");
    }

    #[test]
    fn test_create_truncates_running_logs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SCORES_FILE), "stale").unwrap();

        RunLogger::create(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join(SCORES_FILE)).unwrap(), "");
    }

    #[test]
    fn test_unwritable_dir_reports_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        assert!(matches!(
            RunLogger::create(blocker.join("out")),
            Err(LogError::Io { .. })
        ));
    }

    #[test]
    fn test_non_table_outcome_is_pretty_printed() {
        let text = format_outcome(&json!({"steady": true}));
        assert!(text.contains("\"steady\": true"));
    }
}
