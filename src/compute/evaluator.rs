//! Fan-out/fan-in trial evaluation on a bounded worker pool.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::trial::{TrialError, TrialResult, TrialRunner};
use crate::schema::ParameterVector;

/// A trial that failed, with its launch index.
#[derive(Debug)]
pub struct TrialFailure {
    pub trial: usize,
    pub error: TrialError,
}

/// Outcome of evaluating one parameter table.
#[derive(Debug)]
pub struct Evaluation {
    /// Minimum score over `results`.
    pub best_score: f64,
    /// One entry per successful trial, in launch order.
    pub results: Vec<TrialResult>,
    /// Trials that failed.
    pub failures: Vec<TrialFailure>,
    /// Wall-clock time of the parallel region.
    pub elapsed: Duration,
}

impl Evaluation {
    /// Trials launched.
    pub fn launched(&self) -> usize {
        self.results.len() + self.failures.len()
    }
}

/// Runs repeated trials of one parameter table in parallel.
pub struct ParallelEvaluator {
    runner: Arc<TrialRunner>,
    symbols: Arc<[String]>,
}

impl ParallelEvaluator {
    pub fn new(runner: Arc<TrialRunner>, symbols: Vec<String>) -> Self {
        Self {
            runner,
            symbols: symbols.into(),
        }
    }

    pub fn runner(&self) -> &TrialRunner {
        &self.runner
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Launch `trial_count` trials with at most `concurrency` running at once.
    ///
    /// Returns only after every trial has finished. Individual failures are
    /// collected; the call fails only when no trial succeeded.
    pub fn evaluate(
        &self,
        vector: &ParameterVector,
        trial_count: usize,
        concurrency: usize,
    ) -> Result<Evaluation, EvaluationError> {
        if trial_count == 0 {
            return Err(EvaluationError::InvalidRequest("trial count must be positive"));
        }
        if concurrency == 0 {
            return Err(EvaluationError::InvalidRequest("concurrency must be positive"));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.min(trial_count))
            .thread_name(|i| format!("trial-{i}"))
            .build()?;

        let start = Instant::now();
        let runner = &self.runner;
        let symbols = &self.symbols;
        let outcomes: Vec<Result<TrialResult, TrialError>> = pool.install(|| {
            (0..trial_count)
                .into_par_iter()
                .map(|_| run_isolated(runner, vector, symbols))
                .collect()
        });
        let elapsed = start.elapsed();

        let mut results = Vec::with_capacity(trial_count);
        let mut failures = Vec::new();
        for (trial, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(result) => results.push(result),
                Err(error) => {
                    log::warn!("Trial {trial} failed: {error}");
                    failures.push(TrialFailure { trial, error });
                }
            }
        }

        log::info!(
            "Ran {trial_count} trials in {:.2}s ({} failed)",
            elapsed.as_secs_f64(),
            failures.len()
        );

        let Some(best_score) = results.iter().map(|r| r.score).reduce(f64::min) else {
            return Err(EvaluationError::Incomplete { failures });
        };

        Ok(Evaluation {
            best_score,
            results,
            failures,
            elapsed,
        })
    }
}

/// Run one trial, turning a panic inside a collaborator into a trial failure.
fn run_isolated(
    runner: &TrialRunner,
    vector: &ParameterVector,
    symbols: &[String],
) -> Result<TrialResult, TrialError> {
    panic::catch_unwind(AssertUnwindSafe(|| runner.run(vector, symbols)))
        .unwrap_or_else(|payload| Err(TrialError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("All {} trials failed", .failures.len())]
    Incomplete { failures: Vec<TrialFailure> },
    #[error("Invalid evaluation request: {0}")]
    InvalidRequest(&'static str),
    #[error("Failed to build trial pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
