//! Individuals, per-generation records and run results.

use serde::{Deserialize, Serialize};

// ============================================================================
// Individuals
// ============================================================================

/// Fitness state of an individual. Lower scores are better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Fitness {
    /// Not evaluated since the genome last changed.
    #[default]
    Pending,
    /// Best trial score of the last evaluation.
    Scored(f64),
    /// Evaluated, but every trial failed.
    Unevaluated,
}

impl Fitness {
    /// Numeric score, if one exists.
    pub fn score(&self) -> Option<f64> {
        match self {
            Fitness::Scored(score) => Some(*score),
            _ => None,
        }
    }
}

/// Attempt to assign fitness to an individual that already has one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Fitness already assigned ({0:?}); genome must change before re-evaluation")]
pub struct FitnessAssigned(pub Fitness);

/// One candidate solution: a genome in `[0, 1]^N` and its fitness.
///
/// The genome can only be changed through [`Individual::modify_genome`],
/// which resets fitness to [`Fitness::Pending`] in the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    genome: Vec<f64>,
    fitness: Fitness,
}

impl Individual {
    /// New individual awaiting evaluation.
    pub fn new(genome: Vec<f64>) -> Self {
        Self {
            genome,
            fitness: Fitness::Pending,
        }
    }

    /// Individual carrying a known score (seeded or resumed populations).
    pub fn with_score(genome: Vec<f64>, score: f64) -> Self {
        Self {
            genome,
            fitness: Fitness::Scored(score),
        }
    }

    pub fn genome(&self) -> &[f64] {
        &self.genome
    }

    pub fn fitness(&self) -> Fitness {
        self.fitness
    }

    pub fn score(&self) -> Option<f64> {
        self.fitness.score()
    }

    /// True while fitness is [`Fitness::Pending`].
    pub fn needs_evaluation(&self) -> bool {
        self.fitness == Fitness::Pending
    }

    /// Mutate the genome in place. Fitness is invalidated.
    pub fn modify_genome<R>(&mut self, f: impl FnOnce(&mut [f64]) -> R) -> R {
        self.fitness = Fitness::Pending;
        f(&mut self.genome)
    }

    /// Record the evaluation score.
    pub fn assign_score(&mut self, score: f64) -> Result<(), FitnessAssigned> {
        self.settle(Fitness::Scored(score))
    }

    /// Record that every trial of the evaluation failed.
    pub fn mark_unevaluated(&mut self) -> Result<(), FitnessAssigned> {
        self.settle(Fitness::Unevaluated)
    }

    fn settle(&mut self, fitness: Fitness) -> Result<(), FitnessAssigned> {
        if self.fitness != Fitness::Pending {
            return Err(FitnessAssigned(self.fitness));
        }
        self.fitness = fitness;
        Ok(())
    }
}

/// Minimum and maximum score over the scored individuals.
pub fn score_range(population: &[Individual]) -> Option<(f64, f64)> {
    population
        .iter()
        .filter_map(Individual::score)
        .fold(None, |range, score| match range {
            None => Some((score, score)),
            Some((min, max)) => Some((min.min(score), max.max(score))),
        })
}

// ============================================================================
// Records, progress and results
// ============================================================================

/// Per-generation fitness summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Generation index (0 = initial population).
    pub index: usize,
    /// Lowest score among scored individuals.
    pub min_fitness: Option<f64>,
    /// Highest score among scored individuals.
    pub max_fitness: Option<f64>,
    /// Individuals evaluated during this generation.
    pub evaluated: usize,
    /// Individuals in the unevaluated state at the end of the generation.
    pub unevaluated: usize,
}

impl GenerationRecord {
    /// Summarize a population at the end of a generation.
    pub fn from_population(index: usize, population: &[Individual], evaluated: usize) -> Self {
        let range = score_range(population);
        Self {
            index,
            min_fitness: range.map(|(min, _)| min),
            max_fitness: range.map(|(_, max)| max),
            evaluated,
            unevaluated: population
                .iter()
                .filter(|ind| ind.fitness() == Fitness::Unevaluated)
                .count(),
        }
    }
}

/// Current phase of the search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EvolutionPhase {
    /// Building the initial population.
    #[default]
    Initializing,
    /// Running generations.
    Evolving,
    /// Search finished normally.
    Complete,
    /// Search stopped by cancellation.
    Stopped,
}

/// Progress update emitted after each generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionProgress {
    /// Current generation number.
    pub generation: usize,
    /// Generation limit.
    pub max_generations: usize,
    /// Best score seen so far.
    pub best_fitness: Option<f64>,
    /// Latest generation summary.
    pub latest: Option<GenerationRecord>,
    /// Total evaluations performed so far.
    pub evaluations: u64,
    /// Current phase.
    pub phase: EvolutionPhase,
}

/// Snapshot of an individual for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndividualSnapshot {
    /// Genome values in `[0, 1]`.
    pub genome: Vec<f64>,
    /// Fitness at the time of the snapshot.
    pub fitness: Fitness,
    /// Generation in which the snapshot was taken.
    pub generation: usize,
}

/// Reason the search stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Some individual reached a score of zero.
    TargetReached,
    /// Reached maximum generations.
    MaxGenerations,
    /// Cancelled between generations.
    Cancelled,
}

/// Statistics from a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionStats {
    /// Generations run after the initial evaluation.
    pub generations: usize,
    /// Evaluations performed (one per individual evaluated).
    pub evaluations: u64,
    /// Trials launched across all evaluations.
    pub trials_launched: u64,
    /// Trials that failed.
    pub trials_failed: u64,
    /// Best score achieved.
    pub best_fitness: Option<f64>,
    /// Wall-clock time in seconds.
    pub elapsed_seconds: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionResult {
    /// Best individual in the final population.
    pub best: Option<IndividualSnapshot>,
    /// Per-generation summaries.
    pub history: Vec<GenerationRecord>,
    /// Run statistics.
    pub stats: EvolutionStats,
}
