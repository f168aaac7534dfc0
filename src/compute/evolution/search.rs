//! Generational search over parameter tables.
//!
//! Each generation runs select, crossover, mutate, re-evaluate and track,
//! strictly in that order. Only individuals whose genome changed are
//! re-evaluated; the parallelism lives inside each evaluation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::compute::{EvaluationError, ParallelEvaluator, ParameterEncoder};
use crate::schema::{
    EvolutionPhase, EvolutionProgress, EvolutionResult, EvolutionStats, GenerationRecord,
    Individual, IndividualSnapshot, SearchConfig, StopReason, score_range,
};

use super::logger::RunLogger;
use super::operators::{GenomeRng, best_index};

/// Evolution engine that runs the search.
pub struct EvolutionEngine {
    config: SearchConfig,
    rng: GenomeRng,
    encoder: ParameterEncoder,
    evaluator: ParallelEvaluator,
    logger: Option<RunLogger>,
    population: Vec<Individual>,
    seeded: bool,
    history: Vec<GenerationRecord>,
    generation: usize,
    /// Evaluation index within the current generation.
    evaluation: usize,
    evaluations: u64,
    trials_launched: u64,
    trials_failed: u64,
    cancelled: Arc<AtomicBool>,
    phase: EvolutionPhase,
}

impl EvolutionEngine {
    /// Create a new evolution engine. The genome layout is fixed from the
    /// evaluator's reference dataset.
    pub fn new(config: SearchConfig, evaluator: ParallelEvaluator) -> Self {
        let rng = match config.population.random_seed {
            Some(seed) => GenomeRng::new(seed),
            None => GenomeRng::random(),
        };
        let encoder = ParameterEncoder::new(evaluator.runner().reference());

        Self {
            config,
            rng,
            encoder,
            evaluator,
            logger: None,
            population: Vec::new(),
            seeded: false,
            history: Vec::new(),
            generation: 0,
            evaluation: 0,
            evaluations: 0,
            trials_launched: 0,
            trials_failed: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            phase: EvolutionPhase::Initializing,
        }
    }

    /// Write run artifacts through `logger`.
    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Start from a pre-built population instead of random genomes.
    ///
    /// The seeded population's length is kept for the whole run and takes
    /// precedence over `population.size`.
    pub fn with_population(mut self, population: Vec<Individual>) -> Self {
        self.population = population;
        self.seeded = true;
        self
    }

    /// Get cancellation handle. Checked between generations only.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Genome length N.
    pub fn genome_len(&self) -> usize {
        self.encoder.genome_len()
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    pub fn history(&self) -> &[GenerationRecord] {
        &self.history
    }

    /// Initialize the population.
    pub fn initialize(&mut self) {
        self.generation = 0;
        self.evaluation = 0;
        self.history.clear();
        self.phase = EvolutionPhase::Initializing;

        if self.seeded {
            return;
        }

        let n = self.encoder.genome_len();
        self.population = (0..self.config.population.size)
            .map(|_| Individual::new(self.rng.random_genome(n)))
            .collect();
    }

    /// Evaluate every individual whose fitness is pending, one after another.
    ///
    /// Returns the number of individuals evaluated.
    fn evaluate_pending(&mut self) -> usize {
        self.evaluation = 0;
        let mut evaluated = 0;

        for idx in 0..self.population.len() {
            if !self.population[idx].needs_evaluation() {
                continue;
            }

            let genome = self.population[idx].genome().to_vec();
            let score = self.evaluate_genome(&genome);
            evaluated += 1;

            let individual = &mut self.population[idx];
            let assigned = match score {
                Some(score) => individual.assign_score(score),
                None => individual.mark_unevaluated(),
            };
            if let Err(e) = assigned {
                log::error!("Individual {idx}: {e}");
            }
        }

        evaluated
    }

    /// Run the trials for one genome. `None` means no score could be obtained.
    fn evaluate_genome(&mut self, genome: &[f64]) -> Option<f64> {
        let reference = self.evaluator.runner().reference();
        let vector = match self.encoder.build_parameter_vector(genome, reference) {
            Ok(vector) => vector,
            Err(e) => {
                log::error!("Generation {}: cannot encode genome: {e}", self.generation);
                return None;
            }
        };

        let index = self.evaluation;
        self.evaluation += 1;
        self.evaluations += 1;

        let settings = &self.config.evaluation;
        let outcome = self
            .evaluator
            .evaluate(&vector, settings.trials, settings.concurrency);

        let (score, logged) = match &outcome {
            Ok(evaluation) => {
                self.trials_launched += evaluation.launched() as u64;
                self.trials_failed += evaluation.failures.len() as u64;
                log::debug!(
                    "Generation {} evaluation {index}: best {}",
                    self.generation,
                    evaluation.best_score
                );
                (
                    Some(evaluation.best_score),
                    Some((evaluation.results.as_slice(), evaluation.failures.as_slice())),
                )
            }
            Err(EvaluationError::Incomplete { failures }) => {
                self.trials_launched += failures.len() as u64;
                self.trials_failed += failures.len() as u64;
                log::warn!(
                    "Generation {} evaluation {index}: all trials failed, marking unevaluated",
                    self.generation
                );
                (None, Some((&[][..], failures.as_slice())))
            }
            Err(e) => {
                log::error!("Generation {} evaluation {index}: {e}", self.generation);
                (None, None)
            }
        };

        if let Some(logger) = &self.logger
            && let Some((results, failures)) = logged
            && let Err(e) =
                logger.record_evaluation(self.generation, index, &vector, results, failures, score)
        {
            log::error!("Failed to record evaluation: {e}");
        }

        score
    }

    /// Summarize the current generation and append it to the history.
    fn track(&mut self, evaluated: usize) {
        let record = GenerationRecord::from_population(self.generation, &self.population, evaluated);

        match (record.min_fitness, record.max_fitness) {
            (Some(min), Some(max)) => log::info!(
                "Generation {}: min {min:.6} max {max:.6} ({evaluated} evaluated, {} unevaluated)",
                record.index,
                record.unevaluated
            ),
            _ => log::warn!(
                "Generation {}: no individual has a score ({evaluated} evaluated)",
                record.index
            ),
        }

        if let Some(logger) = &self.logger
            && let Err(e) = logger.end_generation(&record)
        {
            log::error!("Failed to record generation: {e}");
        }

        self.history.push(record);
    }

    /// Run a single generation step.
    fn step_generation(&mut self) {
        self.generation += 1;
        let ops = &self.config.operators;

        // Selection
        let mut offspring =
            self.rng
                .select(&self.population, self.population.len(), ops.tournament_size);

        // Crossover on adjacent pairs
        for pair in offspring.chunks_exact_mut(2) {
            if self.rng.chance(ops.crossover_rate) {
                let (first, second) = pair.split_at_mut(1);
                self.rng.two_point_crossover(&mut first[0], &mut second[0]);
            }
        }

        // Mutation
        for individual in &mut offspring {
            if self.rng.chance(ops.mutation_rate) {
                self.rng
                    .polynomial_bounded_mutation(individual, ops.eta, ops.gene_mutation_rate);
            }
        }

        self.population = offspring;

        let evaluated = self.evaluate_pending();
        self.track(evaluated);
    }

    /// Best score seen in any generation.
    fn best_fitness(&self) -> Option<f64> {
        self.history
            .iter()
            .filter_map(|record| record.min_fitness)
            .reduce(f64::min)
    }

    /// Get current progress.
    pub fn progress(&self) -> EvolutionProgress {
        EvolutionProgress {
            generation: self.generation,
            max_generations: self.config.population.max_generations,
            best_fitness: self.best_fitness(),
            latest: self.history.last().cloned(),
            evaluations: self.evaluations,
            phase: self.phase.clone(),
        }
    }

    /// Check if evolution should stop.
    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if let Some((min, _)) = score_range(&self.population)
            && min <= 0.0
        {
            return Some(StopReason::TargetReached);
        }

        if self.generation >= self.config.population.max_generations {
            return Some(StopReason::MaxGenerations);
        }

        None
    }

    /// Run evolution with progress callback.
    ///
    /// The callback fires after the initial evaluation and after every
    /// generation.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> EvolutionResult
    where
        F: FnMut(&EvolutionProgress),
    {
        let start_time = Instant::now();

        self.initialize();
        log::info!(
            "Starting search: {} individuals, genome length {}, up to {} generations",
            self.population.len(),
            self.encoder.genome_len(),
            self.config.population.max_generations
        );

        if !self.cancelled.load(Ordering::Relaxed) {
            let evaluated = self.evaluate_pending();
            self.track(evaluated);
            self.phase = EvolutionPhase::Evolving;
            callback(&self.progress());
        }

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }

            self.step_generation();
            callback(&self.progress());
        };

        self.phase = match stop_reason {
            StopReason::Cancelled => EvolutionPhase::Stopped,
            _ => EvolutionPhase::Complete,
        };
        log::info!(
            "Search finished after {} generations: {:?}",
            self.generation,
            stop_reason
        );

        let best = best_index(&self.population).map(|idx| {
            let individual = &self.population[idx];
            IndividualSnapshot {
                genome: individual.genome().to_vec(),
                fitness: individual.fitness(),
                generation: self.generation,
            }
        });

        let result = EvolutionResult {
            best,
            history: self.history.clone(),
            stats: EvolutionStats {
                generations: self.generation,
                evaluations: self.evaluations,
                trials_launched: self.trials_launched,
                trials_failed: self.trials_failed,
                best_fitness: self.best_fitness(),
                elapsed_seconds: start_time.elapsed().as_secs_f64(),
                stop_reason,
            },
        };

        if let Some(logger) = &self.logger
            && let Err(e) = logger.write_result(&result)
        {
            log::error!("Failed to write result: {e}");
        }

        result
    }

    /// Run evolution (blocking).
    pub fn run(&mut self) -> EvolutionResult {
        self.run_with_callback(|_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::TrialRunner;
    use crate::compute::trial::tests::{
        constant_comparator, stub_generator, stub_simulator, test_reference,
    };
    use crate::compute::trial::{Comparator, ExternalSimulator, TrialError, TrialWorkspace};
    use crate::schema::{Fitness, ReferenceDataset};
    use serde_json::Value;
    use std::path::Path;

    fn config(size: usize, max_generations: usize) -> SearchConfig {
        let mut config = SearchConfig::default();
        config.population.size = size;
        config.population.max_generations = max_generations;
        config.population.random_seed = Some(42);
        config.evaluation.trials = 3;
        config.evaluation.concurrency = 2;
        config
    }

    fn engine_with(
        config: SearchConfig,
        simulator: Arc<dyn ExternalSimulator>,
        comparator: Arc<dyn Comparator>,
    ) -> EvolutionEngine {
        let runner = TrialRunner::new(
            Arc::new(test_reference()),
            stub_generator(),
            simulator,
            comparator,
        );
        let evaluator = ParallelEvaluator::new(Arc::new(runner), vec!["a".into(), "b".into()]);
        EvolutionEngine::new(config, evaluator)
    }

    fn scored_population(size: usize, score: f64) -> Vec<Individual> {
        let mut rng = GenomeRng::new(123);
        (0..size)
            .map(|_| Individual::with_score(rng.random_genome(4), score))
            .collect()
    }

    #[test]
    fn test_initialize_population() {
        let mut engine = engine_with(config(10, 5), stub_simulator(), constant_comparator(1.0));
        engine.initialize();

        assert_eq!(engine.genome_len(), 4);
        assert_eq!(engine.population().len(), 10);
        assert!(engine.population().iter().all(Individual::needs_evaluation));
    }

    #[test]
    fn test_single_generation_keeps_population_size() {
        let mut engine = engine_with(config(5, 100), stub_simulator(), constant_comparator(0.75))
            .with_population(scored_population(5, 1.0));
        engine.initialize();
        engine.step_generation();

        assert_eq!(engine.population().len(), 5);
        for individual in engine.population() {
            let score = individual.score().unwrap();
            assert!(score >= 0.0);
            assert!(score == 1.0 || score == 0.75);
            assert_eq!(individual.genome().len(), 4);
            assert!(individual.genome().iter().all(|g| (0.0..=1.0).contains(g)));
        }

        let record = &engine.history()[0];
        assert_eq!(record.index, 1);
        assert_eq!(engine.evaluations as usize, record.evaluated);
    }

    #[test]
    fn test_seeded_population_size_is_kept() {
        let mut engine = engine_with(config(5, 2), stub_simulator(), constant_comparator(0.5))
            .with_population(scored_population(3, 1.0));
        let result = engine.run();

        assert_eq!(result.stats.generations, 2);
        assert_eq!(engine.population().len(), 3);
        assert!(result.history.iter().all(|r| r.evaluated <= 3));
    }

    #[test]
    fn test_unchanged_individuals_not_reevaluated() {
        let mut config = config(6, 3);
        config.operators.crossover_rate = 0.0;
        config.operators.mutation_rate = 0.0;

        let mut engine = engine_with(config, stub_simulator(), constant_comparator(0.5))
            .with_population(scored_population(6, 2.0));
        let result = engine.run();

        assert_eq!(result.stats.evaluations, 0);
        assert_eq!(result.stats.trials_launched, 0);
        assert_eq!(result.stats.generations, 3);
        assert!(result.history.iter().all(|r| r.evaluated == 0));
    }

    #[test]
    fn test_run_stops_at_max_generations() {
        let mut engine = engine_with(config(6, 3), stub_simulator(), constant_comparator(1.0));
        let mut reports = Vec::new();
        let result = engine.run_with_callback(|progress| reports.push(progress.generation));

        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.stats.generations, 3);
        assert_eq!(result.history.len(), 4);
        assert_eq!(reports, vec![0, 1, 2, 3]);
        assert_eq!(result.stats.trials_launched, result.stats.evaluations * 3);
        assert_eq!(result.stats.trials_failed, 0);
        assert_eq!(result.stats.best_fitness, Some(1.0));
        assert!(result.best.is_some());
    }

    #[test]
    fn test_zero_score_reaches_target() {
        let mut engine = engine_with(config(4, 50), stub_simulator(), constant_comparator(0.0));
        let result = engine.run();

        assert_eq!(result.stats.stop_reason, StopReason::TargetReached);
        assert_eq!(result.stats.generations, 0);
        assert_eq!(result.stats.evaluations, 4);
        assert_eq!(result.best.unwrap().fitness, Fitness::Scored(0.0));
    }

    #[test]
    fn test_all_trials_failing_marks_unevaluated() {
        let failing: Arc<dyn ExternalSimulator> = Arc::new(
            |_: &Path, _: &TrialWorkspace| -> Result<Value, TrialError> {
                Err(TrialError::Execution("no binary".into()))
            },
        );
        let mut engine = engine_with(config(4, 2), failing, constant_comparator(1.0));
        let result = engine.run();

        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.stats.best_fitness, None);
        assert_eq!(result.stats.trials_failed, result.stats.trials_launched);
        assert!(result.history.iter().all(|r| r.min_fitness.is_none()));
        assert_eq!(result.history[0].unevaluated, 4);
        assert!(
            engine
                .population()
                .iter()
                .all(|ind| ind.fitness() == Fitness::Unevaluated)
        );
    }

    #[test]
    fn test_unevaluated_excluded_from_range() {
        let mut engine = engine_with(config(4, 1), stub_simulator(), constant_comparator(3.0));

        let mut lost = Individual::new(vec![0.1; 4]);
        lost.mark_unevaluated().unwrap();
        let mut population = scored_population(3, 2.0);
        population.push(lost);

        engine = engine.with_population(population);
        engine.initialize();
        engine.track(0);

        let record = &engine.history()[0];
        assert_eq!(record.min_fitness, Some(2.0));
        assert_eq!(record.max_fitness, Some(2.0));
        assert_eq!(record.unevaluated, 1);
    }

    #[test]
    fn test_cancellation() {
        let mut engine = engine_with(config(5, 100), stub_simulator(), constant_comparator(1.0));
        let cancel = engine.cancel_handle();

        // Cancel immediately
        cancel.store(true, Ordering::Relaxed);

        let result = engine.run();
        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.evaluations, 0);
        assert_eq!(engine.progress().phase, EvolutionPhase::Stopped);
    }

    #[test]
    fn test_cancel_between_generations() {
        let mut engine = engine_with(config(4, 100), stub_simulator(), constant_comparator(1.0));
        let cancel = engine.cancel_handle();

        let result = engine.run_with_callback(|progress| {
            if progress.generation == 2 {
                cancel.store(true, Ordering::Relaxed);
            }
        });

        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.generations, 2);
        assert_eq!(result.history.len(), 3);
    }

    #[test]
    fn test_run_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RunLogger::create(dir.path()).unwrap();
        let mut engine = engine_with(config(3, 2), stub_simulator(), constant_comparator(1.5))
            .with_logger(logger);
        engine.run();

        let generations = std::fs::read_to_string(dir.path().join("generations.txt")).unwrap();
        assert_eq!(generations.lines().count(), 3);
        assert!(generations.starts_with("0\t1.5\t1.5"));
        assert!(dir.path().join("fitness-000-000.txt").exists());
        assert!(dir.path().join("run-000-002.json").exists());
        assert!(dir.path().join("result.json").exists());
    }

    #[test]
    fn test_reference_layout_drives_genome_length() {
        let reference: ReferenceDataset = test_reference();
        let engine = engine_with(config(2, 1), stub_simulator(), constant_comparator(1.0));
        assert_eq!(
            engine.genome_len(),
            ParameterEncoder::new(&reference).genome_len()
        );
    }
}
