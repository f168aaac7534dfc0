//! Evolutionary search over parameter tables.
//!
//! # Overview
//!
//! - **Operators** (`operators`): tournament selection, two-point crossover
//!   and polynomial bounded mutation on `[0, 1]` genomes
//! - **Search** (`search`): the generational loop with selective re-evaluation
//! - **Run logger** (`logger`): per-evaluation dumps and running score logs
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use freqfit::compute::evolution::{EvolutionEngine, RunLogger};
//! use freqfit::compute::{
//!     CommandComparator, CommandRuleGenerator, CommandSimulator, ParallelEvaluator, TrialRunner,
//! };
//! use freqfit::schema::SearchConfig;
//!
//! let config = SearchConfig::default();
//! let reference = Arc::new(config.load_reference().unwrap());
//! let collaborators = &config.collaborators;
//! let runner = TrialRunner::new(
//!     reference,
//!     Arc::new(CommandRuleGenerator::new(collaborators.generator.clone())),
//!     Arc::new(CommandSimulator::new(collaborators.simulator.clone())),
//!     Arc::new(CommandComparator::new(collaborators.comparator.clone())),
//! );
//! let evaluator = ParallelEvaluator::new(Arc::new(runner), config.problem.symbols.clone());
//!
//! let logger = RunLogger::create(&config.output.dir).unwrap();
//! let mut engine = EvolutionEngine::new(config, evaluator).with_logger(logger);
//! let result = engine.run_with_callback(|progress| {
//!     println!("Generation {}: best = {:?}", progress.generation, progress.best_fitness);
//! });
//! println!("Stopped: {:?}", result.stats.stop_reason);
//! ```

mod logger;
mod operators;
mod search;

pub use logger::{GENERATIONS_FILE, LogError, RESULT_FILE, RunLogger, SCORES_FILE};
pub use operators::{GenomeRng, best_index};
pub use search::EvolutionEngine;
