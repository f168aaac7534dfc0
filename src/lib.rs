//! freqfit - Evolutionary calibration of stochastic rule models against
//! reference frequency tables.
//!
//! A genome of values in `[0, 1]` is spread over the tunable slots of a
//! reference frequency table. Each candidate table is turned into simulator
//! rules by an external generator, simulated many times in parallel, and
//! scored by an external comparator; the best trial score is the fitness.
//!
//! # Architecture
//!
//! - `schema`: configuration, reference data and search record types
//! - `compute`: genome encoding, trials, parallel evaluation and the search loop
//!
//! # Example
//!
//! ```rust,no_run
//! use freqfit::compute::ParameterEncoder;
//! use freqfit::schema::ReferenceDataset;
//!
//! let reference = ReferenceDataset::load("reference.json").unwrap();
//! let encoder = ParameterEncoder::new(&reference);
//!
//! let genome = vec![0.5; encoder.genome_len()];
//! let vector = encoder.build_parameter_vector(&genome, &reference).unwrap();
//! println!("{}", vector.to_json_pretty().unwrap());
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::EvolutionEngine;
pub use compute::{ParallelEvaluator, ParameterEncoder, TrialRunner};
pub use schema::{ReferenceDataset, SearchConfig};
