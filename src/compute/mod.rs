//! Compute module - Genome encoding, trial execution and search.

mod encoder;
mod evaluator;
mod external;
pub(crate) mod trial;

pub mod evolution;

pub use encoder::*;
pub use evaluator::*;
pub use external::*;
pub use trial::{
    Comparator, ExternalSimulator, GeneratedRules, PARAMETERS_FILE, RuleGenerator, TrialError,
    TrialResult, TrialRunner, TrialWorkspace,
};
