//! Schema module - Configuration, reference data and search record types.

mod config;
mod evolution;
mod reference;

pub use config::*;
pub use evolution::*;
pub use reference::*;
