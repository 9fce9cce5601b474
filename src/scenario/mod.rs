//! Scenario documents
//!
//! The declarative test format: a named sequence of setup, primary, and
//! cleanup actions plus global assertions, loadable from JSON or YAML.

mod loader;
mod model;

pub use loader::{load_scenario, scenario_from_value, validate};
pub use model::*;
