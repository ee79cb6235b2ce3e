//! Configuration module
//!
//! Loads and validates the installation's YAML configuration: network
//! settings and session tuning.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
