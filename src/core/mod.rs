// Core infrastructure shared by the build flow

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{BuildConfig, BuildConfigOverrides, FailurePolicy, TraversalPolicy};
pub use errors::{BuildError, Result};
