// Core infrastructure modules
pub mod core;

// Graph, change tracking and the fork-join scheduler
pub mod build_flow;

// Re-exports for convenience
pub use crate::core::{BuildConfig, BuildConfigOverrides, BuildError, FailurePolicy, Result, TraversalPolicy};
pub use build_flow::*;
