//! basehound-core
//!
//! Core library for finding every type, across a set of .NET assemblies,
//! that transitively derives from a caller-specified base type.
//!
//! The pipeline: a [`loader::ModuleLoader`] turns files into [`model::Module`]s,
//! [`resolver::RunContext`] follows type references across module boundaries
//! (caching each loaded module for the run), [`hierarchy::derives_from`] walks
//! ancestor chains, and [`matcher::find_derived`] drives the whole batch,
//! tolerating unloadable inputs.
//!
//! All substantive logic lives here so it is fully testable and reusable from
//! multiple frontends.

pub mod hierarchy;
pub mod loader;
pub mod matcher;
pub mod metadata;
pub mod model;
pub mod report;
pub mod resolver;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
