//! Batch matching: scan every type in every given module against a target
//! base name.
//!
//! Per-module load failures are collected, not raised: a corrupt file in the
//! middle of a batch contributes zero matches and the scan carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::hierarchy::derives_from;
use crate::model::Module;
use crate::resolver::RunContext;

/// One type that derives from the target base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedType {
    pub name: String,
    pub full_name: String,
    /// Path of the module the type is defined in.
    pub module: PathBuf,
}

/// A module that was given to the scan but could not be loaded.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedModule {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything a scan produced: matches in first-encountered order plus the
/// modules that were skipped.
#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub matches: Vec<MatchedType>,
    pub skipped: Vec<SkippedModule>,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("target base type name must not be empty")]
    EmptyTarget,
}

/// Find every type across `module_paths` that transitively derives from the
/// type named `target` (exact, case-sensitive, fully-qualified match).
///
/// All inputs are loaded up front (later modules may reference earlier ones),
/// then scanned in the given order, types in definition order. A type is
/// reported once per fully-qualified name even if several base chains (or
/// duplicate definitions) reach the target.
pub fn find_derived(
    ctx: &mut RunContext,
    module_paths: &[PathBuf],
    target: &str,
) -> Result<ScanReport, ScanError> {
    if target.is_empty() {
        return Err(ScanError::EmptyTarget);
    }

    let mut report = ScanReport::default();
    let mut modules: Vec<Arc<Module>> = Vec::with_capacity(module_paths.len());
    for path in module_paths {
        match ctx.load_root(path) {
            Ok(module) => modules.push(module),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping module");
                report
                    .skipped
                    .push(SkippedModule { path: path.clone(), reason: err.to_string() });
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    for module in &modules {
        for index in 0..module.types().len() {
            let ty = &module.types()[index];
            if seen.contains(&ty.full_name) {
                continue;
            }
            if derives_from(module, ty, target, ctx) {
                seen.insert(ty.full_name.clone());
                report.matches.push(MatchedType {
                    name: ty.name.clone(),
                    full_name: ty.full_name.clone(),
                    module: module.path().to_path_buf(),
                });
            }
        }
    }
    Ok(report)
}

/// Load a single module and list its type definitions; the `list-types`
/// inspection path.
pub fn list_types(ctx: &mut RunContext, path: &Path) -> Result<Vec<String>, crate::loader::LoadError> {
    let module = ctx.load_root(path)?;
    Ok(module.types().iter().map(|ty| ty.full_name.clone()).collect())
}
