use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// File extensions treated as loadable modules when expanding a directory.
const MODULE_EXTENSIONS: &[&str] = &["dll", "exe", "json"];

/// Expand the module arguments into concrete file paths.
///
/// A file argument is passed through as-is (existence is checked later, at
/// load time, so a missing file becomes a skipped module rather than a hard
/// error). A directory argument expands to every module file directly inside
/// it, sorted by name for stable output; subdirectories are not descended
/// into.
pub fn expand_module_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries = Vec::new();
            let dir = fs::read_dir(input)
                .with_context(|| format!("Failed to read module directory {}", input.display()))?;
            for entry in dir {
                let entry = entry
                    .with_context(|| format!("Failed to read entry in {}", input.display()))?;
                let path = entry.path();
                if path.is_file() && has_module_extension(&path) {
                    entries.push(path);
                }
            }
            entries.sort();
            paths.extend(entries);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

fn has_module_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODULE_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
}
