//! Cross-module type reference resolution.
//!
//! [`RunContext`] owns everything with run lifetime: the module loader, the
//! caller-ordered reference search path, and the loaded-module cache. The
//! cache memoizes failures as well as successes, so a given module identity
//! is probed on disk at most once per run no matter how many references
//! point at it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::loader::{LoadError, ModuleLoader};
use crate::model::{Module, ReferenceScope, TypeRecord, TypeReference};

/// Outcome of resolving one [`TypeReference`].
///
/// `Unresolved` is an expected, frequent result (references into assemblies
/// that are not on the search path), not an error.
#[derive(Debug)]
pub enum Resolution {
    Resolved(ResolvedType),
    Unresolved,
}

/// A reference resolved to a concrete type definition in a loaded module.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    module: Arc<Module>,
    index: usize,
}

impl ResolvedType {
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn record(&self) -> &TypeRecord {
        &self.module.types()[self.index]
    }
}

/// Per-run resolution state. Create one per scan; dropping it releases every
/// module loaded during the run.
pub struct RunContext {
    loader: Box<dyn ModuleLoader>,
    search_paths: Vec<PathBuf>,
    /// Module identity key -> loaded module, or `None` for a memoized miss.
    cache: HashMap<String, Option<Arc<Module>>>,
}

impl RunContext {
    pub fn new(loader: Box<dyn ModuleLoader>, search_paths: Vec<PathBuf>) -> Self {
        Self { loader, search_paths, cache: HashMap::new() }
    }

    /// Load a module given directly to the run (a scan input), registering it
    /// in the cache so later cross-module references find it without probing.
    pub fn load_root(&mut self, path: &Path) -> Result<Arc<Module>, LoadError> {
        let module = Arc::new(self.loader.load(path)?);
        let key = module.identity().cache_key();
        self.cache.entry(key).or_insert_with(|| Some(module.clone()));
        Ok(module)
    }

    /// Resolve `reference` as seen from `origin`.
    pub fn resolve(&mut self, origin: &Arc<Module>, reference: &TypeReference) -> Resolution {
        if reference.full_name.is_empty() {
            return Resolution::Unresolved;
        }
        match &reference.scope {
            ReferenceScope::Local => {
                Self::type_in(origin.clone(), &reference.full_name)
            }
            ReferenceScope::Assembly { name, .. } => {
                if name.is_empty() {
                    return Resolution::Unresolved;
                }
                let key = name.to_lowercase();
                let candidates = [
                    format!("{name}.dll"),
                    format!("{name}.exe"),
                    format!("{name}.json"),
                ];
                match self.ensure_module(&key, &candidates, origin.directory(), true) {
                    Some(module) => Self::type_in(module, &reference.full_name),
                    None => Resolution::Unresolved,
                }
            }
            ReferenceScope::SiblingModule { file_name } => {
                if file_name.is_empty() {
                    return Resolution::Unresolved;
                }
                // Sibling netmodules are addressed by exact file name, so
                // identity-match against the manifest would be wrong here.
                let key = format!("module:{}", file_name.to_lowercase());
                let candidates = [file_name.clone()];
                match self.ensure_module(&key, &candidates, origin.directory(), false) {
                    Some(module) => Self::type_in(module, &reference.full_name),
                    None => Resolution::Unresolved,
                }
            }
        }
    }

    fn type_in(module: Arc<Module>, full_name: &str) -> Resolution {
        match module.type_named(full_name) {
            Some(index) => Resolution::Resolved(ResolvedType { module, index }),
            None => Resolution::Unresolved,
        }
    }

    /// Find or load the module cached under `key`, probing the originating
    /// module's directory first and then the search path, in order. Both the
    /// loaded module and a definitive miss are memoized under `key`.
    fn ensure_module(
        &mut self,
        key: &str,
        candidates: &[String],
        origin_dir: Option<&Path>,
        check_identity: bool,
    ) -> Option<Arc<Module>> {
        if let Some(cached) = self.cache.get(key) {
            return cached.clone();
        }

        let mut directories: Vec<&Path> = Vec::with_capacity(self.search_paths.len() + 1);
        if let Some(dir) = origin_dir {
            directories.push(dir);
        }
        directories.extend(self.search_paths.iter().map(PathBuf::as_path));

        for dir in directories {
            for candidate in candidates {
                let path = dir.join(candidate);
                if !path.is_file() {
                    continue;
                }
                match self.loader.load(&path) {
                    Ok(module) => {
                        let module = Arc::new(module);
                        let own_key = module.identity().cache_key();
                        if check_identity && own_key != key {
                            // Wrong assembly behind a matching file name; keep
                            // it for later queries but keep probing.
                            debug!(
                                path = %path.display(),
                                wanted = key,
                                found = %module.identity().name,
                                "candidate identity mismatch"
                            );
                            self.cache.entry(own_key).or_insert_with(|| Some(module.clone()));
                            continue;
                        }
                        debug!(path = %path.display(), identity = key, "loaded external module");
                        self.cache.insert(key.to_string(), Some(module.clone()));
                        return Some(module);
                    }
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "candidate failed to load");
                    }
                }
            }
        }

        debug!(identity = key, "module not found on search path");
        self.cache.insert(key.to_string(), None);
        None
    }
}
