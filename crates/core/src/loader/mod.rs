//! Module loading: turning files on disk into [`Module`] values.
//!
//! Two concrete loaders sit behind the [`ModuleLoader`] trait:
//! - [`PeModuleLoader`] reads real .NET assemblies (PE + CLI metadata),
//!   compiled in with the default `pe-backend` feature;
//! - [`FixtureLoader`] reads JSON module descriptors, the format used by the
//!   test suites and handy for prototyping hierarchies without a compiler.
//!
//! [`AutoLoader`] sniffs the file contents and dispatches to whichever
//! applies, reporting anything else as an unsupported module.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::metadata::MetadataError;
use crate::model::{Module, ModuleIdentity, ReferenceScope, TypeRecord, TypeReference};

/// Why a module file could not be turned into a [`Module`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not in any format we know how to load. Batch callers skip
    /// these and keep going.
    #[error("{path} is not a supported module: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("malformed metadata in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: MetadataError,
    },

    #[error("bad module descriptor {path}: {source}")]
    BadDescriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Loads one module file. Implementations must not keep state between calls;
/// caching is the run context's job.
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<Module, LoadError>;
    fn name(&self) -> &'static str;
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })
}

/// Loader for .NET assemblies (PE images with CLI metadata).
#[cfg(feature = "pe-backend")]
#[derive(Debug, Default)]
pub struct PeModuleLoader;

#[cfg(feature = "pe-backend")]
impl PeModuleLoader {
    fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Module, LoadError> {
        let meta = crate::metadata::pe::extract_metadata(bytes)
            .map_err(|source| LoadError::Malformed { path: path.to_path_buf(), source })?;
        let module = crate::metadata::module_from_metadata(path, meta)
            .map_err(|source| LoadError::Malformed { path: path.to_path_buf(), source })?;
        debug!(
            path = %path.display(),
            assembly = %module.identity().name,
            types = module.types().len(),
            "loaded assembly"
        );
        Ok(module)
    }
}

#[cfg(feature = "pe-backend")]
impl ModuleLoader for PeModuleLoader {
    fn load(&self, path: &Path) -> Result<Module, LoadError> {
        let bytes = read_file(path)?;
        Self::from_bytes(path, &bytes)
    }

    fn name(&self) -> &'static str {
        "pe"
    }
}

/// JSON module descriptor: the on-disk shape read by [`FixtureLoader`].
#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub types: Vec<TypeDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TypeDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default)]
    pub bases: Vec<BaseDoc>,
}

/// A direct base edge; `assembly: None` means same-module.
#[derive(Debug, Serialize, Deserialize)]
pub struct BaseDoc {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly: Option<String>,
}

/// Loader for JSON module descriptors.
#[derive(Debug, Default)]
pub struct FixtureLoader;

impl FixtureLoader {
    fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Module, LoadError> {
        let doc: ModuleDoc = serde_json::from_slice(bytes)
            .map_err(|source| LoadError::BadDescriptor { path: path.to_path_buf(), source })?;
        Ok(Self::build(path, doc))
    }

    fn build(path: &Path, doc: ModuleDoc) -> Module {
        let types = doc
            .types
            .into_iter()
            .map(|ty| {
                let bases = ty
                    .bases
                    .into_iter()
                    .map(|base| TypeReference {
                        full_name: base.full_name,
                        scope: match base.assembly {
                            Some(name) => ReferenceScope::Assembly { name, version: None },
                            None => ReferenceScope::Local,
                        },
                    })
                    .collect();
                TypeRecord::new(ty.namespace, ty.name).with_bases(bases)
            })
            .collect();
        debug!(path = %path.display(), module = %doc.name, "loaded module descriptor");
        Module::new(path, ModuleIdentity::new(doc.name, doc.version), doc.runtime_version, types)
    }
}

impl ModuleLoader for FixtureLoader {
    fn load(&self, path: &Path) -> Result<Module, LoadError> {
        let bytes = read_file(path)?;
        Self::from_bytes(path, &bytes)
    }

    fn name(&self) -> &'static str {
        "descriptor"
    }
}

/// Dispatching loader: PE images by MZ magic, descriptors by leading JSON,
/// anything else is unsupported.
#[derive(Debug, Default)]
pub struct AutoLoader;

impl ModuleLoader for AutoLoader {
    fn load(&self, path: &Path) -> Result<Module, LoadError> {
        let bytes = read_file(path)?;
        if bytes.starts_with(b"MZ") {
            #[cfg(feature = "pe-backend")]
            {
                return PeModuleLoader::from_bytes(path, &bytes);
            }
            #[cfg(not(feature = "pe-backend"))]
            {
                return Err(LoadError::Unsupported {
                    path: path.to_path_buf(),
                    reason: "PE support not compiled in (enable the pe-backend feature)".into(),
                });
            }
        }
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
        if first == Some(&b'{') {
            return FixtureLoader::from_bytes(path, &bytes);
        }
        Err(LoadError::Unsupported {
            path: path.to_path_buf(),
            reason: "unrecognized module format".into(),
        })
    }

    fn name(&self) -> &'static str {
        "auto"
    }
}
