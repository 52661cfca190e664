//! Core data model for modules, type definitions, and type references.
//!
//! A [`Module`] is one compiled binary unit (a .NET assembly or a module
//! descriptor file). It owns its [`TypeRecord`]s; everything here is immutable
//! once constructed so modules can be shared via `Arc` between the scan list
//! and the loaded-module cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identity of a module, used to deduplicate loads within a run.
///
/// Assembly simple names are case-insensitive in .NET, so cache keys go
/// through [`ModuleIdentity::cache_key`]. The version is an advisory display
/// token ("1.2.3.4"); name match alone selects a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self { name: name.into(), version }
    }

    /// Case-folded key for the loaded-module cache.
    pub fn cache_key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Where a [`TypeReference`] expects its target to be defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceScope {
    /// Defined in the same module that owns the reference.
    Local,
    /// Defined in another assembly (TypeRef via AssemblyRef).
    Assembly {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Defined in a sibling file of a multi-file assembly (TypeRef via ModuleRef).
    SiblingModule { file_name: String },
}

/// An unresolved pointer to a type, possibly crossing module boundaries.
///
/// Carries only identity: the namespace-qualified name plus a scope hint.
/// Transient query artifact; owns nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeReference {
    pub full_name: String,
    pub scope: ReferenceScope,
}

impl TypeReference {
    pub fn local(full_name: impl Into<String>) -> Self {
        Self { full_name: full_name.into(), scope: ReferenceScope::Local }
    }

    pub fn in_assembly(full_name: impl Into<String>, assembly: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            scope: ReferenceScope::Assembly { name: assembly.into(), version: None },
        }
    }
}

/// A single type definition with its direct base references.
///
/// `bases` is ordered: the class-extends edge (if any) first, then
/// interface-implements edges in metadata row order. For an interface the
/// list holds only base interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub full_name: String,
    #[serde(default)]
    pub bases: Vec<TypeReference>,
}

impl TypeRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        let full_name = qualify(&namespace, &name);
        Self { name, namespace, full_name, bases: Vec::new() }
    }

    pub fn with_bases(mut self, bases: Vec<TypeReference>) -> Self {
        self.bases = bases;
        self
    }
}

/// Join a namespace and simple name into a fully-qualified name.
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// One loaded binary module and its type definitions.
#[derive(Debug)]
pub struct Module {
    path: PathBuf,
    identity: ModuleIdentity,
    /// Runtime-version string from the metadata root (e.g. "v4.0.30319").
    runtime_version: Option<String>,
    types: Vec<TypeRecord>,
    by_full_name: HashMap<String, usize>,
}

impl Module {
    pub fn new(
        path: impl Into<PathBuf>,
        identity: ModuleIdentity,
        runtime_version: Option<String>,
        types: Vec<TypeRecord>,
    ) -> Self {
        let mut by_full_name = HashMap::with_capacity(types.len());
        for (index, ty) in types.iter().enumerate() {
            // First definition wins on (malformed) duplicate names.
            by_full_name.entry(ty.full_name.clone()).or_insert(index);
        }
        Self { path: path.into(), identity, runtime_version, types, by_full_name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn runtime_version(&self) -> Option<&str> {
        self.runtime_version.as_deref()
    }

    /// Type definitions in metadata definition order.
    pub fn types(&self) -> &[TypeRecord] {
        &self.types
    }

    /// Index of the type with the given fully-qualified name, if defined here.
    pub fn type_named(&self, full_name: &str) -> Option<usize> {
        self.by_full_name.get(full_name).copied()
    }

    /// Directory containing this module, used as the first probe location
    /// when resolving its external references.
    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }
}
