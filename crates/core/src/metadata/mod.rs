//! ECMA-335 metadata reading: just enough of the physical format to recover
//! every type definition's identity and its direct base references.
//!
//! Entry point is [`module_from_metadata`], which takes the raw metadata root
//! (the `BSJB` blob a PE file points at from its CLI header) and produces a
//! [`Module`]. PE unwrapping itself lives in [`pe`] behind the `pe-backend`
//! feature.

mod tables;

#[cfg(feature = "pe-backend")]
pub mod pe;

use std::path::Path;

use thiserror::Error;

use crate::model::{qualify, Module, ModuleIdentity, ReferenceScope, TypeRecord, TypeReference};
use tables::{ByteReader, TableStream};

/// Things that can go wrong while decoding CLI metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unexpected end of metadata at offset {0}")]
    Truncated(usize),
    #[error("bad metadata signature (expected BSJB)")]
    BadSignature,
    #[error("missing #~ table stream")]
    MissingTableStream,
    #[error("missing {0} heap")]
    MissingHeap(&'static str),
    #[error("unknown metadata table 0x{0:02x}")]
    UnknownTable(u8),
    #[error("string heap offset {0} out of range")]
    BadString(u32),
    #[error("string heap entry is not valid UTF-8")]
    BadUtf8,
    #[error("blob heap offset {0} out of range")]
    BadBlob(u32),
    #[error("file has no CLI header; not a .NET module")]
    NotDotNet,
    #[error("malformed PE image: {0}")]
    BadImage(String),
}

/// `#Strings` heap: UTF-8, NUL-terminated, indexed by byte offset.
struct StringsHeap<'a> {
    data: &'a [u8],
}

impl<'a> StringsHeap<'a> {
    fn get(&self, offset: u32) -> Result<&'a str, MetadataError> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(MetadataError::BadString(offset));
        }
        let rest = &self.data[start..];
        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        std::str::from_utf8(&rest[..end]).map_err(|_| MetadataError::BadUtf8)
    }
}

/// `#Blob` heap: entries prefixed with a compressed length.
struct BlobHeap<'a> {
    data: &'a [u8],
}

impl<'a> BlobHeap<'a> {
    fn get(&self, offset: u32) -> Result<&'a [u8], MetadataError> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(MetadataError::BadBlob(offset));
        }
        let mut reader = ByteReader::new(&self.data[start..]);
        let len = read_compressed_u32(&mut reader)? as usize;
        reader.take(len)
    }
}

/// ECMA-335 II.23.2 compressed unsigned integer.
fn read_compressed_u32(reader: &mut ByteReader<'_>) -> Result<u32, MetadataError> {
    let first = reader.read_u8()?;
    if first & 0x80 == 0 {
        Ok(u32::from(first))
    } else if first & 0xC0 == 0x80 {
        let second = reader.read_u8()?;
        Ok((u32::from(first & 0x3F) << 8) | u32::from(second))
    } else {
        let b = reader.take(3)?;
        Ok((u32::from(first & 0x1F) << 24)
            | (u32::from(b[0]) << 16)
            | (u32::from(b[1]) << 8)
            | u32::from(b[2]))
    }
}

struct StreamHeader {
    offset: u32,
    size: u32,
    name: String,
}

/// Parse the metadata root: version string plus stream directory.
fn parse_root(meta: &[u8]) -> Result<(String, Vec<StreamHeader>), MetadataError> {
    let mut reader = ByteReader::new(meta);
    if reader.read_u32()? != 0x424A_5342 {
        return Err(MetadataError::BadSignature);
    }
    reader.skip(4)?; // major/minor version
    reader.skip(4)?; // reserved
    let version_len = reader.read_u32()? as usize;
    let version_bytes = reader.take(version_len)?;
    let version_end = version_bytes.iter().position(|b| *b == 0).unwrap_or(version_bytes.len());
    let version = std::str::from_utf8(&version_bytes[..version_end])
        .map_err(|_| MetadataError::BadUtf8)?
        .to_string();
    reader.skip(2)?; // flags
    let stream_count = reader.read_u16()?;

    let mut streams = Vec::with_capacity(stream_count as usize);
    for _ in 0..stream_count {
        let offset = reader.read_u32()?;
        let size = reader.read_u32()?;
        let mut name_bytes = Vec::new();
        loop {
            let b = reader.read_u8()?;
            if b == 0 {
                break;
            }
            name_bytes.push(b);
        }
        // Stream names are padded to a 4-byte boundary, terminator included.
        let consumed = name_bytes.len() + 1;
        let padding = (4 - consumed % 4) % 4;
        reader.skip(padding)?;
        let name = String::from_utf8(name_bytes).map_err(|_| MetadataError::BadUtf8)?;
        streams.push(StreamHeader { offset, size, name });
    }
    Ok((version, streams))
}

fn stream_slice<'a>(
    meta: &'a [u8],
    streams: &[StreamHeader],
    name: &str,
) -> Option<Result<&'a [u8], MetadataError>> {
    let header = streams.iter().find(|s| s.name == name)?;
    let start = header.offset as usize;
    let end = start.checked_add(header.size as usize);
    Some(match end {
        Some(end) if end <= meta.len() => Ok(&meta[start..end]),
        _ => Err(MetadataError::Truncated(start)),
    })
}

/// Build a [`Module`] from a raw metadata root blob.
pub fn module_from_metadata(path: &Path, meta: &[u8]) -> Result<Module, MetadataError> {
    let (runtime_version, streams) = parse_root(meta)?;

    let table_data = stream_slice(meta, &streams, "#~")
        .or_else(|| stream_slice(meta, &streams, "#-"))
        .ok_or(MetadataError::MissingTableStream)??;
    let strings = StringsHeap {
        data: stream_slice(meta, &streams, "#Strings")
            .ok_or(MetadataError::MissingHeap("#Strings"))??,
    };
    let blob = match stream_slice(meta, &streams, "#Blob") {
        Some(data) => Some(BlobHeap { data: data? }),
        None => None,
    };

    let stream = TableStream::parse(table_data)?;
    let builder = ModuleBuilder::new(&stream, &strings, blob.as_ref())?;
    let types = builder.type_records()?;
    let identity = builder.identity(path)?;

    Ok(Module::new(path, identity, Some(runtime_version), types))
}

/// Limit on nesting/TypeSpec indirection chains; metadata is hostile input.
const MAX_NAME_DEPTH: u32 = 64;

struct ModuleBuilder<'a> {
    stream: &'a TableStream,
    strings: &'a StringsHeap<'a>,
    blob: Option<&'a BlobHeap<'a>>,
    /// Fully-qualified TypeDef names, nesting applied, index = row - 1.
    typedef_names: Vec<String>,
    /// Fully-qualified TypeRef names and their home scopes, index = row - 1.
    typeref_names: Vec<String>,
    typeref_scopes: Vec<ReferenceScope>,
}

impl<'a> ModuleBuilder<'a> {
    fn new(
        stream: &'a TableStream,
        strings: &'a StringsHeap<'a>,
        blob: Option<&'a BlobHeap<'a>>,
    ) -> Result<Self, MetadataError> {
        let mut builder = ModuleBuilder {
            stream,
            strings,
            blob,
            typedef_names: Vec::new(),
            typeref_names: Vec::new(),
            typeref_scopes: Vec::new(),
        };
        builder.build_typedef_names()?;
        builder.build_typeref_names()?;
        Ok(builder)
    }

    fn build_typedef_names(&mut self) -> Result<(), MetadataError> {
        let defs = &self.stream.type_defs;
        // enclosing[i] = 0-based index of the type that type i is nested in.
        let mut enclosing = vec![None; defs.len()];
        for row in &self.stream.nested_classes {
            let nested = row.nested as usize;
            let outer = row.enclosing as usize;
            if nested >= 1 && nested <= defs.len() && outer >= 1 && outer <= defs.len() {
                enclosing[nested - 1] = Some(outer - 1);
            }
        }

        let mut names = Vec::with_capacity(defs.len());
        for i in 0..defs.len() {
            let row = defs[i];
            let simple = qualify(
                self.strings.get(row.namespace)?,
                self.strings.get(row.name)?,
            );
            // Walk the enclosing chain, bounded against cyclic NestedClass rows.
            let mut prefix_parts = Vec::new();
            let mut cursor = enclosing[i];
            let mut depth = 0;
            while let Some(outer) = cursor {
                if depth >= MAX_NAME_DEPTH {
                    break;
                }
                let outer_row = defs[outer];
                prefix_parts.push(qualify(
                    self.strings.get(outer_row.namespace)?,
                    self.strings.get(outer_row.name)?,
                ));
                cursor = enclosing[outer];
                depth += 1;
            }
            let mut full = String::new();
            for part in prefix_parts.iter().rev() {
                full.push_str(part);
                full.push('/');
            }
            full.push_str(&simple);
            names.push(full);
        }
        self.typedef_names = names;
        Ok(())
    }

    fn build_typeref_names(&mut self) -> Result<(), MetadataError> {
        let refs = &self.stream.type_refs;
        let mut names = Vec::with_capacity(refs.len());
        let mut scopes = Vec::with_capacity(refs.len());
        for i in 0..refs.len() {
            names.push(self.typeref_name(i, 0)?);
            scopes.push(self.typeref_scope(i, 0)?);
        }
        self.typeref_names = names;
        self.typeref_scopes = scopes;
        Ok(())
    }

    /// Tags of a ResolutionScope coded index.
    fn scope_parts(raw: u32) -> (u32, usize) {
        ((raw & 0x3), (raw >> 2) as usize)
    }

    fn typeref_name(&self, index: usize, depth: u32) -> Result<String, MetadataError> {
        let row = self.stream.type_refs[index];
        let own = qualify(self.strings.get(row.namespace)?, self.strings.get(row.name)?);
        let (tag, scope_index) = Self::scope_parts(row.resolution_scope);
        // Tag 3 = nested inside another TypeRef.
        if tag == 3
            && depth < MAX_NAME_DEPTH
            && scope_index >= 1
            && scope_index <= self.stream.type_refs.len()
            && scope_index - 1 != index
        {
            let parent = self.typeref_name(scope_index - 1, depth + 1)?;
            return Ok(format!("{parent}/{own}"));
        }
        Ok(own)
    }

    fn typeref_scope(&self, index: usize, depth: u32) -> Result<ReferenceScope, MetadataError> {
        let row = self.stream.type_refs[index];
        let (tag, scope_index) = Self::scope_parts(row.resolution_scope);
        match tag {
            // Module: defined in this very module.
            0 => Ok(ReferenceScope::Local),
            1 => {
                let name = match self.stream.module_refs.get(scope_index.wrapping_sub(1)) {
                    Some(offset) if scope_index >= 1 => self.strings.get(*offset)?.to_string(),
                    _ => String::new(),
                };
                Ok(ReferenceScope::SiblingModule { file_name: name })
            }
            2 => {
                match self.stream.assembly_refs.get(scope_index.wrapping_sub(1)) {
                    Some(asm_ref) if scope_index >= 1 => Ok(ReferenceScope::Assembly {
                        name: self.strings.get(asm_ref.name)?.to_string(),
                        version: Some(format_version(asm_ref.version)),
                    }),
                    // Dangling AssemblyRef index: keep the name, scope is unknowable.
                    _ => Ok(ReferenceScope::Assembly { name: String::new(), version: None }),
                }
            }
            _ => {
                // Nested TypeRef: the home scope is the outermost parent's.
                if depth < MAX_NAME_DEPTH
                    && scope_index >= 1
                    && scope_index <= self.stream.type_refs.len()
                    && scope_index - 1 != index
                {
                    self.typeref_scope(scope_index - 1, depth + 1)
                } else {
                    Ok(ReferenceScope::Local)
                }
            }
        }
    }

    /// Convert a TypeDefOrRef coded index into a reference, if representable.
    fn type_def_or_ref(&self, raw: u32, depth: u32) -> Result<Option<TypeReference>, MetadataError> {
        if raw == 0 {
            return Ok(None);
        }
        let tag = raw & 0x3;
        let index = (raw >> 2) as usize;
        if index == 0 {
            return Ok(None);
        }
        match tag {
            0 => Ok(self
                .typedef_names
                .get(index - 1)
                .map(|name| TypeReference::local(name.clone()))),
            1 => Ok(self.typeref_names.get(index - 1).map(|name| TypeReference {
                full_name: name.clone(),
                scope: self.typeref_scopes[index - 1].clone(),
            })),
            2 => self.type_spec_reference(index - 1, depth),
            _ => Ok(None),
        }
    }

    /// Decode a TypeSpec base down to its underlying generic type definition.
    ///
    /// `class C : Base<int>` stores the extends edge as a TypeSpec whose blob
    /// is `GENERICINST (CLASS|VALUETYPE) <TypeDefOrRef> <argc> ...`; the walk
    /// continues through the ``Base`1`` definition. Anything else (arrays,
    /// pointers, bare generic params) cannot be a meaningful base edge.
    fn type_spec_reference(
        &self,
        index: usize,
        depth: u32,
    ) -> Result<Option<TypeReference>, MetadataError> {
        if depth >= MAX_NAME_DEPTH {
            return Ok(None);
        }
        let (Some(blob), Some(offset)) = (self.blob, self.stream.type_specs.get(index)) else {
            return Ok(None);
        };
        // A bad blob offset on a base edge degrades to "no edge", not a load failure.
        let Ok(signature) = blob.get(*offset) else { return Ok(None) };
        let mut reader = ByteReader::new(signature);
        let Ok(element) = reader.read_u8() else { return Ok(None) };
        if element != 0x15 {
            return Ok(None);
        }
        let Ok(kind) = reader.read_u8() else { return Ok(None) };
        if kind != 0x11 && kind != 0x12 {
            return Ok(None);
        }
        let Ok(coded) = read_compressed_u32(&mut reader) else { return Ok(None) };
        self.type_def_or_ref(coded, depth + 1)
    }

    fn type_records(&self) -> Result<Vec<TypeRecord>, MetadataError> {
        let defs = &self.stream.type_defs;
        let mut records = Vec::with_capacity(defs.len());
        for (i, row) in defs.iter().enumerate() {
            let mut bases = Vec::new();
            if let Some(extends) = self.type_def_or_ref(row.extends, 0)? {
                bases.push(extends);
            }
            // InterfaceImpl rows are sorted by class; row order within one
            // class matches declaration order.
            for impl_row in &self.stream.interface_impls {
                if impl_row.class as usize == i + 1 {
                    if let Some(iface) = self.type_def_or_ref(impl_row.interface, 0)? {
                        bases.push(iface);
                    }
                }
            }
            let name = self.strings.get(row.name)?.to_string();
            let namespace = self.strings.get(row.namespace)?.to_string();
            records.push(TypeRecord {
                name,
                namespace,
                full_name: self.typedef_names[i].clone(),
                bases,
            });
        }
        Ok(records)
    }

    fn identity(&self, path: &Path) -> Result<ModuleIdentity, MetadataError> {
        if let Some(assembly) = &self.stream.assembly {
            return Ok(ModuleIdentity::new(
                self.strings.get(assembly.name)?,
                Some(format_version(assembly.version)),
            ));
        }
        // Netmodules carry no Assembly row; fall back to the module name,
        // then to the file stem.
        if let Some(offset) = self.stream.module_name {
            let name = self.strings.get(offset)?;
            if !name.is_empty() {
                return Ok(ModuleIdentity::new(trim_module_extension(name), None));
            }
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unnamed-module");
        Ok(ModuleIdentity::new(stem, None))
    }
}

fn format_version(version: [u32; 4]) -> String {
    format!("{}.{}.{}.{}", version[0], version[1], version[2], version[3])
}

/// Module-table names keep their file extension ("lib.netmodule"); identity
/// names do not.
fn trim_module_extension(name: &str) -> &str {
    name.strip_suffix(".netmodule")
        .or_else(|| name.strip_suffix(".dll"))
        .or_else(|| name.strip_suffix(".exe"))
        .unwrap_or(name)
}
