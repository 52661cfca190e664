//! ECMA-335 `#~` table stream decoding.
//!
//! Only the tables needed to recover type identity and direct base references
//! are materialized (Module, TypeRef, TypeDef, InterfaceImpl, ModuleRef,
//! TypeSpec, Assembly, AssemblyRef, NestedClass). Every other table still
//! needs an exact row size so the stream can be walked past it, which is what
//! the column schemas below encode.

use super::MetadataError;

/// Little-endian cursor over a metadata byte slice.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], MetadataError> {
        let end = self.pos.checked_add(len).ok_or(MetadataError::Truncated(self.pos))?;
        if end > self.data.len() {
            return Err(MetadataError::Truncated(self.pos));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), MetadataError> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, MetadataError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, MetadataError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, MetadataError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, MetadataError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }
}

/// Metadata table numbers (ECMA-335 II.22).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Table {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

impl Table {
    pub(crate) fn from_bit(bit: u8) -> Option<Table> {
        use Table::*;
        Some(match bit {
            0x00 => Module,
            0x01 => TypeRef,
            0x02 => TypeDef,
            0x03 => FieldPtr,
            0x04 => Field,
            0x05 => MethodPtr,
            0x06 => MethodDef,
            0x07 => ParamPtr,
            0x08 => Param,
            0x09 => InterfaceImpl,
            0x0A => MemberRef,
            0x0B => Constant,
            0x0C => CustomAttribute,
            0x0D => FieldMarshal,
            0x0E => DeclSecurity,
            0x0F => ClassLayout,
            0x10 => FieldLayout,
            0x11 => StandAloneSig,
            0x12 => EventMap,
            0x13 => EventPtr,
            0x14 => Event,
            0x15 => PropertyMap,
            0x16 => PropertyPtr,
            0x17 => Property,
            0x18 => MethodSemantics,
            0x19 => MethodImpl,
            0x1A => ModuleRef,
            0x1B => TypeSpec,
            0x1C => ImplMap,
            0x1D => FieldRva,
            0x1E => EncLog,
            0x1F => EncMap,
            0x20 => Assembly,
            0x21 => AssemblyProcessor,
            0x22 => AssemblyOs,
            0x23 => AssemblyRef,
            0x24 => AssemblyRefProcessor,
            0x25 => AssemblyRefOs,
            0x26 => File,
            0x27 => ExportedType,
            0x28 => ManifestResource,
            0x29 => NestedClass,
            0x2A => GenericParam,
            0x2B => MethodSpec,
            0x2C => GenericParamConstraint,
            _ => return None,
        })
    }
}

/// Coded-index families (ECMA-335 II.24.2.6). `None` slots are reserved tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coded {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl Coded {
    pub(crate) fn tag_bits(self) -> u32 {
        match self {
            Coded::HasCustomAttribute => 5,
            Coded::MemberRefParent | Coded::CustomAttributeType => 3,
            Coded::TypeDefOrRef
            | Coded::HasConstant
            | Coded::HasDeclSecurity
            | Coded::Implementation
            | Coded::ResolutionScope => 2,
            Coded::HasFieldMarshal
            | Coded::HasSemantics
            | Coded::MethodDefOrRef
            | Coded::MemberForwarded
            | Coded::TypeOrMethodDef => 1,
        }
    }

    pub(crate) fn members(self) -> &'static [Option<Table>] {
        use Table::*;
        match self {
            Coded::TypeDefOrRef => &[Some(TypeDef), Some(TypeRef), Some(TypeSpec)],
            Coded::HasConstant => &[Some(Field), Some(Param), Some(Property)],
            Coded::HasCustomAttribute => &[
                Some(MethodDef),
                Some(Field),
                Some(TypeRef),
                Some(TypeDef),
                Some(Param),
                Some(InterfaceImpl),
                Some(MemberRef),
                Some(Module),
                Some(DeclSecurity),
                Some(Property),
                Some(Event),
                Some(StandAloneSig),
                Some(ModuleRef),
                Some(TypeSpec),
                Some(Assembly),
                Some(AssemblyRef),
                Some(File),
                Some(ExportedType),
                Some(ManifestResource),
                Some(GenericParam),
                Some(GenericParamConstraint),
                Some(MethodSpec),
            ],
            Coded::HasFieldMarshal => &[Some(Field), Some(Param)],
            Coded::HasDeclSecurity => &[Some(TypeDef), Some(MethodDef), Some(Assembly)],
            Coded::MemberRefParent => {
                &[Some(TypeDef), Some(TypeRef), Some(ModuleRef), Some(MethodDef), Some(TypeSpec)]
            }
            Coded::HasSemantics => &[Some(Event), Some(Property)],
            Coded::MethodDefOrRef => &[Some(MethodDef), Some(MemberRef)],
            Coded::MemberForwarded => &[Some(Field), Some(MethodDef)],
            Coded::Implementation => &[Some(File), Some(AssemblyRef), Some(ExportedType)],
            Coded::CustomAttributeType => {
                &[None, None, Some(MethodDef), Some(MemberRef), None]
            }
            Coded::ResolutionScope => {
                &[Some(Module), Some(ModuleRef), Some(AssemblyRef), Some(TypeRef)]
            }
            Coded::TypeOrMethodDef => &[Some(TypeDef), Some(MethodDef)],
        }
    }
}

/// One column of a table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Col {
    U16,
    U32,
    /// Index into the #Strings heap.
    Str,
    /// Index into the #GUID heap.
    Guid,
    /// Index into the #Blob heap.
    Blob,
    /// Simple index into another table (1-based, 0 = null).
    Idx(Table),
    Coded(Coded),
}

/// Column layout per table (ECMA-335 II.22, in table order).
pub(crate) fn schema(table: Table) -> &'static [Col] {
    use Coded::*;
    use Table::*;
    match table {
        Module => &[Col::U16, Col::Str, Col::Guid, Col::Guid, Col::Guid],
        TypeRef => &[Col::Coded(ResolutionScope), Col::Str, Col::Str],
        TypeDef => &[
            Col::U32,
            Col::Str,
            Col::Str,
            Col::Coded(TypeDefOrRef),
            Col::Idx(Field),
            Col::Idx(MethodDef),
        ],
        FieldPtr => &[Col::Idx(Field)],
        Field => &[Col::U16, Col::Str, Col::Blob],
        MethodPtr => &[Col::Idx(MethodDef)],
        MethodDef => &[Col::U32, Col::U16, Col::U16, Col::Str, Col::Blob, Col::Idx(Param)],
        ParamPtr => &[Col::Idx(Param)],
        Param => &[Col::U16, Col::U16, Col::Str],
        InterfaceImpl => &[Col::Idx(TypeDef), Col::Coded(TypeDefOrRef)],
        MemberRef => &[Col::Coded(MemberRefParent), Col::Str, Col::Blob],
        Constant => &[Col::U16, Col::Coded(HasConstant), Col::Blob],
        CustomAttribute => {
            &[Col::Coded(HasCustomAttribute), Col::Coded(CustomAttributeType), Col::Blob]
        }
        FieldMarshal => &[Col::Coded(HasFieldMarshal), Col::Blob],
        DeclSecurity => &[Col::U16, Col::Coded(HasDeclSecurity), Col::Blob],
        ClassLayout => &[Col::U16, Col::U32, Col::Idx(TypeDef)],
        FieldLayout => &[Col::U32, Col::Idx(Field)],
        StandAloneSig => &[Col::Blob],
        EventMap => &[Col::Idx(TypeDef), Col::Idx(Event)],
        EventPtr => &[Col::Idx(Event)],
        Event => &[Col::U16, Col::Str, Col::Coded(TypeDefOrRef)],
        PropertyMap => &[Col::Idx(TypeDef), Col::Idx(Property)],
        PropertyPtr => &[Col::Idx(Property)],
        Property => &[Col::U16, Col::Str, Col::Blob],
        MethodSemantics => &[Col::U16, Col::Idx(MethodDef), Col::Coded(HasSemantics)],
        MethodImpl => {
            &[Col::Idx(TypeDef), Col::Coded(MethodDefOrRef), Col::Coded(MethodDefOrRef)]
        }
        ModuleRef => &[Col::Str],
        TypeSpec => &[Col::Blob],
        ImplMap => &[Col::U16, Col::Coded(MemberForwarded), Col::Str, Col::Idx(ModuleRef)],
        FieldRva => &[Col::U32, Col::Idx(Field)],
        EncLog => &[Col::U32, Col::U32],
        EncMap => &[Col::U32],
        Assembly => &[
            Col::U32,
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U32,
            Col::Blob,
            Col::Str,
            Col::Str,
        ],
        AssemblyProcessor => &[Col::U32],
        AssemblyOs => &[Col::U32, Col::U32, Col::U32],
        AssemblyRef => &[
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U32,
            Col::Blob,
            Col::Str,
            Col::Str,
            Col::Blob,
        ],
        AssemblyRefProcessor => &[Col::U32, Col::Idx(AssemblyRef)],
        AssemblyRefOs => &[Col::U32, Col::U32, Col::U32, Col::Idx(AssemblyRef)],
        File => &[Col::U32, Col::Str, Col::Blob],
        ExportedType => &[Col::U32, Col::U32, Col::Str, Col::Str, Col::Coded(Implementation)],
        ManifestResource => &[Col::U32, Col::U32, Col::Str, Col::Coded(Implementation)],
        NestedClass => &[Col::Idx(TypeDef), Col::Idx(TypeDef)],
        GenericParam => &[Col::U16, Col::U16, Col::Coded(TypeOrMethodDef), Col::Str],
        MethodSpec => &[Col::Coded(MethodDefOrRef), Col::Blob],
        GenericParamConstraint => &[Col::Idx(GenericParam), Col::Coded(TypeDefOrRef)],
    }
}

/// Index-width context for one table stream.
#[derive(Debug, Clone)]
pub(crate) struct Sizing {
    pub(crate) rows: [u32; 64],
    pub(crate) wide_str: bool,
    pub(crate) wide_guid: bool,
    pub(crate) wide_blob: bool,
}

impl Sizing {
    fn idx_size(&self, table: Table) -> usize {
        if self.rows[table as usize] > 0xFFFF {
            4
        } else {
            2
        }
    }

    fn coded_size(&self, coded: Coded) -> usize {
        let max_rows = coded
            .members()
            .iter()
            .map(|member| member.map(|t| self.rows[t as usize]).unwrap_or(0))
            .max()
            .unwrap_or(0);
        if max_rows >= 1u32 << (16 - coded.tag_bits()) {
            4
        } else {
            2
        }
    }

    fn col_size(&self, col: Col) -> usize {
        match col {
            Col::U16 => 2,
            Col::U32 => 4,
            Col::Str => {
                if self.wide_str {
                    4
                } else {
                    2
                }
            }
            Col::Guid => {
                if self.wide_guid {
                    4
                } else {
                    2
                }
            }
            Col::Blob => {
                if self.wide_blob {
                    4
                } else {
                    2
                }
            }
            Col::Idx(table) => self.idx_size(table),
            Col::Coded(coded) => self.coded_size(coded),
        }
    }

    fn row_size(&self, table: Table) -> usize {
        schema(table).iter().map(|col| self.col_size(*col)).sum()
    }

    fn read_col(&self, reader: &mut ByteReader<'_>, col: Col) -> Result<u32, MetadataError> {
        match self.col_size(col) {
            2 => reader.read_u16().map(u32::from),
            _ => reader.read_u32(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TypeRefRow {
    pub(crate) resolution_scope: u32,
    pub(crate) name: u32,
    pub(crate) namespace: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TypeDefRow {
    pub(crate) name: u32,
    pub(crate) namespace: u32,
    pub(crate) extends: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct InterfaceImplRow {
    pub(crate) class: u32,
    pub(crate) interface: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AssemblyRow {
    pub(crate) version: [u32; 4],
    pub(crate) name: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AssemblyRefRow {
    pub(crate) version: [u32; 4],
    pub(crate) name: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NestedClassRow {
    pub(crate) nested: u32,
    pub(crate) enclosing: u32,
}

/// Decoded rows of the tables the hierarchy resolver needs.
#[derive(Debug, Default)]
pub(crate) struct TableStream {
    pub(crate) module_name: Option<u32>,
    pub(crate) type_refs: Vec<TypeRefRow>,
    pub(crate) type_defs: Vec<TypeDefRow>,
    pub(crate) interface_impls: Vec<InterfaceImplRow>,
    pub(crate) module_refs: Vec<u32>,
    pub(crate) type_specs: Vec<u32>,
    pub(crate) assembly: Option<AssemblyRow>,
    pub(crate) assembly_refs: Vec<AssemblyRefRow>,
    pub(crate) nested_classes: Vec<NestedClassRow>,
}

impl TableStream {
    /// Parse a `#~` (or `#-`) stream.
    pub(crate) fn parse(data: &[u8]) -> Result<TableStream, MetadataError> {
        let mut reader = ByteReader::new(data);
        reader.skip(4)?; // reserved
        reader.skip(2)?; // major/minor version
        let heap_sizes = reader.read_u8()?;
        reader.skip(1)?; // reserved
        let valid = reader.read_u64()?;
        reader.skip(8)?; // sorted bitmask

        let mut rows = [0u32; 64];
        for bit in 0..64u8 {
            if valid & (1u64 << bit) != 0 {
                rows[bit as usize] = reader.read_u32()?;
            }
        }
        // Uncompressed (#-) streams may carry an extra 4-byte field.
        if heap_sizes & 0x40 != 0 {
            reader.skip(4)?;
        }

        let sizing = Sizing {
            rows,
            wide_str: heap_sizes & 0x01 != 0,
            wide_guid: heap_sizes & 0x02 != 0,
            wide_blob: heap_sizes & 0x04 != 0,
        };

        let mut stream = TableStream::default();
        for bit in 0..64u8 {
            if valid & (1u64 << bit) == 0 {
                continue;
            }
            let table = Table::from_bit(bit).ok_or(MetadataError::UnknownTable(bit))?;
            let count = rows[bit as usize] as usize;
            stream.read_table(&mut reader, &sizing, table, count)?;
        }
        Ok(stream)
    }

    fn read_table(
        &mut self,
        reader: &mut ByteReader<'_>,
        sizing: &Sizing,
        table: Table,
        count: usize,
    ) -> Result<(), MetadataError> {
        match table {
            Table::Module => {
                for i in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    if i == 0 {
                        self.module_name = Some(row[1]);
                    }
                }
            }
            Table::TypeRef => {
                for _ in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    self.type_refs.push(TypeRefRow {
                        resolution_scope: row[0],
                        name: row[1],
                        namespace: row[2],
                    });
                }
            }
            Table::TypeDef => {
                for _ in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    self.type_defs.push(TypeDefRow {
                        name: row[1],
                        namespace: row[2],
                        extends: row[3],
                    });
                }
            }
            Table::InterfaceImpl => {
                for _ in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    self.interface_impls
                        .push(InterfaceImplRow { class: row[0], interface: row[1] });
                }
            }
            Table::ModuleRef => {
                for _ in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    self.module_refs.push(row[0]);
                }
            }
            Table::TypeSpec => {
                for _ in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    self.type_specs.push(row[0]);
                }
            }
            Table::Assembly => {
                for i in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    if i == 0 {
                        self.assembly = Some(AssemblyRow {
                            version: [row[1], row[2], row[3], row[4]],
                            name: row[7],
                        });
                    }
                }
            }
            Table::AssemblyRef => {
                for _ in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    self.assembly_refs.push(AssemblyRefRow {
                        version: [row[0], row[1], row[2], row[3]],
                        name: row[6],
                    });
                }
            }
            Table::NestedClass => {
                for _ in 0..count {
                    let row = read_row(reader, sizing, table)?;
                    self.nested_classes.push(NestedClassRow { nested: row[0], enclosing: row[1] });
                }
            }
            _ => {
                let skip = sizing.row_size(table).checked_mul(count);
                match skip {
                    Some(bytes) => reader.skip(bytes)?,
                    None => return Err(MetadataError::Truncated(reader.pos())),
                }
            }
        }
        Ok(())
    }
}

fn read_row(
    reader: &mut ByteReader<'_>,
    sizing: &Sizing,
    table: Table,
) -> Result<Vec<u32>, MetadataError> {
    schema(table).iter().map(|col| sizing.read_col(reader, *col)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizing_with(rows: &[(Table, u32)]) -> Sizing {
        let mut sizing =
            Sizing { rows: [0; 64], wide_str: false, wide_guid: false, wide_blob: false };
        for (table, count) in rows {
            sizing.rows[*table as usize] = *count;
        }
        sizing
    }

    #[test]
    fn simple_index_widens_past_64k_rows() {
        let narrow = sizing_with(&[(Table::TypeDef, 0xFFFF)]);
        assert_eq!(narrow.idx_size(Table::TypeDef), 2);

        let wide = sizing_with(&[(Table::TypeDef, 0x10000)]);
        assert_eq!(wide.idx_size(Table::TypeDef), 4);
    }

    #[test]
    fn coded_index_width_accounts_for_tag_bits() {
        // TypeDefOrRef spends 2 bits on the tag, so 2^14 rows force 4 bytes.
        let narrow = sizing_with(&[(Table::TypeRef, (1 << 14) - 1)]);
        assert_eq!(narrow.coded_size(Coded::TypeDefOrRef), 2);

        let wide = sizing_with(&[(Table::TypeRef, 1 << 14)]);
        assert_eq!(wide.coded_size(Coded::TypeDefOrRef), 4);
    }

    #[test]
    fn typedef_row_size_with_narrow_heaps() {
        let sizing = sizing_with(&[(Table::TypeDef, 10), (Table::TypeRef, 10)]);
        // flags(4) + name(2) + namespace(2) + extends(2) + field list(2) + method list(2)
        assert_eq!(sizing.row_size(Table::TypeDef), 14);
    }

    #[test]
    fn wide_string_heap_widens_string_columns() {
        let mut sizing = sizing_with(&[]);
        assert_eq!(sizing.row_size(Table::ModuleRef), 2);
        sizing.wide_str = true;
        assert_eq!(sizing.row_size(Table::ModuleRef), 4);
    }

    #[test]
    fn every_table_bit_up_to_0x2c_has_a_schema() {
        for bit in 0..=0x2Cu8 {
            let table = Table::from_bit(bit).expect("known table");
            assert!(!schema(table).is_empty());
        }
        assert!(Table::from_bit(0x2D).is_none());
    }
}
