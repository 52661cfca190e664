//! PE unwrapping: find the CLI header inside a PE image and hand back the
//! metadata root it points at.

use goblin::pe::PE;

use super::MetadataError;

/// Slice out the metadata root (`BSJB` blob) of a .NET PE image.
pub fn extract_metadata(bytes: &[u8]) -> Result<&[u8], MetadataError> {
    let pe = PE::parse(bytes).map_err(|e| MetadataError::BadImage(e.to_string()))?;
    let optional = pe.header.optional_header.ok_or(MetadataError::NotDotNet)?;
    let clr_dir = optional
        .data_directories
        .get_clr_runtime_header()
        .ok_or(MetadataError::NotDotNet)?;
    if clr_dir.virtual_address == 0 || clr_dir.size == 0 {
        return Err(MetadataError::NotDotNet);
    }

    // IMAGE_COR20_HEADER: cb(4) version(4) then the MetaData directory (RVA + size).
    let clr_header = rva_slice(&pe, bytes, clr_dir.virtual_address, clr_dir.size as usize)?;
    if clr_header.len() < 16 {
        return Err(MetadataError::Truncated(0));
    }
    let meta_rva = u32::from_le_bytes(clr_header[8..12].try_into().expect("4 bytes"));
    let meta_size = u32::from_le_bytes(clr_header[12..16].try_into().expect("4 bytes"));
    if meta_rva == 0 || meta_size == 0 {
        return Err(MetadataError::NotDotNet);
    }
    rva_slice(&pe, bytes, meta_rva, meta_size as usize)
}

fn rva_slice<'a>(pe: &PE, bytes: &'a [u8], rva: u32, size: usize) -> Result<&'a [u8], MetadataError> {
    for section in &pe.sections {
        let start = section.virtual_address as u64;
        let virtual_size = if section.virtual_size == 0 {
            section.size_of_raw_data as u64
        } else {
            section.virtual_size as u64
        };
        let rva = rva as u64;
        if rva < start || rva >= start + virtual_size {
            continue;
        }
        let offset = section.pointer_to_raw_data as u64 + (rva - start);
        let end = offset.saturating_add(size as u64);
        if offset as usize >= bytes.len() || end as usize > bytes.len() {
            return Err(MetadataError::Truncated(offset as usize));
        }
        return Ok(&bytes[offset as usize..end as usize]);
    }
    Err(MetadataError::BadImage(format!("rva 0x{rva:X} is outside every section")))
}
