//! Parser for the legacy element/chunk/name container.
//!
//! Layout (all little-endian, no padding):
//! - A 36-byte header of counts
//! - An element table: contiguous, optionally compressed regions of the file
//! - A chunk table: sub-ranges of elements
//! - A name table: one entry per asset, pointing at a run of chunks
//! - A name-offset table followed by the name blob
//!
//! Element payloads live at absolute file offsets; there is no offset scaling.

use winnow::Parser;
use winnow::binary::{le_i16, le_i32, le_u8, le_u32};
use winnow::error::{ContextError, ErrMode};
use winnow::token::take;

use crate::data::parser_utils::{WResult, parse_table, read_null_terminated_string};
use crate::error::{ArchiveError, Diagnostics, Issue};
use crate::recognized::Recognized;
use crate::resource::AssetKind;

pub const HEADER_SIZE: usize = 36;
pub const ELEMENT_SIZE: usize = 20;
pub const CHUNK_SIZE: usize = 16;
pub const NAME_ENTRY_SIZE: usize = 12;

/// Element type code marking an element with no payload.
pub const NO_PAYLOAD_ELEMENT: i16 = 33;

/// The element table stops once fewer than this many bytes follow the cursor.
const ELEMENT_TAIL_GUARD: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LegacyHeader {
    pub chunk_count: u32,
    pub element_count: u32,
    pub name_entry_count: u32,
    pub name_blob_length: u32,
    pub name_offset_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ElementDescriptor {
    pub kind: i16,
    pub offset: u32,
    /// Size of the raw payload when `packed_size` is zero.
    pub stored_size: u32,
    /// Zero means the payload is stored uncompressed.
    pub packed_size: i32,
}

impl ElementDescriptor {
    pub fn has_payload(&self) -> bool {
        self.kind != NO_PAYLOAD_ELEMENT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChunkDescriptor {
    pub element_index: u8,
    /// Offset inside the element's materialized buffer.
    pub offset: u32,
    pub size: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NameEntry {
    pub block_count: i16,
    pub kind: Recognized<AssetKind, i16>,
    pub name_offset_index: i32,
    /// Chunks for one asset are contiguous starting here.
    pub first_chunk: i32,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LegacyIndex {
    pub header: LegacyHeader,
    pub elements: Vec<ElementDescriptor>,
    pub chunks: Vec<ChunkDescriptor>,
    pub names: Vec<NameEntry>,
    pub name_offsets: Vec<i32>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub name_blob: Vec<u8>,
}

impl LegacyIndex {
    /// Name of the asset described by name entry `entry`.
    pub fn name(&self, entry: usize, diagnostics: &mut Diagnostics) -> String {
        let subject = format!("name entry #{entry}");
        let offset = self
            .names
            .get(entry)
            .and_then(|e| usize::try_from(e.name_offset_index).ok())
            .and_then(|i| self.name_offsets.get(i))
            .and_then(|&o| usize::try_from(o).ok());
        let Some(offset) = offset else {
            diagnostics.record(
                subject,
                Issue::UnresolvedReference("name offset index outside table".to_string()),
            );
            return String::new();
        };

        match read_null_terminated_string(&self.name_blob, offset) {
            Some(name) => {
                if !name.terminated {
                    diagnostics.record(
                        subject,
                        Issue::UnresolvedReference(format!(
                            "name at 0x{offset:X} has no terminator"
                        )),
                    );
                }
                name.text
            }
            None => {
                diagnostics.record(
                    subject,
                    Issue::UnresolvedReference(format!(
                        "name offset 0x{offset:X} beyond blob of {} bytes",
                        self.name_blob.len()
                    )),
                );
                String::new()
            }
        }
    }

    /// The chunk `first_chunk + delta` of a name entry.
    pub fn chunk(&self, entry: &NameEntry, delta: usize) -> Result<&ChunkDescriptor, Issue> {
        usize::try_from(entry.first_chunk)
            .ok()
            .and_then(|first| first.checked_add(delta))
            .and_then(|i| self.chunks.get(i))
            .ok_or_else(|| {
                Issue::UnresolvedReference(format!(
                    "chunk {} + {delta} outside table of {}",
                    entry.first_chunk,
                    self.chunks.len()
                ))
            })
    }

    /// The element a chunk lives in.
    pub fn element_of(&self, chunk: &ChunkDescriptor) -> Result<&ElementDescriptor, Issue> {
        self.elements
            .get(chunk.element_index as usize)
            .ok_or_else(|| {
                Issue::UnresolvedReference(format!(
                    "element {} outside table of {}",
                    chunk.element_index,
                    self.elements.len()
                ))
            })
    }
}

// --- Winnow parsers ---

fn parse_header_fields(input: &mut &[u8]) -> WResult<[i32; 9]> {
    let mut fields = [0i32; 9];
    for field in &mut fields {
        *field = le_i32.parse_next(input)?;
    }
    Ok(fields)
}

fn parse_element(input: &mut &[u8]) -> WResult<ElementDescriptor> {
    let kind = le_i16.parse_next(input)?;
    let _reserved = le_i16.parse_next(input)?;
    let offset = le_u32.parse_next(input)?;
    let stored_size = le_u32.parse_next(input)?;
    let packed_size = le_i32.parse_next(input)?;
    let _reserved2 = le_i16.parse_next(input)?;
    let _reserved3 = le_i16.parse_next(input)?;
    Ok(ElementDescriptor {
        kind,
        offset,
        stored_size,
        packed_size,
    })
}

fn parse_chunk(input: &mut &[u8]) -> WResult<ChunkDescriptor> {
    let element_index = le_u8.parse_next(input)?;
    let _reserved = le_u8.parse_next(input)?;
    let _reserved2 = le_i16.parse_next(input)?;
    let offset = le_u32.parse_next(input)?;
    let size = le_i32.parse_next(input)?;
    let _reserved3 = le_i32.parse_next(input)?;
    Ok(ChunkDescriptor {
        element_index,
        offset,
        size,
    })
}

fn parse_name_entry(input: &mut &[u8]) -> WResult<NameEntry> {
    let block_count = le_i16.parse_next(input)?;
    let kind = Recognized::from_code(le_i16.parse_next(input)?);
    let name_offset_index = le_i32.parse_next(input)?;
    let first_chunk = le_i32.parse_next(input)?;
    Ok(NameEntry {
        block_count,
        kind,
        name_offset_index,
        first_chunk,
    })
}

fn parse_name_offset(input: &mut &[u8]) -> WResult<i32> {
    le_i32.parse_next(input)
}

fn count(table: &'static str, value: i32) -> Result<u32, ArchiveError> {
    u32::try_from(value)
        .map_err(|_| ArchiveError::truncated(table, format!("negative count {value}")))
}

/// Parse the header and tables of a legacy archive.
///
/// A non-positive element count is fatal. A name-entry count that differs from
/// the name-offset count is only reported.
pub fn parse(
    file_data: &[u8],
    diagnostics: &mut Diagnostics,
) -> Result<LegacyIndex, ArchiveError> {
    let input = &mut &file_data[..];

    let fields = parse_header_fields(input).map_err(|e| ArchiveError::truncated("header", e))?;
    let [
        _,
        _,
        _,
        chunk_count,
        element_count,
        name_entry_count,
        name_blob_length,
        name_offset_count,
        _,
    ] = fields;

    if element_count <= 0 {
        return Err(ArchiveError::EmptyElementTable(element_count));
    }
    let header = LegacyHeader {
        chunk_count: count("chunks", chunk_count)?,
        element_count: element_count as u32,
        name_entry_count: count("names", name_entry_count)?,
        name_blob_length: count("name blob", name_blob_length)?,
        name_offset_count: count("name offsets", name_offset_count)?,
    };
    if header.name_offset_count != header.name_entry_count {
        diagnostics.record(
            "header",
            Issue::StructuralMismatch(format!(
                "names != assets ({} name offsets, {} name entries)",
                header.name_offset_count, header.name_entry_count
            )),
        );
    }

    let capacity = (header.element_count as usize).min(input.len() / ELEMENT_SIZE);
    let mut elements = Vec::with_capacity(capacity);
    for i in 0..header.element_count {
        let position = file_data.len() - input.len();
        if position + ELEMENT_TAIL_GUARD >= file_data.len() {
            diagnostics.record(
                "element table",
                Issue::UnresolvedReference(format!(
                    "end of file reached after {i} of {} elements",
                    header.element_count
                )),
            );
            break;
        }
        let element = parse_element(input).map_err(|e| ArchiveError::truncated("elements", e))?;
        elements.push(element);
    }

    let chunks = parse_table(input, "chunks", header.chunk_count, CHUNK_SIZE, parse_chunk)?;
    let names = parse_table(
        input,
        "names",
        header.name_entry_count,
        NAME_ENTRY_SIZE,
        parse_name_entry,
    )?;
    let name_offsets = parse_table(
        input,
        "name offsets",
        header.name_offset_count,
        4,
        parse_name_offset,
    )?;

    let name_blob: &[u8] = take(header.name_blob_length as usize)
        .parse_next(input)
        .map_err(|e: ErrMode<ContextError>| ArchiveError::truncated("name blob", e))?;

    Ok(LegacyIndex {
        header,
        elements,
        chunks,
        names,
        name_offsets,
        name_blob: name_blob.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(chunks: i32, elements: i32, names: i32, blob: i32, offsets: i32) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [0, 0, 0, chunks, elements, names, blob, offsets, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    fn push_element(out: &mut Vec<u8>, kind: i16, offset: u32, stored: u32, packed: i32) {
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&0i16.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&stored.to_le_bytes());
        out.extend_from_slice(&packed.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
    }

    fn push_chunk(out: &mut Vec<u8>, element: u8, offset: u32, size: i32) {
        out.extend_from_slice(&[element, 0, 0, 0]);
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
    }

    fn push_name(out: &mut Vec<u8>, blocks: i16, kind: i16, name_index: i32, first_chunk: i32) {
        out.extend_from_slice(&blocks.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&name_index.to_le_bytes());
        out.extend_from_slice(&first_chunk.to_le_bytes());
    }

    fn sample() -> Vec<u8> {
        let mut out = header_bytes(2, 2, 1, 8, 1);
        push_element(&mut out, 0, 200, 64, 0);
        push_element(&mut out, NO_PAYLOAD_ELEMENT, 0, 0, 0);
        push_chunk(&mut out, 0, 0, 31);
        push_chunk(&mut out, 0, 31, 33);
        push_name(&mut out, 2, 8480, 0, 0);
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(b"diffuse\0");
        out.resize(out.len() + 32, 0);
        out
    }

    #[test]
    fn parses_tables() {
        let mut diagnostics = Diagnostics::new();
        let index = parse(&sample(), &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(index.elements.len(), 2);
        assert!(index.elements[0].has_payload());
        assert!(!index.elements[1].has_payload());
        assert_eq!(index.chunks[1].offset, 31);
        assert_eq!(index.names[0].kind, Recognized::Known(AssetKind::Texture));
        assert_eq!(index.name(0, &mut diagnostics), "diffuse");

        let entry = index.names[0].clone();
        assert_eq!(index.chunk(&entry, 1).unwrap().size, 33);
        assert!(index.chunk(&entry, 2).is_err());
    }

    #[test]
    fn empty_element_table_is_fatal() {
        let mut data = sample();
        data[16..20].copy_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            parse(&data, &mut Diagnostics::new()),
            Err(ArchiveError::EmptyElementTable(0))
        ));
    }

    #[test]
    fn name_count_mismatch_is_reported() {
        let mut data = sample();
        // Two name offsets declared, one name entry: the extra offset eats the
        // first 4 bytes of the blob.
        data[28..32].copy_from_slice(&2i32.to_le_bytes());
        let mut diagnostics = Diagnostics::new();
        let index = parse(&data, &mut diagnostics).unwrap();
        assert_eq!(index.name_offsets.len(), 2);
        assert!(matches!(
            diagnostics.iter().next().map(|d| &d.issue),
            Some(Issue::StructuralMismatch(_))
        ));
    }

    #[test]
    fn element_table_stops_near_end_of_file() {
        let mut data = header_bytes(0, 3, 0, 0, 0);
        push_element(&mut data, 0, 0, 0, 0);
        data.extend_from_slice(&[0; 12]);
        let mut diagnostics = Diagnostics::new();
        let index = parse(&data, &mut diagnostics).unwrap();
        assert_eq!(index.elements.len(), 1);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn truncated_chunk_table_is_fatal() {
        let data = sample();
        let cut = HEADER_SIZE + 2 * ELEMENT_SIZE + CHUNK_SIZE + 4;
        assert!(matches!(
            parse(&data[..cut], &mut Diagnostics::new()),
            Err(ArchiveError::TruncatedArchive { .. })
        ));
    }
}
