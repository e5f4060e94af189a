//! Parser for `RP6L` resource packs.
//!
//! An RP6L file contains:
//! - A 36-byte header (signature, version, counts, filename blob length)
//! - A section table: contiguous, optionally compressed regions of the file
//! - A part table: sub-ranges of sections assigned to one logical file
//! - A file table: one record per logical file, pointing at its first part
//! - One filename offset per file, followed by a NUL-delimited filename blob
//!
//! Every absolute offset in the file is scaled by the header's offset
//! multiplier (16 for version 4, 1 otherwise).

use winnow::Parser;
use winnow::binary::{le_u8, le_u16, le_u32};
use winnow::token::take;

use crate::data::parser_utils::{WResult, parse_table, read_null_terminated_string};
use crate::error::{ArchiveError, Diagnostics, Issue};

pub const SIGNATURE: &[u8; 4] = b"RP6L";

pub const HEADER_SIZE: usize = 36;
pub const SECTION_SIZE: usize = 20;
pub const PART_SIZE: usize = 16;
pub const FILE_SIZE: usize = 12;

/// The header version whose offsets are stored in 16-byte units.
const SCALED_OFFSET_VERSION: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub compression_method: u32,
    pub part_count: u32,
    pub section_count: u32,
    pub file_count: u32,
    pub filename_chunk_length: u32,
    pub filename_count: u32,
    pub block_size: u32,
}

impl Header {
    /// Scale factor applied to every absolute offset in the file.
    pub fn offset_multiplier(&self) -> u64 {
        if self.version == SCALED_OFFSET_VERSION {
            16
        } else {
            1
        }
    }
}

/// A contiguous, optionally compressed region of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub filetype: u8,
    pub reserved: [u8; 3],
    /// Absolute offset, in units of the offset multiplier.
    pub offset: u32,
    pub unpacked_size: u32,
    /// Zero means the section has no compressed payload of its own.
    pub packed_size: u32,
    pub reserved2: u32,
}

impl SectionDescriptor {
    pub fn has_payload(&self) -> bool {
        self.packed_size > 0
    }

    /// Byte position of the section in the file.
    pub fn file_offset(&self, multiplier: u64) -> u64 {
        u64::from(self.offset) * multiplier
    }
}

/// A sub-range of a section belonging to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    pub section_index: u8,
    pub reserved: u8,
    pub file_index: u16,
    /// Offset inside the section.
    pub offset: u32,
    pub size: u32,
    pub reserved2: u32,
}

/// Catalog entry tying a filetype, a run of parts and a filename together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub part_count: u8,
    pub reserved: u8,
    pub filetype: u8,
    pub reserved2: u8,
    pub file_index: u32,
    /// Parts for one file are contiguous starting here.
    pub first_part: u32,
}

/// The fully parsed tables of an RP6L archive.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    pub header: Header,
    pub sections: Vec<SectionDescriptor>,
    pub parts: Vec<PartDescriptor>,
    pub files: Vec<FileRecord>,
    pub filename_offsets: Vec<u32>,
    pub filename_blob: Vec<u8>,
}

impl ArchiveIndex {
    pub fn offset_multiplier(&self) -> u64 {
        self.header.offset_multiplier()
    }

    /// Name of the file at `file` in the file table.
    ///
    /// A missing offset or an offset outside the blob yields an empty name; a
    /// missing terminator cuts the name at the end of the blob. Both are
    /// recorded as unresolved references.
    pub fn filename(&self, file: usize, diagnostics: &mut Diagnostics) -> String {
        let subject = format!("file #{file}");
        let Some(&offset) = self.filename_offsets.get(file) else {
            diagnostics.record(
                subject,
                Issue::UnresolvedReference(format!(
                    "no filename offset (table has {})",
                    self.filename_offsets.len()
                )),
            );
            return String::new();
        };

        match read_null_terminated_string(&self.filename_blob, offset as usize) {
            Some(name) => {
                if !name.terminated {
                    diagnostics.record(
                        subject,
                        Issue::UnresolvedReference(format!(
                            "filename at 0x{offset:X} has no terminator"
                        )),
                    );
                }
                name.text
            }
            None => {
                diagnostics.record(
                    subject,
                    Issue::UnresolvedReference(format!(
                        "filename offset 0x{offset:X} beyond blob of {} bytes",
                        self.filename_blob.len()
                    )),
                );
                String::new()
            }
        }
    }

    /// Parts belonging to `record`, in ascending part order.
    ///
    /// Stops early (with a diagnostic) when the run extends past the part table.
    pub fn parts_of(
        &self,
        file: usize,
        record: &FileRecord,
        diagnostics: &mut Diagnostics,
    ) -> &[PartDescriptor] {
        let first = record.first_part as usize;
        let wanted = record.part_count as usize;
        let end = first.saturating_add(wanted).min(self.parts.len());
        let start = first.min(end);
        let available = end - start;

        if available < wanted {
            diagnostics.record(
                format!("file #{file}"),
                Issue::UnresolvedReference(format!(
                    "ran out of parts: wanted {wanted} from part {first}, table has {}",
                    self.parts.len()
                )),
            );
        }

        &self.parts[start..end]
    }
}

// --- Winnow parsers ---

fn parse_signature(input: &mut &[u8]) -> Result<(), ArchiveError> {
    let signature: &[u8] = take(4usize)
        .parse_next(input)
        .map_err(|e: winnow::error::ErrMode<winnow::error::ContextError>| {
            ArchiveError::truncated("signature", e)
        })?;
    if signature != SIGNATURE {
        return Err(ArchiveError::InvalidSignature {
            expected: "RP6L",
            found: signature.to_vec(),
        });
    }
    Ok(())
}

fn parse_header_fields(input: &mut &[u8]) -> WResult<Header> {
    let version = le_u32.parse_next(input)?;
    let compression_method = le_u32.parse_next(input)?;
    let part_count = le_u32.parse_next(input)?;
    let section_count = le_u32.parse_next(input)?;
    let file_count = le_u32.parse_next(input)?;
    let filename_chunk_length = le_u32.parse_next(input)?;
    let filename_count = le_u32.parse_next(input)?;
    let block_size = le_u32.parse_next(input)?;
    Ok(Header {
        version,
        compression_method,
        part_count,
        section_count,
        file_count,
        filename_chunk_length,
        filename_count,
        block_size,
    })
}

fn parse_section(input: &mut &[u8]) -> WResult<SectionDescriptor> {
    let filetype = le_u8.parse_next(input)?;
    let reserved = [
        le_u8.parse_next(input)?,
        le_u8.parse_next(input)?,
        le_u8.parse_next(input)?,
    ];
    let offset = le_u32.parse_next(input)?;
    let unpacked_size = le_u32.parse_next(input)?;
    let packed_size = le_u32.parse_next(input)?;
    let reserved2 = le_u32.parse_next(input)?;
    Ok(SectionDescriptor {
        filetype,
        reserved,
        offset,
        unpacked_size,
        packed_size,
        reserved2,
    })
}

fn parse_part(input: &mut &[u8]) -> WResult<PartDescriptor> {
    let section_index = le_u8.parse_next(input)?;
    let reserved = le_u8.parse_next(input)?;
    let file_index = le_u16.parse_next(input)?;
    let offset = le_u32.parse_next(input)?;
    let size = le_u32.parse_next(input)?;
    let reserved2 = le_u32.parse_next(input)?;
    Ok(PartDescriptor {
        section_index,
        reserved,
        file_index,
        offset,
        size,
        reserved2,
    })
}

fn parse_file_record(input: &mut &[u8]) -> WResult<FileRecord> {
    let part_count = le_u8.parse_next(input)?;
    let reserved = le_u8.parse_next(input)?;
    let filetype = le_u8.parse_next(input)?;
    let reserved2 = le_u8.parse_next(input)?;
    let file_index = le_u32.parse_next(input)?;
    let first_part = le_u32.parse_next(input)?;
    Ok(FileRecord {
        part_count,
        reserved,
        filetype,
        reserved2,
        file_index,
        first_part,
    })
}

fn parse_filename_offset(input: &mut &[u8]) -> WResult<u32> {
    le_u32.parse_next(input)
}

/// Parse the header and tables of an RP6L archive.
///
/// Table read order is fixed: header, sections, parts, files, filename
/// offsets, filename blob. Any short read is fatal for this archive.
pub fn parse(file_data: &[u8]) -> Result<ArchiveIndex, ArchiveError> {
    let input = &mut &file_data[..];

    parse_signature(input)?;
    let header =
        parse_header_fields(input).map_err(|e| ArchiveError::truncated("header", e))?;

    let sections = parse_table(
        input,
        "sections",
        header.section_count,
        SECTION_SIZE,
        parse_section,
    )?;
    let parts = parse_table(input, "parts", header.part_count, PART_SIZE, parse_part)?;
    let files = parse_table(
        input,
        "files",
        header.file_count,
        FILE_SIZE,
        parse_file_record,
    )?;
    let filename_offsets = parse_table(
        input,
        "filename offsets",
        header.file_count,
        4,
        parse_filename_offset,
    )?;

    let blob_len = header.filename_chunk_length as usize;
    let filename_blob: &[u8] = take(blob_len)
        .parse_next(input)
        .map_err(|e: winnow::error::ErrMode<winnow::error::ContextError>| {
            ArchiveError::truncated("filename blob", e)
        })?;

    Ok(ArchiveIndex {
        header,
        sections,
        parts,
        files,
        filename_offsets,
        filename_blob: filename_blob.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(version: u32, parts: u32, sections: u32, files: u32, blob: u32) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        for field in [version, 0, parts, sections, files, blob, files, 0x1000] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    fn minimal_archive(version: u32) -> Vec<u8> {
        let mut out = header_bytes(version, 1, 1, 1, 4);
        // section: texture, offset 7, unpacked 64, packed 0
        out.extend_from_slice(&[0x20, 0, 0, 0]);
        for field in [7u32, 64, 0, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        // part: section 0, file 0, offset 0, size 64
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&0u16.to_le_bytes());
        for field in [0u32, 64, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        // file: 1 part, texture, index 0, first part 0
        out.extend_from_slice(&[1, 0, 0x20, 0]);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        // filename offsets + blob
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"tex\0");
        out
    }

    #[test]
    fn parses_minimal_archive() {
        let index = parse(&minimal_archive(1)).unwrap();
        assert_eq!(index.header.file_count, 1);
        assert_eq!(index.sections.len(), 1);
        assert_eq!(index.sections[0].filetype, 0x20);
        assert!(!index.sections[0].has_payload());
        assert_eq!(index.parts[0].size, 64);
        assert_eq!(index.files[0].filetype, 0x20);

        let mut diagnostics = Diagnostics::new();
        assert_eq!(index.filename(0, &mut diagnostics), "tex");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn offset_multiplier_depends_on_version() {
        let v4 = parse(&minimal_archive(4)).unwrap();
        assert_eq!(v4.offset_multiplier(), 16);
        assert_eq!(v4.sections[0].file_offset(v4.offset_multiplier()), 16 * 7);

        let v3 = parse(&minimal_archive(3)).unwrap();
        assert_eq!(v3.offset_multiplier(), 1);
        assert_eq!(v3.sections[0].file_offset(v3.offset_multiplier()), 7);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut data = minimal_archive(1);
        data[..4].copy_from_slice(b"RP5L");
        assert!(matches!(
            parse(&data),
            Err(ArchiveError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn truncated_tables_are_fatal() {
        let data = minimal_archive(1);
        for cut in [2, HEADER_SIZE - 1, HEADER_SIZE + 5, data.len() - 2] {
            let result = parse(&data[..cut]);
            assert!(
                matches!(result, Err(ArchiveError::TruncatedArchive { .. })),
                "cut at {cut}: {result:?}"
            );
        }
    }

    #[test]
    fn unterminated_filename_is_cut_at_blob_end() {
        let mut data = minimal_archive(1);
        let last = data.len() - 1;
        data[last] = b'x';
        let index = parse(&data).unwrap();
        let mut diagnostics = Diagnostics::new();
        assert_eq!(index.filename(0, &mut diagnostics), "texx");
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn running_out_of_parts_stops_gracefully() {
        let mut index = parse(&minimal_archive(1)).unwrap();
        index.files[0].part_count = 3;
        let record = index.files[0].clone();
        let mut diagnostics = Diagnostics::new();
        assert_eq!(index.parts_of(0, &record, &mut diagnostics).len(), 1);
        assert_eq!(diagnostics.len(), 1);

        let mut record = record;
        record.first_part = 9;
        assert!(index.parts_of(0, &record, &mut diagnostics).is_empty());
    }
}
