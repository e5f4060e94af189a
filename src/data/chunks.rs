//! Lazy materialization of table-described archive regions.
//!
//! Each section (RP6L) or element (legacy) is turned into a concrete byte buffer
//! at most once, on first access, and then shared. Regions without a payload of
//! their own are never materialized: their parts are read straight from the
//! input file instead.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, PoisonError, RwLock};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use tracing::debug;

use crate::data::legacy::{ElementDescriptor, LegacyIndex};
use crate::data::rp6l::ArchiveIndex;
use crate::error::Issue;

/// Upper bound on the up-front allocation for an inflated region. Headers are
/// not trusted; the buffer still grows to the decoder's natural output length.
const MAX_PREALLOCATION: usize = 64 << 20;

/// How a region's bytes are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// `packed_size` bytes at `position`, inflated on first access.
    Compressed {
        position: u64,
        packed_size: u64,
        unpacked_size: u64,
    },
    /// `size` bytes at `position`, copied on first access.
    Stored { position: u64, size: u64 },
    /// No buffer of its own. A sub-range at `offset` lives in the file at
    /// `(base + offset) * multiplier`.
    Passthrough { base: u64, multiplier: u64 },
    /// No payload at all.
    Empty,
}

impl Region {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Region::Compressed { .. } | Region::Stored { .. })
    }
}

type Materialized = Result<Arc<[u8]>, Issue>;

/// Write-once cache from region index to its decompressed buffer.
#[derive(Debug)]
pub struct ChunkCache<'a> {
    file: &'a [u8],
    regions: Vec<Region>,
    buffers: RwLock<HashMap<usize, Materialized>>,
}

impl<'a> ChunkCache<'a> {
    pub fn new(file: &'a [u8], regions: Vec<Region>) -> Self {
        Self {
            file,
            regions,
            buffers: Default::default(),
        }
    }

    /// Regions for every section of an RP6L archive.
    pub fn for_rp6l(file: &'a [u8], index: &ArchiveIndex) -> Self {
        let multiplier = index.offset_multiplier();
        let regions = index
            .sections
            .iter()
            .map(|section| {
                if section.has_payload() {
                    Region::Compressed {
                        position: section.file_offset(multiplier),
                        packed_size: u64::from(section.packed_size),
                        unpacked_size: u64::from(section.unpacked_size),
                    }
                } else {
                    Region::Passthrough {
                        base: u64::from(section.offset),
                        multiplier,
                    }
                }
            })
            .collect();
        Self::new(file, regions)
    }

    /// Regions for every element of a legacy archive.
    pub fn for_legacy(file: &'a [u8], index: &LegacyIndex) -> Self {
        let regions = index.elements.iter().map(legacy_region).collect();
        Self::new(file, regions)
    }

    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    /// Whether `index` has already been materialized.
    pub fn is_cached(&self, index: usize) -> bool {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&index)
    }

    /// The decompressed buffer for region `index`, materializing it on first use.
    pub fn materialize(&self, index: usize) -> Result<Arc<[u8]>, Issue> {
        {
            let buffers = self.buffers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = buffers.get(&index) {
                return cached.clone();
            }
        }

        let region = self.regions.get(index).copied().ok_or_else(|| {
            Issue::UnresolvedReference(format!(
                "region {index} outside table of {}",
                self.regions.len()
            ))
        })?;

        let result = self.load(index, region);
        if region.is_cacheable() {
            self.buffers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(index)
                .or_insert(result)
                .clone()
        } else {
            result
        }
    }

    fn load(&self, index: usize, region: Region) -> Materialized {
        match region {
            Region::Compressed {
                position,
                packed_size,
                unpacked_size,
            } => {
                let packed = self.file_bytes(position, packed_size)?;
                let data = inflate(packed, unpacked_size as usize).map_err(|e| {
                    Issue::Decompression(format!("region {index} at 0x{position:X}: {e}"))
                })?;
                debug!(
                    region = index,
                    packed = packed_size,
                    declared = unpacked_size,
                    actual = data.len(),
                    "inflated region"
                );
                Ok(Arc::from(data))
            }
            Region::Stored { position, size } => {
                Ok(Arc::from(self.file_bytes(position, size)?))
            }
            Region::Passthrough { .. } | Region::Empty => Err(Issue::UnresolvedReference(
                format!("region {index} has no payload of its own"),
            )),
        }
    }

    /// `size` bytes of region `index` starting at `offset`.
    ///
    /// For cached regions a range past the end of the buffer yields an empty
    /// result. Passthrough regions read straight from the file.
    pub fn read_range(&self, index: usize, offset: u64, size: u64) -> Result<Vec<u8>, Issue> {
        match self.region(index) {
            Some(&Region::Passthrough { base, multiplier }) => {
                let position = base
                    .checked_add(offset)
                    .and_then(|p| p.checked_mul(multiplier))
                    .ok_or_else(|| {
                        Issue::UnresolvedReference(format!(
                            "region {index}: offset 0x{offset:X} overflows"
                        ))
                    })?;
                Ok(self.file_bytes(position, size)?.to_vec())
            }
            _ => {
                let buffer = self.materialize(index)?;
                Ok(slice_or_empty(&buffer, offset, size).to_vec())
            }
        }
    }

    /// `size` bytes of the input file at `position`.
    pub fn file_bytes(&self, position: u64, size: u64) -> Result<&'a [u8], Issue> {
        let end = position.checked_add(size);
        match end {
            Some(end) if end <= self.file.len() as u64 => {
                Ok(&self.file[position as usize..end as usize])
            }
            _ => Err(Issue::UnresolvedReference(format!(
                "range 0x{position:X}+0x{size:X} beyond end of file (0x{:X})",
                self.file.len()
            ))),
        }
    }
}

fn legacy_region(element: &ElementDescriptor) -> Region {
    if !element.has_payload() {
        Region::Empty
    } else if element.packed_size == 0 {
        Region::Stored {
            position: u64::from(element.offset),
            size: u64::from(element.stored_size),
        }
    } else {
        Region::Compressed {
            position: u64::from(element.offset),
            packed_size: u64::from(element.packed_size.unsigned_abs()),
            unpacked_size: u64::from(element.stored_size),
        }
    }
}

/// `buffer[offset..offset + size]`, or an empty slice if that runs past the end.
pub fn slice_or_empty(buffer: &[u8], offset: u64, size: u64) -> &[u8] {
    match offset.checked_add(size) {
        Some(end) if end <= buffer.len() as u64 => &buffer[offset as usize..end as usize],
        _ => &[],
    }
}

/// Inflate a zlib stream, falling back to a raw DEFLATE stream when the zlib
/// header is missing. The output length is whatever the stream produces.
pub fn inflate(packed: &[u8], size_hint: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint.min(MAX_PREALLOCATION));
    match ZlibDecoder::new(packed).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(zlib_err) => {
            out.clear();
            match DeflateDecoder::new(packed).read_to_end(&mut out) {
                Ok(_) => Ok(out),
                Err(_) => Err(zlib_err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    use super::*;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn compressed_region_is_inflated_once() {
        let payload = b"hello hello hello hello".to_vec();
        let packed = zlib(&payload);
        let mut file = vec![0xAA; 8];
        file.extend_from_slice(&packed);

        let cache = ChunkCache::new(
            &file,
            vec![Region::Compressed {
                position: 8,
                packed_size: packed.len() as u64,
                unpacked_size: payload.len() as u64,
            }],
        );
        assert!(!cache.is_cached(0));
        let first = cache.materialize(0).unwrap();
        assert!(cache.is_cached(0));
        let second = cache.materialize(0).unwrap();
        assert_eq!(&*first, &payload[..]);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn range_past_buffer_end_is_empty() {
        let file = b"0123456789".to_vec();
        let cache = ChunkCache::new(&file, vec![Region::Stored { position: 2, size: 6 }]);
        assert_eq!(cache.read_range(0, 1, 3).unwrap(), b"345");
        assert!(cache.read_range(0, 4, 3).unwrap().is_empty());
        assert!(cache.read_range(0, u64::MAX, 2).unwrap().is_empty());
    }

    #[test]
    fn passthrough_applies_multiplier_to_sum() {
        let file: Vec<u8> = (0..64).collect();
        let cache = ChunkCache::new(
            &file,
            vec![Region::Passthrough {
                base: 1,
                multiplier: 16,
            }],
        );
        // (1 + 1) * 16 = 32
        assert_eq!(cache.read_range(0, 1, 4).unwrap(), vec![32, 33, 34, 35]);
        assert!(!cache.is_cached(0));
        assert!(cache.read_range(0, 2, 32).is_err());
    }

    #[test]
    fn empty_and_missing_regions_are_unresolved() {
        let cache = ChunkCache::new(&[], vec![Region::Empty]);
        assert!(matches!(
            cache.materialize(0),
            Err(Issue::UnresolvedReference(_))
        ));
        assert!(matches!(
            cache.materialize(5),
            Err(Issue::UnresolvedReference(_))
        ));
    }

    #[test]
    fn corrupt_stream_is_cached_as_failure() {
        let file = vec![0xFF; 16];
        let cache = ChunkCache::new(
            &file,
            vec![Region::Compressed {
                position: 0,
                packed_size: 16,
                unpacked_size: 100,
            }],
        );
        assert!(matches!(cache.materialize(0), Err(Issue::Decompression(_))));
        assert!(cache.is_cached(0));
    }

    #[test]
    fn inflate_accepts_raw_deflate() {
        use flate2::write::DeflateEncoder;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"raw stream").unwrap();
        let packed = encoder.finish().unwrap();
        assert_eq!(inflate(&packed, 0).unwrap(), b"raw stream");
    }
}
