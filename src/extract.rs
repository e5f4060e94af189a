//! Per-archive extraction drivers.
//!
//! Each input file is processed on its own: its tables are parsed, its regions
//! are materialized on demand, and every selected record is written below an
//! output root next to the input. Record-level problems become diagnostics;
//! only failures to open, parse or write abort the archive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bon::Builder;
use rootcause::Report;
use tracing::{debug, info};

use crate::data::ContainerKind;
use crate::data::chunks::ChunkCache;
use crate::data::legacy::{self, LegacyIndex, NameEntry};
use crate::data::rp6l::{self, ArchiveIndex, FileRecord};
use crate::data::wrappers::mmap::MmapArchive;
use crate::error::{Diagnostic, Diagnostics, ExtractError, Issue};
use crate::export::EulerUnit;
use crate::export::ascii::write_ascii;
use crate::export::smd::write_smd;
use crate::models::mesh::{
    INDEX_CHUNK, MESH_BLOCK_COUNT, MeshBuffers, MeshError, MeshModel, VERTEX_CHUNK, decode_mesh,
};
use crate::recognized::Recognized;
use crate::resource::{AssetKind, FileType, TypeFilter, UNKNOWN_CATEGORY, category_of};
use crate::texture::{DdsLayout, TEXTURE_HEADER_LEN, TextureHeader, dds_header, synthesize_dds};

/// Meshes whose name contains this are skipped unless asked for.
pub const TERRAIN_MARKER: &str = "buildterrain";

/// Settings shared by every archive in a run.
#[derive(Builder, Debug, Clone)]
pub struct ExtractOptions {
    /// RP6L filetypes to write out.
    #[builder(default)]
    pub types: TypeFilter,
    #[builder(default)]
    pub dds_layout: DdsLayout,
    /// Unit of the rotations written to `.smd` skeletons.
    #[builder(default)]
    pub euler: EulerUnit,
    /// Directory the per-archive output roots are created in. Defaults to the
    /// directory of each input file.
    pub out_dir: Option<PathBuf>,
    #[builder(default = true)]
    pub skip_terrain: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Outcome of extracting one archive.
#[derive(Debug)]
pub struct ExtractSummary {
    pub path: PathBuf,
    pub kind: ContainerKind,
    pub output_dir: PathBuf,
    /// Number of records written.
    pub extracted: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Map, detect and extract the archive at `path`.
pub fn extract_path(
    path: &Path,
    options: &ExtractOptions,
) -> Result<ExtractSummary, Report<ExtractError>> {
    let archive = MmapArchive::open(path).map_err(|source| {
        Report::new(ExtractError::Open {
            path: path.to_owned(),
            source,
        })
    })?;
    let data = archive.as_ref();
    let kind = ContainerKind::detect(archive.path(), data);
    info!(path = %path.display(), ?kind, size = data.len(), "extracting archive");

    let summary = match kind {
        ContainerKind::Rp6l => extract_rp6l(path, data, options)?,
        ContainerKind::Legacy => extract_legacy(path, data, options)?,
    };

    info!(
        path = %path.display(),
        extracted = summary.extracted,
        diagnostics = summary.diagnostics.len(),
        output = %summary.output_dir.display(),
        "finished archive"
    );
    Ok(summary)
}

/// Root directory the records of `path` are written below.
///
/// RP6L archives extract to `<dir>/<stem>_extracted`, legacy archives to
/// `<dir>/<stem>`.
pub fn output_root(path: &Path, kind: ContainerKind, options: &ExtractOptions) -> PathBuf {
    let dir = match &options.out_dir {
        Some(dir) => dir.clone(),
        None => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    match kind {
        ContainerKind::Rp6l => dir.join(format!("{stem}_extracted")),
        ContainerKind::Legacy => dir.join(stem),
    }
}

/// Turn an archive-internal name into a relative path.
///
/// Both separators are accepted; empty, `.` and `..` components are dropped so
/// the result always stays below the output root.
pub fn relative_output_path(name: &str) -> PathBuf {
    name.split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != ".." && !c.contains(':'))
        .collect()
}

fn output_name(name: &str, fallback: impl FnOnce() -> String) -> PathBuf {
    let relative = relative_output_path(name);
    if relative.as_os_str().is_empty() {
        PathBuf::from(fallback())
    } else {
        relative
    }
}

fn with_extension(path: PathBuf, extension: Option<&str>) -> PathBuf {
    match extension {
        Some(extension) => {
            let mut os = path.into_os_string();
            os.push(".");
            os.push(extension);
            PathBuf::from(os)
        }
        None => path,
    }
}

fn write_output(target: &Path, bytes: &[u8]) -> Result<(), Report<ExtractError>> {
    let io_error = |source| {
        Report::new(ExtractError::Write {
            path: target.to_owned(),
            source,
        })
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(target, bytes).map_err(io_error)
}

// --- RP6L ---

/// Payload of file `file`: its parts concatenated in ascending part order.
///
/// Parts that cannot be resolved contribute nothing and are reported.
pub fn file_payload(
    index: &ArchiveIndex,
    cache: &ChunkCache<'_>,
    file: usize,
    record: &FileRecord,
    diagnostics: &mut Diagnostics,
) -> Vec<u8> {
    let mut payload = Vec::new();
    for (k, part) in index.parts_of(file, record, diagnostics).iter().enumerate() {
        let bytes = cache.read_range(
            part.section_index as usize,
            u64::from(part.offset),
            u64::from(part.size),
        );
        match bytes {
            Ok(bytes) => {
                if bytes.len() as u64 != u64::from(part.size) {
                    debug!(file, part = k, size = part.size, "part runs past its section");
                }
                payload.extend_from_slice(&bytes);
            }
            Err(issue) => diagnostics.record(format!("file #{file} part {k}"), issue),
        }
    }
    payload
}

/// Extract the selected records of a parsed RP6L archive.
pub fn extract_rp6l(
    path: &Path,
    data: &[u8],
    options: &ExtractOptions,
) -> Result<ExtractSummary, Report<ExtractError>> {
    let index = rp6l::parse(data).map_err(|source| {
        Report::new(ExtractError::Archive {
            path: path.to_owned(),
            source,
        })
    })?;
    debug!(
        version = index.header.version,
        sections = index.sections.len(),
        parts = index.parts.len(),
        files = index.files.len(),
        "parsed RP6L tables"
    );

    let root = output_root(path, ContainerKind::Rp6l, options);
    let cache = ChunkCache::for_rp6l(data, &index);
    let mut diagnostics = Diagnostics::new();
    let mut extracted = 0;

    for (i, record) in index.files.iter().enumerate() {
        if !options.types.accepts(record.filetype) {
            continue;
        }
        let filetype = Recognized::<FileType, u8>::from_code(record.filetype);
        let category = category_of(&filetype);
        let name = index.filename(i, &mut diagnostics);
        let payload = file_payload(&index, &cache, i, record, &mut diagnostics);

        let subject = format!("file #{i} ({name})");
        let (bytes, extension) = match filetype {
            Recognized::Known(FileType::Texture) => {
                let dds = synthesize_dds(&payload, options.dds_layout, &subject, &mut diagnostics)
                    .unwrap_or_else(|e| {
                        diagnostics.record(
                            subject.as_str(),
                            Issue::StructuralMismatch(format!("{e}; writing raw payload")),
                        );
                        payload
                    });
                (dds, FileType::Texture.extension())
            }
            Recognized::Known(ty) => (payload, ty.extension()),
            Recognized::Unknown(_) => (payload, None),
        };

        let relative = output_name(&name, || format!("file_{i}"));
        let target = root.join(category).join(with_extension(relative, extension));
        write_output(&target, &bytes)?;
        debug!(file = i, category, path = %target.display(), bytes = bytes.len(), "extracted");
        extracted += 1;
    }

    Ok(ExtractSummary {
        path: path.to_owned(),
        kind: ContainerKind::Rp6l,
        output_dir: root,
        extracted,
        diagnostics: diagnostics.into_vec(),
    })
}

// --- Legacy ---

/// Decode the mesh asset described by `entry`.
pub fn legacy_mesh(
    index: &LegacyIndex,
    cache: &ChunkCache<'_>,
    entry: &NameEntry,
    name: &str,
    diagnostics: &mut Diagnostics,
) -> Result<MeshModel, Issue> {
    if entry.block_count != MESH_BLOCK_COUNT {
        return Err(Issue::StructuralMismatch(format!(
            "mesh spans {} blocks, expected {MESH_BLOCK_COUNT}",
            entry.block_count
        )));
    }

    let record = index.chunk(entry, 0)?;
    let vertices = index.chunk(entry, VERTEX_CHUNK)?;
    let indices = index.chunk(entry, INDEX_CHUNK)?;

    let record_buffer = cache.materialize(record.element_index as usize)?;
    let vertex_buffer = cache.materialize(vertices.element_index as usize)?;
    let index_buffer = cache.materialize(indices.element_index as usize)?;

    let buffers = MeshBuffers {
        record: &record_buffer,
        record_base: record.offset as usize,
        vertices: &vertex_buffer,
        vertex_base: vertices.offset as usize,
        indices: &index_buffer,
        index_base: indices.offset as usize,
    };
    decode_mesh(name, buffers, diagnostics).map_err(MeshError::into_issue)
}

/// Build a DDS file for the texture asset described by `entry`.
///
/// The engine header sits in the first chunk; the pixels in the next one. With
/// two blocks the pixel chunk's size replaces the declared data size. With more
/// than two the pixels are read straight from the file.
pub fn legacy_texture(
    index: &LegacyIndex,
    cache: &ChunkCache<'_>,
    entry: &NameEntry,
    layout: DdsLayout,
    subject: &str,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<u8>, Issue> {
    let header_chunk = index.chunk(entry, 0)?;
    let header_bytes = cache.read_range(
        header_chunk.element_index as usize,
        u64::from(header_chunk.offset),
        TEXTURE_HEADER_LEN as u64,
    )?;
    let header = TextureHeader::parse(&header_bytes)
        .map_err(|e| Issue::UnresolvedReference(format!("texture header: {e}")))?;

    let pixel_chunk = index.chunk(entry, 1)?;
    let declared = if entry.block_count == 2 {
        pixel_chunk.size
    } else {
        header.data_size
    };
    let data_size = u64::try_from(declared)
        .map_err(|_| Issue::StructuralMismatch(format!("negative texture data size {declared}")))?;

    let pixels = if entry.block_count > 2 {
        let element = index.element_of(pixel_chunk)?;
        let position = u64::from(element.offset) + u64::from(pixel_chunk.offset);
        cache.file_bytes(position, data_size)?.to_vec()
    } else {
        let pixels = cache.read_range(
            pixel_chunk.element_index as usize,
            u64::from(pixel_chunk.offset),
            data_size,
        )?;
        if pixels.len() as u64 != data_size {
            return Err(Issue::UnresolvedReference(format!(
                "{data_size} bytes of pixels at 0x{:X} run past element {}",
                pixel_chunk.offset, pixel_chunk.element_index
            )));
        }
        pixels
    };

    let mut out = dds_header(&header, pixels.len(), layout, subject, diagnostics);
    out.extend_from_slice(&pixels);
    Ok(out)
}

/// Render a text output in memory, then write it to `target`.
fn write_rendered<F>(target: &Path, render: F) -> Result<(), Report<ExtractError>>
where
    F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
{
    let mut out = Vec::new();
    render(&mut out).map_err(|source| {
        Report::new(ExtractError::Write {
            path: target.to_owned(),
            source,
        })
    })?;
    write_output(target, &out)
}

/// Extract the mesh and texture assets of a parsed legacy archive.
pub fn extract_legacy(
    path: &Path,
    data: &[u8],
    options: &ExtractOptions,
) -> Result<ExtractSummary, Report<ExtractError>> {
    let mut diagnostics = Diagnostics::new();
    let index = legacy::parse(data, &mut diagnostics).map_err(|source| {
        Report::new(ExtractError::Archive {
            path: path.to_owned(),
            source,
        })
    })?;
    debug!(
        elements = index.elements.len(),
        chunks = index.chunks.len(),
        names = index.names.len(),
        "parsed legacy tables"
    );

    let root = output_root(path, ContainerKind::Legacy, options);
    let cache = ChunkCache::for_legacy(data, &index);
    let mut extracted = 0;

    for (i, entry) in index.names.iter().enumerate() {
        let name = index.name(i, &mut diagnostics);
        debug!(entry = i, kind = entry.kind.code(), %name, "asset");
        let relative = output_name(&name, || format!("asset_{i}"));

        match entry.kind {
            Recognized::Known(AssetKind::Mesh) => {
                if options.skip_terrain && name.contains(TERRAIN_MARKER) {
                    debug!(%name, "skipping terrain mesh");
                    continue;
                }
                let model = match legacy_mesh(&index, &cache, entry, &name, &mut diagnostics) {
                    Ok(model) => model,
                    Err(issue) => {
                        diagnostics.record(format!("mesh {name}"), issue);
                        continue;
                    }
                };
                let models = root.join("models");
                write_rendered(&models.join(with_extension(relative.clone(), Some("smd"))), |out| {
                    write_smd(out, &model.skeleton, options.euler)
                })?;
                write_rendered(&models.join(with_extension(relative, Some("ascii"))), |out| {
                    write_ascii(out, &model)
                })?;
                extracted += 1;
            }
            Recognized::Known(AssetKind::Texture) => {
                let subject = format!("texture {name}");
                match legacy_texture(&index, &cache, entry, options.dds_layout, &subject, &mut diagnostics) {
                    Ok(dds) => {
                        let target = root.join("textures").join(with_extension(relative, Some("dds")));
                        write_output(&target, &dds)?;
                        extracted += 1;
                    }
                    Err(issue) => diagnostics.record(subject, issue),
                }
            }
            Recognized::Unknown(code) => {
                debug!(entry = i, code, category = UNKNOWN_CATEGORY, "skipping asset type");
            }
        }
    }

    Ok(ExtractSummary {
        path: path.to_owned(),
        kind: ContainerKind::Legacy,
        output_dir: root,
        extracted,
        diagnostics: diagnostics.into_vec(),
    })
}

// --- Listing ---

/// A byte range inside a section or element.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegionRange {
    pub region: usize,
    pub offset: u64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ListingEntry {
    pub index: usize,
    pub name: String,
    pub type_code: i32,
    pub category: &'static str,
    pub ranges: Vec<RegionRange>,
}

/// The resolved catalog of an archive without any payload decoding.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Listing {
    pub path: PathBuf,
    pub kind: ContainerKind,
    pub entries: Vec<ListingEntry>,
    pub diagnostics: Vec<String>,
}

fn rp6l_listing(index: &ArchiveIndex, diagnostics: &mut Diagnostics) -> Vec<ListingEntry> {
    index
        .files
        .iter()
        .enumerate()
        .map(|(i, record)| ListingEntry {
            index: i,
            name: index.filename(i, diagnostics),
            type_code: i32::from(record.filetype),
            category: category_of(&Recognized::<FileType, u8>::from_code(record.filetype)),
            ranges: index
                .parts_of(i, record, diagnostics)
                .iter()
                .map(|part| RegionRange {
                    region: part.section_index as usize,
                    offset: u64::from(part.offset),
                    size: i64::from(part.size),
                })
                .collect(),
        })
        .collect()
}

fn legacy_listing(index: &LegacyIndex, diagnostics: &mut Diagnostics) -> Vec<ListingEntry> {
    index
        .names
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let ranges = (0..entry.block_count.max(0) as usize)
                .map_while(|k| index.chunk(entry, k).ok())
                .map(|chunk| RegionRange {
                    region: chunk.element_index as usize,
                    offset: u64::from(chunk.offset),
                    size: i64::from(chunk.size),
                })
                .collect();
            ListingEntry {
                index: i,
                name: index.name(i, diagnostics),
                type_code: i32::from(entry.kind.code()),
                category: match entry.kind {
                    Recognized::Known(AssetKind::Mesh) => "mesh",
                    Recognized::Known(AssetKind::Texture) => "texture",
                    Recognized::Unknown(_) => UNKNOWN_CATEGORY,
                },
                ranges,
            }
        })
        .collect()
}

/// Parse the archive at `path` and describe its records.
pub fn list_path(path: &Path) -> Result<Listing, Report<ExtractError>> {
    let archive = MmapArchive::open(path).map_err(|source| {
        Report::new(ExtractError::Open {
            path: path.to_owned(),
            source,
        })
    })?;
    let data = archive.as_ref();
    let kind = ContainerKind::detect(path, data);
    let archive_error = |source| {
        Report::new(ExtractError::Archive {
            path: path.to_owned(),
            source,
        })
    };

    let mut diagnostics = Diagnostics::new();
    let entries = match kind {
        ContainerKind::Rp6l => {
            let index = rp6l::parse(data).map_err(archive_error)?;
            rp6l_listing(&index, &mut diagnostics)
        }
        ContainerKind::Legacy => {
            let index = legacy::parse(data, &mut diagnostics).map_err(archive_error)?;
            legacy_listing(&index, &mut diagnostics)
        }
    };

    Ok(Listing {
        path: path.to_owned(),
        kind,
        entries,
        diagnostics: diagnostics.iter().map(ToString::to_string).collect(),
    })
}
