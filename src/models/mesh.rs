//! Legacy mesh record decoder.
//!
//! A mesh asset spans five chunks. The first holds the record itself: a header
//! with pointers to a bone table and a vertex declaration table, and per-bone
//! sub-records describing the vertex and index streams owned by that bone.
//! The fourth and fifth chunks hold the vertex and index data.
//!
//! Pointers inside the record are 1-based offsets from the record start
//! (`0` is null).

use std::ops::Range;

use thiserror::Error;
use tracing::debug;

use crate::data::parser_utils::{SliceCursor, WResult, resolve_relptr};
use crate::error::{Diagnostics, Issue};
use crate::math::{Matrix3, Vector3};
use crate::models::skeleton::{LocalBone, Skeleton};
use crate::models::vertex_decl::{ELEMENT_SIZE, Vertex, VertexDeclaration, VertexElement};

/// Chunks a mesh name entry must span.
pub const MESH_BLOCK_COUNT: i16 = 5;
/// Chunk holding vertex data, relative to the record chunk.
pub const VERTEX_CHUNK: usize = 3;
/// Chunk holding index data, relative to the record chunk.
pub const INDEX_CHUNK: usize = 4;

const BONE_TABLE_POINTER: usize = 8;
const DECLARATION_TABLE_POINTER: usize = 80;
const BONE_COUNT: usize = 100;
const DECLARATION_COUNT: usize = 124;

const DECLARATION_ENTRY_SIZE: usize = 16;

const BONE_STRIDE: usize = 208;
const BONE_NAME_POINTER: usize = 120;
const BONE_MESH_POINTER: usize = 136;
const BONE_PARENT: usize = 198;

/// Offset of the (sub-info, unused, bone-map) pointer triple in a bone mesh.
const MESH_POINTERS: usize = 8;
/// Offset of the stream description inside a sub-info block.
const SUB_INFO_STREAMS: usize = 24;
const BONE_MAP_ENTRY_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("{what} at 0x{offset:X} runs past the end of the buffer")]
    OutOfBounds { what: &'static str, offset: usize },
    #[error("{0} pointer is null")]
    NullPointer(&'static str),
    #[error("negative {what} count {count}")]
    NegativeCount { what: &'static str, count: i64 },
    #[error("declaration {index} outside table of {count}")]
    MissingDeclaration { index: i16, count: usize },
    #[error("declaration {declaration} has no decodable width but {count} vertices")]
    ZeroStride { declaration: i16, count: usize },
    #[error("index {index} outside the {count} vertices of submesh {submesh}")]
    IndexOutOfRange {
        submesh: usize,
        index: u16,
        count: usize,
    },
}

impl MeshError {
    pub fn into_issue(self) -> Issue {
        match self {
            MeshError::NegativeCount { .. } | MeshError::ZeroStride { .. } => {
                Issue::StructuralMismatch(self.to_string())
            }
            _ => Issue::UnresolvedReference(self.to_string()),
        }
    }
}

/// The three materialized buffers a mesh record is decoded from, each with
/// the offset of its chunk inside the buffer.
#[derive(Debug, Clone, Copy)]
pub struct MeshBuffers<'a> {
    pub record: &'a [u8],
    pub record_base: usize,
    pub vertices: &'a [u8],
    pub vertex_base: usize,
    pub indices: &'a [u8],
    pub index_base: usize,
}

/// One submesh of a bone group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submesh {
    /// Range of the group's vertices referenced by this submesh.
    pub vertices: Range<usize>,
    /// Renumbered from `vertices.start`, reversed winding.
    pub triangles: Vec<[u32; 3]>,
    /// Global bone indices per vertex in `vertices`; empty without blend data.
    pub bone_links: Vec<[i32; 4]>,
}

/// Geometry owned by one bone.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneGroup {
    pub bone: usize,
    pub uv_channels: usize,
    pub has_blend: bool,
    pub vertices: Vec<Vertex>,
    pub submeshes: Vec<Submesh>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshModel {
    pub name: String,
    pub skeleton: Skeleton,
    pub groups: Vec<BoneGroup>,
}

impl MeshModel {
    pub fn submesh_count(&self) -> usize {
        self.groups.iter().map(|g| g.submeshes.len()).sum()
    }
}

fn read_at<'a, T>(
    data: &'a [u8],
    offset: usize,
    what: &'static str,
    read: impl FnOnce(&mut SliceCursor<'a>) -> WResult<T>,
) -> Result<T, MeshError> {
    let mut cursor = SliceCursor::at(data, offset);
    read(&mut cursor).map_err(|_| MeshError::OutOfBounds { what, offset })
}

fn pointer(base: usize, value: i32, what: &'static str) -> Result<usize, MeshError> {
    resolve_relptr(base, value).ok_or(MeshError::NullPointer(what))
}

fn count(value: i64, what: &'static str) -> Result<usize, MeshError> {
    usize::try_from(value).map_err(|_| MeshError::NegativeCount { what, count: value })
}

/// Stream description for the geometry owned by one bone.
#[derive(Debug, Clone)]
struct BoneMesh {
    index_counts: usize,
    vertex_offset: usize,
    vertex_count: usize,
    index_offset: usize,
    submesh_count: usize,
    declaration: i16,
    bone_maps: Vec<Option<Vec<i16>>>,
}

struct RecordDecoder<'a, 'd> {
    buffers: MeshBuffers<'a>,
    name: &'a str,
    diagnostics: &'d mut Diagnostics,
}

impl<'a> RecordDecoder<'a, '_> {
    fn base(&self) -> usize {
        self.buffers.record_base
    }

    fn record(&self) -> &'a [u8] {
        self.buffers.record
    }

    fn at(&self, offset: usize) -> Result<usize, MeshError> {
        self.base()
            .checked_add(offset)
            .ok_or(MeshError::OutOfBounds {
                what: "record field",
                offset,
            })
    }

    fn declarations(&mut self) -> Result<Vec<VertexDeclaration>, MeshError> {
        let data = self.record();
        let base = self.base();
        let raw_count = read_at(data, self.at(DECLARATION_COUNT)?, "declaration count", |c| c.i32())?;
        let declaration_count = count(raw_count.into(), "declaration")?;
        if declaration_count == 0 {
            return Ok(Vec::new());
        }
        let table_ptr = read_at(data, self.at(DECLARATION_TABLE_POINTER)?, "declaration table", |c| {
            c.i32()
        })?;
        let table = pointer(base, table_ptr, "declaration table")?;

        let mut declarations = Vec::with_capacity(declaration_count.min(data.len() / DECLARATION_ENTRY_SIZE));
        for i in 0..declaration_count {
            let entry = table + i * DECLARATION_ENTRY_SIZE;
            let (elements_ptr, element_count) = read_at(data, entry, "declaration entry", |c| {
                let ptr = c.i32()?;
                c.skip(4);
                let count = c.i32()?;
                Ok((ptr, count))
            })?;
            let element_count = count(element_count.into(), "declaration element")?;
            let elements_at = if element_count == 0 {
                0
            } else {
                pointer(base, elements_ptr, "declaration elements")?
            };
            let elements = read_at(data, elements_at, "declaration elements", |c| {
                let mut elements = Vec::with_capacity(element_count.min(c.remaining() / ELEMENT_SIZE));
                for _ in 0..element_count {
                    let ty = c.u8()?;
                    let semantic = c.u8()?;
                    let usage = c.u8()?;
                    c.u8()?;
                    elements.push(VertexElement::new(ty, semantic, usage));
                }
                Ok(elements)
            })?;

            let declaration = VertexDeclaration::new(elements);
            for issue in declaration.issues() {
                self.diagnostics
                    .record(format!("{} declaration #{i}", self.name), issue);
            }
            declarations.push(declaration);
        }
        Ok(declarations)
    }

    fn bone_count(&self) -> Result<usize, MeshError> {
        let raw = read_at(self.record(), self.at(BONE_COUNT)?, "bone count", |c| c.i32())?;
        count(raw.into(), "bone")
    }

    fn bone_table(&self) -> Result<usize, MeshError> {
        let raw = read_at(self.record(), self.at(BONE_TABLE_POINTER)?, "bone table", |c| {
            c.i32()
        })?;
        pointer(self.base(), raw, "bone table")
    }

    /// Local transform, name and mesh pointer of each bone.
    fn bones(&self, table: usize, bone_count: usize) -> Result<(Vec<LocalBone>, Vec<i32>), MeshError> {
        let data = self.record();
        let mut locals = Vec::with_capacity(bone_count.min(data.len() / BONE_STRIDE));
        let mut meshes = Vec::with_capacity(locals.capacity());

        for i in 0..bone_count {
            let record = table + i * BONE_STRIDE;

            let name_ptr = read_at(data, record + BONE_NAME_POINTER, "bone name pointer", |c| c.i32())?;
            let name = match resolve_relptr(self.base(), name_ptr) {
                Some(at) => read_at(data, at, "bone name", |c| c.c_string())?,
                None => String::new(),
            };

            let (orientation, position) = read_at(data, record, "bone transform", |c| {
                let mut m: Matrix3 = [[0.0; 3]; 3];
                let mut t = [0.0f32; 3];
                for row in 0..3 {
                    for column in &mut m {
                        column[row] = c.f32()?;
                    }
                    t[row] = c.f32()?;
                }
                Ok((m, Vector3::from(t)))
            })?;
            let parent = read_at(data, record + BONE_PARENT, "bone parent", |c| c.i16())?;
            let mesh = read_at(data, record + BONE_MESH_POINTER, "bone mesh pointer", |c| c.i32())?;

            locals.push(LocalBone {
                name,
                parent,
                position,
                orientation,
            });
            meshes.push(mesh);
        }
        Ok((locals, meshes))
    }

    fn bone_mesh(&self, mesh_ptr: i32) -> Result<BoneMesh, MeshError> {
        let data = self.record();
        let base = self.base();
        let mesh = pointer(base, mesh_ptr, "bone mesh")?;

        let (sub_info, bone_map_table) = read_at(data, mesh + MESH_POINTERS, "mesh pointers", |c| {
            let sub_info = c.i32()?;
            c.skip(4);
            let _unused = c.i32()?;
            c.skip(4);
            let bone_map = c.i32()?;
            c.skip(4);
            Ok((sub_info, bone_map))
        })?;
        let sub_info = pointer(base, sub_info, "sub-info")?;

        let index_counts = read_at(data, sub_info, "index count table", |c| c.i32())?;
        let index_counts = pointer(base, index_counts, "index count table")?;

        let streams = read_at(data, sub_info + SUB_INFO_STREAMS, "stream description", |c| {
            let vertex_offset = c.u32()?;
            c.skip(12);
            let vertex_count = c.i32()?;
            let index_offset = c.u32()?;
            let submesh_count = c.i16()?;
            let declaration = c.i16()?;
            c.i32()?;
            Ok((vertex_offset, vertex_count, index_offset, submesh_count, declaration))
        })?;
        let (vertex_offset, vertex_count, index_offset, submesh_count, declaration) = streams;
        let submesh_count = count(submesh_count.into(), "submesh")?;

        let bone_maps = if submesh_count == 0 {
            Vec::new()
        } else {
            let table = pointer(base, bone_map_table, "bone map table")?;
            let mut maps = Vec::with_capacity(submesh_count.min(data.len() / BONE_MAP_ENTRY_SIZE));
            for k in 0..submesh_count {
                let (ptr, entries) = read_at(data, table + k * BONE_MAP_ENTRY_SIZE, "bone map entry", |c| {
                    let ptr = c.i32()?;
                    c.skip(4);
                    let entries = c.i32()?;
                    Ok((ptr, entries))
                })?;
                let map = match resolve_relptr(base, ptr) {
                    Some(at) => {
                        let entries = count(entries.into(), "bone map")?;
                        Some(read_at(data, at, "bone map", |c| {
                            let mut map = Vec::with_capacity(entries.min(c.remaining() / 2));
                            for _ in 0..entries {
                                map.push(c.i16()?);
                            }
                            Ok(map)
                        })?)
                    }
                    None => None,
                };
                maps.push(map);
            }
            maps
        };

        Ok(BoneMesh {
            index_counts,
            vertex_offset: self.buffers.vertex_base + vertex_offset as usize,
            vertex_count: count(vertex_count.into(), "vertex")?,
            index_offset: self.buffers.index_base + index_offset as usize,
            submesh_count,
            declaration,
            bone_maps,
        })
    }

    fn group(
        &mut self,
        bone: usize,
        mesh: &BoneMesh,
        declarations: &[VertexDeclaration],
    ) -> Result<BoneGroup, MeshError> {
        let declaration = usize::try_from(mesh.declaration)
            .ok()
            .and_then(|i| declarations.get(i))
            .ok_or(MeshError::MissingDeclaration {
                index: mesh.declaration,
                count: declarations.len(),
            })?;

        let stride = declaration.stride();
        if mesh.vertex_count > 0 && stride == 0 {
            return Err(MeshError::ZeroStride {
                declaration: mesh.declaration,
                count: mesh.vertex_count,
            });
        }
        let available = self.buffers.vertices.len().saturating_sub(mesh.vertex_offset);
        if mesh
            .vertex_count
            .checked_mul(stride)
            .is_none_or(|needed| needed > available)
        {
            return Err(MeshError::OutOfBounds {
                what: "vertex stream",
                offset: mesh.vertex_offset,
            });
        }

        let vertices = read_at(self.buffers.vertices, mesh.vertex_offset, "vertex stream", |c| {
            let mut vertices = Vec::with_capacity(mesh.vertex_count);
            for _ in 0..mesh.vertex_count {
                vertices.push(declaration.decode_vertex(c)?);
            }
            Ok(vertices)
        })?;

        let data = self.record();
        let mut index_cursor = mesh.index_offset;
        let mut submeshes = Vec::with_capacity(mesh.submesh_count);
        for k in 0..mesh.submesh_count {
            let index_count = read_at(data, mesh.index_counts + k * 4, "index count", |c| c.i32())?;
            let index_count = count(index_count.into(), "index")?;
            let indices = read_at(self.buffers.indices, index_cursor, "index stream", |c| {
                let mut indices = Vec::with_capacity(index_count.min(c.remaining() / 2));
                for _ in 0..index_count {
                    indices.push(c.u16()?);
                }
                Ok(indices)
            })?;
            index_cursor += index_count * 2;

            let submesh = self.submesh(bone, k, &indices, mesh, declaration, &vertices)?;
            submeshes.push(submesh);
        }

        Ok(BoneGroup {
            bone,
            uv_channels: declaration.uv_channels(),
            has_blend: declaration.has_blend(),
            vertices,
            submeshes,
        })
    }

    fn submesh(
        &mut self,
        bone: usize,
        k: usize,
        indices: &[u16],
        mesh: &BoneMesh,
        declaration: &VertexDeclaration,
        vertices: &[Vertex],
    ) -> Result<Submesh, MeshError> {
        let (Some(&min), Some(&max)) = (indices.iter().min(), indices.iter().max()) else {
            return Ok(Submesh::default());
        };
        if max as usize >= vertices.len() {
            return Err(MeshError::IndexOutOfRange {
                submesh: k,
                index: max,
                count: vertices.len(),
            });
        }
        let range = min as usize..max as usize + 1;

        let triangles = indices
            .chunks_exact(3)
            .map(|tri| {
                [
                    u32::from(tri[2] - min),
                    u32::from(tri[1] - min),
                    u32::from(tri[0] - min),
                ]
            })
            .collect();

        let mut bone_links = Vec::new();
        if declaration.has_blend() {
            let map = mesh.bone_maps.get(k).and_then(Option::as_ref);
            let mut unresolved = 0usize;
            bone_links = vertices[range.clone()]
                .iter()
                .map(|v| {
                    v.blend_indices.map(|local| {
                        match map.and_then(|m| m.get(local as usize)) {
                            Some(&global) => i32::from(global),
                            None => {
                                unresolved += 1;
                                i32::from(local)
                            }
                        }
                    })
                })
                .collect();
            if unresolved > 0 {
                self.diagnostics.record(
                    format!("{} bone #{bone} submesh {k}", self.name),
                    Issue::UnresolvedReference(format!(
                        "{unresolved} blend indices outside the bone map; kept as local indices"
                    )),
                );
            }
        }

        Ok(Submesh {
            vertices: range,
            triangles,
            bone_links,
        })
    }
}

/// Decode a mesh record into a skeleton and per-bone skinned geometry.
///
/// Failures in the record header or bone table abort the whole mesh. A bone
/// whose geometry cannot be decoded is reported and left out.
pub fn decode_mesh(
    name: &str,
    buffers: MeshBuffers<'_>,
    diagnostics: &mut Diagnostics,
) -> Result<MeshModel, MeshError> {
    let mut decoder = RecordDecoder {
        buffers,
        name,
        diagnostics,
    };

    let declarations = decoder.declarations()?;
    let bone_count = decoder.bone_count()?;
    let (locals, mesh_pointers) = if bone_count == 0 {
        (Vec::new(), Vec::new())
    } else {
        let table = decoder.bone_table()?;
        decoder.bones(table, bone_count)?
    };
    let skeleton = Skeleton::from_local(locals, name, decoder.diagnostics);

    let mut groups = Vec::new();
    for (bone, &mesh_ptr) in mesh_pointers.iter().enumerate() {
        if mesh_ptr == 0 {
            continue;
        }
        let group = decoder
            .bone_mesh(mesh_ptr)
            .and_then(|mesh| decoder.group(bone, &mesh, &declarations));
        match group {
            Ok(group) => groups.push(group),
            Err(e) => decoder
                .diagnostics
                .record(format!("{name} bone #{bone}"), e.into_issue()),
        }
    }

    debug!(
        mesh = name,
        bones = skeleton.len(),
        groups = groups.len(),
        "decoded mesh record"
    );

    Ok(MeshModel {
        name: name.to_string(),
        skeleton,
        groups,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builder for synthetic mesh records.

    use half::f16;

    /// Little-endian byte buffer with absolute-offset patching.
    #[derive(Default)]
    pub struct Buf(pub Vec<u8>);

    impl Buf {
        pub fn at(&mut self, offset: usize) -> &mut [u8] {
            if self.0.len() < offset + 8 {
                self.0.resize(offset + 8, 0);
            }
            &mut self.0[offset..]
        }

        pub fn i32(&mut self, offset: usize, v: i32) {
            self.at(offset)[..4].copy_from_slice(&v.to_le_bytes());
        }

        pub fn u32(&mut self, offset: usize, v: u32) {
            self.at(offset)[..4].copy_from_slice(&v.to_le_bytes());
        }

        pub fn i16(&mut self, offset: usize, v: i16) {
            self.at(offset)[..2].copy_from_slice(&v.to_le_bytes());
        }

        pub fn f32(&mut self, offset: usize, v: f32) {
            self.at(offset)[..4].copy_from_slice(&v.to_le_bytes());
        }

        pub fn bytes(&mut self, offset: usize, v: &[u8]) {
            if self.0.len() < offset + v.len() {
                self.0.resize(offset + v.len(), 0);
            }
            self.0[offset..offset + v.len()].copy_from_slice(v);
        }

        pub fn push(&mut self, v: &[u8]) {
            self.0.extend_from_slice(v);
        }

        pub fn push_f16(&mut self, v: f32) {
            self.push(&f16::from_f32(v).to_le_bytes());
        }
    }

    /// Relative pointer to `target` for a record starting at `base`.
    pub fn ptr(base: usize, target: usize) -> i32 {
        (target - base + 1) as i32
    }

    /// A record with two bones (root and one child owning a two-submesh
    /// group), one blend-weighted declaration and four vertices.
    ///
    /// Returns (record, vertices, indices). The record starts at `base`; the
    /// vertex and index streams start at offset 0 of their buffers.
    pub fn two_bone_record(base: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let mut r = Buf::default();
        r.at(base + 0x600);

        let bones = base + 0x100;
        let decls = base + 0x80;
        let elements = base + 0xA0;
        let names = base + 0x300;
        let mesh = base + 0x380;
        let sub = base + 0x400;
        let counts = base + 0x480;
        let maps = base + 0x4A0;
        let map0 = base + 0x4E0;

        r.i32(base + 8, ptr(base, bones));
        r.i32(base + 80, ptr(base, decls));
        r.i32(base + 100, 2);
        r.i32(base + 124, 1);

        // declaration 0: position f32x3, blend weights, blend indices, uv0
        r.i32(decls, ptr(base, elements));
        r.i32(decls + 8, 4);
        r.bytes(elements, &[2, 0, 0, 0, 4, 1, 0, 0, 4, 2, 0, 0, 15, 5, 0, 0]);

        r.bytes(names, b"root\0arm\0");
        for (i, (name, parent, t)) in [(0usize, -1i16, [1.0f32, 2.0, 3.0]), (5, 0, [0.0, 1.0, 0.0])]
            .into_iter()
            .enumerate()
        {
            let rec = bones + i * 208;
            // identity orientation, translation in the fourth column
            for row in 0..3 {
                for col in 0..3 {
                    r.f32(rec + row * 16 + col * 4, if row == col { 1.0 } else { 0.0 });
                }
                r.f32(rec + row * 16 + 12, t[row]);
            }
            r.i32(rec + 120, ptr(base, names + name));
            r.i16(rec + 198, parent);
        }
        r.i32(bones + 208 + 136, ptr(base, mesh));

        r.i32(mesh + 8, ptr(base, sub));
        r.i32(mesh + 24, ptr(base, maps));
        r.i32(sub, ptr(base, counts));
        r.u32(sub + 24, 0);
        r.i32(sub + 40, 4);
        r.u32(sub + 44, 0);
        r.i16(sub + 48, 2);
        r.i16(sub + 50, 0);
        r.i32(counts, 3);
        r.i32(counts + 4, 3);

        // submesh 0 maps local bone 0 -> 1, submesh 1 has no map
        r.i32(maps, ptr(base, map0));
        r.i32(maps + 8, 1);
        r.i16(map0, 1);

        let mut v = Buf::default();
        for i in 0..4 {
            for c in [i as f32, 0.5, -1.0] {
                v.push(&c.to_le_bytes());
            }
            v.push(&[255, 0, 0, 0]);
            v.push(&[0, 0, 0, 0]);
            v.push_f16(0.25 * i as f32);
            v.push_f16(1.0);
        }

        let mut ix = Buf::default();
        for i in [0u16, 1, 2, 1, 2, 3] {
            ix.push(&i.to_le_bytes());
        }

        (r.0, v.0, ix.0)
    }
}
