//! Self-describing vertex declarations and the per-vertex attribute decoder.
//!
//! A declaration is a list of 4-byte elements `(type, semantic, usage, pad)`.
//! Vertices are tightly packed in declaration order; each element's width is
//! fixed by its type code.

use std::fmt;

use crate::data::parser_utils::{SliceCursor, WResult};
use crate::error::Issue;
use crate::math::Vector3;
use crate::recognized::{KnownCode, Recognized};

/// Size of one declaration element on disk.
pub const ELEMENT_SIZE: usize = 4;

/// Semantic meaning of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexSemantic {
    Position,
    BlendWeight,
    BlendIndices,
    Normal,
    TexCoord,
    Tangent,
    Color,
}

impl KnownCode for VertexSemantic {
    type Raw = u8;

    fn from_code(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(VertexSemantic::Position),
            1 => Some(VertexSemantic::BlendWeight),
            2 => Some(VertexSemantic::BlendIndices),
            3 => Some(VertexSemantic::Normal),
            5 => Some(VertexSemantic::TexCoord),
            6 => Some(VertexSemantic::Tangent),
            10 => Some(VertexSemantic::Color),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            VertexSemantic::Position => 0,
            VertexSemantic::BlendWeight => 1,
            VertexSemantic::BlendIndices => 2,
            VertexSemantic::Normal => 3,
            VertexSemantic::TexCoord => 5,
            VertexSemantic::Tangent => 6,
            VertexSemantic::Color => 10,
        }
    }
}

impl fmt::Display for VertexSemantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How an attribute is stored in the vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexType {
    /// 3 x f32
    Float3,
    /// 4 x f16, the last one padding
    Half4,
    /// 4 x u8
    UByte4,
    /// 4 x i8, signed-normalized
    Packed,
    /// 2 x f16
    Half2,
}

impl KnownCode for VertexType {
    type Raw = u8;

    fn from_code(raw: u8) -> Option<Self> {
        match raw {
            2 => Some(VertexType::Float3),
            16 => Some(VertexType::Half4),
            4 => Some(VertexType::UByte4),
            31 => Some(VertexType::Packed),
            15 => Some(VertexType::Half2),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            VertexType::Float3 => 2,
            VertexType::Half4 => 16,
            VertexType::UByte4 => 4,
            VertexType::Packed => 31,
            VertexType::Half2 => 15,
        }
    }
}

impl VertexType {
    /// Bytes occupied in each vertex.
    pub fn width(self) -> usize {
        match self {
            VertexType::Float3 => 12,
            VertexType::Half4 => 8,
            VertexType::UByte4 | VertexType::Packed | VertexType::Half2 => 4,
        }
    }
}

/// One declaration element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexElement {
    pub ty: Recognized<VertexType, u8>,
    pub semantic: Recognized<VertexSemantic, u8>,
    /// Channel index; selects the UV set for texture coordinates.
    pub usage: u8,
}

/// The decode rule selected by a semantic/type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    PositionF32,
    PositionF16,
    Weights,
    Indices,
    Normal,
    TexCoord(usize),
    /// Consumed and discarded.
    Skip(usize),
}

impl VertexElement {
    pub fn new(ty: u8, semantic: u8, usage: u8) -> Self {
        Self {
            ty: Recognized::from_code(ty),
            semantic: Recognized::from_code(semantic),
            usage,
        }
    }

    /// Bytes this element occupies. Unknown type codes have no known width.
    pub fn width(&self) -> usize {
        self.ty.known().map_or(0, |ty| ty.width())
    }

    fn rule(&self) -> Result<Rule, Issue> {
        use VertexSemantic as S;
        use VertexType as T;

        let Recognized::Known(ty) = self.ty else {
            return Err(Issue::UnknownFormatCode {
                kind: "vertex type",
                code: u32::from(self.ty.code()),
            });
        };
        let Recognized::Known(semantic) = self.semantic else {
            return Err(Issue::UnknownFormatCode {
                kind: "vertex semantic",
                code: u32::from(self.semantic.code()),
            });
        };

        match (semantic, ty) {
            (S::Position, T::Float3) => Ok(Rule::PositionF32),
            (S::Position, T::Half4) => Ok(Rule::PositionF16),
            (S::BlendWeight, T::UByte4) => Ok(Rule::Weights),
            (S::BlendIndices, T::UByte4) => Ok(Rule::Indices),
            (S::Normal, T::Packed) => Ok(Rule::Normal),
            (S::Tangent, T::Packed) | (S::Color, T::UByte4) => Ok(Rule::Skip(ty.width())),
            (S::TexCoord, T::Half2) => Ok(Rule::TexCoord(self.usage as usize)),
            // semantic in the high byte, type in the low byte
            _ => Err(Issue::UnknownFormatCode {
                kind: "vertex type/semantic pair",
                code: u32::from(semantic.code()) << 8 | u32::from(ty.code()),
            }),
        }
    }
}

/// A vertex declaration with the flags derived from its elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexDeclaration {
    pub elements: Vec<VertexElement>,
}

impl VertexDeclaration {
    pub fn new(elements: Vec<VertexElement>) -> Self {
        Self { elements }
    }

    /// Number of texture coordinate elements.
    pub fn uv_channels(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.semantic == Recognized::Known(VertexSemantic::TexCoord))
            .count()
    }

    /// Whether vertices carry explicit blend weights.
    pub fn has_blend(&self) -> bool {
        self.elements
            .iter()
            .any(|e| e.semantic == Recognized::Known(VertexSemantic::BlendWeight))
    }

    /// Total bytes per vertex.
    pub fn stride(&self) -> usize {
        self.elements.iter().map(VertexElement::width).sum()
    }

    /// UV slots a decoded vertex needs: every channel index the elements
    /// address, and at least one per counted channel.
    fn uv_slots(&self) -> usize {
        let addressed = self
            .elements
            .iter()
            .filter(|e| e.semantic == Recognized::Known(VertexSemantic::TexCoord))
            .map(|e| e.usage as usize + 1)
            .max()
            .unwrap_or(0);
        addressed.max(self.uv_channels())
    }

    /// Elements that cannot be decoded. They are skipped by their type width.
    pub fn issues(&self) -> Vec<Issue> {
        self.elements.iter().filter_map(|e| e.rule().err()).collect()
    }

    /// Decode one vertex at the cursor, leaving the cursor at the next vertex.
    pub fn decode_vertex(&self, cursor: &mut SliceCursor<'_>) -> WResult<Vertex> {
        let mut vertex = Vertex {
            uvs: vec![[0.0; 2]; self.uv_slots()],
            ..Vertex::default()
        };

        for element in &self.elements {
            match element.rule() {
                Ok(Rule::PositionF32) => {
                    vertex.position = Vector3::new(cursor.f32()?, cursor.f32()?, cursor.f32()?);
                }
                Ok(Rule::PositionF16) => {
                    vertex.position = Vector3::new(cursor.f16()?, cursor.f16()?, cursor.f16()?);
                    cursor.f16()?;
                }
                Ok(Rule::Weights) => {
                    for weight in &mut vertex.blend_weights {
                        *weight = f32::from(cursor.u8()?) / 255.0;
                    }
                }
                Ok(Rule::Indices) => {
                    for index in &mut vertex.blend_indices {
                        *index = cursor.u8()?;
                    }
                }
                Ok(Rule::Normal) => {
                    let x = f32::from(cursor.i8()?) / 127.0;
                    let y = f32::from(cursor.i8()?) / 127.0;
                    let z = f32::from(cursor.i8()?) / 127.0;
                    vertex.normal = Vector3::new(x, y, z);
                    cursor.u8()?;
                }
                Ok(Rule::TexCoord(channel)) => {
                    let uv = [cursor.f16()?, cursor.f16()?];
                    vertex.uvs[channel] = uv;
                }
                Ok(Rule::Skip(width)) => {
                    cursor.bytes(width)?;
                }
                Err(_) => {
                    cursor.bytes(element.width())?;
                }
            }
        }

        Ok(vertex)
    }
}

/// A decoded vertex in its bone's local frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vertex {
    pub position: Vector3,
    pub normal: Vector3,
    /// Indexed by UV channel.
    pub uvs: Vec<[f32; 2]>,
    /// Indices into the submesh's bone map.
    pub blend_indices: [u8; 4],
    pub blend_weights: [f32; 4],
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    fn f16_bytes(v: f32) -> [u8; 2] {
        f16::from_f32(v).to_le_bytes()
    }

    #[test]
    fn widths_follow_type_codes() {
        assert_eq!(VertexElement::new(2, 0, 0).width(), 12);
        assert_eq!(VertexElement::new(16, 0, 0).width(), 8);
        assert_eq!(VertexElement::new(4, 1, 0).width(), 4);
        assert_eq!(VertexElement::new(31, 3, 0).width(), 4);
        assert_eq!(VertexElement::new(15, 5, 0).width(), 4);
        assert_eq!(VertexElement::new(99, 5, 0).width(), 0);
    }

    #[test]
    fn flags_derived_from_elements() {
        let decl = VertexDeclaration::new(vec![
            VertexElement::new(2, 0, 0),
            VertexElement::new(4, 1, 0),
            VertexElement::new(4, 2, 0),
            VertexElement::new(15, 5, 0),
            VertexElement::new(15, 5, 1),
        ]);
        assert_eq!(decl.uv_channels(), 2);
        assert!(decl.has_blend());
        assert_eq!(decl.stride(), 12 + 4 + 4 + 4 + 4);
        assert!(decl.issues().is_empty());
    }

    #[test]
    fn decodes_every_rule() {
        let decl = VertexDeclaration::new(vec![
            VertexElement::new(16, 0, 0),
            VertexElement::new(31, 3, 0),
            VertexElement::new(31, 6, 0),
            VertexElement::new(15, 5, 1),
            VertexElement::new(4, 1, 0),
            VertexElement::new(4, 2, 0),
            VertexElement::new(4, 10, 0),
        ]);

        let mut data = Vec::new();
        for v in [1.0, -2.0, 0.5, 0.0] {
            data.extend_from_slice(&f16_bytes(v));
        }
        data.extend_from_slice(&[127, 0x81, 0, 0]);
        data.extend_from_slice(&[9; 4]);
        data.extend_from_slice(&f16_bytes(0.25));
        data.extend_from_slice(&f16_bytes(0.75));
        data.extend_from_slice(&[255, 0, 0, 0]);
        data.extend_from_slice(&[3, 1, 0, 0]);
        data.extend_from_slice(&[7; 4]);
        data.push(0xEE);

        let mut cursor = SliceCursor::new(&data);
        let vertex = decl.decode_vertex(&mut cursor).unwrap();
        assert_eq!(vertex.position, Vector3::new(1.0, -2.0, 0.5));
        assert_eq!(vertex.normal, Vector3::new(1.0, -1.0, 0.0));
        assert_eq!(vertex.uvs, vec![[0.0, 0.0], [0.25, 0.75]]);
        assert_eq!(vertex.blend_weights, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(vertex.blend_indices, [3, 1, 0, 0]);
        assert_eq!(cursor.position(), decl.stride());
        assert_eq!(cursor.u8().unwrap(), 0xEE);
    }

    #[test]
    fn unknown_semantic_advances_by_type_width() {
        let decl = VertexDeclaration::new(vec![
            VertexElement::new(2, 0, 0),
            // semantic 7 is not in the table; type 4 is 4 bytes wide
            VertexElement::new(4, 7, 0),
            VertexElement::new(15, 5, 0),
        ]);
        assert_eq!(
            decl.issues(),
            vec![Issue::UnknownFormatCode {
                kind: "vertex semantic",
                code: 7
            }]
        );

        let mut data = Vec::new();
        for v in [1.0f32, 2.0, 3.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&[0xAB; 4]);
        data.extend_from_slice(&f16_bytes(0.5));
        data.extend_from_slice(&f16_bytes(1.0));

        let mut cursor = SliceCursor::new(&data);
        let vertex = decl.decode_vertex(&mut cursor).unwrap();
        assert_eq!(vertex.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(vertex.uvs, vec![[0.5, 1.0]]);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn mismatched_type_is_reported_and_skipped() {
        let decl = VertexDeclaration::new(vec![VertexElement::new(4, 3, 0)]);
        // normal (3) stored as ubyte4 (4)
        assert_eq!(
            decl.issues(),
            vec![Issue::UnknownFormatCode {
                kind: "vertex type/semantic pair",
                code: 0x0304,
            }]
        );
        let data = [1, 2, 3, 4];
        let mut cursor = SliceCursor::new(&data);
        let vertex = decl.decode_vertex(&mut cursor).unwrap();
        assert_eq!(vertex.normal, Vector3::ZERO);
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn short_buffer_is_an_error() {
        let decl = VertexDeclaration::new(vec![VertexElement::new(2, 0, 0)]);
        let mut cursor = SliceCursor::new(&[0; 8]);
        assert!(decl.decode_vertex(&mut cursor).is_err());
    }
}
