//! DDS header synthesis for texture payloads.
//!
//! Texture resources start with a small engine header (dimensions, a format
//! code and the pixel data size). The DDS header is rebuilt from those fields
//! and the pixel data is appended unchanged.

use thiserror::Error;
use winnow::error::{ContextError, ErrMode};

use crate::data::parser_utils::SliceCursor;
use crate::error::{Diagnostics, Issue};
use crate::recognized::{KnownCode, Recognized};

/// Size of the engine texture header at the start of a payload.
pub const TEXTURE_HEADER_LEN: usize = 31;

pub const DDS_MAGIC: &[u8; 4] = b"DDS ";
pub const DDS_HEADER_SIZE: u32 = 124;
/// Magic plus the 124-byte DDS_HEADER.
pub const DDS_PREFIX_LEN: usize = 128;
pub const DX10_EXTENSION_LEN: usize = 20;

const DDSD_CAPS_HEIGHT_WIDTH_PIXELFORMAT: u32 = 0x1007;
const DDSCAPS_TEXTURE: u32 = 0x1000;
const PIXEL_FORMAT_OFFSET: usize = 76;
const PIXEL_FORMAT_SIZE: u32 = 32;

const DDPF_ALPHAPIXELS: u32 = 0x1;
const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDPF_LUMINANCE: u32 = 0x2_0000;

/// D3DFMT_A16B16G16R16F, written as a numeric fourCC.
const D3DFMT_A16B16G16R16F: u32 = 113;
const DX10_DIMENSION_TEXTURE2D: u32 = 3;

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("payload of {0} bytes is too short for a texture header")]
    Truncated(usize),
    #[error("declared data size {declared} does not fit a payload of {available} bytes")]
    InvalidDataSize { declared: i32, available: usize },
}

/// Engine texture format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TextureFormat {
    Rgba8,
    R8,
    Rgba16Float,
    Dxt1,
    Dxt3,
    Dxt5,
}

impl KnownCode for TextureFormat {
    type Raw = i32;

    fn from_code(raw: i32) -> Option<Self> {
        match raw {
            2 => Some(TextureFormat::Rgba8),
            14 => Some(TextureFormat::R8),
            33 => Some(TextureFormat::Rgba16Float),
            17 => Some(TextureFormat::Dxt1),
            18 => Some(TextureFormat::Dxt3),
            19 => Some(TextureFormat::Dxt5),
            _ => None,
        }
    }

    fn code(self) -> i32 {
        match self {
            TextureFormat::Rgba8 => 2,
            TextureFormat::R8 => 14,
            TextureFormat::Rgba16Float => 33,
            TextureFormat::Dxt1 => 17,
            TextureFormat::Dxt3 => 18,
            TextureFormat::Dxt5 => 19,
        }
    }
}

impl TextureFormat {
    /// Equivalent `DXGI_FORMAT` value.
    pub fn dxgi_code(self) -> u32 {
        match self {
            TextureFormat::Rgba8 => 28,
            TextureFormat::R8 => 61,
            TextureFormat::Rgba16Float => 10,
            TextureFormat::Dxt1 => 71,
            TextureFormat::Dxt3 => 74,
            TextureFormat::Dxt5 => 77,
        }
    }

    /// Block-compressed formats are identified by fourCC in every layout.
    pub fn compressed_four_cc(self) -> Option<&'static [u8; 4]> {
        match self {
            TextureFormat::Dxt1 => Some(b"DXT1"),
            TextureFormat::Dxt3 => Some(b"DXT3"),
            TextureFormat::Dxt5 => Some(b"DXT5"),
            _ => None,
        }
    }
}

/// Which DDS header shape to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DdsLayout {
    /// Plain 128-byte header with a classic pixel format block.
    #[default]
    Legacy,
    /// Uncompressed formats use fourCC `DX10` and a 20-byte extension header.
    Dx10,
}

/// The engine header at the start of a texture payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureHeader {
    pub width: i16,
    pub height: i16,
    pub format: Recognized<TextureFormat, i32>,
    pub data_size: i32,
}

impl TextureHeader {
    pub fn parse(payload: &[u8]) -> Result<Self, TextureError> {
        let mut cursor = SliceCursor::new(payload);
        let truncated = |_: ErrMode<ContextError>| TextureError::Truncated(payload.len());
        let width = cursor.i16().map_err(truncated)?;
        let height = cursor.i16().map_err(truncated)?;
        cursor.skip(8);
        let format = Recognized::from_code(cursor.i32().map_err(truncated)?);
        // i32, i16, u8, i32
        cursor.skip(11);
        let data_size = cursor.i32().map_err(truncated)?;
        Ok(Self {
            width,
            height,
            format,
            data_size,
        })
    }

    /// The declared data size, checked against what is available.
    pub fn checked_data_size(&self, available: usize) -> Result<usize, TextureError> {
        usize::try_from(self.data_size)
            .ok()
            .filter(|&size| size <= available)
            .ok_or(TextureError::InvalidDataSize {
                declared: self.data_size,
                available,
            })
    }
}

fn put_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Build the DDS header for `header`, describing `data_size` bytes of pixels.
///
/// Unknown format codes are reported and passed through in a DX10 header.
pub fn dds_header(
    header: &TextureHeader,
    data_size: usize,
    layout: DdsLayout,
    subject: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<u8> {
    let mut out = vec![0u8; DDS_PREFIX_LEN];
    out[..4].copy_from_slice(DDS_MAGIC);
    put_u32(&mut out, 4, DDS_HEADER_SIZE);
    put_u32(&mut out, 8, DDSD_CAPS_HEIGHT_WIDTH_PIXELFORMAT);
    put_u32(&mut out, 12, header.height as u32);
    put_u32(&mut out, 16, header.width as u32);
    put_u32(&mut out, 20, data_size as u32);
    put_u32(&mut out, 24, 0);
    put_u32(&mut out, 28, 1);

    let pf = PIXEL_FORMAT_OFFSET;
    put_u32(&mut out, pf, PIXEL_FORMAT_SIZE);

    let dx10_format = match (header.format, layout) {
        (Recognized::Known(format), _) if format.compressed_four_cc().is_some() => {
            put_u32(&mut out, pf + 4, DDPF_FOURCC);
            if let Some(four_cc) = format.compressed_four_cc() {
                out[pf + 8..pf + 12].copy_from_slice(four_cc);
            }
            None
        }
        (Recognized::Known(format), DdsLayout::Dx10) => Some(format.dxgi_code()),
        (Recognized::Known(TextureFormat::Rgba8), DdsLayout::Legacy) => {
            put_u32(&mut out, pf + 4, DDPF_RGB | DDPF_ALPHAPIXELS);
            put_u32(&mut out, pf + 12, 32);
            put_u32(&mut out, pf + 16, 0x0000_00FF);
            put_u32(&mut out, pf + 20, 0x0000_FF00);
            put_u32(&mut out, pf + 24, 0x00FF_0000);
            put_u32(&mut out, pf + 28, 0xFF00_0000);
            None
        }
        (Recognized::Known(TextureFormat::R8), DdsLayout::Legacy) => {
            put_u32(&mut out, pf + 4, DDPF_LUMINANCE);
            put_u32(&mut out, pf + 12, 8);
            put_u32(&mut out, pf + 16, 0xFF);
            None
        }
        (Recognized::Known(_), DdsLayout::Legacy) => {
            // RGBA16F; the compressed formats were matched above.
            put_u32(&mut out, pf + 4, DDPF_FOURCC);
            put_u32(&mut out, pf + 8, D3DFMT_A16B16G16R16F);
            None
        }
        (Recognized::Unknown(code), _) => {
            diagnostics.record(
                subject,
                Issue::UnknownFormatCode {
                    kind: "texture format",
                    code: code as u32,
                },
            );
            Some(code as u32)
        }
    };

    if layout == DdsLayout::Legacy {
        put_u32(&mut out, 108, DDSCAPS_TEXTURE);
    }

    if let Some(dxgi) = dx10_format {
        put_u32(&mut out, pf + 4, DDPF_FOURCC);
        out[pf + 8..pf + 12].copy_from_slice(b"DX10");
        for value in [dxgi, DX10_DIMENSION_TEXTURE2D, 0, 1, 0] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    out
}

/// Rebuild a DDS file from a self-contained texture payload.
///
/// The pixel data is the last `data_size` bytes of the payload. On error the
/// caller writes the raw payload instead.
pub fn synthesize_dds(
    payload: &[u8],
    layout: DdsLayout,
    subject: &str,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<u8>, TextureError> {
    let header = TextureHeader::parse(payload)?;
    let data_size = header.checked_data_size(payload.len())?;
    let pixels = &payload[payload.len() - data_size..];

    let mut out = dds_header(&header, data_size, layout, subject, diagnostics);
    out.extend_from_slice(pixels);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(format: i32, data_size: i32, total: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&4i16.to_le_bytes());
        out.extend_from_slice(&8i16.to_le_bytes());
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&format.to_le_bytes());
        out.extend_from_slice(&[0; 11]);
        out.extend_from_slice(&data_size.to_le_bytes());
        assert_eq!(out.len(), TEXTURE_HEADER_LEN);
        out.resize(total, 0);
        for (i, b) in out.iter_mut().enumerate().skip(TEXTURE_HEADER_LEN) {
            *b = i as u8;
        }
        out
    }

    fn read_u32(data: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn parses_engine_header() {
        let header = TextureHeader::parse(&payload(2, 64, 64)).unwrap();
        assert_eq!(header.width, 4);
        assert_eq!(header.height, 8);
        assert_eq!(header.format, Recognized::Known(TextureFormat::Rgba8));
        assert_eq!(header.data_size, 64);
        assert!(TextureHeader::parse(&[0; 30]).is_err());
    }

    #[test]
    fn rgba8_legacy_header() {
        let mut diagnostics = Diagnostics::new();
        let dds = synthesize_dds(&payload(2, 64, 64), DdsLayout::Legacy, "t", &mut diagnostics)
            .unwrap();
        assert_eq!(dds.len(), 128 + 64);
        assert_eq!(&dds[..4], b"DDS ");
        assert_eq!(read_u32(&dds, 4), 124);
        assert_eq!(read_u32(&dds, 8), 0x1007);
        assert_eq!(read_u32(&dds, 12), 8);
        assert_eq!(read_u32(&dds, 16), 4);
        assert_eq!(read_u32(&dds, 20), 64);
        assert_eq!(read_u32(&dds, 28), 1);
        assert_eq!(read_u32(&dds, 76), 32);
        assert_eq!(read_u32(&dds, 80), 0x41);
        assert_eq!(read_u32(&dds, 88), 32);
        assert_eq!(read_u32(&dds, 104), 0xFF00_0000);
        assert_eq!(TextureFormat::Rgba8.dxgi_code(), 28);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn pixels_are_the_payload_tail() {
        let source = payload(17, 16, 80);
        let dds = synthesize_dds(&source, DdsLayout::Legacy, "t", &mut Diagnostics::new()).unwrap();
        assert_eq!(&dds[84..88], b"DXT1");
        assert_eq!(&dds[128..], &source[64..]);
    }

    #[test]
    fn dx10_layout_carries_dxgi_code() {
        let dds = synthesize_dds(&payload(2, 64, 64), DdsLayout::Dx10, "t", &mut Diagnostics::new())
            .unwrap();
        assert_eq!(dds.len(), 128 + 20 + 64);
        assert_eq!(&dds[84..88], b"DX10");
        assert_eq!(read_u32(&dds, 128), 28);
        assert_eq!(read_u32(&dds, 132), 3);
        assert_eq!(read_u32(&dds, 140), 1);
    }

    #[test]
    fn dxt_formats_have_no_extension_in_dx10_layout() {
        let dds = synthesize_dds(&payload(19, 32, 64), DdsLayout::Dx10, "t", &mut Diagnostics::new())
            .unwrap();
        assert_eq!(dds.len(), 128 + 32);
        assert_eq!(&dds[84..88], b"DXT5");
    }

    #[test]
    fn unknown_format_is_reported_and_passed_through() {
        let mut diagnostics = Diagnostics::new();
        let dds = synthesize_dds(&payload(99, 40, 64), DdsLayout::Legacy, "tex", &mut diagnostics)
            .unwrap();
        assert_eq!(&dds[84..88], b"DX10");
        assert_eq!(read_u32(&dds, 128), 99);
        assert_eq!(dds.len(), 128 + 20 + 40);
        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.subject, "tex");
        assert_eq!(
            diagnostic.issue,
            Issue::UnknownFormatCode {
                kind: "texture format",
                code: 99
            }
        );
    }

    #[test]
    fn oversized_data_size_is_an_error() {
        let result = synthesize_dds(&payload(2, 65, 64), DdsLayout::Legacy, "t", &mut Diagnostics::new());
        assert!(matches!(
            result,
            Err(TextureError::InvalidDataSize { declared: 65, .. })
        ));
        let result = synthesize_dds(&payload(2, -1, 64), DdsLayout::Legacy, "t", &mut Diagnostics::new());
        assert!(result.is_err());
    }
}
