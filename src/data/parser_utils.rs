//! Shared winnow-based parsing utilities used by the container and mesh parsers.

use winnow::Parser;
use winnow::binary::{le_f32, le_i16, le_i32, le_u8, le_u16, le_u32};
use winnow::combinator::repeat;
use winnow::error::{ContextError, ErrMode};
use winnow::token::take;

use crate::error::ArchiveError;

/// Common result type for winnow parsers.
pub type WResult<T> = Result<T, ErrMode<ContextError>>;

fn out_of_bounds<T>() -> WResult<T> {
    Err(ErrMode::Cut(ContextError::new()))
}

/// Resolve a 1-based relative pointer (`0` means null): `base + value - 1`.
pub fn resolve_relptr(base: usize, value: i32) -> Option<usize> {
    if value <= 0 {
        return None;
    }
    base.checked_add(value as usize - 1)
}

/// Parse `count` fixed-size records, failing early if the table cannot fit.
pub(crate) fn parse_table<T>(
    input: &mut &[u8],
    table: &'static str,
    count: u32,
    record_size: usize,
    parser: fn(&mut &[u8]) -> WResult<T>,
) -> Result<Vec<T>, ArchiveError> {
    let count = count as usize;
    let needed = count.saturating_mul(record_size);
    if needed > input.len() {
        return Err(ArchiveError::truncated(
            table,
            format!(
                "{count} records need {needed} bytes, {} remain",
                input.len()
            ),
        ));
    }
    repeat(count, parser)
        .parse_next(input)
        .map_err(|e| ArchiveError::truncated(table, e))
}

/// A NUL-terminated string read out of a text blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobString {
    pub text: String,
    /// `false` when the blob ended before a NUL was found.
    pub terminated: bool,
}

/// Read a NUL-terminated string from `blob` starting at `offset`.
///
/// Returns `None` when `offset` lies outside the blob. A missing terminator cuts
/// the string at the end of the blob.
pub fn read_null_terminated_string(blob: &[u8], offset: usize) -> Option<BlobString> {
    let remaining = blob.get(offset..)?;
    let (bytes, terminated) = match remaining.iter().position(|&b| b == 0) {
        Some(end) => (&remaining[..end], true),
        None => (remaining, false),
    };
    Some(BlobString {
        text: String::from_utf8_lossy(bytes).into_owned(),
        terminated,
    })
}

/// A positioned reader over a decompressed buffer.
///
/// The mesh tables are full of absolute and relative offsets, so decoding is a
/// sequence of seeks followed by fixed-width reads. Every read is bounds checked
/// by the underlying winnow parser.
#[derive(Debug, Clone)]
pub struct SliceCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn skip(&mut self, count: usize) {
        self.pos = self.pos.saturating_add(count);
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read<O, P>(&mut self, mut parser: P) -> WResult<O>
    where
        P: Parser<&'a [u8], O, ErrMode<ContextError>>,
    {
        let Some(mut input) = self.data.get(self.pos..) else {
            return out_of_bounds();
        };
        let value = parser.parse_next(&mut input)?;
        self.pos = self.data.len() - input.len();
        Ok(value)
    }

    pub fn u8(&mut self) -> WResult<u8> {
        self.read(le_u8)
    }

    pub fn i8(&mut self) -> WResult<i8> {
        self.read(le_u8).map(|b| b as i8)
    }

    pub fn u16(&mut self) -> WResult<u16> {
        self.read(le_u16)
    }

    pub fn i16(&mut self) -> WResult<i16> {
        self.read(le_i16)
    }

    pub fn u32(&mut self) -> WResult<u32> {
        self.read(le_u32)
    }

    pub fn i32(&mut self) -> WResult<i32> {
        self.read(le_i32)
    }

    pub fn f32(&mut self) -> WResult<f32> {
        self.read(le_f32)
    }

    /// IEEE 754 half-precision float widened to `f32`.
    pub fn f16(&mut self) -> WResult<f32> {
        self.read(le_u16)
            .map(|bits| half::f16::from_bits(bits).to_f32())
    }

    pub fn bytes(&mut self, count: usize) -> WResult<&'a [u8]> {
        self.read(take(count))
    }

    /// Read a NUL-terminated string. Running off the end of the buffer is an error.
    pub fn c_string(&mut self) -> WResult<String> {
        let start = self.pos;
        let Some(s) = read_null_terminated_string(self.data, start) else {
            return out_of_bounds();
        };
        if !s.terminated {
            return out_of_bounds();
        }
        // The terminator is consumed as well.
        self.pos = start + s.text.len() + 1;
        Ok(s.text)
    }
}
