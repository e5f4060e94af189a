use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

/// Failures that abort processing of a single archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid signature {found:02X?} (expected {expected:?})")]
    InvalidSignature {
        expected: &'static str,
        found: Vec<u8>,
    },
    #[error("archive truncated while reading {table}: {detail}")]
    TruncatedArchive { table: &'static str, detail: String },
    #[error("archive declares no elements (count={0})")]
    EmptyElementTable(i32),
}

impl ArchiveError {
    pub(crate) fn truncated(table: &'static str, detail: impl fmt::Display) -> Self {
        ArchiveError::TruncatedArchive {
            table,
            detail: detail.to_string(),
        }
    }
}

/// Errors surfaced by the per-file extraction drivers.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to open {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },
}

/// A non-fatal anomaly. Processing continues with a best-effort result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Issue {
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("unknown {kind} code {code}")]
    UnknownFormatCode { kind: &'static str, code: u32 },
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),
    #[error("failed to decompress payload: {0}")]
    Decompression(String),
}

/// An [`Issue`] attributed to the record it was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// File index, mesh name, vertex declaration, ...
    pub subject: String,
    pub issue: Issue,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.issue)
    }
}

/// Collects diagnostics for one archive and logs each as it is recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, subject: impl Into<String>, issue: Issue) {
        let diagnostic = Diagnostic {
            subject: subject.into(),
            issue,
        };
        warn!("{diagnostic}");
        self.entries.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
