//! Memory-mapped archive source.
//!
//! The whole input archive is mapped once; "seeking the original file" for
//! uncompressed passthrough parts is a bounds-checked slice of the mapping.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

/// An input archive mapped into memory.
#[derive(Debug)]
pub struct MmapArchive {
    path: PathBuf,
    mmap: Mmap,
}

impl MmapArchive {
    /// Map the archive at `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the archive is not expected to
        // change underneath us while it is being extracted.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self {
            path: path.to_owned(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<[u8]> for MmapArchive {
    fn as_ref(&self) -> &[u8] {
        &self.mmap[..]
    }
}
