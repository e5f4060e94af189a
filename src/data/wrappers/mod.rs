/// Memory-mapped archive files
pub mod mmap;
