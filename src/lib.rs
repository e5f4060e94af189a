/// Utilities for interacting with the archive containers
pub mod data;
/// Error definitions
pub mod error;
/// Writers for the text formats produced from decoded meshes
pub mod export;
/// Per-file extraction drivers for both container variants
pub mod extract;
/// Vector and quaternion math used by the skeleton decoder
pub mod math;
/// Skinned mesh and skeleton decoding
pub mod models;
/// Generic wrapper for codes that may or may not match a known variant.
pub mod recognized;
/// Filetype classification for RP6L records
pub mod resource;
/// DDS header synthesis for embedded texture payloads
pub mod texture;

pub use extract::{ExtractOptions, ExtractSummary, extract_path};
