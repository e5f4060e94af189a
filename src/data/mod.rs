/// Lazy, write-once cache of decompressed sections/elements
pub mod chunks;
/// Parser for the legacy element/chunk/name container
pub mod legacy;
pub mod parser_utils;
/// Parser for `RP6L` resource packs
pub mod rp6l;
/// Memory-mapped input archives
pub mod wrappers;

use std::path::Path;

/// Which table layout an input file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContainerKind {
    Rp6l,
    Legacy,
}

impl ContainerKind {
    /// Dispatch on the `RP6L` signature first, then on the `.rpack` extension.
    /// Everything else is treated as the legacy layout.
    pub fn detect(path: &Path, data: &[u8]) -> ContainerKind {
        if data.starts_with(rp6l::SIGNATURE) {
            return ContainerKind::Rp6l;
        }
        let is_rpack = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("rpack"));
        if is_rpack {
            ContainerKind::Rp6l
        } else {
            ContainerKind::Legacy
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signature_wins_over_extension() {
        let data = b"RP6L\x04\x00\x00\x00";
        assert_eq!(
            ContainerKind::detect(Path::new("a.pak"), data),
            ContainerKind::Rp6l
        );
    }

    #[test]
    fn rpack_extension_selects_rp6l() {
        assert_eq!(
            ContainerKind::detect(Path::new("dir/common.RPACK"), b"XXXX"),
            ContainerKind::Rp6l
        );
        assert_eq!(
            ContainerKind::detect(Path::new("dir/common.pak"), b"XXXX"),
            ContainerKind::Legacy
        );
    }
}
