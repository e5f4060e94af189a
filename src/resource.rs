//! Filetype classification for archive records.
//!
//! RP6L records carry a one-byte filetype selecting an output category. Legacy
//! name entries carry a 16-bit asset type instead; only meshes and textures
//! are understood there.

use std::fmt;

use crate::recognized::{KnownCode, Recognized};

/// Category name used for filetypes outside the lookup table.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// RP6L filetype byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    Mesh,
    Skin,
    Texture,
    Material,
    Animation,
    AnimationId,
    AnimationScript,
    Fx,
    Lightmap,
    Flash,
    Sound,
    SoundMusic,
    SoundSpeech,
    SoundStream,
    SoundLocal,
    DensityMap,
    HeightMap,
    Mimic,
    Pathmap,
    Phonemes,
    StaticGeometry,
    Text,
    Binary,
    TinyObjects,
    ResourceList,
}

/// (code, variant, category directory name)
const FILE_TYPES: &[(u8, FileType, &str)] = &[
    (0x10, FileType::Mesh, "mesh"),
    (0x12, FileType::Skin, "skin"),
    (0x20, FileType::Texture, "texture"),
    (0x30, FileType::Material, "material"),
    (0x40, FileType::Animation, "animation"),
    (0x41, FileType::AnimationId, "animation_id"),
    (0x42, FileType::AnimationScript, "animation_scr"),
    (0x50, FileType::Fx, "fx"),
    (0x60, FileType::Lightmap, "lightmap"),
    (0x61, FileType::Flash, "flash"),
    (0x65, FileType::Sound, "sound"),
    (0x66, FileType::SoundMusic, "sound_music"),
    (0x67, FileType::SoundSpeech, "sound_speech"),
    (0x68, FileType::SoundStream, "sound_stream"),
    (0x69, FileType::SoundLocal, "sound_local"),
    (0x70, FileType::DensityMap, "density_map"),
    (0x80, FileType::HeightMap, "height_map"),
    (0x90, FileType::Mimic, "mimic"),
    (0xA0, FileType::Pathmap, "pathmap"),
    (0xB0, FileType::Phonemes, "phonemes"),
    (0xC0, FileType::StaticGeometry, "static_geometry"),
    (0xD0, FileType::Text, "text"),
    (0xE0, FileType::Binary, "binary"),
    (0xF8, FileType::TinyObjects, "tiny_objects"),
    (0xFF, FileType::ResourceList, "resource_list"),
];

/// Filetypes extracted when no explicit selection is made.
pub const DEFAULT_TYPES: [FileType; 3] = [FileType::Mesh, FileType::Texture, FileType::Animation];

impl FileType {
    // Rows are in declaration order.
    fn entry(self) -> &'static (u8, FileType, &'static str) {
        &FILE_TYPES[self as usize]
    }

    /// Output directory name for this category.
    pub fn category(self) -> &'static str {
        self.entry().2
    }

    /// Extension appended to extracted files of this type, if any.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            FileType::Mesh => Some("msh"),
            FileType::Texture => Some("dds"),
            FileType::Animation => Some("anm"),
            _ => None,
        }
    }

    pub fn all() -> impl Iterator<Item = FileType> {
        FILE_TYPES.iter().map(|(_, ty, _)| *ty)
    }
}

impl KnownCode for FileType {
    type Raw = u8;

    fn from_code(raw: u8) -> Option<Self> {
        FILE_TYPES
            .iter()
            .find(|(code, _, _)| *code == raw)
            .map(|(_, ty, _)| *ty)
    }

    fn code(self) -> u8 {
        self.entry().0
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

/// Category directory for a raw filetype byte.
pub fn category_name(filetype: u8) -> &'static str {
    match FileType::from_code(filetype) {
        Some(ty) => ty.category(),
        None => UNKNOWN_CATEGORY,
    }
}

/// Category directory for a classified filetype.
pub fn category_of(filetype: &Recognized<FileType, u8>) -> &'static str {
    match filetype {
        Recognized::Known(ty) => ty.category(),
        Recognized::Unknown(_) => UNKNOWN_CATEGORY,
    }
}

/// Which RP6L filetypes an extraction run writes out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    All,
    Only(Vec<u8>),
}

impl Default for TypeFilter {
    fn default() -> Self {
        TypeFilter::Only(DEFAULT_TYPES.iter().map(|ty| ty.code()).collect())
    }
}

impl TypeFilter {
    pub fn accepts(&self, filetype: u8) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(codes) => codes.contains(&filetype),
        }
    }
}

/// Asset type of a legacy name entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AssetKind {
    Mesh,
    Texture,
}

impl KnownCode for AssetKind {
    type Raw = i16;

    fn from_code(raw: i16) -> Option<Self> {
        match raw {
            272 => Some(AssetKind::Mesh),
            8480 => Some(AssetKind::Texture),
            _ => None,
        }
    }

    fn code(self) -> i16 {
        match self {
            AssetKind::Mesh => 272,
            AssetKind::Texture => 8480,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_lookup_table() {
        assert_eq!(category_name(0x10), "mesh");
        assert_eq!(category_name(0x42), "animation_scr");
        assert_eq!(category_name(0xF8), "tiny_objects");
        assert_eq!(category_name(0x11), "unknown");
        assert_eq!(category_of(&Recognized::from_code(0x69)), "sound_local");
        assert_eq!(category_of(&Recognized::<FileType, u8>::Unknown(3)), "unknown");
    }

    #[test]
    fn codes_round_trip_for_every_variant() {
        assert_eq!(FileType::all().count(), 25);
        for (i, ty) in FileType::all().enumerate() {
            assert_eq!(ty as usize, i);
            assert_eq!(FileType::from_code(ty.code()), Some(ty));
        }
    }

    #[test]
    fn default_filter_is_mesh_texture_animation() {
        let filter = TypeFilter::default();
        assert!(filter.accepts(0x10));
        assert!(filter.accepts(0x20));
        assert!(filter.accepts(0x40));
        assert!(!filter.accepts(0x41));
        assert!(!filter.accepts(0x30));
        assert!(TypeFilter::All.accepts(0x30));
    }

    #[test]
    fn only_mesh_texture_animation_get_extensions() {
        assert_eq!(FileType::Mesh.extension(), Some("msh"));
        assert_eq!(FileType::Texture.extension(), Some("dds"));
        assert_eq!(FileType::Animation.extension(), Some("anm"));
        assert_eq!(FileType::AnimationId.extension(), None);
        assert_eq!(FileType::Skin.extension(), None);
    }

    #[test]
    fn legacy_asset_kinds() {
        assert_eq!(
            Recognized::<AssetKind, i16>::from_code(272),
            Recognized::Known(AssetKind::Mesh)
        );
        assert_eq!(
            Recognized::<AssetKind, i16>::from_code(16),
            Recognized::Unknown(16)
        );
    }
}
