//! Plain-text writers for decoded legacy meshes.
//!
//! Both formats are whitespace delimited and always use `.` as the decimal
//! separator.

/// XNALara-style skinned geometry
pub mod ascii;
/// Skeleton-only SMD
pub mod smd;

use itertools::Itertools;

use crate::math::{Quaternion, Vector3, quaternion_to_euler};

/// Unit of the Euler angles in skeleton output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EulerUnit {
    #[default]
    Radians,
    Degrees,
}

impl EulerUnit {
    pub fn euler(self, rotation: Quaternion) -> Vector3 {
        let e = quaternion_to_euler(rotation);
        match self {
            EulerUnit::Radians => e,
            EulerUnit::Degrees => Vector3::new(e.x.to_degrees(), e.y.to_degrees(), e.z.to_degrees()),
        }
    }
}

/// Six fixed decimals: `1.500000`.
pub fn fixed6(v: f32) -> String {
    // folds -0.0 into 0.0
    let v = if v == 0.0 { 0.0 } else { v };
    format!("{v:.6}")
}

/// Up to six decimals with trailing zeros dropped: `1.5`, `2`, `-0.000123`.
pub fn general6(v: f32) -> String {
    let mut s = format!("{v:.6}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s.remove(0);
    }
    s
}

pub(crate) fn fixed6_triple(v: Vector3) -> String {
    v.to_array().into_iter().map(fixed6).join(" ")
}

pub(crate) fn general6_join(values: &[f32]) -> String {
    values.iter().copied().map(general6).join(" ")
}
