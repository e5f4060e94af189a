//! Bone hierarchy and local-to-world composition.

use crate::error::{Diagnostics, Issue};
use crate::math::{Matrix3, Quaternion, Vector3, matrix_to_quaternion};

/// A bone as stored in the mesh record, before world composition.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBone {
    pub name: String,
    /// Raw parent index; negative for roots.
    pub parent: i16,
    pub position: Vector3,
    pub orientation: Matrix3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// Index of an earlier bone, `None` for roots.
    pub parent: Option<usize>,
    pub local_position: Vector3,
    pub local_rotation: Quaternion,
    pub world_position: Vector3,
    pub world_rotation: Quaternion,
}

impl Bone {
    /// Parent index as written to text outputs (`-1` for roots).
    pub fn parent_index(&self) -> i64 {
        self.parent.map_or(-1, |p| p as i64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Skeleton {
    /// Compose world transforms in bone-index order.
    ///
    /// Parents must precede their children. A parent index that points at the
    /// bone itself or a later bone is reported and the bone becomes a root.
    pub fn from_local(locals: Vec<LocalBone>, subject: &str, diagnostics: &mut Diagnostics) -> Self {
        let mut bones: Vec<Bone> = Vec::with_capacity(locals.len());

        for (index, local) in locals.into_iter().enumerate() {
            let local_rotation = matrix_to_quaternion(&local.orientation);
            let parent = match usize::try_from(local.parent) {
                Err(_) => None,
                Ok(p) if p < index => Some(p),
                Ok(p) => {
                    diagnostics.record(
                        format!("{subject} bone #{index}"),
                        Issue::StructuralMismatch(format!(
                            "parent {p} does not precede its child; treating as root"
                        )),
                    );
                    None
                }
            };

            let (world_rotation, world_position) = match parent.map(|p| &bones[p]) {
                None => (local_rotation, local.position),
                Some(parent) => (
                    parent.world_rotation * local_rotation,
                    parent.world_rotation.rotate(local.position) + parent.world_position,
                ),
            };

            bones.push(Bone {
                name: local.name,
                parent,
                local_position: local.position,
                local_rotation,
                world_position,
                world_rotation,
            });
        }

        Self { bones }
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    const IDENTITY: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    /// Rotation about Z by `angle`, in the `m[row][col]` convention the
    /// quaternion conversion expects.
    fn rot_z(angle: f32) -> Matrix3 {
        let (s, c) = angle.sin_cos();
        [[c, s, 0.0], [-s, c, 0.0], [0.0, 0.0, 1.0]]
    }

    fn local(parent: i16, position: Vector3, orientation: Matrix3) -> LocalBone {
        LocalBone {
            name: String::new(),
            parent,
            position,
            orientation,
        }
    }

    fn assert_quat(a: Quaternion, b: Quaternion) {
        // q and -q are the same rotation
        let sign = if a.w * b.w + a.v.dot(b.v) < 0.0 { -1.0 } else { 1.0 };
        assert!((a.w - sign * b.w).abs() < EPS, "{a:?} vs {b:?}");
        assert!((a.v.x - sign * b.v.x).abs() < EPS, "{a:?} vs {b:?}");
        assert!((a.v.y - sign * b.v.y).abs() < EPS, "{a:?} vs {b:?}");
        assert!((a.v.z - sign * b.v.z).abs() < EPS, "{a:?} vs {b:?}");
    }

    fn assert_vec(a: Vector3, b: Vector3) {
        assert!((a - b).length() < EPS, "{a:?} vs {b:?}");
    }

    #[test]
    fn three_bone_chain_composes_parent_to_child() {
        let angles = [0.3f32, -0.7, 1.1];
        let positions = [
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(0.5, 0.0, 0.0),
            Vector3::new(0.0, 1.5, -0.25),
        ];
        let locals = vec![
            local(-1, positions[0], rot_z(angles[0])),
            local(0, positions[1], rot_z(angles[1])),
            local(1, positions[2], rot_z(angles[2])),
        ];
        let skeleton = Skeleton::from_local(locals, "chain", &mut Diagnostics::new());
        let [root, a, b] = skeleton.bones.as_slice() else {
            panic!("expected three bones");
        };

        assert_quat(
            b.world_rotation,
            root.local_rotation * a.local_rotation * b.local_rotation,
        );

        let expected_a = root.local_rotation.rotate(positions[1]) + positions[0];
        assert_vec(a.world_position, expected_a);
        let expected_b = (root.local_rotation * a.local_rotation).rotate(positions[2]) + expected_a;
        assert_vec(b.world_position, expected_b);

        // Rotations about one axis add up.
        let total = rot_z(angles.iter().sum());
        assert_quat(b.world_rotation, matrix_to_quaternion(&total));
    }

    #[test]
    fn roots_copy_local_transform() {
        let skeleton = Skeleton::from_local(
            vec![local(-1, Vector3::new(4.0, 5.0, 6.0), IDENTITY)],
            "root",
            &mut Diagnostics::new(),
        );
        let bone = &skeleton.bones[0];
        assert_eq!(bone.parent_index(), -1);
        assert_eq!(bone.world_position, Vector3::new(4.0, 5.0, 6.0));
        assert_quat(bone.world_rotation, Quaternion::IDENTITY);
    }

    #[test]
    fn forward_and_self_parents_become_roots() {
        let mut diagnostics = Diagnostics::new();
        let skeleton = Skeleton::from_local(
            vec![
                local(1, Vector3::new(1.0, 0.0, 0.0), IDENTITY),
                local(1, Vector3::new(0.0, 1.0, 0.0), IDENTITY),
                local(0, Vector3::new(0.0, 0.0, 1.0), IDENTITY),
            ],
            "mesh",
            &mut diagnostics,
        );
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(skeleton.bones[0].parent, None);
        assert_eq!(skeleton.bones[1].parent, None);
        assert_eq!(skeleton.bones[2].parent, Some(0));
        assert_vec(skeleton.bones[2].world_position, Vector3::new(1.0, 0.0, 1.0));
    }
}
