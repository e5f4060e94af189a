use std::io::{self, Write};

use super::{EulerUnit, fixed6_triple};
use crate::models::skeleton::Skeleton;

/// Write the bind pose of `skeleton` as a single-frame SMD.
///
/// Bones are listed with their local translation and the Euler angles of
/// their local rotation.
pub fn write_smd<W: Write>(out: &mut W, skeleton: &Skeleton, unit: EulerUnit) -> io::Result<()> {
    writeln!(out, "version 1")?;
    writeln!(out, "nodes")?;
    for (i, bone) in skeleton.bones.iter().enumerate() {
        writeln!(out, "{i} \"{}\" {}", bone.name, bone.parent_index())?;
    }
    writeln!(out, "end")?;

    writeln!(out, "skeleton")?;
    writeln!(out, "time 0")?;
    for (i, bone) in skeleton.bones.iter().enumerate() {
        let euler = unit.euler(bone.local_rotation);
        writeln!(
            out,
            "{i}  {}  {}",
            fixed6_triple(bone.local_position),
            fixed6_triple(euler)
        )?;
    }
    writeln!(out, "end")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::math::Vector3;
    use crate::models::skeleton::LocalBone;

    const IDENTITY: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    #[test]
    fn writes_nodes_and_bind_pose() {
        let skeleton = Skeleton::from_local(
            vec![
                LocalBone {
                    name: "root".into(),
                    parent: -1,
                    position: Vector3::new(1.0, 2.0, 3.0),
                    orientation: IDENTITY,
                },
                LocalBone {
                    name: "arm".into(),
                    parent: 0,
                    position: Vector3::new(0.0, -0.5, 0.0),
                    orientation: IDENTITY,
                },
            ],
            "test",
            &mut Diagnostics::new(),
        );

        let mut out = Vec::new();
        write_smd(&mut out, &skeleton, EulerUnit::Radians).unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = "\
version 1
nodes
0 \"root\" -1
1 \"arm\" 0
end
skeleton
time 0
0  1.000000 2.000000 3.000000  0.000000 0.000000 0.000000
1  0.000000 -0.500000 0.000000  0.000000 0.000000 0.000000
end
";
        assert_eq!(text, expected);
    }
}
