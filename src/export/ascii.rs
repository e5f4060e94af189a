use std::io::{self, Write};

use itertools::Itertools;

use super::{fixed6_triple, general6, general6_join};
use crate::models::mesh::{BoneGroup, MeshModel, Submesh};

/// Write `model` in the XNALara ASCII layout: the skeleton in world space
/// followed by one block per submesh.
pub fn write_ascii<W: Write>(out: &mut W, model: &MeshModel) -> io::Result<()> {
    let bones = &model.skeleton.bones;
    writeln!(out, "{}", bones.len())?;
    for bone in bones {
        writeln!(out, "{}", bone.name)?;
        writeln!(out, "{}", bone.parent_index())?;
        writeln!(out, "{}", fixed6_triple(bone.world_position))?;
    }

    writeln!(out, "{}", model.submesh_count())?;
    for group in &model.groups {
        let bone_name = bones.get(group.bone).map_or("", |b| b.name.as_str());
        for (k, submesh) in group.submeshes.iter().enumerate() {
            writeln!(out, "sm_{}_{}_{}", group.bone, bone_name, k)?;
            write_submesh(out, group, submesh)?;
        }
    }
    Ok(())
}

fn write_submesh<W: Write>(out: &mut W, group: &BoneGroup, submesh: &Submesh) -> io::Result<()> {
    writeln!(out, "{}", group.uv_channels)?;
    writeln!(out, "0")?;

    let vertices = group.vertices.get(submesh.vertices.clone()).unwrap_or_default();
    writeln!(out, "{}", vertices.len())?;
    for (j, vertex) in vertices.iter().enumerate() {
        writeln!(out, "{}", general6_join(&vertex.position.to_array()))?;
        writeln!(out, "{}", general6_join(&vertex.normal.to_array()))?;
        writeln!(out, "0 0 0 0")?;
        for channel in 0..group.uv_channels {
            let [u, v] = vertex.uvs.get(channel).copied().unwrap_or_default();
            writeln!(out, "{} {}", general6(u), general6(v))?;
        }
        if group.has_blend {
            let links = submesh
                .bone_links
                .get(j)
                .copied()
                .unwrap_or(vertex.blend_indices.map(i32::from));
            writeln!(out, "{}", links.iter().join(" "))?;
            writeln!(out, "{}", general6_join(&vertex.blend_weights))?;
        } else {
            writeln!(out, "0 0 0 0")?;
            writeln!(out, "1 0 0 0")?;
        }
    }

    writeln!(out, "{}", submesh.triangles.len())?;
    for [a, b, c] in &submesh.triangles {
        writeln!(out, "{a} {b} {c}")?;
    }
    Ok(())
}
