/// Legacy mesh records: bone table, per-bone streams and submeshes
pub mod mesh;
/// Bone hierarchy with composed world transforms
pub mod skeleton;
/// Vertex declarations and the attribute decoder
pub mod vertex_decl;
