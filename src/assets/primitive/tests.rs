use avatar_native::mock::MockPrimitive;
use avatar_native::{CompactSkinningDataId, VertexBufferId};

use super::*;

fn descriptor(compact: bool) -> PrimitiveDescriptor {
    let mock = MockPrimitive::strip("plan", 8);
    PrimitiveDescriptor {
        id: mock.id,
        name: mock.name,
        vertex_buffer: Some(VertexBufferId(mock.id.0)),
        morph_target_buffer: None,
        compact_skinning: compact.then_some(CompactSkinningDataId(7)),
        joints: mock.joints,
        lod_flags: mock.lod_flags,
        manifestation_flags: mock.manifestation_flags,
        view_flags: mock.view_flags,
    }
}

const COUNTS: PrimitiveCounts = PrimitiveCounts {
    vertex_count: 8,
    morph_target_count: 2,
    index_count: 18,
};

#[test]
fn compute_only_skips_vertex_retrieval() {
    let plan = LoadPlan::new(SkinningCapabilities::COMPUTE, COUNTS, &descriptor(true));
    assert!(plan.compute_only());
    assert!(!plan.needs_vertex_data());
    assert!(!plan.needs_morph_data());
    assert_eq!(plan.consumers(), MeshConsumers::ENGINE_MESH | MeshConsumers::COMPUTE_SKINNING);
}

#[test]
fn compute_needs_a_compact_dataset() {
    let plan = LoadPlan::new(SkinningCapabilities::all(), COUNTS, &descriptor(false));
    assert!(!plan.compute_skinned);
    assert!(plan.gpu_skinned && plan.engine_skinned);
    assert!(plan.needs_morph_data());
}

#[test]
fn morph_data_only_feeds_the_gpu_skinner() {
    let plan = LoadPlan::new(
        SkinningCapabilities::ENGINE | SkinningCapabilities::COMPUTE,
        COUNTS,
        &descriptor(true),
    );
    assert!(!plan.compute_only(), "the engine skinner still reads every vertex");
    assert!(plan.needs_vertex_data());
    assert!(!plan.needs_morph_data());
}

#[test]
fn no_vertices_no_mesh() {
    let counts = PrimitiveCounts {
        vertex_count: 0,
        ..COUNTS
    };
    let plan = LoadPlan::new(SkinningCapabilities::all(), counts, &descriptor(true));
    assert!(!plan.needs_mesh);
    assert!(!plan.gpu_skinned && !plan.compute_skinned && !plan.engine_skinned);
    assert!(plan.consumers().is_empty());
}

#[test]
fn snapshot_copies_the_cpu_buffers() {
    let mut mesh = MeshInfo::new(3, MeshConsumers::ENGINE_MESH);
    mesh.triangles = vec![0, 1, 2];
    mesh.positions = vec![Vec3::X, Vec3::Y, Vec3::Z];
    mesh.bind_poses = vec![BindPose::IDENTITY];

    let snapshot = MeshSnapshot::of("snap", &mesh);
    mesh.finish(MeshConsumers::ENGINE_MESH);

    assert!(mesh.positions.is_empty());
    assert_eq!(snapshot.name, "snap");
    assert_eq!(snapshot.positions, vec![Vec3::X, Vec3::Y, Vec3::Z]);
    assert_eq!(snapshot.bind_poses.len(), 1);
}
