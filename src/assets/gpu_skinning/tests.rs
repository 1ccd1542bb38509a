use std::time::Duration;

use avatar_native::mock::MockNative;
use glam::Vec3;

use super::*;
use crate::assets::primitive::MeshConsumers;
use crate::engine::HeadlessBackend;
use crate::settings::LoaderSettings;

fn context(backend: Arc<HeadlessBackend>) -> Arc<LoadContext> {
    let native = Arc::new(MockNative::new());
    Arc::new(LoadContext::new(native, backend, LoaderSettings::default()).expect("context"))
}

fn tick_until(ctx: &LoadContext, mut done: impl FnMut() -> bool) {
    for _ in 0..2000 {
        ctx.slicer.tick();
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("Condition not reached within 2000 ticks");
}

fn mesh(vertex_count: u32) -> MeshInfo {
    let mut mesh = MeshInfo::new(vertex_count, MeshConsumers::GPU_SKINNING);
    mesh.positions = (0..vertex_count).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
    mesh.normals = vec![Vec3::Y; vertex_count as usize];
    mesh.bone_weights = Some(vec![BoneWeight::default(); vertex_count as usize]);
    mesh
}

/// Moves the vertices in `affected` along x, every other vertex stays put.
fn target(name: &str, vertex_count: u32, affected: &[u32]) -> MorphTargetData {
    let position_deltas = (0..vertex_count)
        .map(|i| if affected.contains(&i) { Vec3::X } else { Vec3::ZERO })
        .collect();
    MorphTargetData {
        name: name.to_string(),
        position_deltas,
        normal_deltas: vec![Vec3::ZERO; vertex_count as usize],
        tangent_deltas: vec![],
    }
}

#[test]
fn block_extent_wraps_at_the_slice_width() {
    assert_eq!(block_extent(10, 512), (10, 1));
    assert_eq!(block_extent(1000, 512), (512, 2));
    assert_eq!(block_extent(1024, 512), (512, 2));
    assert_eq!(block_extent(0, 512), (1, 1));
}

#[test]
fn atlas_grows_by_a_slice() {
    let backend = Arc::new(HeadlessBackend::new());
    let atlas = ExpandableTextureArray::new("test atlas", 4, backend.clone());

    let full = atlas.allocate(4, 4).expect("first block");
    assert_eq!((full.slice, full.x, full.y), (0, 0, 0));

    let small = atlas.allocate(2, 2).expect("second block");
    assert_eq!((small.slice, small.x, small.y), (1, 0, 0));
    assert_eq!(atlas.slices(), 2);

    let neighbour = atlas.allocate(2, 2).expect("third block");
    assert_eq!((neighbour.slice, neighbour.x, neighbour.y), (1, 2, 0));
    assert_eq!(atlas.slices(), 2);

    let array = backend.texture_array(atlas.handle().expect("array")).expect("headless array");
    assert_eq!(array.desc.slices, 2);
    assert_eq!(array.resizes, 1);

    for block in [full, small, neighbour] {
        atlas.release(block);
    }
    assert_eq!(atlas.live_blocks(), 0);
    assert!(atlas.handle().is_none());
    assert_eq!(backend.live_texture_arrays(), 0);
}

#[test]
fn oversized_blocks_are_rejected() {
    let backend = Arc::new(HeadlessBackend::new());
    let atlas = ExpandableTextureArray::new("test atlas", 4, backend.clone());

    assert!(atlas.allocate(5, 1).is_err());
    assert!(atlas.allocate(0, 1).is_err());
    assert_eq!(atlas.live_blocks(), 0);
    assert_eq!(backend.live_texture_arrays(), 0);
}

#[test]
fn writes_pad_the_block() {
    let backend = Arc::new(HeadlessBackend::new());
    let atlas = ExpandableTextureArray::new("test atlas", 8, backend.clone());

    let block = atlas.allocate(3, 2).expect("block");
    atlas.write(&block, &[Vec4::ONE; 4]).expect("write");
    assert!(atlas.write(&block, &[Vec4::ONE; 7]).is_err());

    let array = backend.texture_array(atlas.handle().expect("array")).expect("headless array");
    assert_eq!(array.writes.len(), 1);
    assert_eq!(array.writes[0].data.len(), (6 * BYTES_PER_TEXEL) as usize);
    atlas.release(block);
}

#[test]
fn remap_compacts_the_affected_vertices() {
    let targets = [target("smile", 4, &[1]), target("blink", 4, &[3])];

    let remap = remap_affected_vertices(&targets, 4);
    assert_eq!(remap.affected, vec![1, 3]);
    assert_eq!(remap.mesh_to_affected, vec![-1, 0, -1, 1]);

    let texels = encode_morph_deltas(&targets, &remap);
    assert_eq!(texels.len(), 2 * 2 * MORPH_TEXELS_PER_VERTEX as usize);
    // target major: smile moves vertex 1, but not vertex 3
    assert_eq!(texels[0], Vec4::new(1.0, 0.0, 0.0, 0.0));
    assert_eq!(texels[2], Vec4::ZERO);
    assert_eq!(texels[6], Vec4::new(1.0, 0.0, 0.0, 0.0));
}

#[test_log::test]
fn skin_builds_every_block() {
    let backend = Arc::new(HeadlessBackend::new());
    let ctx = context(backend.clone());

    let skin = GpuSkinnedPrimitive::start(&ctx, "body", &mesh(8), vec![target("smile", 8, &[2, 5])]).expect("start");
    assert!(skin.neutral_pose().is_some());
    assert!(skin.joints().is_some());

    tick_until(&ctx, || skin.status() != GpuSkinningStatus::Building);
    assert_eq!(skin.status(), GpuSkinningStatus::Ready);
    assert_eq!(skin.affected_vertex_count(), 2);
    assert!(skin.morph_source().is_some());
    assert_eq!(ctx.atlases.live_blocks(), 3);

    skin.dispose();
    assert_eq!(ctx.atlases.live_blocks(), 0);
    assert_eq!(backend.live_texture_arrays(), 0);
}

#[test_log::test]
fn unaffected_morph_targets_need_no_block() {
    let backend = Arc::new(HeadlessBackend::new());
    let ctx = context(backend);

    let skin = GpuSkinnedPrimitive::start(&ctx, "static", &mesh(4), vec![target("noop", 4, &[])]).expect("start");
    tick_until(&ctx, || skin.status() != GpuSkinningStatus::Building);

    assert_eq!(skin.status(), GpuSkinningStatus::Ready);
    assert_eq!(skin.affected_vertex_count(), 0);
    assert!(skin.morph_source().is_none());
    assert_eq!(ctx.atlases.live_blocks(), 2);
    skin.dispose();
}

#[test_log::test]
fn cancelled_skin_returns_its_blocks() {
    let backend = Arc::new(HeadlessBackend::new());
    let ctx = context(backend);

    let skin = GpuSkinnedPrimitive::start(&ctx, "body", &mesh(16), vec![target("smile", 16, &[0])]).expect("start");
    assert_eq!(skin.status(), GpuSkinningStatus::Building);

    skin.cancel();
    assert_eq!(skin.status(), GpuSkinningStatus::Failed);
    assert_eq!(ctx.atlases.live_blocks(), 0);

    // the cancelled morph slice never delivers
    tick_until(&ctx, || ctx.slicer.pending() == 0);
    assert_eq!(ctx.atlases.live_blocks(), 0);
}
