mod common;

use std::sync::{Arc, Mutex};

use avatar_native::mock::{MockFailures, MockImage, MockPrimitive, next_asset_id};
use avatar_native::types::{SubMeshDescriptor, SubMeshInclusionFlags, TextureSlot};
use avatar_native::{AssetId, CompactSkinningDataId, ResourceId, ResultCode};
use avatar_pipeline::assets::LoadableAsset;
use avatar_pipeline::assets::compute_skinning::ComputeSkinningStatus;
use avatar_pipeline::assets::gpu_skinning::GpuSkinningStatus;
use avatar_pipeline::assets::primitive::VertexFormat;
use avatar_pipeline::assets::shader::KEYWORD_NORMAL_MAP;
use avatar_pipeline::assets::tracker::{ResourceEvent, TrackedState};
use avatar_pipeline::settings::{LoaderSettings, SkinningCapabilities};
use common::Harness;

fn compact_id() -> CompactSkinningDataId {
    CompactSkinningDataId(next_asset_id().0)
}

#[test_log::test]
fn engine_skinned_resource_loads() {
    let harness = Harness::new(LoaderSettings::default());
    let events = harness.session.subscribe();
    let base = MockImage::rgba("base", 8, 8);
    let normal = MockImage::rgba("normal", 8, 8);
    let primitives = vec![
        MockPrimitive::strip("body", 12)
            .with_texture(TextureSlot::BaseColor, base.id)
            .with_texture(TextureSlot::Normal, normal.id),
        MockPrimitive::strip("head", 6).with_texture(TextureSlot::BaseColor, base.id),
    ];

    let resource = harness.load(1, primitives, vec![base, normal]);
    harness.resolve(&resource);

    assert!(resource.is_loaded());
    assert!(resource.is_released());
    assert!(resource.primitives().iter().all(|p| p.is_loaded()));
    assert!(resource.images().iter().all(|i| i.texture().is_some()));

    let counters = harness.native.counters(ResourceId(1));
    assert_eq!(counters.release_calls, 1);
    assert_eq!(counters.ready_calls, 1);
    assert_eq!(events.try_recv().ok(), Some(ResourceEvent::Completed(ResourceId(1))));

    let body = &resource.primitives()[0];
    let material = harness
        .backend
        .material(body.material().expect("material"))
        .expect("headless material");
    assert!(material.textures.contains_key("_BaseMap"));
    assert!(material.textures.contains_key("_NormalMap"));
    assert!(material.keywords.contains(KEYWORD_NORMAL_MAP));

    let format = body.vertex_format();
    assert!(format.contains(VertexFormat::POSITION | VertexFormat::TANGENT | VertexFormat::BONE_WEIGHTS));

    harness.session.unload_resource(ResourceId(1)).expect("unload");
    assert_eq!(harness.backend.live_objects(), 0);
    harness.finish();
}

#[test_log::test]
fn compute_only_uploads_a_position_placeholder() {
    let harness = Harness::new(LoaderSettings {
        skinning: SkinningCapabilities::COMPUTE,
        ..Default::default()
    });
    let primitive = MockPrimitive::strip("body", 10).with_compact_skinning(compact_id());

    let resource = harness.load(2, vec![primitive], vec![]);
    harness.resolve(&resource);
    assert!(resource.is_loaded());

    let body = &resource.primitives()[0];
    assert_eq!(body.vertex_format(), VertexFormat::POSITION);
    assert!(body.has_tangents(), "tangents come from the compact skinning data");
    assert_eq!(body.compute_skinning_status(), Some(ComputeSkinningStatus::Ready));
    assert_eq!(body.compute_index_pair_count(), 10);

    let upload = harness.backend.mesh(body.mesh().expect("mesh")).expect("upload");
    assert_eq!(upload.streams.len(), 1);
    assert_eq!(upload.streams[0].len(), 10 * 12);
    assert!(upload.streams[0].iter().all(|byte| *byte == 0));

    let indices = harness
        .backend
        .compute_buffer(body.compute_index_buffer().expect("index buffer"))
        .expect("headless index buffer");
    assert_eq!(indices.count, 10);
    assert_eq!(harness.backend.live_compute_buffers(), 2);

    harness.session.unload_resource(ResourceId(2)).expect("unload");
    assert_eq!(harness.backend.live_compute_buffers(), 0);
    harness.finish();
}

#[test_log::test]
fn primitives_share_one_compute_buffer() {
    let harness = Harness::new(LoaderSettings {
        skinning: SkinningCapabilities::ENGINE | SkinningCapabilities::COMPUTE,
        ..Default::default()
    });
    let compact = compact_id();
    let primitives = (0..3)
        .map(|i| MockPrimitive::strip(&format!("part_{}", i), 8).with_compact_skinning(compact))
        .collect();

    let resource = harness.load(3, primitives, vec![]);
    harness.resolve(&resource);
    assert!(resource.is_loaded());

    let vertex_buffers = &harness.session.context().vertex_buffers;
    // one shared vertex buffer plus one index buffer per primitive
    assert_eq!(harness.backend.compute_buffers_created(), 1 + 3);
    assert_eq!(vertex_buffers.buffers_built(), 1);
    assert_eq!(vertex_buffers.retain_count(compact), 3);

    harness.session.unload_resource(ResourceId(3)).expect("unload");
    assert_eq!(harness.backend.live_compute_buffers(), 0);
    assert!(!vertex_buffers.contains(compact));
    harness.finish();
}

#[test_log::test]
fn morph_targets_fill_the_gpu_atlases() {
    let harness = Harness::new(LoaderSettings {
        skinning: SkinningCapabilities::ENGINE | SkinningCapabilities::GPU_TEXTURE,
        ..Default::default()
    });
    let primitive = MockPrimitive::strip("face", 1000).with_morph_targets(3, 100);

    let resource = harness.load(4, vec![primitive], vec![]);
    harness.resolve(&resource);
    assert!(resource.is_loaded());

    let face = &resource.primitives()[0];
    let skin = face.gpu_skin().expect("gpu skin");
    assert_eq!(skin.status(), GpuSkinningStatus::Ready);
    assert_eq!(skin.affected_vertex_count(), 100);
    assert!(skin.morph_source().is_some());
    assert_eq!(harness.session.context().atlases.live_blocks(), 3);

    // the engine mesh keeps the real positions, only compute skinning uploads a placeholder
    let upload = harness.backend.mesh(face.mesh().expect("mesh")).expect("upload");
    let stride: usize = upload
        .layout
        .iter()
        .filter(|attribute| attribute.stream == 0)
        .map(|attribute| attribute.byte_size())
        .sum();
    let float = |offset: usize| f32::from_le_bytes(upload.streams[0][offset..offset + 4].try_into().expect("f32"));
    assert_eq!([float(stride), float(stride + 4), float(stride + 8)], [0.01, 0.01, 0.0]);
    assert!(upload.streams[0].iter().any(|byte| *byte != 0));

    harness.session.unload_resource(ResourceId(4)).expect("unload");
    assert_eq!(harness.session.context().atlases.live_blocks(), 0);
    assert_eq!(harness.backend.live_texture_arrays(), 0);
    harness.finish();
}

#[test_log::test]
fn excluded_submeshes_are_degenerated() {
    let harness = Harness::new(LoaderSettings {
        submesh_inclusion: SubMeshInclusionFlags::BODY,
        ..Default::default()
    });
    let submesh = |index_start, inclusion| SubMeshDescriptor {
        index_start,
        index_count: 6,
        vertex_start: 0,
        vertex_count: 6,
        inclusion,
    };
    let primitive = MockPrimitive::strip("body_and_hair", 6).with_submeshes(vec![
        submesh(0, SubMeshInclusionFlags::BODY),
        submesh(6, SubMeshInclusionFlags::HAIR),
    ]);

    let resource = harness.load(5, vec![primitive], vec![]);
    harness.resolve(&resource);

    let upload = harness
        .backend
        .mesh(resource.primitives()[0].mesh().expect("mesh"))
        .expect("upload");
    assert_eq!(upload.indices.len(), 12);
    assert_eq!(&upload.indices[..6], &[0, 1, 2, 2, 1, 3]);
    assert!(upload.indices[6..].iter().all(|index| *index == 0));
    assert_eq!(upload.submeshes.len(), 2);

    harness.finish();
}

#[test_log::test]
fn unusable_images_are_skipped() {
    let harness = Harness::new(LoaderSettings::default());
    let unknown_format = MockImage::rgba("unknown_format", 4, 4).with_raw_format(99);
    let broken = MockImage::rgba("broken", 4, 4).failing_copy(ResultCode::Failure);
    let primitive = MockPrimitive::strip("body", 6)
        .with_texture(TextureSlot::BaseColor, unknown_format.id)
        .with_texture(TextureSlot::Emissive, broken.id);

    let resource = harness.load(6, vec![primitive], vec![unknown_format, broken]);
    harness.resolve(&resource);
    assert!(resource.is_loaded());

    let images = resource.images();
    assert!(images[0].is_loaded() && images[0].texture().is_none());
    assert!(images[1].is_cancelled());
    assert_eq!(harness.backend.live_textures(), 0);

    let body = &resource.primitives()[0];
    assert!(body.is_loaded());
    let material = harness
        .backend
        .material(body.material().expect("material"))
        .expect("headless material");
    assert!(material.textures.is_empty());

    harness.finish();
}

#[test_log::test]
fn failed_triangles_cancel_only_their_primitive() {
    let harness = Harness::new(LoaderSettings::default());
    let failures = MockFailures {
        triangles: Some(ResultCode::Failure),
        ..Default::default()
    };
    let primitives = vec![
        MockPrimitive::strip("fine", 8),
        MockPrimitive::strip("broken", 8).failing(failures),
    ];

    let resource = harness.load(7, primitives, vec![]);
    harness.resolve(&resource);
    assert!(resource.is_loaded());

    let primitives = resource.primitives();
    assert!(primitives[0].is_loaded());
    assert!(primitives[1].is_cancelled());
    assert!(!primitives[1].is_loaded());
    assert!(primitives[1].mesh().is_none());
    assert!(primitives[1].material().is_none());
    assert_eq!(harness.backend.live_meshes(), 1);
    assert_eq!(harness.backend.live_materials(), 1);
    assert_eq!(harness.native.counters(ResourceId(7)).release_calls, 1);

    harness.finish();
}

#[test_log::test]
fn failed_enumeration_cancels_the_resource() {
    let harness = Harness::new(LoaderSettings::default());
    let events = harness.session.subscribe();
    let id = ResourceId(8);
    harness
        .native
        .add_resource(id, vec![MockPrimitive::strip("unreachable", 4)], vec![]);
    harness.native.fail_primitive_enumeration(id, ResultCode::Failure);

    let resource = harness.session.load_resource(id).expect("load");
    harness.resolve(&resource);

    assert!(resource.is_cancelled());
    assert!(!resource.is_loaded());
    assert!(resource.primitives().is_empty());
    assert_eq!(harness.native.counters(id).release_calls, 1);
    assert_eq!(harness.native.counters(id).ready_calls, 0);
    assert_eq!(
        harness.session.context().tracker.state(id),
        Some(TrackedState::Cancelled)
    );
    assert_eq!(events.try_recv().ok(), Some(ResourceEvent::Cancelled(id)));

    harness.finish();
}

#[test_log::test]
fn mesh_loaded_callback_sees_the_cpu_buffers() {
    let harness = Harness::new(LoaderSettings::default());
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    harness.session.set_mesh_loaded_callback(move |snapshot| {
        sink.lock()
            .expect("sink")
            .push((snapshot.name.clone(), snapshot.positions.len(), snapshot.triangles.len()));
    });

    let resource = harness.load(9, vec![MockPrimitive::strip("arm", 5)], vec![]);
    harness.resolve(&resource);

    assert_eq!(*seen.lock().expect("seen"), vec![("arm".to_string(), 5, 9)]);
    harness.finish();
}

#[test_log::test]
fn loading_twice_is_rejected() {
    let harness = Harness::new(LoaderSettings::default());
    let resource = harness.load(10, vec![MockPrimitive::strip("body", 4)], vec![]);

    assert!(harness.session.load_resource(ResourceId(10)).is_err());
    harness.resolve(&resource);

    harness.session.unload_resource(ResourceId(10)).expect("unload");
    assert!(harness.session.unload_resource(ResourceId(10)).is_err());
    harness.finish();
}

#[test_log::test]
fn corrupt_submesh_ranges_fail_only_their_primitive() {
    let harness = Harness::new(LoaderSettings {
        submesh_inclusion: SubMeshInclusionFlags::BODY,
        ..Default::default()
    });
    let corrupt = MockPrimitive::strip("corrupt", 6).with_submeshes(vec![SubMeshDescriptor {
        index_start: u32::MAX - 1,
        index_count: 6,
        vertex_start: 0,
        vertex_count: 6,
        inclusion: SubMeshInclusionFlags::HAIR,
    }]);

    let resource = harness.load(11, vec![MockPrimitive::strip("healthy", 6), corrupt], vec![]);
    harness.resolve(&resource);
    assert!(resource.is_loaded());

    let primitives = resource.primitives();
    assert!(primitives[0].is_loaded());
    assert!(primitives[1].is_cancelled());
    assert!(primitives[1].mesh().is_none());
    assert_eq!(harness.backend.live_meshes(), 1);
    harness.finish();
}

#[test_log::test]
fn primitives_start_one_after_another() {
    let harness = Harness::new(LoaderSettings::default());
    let primitives = (0..4)
        .map(|i| MockPrimitive::strip(&format!("part_{}", i), 8))
        .collect::<Vec<_>>();
    let order = primitives.iter().map(|primitive| primitive.id).collect::<Vec<_>>();

    let resource = harness.load(12, primitives, vec![]);
    harness.resolve(&resource);
    assert!(resource.is_loaded());

    let calls = harness.native.calls();
    let position = |query: &str, primitive: AssetId| {
        calls
            .iter()
            .position(|call| call.query == query && call.primitive == primitive)
            .unwrap_or_else(|| panic!("{} was never queried for {}", query, primitive))
    };

    let starts = order.iter().map(|id| position("vertex_count", *id)).collect::<Vec<_>>();
    assert!(starts.windows(2).all(|pair| pair[0] < pair[1]), "started out of order: {:?}", calls);
    for pair in order.windows(2) {
        assert!(
            position("primitive_material", pair[0]) < position("vertex_count", pair[1]),
            "{} started before {} finished starting",
            pair[1],
            pair[0]
        );
    }
    harness.finish();
}
