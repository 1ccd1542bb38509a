use glam::Vec3;

use crate::mock::{MockFailures, MockImage, MockNative, MockPrimitive};
use crate::types::{IndexFormat, TextureFormat, TextureSlot};
use crate::{AvatarNative, CompactSkinningDataId, NativeError, ResourceId, ResultCode, VertexBufferId};

#[test]
fn result_codes_map_to_errors() {
    assert_eq!(ResultCode::Success.into_result(), Ok(()));
    assert_eq!(ResultCode::DataNotAvailable.into_result(), Err(NativeError::DataNotAvailable));
    assert_eq!(
        ResultCode::from(-4),
        ResultCode::NotFound,
        "known raw codes are preserved"
    );
    assert_eq!(ResultCode::from(42), ResultCode::Unknown);
    assert!(matches!(
        ResultCode::BufferTooSmall.into_result(),
        Err(NativeError::Failed { code: ResultCode::BufferTooSmall })
    ));
}

#[test]
fn index_formats_decode_little_endian() {
    assert_eq!(IndexFormat::U8.decode(&[1, 2, 255]), vec![1, 2, 255]);
    assert_eq!(IndexFormat::U16.decode(&[0x01, 0x02, 0xFF, 0xFF]), vec![0x0201, 0xFFFF]);
    assert_eq!(IndexFormat::U32.decode(&[0x01, 0, 0, 0x80, 7]), vec![0x8000_0001]);
    assert_eq!(IndexFormat::for_max_index(255), IndexFormat::U8);
    assert_eq!(IndexFormat::for_max_index(256), IndexFormat::U16);
    assert_eq!(IndexFormat::for_max_index(70_000), IndexFormat::U32);
    assert_eq!(IndexFormat::U16.encode(&[0x0201, 7]), vec![0x01, 0x02, 7, 0]);
}

#[test]
fn unknown_formats_and_slots_are_tolerated() {
    let image = MockImage::rgba("odd", 2, 2).with_raw_format(999);
    let native = MockNative::new();
    native.add_resource(ResourceId(1), vec![], vec![image]);

    let descriptor = native.image_by_index(ResourceId(1), 0).unwrap();
    assert_eq!(descriptor.format(), TextureFormat::Invalid);
    assert_eq!(TextureSlot::from(77), TextureSlot::Unknown(77));
    assert!(TextureFormat::Bc7.is_compressed());
    assert!(!TextureFormat::Rgba32.is_compressed());
}

#[test]
fn mock_serves_and_releases_resources() -> Result<(), anyhow::Error> {
    let primitive = MockPrimitive::strip("body", 12).with_morph_targets(2, 4);
    let id = primitive.id;
    let native = MockNative::new();
    native.add_resource(ResourceId(7), vec![primitive], vec![]);

    assert_eq!(native.primitive_count(ResourceId(7))?, 1);
    let descriptor = native.primitive_by_index(ResourceId(7), 0)?;
    assert_eq!(descriptor.id, id);
    let buffer = descriptor.vertex_buffer.expect("vertex buffer");
    assert_eq!(native.vertex_count(buffer)?, 12);
    assert_eq!(native.morph_target_count(descriptor.morph_target_buffer.expect("morphs"))?, 2);

    let mut positions = vec![Vec3::ZERO; 11];
    assert!(matches!(
        native.copy_positions(buffer, &mut positions),
        Err(NativeError::BufferSizeMismatch { expected: 12, actual: 11 })
    ));

    assert!(native.release_resource(ResourceId(7)));
    assert!(!native.release_resource(ResourceId(7)));
    assert_eq!(native.counters(ResourceId(7)).release_calls, 2);
    assert!(native.vertex_count(VertexBufferId(id.0)).is_err());
    Ok(())
}

#[test]
fn compact_datasets_concatenate_primitives() -> Result<(), anyhow::Error> {
    let shared = CompactSkinningDataId(3);
    let first = MockPrimitive::strip("a", 300).with_compact_skinning(shared);
    let second = MockPrimitive::strip("b", 10)
        .with_compact_skinning(shared)
        .without_tangents();
    let second_id = second.id;
    let native = MockNative::new();
    native.add_resource(ResourceId(2), vec![first, second], vec![]);

    let meta = native.compact_skinning_meta(shared)?;
    assert_eq!(meta.vertex_count, 310);
    assert!(!meta.has_tangents, "one contributor lacks tangents");

    let indices = native.mesh_to_compact_skinning_indices(second_id)?;
    assert_eq!(indices.format, IndexFormat::U16);
    assert_eq!(indices.format.decode(&indices.data), (300..310).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn injected_failures_surface_as_codes() {
    let primitive = MockPrimitive::strip("broken", 6).failing(MockFailures {
        triangles: Some(ResultCode::Failure),
        ..Default::default()
    });
    let id = primitive.id;
    let native = MockNative::new();
    native.add_resource(ResourceId(9), vec![primitive], vec![]);

    let mut triangles = vec![0; native.index_count(id).unwrap() as usize];
    let error = native.copy_triangles(id, &mut triangles).unwrap_err();
    assert_eq!(error.code(), ResultCode::Failure);
}
