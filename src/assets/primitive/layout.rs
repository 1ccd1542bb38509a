use std::ops::Range;

use anyhow::ensure;
use avatar_native::types::{SubMeshDescriptor, SubMeshInclusionFlags};
use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};
use itertools::Itertools;

use crate::assets::primitive::MeshInfo;
use crate::engine::{VertexAttribute, VertexAttributeDescriptor, VertexAttributeFormat};

bitflags! {
    /// The vertex attributes an engine mesh is uploaded with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VertexFormat: u16 {
        const POSITION = 1 << 0;
        const NORMAL = 1 << 1;
        const TANGENT = 1 << 2;
        const COLOR = 1 << 3;
        const TEXCOORD0 = 1 << 4;
        const TEXCOORD1 = 1 << 5;
        const BONE_WEIGHTS = 1 << 6;
        const BONE_INDICES = 1 << 7;
    }
}

/// In engine attribute order, which is also the order inside each stream.
const ATTRIBUTES: [(VertexFormat, VertexAttribute, VertexAttributeFormat, u8, u8); 8] = [
    (VertexFormat::POSITION, VertexAttribute::Position, VertexAttributeFormat::Float32, 3, 0),
    (VertexFormat::NORMAL, VertexAttribute::Normal, VertexAttributeFormat::Float32, 3, 0),
    (VertexFormat::TANGENT, VertexAttribute::Tangent, VertexAttributeFormat::Float32, 4, 0),
    (VertexFormat::COLOR, VertexAttribute::Color, VertexAttributeFormat::UNorm8, 4, 1),
    (VertexFormat::TEXCOORD0, VertexAttribute::TexCoord0, VertexAttributeFormat::Float32, 2, 1),
    (VertexFormat::TEXCOORD1, VertexAttribute::TexCoord1, VertexAttributeFormat::Float32, 2, 1),
    (VertexFormat::BONE_WEIGHTS, VertexAttribute::BlendWeight, VertexAttributeFormat::Float32, 4, 2),
    (VertexFormat::BONE_INDICES, VertexAttribute::BlendIndices, VertexAttributeFormat::UInt16, 4, 2),
];

/// The format derived from the data that is present. `engine_skinned` adds the bone attributes,
/// `compute_only` reduces the mesh to a position placeholder the compute skinner writes into.
pub fn vertex_format(mesh: &MeshInfo, engine_skinned: bool, compute_only: bool) -> VertexFormat {
    if compute_only {
        return VertexFormat::POSITION;
    }

    let mut format = VertexFormat::POSITION;
    format.set(VertexFormat::NORMAL, !mesh.normals.is_empty());
    format.set(VertexFormat::TANGENT, mesh.tangents.is_some());
    if let Some(attributes) = &mesh.static_attributes {
        format.set(VertexFormat::COLOR, !attributes.colors.is_empty());
        format.set(VertexFormat::TEXCOORD0, !attributes.texcoord0.is_empty());
        format.set(VertexFormat::TEXCOORD1, !attributes.texcoord1.is_empty());
    }
    if engine_skinned && mesh.bone_weights.is_some() {
        format |= VertexFormat::BONE_WEIGHTS | VertexFormat::BONE_INDICES;
    }
    format
}

/// Stream 0 holds position, normal and tangent, stream 1 color and texture coordinates, stream 2
/// the skinning attributes. Streams are numbered densely, empty ones are skipped.
pub fn vertex_layout(format: VertexFormat) -> Vec<VertexAttributeDescriptor> {
    let present = ATTRIBUTES
        .iter()
        .filter(|(flag, ..)| format.contains(*flag))
        .collect_vec();
    let streams = present.iter().map(|(.., stream)| *stream).unique().collect_vec();

    present
        .into_iter()
        .map(|&(_, attribute, attribute_format, dimension, stream)| VertexAttributeDescriptor {
            attribute,
            format: attribute_format,
            dimension,
            stream: streams.iter().position(|s| *s == stream).unwrap_or(0) as u8,
        })
        .collect()
}

fn write_floats(out: &mut Vec<u8>, values: &[f32]) -> anyhow::Result<()> {
    for value in values {
        out.write_f32::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Interleaves the mesh data into one byte buffer per stream of `layout`. With `zero_positions`
/// the position attribute is written as zeros, regardless of what the mesh holds.
pub fn encode_streams(
    mesh: &MeshInfo,
    layout: &[VertexAttributeDescriptor],
    zero_positions: bool,
) -> anyhow::Result<Vec<Vec<u8>>> {
    profiling::scope!("encode_streams");
    let vertex_count = mesh.vertex_count as usize;
    let stream_count = layout.iter().map(|attr| attr.stream as usize + 1).max().unwrap_or(0);
    let mut streams = (0..stream_count)
        .map(|stream| {
            let stride: usize = layout
                .iter()
                .filter(|attr| attr.stream as usize == stream)
                .map(VertexAttributeDescriptor::byte_size)
                .sum();
            Vec::with_capacity(stride * vertex_count)
        })
        .collect_vec();

    if !zero_positions {
        ensure!(
            mesh.positions.len() == vertex_count,
            "{} positions for {} vertices",
            mesh.positions.len(),
            vertex_count
        );
    }

    for vertex in 0..vertex_count {
        for attr in layout {
            let out = &mut streams[attr.stream as usize];
            match attr.attribute {
                VertexAttribute::Position if zero_positions => write_floats(out, &[0.0; 3])?,
                VertexAttribute::Position => write_floats(out, &mesh.positions[vertex].to_array())?,
                VertexAttribute::Normal => {
                    let normal = mesh.normals.get(vertex).copied().unwrap_or_default();
                    write_floats(out, &normal.to_array())?
                }
                VertexAttribute::Tangent => {
                    let tangent = mesh
                        .tangents
                        .as_ref()
                        .and_then(|tangents| tangents.get(vertex).copied())
                        .unwrap_or_default();
                    write_floats(out, &tangent.to_array())?
                }
                VertexAttribute::Color => {
                    let color = mesh
                        .static_attributes
                        .as_ref()
                        .and_then(|attributes| attributes.colors.get(vertex).copied())
                        .unwrap_or([255; 4]);
                    out.extend_from_slice(&color);
                }
                VertexAttribute::TexCoord0 | VertexAttribute::TexCoord1 => {
                    let uv = mesh
                        .static_attributes
                        .as_ref()
                        .and_then(|attributes| match attr.attribute {
                            VertexAttribute::TexCoord0 => attributes.texcoord0.get(vertex),
                            _ => attributes.texcoord1.get(vertex),
                        })
                        .copied()
                        .unwrap_or_default();
                    write_floats(out, &uv.to_array())?
                }
                VertexAttribute::BlendWeight | VertexAttribute::BlendIndices => {
                    let weight = mesh.bone_weights.as_ref().and_then(|weights| weights.get(vertex));
                    if attr.attribute == VertexAttribute::BlendWeight {
                        write_floats(out, &weight.map(|w| w.weights).unwrap_or_default().to_array())?;
                    } else {
                        for joint in weight.map(|w| w.indices).unwrap_or_default() {
                            out.write_u16::<LittleEndian>(joint)?;
                        }
                    }
                }
            }
        }
    }

    Ok(streams)
}

fn is_excluded(submesh: &SubMeshDescriptor, inclusion: SubMeshInclusionFlags) -> bool {
    !submesh.inclusion.intersects(inclusion)
}

/// Degenerates every triangle of an excluded sub-mesh to index 0. The index buffer keeps its
/// length and every sub-mesh keeps its range. Returns the number of degenerated indices.
pub fn exclude_submeshes(
    triangles: &mut [u32],
    submeshes: &[SubMeshDescriptor],
    inclusion: SubMeshInclusionFlags,
) -> anyhow::Result<usize> {
    let mut excluded = 0;
    for submesh in submeshes.iter().filter(|submesh| is_excluded(submesh, inclusion)) {
        let range: Range<usize> = submesh.index_range();
        ensure!(
            range.end <= triangles.len(),
            "Sub-mesh {:?} exceeds the {} indices",
            submesh,
            triangles.len()
        );
        triangles[range].fill(0);
        excluded += submesh.index_count as usize;
    }
    Ok(excluded)
}

#[cfg(test)]
mod tests {
    use avatar_native::types::{BoneWeight, StaticAttributes};
    use byteorder::ByteOrder;
    use glam::{Vec2, Vec3, Vec4};

    use super::*;
    use crate::assets::primitive::MeshConsumers;

    fn mesh() -> MeshInfo {
        let mut mesh = MeshInfo::new(2, MeshConsumers::ENGINE_MESH);
        mesh.positions = vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)];
        mesh.normals = vec![Vec3::Z; 2];
        mesh.tangents = Some(vec![Vec4::X; 2]);
        mesh.bone_weights = Some(vec![
            BoneWeight {
                indices: [3, 1, 0, 0],
                weights: Vec4::new(0.5, 0.5, 0.0, 0.0),
            };
            2
        ]);
        mesh.static_attributes = Some(StaticAttributes {
            colors: vec![[1, 2, 3, 4]; 2],
            texcoord0: vec![Vec2::new(0.25, 0.75); 2],
            texcoord1: vec![],
        });
        mesh
    }

    #[test]
    fn format_follows_present_data() {
        let mesh = mesh();
        let format = vertex_format(&mesh, true, false);
        assert!(format.contains(VertexFormat::POSITION | VertexFormat::TANGENT | VertexFormat::TEXCOORD0));
        assert!(format.contains(VertexFormat::BONE_WEIGHTS | VertexFormat::BONE_INDICES));
        assert!(!format.contains(VertexFormat::TEXCOORD1));

        assert!(!vertex_format(&mesh, false, false).contains(VertexFormat::BONE_WEIGHTS));
        assert_eq!(vertex_format(&mesh, true, true), VertexFormat::POSITION);
    }

    #[test]
    fn layout_groups_streams_in_engine_order() {
        let layout = vertex_layout(VertexFormat::all());
        let attributes = layout.iter().map(|attr| (attr.attribute, attr.stream)).collect_vec();
        assert_eq!(
            attributes,
            vec![
                (VertexAttribute::Position, 0),
                (VertexAttribute::Normal, 0),
                (VertexAttribute::Tangent, 0),
                (VertexAttribute::Color, 1),
                (VertexAttribute::TexCoord0, 1),
                (VertexAttribute::TexCoord1, 1),
                (VertexAttribute::BlendWeight, 2),
                (VertexAttribute::BlendIndices, 2),
            ]
        );

        // without color and uvs the skinning stream moves up
        let layout = vertex_layout(VertexFormat::POSITION | VertexFormat::BONE_WEIGHTS);
        assert_eq!(layout[1].stream, 1);
    }

    #[test]
    fn streams_are_interleaved_little_endian() -> anyhow::Result<()> {
        let mesh = mesh();
        let layout = vertex_layout(vertex_format(&mesh, true, false));
        let streams = encode_streams(&mesh, &layout, false)?;

        assert_eq!(streams.len(), 3);
        // position, normal, tangent
        assert_eq!(streams[0].len(), 2 * (12 + 12 + 16));
        assert_eq!(LittleEndian::read_f32(&streams[0][40..44]), 4.0);
        // color, uv0
        assert_eq!(&streams[1][0..4], &[1, 2, 3, 4]);
        assert_eq!(LittleEndian::read_f32(&streams[1][4..8]), 0.25);
        // weights, joint indices
        assert_eq!(streams[2].len(), 2 * (16 + 8));
        assert_eq!(LittleEndian::read_u16(&streams[2][16..18]), 3);
        Ok(())
    }

    #[test]
    fn zero_positions_ignore_mesh_data() -> anyhow::Result<()> {
        let mut mesh = MeshInfo::new(4, MeshConsumers::ENGINE_MESH);
        mesh.positions = vec![];
        let streams = encode_streams(&mesh, &vertex_layout(VertexFormat::POSITION), true)?;
        assert_eq!(streams, vec![vec![0u8; 4 * 12]]);
        Ok(())
    }

    #[test]
    fn excluded_submeshes_degenerate_in_place() -> anyhow::Result<()> {
        let submeshes = [
            SubMeshDescriptor {
                index_start: 0,
                index_count: 3,
                vertex_start: 0,
                vertex_count: 3,
                inclusion: SubMeshInclusionFlags::BODY,
            },
            SubMeshDescriptor {
                index_start: 3,
                index_count: 3,
                vertex_start: 3,
                vertex_count: 3,
                inclusion: SubMeshInclusionFlags::HAIR,
            },
        ];
        let mut triangles = vec![0, 1, 2, 3, 4, 5];

        let excluded = exclude_submeshes(&mut triangles, &submeshes, SubMeshInclusionFlags::BODY)?;
        assert_eq!(excluded, 3);
        assert_eq!(triangles, vec![0, 1, 2, 0, 0, 0]);
        assert_eq!(submeshes[1].index_range(), 3..6);

        let mut all = vec![0, 1, 2, 3, 4, 5];
        assert_eq!(exclude_submeshes(&mut all, &submeshes, SubMeshInclusionFlags::ALL)?, 0);
        assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn sub_meshes_past_the_index_space_are_rejected() {
        let submesh = SubMeshDescriptor {
            index_start: u32::MAX - 1,
            index_count: 6,
            vertex_start: 0,
            vertex_count: 3,
            inclusion: SubMeshInclusionFlags::HAIR,
        };
        let mut triangles = vec![0, 1, 2];

        assert!(exclude_submeshes(&mut triangles, &[submesh], SubMeshInclusionFlags::BODY).is_err());
        assert_eq!(triangles, vec![0, 1, 2]);
    }
}
