use anyhow::{anyhow, ensure};
use avatar_native::types::{IndexFormat, MeshToCompactIndices};
use itertools::Itertools;

/// Where the compute skinner reads a vertex from (`compact`) and where it writes it to (`output`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactIndexPair {
    pub compact: u32,
    pub output: u32,
}

/// Maps every mesh vertex referenced by `triangles` to its slot in the shared compact dataset.
/// Vertices of excluded sub-meshes are not referenced anymore and are left out. The pairs are
/// ordered by compact index, which is the order the skinner walks the shared buffer in.
pub fn generate_mesh_to_compact_skinning_indices(
    mapping: &MeshToCompactIndices,
    triangles: &[u32],
) -> anyhow::Result<Vec<CompactIndexPair>> {
    ensure!(
        mapping.data.len() % mapping.format.byte_width() == 0,
        "Compact index data of {} bytes doesn't fit {:?}",
        mapping.data.len(),
        mapping.format
    );
    let mesh_to_compact = mapping.format.decode(&mapping.data);

    let mut pairs = triangles
        .iter()
        .copied()
        .unique()
        .map(|mesh_index| {
            mesh_to_compact
                .get(mesh_index as usize)
                .map(|&compact| CompactIndexPair {
                    compact,
                    output: mesh_index,
                })
                .ok_or_else(|| anyhow!("Mesh index {} has no compact skinning index", mesh_index))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    pairs.sort_by_key(|pair| pair.compact);
    Ok(pairs)
}

/// Interleaved `compact, output` pairs, at least as wide as the format the native runtime reported
/// for the compact indices.
pub fn encode_index_pairs(pairs: &[CompactIndexPair], native: IndexFormat) -> (IndexFormat, Vec<u8>) {
    let max = pairs
        .iter()
        .map(|pair| pair.compact.max(pair.output))
        .max()
        .unwrap_or(0);
    let format = [native, IndexFormat::for_max_index(max)]
        .into_iter()
        .max_by_key(|format| format.byte_width())
        .unwrap_or(native);
    let flat = pairs.iter().flat_map(|pair| [pair.compact, pair.output]).collect_vec();
    (format, format.encode(&flat))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(format: IndexFormat, indices: &[u32]) -> MeshToCompactIndices {
        MeshToCompactIndices {
            format,
            data: format.encode(indices),
        }
    }

    #[test]
    fn only_referenced_vertices_are_mapped() -> anyhow::Result<()> {
        // vertex 3 isn't referenced by any triangle
        let mapping = mapping(IndexFormat::U16, &[300, 301, 302, 303, 304]);
        let pairs = generate_mesh_to_compact_skinning_indices(&mapping, &[4, 1, 2, 2, 1, 0])?;

        assert_eq!(
            pairs,
            vec![
                CompactIndexPair { compact: 300, output: 0 },
                CompactIndexPair { compact: 301, output: 1 },
                CompactIndexPair { compact: 302, output: 2 },
                CompactIndexPair { compact: 304, output: 4 },
            ]
        );
        Ok(())
    }

    #[test]
    fn pairs_are_ordered_by_compact_index() -> anyhow::Result<()> {
        let mapping = mapping(IndexFormat::U8, &[9, 3, 7]);
        let pairs = generate_mesh_to_compact_skinning_indices(&mapping, &[0, 1, 2])?;
        assert_eq!(pairs.iter().map(|pair| pair.output).collect_vec(), vec![1, 2, 0]);
        Ok(())
    }

    #[test]
    fn every_index_width_is_decoded() -> anyhow::Result<()> {
        for format in [IndexFormat::U8, IndexFormat::U16, IndexFormat::U32] {
            let mapping = mapping(format, &[5, 6]);
            let pairs = generate_mesh_to_compact_skinning_indices(&mapping, &[1, 0, 1])?;
            assert_eq!(pairs[0], CompactIndexPair { compact: 5, output: 0 }, "{:?}", format);
        }
        Ok(())
    }

    #[test]
    fn out_of_range_and_truncated_data_fail() {
        let short = mapping(IndexFormat::U32, &[1]);
        assert!(generate_mesh_to_compact_skinning_indices(&short, &[0, 1, 2]).is_err());

        let truncated = MeshToCompactIndices {
            format: IndexFormat::U16,
            data: vec![1, 0, 2],
        };
        assert!(generate_mesh_to_compact_skinning_indices(&truncated, &[0]).is_err());
    }

    #[test]
    fn pairs_encode_interleaved() {
        let (format, data) = encode_index_pairs(&[CompactIndexPair { compact: 2, output: 300 }], IndexFormat::U8);
        assert_eq!(format, IndexFormat::U16);
        assert_eq!(format.decode(&data), vec![2, 300]);

        // never narrower than what the runtime reported
        let (format, data) = encode_index_pairs(&[CompactIndexPair { compact: 2, output: 3 }], IndexFormat::U32);
        assert_eq!(format, IndexFormat::U32);
        assert_eq!(data.len(), 8);
    }
}
