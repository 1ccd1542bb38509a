use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::anyhow;
use avatar_native::AssetId;
use avatar_native::types::{ExtensionValue, MaterialExtension, PrimitiveMaterial, TextureSlot};
use itertools::Itertools;
use log::{debug, trace, warn};

use crate::assets::shader::{KEYWORD_HAIR, KEYWORD_NORMAL_MAP, KEYWORD_RIM_LIGHTING};
use crate::assets::{LoadContext, LoadableAsset};
use crate::assets::primitive::PrimitiveLoader;
use crate::engine::{MaterialHandle, TextureHandle};
use crate::slicing::{Directive, TimeSlice};

/// The material property a texture slot binds to. Extension only and unknown slots have none.
pub fn slot_property(slot: TextureSlot) -> Option<&'static str> {
    match slot {
        TextureSlot::BaseColor => Some("_BaseMap"),
        TextureSlot::Normal => Some("_NormalMap"),
        TextureSlot::Emissive => Some("_EmissionMap"),
        TextureSlot::Occlusion => Some("_OcclusionMap"),
        TextureSlot::MetallicRoughness => Some("_MetallicGlossMap"),
        TextureSlot::Extension | TextureSlot::Unknown(_) => None,
    }
}

fn referenced_images(material: &PrimitiveMaterial) -> Vec<AssetId> {
    let bound = material.textures.iter().map(|binding| binding.image);
    let extensions = material
        .extensions
        .iter()
        .flat_map(|extension| &extension.entries)
        .filter_map(|entry| match entry.value {
            ExtensionValue::Texture(image) => Some(image),
            _ => None,
        });
    bound.chain(extensions).unique().collect()
}

fn loaded_texture(ctx: &LoadContext, image: AssetId) -> Option<TextureHandle> {
    ctx.assets.image(image).and_then(|image| image.texture())
}

fn apply_extension(ctx: &LoadContext, material: MaterialHandle, extension: &MaterialExtension) -> anyhow::Result<()> {
    for entry in &extension.entries {
        let property = format!("_{}_{}", extension.name, entry.name);
        match &entry.value {
            ExtensionValue::Float(value) => ctx.backend.set_material_float(material, &property, *value)?,
            ExtensionValue::Vector(value) => ctx.backend.set_material_vector(material, &property, *value)?,
            ExtensionValue::Texture(image) => {
                let texture = loaded_texture(ctx, *image)
                    .ok_or_else(|| anyhow!("The texture of {} ({}) isn't loaded", property, image))?;
                ctx.backend.set_material_texture(material, &property, texture)?
            }
        }
    }
    Ok(())
}

enum MaterialStage {
    AwaitImages,
    Build,
    Extensions(MaterialHandle),
}

/// Waits for the images a primitive's material references, then builds the engine material.
pub(super) struct MaterialSlice {
    name: String,
    primitive: Arc<PrimitiveLoader>,
    material: Option<PrimitiveMaterial>,
    stage: MaterialStage,
}

impl MaterialSlice {
    pub(super) fn new(primitive: Arc<PrimitiveLoader>) -> Self {
        Self {
            name: format!("Material {}", primitive.name()),
            primitive,
            material: None,
            stage: MaterialStage::AwaitImages,
        }
    }

    fn images_resolved(&self, material: &PrimitiveMaterial) -> bool {
        let ctx = &self.primitive.ctx;
        referenced_images(material).into_iter().all(|id| match ctx.assets.image(id) {
            Some(image) => image.is_resolved(),
            None => {
                // not part of any loaded resource, it will never show up
                debug!("{}: image {} is unknown", self.name, id);
                true
            }
        })
    }

    fn build(&mut self, material: &PrimitiveMaterial) -> anyhow::Result<Directive> {
        let primitive = self.primitive.clone();
        let ctx = &primitive.ctx;

        let has_metallic = material.metallic > 0.0
            || material
                .textures
                .iter()
                .any(|binding| binding.slot() == TextureSlot::MetallicRoughness);
        let has_textures = !material.textures.is_empty();
        let config = ctx.shaders.lookup(&material.shader_name, has_metallic, has_textures);

        let handle = match ctx.backend.create_material(config) {
            Ok(handle) => handle,
            Err(err) => return Ok(primitive.fail("create its material", err)),
        };
        primitive.lock_state().material_handle = Some(handle);

        let mut has_normal_map = false;
        for binding in &material.textures {
            let slot = binding.slot();
            let Some(property) = slot_property(slot) else {
                trace!("{}: skipping the {:?} slot", self.name, slot);
                continue;
            };
            let Some(texture) = loaded_texture(ctx, binding.image) else {
                debug!("{}: image {} for {:?} didn't load", self.name, binding.image, slot);
                continue;
            };

            match ctx.backend.set_material_texture(handle, property, texture) {
                Ok(()) => has_normal_map |= slot == TextureSlot::Normal,
                Err(err) => warn!("{}: binding {} failed: {:?}", self.name, property, err),
            }
        }

        for result in [
            ctx.backend.set_material_vector(handle, "_BaseColor", material.base_color),
            ctx.backend.set_material_float(handle, "_Metallic", material.metallic),
            ctx.backend.set_material_float(handle, "_Roughness", material.roughness),
        ] {
            if let Err(err) = result {
                warn!("{}: {:?}", self.name, err);
            }
        }

        let detail = ctx.settings.quality.enables_detail_features();
        ctx.backend
            .set_material_keyword(handle, KEYWORD_NORMAL_MAP, detail && has_normal_map);
        ctx.backend
            .set_material_keyword(handle, KEYWORD_HAIR, detail && material.shader_name == "hair");
        ctx.backend.set_material_keyword(handle, KEYWORD_RIM_LIGHTING, detail);

        self.stage = MaterialStage::Extensions(handle);
        Ok(Directive::Hold)
    }
}

impl TimeSlice for MaterialSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        let material = match self.material.take() {
            Some(material) => material,
            None => self
                .primitive
                .lock_state()
                .material_desc
                .take()
                .unwrap_or_default(),
        };

        let directive = match self.stage {
            MaterialStage::AwaitImages if !self.images_resolved(&material) => Directive::Wait,
            MaterialStage::AwaitImages => {
                self.stage = MaterialStage::Build;
                Directive::Continue
            }
            MaterialStage::Build => self.build(&material)?,
            MaterialStage::Extensions(handle) => {
                for extension in &material.extensions {
                    if let Err(err) = apply_extension(&self.primitive.ctx, handle, extension) {
                        warn!("{}: skipping extension {}: {:?}", self.name, extension.name, err);
                    }
                }

                self.primitive.material_loaded.store(true, Ordering::Release);
                trace!("{} loaded", self.name);
                Directive::Complete
            }
        };

        self.material = Some(material);
        Ok(directive)
    }
}

#[cfg(test)]
mod tests {
    use avatar_native::types::{MaterialExtensionEntry, MaterialTextureBinding};
    use glam::Vec4;

    use super::*;

    #[test]
    fn only_known_slots_bind() {
        assert_eq!(slot_property(TextureSlot::Normal), Some("_NormalMap"));
        assert_eq!(slot_property(TextureSlot::from(5)), None);
        assert_eq!(slot_property(TextureSlot::from(77)), None);
    }

    #[test]
    fn images_of_slots_and_extensions() {
        let material = PrimitiveMaterial {
            textures: vec![
                MaterialTextureBinding {
                    raw_slot: 0,
                    image: AssetId(1),
                },
                MaterialTextureBinding {
                    raw_slot: 1,
                    image: AssetId(1),
                },
            ],
            extensions: vec![MaterialExtension {
                name: "Sheen".to_string(),
                entries: vec![
                    MaterialExtensionEntry {
                        name: "Color".to_string(),
                        value: ExtensionValue::Vector(Vec4::ONE),
                    },
                    MaterialExtensionEntry {
                        name: "Map".to_string(),
                        value: ExtensionValue::Texture(AssetId(2)),
                    },
                ],
            }],
            ..Default::default()
        };

        assert_eq!(referenced_images(&material), vec![AssetId(1), AssetId(2)]);
    }
}
