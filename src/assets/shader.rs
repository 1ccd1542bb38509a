use std::collections::HashMap;

use log::warn;

use crate::engine::ShaderConfig;

pub const KEYWORD_NORMAL_MAP: &str = "AVATAR_NORMAL_MAP";
pub const KEYWORD_HAIR: &str = "AVATAR_HAIR";
pub const KEYWORD_RIM_LIGHTING: &str = "AVATAR_RIM_LIGHTING";

/// Keywords that are only switched on at `MaterialQuality::Standard` or better.
pub const QUALITY_GATED_KEYWORDS: [&str; 3] = [KEYWORD_NORMAL_MAP, KEYWORD_HAIR, KEYWORD_RIM_LIGHTING];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub material: String,
    pub has_metallic: bool,
    pub has_textures: bool,
}

impl ShaderKey {
    pub fn new(material: &str, has_metallic: bool, has_textures: bool) -> Self {
        Self {
            material: material.to_string(),
            has_metallic,
            has_textures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderEntry {
    pub key: ShaderKey,
    pub config: ShaderConfig,
}

fn config(shader: &str, keywords: &[&str]) -> ShaderConfig {
    ShaderConfig {
        shader: shader.to_string(),
        keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
    }
}

/// Picks the shader configuration of a material by name and the features it uses.
pub struct ShaderManager {
    configs: HashMap<ShaderKey, ShaderConfig>,
    fallback: ShaderConfig,
}

impl ShaderManager {
    pub fn new(fallback: ShaderConfig) -> Self {
        Self {
            configs: HashMap::new(),
            fallback,
        }
    }

    pub fn with_defaults() -> Self {
        let mut manager = Self::new(config("Avatar/Unlit", &[]));
        for (material, has_metallic, has_textures, shader, keywords) in [
            ("default", false, false, "Avatar/Standard", &[][..]),
            ("default", false, true, "Avatar/Standard", &["AVATAR_TEXTURED"][..]),
            ("default", true, false, "Avatar/StandardMetallic", &[][..]),
            ("default", true, true, "Avatar/StandardMetallic", &["AVATAR_TEXTURED"][..]),
            ("hair", false, true, "Avatar/Hair", &["AVATAR_TEXTURED"][..]),
            ("eyes", false, true, "Avatar/Eyes", &["AVATAR_TEXTURED"][..]),
        ] {
            manager.register(ShaderEntry {
                key: ShaderKey::new(material, has_metallic, has_textures),
                config: config(shader, keywords),
            });
        }
        manager
    }

    /// Replaces an existing configuration with the same key.
    pub fn register(&mut self, entry: ShaderEntry) {
        self.configs.insert(entry.key, entry.config);
    }

    pub fn lookup(&self, material: &str, has_metallic: bool, has_textures: bool) -> &ShaderConfig {
        let key = ShaderKey::new(material, has_metallic, has_textures);
        match self.configs.get(&key) {
            Some(config) => config,
            None => {
                warn!("No shader configured for {:?}, using {}", key, self.fallback.shader);
                &self.fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_features() {
        let manager = ShaderManager::with_defaults();
        assert_eq!(manager.lookup("default", true, true).shader, "Avatar/StandardMetallic");
        assert_eq!(manager.lookup("hair", false, true).shader, "Avatar/Hair");
    }

    #[test_log::test]
    fn unknown_keys_fall_back() {
        let manager = ShaderManager::with_defaults();
        assert_eq!(manager.lookup("hair", true, false).shader, "Avatar/Unlit");
    }

    #[test]
    fn registered_entries_override() {
        let mut manager = ShaderManager::with_defaults();
        manager.register(ShaderEntry {
            key: ShaderKey::new("hair", false, true),
            config: config("Custom/Hair", &[]),
        });
        assert_eq!(manager.lookup("hair", false, true).shader, "Custom/Hair");
    }
}
