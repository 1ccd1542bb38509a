use std::str::FromStr;
use std::time::Duration;

use avatar_native::types::{SubMeshInclusionFlags, TextureFormat};
use bitflags::bitflags;
use clap::{Parser, value_parser};
use itertools::Itertools;

use crate::assets::shader::ShaderEntry;
use crate::engine::FilterMode;

#[derive(Parser, Debug)]
#[command(name = "avatar-pipeline")]
#[command(about = "Streams a synthetic avatar through the time-sliced loading pipeline")]
pub struct CliArgs {
    #[arg(long, env = "AVATAR_PRIMITIVES", default_value_t = 4)]
    pub primitives: u32,

    #[arg(long, env = "AVATAR_VERTICES", default_value_t = 1000)]
    pub vertices: u32,

    #[arg(long, env = "AVATAR_IMAGES", default_value_t = 2)]
    pub images: u32,

    #[arg(long, env = "AVATAR_MORPH_TARGETS", default_value_t = 3)]
    pub morph_targets: u32,

    /// Comma separated list out of `engine`, `gpu`, `compute`.
    #[arg(long, env = "AVATAR_SKINNING", default_value = "engine,gpu", value_parser = value_parser!(SkinningCapabilities))]
    pub skinning: SkinningCapabilities,

    #[arg(long, env = "AVATAR_QUALITY", default_value = "standard", value_parser = value_parser!(MaterialQuality))]
    pub quality: MaterialQuality,

    /// Per frame budget of the scheduler, in microseconds.
    #[arg(long, env = "AVATAR_TICK_BUDGET_US", default_value_t = 2000)]
    pub tick_budget_us: u64,

    #[arg(long, env = "AVATAR_WORKER_THREADS", default_value_t = 4)]
    pub worker_threads: usize,

    /// Simulated frame time between two scheduler ticks, in milliseconds.
    #[arg(long, default_value_t = 1)]
    pub frame_time_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub max_frames: u32,

    /// Cancels the resource after this many frames.
    #[arg(long)]
    pub cancel_after: Option<u32>,
}

bitflags! {
    /// The skinning backends a platform supports. Every primitive builds the subset it has data for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SkinningCapabilities: u8 {
        const ENGINE = 1 << 0;
        const GPU_TEXTURE = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

impl FromStr for SkinningCapabilities {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.to_ascii_lowercase().as_str() {
                "engine" => Ok(SkinningCapabilities::ENGINE),
                "gpu" | "gpu_texture" => Ok(SkinningCapabilities::GPU_TEXTURE),
                "compute" => Ok(SkinningCapabilities::COMPUTE),
                other => Err(format!("Unknown skinning backend {}", other)),
            })
            .fold_ok(SkinningCapabilities::empty(), |acc, caps| acc | caps)
    }
}

/// Ordered from the most to the least detailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MaterialQuality {
    Ultra,
    Standard,
    Light,
    VeryLight,
}

impl MaterialQuality {
    /// Normal maps, hair and rim lighting only run at `Standard` and above.
    pub fn enables_detail_features(self) -> bool {
        self <= MaterialQuality::Standard
    }
}

impl FromStr for MaterialQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ultra" => Ok(MaterialQuality::Ultra),
            "standard" => Ok(MaterialQuality::Standard),
            "light" => Ok(MaterialQuality::Light),
            "verylight" | "very_light" => Ok(MaterialQuality::VeryLight),
            _ => Err(format!("Unknown material quality {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextureSettings {
    pub filter: FilterMode,
    pub anisotropy: u8,
    /// Compressed formats the target platform can sample. Uncompressed formats are always supported.
    pub supported_compressed: Vec<TextureFormat>,
}

impl TextureSettings {
    pub fn supports(&self, format: TextureFormat) -> bool {
        match format {
            TextureFormat::Invalid => false,
            format if format.is_compressed() => self.supported_compressed.contains(&format),
            _ => true,
        }
    }
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            filter: FilterMode::Trilinear,
            anisotropy: 4,
            supported_compressed: vec![
                TextureFormat::Dxt1,
                TextureFormat::Dxt5,
                TextureFormat::Bc7,
                TextureFormat::Astc4x4,
                TextureFormat::Astc6x6,
                TextureFormat::Etc2Rgba,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasSettings {
    /// Width and height of one slice of every skinning texture array.
    pub slice_size: u32,
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self { slice_size: 512 }
    }
}

/// Session wide configuration of the loaders.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub skinning: SkinningCapabilities,
    pub quality: MaterialQuality,
    pub tick_budget: Duration,
    pub worker_threads: usize,
    pub textures: TextureSettings,
    pub atlas: AtlasSettings,
    /// Sub-meshes sharing no bit with this filter have their triangles degenerated.
    pub submesh_inclusion: SubMeshInclusionFlags,
    /// Registered on top of the built in shader table.
    pub shaders: Vec<ShaderEntry>,
    /// Upper bound of ticks `shutdown` spends waiting for background work.
    pub shutdown_ticks: u32,
    pub worker_shutdown_timeout: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            skinning: SkinningCapabilities::ENGINE,
            quality: MaterialQuality::Standard,
            tick_budget: Duration::from_millis(2),
            worker_threads: 4,
            textures: TextureSettings::default(),
            atlas: AtlasSettings::default(),
            submesh_inclusion: SubMeshInclusionFlags::ALL,
            shaders: vec![],
            shutdown_ticks: 5000,
            worker_shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&CliArgs> for LoaderSettings {
    fn from(args: &CliArgs) -> Self {
        Self {
            skinning: args.skinning,
            quality: args.quality,
            tick_budget: Duration::from_micros(args.tick_budget_us),
            worker_threads: args.worker_threads,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_skinning_lists() {
        assert_eq!(
            "engine, compute".parse::<SkinningCapabilities>(),
            Ok(SkinningCapabilities::ENGINE | SkinningCapabilities::COMPUTE)
        );
        assert_eq!("".parse::<SkinningCapabilities>(), Ok(SkinningCapabilities::empty()));
        assert!("cpu".parse::<SkinningCapabilities>().is_err());
    }

    #[test]
    fn quality_gates_detail_features() {
        assert!(MaterialQuality::Ultra.enables_detail_features());
        assert!(MaterialQuality::Standard.enables_detail_features());
        assert!(!MaterialQuality::Light.enables_detail_features());
        assert!(!"verylight".parse::<MaterialQuality>().unwrap().enables_detail_features());
    }

    #[test]
    fn texture_allow_list() {
        let settings = TextureSettings::default();
        assert!(settings.supports(TextureFormat::Rgba32));
        assert!(settings.supports(TextureFormat::Bc7));
        assert!(!settings.supports(TextureFormat::Pvrtc4));
        assert!(!settings.supports(TextureFormat::Invalid));
    }
}
