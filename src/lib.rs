//! Cooperative, cancellable, time-sliced loading of streamed avatar assets.
//!
//! Resources served by the native avatar runtime ([`avatar_native::AvatarNative`]) are turned into
//! engine meshes, materials, textures and skinning resources ([`engine::RenderBackend`]) across many
//! frames, without ever blocking the frame. Start with [`session::AvatarSession`].

pub mod assets;
pub mod engine;
pub mod session;
pub mod settings;
pub mod slicing;

pub use session::{AvatarSession, SessionError, ShutdownReport};
