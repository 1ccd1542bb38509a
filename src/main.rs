use std::sync::Arc;
use std::time::{Duration, Instant};

use avatar_native::ResourceId;
use avatar_native::mock::{MockImage, MockNative, MockPrimitive, next_asset_id};
use avatar_native::types::TextureSlot;
use avatar_pipeline::AvatarSession;
use avatar_pipeline::assets::LoadableAsset;
use avatar_pipeline::engine::HeadlessBackend;
use avatar_pipeline::settings::{CliArgs, LoaderSettings};
use clap::Parser;
use log::{info, warn};

/// One body strip per primitive, every primitive sharing the compact skinning data and the images.
fn synthetic_resource(args: &CliArgs) -> (Vec<MockPrimitive>, Vec<MockImage>) {
    let images = (0..args.images)
        .map(|i| MockImage::rgba(&format!("texture_{}", i), 64, 64))
        .collect::<Vec<_>>();
    let compact = avatar_native::CompactSkinningDataId(next_asset_id().0);

    let primitives = (0..args.primitives)
        .map(|i| {
            let mut primitive = MockPrimitive::strip(&format!("primitive_{}", i), args.vertices)
                .with_morph_targets(args.morph_targets, args.vertices / 4)
                .with_compact_skinning(compact);
            let slots = [TextureSlot::BaseColor, TextureSlot::Normal];
            for (image, slot) in images.iter().zip(slots) {
                primitive = primitive.with_texture(slot, image.id);
            }
            primitive
        })
        .collect();

    (primitives, images)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let native = Arc::new(MockNative::new());
    let backend = Arc::new(HeadlessBackend::new());
    let resource_id = ResourceId(1);
    let (primitives, images) = synthetic_resource(&args);
    native.add_resource(resource_id, primitives, images);

    let session = AvatarSession::new(native.clone(), backend.clone(), LoaderSettings::from(&args))?;
    let events = session.subscribe();
    let resource = session.load_resource(resource_id)?;

    let start = Instant::now();
    let mut frames = 0;
    while !resource.is_resolved() && frames < args.max_frames {
        if args.cancel_after == Some(frames) {
            info!("Cancelling {} after {} frames", resource_id, frames);
            session.cancel_resource(resource_id)?;
        }

        session.tick();
        profiling::finish_frame!();
        frames += 1;
        std::thread::sleep(Duration::from_millis(args.frame_time_ms));
    }

    if !resource.is_resolved() {
        warn!("{} didn't resolve within {} frames", resource_id, args.max_frames);
    }
    for event in events.try_iter() {
        info!("{:?}", event);
    }

    let loaded = resource.primitives().iter().filter(|p| p.is_loaded()).count();
    info!(
        "{} frames, {:?}: {}/{} primitives loaded, {} images, {} live engine objects, native released: {}",
        frames,
        start.elapsed(),
        loaded,
        resource.primitives().len(),
        resource.images().len(),
        backend.live_objects(),
        native.is_released(resource_id)
    );

    session.unload_resource(resource_id)?;
    let report = session.shutdown();
    if !report.is_clean() {
        warn!("Leaks at shutdown: {:?}", report);
    }
    Ok(())
}
