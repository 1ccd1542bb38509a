use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use avatar_native::types::ImageDescriptor;
use avatar_native::{AssetId, ResourceId};
use log::{error, trace, warn};

use crate::assets::drain::DrainSlice;
use crate::assets::{AssetEntry, AssetLifecycle, LoadContext, LoadableAsset};
use crate::engine::{TextureDesc, TextureHandle};
use crate::slicing::{BackgroundTask, Directive, SliceHandle, TimeSlice};

struct ImageState {
    handle: SliceHandle,
    copy: Option<BackgroundTask<Vec<u8>>>,
}

/// Loads one 2D texture: native copy on a worker, allocation and upload on the scheduling thread.
pub struct ImageLoader {
    lifecycle: AssetLifecycle,
    resource: ResourceId,
    descriptor: ImageDescriptor,
    ctx: Arc<LoadContext>,
    copied: Arc<AtomicBool>,
    texture: ArcSwapOption<TextureHandle>,
    state: Mutex<ImageState>,
}

impl ImageLoader {
    pub fn create(ctx: Arc<LoadContext>, resource: ResourceId, descriptor: ImageDescriptor) -> Arc<Self> {
        let image = Arc::new(Self {
            lifecycle: AssetLifecycle::new("Image", descriptor.id, &descriptor.name),
            resource,
            descriptor,
            ctx,
            copied: Arc::new(AtomicBool::new(false)),
            texture: ArcSwapOption::empty(),
            state: Mutex::new(ImageState {
                handle: SliceHandle::invalid(),
                copy: None,
            }),
        });

        image.ctx.assets.register(AssetEntry::Image(image.clone()));
        image
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// The uploaded texture. `None` until loaded, and for images that failed.
    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture.load().as_ref().map(|texture| **texture)
    }

    pub fn start_load(self: &Arc<Self>) {
        let format = self.descriptor.format();
        if !self.ctx.settings.textures.supports(format) {
            // fail fast, the image simply won't be bound
            warn!(
                "Image {} has the unsupported format {:?} (raw {}), skipping it",
                self.descriptor.name, format, self.descriptor.raw_format
            );
            self.copied.store(true, Ordering::Release);
            self.lifecycle.mark_loaded();
            return;
        }

        let handle = self.ctx.slicer.schedule(ImageSlice {
            name: format!("Image {}", self.descriptor.name),
            image: self.clone(),
            stage: ImageStage::Copy,
        });
        self.state.lock().expect("Image State Lock").handle = handle;
    }

    fn release_texture(&self) {
        if let Some(texture) = self.texture.swap(None) {
            self.ctx.backend.destroy_texture(*texture);
        }
    }
}

impl LoadableAsset for ImageLoader {
    fn asset_id(&self) -> AssetId {
        self.lifecycle.id()
    }

    fn resource_id(&self) -> ResourceId {
        self.resource
    }

    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn is_loaded(&self) -> bool {
        self.lifecycle.is_loaded()
    }

    fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    fn has_copied_all_resource_data(&self) -> bool {
        self.copied.load(Ordering::Acquire)
    }

    fn cancel_load(&self) -> bool {
        if !self.lifecycle.mark_cancelled() {
            error!("Image {} has already been cancelled", self.descriptor.name);
            return true;
        }

        let (handle, copy) = {
            let mut state = self.state.lock().expect("Image State Lock");
            (std::mem::take(&mut state.handle), state.copy.take())
        };

        let cancelled = handle.cancel();
        self.release_texture();

        match copy.filter(|copy| !copy.is_done()) {
            Some(copy) => {
                let copied = self.copied.clone();
                let drain = DrainSlice::new(format!("Image {} cancellation", self.descriptor.name))
                    .with_task(Box::new(copy))
                    .on_drained(move || copied.store(true, Ordering::Release));
                self.ctx.slicer.schedule(drain).detach();
            }
            None => self.copied.store(true, Ordering::Release),
        }

        trace!("Cancelled image {}", self.descriptor.name);
        cancelled
    }

    fn dispose(&self) {
        if self.lifecycle.is_disposed() {
            return;
        }

        if !self.is_resolved() {
            self.cancel_load();
        }

        self.state.lock().expect("Image State Lock").handle.clear();
        self.release_texture();
        self.ctx.assets.unregister(self.asset_id());
        self.lifecycle.mark_disposed();
    }
}

enum ImageStage {
    Copy,
    AwaitCopy,
    Allocate(Vec<u8>),
    Upload(TextureHandle, Vec<u8>),
}

struct ImageSlice {
    name: String,
    image: Arc<ImageLoader>,
    stage: ImageStage,
}

impl ImageSlice {
    fn fail(&self, reason: anyhow::Error) -> Directive {
        warn!("Image {} failed: {:?}", self.image.descriptor.name, reason);
        self.image.cancel_load();
        Directive::Cancel
    }
}

impl TimeSlice for ImageSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        let image = self.image.clone();
        match std::mem::replace(&mut self.stage, ImageStage::AwaitCopy) {
            ImageStage::Copy => {
                let native = image.ctx.native.clone();
                let id = image.descriptor.id;
                let size = image.descriptor.data_size;
                let task = image.ctx.workers.spawn("image copy", move || {
                    let mut data = vec![0u8; size];
                    native.copy_image_data(id, &mut data)?;
                    Ok(data)
                });

                image.state.lock().expect("Image State Lock").copy = Some(task);
                Ok(Directive::Delay)
            }
            ImageStage::AwaitCopy => {
                let result = {
                    let mut state = image.state.lock().expect("Image State Lock");
                    let Some(task) = state.copy.as_mut() else {
                        return Ok(Directive::Cancel);
                    };

                    if !task.poll() {
                        return Ok(Directive::Delay);
                    }

                    let result = task.take_result();
                    state.copy = None;
                    result
                };

                // success or not, the native data isn't needed anymore
                image.copied.store(true, Ordering::Release);
                match result {
                    Ok(data) => {
                        self.stage = ImageStage::Allocate(data);
                        Ok(Directive::Hold)
                    }
                    Err(err) => Ok(self.fail(err)),
                }
            }
            ImageStage::Allocate(data) => {
                let descriptor = &image.descriptor;
                let settings = &image.ctx.settings.textures;
                let desc = TextureDesc {
                    name: descriptor.name.clone(),
                    width: descriptor.width,
                    height: descriptor.height,
                    mip_count: descriptor.mip_count,
                    format: descriptor.format(),
                    srgb: descriptor.srgb,
                    filter: settings.filter,
                    anisotropy: settings.anisotropy,
                };

                match image.ctx.backend.create_texture(&desc) {
                    Ok(texture) => {
                        image.texture.store(Some(Arc::new(texture)));
                        self.stage = ImageStage::Upload(texture, data);
                        // the fresh texture must not cross a frame boundary without its data
                        Ok(Directive::Stall)
                    }
                    Err(err) => Ok(self.fail(err)),
                }
            }
            ImageStage::Upload(texture, data) => {
                if let Err(err) = image.ctx.backend.upload_texture(texture, &data) {
                    return Ok(self.fail(err));
                }

                image.lifecycle.mark_loaded();
                trace!("Image {} loaded as {}", image.descriptor.name, texture);
                Ok(Directive::Complete)
            }
        }
    }
}
