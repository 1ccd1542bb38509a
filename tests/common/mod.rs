#![allow(dead_code)]

use std::sync::Arc;

use avatar_native::ResourceId;
use avatar_native::mock::{MockImage, MockNative, MockPrimitive};
use avatar_pipeline::AvatarSession;
use avatar_pipeline::assets::ResourceLoader;
use avatar_pipeline::engine::HeadlessBackend;
use avatar_pipeline::settings::LoaderSettings;

pub const MAX_TICKS: u32 = 5000;

pub struct Harness {
    pub native: Arc<MockNative>,
    pub backend: Arc<HeadlessBackend>,
    pub session: AvatarSession,
}

impl Harness {
    pub fn new(settings: LoaderSettings) -> Self {
        let native = Arc::new(MockNative::new());
        let backend = Arc::new(HeadlessBackend::new());
        let session = AvatarSession::new(native.clone(), backend.clone(), settings).expect("session");
        Self {
            native,
            backend,
            session,
        }
    }

    pub fn load(&self, id: u64, primitives: Vec<MockPrimitive>, images: Vec<MockImage>) -> Arc<ResourceLoader> {
        let id = ResourceId(id);
        self.native.add_resource(id, primitives, images);
        self.session.load_resource(id).expect("load")
    }

    pub fn resolve(&self, resource: &ResourceLoader) {
        assert!(
            self.session.tick_until(MAX_TICKS, |_| resource.is_resolved()),
            "{} never resolved",
            resource.id()
        );
    }

    pub fn tick_until(&self, mut done: impl FnMut() -> bool) {
        assert!(self.session.tick_until(MAX_TICKS, |_| done()), "condition never held");
    }

    /// Unloads everything and checks that the session leaves nothing behind.
    pub fn finish(self) {
        let report = self.session.shutdown();
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(self.backend.live_objects(), 0);
    }
}
