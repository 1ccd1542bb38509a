mod common;

use avatar_native::ResourceId;
use avatar_native::mock::{MockImage, MockPrimitive};
use avatar_native::types::TextureSlot;
use avatar_pipeline::assets::LoadableAsset;
use avatar_pipeline::assets::tracker::{ResourceEvent, TrackedState};
use avatar_pipeline::settings::LoaderSettings;
use common::Harness;

fn body_parts(count: usize) -> Vec<MockPrimitive> {
    (0..count)
        .map(|i| MockPrimitive::strip(&format!("part_{}", i), 64))
        .collect()
}

#[test_log::test]
fn cancelling_twice_succeeds_once() {
    let harness = Harness::new(LoaderSettings::default());
    let events = harness.session.subscribe();
    let resource = harness.load(1, body_parts(2), vec![]);

    assert_eq!(harness.session.cancel_resource(ResourceId(1)), Ok(true));
    assert!(resource.is_cancelled());
    assert_eq!(harness.session.cancel_resource(ResourceId(1)), Ok(true));

    // nothing was copied yet, the native resource goes right away
    assert!(harness.native.is_released(ResourceId(1)));
    assert_eq!(harness.native.counters(ResourceId(1)).release_calls, 1);
    assert_eq!(
        harness.session.context().tracker.state(ResourceId(1)),
        Some(TrackedState::Cancelled)
    );
    assert_eq!(events.try_iter().collect::<Vec<_>>(), vec![ResourceEvent::Cancelled(ResourceId(1))]);

    harness.session.unload_resource(ResourceId(1)).expect("unload");
    assert_eq!(harness.native.counters(ResourceId(1)).release_calls, 1);
    harness.finish();
}

#[test_log::test]
fn cancel_mid_copy_defers_the_release() {
    let harness = Harness::new(LoaderSettings::default());
    let image = MockImage::rgba("skin", 16, 16);
    let mut primitives = body_parts(3);
    primitives[0] = primitives[0].clone().with_texture(TextureSlot::BaseColor, image.id);

    harness.native.close_copy_gate();
    let resource = harness.load(2, primitives, vec![image]);
    harness.tick_until(|| harness.native.blocked_copies() > 0);

    assert_eq!(harness.session.cancel_resource(ResourceId(2)), Ok(true));
    assert!(resource.is_cancelled());
    assert!(resource.primitives().iter().all(|p| p.is_cancelled()));

    // the blocked copies still write into native memory
    for _ in 0..10 {
        harness.session.tick();
    }
    assert!(!harness.native.is_released(ResourceId(2)));

    harness.native.open_copy_gate();
    harness.tick_until(|| harness.native.is_released(ResourceId(2)));
    assert!(resource.primitives().iter().all(|p| p.has_copied_all_resource_data()));

    harness.session.unload_resource(ResourceId(2)).expect("unload");
    assert_eq!(harness.native.counters(ResourceId(2)).release_calls, 1);
    assert_eq!(harness.native.counters(ResourceId(2)).ready_calls, 0);
    harness.finish();
}

#[test_log::test]
fn unload_mid_copy_releases_once() {
    let harness = Harness::new(LoaderSettings::default());

    harness.native.close_copy_gate();
    let resource = harness.load(3, body_parts(3), vec![]);
    harness.tick_until(|| harness.native.blocked_copies() > 0);

    harness.session.unload_resource(ResourceId(3)).expect("unload");
    assert!(resource.is_cancelled());
    assert!(resource.is_disposed());
    assert!(!harness.native.is_released(ResourceId(3)));

    harness.native.open_copy_gate();
    harness.tick_until(|| harness.native.is_released(ResourceId(3)));
    harness.tick_until(|| harness.session.context().slicer.pending() == 0);

    assert_eq!(harness.native.counters(ResourceId(3)).release_calls, 1);
    harness.finish();
}

#[test_log::test]
fn cancelling_a_loaded_resource_changes_nothing() {
    let harness = Harness::new(LoaderSettings::default());
    let resource = harness.load(4, body_parts(1), vec![]);
    harness.resolve(&resource);

    assert_eq!(harness.session.cancel_resource(ResourceId(4)), Ok(true));
    assert!(resource.is_loaded());
    assert!(!resource.is_cancelled());
    assert_eq!(
        harness.session.context().tracker.state(ResourceId(4)),
        Some(TrackedState::Completed)
    );
    harness.finish();
}

#[test_log::test]
fn reloading_after_unload() {
    let harness = Harness::new(LoaderSettings::default());
    let first = harness.load(5, body_parts(1), vec![]);
    harness.resolve(&first);
    harness.session.unload_resource(ResourceId(5)).expect("unload");

    let second = harness.load(5, body_parts(1), vec![]);
    harness.resolve(&second);
    assert!(second.is_loaded());
    harness.finish();
}

#[test_log::test]
fn shutdown_disposes_pending_resources() {
    let harness = Harness::new(LoaderSettings::default());
    let resource = harness.load(6, body_parts(2), vec![]);
    harness.session.tick();

    let report = harness.session.shutdown();
    assert_eq!(report.resources_disposed, 1);
    assert!(report.is_clean(), "{:?}", report);
    assert!(resource.is_disposed());
    assert_eq!(harness.native.counters(ResourceId(6)).release_calls, 1);
    assert_eq!(harness.backend.live_objects(), 0);

    assert!(harness.session.load_resource(ResourceId(6)).is_err());
}
