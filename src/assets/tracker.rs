use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

use avatar_native::ResourceId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvent {
    Completed(ResourceId),
    Cancelled(ResourceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    Completed,
    Cancelled,
}

/// Session wide record of how every resource ended, fanned out to subscribers.
/// Each resource reports at most once; repeated reports are ignored.
#[derive(Default)]
pub struct ResourceTracker {
    states: DashMap<ResourceId, TrackedState>,
    subscribers: Mutex<Vec<Sender<ResourceEvent>>>,
}

impl ResourceTracker {
    pub fn subscribe(&self) -> Receiver<ResourceEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().expect("Tracker Subscribers Lock").push(tx);
        rx
    }

    pub fn state(&self, resource: ResourceId) -> Option<TrackedState> {
        self.states.get(&resource).map(|state| *state.value())
    }

    /// Returns false if the resource already reported.
    pub fn resource_completed(&self, resource: ResourceId) -> bool {
        self.report(resource, TrackedState::Completed, ResourceEvent::Completed(resource))
    }

    /// Returns false if the resource already reported.
    pub fn resource_cancelled(&self, resource: ResourceId) -> bool {
        self.report(resource, TrackedState::Cancelled, ResourceEvent::Cancelled(resource))
    }

    /// Allows a resource id to be loaded again after it was unloaded.
    pub fn forget(&self, resource: ResourceId) {
        self.states.remove(&resource);
    }

    fn report(&self, resource: ResourceId, state: TrackedState, event: ResourceEvent) -> bool {
        match self.states.entry(resource) {
            Entry::Occupied(existing) => {
                warn!(
                    "{} already reported {:?}, ignoring {:?}",
                    resource,
                    existing.get(),
                    state
                );
                return false;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(state);
            }
        }

        debug!("{:?}", event);
        // receivers that hung up are dropped
        self.subscribers
            .lock()
            .expect("Tracker Subscribers Lock")
            .retain(|tx| tx.send(event).is_ok());
        true
    }
}
