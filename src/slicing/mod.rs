//! Cooperative, frame-synchronised scheduling of resumable load operations.
//!
//! Every load operation is a [`TimeSlice`]: a manually resumable object that advances one step per
//! call and reports a [`Directive`] telling the [`TimeSlicer`] when it wants to be resumed. The slicer
//! is ticked once per rendered frame and resumes operations until they defer to a future tick or the
//! per-tick budget is spent. Nothing in here blocks: background work lives in the [`WorkerPool`] and
//! is polled via [`BackgroundTask`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, trace, warn};

mod background;
mod handle;

#[cfg(test)]
mod tests;

pub use background::{BackgroundTask, PollableTask, WorkerPool, poll_all};
pub use handle::{SliceHandle, SliceStatus};

use handle::SliceShared;

/// Upper bound of consecutive `Stall`s, a slice beyond this is considered stuck.
const MAX_STALLED_STEPS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Proceed with the next step right away if the tick budget allows it.
    Continue,
    /// Resume on the next tick, unconditionally.
    Defer,
    /// Throttle: resume only while the tick budget has not been exceeded.
    Hold,
    /// Waiting on a dependency. Resumed later, after deferred work.
    Wait,
    /// Polling a background task. Resume on the next tick.
    Delay,
    /// Run the next step synchronously now, ignoring the budget.
    Stall,
    /// Terminate now, the registered cleanup fires.
    Cancel,
    /// The operation finished.
    Complete,
}

/// A resumable operation driven by the [`TimeSlicer`].
pub trait TimeSlice: Send {
    fn name(&self) -> &str;

    /// Advances one step. An `Err` faults the slice, which ends it.
    fn step(&mut self) -> anyhow::Result<Directive>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Fresh,
    Continue,
    Defer,
    Delay,
    Wait,
    Hold,
}

impl Lane {
    fn priority(self) -> u8 {
        match self {
            Lane::Defer | Lane::Delay => 0,
            Lane::Fresh | Lane::Continue => 1,
            Lane::Wait => 2,
            Lane::Hold => 3,
        }
    }

    /// Throttled lanes don't resume once the budget of the current tick is spent.
    fn is_throttled(self) -> bool {
        !matches!(self, Lane::Defer | Lane::Delay)
    }
}

struct SliceEntry {
    shared: Arc<SliceShared>,
    slice: Box<dyn TimeSlice>,
    lane: Lane,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub frame: u64,
    pub steps: u32,
    pub completed: u32,
    pub cancelled: u32,
    pub faulted: u32,
    pub remaining: usize,
    pub over_budget: bool,
}

pub struct TimeSlicer {
    active: Mutex<Vec<SliceEntry>>,
    incoming: Mutex<Vec<SliceEntry>>,
    next_id: AtomicU64,
    frame: AtomicU64,
    budget: Duration,
}

impl TimeSlicer {
    pub fn new(budget: Duration) -> Self {
        Self {
            active: Mutex::new(Vec::new()),
            incoming: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            frame: AtomicU64::new(0),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Schedules `slice`, it first runs on the next tick.
    pub fn schedule<S: TimeSlice + 'static>(&self, slice: S) -> SliceHandle {
        self.enqueue(Box::new(slice), None)
    }

    /// Like [`TimeSlicer::schedule`], `cleanup` runs synchronously when the slice gets cancelled.
    pub fn schedule_with_cleanup<S, C>(&self, slice: S, cleanup: C) -> SliceHandle
    where
        S: TimeSlice + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(slice), Some(Box::new(cleanup)))
    }

    fn enqueue(&self, slice: Box<dyn TimeSlice>, cleanup: Option<Box<dyn FnOnce() + Send>>) -> SliceHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(SliceShared::new(id, slice.name().to_string(), cleanup));
        trace!("Scheduling slice '{}' ({})", shared.name, id);

        self.incoming
            .lock()
            .expect("Slicer Incoming Lock")
            .push(SliceEntry {
                shared: shared.clone(),
                slice,
                lane: Lane::Fresh,
            });
        SliceHandle::new(shared)
    }

    /// Number of slices that still have to run.
    pub fn pending(&self) -> usize {
        let active = self.active.lock().expect("Slicer Active Lock");
        let incoming = self.incoming.lock().expect("Slicer Incoming Lock");
        active
            .iter()
            .chain(incoming.iter())
            .filter(|entry| !entry.shared.status().is_terminal())
            .count()
    }

    pub fn tick(&self) -> TickReport {
        profiling::scope!("TimeSlicer::tick");
        let frame = self.frame.fetch_add(1, Ordering::AcqRel) + 1;
        let start = Instant::now();
        let mut report = TickReport {
            frame,
            ..Default::default()
        };

        let mut entries = std::mem::take(&mut *self.active.lock().expect("Slicer Active Lock"));
        entries.append(&mut self.incoming.lock().expect("Slicer Incoming Lock"));
        // stable, so slices of the same lane keep their scheduling order
        entries.sort_by_key(|entry| entry.lane.priority());

        // skipped entries go first next tick, so throttled slices take turns
        let mut keep = Vec::with_capacity(entries.len());
        let mut resumed = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if entry.shared.status().is_terminal() {
                report.cancelled += 1;
                continue;
            }

            // the first step of a tick always runs, so a tiny budget still makes progress
            if entry.lane.is_throttled() && report.steps > 0 && start.elapsed() >= self.budget {
                report.over_budget = true;
                keep.push(entry);
                continue;
            }

            if self.run_entry(&mut entry, start, &mut report) {
                resumed.push(entry);
            }
        }
        keep.append(&mut resumed);

        report.remaining = keep.len();
        self.active.lock().expect("Slicer Active Lock").append(&mut keep);
        report
    }

    /// Returns whether the entry has to be resumed on a later tick.
    fn run_entry(&self, entry: &mut SliceEntry, start: Instant, report: &mut TickReport) -> bool {
        let mut stalled = 0u32;
        loop {
            if entry.shared.status().is_terminal() {
                // cancelled from within its own step
                report.cancelled += 1;
                return false;
            }

            report.steps += 1;
            let directive = match entry.slice.step() {
                Ok(directive) => directive,
                Err(err) => {
                    error!("Slice '{}' faulted: {:?}", entry.shared.name, err);
                    entry.shared.finish(SliceStatus::Faulted);
                    report.faulted += 1;
                    return false;
                }
            };

            let lane = match directive {
                Directive::Complete => {
                    entry.shared.finish(SliceStatus::Completed);
                    report.completed += 1;
                    return false;
                }
                Directive::Cancel => {
                    entry.shared.cancel();
                    report.cancelled += 1;
                    return false;
                }
                Directive::Stall => {
                    stalled += 1;
                    if stalled > MAX_STALLED_STEPS {
                        warn!("Slice '{}' stalled {} times in a row", entry.shared.name, stalled);
                        Lane::Defer
                    } else {
                        continue;
                    }
                }
                Directive::Continue | Directive::Hold if start.elapsed() < self.budget => {
                    stalled = 0;
                    continue;
                }
                Directive::Continue => Lane::Continue,
                Directive::Hold => Lane::Hold,
                Directive::Defer => Lane::Defer,
                Directive::Delay => Lane::Delay,
                Directive::Wait => Lane::Wait,
            };

            entry.lane = lane;
            return true;
        }
    }

    /// Drops every remaining slice. Slices still running at this point were never closed by their
    /// owner and are reported as leaks.
    pub fn shutdown(&self) -> usize {
        let mut entries = std::mem::take(&mut *self.active.lock().expect("Slicer Active Lock"));
        entries.append(&mut self.incoming.lock().expect("Slicer Incoming Lock"));

        let mut leaked = 0;
        for entry in entries {
            if entry.shared.finish(SliceStatus::EmergencyShutdown) {
                error!(
                    "Slice '{}' ({}) was still running at shutdown",
                    entry.shared.name, entry.shared.id
                );
                leaked += 1;
            }
        }
        leaked
    }
}
