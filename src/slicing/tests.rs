use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::bail;

use super::*;

struct Scripted {
    script: VecDeque<Directive>,
    steps: Arc<AtomicU32>,
}

impl Scripted {
    fn new(script: &[Directive]) -> (Self, Arc<AtomicU32>) {
        let steps = Arc::new(AtomicU32::new(0));
        (
            Self {
                script: script.iter().copied().collect(),
                steps: steps.clone(),
            },
            steps,
        )
    }
}

impl TimeSlice for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.pop_front().unwrap_or(Directive::Complete))
    }
}

struct Failing;

impl TimeSlice for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        bail!("native copy returned garbage")
    }
}

fn generous() -> TimeSlicer {
    TimeSlicer::new(Duration::from_secs(10))
}

#[test_log::test]
fn defer_resumes_on_the_next_tick() {
    let slicer = generous();
    let (slice, steps) = Scripted::new(&[Directive::Continue, Directive::Defer, Directive::Delay]);
    let mut handle = slicer.schedule(slice);

    assert_eq!(steps.load(Ordering::SeqCst), 0, "nothing runs before the first tick");
    slicer.tick();
    assert_eq!(steps.load(Ordering::SeqCst), 2);
    assert!(handle.is_running());
    slicer.tick();
    assert_eq!(steps.load(Ordering::SeqCst), 3);
    let report = slicer.tick();
    assert_eq!(report.completed, 1);
    assert!(handle.is_completed());
    assert_eq!(slicer.pending(), 0);
    handle.clear();
}

#[test_log::test]
fn cancel_runs_cleanup_exactly_once() {
    let slicer = generous();
    let cleanups = Arc::new(AtomicU32::new(0));
    let counter = cleanups.clone();
    let (slice, steps) = Scripted::new(&[Directive::Wait; 8]);
    let handle = slicer.schedule_with_cleanup(slice, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    slicer.tick();
    assert!(handle.cancel());
    assert!(handle.cancel(), "second cancel is a successful no-op");
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(handle.is_cancelled());

    let report = slicer.tick();
    assert_eq!(report.cancelled, 1);
    assert_eq!(steps.load(Ordering::SeqCst), 1, "cancelled slices are not resumed");
    assert_eq!(slicer.pending(), 0);
}

#[test_log::test]
fn cancelling_a_completed_slice_is_a_no_op() {
    let slicer = generous();
    let cleanups = Arc::new(AtomicU32::new(0));
    let counter = cleanups.clone();
    let (slice, _) = Scripted::new(&[]);
    let handle = slicer.schedule_with_cleanup(slice, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    slicer.tick();
    assert!(handle.is_completed());
    assert!(handle.cancel());
    assert!(!handle.is_cancelled());
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
}

#[test_log::test]
fn slice_cancelling_itself_fires_cleanup() {
    let slicer = generous();
    let cleanups = Arc::new(AtomicU32::new(0));
    let counter = cleanups.clone();
    let (slice, _) = Scripted::new(&[Directive::Defer, Directive::Cancel]);
    let handle = slicer.schedule_with_cleanup(slice, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    slicer.tick();
    slicer.tick();
    assert!(handle.is_cancelled());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test_log::test]
fn errors_fault_the_slice() {
    let slicer = generous();
    let handle = slicer.schedule(Failing);
    let report = slicer.tick();

    assert_eq!(report.faulted, 1);
    assert!(handle.is_faulted());
    assert!(handle.is_completed(), "a faulted slice is terminal");
}

#[test_log::test]
fn dropping_a_running_handle_shuts_the_slice_down() {
    let slicer = generous();
    let (slice, steps) = Scripted::new(&[Directive::Wait; 8]);
    let handle = slicer.schedule(slice);
    slicer.tick();

    drop(handle);
    slicer.tick();
    assert_eq!(steps.load(Ordering::SeqCst), 1);
    assert_eq!(slicer.pending(), 0);
}

#[test_log::test]
fn exhausted_budget_throttles_to_one_step_per_tick() {
    let slicer = TimeSlicer::new(Duration::ZERO);
    let (first, first_steps) = Scripted::new(&[Directive::Hold; 4]);
    let (second, second_steps) = Scripted::new(&[Directive::Hold; 4]);
    let first = slicer.schedule(first);
    let second = slicer.schedule(second);

    let report = slicer.tick();
    assert!(report.over_budget);
    assert_eq!(report.steps, 1);
    assert_eq!(first_steps.load(Ordering::SeqCst), 1);
    assert_eq!(second_steps.load(Ordering::SeqCst), 0);

    for _ in 0..16 {
        slicer.tick();
    }
    assert!(first.is_completed());
    assert!(second.is_completed());
}

#[test_log::test]
fn stall_ignores_the_budget() {
    let slicer = TimeSlicer::new(Duration::ZERO);
    let (slice, steps) = Scripted::new(&[Directive::Stall, Directive::Stall, Directive::Defer]);
    let handle = slicer.schedule(slice);

    slicer.tick();
    assert_eq!(steps.load(Ordering::SeqCst), 3);
    assert!(handle.is_running());
    slicer.tick();
    assert!(handle.is_completed());
}

#[test_log::test]
fn shutdown_reports_running_slices() {
    let slicer = generous();
    let (slice, _) = Scripted::new(&[Directive::Wait; 8]);
    let handle = slicer.schedule(slice);
    slicer.tick();

    assert_eq!(slicer.shutdown(), 1);
    assert_eq!(handle.status(), Some(SliceStatus::EmergencyShutdown));
}

#[test_log::test]
fn background_tasks_are_polled_not_awaited() {
    let pool = WorkerPool::new(2).expect("worker pool");
    let mut ok = pool.spawn("sum", || Ok((1..=10u32).sum::<u32>()));
    let mut failing = pool.spawn::<u32, _>("fail", || bail!("no data"));
    let mut panicking = pool.spawn::<u32, _>("panic", || panic!("boom"));

    let mut polls = 0;
    while !(ok.poll() && failing.poll() && panicking.poll()) {
        polls += 1;
        assert!(polls < 10_000, "background tasks never finished");
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(!ok.is_faulted());
    assert_eq!(ok.take().expect("finished").expect("succeeded"), 55);
    assert!(ok.take().is_none(), "results are handed out once");
    assert!(failing.is_faulted());
    assert!(panicking.is_faulted());
    pool.shutdown(Duration::from_secs(1));
}

#[test_log::test]
fn repeated_polls_keep_the_result() {
    let pool = WorkerPool::new(1).expect("worker pool");
    let mut task = pool.spawn("seven", || Ok(7u32));

    let mut polls = 0;
    while !task.poll() {
        polls += 1;
        assert!(polls < 10_000, "background task never finished");
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(task.poll());
    assert!(task.is_finished());
    assert!(!task.is_faulted());
    assert_eq!(poll_all([&mut task as &mut dyn PollableTask]), Some(true));
    assert_eq!(task.take_result().expect("kept"), 7);
    pool.shutdown(Duration::from_secs(1));
}
