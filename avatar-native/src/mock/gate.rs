use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// Holds background copies inside the runtime until it is opened again, to observe loads mid-flight.
pub struct CopyGate {
    open: Mutex<bool>,
    cond: Condvar,
    waiting: AtomicUsize,
}

impl CopyGate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cond: Condvar::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn close(&self) {
        *self.open.lock().expect("Copy Gate Lock") = false;
    }

    pub fn open(&self) {
        *self.open.lock().expect("Copy Gate Lock") = true;
        self.cond.notify_all();
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn pass(&self) {
        let mut open = self.open.lock().expect("Copy Gate Lock");
        if *open {
            return;
        }

        self.waiting.fetch_add(1, Ordering::AcqRel);
        while !*open {
            open = self.cond.wait(open).expect("Copy Gate Wait");
        }
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for CopyGate {
    fn default() -> Self {
        Self::new()
    }
}
