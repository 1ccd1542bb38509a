use log::trace;

use crate::slicing::{Directive, PollableTask, TimeSlice};

type Condition = Box<dyn Fn() -> bool + Send>;
type OnDrained = Box<dyn FnOnce() + Send>;

/// Keeps polling background work that outlived a cancelled load, so memory the native runtime
/// writes into stays alive until it is done. Runs `on_drained` afterwards.
pub struct DrainSlice {
    name: String,
    tasks: Vec<Box<dyn PollableTask + Send>>,
    conditions: Vec<Condition>,
    on_drained: Option<OnDrained>,
}

impl DrainSlice {
    pub fn new(name: String) -> Self {
        Self {
            name,
            tasks: vec![],
            conditions: vec![],
            on_drained: None,
        }
    }

    pub fn with_task(mut self, task: Box<dyn PollableTask + Send>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = Box<dyn PollableTask + Send>>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Additionally waits until `condition` holds.
    pub fn until(mut self, condition: impl Fn() -> bool + Send + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn on_drained(mut self, on_drained: impl FnOnce() + Send + 'static) -> Self {
        self.on_drained = Some(Box::new(on_drained));
        self
    }

    pub fn is_drained(&mut self) -> bool {
        // faults don't matter here, only that nothing runs anymore
        self.tasks.retain_mut(|task| !task.poll_finished());
        self.tasks.is_empty() && self.conditions.iter().all(|condition| condition())
    }
}

impl TimeSlice for DrainSlice {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> anyhow::Result<Directive> {
        if !self.is_drained() {
            return Ok(Directive::Delay);
        }

        trace!("{} drained", self.name);
        if let Some(on_drained) = self.on_drained.take() {
            on_drained();
        }
        Ok(Directive::Complete)
    }
}
