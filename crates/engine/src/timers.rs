//! Deadline-driven timers polled from the host event loop.

use std::time::{Duration, Instant};

/// Coalesces bursts of triggers: fires once, `window` after the last trigger.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True exactly once when the window has elapsed since the last trigger.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Scheduled<T> {
    at: Instant,
    generation: u64,
    task: T,
}

/// Scheduled tasks tagged with a generation.
///
/// [`TaskQueue::supersede`] starts a new generation and drops every task of
/// older ones, so a replaced chain can never fire.
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
    generation: u64,
    tasks: Vec<Scheduled<T>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            tasks: Vec::new(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supersede(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.tasks.retain(|t| t.generation == generation);
        generation
    }

    pub fn schedule(&mut self, at: Instant, task: T) {
        self.tasks.push(Scheduled {
            at,
            generation: self.generation,
            task,
        });
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|t| t.at).min()
    }

    /// Removes and returns due tasks of the current generation, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<T> {
        let generation = self.generation;
        let mut due = Vec::new();
        let mut pending = Vec::with_capacity(self.tasks.len());
        for scheduled in self.tasks.drain(..) {
            if scheduled.generation != generation {
                continue;
            }
            if scheduled.at <= now {
                due.push(scheduled);
            } else {
                pending.push(scheduled);
            }
        }
        self.tasks = pending;
        due.sort_by_key(|s| s.at);
        due.into_iter().map(|s| s.task).collect()
    }
}

/// Earliest of two optional deadlines.
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
