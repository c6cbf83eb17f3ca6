//! Cooperative task table keyed by next-due time.
//!
//! The device loop asks for the earliest deadline, sleeps until then or
//! until input arrives, and pops whatever is due. Each task has at most one
//! pending entry; scheduling it again replaces the old deadline.

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TaskTable<T> {
    entries: Vec<(T, Instant)>,
}

impl<T> Default for TaskTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Copy + PartialEq> TaskTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` at `at`, replacing any pending entry for it.
    pub fn schedule(&mut self, task: T, at: Instant) {
        match self.entries.iter_mut().find(|(t, _)| *t == task) {
            Some(entry) => entry.1 = at,
            None => self.entries.push((task, at)),
        }
    }

    /// Schedule `task` no later than `at`; an earlier pending entry is kept.
    pub fn schedule_by(&mut self, task: T, at: Instant) {
        match self.due_at(task) {
            Some(existing) if existing <= at => {}
            _ => self.schedule(task, at),
        }
    }

    pub fn cancel(&mut self, task: T) {
        self.entries.retain(|(t, _)| *t != task);
    }

    pub fn due_at(&self, task: T) -> Option<Instant> {
        self.entries
            .iter()
            .find(|(t, _)| *t == task)
            .map(|(_, at)| *at)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, at)| *at).min()
    }

    /// Remove and return the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (_, at))| *at <= now)
            .min_by_key(|(_, (_, at))| *at)
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(index).0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Task {
        A,
        B,
    }

    #[test]
    fn test_pop_in_deadline_order() {
        let t0 = Instant::now();
        let mut table = TaskTable::new();
        table.schedule(Task::A, t0 + Duration::from_secs(2));
        table.schedule(Task::B, t0 + Duration::from_secs(1));

        assert_eq!(table.pop_due(t0), None);
        assert_eq!(table.next_deadline(), Some(t0 + Duration::from_secs(1)));

        let later = t0 + Duration::from_secs(5);
        assert_eq!(table.pop_due(later), Some(Task::B));
        assert_eq!(table.pop_due(later), Some(Task::A));
        assert!(table.is_empty());
    }

    #[test]
    fn test_reschedule_replaces() {
        let t0 = Instant::now();
        let mut table = TaskTable::new();
        table.schedule(Task::A, t0 + Duration::from_secs(10));
        table.schedule(Task::A, t0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.pop_due(t0), Some(Task::A));
    }

    #[test]
    fn test_schedule_by_keeps_earlier() {
        let t0 = Instant::now();
        let mut table = TaskTable::new();
        table.schedule(Task::A, t0);
        table.schedule_by(Task::A, t0 + Duration::from_secs(3));
        assert_eq!(table.due_at(Task::A), Some(t0));

        table.schedule_by(Task::B, t0 + Duration::from_secs(3));
        table.schedule_by(Task::B, t0 + Duration::from_secs(1));
        assert_eq!(table.due_at(Task::B), Some(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_cancel() {
        let t0 = Instant::now();
        let mut table = TaskTable::new();
        table.schedule(Task::A, t0);
        table.cancel(Task::A);
        assert_eq!(table.pop_due(t0), None);
        assert_eq!(table.next_deadline(), None);
    }
}
