//! Cancellable scheduled tasks
//!
//! A generational arena of deadline-tagged tasks. Freeing a slot bumps its
//! generation, so a key held by a cancelled or already-run task can never
//! touch whatever reuses the slot later. Callers drive it by passing the
//! current instant to `take_due`.

use tokio::time::Instant;

/// Handle to a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Entry<T> {
    deadline: Instant,
    seq: u64,
    task: T,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    entry: Option<Entry<T>>,
}

#[derive(Debug)]
pub struct ScheduledTasks<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    seq: u64,
}

impl<T> Default for ScheduledTasks<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            seq: 0,
        }
    }
}

impl<T> ScheduledTasks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Instant, task: T) -> TaskKey {
        self.seq += 1;
        let entry = Entry {
            deadline,
            seq: self.seq,
            task,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                self.slots.len() - 1
            }
        };

        TaskKey {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Cancel a task. Stale keys are ignored.
    pub fn cancel(&mut self, key: TaskKey) -> Option<T> {
        let slot = self.slots.get(key.index)?;
        if slot.generation != key.generation || slot.entry.is_none() {
            return None;
        }
        self.release(key.index).map(|entry| entry.task)
    }

    pub fn is_scheduled(&self, key: TaskKey) -> bool {
        self.slots
            .get(key.index)
            .is_some_and(|slot| slot.generation == key.generation && slot.entry.is_some())
    }

    /// Remove and return every task whose deadline is at or before `now`,
    /// earliest first (ties in scheduling order).
    pub fn take_due(&mut self, now: Instant) -> Vec<T> {
        let mut due: Vec<(Instant, u64, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry
                    .as_ref()
                    .filter(|entry| entry.deadline <= now)
                    .map(|entry| (entry.deadline, entry.seq, index))
            })
            .collect();
        due.sort_unstable_by_key(|&(deadline, seq, _)| (deadline, seq));

        due.into_iter()
            .filter_map(|(_, _, index)| self.release(index).map(|entry| entry.task))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|entry| entry.deadline))
            .min()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every scheduled task, invalidating all outstanding keys
    pub fn clear(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].entry.is_some() {
                self.release(index);
            }
        }
    }

    fn release(&mut self, index: usize) -> Option<Entry<T>> {
        let slot = &mut self.slots[index];
        let entry = slot.entry.take()?;
        slot.generation += 1;
        self.free.push(index);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_take_due_in_deadline_order() {
        let start = Instant::now();
        let mut tasks = ScheduledTasks::new();
        tasks.schedule(start + Duration::from_millis(30), "c");
        tasks.schedule(start + Duration::from_millis(10), "a");
        tasks.schedule(start + Duration::from_millis(10), "b");
        tasks.schedule(start + Duration::from_millis(90), "later");

        assert_eq!(tasks.take_due(start + Duration::from_millis(50)), vec!["a", "b", "c"]);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks.next_deadline(), Some(start + Duration::from_millis(90)));
    }

    #[test]
    fn test_stale_key_cannot_cancel_reused_slot() {
        let now = Instant::now();
        let mut tasks = ScheduledTasks::new();
        let old = tasks.schedule(now, 1);
        assert_eq!(tasks.cancel(old), Some(1));

        let fresh = tasks.schedule(now, 2);
        assert!(!tasks.is_scheduled(old));
        assert_eq!(tasks.cancel(old), None);
        assert!(tasks.is_scheduled(fresh));
        assert_eq!(tasks.take_due(now), vec![2]);
    }

    #[test]
    fn test_clear_invalidates_keys() {
        let now = Instant::now();
        let mut tasks = ScheduledTasks::new();
        let key = tasks.schedule(now, ());
        tasks.clear();
        assert!(tasks.is_empty());
        assert!(!tasks.is_scheduled(key));
        assert!(tasks.take_due(now).is_empty());
    }
}
