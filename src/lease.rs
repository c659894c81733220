//! Tasks checked out for processing

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::task::{LeaseId, Task, TaskId};

/// A checked-out task and its redelivery timer
#[derive(Debug)]
pub struct Lease {
    pub task: Task,
    pub lease_id: LeaseId,
    /// Wall-clock time at which the task goes back to its queue
    pub deadline: DateTime<Utc>,
    timer: Option<JoinHandle<()>>,
}

impl Lease {
    pub fn new(task: Task, lease_id: LeaseId, deadline: DateTime<Utc>) -> Self {
        Self {
            task,
            lease_id,
            deadline,
            timer: None,
        }
    }

    /// Attach the redelivery timer guarding this lease
    pub fn with_timer(mut self, timer: JoinHandle<()>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Stop the redelivery timer and give the task back
    pub fn cancel(mut self) -> Task {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.task
    }

    /// Give the task back from inside its own timer, leaving the timer running
    pub fn into_task(self) -> Task {
        self.task
    }
}

/// Leases keyed by `(queue, id)`.
///
/// Ids live in a `BTreeMap` per queue so the allocator can read the largest
/// leased id without scanning.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<String, BTreeMap<TaskId, Lease>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lease. Returns the lease it displaced, which only happens if
    /// a caller breaks the "pending xor leased" invariant.
    pub fn insert(&mut self, lease: Lease) -> Option<Lease> {
        self.leases
            .entry(lease.task.queue.clone())
            .or_default()
            .insert(lease.task.id, lease)
    }

    /// Remove the lease for `(queue, id)`, whichever checkout it belongs to
    pub fn remove(&mut self, queue: &str, id: TaskId) -> Option<Lease> {
        let per_queue = self.leases.get_mut(queue)?;
        let lease = per_queue.remove(&id);
        if per_queue.is_empty() {
            self.leases.remove(queue);
        }
        lease
    }

    /// Remove the lease for `(queue, id)` only if it is still checkout `lease_id`
    pub fn remove_current(&mut self, queue: &str, id: TaskId, lease_id: LeaseId) -> Option<Lease> {
        let current = self.leases.get(queue)?.get(&id)?;
        if current.lease_id != lease_id {
            return None;
        }
        self.remove(queue, id)
    }

    pub fn contains(&self, queue: &str, id: TaskId) -> bool {
        self.leases
            .get(queue)
            .map_or(false, |per_queue| per_queue.contains_key(&id))
    }

    /// Largest leased id in `queue`
    pub fn max_id(&self, queue: &str) -> Option<TaskId> {
        self.leases
            .get(queue)?
            .last_key_value()
            .map(|(id, _)| *id)
    }

    /// Number of leases held against `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.leases.get(queue).map_or(0, BTreeMap::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values().flat_map(BTreeMap::values)
    }

    /// Cancel every timer and empty the table
    pub fn clear(&mut self) {
        for (_, per_queue) in self.leases.drain() {
            for (_, lease) in per_queue {
                lease.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn lease(queue: &str, id: TaskId) -> Lease {
        Lease::new(Task::new(queue, "1", b"x".to_vec(), id), Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn remove_is_scoped_to_queue() {
        let mut table = LeaseTable::new();
        table.insert(lease("a", 0));

        assert!(table.remove("b", 0).is_none());
        assert!(table.contains("a", 0));
        assert!(table.remove("a", 0).is_some());
        assert!(table.remove("a", 0).is_none());
        assert_eq!(table.len("a"), 0);
    }

    #[test]
    fn remove_current_ignores_older_checkouts() {
        let mut table = LeaseTable::new();
        let held = lease("q", 3);
        let current = held.lease_id;
        table.insert(held);

        assert!(table.remove_current("q", 3, Uuid::new_v4()).is_none());
        assert!(table.contains("q", 3));
        assert!(table.remove_current("q", 3, current).is_some());
        assert!(!table.contains("q", 3));
    }

    #[test]
    fn max_id_tracks_largest_lease() {
        let mut table = LeaseTable::new();
        assert_eq!(table.max_id("q"), None);

        table.insert(lease("q", 4));
        table.insert(lease("q", 1));
        table.insert(lease("other", 10));
        assert_eq!(table.max_id("q"), Some(4));
        assert_eq!(table.len("q"), 2);

        table.remove("q", 4);
        assert_eq!(table.max_id("q"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_timer() {
        let (fired_tx, mut fired_rx) = tokio::sync::oneshot::channel::<()>();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = fired_tx.send(());
        });

        let task = lease("q", 0).with_timer(timer).cancel();
        assert_eq!(task.id, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired_rx.try_recv().is_err());
    }
}
