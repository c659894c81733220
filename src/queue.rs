//! Pending task storage, one ordered list per queue name

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::task::{Task, TaskId};

/// Named queues of pending tasks.
///
/// Every queue is kept in ascending id order front to back. Admission
/// always carries a fresh maximum id, so `append` preserves the order;
/// redelivery goes through [`QueueStore::reinsert_sorted`].
#[derive(Debug, Default)]
pub struct QueueStore {
    queues: HashMap<String, VecDeque<Task>>,
}

impl QueueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly admitted task to the back of its queue
    pub fn append(&mut self, task: Task) {
        debug_assert!(
            self.max_id(&task.queue).map_or(true, |max| max < task.id),
            "appended task must carry the largest id of its queue"
        );
        self.queues
            .entry(task.queue.clone())
            .or_default()
            .push_back(task);
    }

    /// Take the oldest pending task, or `None` for an empty or unknown queue.
    /// A queue left empty is dropped from the store.
    pub fn pop_front(&mut self, queue: &str) -> Option<Task> {
        let pending = self.queues.get_mut(queue)?;
        let task = pending.pop_front();
        if pending.is_empty() {
            self.queues.remove(queue);
        }
        task
    }

    #[cfg(test)]
    fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Put a redelivered task back in front of the first task with a larger id
    pub fn reinsert_sorted(&mut self, task: Task) {
        let pending = self.queues.entry(task.queue.clone()).or_default();
        match pending.iter().position(|queued| queued.id > task.id) {
            Some(index) => pending.insert(index, task),
            None => pending.push_back(task),
        }
    }

    /// Is `id` pending in `queue`?
    pub fn contains(&self, queue: &str, id: TaskId) -> bool {
        self.queues
            .get(queue)
            .map_or(false, |pending| pending.binary_search_by_key(&id, |task| task.id).is_ok())
    }

    /// Largest pending id in `queue`
    pub fn max_id(&self, queue: &str) -> Option<TaskId> {
        self.queues.get(queue)?.back().map(|task| task.id)
    }

    /// Number of pending tasks in `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Copy of every non-empty queue, keyed by name
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Task>> {
        self.queues
            .iter()
            .filter(|(_, pending)| !pending.is_empty())
            .map(|(name, pending)| (name.clone(), pending.iter().cloned().collect()))
            .collect()
    }

    /// Replace the whole store with restored queues.
    ///
    /// Each queue is re-sorted by id and every task is filed under the queue
    /// it names, whatever key it was stored under.
    pub fn restore(&mut self, queues: BTreeMap<String, Vec<Task>>) {
        self.queues.clear();
        for task in queues.into_values().flatten() {
            self.queues.entry(task.queue.clone()).or_default().push_back(task);
        }
        for pending in self.queues.values_mut() {
            pending.make_contiguous().sort_by_key(|task| task.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(queue: &str, id: TaskId) -> Task {
        Task::new(queue, "1", b"x".to_vec(), id)
    }

    fn ids(store: &mut QueueStore, queue: &str) -> Vec<TaskId> {
        std::iter::from_fn(|| store.pop_front(queue))
            .map(|task| task.id)
            .collect()
    }

    #[test]
    fn pop_front_on_unknown_or_drained_queue_is_none() {
        let mut store = QueueStore::new();
        assert!(store.pop_front("missing").is_none());

        store.append(task("q", 0));
        assert_eq!(store.pop_front("q").map(|t| t.id), Some(0));
        assert!(store.pop_front("q").is_none());
    }

    #[test]
    fn drained_queue_is_forgotten() {
        let mut store = QueueStore::new();
        store.append(task("a", 0));
        store.append(task("b", 0));
        store.append(task("b", 1));

        store.pop_front("a");
        assert_eq!(store.queue_count(), 1);
        store.pop_front("b");
        assert_eq!(store.queue_count(), 1);
        store.pop_front("b");
        assert_eq!(store.queue_count(), 0);
        assert_eq!(store.max_id("b"), None);
    }

    #[test]
    fn reinsert_goes_before_first_larger_id() {
        let mut store = QueueStore::new();
        store.append(task("q", 1));
        store.append(task("q", 3));
        store.append(task("q", 4));

        store.reinsert_sorted(task("q", 2));
        store.reinsert_sorted(task("q", 0));
        store.reinsert_sorted(task("q", 7));

        assert_eq!(ids(&mut store, "q"), vec![0, 1, 2, 3, 4, 7]);
    }

    #[test]
    fn reinsert_into_empty_queue_appends() {
        let mut store = QueueStore::new();
        store.reinsert_sorted(task("fresh", 5));
        assert_eq!(store.max_id("fresh"), Some(5));
        assert_eq!(store.len("fresh"), 1);
    }

    #[test]
    fn contains_is_scoped_to_queue() {
        let mut store = QueueStore::new();
        store.append(task("a", 0));
        store.append(task("a", 1));

        assert!(store.contains("a", 1));
        assert!(!store.contains("a", 2));
        assert!(!store.contains("b", 0));
    }

    #[test]
    fn restore_sorts_and_regroups() {
        let mut queues = BTreeMap::new();
        queues.insert("a".to_string(), vec![task("a", 2), task("a", 0), task("b", 9)]);

        let mut store = QueueStore::new();
        store.append(task("stale", 0));
        store.restore(queues);

        assert_eq!(store.len("stale"), 0);
        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 1);
        assert!(store.contains("b", 9));
        assert_eq!(ids(&mut store, "a"), vec![0, 2]);
    }

    #[test]
    fn snapshot_skips_drained_queues() {
        let mut store = QueueStore::new();
        store.append(task("a", 0));
        store.append(task("b", 0));
        store.pop_front("b");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["a"], vec![task("a", 0)]);
    }
}
