//! The broker: queue store, lease table and redelivery timers behind one lock
//!
//! Every operation that reads and then writes broker state (admission,
//! pop-and-lease, acknowledgement, expiry) runs while holding the single
//! `state` mutex. Redelivery timers are tokio tasks that only sleep outside
//! the lock; the expiry itself happens under it and re-checks that the lease
//! it was armed for is still the current one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::allocator::allocate_id;
use crate::config::Config;
use crate::error::{BrokerError, BrokerResult};
use crate::lease::{Lease, LeaseTable};
use crate::persistence::{
    FileSnapshotStore, LeaseRecord, LeasesSnapshot, QueuesSnapshot, RestoreOutcome, Snapshot,
    SnapshotStore,
};
use crate::protocol::{Command, Response};
use crate::queue::QueueStore;
use crate::task::{LeaseId, Task, TaskId};

#[derive(Debug, Default)]
struct BrokerState {
    queues: QueueStore,
    leases: LeaseTable,
}

impl BrokerState {
    /// Return a timed-out task to its queue, unless the lease was acked or
    /// replaced in the meantime
    fn expire(&mut self, queue: &str, id: TaskId, lease_id: LeaseId) {
        match self.leases.remove_current(queue, id, lease_id) {
            Some(lease) => {
                self.queues.reinsert_sorted(lease.into_task());
                debug!(queue, id, %lease_id, "Lease expired, task redelivered");
            }
            None => {
                debug!(queue, id, %lease_id, "Redelivery timer fired for a finished lease");
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            queues: QueuesSnapshot {
                queues: self.queues.snapshot(),
            },
            leases: LeasesSnapshot {
                leases: self
                    .leases
                    .iter()
                    .map(|lease| LeaseRecord {
                        task: lease.task.clone(),
                        deadline: lease.deadline,
                    })
                    .collect(),
            },
        }
    }
}

/// Lease-based task broker.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Broker {
    state: Arc<Mutex<BrokerState>>,
    lease_timeout: Duration,
    store: Arc<dyn SnapshotStore>,
}

impl Broker {
    /// Create an empty broker
    pub fn new(lease_timeout: Duration, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            lease_timeout,
            store,
        }
    }

    /// Create an empty broker snapshotting to the configured file prefix
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.lease_timeout(),
            Arc::new(FileSnapshotStore::new(&config.path)),
        )
    }

    /// Run one decoded command
    pub async fn execute(&self, command: Command) -> Response {
        match command {
            Command::Add {
                queue,
                length,
                payload,
            } => Response::Id(self.add(queue, length, payload).await),
            Command::Get { queue } => match self.get(&queue).await {
                Some(task) => Response::Task(task),
                None => Response::Empty,
            },
            Command::Ack { queue, id } => Response::from_bool(self.ack(&queue, id).await),
            Command::In { queue, id } => Response::from_bool(self.contains(&queue, id).await),
            Command::Save => match self.save().await {
                Ok(()) => Response::Ok,
                Err(e) => {
                    error!("Failed to save snapshot: {}", e);
                    Response::SaveError
                }
            },
        }
    }

    /// Admit a task and return its id
    pub async fn add(
        &self,
        queue: impl Into<String>,
        length: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> TaskId {
        let queue = queue.into();
        let mut state = self.state.lock().await;
        let id = allocate_id(&state.queues, &state.leases, &queue);
        state.queues.append(Task::new(queue.as_str(), length, payload, id));

        debug!(queue = %queue, id, "Task added");
        id
    }

    /// Check out the oldest pending task of `queue` under a fresh lease
    pub async fn get(&self, queue: &str) -> Option<Task> {
        let mut state = self.state.lock().await;
        let task = state.queues.pop_front(queue)?;
        self.lease(&mut state, task.clone());
        Some(task)
    }

    /// Complete a leased task. `false` if no lease exists for `(queue, id)`.
    pub async fn ack(&self, queue: &str, id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        match state.leases.remove(queue, id) {
            Some(lease) => {
                let lease_id = lease.lease_id;
                lease.cancel();
                debug!(queue, id, %lease_id, "Task acknowledged");
                true
            }
            None => false,
        }
    }

    /// Is `id` alive in `queue`, either pending or leased?
    pub async fn contains(&self, queue: &str, id: TaskId) -> bool {
        let state = self.state.lock().await;
        state.queues.contains(queue, id) || state.leases.contains(queue, id)
    }

    /// Number of pending tasks in `queue`
    pub async fn pending_count(&self, queue: &str) -> usize {
        self.state.lock().await.queues.len(queue)
    }

    /// Number of leased tasks in `queue`
    pub async fn leased_count(&self, queue: &str) -> usize {
        self.state.lock().await.leases.len(queue)
    }

    /// Write a snapshot of the current state
    pub async fn save(&self) -> BrokerResult<()> {
        let snapshot = self.state.lock().await.snapshot();
        self.store.write(&snapshot).await?;

        info!(
            pending = snapshot.pending_count(),
            leased = snapshot.leased_count(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Load and consume a previously saved snapshot.
    ///
    /// Intended for startup, before any request is served: the current state
    /// is replaced. Restored leases get a fresh lease id and a full lease
    /// timeout. An unreadable snapshot is deleted and the broker stays empty;
    /// only an unrecoverable store failure is returned, with the snapshot
    /// left in place.
    pub async fn restore(&self) -> BrokerResult<RestoreOutcome> {
        let snapshot = match self.store.read().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(RestoreOutcome::Absent),
            Err(e) if e.is_recoverable() => return Ok(self.discard_snapshot(e).await),
            Err(e) => return Err(e),
        };
        if let Err(e) = snapshot.validate() {
            return Ok(self.discard_snapshot(e).await);
        }

        let pending = snapshot.pending_count();
        let leased = snapshot.leased_count();
        {
            let mut state = self.state.lock().await;
            state.leases.clear();
            state.queues.restore(snapshot.queues.queues);
            for record in snapshot.leases.leases {
                self.lease(&mut state, record.task);
            }
        }

        if let Err(e) = self.store.discard().await {
            warn!("Restored snapshot could not be deleted: {}", e);
        }
        info!(pending, leased, "Snapshot restored");
        Ok(RestoreOutcome::Restored { pending, leased })
    }

    async fn discard_snapshot(&self, reason: BrokerError) -> RestoreOutcome {
        warn!("Discarding unreadable snapshot, starting empty: {}", reason);
        if let Err(e) = self.store.discard().await {
            warn!("Failed to delete unreadable snapshot: {}", e);
        }
        RestoreOutcome::Discarded {
            reason: reason.to_string(),
        }
    }

    /// Record a lease for `task` and arm its redelivery timer.
    ///
    /// Takes the already-held guard so the lease and its timer appear
    /// atomically with whatever removed the task from its queue.
    fn lease(&self, state: &mut BrokerState, task: Task) {
        let lease_id = Uuid::new_v4();
        let timeout = self.lease_timeout;
        let timer = tokio::spawn(redeliver_after(
            Arc::clone(&self.state),
            task.queue.clone(),
            task.id,
            lease_id,
            timeout,
        ));

        debug!(queue = %task.queue, id = task.id, %lease_id, "Task leased");
        let lease = Lease::new(task, lease_id, deadline_after(timeout)).with_timer(timer);
        if let Some(displaced) = state.leases.insert(lease) {
            warn!(
                queue = %displaced.task.queue,
                id = displaced.task.id,
                "Replaced an existing lease for the same task"
            );
            displaced.cancel();
        }
    }
}

async fn redeliver_after(
    state: Arc<Mutex<BrokerState>>,
    queue: String,
    id: TaskId,
    lease_id: LeaseId,
    timeout: Duration,
) {
    sleep(timeout).await;
    state.lock().await.expire(&queue, id, lease_id);
}

fn deadline_after(timeout: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
