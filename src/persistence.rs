//! Snapshot export/import of broker state
//!
//! A snapshot is two artifacts written on demand by `SAVE` and consumed once
//! at startup. It is a point-in-time checkpoint, not a log: anything that
//! happens after the last `SAVE` is lost on restart.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::task::Task;

/// Suffix of the pending-queues artifact
pub const QUEUES_SUFFIX: &str = "_tasks_queues";
/// Suffix of the in-processing (leased) artifact
pub const LEASES_SUFFIX: &str = "_tasks_in_processing";
/// Appended to an artifact path while it is being written
const STAGING_SUFFIX: &str = ".tmp";

/// Pending tasks, grouped by queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuesSnapshot {
    pub queues: BTreeMap<String, Vec<Task>>,
}

/// One leased task as it stood at save time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub task: Task,
    pub deadline: DateTime<Utc>,
}

/// Leased tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeasesSnapshot {
    pub leases: Vec<LeaseRecord>,
}

/// Full broker state at the instant of a `SAVE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub queues: QueuesSnapshot,
    pub leases: LeasesSnapshot,
}

impl Snapshot {
    pub fn pending_count(&self) -> usize {
        self.queues.queues.values().map(Vec::len).sum()
    }

    pub fn leased_count(&self) -> usize {
        self.leases.leases.len()
    }

    /// Reject snapshots that hold the same `(queue, id)` twice, whether in
    /// one store or across both
    pub fn validate(&self) -> BrokerResult<()> {
        let mut seen = HashSet::new();
        let pending = self.queues.queues.values().flatten();
        let leased = self.leases.leases.iter().map(|record| &record.task);
        for task in pending.chain(leased) {
            if !seen.insert((task.queue.as_str(), task.id)) {
                return Err(BrokerError::snapshot(
                    "restore",
                    format!("task {} of queue {:?} appears twice", task.id, task.queue),
                ));
            }
        }
        Ok(())
    }
}

/// What happened to a snapshot at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// State was loaded and the snapshot consumed
    Restored { pending: usize, leased: usize },
    /// No snapshot present
    Absent,
    /// Snapshot was unreadable and has been deleted
    Discarded { reason: String },
}

/// Storage backend for snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot, replacing any previous one
    async fn write(&self, snapshot: &Snapshot) -> BrokerResult<()>;

    /// Load the stored snapshot, `None` if nothing was saved
    async fn read(&self) -> BrokerResult<Option<Snapshot>>;

    /// Delete the stored snapshot, if any
    async fn discard(&self) -> BrokerResult<()>;
}

/// Snapshot kept as two JSON files next to each other.
///
/// Paths are the configured prefix with a fixed suffix appended as plain
/// text, so a prefix of `./` yields `./_tasks_queues`. Both files are
/// staged next to their final paths and renamed into place only once both
/// were written, so a failed save leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    queues_path: PathBuf,
    leases_path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            queues_path: PathBuf::from(format!("{prefix}{QUEUES_SUFFIX}")),
            leases_path: PathBuf::from(format!("{prefix}{LEASES_SUFFIX}")),
        }
    }

    pub fn queues_path(&self) -> &Path {
        &self.queues_path
    }

    pub fn leases_path(&self) -> &Path {
        &self.leases_path
    }

    async fn remove_staged(staged: &[&Path]) {
        for path in staged {
            if let Err(e) = Self::remove_optional(path).await {
                warn!(path = %path.display(), "Failed to remove staged snapshot file: {}", e);
            }
        }
    }

    async fn read_optional(path: &Path) -> BrokerResult<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_optional(path: &Path) -> BrokerResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write(&self, snapshot: &Snapshot) -> BrokerResult<()> {
        let queues = serde_json::to_vec(&snapshot.queues)?;
        let leases = serde_json::to_vec(&snapshot.leases)?;

        let queues_staged = staging_path(&self.queues_path);
        let leases_staged = staging_path(&self.leases_path);
        let staged = [queues_staged.as_path(), leases_staged.as_path()];

        let written = async {
            tokio::fs::write(&queues_staged, queues).await?;
            tokio::fs::write(&leases_staged, leases).await
        }
        .await;
        if let Err(e) = written {
            Self::remove_staged(&staged).await;
            return Err(e.into());
        }

        tokio::fs::rename(&queues_staged, &self.queues_path).await?;
        tokio::fs::rename(&leases_staged, &self.leases_path).await?;

        debug!(
            queues_path = %self.queues_path.display(),
            leases_path = %self.leases_path.display(),
            "Wrote snapshot files"
        );
        Ok(())
    }

    async fn read(&self) -> BrokerResult<Option<Snapshot>> {
        let queues = Self::read_optional(&self.queues_path).await?;
        let leases = Self::read_optional(&self.leases_path).await?;

        let (queues, leases) = match (queues, leases) {
            (None, None) => return Ok(None),
            (Some(queues), Some(leases)) => (queues, leases),
            (Some(_), None) => {
                return Err(BrokerError::snapshot(
                    "read",
                    format!("{} is missing", self.leases_path.display()),
                ))
            }
            (None, Some(_)) => {
                return Err(BrokerError::snapshot(
                    "read",
                    format!("{} is missing", self.queues_path.display()),
                ))
            }
        };

        Ok(Some(Snapshot {
            queues: serde_json::from_slice(&queues)?,
            leases: serde_json::from_slice(&leases)?,
        }))
    }

    async fn discard(&self) -> BrokerResult<()> {
        let queues = Self::remove_optional(&self.queues_path).await;
        let leases = Self::remove_optional(&self.leases_path).await;
        queues.and(leases)
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(STAGING_SUFFIX);
    PathBuf::from(staged)
}
