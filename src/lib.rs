//! # Task Broker
//!
//! A lease-based task queue served over TCP.
//!
//! ## Features
//!
//! - Named FIFO queues of opaque payloads
//! - Leased delivery with automatic redelivery on timeout
//! - Explicit acknowledgement
//! - Snapshot and restore across restarts
//! - Space-separated text protocol, one request and one response per connection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use task_broker::{Broker, BrokerServer, FileSnapshotStore, TaskClient};
//!
//! # async fn run() -> task_broker::BrokerResult<()> {
//! let broker = Broker::new(
//!     Duration::from_secs(5),
//!     Arc::new(FileSnapshotStore::new("./broker")),
//! );
//! let server = BrokerServer::bind("127.0.0.1:5555".parse().unwrap(), broker).await?;
//! let client = TaskClient::new(server.local_addr()?);
//! tokio::spawn(server.run());
//!
//! let id = client.add("emails", b"send welcome").await?;
//! if let Some(task) = client.get("emails").await? {
//!     client.ack("emails", task.id).await?;
//! }
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod lease;
pub mod persistence;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod task;

// Re-export commonly used types
pub use broker::Broker;
pub use client::{DeliveredTask, TaskClient};
pub use config::Config;
pub use error::{BrokerError, BrokerResult};
pub use persistence::{FileSnapshotStore, RestoreOutcome, SnapshotStore};
pub use protocol::{Command, Response};
pub use server::BrokerServer;
pub use task::{LeaseId, Task, TaskId};

/// Version of the task broker library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
