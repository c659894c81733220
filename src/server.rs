//! TCP front end: one request and one response per connection
//!
//! Connections are served strictly one after another. The next connection
//! is accepted only once the previous response has been written and the
//! socket closed; redelivery timers keep running in the background.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::error::BrokerResult;
use crate::persistence::RestoreOutcome;
use crate::protocol::{route, Response};

/// Largest request frame read from a single connection
pub const MAX_FRAME_LEN: usize = 1_000_000;

/// Pause after a failed `accept` so a persistent failure does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The broker's TCP server
pub struct BrokerServer {
    listener: TcpListener,
    broker: Broker,
}

impl BrokerServer {
    /// Bind the listening socket. Failing here is the one fatal startup error.
    pub async fn bind(addr: SocketAddr, broker: Broker) -> BrokerResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Task broker listening on {}", listener.local_addr()?);
        Ok(Self { listener, broker })
    }

    /// Bind the listening socket, then load the saved snapshot.
    ///
    /// The snapshot is consumed only once the socket is bound, so a failed
    /// bind leaves the snapshot files untouched for the next start.
    pub async fn bind_and_restore(
        addr: SocketAddr,
        broker: Broker,
    ) -> BrokerResult<(Self, RestoreOutcome)> {
        let server = Self::bind(addr, broker).await?;
        let outcome = server.broker.restore().await?;
        Ok((server, outcome))
    }

    pub fn local_addr(&self) -> BrokerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections forever
    pub async fn run(self) -> BrokerResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> BrokerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Task broker shutting down");
                    return Ok(());
                }
                served = self.serve_next() => {
                    if let Err(e) = served {
                        if !e.is_recoverable() {
                            error!("Task broker stopping: {}", e);
                            return Err(e);
                        }
                        warn!("Request not served: {}", e);
                    }
                }
            }
        }
    }

    /// Accept one connection and serve it to completion
    async fn serve_next(&self) -> BrokerResult<()> {
        let (mut socket, peer) = match self.listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                sleep(ACCEPT_BACKOFF).await;
                return Err(e.into());
            }
        };

        let response = handle_connection(&mut socket, &self.broker).await?;
        debug!(%peer, %response, "Request served");
        Ok(())
    }
}

/// Read one request frame from `stream`, answer it and close the write side.
///
/// Whatever a single read returns is the frame; an empty read still gets
/// an `ERROR` response.
pub async fn handle_connection<S>(stream: &mut S, broker: &Broker) -> BrokerResult<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frame = BytesMut::with_capacity(MAX_FRAME_LEN);
    let read = stream.read_buf(&mut frame).await?;
    debug!(bytes = read, "Request received");

    let response = route(broker, &frame).await;
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{FileSnapshotStore, QueuesSnapshot, Snapshot, SnapshotStore};
    use crate::task::Task;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio_test::io::Builder;

    async fn saved_store(dir: &tempfile::TempDir) -> FileSnapshotStore {
        let store = FileSnapshotStore::new(dir.path().join("broker").to_string_lossy());
        let mut queues = BTreeMap::new();
        queues.insert("q".to_string(), vec![Task::new("q", "1", b"x".to_vec(), 0)]);
        let snapshot = Snapshot {
            queues: QueuesSnapshot { queues },
            ..Default::default()
        };
        store.write(&snapshot).await.unwrap();
        store
    }

    fn broker() -> Broker {
        Broker::new(
            Duration::from_secs(5),
            Arc::new(FileSnapshotStore::new("/nonexistent/dir/broker")),
        )
    }

    #[tokio::test]
    async fn serves_one_request_per_stream() {
        let broker = broker();

        let mut add = Builder::new().read(b"ADD q 5 ab de").write(b"0").build();
        assert_eq!(handle_connection(&mut add, &broker).await.unwrap(), Response::Id(0));

        let mut get = Builder::new().read(b"GET q").write(b"0 5 ab de").build();
        handle_connection(&mut get, &broker).await.unwrap();

        let mut ack = Builder::new().read(b"ACK q 0").write(b"YES").build();
        handle_connection(&mut ack, &broker).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_command_answers_error() {
        let broker = broker();
        let mut stream = Builder::new().read(b"ADDD 1 5 12345").write(b"ERROR").build();
        assert_eq!(
            handle_connection(&mut stream, &broker).await.unwrap(),
            Response::Error
        );
        assert_eq!(broker.pending_count("1").await, 0);
    }

    #[tokio::test]
    async fn unwritable_snapshot_answers_save_error() {
        let broker = broker();
        let mut stream = Builder::new().read(b"SAVE").write(b"SAVE ERROR").build();
        assert_eq!(
            handle_connection(&mut stream, &broker).await.unwrap(),
            Response::SaveError
        );
    }

    #[tokio::test]
    async fn failed_bind_leaves_snapshot_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(&dir).await;
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let broker = Broker::new(Duration::from_secs(5), Arc::new(store.clone()));
        assert!(BrokerServer::bind_and_restore(addr, broker.clone()).await.is_err());

        assert!(store.queues_path().exists());
        assert!(store.leases_path().exists());
        assert_eq!(broker.pending_count("q").await, 0);
    }

    #[tokio::test]
    async fn snapshot_is_restored_once_bound() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(&dir).await;

        let broker = Broker::new(Duration::from_secs(5), Arc::new(store.clone()));
        let (server, outcome) =
            BrokerServer::bind_and_restore("127.0.0.1:0".parse().unwrap(), broker.clone())
                .await
                .unwrap();

        assert!(server.local_addr().is_ok());
        assert_eq!(
            outcome,
            RestoreOutcome::Restored {
                pending: 1,
                leased: 0
            }
        );
        assert!(!store.queues_path().exists());
        assert_eq!(broker.pending_count("q").await, 1);
    }
}
