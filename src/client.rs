//! Client interface for talking to a running broker

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{BrokerError, BrokerResult};
use crate::protocol::Command;
use crate::task::TaskId;

/// A task as handed out by `GET`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredTask {
    pub id: TaskId,
    pub length: String,
    pub payload: Vec<u8>,
}

/// Client for a task broker.
///
/// The broker answers exactly one request per connection, so every call
/// opens a fresh TCP connection.
#[derive(Debug, Clone)]
pub struct TaskClient {
    addr: SocketAddr,
}

impl TaskClient {
    /// Create a client for the broker at `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Send a raw frame and return the raw response
    pub async fn send(&self, frame: &[u8]) -> BrokerResult<Vec<u8>> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(frame).await?;
        stream.shutdown().await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok(response)
    }

    async fn execute(&self, command: &Command) -> BrokerResult<Vec<u8>> {
        let response = self.send(&command.to_frame()).await?;
        debug!(
            command = command.name(),
            response = %String::from_utf8_lossy(&response),
            "Broker answered"
        );
        Ok(response)
    }

    /// Add a task to `queue`, declaring the payload's actual length
    pub async fn add(&self, queue: &str, payload: &[u8]) -> BrokerResult<TaskId> {
        let command = Command::Add {
            queue: queue.to_string(),
            length: payload.len().to_string(),
            payload: payload.to_vec(),
        };
        let response = self.execute(&command).await?;
        parse_id(&response).ok_or_else(|| BrokerError::unexpected_response(&response))
    }

    /// Lease the next task of `queue`, `None` when nothing is pending
    pub async fn get(&self, queue: &str) -> BrokerResult<Option<DeliveredTask>> {
        let command = Command::Get {
            queue: queue.to_string(),
        };
        let response = self.execute(&command).await?;
        if response == b"NONE" {
            return Ok(None);
        }
        parse_delivery(&response)
            .map(Some)
            .ok_or_else(|| BrokerError::unexpected_response(&response))
    }

    /// Acknowledge a leased task. `false` if the lease no longer exists.
    pub async fn ack(&self, queue: &str, id: TaskId) -> BrokerResult<bool> {
        let command = Command::Ack {
            queue: queue.to_string(),
            id,
        };
        let response = self.execute(&command).await?;
        parse_bool(&response)
    }

    /// Is the task pending or leased in `queue`?
    pub async fn contains(&self, queue: &str, id: TaskId) -> BrokerResult<bool> {
        let command = Command::In {
            queue: queue.to_string(),
            id,
        };
        let response = self.execute(&command).await?;
        parse_bool(&response)
    }

    /// Ask the broker to write a snapshot. `false` if the broker could not.
    pub async fn save(&self) -> BrokerResult<bool> {
        let response = self.execute(&Command::Save).await?;
        match response.as_slice() {
            b"OK" => Ok(true),
            b"SAVE ERROR" => Ok(false),
            _ => Err(BrokerError::unexpected_response(&response)),
        }
    }
}

fn parse_id(raw: &[u8]) -> Option<TaskId> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn parse_bool(raw: &[u8]) -> BrokerResult<bool> {
    match raw {
        b"YES" => Ok(true),
        b"NO" => Ok(false),
        _ => Err(BrokerError::unexpected_response(raw)),
    }
}

fn parse_delivery(raw: &[u8]) -> Option<DeliveredTask> {
    let mut fields = raw.splitn(3, |&b| b == b' ');
    let id = parse_id(fields.next()?)?;
    let length = std::str::from_utf8(fields.next()?).ok()?.to_string();
    let payload = fields.next()?.to_vec();
    Some(DeliveredTask {
        id,
        length,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_splits_on_first_two_spaces() {
        assert_eq!(
            parse_delivery(b"3 11 hello world"),
            Some(DeliveredTask {
                id: 3,
                length: "11".to_string(),
                payload: b"hello world".to_vec(),
            })
        );
        assert_eq!(parse_delivery(b"0 0 ").map(|t| t.payload), Some(Vec::new()));
        assert_eq!(parse_delivery(b"ERROR"), None);
    }

    #[test]
    fn bool_answers() {
        assert!(parse_bool(b"YES").unwrap());
        assert!(!parse_bool(b"NO").unwrap());
        assert!(matches!(
            parse_bool(b"ERROR"),
            Err(BrokerError::UnexpectedResponse { .. })
        ));
    }
}
