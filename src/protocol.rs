//! Request/response framing
//!
//! A request frame is `COMMAND [ARG]*`, fields separated by single spaces.
//! Each command has a fixed arity and its last argument takes the rest of
//! the frame, spaces included, so `ADD` payloads may contain spaces.
//! Nothing is trimmed: a trailing newline belongs to the last argument.

use std::fmt;

use tracing::debug;

use crate::broker::Broker;
use crate::error::{BrokerError, BrokerResult};
use crate::task::{Task, TaskId};

const SPACE: u8 = b' ';

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ADD <queue> <length> <payload>`
    Add {
        queue: String,
        length: String,
        payload: Vec<u8>,
    },
    /// `GET <queue>`
    Get { queue: String },
    /// `ACK <queue> <id>`
    Ack { queue: String, id: TaskId },
    /// `IN <queue> <id>`
    In { queue: String, id: TaskId },
    /// `SAVE`
    Save,
}

impl Command {
    /// Decode one request frame
    pub fn parse(frame: &[u8]) -> BrokerResult<Self> {
        let (name, rest) = match frame.iter().position(|&b| b == SPACE) {
            Some(index) => (&frame[..index], Some(&frame[index + 1..])),
            None => (frame, None),
        };

        match name {
            b"ADD" => {
                let [queue, length, payload] = arguments::<3>(name, rest)?;
                Ok(Command::Add {
                    queue: queue_name(queue)?,
                    length: declared_length(length)?,
                    payload: payload.to_vec(),
                })
            }
            b"GET" => {
                let [queue] = arguments::<1>(name, rest)?;
                Ok(Command::Get {
                    queue: queue_name(queue)?,
                })
            }
            b"ACK" => {
                let [queue, id] = arguments::<2>(name, rest)?;
                Ok(Command::Ack {
                    queue: queue_name(queue)?,
                    id: task_id(id)?,
                })
            }
            b"IN" => {
                let [queue, id] = arguments::<2>(name, rest)?;
                Ok(Command::In {
                    queue: queue_name(queue)?,
                    id: task_id(id)?,
                })
            }
            b"SAVE" => match rest {
                None => Ok(Command::Save),
                Some(_) => Err(BrokerError::protocol("SAVE takes no arguments")),
            },
            _ => Err(BrokerError::protocol(format!(
                "unknown command {:?}",
                String::from_utf8_lossy(name)
            ))),
        }
    }

    /// Command name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Command::Add { .. } => "ADD",
            Command::Get { .. } => "GET",
            Command::Ack { .. } => "ACK",
            Command::In { .. } => "IN",
            Command::Save => "SAVE",
        }
    }

    /// Encode back into a request frame
    pub fn to_frame(&self) -> Vec<u8> {
        match self {
            Command::Add {
                queue,
                length,
                payload,
            } => {
                let mut frame = format!("ADD {queue} {length} ").into_bytes();
                frame.extend_from_slice(payload);
                frame
            }
            Command::Get { queue } => format!("GET {queue}").into_bytes(),
            Command::Ack { queue, id } => format!("ACK {queue} {id}").into_bytes(),
            Command::In { queue, id } => format!("IN {queue} {id}").into_bytes(),
            Command::Save => b"SAVE".to_vec(),
        }
    }
}

/// Split `rest` into exactly `N` arguments, the last one greedy
fn arguments<'a, const N: usize>(name: &[u8], rest: Option<&'a [u8]>) -> BrokerResult<[&'a [u8]; N]> {
    let wrong_arity = || {
        BrokerError::protocol(format!(
            "{} takes {} argument(s)",
            String::from_utf8_lossy(name),
            N
        ))
    };

    let rest = rest.ok_or_else(wrong_arity)?;
    let mut args = [&rest[..0]; N];
    let mut pieces = rest.splitn(N, |&b| b == SPACE);
    for slot in args.iter_mut() {
        *slot = pieces.next().ok_or_else(wrong_arity)?;
    }
    Ok(args)
}

fn queue_name(raw: &[u8]) -> BrokerResult<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| BrokerError::protocol("queue name is not valid UTF-8"))
}

fn declared_length(raw: &[u8]) -> BrokerResult<String> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return Err(BrokerError::protocol(format!(
            "invalid length {:?}",
            String::from_utf8_lossy(raw)
        )));
    }
    Ok(String::from_utf8_lossy(raw).into_owned())
}

fn task_id(raw: &[u8]) -> BrokerResult<TaskId> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            BrokerError::protocol(format!("invalid task id {:?}", String::from_utf8_lossy(raw)))
        })
}

/// A response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Id of an added task
    Id(TaskId),
    /// Task handed out by `GET`
    Task(Task),
    /// `NONE`: nothing pending
    Empty,
    Yes,
    No,
    Ok,
    SaveError,
    /// Frame was not a valid command
    Error,
}

impl Response {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Response::Yes
        } else {
            Response::No
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Id(id) => id.to_string().into_bytes(),
            Response::Task(task) => task.delivery_frame(),
            Response::Empty => b"NONE".to_vec(),
            Response::Yes => b"YES".to_vec(),
            Response::No => b"NO".to_vec(),
            Response::Ok => b"OK".to_vec(),
            Response::SaveError => b"SAVE ERROR".to_vec(),
            Response::Error => b"ERROR".to_vec(),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Id(id) => write!(f, "id {id}"),
            Response::Task(task) => write!(f, "task {} of {:?}", task.id, task.queue),
            Response::Empty => f.write_str("NONE"),
            Response::Yes => f.write_str("YES"),
            Response::No => f.write_str("NO"),
            Response::Ok => f.write_str("OK"),
            Response::SaveError => f.write_str("SAVE ERROR"),
            Response::Error => f.write_str("ERROR"),
        }
    }
}

/// Decode `frame`, run it against `broker` and produce the response.
///
/// Undecodable frames answer `ERROR` and leave the broker untouched.
pub async fn route(broker: &Broker, frame: &[u8]) -> Response {
    match Command::parse(frame) {
        Ok(command) => broker.execute(command).await,
        Err(e) => {
            debug!("Rejected request: {}", e);
            Response::Error
        }
    }
}
