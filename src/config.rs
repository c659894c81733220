//! Command-line and environment configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::error::{BrokerError, BrokerResult};

/// Lease-based task queue broker
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "task-broker", version, about)]
pub struct Config {
    /// Listen IP address
    #[arg(short = 'i', long, env = "TASK_BROKER_IP", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub ip: IpAddr,

    /// Listen port
    #[arg(short = 'p', long, env = "TASK_BROKER_PORT", default_value_t = 5555)]
    pub port: u16,

    /// Snapshot path prefix; files are `<path>_tasks_queues` and `<path>_tasks_in_processing`
    #[arg(short = 'c', long, env = "TASK_BROKER_PATH", default_value = "./")]
    pub path: String,

    /// Lease timeout in seconds before an unacknowledged task is redelivered
    #[arg(short = 't', long, env = "TASK_BROKER_TIMEOUT", default_value_t = 5)]
    pub timeout: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "TASK_BROKER_LOG", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 5555,
            path: "./".to_string(),
            timeout: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Reject settings the broker cannot run with
    pub fn validate(&self) -> BrokerResult<()> {
        if self.timeout == 0 {
            return Err(BrokerError::config("lease timeout must be at least one second"));
        }
        if self.path.is_empty() {
            return Err(BrokerError::config("snapshot path prefix must not be empty"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parsed_defaults() {
        let parsed = Config::try_parse_from(["task-broker"]).unwrap();
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.listen_addr(), "127.0.0.1:5555".parse().unwrap());
        assert_eq!(parsed.lease_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn short_flags() {
        let config =
            Config::try_parse_from(["task-broker", "-i", "0.0.0.0", "-p", "7000", "-c", "/tmp/q", "-t", "30"])
                .unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.path, "/tmp/q");
        assert_eq!(config.lease_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            timeout: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(BrokerError::Config { .. })));
    }

    #[test]
    fn bad_port_fails_to_parse() {
        assert!(Config::try_parse_from(["task-broker", "--port", "70000"]).is_err());
    }
}
