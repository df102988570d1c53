use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Configuration for an ATEM session and its UDP transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local UDP port to bind, `None` for an ephemeral port
    pub local_port: Option<u16>,
    /// Kernel receive buffer size (SO_RCVBUF)
    pub recv_buffer_size: usize,
    /// Size of the user-space datagram buffer
    pub max_datagram_size: usize,
    /// Upper bound on a single receive wait, also the stop latency of the receive loop
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_interval: Duration,
    /// Sleep between two driver iterations
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub loop_interval: Duration,
    /// Delay before a new connection attempt from Idle
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub idle_timeout: Duration,
    /// Delay between hello retransmissions while connecting
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub hello_retry: Duration,
    /// Silence tolerated while waiting for the handshake reply
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub connecting_timeout: Duration,
    /// Silence tolerated while the device dumps its initial state
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub initializing_timeout: Duration,
    /// Silence after which a working session starts probing the device
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub working_timeout: Duration,
    /// Delay between ack-request probe retransmissions
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub probe_retry: Duration,
    /// Total silence after which a recovering session is dropped
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub recovering_timeout: Duration,
    /// Hard cap on driver iterations per run
    pub max_iterations: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            local_port: None,
            recv_buffer_size: super::SO_RECV_BUFFER,
            max_datagram_size: super::MAX_DATAGRAM_SIZE,
            poll_interval: Duration::from_millis(50),
            loop_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(100),
            hello_retry: Duration::from_millis(200),
            connecting_timeout: Duration::from_secs(2),
            initializing_timeout: Duration::from_secs(2),
            working_timeout: Duration::from_millis(1500),
            probe_retry: Duration::from_millis(200),
            recovering_timeout: Duration::from_secs(5),
            max_iterations: 10_000_000,
        }
    }
}

impl Config {
    /// Checks that the timers describe a usable schedule
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("poll_interval", self.poll_interval),
            ("loop_interval", self.loop_interval),
            ("hello_retry", self.hello_retry),
            ("connecting_timeout", self.connecting_timeout),
            ("initializing_timeout", self.initializing_timeout),
            ("working_timeout", self.working_timeout),
            ("probe_retry", self.probe_retry),
            ("recovering_timeout", self.recovering_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(Error::config(format!("{} must be non-zero", name)));
            }
        }

        if self.recovering_timeout <= self.working_timeout {
            return Err(Error::config(format!(
                "recovering_timeout ({:?}) must exceed working_timeout ({:?})",
                self.recovering_timeout, self.working_timeout
            )));
        }

        if self.max_datagram_size < super::HEADER_LEN {
            return Err(Error::config("max_datagram_size is smaller than a packet header"));
        }

        if self.max_iterations == 0 {
            return Err(Error::config("max_iterations must be non-zero"));
        }

        Ok(())
    }
}
