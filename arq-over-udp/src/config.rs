//! Per-endpoint transfer configuration.
//!
//! A [`Config`] is fixed for the lifetime of a [`crate::connection::Connection`]
//! and is validated once when the endpoint is created.

use std::time::Duration;

use thiserror::Error;

use crate::packet::HEADER_LEN;
use crate::socket::MAX_DATAGRAM;

/// Largest payload that still fits in one UDP datagram after the header.
pub const MAX_PAYLOAD_LIMIT: usize = MAX_DATAGRAM - HEADER_LEN;

/// Tunable transfer parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum payload bytes carried by one data packet.
    pub max_payload_size: usize,
    /// Number of packets that may be outstanding at once (Go-Back-N and
    /// Selective-Repeat; Stop-and-Wait always uses one).
    pub window_size: usize,
    /// Retransmission timeout; also bounds every blocking wait.
    pub timeout: Duration,
    /// Probability that a non-handshake send is dropped by the fault injector.
    pub loss_probability: f64,
    /// How many sends the fault injector may drop per transfer.  Zero
    /// disables injection.
    pub max_simulated_losses: u32,
    /// Log every packet at `info` instead of `debug`.
    pub verbose: bool,
    /// Ceiling on consecutive timeouts without progress.  `None` retries
    /// forever.
    pub max_retries: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload_size: 1000,
            window_size: 64,
            timeout: Duration::from_millis(500),
            loss_probability: 0.001,
            max_simulated_losses: 0,
            verbose: false,
            max_retries: None,
        }
    }
}

impl Config {
    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::ZeroPayloadSize);
        }
        if self.max_payload_size > MAX_PAYLOAD_LIMIT {
            return Err(ConfigError::PayloadTooLarge(self.max_payload_size));
        }
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(ConfigError::LossProbability(self.loss_probability));
        }
        Ok(())
    }

    /// Window value advertised in outbound headers.
    pub fn advertised_window(&self) -> u16 {
        u16::try_from(self.window_size).unwrap_or(u16::MAX)
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("max payload size must be at least one byte")]
    ZeroPayloadSize,
    #[error("max payload size {0} does not fit in a single datagram")]
    PayloadTooLarge(usize),
    #[error("window size must be at least one packet")]
    ZeroWindow,
    #[error("retransmission timeout must be non-zero")]
    ZeroTimeout,
    #[error("loss probability {0} is outside [0, 1]")]
    LossProbability(f64),
}
