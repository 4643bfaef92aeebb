//! Session host: runs filebridge links over TCP.
//!
//! A [`TransferServer`] accepts peers and a [`TransferClient`] dials one.
//! Either end may send or receive once the socket is wrapped in a
//! [`Link`](filebridge_transfer::Link); the roles of the TCP handshake and
//! of the transfer are independent.

pub mod client;
pub mod error;
pub mod server;

pub use client::TransferClient;
pub use error::HostError;
pub use server::TransferServer;

use std::time::Duration;

use filebridge_transfer::{DEFAULT_EVENT_BUFFER, LinkOptions, TransferConfig};
use serde::{Deserialize, Serialize};

/// Timeout for an outgoing connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every link the host opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Seconds to wait for an outgoing connection.
    pub connect_timeout_secs: u64,
    /// Capacity of the event channel handed to front ends.
    pub event_buffer: usize,
    pub transfer: TransferConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            transfer: TransferConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Link options carrying this configuration; policy and events default.
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions::new(self.transfer.clone())
    }
}
