//! banksync Net - Callback channel and NAT traversal
//!
//! Provides:
//! - The TCP callback channel the banking provider connects to
//! - UPnP gateway discovery and port mapping
//! - Local / public address classification helpers
//!
//! ## Modules
//!
//! - [`channel`] - Bound, listening notification endpoint with deadline waits
//! - [`portmap`] - UPnP implementation of the port-mapper port
//! - [`addr`] - Best-effort local address discovery, RFC1918 classification

pub mod addr;
pub mod channel;
pub mod portmap;

use thiserror::Error;

/// Errors that can occur in the network adapters
#[derive(Debug, Error)]
pub enum NetError {
    /// The configured fixed port is taken by another process
    #[error("Port {0} is already in use")]
    AddressInUse(u16),

    /// All randomly chosen candidate ports were taken
    #[error("No free port found after {0} attempts")]
    NoFreePort(u32),

    /// The gateway answered but could not report an external address
    #[error("Gateway discovery failed: {0}")]
    Discovery(String),

    /// No NAT-traversal capable gateway responded within the discovery window
    #[error("No NAT-traversal capable gateway responded")]
    NoGateway,

    /// A configured notification source range is not valid CIDR
    #[error("Invalid notification source range: {0}")]
    InvalidSourceRange(String),

    /// An I/O error outside the retryable address-in-use case
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
