//! Callback-channel port (driven/secondary port)
//!
//! The externally reachable TCP endpoint the banking provider connects
//! to when a notification fires. The channel never reads payload bytes:
//! an accepted connection from a provider address range *is* the
//! signal. The TCP implementation lives in `banksync-net`; scheduler
//! tests script events through a fake.

use std::net::IpAddr;

use tokio::time::Instant;

/// Outcome of one wait on the callback channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A connection from within the provider's address range arrived
    Notification(IpAddr),
    /// The deadline passed without a (genuine) connection
    Timeout,
}

/// Port trait for the inbound notification channel
#[async_trait::async_trait]
pub trait ICallbackChannel: Send {
    /// Computes reachability for this iteration: binds the listener if
    /// needed and resolves an externally reachable address, creating a
    /// port mapping when that is the only path. Ending up without an
    /// external address is not an error; the caller runs poll-only.
    async fn establish(&mut self) -> anyhow::Result<()>;

    /// The externally reachable `(ip, port)` pair, when established.
    fn external_address(&self) -> Option<(IpAddr, u16)>;

    /// The callback URL to register with the provider, when reachable:
    /// `https://<ip>:<port>/<marker>`.
    fn callback_url(&self) -> Option<String>;

    /// Blocks until a genuine notification arrives or `deadline`
    /// passes. Spurious connections (sources outside the provider
    /// range) are logged and waited through against the same absolute
    /// deadline.
    async fn wait_for_event(&mut self, deadline: Instant) -> anyhow::Result<Event>;

    /// Releases the port mapping, if any. Best-effort; the listener
    /// socket stays open for the process lifetime.
    async fn teardown(&mut self);
}
