//! NAT-traversal port (driven/secondary port)
//!
//! Abstraction over the local gateway: external-IP discovery and
//! TCP port mappings. The UPnP implementation lives in `banksync-net`;
//! scheduler tests substitute a fake.
//!
//! ## Design Notes
//!
//! - `add_mapping` returns `Option` rather than `Result`: a mapping
//!   failure is an expected, recoverable condition (the channel falls
//!   back to poll-only), not an error to propagate.
//! - `remove_mapping` is best-effort; implementations log failures and
//!   never surface them.

use std::net::IpAddr;

/// Handle to an active external-port → local-port mapping.
///
/// Opaque to the scheduler; the mapper uses it to renew or remove the
/// mapping it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingHandle {
    /// External port the gateway forwards to us
    pub external_port: u16,
}

impl MappingHandle {
    /// Creates a handle for the given external port.
    pub fn new(external_port: u16) -> Self {
        Self { external_port }
    }
}

/// Port trait for NAT-traversal operations
#[async_trait::async_trait]
pub trait IPortMapper: Send + Sync {
    /// Queries the gateway for the externally visible IP address.
    ///
    /// Fails if no NAT-traversal capable gateway responds within the
    /// discovery window, or if the gateway cannot report an address.
    async fn public_address(&self) -> anyhow::Result<IpAddr>;

    /// Ensures an external-port → `local_port` mapping exists.
    ///
    /// Idempotent: when `existing` still maps correctly it is renewed
    /// and returned unchanged; otherwise a fresh mapping is created.
    /// Returns `None` when no mapping could be established.
    async fn add_mapping(
        &self,
        existing: Option<MappingHandle>,
        local_port: u16,
    ) -> Option<MappingHandle>;

    /// Removes a mapping. Best-effort; failures are logged by the
    /// implementation, never returned.
    async fn remove_mapping(&self, handle: MappingHandle);
}
