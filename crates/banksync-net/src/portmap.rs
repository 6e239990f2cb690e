//! UPnP port mapper
//!
//! Implements the [`IPortMapper`] port against an IGD-capable gateway
//! on the local network. Discovery runs once and the gateway handle is
//! cached; every operation after that talks to the cached gateway.
//!
//! All operations are local-network only. Absence of a compatible
//! gateway is an expected condition: `public_address` reports it as an
//! error for the channel to log and fall back on, and `add_mapping`
//! simply returns `None`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use banksync_core::ports::port_mapper::{IPortMapper, MappingHandle};
use igd_next::aio::tokio::{search_gateway, Tokio};
use igd_next::{PortMappingProtocol, SearchOptions};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{addr, NetError};

type Gateway = igd_next::aio::Gateway<Tokio>;

/// How long gateway discovery listens for a response.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Lease duration for created mappings; 0 means indefinite. The
/// scheduler's refresh cycle re-asserts the mapping periodically.
const MAPPING_LEASE_SECS: u32 = 0;

/// Description attached to mappings so they are identifiable in the
/// gateway's admin UI.
const MAPPING_DESCRIPTION: &str = "banksync callback";

/// UPnP implementation of [`IPortMapper`].
pub struct UpnpPortMapper {
    /// Gateway handle, cached after the first successful discovery
    gateway: Mutex<Option<Gateway>>,
}

impl UpnpPortMapper {
    /// Creates a mapper with no gateway discovered yet.
    pub fn new() -> Self {
        Self {
            gateway: Mutex::new(None),
        }
    }

    /// Returns the cached gateway, discovering one if needed.
    async fn gateway(&self) -> anyhow::Result<Gateway> {
        let mut cached = self.gateway.lock().await;
        if let Some(gateway) = cached.as_ref() {
            return Ok(gateway.clone());
        }

        debug!("Searching for an IGD-capable gateway");
        let options = SearchOptions {
            timeout: Some(DISCOVERY_TIMEOUT),
            ..Default::default()
        };
        let gateway = search_gateway(options).await.map_err(|e| {
            debug!(error = %e, "Gateway search failed");
            NetError::NoGateway
        })?;
        info!(gateway = %gateway.addr, "Discovered UPnP gateway");

        *cached = Some(gateway.clone());
        Ok(gateway)
    }

    /// The local socket address a mapping should forward to.
    fn local_socket_addr(local_port: u16) -> anyhow::Result<SocketAddr> {
        let ip = addr::local_ip().context("Failed to determine local address")?;
        Ok(SocketAddr::new(ip, local_port))
    }
}

impl Default for UpnpPortMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IPortMapper for UpnpPortMapper {
    async fn public_address(&self) -> anyhow::Result<std::net::IpAddr> {
        let gateway = self.gateway().await?;
        let ip = gateway
            .get_external_ip()
            .await
            .map_err(|e| NetError::Discovery(e.to_string()))?;
        debug!(ip = %ip, "Gateway reported external address");
        Ok(ip)
    }

    async fn add_mapping(
        &self,
        existing: Option<MappingHandle>,
        local_port: u16,
    ) -> Option<MappingHandle> {
        let gateway = match self.gateway().await {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(error = format!("{e:#}"), "Cannot map port without a gateway");
                return None;
            }
        };
        let local_addr = match Self::local_socket_addr(local_port) {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = format!("{e:#}"), "Cannot map port without a local address");
                return None;
            }
        };

        // Renew an existing mapping in place before asking for a new
        // external port; the registered callback URL stays valid.
        if let Some(handle) = existing {
            match gateway
                .add_port(
                    PortMappingProtocol::TCP,
                    handle.external_port,
                    local_addr,
                    MAPPING_LEASE_SECS,
                    MAPPING_DESCRIPTION,
                )
                .await
            {
                Ok(()) => {
                    debug!(external_port = handle.external_port, "Renewed port mapping");
                    return Some(handle);
                }
                Err(e) => {
                    warn!(
                        external_port = handle.external_port,
                        error = %e,
                        "Could not renew mapping, requesting a new external port"
                    );
                }
            }
        }

        match gateway
            .add_any_port(
                PortMappingProtocol::TCP,
                local_addr,
                MAPPING_LEASE_SECS,
                MAPPING_DESCRIPTION,
            )
            .await
        {
            Ok(external_port) => {
                info!(external_port, local_port, "Created port mapping");
                Some(MappingHandle::new(external_port))
            }
            Err(e) => {
                warn!(error = %e, "Failed to create port mapping");
                None
            }
        }
    }

    async fn remove_mapping(&self, handle: MappingHandle) {
        let gateway = match self.gateway().await {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(error = format!("{e:#}"), "Cannot remove mapping without a gateway");
                return;
            }
        };
        match gateway
            .remove_port(PortMappingProtocol::TCP, handle.external_port)
            .await
        {
            Ok(()) => info!(external_port = handle.external_port, "Removed port mapping"),
            Err(e) => warn!(
                external_port = handle.external_port,
                error = %e,
                "Failed to remove port mapping"
            ),
        }
    }
}
