//! Channel and scheduler state records
//!
//! Explicit state threaded through the control loop instead of ambient
//! globals: [`ChannelState`] is owned exclusively by the callback
//! channel, [`SchedulerState`] only ever mutated by the scheduler loop.

use std::net::IpAddr;

use tokio::time::Instant;

use crate::ports::port_mapper::MappingHandle;

/// Reachability state of the callback channel.
///
/// Rebuilt on every establish attempt. `external_address` being `None`
/// means the channel is not reachable from the public network and the
/// current iteration must fall back to polling. The bound listener port
/// and any live port-mapping handle survive re-establishment; the
/// mapping handle is needed to renew the same external port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    /// Local port the listener is bound to, once bound
    pub listening_port: Option<u16>,
    /// Externally reachable address, when any path to reachability worked
    pub external_address: Option<(IpAddr, u16)>,
    /// Handle of the active NAT port mapping, if one was created
    pub mapping: Option<MappingHandle>,
    /// Whether the current external address goes through a port mapping
    pub using_port_mapping: bool,
}

impl ChannelState {
    /// Clears reachability for a fresh establish attempt.
    ///
    /// Keeps `listening_port` (the socket persists for the process
    /// lifetime) and `mapping` (passed back to the mapper so an intact
    /// mapping can be reused instead of recreated).
    pub fn reset_reachability(&mut self) {
        self.external_address = None;
        self.using_port_mapping = false;
    }

    /// Returns true if the channel is reachable from the public network.
    pub fn is_reachable(&self) -> bool {
        self.external_address.is_some()
    }
}

/// Mutable state of the scheduler's outer loop.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Completion time of the last synchronization pass
    pub last_sync: Option<Instant>,
    /// Failed outer iterations since the last fully successful one
    pub consecutive_errors: u32,
}

impl SchedulerState {
    /// Records the completion of a synchronization pass.
    pub fn record_sync(&mut self, at: Instant) {
        self.last_sync = Some(at);
    }

    /// Returns true if more than `wait` has elapsed since the last
    /// synchronization pass (or none has run yet).
    pub fn sync_due(&self, now: Instant, wait: std::time::Duration) -> bool {
        match self.last_sync {
            Some(last) => last + wait < now,
            None => true,
        }
    }

    /// Records a failed outer iteration.
    pub fn record_failure(&mut self) {
        self.consecutive_errors += 1;
    }

    /// Records a fully successful outer iteration.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }
}
