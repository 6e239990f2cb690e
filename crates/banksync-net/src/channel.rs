//! Callback channel - the externally reachable notification endpoint
//!
//! Owns a bound, listening TCP socket and works out how the banking
//! provider can reach it from the public internet: directly when the
//! host has a public address, via operator-configured forwarding when a
//! fixed port is set, or through a UPnP port mapping otherwise.
//!
//! The protocol is deliberately minimal: the provider opening a TCP
//! connection *is* the notification. The connection is closed without
//! reading a single payload byte; only the source address is inspected,
//! to drop connections from outside the provider's published ranges.
//!
//! ## Flow
//!
//! ```text
//! UNBOUND ──bind()──→ LISTENING ──establish()──→ reachable (or poll-only)
//!                         │
//!                  wait_for_event(deadline)
//! ```
//!
//! The listener persists for the process lifetime once bound;
//! re-establishment only recomputes reachability and renews the port
//! mapping.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use banksync_core::domain::{ChannelState, CALLBACK_MARKER};
use banksync_core::ports::callback_channel::{Event, ICallbackChannel};
use banksync_core::ports::port_mapper::IPortMapper;
use ipnet::IpNet;
use rand::Rng;
use tokio::net::{TcpListener, TcpSocket};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{addr, NetError};

/// Maximum random bind attempts before giving up on finding a port.
const BIND_ATTEMPTS: u32 = 128;

/// Dynamic port range candidates are drawn from.
const PORT_RANGE: std::ops::RangeInclusive<u16> = 1025..=65535;

/// Listen backlog; queued notification connections beyond this are
/// refused, which is fine since any one of them triggers the same sync.
const LISTEN_BACKLOG: u32 = 5;

/// Outcome of a single bind attempt.
///
/// Only `Busy` is worth retrying on another candidate port; anything
/// else is propagated immediately.
enum BindOutcome {
    Bound(TcpListener),
    Busy,
    Fatal(io::Error),
}

/// The inbound notification channel.
///
/// See the module docs for the overall design. Reachability state lives
/// in a [`ChannelState`] owned exclusively by this struct.
pub struct CallbackChannel {
    /// Fixed listening port, when the operator configured one
    fixed_port: Option<u16>,
    /// Source ranges a genuine notification may come from
    allowed_ranges: Vec<IpNet>,
    /// NAT-traversal collaborator
    mapper: Arc<dyn IPortMapper>,
    /// The listening socket, once bound
    listener: Option<TcpListener>,
    /// Reachability state
    state: ChannelState,
    /// Overrides local-address discovery (used by tests)
    local_ip_override: Option<IpAddr>,
}

impl CallbackChannel {
    /// Creates an unbound channel.
    ///
    /// `notification_ranges` are CIDR strings from the configuration;
    /// an unparsable range is a configuration error and fails fast.
    pub fn new(
        fixed_port: Option<u16>,
        notification_ranges: &[String],
        mapper: Arc<dyn IPortMapper>,
    ) -> Result<Self, NetError> {
        let allowed_ranges = notification_ranges
            .iter()
            .map(|range| {
                range
                    .parse::<IpNet>()
                    .map_err(|_| NetError::InvalidSourceRange(range.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            fixed_port,
            allowed_ranges,
            mapper,
            listener: None,
            state: ChannelState::default(),
            local_ip_override: None,
        })
    }

    /// Overrides local-address discovery with a fixed address.
    /// Primarily useful for tests.
    pub fn with_local_ip(mut self, ip: IpAddr) -> Self {
        self.local_ip_override = Some(ip);
        self
    }

    /// Current reachability state.
    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    fn resolve_local_ip(&self) -> io::Result<IpAddr> {
        match self.local_ip_override {
            Some(ip) => Ok(ip),
            None => addr::local_ip(),
        }
    }

    /// Binds and listens on one candidate port.
    fn try_bind(port: u16) -> BindOutcome {
        let socket = match TcpSocket::new_v4() {
            Ok(socket) => socket,
            Err(e) => return BindOutcome::Fatal(e),
        };
        if let Err(e) = socket.bind(SocketAddr::from(([0, 0, 0, 0], port))) {
            return if e.kind() == io::ErrorKind::AddrInUse {
                BindOutcome::Busy
            } else {
                BindOutcome::Fatal(e)
            };
        }
        match socket.listen(LISTEN_BACKLOG) {
            Ok(listener) => BindOutcome::Bound(listener),
            Err(e) => BindOutcome::Fatal(e),
        }
    }

    /// Distinct random candidate ports from the dynamic range.
    fn candidate_ports(count: usize) -> Vec<u16> {
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::with_capacity(count);
        let mut candidates = Vec::with_capacity(count);
        while candidates.len() < count {
            let port = rng.gen_range(PORT_RANGE);
            if seen.insert(port) {
                candidates.push(port);
            }
        }
        candidates
    }

    /// Binds the listening socket.
    ///
    /// With a fixed configured port, binds exactly that port or fails
    /// with [`NetError::AddressInUse`]. Otherwise tries up to
    /// [`BIND_ATTEMPTS`] distinct random ports, retrying only on
    /// address-in-use and propagating any other failure immediately.
    fn bind(&mut self) -> Result<(), NetError> {
        if self.listener.is_some() {
            return Ok(());
        }

        if let Some(port) = self.fixed_port {
            match Self::try_bind(port) {
                BindOutcome::Bound(listener) => {
                    self.listener = Some(listener);
                    self.state.listening_port = Some(port);
                    return Ok(());
                }
                BindOutcome::Busy => return Err(NetError::AddressInUse(port)),
                BindOutcome::Fatal(e) => return Err(e.into()),
            }
        }

        for port in Self::candidate_ports(BIND_ATTEMPTS as usize) {
            match Self::try_bind(port) {
                BindOutcome::Bound(listener) => {
                    self.listener = Some(listener);
                    self.state.listening_port = Some(port);
                    return Ok(());
                }
                BindOutcome::Busy => {
                    warn!(port, "Port is in use, trying next");
                }
                BindOutcome::Fatal(e) => return Err(e.into()),
            }
        }
        Err(NetError::NoFreePort(BIND_ATTEMPTS))
    }

    fn is_provider_source(&self, source: IpAddr) -> bool {
        self.allowed_ranges.iter().any(|net| net.contains(&source))
    }
}

#[async_trait::async_trait]
impl ICallbackChannel for CallbackChannel {
    async fn establish(&mut self) -> anyhow::Result<()> {
        self.state.reset_reachability();

        let local_ip = self
            .resolve_local_ip()
            .context("Failed to determine local address")?;

        // Reachability precedence: public local address beats a fixed
        // port with manual forwarding beats a UPnP mapping.
        let (external_ip, use_mapping) = if !addr::is_private(local_ip) {
            info!(ip = %local_ip, "Host has a public address");
            (Some(local_ip), false)
        } else if self.fixed_port.is_some() {
            info!("Host has a private address and a fixed port, assuming manual forwarding");
            match self.mapper.public_address().await {
                Ok(ip) => (Some(ip), false),
                Err(e) => {
                    warn!(error = format!("{e:#}"), "Could not resolve public address");
                    (None, false)
                }
            }
        } else {
            info!("Host has a private address, trying UPnP port mapping");
            match self.mapper.public_address().await {
                Ok(ip) => (Some(ip), true),
                Err(e) => {
                    warn!(error = format!("{e:#}"), "Gateway discovery failed");
                    (None, false)
                }
            }
        };

        let Some(external_ip) = external_ip else {
            warn!("No public address found, not registering a callback");
            return Ok(());
        };

        if self.listener.is_none() {
            match self.bind() {
                Ok(()) => info!(port = self.state.listening_port, "Listening for notifications"),
                Err(NetError::NoFreePort(attempts)) => {
                    warn!(attempts, "No free listening port, not registering a callback");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        let local_port = self
            .state
            .listening_port
            .context("Listener bound without a recorded port")?;

        let external_port = if use_mapping {
            match self.mapper.add_mapping(self.state.mapping, local_port).await {
                Some(handle) => {
                    self.state.mapping = Some(handle);
                    handle.external_port
                }
                None => {
                    warn!("Failed to map port, not registering a callback");
                    return Ok(());
                }
            }
        } else {
            local_port
        };

        self.state.using_port_mapping = use_mapping;
        self.state.external_address = Some((external_ip, external_port));
        info!(
            ip = %external_ip,
            port = external_port,
            mapped = use_mapping,
            "Callback channel established"
        );
        Ok(())
    }

    fn external_address(&self) -> Option<(IpAddr, u16)> {
        self.state.external_address
    }

    fn callback_url(&self) -> Option<String> {
        self.state
            .external_address
            .map(|(ip, port)| format!("https://{ip}:{port}/{CALLBACK_MARKER}"))
    }

    async fn wait_for_event(&mut self, deadline: Instant) -> anyhow::Result<Event> {
        let listener = self.listener.as_ref().context("Channel is not listening")?;
        loop {
            match tokio::time::timeout_at(deadline, listener.accept()).await {
                Err(_) => return Ok(Event::Timeout),
                Ok(Err(e)) => return Err(e).context("Failed to accept connection"),
                Ok(Ok((stream, peer))) => {
                    // The connection attempt itself is the signal; the
                    // payload is never read.
                    drop(stream);
                    let source = peer.ip();
                    if self.is_provider_source(source) {
                        info!(source = %source, "Incoming notification");
                        return Ok(Event::Notification(source));
                    }
                    // Spurious caller: keep waiting against the same
                    // absolute deadline.
                    warn!(source = %source, "Connection from outside provider range");
                }
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(handle) = self.state.mapping.take() {
            debug!(external_port = handle.external_port, "Releasing port mapping");
            self.mapper.remove_mapping(handle).await;
        }
        self.state.reset_reachability();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use banksync_core::ports::port_mapper::MappingHandle;

    use super::*;

    /// Port mapper fake that counts calls and returns scripted results.
    #[derive(Default)]
    struct FakeMapper {
        public_ip: Option<IpAddr>,
        mapping_port: Option<u16>,
        public_calls: AtomicUsize,
        add_calls: AtomicUsize,
        remove_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl IPortMapper for FakeMapper {
        async fn public_address(&self) -> anyhow::Result<IpAddr> {
            self.public_calls.fetch_add(1, Ordering::SeqCst);
            self.public_ip
                .ok_or_else(|| anyhow::anyhow!("no gateway responded"))
        }

        async fn add_mapping(
            &self,
            existing: Option<MappingHandle>,
            _local_port: u16,
        ) -> Option<MappingHandle> {
            self.add_calls.fetch_add(1, Ordering::SeqCst);
            match (existing, self.mapping_port) {
                (Some(handle), Some(_)) => Some(handle),
                (None, Some(port)) => Some(MappingHandle::new(port)),
                _ => None,
            }
        }

        async fn remove_mapping(&self, _handle: MappingHandle) {
            self.remove_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn channel_with(
        fixed_port: Option<u16>,
        ranges: &[&str],
        mapper: Arc<FakeMapper>,
    ) -> CallbackChannel {
        let ranges: Vec<String> = ranges.iter().map(|s| s.to_string()).collect();
        CallbackChannel::new(fixed_port, &ranges, mapper).unwrap()
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_invalid_source_range_is_rejected() {
        let mapper = Arc::new(FakeMapper::default());
        let result =
            CallbackChannel::new(None, &["not-a-cidr".to_string()], mapper as Arc<dyn IPortMapper>);
        assert!(matches!(result, Err(NetError::InvalidSourceRange(_))));
    }

    #[test]
    fn test_candidate_ports_are_distinct_and_in_range() {
        let ports = CallbackChannel::candidate_ports(128);
        assert_eq!(ports.len(), 128);
        let unique: HashSet<u16> = ports.iter().copied().collect();
        assert_eq!(unique.len(), 128, "candidate ports must not repeat");
        assert!(ports.iter().all(|p| (1025..=65535).contains(p)));
    }

    #[tokio::test]
    async fn test_bind_random_port_in_dynamic_range() {
        let mapper = Arc::new(FakeMapper::default());
        let mut channel = channel_with(None, &["127.0.0.0/8"], mapper);
        channel.bind().unwrap();
        let port = channel.state().listening_port.unwrap();
        assert!((1025..=65535).contains(&port));
    }

    #[tokio::test]
    async fn test_bind_fixed_port_in_use() {
        // Keep the blocking listener alive for the duration of the test.
        let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let mapper = Arc::new(FakeMapper::default());
        let mut channel = channel_with(Some(port), &["127.0.0.0/8"], mapper);
        match channel.bind() {
            Err(NetError::AddressInUse(p)) => assert_eq!(p, port),
            other => panic!("expected AddressInUse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_establish_public_address_skips_mapper() {
        let mapper = Arc::new(FakeMapper::default());
        let mut channel = channel_with(None, &["127.0.0.0/8"], mapper.clone())
            .with_local_ip("93.184.216.34".parse().unwrap());

        channel.establish().await.unwrap();

        let (ip, port) = channel.external_address().unwrap();
        assert_eq!(ip, "93.184.216.34".parse::<IpAddr>().unwrap());
        assert_eq!(Some(port), channel.state().listening_port);
        assert!(!channel.state().using_port_mapping);
        assert_eq!(mapper.public_calls.load(Ordering::SeqCst), 0);
        assert_eq!(mapper.add_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_establish_fixed_port_resolves_public_ip_only() {
        let port = free_port();
        let mapper = Arc::new(FakeMapper {
            public_ip: Some("1.2.3.4".parse().unwrap()),
            ..Default::default()
        });
        let mut channel = channel_with(Some(port), &["127.0.0.0/8"], mapper.clone())
            .with_local_ip("192.168.1.20".parse().unwrap());

        channel.establish().await.unwrap();

        assert_eq!(
            channel.external_address(),
            Some(("1.2.3.4".parse().unwrap(), port))
        );
        assert!(!channel.state().using_port_mapping);
        assert_eq!(mapper.add_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_establish_creates_mapping_behind_nat() {
        let mapper = Arc::new(FakeMapper {
            public_ip: Some("1.2.3.4".parse().unwrap()),
            mapping_port: Some(40000),
            ..Default::default()
        });
        let mut channel = channel_with(None, &["127.0.0.0/8"], mapper.clone())
            .with_local_ip("192.168.1.20".parse().unwrap());

        channel.establish().await.unwrap();

        assert_eq!(
            channel.external_address(),
            Some(("1.2.3.4".parse().unwrap(), 40000))
        );
        assert!(channel.state().using_port_mapping);
        assert_eq!(channel.state().mapping, Some(MappingHandle::new(40000)));
        assert_eq!(mapper.add_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_establish_without_gateway_is_poll_only_not_fatal() {
        let mapper = Arc::new(FakeMapper::default());
        let mut channel = channel_with(None, &["127.0.0.0/8"], mapper)
            .with_local_ip("192.168.1.20".parse().unwrap());

        channel.establish().await.unwrap();

        assert!(channel.external_address().is_none());
        assert!(channel.callback_url().is_none());
    }

    #[tokio::test]
    async fn test_callback_url_format() {
        let mapper = Arc::new(FakeMapper::default());
        let mut channel = channel_with(None, &["127.0.0.0/8"], mapper)
            .with_local_ip("93.184.216.34".parse().unwrap());
        channel.establish().await.unwrap();

        let url = channel.callback_url().unwrap();
        let port = channel.state().listening_port.unwrap();
        assert_eq!(url, format!("https://93.184.216.34:{port}/banksync-autosync"));
    }

    #[tokio::test]
    async fn test_wait_for_event_accepts_provider_connection() {
        let mapper = Arc::new(FakeMapper::default());
        let mut channel = channel_with(None, &["127.0.0.0/8"], mapper);
        channel.bind().unwrap();
        let port = channel.state().listening_port.unwrap();

        tokio::spawn(async move {
            let _ = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        match channel.wait_for_event(deadline).await.unwrap() {
            Event::Notification(source) => assert!(source.is_loopback()),
            Event::Timeout => panic!("expected a notification"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_event_ignores_spurious_source() {
        let mapper = Arc::new(FakeMapper::default());
        // Loopback is outside this (provider-like) range.
        let mut channel = channel_with(None, &["185.40.108.0/22"], mapper);
        channel.bind().unwrap();
        let port = channel.state().listening_port.unwrap();

        tokio::spawn(async move {
            let _ = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
        });

        let deadline = Instant::now() + Duration::from_millis(300);
        let event = channel.wait_for_event(deadline).await.unwrap();
        assert_eq!(event, Event::Timeout);
    }

    #[tokio::test]
    async fn test_teardown_releases_mapping() {
        let mapper = Arc::new(FakeMapper {
            public_ip: Some("1.2.3.4".parse().unwrap()),
            mapping_port: Some(40000),
            ..Default::default()
        });
        let mut channel = channel_with(None, &["127.0.0.0/8"], mapper.clone())
            .with_local_ip("192.168.1.20".parse().unwrap());
        channel.establish().await.unwrap();

        channel.teardown().await;

        assert_eq!(mapper.remove_calls.load(Ordering::SeqCst), 1);
        assert!(channel.state().mapping.is_none());
        assert!(channel.external_address().is_none());
    }
}
