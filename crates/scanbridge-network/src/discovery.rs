//! UDP broadcast discovery of compatible scanners.
//!
//! One run broadcasts the discovery query and listens for answers on the same
//! port. The first datagram that parses as a real scanner wins.
//!
//! ```text
//!            send #1          send #2          send #3
//! sender   ──┬────── 5 s ──────┬────── 5 s ──────┬────── 5 s ──> NotFound
//!            │                 │                 │
//! listener   └──── recv / parse / pause 1 s ─────┴─> hard stop at 10 s
//!                        │
//!                        └─ candidate ──> Found (ends the run at once)
//! ```
//!
//! Malformed datagrams and our own query echo are skipped; they never turn
//! into a failure on their own.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use scanbridge_core::constants::{
    DISCOVERY_BROADCAST_IP, DISCOVERY_DATAGRAM_SIZE, DISCOVERY_IDLE_PAUSE_MS,
    DISCOVERY_LISTENER_TIMEOUT_SECS, DISCOVERY_MAX_ATTEMPTS, DISCOVERY_PORT,
    DISCOVERY_RESPONSE_TIMEOUT_SECS,
};
use scanbridge_core::{BridgeEvent, EventSink, ScannerRole};
use scanbridge_protocol::{DiscoveredScanner, discovery_query, parse_response};

/// Discovery sockets and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Local address the discovery socket binds to.
    pub bind_addr: SocketAddr,

    /// Where the query is sent, normally the segment broadcast address.
    pub target: SocketAddr,

    /// Wait for a candidate before resending the query.
    pub response_timeout: Duration,

    /// Total number of query sends.
    pub max_attempts: u32,

    /// Hard bound on the listener, independent of resends.
    pub listener_timeout: Duration,

    /// Listener pause after a datagram that was not a candidate.
    pub idle_pause: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let broadcast = DISCOVERY_BROADCAST_IP
            .parse()
            .unwrap_or(Ipv4Addr::BROADCAST);
        Self {
            bind_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT).into(),
            target: SocketAddrV4::new(broadcast, DISCOVERY_PORT).into(),
            response_timeout: Duration::from_secs(DISCOVERY_RESPONSE_TIMEOUT_SECS),
            max_attempts: DISCOVERY_MAX_ATTEMPTS,
            listener_timeout: Duration::from_secs(DISCOVERY_LISTENER_TIMEOUT_SECS),
            idle_pause: Duration::from_millis(DISCOVERY_IDLE_PAUSE_MS),
        }
    }
}

impl DiscoveryConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_listener_timeout(mut self, timeout: Duration) -> Self {
        self.listener_timeout = timeout;
        self
    }

    pub fn with_idle_pause(mut self, pause: Duration) -> Self {
        self.idle_pause = pause;
        self
    }
}

/// Errors from a discovery run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket setup or send failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled before it finished
    #[error("Discovery cancelled")]
    Cancelled,
}

/// Terminal state of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(DiscoveredScanner),

    /// No candidate after every send.
    NotFound { attempts: u32 },
}

impl DiscoveryOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The `discovery-result` event for this outcome.
    pub fn to_event(&self, side: ScannerRole) -> BridgeEvent {
        match self {
            Self::Found(scanner) => BridgeEvent::discovery_found(
                side,
                scanner.ip.clone(),
                scanner.tcp_port_1,
                scanner.name.clone(),
                scanner.model.clone(),
                scanner.mac.clone(),
            ),
            Self::NotFound { .. } => BridgeEvent::discovery_failed(side),
        }
    }
}

/// A bound discovery socket.
///
/// The socket is shared by the sender and the listener task of a run.
#[derive(Debug)]
pub struct DiscoveryService {
    socket: Arc<UdpSocket>,
    config: DiscoveryConfig,
}

fn bind_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(socket)
}

impl DiscoveryService {
    /// Bind the discovery socket.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `DiscoveryError::Io` if the socket cannot be created or bound.
    pub fn bind(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        debug!(bind = %config.bind_addr, target = %config.target, "Binding discovery socket");
        let socket = bind_socket(config.bind_addr)?;
        Ok(Self {
            socket: Arc::new(socket),
            config,
        })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run one discovery.
    ///
    /// # Errors
    ///
    /// `DiscoveryError::Io` if a query cannot be sent,
    /// `DiscoveryError::Cancelled` if `cancel` fires first.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<DiscoveryOutcome, DiscoveryError> {
        let config = self.config;
        info!(target = %config.target, "Trying to auto-detect a compatible scanner");

        let listener_cancel = cancel.child_token();
        let mut listener = tokio::spawn(listen(
            Arc::clone(&self.socket),
            config.listener_timeout,
            config.idle_pause,
            listener_cancel.clone(),
        ));
        let _stop_listener = listener_cancel.drop_guard();

        let mut attempts = 1;
        self.send_query(attempts).await?;
        let mut deadline = Instant::now() + config.response_timeout;
        let mut listening = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                joined = &mut listener, if listening => {
                    listening = false;
                    match joined {
                        Ok(Some(scanner)) => {
                            info!(ip = %scanner.ip, model = %scanner.model, "Compatible scanner found");
                            return Ok(DiscoveryOutcome::Found(scanner));
                        }
                        Ok(None) => debug!("Discovery listener finished without a candidate"),
                        Err(e) => warn!(error = %e, "Discovery listener task failed"),
                    }
                }
                _ = sleep_until(deadline) => {
                    if attempts >= config.max_attempts {
                        info!(attempts, "Search finished, no compatible scanner found");
                        return Ok(DiscoveryOutcome::NotFound { attempts });
                    }
                    attempts += 1;
                    debug!(attempt = attempts, "No response, resending discovery query");
                    self.send_query(attempts).await?;
                    deadline += config.response_timeout;
                }
            }
        }
    }

    /// Run one discovery for `side` and emit its `discovery-result` event.
    ///
    /// A cancelled run emits nothing.
    ///
    /// # Errors
    /// Same as [`DiscoveryService::run`]. A send failure is also reported as a
    /// failed discovery event before it is returned.
    pub async fn discover(
        &self,
        side: ScannerRole,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        match self.run(cancel).await {
            Ok(outcome) => {
                events.notify(outcome.to_event(side)).await;
                Ok(outcome)
            }
            Err(DiscoveryError::Cancelled) => Err(DiscoveryError::Cancelled),
            Err(e) => {
                events.notify(BridgeEvent::discovery_failed(side)).await;
                Err(e)
            }
        }
    }

    async fn send_query(&self, attempt: u32) -> Result<(), DiscoveryError> {
        self.socket
            .send_to(discovery_query(), self.config.target)
            .await?;
        trace!(attempt, target = %self.config.target, "Discovery query sent");
        Ok(())
    }
}

/// Listen for the first candidate until `hard_timeout` or cancellation.
async fn listen(
    socket: Arc<UdpSocket>,
    hard_timeout: Duration,
    idle_pause: Duration,
    cancel: CancellationToken,
) -> Option<DiscoveredScanner> {
    let deadline = Instant::now() + hard_timeout;
    let mut buf = vec![0u8; DISCOVERY_DATAGRAM_SIZE];
    debug!("Discovery listener started");

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = sleep_until(deadline) => {
                debug!("Discovery listener timed out");
                return None;
            }
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, peer)) => match parse_response(&buf[..len]) {
                Ok(Some(scanner)) => {
                    debug!(
                        %peer,
                        mac = %scanner.mac,
                        ip = %scanner.ip,
                        tcp1 = scanner.tcp_port_1,
                        tcp2 = scanner.tcp_port_2,
                        name = %scanner.name,
                        model = %scanner.model,
                        serial = %scanner.serial,
                        firmware = %scanner.firmware,
                        weblink = %scanner.weblink,
                        "Found new device"
                    );
                    return Some(scanner);
                }
                Ok(None) => trace!(%peer, "Ignoring discovery query echo"),
                Err(e) => debug!(%peer, error = %e, "Ignoring malformed discovery response"),
            },
            Err(e) => debug!(error = %e, "Error while listening for discovery responses"),
        }

        let resume = (Instant::now() + idle_pause).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = sleep_until(resume) => {}
        }
    }
}
