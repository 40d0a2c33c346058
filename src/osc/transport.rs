//! UDP transport with dispatch table and traffic counters

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rosc::{OscMessage, OscPacket, OscType};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::dispatch::{self, HandlerFn, HandlerTable};
use super::OscSink;
use crate::error::{ConnectError, SendError};

/// Largest datagram we accept
const RECV_BUFFER_SIZE: usize = 65_536;

/// Remote session address and the local port replies arrive on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub send_port: u16,
    pub receive_port: u16,
    pub listen_host: String,
}

impl Endpoint {
    pub fn send_target(&self) -> String {
        format!("{}:{}", self.host, self.send_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.receive_port)
    }

    /// Resolve the remote address (first match)
    pub fn remote_addr(&self) -> Result<SocketAddr, ConnectError> {
        let target = self.send_target();
        target
            .to_socket_addrs()
            .map_err(|_| ConnectError::InvalidEndpoint(target.clone()))?
            .next()
            .ok_or(ConnectError::InvalidEndpoint(target))
    }
}

/// Point-in-time copy of the traffic counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_message_time: Option<DateTime<Utc>>,
}

struct SendLink {
    socket: StdUdpSocket,
    remote: SocketAddr,
}

/// OSC transport shared by the connection manager and the sync controller
///
/// Sending goes through a plain unconnected std socket so a send never
/// awaits and never reports the peer's ICMP errors. Receiving runs as a
/// tokio task owned by whoever calls [`OscTransport::run_receiver`].
pub struct OscTransport {
    handlers: RwLock<HandlerTable>,
    link: RwLock<Option<SendLink>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    /// Unix millis of the last message in either direction, 0 = never
    last_message_ms: AtomicI64,
}

impl Default for OscTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl OscTransport {
    pub fn new() -> Self {
        let mut table = HandlerTable::new();
        table.set_default(Arc::new(dispatch::log_unhandled));

        Self {
            handlers: RwLock::new(table),
            link: RwLock::new(None),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            last_message_ms: AtomicI64::new(0),
        }
    }

    /// Register a handler for an address pattern (`*` wildcards allowed)
    pub fn register_handler<F>(&self, pattern: &str, handler: F)
    where
        F: Fn(&OscMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler_fn(pattern, Arc::new(handler));
    }

    pub fn register_handler_fn(&self, pattern: &str, handler: HandlerFn) {
        debug!("Registering OSC handler: {}", pattern);
        self.handlers.write().register(pattern, handler);
    }

    /// Replace the fallback invoked when no pattern matches
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&OscMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().set_default(Arc::new(handler));
    }

    /// Number of registered patterns, default handler excluded
    pub fn handlers_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Bind the receive socket for `endpoint`
    ///
    /// Fails fast with [`ConnectError::PortBusy`] when the port is taken.
    pub async fn bind_receiver(&self, endpoint: &Endpoint) -> Result<UdpSocket, ConnectError> {
        let addr = endpoint.listen_addr();
        match UdpSocket::bind(&addr).await {
            Ok(socket) => {
                debug!("Receive socket bound on {}", addr);
                Ok(socket)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(ConnectError::PortBusy {
                port: endpoint.receive_port,
            }),
            Err(source) => Err(ConnectError::ReceiveBind { addr, source }),
        }
    }

    /// Open the outbound socket towards `endpoint`
    pub fn open_link(&self, endpoint: &Endpoint) -> Result<(), ConnectError> {
        let remote = endpoint.remote_addr()?;
        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = StdUdpSocket::bind(local).map_err(ConnectError::SendSocket)?;

        info!("OSC send link open -> {}", remote);
        *self.link.write() = Some(SendLink { socket, remote });
        Ok(())
    }

    pub fn close_link(&self) {
        if self.link.write().take().is_some() {
            debug!("OSC send link closed");
        }
    }

    pub fn is_linked(&self) -> bool {
        self.link.read().is_some()
    }

    /// Typed send
    pub fn try_send(&self, address: &str, args: Vec<OscType>) -> Result<(), SendError> {
        let packet = OscPacket::Message(OscMessage {
            addr: address.to_string(),
            args,
        });
        let bytes = rosc::encoder::encode(&packet).map_err(|e| SendError::Encode(e.to_string()))?;

        {
            let link = self.link.read();
            let link = link.as_ref().ok_or(SendError::NotConnected)?;
            link.socket.send_to(&bytes, link.remote)?;
        }

        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
        trace!("OSC -> {} ({} bytes)", address, bytes.len());
        Ok(())
    }

    /// Fire-and-forget send; failures are logged, never raised
    pub fn send(&self, address: &str, args: Vec<OscType>) -> bool {
        match self.try_send(address, args) {
            Ok(()) => true,
            Err(SendError::NotConnected) => {
                debug!("Dropping {}: not connected", address);
                false
            }
            Err(e) => {
                warn!("Failed to send {}: {}", address, e);
                false
            }
        }
    }

    /// Route one message to its best matching handler
    pub fn dispatch(&self, msg: &OscMessage) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch();

        // Resolve under the lock, invoke outside it
        let resolved = self.handlers.read().resolve(&msg.addr);
        if let Some((pattern, handler)) = resolved {
            trace!("OSC <- {} via {}", msg.addr, pattern);
            dispatch::invoke(&pattern, &handler, msg);
        }
    }

    /// Dispatch a decoded packet, flattening bundles
    pub fn dispatch_packet(&self, packet: &OscPacket) {
        match packet {
            OscPacket::Message(msg) => self.dispatch(msg),
            OscPacket::Bundle(bundle) => {
                for inner in &bundle.content {
                    self.dispatch_packet(inner);
                }
            }
        }
    }

    /// Receive loop: one datagram per read until `token` is cancelled
    pub async fn run_receiver(self: Arc<Self>, socket: UdpSocket, token: CancellationToken) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        info!("OSC receiver started on {:?}", socket.local_addr().ok());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                res = socket.recv_from(&mut buf) => match res {
                    Ok((len, from)) => match rosc::decoder::decode_udp(&buf[..len]) {
                        Ok((_, packet)) => self.dispatch_packet(&packet),
                        Err(e) => debug!("Dropping undecodable datagram from {}: {}", from, e),
                    },
                    // Windows reports ICMP port unreachable on the receive side
                    Err(e) => debug!("OSC receive error: {}", e),
                },
            }
        }

        info!("OSC receiver stopped");
    }

    pub fn stats(&self) -> TransportStats {
        let last_ms = self.last_message_ms.load(Ordering::Relaxed);
        TransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_message_time: (last_ms > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }

    fn touch(&self) {
        self.last_message_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

impl OscSink for OscTransport {
    fn send(&self, address: &str, args: Vec<OscType>) -> bool {
        OscTransport::send(self, address, args)
    }
}
