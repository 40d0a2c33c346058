//! Error types for the gateway core
//!
//! Expected runtime conditions (port busy, peer gone, malformed input) are
//! always returned as values. Nothing in the core panics on them.

use thiserror::Error;

/// Failure to establish a connection to the remote session
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Another process already owns the receive port
    #[error("receive port {port} is already in use")]
    PortBusy { port: u16 },

    /// The receive socket could not be bound for another reason
    #[error("failed to bind receive socket on {addr}: {source}")]
    ReceiveBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The outbound socket could not be opened
    #[error("failed to open send socket: {0}")]
    SendSocket(#[source] std::io::Error),

    /// Remote host/port did not resolve to a socket address
    #[error("invalid remote endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl ConnectError {
    /// Short machine-friendly reason, used in logs and status output
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectError::PortBusy { .. } => "port_busy",
            ConnectError::ReceiveBind { .. } => "bind_failed",
            ConnectError::SendSocket(_) => "socket_error",
            ConnectError::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }
}

/// Failure to deliver an outbound message to the socket
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("failed to encode OSC packet: {0}")]
    Encode(String),

    #[error("socket send failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Reference to an entity the session store does not know about
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown track {track}")]
    UnknownTrack { track: usize },

    #[error("unknown clip slot {track}/{scene}")]
    UnknownClip { track: usize, scene: usize },
}
