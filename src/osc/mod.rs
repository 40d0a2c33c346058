//! OSC transport: socket plumbing, address-pattern dispatch and traffic stats

pub mod args;
mod dispatch;
mod pattern;
mod transport;

pub use dispatch::{handler_fn, HandlerFn, HandlerTable};
pub use pattern::AddressPattern;
pub use transport::{Endpoint, OscTransport, TransportStats};

pub use rosc::{OscMessage, OscType};

/// Anything that can put an OSC message on the wire
///
/// Implemented by the transport itself and by the outbound pacer, so the
/// sync controller can be driven against a recording sink in tests.
pub trait OscSink: Send + Sync {
    /// Fire-and-forget send. Returns false when the message was not sent.
    fn send(&self, address: &str, args: Vec<OscType>) -> bool;

    /// Messages accepted but not yet on the wire
    fn queued(&self) -> usize {
        0
    }
}
