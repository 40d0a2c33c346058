//! Rate control between the remote session and the UI
//!
//! - `throttle`: per-key minimum interval with trailing coalescing
//! - `batch`: time-windowed grouping into `ui:*` batch events
//! - `feed`: consumer-owned combination of both over the event bus
//! - `cache`: TTL cache for clip metadata
//! - `pacer`: burst-limited outbound queue

mod batch;
mod cache;
mod feed;
mod pacer;
mod throttle;

pub use batch::Batcher;
pub use cache::{ClipCache, ClipMeta, TtlCache};
pub use feed::UiFeed;
pub use pacer::Pacer;
pub use throttle::Throttle;
