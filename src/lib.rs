//! LiveLink GW - bidirectional OSC sync between a control surface and Ableton Live
//!
//! The pieces, bottom up:
//! - [`osc`]: UDP transport, address pattern dispatch
//! - [`connection`]: connect/disconnect, heartbeat, directory polling
//! - [`session`]: local mirror of the Live session
//! - [`events`]: topic-based event bus between the UI side and the engine
//! - [`sync`]: intents out, remote updates in, without feedback loops
//! - [`rate`]: throttling, batching, clip metadata cache, outbound pacing

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod osc;
pub mod rate;
pub mod session;
pub mod sync;
