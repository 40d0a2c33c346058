//! Local mirror of the remote session: tracks, clip slots, tempo

mod store;
pub mod types;

pub use store::{SessionState, SessionStore};
pub use types::{
    clamp_pan, clamp_send, clamp_tempo, clamp_volume, ClipSlot, ClipStatus, EntityKey, SendSlot,
    TempoState, Track, TrackParam,
};
