//! # Roomsync Core
//!
//! Room state machines and the shared room registry for the roomsync
//! coordination server. The transport layer lives in `roomsync-server`;
//! this crate is purely about per-room state.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 RoomStore                   │
//! ├──────────────┬──────────────┬───────────────┤
//! │  Signaling   │  Document    │  Playback     │
//! │  - publisher │  - LWW text  │  - track      │
//! │  - viewers   │  - language  │  - position   │
//! ├──────────────┴──────────────┴───────────────┤
//! │  Reverse index: session → {(kind, code)}    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Rooms are created lazily on first join, mutated only through the
//! store's API, and torn down either eagerly (signaling, document) or
//! by the inactivity sweep (playback).

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod document;
pub mod playback;
pub mod session;
pub mod signaling;
pub mod store;

pub use document::{DocumentRoom, DocumentSnapshot, DEFAULT_LANGUAGE, DEFAULT_TEXT};
pub use playback::{PlaybackRoom, PlaybackSnapshot};
pub use session::SessionId;
pub use signaling::{ShareTransition, SignalingRoom};
pub use store::{
    Departure, DocumentJoin, PlaybackJoin, PlaybackListing, RoomKind, RoomStore, SignalingJoin,
    StoreError,
};
