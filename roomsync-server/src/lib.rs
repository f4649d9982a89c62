//! # Roomsync Server Library
//!
//! Shared types and functionality for the room coordination server.
//! This library is used by both the binary and integration tests.

pub mod health;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod routes;
pub mod socket;
pub mod sweeper;
pub mod validation;

pub use hub::RoomHub;
pub use protocol::{ClientMessage, ServerMessage};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Room hub for socket sessions and the HTTP surface.
    pub hub: RoomHub,
}

impl AppState {
    /// Create application state with a fresh hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hub: RoomHub::new(),
        }
    }

    /// Get a reference to the room hub.
    pub fn hub(&self) -> &RoomHub {
        &self.hub
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
