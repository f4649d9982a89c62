//! WebSocket connection handling.
//!
//! One task per connection: inbound frames are rate limited, size
//! checked, parsed into [`ClientMessage`] and dispatched to the
//! [`RoomHub`]; outbound messages arrive on the per-peer channel the
//! hub writes to. Disconnect (graceful or not) funnels into
//! `unregister_peer`, which removes the session from every room.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use roomsync_core::SessionId;

use crate::hub::RoomHub;
use crate::metrics::{record_rate_limited, record_validation_failure, set_connected_peers};
use crate::protocol::{current_timestamp, ClientMessage, ServerMessage};
use crate::validation::{
    validate_document, validate_ice_candidate, validate_language, validate_message_size,
    validate_position, validate_query, validate_room_code, validate_sdp, validate_track_id,
    ValidationError,
};

/// Default burst capacity for rate limiting (messages).
const DEFAULT_RATE_LIMIT_BURST: u32 = 100;
/// Default sustained rate for rate limiting (messages per second).
const DEFAULT_RATE_LIMIT_SUSTAINED: u32 = 10;

/// Token bucket rate limiter for WebSocket connections.
///
/// Allows burst traffic up to `capacity` tokens, refilling at `refill_rate` tokens per second.
pub struct RateLimiter {
    /// Current number of available tokens.
    tokens: f64,
    /// Maximum token capacity (burst limit).
    capacity: f64,
    /// Tokens added per second (sustained rate).
    refill_rate: f64,
    /// Last time tokens were refilled.
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    ///
    /// * `burst_capacity` - Maximum number of tokens (burst limit)
    /// * `sustained_rate` - Tokens added per second (sustained rate)
    #[must_use]
    pub fn new(burst_capacity: u32, sustained_rate: u32) -> Self {
        Self {
            tokens: f64::from(burst_capacity),
            capacity: f64::from(burst_capacity),
            refill_rate: f64::from(sustained_rate),
            last_refill: Instant::now(),
        }
    }

    /// Create a rate limiter from environment variables or defaults.
    ///
    /// Environment variables:
    /// - `WS_RATE_LIMIT_BURST`: Burst capacity (default: 100)
    /// - `WS_RATE_LIMIT_SUSTAINED`: Sustained rate per second (default: 10)
    #[must_use]
    pub fn from_env() -> Self {
        let burst = std::env::var("WS_RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST);
        let sustained = std::env::var("WS_RATE_LIMIT_SUSTAINED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_SUSTAINED);
        Self::new(burst, sustained)
    }

    /// Try to consume one token. Returns true if allowed, false if rate limited.
    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let new_tokens = elapsed.as_secs_f64() * self.refill_rate;
        self.tokens = (self.tokens + new_tokens).min(self.capacity);
        self.last_refill = now;
    }

    /// Get the time until the next token is available.
    ///
    /// Returns `None` if tokens are already available.
    #[must_use]
    pub fn time_until_available(&self) -> Option<Duration> {
        if self.tokens >= 1.0 {
            None
        } else {
            let needed = 1.0 - self.tokens;
            let seconds = needed / self.refill_rate;
            Some(Duration::from_secs_f64(seconds))
        }
    }
}

/// Handle a WebSocket room connection.
pub async fn handle_room_socket(socket: WebSocket, hub: RoomHub) {
    let (mut sender, mut receiver) = socket.split();

    let session = SessionId::new();
    let mut rate_limiter = RateLimiter::from_env();
    let mut peer_rx = hub.register_peer(session);
    set_connected_peers(hub.peer_count());

    // Welcome handshake with the assigned session ID.
    let welcome = ServerMessage::Welcome {
        version: env!("CARGO_PKG_VERSION").to_string(),
        user_id: session,
        timestamp: current_timestamp(),
    };
    match serde_json::to_string(&welcome) {
        Ok(json) => {
            if sender.send(Message::Text(json.into())).await.is_err() {
                hub.unregister_peer(session);
                set_connected_peers(hub.peer_count());
                return;
            }
        }
        Err(e) => {
            tracing::error!(session = %session, "Failed to serialize welcome message: {}", e);
            hub.unregister_peer(session);
            set_connected_peers(hub.peer_count());
            return;
        }
    }

    loop {
        tokio::select! {
            // Inbound frames from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !rate_limiter.try_consume() {
                            tracing::warn!("Rate limit exceeded for session {}", session);
                            record_rate_limited("websocket");
                            let retry_after = rate_limiter
                                .time_until_available()
                                .map_or(100, |d| d.as_millis().min(10000) as u64);
                            let error = ServerMessage::Error {
                                code: "rate_limited".to_string(),
                                message: format!("Rate limit exceeded. Retry after {retry_after}ms"),
                            };
                            if let Ok(json) = serde_json::to_string(&error) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            continue;
                        }

                        if let Err(e) = validate_message_size(text.len()) {
                            tracing::warn!("Message from session {} rejected: {}", session, e);
                            record_validation_failure("message_size");
                            let error = ServerMessage::Error {
                                code: "message_too_large".to_string(),
                                message: e.to_string(),
                            };
                            if let Ok(json) = serde_json::to_string(&error) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            continue;
                        }

                        tracing::debug!("Received from {}: {}", session, text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) = dispatch(&hub, session, client_msg) {
                                    if let Ok(json) = serde_json::to_string(&response) {
                                        if sender.send(Message::Text(json.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                let error = ServerMessage::Error {
                                    code: "parse_error".to_string(),
                                    message: e.to_string(),
                                };
                                if let Ok(json) = serde_json::to_string(&error) {
                                    if sender.send(Message::Text(json.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("Session {} disconnected", session);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error for session {}: {}", session, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // Outbound messages queued by the hub
            peer_msg = peer_rx.recv() => {
                match peer_msg {
                    Some(message) => {
                        if let Ok(json) = serde_json::to_string(&message) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        // Channel closed, session was unregistered
                        tracing::debug!("Session {} channel closed", session);
                        break;
                    }
                }
            }
        }
    }

    hub.unregister_peer(session);
    set_connected_peers(hub.peer_count());
    tracing::info!("WebSocket connection for session {} closed", session);
}

/// Validate and dispatch one client message.
///
/// Returns a rejection to send back to the client, or `None` when the
/// message was accepted (room events reach the client on its peer
/// channel, not as a direct response).
fn dispatch(hub: &RoomHub, session: SessionId, message: ClientMessage) -> Option<ServerMessage> {
    match message {
        ClientMessage::JoinRoom { room_id } => {
            if let Err(e) = validate_room_code(&room_id) {
                return Some(rejection("invalid_room_code", &e));
            }
            hub.join_signaling(&room_id, session);
            None
        }
        ClientMessage::StartSharing { room_id } => {
            if let Err(e) = validate_room_code(&room_id) {
                return Some(rejection("invalid_room_code", &e));
            }
            hub.start_sharing(&room_id, session);
            None
        }
        ClientMessage::StopSharing { room_id } => {
            if let Err(e) = validate_room_code(&room_id) {
                return Some(rejection("invalid_room_code", &e));
            }
            hub.stop_sharing(&room_id, session);
            None
        }
        ClientMessage::Offer {
            room_id,
            offer,
            recipient_id,
        } => {
            if let Err(e) = validate_sdp(&offer) {
                return Some(rejection("invalid_sdp", &e));
            }
            hub.relay_offer(&room_id, offer, recipient_id, session);
            None
        }
        ClientMessage::Answer {
            room_id,
            answer,
            sharer_id,
        } => {
            if let Err(e) = validate_sdp(&answer) {
                return Some(rejection("invalid_sdp", &e));
            }
            hub.relay_answer(&room_id, answer, sharer_id, session);
            None
        }
        ClientMessage::IceCandidate {
            room_id,
            candidate,
            recipient_id,
        } => {
            if let Err(e) = validate_ice_candidate(&candidate) {
                return Some(rejection("invalid_ice_candidate", &e));
            }
            hub.relay_ice_candidate(&room_id, candidate, recipient_id, session);
            None
        }
        ClientMessage::JoinCodeRoom { room_id } => {
            if let Err(e) = validate_room_code(&room_id) {
                return Some(rejection("invalid_room_code", &e));
            }
            hub.join_document(&room_id, session);
            None
        }
        ClientMessage::CodeChange { room_id, new_code } => {
            if let Err(e) = validate_document(&new_code) {
                return Some(rejection("document_too_large", &e));
            }
            hub.code_change(&room_id, session, new_code);
            None
        }
        ClientMessage::LanguageChange {
            room_id,
            new_language,
        } => {
            if let Err(e) = validate_language(&new_language) {
                return Some(rejection("invalid_language", &e));
            }
            hub.language_change(&room_id, session, new_language);
            None
        }
        ClientMessage::SelectionChange {
            room_id,
            selections,
        } => {
            hub.selection_change(&room_id, session, selections);
            None
        }
        ClientMessage::JoinMusicRoom { room_id } => {
            if let Err(e) = validate_room_code(&room_id) {
                return Some(rejection("invalid_room_code", &e));
            }
            hub.join_playback(&room_id, session);
            None
        }
        ClientMessage::LeaveMusicRoom { room_id } => {
            hub.leave_playback(&room_id, session);
            None
        }
        ClientMessage::MusicStateUpdate {
            room_id,
            track,
            is_playing,
            position,
        } => {
            if let Some(track) = &track {
                if let Err(e) = validate_track_id(track) {
                    return Some(rejection("invalid_track", &e));
                }
            }
            if let Err(e) = validate_position(position) {
                return Some(rejection("invalid_position", &e));
            }
            hub.music_state_update(&room_id, session, track, is_playing, position);
            None
        }
        ClientMessage::MusicSeek { room_id, position } => {
            if let Err(e) = validate_position(position) {
                return Some(rejection("invalid_position", &e));
            }
            hub.music_seek(&room_id, session, position);
            None
        }
        ClientMessage::SearchQuery { room_id, query } => {
            if let Err(e) = validate_query(&query) {
                return Some(rejection("invalid_query", &e));
            }
            hub.search_query(&room_id, session, query);
            None
        }
        ClientMessage::SearchUpdate {
            room_id,
            query,
            results,
        } => {
            if let Err(e) = validate_query(&query) {
                return Some(rejection("invalid_query", &e));
            }
            hub.search_update(&room_id, session, query, results);
            None
        }
    }
}

fn rejection(code: &str, error: &ValidationError) -> ServerMessage {
    record_validation_failure(code);
    ServerMessage::Error {
        code: code.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_burst() {
        let mut limiter = RateLimiter::new(5, 1);
        for _ in 0..5 {
            assert!(limiter.try_consume());
        }
        assert!(!limiter.try_consume());
    }

    #[test]
    fn test_rate_limiter_refills_over_time() {
        let mut limiter = RateLimiter::new(1, 1000);
        assert!(limiter.try_consume());
        assert!(!limiter.try_consume());
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.try_consume());
    }

    #[test]
    fn test_rate_limiter_time_until_available() {
        let mut limiter = RateLimiter::new(1, 10);
        assert!(limiter.time_until_available().is_none());
        assert!(limiter.try_consume());
        let wait = limiter.time_until_available().expect("should need to wait");
        assert!(wait <= Duration::from_millis(100));
    }

    #[test]
    fn test_rate_limiter_capacity_capped() {
        let mut limiter = RateLimiter::new(2, 1000);
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.try_consume());
        assert!(limiter.try_consume());
        assert!(!limiter.try_consume());
    }

    #[test]
    fn dispatch_rejects_bad_room_codes() {
        let hub = RoomHub::new();
        let session = SessionId::new();
        let response = dispatch(
            &hub,
            session,
            ClientMessage::JoinRoom {
                room_id: "has spaces".to_string(),
            },
        );
        assert!(matches!(
            response,
            Some(ServerMessage::Error { code, .. }) if code == "invalid_room_code"
        ));
    }

    #[test]
    fn dispatch_accepts_valid_join() {
        let hub = RoomHub::new();
        let session = SessionId::new();
        let _rx = hub.register_peer(session);
        let response = dispatch(
            &hub,
            session,
            ClientMessage::JoinRoom {
                room_id: "1234".to_string(),
            },
        );
        assert!(response.is_none());
        assert_eq!(hub.store().room_count(roomsync_core::RoomKind::Signaling), 1);
    }

    #[test]
    fn dispatch_rejects_negative_seek() {
        let hub = RoomHub::new();
        let session = SessionId::new();
        let response = dispatch(
            &hub,
            session,
            ClientMessage::MusicSeek {
                room_id: "m1".to_string(),
                position: -2.0,
            },
        );
        assert!(matches!(
            response,
            Some(ServerMessage::Error { code, .. }) if code == "invalid_position"
        ));
    }
}
