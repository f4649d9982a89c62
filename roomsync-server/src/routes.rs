//! HTTP room management API.
//!
//! Playback rooms can be created and discovered over plain HTTP before
//! any socket connects. Joining over HTTP is read-only: it returns the
//! room snapshot without adding a participant, since membership is
//! only tracked for live socket sessions.

use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use roomsync_core::PlaybackListing;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;

/// Response envelope for a single room.
#[derive(Debug, Serialize)]
pub struct RoomResponse {
    /// Always true; failures use the error envelope instead.
    pub success: bool,
    /// Room snapshot with extrapolated position.
    pub room: PlaybackListing,
}

/// Response envelope for a room listing.
#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    /// Always true; failures use the error envelope instead.
    pub success: bool,
    /// All playback rooms, occupied or lingering.
    pub rooms: Vec<PlaybackListing>,
}

/// Create a playback room with a fresh short code.
#[tracing::instrument(name = "create_music_room", skip(state))]
pub async fn create_music_room(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.hub.store();

    let code = loop {
        let candidate = generate_room_code();
        if !store.playback_exists(&candidate) {
            break candidate;
        }
    };

    store.create_playback(&code, Instant::now());
    tracing::info!(room = %code, "Created playback room");

    // create_playback just inserted the room, so the lookup cannot miss
    match store.playback_listing(&code, Instant::now()) {
        Ok(room) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "roomId": code,
                "room": room,
            })),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "Room creation failed",
            })),
        ),
    }
}

/// List all playback rooms with extrapolated positions.
#[tracing::instrument(name = "list_music_rooms", skip(state))]
pub async fn list_music_rooms(State(state): State<AppState>) -> Json<RoomsResponse> {
    let rooms = state.hub.store().list_playback(Instant::now());
    Json(RoomsResponse {
        success: true,
        rooms,
    })
}

/// Get one playback room by code.
#[tracing::instrument(name = "get_music_room", skip(state))]
pub async fn get_music_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    room_snapshot(&state, &room_id)
}

/// Preview a playback room before connecting a socket.
///
/// Same response as a lookup; joining for real happens over the socket.
#[tracing::instrument(name = "join_music_room", skip(state))]
pub async fn join_music_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    room_snapshot(&state, &room_id)
}

fn room_snapshot(state: &AppState, room_id: &str) -> (StatusCode, Json<serde_json::Value>) {
    match state.hub.store().playback_listing(room_id, Instant::now()) {
        Ok(room) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "room": room,
            })),
        ),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": "Room not found",
            })),
        ),
    }
}

/// Generate a short lowercase room code.
fn generate_room_code() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..6].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_short_and_url_safe() {
        for _ in 0..32 {
            let code = generate_room_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn room_response_serializes_camel_case() {
        let listing = PlaybackListing {
            id: "abc123".to_string(),
            participant_count: 2,
            current_track: Some("track-1".to_string()),
            is_playing: true,
            position: 12.5,
            last_updated: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&RoomResponse {
            success: true,
            room: listing,
        })
        .expect("should serialize");
        assert!(json.contains(r#""participantCount":2"#));
        assert!(json.contains(r#""currentTrack":"track-1""#));
        assert!(json.contains(r#""isPlaying":true"#));
        assert!(json.contains(r#""lastUpdated""#));
    }
}
