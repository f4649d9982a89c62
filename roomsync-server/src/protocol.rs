//! # WebSocket Room Protocol
//!
//! Typed wire protocol for the room coordination socket. The event
//! catalog is a closed set of tagged variants; malformed or unknown
//! messages are rejected at the boundary instead of propagating
//! untyped payloads into room state.
//!
//! ## Message Protocol
//!
//! ### Client -> Server (Signaling)
//!
//! - `{"type": "join-room", "roomId": "1234"}`
//! - `{"type": "start-sharing", "roomId": "1234"}`
//! - `{"type": "stop-sharing", "roomId": "1234"}`
//! - `{"type": "offer", "roomId": "...", "offer": {...}, "recipientId": "..."}`
//! - `{"type": "answer", "roomId": "...", "answer": {...}, "sharerId": "..."}`
//! - `{"type": "ice-candidate", "roomId": "...", "candidate": {...}, "recipientId": "..."}`
//!
//! ### Client -> Server (Document)
//!
//! - `{"type": "join-code-room", "roomId": "5678"}`
//! - `{"type": "code-change", "roomId": "...", "newCode": "..."}`
//! - `{"type": "language-change", "roomId": "...", "newLanguage": "..."}`
//! - `{"type": "selection-change", "roomId": "...", "selections": [...]}`
//!
//! ### Client -> Server (Playback)
//!
//! - `{"type": "join-music-room", "roomId": "..."}` / `{"type": "leave-music-room", ...}`
//! - `{"type": "music-state-update", "roomId": "...", "track": "...", "isPlaying": true, "position": 10.0}`
//! - `{"type": "music-seek", "roomId": "...", "position": 42.0}`
//! - `{"type": "search-query", "roomId": "...", "query": "..."}`
//! - `{"type": "search-update", "roomId": "...", "query": "...", "results": [...]}`
//!
//! Server -> client events mirror the catalog: `welcome`,
//! `user-joined`, `sharer-changed`, `offer`, `answer`, `ice-candidate`,
//! `user-left`, `room-state`, `code-change`, `language-change`,
//! `selection-change`, `code-users-update`, `participants-update`,
//! `music-state-update`, `music-seek`, `search-update`, and `error`.

use std::time::{SystemTime, UNIX_EPOCH};

use roomsync_core::SessionId;
use serde::{Deserialize, Serialize};

/// Client-to-server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join a signaling room by code.
    JoinRoom {
        /// Room code.
        room_id: String,
    },
    /// Claim the publisher slot of a signaling room.
    StartSharing {
        /// Room code.
        room_id: String,
    },
    /// Release the publisher slot of a signaling room.
    StopSharing {
        /// Room code.
        room_id: String,
    },
    /// Relay an SDP offer to one recipient.
    Offer {
        /// Room code.
        room_id: String,
        /// Opaque SDP offer payload.
        offer: serde_json::Value,
        /// Session the offer is for.
        recipient_id: SessionId,
    },
    /// Relay an SDP answer back to the publisher.
    Answer {
        /// Room code.
        room_id: String,
        /// Opaque SDP answer payload.
        answer: serde_json::Value,
        /// Publisher the answer is for.
        sharer_id: SessionId,
    },
    /// Relay an ICE candidate to one recipient.
    IceCandidate {
        /// Room code.
        room_id: String,
        /// Opaque candidate payload.
        candidate: serde_json::Value,
        /// Session the candidate is for.
        recipient_id: SessionId,
    },

    /// Join a document room by code.
    JoinCodeRoom {
        /// Room code.
        room_id: String,
    },
    /// Overwrite the shared document text (last writer wins).
    CodeChange {
        /// Room code.
        room_id: String,
        /// Full replacement text.
        new_code: String,
    },
    /// Overwrite the shared language tag.
    LanguageChange {
        /// Room code.
        room_id: String,
        /// Replacement language tag.
        new_language: String,
    },
    /// Relay cursor/selection decoration to other members.
    SelectionChange {
        /// Room code.
        room_id: String,
        /// Opaque selection ranges, relayed without storage.
        selections: serde_json::Value,
    },

    /// Join a playback room by code.
    JoinMusicRoom {
        /// Room code.
        room_id: String,
    },
    /// Explicitly leave a playback room.
    LeaveMusicRoom {
        /// Room code.
        room_id: String,
    },
    /// Overwrite the authoritative playback state.
    MusicStateUpdate {
        /// Room code.
        room_id: String,
        /// New track; omitted to keep the current one.
        #[serde(default)]
        track: Option<String>,
        /// Whether playback is running.
        is_playing: bool,
        /// Position in seconds.
        position: f64,
    },
    /// Move only the playback position.
    MusicSeek {
        /// Room code.
        room_id: String,
        /// Position in seconds.
        position: f64,
    },
    /// Relay a search query to other members.
    SearchQuery {
        /// Room code.
        room_id: String,
        /// Search query text.
        query: String,
    },
    /// Relay search results to other members.
    SearchUpdate {
        /// Room code.
        room_id: String,
        /// Search query text.
        query: String,
        /// Opaque result payload.
        results: serde_json::Value,
    },
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Connection handshake with the assigned session ID.
    Welcome {
        /// Server version.
        version: String,
        /// Session ID assigned to this connection.
        user_id: SessionId,
        /// Connection timestamp (Unix ms).
        timestamp: u64,
    },

    /// A session joined a signaling room.
    UserJoined {
        /// The session that joined.
        user_id: SessionId,
        /// Active publisher, if the room is `Sharing`.
        active_sharer: Option<SessionId>,
        /// Members after the join.
        users: Vec<SessionId>,
    },
    /// The publisher slot changed hands (or was released: `null`).
    SharerChanged {
        /// New publisher, or `None` when sharing stopped.
        sharer_id: Option<SessionId>,
    },
    /// Relayed SDP offer.
    Offer {
        /// Opaque SDP offer payload.
        offer: serde_json::Value,
        /// Session that sent the offer.
        sharer_id: SessionId,
    },
    /// Relayed SDP answer.
    Answer {
        /// Opaque SDP answer payload.
        answer: serde_json::Value,
        /// Session that sent the answer.
        viewer_id: SessionId,
    },
    /// Relayed ICE candidate.
    IceCandidate {
        /// Opaque candidate payload.
        candidate: serde_json::Value,
        /// Session that sent the candidate.
        sender_id: SessionId,
    },
    /// A session left a signaling room.
    UserLeft {
        /// The session that left.
        user_id: SessionId,
        /// Remaining members.
        users: Vec<SessionId>,
    },

    /// Document content snapshot for a joining session.
    RoomState {
        /// Current document text.
        code: String,
        /// Current language tag.
        language: String,
    },
    /// Broadcast document edit, sender excluded.
    CodeChange {
        /// Full replacement text.
        new_code: String,
        /// Session that made the edit.
        source: SessionId,
    },
    /// Broadcast language change, sender excluded.
    LanguageChange {
        /// Replacement language tag.
        new_language: String,
        /// Session that made the change.
        source: SessionId,
    },
    /// Relayed selection decoration, sender excluded.
    SelectionChange {
        /// Opaque selection ranges.
        selections: serde_json::Value,
        /// Session the selections belong to.
        source: SessionId,
    },
    /// Document room membership update.
    CodeUsersUpdate {
        /// Current members.
        users: Vec<SessionId>,
    },

    /// Playback room membership update.
    ParticipantsUpdate {
        /// Current participants in join order.
        participant_ids: Vec<SessionId>,
    },
    /// Authoritative playback state.
    MusicStateUpdate {
        /// Current track, if one is loaded.
        track: Option<String>,
        /// Whether playback is running.
        is_playing: bool,
        /// Position in seconds.
        position: f64,
    },
    /// Lightweight position-only update.
    MusicSeek {
        /// Position in seconds.
        position: f64,
    },
    /// Relayed search query or results.
    SearchUpdate {
        /// Search query text.
        query: String,
        /// Result payload, absent for query-only relays.
        #[serde(skip_serializing_if = "Option::is_none")]
        results: Option<serde_json::Value>,
    },

    /// Boundary rejection of a malformed or oversized message.
    Error {
        /// Machine-readable error code.
        code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ServerMessage {
    /// Short tag name for logging and metrics.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::UserJoined { .. } => "user-joined",
            Self::SharerChanged { .. } => "sharer-changed",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::UserLeft { .. } => "user-left",
            Self::RoomState { .. } => "room-state",
            Self::CodeChange { .. } => "code-change",
            Self::LanguageChange { .. } => "language-change",
            Self::SelectionChange { .. } => "selection-change",
            Self::CodeUsersUpdate { .. } => "code-users-update",
            Self::ParticipantsUpdate { .. } => "participants-update",
            Self::MusicStateUpdate { .. } => "music-state-update",
            Self::MusicSeek { .. } => "music-seek",
            Self::SearchUpdate { .. } => "search-update",
            Self::Error { .. } => "error",
        }
    }
}

/// Get the current Unix timestamp in milliseconds.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
