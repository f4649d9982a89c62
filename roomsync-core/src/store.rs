//! Shared room registry for multi-connection access.
//!
//! Provides a thread-safe [`RoomStore`] holding the three room kinds in
//! independent maps. Every room sits behind its own mutex, so two
//! concurrent operations on the same room serialize while operations on
//! different rooms never block each other. A reverse index from session
//! to room memberships makes disconnect cleanup O(memberships) instead
//! of a scan over every room.
//!
//! All operations referencing a missing room or a session that is not a
//! member are silent no-ops; real-time callers treat absence as a race,
//! not an error.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::document::{DocumentRoom, DocumentSnapshot};
use crate::playback::{PlaybackRoom, PlaybackSnapshot};
use crate::session::SessionId;
use crate::signaling::SignalingRoom;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),
}

/// The three kinds of room sharing the code namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// WebRTC negotiation rooms.
    Signaling,
    /// Collaborative document rooms.
    Document,
    /// Synchronized playback rooms.
    Playback,
}

impl std::fmt::Display for RoomKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signaling => write!(f, "signaling"),
            Self::Document => write!(f, "document"),
            Self::Playback => write!(f, "playback"),
        }
    }
}

/// Room snapshot handed back by a signaling join.
#[derive(Debug, Clone)]
pub struct SignalingJoin {
    /// Members after the join, the joiner included.
    pub users: Vec<SessionId>,
    /// Active publisher, if the room is in the `Sharing` state.
    pub active_publisher: Option<SessionId>,
}

/// Room snapshot handed back by a document join.
#[derive(Debug, Clone)]
pub struct DocumentJoin {
    /// Current document content for initial sync.
    pub snapshot: DocumentSnapshot,
    /// Members after the join, the joiner included.
    pub users: Vec<SessionId>,
}

/// Room snapshot handed back by a playback join.
#[derive(Debug, Clone)]
pub struct PlaybackJoin {
    /// Participants after the join, in join order.
    pub participants: Vec<SessionId>,
    /// Extrapolated playback state, present once a track is loaded.
    pub state: Option<PlaybackSnapshot>,
}

/// One room a disconnecting session was removed from.
///
/// Each variant carries exactly what the transport layer needs to
/// broadcast to the remaining members.
#[derive(Debug, Clone)]
pub enum Departure {
    /// Removed from a signaling room.
    Signaling {
        /// Room code.
        code: String,
        /// Remaining members.
        users: Vec<SessionId>,
        /// True when the departing session was the active publisher.
        publisher_cleared: bool,
    },
    /// Removed from a document room.
    Document {
        /// Room code.
        code: String,
        /// Remaining members.
        users: Vec<SessionId>,
    },
    /// Removed from a playback room.
    Playback {
        /// Room code.
        code: String,
        /// Remaining participants.
        participants: Vec<SessionId>,
    },
}

/// Playback room listing for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackListing {
    /// Room code.
    pub id: String,
    /// Number of current participants.
    pub participant_count: usize,
    /// Opaque track reference, if a track has been loaded.
    pub current_track: Option<String>,
    /// Whether playback is running.
    pub is_playing: bool,
    /// Position in seconds extrapolated to the time of the listing.
    pub position: f64,
    /// Wall-clock milliseconds of the last authoritative update.
    pub last_updated: u64,
}

type RoomMap<R> = Arc<RwLock<HashMap<String, Arc<Mutex<R>>>>>;
type ReverseIndex = Arc<RwLock<HashMap<SessionId, HashSet<(RoomKind, String)>>>>;

/// Thread-safe registry of all live rooms.
#[derive(Debug, Clone, Default)]
pub struct RoomStore {
    signaling: RoomMap<SignalingRoom>,
    document: RoomMap<DocumentRoom>,
    playback: RoomMap<PlaybackRoom>,
    index: ReverseIndex,
}

impl RoomStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- signaling rooms ----

    /// Join a signaling room, creating it on first use.
    ///
    /// Idempotent for a given `(code, session)` pair: repeated joins
    /// collapse and return the current room snapshot either way.
    /// `deliver` runs while the room is still locked, so messages it
    /// enqueues are ordered with every other operation on this room.
    pub fn join_signaling(
        &self,
        code: &str,
        session: SessionId,
        now: Instant,
        deliver: impl FnOnce(&SignalingJoin),
    ) -> SignalingJoin {
        let snapshot = {
            let mut rooms = write_map(&self.signaling);
            let room = rooms
                .entry(code.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SignalingRoom::new(now))));
            let mut room = lock_room(room);
            room.join(session, now);
            let snapshot = SignalingJoin {
                users: room.participants(),
                active_publisher: room.active_publisher(),
            };
            deliver(&snapshot);
            snapshot
        };
        self.index_insert(session, RoomKind::Signaling, code);
        snapshot
    }

    /// Run `f` against a signaling room, if it exists.
    pub fn with_signaling<T>(&self, code: &str, f: impl FnOnce(&mut SignalingRoom) -> T) -> Option<T> {
        let room = read_map(&self.signaling).get(code).cloned()?;
        let mut room = lock_room(&room);
        Some(f(&mut room))
    }

    // ---- document rooms ----

    /// Join a document room, creating it with placeholder content on
    /// first use.
    ///
    /// `deliver` runs while the room is still locked: the content
    /// snapshot it sees cannot be overtaken by an edit applied after
    /// the join.
    pub fn join_document(
        &self,
        code: &str,
        session: SessionId,
        now: Instant,
        deliver: impl FnOnce(&DocumentJoin),
    ) -> DocumentJoin {
        let snapshot = {
            let mut rooms = write_map(&self.document);
            let room = rooms
                .entry(code.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(DocumentRoom::new(now))));
            let mut room = lock_room(room);
            room.join(session, now);
            let snapshot = DocumentJoin {
                snapshot: room.snapshot(),
                users: room.participants(),
            };
            deliver(&snapshot);
            snapshot
        };
        self.index_insert(session, RoomKind::Document, code);
        snapshot
    }

    /// Run `f` against a document room, if it exists.
    pub fn with_document<T>(&self, code: &str, f: impl FnOnce(&mut DocumentRoom) -> T) -> Option<T> {
        let room = read_map(&self.document).get(code).cloned()?;
        let mut room = lock_room(&room);
        Some(f(&mut room))
    }

    // ---- playback rooms ----

    /// Join a playback room, creating it on first use.
    ///
    /// `deliver` runs while the room is still locked, like the other
    /// join operations.
    pub fn join_playback(
        &self,
        code: &str,
        session: SessionId,
        now: Instant,
        deliver: impl FnOnce(&PlaybackJoin),
    ) -> PlaybackJoin {
        let snapshot = {
            let mut rooms = write_map(&self.playback);
            let room = rooms
                .entry(code.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(PlaybackRoom::new(now))));
            let mut room = lock_room(room);
            room.join(session, now);
            let snapshot = PlaybackJoin {
                participants: room.participants(),
                state: room.snapshot_at(now),
            };
            deliver(&snapshot);
            snapshot
        };
        self.index_insert(session, RoomKind::Playback, code);
        snapshot
    }

    /// Create an empty playback room for the HTTP surface.
    ///
    /// Idempotent: an existing room with the same code is left alone.
    pub fn create_playback(&self, code: &str, now: Instant) {
        let mut rooms = write_map(&self.playback);
        rooms
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PlaybackRoom::new(now))));
    }

    /// Explicitly leave a playback room.
    ///
    /// Returns the remaining participants for broadcast, or `None` if
    /// the room did not exist or the session was not a member. The room
    /// itself lingers even when empty; only the inactivity sweep
    /// removes it, so a quick rejoin finds its state intact. `deliver`
    /// runs over the remaining participants while the room is still
    /// locked.
    pub fn leave_playback(
        &self,
        code: &str,
        session: SessionId,
        now: Instant,
        deliver: impl FnOnce(&[SessionId]),
    ) -> Option<Vec<SessionId>> {
        self.index_remove(session, RoomKind::Playback, code);
        let room = read_map(&self.playback).get(code).cloned()?;
        let mut room = lock_room(&room);
        if room.leave(session, now) {
            let remaining = room.participants();
            deliver(&remaining);
            Some(remaining)
        } else {
            None
        }
    }

    /// Run `f` against a playback room, if it exists.
    pub fn with_playback<T>(&self, code: &str, f: impl FnOnce(&mut PlaybackRoom) -> T) -> Option<T> {
        let room = read_map(&self.playback).get(code).cloned()?;
        let mut room = lock_room(&room);
        Some(f(&mut room))
    }

    /// Listing of every playback room, positions extrapolated to `now`.
    #[must_use]
    pub fn list_playback(&self, now: Instant) -> Vec<PlaybackListing> {
        let rooms: Vec<(String, Arc<Mutex<PlaybackRoom>>)> = read_map(&self.playback)
            .iter()
            .map(|(code, room)| (code.clone(), Arc::clone(room)))
            .collect();
        rooms
            .into_iter()
            .map(|(code, room)| listing(&code, &lock_room(&room), now))
            .collect()
    }

    /// Listing of one playback room, position extrapolated to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RoomNotFound`] if no room has this code.
    pub fn playback_listing(&self, code: &str, now: Instant) -> Result<PlaybackListing, StoreError> {
        let room = read_map(&self.playback)
            .get(code)
            .cloned()
            .ok_or_else(|| StoreError::RoomNotFound(code.to_string()))?;
        let room = lock_room(&room);
        Ok(listing(code, &room, now))
    }

    // ---- lifecycle ----

    /// Remove a session from every room it is a member of.
    ///
    /// Walks the reverse index rather than every room. Signaling and
    /// document rooms left empty are deleted eagerly; playback rooms
    /// are left for the inactivity sweep. `deliver` runs once per room
    /// the session was actually removed from, while that room is still
    /// locked, so departure broadcasts are ordered with the room's
    /// other events. The same departures come back as a `Vec`.
    pub fn disconnect_all(
        &self,
        session: SessionId,
        now: Instant,
        mut deliver: impl FnMut(&Departure),
    ) -> Vec<Departure> {
        let memberships = write_index(&self.index).remove(&session).unwrap_or_default();

        let mut departures = Vec::with_capacity(memberships.len());
        for (kind, code) in memberships {
            let departure = match kind {
                RoomKind::Signaling => self.depart_signaling(&code, session, now, &mut deliver),
                RoomKind::Document => self.depart_document(&code, session, now, &mut deliver),
                RoomKind::Playback => self.depart_playback(&code, session, now, &mut deliver),
            };
            if let Some(departure) = departure {
                departures.push(departure);
            }
        }
        departures
    }

    /// Delete playback rooms that are empty and inactive beyond
    /// `threshold`. Occupied rooms are never deleted, regardless of
    /// age. Returns the evicted room codes.
    pub fn sweep_playback(&self, now: Instant, threshold: Duration) -> Vec<String> {
        let mut rooms = write_map(&self.playback);
        let expired: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| {
                let room = lock_room(room);
                room.is_empty() && now.saturating_duration_since(room.last_active()) > threshold
            })
            .map(|(code, _)| code.clone())
            .collect();
        for code in &expired {
            rooms.remove(code);
            tracing::info!(room = %code, "Evicted inactive playback room");
        }
        expired
    }

    /// Number of live rooms of the given kind.
    #[must_use]
    pub fn room_count(&self, kind: RoomKind) -> usize {
        match kind {
            RoomKind::Signaling => read_map(&self.signaling).len(),
            RoomKind::Document => read_map(&self.document).len(),
            RoomKind::Playback => read_map(&self.playback).len(),
        }
    }

    /// True when a playback room with this code exists.
    #[must_use]
    pub fn playback_exists(&self, code: &str) -> bool {
        read_map(&self.playback).contains_key(code)
    }

    // ---- internals ----

    fn depart_signaling(
        &self,
        code: &str,
        session: SessionId,
        now: Instant,
        deliver: &mut impl FnMut(&Departure),
    ) -> Option<Departure> {
        let mut rooms = write_map(&self.signaling);
        let room = rooms.get(code).cloned()?;
        let mut locked = lock_room(&room);
        let had_publisher = locked.active_publisher() == Some(session);
        if !locked.leave(session, now) {
            return None;
        }
        let departure = Departure::Signaling {
            code: code.to_string(),
            users: locked.participants(),
            publisher_cleared: had_publisher,
        };
        deliver(&departure);
        let empty = locked.is_empty();
        drop(locked);
        if empty {
            rooms.remove(code);
        }
        Some(departure)
    }

    fn depart_document(
        &self,
        code: &str,
        session: SessionId,
        now: Instant,
        deliver: &mut impl FnMut(&Departure),
    ) -> Option<Departure> {
        let mut rooms = write_map(&self.document);
        let room = rooms.get(code).cloned()?;
        let mut locked = lock_room(&room);
        if !locked.leave(session, now) {
            return None;
        }
        let departure = Departure::Document {
            code: code.to_string(),
            users: locked.participants(),
        };
        deliver(&departure);
        let empty = locked.is_empty();
        drop(locked);
        if empty {
            rooms.remove(code);
        }
        Some(departure)
    }

    fn depart_playback(
        &self,
        code: &str,
        session: SessionId,
        now: Instant,
        deliver: &mut impl FnMut(&Departure),
    ) -> Option<Departure> {
        let room = read_map(&self.playback).get(code).cloned()?;
        let mut locked = lock_room(&room);
        if !locked.leave(session, now) {
            return None;
        }
        let departure = Departure::Playback {
            code: code.to_string(),
            participants: locked.participants(),
        };
        deliver(&departure);
        Some(departure)
    }

    fn index_insert(&self, session: SessionId, kind: RoomKind, code: &str) {
        write_index(&self.index)
            .entry(session)
            .or_default()
            .insert((kind, code.to_string()));
    }

    fn index_remove(&self, session: SessionId, kind: RoomKind, code: &str) {
        let mut index = write_index(&self.index);
        if let Some(memberships) = index.get_mut(&session) {
            memberships.remove(&(kind, code.to_string()));
            if memberships.is_empty() {
                index.remove(&session);
            }
        }
    }
}

fn listing(code: &str, room: &PlaybackRoom, now: Instant) -> PlaybackListing {
    PlaybackListing {
        id: code.to_string(),
        participant_count: room.participants().len(),
        current_track: room.current_track().map(str::to_string),
        is_playing: room.is_playing(),
        position: room.position_at(now),
        last_updated: room.last_updated_ms(),
    }
}

// Poisoned locks are recovered rather than propagated: a panic while a
// room was held leaves state no worse than any other lost-update race
// this protocol already tolerates.

fn read_map<R>(map: &RoomMap<R>) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Mutex<R>>>> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_map<R>(
    map: &RoomMap<R>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Mutex<R>>>> {
    map.write().unwrap_or_else(PoisonError::into_inner)
}

fn write_index(
    index: &ReverseIndex,
) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, HashSet<(RoomKind, String)>>> {
    index.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock_room<R>(room: &Arc<Mutex<R>>) -> std::sync::MutexGuard<'_, R> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}
