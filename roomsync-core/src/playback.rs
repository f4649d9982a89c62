//! Playback rooms - synchronized group-listening state.
//!
//! The room holds the authoritative `(track, isPlaying, position)`
//! triple as of its last update. The true position of a playing track
//! is extrapolated with elapsed wall-clock time, so a late joiner
//! resumes in sync without a separate seek. The engine only ever adds
//! non-negative elapsed time; clamping to track duration is a client
//! concern (the server does not know durations).

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Authoritative playback state for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    /// Opaque track reference.
    pub track: String,
    /// Whether playback is running.
    pub is_playing: bool,
    /// Position in seconds, already extrapolated by the caller's clock.
    pub position: f64,
}

/// Per-room synchronized playback state.
#[derive(Debug)]
pub struct PlaybackRoom {
    /// Opaque track reference, if a track has been loaded.
    current_track: Option<String>,
    /// Whether playback is running.
    is_playing: bool,
    /// Position in seconds as of `updated_at`.
    position_secs: f64,
    /// Monotonic time of the last authoritative update.
    updated_at: Instant,
    /// Wall-clock milliseconds of the last authoritative update.
    updated_at_ms: u64,
    /// Last membership or state change (drives eviction, not playback).
    last_active: Instant,
    /// Ordered, dedup'd participant list.
    participants: Vec<SessionId>,
}

impl PlaybackRoom {
    /// Create an empty room with nothing loaded.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            current_track: None,
            is_playing: false,
            position_secs: 0.0,
            updated_at: now,
            updated_at_ms: now_millis(),
            last_active: now,
            participants: Vec::new(),
        }
    }

    /// Add a session to the participant list, suppressing duplicates.
    ///
    /// Returns `true` if the session was newly added.
    pub fn join(&mut self, session: SessionId, now: Instant) -> bool {
        self.touch(now);
        if self.participants.contains(&session) {
            return false;
        }
        self.participants.push(session);
        true
    }

    /// Remove a session. Returns `true` if the session was a member.
    pub fn leave(&mut self, session: SessionId, now: Instant) -> bool {
        let before = self.participants.len();
        self.participants.retain(|s| *s != session);
        let was_member = self.participants.len() != before;
        if was_member {
            self.touch(now);
        }
        was_member
    }

    /// Overwrite the authoritative playback state.
    ///
    /// A `None` track keeps the currently loaded track, matching the
    /// wire contract where play/pause updates may omit it.
    pub fn set_state(
        &mut self,
        track: Option<String>,
        is_playing: bool,
        position_secs: f64,
        now: Instant,
    ) {
        if let Some(track) = track {
            self.current_track = Some(track);
        }
        self.is_playing = is_playing;
        self.position_secs = position_secs;
        self.stamp(now);
    }

    /// Overwrite only the position, leaving track and play state alone.
    pub fn seek(&mut self, position_secs: f64, now: Instant) {
        self.position_secs = position_secs;
        self.stamp(now);
    }

    /// Position in seconds extrapolated to `now`.
    ///
    /// Playing rooms advance by elapsed time since the last update;
    /// paused rooms report the stored position exactly. A `now` earlier
    /// than the last update (clock races in tests) contributes zero.
    #[must_use]
    pub fn position_at(&self, now: Instant) -> f64 {
        if self.is_playing {
            let elapsed = now.saturating_duration_since(self.updated_at);
            self.position_secs + elapsed.as_secs_f64()
        } else {
            self.position_secs
        }
    }

    /// Extrapolated wire snapshot, present only once a track is loaded.
    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> Option<PlaybackSnapshot> {
        self.current_track.as_ref().map(|track| PlaybackSnapshot {
            track: track.clone(),
            is_playing: self.is_playing,
            position: self.position_at(now),
        })
    }

    /// Opaque track reference, if a track has been loaded.
    #[must_use]
    pub fn current_track(&self) -> Option<&str> {
        self.current_track.as_deref()
    }

    /// Whether playback is running.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Wall-clock milliseconds of the last authoritative update.
    #[must_use]
    pub fn last_updated_ms(&self) -> u64 {
        self.updated_at_ms
    }

    /// Participants in join order.
    #[must_use]
    pub fn participants(&self) -> Vec<SessionId> {
        self.participants.clone()
    }

    /// True when no session is in the room.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Monotonic time of the last authoritative update or membership change.
    #[must_use]
    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    fn stamp(&mut self, now: Instant) {
        self.updated_at = now;
        self.updated_at_ms = now_millis();
        self.last_active = now;
    }

    // Membership changes refresh activity without moving the playback
    // reference point, so a join never shifts extrapolation.
    fn touch(&mut self, now: Instant) {
        self.last_active = now.max(self.last_active);
    }
}

/// Current Unix timestamp in milliseconds.
#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn playing_position_extrapolates_elapsed_time() {
        let t0 = Instant::now();
        let mut room = PlaybackRoom::new(t0);
        room.set_state(Some("track-1".to_string()), true, 10.0, t0);

        let pos = room.position_at(t0 + Duration::from_secs(5));
        assert!((pos - 15.0).abs() < 1e-9, "expected 15.0, got {pos}");
    }

    #[test]
    fn paused_position_does_not_advance() {
        let t0 = Instant::now();
        let mut room = PlaybackRoom::new(t0);
        room.set_state(Some("track-1".to_string()), false, 10.0, t0);

        let pos = room.position_at(t0 + Duration::from_secs(5));
        assert!((pos - 10.0).abs() < 1e-9, "expected 10.0, got {pos}");
    }

    #[test]
    fn omitted_track_keeps_current_track() {
        let t0 = Instant::now();
        let mut room = PlaybackRoom::new(t0);
        room.set_state(Some("track-1".to_string()), true, 0.0, t0);
        room.set_state(None, false, 42.0, t0);

        assert_eq!(room.current_track(), Some("track-1"));
        assert!(!room.is_playing());
    }

    #[test]
    fn seek_moves_only_the_position() {
        let t0 = Instant::now();
        let mut room = PlaybackRoom::new(t0);
        room.set_state(Some("track-1".to_string()), true, 10.0, t0);

        let t1 = t0 + Duration::from_secs(3);
        room.seek(99.5, t1);

        assert_eq!(room.current_track(), Some("track-1"));
        assert!(room.is_playing());
        let pos = room.position_at(t1);
        assert!((pos - 99.5).abs() < 1e-9);
    }

    #[test]
    fn no_snapshot_before_a_track_loads() {
        let t0 = Instant::now();
        let room = PlaybackRoom::new(t0);
        assert!(room.snapshot_at(t0).is_none());
    }

    #[test]
    fn duplicate_joins_are_suppressed() {
        let t0 = Instant::now();
        let mut room = PlaybackRoom::new(t0);
        let s = SessionId::new();
        assert!(room.join(s, t0));
        assert!(!room.join(s, t0));
        assert_eq!(room.participants().len(), 1);
    }

    #[test]
    fn participants_keep_join_order() {
        let t0 = Instant::now();
        let mut room = PlaybackRoom::new(t0);
        let a = SessionId::new();
        let b = SessionId::new();
        let c = SessionId::new();
        room.join(a, t0);
        room.join(b, t0);
        room.join(c, t0);
        room.leave(b, t0);
        assert_eq!(room.participants(), vec![a, c]);
    }
}
