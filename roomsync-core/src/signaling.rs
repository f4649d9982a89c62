//! Signaling rooms - screen-share negotiation state.
//!
//! A signaling room is either `Idle` (no publisher) or `Sharing`
//! (exactly one active publisher). All transitions that would violate
//! the single-publisher invariant are silent no-ops: they are
//! race-prone by nature and non-fatal by design.

use std::collections::HashSet;
use std::time::Instant;

use crate::session::SessionId;

/// Outcome of a share-state transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareTransition {
    /// The transition was applied; the room's publisher changed.
    Changed,
    /// The request was ignored (wrong publisher, or already sharing).
    Ignored,
}

impl ShareTransition {
    /// True when the publisher actually changed.
    #[must_use]
    pub fn changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

/// Per-room screen-share negotiation state.
///
/// Invariant: at most one session is the active publisher at a time,
/// and the publisher is always a participant while sharing.
#[derive(Debug)]
pub struct SignalingRoom {
    /// Session currently sharing, if any.
    active_publisher: Option<SessionId>,
    /// Sessions currently in the room.
    participants: HashSet<SessionId>,
    /// Last membership or state change.
    last_active: Instant,
}

impl SignalingRoom {
    /// Create an empty room in the `Idle` state.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            active_publisher: None,
            participants: HashSet::new(),
            last_active: now,
        }
    }

    /// Add a session to the room. Repeated joins collapse.
    pub fn join(&mut self, session: SessionId, now: Instant) {
        self.participants.insert(session);
        self.last_active = now;
    }

    /// Remove a session. Returns `true` if the session was a member.
    ///
    /// If the departing session was the active publisher the room
    /// transitions back to `Idle`; the caller is responsible for
    /// broadcasting the publisher change.
    pub fn leave(&mut self, session: SessionId, now: Instant) -> bool {
        let was_member = self.participants.remove(&session);
        if was_member {
            self.last_active = now;
            if self.active_publisher == Some(session) {
                self.active_publisher = None;
            }
        }
        was_member
    }

    /// Attempt to start sharing. First publisher wins; a request while
    /// already `Sharing` is ignored, even from the current publisher.
    pub fn start_sharing(&mut self, session: SessionId, now: Instant) -> ShareTransition {
        if self.active_publisher.is_some() {
            return ShareTransition::Ignored;
        }
        self.active_publisher = Some(session);
        self.last_active = now;
        ShareTransition::Changed
    }

    /// Attempt to stop sharing. Only the active publisher may stop.
    pub fn stop_sharing(&mut self, session: SessionId, now: Instant) -> ShareTransition {
        if self.active_publisher != Some(session) {
            return ShareTransition::Ignored;
        }
        self.active_publisher = None;
        self.last_active = now;
        ShareTransition::Changed
    }

    /// The active publisher, if the room is in the `Sharing` state.
    #[must_use]
    pub fn active_publisher(&self) -> Option<SessionId> {
        self.active_publisher
    }

    /// True when the session is currently in the room.
    #[must_use]
    pub fn contains(&self, session: SessionId) -> bool {
        self.participants.contains(&session)
    }

    /// Current members in unspecified order.
    #[must_use]
    pub fn participants(&self) -> Vec<SessionId> {
        self.participants.iter().copied().collect()
    }

    /// True when no session is in the room.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Last membership or state change.
    #[must_use]
    pub fn last_active(&self) -> Instant {
        self.last_active
    }
}
