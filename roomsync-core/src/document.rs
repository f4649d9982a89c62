//! Document rooms - shared text with last-writer-wins semantics.
//!
//! No operational transform and no merge: the most recently received
//! edit fully overwrites room state, and broadcast recipients only ever
//! see the latest value. Selection updates are UI decoration and are
//! relayed by the server without touching room state.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Placeholder text for freshly created rooms.
pub const DEFAULT_TEXT: &str = "// Start coding here...";

/// Language tag for freshly created rooms.
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Snapshot of document content sent to a joining session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Current document text.
    pub code: String,
    /// Current language tag.
    pub language: String,
}

/// Per-room collaborative document state.
#[derive(Debug)]
pub struct DocumentRoom {
    /// Shared document text (last writer wins).
    text: String,
    /// Shared language tag (last writer wins).
    language: String,
    /// Sessions currently in the room.
    participants: HashSet<SessionId>,
    /// Last membership or content change.
    last_active: Instant,
}

impl DocumentRoom {
    /// Create an empty room with placeholder content.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            text: DEFAULT_TEXT.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
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
    pub fn leave(&mut self, session: SessionId, now: Instant) -> bool {
        let was_member = self.participants.remove(&session);
        if was_member {
            self.last_active = now;
        }
        was_member
    }

    /// Overwrite the document text unconditionally.
    pub fn apply_edit(&mut self, text: String, now: Instant) {
        self.text = text;
        self.last_active = now;
    }

    /// Overwrite the language tag unconditionally.
    pub fn change_language(&mut self, language: String, now: Instant) {
        self.language = language;
        self.last_active = now;
    }

    /// Current content snapshot for initial sync.
    #[must_use]
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            code: self.text.clone(),
            language: self.language.clone(),
        }
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

    /// Last membership or content change.
    #[must_use]
    pub fn last_active(&self) -> Instant {
        self.last_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rooms_carry_placeholder_content() {
        let room = DocumentRoom::new(Instant::now());
        let snapshot = room.snapshot();
        assert_eq!(snapshot.code, DEFAULT_TEXT);
        assert_eq!(snapshot.language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn last_writer_wins() {
        let now = Instant::now();
        let mut room = DocumentRoom::new(now);
        room.apply_edit("A".to_string(), now);
        room.apply_edit("B".to_string(), now);
        assert_eq!(room.snapshot().code, "B");
    }

    #[test]
    fn language_changes_overwrite() {
        let now = Instant::now();
        let mut room = DocumentRoom::new(now);
        room.change_language("rust".to_string(), now);
        assert_eq!(room.snapshot().language, "rust");
    }
}
