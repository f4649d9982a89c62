//! Connection registry and room engines.
//!
//! [`RoomHub`] owns the registry of live connections and wires the
//! three engines (signaling relay, document sync, playback sync) to
//! the [`RoomStore`]. Every outbound message goes through a per-peer
//! unbounded channel, so a slow or dead recipient never stalls a room
//! or the other recipients: a failed send is skipped, not retried.
//!
//! Broadcasts are enqueued while the room lock is still held. Channel
//! pushes never block, and it is what keeps per-room delivery in the
//! order the room applied the operations: two racing edits cannot be
//! applied one way and enqueued the other.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use roomsync_core::{Departure, RoomKind, RoomStore, SessionId};
use tokio::sync::mpsc;

use crate::metrics::{record_relay, record_room_event, set_rooms_active};
use crate::protocol::ServerMessage;

/// Information about a connected peer.
#[derive(Debug)]
struct PeerInfo {
    /// Channel to this peer's socket task.
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry of connected peers.
type PeerRegistry = Arc<RwLock<HashMap<SessionId, PeerInfo>>>;

/// Shared state for room coordination.
#[derive(Clone, Default)]
pub struct RoomHub {
    /// Room state delegated to the store.
    store: RoomStore,
    /// Registry of connected peers.
    peers: PeerRegistry,
}

impl RoomHub {
    /// Create a hub with an empty store and registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the underlying [`RoomStore`] for the HTTP surface and sweeper.
    #[must_use]
    pub fn store(&self) -> RoomStore {
        self.store.clone()
    }

    // ---- connection registry ----

    /// Register a peer connection.
    ///
    /// Returns the receiver its socket task drains.
    pub fn register_peer(&self, session: SessionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.write_peers()
            .insert(session, PeerInfo { sender: tx });
        tracing::info!(session = %session, "Registered peer");
        rx
    }

    /// Unregister a peer and remove it from every room it was in.
    ///
    /// The registry entry goes first, so no departure broadcast can be
    /// delivered back to the disconnecting session. Each room the
    /// session was a member of then emits its kind's departure event.
    pub fn unregister_peer(&self, session: SessionId) {
        self.write_peers().remove(&session);

        self.store
            .disconnect_all(session, Instant::now(), |departure| match departure {
                Departure::Signaling {
                    code,
                    users,
                    publisher_cleared,
                } => {
                    tracing::debug!(room = %code, "Session left signaling room");
                    if *publisher_cleared {
                        self.fan_out(users, None, &ServerMessage::SharerChanged { sharer_id: None });
                    }
                    self.fan_out(
                        users,
                        None,
                        &ServerMessage::UserLeft {
                            user_id: session,
                            users: users.clone(),
                        },
                    );
                    record_room_event(RoomKind::Signaling, "leave");
                }
                Departure::Document { users, code } => {
                    tracing::debug!(room = %code, "Session left document room");
                    self.fan_out(users, None, &ServerMessage::CodeUsersUpdate { users: users.clone() });
                    record_room_event(RoomKind::Document, "leave");
                }
                Departure::Playback { participants, code } => {
                    tracing::debug!(room = %code, "Session left playback room");
                    self.fan_out(
                        participants,
                        None,
                        &ServerMessage::ParticipantsUpdate {
                            participant_ids: participants.clone(),
                        },
                    );
                    record_room_event(RoomKind::Playback, "leave");
                }
            });
        self.refresh_room_gauges();
        tracing::info!(session = %session, "Unregistered peer");
    }

    /// Send a message to a specific peer.
    ///
    /// Returns true if the peer exists and the message was queued.
    pub fn send_to_peer(&self, session: SessionId, message: ServerMessage) -> bool {
        match self.read_peers().get(&session) {
            Some(info) => info.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Number of registered peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.read_peers().len()
    }

    // ---- signaling engine ----

    /// Join a signaling room: everyone (joiner included) learns the new
    /// member list, and a joiner of a `Sharing` room is told the
    /// current publisher immediately so it can send its offer without
    /// waiting for the next broadcast.
    pub fn join_signaling(&self, code: &str, session: SessionId) {
        self.store.join_signaling(code, session, Instant::now(), |join| {
            self.fan_out(
                &join.users,
                None,
                &ServerMessage::UserJoined {
                    user_id: session,
                    active_sharer: join.active_publisher,
                    users: join.users.clone(),
                },
            );
            if let Some(sharer) = join.active_publisher {
                self.send_to_peer(
                    session,
                    ServerMessage::SharerChanged {
                        sharer_id: Some(sharer),
                    },
                );
            }
        });
        tracing::info!(session = %session, room = %code, "Session joined signaling room");
        record_room_event(RoomKind::Signaling, "join");
        self.refresh_room_gauges();
    }

    /// Claim the publisher slot. First publisher wins; losing racers
    /// see no effect and no error.
    pub fn start_sharing(&self, code: &str, session: SessionId) {
        let outcome = self.store.with_signaling(code, |room| {
            if !room.contains(session) {
                return false;
            }
            if !room.start_sharing(session, Instant::now()).changed() {
                return false;
            }
            self.fan_out(
                &room.participants(),
                None,
                &ServerMessage::SharerChanged {
                    sharer_id: Some(session),
                },
            );
            true
        });
        if outcome == Some(true) {
            tracing::info!(session = %session, room = %code, "Publisher started sharing");
        }
    }

    /// Release the publisher slot. Only the active publisher may stop;
    /// anything else is a silent no-op.
    pub fn stop_sharing(&self, code: &str, session: SessionId) {
        let outcome = self.store.with_signaling(code, |room| {
            if !room.stop_sharing(session, Instant::now()).changed() {
                return false;
            }
            self.fan_out(
                &room.participants(),
                None,
                &ServerMessage::SharerChanged { sharer_id: None },
            );
            true
        });
        if outcome == Some(true) {
            tracing::info!(session = %session, room = %code, "Publisher stopped sharing");
        }
    }

    /// Unicast an SDP offer to its recipient, tagged with the sender.
    pub fn relay_offer(
        &self,
        code: &str,
        offer: serde_json::Value,
        recipient: SessionId,
        from: SessionId,
    ) {
        tracing::debug!(room = %code, from = %from, to = %recipient, "Relaying offer");
        record_relay("offer");
        self.send_to_peer(
            recipient,
            ServerMessage::Offer {
                offer,
                sharer_id: from,
            },
        );
    }

    /// Unicast an SDP answer back to the publisher, tagged with the
    /// answering viewer.
    pub fn relay_answer(
        &self,
        code: &str,
        answer: serde_json::Value,
        sharer: SessionId,
        from: SessionId,
    ) {
        tracing::debug!(room = %code, from = %from, to = %sharer, "Relaying answer");
        record_relay("answer");
        self.send_to_peer(
            sharer,
            ServerMessage::Answer {
                answer,
                viewer_id: from,
            },
        );
    }

    /// Unicast an ICE candidate to its recipient.
    pub fn relay_ice_candidate(
        &self,
        code: &str,
        candidate: serde_json::Value,
        recipient: SessionId,
        from: SessionId,
    ) {
        tracing::debug!(room = %code, from = %from, to = %recipient, "Relaying ICE candidate");
        record_relay("ice-candidate");
        self.send_to_peer(
            recipient,
            ServerMessage::IceCandidate {
                candidate,
                sender_id: from,
            },
        );
    }

    // ---- document engine ----

    /// Join a document room: the joiner gets the content snapshot, and
    /// everyone gets the refreshed member list.
    pub fn join_document(&self, code: &str, session: SessionId) {
        self.store.join_document(code, session, Instant::now(), |join| {
            self.send_to_peer(
                session,
                ServerMessage::RoomState {
                    code: join.snapshot.code.clone(),
                    language: join.snapshot.language.clone(),
                },
            );
            self.fan_out(
                &join.users,
                None,
                &ServerMessage::CodeUsersUpdate {
                    users: join.users.clone(),
                },
            );
        });
        tracing::info!(session = %session, room = %code, "Session joined document room");
        record_room_event(RoomKind::Document, "join");
        self.refresh_room_gauges();
    }

    /// Overwrite the document text and broadcast it to everyone except
    /// the author, who already applied it locally.
    pub fn code_change(&self, code: &str, session: SessionId, new_code: String) {
        let _ = self.store.with_document(code, |room| {
            room.apply_edit(new_code.clone(), Instant::now());
            self.fan_out(
                &room.participants(),
                Some(session),
                &ServerMessage::CodeChange {
                    new_code,
                    source: session,
                },
            );
        });
    }

    /// Overwrite the language tag, same broadcast pattern as edits.
    pub fn language_change(&self, code: &str, session: SessionId, new_language: String) {
        let _ = self.store.with_document(code, |room| {
            room.change_language(new_language.clone(), Instant::now());
            self.fan_out(
                &room.participants(),
                Some(session),
                &ServerMessage::LanguageChange {
                    new_language,
                    source: session,
                },
            );
        });
    }

    /// Relay selection decoration without touching room state.
    pub fn selection_change(&self, code: &str, session: SessionId, selections: serde_json::Value) {
        let _ = self.store.with_document(code, |room| {
            self.fan_out(
                &room.participants(),
                Some(session),
                &ServerMessage::SelectionChange {
                    selections,
                    source: session,
                },
            );
        });
    }

    // ---- playback engine ----

    /// Join a playback room: everyone gets the participant list, and if
    /// a track is loaded the joiner gets the extrapolated state so it
    /// resumes in sync without a separate seek.
    pub fn join_playback(&self, code: &str, session: SessionId) {
        self.store.join_playback(code, session, Instant::now(), |join| {
            self.fan_out(
                &join.participants,
                None,
                &ServerMessage::ParticipantsUpdate {
                    participant_ids: join.participants.clone(),
                },
            );
            if let Some(state) = &join.state {
                self.send_to_peer(
                    session,
                    ServerMessage::MusicStateUpdate {
                        track: Some(state.track.clone()),
                        is_playing: state.is_playing,
                        position: state.position,
                    },
                );
            }
        });
        tracing::info!(session = %session, room = %code, "Session joined playback room");
        record_room_event(RoomKind::Playback, "join");
        self.refresh_room_gauges();
    }

    /// Explicitly leave a playback room. The room itself lingers for
    /// the sweeper's grace period.
    pub fn leave_playback(&self, code: &str, session: SessionId) {
        let left = self
            .store
            .leave_playback(code, session, Instant::now(), |remaining| {
                self.fan_out(
                    remaining,
                    None,
                    &ServerMessage::ParticipantsUpdate {
                        participant_ids: remaining.to_vec(),
                    },
                );
            });
        if left.is_some() {
            tracing::info!(session = %session, room = %code, "Session left playback room");
            record_room_event(RoomKind::Playback, "leave");
        }
    }

    /// Overwrite the authoritative playback state and broadcast it to
    /// the other participants.
    pub fn music_state_update(
        &self,
        code: &str,
        session: SessionId,
        track: Option<String>,
        is_playing: bool,
        position: f64,
    ) {
        let _ = self.store.with_playback(code, |room| {
            room.set_state(track, is_playing, position, Instant::now());
            self.fan_out(
                &room.participants(),
                Some(session),
                &ServerMessage::MusicStateUpdate {
                    track: room.current_track().map(str::to_string),
                    is_playing,
                    position,
                },
            );
        });
    }

    /// Move only the playback position and broadcast a lightweight
    /// seek event; track and play state are unchanged.
    pub fn music_seek(&self, code: &str, session: SessionId, position: f64) {
        let _ = self.store.with_playback(code, |room| {
            room.seek(position, Instant::now());
            self.fan_out(
                &room.participants(),
                Some(session),
                &ServerMessage::MusicSeek { position },
            );
        });
    }

    /// Relay a search query to the other participants. Never stored.
    pub fn search_query(&self, code: &str, session: SessionId, query: String) {
        let _ = self.store.with_playback(code, |room| {
            self.fan_out(
                &room.participants(),
                Some(session),
                &ServerMessage::SearchUpdate {
                    query,
                    results: None,
                },
            );
        });
    }

    /// Relay search results to the other participants. Never stored.
    pub fn search_update(
        &self,
        code: &str,
        session: SessionId,
        query: String,
        results: serde_json::Value,
    ) {
        let _ = self.store.with_playback(code, |room| {
            self.fan_out(
                &room.participants(),
                Some(session),
                &ServerMessage::SearchUpdate {
                    query,
                    results: Some(results),
                },
            );
        });
    }

    // ---- internals ----

    /// Deliver a message to every listed member except `exclude`.
    ///
    /// Unreachable members (disconnected mid-broadcast) are skipped
    /// without retry; remaining recipients still get their copy.
    fn fan_out(&self, members: &[SessionId], exclude: Option<SessionId>, message: &ServerMessage) {
        let peers = self.read_peers();
        for member in members {
            if exclude == Some(*member) {
                continue;
            }
            if let Some(info) = peers.get(member) {
                if info.sender.send(message.clone()).is_err() {
                    tracing::debug!(session = %member, "Skipping closed peer channel");
                }
            }
        }
    }

    fn refresh_room_gauges(&self) {
        for kind in [RoomKind::Signaling, RoomKind::Document, RoomKind::Playback] {
            set_rooms_active(kind, self.store.room_count(kind));
        }
    }

    fn read_peers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, PeerInfo>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_peers(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, PeerInfo>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn joiner_of_sharing_room_learns_the_publisher() {
        let hub = RoomHub::new();
        let x = SessionId::new();
        let y = SessionId::new();
        let _x_rx = hub.register_peer(x);
        let mut y_rx = hub.register_peer(y);

        hub.join_signaling("1234", x);
        hub.start_sharing("1234", x);
        hub.join_signaling("1234", y);

        let msgs = drain(&mut y_rx);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::SharerChanged { sharer_id: Some(s) } if *s == x
        )));
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::UserJoined { active_sharer: Some(s), .. } if *s == x
        )));
    }

    #[test]
    fn second_publisher_is_ignored() {
        let hub = RoomHub::new();
        let x = SessionId::new();
        let y = SessionId::new();
        let mut x_rx = hub.register_peer(x);
        let _y_rx = hub.register_peer(y);

        hub.join_signaling("1234", x);
        hub.join_signaling("1234", y);
        hub.start_sharing("1234", x);
        drain(&mut x_rx);

        hub.start_sharing("1234", y);
        // No sharer-changed reaches x for the losing racer.
        assert!(drain(&mut x_rx).is_empty());
    }

    #[test]
    fn publisher_disconnect_clears_sharer_for_viewers() {
        let hub = RoomHub::new();
        let x = SessionId::new();
        let y = SessionId::new();
        let _x_rx = hub.register_peer(x);
        let mut y_rx = hub.register_peer(y);

        hub.join_signaling("1234", x);
        hub.start_sharing("1234", x);
        hub.join_signaling("1234", y);
        drain(&mut y_rx);

        hub.unregister_peer(x);
        let msgs = drain(&mut y_rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::SharerChanged { sharer_id: None })));
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::UserLeft { user_id, .. } if *user_id == x
        )));
    }

    #[test]
    fn edits_broadcast_to_everyone_but_the_author() {
        let hub = RoomHub::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let mut a_rx = hub.register_peer(a);
        let mut b_rx = hub.register_peer(b);

        hub.join_document("5678", a);
        hub.join_document("5678", b);
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.code_change("5678", a, "print('hi')".to_string());

        assert!(drain(&mut a_rx).is_empty());
        let msgs = drain(&mut b_rx);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::CodeChange { new_code, source }
                if new_code == "print('hi')" && *source == a
        )));
    }

    #[test]
    fn late_document_joiner_sees_latest_text() {
        let hub = RoomHub::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let _a_rx = hub.register_peer(a);
        let mut b_rx = hub.register_peer(b);

        hub.join_document("5678", a);
        hub.code_change("5678", a, "A".to_string());
        hub.code_change("5678", a, "B".to_string());
        hub.join_document("5678", b);

        let msgs = drain(&mut b_rx);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::RoomState { code, .. } if code == "B"
        )));
    }

    #[test]
    fn racing_edits_deliver_in_room_apply_order() {
        let hub = RoomHub::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let c = SessionId::new();
        let _a_rx = hub.register_peer(a);
        let _b_rx = hub.register_peer(b);
        let mut c_rx = hub.register_peer(c);

        hub.join_document("5678", a);
        hub.join_document("5678", b);
        hub.join_document("5678", c);
        drain(&mut c_rx);

        // Two authors race on the same room; the last edit a bystander
        // receives must be the edit the room kept.
        for round in 0..200 {
            let hub_a = hub.clone();
            let hub_b = hub.clone();
            let t1 =
                std::thread::spawn(move || hub_a.code_change("5678", a, format!("a-{round}")));
            let t2 =
                std::thread::spawn(move || hub_b.code_change("5678", b, format!("b-{round}")));
            t1.join().expect("author thread");
            t2.join().expect("author thread");

            let last_seen = drain(&mut c_rx)
                .into_iter()
                .rev()
                .find_map(|m| match m {
                    ServerMessage::CodeChange { new_code, .. } => Some(new_code),
                    _ => None,
                })
                .expect("bystander saw both edits");
            let held = hub
                .store()
                .with_document("5678", |room| room.snapshot().code)
                .expect("room exists");
            assert_eq!(last_seen, held);
        }
    }

    #[test]
    fn join_snapshot_is_ordered_with_concurrent_edits() {
        // Whichever wins the race, the last content-bearing message the
        // joiner receives matches what the room holds.
        for round in 0..200 {
            let hub = RoomHub::new();
            let a = SessionId::new();
            let b = SessionId::new();
            let _a_rx = hub.register_peer(a);
            let mut b_rx = hub.register_peer(b);
            hub.join_document("j", a);

            let hub_a = hub.clone();
            let hub_b = hub.clone();
            let t1 =
                std::thread::spawn(move || hub_a.code_change("j", a, format!("edit-{round}")));
            let t2 = std::thread::spawn(move || hub_b.join_document("j", b));
            t1.join().expect("author thread");
            t2.join().expect("joiner thread");

            let last_seen = drain(&mut b_rx)
                .into_iter()
                .rev()
                .find_map(|m| match m {
                    ServerMessage::RoomState { code, .. }
                    | ServerMessage::CodeChange { new_code: code, .. } => Some(code),
                    _ => None,
                })
                .expect("joiner saw the document");
            let held = hub
                .store()
                .with_document("j", |room| room.snapshot().code)
                .expect("room exists");
            assert_eq!(last_seen, held);
        }
    }

    #[test]
    fn playback_join_without_track_sends_no_state() {
        let hub = RoomHub::new();
        let a = SessionId::new();
        let mut a_rx = hub.register_peer(a);

        hub.join_playback("m1", a);
        let msgs = drain(&mut a_rx);
        assert!(msgs
            .iter()
            .all(|m| !matches!(m, ServerMessage::MusicStateUpdate { .. })));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::ParticipantsUpdate { .. })));
    }

    #[test]
    fn state_update_keeps_track_when_omitted() {
        let hub = RoomHub::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let _a_rx = hub.register_peer(a);
        let mut b_rx = hub.register_peer(b);

        hub.join_playback("m1", a);
        hub.join_playback("m1", b);
        hub.music_state_update("m1", a, Some("track-9".to_string()), true, 0.0);
        drain(&mut b_rx);

        hub.music_state_update("m1", a, None, false, 30.0);
        let msgs = drain(&mut b_rx);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::MusicStateUpdate { track: Some(t), is_playing: false, .. }
                if t == "track-9"
        )));
    }

    #[test]
    fn relays_on_missing_rooms_and_peers_are_no_ops() {
        let hub = RoomHub::new();
        let ghost = SessionId::new();
        // None of these may panic or surface an error.
        hub.code_change("nope", ghost, "text".to_string());
        hub.music_seek("nope", ghost, 1.0);
        hub.stop_sharing("nope", ghost);
        assert!(!hub.send_to_peer(ghost, ServerMessage::MusicSeek { position: 0.0 }));
    }
}
