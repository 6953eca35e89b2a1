//! Registry actor - owns all room state and processes commands.
//!
//! The RegistryActor is the single owner of room membership in the relay.
//! It receives commands via an mpsc channel and fans frames out into each
//! member's `Outbox`.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Response channel send failures are ignored (the caller went away)

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use codecast_core::{ConnectionId, DisplayName, Participant, Roster, RoomId};
use codecast_protocol::RelayMessage;

use super::commands::{RegistryCommand, RegistryError, RemovalReason, RoomSummary};
use super::outbox::Outbox;

/// Default member limit per room.
pub const MAX_MEMBERS_PER_ROOM: usize = 100;

/// Members of one room, in join order.
#[derive(Debug, Default)]
struct Room {
    members: Vec<ConnectionId>,
}

/// A joined connection.
#[derive(Debug)]
struct Member {
    room_id: RoomId,
    display_name: DisplayName,
    outbox: Outbox,
}

/// The registry actor - owns all room state.
///
/// Implements the actor pattern: receives commands via mpsc channel and
/// processes them sequentially. Every membership change and every fan-out
/// therefore happens in one task, which gives each room a single writer
/// and a single delivery order.
///
/// # Ownership
///
/// The actor owns:
/// - `rooms`: room id → member ids in join order
/// - `members`: connection id → room, display name, and outbox
///
/// A room exists exactly as long as it has at least one member.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    rooms: HashMap<RoomId, Room>,

    members: HashMap<ConnectionId, Member>,

    max_members_per_room: usize,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, max_members_per_room: usize) -> Self {
        Self {
            receiver,
            rooms: HashMap::new(),
            members: HashMap::new(),
            max_members_per_room,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            rooms = self.rooms.len(),
            members = self.members.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Join {
                connection_id,
                room_id,
                display_name,
                outbox,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, room_id, display_name, outbox);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Leave {
                connection_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_leave(&connection_id, reason);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Broadcast {
                room_id,
                sender,
                message,
                respond_to,
            } => {
                let result = self.handle_broadcast(&room_id, &sender, message);
                let _ = respond_to.send(result);
            }
            RegistryCommand::SendTo {
                sender,
                target,
                message,
                respond_to,
            } => {
                let result = self.handle_send_to(&sender, target, message);
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetRoster {
                room_id,
                respond_to,
            } => {
                let roster = self.rooms.contains_key(&room_id).then(|| self.roster_of(&room_id));
                let _ = respond_to.send(roster);
            }
            RegistryCommand::ListRooms { respond_to } => {
                let _ = respond_to.send(self.list_rooms());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        room_id: RoomId,
        display_name: DisplayName,
        outbox: Outbox,
    ) -> Result<Roster, RegistryError> {
        if let Some(existing) = self.members.get(&connection_id) {
            return Err(RegistryError::AlreadyJoined {
                room_id: existing.room_id.clone(),
            });
        }

        let current = self.rooms.get(&room_id).map_or(0, |r| r.members.len());
        if current >= self.max_members_per_room {
            warn!(
                room_id = %room_id,
                connection_id = %connection_id,
                max = self.max_members_per_room,
                "Room is full, rejecting join"
            );
            return Err(RegistryError::RoomFull {
                room_id,
                max: self.max_members_per_room,
            });
        }

        if current == 0 {
            debug!(room_id = %room_id, "Creating room");
        }

        self.rooms
            .entry(room_id.clone())
            .or_default()
            .members
            .push(connection_id.clone());
        self.members.insert(
            connection_id.clone(),
            Member {
                room_id: room_id.clone(),
                display_name: display_name.clone(),
                outbox,
            },
        );

        let roster = self.roster_of(&room_id);

        info!(
            connection_id = %connection_id,
            room_id = %room_id,
            display_name = %display_name,
            members = roster.len(),
            "Member joined room"
        );

        let joined = RelayMessage::Joined {
            roster: roster.clone(),
            display_name,
            connection_id,
        };
        let (_, failed) = self.deliver_to_room(&room_id, None, &joined);
        self.evict_slow(failed);

        Ok(roster)
    }

    /// Removes a member, returning whether it was present.
    fn handle_leave(&mut self, connection_id: &ConnectionId, reason: RemovalReason) -> bool {
        match self.remove_member(connection_id, reason) {
            Some(failed) => {
                self.evict_slow(failed);
                true
            }
            None => {
                debug!(connection_id = %connection_id, reason = %reason, "Leave for non-member ignored");
                false
            }
        }
    }

    fn handle_broadcast(
        &mut self,
        room_id: &RoomId,
        sender: &ConnectionId,
        message: RelayMessage,
    ) -> Result<usize, RegistryError> {
        let member = self.members.get(sender).ok_or(RegistryError::NotJoined)?;

        if &member.room_id != room_id {
            warn!(
                connection_id = %sender,
                room_id = %room_id,
                member_of = %member.room_id,
                "Dropping broadcast to a room the sender is not in"
            );
            return Ok(0);
        }

        let (delivered, failed) = self.deliver_to_room(room_id, Some(sender), &message);
        self.evict_slow(failed);

        debug!(
            connection_id = %sender,
            room_id = %room_id,
            kind = message.kind(),
            delivered,
            "Broadcast"
        );
        Ok(delivered)
    }

    fn handle_send_to(
        &mut self,
        sender: &ConnectionId,
        target: ConnectionId,
        message: RelayMessage,
    ) -> Result<bool, RegistryError> {
        let room_id = self
            .members
            .get(sender)
            .map(|m| m.room_id.clone())
            .ok_or(RegistryError::NotJoined)?;

        if sender == &target {
            debug!(connection_id = %sender, "Ignoring frame addressed to sender");
            return Ok(false);
        }

        let Some(recipient) = self.members.get(&target) else {
            debug!(connection_id = %sender, target = %target, "Target is not connected");
            return Ok(false);
        };

        if recipient.room_id != room_id {
            debug!(
                connection_id = %sender,
                target = %target,
                "Target is in another room"
            );
            return Ok(false);
        }

        match recipient.outbox.deliver(message) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(connection_id = %target, error = %e, "Evicting slow member");
                self.evict_slow(vec![target]);
                Ok(false)
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Removes a member from the indexes and notifies the rest of its room.
    ///
    /// Returns `None` if the connection was not a member, otherwise the
    /// members whose queues failed while delivering `DISCONNECTED`.
    fn remove_member(
        &mut self,
        connection_id: &ConnectionId,
        reason: RemovalReason,
    ) -> Option<Vec<ConnectionId>> {
        let member = self.members.remove(connection_id)?;

        let now_empty = match self.rooms.get_mut(&member.room_id) {
            Some(room) => {
                room.members.retain(|id| id != connection_id);
                room.members.is_empty()
            }
            None => false,
        };

        info!(
            connection_id = %connection_id,
            room_id = %member.room_id,
            reason = %reason,
            "Member left room"
        );

        if now_empty {
            self.rooms.remove(&member.room_id);
            debug!(room_id = %member.room_id, "Deleted empty room");
            return Some(Vec::new());
        }

        let disconnected = RelayMessage::Disconnected {
            connection_id: connection_id.clone(),
            display_name: member.display_name,
        };
        let (_, failed) = self.deliver_to_room(&member.room_id, None, &disconnected);
        Some(failed)
    }

    /// Disconnects members whose queues overflowed.
    ///
    /// Each removal broadcasts `DISCONNECTED`, which may overflow further
    /// queues, so this drains a worklist until it is empty.
    fn evict_slow(&mut self, mut pending: Vec<ConnectionId>) {
        while let Some(id) = pending.pop() {
            if let Some(member) = self.members.get(&id) {
                member.outbox.evict();
            }
            if let Some(failed) = self.remove_member(&id, RemovalReason::SlowConsumer) {
                pending.extend(failed);
            }
        }
    }

    /// Queues `message` for every member of `room_id` except `except`.
    ///
    /// Returns the delivered count and the members whose queues failed.
    fn deliver_to_room(
        &self,
        room_id: &RoomId,
        except: Option<&ConnectionId>,
        message: &RelayMessage,
    ) -> (usize, Vec<ConnectionId>) {
        let Some(room) = self.rooms.get(room_id) else {
            return (0, Vec::new());
        };

        let mut delivered = 0;
        let mut failed = Vec::new();

        for id in &room.members {
            if Some(id) == except {
                continue;
            }
            let Some(member) = self.members.get(id) else {
                continue;
            };
            match member.outbox.deliver(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        connection_id = %id,
                        room_id = %room_id,
                        kind = message.kind(),
                        error = %e,
                        "Evicting slow member"
                    );
                    failed.push(id.clone());
                }
            }
        }

        (delivered, failed)
    }

    fn roster_of(&self, room_id: &RoomId) -> Roster {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter_map(|id| {
                        self.members
                            .get(id)
                            .map(|m| Participant::new(id.clone(), m.display_name.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(room_id, room)| RoomSummary {
                room_id: room_id.clone(),
                member_count: room.members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    #[cfg(test)]
    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[cfg(test)]
    fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    struct TestMember {
        id: ConnectionId,
        outbox: Outbox,
        rx: mpsc::Receiver<RelayMessage>,
        token: CancellationToken,
    }

    impl TestMember {
        fn new(id: &str, capacity: usize) -> Self {
            let token = CancellationToken::new();
            let (outbox, rx) = Outbox::channel(capacity, token.clone());
            Self {
                id: ConnectionId::new(id),
                outbox,
                rx,
                token,
            }
        }

        fn drain(&mut self) -> Vec<RelayMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn create_actor(max: usize) -> (mpsc::Sender<RegistryCommand>, RegistryActor) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        (cmd_tx, RegistryActor::new(cmd_rx, max))
    }

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn name(s: &str) -> DisplayName {
        DisplayName::parse(s).unwrap()
    }

    fn join(actor: &mut RegistryActor, m: &TestMember, room_id: &str, display: &str) -> Result<Roster, RegistryError> {
        actor.handle_join(m.id.clone(), room(room_id), name(display), m.outbox.clone())
    }

    fn code_change(room_id: &str, code: &str, from: &TestMember) -> RelayMessage {
        RelayMessage::CodeChange {
            room_id: room(room_id),
            code: code.to_string(),
            from: from.id.clone(),
        }
    }

    #[tokio::test]
    async fn test_join_through_command_channel() {
        let (cmd_tx, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let mut a = TestMember::new("conn-1", 8);

        let (respond_tx, respond_rx) = oneshot::channel();
        cmd_tx
            .send(RegistryCommand::Join {
                connection_id: a.id.clone(),
                room_id: room("R1"),
                display_name: name("alice"),
                outbox: a.outbox.clone(),
                respond_to: respond_tx,
            })
            .await
            .unwrap();

        // Process the command manually (actor not running in background)
        if let Some(cmd) = actor.receiver.recv().await {
            actor.handle_command(cmd);
        }

        let roster = respond_rx.await.unwrap().unwrap();
        assert_eq!(roster.connection_ids(), vec![a.id.clone()]);
        assert_eq!(actor.room_count(), 1);

        // The joiner receives its own JOINED
        let msgs = a.drain();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(
            &msgs[0],
            RelayMessage::Joined { connection_id, .. } if connection_id == &a.id
        ));
    }

    #[tokio::test]
    async fn test_joined_goes_to_every_member() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let mut a = TestMember::new("conn-1", 8);
        let mut b = TestMember::new("conn-2", 8);

        join(&mut actor, &a, "R1", "alice").unwrap();
        a.drain();
        let roster = join(&mut actor, &b, "R1", "bob").unwrap();
        assert_eq!(roster.len(), 2);

        for msgs in [a.drain(), b.drain()] {
            assert_eq!(msgs.len(), 1);
            match &msgs[0] {
                RelayMessage::Joined {
                    roster,
                    display_name,
                    connection_id,
                } => {
                    assert_eq!(roster.connection_ids(), vec![a.id.clone(), b.id.clone()]);
                    assert_eq!(display_name.as_str(), "bob");
                    assert_eq!(connection_id, &b.id);
                }
                other => panic!("expected JOINED, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_join_twice_rejected() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let a = TestMember::new("conn-1", 8);

        join(&mut actor, &a, "R1", "alice").unwrap();
        let err = join(&mut actor, &a, "R2", "alice").unwrap_err();
        assert_eq!(err, RegistryError::AlreadyJoined { room_id: room("R1") });
        assert_eq!(actor.room_count(), 1);
    }

    #[tokio::test]
    async fn test_room_full() {
        let (_, mut actor) = create_actor(2);
        let a = TestMember::new("conn-1", 8);
        let b = TestMember::new("conn-2", 8);
        let c = TestMember::new("conn-3", 8);

        join(&mut actor, &a, "R1", "a").unwrap();
        join(&mut actor, &b, "R1", "b").unwrap();
        let err = join(&mut actor, &c, "R1", "c").unwrap_err();
        assert_eq!(err.code(), "room_full");
        assert_eq!(actor.member_count(), 2);

        // Other rooms are unaffected
        assert!(join(&mut actor, &c, "R2", "c").is_ok());
    }

    #[tokio::test]
    async fn test_leave_broadcasts_and_deletes_empty_room() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let a = TestMember::new("conn-1", 8);
        let mut b = TestMember::new("conn-2", 8);

        join(&mut actor, &a, "R1", "alice").unwrap();
        join(&mut actor, &b, "R1", "bob").unwrap();
        b.drain();

        assert!(actor.handle_leave(&a.id, RemovalReason::Closed));
        let msgs = b.drain();
        assert_eq!(
            msgs,
            vec![RelayMessage::Disconnected {
                connection_id: a.id.clone(),
                display_name: name("alice"),
            }]
        );
        assert_eq!(actor.roster_of(&room("R1")).connection_ids(), vec![b.id.clone()]);

        assert!(actor.handle_leave(&b.id, RemovalReason::Closed));
        assert_eq!(actor.room_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let a = TestMember::new("conn-1", 8);

        assert!(!actor.handle_leave(&a.id, RemovalReason::Closed));

        join(&mut actor, &a, "R1", "alice").unwrap();
        assert!(actor.handle_leave(&a.id, RemovalReason::Closed));
        assert!(!actor.handle_leave(&a.id, RemovalReason::Closed));
        assert_eq!(actor.member_count(), 0);
    }

    #[tokio::test]
    async fn test_rejoin_creates_fresh_room() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let a = TestMember::new("conn-1", 8);
        let b = TestMember::new("conn-2", 8);

        join(&mut actor, &a, "R1", "alice").unwrap();
        actor.handle_leave(&a.id, RemovalReason::Closed);
        assert_eq!(actor.room_count(), 0);

        let roster = join(&mut actor, &b, "R1", "bob").unwrap();
        assert_eq!(roster.connection_ids(), vec![b.id.clone()]);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let mut a = TestMember::new("conn-1", 8);
        let mut b = TestMember::new("conn-2", 8);
        let mut c = TestMember::new("conn-3", 8);

        join(&mut actor, &a, "R1", "alice").unwrap();
        join(&mut actor, &b, "R1", "bob").unwrap();
        join(&mut actor, &c, "R2", "carol").unwrap();
        a.drain();
        b.drain();
        c.drain();

        let msg = code_change("R1", "print(1)", &a);
        let delivered = actor.handle_broadcast(&room("R1"), &a.id, msg.clone()).unwrap();

        assert_eq!(delivered, 1);
        assert!(a.drain().is_empty());
        assert_eq!(b.drain(), vec![msg]);
        assert!(c.drain().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_requires_membership() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let a = TestMember::new("conn-1", 8);
        let mut b = TestMember::new("conn-2", 8);

        let err = actor
            .handle_broadcast(&room("R1"), &a.id, code_change("R1", "x", &a))
            .unwrap_err();
        assert_eq!(err, RegistryError::NotJoined);

        // Joined elsewhere: dropped without delivery
        join(&mut actor, &a, "R2", "alice").unwrap();
        join(&mut actor, &b, "R1", "bob").unwrap();
        b.drain();
        let delivered = actor
            .handle_broadcast(&room("R1"), &a.id, code_change("R1", "x", &a))
            .unwrap();
        assert_eq!(delivered, 0);
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_rules() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let mut a = TestMember::new("conn-1", 8);
        let mut b = TestMember::new("conn-2", 8);
        let mut c = TestMember::new("conn-3", 8);

        join(&mut actor, &a, "R1", "alice").unwrap();
        join(&mut actor, &b, "R1", "bob").unwrap();
        join(&mut actor, &c, "R2", "carol").unwrap();
        a.drain();
        b.drain();
        c.drain();

        let sync = RelayMessage::SyncCode {
            code: "x=1".to_string(),
            from: a.id.clone(),
        };

        assert_eq!(actor.handle_send_to(&a.id, b.id.clone(), sync.clone()), Ok(true));
        assert_eq!(b.drain(), vec![sync.clone()]);

        // Self, other room, unknown
        assert_eq!(actor.handle_send_to(&a.id, a.id.clone(), sync.clone()), Ok(false));
        assert_eq!(actor.handle_send_to(&a.id, c.id.clone(), sync.clone()), Ok(false));
        assert_eq!(
            actor.handle_send_to(&a.id, ConnectionId::new("conn-99"), sync.clone()),
            Ok(false)
        );
        assert!(a.drain().is_empty());
        assert!(c.drain().is_empty());

        let stranger = TestMember::new("conn-4", 8);
        assert_eq!(
            actor.handle_send_to(&stranger.id, b.id.clone(), sync),
            Err(RegistryError::NotJoined)
        );
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let mut a = TestMember::new("conn-1", 8);
        let mut fast = TestMember::new("conn-2", 8);
        let slow = TestMember::new("conn-3", 1);

        join(&mut actor, &a, "R1", "alice").unwrap();
        join(&mut actor, &fast, "R1", "fast").unwrap();
        // slow's queue fills with its own JOINED
        join(&mut actor, &slow, "R1", "slow").unwrap();
        a.drain();
        fast.drain();

        let delivered = actor
            .handle_broadcast(&room("R1"), &a.id, code_change("R1", "x", &a))
            .unwrap();
        assert_eq!(delivered, 1);

        assert!(slow.token.is_cancelled());
        assert_eq!(
            actor.roster_of(&room("R1")).connection_ids(),
            vec![a.id.clone(), fast.id.clone()]
        );

        let msgs = fast.drain();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0], RelayMessage::CodeChange { .. }));
        assert!(matches!(
            &msgs[1],
            RelayMessage::Disconnected { connection_id, .. } if connection_id == &slow.id
        ));
    }

    #[tokio::test]
    async fn test_closed_outbox_is_evicted() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let a = TestMember::new("conn-1", 8);
        let b = TestMember::new("conn-2", 8);

        join(&mut actor, &a, "R1", "alice").unwrap();
        join(&mut actor, &b, "R1", "bob").unwrap();
        let TestMember { rx, token, .. } = b;
        drop(rx);

        actor
            .handle_broadcast(&room("R1"), &a.id, code_change("R1", "x", &a))
            .unwrap();

        assert!(token.is_cancelled());
        assert_eq!(actor.member_count(), 1);
    }

    #[tokio::test]
    async fn test_list_rooms() {
        let (_, mut actor) = create_actor(MAX_MEMBERS_PER_ROOM);
        let a = TestMember::new("conn-1", 8);
        let b = TestMember::new("conn-2", 8);
        let c = TestMember::new("conn-3", 8);

        join(&mut actor, &a, "beta", "a").unwrap();
        join(&mut actor, &b, "beta", "b").unwrap();
        join(&mut actor, &c, "alpha", "c").unwrap();

        let rooms = actor.list_rooms();
        assert_eq!(
            rooms,
            vec![
                RoomSummary { room_id: room("alpha"), member_count: 1 },
                RoomSummary { room_id: room("beta"), member_count: 2 },
            ]
        );
    }
}
