//! Room membership roster.

use serde::{Deserialize, Serialize};

use crate::id::{ConnectionId, DisplayName};

/// One member of a room as seen by other participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: DisplayName,
}

impl Participant {
    pub fn new(connection_id: ConnectionId, display_name: DisplayName) -> Self {
        Self {
            connection_id,
            display_name,
        }
    }
}

/// The current list of participants in a room, in join order.
///
/// The relay recomputes and broadcasts the roster on every join; clients
/// keep their copy current by dropping members on `DISCONNECTED`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(Vec<Participant>);

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the connection is on the roster.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.0.iter().any(|p| &p.connection_id == id)
    }

    /// Looks up a participant by connection id.
    pub fn get(&self, id: &ConnectionId) -> Option<&Participant> {
        self.0.iter().find(|p| &p.connection_id == id)
    }

    /// Removes a participant, returning it if it was present.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Participant> {
        let pos = self.0.iter().position(|p| &p.connection_id == id)?;
        Some(self.0.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.0.iter()
    }

    /// Connection ids in roster order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.0.iter().map(|p| p.connection_id.clone()).collect()
    }
}

impl From<Vec<Participant>> for Roster {
    fn from(participants: Vec<Participant>) -> Self {
        Self(participants)
    }
}

impl FromIterator<Participant> for Roster {
    fn from_iter<I: IntoIterator<Item = Participant>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
