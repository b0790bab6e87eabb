use std::sync::Arc;

use tracing::debug;

use crate::error::{CallError, CallResult};
use crate::presence::PresenceRegistry;
use crate::rooms::{Role, RoomId, RoomStore};

use super::{ConnectionDirectory, ConnectionHandle, Envelope};

/// Forwards frames between the two members of a room and nobody else.
///
/// Reads room membership, never writes it. A failed delivery is handed back
/// to the caller; deciding what it means for the call is not the relay's job.
#[derive(Debug, Clone)]
pub struct Relay {
    store: Arc<RoomStore>,
    presence: Arc<PresenceRegistry>,
    directory: Arc<ConnectionDirectory>,
}

impl Relay {
    pub fn new(
        store: Arc<RoomStore>,
        presence: Arc<PresenceRegistry>,
        directory: Arc<ConnectionDirectory>,
    ) -> Self {
        Self {
            store,
            presence,
            directory,
        }
    }

    /// Sends `envelope` from `sender_id` to the other participant of
    /// `room_id`. Returns the id of the participant it reached.
    pub fn relay(&self, room_id: &RoomId, sender_id: &str, envelope: Envelope) -> CallResult<String> {
        let room = self.store.get(room_id)?;
        let Some((peer_id, peer_role)) = room.peer_of(sender_id) else {
            return Err(CallError::NotParticipant {
                room_id: room_id.clone(),
                participant_id: sender_id.to_owned(),
            });
        };

        debug!(%room_id, from = sender_id, to = peer_id, event = ?envelope.event, "relay");
        self.deliver(peer_id, peer_role, envelope)?;
        Ok(peer_id.to_owned())
    }

    /// Sends straight to one participant.
    pub fn deliver(&self, participant_id: &str, role: Role, envelope: Envelope) -> CallResult<()> {
        let handle = self
            .resolve(participant_id, role)
            .ok_or_else(|| CallError::DeliveryFailed(participant_id.to_owned()))?;
        handle
            .send(envelope)
            .map_err(|_| CallError::DeliveryFailed(participant_id.to_owned()))
    }

    /// Current live handle for a participant. A doctor's presence entry is
    /// tried first; a handle whose socket already went away counts as absent.
    pub fn resolve(&self, participant_id: &str, role: Role) -> Option<ConnectionHandle> {
        let live = |handle: &ConnectionHandle| !handle.is_closed();
        match role {
            Role::Doctor => self
                .presence
                .lookup(participant_id)
                .ok()
                .filter(live)
                .or_else(|| self.directory.lookup(participant_id).filter(live)),
            Role::Patient => self.directory.lookup(participant_id).filter(live),
        }
    }
}
