use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{CallError, CallResult};

use super::Envelope;

pub type ConnId = Uuid;

/// The sending half of one live socket. Everything written through one
/// handle reaches the client in order.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id: Uuid::now_v7(), tx }, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn send(&self, envelope: Envelope) -> CallResult<()> {
        self.tx
            .send(envelope)
            .map_err(|_| CallError::DeliveryFailed(self.id.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// participant id -> the connection that participant is using right now.
///
/// Patients are only reachable through here; doctors are also listed so a
/// doctor who went unavailable mid-call can still be reached by their room.
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    by_participant: DashMap<String, ConnectionHandle>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest connection wins. Returns the handle it replaced.
    pub fn bind(&self, participant_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.by_participant.insert(participant_id.to_owned(), handle)
    }

    /// Drops the entry only if it still points at `conn`, so a late close of
    /// an old tab does not unbind the tab that replaced it.
    pub fn unbind(&self, participant_id: &str, conn: ConnId) -> bool {
        self.by_participant
            .remove_if(participant_id, |_, handle| handle.id() == conn)
            .is_some()
    }

    pub fn lookup(&self, participant_id: &str) -> Option<ConnectionHandle> {
        self.by_participant.get(participant_id).map(|entry| entry.clone())
    }
}
