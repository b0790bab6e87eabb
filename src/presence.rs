use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::{CallError, CallResult};
use crate::rooms::Participant;
use crate::signaling::{ConnId, ConnectionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub doctor_id: String,
    pub handle: ConnectionHandle,
    pub profile: Participant,
}

/// Which doctors can take a call right now, and on which connection.
///
/// Keyed by the doctor's account id; one entry per doctor no matter how
/// many tabs they open.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<String, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, doctor_id: &str, handle: ConnectionHandle, profile: Participant) {
        debug!(doctor_id, conn = %handle.id(), "doctor online");
        self.entries.insert(
            doctor_id.to_owned(),
            PresenceEntry {
                doctor_id: doctor_id.to_owned(),
                handle,
                profile,
            },
        );
    }

    pub fn set_offline(&self, doctor_id: &str) {
        if self.entries.remove(doctor_id).is_some() {
            debug!(doctor_id, "doctor offline");
        }
    }

    pub fn lookup(&self, doctor_id: &str) -> CallResult<ConnectionHandle> {
        self.entries
            .get(doctor_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| CallError::DoctorOffline(doctor_id.to_owned()))
    }

    pub fn profile(&self, doctor_id: &str) -> Option<Participant> {
        self.entries.get(doctor_id).map(|entry| entry.profile.clone())
    }

    pub fn status(&self, doctor_id: &str) -> PresenceStatus {
        if self.entries.contains_key(doctor_id) {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }

    /// Forget every doctor still routed through a connection that just
    /// closed. Returns the doctor ids that went offline.
    pub fn on_disconnect(&self, conn: ConnId) -> Vec<String> {
        let mut dropped = Vec::new();
        self.entries.retain(|doctor_id, entry| {
            let dead = entry.handle.id() == conn;
            if dead {
                dropped.push(doctor_id.clone());
            }
            !dead
        });
        dropped
    }

    pub fn online(&self) -> Vec<Participant> {
        self.entries.iter().map(|entry| entry.profile.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::Role;

    fn profile(id: &str) -> Participant {
        Participant::new(id, Role::Doctor, "Dr. Sen")
    }

    #[test]
    fn reconnect_replaces_entry() {
        let presence = PresenceRegistry::new();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();

        presence.set_online("d1", first, profile("d1"));
        presence.set_online("d1", second.clone(), profile("d1"));

        assert_eq!(presence.len(), 1);
        assert_eq!(presence.lookup("d1").unwrap().id(), second.id());
    }

    #[test]
    fn offline_is_idempotent() {
        let presence = PresenceRegistry::new();
        presence.set_offline("nobody");
        let (handle, _rx) = ConnectionHandle::new();
        presence.set_online("d1", handle, profile("d1"));
        presence.set_offline("d1");
        presence.set_offline("d1");
        assert_eq!(presence.status("d1"), PresenceStatus::Offline);
        assert_eq!(presence.lookup("d1").unwrap_err(), CallError::DoctorOffline("d1".into()));
    }

    #[test]
    fn disconnect_only_drops_matching_handle() {
        let presence = PresenceRegistry::new();
        let (old, _rx1) = ConnectionHandle::new();
        let (new, _rx2) = ConnectionHandle::new();
        let (other, _rx3) = ConnectionHandle::new();

        presence.set_online("d1", old.clone(), profile("d1"));
        presence.set_online("d1", new.clone(), profile("d1"));
        presence.set_online("d2", other.clone(), profile("d2"));

        assert!(presence.on_disconnect(old.id()).is_empty());
        assert_eq!(presence.status("d1"), PresenceStatus::Online);

        assert_eq!(presence.on_disconnect(new.id()), vec!["d1".to_string()]);
        assert_eq!(presence.status("d1"), PresenceStatus::Offline);
        assert_eq!(presence.status("d2"), PresenceStatus::Online);
        assert_eq!(presence.online().len(), 1);
    }
}
