use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{CallError, CallResult};

use super::{CallType, DeclineReason, Participant, Room, RoomEvent, RoomId, RoomState};

/// Outcome of a successful `transition`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: RoomState,
    pub room: Room,
    pub changed: bool,
}

/// Every live call session on this server.
///
/// All reads and writes go through one short-held lock, so checks that span
/// rooms (a doctor already busy, a patient already calling) cannot race the
/// transition they guard. Nothing is ever awaited while it is held.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: Mutex<HashMap<RoomId, Room>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a room in `Requested`. A participant may only be in one
    /// unfinished room at a time. If the doctor is already in an active call
    /// the room comes back `Declined(DoctorBusy)` instead.
    pub fn create_room(
        &self,
        patient: Participant,
        doctor_id: &str,
        call_type: CallType,
    ) -> CallResult<Room> {
        let mut rooms = self.rooms.lock();

        let caller_busy = rooms.values().any(|room| {
            !room.state.is_terminal()
                && room.role_of(&patient.participant_id).is_some()
        });
        if caller_busy {
            return Err(CallError::AlreadyInCall(patient.participant_id));
        }

        let mut room = Room::new(patient, doctor_id, call_type);
        if busy_elsewhere(&rooms, doctor_id, &room.room_id) {
            room.apply(RoomEvent::DoctorUnavailable(DeclineReason::DoctorBusy))?;
        }
        rooms.insert(room.room_id.clone(), room.clone());
        Ok(room)
    }

    pub fn get(&self, room_id: &RoomId) -> CallResult<Room> {
        self.rooms
            .lock()
            .get(room_id)
            .cloned()
            .ok_or_else(|| CallError::UnknownRoom(room_id.clone()))
    }

    /// The only way a room changes state.
    pub fn transition(&self, room_id: &RoomId, event: RoomEvent) -> CallResult<Transition> {
        let mut rooms = self.rooms.lock();

        if event == RoomEvent::Accept {
            let room = rooms
                .get(room_id)
                .ok_or_else(|| CallError::UnknownRoom(room_id.clone()))?;
            if room.state == RoomState::Ringing
                && busy_elsewhere(&rooms, &room.doctor_id, room_id)
            {
                return Err(CallError::DoctorBusy(room.doctor_id.clone()));
            }
        }

        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| CallError::UnknownRoom(room_id.clone()))?;
        let from = room.state;
        let changed = room.apply(event)?;

        Ok(Transition {
            from,
            room: room.clone(),
            changed,
        })
    }

    /// Records who actually picked up for the doctor side.
    pub fn resolve_doctor(&self, room_id: &RoomId, doctor: Participant) -> CallResult<()> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| CallError::UnknownRoom(room_id.clone()))?;
        room.doctor = Some(doctor);
        Ok(())
    }

    pub fn remove(&self, room_id: &RoomId) -> Option<Room> {
        self.rooms.lock().remove(room_id)
    }

    /// Unfinished rooms `participant_id` belongs to.
    pub fn open_rooms_for(&self, participant_id: &str) -> Vec<Room> {
        self.rooms
            .lock()
            .values()
            .filter(|room| !room.state.is_terminal() && room.role_of(participant_id).is_some())
            .cloned()
            .collect()
    }

    /// Ids of every room that has not reached a terminal state.
    pub fn open_room_ids(&self) -> Vec<RoomId> {
        self.rooms
            .lock()
            .values()
            .filter(|room| !room.state.is_terminal())
            .map(|room| room.room_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn busy_elsewhere(rooms: &HashMap<RoomId, Room>, doctor_id: &str, except: &RoomId) -> bool {
    rooms.values().any(|room| {
        &room.room_id != except && room.doctor_id == doctor_id && room.state == RoomState::Active
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    use crate::rooms::Role;

    fn patient(id: &str) -> Participant {
        Participant::new(id, Role::Patient, "Ravi")
    }

    fn ringing(store: &RoomStore, patient_id: &str, doctor_id: &str) -> RoomId {
        let room = store
            .create_room(patient(patient_id), doctor_id, CallType::Instant)
            .unwrap();
        store.transition(&room.room_id, RoomEvent::DoctorResolved).unwrap();
        room.room_id
    }

    #[test]
    fn created_rooms_start_requested() {
        let store = RoomStore::new();
        let room = store.create_room(patient("p1"), "d1", CallType::Scheduled).unwrap();
        let fetched = store.get(&room.room_id).unwrap();
        assert_eq!(fetched.state, RoomState::Requested);
        assert_eq!(fetched.call_type, CallType::Scheduled);
        assert!(fetched.doctor.is_none());
    }

    #[test]
    fn unknown_room_is_reported() {
        let store = RoomStore::new();
        let missing = RoomId::from("room_missing");
        assert_eq!(store.get(&missing).unwrap_err(), CallError::UnknownRoom(missing.clone()));
        assert!(matches!(
            store.transition(&missing, RoomEvent::Accept),
            Err(CallError::UnknownRoom(_))
        ));
    }

    #[test]
    fn rejected_transition_keeps_state() {
        let store = RoomStore::new();
        let id = ringing(&store, "p1", "d1");
        let err = store.transition(&id, RoomEvent::Hangup).unwrap_err();
        assert!(matches!(err, CallError::InvalidTransition { .. }));
        assert_eq!(store.get(&id).unwrap().state, RoomState::Ringing);
    }

    #[test]
    fn second_accept_reports_no_change() {
        let store = RoomStore::new();
        let id = ringing(&store, "p1", "d1");
        let first = store.transition(&id, RoomEvent::Accept).unwrap();
        let second = store.transition(&id, RoomEvent::Accept).unwrap();
        assert!(first.changed);
        assert_eq!(first.from, RoomState::Ringing);
        assert!(!second.changed);
        assert_eq!(second.room.state, RoomState::Active);
    }

    #[test]
    fn doctor_cannot_accept_two_calls() {
        let store = RoomStore::new();
        let first = ringing(&store, "p1", "d1");
        let second = ringing(&store, "p2", "d1");
        store.transition(&first, RoomEvent::Accept).unwrap();

        let err = store.transition(&second, RoomEvent::Accept).unwrap_err();
        assert_eq!(err, CallError::DoctorBusy("d1".into()));
        assert_eq!(store.get(&second).unwrap().state, RoomState::Ringing);
    }

    #[test]
    fn patient_gets_one_open_room() {
        let store = RoomStore::new();
        ringing(&store, "p1", "d1");
        let err = store
            .create_room(patient("p1"), "d2", CallType::Instant)
            .unwrap_err();
        assert_eq!(err, CallError::AlreadyInCall("p1".into()));
    }

    #[test]
    fn finished_rooms_do_not_block_new_calls() {
        let store = RoomStore::new();
        let id = ringing(&store, "p1", "d1");
        store
            .transition(&id, RoomEvent::DoctorUnavailable(DeclineReason::DoctorOffline))
            .unwrap();
        assert!(store.open_rooms_for("p1").is_empty());
        assert!(store.create_room(patient("p1"), "d1", CallType::Instant).is_ok());
    }

    #[test]
    fn remove_forgets_room() {
        let store = RoomStore::new();
        let id = ringing(&store, "p1", "d1");
        assert!(store.remove(&id).is_some());
        assert!(store.is_empty());
        assert!(store.remove(&id).is_none());
    }

    #[test]
    fn calling_a_busy_doctor_declines_at_creation() {
        let store = RoomStore::new();
        let first = ringing(&store, "p1", "d1");
        store.transition(&first, RoomEvent::Accept).unwrap();

        let room = store.create_room(patient("p2"), "d1", CallType::Instant).unwrap();
        assert_eq!(room.state, RoomState::Declined(DeclineReason::DoctorBusy));
        assert_eq!(store.get(&room.room_id).unwrap().state, room.state);
        assert!(store.open_rooms_for("p2").is_empty());
    }

    #[test]
    fn racing_answers_change_a_room_once() {
        let store = RoomStore::new();
        let id = ringing(&store, "p1", "d1");
        let events = [RoomEvent::Accept, RoomEvent::Decline, RoomEvent::RingTimeout];
        let barrier = Barrier::new(24);

        let changed: usize = thread::scope(|scope| {
            let handles: Vec<_> = (0..24)
                .map(|n| {
                    let (store, id, barrier) = (&store, &id, &barrier);
                    let event = events[n % events.len()];
                    scope.spawn(move || {
                        barrier.wait();
                        store.transition(id, event).map(|t| t.changed).unwrap_or(false)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|changed| *changed)
                .count()
        });

        assert_eq!(changed, 1);
        assert!(store.get(&id).unwrap().state != RoomState::Ringing);
    }

    #[test]
    fn racing_accepts_for_one_doctor_leave_one_active() {
        for _ in 0..50 {
            let store = RoomStore::new();
            let first = ringing(&store, "p1", "d1");
            let second = ringing(&store, "p2", "d1");
            let barrier = Barrier::new(2);

            let results: Vec<_> = thread::scope(|scope| {
                let handles: Vec<_> = [&first, &second]
                    .into_iter()
                    .map(|id| {
                        let (store, barrier) = (&store, &barrier);
                        scope.spawn(move || {
                            barrier.wait();
                            store.transition(id, RoomEvent::Accept)
                        })
                    })
                    .collect();
                handles.into_iter().map(|handle| handle.join().unwrap()).collect()
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(CallError::DoctorBusy(id)) if id == "d1")));
            let active = [&first, &second]
                .into_iter()
                .filter(|id| store.get(id).unwrap().state == RoomState::Active)
                .count();
            assert_eq!(active, 1);
        }
    }
}
