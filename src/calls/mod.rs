mod appointments;
mod timers;


use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::{CallError, CallResult};
use crate::presence::PresenceRegistry;
use crate::rooms::{
    meeting_link, CallType, Contact, DeclineReason, EndReason, Participant, Role, Room, RoomEvent,
    RoomId, RoomState, RoomStore, Transition,
};
use crate::signaling::{ConnectionDirectory, ConnectionHandle, Envelope, EventKind, Relay};

pub use appointments::{
    AppointmentRecord, AppointmentSink, AppointmentStatus, HttpAppointmentSink, LogAppointmentSink,
};
pub use timers::{RoomTimers, TimerKind};

#[derive(Debug, Clone)]
pub struct CallSettings {
    pub ring_timeout: Duration,
    pub reconnect_grace: Duration,
    /// How long a finished room stays around before it is removed.
    pub room_linger: Duration,
    /// Base of generated meeting links.
    pub origin: String,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(45),
            reconnect_grace: Duration::from_secs(15),
            room_linger: Duration::from_secs(30),
            origin: "http://localhost:8080".to_owned(),
        }
    }
}

/// Published for every state change a room goes through.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub room_id: RoomId,
    pub from: RoomState,
    pub to: RoomState,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// A connected socket and who is on the other end of it.
#[derive(Debug, Clone)]
pub struct Client {
    pub participant: Participant,
    pub handle: ConnectionHandle,
}

impl Client {
    pub fn id(&self) -> &str {
        &self.participant.participant_id
    }

    pub fn role(&self) -> Role {
        self.participant.role
    }

    fn send(&self, envelope: Envelope) {
        if self.handle.send(envelope).is_err() {
            debug!(participant_id = self.id(), "client went away before reply");
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallRequestPayload {
    doctor_id: String,
    #[serde(default, rename = "type")]
    call_type: CallType,
    display_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Drives every room from request to teardown.
///
/// Owns the only write path into the room store. Everything it is handed
/// (store, presence, connections, appointment sink) is shared with the
/// HTTP layer through `Arc`s, so the controller itself is cheap to clone
/// into timer tasks and socket handlers.
#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<RoomStore>,
    presence: Arc<PresenceRegistry>,
    directory: Arc<ConnectionDirectory>,
    relay: Relay,
    timers: RoomTimers,
    appointments: Arc<dyn AppointmentSink>,
    settings: CallSettings,
    events: broadcast::Sender<CallEvent>,
}

impl CallController {
    pub fn new(
        store: Arc<RoomStore>,
        presence: Arc<PresenceRegistry>,
        directory: Arc<ConnectionDirectory>,
        appointments: Arc<dyn AppointmentSink>,
        settings: CallSettings,
    ) -> Self {
        let relay = Relay::new(store.clone(), presence.clone(), directory.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                presence,
                directory,
                relay,
                timers: RoomTimers::new(),
                appointments,
                settings,
                events: broadcast::channel(256).0,
            }),
        }
    }

    pub fn store(&self) -> &RoomStore {
        &self.inner.store
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    pub fn settings(&self) -> &CallSettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    /// Registers a freshly opened socket. A doctor becomes reachable for new
    /// calls unless they connected as unavailable. Rooms waiting out a
    /// reconnection grace for this participant pick up the new socket.
    pub fn connect(
        &self,
        participant: Participant,
        available: bool,
    ) -> (Client, mpsc::UnboundedReceiver<Envelope>) {
        let (handle, rx) = ConnectionHandle::new();
        let client = Client { participant, handle };

        if self.inner.directory.bind(client.id(), client.handle.clone()).is_some() {
            debug!(participant_id = client.id(), "replaced previous connection");
        }
        if client.role() == Role::Doctor && available {
            self.inner
                .presence
                .set_online(client.id(), client.handle.clone(), client.participant.clone());
        }
        info!(participant_id = client.id(), role = client.role().as_str(), conn = %client.handle.id(), "connected");

        let returning = TimerKind::Grace(client.id().to_owned());
        for room in self.inner.store.open_rooms_for(client.id()) {
            if room.state == RoomState::Active
                && self.inner.timers.cancel_kind(&room.room_id, &returning)
            {
                self.resume(&client, &room);
            }
        }

        (client, rx)
    }

    /// Socket closed. Only acts if this was still the participant's current
    /// connection; a replaced tab closing is not a disconnect.
    pub fn disconnect(&self, client: &Client) {
        let conn = client.handle.id();
        for doctor_id in self.inner.presence.on_disconnect(conn) {
            debug!(%doctor_id, "presence dropped with connection");
        }
        if !self.inner.directory.unbind(client.id(), conn) {
            debug!(participant_id = client.id(), "stale connection closed");
            return;
        }
        info!(participant_id = client.id(), %conn, "disconnected");

        for room in self.inner.store.open_rooms_for(client.id()) {
            self.peer_lost(&room.room_id, client.id());
        }
    }

    /// Entry point for raw text frames. Garbage is logged and dropped.
    pub fn handle_text(&self, client: &Client, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => self.handle(client, envelope),
            Err(err) => warn!(participant_id = client.id(), %err, "dropping frame"),
        }
    }

    pub fn handle(&self, client: &Client, envelope: Envelope) {
        let room_id = envelope.room_id.clone();
        let result = match envelope.event {
            EventKind::CallRequest => self.request_call(client, envelope.payload).map(|_| ()),
            EventKind::CallAccept => self.with_room(room_id.as_ref(), |room_id| {
                self.accept(client, room_id, envelope.payload)
            }),
            EventKind::CallDecline => self.with_room(room_id.as_ref(), |room_id| {
                self.decline(client, room_id, envelope.payload)
            }),
            EventKind::EndCall => self.with_room(room_id.as_ref(), |room_id| {
                self.end_call(client, room_id, envelope.payload)
            }),
            EventKind::Offer | EventKind::Answer | EventKind::IceCandidate => {
                self.with_room(room_id.as_ref(), |room_id| {
                    self.negotiate(client, room_id, envelope)
                })
            }
            EventKind::GoOnline | EventKind::GoOffline => self.availability(client, envelope.event),
            EventKind::RoomJoined | EventKind::CallAccepted | EventKind::CallEnded | EventKind::Error => {
                warn!(participant_id = client.id(), event = ?envelope.event, "client sent a server event");
                Ok(())
            }
        };

        if let Err(err) = result {
            self.report(client, room_id, &err);
        }
    }

    fn with_room<F>(&self, room_id: Option<&RoomId>, f: F) -> CallResult<()>
    where
        F: FnOnce(&RoomId) -> CallResult<()>,
    {
        match room_id {
            Some(room_id) => f(room_id),
            None => Err(CallError::Malformed("missing roomId".to_owned())),
        }
    }

    fn report(&self, client: &Client, room_id: Option<RoomId>, err: &CallError) {
        warn!(participant_id = client.id(), room_id = ?room_id, code = err.code(), %err, "call error");
        client.send(Envelope::error(room_id, err));
    }

    /// Patient asks for `doctorId`. The room always gets created so the
    /// patient has a room id to attach the outcome to, even when the doctor
    /// turns out to be offline or busy.
    pub fn request_call(&self, client: &Client, payload: Value) -> CallResult<RoomId> {
        if client.role() != Role::Patient {
            return Err(CallError::Malformed("only patients can request calls".to_owned()));
        }
        let request: CallRequestPayload = serde_json::from_value(payload.clone())
            .map_err(|err| CallError::Malformed(err.to_string()))?;

        let mut patient = client.participant.clone();
        if let Some(name) = request.display_name {
            patient.display_name = name;
        }
        if request.phone.is_some() || request.email.is_some() {
            patient.contact = Contact {
                phone: request.phone,
                email: request.email,
            };
        }

        let room = self
            .inner
            .store
            .create_room(patient, &request.doctor_id, request.call_type)?;
        let room_id = room.room_id.clone();
        info!(%room_id, patient_id = client.id(), doctor_id = %request.doctor_id, "call requested");

        client.send(self.joined(&room, Role::Patient, false)?);
        if room.call_type == CallType::Scheduled {
            self.record(&room, AppointmentStatus::Scheduled);
        }

        if room.state == RoomState::Declined(DeclineReason::DoctorBusy) {
            info!(%room_id, doctor_id = %request.doctor_id, "doctor busy");
            self.publish(&room_id, RoomState::Requested, room.state);
            self.finish(&room_id);
            client.send(Envelope::error(
                Some(room_id.clone()),
                &CallError::DoctorBusy(request.doctor_id),
            ));
            return Ok(room_id);
        }

        let Some(profile) = self.inner.presence.profile(&request.doctor_id) else {
            self.doctor_unreachable(client, &room_id, &request.doctor_id)?;
            return Ok(room_id);
        };
        self.inner.store.resolve_doctor(&room_id, profile.clone())?;

        // ring first, so an accept racing in on the doctor's socket finds
        // the room ringing
        let ringing = self.apply(&room_id, RoomEvent::DoctorResolved)?;

        let mut notice = match payload {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        notice.insert("patient".to_owned(), json!(ringing.room.patient));
        notice.insert("type".to_owned(), json!(ringing.room.call_type));
        notice.insert(
            "meetingLink".to_owned(),
            json!(meeting_link(
                &self.inner.settings.origin,
                &room_id,
                Role::Doctor,
                &profile.display_name
            )?),
        );
        let ring = Envelope::for_room(EventKind::CallRequest, &room_id, Value::Object(notice));

        if self
            .inner
            .relay
            .deliver(&request.doctor_id, Role::Doctor, ring)
            .is_err()
        {
            self.doctor_unreachable(client, &room_id, &request.doctor_id)?;
            return Ok(room_id);
        }

        let controller = self.clone();
        let timed_out = room_id.clone();
        self.inner.timers.schedule(
            &room_id,
            TimerKind::Ring,
            self.inner.settings.ring_timeout,
            move || controller.ring_timeout(&timed_out),
        );
        Ok(room_id)
    }

    fn doctor_unreachable(&self, client: &Client, room_id: &RoomId, doctor_id: &str) -> CallResult<()> {
        self.apply(room_id, RoomEvent::DoctorUnavailable(DeclineReason::DoctorOffline))?;
        self.finish(room_id);
        client.send(Envelope::error(
            Some(room_id.clone()),
            &CallError::DoctorOffline(doctor_id.to_owned()),
        ));
        Ok(())
    }

    pub fn accept(&self, client: &Client, room_id: &RoomId, payload: Value) -> CallResult<()> {
        self.require_doctor(client, room_id)?;
        let transition = self.apply(room_id, RoomEvent::Accept)?;
        if !transition.changed {
            self.echo_state(client, &transition.room);
            return Ok(());
        }

        self.inner.timers.cancel_kind(room_id, &TimerKind::Ring);
        let room = transition.room;
        let patient_id = room.patient.participant_id.as_str();

        let accepted = Envelope::for_room(EventKind::CallAccepted, room_id, json!({ "state": room.state.to_string() }));
        client.send(accepted.clone());

        let forwarded = self
            .inner
            .relay
            .relay(room_id, client.id(), Envelope::for_room(EventKind::CallAccept, room_id, payload))
            .and_then(|_| self.inner.relay.deliver(patient_id, Role::Patient, accepted));
        if forwarded.is_err() {
            self.peer_lost(room_id, patient_id);
        }

        self.record(&room, AppointmentStatus::Completed);
        Ok(())
    }

    pub fn decline(&self, client: &Client, room_id: &RoomId, payload: Value) -> CallResult<()> {
        self.require_doctor(client, room_id)?;
        let transition = self.apply(room_id, RoomEvent::Decline)?;
        if !transition.changed {
            self.echo_state(client, &transition.room);
            return Ok(());
        }

        self.finish(room_id);
        let decline = Envelope::for_room(EventKind::CallDecline, room_id, payload);
        if let Err(err) = self.inner.relay.relay(room_id, client.id(), decline) {
            debug!(%room_id, %err, "patient gone before decline");
        }
        Ok(())
    }

    /// Hang-up from either side. Before the doctor answers this is a cancel
    /// from the patient or a decline from the doctor.
    pub fn end_call(&self, client: &Client, room_id: &RoomId, payload: Value) -> CallResult<()> {
        let room = self.inner.store.get(room_id)?;
        let Some(role) = room.role_of(client.id()) else {
            return Err(not_participant(room_id, client.id()));
        };

        let event = match (room.state, role) {
            (RoomState::Requested | RoomState::Ringing, Role::Patient) => {
                RoomEvent::Cancel(EndReason::Cancelled)
            }
            (RoomState::Requested | RoomState::Ringing, Role::Doctor) => RoomEvent::Decline,
            _ => RoomEvent::Hangup,
        };
        let transition = self.apply(room_id, event)?;
        if !transition.changed {
            self.echo_state(client, &transition.room);
            return Ok(());
        }

        let hangup = Envelope::for_room(EventKind::EndCall, room_id, payload);
        if let Err(err) = self.inner.relay.relay(room_id, client.id(), hangup) {
            debug!(%room_id, %err, "peer gone before end-call");
        }
        self.conclude(&transition.room);
        Ok(())
    }

    /// offer / answer / ice-candidate, only once the call is up.
    pub fn negotiate(&self, client: &Client, room_id: &RoomId, envelope: Envelope) -> CallResult<()> {
        if !envelope.event.is_negotiation() {
            return Err(CallError::Malformed(format!("{:?} is not a negotiation frame", envelope.event)));
        }
        let room = self.inner.store.get(room_id)?;
        if room.state != RoomState::Active {
            return Err(CallError::InvalidTransition {
                room_id: room_id.clone(),
                state: room.state,
                event: "negotiate",
            });
        }

        match self.inner.relay.relay(room_id, client.id(), envelope) {
            Err(CallError::DeliveryFailed(peer_id)) => {
                self.peer_lost(room_id, &peer_id);
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    fn availability(&self, client: &Client, event: EventKind) -> CallResult<()> {
        if client.role() != Role::Doctor {
            return Err(CallError::Malformed("only doctors have presence".to_owned()));
        }
        if event == EventKind::GoOnline {
            self.inner
                .presence
                .set_online(client.id(), client.handle.clone(), client.participant.clone());
        } else {
            self.inner.presence.set_offline(client.id());
        }
        Ok(())
    }

    fn ring_timeout(&self, room_id: &RoomId) {
        match self.apply(room_id, RoomEvent::RingTimeout) {
            Ok(transition) if transition.changed => {
                info!(%room_id, "ring timed out");
                self.conclude(&transition.room);
            }
            Ok(_) => {}
            Err(err) => debug!(%room_id, %err, "late ring timer"),
        }
    }

    /// One side stopped answering. Active calls get a grace period; calls
    /// that never got going end right away.
    fn peer_lost(&self, room_id: &RoomId, participant_id: &str) {
        let Ok(room) = self.inner.store.get(room_id) else {
            return;
        };
        let Some(role) = room.role_of(participant_id) else {
            return;
        };

        let event = match room.state {
            RoomState::Active => {
                // if both sides dropped, the first window stands
                if !matches!(self.inner.timers.pending(room_id), Some(TimerKind::Grace(_))) {
                    info!(%room_id, participant_id, "holding room for reconnect");
                    self.start_grace(room_id, participant_id);
                }
                return;
            }
            RoomState::Requested | RoomState::Ringing => match role {
                Role::Patient => RoomEvent::Cancel(EndReason::Disconnect),
                Role::Doctor => RoomEvent::DoctorUnavailable(DeclineReason::DoctorOffline),
            },
            _ => return,
        };

        if let Ok(transition) = self.apply(room_id, event) {
            if transition.changed {
                self.conclude(&transition.room);
            }
        }
    }

    fn start_grace(&self, room_id: &RoomId, participant_id: &str) {
        let controller = self.clone();
        let expired = room_id.clone();
        self.inner.timers.schedule(
            room_id,
            TimerKind::Grace(participant_id.to_owned()),
            self.inner.settings.reconnect_grace,
            move || controller.grace_expired(&expired),
        );
    }

    fn grace_expired(&self, room_id: &RoomId) {
        match self.apply(room_id, RoomEvent::Disconnect) {
            Ok(transition) if transition.changed => {
                info!(%room_id, "reconnection grace ran out");
                self.conclude(&transition.room);
            }
            Ok(_) => {}
            Err(err) => debug!(%room_id, %err, "late grace timer"),
        }
    }

    fn resume(&self, client: &Client, room: &Room) {
        info!(room_id = %room.room_id, participant_id = client.id(), "resumed within grace");
        let Some(role) = room.role_of(client.id()) else {
            return;
        };
        match self.joined(room, role, true) {
            Ok(joined) => client.send(joined),
            Err(err) => warn!(room_id = %room.room_id, %err, "could not build room-joined"),
        }

        let Some((peer_id, peer_role)) = room.peer_of(client.id()) else {
            return;
        };
        let notice = Envelope::for_room(
            EventKind::RoomJoined,
            &room.room_id,
            json!({ "participantId": client.id(), "resumed": true }),
        );
        if self.inner.relay.deliver(peer_id, peer_role, notice).is_err() {
            // the other side dropped too; give it its own window
            self.start_grace(&room.room_id, peer_id);
        }
    }

    /// Server shutting down: nothing in flight survives it.
    pub fn shutdown(&self) {
        for room_id in self.inner.store.open_room_ids() {
            let Ok(room) = self.inner.store.get(&room_id) else {
                continue;
            };
            let event = match room.state {
                RoomState::Active => RoomEvent::Fault,
                _ => RoomEvent::Cancel(EndReason::Error),
            };
            if let Ok(transition) = self.apply(&room_id, event) {
                self.conclude(&transition.room);
            }
        }
    }

    fn apply(&self, room_id: &RoomId, event: RoomEvent) -> CallResult<Transition> {
        let transition = match self.inner.store.transition(room_id, event) {
            Ok(transition) => transition,
            Err(err) => {
                warn!(%room_id, event = event.name(), %err, "transition rejected");
                return Err(err);
            }
        };

        if transition.changed {
            self.publish(room_id, transition.from, transition.room.state);
        }
        Ok(transition)
    }

    fn publish(&self, room_id: &RoomId, from: RoomState, to: RoomState) {
        info!(%room_id, %from, %to, "room");
        let _ = self.inner.events.send(CallEvent {
            room_id: room_id.clone(),
            from,
            to,
            at: OffsetDateTime::now_utc(),
        });
    }

    /// Tell both sides a room is over and queue its removal.
    fn conclude(&self, room: &Room) {
        let reason = room.end_reason.unwrap_or(EndReason::Completed);
        let ended = Envelope::for_room(
            EventKind::CallEnded,
            &room.room_id,
            json!({ "reason": reason.as_str(), "state": room.state.to_string() }),
        );
        for (participant_id, role) in [
            (room.patient.participant_id.as_str(), Role::Patient),
            (room.doctor_id.as_str(), Role::Doctor),
        ] {
            if self.inner.relay.deliver(participant_id, role, ended.clone()).is_err() {
                debug!(room_id = %room.room_id, participant_id, "not connected for call-ended");
            }
        }
        self.finish(&room.room_id);
    }

    /// Keep a terminal room around for a while, then drop it.
    fn finish(&self, room_id: &RoomId) {
        let controller = self.clone();
        let expired = room_id.clone();
        self.inner.timers.schedule(
            room_id,
            TimerKind::Linger,
            self.inner.settings.room_linger,
            move || {
                controller.inner.timers.cancel(&expired);
                if controller.inner.store.remove(&expired).is_some() {
                    debug!(room_id = %expired, "room removed");
                }
            },
        );
    }

    fn echo_state(&self, client: &Client, room: &Room) {
        let envelope = match room.state {
            RoomState::Active => Envelope::for_room(
                EventKind::CallAccepted,
                &room.room_id,
                json!({ "state": room.state.to_string() }),
            ),
            state => Envelope::for_room(
                EventKind::CallEnded,
                &room.room_id,
                json!({
                    "reason": room.end_reason.map(EndReason::as_str),
                    "state": state.to_string(),
                }),
            ),
        };
        client.send(envelope);
    }

    fn joined(&self, room: &Room, role: Role, resumed: bool) -> CallResult<Envelope> {
        let name = match role {
            Role::Patient => room.patient.display_name.as_str(),
            Role::Doctor => room
                .doctor
                .as_ref()
                .map(|doctor| doctor.display_name.as_str())
                .unwrap_or(room.doctor_id.as_str()),
        };
        let link = meeting_link(&self.inner.settings.origin, &room.room_id, role, name)?;
        Ok(Envelope::for_room(
            EventKind::RoomJoined,
            &room.room_id,
            json!({
                "roomId": room.room_id,
                "role": role,
                "meetingLink": link,
                "state": room.state.to_string(),
                "resumed": resumed,
            }),
        ))
    }

    fn require_doctor(&self, client: &Client, room_id: &RoomId) -> CallResult<()> {
        let room = self.inner.store.get(room_id)?;
        match room.role_of(client.id()) {
            Some(Role::Doctor) => Ok(()),
            _ => Err(not_participant(room_id, client.id())),
        }
    }

    fn record(&self, room: &Room, status: AppointmentStatus) {
        let record = match AppointmentRecord::for_room(room, &self.inner.settings.origin, status) {
            Ok(record) => record,
            Err(err) => {
                warn!(room_id = %room.room_id, %err, "cannot build appointment");
                return;
            }
        };
        let sink = self.inner.appointments.clone();
        tokio::spawn(async move {
            let room_id = record.video_call_id.clone();
            if let Err(err) = sink.record_appointment(record).await {
                warn!(%room_id, "recording appointment failed: {err:#}");
            }
        });
    }
}

fn not_participant(room_id: &RoomId, participant_id: &str) -> CallError {
    CallError::NotParticipant {
        room_id: room_id.clone(),
        participant_id: participant_id.to_owned(),
    }
}
