use std::fmt;

use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CallError, CallResult};

const ROOM_ID_LEN: usize = 32;

/// Opaque room token. Long and random enough that nobody guesses their way
/// into someone else's consultation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn generate() -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(ROOM_ID_LEN)
            .map(char::from)
            .collect();
        Self(format!("room_{token}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One end of a call. Contact details are carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: String,
    pub role: Role,
    pub display_name: String,
    #[serde(flatten)]
    pub contact: Contact,
}

impl Participant {
    pub fn new(participant_id: impl Into<String>, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            role,
            display_name: display_name.into(),
            contact: Contact::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Instant,
    Scheduled,
}

impl CallType {
    pub fn as_str(self) -> &'static str {
        match self {
            CallType::Instant => "instant",
            CallType::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclineReason {
    ByDoctor,
    DoctorOffline,
    DoctorBusy,
}

impl DeclineReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclineReason::ByDoctor => "by-doctor",
            DeclineReason::DoctorOffline => "doctor-offline",
            DeclineReason::DoctorBusy => "doctor-busy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Completed,
    Declined,
    Timeout,
    Cancelled,
    Disconnect,
    Error,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Declined => "declined",
            EndReason::Timeout => "timeout",
            EndReason::Cancelled => "cancelled",
            EndReason::Disconnect => "disconnect",
            EndReason::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum RoomState {
    Requested,
    Ringing,
    Active,
    Declined(DeclineReason),
    TimedOut,
    Cancelled,
    Ended(EndReason),
}

impl RoomState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RoomState::Declined(_) | RoomState::TimedOut | RoomState::Cancelled | RoomState::Ended(_)
        )
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomState::Requested => f.write_str("requested"),
            RoomState::Ringing => f.write_str("ringing"),
            RoomState::Active => f.write_str("active"),
            RoomState::Declined(reason) => write!(f, "declined({})", reason.as_str()),
            RoomState::TimedOut => f.write_str("timed-out"),
            RoomState::Cancelled => f.write_str("cancelled"),
            RoomState::Ended(reason) => write!(f, "ended({})", reason.as_str()),
        }
    }
}

/// Inputs to the room state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    DoctorResolved,
    DoctorUnavailable(DeclineReason),
    Accept,
    Decline,
    RingTimeout,
    /// Patient gave up before the doctor answered. `Disconnect` when the
    /// patient's connection dropped rather than an explicit hang-up.
    Cancel(EndReason),
    Hangup,
    Disconnect,
    Fault,
}

impl RoomEvent {
    pub fn name(self) -> &'static str {
        match self {
            RoomEvent::DoctorResolved => "doctor-resolved",
            RoomEvent::DoctorUnavailable(_) => "doctor-unavailable",
            RoomEvent::Accept => "accept",
            RoomEvent::Decline => "decline",
            RoomEvent::RingTimeout => "ring-timeout",
            RoomEvent::Cancel(_) => "cancel",
            RoomEvent::Hangup => "hangup",
            RoomEvent::Disconnect => "disconnect",
            RoomEvent::Fault => "fault",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: RoomId,
    pub patient: Participant,
    pub doctor_id: String,
    /// Filled in from the presence profile once the doctor is reached.
    pub doctor: Option<Participant>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(flatten)]
    pub state: RoomState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub accepted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub end_reason: Option<EndReason>,
}

impl Room {
    pub fn new(patient: Participant, doctor_id: impl Into<String>, call_type: CallType) -> Self {
        Self {
            room_id: RoomId::generate(),
            patient,
            doctor_id: doctor_id.into(),
            doctor: None,
            call_type,
            state: RoomState::Requested,
            created_at: OffsetDateTime::now_utc(),
            accepted_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn role_of(&self, participant_id: &str) -> Option<Role> {
        if self.patient.participant_id == participant_id {
            Some(Role::Patient)
        } else if self.doctor_id == participant_id {
            Some(Role::Doctor)
        } else {
            None
        }
    }

    /// The member on the other side of `participant_id`, with its role.
    pub fn peer_of(&self, participant_id: &str) -> Option<(&str, Role)> {
        match self.role_of(participant_id)? {
            Role::Patient => Some((self.doctor_id.as_str(), Role::Doctor)),
            Role::Doctor => Some((self.patient.participant_id.as_str(), Role::Patient)),
        }
    }

    /// Applies `event`. Returns whether the state changed; a rejected event
    /// leaves the room untouched.
    pub fn apply(&mut self, event: RoomEvent) -> CallResult<bool> {
        use RoomEvent as E;
        use RoomState as S;

        let next = match (self.state, event) {
            (S::Requested, E::DoctorResolved) => S::Ringing,
            (S::Requested | S::Ringing, E::DoctorUnavailable(reason)) => S::Declined(reason),

            (S::Ringing, E::Accept) => S::Active,
            (S::Ringing, E::Decline) => S::Declined(DeclineReason::ByDoctor),
            (S::Ringing, E::RingTimeout) => S::TimedOut,
            (S::Requested | S::Ringing, E::Cancel(_)) => S::Cancelled,

            // a doubled click on an already answered call is harmless
            (S::Active | S::Declined(_), E::Accept | E::Decline) => return Ok(false),

            (S::Active, E::Hangup) => S::Ended(EndReason::Completed),
            (S::Active, E::Disconnect) => S::Ended(EndReason::Disconnect),
            (S::Active, E::Fault) => S::Ended(EndReason::Error),

            (state, event) => {
                return Err(CallError::InvalidTransition {
                    room_id: self.room_id.clone(),
                    state,
                    event: event.name(),
                });
            }
        };

        let now = OffsetDateTime::now_utc();
        match next {
            S::Active => self.accepted_at = Some(now),
            S::Declined(_) => self.finish(now, EndReason::Declined),
            S::TimedOut => self.finish(now, EndReason::Timeout),
            S::Cancelled => {
                let reason = match event {
                    E::Cancel(reason) => reason,
                    _ => EndReason::Cancelled,
                };
                self.finish(now, reason)
            }
            S::Ended(reason) => self.finish(now, reason),
            S::Requested | S::Ringing => {}
        }
        self.state = next;
        Ok(true)
    }

    fn finish(&mut self, now: OffsetDateTime, reason: EndReason) {
        self.ended_at = Some(now);
        self.end_reason = Some(reason);
    }
}
