use thiserror::Error;

use crate::rooms::{RoomId, RoomState};

/// Everything that can go wrong while brokering a call.
///
/// None of these ever tear down the signaling process: the controller turns
/// them into `error` envelopes for whoever sent the offending message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("doctor {0} is not online")]
    DoctorOffline(String),

    #[error("doctor {0} is already in a call")]
    DoctorBusy(String),

    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),

    #[error("room {room_id} cannot go from {state} via {event}")]
    InvalidTransition {
        room_id: RoomId,
        state: RoomState,
        event: &'static str,
    },

    #[error("could not reach {0}")]
    DeliveryFailed(String),

    #[error("{participant_id} is not a participant of room {room_id}")]
    NotParticipant {
        room_id: RoomId,
        participant_id: String,
    },

    #[error("{0} already has a call in progress")]
    AlreadyInCall(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl CallError {
    /// Stable code carried in `error` envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            CallError::DoctorOffline(_) => "doctor-offline",
            CallError::DoctorBusy(_) => "doctor-busy",
            CallError::UnknownRoom(_) => "unknown-room",
            CallError::InvalidTransition { .. } => "invalid-transition",
            CallError::DeliveryFailed(_) => "delivery-failed",
            CallError::NotParticipant { .. } => "not-participant",
            CallError::AlreadyInCall(_) => "already-in-call",
            CallError::Malformed(_) => "malformed",
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;
