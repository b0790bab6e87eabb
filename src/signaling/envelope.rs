use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CallError;
use crate::rooms::RoomId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    // relayed
    CallRequest,
    CallAccept,
    CallDecline,
    Offer,
    Answer,
    IceCandidate,
    EndCall,

    // doctor availability
    GoOnline,
    GoOffline,

    // server originated
    RoomJoined,
    CallAccepted,
    CallEnded,
    Error,
}

impl EventKind {
    /// WebRTC negotiation frames, passed through without inspection.
    pub fn is_negotiation(self) -> bool {
        matches!(self, EventKind::Offer | EventKind::Answer | EventKind::IceCandidate)
    }
}

/// `{ event, roomId?, payload }` as the web client speaks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventKind,
    #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Default::default())
}

impl Envelope {
    pub fn new(event: EventKind, room_id: Option<RoomId>, payload: Value) -> Self {
        Self { event, room_id, payload }
    }

    pub fn for_room(event: EventKind, room_id: &RoomId, payload: Value) -> Self {
        Self::new(event, Some(room_id.clone()), payload)
    }

    pub fn error(room_id: Option<RoomId>, err: &CallError) -> Self {
        Self::new(
            EventKind::Error,
            room_id,
            json!({ "code": err.code(), "message": err.to_string() }),
        )
    }

    pub fn parse(text: &str) -> Result<Self, CallError> {
        serde_json::from_str(text).map_err(|err| CallError::Malformed(err.to_string()))
    }

    pub fn to_json(&self) -> String {
        // an Envelope is always representable as JSON
        serde_json::to_string(self).unwrap_or_default()
    }
}
