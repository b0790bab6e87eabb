mod link;
mod room;
mod store;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::{
    calls::CallController,
    presence::PresenceStatus,
    AppResult, AppState,
};

pub use link::meeting_link;
pub use room::{
    CallType, Contact, DeclineReason, EndReason, Participant, Role, Room, RoomEvent, RoomId,
    RoomState,
};
pub use store::{RoomStore, Transition};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}", get(room))
        .route("/doctors/online", get(online_doctors))
        .route("/doctors/{doctor_id}/status", get(doctor_status))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(controller): State<CallController>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(controller.store().get(&RoomId::from(room_id))?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn online_doctors(
    State(controller): State<CallController>,
) -> AppResult<Json<Vec<Participant>>> {
    Ok(Json(controller.presence().online()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DoctorStatus {
    doctor_id: String,
    status: PresenceStatus,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn doctor_status(
    State(controller): State<CallController>,
    Path(doctor_id): Path<String>,
) -> Json<DoctorStatus> {
    let status = controller.presence().status(&doctor_id);
    Json(DoctorStatus { doctor_id, status })
}
