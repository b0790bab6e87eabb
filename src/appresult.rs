use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use tracing::{error, warn};

use crate::error::CallError;

pub type AppResult<T> = Result<T, AppError>;

/// Error side of every HTTP handler. Call errors keep their wire code;
/// anything else is a 500.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Some(err) = self.0.downcast_ref::<CallError>() else {
            error!("request failed: {:#}", self.0);
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", self.0)).into_response();
        };

        let status = match err {
            CallError::UnknownRoom(_) => StatusCode::NOT_FOUND,
            CallError::Malformed(_) => StatusCode::BAD_REQUEST,
            CallError::NotParticipant { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::CONFLICT,
        };
        warn!(code = err.code(), %err, "request rejected");
        (status, Json(json!({ "code": err.code(), "message": err.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::RoomId;

    #[test]
    fn call_errors_keep_their_code() {
        let response = AppError::from(CallError::UnknownRoom(RoomId::from("room_x"))).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::from(CallError::AlreadyInCall("p1".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::from(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
