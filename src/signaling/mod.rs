mod connection;
mod envelope;
mod relay;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use connection::{ConnId, ConnectionDirectory, ConnectionHandle};
pub use envelope::{Envelope, EventKind};
pub use relay::Relay;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws::signaling_ws))
}
