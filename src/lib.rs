pub mod appresult;
pub mod calls;
pub mod config;
pub mod error;
pub mod logging;
pub mod presence;
pub mod rooms;
pub mod signaling;

use std::sync::Arc;

use axum::{debug_handler, extract::{FromRef, State}, routing::get, Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{AppError, AppResult};
pub use calls::CallController;
pub use config::{Config, IceServer};
pub use error::{CallError, CallResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub controller: CallController,
    pub ice_servers: Arc<Vec<IceServer>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ice-servers", get(ice_servers))

        .merge(rooms::router())
        .merge(signaling::router())

        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[debug_handler]
async fn health() -> &'static str {
    "ok"
}

#[debug_handler(state = AppState)]
async fn ice_servers(State(ice_servers): State<Arc<Vec<IceServer>>>) -> Json<Vec<IceServer>> {
    Json(ice_servers.as_ref().clone())
}
