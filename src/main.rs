use std::sync::Arc;

use anyhow::Context;
use callrelay::{
    app, logging,
    calls::{AppointmentSink, HttpAppointmentSink, LogAppointmentSink},
    presence::PresenceRegistry,
    rooms::RoomStore,
    signaling::ConnectionDirectory,
    AppState, CallController, Config,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;
    let config = Config::from_env()?;

    let appointments: Arc<dyn AppointmentSink> = match &config.appointments_url {
        Some(url) => Arc::new(HttpAppointmentSink::new(url)),
        None => {
            warn!("APPOINTMENTS_URL not set, appointments will only be logged");
            Arc::new(LogAppointmentSink)
        }
    };

    let controller = CallController::new(
        Arc::new(RoomStore::new()),
        Arc::new(PresenceRegistry::new()),
        Arc::new(ConnectionDirectory::new()),
        appointments,
        config.calls.clone(),
    );
    let app_state = AppState {
        controller: controller.clone(),
        ice_servers: Arc::new(config.ice_servers.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "signaling server listening");

    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(shutdown(controller))
        .await?;
    Ok(())
}

async fn shutdown(controller: CallController) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down, ending open calls");
    controller.shutdown();
}
