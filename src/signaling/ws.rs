use axum::{
    debug_handler,
    extract::{ws::Message, Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::calls::CallController;
use crate::rooms::{Contact, Participant, Role};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectQuery {
    participant_id: String,
    role: Role,
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    available: Option<bool>,
}

impl ConnectQuery {
    fn into_participant(self) -> (Participant, bool) {
        let available = self.available.unwrap_or(true);
        let display_name = self.name.unwrap_or_else(|| self.participant_id.clone());
        (
            Participant {
                participant_id: self.participant_id,
                role: self.role,
                display_name,
                contact: Contact {
                    phone: self.phone,
                    email: self.email,
                },
            },
            available,
        )
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn signaling_ws(
    Query(query): Query<ConnectQuery>,
    State(controller): State<CallController>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let (participant, available) = query.into_participant();

    ws.on_upgrade(async move |stream| {
        let (client, mut outbox) = controller.connect(participant, available);
        let (mut sender, mut receiver) = stream.split();

        let mut write_task = tokio::spawn(async move {
            while let Some(envelope) = outbox.recv().await {
                if sender.send(Message::Text(envelope.to_json().into())).await.is_err() {
                    break;
                }
            }
        });

        let reader = client.clone();
        let reader_controller = controller.clone();
        let mut read_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => reader_controller.handle_text(&reader, text.as_str()),
                    Message::Binary(_) => {
                        warn!(participant_id = reader.id(), "binary frame ignored");
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        });

        tokio::select! {
            _ = &mut write_task => read_task.abort(),
            _ = &mut read_task => write_task.abort(),
        };

        debug!(participant_id = client.id(), "socket closed");
        controller.disconnect(&client);
    })
}
