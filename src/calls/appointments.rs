use async_trait::async_trait;
use serde::Serialize;
use time::macros::format_description;
use tracing::info;

use crate::error::CallResult;
use crate::rooms::{meeting_link, CallType, Role, Room, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
}

/// What the appointments API stores for a video consultation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRecord {
    pub patient_name: String,
    pub doctor_id: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub video_call_id: RoomId,
    pub meeting_link: String,
    pub status: AppointmentStatus,
}

impl AppointmentRecord {
    /// Dated by when the room was opened. The link is the doctor's, since
    /// the record shows up in the doctor portal.
    pub fn for_room(room: &Room, origin: &str, status: AppointmentStatus) -> CallResult<Self> {
        let doctor_name = room
            .doctor
            .as_ref()
            .map(|doctor| doctor.display_name.as_str())
            .unwrap_or(room.doctor_id.as_str());

        Ok(Self {
            patient_name: room.patient.display_name.clone(),
            doctor_id: room.doctor_id.clone(),
            date: room.created_at.date().to_string(),
            time: room
                .created_at
                .format(format_description!("[hour]:[minute]"))
                .unwrap_or_default(),
            call_type: room.call_type,
            video_call_id: room.room_id.clone(),
            meeting_link: meeting_link(origin, &room.room_id, Role::Doctor, doctor_name)?,
            status,
        })
    }
}

/// Where finished and scheduled calls get written down. Never awaited by a
/// state transition.
#[async_trait]
pub trait AppointmentSink: Send + Sync {
    async fn record_appointment(&self, record: AppointmentRecord) -> anyhow::Result<()>;
}

/// POSTs records to the appointments CRUD endpoint.
pub struct HttpAppointmentSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAppointmentSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AppointmentSink for HttpAppointmentSink {
    async fn record_appointment(&self, record: AppointmentRecord) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&record)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Used when no appointments endpoint is configured.
pub struct LogAppointmentSink;

#[async_trait]
impl AppointmentSink for LogAppointmentSink {
    async fn record_appointment(&self, record: AppointmentRecord) -> anyhow::Result<()> {
        info!(
            room_id = %record.video_call_id,
            doctor_id = %record.doctor_id,
            status = ?record.status,
            "appointment"
        );
        Ok(())
    }
}
