use std::sync::Arc;
use std::time::Duration;

use callrelay::{
    calls::{CallSettings, LogAppointmentSink},
    presence::PresenceRegistry,
    rooms::{EndReason, Participant, Role, RoomId, RoomState, RoomStore},
    signaling::{ConnectionDirectory, Envelope},
    CallController,
};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

fn controller() -> CallController {
    CallController::new(
        Arc::new(RoomStore::new()),
        Arc::new(PresenceRegistry::new()),
        Arc::new(ConnectionDirectory::new()),
        Arc::new(LogAppointmentSink),
        CallSettings {
            ring_timeout: Duration::from_secs(50),
            ..CallSettings::default()
        },
    )
}

/// What the browser would see: every frame as parsed JSON.
fn wire(rx: &mut UnboundedReceiver<Envelope>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(env) = rx.try_recv() {
        frames.push(serde_json::from_str(&env.to_json()).unwrap());
    }
    frames
}

fn events(frames: &[Value]) -> Vec<&str> {
    frames.iter().map(|f| f["event"].as_str().unwrap()).collect()
}

#[tokio::test(start_paused = true)]
async fn consultation_over_the_wire() {
    let controller = controller();
    let (doctor, mut doctor_rx) =
        controller.connect(Participant::new("doc-42", Role::Doctor, "Dr. Nair"), true);
    let (patient, mut patient_rx) =
        controller.connect(Participant::new("pat-7", Role::Patient, "Lakshmi"), true);

    controller.handle_text(
        &patient,
        r#"{"event":"call-request","payload":{"doctorId":"doc-42","type":"instant"}}"#,
    );
    let joined = wire(&mut patient_rx);
    assert_eq!(events(&joined), vec!["room-joined"]);
    let room_id = joined[0]["roomId"].as_str().unwrap().to_owned();
    assert_eq!(joined[0]["payload"]["role"], "patient");

    let ring = wire(&mut doctor_rx);
    assert_eq!(events(&ring), vec!["call-request"]);
    assert_eq!(ring[0]["roomId"], room_id.as_str());
    assert_eq!(ring[0]["payload"]["patient"]["displayName"], "Lakshmi");

    controller.handle_text(&doctor, &format!(r#"{{"event":"call-accept","roomId":"{room_id}"}}"#));
    assert_eq!(events(&wire(&mut patient_rx)), vec!["call-accept", "call-accepted"]);
    assert_eq!(events(&wire(&mut doctor_rx)), vec!["call-accepted"]);

    for (sender, frame) in [
        (&patient, r#""event":"offer","payload":{"sdp":"o"}"#),
        (&doctor, r#""event":"answer","payload":{"sdp":"a"}"#),
        (&doctor, r#""event":"ice-candidate","payload":{"candidate":"1"}"#),
        (&doctor, r#""event":"ice-candidate","payload":{"candidate":"2"}"#),
    ] {
        controller.handle_text(sender, &format!(r#"{{"roomId":"{room_id}",{frame}}}"#));
    }
    assert_eq!(events(&wire(&mut doctor_rx)), vec!["offer"]);
    let from_doctor = wire(&mut patient_rx);
    assert_eq!(events(&from_doctor), vec!["answer", "ice-candidate", "ice-candidate"]);
    assert_eq!(from_doctor[1]["payload"]["candidate"], "1");
    assert_eq!(from_doctor[2]["payload"]["candidate"], "2");

    controller.handle_text(&doctor, &format!(r#"{{"event":"end-call","roomId":"{room_id}"}}"#));
    let ended = wire(&mut patient_rx);
    assert_eq!(events(&ended), vec!["end-call", "call-ended"]);
    assert_eq!(ended[1]["payload"]["reason"], "completed");

    let room = controller.store().get(&RoomId::from(room_id)).unwrap();
    assert_eq!(room.state, RoomState::Ended(EndReason::Completed));
    assert!(room.accepted_at.is_some() && room.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn ring_window_comes_from_settings() {
    let controller = controller();
    let (_doctor, _doctor_rx) =
        controller.connect(Participant::new("doc-1", Role::Doctor, "Dr. Rao"), true);
    let (patient, mut patient_rx) =
        controller.connect(Participant::new("pat-1", Role::Patient, "Gopal"), true);

    controller.handle_text(&patient, r#"{"event":"call-request","payload":{"doctorId":"doc-1"}}"#);
    let room_id = RoomId::from(wire(&mut patient_rx)[0]["roomId"].as_str().unwrap());

    tokio::time::sleep(Duration::from_secs(48)).await;
    assert_eq!(controller.store().get(&room_id).unwrap().state, RoomState::Ringing);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(controller.store().get(&room_id).unwrap().state, RoomState::TimedOut);
    let frames = wire(&mut patient_rx);
    assert_eq!(events(&frames), vec!["call-ended"]);
    assert_eq!(frames[0]["payload"]["reason"], "timeout");
}
