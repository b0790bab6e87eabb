use reqwest::Url;

use crate::error::{CallError, CallResult};

use super::{Role, RoomId};

/// `{origin}/video-call/{roomId}?type={patient|doctor}&name={name}`, the same
/// link the web client and any SMS/email notification use.
pub fn meeting_link(origin: &str, room_id: &RoomId, role: Role, name: &str) -> CallResult<String> {
    let base = format!("{}/video-call/{}", origin.trim_end_matches('/'), room_id);
    let mut url = Url::parse(&base).map_err(|err| CallError::Malformed(format!("{base}: {err}")))?;
    url.query_pairs_mut()
        .append_pair("type", role.as_str())
        .append_pair("name", name);
    Ok(url.into())
}
