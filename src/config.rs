use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::calls::CallSettings;

/// A STUN/TURN entry as `RTCPeerConnection` expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub calls: CallSettings,
    /// Appointments CRUD endpoint; records are only logged without it.
    pub appointments_url: Option<String>,
    pub ice_servers: Vec<IceServer>,
}

const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = CallSettings::default();
        let calls = CallSettings {
            ring_timeout: secs(&lookup, "RING_TIMEOUT_SECS", defaults.ring_timeout)?,
            reconnect_grace: secs(&lookup, "RECONNECT_GRACE_SECS", defaults.reconnect_grace)?,
            room_linger: secs(&lookup, "ROOM_LINGER_SECS", defaults.room_linger)?,
            origin: lookup("PUBLIC_ORIGIN").unwrap_or(defaults.origin),
        };

        let turn_username = lookup("TURN_USERNAME");
        let turn_credential = lookup("TURN_CREDENTIAL");
        let ice_servers = lookup("ICE_SERVERS")
            .unwrap_or_else(|| DEFAULT_STUN.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| {
                let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
                IceServer {
                    urls: vec![url.to_owned()],
                    username: turn_username.clone().filter(|_| is_turn),
                    credential: turn_credential.clone().filter(|_| is_turn),
                }
            })
            .collect();

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            calls,
            appointments_url: lookup("APPOINTMENTS_URL").filter(|url| !url.is_empty()),
            ice_servers,
        })
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    match lookup(key) {
        Some(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a whole number of seconds, got {raw:?}"))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}
