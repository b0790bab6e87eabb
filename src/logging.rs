use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise info for us and request traces from tower-http.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!(err))
}
