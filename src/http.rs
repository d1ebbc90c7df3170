use reqwest::Client;
use std::time::Duration;

/// Client for API calls (token exchange, marketplace search).
pub fn build_client() -> Client {
    let timeout = env_secs("HTTP_TIMEOUT_SECS", 15);
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Client for image existence probes. Probes are HEAD-only presence checks
/// against the card-image CDN, so they get a tighter deadline.
pub fn build_probe_client() -> Client {
    let timeout = env_secs("PROBE_TIMEOUT_SECS", 8);
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
