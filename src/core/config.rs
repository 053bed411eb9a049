use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::AppCore;

const DEFAULT_API_URL: &str = "http://127.0.0.1:4000";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) api_url: Option<String>,
    pub(super) ws_url: Option<String>,
    pub(super) poll_interval_secs: Option<u64>,
    pub(super) reconnect_attempts: Option<u32>,
    pub(super) reconnect_delay_ms: Option<u64>,
    pub(super) disable_network: Option<bool>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("parley_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    serde_json::from_slice::<AppConfig>(&bytes).unwrap_or_default()
}

impl AppCore {
    /// Gates the real websocket connection only. Used to keep tests
    /// deterministic and offline; the REST seam is swapped separately.
    pub(super) fn network_enabled(&self) -> bool {
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("PARLEY_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(super) fn api_url(&self) -> String {
        self.config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Explicit `ws_url` wins; otherwise derive it from the API base by
    /// switching the scheme and appending `/ws`.
    pub(super) fn ws_url(&self) -> String {
        if let Some(url) = &self.config.ws_url {
            return url.clone();
        }
        let api = self.api_url();
        match url::Url::parse(&api) {
            Ok(mut parsed) => {
                let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };
                let _ = parsed.set_scheme(scheme);
                parsed.set_path("/ws");
                parsed.to_string()
            }
            Err(_) => format!("{}/ws", api.trim_end_matches('/')),
        }
    }

    pub(super) fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.config
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                .max(1),
        )
    }

    pub(super) fn reconnect_attempts(&self) -> u32 {
        self.config
            .reconnect_attempts
            .unwrap_or(DEFAULT_RECONNECT_ATTEMPTS)
            .max(1)
    }

    pub(super) fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(
            self.config
                .reconnect_delay_ms
                .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        )
    }
}
