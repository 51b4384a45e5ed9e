use std::fs;
use std::path::Path;
use std::time::Duration;

use lametric_core::dispatcher::DispatcherConfig;
use lametric_core::homeassistant::HomeAssistantConfig;
use lametric_core::tts::CaptureConfig;

/// Configuration for the `lametric-notify` tool
#[derive(Clone, Debug)]
pub struct NotifyConfig {
    pub device: DeviceConfig,
    pub hass: HassConfig,
    pub tts: TtsConfig,
    /// Icon used when a call doesn't pick one
    pub icon: String,
    /// Externally reachable platform URL used to absolutize `/local/...` paths
    pub base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub host: String,
    pub api_key: String,
    pub verify_ssl: bool,
}

#[derive(Clone, Debug)]
pub struct HassConfig {
    pub url: String,
    pub token: Option<String>,
    pub verify_ssl: bool,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug)]
pub struct TtsConfig {
    pub entity: String,
    pub sink: String,
    pub timeout_ms: u64,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: env_string("LAMETRIC_HOST").unwrap_or_default(),
            api_key: env_string("LAMETRIC_API_KEY").unwrap_or_default(),
            verify_ssl: env_bool("LAMETRIC_VERIFY_SSL").unwrap_or(false),
        }
    }
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            url: env_string("HASS_URL").unwrap_or_else(|| HomeAssistantConfig::default().base_url),
            token: env_string("HASS_TOKEN"),
            verify_ssl: env_bool("HASS_VERIFY_SSL").unwrap_or(true),
            poll_interval_ms: 250,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        let defaults = DispatcherConfig::default();
        Self {
            entity: env_string("LAMETRIC_TTS_ENTITY").unwrap_or(defaults.default_tts_entity),
            sink: env_string("LAMETRIC_TTS_SINK").unwrap_or(defaults.sink),
            timeout_ms: env_string("LAMETRIC_TTS_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(12_000),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            hass: HassConfig::default(),
            tts: TtsConfig::default(),
            icon: env_string("LAMETRIC_ICON")
                .unwrap_or_else(|| DispatcherConfig::default().default_icon),
            base_url: env_string("LAMETRIC_BASE_URL"),
        }
    }
}

impl NotifyConfig {
    /// Load configuration from a TOML file (path via LAMETRIC_CONFIG or ./lametric.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("LAMETRIC_CONFIG").unwrap_or_else(|_| "lametric.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "lametric_notify", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<NotifyToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "lametric_notify", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "lametric_notify", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            default_icon: self.icon.clone(),
            default_tts_entity: self.tts.entity.clone(),
            sink: self.tts.sink.clone(),
            ..Default::default()
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            timeout: Duration::from_millis(self.tts.timeout_ms),
        }
    }

    pub fn hass_config(&self) -> HomeAssistantConfig {
        HomeAssistantConfig {
            base_url: self.hass.url.clone(),
            poll_interval: Duration::from_millis(self.hass.poll_interval_ms.max(50)),
            ..Default::default()
        }
    }
}

// TOML overlay

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct NotifyToml {
    pub icon: Option<String>,
    pub base_url: Option<String>,
    pub device: Option<DeviceToml>,
    pub hass: Option<HassToml>,
    pub tts: Option<TtsToml>,
}

impl NotifyToml {
    fn overlay(self, mut base: NotifyConfig) -> NotifyConfig {
        if let Some(x) = self.icon {
            base.icon = x;
        }
        if let Some(x) = self.base_url.filter(|s| !s.is_empty()) {
            base.base_url = Some(x);
        }
        if let Some(d) = self.device {
            d.apply(&mut base.device);
        }
        if let Some(h) = self.hass {
            h.apply(&mut base.hass);
        }
        if let Some(t) = self.tts {
            t.apply(&mut base.tts);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct DeviceToml {
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub verify_ssl: Option<bool>,
}
impl DeviceToml {
    fn apply(self, d: &mut DeviceConfig) {
        if let Some(x) = self.host {
            d.host = x;
        }
        if let Some(x) = self.api_key {
            d.api_key = x;
        }
        if let Some(x) = self.verify_ssl {
            d.verify_ssl = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct HassToml {
    pub url: Option<String>,
    pub token: Option<String>,
    pub verify_ssl: Option<bool>,
    pub poll_interval_ms: Option<u64>,
}
impl HassToml {
    fn apply(self, h: &mut HassConfig) {
        if let Some(x) = self.url {
            h.url = x;
        }
        if let Some(x) = self.token {
            h.token = Some(x);
        }
        if let Some(x) = self.verify_ssl {
            h.verify_ssl = x;
        }
        if let Some(x) = self.poll_interval_ms {
            h.poll_interval_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TtsToml {
    pub entity: Option<String>,
    pub sink: Option<String>,
    pub timeout_ms: Option<u64>,
}
impl TtsToml {
    fn apply(self, t: &mut TtsConfig) {
        if let Some(x) = self.entity {
            t.entity = x;
        }
        if let Some(x) = self.sink {
            t.sink = x;
        }
        if let Some(x) = self.timeout_ms {
            t.timeout_ms = x;
        }
    }
}
