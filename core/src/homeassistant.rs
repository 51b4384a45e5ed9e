//! Home Assistant REST collaborator
//!
//! Implements the TTS "speak" primitive (`POST /api/services/tts/speak`), a
//! polling [`SinkObserver`] over `GET /api/states/<entity_id>` for setups where
//! no push channel from the sink exists, and a [`MediaSource`] that turns
//! `media-source://tts/...` ids into `/api/tts_proxy/...` paths.
//!
//! Home Assistant skips state writes that change nothing, so speaking a cached
//! message twice leaves the sink's `last_updated` alone. Before each speak the
//! sink is primed: its media attributes are cleared and the session token is
//! written in their place, so the following play is always a visible change.

use crate::transport::{Method, Transport};
use crate::tts::{MediaSource, SinkClock, SinkObserver, SinkState, SpeakRequest, TtsEngine};
use crate::{LametricError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

/// Sink attribute carrying the token of the session that primed it
pub const TOKEN_ATTRIBUTE: &str = "lametric_capture_token";

#[derive(Debug, Clone)]
pub struct HomeAssistantConfig {
    pub base_url: String,
    pub poll_interval: Duration,
    /// Reset the sink's media attributes before each speak
    pub prime_sink: bool,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8123".to_string(),
            poll_interval: Duration::from_millis(250),
            prime_sink: true,
        }
    }
}

pub struct HomeAssistant {
    transport: Arc<dyn Transport>,
    config: HomeAssistantConfig,
}

#[derive(Debug, Deserialize)]
struct EntityState {
    entity_id: String,
    #[serde(default)]
    attributes: Map<String, Value>,
    // Attribute-only changes bump last_updated but not last_changed
    last_updated: DateTime<Utc>,
}

impl From<EntityState> for SinkState {
    fn from(s: EntityState) -> Self {
        let attr = |k: &str| s.attributes.get(k).and_then(Value::as_str).map(str::to_string);
        SinkState {
            media_url: attr("media_content_id"),
            media_content_type: attr("media_content_type"),
            token: attr(TOKEN_ATTRIBUTE),
            last_changed: s.last_updated,
            entity_id: s.entity_id,
        }
    }
}

impl HomeAssistant {
    pub fn new(transport: Arc<dyn Transport>, mut config: HomeAssistantConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { transport, config }
    }

    /// Current state of `entity_id`, or `None` if Home Assistant doesn't know it
    pub async fn fetch_state(&self, entity_id: &str) -> Result<Option<SinkState>> {
        fetch_state(self.transport.as_ref(), &self.config.base_url, entity_id).await
    }

    /// Replace the sink's media attributes with `token`. The sink's own next
    /// write then differs from what the state machine holds.
    async fn prime_sink(&self, sink: &str, token: &str) -> Result<()> {
        let url = format!("{}/api/states/{}", self.config.base_url, sink);
        let resp = self.transport.request(Method::Get, &url, None).await?;
        if resp.status == 404 {
            debug!(target: "hass", sink = %sink, "Sink entity not found; not priming");
            return Ok(());
        }
        let current = resp.error_for_status()?.json()?.unwrap_or(Value::Null);
        let state = current
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("idle")
            .to_string();
        let mut attributes = current
            .get("attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        attributes.remove("media_content_id");
        attributes.remove("media_content_type");
        attributes.insert(TOKEN_ATTRIBUTE.to_string(), Value::String(token.to_string()));

        self.transport
            .request(
                Method::Post,
                &url,
                Some(json!({ "state": state, "attributes": attributes })),
            )
            .await?
            .error_for_status()?;
        debug!(target: "hass", sink = %sink, token = %token, "Primed sink");
        Ok(())
    }
}

/// Parts of a `media-source://tts/<engine>?message=...` id
#[derive(Debug, Clone, PartialEq)]
struct TtsMediaId {
    engine: String,
    message: String,
    cache: Option<bool>,
    language: Option<String>,
    options: Map<String, Value>,
}

impl TtsMediaId {
    fn parse(media_id: &str) -> Option<Self> {
        let url = Url::parse(media_id).ok()?;
        if url.scheme() != "media-source" || url.host_str() != Some("tts") {
            return None;
        }
        let engine = url.path().trim_start_matches('/').to_string();
        if engine.is_empty() {
            return None;
        }

        let mut id = TtsMediaId {
            engine,
            message: String::new(),
            cache: None,
            language: None,
            options: Map::new(),
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "message" => id.message = value.into_owned(),
                "cache" => id.cache = Some(value == "true"),
                "language" => id.language = Some(value.into_owned()),
                other => {
                    id.options
                        .insert(other.to_string(), Value::String(value.into_owned()));
                }
            }
        }
        Some(id)
    }
}

async fn fetch_state(
    transport: &dyn Transport,
    base_url: &str,
    entity_id: &str,
) -> Result<Option<SinkState>> {
    let url = format!("{}/api/states/{}", base_url, entity_id);
    let resp = transport.request(Method::Get, &url, None).await?;
    if resp.status == 404 {
        return Ok(None);
    }
    match resp.error_for_status()?.json()? {
        Some(v) => {
            let state: EntityState = serde_json::from_value(v)?;
            Ok(Some(state.into()))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl TtsEngine for HomeAssistant {
    async fn speak(&self, request: &SpeakRequest) -> Result<()> {
        let url = format!("{}/api/services/tts/speak", self.config.base_url);
        let mut body = json!({
            "entity_id": request.engine,
            "media_player_entity_id": request.sink,
            "message": request.message,
            "cache": true,
        });
        if !request.options.is_empty() {
            body["options"] = json!(request.options);
        }

        if self.config.prime_sink {
            if let Err(e) = self.prime_sink(&request.sink, &request.token).await {
                warn!(target: "hass", sink = %request.sink, error = %e, "Could not prime sink; a repeated message may not be seen");
            }
        }

        debug!(target: "hass", engine = %request.engine, sink = %request.sink, token = %request.token, "Calling tts.speak");
        self.transport
            .request(Method::Post, &url, Some(body))
            .await?
            .error_for_status()
            .map_err(|e| LametricError::PlatformError(format!("tts.speak failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl MediaSource for HomeAssistant {
    async fn resolve_media(&self, media_id: &str) -> Result<Option<String>> {
        let Some(id) = TtsMediaId::parse(media_id) else {
            return Ok(None);
        };

        let url = format!("{}/api/tts_get_url", self.config.base_url);
        let mut body = json!({
            "engine_id": id.engine,
            "message": id.message,
        });
        if let Some(cache) = id.cache {
            body["cache"] = json!(cache);
        }
        if let Some(language) = &id.language {
            body["language"] = json!(language);
        }
        if !id.options.is_empty() {
            body["options"] = Value::Object(id.options.clone());
        }

        debug!(target: "hass", engine = %id.engine, "Resolving TTS media id");
        let resp = self
            .transport
            .request(Method::Post, &url, Some(body))
            .await?
            .error_for_status()
            .map_err(|e| LametricError::PlatformError(format!("tts_get_url failed: {}", e)))?
            .json()?
            .unwrap_or(Value::Null);

        // `path` is relative to the platform; `url` uses whatever base it thinks it has
        ["path", "url"]
            .iter()
            .find_map(|k| resp.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| {
                LametricError::PlatformError(format!(
                    "tts_get_url returned no path for {}",
                    media_id
                ))
            })
    }
}

#[async_trait]
impl SinkObserver for HomeAssistant {
    async fn watch(&self, sink: &str) -> Result<watch::Receiver<SinkState>> {
        let initial = self
            .fetch_state(sink)
            .await?
            .unwrap_or_else(|| SinkState::idle(sink));
        let (tx, rx) = watch::channel(initial);

        let transport = Arc::clone(&self.transport);
        let base_url = self.config.base_url.clone();
        let sink = sink.to_string();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            info!(target: "hass", sink = %sink, "Polling sink state");
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        match fetch_state(transport.as_ref(), &base_url, &sink).await {
                            Ok(Some(state)) => {
                                tx.send_if_modified(|current| {
                                    if *current != state {
                                        *current = state;
                                        true
                                    } else {
                                        false
                                    }
                                });
                            }
                            Ok(None) => debug!(target: "hass", sink = %sink, "Sink entity not found"),
                            Err(e) => warn!(target: "hass", sink = %sink, error = %e, "Sink poll failed"),
                        }
                    }
                }
            }
            debug!(target: "hass", sink = %sink, "Stopped polling sink state");
        });

        Ok(rx)
    }

    fn clock(&self) -> SinkClock {
        SinkClock::Remote
    }
}
