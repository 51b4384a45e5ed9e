use super::SinkObserver;
use crate::{LametricError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Snapshot of a sink's media attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkState {
    pub entity_id: String,
    pub media_url: Option<String>,
    pub media_content_type: Option<String>,
    pub last_changed: DateTime<Utc>,
    /// Correlation token, for engines able to echo it back
    #[serde(default)]
    pub token: Option<String>,
}

impl SinkState {
    pub fn idle(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            media_url: None,
            media_content_type: None,
            last_changed: DateTime::<Utc>::MIN_UTC,
            token: None,
        }
    }

    pub fn playing(
        entity_id: impl Into<String>,
        media_url: impl Into<String>,
        last_changed: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            media_url: Some(media_url.into()),
            media_content_type: None,
            last_changed,
            token: None,
        }
    }
}

/// In-process virtual media player that TTS engines play into.
///
/// Every `play_media` call is pushed to watchers immediately.
pub struct TtsSink {
    entity_id: String,
    state: watch::Sender<SinkState>,
}

impl TtsSink {
    pub fn new(entity_id: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        let (state, _) = watch::channel(SinkState::idle(entity_id.clone()));
        Self { entity_id, state }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Record the media the platform asked this sink to play
    pub fn play_media(&self, media_type: &str, media_id: &str) {
        self.publish(SinkState {
            entity_id: self.entity_id.clone(),
            media_url: Some(media_id.to_string()),
            media_content_type: Some(media_type.to_string()),
            last_changed: Utc::now(),
            token: None,
        });
    }

    /// Replace the sink state wholesale
    pub fn publish(&self, state: SinkState) {
        debug!(target: "capture", sink = %self.entity_id, url = ?state.media_url, "Sink state changed");
        self.state.send_replace(state);
    }

    pub fn current(&self) -> SinkState {
        self.state.borrow().clone()
    }
}

#[async_trait]
impl SinkObserver for TtsSink {
    async fn watch(&self, sink: &str) -> Result<watch::Receiver<SinkState>> {
        if sink != self.entity_id {
            return Err(LametricError::PlatformError(format!(
                "unknown sink {} (this sink is {})",
                sink, self.entity_id
            )));
        }
        Ok(self.state.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn play_media_notifies_watchers() {
        let sink = TtsSink::new("media_player.lametric_tts_sink");
        let mut rx = sink.watch("media_player.lametric_tts_sink").await.unwrap();
        assert!(rx.borrow().media_url.is_none());

        sink.play_media("music", "/api/tts_proxy/abc.mp3");
        rx.changed().await.unwrap();
        let state = rx.borrow().clone();
        assert_eq!(state.media_url.as_deref(), Some("/api/tts_proxy/abc.mp3"));
        assert_eq!(state.media_content_type.as_deref(), Some("music"));
        assert!(state.last_changed > DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn other_sinks_are_rejected() {
        let sink = TtsSink::new("media_player.a");
        assert!(sink.watch("media_player.b").await.is_err());
    }
}
