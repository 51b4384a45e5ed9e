//! Text-to-Speech (TTS) capture
//!
//! The platform has no "render this text and give me a URL" primitive. Its TTS
//! engines render audio as a side effect of playing it on a media player, so a
//! virtual sink is handed the rendered media and the bridge watches the sink's
//! state for the URL.
//!
//! - [`TtsEngine`]: the platform "speak" primitive (fire and forget)
//! - [`SinkObserver`]: push or poll view of a sink's state
//! - [`MediaSource`]: turns platform media ids into playable paths
//! - [`CaptureBridge`]: one capture session per sink, with timeout,
//!   supersession and cancellation

mod capture;
mod sink;

pub use capture::{CaptureBridge, CaptureConfig, CaptureRequest, CaptureState, CapturedMedia};
pub use sink::{SinkState, TtsSink};

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::watch;

/// Arguments for one "speak" call
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    /// TTS engine entity, e.g. `tts.google_ai_tts`
    pub engine: String,
    /// Sink the engine should play into
    pub sink: String,
    pub message: String,
    /// Engine-specific options such as `voice`
    pub options: HashMap<String, String>,
    /// Correlation token of the capture session
    pub token: String,
    pub armed_at: DateTime<Utc>,
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Ask the engine to render `request.message` onto `request.sink`. No URL is
    /// returned; the result shows up on the sink's state.
    async fn speak(&self, request: &SpeakRequest) -> Result<()>;
}

/// Which clock stamps a sink's `last_changed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkClock {
    /// This process; comparable with a session's arm time
    Local,
    /// The platform; only comparable with other states of the same sink
    Remote,
}

#[async_trait]
pub trait SinkObserver: Send + Sync {
    /// Stream of state changes for `sink`. The receiver's current value is the
    /// state at subscription time.
    async fn watch(&self, sink: &str) -> Result<watch::Receiver<SinkState>>;

    fn clock(&self) -> SinkClock {
        SinkClock::Local
    }
}

/// Platform lookup for media ids such as `media-source://tts/...`
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Path or URL the id plays from, or `None` if this source doesn't handle it
    async fn resolve_media(&self, media_id: &str) -> Result<Option<String>>;
}
