// LaMetric Bridge Core Library
// TTS capture and notification dispatch for LaMetric Device API v2

pub mod capability;
pub mod device;
pub mod dispatcher;
pub mod homeassistant;
pub mod notification;
pub mod resolver;
pub mod services;
pub mod transport;
pub mod tts;

// Export core types
pub use capability::{CapabilityMap, Operation};
pub use device::{AppInfo, DeviceClient, DeviceInfo, NotificationId, SwitchDirection};
pub use dispatcher::{
    AnimationReport, DispatcherConfig, NotificationDispatcher, PlayMp3, PlayTts, SetpointChange,
    SetpointDirection,
};
pub use notification::{AnimationSpec, NotificationFrame, Priority, Sound};
pub use resolver::UrlResolver;
pub use services::{ServiceCall, ServiceResponse, Services};
pub use transport::{HttpTransport, Method, Transport, TransportResponse};
pub use tts::{
    CaptureBridge, CaptureRequest, CaptureState, CapturedMedia, MediaSource, SinkClock, SinkState,
    TtsSink,
};

use std::time::Duration;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LametricError {
    #[error("Device discovery failed: {0}")]
    DiscoveryError(String),

    #[error("Device firmware does not support '{0}'")]
    UnsupportedCapability(Operation),

    #[error("Device returned HTTP {status}: {body}")]
    DeviceError { status: u16, body: String },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Cannot turn '{reference}' into a URL the device can fetch: {reason}")]
    UnresolvableUrl { reference: String, reason: String },

    #[error(
        "Timed out after {0:?} waiting for TTS media URL capture. \
         If your TTS engine does not hand an HTTP URL to the sink, TTS playback won't work"
    )]
    CaptureTimeout(Duration),

    #[error("TTS capture on {sink} was superseded by a newer request")]
    Superseded { sink: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Animation frame {index} (round {round}) failed: {source}")]
    AnimationFrameFailed {
        index: usize,
        round: u32,
        #[source]
        source: Box<LametricError>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Platform error: {0}")]
    PlatformError(String),

    #[error("Malformed device response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LametricError {
    /// Outcomes that happen during normal concurrent use and should not alarm the operator.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Superseded { .. } | Self::Cancelled)
    }
}

impl From<reqwest::Error> for LametricError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::DeviceError {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => Self::TransportError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LametricError>;
