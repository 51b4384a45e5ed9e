//! Service-call surface consumed by the automation layer
//!
//! Calls arrive as JSON, e.g.
//! `{"service": "play_mp3_url", "device_id": "kitchen", "text": "Ding dong", "mp3_url": "/local/doorbell.mp3"}`,
//! and are routed to the dispatcher of the addressed device.

use crate::device::NotificationId;
use crate::dispatcher::{AnimationReport, NotificationDispatcher, PlayMp3, PlayTts, SetpointChange};
use crate::notification::AnimationSpec;
use crate::{LametricError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceCall {
    PlayMp3Url {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(flatten)]
        request: PlayMp3,
    },
    PlayTts {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(flatten)]
        request: PlayTts,
    },
    PlayAnimation {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(flatten)]
        spec: AnimationSpec,
    },
    ShowSetpointChange {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(flatten)]
        request: SetpointChange,
    },
    DismissCurrent {
        #[serde(default)]
        device_id: Option<String>,
    },
    DismissAll {
        #[serde(default)]
        device_id: Option<String>,
    },
}

impl ServiceCall {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceCall::PlayMp3Url { .. } => "play_mp3_url",
            ServiceCall::PlayTts { .. } => "play_tts",
            ServiceCall::PlayAnimation { .. } => "play_animation",
            ServiceCall::ShowSetpointChange { .. } => "show_setpoint_change",
            ServiceCall::DismissCurrent { .. } => "dismiss_current",
            ServiceCall::DismissAll { .. } => "dismiss_all",
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            ServiceCall::PlayMp3Url { device_id, .. }
            | ServiceCall::PlayTts { device_id, .. }
            | ServiceCall::PlayAnimation { device_id, .. }
            | ServiceCall::ShowSetpointChange { device_id, .. }
            | ServiceCall::DismissCurrent { device_id }
            | ServiceCall::DismissAll { device_id } => device_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ServiceResponse {
    Notification { id: NotificationId },
    Animation(AnimationReport),
    Dismissed,
}

/// Routes service calls to per-device dispatchers
#[derive(Default)]
pub struct Services {
    devices: DashMap<String, Arc<NotificationDispatcher>>,
    shutdown: CancellationToken,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, device_id: impl Into<String>, dispatcher: Arc<NotificationDispatcher>) {
        let device_id = device_id.into();
        info!(target: "services", device_id = %device_id, "Registered device");
        self.devices.insert(device_id, dispatcher);
    }

    pub fn unregister(&self, device_id: &str) -> bool {
        self.devices.remove(device_id).is_some()
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Pick the dispatcher a call addresses. Without a `device_id`, only an
    /// unambiguous single device is accepted.
    pub fn dispatcher_for(&self, device_id: Option<&str>) -> Result<Arc<NotificationDispatcher>> {
        if self.devices.is_empty() {
            return Err(LametricError::InvalidRequest(
                "no LaMetric devices configured".to_string(),
            ));
        }
        match device_id {
            Some(id) => self
                .devices
                .get(id)
                .map(|d| Arc::clone(d.value()))
                .ok_or_else(|| LametricError::InvalidRequest(format!("unknown device_id {}", id))),
            None if self.devices.len() == 1 => self
                .devices
                .iter()
                .next()
                .map(|d| Arc::clone(d.value()))
                .ok_or_else(|| LametricError::InvalidRequest("device disappeared".to_string())),
            None => Err(LametricError::InvalidRequest(
                "multiple LaMetric devices configured; specify device_id".to_string(),
            )),
        }
    }

    /// Run one service call, cancelled on `shutdown`
    pub async fn handle(&self, call: ServiceCall) -> Result<ServiceResponse> {
        let cancel = self.shutdown.child_token();
        self.handle_with_cancel(call, &cancel).await
    }

    /// Run one service call with a caller-supplied cancellation token
    pub async fn handle_with_cancel(
        &self,
        call: ServiceCall,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse> {
        let dispatcher = self.dispatcher_for(call.device_id())?;
        debug!(target: "services", service = call.name(), device_id = ?call.device_id(), "Handling service call");

        match call {
            ServiceCall::PlayMp3Url { request, .. } => dispatcher
                .play_mp3(request)
                .await
                .map(|id| ServiceResponse::Notification { id }),
            ServiceCall::PlayTts { request, .. } => dispatcher
                .play_tts(request, cancel)
                .await
                .map(|id| ServiceResponse::Notification { id }),
            ServiceCall::PlayAnimation { spec, .. } => dispatcher
                .play_animation(&spec, cancel)
                .await
                .map(ServiceResponse::Animation),
            ServiceCall::ShowSetpointChange { request, .. } => dispatcher
                .show_setpoint_change(request)
                .await
                .map(|id| ServiceResponse::Notification { id }),
            ServiceCall::DismissCurrent { .. } => dispatcher
                .dismiss_current()
                .await
                .map(|_| ServiceResponse::Dismissed),
            ServiceCall::DismissAll { .. } => dispatcher
                .dismiss_all()
                .await
                .map(|_| ServiceResponse::Dismissed),
        }
    }

    /// Cancel every in-flight call started through [`Services::handle`]
    pub fn shutdown(&self) {
        info!(target: "services", "Cancelling in-flight service calls");
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_play_mp3_url() {
        let call: ServiceCall = serde_json::from_value(json!({
            "service": "play_mp3_url",
            "text": "Ding dong",
            "mp3_url": "/local/doorbell.mp3",
            "cycles": 2
        }))
        .unwrap();
        assert_eq!(call.name(), "play_mp3_url");
        assert_eq!(call.device_id(), None);
        match call {
            ServiceCall::PlayMp3Url { request, .. } => {
                assert_eq!(request.url, "/local/doorbell.mp3");
                assert_eq!(request.cycles, Some(2));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn parses_animation_and_dismiss() {
        let call: ServiceCall = serde_json::from_value(json!({
            "service": "play_animation",
            "device_id": "kitchen",
            "frames": [{"text": "a"}, {"text": "b"}],
            "hold_ms": 500,
            "repeat": 3
        }))
        .unwrap();
        assert_eq!(call.device_id(), Some("kitchen"));
        match call {
            ServiceCall::PlayAnimation { spec, .. } => assert_eq!(spec.total_frames(), 6),
            other => panic!("unexpected call {other:?}"),
        }

        let call: ServiceCall =
            serde_json::from_value(json!({"service": "dismiss_all"})).unwrap();
        assert_eq!(call, ServiceCall::DismissAll { device_id: None });
    }

    #[test]
    fn rejects_unknown_service_and_bad_animation() {
        assert!(serde_json::from_value::<ServiceCall>(json!({"service": "reboot"})).is_err());
        assert!(serde_json::from_value::<ServiceCall>(json!({
            "service": "play_animation", "frames": [{"text": "a"}], "hold_ms": 10, "repeat": 0
        }))
        .is_err());
    }

    #[test]
    fn routing_without_devices_fails() {
        let services = Services::new();
        assert!(services.dispatcher_for(None).is_err());
    }
}
