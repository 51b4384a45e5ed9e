//! Shared fakes for the integration tests
//!
//! - `RecordingTransport`: answers like a LaMetric device and records every call
//! - `ScriptedEngine`: a TTS engine that plays (or doesn't) into a `TtsSink`
//! - `PlatformClockSink`: a `TtsSink` whose timestamps come from another clock

#![allow(dead_code)]

use async_trait::async_trait;
use lametric_core::dispatcher::{DispatcherConfig, NotificationDispatcher};
use lametric_core::transport::{Method, Transport, TransportResponse};
use lametric_core::tts::{
    CaptureBridge, CaptureConfig, MediaSource, SinkClock, SinkObserver, SinkState, SpeakRequest,
    TtsEngine, TtsSink,
};
use lametric_core::{CapabilityMap, DeviceClient, LametricError, Operation, Result, UrlResolver};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub const DEVICE: &str = "http://lametric:8080";
pub const NOTIFICATIONS: &str = "http://lametric:8080/api/v2/device/notifications";
pub const CURRENT: &str = "http://lametric:8080/api/v2/device/notifications/current";
pub const SINK: &str = "media_player.lametric_tts_sink";
pub const BASE_URL: &str = "http://10.0.0.5:8123";

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub at: Instant,
}

#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<RecordedCall>>,
    routes: Mutex<HashMap<(Method, String), TransportResponse>>,
    unreachable: Mutex<HashSet<String>>,
    // 1-based index of the notification POST that should fail
    fail_post: Mutex<Option<usize>>,
    posts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, url: &str, response: TransportResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, url.to_string()), response);
    }

    pub fn unreachable(&self, url: &str) {
        self.unreachable.lock().unwrap().insert(url.to_string());
    }

    pub fn fail_notification_post(&self, nth: usize) {
        *self.fail_post.lock().unwrap() = Some(nth);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, url: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.url == url)
            .collect()
    }

    /// Bodies of every notification POST, in order
    pub fn notifications(&self) -> Vec<Value> {
        self.calls_to(Method::Post, NOTIFICATIONS)
            .into_iter()
            .filter_map(|c| c.body)
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<TransportResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            url: url.to_string(),
            body,
            at: Instant::now(),
        });

        if self.unreachable.lock().unwrap().contains(url) {
            return Err(LametricError::TransportError(format!(
                "connection refused: {}",
                url
            )));
        }

        if method == Method::Post && url == NOTIFICATIONS {
            let n = self.posts.fetch_add(1, Ordering::SeqCst) + 1;
            if *self.fail_post.lock().unwrap() == Some(n) {
                return Ok(TransportResponse::new(500, "display busy"));
            }
            return Ok(TransportResponse::new(
                201,
                format!(r#"{{"success":{{"id":"{}"}}}}"#, n),
            ));
        }

        let route = self
            .routes
            .lock()
            .unwrap()
            .get(&(method, url.to_string()))
            .cloned();
        Ok(route.unwrap_or_else(|| TransportResponse::new(200, "")))
    }
}

/// Capability map of a device that supports everything
pub fn full_map() -> CapabilityMap {
    map_with(&Operation::ALL)
}

pub fn map_with(ops: &[Operation]) -> CapabilityMap {
    let endpoints = ops.iter().map(|op| {
        let url = match op {
            Operation::Device => format!("{}/api/v2/device", DEVICE),
            Operation::Notifications => NOTIFICATIONS.to_string(),
            Operation::CurrentNotification => CURRENT.to_string(),
            Operation::ConcreteNotification => format!("{}{{/:id}}", NOTIFICATIONS),
            Operation::AppsList => format!("{}/api/v2/device/apps", DEVICE),
            Operation::AppsSwitchNext => format!("{}/api/v2/device/apps/next", DEVICE),
            Operation::AppsSwitchPrev => format!("{}/api/v2/device/apps/prev", DEVICE),
            other => format!("{}/api/v2/device/{}", DEVICE, other.name()),
        };
        (*op, url)
    });
    CapabilityMap::from_endpoints(DEVICE, endpoints)
}

pub enum Script {
    /// Accept the request, never touch the sink
    Silent,
    /// Play `url` into the sink, stamped `offset_ms` after the session armed
    Publish { url: String, offset_ms: i64 },
    Fail,
}

pub struct ScriptedEngine {
    sink: Arc<TtsSink>,
    script: Mutex<Script>,
    requests: Mutex<Vec<SpeakRequest>>,
}

impl ScriptedEngine {
    pub fn new(sink: Arc<TtsSink>, script: Script) -> Arc<Self> {
        Arc::new(Self {
            sink,
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn requests(&self) -> Vec<SpeakRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TtsEngine for ScriptedEngine {
    async fn speak(&self, request: &SpeakRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        let state = match &*self.script.lock().unwrap() {
            Script::Silent => None,
            Script::Publish { url, offset_ms } => Some(SinkState {
                entity_id: request.sink.clone(),
                media_url: Some(url.clone()),
                media_content_type: Some("music".to_string()),
                last_changed: request.armed_at + chrono::Duration::milliseconds(*offset_ms),
                token: None,
            }),
            Script::Fail => {
                return Err(LametricError::PlatformError(
                    "tts.speak failed: engine offline".to_string(),
                ))
            }
        };
        if let Some(state) = state {
            self.sink.publish(state);
        }
        Ok(())
    }
}

/// Same sink, but its `last_changed` values are stamped by the platform
pub struct PlatformClockSink(pub Arc<TtsSink>);

#[async_trait]
impl SinkObserver for PlatformClockSink {
    async fn watch(&self, sink: &str) -> Result<watch::Receiver<SinkState>> {
        self.0.watch(sink).await
    }

    fn clock(&self) -> SinkClock {
        SinkClock::Remote
    }
}

pub struct Harness {
    pub transport: Arc<RecordingTransport>,
    pub sink: Arc<TtsSink>,
    pub engine: Arc<ScriptedEngine>,
    pub bridge: Arc<CaptureBridge>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

pub fn harness(script: Script, capture_timeout: Duration) -> Harness {
    let transport = RecordingTransport::new();
    let sink = Arc::new(TtsSink::new(SINK));
    let engine = ScriptedEngine::new(Arc::clone(&sink), script);
    let bridge = Arc::new(CaptureBridge::new(
        engine.clone(),
        sink.clone(),
        CaptureConfig {
            timeout: capture_timeout,
        },
    ));
    let device = Arc::new(DeviceClient::with_capabilities(
        transport.clone(),
        full_map(),
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        device,
        Arc::clone(&bridge),
        UrlResolver::new(Some(BASE_URL)),
        DispatcherConfig {
            sink: SINK.to_string(),
            ..Default::default()
        },
    ));
    Harness {
        transport,
        sink,
        engine,
        bridge,
        dispatcher,
    }
}

impl Harness {
    /// A dispatcher on the same device and bridge that resolves platform media ids
    pub fn dispatcher_with_media(&self, media: Arc<dyn MediaSource>) -> NotificationDispatcher {
        let device = Arc::new(DeviceClient::with_capabilities(
            self.transport.clone(),
            full_map(),
        ));
        NotificationDispatcher::new(
            device,
            Arc::clone(&self.bridge),
            UrlResolver::new(Some(BASE_URL)),
            DispatcherConfig {
                sink: SINK.to_string(),
                ..Default::default()
            },
        )
        .with_media_source(media)
    }
}
