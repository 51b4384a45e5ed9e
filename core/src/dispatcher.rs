//! Notification dispatch
//!
//! Turns service-level requests into device notifications. Every public method is
//! a service boundary: failures are logged once here and handed back as a single
//! `LametricError`.

use crate::device::{DeviceClient, NotificationId};
use crate::notification::{
    AnimationSpec, Frame, IconType, Model, Notification, NotificationFrame, Priority, Sound,
    SoundFallback,
};
use crate::resolver::UrlResolver;
use crate::tts::{CaptureBridge, CaptureRequest, MediaSource};
use crate::{LametricError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Defaults applied when a request leaves a field out
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub default_icon: String,
    pub default_priority: Priority,
    /// TTS engine used when a request doesn't name one
    pub default_tts_entity: String,
    /// Virtual media player TTS engines play into
    pub sink: String,
    /// Device-side sound if the device cannot fetch the URL
    pub sound_fallback: Option<SoundFallback>,
    /// Longest text shown alongside TTS audio
    pub tts_text_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_icon: "i3092".to_string(),
            default_priority: Priority::Info,
            default_tts_entity: "tts.google_ai_tts".to_string(),
            sink: "media_player.lametric_tts_sink".to_string(),
            sound_fallback: Some(SoundFallback::default()),
            tts_text_limit: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayMp3 {
    pub text: String,
    /// Absolute URL or a path served by the platform (`/local/...`)
    #[serde(alias = "mp3_url")]
    pub url: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub cycles: Option<u32>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayTts {
    pub message: String,
    #[serde(default)]
    pub tts_entity_id: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetpointDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointChange {
    pub temperature_c: f64,
    pub direction: SetpointDirection,
    #[serde(default)]
    pub arrow_up_icon: Option<String>,
    #[serde(default)]
    pub arrow_down_icon: Option<String>,
    #[serde(default)]
    pub cycles: Option<u32>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnimationReport {
    pub frames_sent: usize,
    pub cancelled: bool,
    pub ids: Vec<NotificationId>,
}

pub struct NotificationDispatcher {
    device: Arc<DeviceClient>,
    capture: Arc<CaptureBridge>,
    resolver: UrlResolver,
    media: Option<Arc<dyn MediaSource>>,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    pub fn new(
        device: Arc<DeviceClient>,
        capture: Arc<CaptureBridge>,
        resolver: UrlResolver,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            device,
            capture,
            resolver,
            media: None,
            config,
        }
    }

    /// Resolve captured `media-source://` ids through the platform
    pub fn with_media_source(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn device(&self) -> &Arc<DeviceClient> {
        &self.device
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Play an MP3 the device fetches itself
    pub async fn play_mp3(&self, req: PlayMp3) -> Result<NotificationId> {
        let res = async {
            let url = self.resolver.resolve(&req.url)?;
            let frame = NotificationFrame::text(req.text)
                .with_icon(req.icon.unwrap_or_else(|| self.config.default_icon.clone()))
                .with_sound(Sound::mp3(url));
            let notification = frame.into_notification(
                req.priority.unwrap_or(self.config.default_priority),
                req.cycles.unwrap_or(1).max(1),
                self.config.sound_fallback.clone(),
            );
            self.device.send_notification(&notification).await
        }
        .await;
        report("play_mp3", res)
    }

    /// Render `message` through the platform TTS engine and play the result
    pub async fn play_tts(&self, req: PlayTts, cancel: &CancellationToken) -> Result<NotificationId> {
        let res = async {
            let engine = req
                .tts_entity_id
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| self.config.default_tts_entity.clone());
            let mut capture = CaptureRequest::new(&self.config.sink, engine, &req.message);
            if let Some(voice) = req.voice.as_deref().filter(|v| !v.is_empty()) {
                capture = capture.with_option("voice", voice);
            }

            let media = self.capture.capture(capture, cancel).await?;
            let reference = self.platform_media(media.url).await?;
            let url = self.resolver.resolve(&reference)?;
            debug!(target: "dispatcher", url = %url, token = %media.token, "TTS media resolved");

            let text: String = req.message.chars().take(self.config.tts_text_limit).collect();
            let frame = NotificationFrame::text(text)
                .with_icon(req.icon.unwrap_or_else(|| self.config.default_icon.clone()))
                .with_sound(Sound::mp3(url));
            let notification = frame.into_notification(
                req.priority.unwrap_or(self.config.default_priority),
                1,
                self.config.sound_fallback.clone(),
            );
            self.device.send_notification(&notification).await
        }
        .await;
        report("play_tts", res)
    }

    /// Send each frame as its own notification, holding between frames.
    ///
    /// Cancellation stops the sequence and returns what was sent so far. A
    /// failing frame aborts the rest and is reported by its position in the animation.
    pub async fn play_animation(
        &self,
        spec: &AnimationSpec,
        cancel: &CancellationToken,
    ) -> Result<AnimationReport> {
        let res = self.run_animation(spec, cancel).await;
        report("play_animation", res)
    }

    async fn run_animation(
        &self,
        spec: &AnimationSpec,
        cancel: &CancellationToken,
    ) -> Result<AnimationReport> {
        // Resolve every sound before sending anything
        let mut notifications = Vec::with_capacity(spec.frames().len());
        for (index, frame) in spec.frames().iter().enumerate() {
            let mut frame = frame.clone();
            if let Some(sound) = frame.sound.as_mut() {
                sound.url = self.resolver.resolve(&sound.url).map_err(|e| {
                    LametricError::AnimationFrameFailed {
                        index,
                        round: 0,
                        source: Box::new(e),
                    }
                })?;
            }
            if frame.icon.is_none() {
                frame.icon = Some(self.config.default_icon.clone());
            }
            notifications.push(frame.into_notification(
                self.config.default_priority,
                1,
                self.config.sound_fallback.clone(),
            ));
        }

        info!(
            target: "dispatcher",
            frames = spec.frames().len(),
            repeat = spec.repeat(),
            hold_ms = spec.hold().as_millis() as u64,
            duration_ms = spec.total_duration().as_millis() as u64,
            "Starting animation"
        );

        let mut report = AnimationReport::default();
        for round in 0..spec.repeat() {
            for (index, notification) in notifications.iter().enumerate() {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(report);
                }

                let id = self
                    .device
                    .send_notification(notification)
                    .await
                    .map_err(|e| LametricError::AnimationFrameFailed {
                        index,
                        round,
                        source: Box::new(e),
                    })?;
                report.frames_sent += 1;
                report.ids.push(id);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(target: "dispatcher", sent = report.frames_sent, "Animation cancelled");
                        report.cancelled = true;
                        return Ok(report);
                    }
                    _ = tokio::time::sleep(spec.hold()) => {}
                }
            }
        }
        Ok(report)
    }

    /// Platform media ids are looked up; everything else is left to the resolver
    async fn platform_media(&self, reference: String) -> Result<String> {
        if !reference.starts_with("media-source://") {
            return Ok(reference);
        }
        match &self.media {
            Some(media) => match media.resolve_media(&reference).await? {
                Some(path) => {
                    debug!(target: "dispatcher", media_id = %reference, path = %path, "Media id resolved");
                    Ok(path)
                }
                None => Ok(reference),
            },
            None => Ok(reference),
        }
    }

    /// Blink the new setpoint temperature with a direction arrow. The blink runs
    /// on the device as one multi-frame notification.
    pub async fn show_setpoint_change(&self, req: SetpointChange) -> Result<NotificationId> {
        let icon = match req.direction {
            SetpointDirection::Up => req.arrow_up_icon,
            SetpointDirection::Down => req.arrow_down_icon,
        }
        .unwrap_or_else(|| self.config.default_icon.clone());
        let text = format!("{:.1}C", req.temperature_c);
        let frame = |text: &str, ms: u32| Frame {
            text: text.to_string(),
            icon: Some(icon.clone()),
            duration: Some(ms),
        };

        let notification = Notification {
            priority: req.priority.unwrap_or(self.config.default_priority),
            icon_type: IconType::Info,
            lifetime: None,
            model: Model {
                cycles: req.cycles.unwrap_or(2).max(1),
                frames: vec![frame(&text, 800), frame(" ", 250), frame(&text, 800)],
                sound: None,
            },
        };
        let res = self.device.send_notification(&notification).await;
        report("show_setpoint_change", res)
    }

    pub async fn dismiss_current(&self) -> Result<()> {
        let res = self.device.dismiss_current().await;
        report("dismiss_current", res)
    }

    pub async fn dismiss_all(&self) -> Result<()> {
        let res = self.device.dismiss_all().await;
        report("dismiss_all", res)
    }
}

fn report<T>(op: &str, res: Result<T>) -> Result<T> {
    if let Err(e) = &res {
        if e.is_expected() {
            info!(target: "dispatcher", op = %op, reason = %e, "Service call ended early");
        } else {
            warn!(target: "dispatcher", op = %op, error = %e, "Service call failed");
        }
    }
    res
}
