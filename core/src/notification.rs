//! Notification model: the device wire format plus the frame/animation types
//! the dispatcher works with.

use crate::{LametricError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconType {
    None,
    #[default]
    Info,
    Alert,
}

/// Body of `POST notifications`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub priority: Priority,
    pub icon_type: IconType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u64>,
    pub model: Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub cycles: u32,
    pub frames: Vec<Frame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<SoundPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Device-side display time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SoundPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Built-in sound played when the device cannot fetch `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<SoundFallback>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundFallback {
    pub category: String,
    pub id: String,
}

impl Default for SoundFallback {
    fn default() -> Self {
        Self {
            category: "notifications".to_string(),
            id: "cat".to_string(),
        }
    }
}

/// Remote audio attached to a frame. `url` must already be absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sound {
    pub url: String,
    #[serde(rename = "type", default = "default_sound_kind")]
    pub kind: String,
}

fn default_sound_kind() -> String {
    "mp3".to_string()
}

impl Sound {
    pub fn mp3(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: default_sound_kind(),
        }
    }
}

/// One display instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFrame {
    pub text: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub sound: Option<Sound>,
}

impl NotificationFrame {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            icon: None,
            sound: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_sound(mut self, sound: Sound) -> Self {
        self.sound = Some(sound);
        self
    }

    /// Wrap this frame into a single-frame device notification
    pub fn into_notification(
        self,
        priority: Priority,
        cycles: u32,
        fallback: Option<SoundFallback>,
    ) -> Notification {
        let sound = self.sound.map(|s| SoundPayload {
            url: Some(s.url),
            kind: Some(s.kind),
            fallback,
            ..Default::default()
        });
        Notification {
            priority,
            icon_type: IconType::Info,
            lifetime: None,
            model: Model {
                cycles,
                frames: vec![Frame {
                    text: self.text,
                    icon: self.icon,
                    duration: None,
                }],
                sound,
            },
        }
    }
}

/// Host-driven animation: frames sent one notification at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAnimationSpec", into = "RawAnimationSpec")]
pub struct AnimationSpec {
    frames: Vec<NotificationFrame>,
    hold: Duration,
    repeat: u32,
}

#[derive(Serialize, Deserialize)]
struct RawAnimationSpec {
    frames: Vec<NotificationFrame>,
    hold_ms: u64,
    #[serde(default = "default_repeat")]
    repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

impl TryFrom<RawAnimationSpec> for AnimationSpec {
    type Error = LametricError;

    fn try_from(raw: RawAnimationSpec) -> Result<Self> {
        AnimationSpec::new(raw.frames, Duration::from_millis(raw.hold_ms), raw.repeat)
    }
}

impl From<AnimationSpec> for RawAnimationSpec {
    fn from(spec: AnimationSpec) -> Self {
        Self {
            hold_ms: spec.hold.as_millis() as u64,
            frames: spec.frames,
            repeat: spec.repeat,
        }
    }
}

impl AnimationSpec {
    pub fn new(frames: Vec<NotificationFrame>, hold: Duration, repeat: u32) -> Result<Self> {
        if frames.is_empty() {
            return Err(LametricError::InvalidRequest(
                "animation needs at least one frame".to_string(),
            ));
        }
        if repeat == 0 {
            return Err(LametricError::InvalidRequest(
                "animation repeat count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            frames,
            hold,
            repeat,
        })
    }

    pub fn frames(&self) -> &[NotificationFrame] {
        &self.frames
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    /// Number of notifications one full run sends
    pub fn total_frames(&self) -> usize {
        self.frames.len() * self.repeat as usize
    }

    /// Wall-clock budget of one full run
    pub fn total_duration(&self) -> Duration {
        self.hold * self.total_frames() as u32
    }

    /// Frames in dispatch order, repeats unrolled
    pub fn sequence(&self) -> impl Iterator<Item = &NotificationFrame> {
        (0..self.repeat).flat_map(move |_| self.frames.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mp3_frame_serialises_to_device_body() {
        let n = NotificationFrame::text("Ding dong")
            .with_icon("i3092")
            .with_sound(Sound::mp3("http://10.0.0.5:8123/local/doorbell.mp3"))
            .into_notification(Priority::Info, 1, Some(SoundFallback::default()));

        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(
            v,
            json!({
                "priority": "info",
                "icon_type": "info",
                "model": {
                    "cycles": 1,
                    "frames": [{"text": "Ding dong", "icon": "i3092"}],
                    "sound": {
                        "url": "http://10.0.0.5:8123/local/doorbell.mp3",
                        "type": "mp3",
                        "fallback": {"category": "notifications", "id": "cat"}
                    }
                }
            })
        );
    }

    #[test]
    fn frame_without_sound_omits_sound() {
        let n = NotificationFrame::text("hi").into_notification(Priority::Warning, 2, None);
        let v = serde_json::to_value(&n).unwrap();
        assert!(v["model"].get("sound").is_none());
        assert_eq!(v["priority"], "warning");
    }

    #[test]
    fn animation_invariants() {
        let f = vec![NotificationFrame::text("a"), NotificationFrame::text("b")];
        let spec = AnimationSpec::new(f.clone(), Duration::from_millis(500), 3).unwrap();
        assert_eq!(spec.total_frames(), 6);
        assert_eq!(spec.total_duration(), Duration::from_secs(3));
        let texts: Vec<_> = spec.sequence().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "a", "b", "a", "b"]);

        assert!(AnimationSpec::new(vec![], Duration::ZERO, 1).is_err());
        assert!(AnimationSpec::new(f, Duration::ZERO, 0).is_err());
    }

    #[test]
    fn animation_deserialise_validates() {
        let spec: AnimationSpec = serde_json::from_value(json!({
            "frames": [{"text": "x", "sound": {"url": "http://h/a.mp3"}}],
            "hold_ms": 250
        }))
        .unwrap();
        assert_eq!(spec.repeat(), 1);
        assert_eq!(spec.frames()[0].sound.as_ref().unwrap().kind, "mp3");

        let bad = serde_json::from_value::<AnimationSpec>(json!({
            "frames": [], "hold_ms": 250
        }));
        assert!(bad.is_err());
    }
}
