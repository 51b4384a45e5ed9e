//! TTS → URL capture sessions
//!
//! Per sink: `Idle → Armed → WaitingForUrl → Idle`. A session ends resolved,
//! timed out, superseded or cancelled; whichever way it ends, dropping its
//! lease puts the sink back to `Idle`.
//!
//! A URL is accepted only when the observed state belongs to the session's sink
//! and its timestamp is strictly newer than the session's baseline. An event
//! stamped exactly at the baseline counts as stale. For a locally stamped sink
//! the baseline is the later of the arm time and the sink's timestamp at
//! subscription; for a platform-stamped sink it is the subscription timestamp
//! alone, since the two clocks can't be compared.

use super::{SinkClock, SinkObserver, SinkState, SpeakRequest, TtsEngine};
use crate::{LametricError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Armed,
    WaitingForUrl,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Deadline for speak + URL observation
    pub timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub sink: String,
    pub engine: String,
    pub message: String,
    pub options: HashMap<String, String>,
}

impl CaptureRequest {
    pub fn new(
        sink: impl Into<String>,
        engine: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sink: sink.into(),
            engine: engine.into(),
            message: message.into(),
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Media observed on the sink for one session
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedMedia {
    pub url: String,
    pub content_type: Option<String>,
    pub token: String,
    pub observed_at: DateTime<Utc>,
}

struct Claimant {
    session: u64,
    supersede: CancellationToken,
}

struct SinkSlot {
    lease: Arc<Mutex<()>>,
    // Most recent session to claim the sink, holding or waiting
    claimant: Option<Claimant>,
    state: watch::Sender<CaptureState>,
}

impl SinkSlot {
    fn new() -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            lease: Arc::new(Mutex::new(())),
            claimant: None,
            state,
        }
    }
}

type Slots = Arc<DashMap<String, SinkSlot>>;

/// Scoped hold on a sink. Dropping it releases the claim and, if the lease was
/// acquired, returns the sink to `Idle` before the next session can arm.
struct SinkLease {
    slots: Slots,
    sink: String,
    session: u64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SinkLease {
    fn set_state(&self, state: CaptureState) {
        if let Some(slot) = self.slots.get(&self.sink) {
            slot.state.send_replace(state);
        }
    }
}

impl Drop for SinkLease {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slots.get_mut(&self.sink) {
            if slot
                .claimant
                .as_ref()
                .is_some_and(|c| c.session == self.session)
            {
                slot.claimant = None;
            }
            if self.guard.is_some() {
                slot.state.send_replace(CaptureState::Idle);
            }
        }
        // The mutex guard drops after this, letting a waiting session arm
    }
}

pub struct CaptureBridge {
    engine: Arc<dyn TtsEngine>,
    observer: Arc<dyn SinkObserver>,
    config: CaptureConfig,
    slots: Slots,
    next_session: AtomicU64,
}

impl CaptureBridge {
    pub fn new(
        engine: Arc<dyn TtsEngine>,
        observer: Arc<dyn SinkObserver>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            engine,
            observer,
            config,
            slots: Arc::new(DashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Current capture state of `sink`
    pub fn state(&self, sink: &str) -> CaptureState {
        self.slots
            .get(sink)
            .map(|slot| *slot.state.borrow())
            .unwrap_or(CaptureState::Idle)
    }

    /// Follow the capture state of `sink`
    pub fn watch_state(&self, sink: &str) -> watch::Receiver<CaptureState> {
        self.slots
            .entry(sink.to_string())
            .or_insert_with(SinkSlot::new)
            .state
            .subscribe()
    }

    /// Speak `request.message` onto the sink and wait for the resulting URL.
    ///
    /// Fails with `CaptureTimeout` when no qualifying URL shows up before the
    /// deadline, `Superseded` when a newer capture for the same sink arrives,
    /// and `Cancelled` when `cancel` fires.
    pub async fn capture(
        &self,
        request: CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<CapturedMedia> {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let token = uuid::Uuid::new_v4().to_string();
        let sink = request.sink.clone();
        let supersede = CancellationToken::new();

        // Claim the sink, superseding whoever claimed it before us
        let lock = {
            let mut slot = self
                .slots
                .entry(sink.clone())
                .or_insert_with(SinkSlot::new);
            if let Some(prev) = slot.claimant.replace(Claimant {
                session,
                supersede: supersede.clone(),
            }) {
                info!(target: "capture", sink = %sink, superseded = prev.session, by = session, "Superseding in-flight capture");
                prev.supersede.cancel();
            }
            Arc::clone(&slot.lease)
        };
        let mut lease = SinkLease {
            slots: Arc::clone(&self.slots),
            sink: sink.clone(),
            session,
            guard: None,
        };

        // Wait for the previous session to let go of the sink
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LametricError::Cancelled),
            _ = supersede.cancelled() => return Err(LametricError::Superseded { sink }),
            guard = lock.lock_owned() => guard,
        };
        lease.guard = Some(guard);

        let armed_at = Utc::now();
        let deadline = Instant::now() + self.config.timeout;
        lease.set_state(CaptureState::Armed);
        info!(target: "capture", sink = %sink, session = session, token = %token, engine = %request.engine, "Capture armed");

        let speak = SpeakRequest {
            engine: request.engine,
            sink: sink.clone(),
            message: request.message,
            options: request.options,
            token: token.clone(),
            armed_at,
        };

        let wait = async {
            // Subscribe before speaking so a URL produced mid-speak is not missed
            let mut rx = self.observer.watch(&sink).await?;
            let baseline = freshness_baseline(
                self.observer.clock(),
                armed_at,
                rx.borrow().last_changed,
            );
            self.engine.speak(&speak).await?;
            lease.set_state(CaptureState::WaitingForUrl);

            loop {
                {
                    let state = rx.borrow_and_update();
                    if let Some(media) = qualify(&state, &sink, baseline, &token) {
                        return Ok(media);
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(LametricError::PlatformError(format!(
                        "state stream for {} closed",
                        sink
                    )));
                }
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LametricError::Cancelled),
            _ = supersede.cancelled() => Err(LametricError::Superseded { sink: sink.clone() }),
            _ = tokio::time::sleep_until(deadline) => Err(LametricError::CaptureTimeout(self.config.timeout)),
            res = wait => res,
        };

        match &outcome {
            Ok(media) => {
                info!(target: "capture", sink = %sink, session = session, url = %media.url, "Capture resolved")
            }
            Err(e) if e.is_expected() => {
                info!(target: "capture", sink = %sink, session = session, reason = %e, "Capture ended")
            }
            Err(e) => {
                warn!(target: "capture", sink = %sink, session = session, error = %e, "Capture failed")
            }
        }
        drop(lease);
        outcome
    }
}

/// Timestamp a sink state must be strictly newer than to count for a session
fn freshness_baseline(
    clock: SinkClock,
    armed_at: DateTime<Utc>,
    subscribed: DateTime<Utc>,
) -> DateTime<Utc> {
    match clock {
        SinkClock::Local => armed_at.max(subscribed),
        SinkClock::Remote => subscribed,
    }
}

/// Accept `state` as this session's result, or explain why not
fn qualify(
    state: &SinkState,
    sink: &str,
    baseline: DateTime<Utc>,
    token: &str,
) -> Option<CapturedMedia> {
    if state.entity_id != sink {
        debug!(target: "capture", expected = %sink, got = %state.entity_id, "Ignoring state of another sink");
        return None;
    }
    if state.last_changed <= baseline {
        debug!(target: "capture", sink = %sink, changed = %state.last_changed, baseline = %baseline, "Ignoring stale sink state");
        return None;
    }
    if state.token.as_deref().is_some_and(|t| t != token) {
        debug!(target: "capture", sink = %sink, "Ignoring state correlated with another session");
        return None;
    }
    let url = state.media_url.as_deref().filter(|u| !u.is_empty())?;
    Some(CapturedMedia {
        url: url.to_string(),
        content_type: state.media_content_type.clone(),
        token: token.to_string(),
        observed_at: state.last_changed,
    })
}
