//! UI-paced presence sampler
//!
//! Once per display tick, combines the session snapshot with the current
//! loudness into a single `PresenceFrame` for the avatar renderer. A server
//! `intensity` override wins for a short hold period after it arrives. Each
//! tick also releases audio the render side has finished playing.

use crate::render_feed::RenderFeed;
use crate::router::EventRouter;
use presence_audio::{IntensityExtractor, StreamStats};
use presence_core::{Emotion, IntensityConfig, SessionState};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensitySource {
    #[default]
    Extracted,
    Override,
}

/// What the avatar should look like right now
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PresenceFrame {
    pub state: SessionState,
    pub emotion: Emotion,
    pub intensity: f32,
    pub source: IntensitySource,
}

/// Pick the override while it is within `hold`, the extracted value otherwise
pub fn resolve_intensity(
    extracted: f32,
    last_override: Option<(f32, Instant)>,
    now: Instant,
    hold: Duration,
) -> (f32, IntensitySource) {
    match last_override {
        Some((value, at)) if now.saturating_duration_since(at) < hold => {
            (value, IntensitySource::Override)
        }
        _ => (extracted, IntensitySource::Extracted),
    }
}

pub struct PresenceSampler {
    router: Arc<EventRouter>,
    extractor: Arc<IntensityExtractor>,
    stats: StreamStats,
    feed: RenderFeed,
    tick: Duration,
    hold: Duration,
}

impl PresenceSampler {
    pub fn new(config: &IntensityConfig, router: Arc<EventRouter>, extractor: Arc<IntensityExtractor>) -> Self {
        Self {
            stats: router.buffer_stats(),
            feed: router.feed().clone(),
            router,
            extractor,
            tick: config.tick_interval(),
            hold: Duration::from_millis(config.override_hold_ms),
        }
    }

    /// Build one frame
    pub fn sample(&self, last_override: Option<(f32, Instant)>, now: Instant) -> PresenceFrame {
        let snapshot = self.router.session().snapshot();
        let (intensity, source) =
            resolve_intensity(self.extractor.sample(), last_override, now, self.hold);
        PresenceFrame {
            state: snapshot.state,
            emotion: snapshot.emotion,
            intensity,
            source,
        }
    }

    /// Run on the tokio runtime until `shutdown` flips to true
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (watch::Receiver<PresenceFrame>, JoinHandle<()>) {
        let (frame_tx, frame_rx) = watch::channel(PresenceFrame::default());
        let handle = tokio::spawn(self.run(frame_tx, shutdown));
        (frame_rx, handle)
    }

    async fn run(self, frames: watch::Sender<PresenceFrame>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut overrides = self.feed.subscribe_intensity();
        let mut last_override: Option<(f32, Instant)> = None;
        let mut reported_underruns = self.stats.underruns();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                value = overrides.recv() => match value {
                    Ok(value) => last_override = Some((value, Instant::now())),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                now = ticker.tick() => {
                    let frame = self.sample(last_override, now);
                    frames.send_replace(frame);
                    self.router.reclaim_spent();

                    // Idle silence also counts as an underrun
                    let underruns = self.stats.underruns();
                    if underruns > reported_underruns && frame.state == SessionState::Speaking {
                        debug!(
                            new = underruns - reported_underruns,
                            total = underruns,
                            queued = self.stats.queued_samples(),
                            "Playback underruns"
                        );
                    }
                    reported_underruns = underruns;
                }
            }
        }

        debug!("Presence sampler stopped");
    }
}
