//! Dispatch of inbound messages to the stream buffer, session state and
//! render feed.
//!
//! A single bad message never stops the router: it is dropped, logged and
//! counted, and the next message is handled normally.

use crate::render_feed::{RenderFeed, SessionUpdate};
use crate::session::{SessionInput, SessionMachine, StateChange};
use presence_audio::{PcmChunk, StreamProducer, StreamStats};
use presence_core::{InboundEvent, UtterancePolicy, OUTPUT_SAMPLE_RATE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a message had no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Oversized,
    MalformedJson,
    UnknownTag,
    MalformedChunk,
    /// Chunk from an utterance other than the current one
    StaleChunk,
    /// Playback side has shut down
    BufferClosed,
}

/// Result of routing one message
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    State(StateChange),
    Emotion,
    IntensityOverride,
    UtteranceBegun { change: StateChange, flushed: bool },
    ChunkQueued { samples: usize },
    UtteranceEnded(StateChange),
    Viseme,
    Dropped(DropReason),
}

#[derive(Debug, Default)]
struct Counters {
    routed: AtomicU64,
    dropped: AtomicU64,
}

/// Routes decoded events. Owns the producer half of the stream buffer.
#[derive(Debug)]
pub struct EventRouter {
    session: Arc<SessionMachine>,
    producer: StreamProducer,
    feed: RenderFeed,
    policy: UtterancePolicy,
    max_message_bytes: usize,
    counters: Counters,
}

impl EventRouter {
    pub fn new(session: Arc<SessionMachine>, producer: StreamProducer, feed: RenderFeed) -> Self {
        Self {
            session,
            producer,
            feed,
            policy: UtterancePolicy::default(),
            max_message_bytes: usize::MAX,
            counters: Counters::default(),
        }
    }

    pub fn with_policy(mut self, policy: UtterancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn policy(&self) -> UtterancePolicy {
        self.policy
    }

    pub fn session(&self) -> &Arc<SessionMachine> {
        &self.session
    }

    pub fn feed(&self) -> &RenderFeed {
        &self.feed
    }

    pub fn buffer_stats(&self) -> StreamStats {
        self.producer.stats()
    }

    /// Free chunks the render side has finished with
    pub fn reclaim_spent(&self) -> usize {
        self.producer.reclaim()
    }

    /// Messages that had an effect
    pub fn routed(&self) -> u64 {
        self.counters.routed.load(Ordering::Relaxed)
    }

    /// Messages that were dropped for any reason
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Parse and route one text message from the channel
    pub fn handle_text(&self, text: &str) -> RouteOutcome {
        if text.len() > self.max_message_bytes {
            warn!(
                bytes = text.len(),
                max = self.max_message_bytes,
                "Dropping oversized message"
            );
            return self.dropped_for(DropReason::Oversized);
        }

        match InboundEvent::from_json(text) {
            Ok(event) => self.route(event),
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                self.dropped_for(DropReason::MalformedJson)
            }
        }
    }

    /// Route one decoded event
    pub fn route(&self, event: InboundEvent) -> RouteOutcome {
        let outcome = match event {
            InboundEvent::State { value } => {
                let change = self.session.apply(SessionInput::Set(value));
                self.notify_state(change);
                RouteOutcome::State(change)
            }
            InboundEvent::Emotion { value } => {
                let previous = self.session.set_emotion(value);
                if previous != value {
                    debug!(from = %previous, to = %value, "Emotion changed");
                    self.feed.publish_session(SessionUpdate::Emotion(value));
                }
                RouteOutcome::Emotion
            }
            InboundEvent::Intensity { value } => {
                self.feed.publish_intensity(value as f32);
                RouteOutcome::IntensityOverride
            }
            InboundEvent::TtsBegin { id, sr } => self.begin_utterance(&id, sr),
            InboundEvent::TtsChunk { id, ts, pcm } => self.queue_chunk(id, ts, &pcm),
            InboundEvent::TtsEnd { id } => {
                let change = self.session.apply(SessionInput::TtsEnd);
                debug!(stream_id = %id, "Utterance ended");
                self.notify_state(change);
                RouteOutcome::UtteranceEnded(change)
            }
            InboundEvent::Viseme { at, id, strength } => {
                self.feed.publish_viseme(presence_core::Viseme { at, id, strength });
                RouteOutcome::Viseme
            }
            InboundEvent::Unknown => {
                debug!("Ignoring message with unknown type");
                RouteOutcome::Dropped(DropReason::UnknownTag)
            }
        };

        match outcome {
            RouteOutcome::Dropped(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.counters.routed.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    fn begin_utterance(&self, id: &str, sample_rate: f64) -> RouteOutcome {
        if sample_rate != f64::from(OUTPUT_SAMPLE_RATE) {
            warn!(
                stream_id = %id,
                sample_rate,
                expected = OUTPUT_SAMPLE_RATE,
                "Utterance sample rate differs from output rate, playing as-is"
            );
        }

        let (previous, change) = self.session.begin_utterance(id);
        let flushed = match (self.policy, previous.as_deref()) {
            (UtterancePolicy::Interrupt, Some(prev)) if prev != id => {
                self.producer.flush();
                true
            }
            _ => false,
        };

        info!(stream_id = %id, flushed, "Utterance started");
        self.notify_state(change);
        RouteOutcome::UtteranceBegun { change, flushed }
    }

    fn queue_chunk(&self, id: String, ts: f64, pcm: &str) -> RouteOutcome {
        if self.policy == UtterancePolicy::Interrupt {
            if let Some(current) = self.session.utterance() {
                if current != id {
                    debug!(stream_id = %id, current = %current, "Dropping chunk from stale utterance");
                    return RouteOutcome::Dropped(DropReason::StaleChunk);
                }
            }
        }

        let chunk = match PcmChunk::from_base64(id, ts, pcm) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Dropping tts_chunk: {}", e);
                return RouteOutcome::Dropped(DropReason::MalformedChunk);
            }
        };

        let samples = chunk.len();
        match self.producer.push(chunk) {
            Ok(()) => RouteOutcome::ChunkQueued { samples },
            Err(rejected) => {
                debug!(stream_id = %rejected.stream_id(), "Playback closed, dropping chunk");
                RouteOutcome::Dropped(DropReason::BufferClosed)
            }
        }
    }

    fn notify_state(&self, change: StateChange) {
        if change.changed() {
            info!(from = %change.from, to = %change.to, "Session state changed");
            self.feed.publish_session(SessionUpdate::State(change));
        }
    }

    fn dropped_for(&self, reason: DropReason) -> RouteOutcome {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        RouteOutcome::Dropped(reason)
    }
}
