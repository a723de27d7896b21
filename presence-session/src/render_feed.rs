//! Fan-out of events consumed by the rendering layer rather than the audio core

use crate::session::StateChange;
use presence_core::{Emotion, Viseme};
use tokio::sync::broadcast;

/// Session changes worth redrawing for
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionUpdate {
    State(StateChange),
    Emotion(Emotion),
}

/// Broadcast channels for the avatar renderer and UI. Publishing with nobody
/// subscribed is fine; the value is simply dropped.
#[derive(Debug, Clone)]
pub struct RenderFeed {
    intensity_sender: broadcast::Sender<f32>,
    viseme_sender: broadcast::Sender<Viseme>,
    session_sender: broadcast::Sender<SessionUpdate>,
}

impl RenderFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (intensity_sender, _) = broadcast::channel(capacity);
        let (viseme_sender, _) = broadcast::channel(capacity);
        let (session_sender, _) = broadcast::channel(capacity);
        Self {
            intensity_sender,
            viseme_sender,
            session_sender,
        }
    }

    /// Direct intensity override from the server, clamped to [0, 1]
    pub fn publish_intensity(&self, value: f32) {
        let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        let _ = self.intensity_sender.send(value);
    }

    pub fn publish_viseme(&self, viseme: Viseme) {
        let _ = self.viseme_sender.send(viseme);
    }

    pub fn publish_session(&self, update: SessionUpdate) {
        let _ = self.session_sender.send(update);
    }

    pub fn subscribe_intensity(&self) -> broadcast::Receiver<f32> {
        self.intensity_sender.subscribe()
    }

    pub fn subscribe_visemes(&self) -> broadcast::Receiver<Viseme> {
        self.viseme_sender.subscribe()
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionUpdate> {
        self.session_sender.subscribe()
    }
}

impl Default for RenderFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let feed = RenderFeed::default();
        feed.publish_intensity(0.5);
        feed.publish_viseme(Viseme { at: 0.0, id: "AA".to_string(), strength: 1.0 });
    }

    #[test]
    fn test_intensity_is_clamped() {
        let feed = RenderFeed::default();
        let mut rx = feed.subscribe_intensity();
        feed.publish_intensity(3.0);
        feed.publish_intensity(f32::NAN);
        assert_eq!(tokio_test::block_on(rx.recv()).unwrap(), 1.0);
        assert_eq!(tokio_test::block_on(rx.recv()).unwrap(), 0.0);
    }
}
