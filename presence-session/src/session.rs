//! Session state machine
//!
//! The server is the sole authority over what the avatar shows, so every
//! (state, input) pair has a defined successor and nothing is ever rejected.

use parking_lot::RwLock;
use presence_core::{Emotion, SessionState};
use serde::Serialize;

/// Inputs that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// Explicit `state` event
    Set(SessionState),
    /// Speech output started
    TtsBegin,
    /// Speech output finished
    TtsEnd,
}

/// Successor state for any (state, input) pair
pub fn transition(_current: SessionState, input: SessionInput) -> SessionState {
    match input {
        SessionInput::Set(state) => state,
        SessionInput::TtsBegin => SessionState::Speaking,
        SessionInput::TtsEnd => SessionState::Idle,
    }
}

/// Consistent view of the session at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub emotion: Emotion,
    /// Stream id of the most recent `tts_begin`, if any
    pub utterance: Option<String>,
}

/// What a state change did, for logging and render notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
}

impl StateChange {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Agent state plus emotion. Written by the event router, read by the UI
/// sampler; readers always get a whole snapshot.
#[derive(Debug, Default)]
pub struct SessionMachine {
    inner: RwLock<SessionSnapshot>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an input. Always succeeds.
    pub fn apply(&self, input: SessionInput) -> StateChange {
        let mut inner = self.inner.write();
        let from = inner.state;
        inner.state = transition(from, input);
        StateChange { from, to: inner.state }
    }

    pub fn set_emotion(&self, emotion: Emotion) -> Emotion {
        std::mem::replace(&mut self.inner.write().emotion, emotion)
    }

    /// Record the start of an utterance and enter `speaking` in one step.
    /// Returns the previous utterance id and the state change.
    pub fn begin_utterance(&self, id: &str) -> (Option<String>, StateChange) {
        let mut inner = self.inner.write();
        let previous = inner.utterance.replace(id.to_string());
        let from = inner.state;
        inner.state = transition(from, SessionInput::TtsBegin);
        (previous, StateChange { from, to: inner.state })
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn emotion(&self) -> Emotion {
        self.inner.read().emotion
    }

    pub fn utterance(&self) -> Option<String> {
        self.inner.read().utterance.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tts_inputs_from_every_state() {
        for state in SessionState::ALL {
            assert_eq!(transition(state, SessionInput::TtsBegin), SessionState::Speaking);
            assert_eq!(transition(state, SessionInput::TtsEnd), SessionState::Idle);
        }
    }

    #[test]
    fn test_explicit_state_always_wins() {
        for from in SessionState::ALL {
            for to in SessionState::ALL {
                assert_eq!(transition(from, SessionInput::Set(to)), to);
            }
        }
    }

    #[test]
    fn test_emotion_is_independent() {
        let machine = SessionMachine::new();
        machine.apply(SessionInput::Set(SessionState::Thinking));
        assert_eq!(machine.set_emotion(Emotion::Mischief), Emotion::Neutral);
        assert_eq!(machine.state(), SessionState::Thinking);

        machine.apply(SessionInput::TtsEnd);
        assert_eq!(machine.emotion(), Emotion::Mischief);
    }

    #[test]
    fn test_begin_utterance_tracks_id() {
        let machine = SessionMachine::new();
        let (previous, change) = machine.begin_utterance("u1");
        assert_eq!(previous, None);
        assert_eq!(change, StateChange { from: SessionState::Idle, to: SessionState::Speaking });

        let (previous, change) = machine.begin_utterance("u2");
        assert_eq!(previous.as_deref(), Some("u1"));
        assert!(!change.changed());
        assert_eq!(machine.snapshot().utterance.as_deref(), Some("u2"));
    }
}
