use base64::{engine::general_purpose, Engine as _};
use presence_audio::{decode_pcm, intensity_of, stream_buffer, AudioError, IntensityExtractor, PcmChunk};
use presence_core::SessionState;
use presence_session::{transition, EventRouter, RenderFeed, SessionInput, SessionMachine};
use proptest::prelude::*;
use std::sync::Arc;

fn any_state() -> impl Strategy<Value = SessionState> {
    prop::sample::select(SessionState::ALL.to_vec())
}

proptest! {
    #[test]
    fn test_decode_round_trips_bits(words in prop::collection::vec(any::<[u8; 4]>(), 0..256)) {
        let bytes: Vec<u8> = words.iter().flatten().copied().collect();
        let decoded = decode_pcm(&general_purpose::STANDARD.encode(&bytes)).unwrap();

        prop_assert_eq!(decoded.len(), words.len());
        for (sample, word) in decoded.iter().zip(&words) {
            // Bit-for-bit, NaN payloads included
            prop_assert_eq!(sample.to_bits(), u32::from_le_bytes(*word));
        }
    }

    #[test]
    fn test_partial_sample_is_rejected_and_not_queued(
        bytes in prop::collection::vec(any::<u8>(), 0..256).prop_filter("not a multiple of 4", |b| b.len() % 4 != 0)
    ) {
        let payload = general_purpose::STANDARD.encode(&bytes);
        prop_assert!(matches!(decode_pcm(&payload), Err(AudioError::MalformedChunk(_))));

        let (producer, _consumer) = stream_buffer();
        let router = EventRouter::new(Arc::new(SessionMachine::new()), producer, RenderFeed::default());
        let message = serde_json::json!({"type": "tts_chunk", "id": "p", "ts": 0, "pcm": payload});
        router.handle_text(&message.to_string());
        prop_assert_eq!(router.buffer_stats().queued_samples(), 0);
    }

    #[test]
    fn test_drain_preserves_order(
        chunks in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 0..64), 0..32),
        frame in 1usize..96,
    ) {
        let (producer, mut consumer) = stream_buffer();
        for (i, samples) in chunks.iter().enumerate() {
            producer.push(PcmChunk::new("s", i as f64, samples.clone())).unwrap();
        }

        let expected: Vec<f32> = chunks.concat();
        let mut drained = Vec::with_capacity(expected.len());
        while drained.len() < expected.len() {
            let n = frame.min(expected.len() - drained.len());
            drained.extend(consumer.drain(n));
        }
        prop_assert_eq!(drained, expected);
        prop_assert_eq!(producer.stats().queued_samples(), 0);
    }

    #[test]
    fn test_underrun_prefix_then_zero_tail(
        queued in prop::collection::vec(0.001f32..1.0, 0..64),
        extra in 1usize..64,
    ) {
        let (producer, mut consumer) = stream_buffer();
        producer.push(PcmChunk::new("s", 0.0, queued.clone())).unwrap();

        let frame = consumer.drain(queued.len() + extra);
        prop_assert_eq!(&frame[..queued.len()], &queued[..]);
        prop_assert!(frame[queued.len()..].iter().all(|&s| s == 0.0));
        prop_assert_eq!(consumer.stats().underruns(), 1);
    }

    #[test]
    fn test_tts_events_from_any_state(state in any_state()) {
        prop_assert_eq!(transition(state, SessionInput::TtsBegin), SessionState::Speaking);
        prop_assert_eq!(transition(state, SessionInput::TtsEnd), SessionState::Idle);
    }

    #[test]
    fn test_constant_window_intensity(value in -1.0f32..1.0) {
        let extractor = IntensityExtractor::new(2048, 8.0);
        extractor.feed(&vec![value; 2048]);
        let expected = (value.abs() * 8.0).clamp(0.0, 1.0);
        prop_assert!((extractor.sample() - expected).abs() < 1e-4);
    }

    #[test]
    fn test_intensity_is_bounded(samples in prop::collection::vec(any::<f32>(), 0..512), gain in 0.0f32..100.0) {
        let value = intensity_of(&samples, gain);
        prop_assert!((0.0..=1.0).contains(&value));
    }
}

#[test]
fn test_silent_window_is_zero() {
    let extractor = IntensityExtractor::new(2048, 8.0);
    extractor.feed(&[0.0; 4096]);
    assert_eq!(extractor.sample(), 0.0);
}
