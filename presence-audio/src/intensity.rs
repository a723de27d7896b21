//! Loudness feature over the most recently rendered samples

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rolling window length in samples
pub const DEFAULT_WINDOW: usize = 2048;

/// Scale applied to the window RMS before clamping
pub const DEFAULT_GAIN: f32 = 8.0;

/// Root-mean-square energy. Empty input and non-finite samples count as silence.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f64 = samples
        .iter()
        .map(|&s| if s.is_finite() { s as f64 * s as f64 } else { 0.0 })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// `clamp(rms * gain, 0, 1)`
pub fn intensity_of(samples: &[f32], gain: f32) -> f32 {
    let scaled = rms(samples) * gain;
    if scaled.is_finite() {
        scaled.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug)]
struct Window {
    samples: Vec<f32>,
    // next slot to overwrite
    pos: usize,
}

impl Window {
    fn write(&mut self, input: &[f32]) {
        let len = self.samples.len();
        // Only the newest `len` samples can survive
        let input = &input[input.len().saturating_sub(len)..];

        let first = input.len().min(len - self.pos);
        self.samples[self.pos..self.pos + first].copy_from_slice(&input[..first]);
        let rest = input.len() - first;
        self.samples[..rest].copy_from_slice(&input[first..]);
        self.pos = (self.pos + input.len()) % len;
    }
}

/// Fixed-length window of rendered audio, written by the render context and
/// sampled by the UI context.
///
/// The render side never waits: if the window is locked by a reader, that
/// frame simply does not contribute to the feature.
#[derive(Debug)]
pub struct IntensityExtractor {
    window: Mutex<Window>,
    gain: f32,
    skipped: AtomicU64,
}

impl IntensityExtractor {
    pub fn new(window_size: usize, gain: f32) -> Self {
        Self {
            window: Mutex::new(Window {
                samples: vec![0.0; window_size.max(1)],
                pos: 0,
            }),
            gain,
            skipped: AtomicU64::new(0),
        }
    }

    /// Append rendered samples to the window. Returns false if the frame was
    /// skipped because a reader held the window.
    pub fn feed(&self, samples: &[f32]) -> bool {
        match self.window.try_lock() {
            Some(mut window) => {
                window.write(samples);
                true
            }
            None => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Current intensity in [0, 1]
    pub fn sample(&self) -> f32 {
        let window = self.window.lock();
        intensity_of(&window.samples, self.gain)
    }

    /// Zero the window
    pub fn reset(&self) {
        let mut window = self.window.lock();
        window.samples.fill(0.0);
        window.pos = 0;
    }

    pub fn window_size(&self) -> usize {
        self.window.lock().samples.len()
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Frames dropped from the feature because the window was busy
    pub fn skipped_frames(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl Default for IntensityExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_GAIN)
    }
}
