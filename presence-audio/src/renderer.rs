//! Body of the real-time render callback

use crate::intensity::IntensityExtractor;
use crate::stream_buffer::{StreamConsumer, StreamStats};
use std::sync::Arc;

/// Pulls frames from the stream buffer and mirrors them into the intensity
/// window. Owned by whichever output driver provides the clock.
#[derive(Debug)]
pub struct Renderer {
    consumer: StreamConsumer,
    extractor: Arc<IntensityExtractor>,
}

impl Renderer {
    pub fn new(consumer: StreamConsumer, extractor: Arc<IntensityExtractor>) -> Self {
        Self {
            consumer,
            extractor,
        }
    }

    /// Fill one output frame. Never blocks, never allocates. Returns the
    /// number of samples of real audio written before silence fill.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        let written = self.consumer.drain_into(out);
        self.extractor.feed(out);
        written
    }

    pub fn stats(&self) -> StreamStats {
        self.consumer.stats()
    }

    pub fn extractor(&self) -> &Arc<IntensityExtractor> {
        &self.extractor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::PcmChunk;
    use crate::stream_buffer::stream_buffer;

    #[test]
    fn test_render_feeds_extractor() {
        let (producer, consumer) = stream_buffer();
        let extractor = Arc::new(IntensityExtractor::new(4, 8.0));
        let mut renderer = Renderer::new(consumer, Arc::clone(&extractor));

        producer.push(PcmChunk::new("a", 0.0, vec![0.5; 4])).unwrap();
        let mut frame = [0.0f32; 4];
        assert_eq!(renderer.render(&mut frame), 4);
        assert_eq!(frame, [0.5; 4]);
        assert_eq!(extractor.sample(), 1.0);

        // Underrun pushes silence into the window too
        assert_eq!(renderer.render(&mut frame), 0);
        assert_eq!(frame, [0.0; 4]);
        assert_eq!(extractor.sample(), 0.0);
        assert_eq!(renderer.stats().underruns(), 1);
    }
}
