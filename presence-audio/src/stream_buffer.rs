//! Single-producer / single-consumer PCM queue between the network-arrival
//! context and the real-time render callback.
//!
//! The producer half pushes decoded chunks and may flush. The consumer half
//! drains fixed-size frames, never blocks and never allocates: when the
//! queue runs dry the rest of the frame is silence. It may still free memory,
//! when the return channel is full or the queue releases one of its blocks.
//!
//! Flushing is lock-free. Every chunk is stamped with the flush epoch current
//! at push time; the consumer drops anything (including its in-progress
//! chunk) stamped with an older epoch. Spent chunks travel back to the
//! producer over a bounded channel and are released by `StreamProducer::reclaim`,
//! which the owner calls on every push and flush and also on a timer so that
//! played audio does not outlive the utterance.

use crate::pcm::PcmChunk;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Spent chunks held for the producer before the consumer frees in place
pub const DEFAULT_RECYCLE_CAPACITY: usize = 256;

#[derive(Debug)]
struct Stamped {
    epoch: u64,
    chunk: PcmChunk,
}

#[derive(Debug, Default)]
struct Shared {
    epoch: AtomicU64,
    queued_samples: AtomicUsize,
    underruns: AtomicU64,
    frames: AtomicU64,
    spent_samples: AtomicUsize,
}

/// Read-only counters, safe to poll from any context
#[derive(Debug, Clone)]
pub struct StreamStats {
    shared: Arc<Shared>,
}

impl StreamStats {
    /// Samples pushed but not yet rendered or discarded. Flushed chunks are
    /// counted until the consumer discards them on its next drain.
    pub fn queued_samples(&self) -> usize {
        self.shared.queued_samples.load(Ordering::Acquire)
    }

    /// Frames that needed silence fill
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Frames drained so far
    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    /// Samples of played or discarded chunks still waiting to be reclaimed
    pub fn spent_samples(&self) -> usize {
        self.shared.spent_samples.load(Ordering::Acquire)
    }

    /// Number of flushes requested so far
    pub fn flushes(&self) -> u64 {
        self.shared.epoch.load(Ordering::Acquire)
    }
}

/// Create a connected producer/consumer pair
pub fn stream_buffer() -> (StreamProducer, StreamConsumer) {
    stream_buffer_with_recycle(DEFAULT_RECYCLE_CAPACITY)
}

pub fn stream_buffer_with_recycle(recycle_capacity: usize) -> (StreamProducer, StreamConsumer) {
    let (tx, rx) = channel::unbounded();
    let (spent_tx, spent_rx) = channel::bounded(recycle_capacity.max(1));
    let shared = Arc::new(Shared::default());

    let producer = StreamProducer {
        tx,
        spent_rx,
        shared: Arc::clone(&shared),
    };
    let consumer = StreamConsumer {
        rx,
        spent_tx,
        shared,
        current: None,
        offset: 0,
    };
    (producer, consumer)
}

/// Network-side half of the stream buffer
#[derive(Debug)]
pub struct StreamProducer {
    tx: Sender<Stamped>,
    spent_rx: Receiver<PcmChunk>,
    shared: Arc<Shared>,
}

impl StreamProducer {
    /// Append a chunk to the tail of the queue. Never blocks; there is no
    /// capacity bound. Returns the chunk back if the consumer is gone.
    pub fn push(&self, chunk: PcmChunk) -> Result<(), PcmChunk> {
        self.reclaim();

        let len = chunk.len();
        let stamped = Stamped {
            epoch: self.shared.epoch.load(Ordering::Acquire),
            chunk,
        };

        self.shared.queued_samples.fetch_add(len, Ordering::AcqRel);
        self.tx.send(stamped).map_err(|e| {
            self.shared.queued_samples.fetch_sub(len, Ordering::AcqRel);
            e.into_inner().chunk
        })
    }

    /// Discard everything queued so far, including the chunk currently being
    /// rendered. The consumer reads the epoch once per drain, so a drain
    /// already in progress finishes its frame with the old audio; the next
    /// drain starts clean.
    pub fn flush(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.reclaim();
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Release chunks the consumer has finished with. Returns how many were
    /// freed.
    pub fn reclaim(&self) -> usize {
        let mut released = 0;
        for chunk in self.spent_rx.try_iter() {
            self.shared.spent_samples.fetch_sub(chunk.len(), Ordering::AcqRel);
            released += 1;
        }
        released
    }
}

/// Render-side half of the stream buffer
#[derive(Debug)]
pub struct StreamConsumer {
    rx: Receiver<Stamped>,
    spent_tx: Sender<PcmChunk>,
    shared: Arc<Shared>,
    current: Option<Stamped>,
    offset: usize,
}

impl StreamConsumer {
    /// Fill `out` from the queue in arrival order, zero-filling whatever the
    /// queue cannot supply. Returns how many samples of real audio were
    /// written. Never blocks and never allocates.
    pub fn drain_into(&mut self, out: &mut [f32]) -> usize {
        let epoch = self.shared.epoch.load(Ordering::Acquire);

        if matches!(self.current, Some(ref current) if current.epoch < epoch) {
            self.retire_current();
        }

        let mut written = 0;
        while written < out.len() {
            if self.current.is_none() {
                match self.next_live(epoch) {
                    Some(next) => {
                        self.current = Some(next);
                        self.offset = 0;
                    }
                    None => break,
                }
            }

            let exhausted = match self.current {
                Some(ref current) => {
                    let samples = current.chunk.samples();
                    let n = (out.len() - written).min(samples.len() - self.offset);
                    out[written..written + n]
                        .copy_from_slice(&samples[self.offset..self.offset + n]);
                    written += n;
                    self.offset += n;
                    self.offset >= samples.len()
                }
                None => break,
            };

            if exhausted {
                self.retire_current();
            }
        }

        if written < out.len() {
            out[written..].fill(0.0);
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        if written > 0 {
            self.shared.queued_samples.fetch_sub(written, Ordering::AcqRel);
        }
        self.shared.frames.fetch_add(1, Ordering::Relaxed);

        written
    }

    /// Allocating convenience form of [`drain_into`](Self::drain_into) for
    /// use off the render path.
    pub fn drain(&mut self, frame_size: usize) -> Vec<f32> {
        let mut frame = vec![0.0; frame_size];
        self.drain_into(&mut frame);
        frame
    }

    /// Position inside the in-progress chunk
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Stream id of the chunk being rendered, if any
    pub fn current_stream(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.chunk.stream_id())
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Next queued chunk stamped with `epoch` or later; older ones are dropped
    fn next_live(&mut self, epoch: u64) -> Option<Stamped> {
        loop {
            match self.rx.try_recv() {
                Ok(stamped) if stamped.epoch < epoch => {
                    self.shared
                        .queued_samples
                        .fetch_sub(stamped.chunk.len(), Ordering::AcqRel);
                    self.recycle(stamped.chunk);
                }
                Ok(stamped) => return Some(stamped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Drop the in-progress chunk, un-counting whatever was left of it
    fn retire_current(&mut self) {
        if let Some(stamped) = self.current.take() {
            let remaining = stamped.chunk.len().saturating_sub(self.offset);
            if remaining > 0 {
                self.shared.queued_samples.fetch_sub(remaining, Ordering::AcqRel);
            }
            self.recycle(stamped.chunk);
        }
        self.offset = 0;
    }

    fn recycle(&self, chunk: PcmChunk) {
        let len = chunk.len();
        self.shared.spent_samples.fetch_add(len, Ordering::AcqRel);
        // Full or disconnected: the chunk is freed here instead
        if self.spent_tx.try_send(chunk).is_err() {
            self.shared.spent_samples.fetch_sub(len, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: &[f32]) -> PcmChunk {
        PcmChunk::new("s", 0.0, samples.to_vec())
    }

    #[test]
    fn test_drain_half_chunks() {
        let (producer, mut consumer) = stream_buffer();
        producer.push(chunk(&[0.5, 0.5, 0.5, 0.5])).unwrap();

        assert_eq!(consumer.drain(2), vec![0.5, 0.5]);
        assert_eq!(consumer.offset(), 2);
        assert_eq!(consumer.drain(2), vec![0.5, 0.5]);
        assert_eq!(consumer.drain(2), vec![0.0, 0.0]);
    }

    #[test]
    fn test_frame_spans_chunks() {
        let (producer, mut consumer) = stream_buffer();
        producer.push(chunk(&[1.0, 2.0])).unwrap();
        producer.push(chunk(&[])).unwrap();
        producer.push(chunk(&[3.0])).unwrap();
        producer.push(chunk(&[4.0, 5.0])).unwrap();

        assert_eq!(consumer.drain(4), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(consumer.drain(3), vec![5.0, 0.0, 0.0]);
        assert_eq!(producer.stats().queued_samples(), 0);
    }

    #[test]
    fn test_queued_samples_tracks_consumption() {
        let (producer, mut consumer) = stream_buffer();
        producer.push(chunk(&[0.1; 10])).unwrap();
        producer.push(chunk(&[0.2; 5])).unwrap();
        let stats = producer.stats();
        assert_eq!(stats.queued_samples(), 15);

        consumer.drain(12);
        assert_eq!(stats.queued_samples(), 3);
        assert_eq!(stats.underruns(), 0);

        consumer.drain(12);
        assert_eq!(stats.queued_samples(), 0);
        assert_eq!(stats.underruns(), 1);
        assert_eq!(stats.frames(), 2);
    }

    #[test]
    fn test_flush_discards_in_progress_and_queued() {
        let (producer, mut consumer) = stream_buffer();
        producer.push(chunk(&[1.0; 4])).unwrap();
        producer.push(chunk(&[2.0; 4])).unwrap();
        assert_eq!(consumer.drain(2), vec![1.0, 1.0]);

        producer.flush();
        producer.push(chunk(&[9.0, 9.0])).unwrap();

        assert_eq!(consumer.drain(4), vec![9.0, 9.0, 0.0, 0.0]);
        assert_eq!(producer.stats().queued_samples(), 0);
        assert_eq!(producer.stats().flushes(), 1);
    }

    #[test]
    fn test_drain_after_producer_dropped_is_silence() {
        let (producer, mut consumer) = stream_buffer();
        producer.push(chunk(&[0.3])).unwrap();
        drop(producer);

        assert_eq!(consumer.drain(3), vec![0.3, 0.0, 0.0]);
        assert_eq!(consumer.drain(3), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_push_after_consumer_dropped_returns_chunk() {
        let (producer, consumer) = stream_buffer();
        drop(consumer);
        let rejected = producer.push(chunk(&[0.7])).unwrap_err();
        assert_eq!(rejected.samples(), &[0.7]);
        assert_eq!(producer.stats().queued_samples(), 0);
    }

    #[test]
    fn test_spent_chunks_are_returned_to_producer() {
        let (producer, mut consumer) = stream_buffer_with_recycle(4);
        for _ in 0..3 {
            producer.push(chunk(&[0.1])).unwrap();
        }
        consumer.drain(3);
        assert_eq!(producer.stats().spent_samples(), 3);
        assert_eq!(producer.reclaim(), 3);
        assert_eq!(producer.reclaim(), 0);
        assert_eq!(producer.stats().spent_samples(), 0);
    }

    #[test]
    fn test_reclaim_releases_played_audio_without_new_push() {
        let (producer, mut consumer) = stream_buffer();
        for _ in 0..3 {
            producer.push(chunk(&vec![0.25; 100_000])).unwrap();
        }
        while producer.stats().queued_samples() > 0 {
            consumer.drain(4096);
        }
        let stats = producer.stats();
        assert_eq!(stats.spent_samples(), 300_000);

        assert_eq!(producer.reclaim(), 3);
        assert_eq!(stats.spent_samples(), 0);
    }

    #[test]
    fn test_overflowing_return_channel_is_not_counted() {
        let (producer, mut consumer) = stream_buffer_with_recycle(1);
        producer.push(chunk(&[0.1; 2])).unwrap();
        producer.push(chunk(&[0.2; 3])).unwrap();
        consumer.drain(5);

        assert_eq!(producer.stats().spent_samples(), 2);
        assert_eq!(producer.reclaim(), 1);
        assert_eq!(producer.stats().spent_samples(), 0);
    }
}
