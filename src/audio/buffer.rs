//! Lock-free ring buffers for audio data
//!
//! SPSC rings carrying interleaved stereo (L,R,L,R,...). The producer side
//! never blocks: writes that don't fit are dropped and counted.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe audio ring buffer
pub struct AudioRingBuffer {
    producer: HeapProducer<f32>,
    consumer: HeapConsumer<f32>,
    capacity: usize,
}

impl AudioRingBuffer {
    /// Create a new ring buffer with the given capacity in samples.
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer,
            consumer,
            capacity,
        }
    }

    /// Split into producer and consumer ends.
    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        let dropped_count = Arc::new(AtomicU64::new(0));

        (
            AudioProducer {
                producer: self.producer,
                capacity: self.capacity,
                dropped_count: Arc::clone(&dropped_count),
            },
            AudioConsumer {
                consumer: self.consumer,
                capacity: self.capacity,
                last_frame: (0.0, 0.0),
            },
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Producer end (RT side, non-blocking)
pub struct AudioProducer {
    producer: HeapProducer<f32>,
    capacity: usize,
    dropped_count: Arc<AtomicU64>,
}

impl AudioProducer {
    /// Write interleaved samples. Returns the number actually written;
    /// the shortfall is counted as dropped samples.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        let dropped = samples.len() - written;
        if dropped > 0 {
            self.dropped_count
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        written
    }

    /// Write whole stereo frames, interleaving L,R. Never splits a frame:
    /// frames that don't fit are dropped and counted (in frames).
    pub fn push_frames(&mut self, left: &[f32], right: &[f32]) -> usize {
        let frames = left.len().min(right.len());
        let writable = (self.free_len() / 2).min(frames);

        for i in 0..writable {
            let _ = self.producer.push(left[i]);
            let _ = self.producer.push(right[i]);
        }

        let dropped = frames - writable;
        if dropped > 0 {
            self.dropped_count
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        writable
    }

    pub fn free_len(&self) -> usize {
        self.capacity - self.producer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn reset_dropped_count(&self) {
        self.dropped_count.store(0, Ordering::Relaxed);
    }

    /// Shared handle to the dropped counter, for status reporting.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped_count)
    }
}

/// Consumer end
pub struct AudioConsumer {
    consumer: HeapConsumer<f32>,
    capacity: usize,
    // Last frame read, for click-free underrun fades
    last_frame: (f32, f32),
}

impl AudioConsumer {
    /// Read interleaved samples. Returns the number actually read.
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        let count = self.consumer.pop_slice(buffer);
        if count >= 2 {
            self.last_frame = (buffer[count - 2], buffer[count - 1]);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Last frame read, for interpolation during underrun.
    pub fn last_frame(&self) -> (f32, f32) {
        self.last_frame
    }
}
