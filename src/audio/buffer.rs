//! Sample ring buffer and frame queue
//!
//! [`RingBuffer`] is the hand-off point between the real-time audio
//! hardware callback and the network threads. It is safe for one writer and
//! one reader at a time; the internal lock is only held for the index
//! arithmetic and the copy, never across I/O.
//!
//! [`FrameQueue`] is the bounded outbound queue of link-rate frames waiting
//! for the 20 ms pacing tick.

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One network packet worth of mono samples at the link rate
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

struct RingState {
    data: Box<[f32]>,
    read_pos: usize,
    write_pos: usize,
    available: usize,
}

/// Fixed-capacity circular store of mono f32 samples
pub struct RingBuffer {
    state: Mutex<RingState>,
    capacity: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                data: vec![0.0; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                available: 0,
            }),
            capacity,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Create a ring buffer sized for `seconds` of audio at `sample_rate`
    pub fn with_duration(sample_rate: u32, seconds: u32) -> Self {
        Self::new(sample_rate as usize * seconds as usize)
    }

    /// Copy as many of `samples` as fit into the free space.
    ///
    /// Returns the number of samples written; a short count means the buffer
    /// filled up and the caller decides what to do with the remainder.
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut state = self.state.lock();
        let free = self.capacity - state.available;
        let count = samples.len().min(free);

        let first = count.min(self.capacity - state.write_pos);
        let write_pos = state.write_pos;
        state.data[write_pos..write_pos + first].copy_from_slice(&samples[..first]);
        state.data[..count - first].copy_from_slice(&samples[first..count]);

        if count > 0 {
            state.write_pos = (write_pos + count) % self.capacity;
        }
        state.available += count;
        drop(state);

        if count < samples.len() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    /// Copy up to `out.len()` buffered samples into `out`, oldest first.
    ///
    /// Returns the number of samples read.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let mut state = self.state.lock();
        let count = out.len().min(state.available);

        let first = count.min(self.capacity - state.read_pos);
        let read_pos = state.read_pos;
        out[..first].copy_from_slice(&state.data[read_pos..read_pos + first]);
        out[first..count].copy_from_slice(&state.data[..count - first]);

        if count > 0 {
            state.read_pos = (read_pos + count) % self.capacity;
        }
        state.available -= count;
        drop(state);

        if count < out.len() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    /// Drop all buffered samples
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.read_pos = 0;
        state.write_pos = 0;
        state.available = 0;
    }

    /// Number of samples ready to be read
    pub fn available_to_read(&self) -> usize {
        self.state.lock().available
    }

    /// Get buffer capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of writes that could not be stored in full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Number of reads that returned fewer samples than requested
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.available_to_read() as f32 / self.capacity as f32
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

/// Bounded queue of outbound frames; the oldest frame is evicted on overflow
pub struct FrameQueue {
    queue: ArrayQueue<AudioFrame>,
    dropped: AtomicUsize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Queue a frame, evicting the oldest one when full
    pub fn push(&self, frame: AudioFrame) {
        if self.queue.force_push(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Frames evicted because the queue was full
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
