//! Pluggable frame processors for received audio
//!
//! Noise reduction engines live outside this crate; they plug in through
//! [`FrameProcessor`] and are swapped at runtime behind a [`SharedProcessor`]
//! handle without the receive path knowing which one is active.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::constants::PROCESSOR_CHUNK_SAMPLES;

/// An in-place processor over fixed-size mono chunks
pub trait FrameProcessor: Send {
    /// Process one chunk of `PROCESSOR_CHUNK_SAMPLES` samples in place
    fn process(&mut self, frame: &mut [f32]);

    /// Disabled processors are skipped entirely
    fn enabled(&self) -> bool;

    fn name(&self) -> &str;
}

/// Leaves audio untouched
#[derive(Debug, Default)]
pub struct Bypass;

impl FrameProcessor for Bypass {
    fn process(&mut self, _frame: &mut [f32]) {}

    fn enabled(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "bypass"
    }
}

/// Mutes chunks whose peak level stays below a threshold
#[derive(Debug, Clone)]
pub struct NoiseGate {
    threshold: f32,
    enabled: bool,
}

impl NoiseGate {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.abs(),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl FrameProcessor for NoiseGate {
    fn process(&mut self, frame: &mut [f32]) {
        let peak = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak < self.threshold {
            frame.fill(0.0);
        }
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn name(&self) -> &str {
        "noise-gate"
    }
}

/// Shared, swappable processor handle
#[derive(Clone)]
pub struct SharedProcessor {
    inner: Arc<Mutex<Box<dyn FrameProcessor>>>,
}

impl SharedProcessor {
    pub fn new(processor: Box<dyn FrameProcessor>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(processor)),
        }
    }

    /// Replace the active processor
    pub fn replace(&self, processor: Box<dyn FrameProcessor>) {
        let mut inner = self.inner.lock();
        tracing::info!("Frame processor: {} -> {}", inner.name(), processor.name());
        *inner = processor;
    }

    /// Run the active processor over `samples` in `PROCESSOR_CHUNK_SAMPLES` chunks.
    ///
    /// A trailing partial chunk is left untouched.
    pub fn apply(&self, samples: &mut [f32]) {
        let mut processor = self.inner.lock();
        if !processor.enabled() {
            return;
        }
        for chunk in samples.chunks_exact_mut(PROCESSOR_CHUNK_SAMPLES) {
            processor.process(chunk);
        }
    }

    pub fn name(&self) -> String {
        self.inner.lock().name().to_string()
    }
}

impl Default for SharedProcessor {
    fn default() -> Self {
        Self::new(Box::new(Bypass))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl FrameProcessor for Counter {
        fn process(&mut self, frame: &mut [f32]) {
            self.calls.lock().push(frame.len());
        }

        fn enabled(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn test_bypass_leaves_audio() {
        let processor = SharedProcessor::default();
        let mut samples = vec![0.001f32; 960];
        processor.apply(&mut samples);
        assert!(samples.iter().all(|s| *s == 0.001));
    }

    #[test]
    fn test_chunks_of_480() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let processor = SharedProcessor::new(Box::new(Counter {
            calls: calls.clone(),
        }));

        let mut samples = vec![0.0f32; 960];
        processor.apply(&mut samples);
        assert_eq!(*calls.lock(), vec![480, 480]);
    }

    #[test]
    fn test_swap_to_gate() {
        let processor = SharedProcessor::default();
        processor.replace(Box::new(NoiseGate::new(0.01)));
        assert_eq!(processor.name(), "noise-gate");

        let mut quiet = vec![0.005f32; 480];
        processor.apply(&mut quiet);
        assert!(quiet.iter().all(|s| *s == 0.0));

        let mut loud = vec![0.5f32; 480];
        processor.apply(&mut loud);
        assert!(loud.iter().all(|s| *s == 0.5));
    }
}
