//! Fixed factor-3 sample-rate conversion between the 16 kHz link rate and
//! the 48 kHz host rate.
//!
//! Both converters keep a small carry between calls so packet boundaries do
//! not produce discontinuities, and neither allocates.

// ---------------------------------------------------------------------------
// Upsampler
// ---------------------------------------------------------------------------

/// 16 kHz → 48 kHz linear interpolator.
///
/// For every consecutive pair `(a, b)` it emits `a`, `a + (b-a)/3` and
/// `a + 2(b-a)/3`. The last input sample of a call is carried into the next
/// call and interpolated against its first sample, so a 320-sample packet
/// always yields 960 output samples.
#[derive(Debug, Default, Clone)]
pub struct Upsampler {
    carry: Option<f32>,
}

impl Upsampler {
    pub const FACTOR: usize = 3;

    pub fn new() -> Self {
        Self { carry: None }
    }

    /// Interpolate `input` into `output`.
    ///
    /// Writes `3 * input.len()` samples, truncated to `output.len()`, and
    /// returns the number written. On a cold start the first input sample
    /// acts as its own carry.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let Some(&first) = input.first() else {
            return 0;
        };

        let mut prev = self.carry.unwrap_or(first);
        let mut written = 0;

        for &next in input {
            let step = (next - prev) / Self::FACTOR as f32;
            for k in 0..Self::FACTOR {
                if written == output.len() {
                    self.carry = input.last().copied();
                    return written;
                }
                output[written] = prev + step * k as f32;
                written += 1;
            }
            prev = next;
        }

        self.carry = Some(prev);
        written
    }

    /// Set the carry explicitly, e.g. to 0.0 after synthesized silence
    pub fn set_carry(&mut self, value: f32) {
        self.carry = Some(value);
    }

    /// Forget the carry; the next call starts cold
    pub fn reset(&mut self) {
        self.carry = None;
    }
}

// ---------------------------------------------------------------------------
// Downsampler
// ---------------------------------------------------------------------------

/// 48 kHz → 16 kHz box-average decimator with frame accumulation.
///
/// Every 3 input samples are averaged into one output sample; output
/// samples are collected until `FRAME` of them are ready and then handed
/// to the caller. Up to 2 input samples carry over between calls.
#[derive(Debug, Clone)]
pub struct Downsampler<const FRAME: usize> {
    pending: [f32; 3],
    pending_len: usize,
    frame: [f32; FRAME],
    frame_len: usize,
}

impl<const FRAME: usize> Default for Downsampler<FRAME> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const FRAME: usize> Downsampler<FRAME> {
    pub const FACTOR: usize = 3;

    pub fn new() -> Self {
        Self {
            pending: [0.0; 3],
            pending_len: 0,
            frame: [0.0; FRAME],
            frame_len: 0,
        }
    }

    /// Feed host-rate samples; `on_frame` is called once per completed frame.
    ///
    /// Returns the number of frames emitted.
    pub fn push(&mut self, input: &[f32], mut on_frame: impl FnMut(&[f32; FRAME])) -> usize {
        let mut emitted = 0;

        for &sample in input {
            self.pending[self.pending_len] = sample;
            self.pending_len += 1;
            if self.pending_len < Self::FACTOR {
                continue;
            }
            self.pending_len = 0;

            self.frame[self.frame_len] = self.pending.iter().sum::<f32>() / Self::FACTOR as f32;
            self.frame_len += 1;
            if self.frame_len == FRAME {
                self.frame_len = 0;
                on_frame(&self.frame);
                emitted += 1;
            }
        }

        emitted
    }

    /// Input samples waiting for a full group of 3 (0 to 2)
    pub fn carried_samples(&self) -> usize {
        self.pending_len
    }

    /// Output samples accumulated towards the next frame
    pub fn buffered_samples(&self) -> usize {
        self.frame_len
    }

    pub fn reset(&mut self) {
        self.pending_len = 0;
        self.frame_len = 0;
    }
}
