//! Audio subsystem: sample buffers, rate conversion, frame processing and
//! the sound card bridge

pub mod buffer;
pub mod device;
pub mod processor;
pub mod resample;

pub use buffer::{create_shared_buffer, AudioFrame, FrameQueue, RingBuffer, SharedRingBuffer};
pub use device::{list_devices, DeviceInfo, DeviceStream};
pub use processor::{Bypass, FrameProcessor, NoiseGate, SharedProcessor};
pub use resample::{Downsampler, Upsampler};
