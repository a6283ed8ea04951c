//! Sound card bridge
//!
//! Moves 48 kHz mono audio between the playout/capture rings and a cpal
//! device. Each stream lives on its own thread because cpal streams are
//! not `Send`; the handle keeps a running flag and an error channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedRingBuffer;
use crate::constants::HOST_SAMPLE_RATE;
use crate::error::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ring to speaker
    Playout,
    /// Microphone to ring
    Capture,
}

/// Device listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List input and output devices of the default host
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices: Vec<DeviceInfo> = Vec::new();

    if let Ok(inputs) = host.input_devices() {
        for name in inputs.filter_map(|d| d.name().ok()) {
            let is_default = default_input.as_ref() == Some(&name);
            devices.push(DeviceInfo {
                name,
                is_input: true,
                is_output: false,
                is_default,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for name in outputs.filter_map(|d| d.name().ok()) {
            let is_default = default_output.as_ref() == Some(&name);
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
            } else {
                devices.push(DeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                });
            }
        }
    }

    devices
}

fn find_device(name: Option<&str>, direction: Direction) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(wanted) = name else {
        let device = match direction {
            Direction::Playout => host.default_output_device(),
            Direction::Capture => host.default_input_device(),
        };
        return device
            .ok_or_else(|| AudioError::DeviceNotFound(format!("no default {:?} device", direction)));
    };

    let devices = match direction {
        Direction::Playout => host.output_devices(),
        Direction::Capture => host.input_devices(),
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == wanted).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(wanted.to_string()))
}

/// Copy each mono sample to every channel of an interleaved buffer
pub fn fan_out(mono: &[f32], interleaved: &mut [f32], channels: usize) {
    for (frame, sample) in interleaved.chunks_exact_mut(channels).zip(mono) {
        frame.fill(*sample);
    }
}

/// Average interleaved channels down to mono, appending to `mono`
pub fn downmix(interleaved: &[f32], channels: usize, mono: &mut Vec<f32>) {
    let scale = 1.0 / channels as f32;
    mono.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Running sound card stream
pub struct DeviceStream {
    direction: Direction,
    device_name: String,
    channels: u16,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl DeviceStream {
    /// Play the playout ring on the named output, or the default one
    pub fn start_playout(name: Option<&str>, ring: SharedRingBuffer) -> Result<Self, AudioError> {
        Self::start(name, Direction::Playout, ring)
    }

    /// Record the named input, or the default one, into the capture ring
    pub fn start_capture(name: Option<&str>, ring: SharedRingBuffer) -> Result<Self, AudioError> {
        Self::start(name, Direction::Capture, ring)
    }

    fn start(
        name: Option<&str>,
        direction: Direction,
        ring: SharedRingBuffer,
    ) -> Result<Self, AudioError> {
        let device = find_device(name, direction)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let default_config = match direction {
            Direction::Playout => device.default_output_config(),
            Direction::Capture => device.default_input_config(),
        }
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(HOST_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };
        let channels = config.channels;

        let running = Arc::new(AtomicBool::new(true));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let thread_name = match direction {
            Direction::Playout => "audio-playout",
            Direction::Capture => "audio-capture",
        };

        let handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let on_error = move |err: cpal::StreamError| {
                    let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                };

                let stream = match direction {
                    Direction::Playout => {
                        let mut mono = Vec::new();
                        device.build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let ch = channels as usize;
                                mono.resize(data.len() / ch, 0.0);
                                let n = ring.read(&mut mono);
                                mono[n..].fill(0.0);
                                fan_out(&mono, data, ch);
                            },
                            on_error,
                            None,
                        )
                    }
                    Direction::Capture => {
                        let mut mono = Vec::new();
                        device.build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                mono.clear();
                                downmix(data, channels as usize, &mut mono);
                                ring.write(&mono);
                            },
                            on_error,
                            None,
                        )
                    }
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamError("stream thread exited".to_string()));
            }
        }

        tracing::info!(
            "{:?} stream on '{}' at {} Hz, {} channel(s)",
            direction,
            device_name,
            HOST_SAMPLE_RATE,
            channels
        );

        Ok(Self {
            direction,
            device_name,
            channels,
            running,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("{:?} stream on '{}' stopped", self.direction, self.device_name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Next stream error reported by the device, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.stop();
    }
}
