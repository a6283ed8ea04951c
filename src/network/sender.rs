//! Media transmit path
//!
//! Microphone audio arrives at 48 kHz in the capture ring in whatever chunk
//! sizes the hardware delivers. On every 20 ms tick the capture ring is
//! drained through the downsampler into the bounded frame queue and exactly
//! one datagram goes out: the oldest queued frame, or silence on underrun.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, FrameQueue, SharedRingBuffer};
use crate::audio::resample::Downsampler;
use crate::codec::pcm;
use crate::constants::{
    HOST_FRAME_SAMPLES, LINK_FRAME_SAMPLES, LINK_SAMPLE_RATE, PACKET_INTERVAL_MS,
    PACKET_PAYLOAD_BYTES,
};
use crate::network::udp::UdpSocket;
use crate::protocol::OutboundHeader;

/// Transmit counters, shared with the transport for reporting
#[derive(Debug, Default)]
pub struct SenderCounters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    silent_packets: AtomicU64,
    send_errors: AtomicU64,
}

impl SenderCounters {
    pub fn snapshot(&self, queue: &FrameQueue) -> SenderStats {
        SenderStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            silent_packets: self.silent_packets.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            dropped_frames: queue.dropped_count() as u64,
            queued_frames: queue.len(),
        }
    }
}

/// Sender statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Packets filled with silence because the queue was empty
    pub silent_packets: u64,
    pub send_errors: u64,
    /// Frames evicted from a full queue
    pub dropped_frames: u64,
    pub queued_frames: usize,
}

/// Capture-to-datagram pipeline for the outbound stream
pub struct MediaSender {
    header: OutboundHeader,
    capture: SharedRingBuffer,
    downsampler: Downsampler<LINK_FRAME_SAMPLES>,
    queue: Arc<FrameQueue>,
    counters: Arc<SenderCounters>,
    scratch: Box<[f32]>,
    payload: [u8; PACKET_PAYLOAD_BYTES],
    packet: BytesMut,
}

impl MediaSender {
    pub fn new(payload_type: u8, ssrc: u32, queue_frames: usize, capture: SharedRingBuffer) -> Self {
        Self {
            header: OutboundHeader {
                marker: false,
                payload_type,
                sequence_number: 0,
                ssrc,
            },
            capture,
            downsampler: Downsampler::new(),
            queue: Arc::new(FrameQueue::new(queue_frames)),
            counters: Arc::new(SenderCounters::default()),
            scratch: vec![0.0; HOST_FRAME_SAMPLES].into_boxed_slice(),
            payload: [0; PACKET_PAYLOAD_BYTES],
            packet: BytesMut::with_capacity(1024),
        }
    }

    pub fn counters(&self) -> Arc<SenderCounters> {
        self.counters.clone()
    }

    pub fn queue(&self) -> Arc<FrameQueue> {
        self.queue.clone()
    }

    /// Sequence number the next datagram will carry
    pub fn next_sequence(&self) -> u16 {
        self.header.sequence_number
    }

    /// Move everything in the capture ring through the downsampler into the queue.
    ///
    /// Returns the number of frames queued.
    pub fn pull_capture(&mut self) -> usize {
        let mut queued = 0;
        loop {
            let n = self.capture.read(&mut self.scratch);
            if n == 0 {
                break;
            }
            let queue = &self.queue;
            queued += self.downsampler.push(&self.scratch[..n], |frame| {
                queue.push(AudioFrame::new(frame.to_vec(), LINK_SAMPLE_RATE));
            });
            if n < self.scratch.len() {
                break;
            }
        }
        queued
    }

    /// Build the datagram for the current tick
    pub fn next_packet(&mut self) -> Bytes {
        match self.queue.pop() {
            Some(frame) => {
                pcm::encode_into(&frame.samples, &mut self.payload);
            }
            None => {
                self.payload.fill(0);
                self.counters.silent_packets.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.header.write(&self.payload, &mut self.packet);
        self.header.sequence_number = self.header.sequence_number.wrapping_add(1);
        self.packet.split().freeze()
    }

    /// Zero-payload datagram that prompts the device to start streaming
    pub fn probe_packet(&mut self) -> Bytes {
        self.header.write(&[], &mut self.packet);
        self.header.sequence_number = self.header.sequence_number.wrapping_add(1);
        self.packet.split().freeze()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Send one datagram every 20 ms until the task is aborted
pub async fn run_transmit_loop(socket: Arc<UdpSocket>, peer: SocketAddr, mut sender: MediaSender) {
    let mut ticker = tokio::time::interval(Duration::from_millis(PACKET_INTERVAL_MS));
    // Missed ticks are sent back-to-back so the device sees the full packet count
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    loop {
        ticker.tick().await;
        sender.pull_capture();
        let packet = sender.next_packet();

        match socket.send_to(&packet, peer).await {
            Ok(sent) => sender.record_sent(sent),
            Err(e) => {
                sender.record_error();
                tracing::debug!("Media send to {} failed: {}", peer, e);
            }
        }
    }
}
