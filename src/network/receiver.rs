//! Media receive path
//!
//! [`MediaReceiver`] turns datagrams into 48 kHz playout audio: it filters
//! foreign sources, drops malformed or undersized packets, synthesizes
//! silence for sequence gaps, upsamples, runs the frame processor and
//! writes into the playout ring. [`run_receive_loop`] feeds it from the
//! socket.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::SharedRingBuffer;
use crate::audio::processor::SharedProcessor;
use crate::audio::resample::Upsampler;
use crate::codec::pcm;
use crate::constants::{HOST_FRAME_SAMPLES, LINK_FRAME_SAMPLES, MAX_PACKET_SIZE, PACKET_PAYLOAD_BYTES};
use crate::network::udp::UdpSocket;
use crate::protocol::{AudioDatagram, DatagramError, SequenceStatus, SequenceTracker};

/// What happened to one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Audio was delivered after `concealed` silent frames
    Delivered { concealed: usize },
    /// Source address is not the expected peer
    ForeignSource,
    Malformed(DatagramError),
    /// Payload shorter than one packet of PCM
    Undersized(usize),
}

/// Receive counters, shared with the transport for reporting
#[derive(Debug, Default)]
pub struct ReceiverCounters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    foreign_packets: AtomicU64,
    invalid_packets: AtomicU64,
    undersized_packets: AtomicU64,
    concealed_frames: AtomicU64,
    late_packets: AtomicU64,
}

impl ReceiverCounters {
    pub fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            foreign_packets: self.foreign_packets.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            undersized_packets: self.undersized_packets.load(Ordering::Relaxed),
            concealed_frames: self.concealed_frames.load(Ordering::Relaxed),
            late_packets: self.late_packets.load(Ordering::Relaxed),
        }
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub foreign_packets: u64,
    pub invalid_packets: u64,
    pub undersized_packets: u64,
    pub concealed_frames: u64,
    pub late_packets: u64,
}

/// Datagram-to-playout pipeline for one inbound stream
pub struct MediaReceiver {
    peer: IpAddr,
    tracker: SequenceTracker,
    upsampler: Upsampler,
    max_concealed: usize,
    playout: SharedRingBuffer,
    processor: SharedProcessor,
    counters: Arc<ReceiverCounters>,
    link_frame: [f32; LINK_FRAME_SAMPLES],
    host_frame: [f32; HOST_FRAME_SAMPLES],
}

impl MediaReceiver {
    pub fn new(
        peer: IpAddr,
        max_concealed: usize,
        playout: SharedRingBuffer,
        processor: SharedProcessor,
    ) -> Self {
        Self {
            peer,
            tracker: SequenceTracker::new(),
            upsampler: Upsampler::new(),
            max_concealed,
            playout,
            processor,
            counters: Arc::new(ReceiverCounters::default()),
            link_frame: [0.0; LINK_FRAME_SAMPLES],
            host_frame: [0.0; HOST_FRAME_SAMPLES],
        }
    }

    /// Start from a known last sequence number
    pub fn with_tracker(mut self, tracker: SequenceTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn counters(&self) -> Arc<ReceiverCounters> {
        self.counters.clone()
    }

    pub fn last_sequence(&self) -> Option<u16> {
        self.tracker.last()
    }

    /// Process one datagram from `src`
    pub fn handle_datagram(&mut self, data: &[u8], src: SocketAddr) -> ReceiveOutcome {
        if src.ip() != self.peer {
            self.counters.foreign_packets.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Dropping datagram from foreign source {}", src);
            return ReceiveOutcome::ForeignSource;
        }

        let datagram = match AudioDatagram::parse(data) {
            Ok(datagram) => datagram,
            Err(e) => {
                self.counters.invalid_packets.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Dropping malformed datagram: {}", e);
                return ReceiveOutcome::Malformed(e);
            }
        };

        if datagram.payload.len() < PACKET_PAYLOAD_BYTES {
            self.counters.undersized_packets.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                "Dropping undersized datagram seq={} ({} bytes)",
                datagram.sequence_number,
                datagram.payload.len()
            );
            return ReceiveOutcome::Undersized(datagram.payload.len());
        }

        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let status = self.tracker.advance(datagram.sequence_number);
        if status == SequenceStatus::Late {
            self.counters.late_packets.fetch_add(1, Ordering::Relaxed);
        }

        let concealed = status.frames_to_conceal(self.max_concealed);
        if concealed > 0 {
            tracing::debug!(
                "Sequence gap before {}: {:?}, concealing {} frames",
                datagram.sequence_number,
                status,
                concealed
            );
            self.host_frame.fill(0.0);
            for _ in 0..concealed {
                self.deliver_host_frame();
            }
            self.upsampler.set_carry(0.0);
            self.counters
                .concealed_frames
                .fetch_add(concealed as u64, Ordering::Relaxed);
        }

        pcm::decode_into(&datagram.payload[..PACKET_PAYLOAD_BYTES], &mut self.link_frame);
        let produced = self.upsampler.process(&self.link_frame, &mut self.host_frame);
        self.processor.apply(&mut self.host_frame[..produced]);
        self.deliver_host_frame();

        ReceiveOutcome::Delivered { concealed }
    }

    fn deliver_host_frame(&mut self) {
        let written = self.playout.write(&self.host_frame);
        if written < self.host_frame.len() {
            tracing::trace!(
                "Playout ring full, dropped {} samples",
                self.host_frame.len() - written
            );
        }
    }

    /// Forget stream state, e.g. on restart
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.upsampler.reset();
    }
}

/// Drain the socket on every readiness notification until it would block.
///
/// Runs until the task is aborted or the socket fails irrecoverably.
pub async fn run_receive_loop(socket: Arc<UdpSocket>, mut receiver: MediaReceiver) {
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];

    loop {
        if let Err(e) = socket.readable().await {
            tracing::error!("Media socket readiness failed: {}", e);
            return;
        }

        loop {
            match socket.try_recv_from(&mut buffer) {
                Ok((len, src)) => {
                    receiver.handle_datagram(&buffer[..len], src);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    // ICMP unreachable from a previous send surfaces here
                    tracing::debug!("Media receive error: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;
    use crate::protocol::OutboundHeader;
    use bytes::BytesMut;

    const PEER: &str = "192.168.1.100:60001";

    fn packet(seq: u16, value: f32, payload_len: usize) -> Vec<u8> {
        let mut payload = vec![0u8; payload_len];
        let samples = vec![value; payload_len / 2];
        pcm::encode_into(&samples, &mut payload);

        let mut out = BytesMut::new();
        OutboundHeader {
            marker: false,
            payload_type: 96,
            sequence_number: seq,
            ssrc: 7,
        }
        .write(&payload, &mut out);
        out.to_vec()
    }

    fn receiver(ring: SharedRingBuffer) -> MediaReceiver {
        let peer: SocketAddr = PEER.parse().unwrap();
        MediaReceiver::new(peer.ip(), 10, ring, SharedProcessor::default())
    }

    fn drain(ring: &SharedRingBuffer) -> Vec<f32> {
        let mut out = vec![0.0; ring.available_to_read()];
        ring.read(&mut out);
        out
    }

    #[test]
    fn test_gap_concealment_sequence() {
        let ring = create_shared_buffer(48_000);
        let mut rx = receiver(ring.clone()).with_tracker(SequenceTracker::starting_at(4));
        let src = PEER.parse().unwrap();

        assert_eq!(
            rx.handle_datagram(&packet(5, 0.5, 640), src),
            ReceiveOutcome::Delivered { concealed: 0 }
        );
        assert_eq!(
            rx.handle_datagram(&packet(6, 0.5, 640), src),
            ReceiveOutcome::Delivered { concealed: 0 }
        );
        assert_eq!(
            rx.handle_datagram(&packet(9, 0.5, 640), src),
            ReceiveOutcome::Delivered { concealed: 2 }
        );
        assert_eq!(rx.last_sequence(), Some(9));

        let audio = drain(&ring);
        assert_eq!(audio.len(), 5 * 960);
        // frames for 5 and 6 are real audio
        assert!(audio[..1920].iter().all(|s| (s - 0.5).abs() < 1e-3));
        // two synthesized silent frames
        assert!(audio[1920..3840].iter().all(|s| *s == 0.0));
        // frame for 9 ramps up from the silent carry and then holds
        assert!(audio[3840 + 3..].iter().all(|s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_wraparound_no_concealment() {
        let ring = create_shared_buffer(48_000);
        let mut rx = receiver(ring.clone());
        let src = PEER.parse().unwrap();

        rx.handle_datagram(&packet(65535, 0.1, 640), src);
        assert_eq!(
            rx.handle_datagram(&packet(0, 0.1, 640), src),
            ReceiveOutcome::Delivered { concealed: 0 }
        );
        assert_eq!(ring.available_to_read(), 1920);
    }

    #[test]
    fn test_concealment_is_bounded() {
        let ring = create_shared_buffer(48_000 * 2);
        let mut rx = receiver(ring.clone()).with_tracker(SequenceTracker::starting_at(0));
        let src = PEER.parse().unwrap();

        assert_eq!(
            rx.handle_datagram(&packet(500, 0.1, 640), src),
            ReceiveOutcome::Delivered { concealed: 10 }
        );
        assert_eq!(ring.available_to_read(), 11 * 960);
        assert_eq!(rx.counters().snapshot().concealed_frames, 10);
    }

    #[test]
    fn test_drops_foreign_malformed_undersized() {
        let ring = create_shared_buffer(48_000);
        let mut rx = receiver(ring.clone()).with_tracker(SequenceTracker::starting_at(1));
        let src: SocketAddr = PEER.parse().unwrap();

        let foreign: SocketAddr = "10.0.0.9:60001".parse().unwrap();
        assert_eq!(
            rx.handle_datagram(&packet(2, 0.1, 640), foreign),
            ReceiveOutcome::ForeignSource
        );
        assert!(matches!(
            rx.handle_datagram(&[0x80, 0, 0], src),
            ReceiveOutcome::Malformed(DatagramError::TooShort(3))
        ));
        assert_eq!(
            rx.handle_datagram(&packet(2, 0.1, 320), src),
            ReceiveOutcome::Undersized(320)
        );

        // none of the drops advanced the tracker
        assert_eq!(rx.last_sequence(), Some(1));
        assert_eq!(ring.available_to_read(), 0);

        let stats = rx.counters().snapshot();
        assert_eq!(stats.foreign_packets, 1);
        assert_eq!(stats.invalid_packets, 1);
        assert_eq!(stats.undersized_packets, 1);
        assert_eq!(stats.packets_received, 0);
    }

    #[test]
    fn test_late_packet_delivered_without_concealment() {
        let ring = create_shared_buffer(48_000);
        let mut rx = receiver(ring.clone()).with_tracker(SequenceTracker::starting_at(10));
        let src = PEER.parse().unwrap();

        assert_eq!(
            rx.handle_datagram(&packet(8, 0.2, 640), src),
            ReceiveOutcome::Delivered { concealed: 0 }
        );
        assert_eq!(rx.last_sequence(), Some(8));
        assert_eq!(rx.counters().snapshot().late_packets, 1);
    }

    #[test]
    fn test_oversized_payload_uses_one_packet() {
        let ring = create_shared_buffer(48_000);
        let mut rx = receiver(ring.clone());

        rx.handle_datagram(&packet(1, 0.3, 1000), PEER.parse().unwrap());
        assert_eq!(ring.available_to_read(), 960);
    }

    #[tokio::test]
    async fn test_receive_loop_drains_socket() {
        let socket = Arc::new(crate::network::udp::create_socket("127.0.0.1:0".parse().unwrap()).unwrap());
        let addr = socket.local_addr().unwrap();
        let ring = create_shared_buffer(48_000);
        let rx = MediaReceiver::new(
            "127.0.0.1".parse().unwrap(),
            10,
            ring.clone(),
            SharedProcessor::default(),
        );
        let task = tokio::spawn(run_receive_loop(socket, rx));

        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for seq in 0..5u16 {
            peer.send_to(&packet(seq, 0.25, 640), addr).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while ring.available_to_read() < 5 * 960 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(ring.available_to_read(), 5 * 960);

        task.abort();
    }
}
