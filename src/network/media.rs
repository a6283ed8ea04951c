//! Media transport lifecycle
//!
//! Owns the UDP socket and the receive and pacing tasks. Stopping aborts
//! both tasks and waits for them, so the socket is closed by the time
//! `stop` returns and the port can be rebound immediately.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::audio::buffer::{FrameQueue, SharedRingBuffer};
use crate::audio::processor::SharedProcessor;
use crate::config::MediaConfig;
use crate::error::NetworkError;
use crate::network::receiver::{run_receive_loop, MediaReceiver, ReceiverCounters, ReceiverStats};
use crate::network::sender::{run_transmit_loop, MediaSender, SenderCounters, SenderStats};
use crate::network::udp::{create_socket, UdpSocket};

/// Combined media statistics
#[derive(Debug, Clone, Default)]
pub struct MediaStats {
    pub receiver: ReceiverStats,
    pub sender: SenderStats,
    pub playout_level: f32,
    pub capture_level: f32,
}

struct RunningMedia {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    receive_task: JoinHandle<()>,
    transmit_task: JoinHandle<()>,
    rx_counters: Arc<ReceiverCounters>,
    tx_counters: Arc<SenderCounters>,
    tx_queue: Arc<FrameQueue>,
}

/// Bidirectional real-time audio over UDP
pub struct MediaTransport {
    config: MediaConfig,
    playout: SharedRingBuffer,
    capture: SharedRingBuffer,
    processor: SharedProcessor,
    running: Option<RunningMedia>,
}

impl MediaTransport {
    pub fn new(
        config: MediaConfig,
        playout: SharedRingBuffer,
        capture: SharedRingBuffer,
        processor: SharedProcessor,
    ) -> Self {
        Self {
            config,
            playout,
            capture,
            processor,
            running: None,
        }
    }

    /// Bind the media port, probe `peer` and start streaming.
    ///
    /// Bind failure is fatal and reported; nothing is left running.
    pub async fn start(&mut self, peer: SocketAddr) -> Result<(), NetworkError> {
        if self.running.is_some() {
            return Err(NetworkError::AlreadyRunning);
        }

        self.playout.clear();
        self.capture.clear();

        let socket = Arc::new(create_socket(self.config.bind_addr())?);
        let local = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let mut sender = MediaSender::new(
            self.config.payload_type,
            self.config.ssrc,
            self.config.tx_queue_frames,
            self.capture.clone(),
        );
        if self.config.send_probe {
            let probe = sender.probe_packet();
            match socket.send_to(&probe, peer).await {
                Ok(sent) => sender.record_sent(sent),
                Err(e) => {
                    sender.record_error();
                    tracing::warn!("Media probe to {} failed: {}", peer, e);
                }
            }
        }

        let receiver = MediaReceiver::new(
            peer.ip(),
            self.config.max_concealed_packets,
            self.playout.clone(),
            self.processor.clone(),
        );

        let rx_counters = receiver.counters();
        let tx_counters = sender.counters();
        let tx_queue = sender.queue();

        let receive_task = tokio::spawn(run_receive_loop(socket.clone(), receiver));
        let transmit_task = tokio::spawn(run_transmit_loop(socket.clone(), peer, sender));

        tracing::info!("Media transport started on {} with peer {}", local, peer);

        self.running = Some(RunningMedia {
            socket,
            peer,
            receive_task,
            transmit_task,
            rx_counters,
            tx_counters,
            tx_queue,
        });
        Ok(())
    }

    /// Stop streaming and close the socket. Safe to call when stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        // Receive side first so no readiness wakeup races the close
        running.receive_task.abort();
        running.transmit_task.abort();
        let _ = running.receive_task.await;
        let _ = running.transmit_task.await;

        // Tasks are gone; this is the last handle to the socket
        drop(running.socket);

        self.playout.clear();
        self.capture.clear();
        tracing::info!("Media transport stopped (peer {})", running.peer);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().and_then(|r| r.socket.local_addr().ok())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.peer)
    }

    pub fn stats(&self) -> MediaStats {
        let mut stats = MediaStats {
            playout_level: self.playout.fill_level(),
            capture_level: self.capture.fill_level(),
            ..Default::default()
        };
        if let Some(running) = &self.running {
            stats.receiver = running.rx_counters.snapshot();
            stats.sender = running.tx_counters.snapshot(&running.tx_queue);
        }
        stats
    }
}

impl Drop for MediaTransport {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.receive_task.abort();
            running.transmit_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;
    use crate::protocol::AudioDatagram;
    use std::time::Duration;

    fn transport(port: u16) -> MediaTransport {
        let config = MediaConfig {
            port,
            bind_address: "127.0.0.1".parse().unwrap(),
            ..Default::default()
        };
        MediaTransport::new(
            config,
            create_shared_buffer(48_000),
            create_shared_buffer(48_000),
            SharedProcessor::default(),
        )
    }

    #[tokio::test]
    async fn test_probe_sent_on_start() {
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut media = transport(0);
        media.start(peer.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let probe = AudioDatagram::parse(&buf[..len]).unwrap();
        assert!(probe.payload.is_empty());
        assert_eq!(probe.sequence_number, 0);

        media.stop().await;
    }

    #[tokio::test]
    async fn test_restart_rebinds_same_port() {
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut media = transport(0);
        media.start(peer_addr).await.unwrap();
        let port = media.local_addr().unwrap().port();
        assert!(matches!(
            media.start(peer_addr).await,
            Err(NetworkError::AlreadyRunning)
        ));
        media.stop().await;
        media.stop().await;
        assert!(!media.is_running());

        let mut again = transport(port);
        again.start(peer_addr).await.unwrap();
        assert_eq!(again.local_addr().unwrap().port(), port);
        again.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        // A plain std socket already holds the port
        let holder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let mut media = transport(port);
        let result = media.start("127.0.0.1:9".parse().unwrap()).await;
        assert!(matches!(result, Err(NetworkError::BindFailed(_))));
        assert!(!media.is_running());
    }

    #[tokio::test]
    async fn test_second_transport_on_busy_port_fails() {
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let mut first = transport(0);
        first.start(peer).await.unwrap();
        let port = first.local_addr().unwrap().port();

        let mut second = transport(port);
        assert!(matches!(
            second.start(peer).await,
            Err(NetworkError::BindFailed(_))
        ));
        assert!(!second.is_running());
        assert!(first.is_running());

        first.stop().await;
    }

    #[tokio::test]
    async fn test_loopback_audio_reaches_playout() {
        let device = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let playout = create_shared_buffer(48_000);
        let capture = create_shared_buffer(48_000);
        let mut media = MediaTransport::new(
            MediaConfig {
                port: 0,
                bind_address: "127.0.0.1".parse().unwrap(),
                ..Default::default()
            },
            playout.clone(),
            capture.clone(),
            SharedProcessor::default(),
        );
        media.start(device.local_addr().unwrap()).await.unwrap();
        let local = media.local_addr().unwrap();

        // Echo what the transport sends straight back to it
        let mut buf = [0u8; 2048];
        for _ in 0..4 {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), device.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            device.send_to(&buf[..len], local).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while playout.available_to_read() < 3 * 960 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // probe is undersized and dropped; the three paced packets play out
        assert_eq!(playout.available_to_read(), 3 * 960);
        assert_eq!(media.stats().receiver.undersized_packets, 1);

        media.stop().await;
        assert_eq!(playout.available_to_read(), 0);
    }
}
