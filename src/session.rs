//! Session handle owned by the host application
//!
//! Composes one control channel and one media transport against the same
//! device. The two never reference each other; the host decides when media
//! starts (typically on [`ControlState::Connected`]) and when it stops.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::buffer::{RingBuffer, SharedRingBuffer};
use crate::audio::processor::SharedProcessor;
use crate::config::AppConfig;
use crate::constants::HOST_SAMPLE_RATE;
use crate::error::{ControlError, Error, Result};
use crate::network::control::{ControlChannel, ControlEvent};
use crate::network::media::{MediaStats, MediaTransport};
use crate::protocol::Credentials;

#[cfg(doc)]
use crate::network::control::ControlState;

pub struct RigSession {
    config: AppConfig,
    events: mpsc::UnboundedSender<ControlEvent>,
    control: Option<ControlChannel>,
    media: MediaTransport,
    playout: SharedRingBuffer,
    capture: SharedRingBuffer,
    processor: SharedProcessor,
}

impl RigSession {
    /// Build the session and the receiver for its control events
    pub fn new(config: AppConfig) -> (Self, mpsc::UnboundedReceiver<ControlEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let seconds = config.media.ring_seconds;
        let playout = Arc::new(RingBuffer::with_duration(HOST_SAMPLE_RATE, seconds));
        let capture = Arc::new(RingBuffer::with_duration(HOST_SAMPLE_RATE, seconds));
        let processor = SharedProcessor::default();

        let media = MediaTransport::new(
            config.media.clone(),
            playout.clone(),
            capture.clone(),
            processor.clone(),
        );

        let session = Self {
            config,
            events,
            control: None,
            media,
            playout,
            capture,
            processor,
        };
        (session, events_rx)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Open the control channel, replacing any existing session.
    ///
    /// With login enabled the credentials are validated before any socket
    /// is touched; `password` is ignored otherwise.
    pub async fn connect(&mut self, password: Option<&str>) -> Result<()> {
        let credentials = if self.config.control.login {
            let control = &self.config.control;
            Some(Credentials::new(
                control.account_type,
                &control.account,
                password.unwrap_or_default(),
            )?)
        } else {
            None
        };

        self.disconnect().await;

        let control = &self.config.control;
        tracing::info!(
            "Connecting to {}:{} ({})",
            control.host,
            control.port,
            if credentials.is_some() { "login" } else { "no login" }
        );
        self.control = Some(ControlChannel::connect(
            control,
            credentials,
            self.events.clone(),
        ));
        Ok(())
    }

    /// Tear down the control session. Media is left to the host.
    pub async fn disconnect(&mut self) {
        if let Some(mut control) = self.control.take() {
            control.disconnect().await;
        }
    }

    /// Send a raw command on the control channel
    pub async fn send(&self, command: &str) -> std::result::Result<(), ControlError> {
        match &self.control {
            Some(control) => control.send(command).await,
            None => Err(ControlError::NotConnected),
        }
    }

    /// Start media towards the configured host
    pub async fn start_audio(&mut self) -> Result<SocketAddr> {
        let peer = self.media_peer().await?;
        self.media.start(peer).await?;
        Ok(peer)
    }

    pub async fn stop_audio(&mut self) {
        self.media.stop().await;
    }

    /// Stop media and the control session
    pub async fn shutdown(&mut self) {
        self.stop_audio().await;
        self.disconnect().await;
    }

    pub fn is_audio_running(&self) -> bool {
        self.media.is_running()
    }

    /// Queue 48 kHz mono microphone samples for transmission.
    ///
    /// Returns the number of samples accepted by the capture ring.
    pub fn submit_microphone_frame(&self, samples: &[f32]) -> usize {
        self.capture.write(samples)
    }

    pub fn playout_buffer(&self) -> SharedRingBuffer {
        self.playout.clone()
    }

    pub fn capture_buffer(&self) -> SharedRingBuffer {
        self.capture.clone()
    }

    pub fn processor(&self) -> &SharedProcessor {
        &self.processor
    }

    pub fn media_stats(&self) -> MediaStats {
        self.media.stats()
    }

    async fn media_peer(&self) -> Result<SocketAddr> {
        let host = self.config.control.host.as_str();
        let port = self.config.media.port;
        tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| Error::Config(format!("cannot resolve {host}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CredentialError, CredentialField};
    use crate::network::control::ControlState;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn local_config(control_port: u16, login: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.control.host = "127.0.0.1".into();
        config.control.port = control_port;
        config.control.login = login;
        config.control.account = "admin".into();
        config.media.port = 0;
        config.media.bind_address = "127.0.0.1".parse().unwrap();
        config.media.send_probe = false;
        config.media.ring_seconds = 1;
        config
    }

    async fn wait_status(
        events: &mut mpsc::UnboundedReceiver<ControlEvent>,
        status: ControlState,
    ) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if event == ControlEvent::Status(status) {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_missing_password_rejected_locally() {
        let (mut session, mut events) = RigSession::new(local_config(9, true));

        let result = session.connect(None).await;
        assert!(matches!(
            result,
            Err(Error::Credential(CredentialError::Empty(CredentialField::Password)))
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_without_session() {
        let (session, _events) = RigSession::new(local_config(9, false));
        assert_eq!(session.send("FA;").await, Err(ControlError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_disconnect_cycle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    use tokio::io::AsyncReadExt;
                    let mut stream = stream;
                    let mut sink = Vec::new();
                    let _ = stream.read_to_end(&mut sink).await;
                });
            }
        });

        let (mut session, mut events) = RigSession::new(local_config(port, false));
        session.connect(None).await.unwrap();
        wait_status(&mut events, ControlState::Connected).await;

        // Reconnecting tears the first session down before opening the next
        session.connect(None).await.unwrap();
        wait_status(&mut events, ControlState::Disconnected).await;
        wait_status(&mut events, ControlState::Connected).await;

        session.shutdown().await;
        wait_status(&mut events, ControlState::Disconnected).await;
        assert_eq!(session.send("FA;").await, Err(ControlError::NotConnected));
    }

    #[tokio::test]
    async fn test_audio_start_stop() {
        let (mut session, _events) = RigSession::new(local_config(9, false));

        let peer = session.start_audio().await.unwrap();
        assert_eq!(peer.ip().to_string(), "127.0.0.1");
        assert!(session.is_audio_running());

        assert_eq!(session.submit_microphone_frame(&[0.25; 960]), 960);
        session.stop_audio().await;
        assert!(!session.is_audio_running());
        assert_eq!(session.capture_buffer().available_to_read(), 0);
    }
}
