//! Control channel state machine
//!
//! Pure state: inputs (transport readiness, received bytes, timer expiry,
//! host requests) go in, [`Action`]s come out. The driver in
//! [`super::channel`] performs them against a TCP socket and tokio timers.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──ready──▶ Authenticating ──##ID1;──▶ Connected
//!                         │      (no login) ───────────────────────────▶   │
//!                         └──────────────┬───────────────┘                 │
//!                                        ▼                                 │
//!                                  Disconnected ◀──────────────────────────┘
//! ```

use std::time::Duration;

use crate::config::ControlConfig;
use crate::error::ControlError;
use crate::protocol::command::{redact, Ack, Credentials, KEEPALIVE_COMMAND, OPEN_COMMAND};
use crate::protocol::{FrameDecoder, FrameError};

/// Connection state reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    Connecting,
    Authenticating,
    Connected,
    Disconnected,
}

impl ControlState {
    /// A session exists: transport pending or open
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ControlState::Connecting | ControlState::Authenticating | ControlState::Connected
        )
    }
}

/// Progress of the login handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    SentConnect,
    SentCredentials,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Connect,
    Auth,
    Keepalive,
}

impl TimerKind {
    const ALL: [TimerKind; 3] = [TimerKind::Connect, TimerKind::Auth, TimerKind::Keepalive];

    fn index(self) -> usize {
        match self {
            TimerKind::Connect => 0,
            TimerKind::Auth => 1,
            TimerKind::Keepalive => 2,
        }
    }
}

/// Upstream notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Status(ControlState),
    Error(ControlError),
    /// A decoded frame, trimmed and `;`-terminated
    Frame(String),
    /// Traffic log line with credentials redacted
    Log(String),
}

/// Side effects requested by the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenTransport,
    Send(String),
    /// Connect and auth timers are one-shot, keepalive recurs
    ArmTimer(TimerKind, Duration),
    CancelTimer(TimerKind),
    CloseTransport,
    Emit(ControlEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub auth: Duration,
    pub keepalive: Duration,
}

impl Timeouts {
    fn get(&self, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::Connect => self.connect,
            TimerKind::Auth => self.auth,
            TimerKind::Keepalive => self.keepalive,
        }
    }
}

impl From<&ControlConfig> for Timeouts {
    fn from(config: &ControlConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            auth: config.auth_timeout(),
            keepalive: config.keepalive_interval(),
        }
    }
}

pub struct ControlMachine {
    state: ControlState,
    auth: AuthState,
    credentials: Option<Credentials>,
    timeouts: Timeouts,
    decoder: FrameDecoder,
    transport_open: bool,
    armed: [bool; 3],
}

impl ControlMachine {
    /// `credentials` selects the login path; `None` connects without login
    pub fn new(timeouts: Timeouts, credentials: Option<Credentials>) -> Self {
        Self {
            state: ControlState::Idle,
            auth: AuthState::Idle,
            credentials,
            timeouts,
            decoder: FrameDecoder::new(),
            transport_open: false,
            armed: [false; 3],
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth
    }

    pub fn is_timer_armed(&self, kind: TimerKind) -> bool {
        self.armed[kind.index()]
    }

    /// Start a new session, tearing down any previous one first
    pub fn connect(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        self.teardown(&mut out);
        self.set_state(ControlState::Connecting, &mut out);
        out.push(Action::OpenTransport);
        self.arm(TimerKind::Connect, &mut out);
        out
    }

    /// The TCP stream is established
    pub fn transport_ready(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        if self.state != ControlState::Connecting {
            return out;
        }
        self.transport_open = true;
        self.cancel(TimerKind::Connect, &mut out);

        if self.credentials.is_some() {
            self.set_state(ControlState::Authenticating, &mut out);
            self.send_frame(OPEN_COMMAND, &mut out);
            self.auth = AuthState::SentConnect;
            self.arm(TimerKind::Auth, &mut out);
        } else {
            self.enter_connected(&mut out);
        }
        out
    }

    /// Connect, read or write failed at the socket level
    pub fn transport_failed(&mut self, reason: impl Into<String>) -> Vec<Action> {
        let mut out = Vec::new();
        let error = if self.transport_open {
            ControlError::Transport(reason.into())
        } else {
            ControlError::ConnectionFailed(reason.into())
        };
        self.fail(error, &mut out);
        out
    }

    /// The peer closed the stream
    pub fn transport_closed(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        self.fail(ControlError::ClosedByPeer, &mut out);
        out
    }

    /// Feed bytes read from the stream
    pub fn bytes_received(&mut self, data: &[u8]) -> Vec<Action> {
        let mut out = Vec::new();
        if !self.transport_open {
            return out;
        }
        let overflow = self.decoder.extend(data).err();

        while let Some(frame) = self.decoder.next_frame() {
            tracing::trace!("<< {}", frame);
            out.push(Action::Emit(ControlEvent::Log(format!("<< {frame}"))));
            let ack = Ack::parse(&frame);
            out.push(Action::Emit(ControlEvent::Frame(frame)));

            if let Some(ack) = ack {
                self.handle_ack(ack, &mut out);
                if !self.transport_open {
                    return out;
                }
            }
        }

        if let Some(FrameError::TooLong { pending, .. }) = overflow {
            tracing::warn!("Dropping {} unterminated bytes from device", pending);
            self.fail(ControlError::FrameTooLong(pending), &mut out);
        }
        out
    }

    pub fn timer_fired(&mut self, kind: TimerKind) -> Vec<Action> {
        let mut out = Vec::new();
        if !self.armed[kind.index()] {
            return out;
        }

        match kind {
            TimerKind::Connect => {
                self.armed[kind.index()] = false;
                if self.state == ControlState::Connecting {
                    let ms = self.timeouts.connect.as_millis() as u64;
                    self.fail(ControlError::Unreachable(ms), &mut out);
                }
            }
            TimerKind::Auth => {
                self.armed[kind.index()] = false;
                if self.state == ControlState::Authenticating {
                    let ms = self.timeouts.auth.as_millis() as u64;
                    self.fail(ControlError::AuthTimeout(ms), &mut out);
                }
            }
            TimerKind::Keepalive => {
                if self.state == ControlState::Connected {
                    self.send_frame(KEEPALIVE_COMMAND, &mut out);
                }
            }
        }
        out
    }

    /// Send a host command; rejected locally when no transport is open
    pub fn send(&mut self, command: &str) -> Result<Vec<Action>, ControlError> {
        if !self.transport_open {
            return Err(ControlError::NotConnected);
        }
        let mut out = Vec::new();
        self.send_frame(command, &mut out);
        Ok(out)
    }

    /// Tear down the session. Idempotent.
    pub fn disconnect(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        self.teardown(&mut out);
        out
    }

    fn handle_ack(&mut self, ack: Ack, out: &mut Vec<Action>) {
        match (ack, self.auth) {
            (Ack::Open(true), AuthState::SentConnect) => {
                if let Some(login) = self.credentials.as_ref().map(Credentials::login_command) {
                    self.send_frame(&login, out);
                    self.auth = AuthState::SentCredentials;
                }
            }
            (Ack::Login(true), AuthState::SentCredentials) => {
                self.cancel(TimerKind::Auth, out);
                self.auth = AuthState::Authenticated;
                self.enter_connected(out);
            }
            (Ack::Open(false), AuthState::SentConnect) => {
                self.fail(ControlError::OpenRejected, out);
            }
            (Ack::Login(false), AuthState::SentCredentials) => {
                self.fail(ControlError::LoginRejected, out);
            }
            (ack, auth) => {
                tracing::debug!("Ignoring {:?} in auth state {:?}", ack, auth);
            }
        }
    }

    fn enter_connected(&mut self, out: &mut Vec<Action>) {
        self.set_state(ControlState::Connected, out);
        self.arm(TimerKind::Keepalive, out);
    }

    fn send_frame(&mut self, command: &str, out: &mut Vec<Action>) {
        let shown = redact(command);
        tracing::trace!(">> {}", shown);
        out.push(Action::Emit(ControlEvent::Log(format!(">> {shown}"))));
        out.push(Action::Send(command.to_string()));
    }

    fn fail(&mut self, error: ControlError, out: &mut Vec<Action>) {
        if !self.state.is_live() {
            return;
        }
        tracing::error!("Control session failed in {:?}: {}", self.state, error);
        out.push(Action::Emit(ControlEvent::Error(error)));
        self.teardown(out);
    }

    fn teardown(&mut self, out: &mut Vec<Action>) {
        for kind in TimerKind::ALL {
            self.cancel(kind, out);
        }
        if self.state.is_live() || self.transport_open {
            out.push(Action::CloseTransport);
        }
        self.transport_open = false;
        self.decoder.clear();
        self.auth = AuthState::Idle;
        if self.state.is_live() {
            self.set_state(ControlState::Disconnected, out);
        }
    }

    fn arm(&mut self, kind: TimerKind, out: &mut Vec<Action>) {
        self.cancel(kind, out);
        self.armed[kind.index()] = true;
        out.push(Action::ArmTimer(kind, self.timeouts.get(kind)));
    }

    fn cancel(&mut self, kind: TimerKind, out: &mut Vec<Action>) {
        if std::mem::take(&mut self.armed[kind.index()]) {
            out.push(Action::CancelTimer(kind));
        }
    }

    fn set_state(&mut self, state: ControlState, out: &mut Vec<Action>) {
        if self.state == state {
            return;
        }
        tracing::info!("Control state {:?} -> {:?}", self.state, state);
        self.state = state;
        out.push(Action::Emit(ControlEvent::Status(state)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AccountType, MAX_PENDING_BYTES};

    fn timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(15),
            auth: Duration::from_secs(10),
            keepalive: Duration::from_secs(5),
        }
    }

    fn with_login() -> ControlMachine {
        let creds = Credentials::new(AccountType::Administrator, "admin", "secret").unwrap();
        ControlMachine::new(timeouts(), Some(creds))
    }

    fn sends(actions: &[Action]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn errors(actions: &[Action]) -> Vec<ControlError> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(ControlEvent::Error(e)) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn keepalive_arms(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, Action::ArmTimer(TimerKind::Keepalive, _)))
            .count()
    }

    #[test]
    fn test_login_handshake_reaches_connected() {
        let mut m = with_login();
        let mut all = Vec::new();

        all.extend(m.connect());
        assert_eq!(m.state(), ControlState::Connecting);
        assert!(all.contains(&Action::ArmTimer(TimerKind::Connect, Duration::from_secs(15))));

        let actions = m.transport_ready();
        assert_eq!(sends(&actions), vec!["##CN;"]);
        assert!(actions.contains(&Action::CancelTimer(TimerKind::Connect)));
        assert!(actions.contains(&Action::ArmTimer(TimerKind::Auth, Duration::from_secs(10))));
        assert_eq!(m.state(), ControlState::Authenticating);
        assert_eq!(m.auth_state(), AuthState::SentConnect);
        all.extend(actions);

        let actions = m.bytes_received(b"##CN1;");
        assert_eq!(sends(&actions), vec!["##ID00506adminsecret;"]);
        assert_eq!(m.auth_state(), AuthState::SentCredentials);
        all.extend(actions);

        let actions = m.bytes_received(b"##ID1;");
        assert!(actions.contains(&Action::CancelTimer(TimerKind::Auth)));
        assert!(actions.contains(&Action::Emit(ControlEvent::Status(ControlState::Connected))));
        assert_eq!(m.state(), ControlState::Connected);
        assert_eq!(m.auth_state(), AuthState::Authenticated);
        all.extend(actions);

        assert_eq!(keepalive_arms(&all), 1);
        assert!(errors(&all).is_empty());
    }

    #[test]
    fn test_acks_split_across_reads() {
        let mut m = with_login();
        m.connect();
        m.transport_ready();

        assert!(sends(&m.bytes_received(b"##C")).is_empty());
        assert_eq!(sends(&m.bytes_received(b"N1;")).len(), 1);
        m.bytes_received(b"##ID1;FA00007000000;");
        assert_eq!(m.state(), ControlState::Connected);
    }

    #[test]
    fn test_open_rejected() {
        let mut m = with_login();
        m.connect();
        m.transport_ready();

        let actions = m.bytes_received(b"##CN0;");
        assert_eq!(errors(&actions), vec![ControlError::OpenRejected]);
        assert!(actions.contains(&Action::CloseTransport));
        assert_eq!(m.state(), ControlState::Disconnected);
        assert_eq!(m.auth_state(), AuthState::Idle);
        assert!(!m.is_timer_armed(TimerKind::Auth));
    }

    #[test]
    fn test_login_rejected_reports_once() {
        let mut m = with_login();
        m.connect();
        m.transport_ready();
        m.bytes_received(b"##CN1;");

        // trailing frames after the rejection are not processed
        let actions = m.bytes_received(b"##ID0;##ID0;");
        assert_eq!(errors(&actions), vec![ControlError::LoginRejected]);
        assert_eq!(m.state(), ControlState::Disconnected);

        let later = m.transport_closed();
        assert!(later.is_empty());
    }

    #[test]
    fn test_auth_timeout() {
        let mut m = with_login();
        m.connect();
        m.transport_ready();

        let actions = m.timer_fired(TimerKind::Auth);
        assert_eq!(errors(&actions), vec![ControlError::AuthTimeout(10_000)]);
        assert_eq!(m.state(), ControlState::Disconnected);
        assert!(!actions.contains(&Action::Emit(ControlEvent::Status(ControlState::Connected))));
    }

    #[test]
    fn test_connect_timeout_reports_unreachable() {
        let mut m = with_login();
        m.connect();

        let actions = m.timer_fired(TimerKind::Connect);
        assert_eq!(errors(&actions), vec![ControlError::Unreachable(15_000)]);
        assert!(actions.contains(&Action::CloseTransport));
        assert_eq!(m.state(), ControlState::Disconnected);
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut m = with_login();
        m.connect();
        m.transport_ready();

        assert!(m.timer_fired(TimerKind::Connect).is_empty());
        assert_eq!(m.state(), ControlState::Authenticating);
    }

    #[test]
    fn test_no_login_path() {
        let mut m = ControlMachine::new(timeouts(), None);
        m.connect();

        let actions = m.transport_ready();
        assert!(sends(&actions).is_empty());
        assert_eq!(m.state(), ControlState::Connected);
        assert_eq!(keepalive_arms(&actions), 1);

        let actions = m.timer_fired(TimerKind::Keepalive);
        assert_eq!(sends(&actions), vec!["PS;"]);
        let actions = m.timer_fired(TimerKind::Keepalive);
        assert_eq!(sends(&actions), vec!["PS;"]);
        assert_eq!(keepalive_arms(&actions), 0);
    }

    #[test]
    fn test_send_requires_transport() {
        let mut m = ControlMachine::new(timeouts(), None);
        assert_eq!(m.send("FA;"), Err(ControlError::NotConnected));

        m.connect();
        assert_eq!(m.send("FA;"), Err(ControlError::NotConnected));

        m.transport_ready();
        assert_eq!(sends(&m.send("FA;").unwrap()), vec!["FA;"]);
    }

    #[test]
    fn test_login_redacted_in_log() {
        let mut m = with_login();
        m.connect();
        m.transport_ready();

        let actions = m.bytes_received(b"##CN1;");
        let logs: Vec<&String> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(ControlEvent::Log(line)) => Some(line),
                _ => None,
            })
            .collect();
        assert!(logs.iter().any(|l| l.as_str() == ">> ##ID<redacted>;"));
        assert!(logs.iter().all(|l| !l.contains("secret")));
    }

    #[test]
    fn test_frames_surface_to_host() {
        let mut m = ControlMachine::new(timeouts(), None);
        m.connect();
        m.transport_ready();

        let actions = m.bytes_received(b"FA00014074000;\r\nMD2;");
        let frames: Vec<&Action> = actions
            .iter()
            .filter(|a| matches!(a, Action::Emit(ControlEvent::Frame(_))))
            .collect();
        assert_eq!(
            frames,
            vec![
                &Action::Emit(ControlEvent::Frame("FA00014074000;".into())),
                &Action::Emit(ControlEvent::Frame("MD2;".into())),
            ]
        );
    }

    #[test]
    fn test_disconnect_idempotent() {
        let mut m = ControlMachine::new(timeouts(), None);
        assert!(m.disconnect().is_empty());

        m.connect();
        m.transport_ready();
        let actions = m.disconnect();
        assert!(actions.contains(&Action::CancelTimer(TimerKind::Keepalive)));
        assert!(actions.contains(&Action::CloseTransport));
        assert!(actions.contains(&Action::Emit(ControlEvent::Status(ControlState::Disconnected))));

        assert!(m.disconnect().is_empty());
        assert!(m.transport_failed("reset").is_empty());
        assert_eq!(m.state(), ControlState::Disconnected);
    }

    #[test]
    fn test_reconnect_tears_down_previous() {
        let mut m = ControlMachine::new(timeouts(), None);
        m.connect();
        m.transport_ready();

        let actions = m.connect();
        let close = actions.iter().position(|a| *a == Action::CloseTransport).unwrap();
        let open = actions.iter().position(|a| *a == Action::OpenTransport).unwrap();
        assert!(close < open);
        assert_eq!(m.state(), ControlState::Connecting);
        assert!(!m.is_timer_armed(TimerKind::Keepalive));
    }

    #[test]
    fn test_unterminated_flood_ends_session() {
        let mut m = ControlMachine::new(timeouts(), None);
        m.connect();
        m.transport_ready();

        let mut data = b"MD2;".to_vec();
        data.extend(std::iter::repeat(b'0').take(MAX_PENDING_BYTES + 1));
        let actions = m.bytes_received(&data);

        assert!(actions.contains(&Action::Emit(ControlEvent::Frame("MD2;".into()))));
        assert_eq!(
            errors(&actions),
            vec![ControlError::FrameTooLong(MAX_PENDING_BYTES + 1)]
        );
        assert!(actions.contains(&Action::CloseTransport));
        assert_eq!(m.state(), ControlState::Disconnected);
        assert!(m.bytes_received(b"FA;").is_empty());
    }

    #[test]
    fn test_connection_refused_before_ready() {
        let mut m = ControlMachine::new(timeouts(), None);
        m.connect();

        let actions = m.transport_failed("connection refused");
        assert_eq!(
            errors(&actions),
            vec![ControlError::ConnectionFailed("connection refused".into())]
        );
        assert!(actions.contains(&Action::CancelTimer(TimerKind::Connect)));
    }
}
