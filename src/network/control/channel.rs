//! Tokio driver for the control state machine
//!
//! One task per session owns the TCP stream and timers and feeds every
//! input through [`ControlMachine`]. The task ends when the session leaves
//! the live states.
//!
//! Writes go through a bounded queue to a separate writer task, so a peer
//! that stops reading can never block timers or teardown. A full queue or a
//! write that stalls past [`WRITE_TIMEOUT`] fails the session.

use std::future::{pending, Future};
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};

use super::machine::{Action, ControlEvent, ControlMachine, TimerKind, Timeouts};
use crate::config::ControlConfig;
use crate::error::ControlError;
use crate::protocol::Credentials;

const READ_BUFFER_BYTES: usize = 4096;

/// Commands waiting for the writer task
const WRITE_QUEUE_DEPTH: usize = 32;

/// Longest a single command may take to reach the socket
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

enum ControlCommand {
    Send(String, oneshot::Sender<Result<(), ControlError>>),
    Disconnect,
}

/// Handle to a running control session
pub struct ControlChannel {
    commands: mpsc::UnboundedSender<ControlCommand>,
    task: Option<JoinHandle<()>>,
}

impl ControlChannel {
    /// Connect to the device described by `config` and run the session.
    ///
    /// Status, errors, frames and log lines arrive on `events`.
    pub fn connect(
        config: &ControlConfig,
        credentials: Option<Credentials>,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        let addr = format!("{}:{}", config.host, config.port);
        let machine = ControlMachine::new(Timeouts::from(config), credentials);
        Self::spawn(addr, machine, events)
    }

    fn spawn(
        addr: String,
        machine: ControlMachine,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            addr,
            connecting: None,
            reader: None,
            writer: None,
            connect_deadline: None,
            auth_deadline: None,
            keepalive: None,
            events,
        };
        let task = tokio::spawn(run(machine, driver, command_rx));
        Self {
            commands,
            task: Some(task),
        }
    }

    /// Send a raw command. Fails with `NotConnected` when the session has
    /// no open stream.
    pub async fn send(&self, command: &str) -> Result<(), ControlError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ControlCommand::Send(command.to_string(), reply))
            .map_err(|_| ControlError::NotConnected)?;
        response.await.map_err(|_| ControlError::NotConnected)?
    }

    /// Tear the session down and wait for the task to finish
    pub async fn disconnect(&mut self) {
        let _ = self.commands.send(ControlCommand::Disconnect);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// The session task has ended
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Write half of the stream, owned by its own task
struct Writer {
    queue: mpsc::Sender<String>,
    task: JoinHandle<io::Result<()>>,
}

impl Writer {
    fn spawn(half: OwnedWriteHalf) -> Self {
        let (queue, queue_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        Self {
            queue,
            task: tokio::spawn(write_loop(half, queue_rx)),
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // The write half drops with the task, closing the stream
        self.task.abort();
    }
}

async fn write_loop(mut half: OwnedWriteHalf, mut queue: mpsc::Receiver<String>) -> io::Result<()> {
    while let Some(text) = queue.recv().await {
        match tokio::time::timeout(WRITE_TIMEOUT, half.write_all(text.as_bytes())).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write stalled for {} ms", WRITE_TIMEOUT.as_millis()),
                ))
            }
        }
    }
    Ok(())
}

struct Driver {
    addr: String,
    connecting: Option<ConnectFuture>,
    reader: Option<OwnedReadHalf>,
    writer: Option<Writer>,
    connect_deadline: Option<Instant>,
    auth_deadline: Option<Instant>,
    keepalive: Option<Interval>,
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl Driver {
    /// Apply a batch. A rejected write abandons the rest of the batch and
    /// feeds the failure back into the machine.
    fn apply(&mut self, machine: &mut ControlMachine, actions: Vec<Action>) {
        let mut pending = actions;
        while !pending.is_empty() {
            let mut follow_up = Vec::new();
            for action in pending {
                if let Err(e) = self.perform(action) {
                    tracing::warn!("Control write failed: {}", e);
                    follow_up = machine.transport_failed(e.to_string());
                    break;
                }
            }
            pending = follow_up;
        }
    }

    fn perform(&mut self, action: Action) -> io::Result<()> {
        match action {
            Action::OpenTransport => {
                let addr = self.addr.clone();
                tracing::debug!("Opening control connection to {}", addr);
                self.connecting = Some(Box::pin(async move { TcpStream::connect(addr).await }));
            }
            Action::Send(text) => {
                if let Some(writer) = self.writer.as_ref() {
                    writer.queue.try_send(text).map_err(|e| match e {
                        TrySendError::Full(_) => {
                            io::Error::new(io::ErrorKind::WouldBlock, "control write queue full")
                        }
                        TrySendError::Closed(_) => {
                            io::Error::new(io::ErrorKind::BrokenPipe, "control writer stopped")
                        }
                    })?;
                }
            }
            Action::ArmTimer(TimerKind::Connect, after) => {
                self.connect_deadline = Some(Instant::now() + after);
            }
            Action::ArmTimer(TimerKind::Auth, after) => {
                self.auth_deadline = Some(Instant::now() + after);
            }
            Action::ArmTimer(TimerKind::Keepalive, period) => {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.keepalive = Some(interval);
            }
            Action::CancelTimer(TimerKind::Connect) => self.connect_deadline = None,
            Action::CancelTimer(TimerKind::Auth) => self.auth_deadline = None,
            Action::CancelTimer(TimerKind::Keepalive) => self.keepalive = None,
            Action::CloseTransport => {
                self.connecting = None;
                self.reader = None;
                self.writer = None;
            }
            Action::Emit(event) => {
                let _ = self.events.send(event);
            }
        }
        Ok(())
    }
}

async fn run(
    mut machine: ControlMachine,
    mut driver: Driver,
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
) {
    let mut buf = vec![0u8; READ_BUFFER_BYTES];

    let initial = machine.connect();
    driver.apply(&mut machine, initial);

    while machine.state().is_live() {
        let actions = tokio::select! {
            command = commands.recv() => match command {
                Some(ControlCommand::Send(text, reply)) => match machine.send(&text) {
                    Ok(actions) => {
                        let _ = reply.send(Ok(()));
                        actions
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        Vec::new()
                    }
                },
                Some(ControlCommand::Disconnect) | None => machine.disconnect(),
            },
            result = poll_connect(&mut driver.connecting) => {
                driver.connecting = None;
                match result {
                    Ok(stream) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("Could not disable Nagle on control stream: {}", e);
                        }
                        let (reader, writer) = stream.into_split();
                        driver.reader = Some(reader);
                        driver.writer = Some(Writer::spawn(writer));
                        machine.transport_ready()
                    }
                    Err(e) => machine.transport_failed(e.to_string()),
                }
            },
            result = read_some(&mut driver.reader, &mut buf) => match result {
                Ok(0) => machine.transport_closed(),
                Ok(n) => machine.bytes_received(&buf[..n]),
                Err(e) => machine.transport_failed(e.to_string()),
            },
            _ = sleep_until(driver.connect_deadline) => {
                driver.connect_deadline = None;
                machine.timer_fired(TimerKind::Connect)
            },
            _ = sleep_until(driver.auth_deadline) => {
                driver.auth_deadline = None;
                machine.timer_fired(TimerKind::Auth)
            },
            _ = tick(&mut driver.keepalive) => machine.timer_fired(TimerKind::Keepalive),
            result = join_writer(&mut driver.writer) => {
                driver.writer = None;
                let reason = match result {
                    Ok(()) => "control writer stopped".to_string(),
                    Err(e) => e.to_string(),
                };
                tracing::warn!("Control write failed: {}", reason);
                machine.transport_failed(reason)
            },
        };
        driver.apply(&mut machine, actions);
    }

    tracing::debug!("Control session task finished");
}

async fn poll_connect(connecting: &mut Option<ConnectFuture>) -> io::Result<TcpStream> {
    match connecting.as_mut() {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn join_writer(writer: &mut Option<Writer>) -> io::Result<()> {
    match writer.as_mut() {
        Some(writer) => match (&mut writer.task).await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        },
        None => pending().await,
    }
}

async fn read_some(reader: &mut Option<OwnedReadHalf>, buf: &mut [u8]) -> io::Result<usize> {
    match reader.as_mut() {
        Some(reader) => reader.read(buf).await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
