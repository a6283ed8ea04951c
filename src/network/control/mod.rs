//! TCP control channel: framing, login handshake and keepalive

pub mod channel;
pub mod machine;

pub use channel::ControlChannel;
pub use machine::{
    Action, AuthState, ControlEvent, ControlMachine, ControlState, TimerKind, Timeouts,
};
