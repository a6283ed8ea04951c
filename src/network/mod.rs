//! Network subsystem: UDP media transport and TCP control channel

pub mod control;
pub mod media;
pub mod receiver;
pub mod sender;
pub mod udp;

pub use control::{ControlChannel, ControlEvent, ControlState};
pub use media::{MediaStats, MediaTransport};
pub use receiver::{MediaReceiver, ReceiverStats};
pub use sender::{MediaSender, SenderStats};
pub use udp::{create_socket, UdpSocket};
