//! Wire protocols of the media and control channels

pub mod command;
pub mod datagram;
pub mod frame;
pub mod sequence;

pub use command::{Ack, AccountType, Credentials};
pub use datagram::{AudioDatagram, DatagramError, OutboundHeader};
pub use frame::{DecodedText, FrameDecoder, FrameError, MAX_PENDING_BYTES};
pub use sequence::{SequenceStatus, SequenceTracker};
