//! # Rig Remote
//!
//! LAN remote operation core for networked transceivers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        HOST APPLICATION (GUI / CLI)                        │
//! │        send(command)      status / errors / frames      mic samples       │
//! └────────────┬───────────────────────▲───────────────────────┬──────────────┘
//!              │                       │                       │
//!              ▼                       │                       ▼
//! ┌────────────────────────────┐   ┌───┴──────────────┐   ┌──────────────────┐
//! │  Control Channel (TCP)     │   │   RigSession     │   │  Capture Ring    │
//! │  ControlMachine + driver   │   │  (single owner)  │   │  48 kHz mono     │
//! │  ##CN; → ##ID…; → PS; ...  │   └───┬──────────────┘   └────────┬─────────┘
//! └────────────┬───────────────┘       │                           │
//!              │                       ▼                           ▼
//!              │        ┌──────────────────────────────────────────────────┐
//!              │        │            Media Transport (UDP)                 │
//!              │        │  receive: parse → conceal → 16k→48k → process    │
//!              │        │  transmit: 48k→16k → queue → 20 ms paced send    │
//!              │        └──────────────┬─────────────────────┬─────────────┘
//!              │                       │                     │
//!              ▼                       ▼                     │
//!        ┌───────────┐          ┌──────────────┐             │
//!        │  Device   │◀─────────│ Playout Ring │             │
//!        │ :60000    │  UDP     │ 48 kHz mono  │             │
//!        │ :60001    │◀────────────────────────────────────────┘
//!        └───────────┘          └──────────────┘
//! ```
//!
//! The control channel and the media transport never talk to each other
//! directly; [`session::RigSession`] owns both and the host drives them.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of the device audio link
    pub const LINK_SAMPLE_RATE: u32 = 16_000;

    /// Sample rate of host-side audio
    pub const HOST_SAMPLE_RATE: u32 = 48_000;

    /// Ratio between the host and link sample rates
    pub const RESAMPLE_FACTOR: usize = 3;

    /// Packet cadence in milliseconds
    pub const PACKET_INTERVAL_MS: u64 = 20;

    /// Samples per network packet at the link rate (20 ms @ 16 kHz)
    pub const LINK_FRAME_SAMPLES: usize = 320;

    /// Samples per packet-equivalent chunk at the host rate (20 ms @ 48 kHz)
    pub const HOST_FRAME_SAMPLES: usize = LINK_FRAME_SAMPLES * RESAMPLE_FACTOR;

    /// Chunk size handed to frame processors
    pub const PROCESSOR_CHUNK_SAMPLES: usize = 480;

    /// PCM16 payload bytes per network packet
    pub const PACKET_PAYLOAD_BYTES: usize = LINK_FRAME_SAMPLES * 2;

    /// Default TCP port of the control channel
    pub const DEFAULT_CONTROL_PORT: u16 = 60000;

    /// Default UDP port of the media channel
    pub const DEFAULT_MEDIA_PORT: u16 = 60001;

    /// Default connect timeout
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

    /// Default authentication timeout
    pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 10_000;

    /// Keepalive period; the device drops idle control connections after ~10 s
    pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 5_000;

    /// Upper bound on silent frames synthesized for a single sequence gap
    pub const DEFAULT_MAX_CONCEALED_PACKETS: usize = 10;

    /// Outbound frame queue depth (6 × 20 ms = 120 ms of added latency at most)
    pub const DEFAULT_TX_QUEUE_FRAMES: usize = 6;

    /// Default ring buffer length in seconds
    pub const DEFAULT_RING_SECONDS: u32 = 4;

    /// Maximum UDP datagram we ever expect on the media channel
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers
}
