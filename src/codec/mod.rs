//! Wire sample codec
//!
//! The media channel carries uncompressed 16-bit mono PCM.

pub mod pcm;

pub use pcm::{decode_into, encode_into, from_pcm16, to_pcm16};
