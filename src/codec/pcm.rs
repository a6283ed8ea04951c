//! PCM16 little-endian wire samples
//!
//! Outbound: `round(clamp(s, -1, 1) * 32767)`. Inbound: `s / 32768.0`.

/// Convert one float sample to a wire sample
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    // NaN clamps to NaN and casts to 0
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Convert one wire sample to a float sample
#[inline]
pub fn from_pcm16(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode `samples` into `out` as PCM16LE.
///
/// Returns the number of bytes written; stops when `out` is full.
pub fn encode_into(samples: &[f32], out: &mut [u8]) -> usize {
    let mut written = 0;
    for (sample, bytes) in samples.iter().zip(out.chunks_exact_mut(2)) {
        bytes.copy_from_slice(&to_pcm16(*sample).to_le_bytes());
        written += 2;
    }
    written
}

/// Decode PCM16LE `bytes` into `out`.
///
/// Returns the number of samples written. A trailing odd byte is ignored.
pub fn decode_into(bytes: &[u8], out: &mut [f32]) -> usize {
    let mut written = 0;
    for (pair, sample) in bytes.chunks_exact(2).zip(out.iter_mut()) {
        *sample = from_pcm16(i16::from_le_bytes([pair[0], pair[1]]));
        written += 1;
    }
    written
}
