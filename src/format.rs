// src/format.rs

/// Capture runs at a fixed format: 16 kHz, mono, signed 16-bit.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
pub const CAPTURE_CHANNELS: u16 = 1;
pub const CAPTURE_BITS: u16 = 16;

/// Layout of linear PCM as stored and streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub const fn capture() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: CAPTURE_CHANNELS,
            bits_per_sample: CAPTURE_BITS,
        }
    }

    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self { sample_rate, channels, bits_per_sample }
    }

    /// Bytes per frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Only mono/stereo signed 16-bit is readable or writable.
    pub fn is_supported(&self) -> bool {
        (self.channels == 1 || self.channels == 2) && self.bits_per_sample == 16 && self.sample_rate > 0
    }

    pub fn frames_to_ms(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1000 / self.sample_rate as u64
    }

    pub fn ms_to_frames(&self, ms: u64) -> u64 {
        ms * self.sample_rate as u64 / 1000
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::capture()
    }
}

/// Little-endian bytes to i16 samples; a trailing odd byte is ignored.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[inline]
pub fn i16_to_f32(s: i16) -> f32 {
    s as f32 / i16::MAX as f32
}

#[inline]
pub fn f32_to_i16(s: f32) -> i16 {
    if s.is_finite() {
        (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_format_block_align_and_rate() {
        let f = PcmFormat::capture();
        assert_eq!(f.block_align(), 2);
        assert_eq!(f.byte_rate(), 32_000);
        // 3200 bytes is 100 ms of capture audio
        assert_eq!(f.frames_to_ms(3200 / f.block_align() as u64), 100);
    }

    #[test]
    fn only_16_bit_mono_or_stereo_is_supported() {
        assert!(PcmFormat::new(44_100, 2, 16).is_supported());
        assert!(!PcmFormat::new(44_100, 6, 16).is_supported());
        assert!(!PcmFormat::new(44_100, 1, 24).is_supported());
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        assert_eq!(bytes_to_i16(&[0x01, 0x00, 0xff, 0xff, 0x07]), vec![1, -1]);
    }

    #[test]
    fn float_conversion_clamps_and_zeroes_nan() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(f32::NAN), 0);
    }
}
