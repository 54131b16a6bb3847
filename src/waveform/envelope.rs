// src/waveform/envelope.rs

/// Envelope buckets per second of audio; one bucket is one pixel at the
/// default zoom.
pub const ENVELOPE_BUCKETS_PER_SECOND: u32 = 100;

#[inline]
fn magnitude(s: i16) -> f32 {
    (s as i32).unsigned_abs() as f32 / 32_768.0
}

/// Peak magnitude per fixed-width bucket, normalised to 0.0..=1.0.
/// The last bucket may still be accumulating.
#[derive(Debug, Clone)]
pub struct AmplitudeEnvelope {
    bucket_width: usize,
    peaks: Vec<f32>,
    in_bucket: usize,
    total_frames: u64,
    frozen: bool,
}

impl AmplitudeEnvelope {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_bucket_width((sample_rate / ENVELOPE_BUCKETS_PER_SECOND).max(1) as usize)
    }

    pub fn with_bucket_width(bucket_width: usize) -> Self {
        Self {
            bucket_width: bucket_width.max(1),
            peaks: Vec::new(),
            in_bucket: 0,
            total_frames: 0,
            frozen: false,
        }
    }

    /// Fold one interleaved block in, taking the loudest channel per frame.
    /// Returns the index of the first bucket that changed.
    pub fn add_block(&mut self, samples: &[i16], channels: usize) -> Option<usize> {
        if channels == 0 || samples.len() < channels {
            return None;
        }
        let first = if self.in_bucket == 0 {
            self.peaks.len()
        } else {
            self.peaks.len() - 1
        };

        for frame in samples.chunks_exact(channels) {
            let peak = frame.iter().map(|&s| magnitude(s)).fold(0.0f32, f32::max);
            match self.peaks.last_mut() {
                Some(last) if self.in_bucket > 0 => *last = last.max(peak),
                _ => self.peaks.push(peak),
            }
            self.in_bucket += 1;
            if self.in_bucket == self.bucket_width {
                self.in_bucket = 0;
            }
            self.total_frames += 1;
        }
        Some(first)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn bucket_width(&self) -> usize {
        self.bucket_width
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Index of the bucket the next frame lands in.
    pub fn write_cursor(&self) -> usize {
        if self.in_bucket == 0 {
            self.peaks.len()
        } else {
            self.peaks.len() - 1
        }
    }

    pub fn peaks(&self) -> &[f32] {
        &self.peaks
    }

    pub fn snapshot(&self) -> Vec<f32> {
        self.peaks.clone()
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_count_is_ceil_of_frames() {
        let mut env = AmplitudeEnvelope::with_bucket_width(160);
        for chunk in [1600usize, 50, 333, 1] {
            env.add_block(&vec![100i16; chunk], 1);
            let expected = env.total_frames().div_ceil(160) as usize;
            assert_eq!(env.len(), expected);
        }
    }

    #[test]
    fn partial_bucket_keeps_growing_in_place() {
        let mut env = AmplitudeEnvelope::with_bucket_width(4);
        assert_eq!(env.add_block(&[100, 200], 1), Some(0));
        assert_eq!(env.add_block(&[i16::MIN], 1), Some(0));
        assert_eq!(env.len(), 1);
        assert_eq!(env.peaks()[0], 1.0);
        assert_eq!(env.add_block(&[0, 0], 1), Some(0));
        assert_eq!(env.write_cursor(), 1);
        assert_eq!(env.add_block(&[0], 1), Some(1));
    }

    #[test]
    fn stereo_takes_the_louder_channel() {
        let mut env = AmplitudeEnvelope::with_bucket_width(2);
        env.add_block(&[0, 16_384, -8_192, 0], 2);
        assert_eq!(env.len(), 1);
        assert_eq!(env.peaks()[0], 0.5);
    }

    #[test]
    fn capture_rate_gives_ten_ms_buckets() {
        assert_eq!(AmplitudeEnvelope::new(16_000).bucket_width(), 160);
    }
}
