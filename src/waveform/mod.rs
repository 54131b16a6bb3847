// src/waveform/mod.rs
pub mod envelope;
pub mod terminal;
pub mod viewport;

use log::debug;

use crate::error::{Result, WaveError};
use crate::format::{PcmFormat, CAPTURE_SAMPLE_RATE};
use crate::store::ReadHandle;

pub use envelope::{AmplitudeEnvelope, ENVELOPE_BUCKETS_PER_SECOND};
pub use viewport::{ViewportState, MAX_PIXELS_PER_SECOND, MIN_PIXELS_PER_SECOND};

/// Frames read per pass when rebuilding the envelope from a stored clip.
const REBUILD_CHUNK_FRAMES: u64 = 16_384;

/// Buckets changed by one `update_envelope` call.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeDelta {
    pub first_index: usize,
    pub buckets: Vec<f32>,
}

/// Envelope plus view state for one clip. No I/O apart from `rebuild_from`.
#[derive(Debug, Clone)]
pub struct WaveformModel {
    format: PcmFormat,
    envelope: AmplitudeEnvelope,
    viewport: ViewportState,
    cursor_px: Option<u64>,
    play_finished: bool,
}

impl Default for WaveformModel {
    fn default() -> Self {
        Self::new(ViewportState::default())
    }
}

impl WaveformModel {
    pub fn new(viewport: ViewportState) -> Self {
        let format = PcmFormat::capture();
        Self {
            format,
            envelope: AmplitudeEnvelope::new(format.sample_rate),
            viewport,
            cursor_px: None,
            play_finished: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    pub fn envelope(&self) -> &AmplitudeEnvelope {
        &self.envelope
    }

    pub fn envelope_snapshot(&self) -> Vec<f32> {
        self.envelope.snapshot()
    }

    // ---- coordinate conversions -------------------------------------------------

    fn pps(&self) -> f64 {
        self.viewport.pixels_per_second()
    }

    fn rate(&self) -> f64 {
        self.format.sample_rate.max(1) as f64
    }

    pub fn pixels_to_samples(&self, px: u64) -> u64 {
        (px as f64 * self.rate() / self.pps()).round() as u64
    }

    pub fn samples_to_pixels(&self, sample: u64) -> u64 {
        (sample as f64 * self.pps() / self.rate()).round() as u64
    }

    pub fn pixels_to_millisecs(&self, px: u64) -> u64 {
        (px as f64 * 1000.0 / self.pps()).round() as u64
    }

    pub fn millisecs_to_pixels(&self, ms: u64) -> u64 {
        (ms as f64 * self.pps() / 1000.0).round() as u64
    }

    pub fn total_frames(&self) -> u64 {
        self.envelope.total_frames()
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.format.frames_to_ms(self.envelope.total_frames())
    }

    /// Width of the whole clip at the current zoom.
    pub fn total_width_px(&self) -> u64 {
        (self.envelope.total_frames() as f64 * self.pps() / self.rate()).ceil() as u64
    }

    // ---- envelope -----------------------------------------------------------------

    /// Start an empty envelope for a new capture session.
    pub fn reset_for_capture(&mut self, format: PcmFormat) {
        self.format = format;
        self.envelope = AmplitudeEnvelope::new(format.sample_rate);
        self.cursor_px = None;
        self.play_finished = false;
        self.viewport.set_scroll(0, 0);
    }

    /// Fold interleaved samples in. Only the capture loop calls this.
    pub fn update_envelope(&mut self, samples: &[i16]) -> Result<EnvelopeDelta> {
        if self.envelope.is_frozen() {
            return Err(WaveError::invalid_state("envelope is frozen"));
        }
        let channels = self.format.channels.max(1) as usize;
        let Some(first_index) = self.envelope.add_block(samples, channels) else {
            return Ok(EnvelopeDelta {
                first_index: self.envelope.write_cursor(),
                buckets: Vec::new(),
            });
        };
        Ok(EnvelopeDelta {
            first_index,
            buckets: self.envelope.peaks()[first_index..].to_vec(),
        })
    }

    pub fn freeze_envelope(&mut self) {
        self.envelope.freeze();
    }

    /// Recompute the envelope from a stored clip and freeze it.
    pub fn rebuild_from(&mut self, clip: &mut ReadHandle) -> Result<()> {
        let format = clip.format();
        let total = clip.clip().frames;
        self.reset_for_capture(format);

        let mut start = 0u64;
        while start < total {
            let samples = clip.read_pcm(start, REBUILD_CHUNK_FRAMES)?;
            if samples.is_empty() {
                break;
            }
            self.envelope.add_block(&samples, format.channels as usize);
            start += samples.len() as u64 / format.channels as u64;
        }
        self.envelope.freeze();
        debug!(
            "envelope rebuilt: {} buckets for {} frames",
            self.envelope.len(),
            total
        );
        Ok(())
    }

    // ---- viewport -----------------------------------------------------------------

    /// Change zoom, keeping the cursor on the same instant.
    pub fn set_zoom(&mut self, pixels_per_second: f64) -> Result<()> {
        let cursor_ms = self.cursor_px.map(|px| self.pixels_to_millisecs(px));
        self.viewport.set_zoom(pixels_per_second)?;
        self.cursor_px = cursor_ms.map(|ms| self.millisecs_to_pixels(ms));
        let total = self.total_width_px();
        self.viewport.clamp_scroll(total);
        Ok(())
    }

    pub fn set_scroll(&mut self, px: u64) {
        let total = self.total_width_px();
        self.viewport.set_scroll(px, total);
    }

    /// Show the newest audio at the right edge.
    pub fn scroll_to_end(&mut self) {
        let total = self.total_width_px();
        self.viewport.set_scroll(u64::MAX, total);
    }

    pub fn set_visible_width(&mut self, width: u32) -> Result<()> {
        self.viewport.set_visible_width(width)?;
        let total = self.total_width_px();
        self.viewport.clamp_scroll(total);
        Ok(())
    }

    /// Peak magnitude per on-screen column for `viewport`.
    pub fn visible_buckets(&self, viewport: &ViewportState) -> VisibleBuckets<'_> {
        let pps = viewport.pixels_per_second();
        let end_px = (self.envelope.total_frames() as f64 * pps / self.rate()).ceil() as u64;
        let start_px = viewport.scroll_px();
        VisibleBuckets {
            peaks: self.envelope.peaks(),
            bucket_width: self.envelope.bucket_width() as f64,
            frames_per_px: self.rate() / pps,
            next_px: start_px,
            end_px: end_px.min(start_px + viewport.visible_width() as u64),
        }
    }

    // ---- cursor -------------------------------------------------------------------

    pub fn set_playback_cursor_pixel(&mut self, px: u64) {
        self.cursor_px = Some(px);
    }

    pub fn clear_cursor(&mut self) {
        self.cursor_px = None;
    }

    pub fn playback_cursor(&self) -> Option<u64> {
        self.cursor_px
    }

    /// Cursor column relative to the left edge, if it is on screen.
    pub fn cursor_screen_x(&self) -> Option<u32> {
        self.cursor_px.and_then(|px| self.viewport.to_screen(px))
    }

    pub fn set_play_finished(&mut self, finished: bool) {
        self.play_finished = finished;
    }

    pub fn is_play_finished(&self) -> bool {
        self.play_finished
    }
}

/// Lazily maps screen columns onto envelope buckets; each column takes the
/// loudest bucket it covers. Cloning restarts nothing, it copies the position.
#[derive(Debug, Clone)]
pub struct VisibleBuckets<'a> {
    peaks: &'a [f32],
    bucket_width: f64,
    frames_per_px: f64,
    next_px: u64,
    end_px: u64,
}

impl Iterator for VisibleBuckets<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.next_px >= self.end_px {
            return None;
        }
        let px = self.next_px;
        self.next_px += 1;

        let first_frame = px as f64 * self.frames_per_px;
        let last_frame = (px + 1) as f64 * self.frames_per_px;
        let lo = (first_frame / self.bucket_width).floor() as usize;
        let hi = ((last_frame / self.bucket_width).ceil() as usize).max(lo + 1);
        let hi = hi.min(self.peaks.len());
        if lo >= hi {
            return Some(0.0);
        }
        Some(self.peaks[lo..hi].iter().copied().fold(0.0, f32::max))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end_px.saturating_sub(self.next_px) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for VisibleBuckets<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_frames(frames: usize) -> WaveformModel {
        let mut m = WaveformModel::default();
        m.reset_for_capture(PcmFormat::capture());
        m.update_envelope(&vec![8_192i16; frames]).unwrap();
        m
    }

    #[test]
    fn pixel_sample_conversions_invert() {
        let mut m = WaveformModel::default();
        for zoom in [1.0, 37.0, 100.0, 333.3, MAX_PIXELS_PER_SECOND] {
            m.set_zoom(zoom).unwrap();
            for px in 0..2_000u64 {
                let back = m.samples_to_pixels(m.pixels_to_samples(px));
                assert!(back.abs_diff(px) <= 1, "zoom {zoom} px {px} -> {back}");
                let back = m.millisecs_to_pixels(m.pixels_to_millisecs(px));
                assert!(back.abs_diff(px) <= 1, "zoom {zoom} px {px} -> {back}");
            }
        }
    }

    #[test]
    fn empty_clip_has_no_duration() {
        let m = WaveformModel::default();
        assert_eq!(m.total_duration_ms(), 0);
        assert_eq!(m.total_width_px(), 0);
        assert_eq!(m.visible_buckets(m.viewport()).count(), 0);
    }

    #[test]
    fn delta_reports_rewritten_partial_bucket() {
        let mut m = WaveformModel::default();
        let d = m.update_envelope(&[100; 100]).unwrap();
        assert_eq!(d.first_index, 0);
        assert_eq!(d.buckets.len(), 1);
        let d = m.update_envelope(&[16_384; 100]).unwrap();
        assert_eq!(d.first_index, 0);
        assert_eq!(d.buckets, vec![0.5, 0.5]);
    }

    #[test]
    fn frozen_envelope_rejects_updates() {
        let mut m = model_with_frames(160);
        m.freeze_envelope();
        assert!(matches!(m.update_envelope(&[1]), Err(WaveError::InvalidState(_))));
    }

    #[test]
    fn visible_buckets_follow_scroll_and_stop_at_content_end() {
        // 5 s at 100 px/s is 500 px; 120 visible
        let mut m = model_with_frames(80_000);
        assert_eq!(m.visible_buckets(m.viewport()).len(), 120);
        m.set_scroll(450);
        assert_eq!(m.viewport().scroll_px(), 380);
        let cols: Vec<f32> = m.visible_buckets(m.viewport()).collect();
        assert_eq!(cols.len(), 120);
        assert!(cols.iter().all(|&v| v == 0.25));

        // a wider viewport than the content stops at the last bucket
        m.set_visible_width(800).unwrap();
        assert_eq!(m.viewport().scroll_px(), 0);
        assert_eq!(m.visible_buckets(m.viewport()).count(), 500);
    }

    #[test]
    fn visible_buckets_can_be_walked_twice() {
        let m = model_with_frames(4_000);
        let it = m.visible_buckets(m.viewport());
        let a: Vec<f32> = it.clone().collect();
        let b: Vec<f32> = it.collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 25);
    }

    #[test]
    fn zooming_out_merges_buckets() {
        let mut m = WaveformModel::default();
        m.update_envelope(&[0; 160]).unwrap();
        m.update_envelope(&[i16::MAX; 160]).unwrap();
        m.set_zoom(50.0).unwrap();
        let cols: Vec<f32> = m.visible_buckets(m.viewport()).collect();
        assert_eq!(cols.len(), 1);
        assert!(cols[0] > 0.99);
    }

    #[test]
    fn zoom_keeps_cursor_on_the_same_instant() {
        let mut m = model_with_frames(32_000);
        m.set_playback_cursor_pixel(150);
        m.set_zoom(200.0).unwrap();
        assert_eq!(m.playback_cursor(), Some(300));
        assert_eq!(m.pixels_to_millisecs(300), 1_500);
    }

    #[test]
    fn scroll_to_end_shows_the_tail() {
        let mut m = model_with_frames(48_000);
        m.scroll_to_end();
        assert_eq!(m.viewport().scroll_px(), 300 - 120);
        m.set_playback_cursor_pixel(299);
        assert_eq!(m.cursor_screen_x(), Some(119));
    }
}
