// src/waveform/viewport.rs

use crate::error::{Result, WaveError};

pub const MIN_PIXELS_PER_SECOND: f64 = 1.0;
/// One pixel per millisecond; beyond this the ms and pixel grids stop lining up.
pub const MAX_PIXELS_PER_SECOND: f64 = 1000.0;

/// Zoom, scroll and drawing-area geometry for one waveform view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pixels_per_second: f64,
    scroll_px: u64,
    visible_width: u32,
    height: u32,
    line_offset: u32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            pixels_per_second: 100.0,
            scroll_px: 0,
            visible_width: 120,
            height: 20,
            line_offset: 2,
        }
    }
}

impl ViewportState {
    pub fn new(pixels_per_second: f64, visible_width: u32, height: u32, line_offset: u32) -> Result<Self> {
        let mut vp = Self {
            height,
            line_offset: line_offset.min(height.saturating_sub(1)),
            ..Self::default()
        };
        vp.set_zoom(pixels_per_second)?;
        vp.set_visible_width(visible_width)?;
        Ok(vp)
    }

    pub fn pixels_per_second(&self) -> f64 {
        self.pixels_per_second
    }

    pub fn scroll_px(&self) -> u64 {
        self.scroll_px
    }

    pub fn visible_width(&self) -> u32 {
        self.visible_width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn line_offset(&self) -> u32 {
        self.line_offset
    }

    /// Clamped to the supported zoom range; non-positive values are rejected.
    pub fn set_zoom(&mut self, pixels_per_second: f64) -> Result<()> {
        if !(pixels_per_second.is_finite() && pixels_per_second > 0.0) {
            return Err(WaveError::invalid_state(format!(
                "zoom must be positive, got {pixels_per_second}"
            )));
        }
        self.pixels_per_second = pixels_per_second.clamp(MIN_PIXELS_PER_SECOND, MAX_PIXELS_PER_SECOND);
        Ok(())
    }

    pub fn set_visible_width(&mut self, width: u32) -> Result<()> {
        if width == 0 {
            return Err(WaveError::invalid_state("visible width must be positive"));
        }
        self.visible_width = width;
        Ok(())
    }

    pub fn max_scroll(&self, total_width: u64) -> u64 {
        total_width.saturating_sub(self.visible_width as u64)
    }

    pub fn set_scroll(&mut self, px: u64, total_width: u64) {
        self.scroll_px = px.min(self.max_scroll(total_width));
    }

    pub fn clamp_scroll(&mut self, total_width: u64) {
        self.set_scroll(self.scroll_px, total_width);
    }

    /// Row of the zero line inside the drawing area.
    pub fn baseline(&self) -> u32 {
        self.line_offset + (self.height - self.line_offset) / 2
    }

    /// Rows (top, bottom) a bucket of `magnitude` covers, inclusive.
    pub fn bar_span(&self, magnitude: f32) -> (u32, u32) {
        let half = (self.height - self.line_offset) as f32 / 2.0;
        let extent = (magnitude.clamp(0.0, 1.0) * half).round() as u32;
        let base = self.baseline();
        let top = base.saturating_sub(extent).max(self.line_offset);
        let bottom = (base + extent).min(self.height.saturating_sub(1));
        (top, bottom)
    }

    /// Screen column of a content pixel, if it is in view.
    pub fn to_screen(&self, content_px: u64) -> Option<u32> {
        let x = content_px.checked_sub(self.scroll_px)?;
        (x < self.visible_width as u64).then_some(x as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_is_clamped_to_content() {
        let mut vp = ViewportState::default();
        vp.set_scroll(1_000, 300);
        assert_eq!(vp.scroll_px(), 180);
        vp.set_scroll(50, 100);
        assert_eq!(vp.scroll_px(), 0);
    }

    #[test]
    fn zoom_rejects_zero_and_clamps_extremes() {
        let mut vp = ViewportState::default();
        assert!(vp.set_zoom(0.0).is_err());
        assert!(vp.set_zoom(f64::NAN).is_err());
        vp.set_zoom(1e9).unwrap();
        assert_eq!(vp.pixels_per_second(), MAX_PIXELS_PER_SECOND);
    }

    #[test]
    fn bars_stay_inside_the_drawing_area() {
        let vp = ViewportState::new(100.0, 120, 20, 2).unwrap();
        assert_eq!(vp.baseline(), 11);
        assert_eq!(vp.bar_span(0.0), (11, 11));
        let (top, bottom) = vp.bar_span(1.0);
        assert_eq!(top, 2);
        assert_eq!(bottom, 19);
    }

    #[test]
    fn screen_mapping_honours_scroll() {
        let mut vp = ViewportState::default();
        vp.set_scroll(40, 1_000);
        assert_eq!(vp.to_screen(39), None);
        assert_eq!(vp.to_screen(45), Some(5));
        assert_eq!(vp.to_screen(160), None);
    }
}
