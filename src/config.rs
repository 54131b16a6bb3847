// src/config.rs

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WaveError};

/// Display and storage settings. The capture format is fixed and lives in `format`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WaveConfig {
    pub data_dir: PathBuf,
    pub file_stem: String,
    /// Initial zoom.
    pub pixels_per_second: f64,
    pub visible_width: u32,
    pub view_height: u32,
    /// Rows reserved above the waveform (time ruler).
    pub line_offset: u32,
    pub tick_period_ms: u64,
    /// Requested capture buffer in bytes; 0 takes the device minimum.
    pub capture_buffer_hint: usize,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("record"),
            file_stem: "test".to_string(),
            pixels_per_second: 100.0,
            visible_width: 120,
            view_height: 20,
            line_offset: 2,
            tick_period_ms: 10,
            capture_buffer_hint: 0,
        }
    }
}

impl WaveConfig {
    pub fn load_from_disk(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)
            .map_err(|e| WaveError::Format(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).map_err(std::io::Error::other)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pixels_per_second.is_finite() && self.pixels_per_second > 0.0) {
            return Err(WaveError::invalid_state("pixels_per_second must be > 0"));
        }
        if self.visible_width == 0 {
            return Err(WaveError::invalid_state("visible_width must be > 0"));
        }
        if self.tick_period_ms == 0 {
            return Err(WaveError::invalid_state("tick_period_ms must be > 0"));
        }
        if self.line_offset >= self.view_height {
            return Err(WaveError::invalid_state("line_offset must leave room for the waveform"));
        }
        Ok(())
    }

    pub fn recording_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.wav", self.file_stem))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: WaveConfig = serde_json::from_str(r#"{ "file_stem": "take2" }"#).unwrap();
        assert_eq!(cfg.file_stem, "take2");
        assert_eq!(cfg.tick_period_ms, 10);
        assert_eq!(cfg.recording_path(), PathBuf::from("record").join("take2.wav"));
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.json");
        let cfg = WaveConfig {
            pixels_per_second: 250.0,
            visible_width: 80,
            ..WaveConfig::default()
        };
        cfg.save_to_disk(&path).unwrap();
        assert_eq!(WaveConfig::load_from_disk(&path).unwrap(), cfg);
    }

    #[test]
    fn zero_zoom_is_rejected() {
        let cfg = WaveConfig {
            pixels_per_second: 0.0,
            ..WaveConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
