// src/controller.rs

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{error, info};

use crate::capture::CaptureEngine;
use crate::config::WaveConfig;
use crate::device::{InputBackend, OutputBackend};
use crate::error::{Result, WaveError};
use crate::notify::WaveListener;
use crate::playback::{PlaybackCursor, PlaybackEngine, PlaybackState};
use crate::store::{AudioClip, SampleStore};
use crate::sync::{SyncLoop, TickOutcome};
use crate::waveform::{ViewportState, WaveformModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveMode {
    Idle,
    Recording,
    Playback(PlaybackState),
}

/// The caller-facing surface: recording and playback are exclusive modes
/// over one shared waveform model.
pub struct WaveController {
    config: WaveConfig,
    store: SampleStore,
    model: Arc<Mutex<WaveformModel>>,
    listener: Arc<dyn WaveListener>,
    input: Arc<dyn InputBackend>,
    capture: Option<CaptureEngine>,
    playback: PlaybackEngine,
    sync: SyncLoop,
}

impl WaveController {
    pub fn new(
        config: WaveConfig,
        input: Arc<dyn InputBackend>,
        output: Arc<dyn OutputBackend>,
        listener: Arc<dyn WaveListener>,
    ) -> Result<Self> {
        config.validate()?;
        let viewport = ViewportState::new(
            config.pixels_per_second,
            config.visible_width,
            config.view_height,
            config.line_offset,
        )?;
        let store = SampleStore::new();
        Ok(Self {
            model: Arc::new(Mutex::new(WaveformModel::new(viewport))),
            playback: PlaybackEngine::new(store.clone(), output),
            sync: SyncLoop::new(config.tick_period()),
            store,
            listener,
            input,
            capture: None,
            config,
        })
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Shared handle for renderers.
    pub fn model(&self) -> Arc<Mutex<WaveformModel>> {
        self.model.clone()
    }

    fn lock_model(&self) -> MutexGuard<'_, WaveformModel> {
        self.model.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn mode(&self) -> WaveMode {
        if self.is_recording() {
            return WaveMode::Recording;
        }
        if self.playback.is_loaded() {
            WaveMode::Playback(self.playback.state())
        } else {
            WaveMode::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.capture.as_ref().is_some_and(CaptureEngine::is_recording)
    }

    pub fn playback_cursor(&self) -> PlaybackCursor {
        self.playback.cursor()
    }

    // ---- recording --------------------------------------------------------------

    /// Stops and unloads any playback first; the two never overlap.
    pub fn start_recording(&mut self, path: &Path) -> Result<()> {
        if self.is_recording() {
            return Err(WaveError::invalid_state("already recording"));
        }
        self.sync.stop();
        self.playback.unload();
        self.lock_model().clear_cursor();
        // a previous session that died on an error still holds its join handle
        if let Some(mut old) = self.capture.take() {
            old.stop()?;
        }

        let mut engine = CaptureEngine::new(self.store.clone(), self.model.clone(), self.listener.clone());
        engine.start(self.input.as_ref(), self.config.capture_buffer_hint, path)?;
        self.capture = Some(engine);
        self.listener.on_redraw_requested();
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<Option<AudioClip>> {
        let mut engine = self
            .capture
            .take()
            .ok_or_else(|| WaveError::invalid_state("not recording"))?;
        let clip = engine.stop()?;
        if let Some(c) = &clip {
            info!("recorded {} ({} ms)", c.path.display(), c.duration_ms());
        }
        self.listener.on_redraw_requested();
        Ok(clip)
    }

    // ---- playback ---------------------------------------------------------------

    /// Load `path` for playback and rebuild the waveform from it.
    pub fn load_clip(&mut self, path: &Path) -> Result<AudioClip> {
        if self.is_recording() {
            return Err(WaveError::invalid_state("cannot load while recording"));
        }
        self.sync.stop();
        let clip = self.playback.load(path)?;

        let rebuilt = {
            let mut model = self.model.lock().unwrap_or_else(|p| p.into_inner());
            self.playback.with_clip(|handle| model.rebuild_from(handle))
        };
        if let Err(e) = rebuilt {
            self.playback.unload();
            return Err(e);
        }

        self.listener.on_status("loaded wave file.");
        self.listener.on_redraw_requested();
        Ok(clip)
    }

    pub fn play(&mut self, start_ms: u64) -> Result<()> {
        if self.is_recording() {
            return Err(WaveError::invalid_state("cannot play while recording"));
        }
        self.playback.pause();
        self.playback.seek_to(start_ms)?;
        self.playback.start()?;
        self.lock_model().set_play_finished(false);
        self.sync.start();
        Ok(())
    }

    pub fn play_from_pixel(&mut self, px: u64) -> Result<()> {
        let ms = self.lock_model().pixels_to_millisecs(px);
        self.play(ms)
    }

    pub fn pause(&mut self) {
        self.playback.pause();
        self.sync.stop();
    }

    /// Continue from a pause; from `Finished` this starts over.
    pub fn resume(&mut self) -> Result<()> {
        match self.playback.state() {
            PlaybackState::Playing => Ok(()),
            _ => {
                self.playback.start()?;
                self.lock_model().set_play_finished(false);
                self.sync.start();
                Ok(())
            }
        }
    }

    pub fn stop(&mut self) {
        self.sync.stop();
        self.playback.stop();
        self.lock_model().clear_cursor();
        self.listener.on_redraw_requested();
    }

    /// Jump to `ms`. The cursor moves at once so no stale position is drawn.
    pub fn seek(&mut self, ms: u64) -> Result<u64> {
        let target = self.playback.seek_to(ms)?;
        let px = {
            let mut model = self.lock_model();
            let px = model.millisecs_to_pixels(target);
            model.set_playback_cursor_pixel(px);
            px
        };
        self.listener.on_cursor_moved(px);
        self.listener.on_redraw_requested();
        Ok(target)
    }

    // ---- view -------------------------------------------------------------------

    pub fn set_zoom(&mut self, pixels_per_second: f64) -> Result<()> {
        self.lock_model().set_zoom(pixels_per_second)?;
        self.listener.on_redraw_requested();
        Ok(())
    }

    pub fn set_scroll(&mut self, px: u64) {
        self.lock_model().set_scroll(px);
        self.listener.on_redraw_requested();
    }

    // ---- scheduling -------------------------------------------------------------

    /// Run the sync loop if a tick is due at `now`.
    pub fn run_tick(&mut self, now: Instant) -> TickOutcome {
        if !self.sync.due(now) {
            return TickOutcome::Idle;
        }
        let mut model = self.model.lock().unwrap_or_else(|p| p.into_inner());
        self.sync
            .tick(now, &mut self.playback, &mut model, self.listener.as_ref())
    }

    pub fn time_until_next_tick(&self, now: Instant) -> Option<Duration> {
        self.sync.time_until_next(now)
    }
}

impl Drop for WaveController {
    fn drop(&mut self) {
        if let Some(mut engine) = self.capture.take() {
            if let Err(e) = engine.stop() {
                error!("capture stop on drop: {e}");
            }
        }
        self.sync.stop();
        self.playback.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{ManualOutputBackend, ScriptedInputBackend, SimClock};
    use crate::notify::NullListener;

    fn controller(dir: &Path) -> WaveController {
        let config = WaveConfig {
            data_dir: dir.to_path_buf(),
            ..WaveConfig::default()
        };
        WaveController::new(
            config,
            Arc::new(ScriptedInputBackend::new(vec![vec![0u8; 320]])),
            Arc::new(ManualOutputBackend::new(SimClock::new())),
            Arc::new(NullListener),
        )
        .unwrap()
    }

    #[test]
    fn play_without_clip_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(dir.path());
        assert!(matches!(c.play(0), Err(WaveError::InvalidState(_))));
        assert!(matches!(c.seek(10), Err(WaveError::InvalidState(_))));
        assert_eq!(c.mode(), WaveMode::Idle);
    }

    #[test]
    fn recording_releases_the_playback_lease() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(dir.path());
        let path = c.config().recording_path();

        c.start_recording(&path).unwrap();
        assert_eq!(c.mode(), WaveMode::Recording);
        assert!(matches!(c.load_clip(&path), Err(WaveError::InvalidState(_))));
        c.stop_recording().unwrap();

        c.load_clip(&path).unwrap();
        assert!(c.store().lease_held(&path).is_some());
        // recording again over the loaded file drops the read lease first
        c.start_recording(&path).unwrap();
        assert_eq!(c.mode(), WaveMode::Recording);
        c.stop_recording().unwrap();
    }

    #[test]
    fn stop_recording_when_idle_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(dir.path());
        assert!(matches!(c.stop_recording(), Err(WaveError::InvalidState(_))));
    }

    #[test]
    fn dropping_while_recording_finalizes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(dir.path());
        let path = c.config().recording_path();
        let store = c.store().clone();
        c.start_recording(&path).unwrap();
        drop(c);

        assert_eq!(store.lease_held(&path), None);
        let r = store.open_for_read(&path).unwrap();
        assert!(r.clip().frames <= 160);
    }
}
