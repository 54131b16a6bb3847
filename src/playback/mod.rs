// src/playback/mod.rs

mod feeder;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};

use crate::device::OutputBackend;
use crate::error::{Result, WaveError};
use crate::store::{AudioClip, ReadHandle, SampleStore};
use feeder::{Feeder, SharedClip, SharedDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    Finished,
}

/// Snapshot of where playback is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub elapsed_ms: u64,
    pub total_ms: u64,
    pub state: PlaybackState,
}

/// Result of one `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTick {
    pub position_ms: u64,
    /// True on exactly the poll that moved the engine to `Finished`.
    pub just_finished: bool,
}

/// Streams one loaded clip to an output device.
pub struct PlaybackEngine {
    store: SampleStore,
    backend: Arc<dyn OutputBackend>,
    clip: Option<SharedClip>,
    info: Option<AudioClip>,
    device: Option<SharedDevice>,
    feeder: Option<Feeder>,
    state: PlaybackState,
    // position while not playing
    held_ms: u64,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl PlaybackEngine {
    pub fn new(store: SampleStore, backend: Arc<dyn OutputBackend>) -> Self {
        Self {
            store,
            backend,
            clip: None,
            info: None,
            device: None,
            feeder: None,
            state: PlaybackState::Stopped,
            held_ms: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn clip(&self) -> Option<&AudioClip> {
        self.info.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.clip.is_some()
    }

    pub fn total_ms(&self) -> u64 {
        self.info.as_ref().map_or(0, AudioClip::duration_ms)
    }

    /// Open `path` for reading, replacing whatever was loaded.
    pub fn load(&mut self, path: &Path) -> Result<AudioClip> {
        self.unload();
        let handle = self.store.open_for_read(path)?;
        let info = handle.clip().clone();
        info!(
            "loaded {} ({} ms, {} ch)",
            path.display(),
            info.duration_ms(),
            info.format.channels
        );
        self.clip = Some(Arc::new(Mutex::new(handle)));
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Stop and give the read lease back.
    pub fn unload(&mut self) {
        self.stop();
        self.clip = None;
        self.info = None;
    }

    /// Run `f` with the loaded clip's reader.
    pub fn with_clip<R>(&self, f: impl FnOnce(&mut ReadHandle) -> Result<R>) -> Result<R> {
        let clip = self
            .clip
            .as_ref()
            .ok_or_else(|| WaveError::invalid_state("no clip loaded"))?;
        f(&mut lock(clip))
    }

    /// Begin or resume playback from the held position. Restarts from zero
    /// after `Finished`; pauses first when already playing.
    pub fn start(&mut self) -> Result<()> {
        let (clip, info) = match (&self.clip, &self.info) {
            (Some(c), Some(i)) => (c.clone(), i.clone()),
            _ => return Err(WaveError::invalid_state("start before load")),
        };
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Finished => self.held_ms = 0,
            _ => {}
        }

        let device = match &self.device {
            Some(d) => d.clone(),
            None => {
                let d: SharedDevice = Arc::new(Mutex::new(self.backend.open_output(&info.format)?));
                self.device = Some(d.clone());
                d
            }
        };

        if let Err(e) = self.stream_from(clip, device, self.held_ms) {
            self.stop();
            return Err(e);
        }
        self.state = PlaybackState::Playing;
        info!("playing from {} ms", self.held_ms);
        Ok(())
    }

    /// Re-base the device at `ms`, prime it and let it run.
    fn stream_from(&mut self, clip: SharedClip, device: SharedDevice, ms: u64) -> Result<()> {
        self.halt_feeder();
        let start_frame = {
            let mut dev = lock(&device);
            dev.pause();
            dev.seek(ms);
            self.info.as_ref().map_or(0, |i| i.format.ms_to_frames(ms))
        };
        self.feeder = Some(Feeder::start(clip, device.clone(), start_frame)?);
        lock(&device).play()
    }

    fn halt_feeder(&mut self) {
        if let Some(mut f) = self.feeder.take() {
            f.halt();
        }
    }

    /// Halt the device but keep it open. No-op unless playing.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.held_ms = self.device_position();
        self.halt_feeder();
        if let Some(d) = &self.device {
            lock(d).pause();
        }
        self.state = PlaybackState::Paused;
        info!("paused at {} ms", self.held_ms);
    }

    /// Close the device and rewind to zero. Valid from any state.
    pub fn stop(&mut self) {
        self.halt_feeder();
        if let Some(d) = self.device.take() {
            lock(&d).close();
        }
        if self.state != PlaybackState::Stopped {
            info!("playback stopped");
        }
        self.state = PlaybackState::Stopped;
        self.held_ms = 0;
    }

    /// Move to `ms`, clamped to the clip. While playing the stream restarts
    /// there before this returns.
    pub fn seek_to(&mut self, ms: u64) -> Result<u64> {
        let clip = self
            .clip
            .clone()
            .ok_or_else(|| WaveError::invalid_state("seek before load"))?;
        let target = ms.min(self.total_ms());

        match self.state {
            PlaybackState::Playing => {
                let device = self
                    .device
                    .clone()
                    .ok_or_else(|| WaveError::invalid_state("playing without a device"))?;
                self.held_ms = target;
                if let Err(e) = self.stream_from(clip, device, target) {
                    self.stop();
                    return Err(e);
                }
            }
            PlaybackState::Finished => {
                self.held_ms = target;
                self.state = PlaybackState::Paused;
            }
            PlaybackState::Paused | PlaybackState::Stopped => self.held_ms = target,
        }
        info!("seek to {target} ms");
        Ok(target)
    }

    fn device_position(&self) -> u64 {
        let pos = match &self.device {
            Some(d) => lock(d).position_ms(),
            None => self.held_ms,
        };
        pos.min(self.total_ms())
    }

    /// Elapsed time; only moves while playing.
    pub fn current_position_ms(&self) -> u64 {
        match self.state {
            PlaybackState::Playing => self.device_position(),
            PlaybackState::Finished => self.total_ms(),
            PlaybackState::Paused | PlaybackState::Stopped => self.held_ms,
        }
    }

    /// Sample the position and detect the end of the clip. Feed errors from
    /// the background thread surface here and stop playback.
    pub fn poll(&mut self) -> Result<PlaybackTick> {
        if let Some(e) = self.feeder.as_ref().and_then(Feeder::take_failure) {
            self.stop();
            return Err(e);
        }
        if self.state != PlaybackState::Playing {
            return Ok(PlaybackTick {
                position_ms: self.current_position_ms(),
                just_finished: false,
            });
        }

        let total = self.total_ms();
        let position = self.device_position();
        let eof = self.feeder.as_ref().is_some_and(Feeder::reached_eof);
        let drained = eof && self.device.as_ref().is_some_and(|d| lock(d).is_drained());
        if position >= total || drained {
            self.finish();
            return Ok(PlaybackTick {
                position_ms: total,
                just_finished: true,
            });
        }
        Ok(PlaybackTick {
            position_ms: position,
            just_finished: false,
        })
    }

    fn finish(&mut self) {
        self.halt_feeder();
        if let Some(d) = &self.device {
            lock(d).pause();
        }
        self.held_ms = self.total_ms();
        self.state = PlaybackState::Finished;
        info!("playback finished");
    }

    pub fn cursor(&self) -> PlaybackCursor {
        PlaybackCursor {
            elapsed_ms: self.current_position_ms(),
            total_ms: self.total_ms(),
            state: self.state,
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if self.state == PlaybackState::Playing {
            warn!("playback engine dropped while playing");
        }
        self.stop();
    }
}
