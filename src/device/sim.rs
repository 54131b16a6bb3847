// src/device/sim.rs
//
// Devices without hardware: a microphone that replays scripted chunks and a
// speaker whose clock only moves when told to.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::device::{InputBackend, InputDevice, OutputBackend, OutputDevice};
use crate::error::{Result, WaveError};
use crate::format::PcmFormat;

#[derive(Debug, Clone)]
enum OpenFailure {
    Unavailable(String),
    Denied(String),
}

impl OpenFailure {
    fn to_error(&self) -> WaveError {
        match self {
            OpenFailure::Unavailable(m) => WaveError::DeviceUnavailable(m.clone()),
            OpenFailure::Denied(m) => WaveError::PermissionDenied(m.clone()),
        }
    }
}

/// Observes a scripted input from the test side.
#[derive(Clone, Default)]
pub struct InputProbe {
    opened: Arc<AtomicUsize>,
    open_now: Arc<AtomicBool>,
    chunks_read: Arc<AtomicUsize>,
}

impl InputProbe {
    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn chunks_read(&self) -> usize {
        self.chunks_read.load(Ordering::SeqCst)
    }
}

/// Replays a fixed list of PCM chunks, one per read, then reports no data.
pub struct ScriptedInputBackend {
    chunks: Vec<Vec<u8>>,
    fail_after: Option<usize>,
    open_failure: Option<OpenFailure>,
    probe: InputProbe,
}

impl ScriptedInputBackend {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            fail_after: None,
            open_failure: None,
            probe: InputProbe::default(),
        }
    }

    /// The read after `n` chunks fails as if the microphone was unplugged.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn denied() -> Self {
        let mut b = Self::new(Vec::new());
        b.open_failure = Some(OpenFailure::Denied("microphone access denied".into()));
        b
    }

    pub fn unavailable() -> Self {
        let mut b = Self::new(Vec::new());
        b.open_failure = Some(OpenFailure::Unavailable("no input device".into()));
        b
    }

    pub fn probe(&self) -> InputProbe {
        self.probe.clone()
    }
}

impl InputBackend for ScriptedInputBackend {
    fn open_input(&self, _format: &PcmFormat) -> Result<Box<dyn InputDevice>> {
        if let Some(f) = &self.open_failure {
            return Err(f.to_error());
        }
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        self.probe.open_now.store(true, Ordering::SeqCst);
        Ok(Box::new(ScriptedInput {
            chunks: self.chunks.clone(),
            next: 0,
            fail_after: self.fail_after,
            probe: self.probe.clone(),
        }))
    }
}

struct ScriptedInput {
    chunks: Vec<Vec<u8>>,
    next: usize,
    fail_after: Option<usize>,
    probe: InputProbe,
}

impl InputDevice for ScriptedInput {
    fn request_buffer(&mut self, min_hint: usize) -> usize {
        let largest = self.chunks.iter().map(Vec::len).max().unwrap_or(0);
        min_hint.max(largest).max(2)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.fail_after.is_some_and(|n| self.next >= n) {
            return Err(WaveError::DeviceUnavailable("input device disconnected".into()));
        }
        let Some(chunk) = self.chunks.get(self.next) else {
            thread::sleep(Duration::from_millis(2));
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.next += 1;
        self.probe.chunks_read.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    fn close(&mut self) {
        self.probe.open_now.store(false, Ordering::SeqCst);
    }
}

/// Milliseconds of simulated wall time, advanced by hand.
#[derive(Clone, Default)]
pub struct SimClock {
    ms: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct SimSpeaker {
    format: PcmFormat,
    open: bool,
    playing: bool,
    base_ms: u64,
    queued_frames: u64,
    played_frames: u64,
    last_clock_ms: u64,
    times_opened: usize,
    end_of_stream: bool,
    unplugged: bool,
}

impl SimSpeaker {
    /// Consume queued audio for the clock time passed while playing.
    fn catch_up(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_clock_ms);
        self.last_clock_ms = now_ms;
        if self.playing {
            let frames = self.format.ms_to_frames(elapsed);
            self.played_frames = (self.played_frames + frames).min(self.queued_frames);
        }
    }
}

/// Test-side view of the simulated speaker.
#[derive(Clone)]
pub struct OutputProbe {
    speaker: Arc<Mutex<SimSpeaker>>,
}

impl OutputProbe {
    fn speaker(&self) -> MutexGuard<'_, SimSpeaker> {
        self.speaker.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.speaker().open
    }

    pub fn is_playing(&self) -> bool {
        self.speaker().playing
    }

    pub fn times_opened(&self) -> usize {
        self.speaker().times_opened
    }

    pub fn buffered_ms(&self) -> u64 {
        let s = self.speaker();
        s.format.frames_to_ms(s.queued_frames - s.played_frames)
    }

    pub fn saw_end_of_stream(&self) -> bool {
        self.speaker().end_of_stream
    }

    /// Every later write fails as if the speaker was disconnected.
    pub fn unplug(&self) {
        self.speaker().unplugged = true;
    }
}

/// Speaker that plays only as fast as a `SimClock` moves and buffers at most
/// `capacity_ms` ahead.
pub struct ManualOutputBackend {
    clock: SimClock,
    capacity_ms: u64,
    open_failure: Option<OpenFailure>,
    speaker: Arc<Mutex<SimSpeaker>>,
}

impl ManualOutputBackend {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            capacity_ms: 500,
            open_failure: None,
            speaker: Arc::new(Mutex::new(SimSpeaker::default())),
        }
    }

    pub fn with_capacity_ms(mut self, ms: u64) -> Self {
        self.capacity_ms = ms;
        self
    }

    pub fn unavailable(clock: SimClock) -> Self {
        let mut b = Self::new(clock);
        b.open_failure = Some(OpenFailure::Unavailable("no output device".into()));
        b
    }

    pub fn probe(&self) -> OutputProbe {
        OutputProbe {
            speaker: self.speaker.clone(),
        }
    }
}

impl OutputBackend for ManualOutputBackend {
    fn open_output(&self, format: &PcmFormat) -> Result<Box<dyn OutputDevice>> {
        if let Some(f) = &self.open_failure {
            return Err(f.to_error());
        }
        {
            let mut s = self.speaker.lock().unwrap_or_else(|p| p.into_inner());
            let times_opened = s.times_opened + 1;
            *s = SimSpeaker {
                format: *format,
                open: true,
                last_clock_ms: self.clock.now_ms(),
                times_opened,
                ..SimSpeaker::default()
            };
        }
        Ok(Box::new(ManualOutput {
            clock: self.clock.clone(),
            capacity_frames: format.ms_to_frames(self.capacity_ms),
            speaker: self.speaker.clone(),
        }))
    }
}

struct ManualOutput {
    clock: SimClock,
    capacity_frames: u64,
    speaker: Arc<Mutex<SimSpeaker>>,
}

impl ManualOutput {
    fn speaker(&self) -> MutexGuard<'_, SimSpeaker> {
        let mut s = self.speaker.lock().unwrap_or_else(|p| p.into_inner());
        s.catch_up(self.clock.now_ms());
        s
    }
}

impl OutputDevice for ManualOutput {
    fn write(&mut self, pcm: &[i16]) -> Result<usize> {
        let capacity = self.capacity_frames;
        let mut s = self.speaker();
        if !s.open {
            return Err(WaveError::invalid_state("write to a closed device"));
        }
        if s.unplugged {
            return Err(WaveError::DeviceUnavailable("output device disconnected".into()));
        }
        let channels = s.format.channels.max(1) as u64;
        let offered = pcm.len() as u64 / channels;
        let room = capacity.saturating_sub(s.queued_frames - s.played_frames);
        let accepted = offered.min(room);
        s.queued_frames += accepted;
        Ok(accepted as usize)
    }

    fn play(&mut self) -> Result<()> {
        self.speaker().playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.speaker().playing = false;
    }

    fn seek(&mut self, ms: u64) {
        let mut s = self.speaker();
        s.base_ms = ms;
        s.queued_frames = 0;
        s.played_frames = 0;
        s.end_of_stream = false;
    }

    fn position_ms(&mut self) -> u64 {
        let s = self.speaker();
        s.base_ms + s.format.frames_to_ms(s.played_frames)
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.speaker().end_of_stream = true;
        Ok(())
    }

    fn is_drained(&mut self) -> bool {
        let s = self.speaker();
        s.played_frames == s.queued_frames
    }

    fn close(&mut self) {
        let mut s = self.speaker();
        s.open = false;
        s.playing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_output_plays_only_what_was_queued() {
        let clock = SimClock::new();
        let backend = ManualOutputBackend::new(clock.clone()).with_capacity_ms(100);
        let mut dev = backend.open_output(&PcmFormat::capture()).unwrap();

        // 100 ms fits, the rest is refused
        assert_eq!(dev.write(&vec![0i16; 3200]).unwrap(), 1600);
        dev.play().unwrap();
        clock.advance(250);
        assert_eq!(dev.position_ms(), 100);
        assert!(dev.is_drained());
    }

    #[test]
    fn manual_output_seek_rebases_position() {
        let clock = SimClock::new();
        let backend = ManualOutputBackend::new(clock.clone());
        let mut dev = backend.open_output(&PcmFormat::capture()).unwrap();
        dev.write(&vec![0i16; 1600]).unwrap();
        dev.play().unwrap();
        clock.advance(40);
        assert_eq!(dev.position_ms(), 40);
        dev.seek(700);
        assert_eq!(dev.position_ms(), 700);
        assert_eq!(backend.probe().buffered_ms(), 0);
    }

    #[test]
    fn paused_speaker_does_not_advance() {
        let clock = SimClock::new();
        let backend = ManualOutputBackend::new(clock.clone());
        let mut dev = backend.open_output(&PcmFormat::capture()).unwrap();
        dev.write(&vec![0i16; 1600]).unwrap();
        clock.advance(50);
        assert_eq!(dev.position_ms(), 0);
    }

    #[test]
    fn scripted_input_replays_then_idles() {
        let backend = ScriptedInputBackend::new(vec![vec![1, 0, 2, 0]]);
        let mut dev = backend.open_input(&PcmFormat::capture()).unwrap();
        let mut buf = vec![0u8; dev.request_buffer(0)];
        assert_eq!(dev.read_into(&mut buf).unwrap(), 4);
        assert_eq!(dev.read_into(&mut buf).unwrap(), 0);
        dev.close();
        assert!(!backend.probe().is_open());
    }
}
