// src/capture/mod.rs

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::device::{InputBackend, InputDevice};
use crate::error::{Result, WaveError};
use crate::format::PcmFormat;
use crate::notify::WaveListener;
use crate::store::{AudioClip, SampleStore, WriteHandle};
use crate::waveform::WaveformModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Stopped,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CaptureState::Idle,
            1 => CaptureState::Recording,
            _ => CaptureState::Stopped,
        }
    }
}

/// One recording session: microphone -> WAV file + live envelope.
/// Once stopped it cannot be restarted; make a new engine.
pub struct CaptureEngine {
    store: SampleStore,
    model: Arc<Mutex<WaveformModel>>,
    listener: Arc<dyn WaveListener>,
    state: Arc<AtomicU8>,
    stop_requested: Arc<AtomicBool>,
    frames_recorded: Arc<AtomicU64>,
    worker: Option<JoinHandle<Option<AudioClip>>>,
    clip: Option<AudioClip>,
}

impl CaptureEngine {
    pub fn new(
        store: SampleStore,
        model: Arc<Mutex<WaveformModel>>,
        listener: Arc<dyn WaveListener>,
    ) -> Self {
        Self {
            store,
            model,
            listener,
            state: Arc::new(AtomicU8::new(CaptureState::Idle as u8)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            frames_recorded: Arc::new(AtomicU64::new(0)),
            worker: None,
            clip: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    pub fn recorded_ms(&self) -> u64 {
        PcmFormat::capture().frames_to_ms(self.frames_recorded.load(Ordering::Relaxed))
    }

    /// Open the microphone and the output file, then record on a background
    /// thread. Returns as soon as the thread is running.
    pub fn start(&mut self, backend: &dyn InputBackend, buffer_hint: usize, path: &Path) -> Result<()> {
        if self.state() != CaptureState::Idle {
            return Err(WaveError::invalid_state(
                "capture session already used; create a new one",
            ));
        }
        let format = PcmFormat::capture();

        // device first: a refused microphone must not leave a file behind
        let mut device = backend.open_input(&format)?;
        let writer = match self.store.begin_write(path, format) {
            Ok(w) => w,
            Err(e) => {
                device.close();
                return Err(e);
            }
        };
        let buf_size = device.request_buffer(buffer_hint);

        {
            let mut model = self.model.lock().unwrap_or_else(|p| p.into_inner());
            model.reset_for_capture(format);
        }

        let session = CaptureSession {
            device,
            writer,
            buf_size,
            model: self.model.clone(),
            listener: self.listener.clone(),
            stop_requested: self.stop_requested.clone(),
            frames_recorded: self.frames_recorded.clone(),
            state: self.state.clone(),
        };

        self.state.store(CaptureState::Recording as u8, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("wave-capture".into())
            .spawn(move || session.run());
        match handle {
            Ok(h) => self.worker = Some(h),
            Err(e) => {
                // the session went down with the closure; its writer finalizes on drop
                self.state.store(CaptureState::Stopped as u8, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        info!("recording to {} ({} byte reads)", path.display(), buf_size);
        Ok(())
    }

    /// Ask the loop to finish its current read, wait for it, and return the
    /// finalized clip. Safe to call again, or after the loop died on an error.
    pub fn stop(&mut self) -> Result<Option<AudioClip>> {
        if self.state() == CaptureState::Idle {
            return Ok(None);
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            self.clip = handle
                .join()
                .map_err(|_| WaveError::invalid_state("capture thread panicked"))?;
            self.state.store(CaptureState::Stopped as u8, Ordering::SeqCst);
        }
        Ok(self.clip.clone())
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("capture stop on drop: {e}");
        }
    }
}

/// Everything the capture thread owns.
struct CaptureSession {
    device: Box<dyn InputDevice>,
    writer: WriteHandle,
    buf_size: usize,
    model: Arc<Mutex<WaveformModel>>,
    listener: Arc<dyn WaveListener>,
    stop_requested: Arc<AtomicBool>,
    frames_recorded: Arc<AtomicU64>,
    state: Arc<AtomicU8>,
}

impl CaptureSession {
    fn run(mut self) -> Option<AudioClip> {
        let mut buf = vec![0u8; self.buf_size];
        let mut failure: Option<WaveError> = None;

        while !self.stop_requested.load(Ordering::SeqCst) {
            match self.device.read_into(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    if let Err(e) = self.handle_chunk(&buf[..n]) {
                        failure = Some(e);
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.device.close();
        let clip = match self.writer.finalize_write() {
            Ok(clip) => Some(clip),
            Err(e) => {
                failure.get_or_insert(e);
                None
            }
        };
        self.model
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .freeze_envelope();
        self.state.store(CaptureState::Stopped as u8, Ordering::SeqCst);

        if let Some(e) = failure {
            error!("capture ended: {e}");
            self.listener.on_error(e.kind(), &e.to_string());
        } else {
            debug!("capture loop exited cleanly");
        }
        clip
    }

    fn handle_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        let samples = self.writer.append_samples(bytes)?;
        let frames = self.writer.frames_written();
        self.frames_recorded.store(frames, Ordering::Relaxed);
        if samples.is_empty() {
            return Ok(());
        }

        let delta = {
            let mut model = self.model.lock().unwrap_or_else(|p| p.into_inner());
            let delta = model.update_envelope(&samples)?;
            model.scroll_to_end();
            delta
        };
        self.listener
            .on_envelope_extended(delta.first_index, &delta.buckets);
        self.listener.on_status(&format!(
            "recorded {} ms",
            PcmFormat::capture().frames_to_ms(frames)
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::ScriptedInputBackend;
    use crate::error::ErrorKind;
    use crate::notify::{ChannelListener, NullListener, WaveEvent};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn shared_model() -> Arc<Mutex<WaveformModel>> {
        Arc::new(Mutex::new(WaveformModel::default()))
    }

    #[test]
    fn records_every_chunk_then_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.wav");
        let backend = ScriptedInputBackend::new(vec![vec![0u8; 3200]; 3]);
        let probe = backend.probe();
        let model = shared_model();

        let mut engine = CaptureEngine::new(SampleStore::new(), model.clone(), Arc::new(NullListener));
        engine.start(&backend, 0, &path).unwrap();
        assert!(engine.is_recording());
        wait_until(|| probe.chunks_read() == 3);
        let clip = engine.stop().unwrap().unwrap();

        assert_eq!(clip.frames, 4_800);
        assert_eq!(clip.duration_ms(), 300);
        assert!(!probe.is_open());
        let m = model.lock().unwrap();
        assert_eq!(m.envelope().len(), 30);
        assert!(m.envelope().is_frozen());
    }

    #[test]
    fn odd_length_reads_keep_the_envelope_in_step_with_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.wav");
        let bytes = crate::format::i16_to_bytes(&vec![16_384i16; 321]);
        let (head, tail) = bytes.split_at(321);
        let backend = ScriptedInputBackend::new(vec![head.to_vec(), tail.to_vec()]);
        let probe = backend.probe();
        let model = shared_model();

        let mut engine = CaptureEngine::new(SampleStore::new(), model.clone(), Arc::new(NullListener));
        engine.start(&backend, 0, &path).unwrap();
        wait_until(|| probe.chunks_read() == 2);
        let clip = engine.stop().unwrap().unwrap();

        assert_eq!(clip.frames, 321);
        let m = model.lock().unwrap();
        assert_eq!(m.envelope().total_frames(), clip.frames);
        assert_eq!(m.envelope().len(), 3);
        assert!(m.envelope().peaks().iter().all(|&p| p == 0.5));
    }

    #[test]
    fn stop_before_start_does_not_spoil_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("early.wav");
        let backend = ScriptedInputBackend::new(vec![vec![0u8; 3200]; 3]);
        let probe = backend.probe();
        let mut engine = CaptureEngine::new(SampleStore::new(), shared_model(), Arc::new(NullListener));

        assert_eq!(engine.stop().unwrap(), None);
        assert_eq!(engine.state(), CaptureState::Idle);

        engine.start(&backend, 0, &path).unwrap();
        wait_until(|| probe.chunks_read() == 3);
        let clip = engine.stop().unwrap().unwrap();
        assert_eq!(clip.frames, 4_800);
    }

    #[test]
    fn stop_twice_returns_the_same_clip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.wav");
        let backend = ScriptedInputBackend::new(vec![vec![0u8; 320]]);
        let mut engine = CaptureEngine::new(SampleStore::new(), shared_model(), Arc::new(NullListener));
        engine.start(&backend, 0, &path).unwrap();
        let a = engine.stop().unwrap();
        let b = engine.stop().unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.state(), CaptureState::Stopped);
        assert!(matches!(
            engine.start(&backend, 0, &path),
            Err(WaveError::InvalidState(_))
        ));
    }

    #[test]
    fn device_failure_is_reported_once_and_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unplugged.wav");
        let backend = ScriptedInputBackend::new(vec![vec![0u8; 320]; 4]).failing_after(2);
        let (tx, rx) = mpsc::channel();
        let mut engine = CaptureEngine::new(
            SampleStore::new(),
            shared_model(),
            Arc::new(ChannelListener::new(tx)),
        );
        engine.start(&backend, 0, &path).unwrap();
        wait_until(|| !engine.is_recording());

        let clip = engine.stop().unwrap().unwrap();
        assert_eq!(clip.frames, 320);
        let errors: Vec<_> = rx
            .try_iter()
            .filter(|e| matches!(e, WaveEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            WaveEvent::Error { kind: ErrorKind::DeviceUnavailable, .. }
        ));
    }

    #[test]
    fn denied_microphone_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("denied.wav");
        let store = SampleStore::new();
        let mut engine = CaptureEngine::new(store.clone(), shared_model(), Arc::new(NullListener));
        let err = engine.start(&ScriptedInputBackend::denied(), 0, &path).unwrap_err();
        assert!(matches!(err, WaveError::PermissionDenied(_)));
        assert!(!path.exists());
        assert_eq!(store.lease_held(&path), None);
        assert_eq!(engine.state(), CaptureState::Idle);
    }

    #[test]
    fn unwritable_path_closes_the_device() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where a directory is needed
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let path = blocker.join("rec.wav");
        let backend = ScriptedInputBackend::new(Vec::new());
        let probe = backend.probe();

        let mut engine = CaptureEngine::new(SampleStore::new(), shared_model(), Arc::new(NullListener));
        let err = engine.start(&backend, 0, &path).unwrap_err();
        assert!(matches!(err, WaveError::Io(_)));
        assert_eq!(probe.times_opened(), 1);
        assert!(!probe.is_open());
    }
}
