// src/playback/feeder.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};

use crate::device::OutputDevice;
use crate::error::{Result, WaveError};
use crate::store::ReadHandle;

/// Frames read from the clip per step.
const CHUNK_FRAMES: u64 = 1_024;
/// Back-off when the device queue is full.
const FULL_BACKOFF: Duration = Duration::from_millis(5);

pub(crate) type SharedClip = Arc<Mutex<ReadHandle>>;
pub(crate) type SharedDevice = Arc<Mutex<Box<dyn OutputDevice>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pump {
    Wrote,
    Full,
    Done,
}

/// Read position in the clip plus whatever the device has not taken yet.
struct FeedCursor {
    next_frame: u64,
    total_frames: u64,
    channels: usize,
    pending: Vec<i16>,
    offset: usize,
    eos_sent: bool,
}

impl FeedCursor {
    fn new(start_frame: u64, total_frames: u64, channels: usize) -> Self {
        Self {
            next_frame: start_frame.min(total_frames),
            total_frames,
            channels: channels.max(1),
            pending: Vec::new(),
            offset: 0,
            eos_sent: false,
        }
    }

    /// One step: refill from the clip if needed, then offer it to the device.
    fn pump(&mut self, clip: &SharedClip, device: &SharedDevice) -> Result<Pump> {
        if self.offset >= self.pending.len() {
            if self.next_frame >= self.total_frames {
                if !self.eos_sent {
                    lock(device).end_of_stream()?;
                    self.eos_sent = true;
                }
                return Ok(Pump::Done);
            }
            let samples = lock(clip).read_pcm(self.next_frame, CHUNK_FRAMES)?;
            if samples.is_empty() {
                // header promised more than the file holds
                self.total_frames = self.next_frame;
                return Ok(Pump::Wrote);
            }
            self.next_frame += (samples.len() / self.channels) as u64;
            self.pending = samples;
            self.offset = 0;
        }

        let accepted = lock(device).write(&self.pending[self.offset..])?;
        if accepted == 0 {
            return Ok(Pump::Full);
        }
        self.offset = (self.offset + accepted * self.channels).min(self.pending.len());
        Ok(Pump::Wrote)
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Keeps the output device topped up from a clip on a background thread.
pub(crate) struct Feeder {
    stop: Arc<AtomicBool>,
    eof: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<WaveError>>>,
    handle: Option<JoinHandle<()>>,
}

impl Feeder {
    /// Fill the device queue synchronously from `start_frame`, then keep it
    /// filled from a thread.
    pub(crate) fn start(
        clip: SharedClip,
        device: SharedDevice,
        start_frame: u64,
    ) -> Result<Self> {
        let (total, channels) = {
            let c = lock(&clip);
            (c.clip().frames, c.format().channels as usize)
        };
        let mut cursor = FeedCursor::new(start_frame, total, channels);

        let mut primed = Pump::Wrote;
        while primed == Pump::Wrote {
            primed = cursor.pump(&clip, &device)?;
        }
        debug!(
            "primed output from frame {start_frame} (eof: {})",
            primed == Pump::Done
        );

        let stop = Arc::new(AtomicBool::new(false));
        let eof = Arc::new(AtomicBool::new(primed == Pump::Done));
        let failure = Arc::new(Mutex::new(None));
        if primed == Pump::Done {
            return Ok(Self {
                stop,
                eof,
                failure,
                handle: None,
            });
        }

        let (stop_t, eof_t, failure_t) = (stop.clone(), eof.clone(), failure.clone());
        let handle = thread::Builder::new()
            .name("wave-feeder".into())
            .spawn(move || {
                while !stop_t.load(Ordering::SeqCst) {
                    match cursor.pump(&clip, &device) {
                        Ok(Pump::Wrote) => {}
                        Ok(Pump::Full) => thread::sleep(FULL_BACKOFF),
                        Ok(Pump::Done) => {
                            eof_t.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => {
                            error!("playback feed failed: {e}");
                            *lock(&failure_t) = Some(e);
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            stop,
            eof,
            failure,
            handle: Some(handle),
        })
    }

    /// Every frame of the clip has been handed to the device.
    pub(crate) fn reached_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    pub(crate) fn take_failure(&self) -> Option<WaveError> {
        lock(&self.failure).take()
    }

    /// Stop the thread and wait for it.
    pub(crate) fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                error!("feeder thread panicked");
            }
        }
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.halt();
    }
}
