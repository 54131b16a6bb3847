// src/device/mod.rs

pub mod dsp;
pub mod input;
pub mod output;
pub mod resample;
pub mod sim;

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::error::{Result, WaveError};
use crate::format::PcmFormat;

pub use input::CpalInput;
pub use output::CpalOutput;

/// Microphone side. `read_into` may return `Ok(0)` when nothing arrived in time;
/// callers just ask again.
pub trait InputDevice: Send {
    /// Byte size the capture loop should read per call, at least `min_hint`.
    fn request_buffer(&mut self, min_hint: usize) -> usize;
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn close(&mut self);
}

/// Speaker side. Takes interleaved frames in the format it was opened with.
pub trait OutputDevice: Send {
    /// Frames accepted, 0 when the device queue is full.
    fn write(&mut self, pcm: &[i16]) -> Result<usize>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    /// Drop queued audio and restart the position clock at `ms`.
    fn seek(&mut self, ms: u64);
    fn position_ms(&mut self) -> u64;
    /// No more audio follows; release anything held back for resampling.
    fn end_of_stream(&mut self) -> Result<()>;
    /// Everything written has been played.
    fn is_drained(&mut self) -> bool;
    fn close(&mut self);
}

pub trait InputBackend: Send + Sync {
    fn open_input(&self, format: &PcmFormat) -> Result<Box<dyn InputDevice>>;
}

pub trait OutputBackend: Send + Sync {
    fn open_output(&self, format: &PcmFormat) -> Result<Box<dyn OutputDevice>>;
}

/// Default host devices through cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl InputBackend for CpalBackend {
    fn open_input(&self, format: &PcmFormat) -> Result<Box<dyn InputDevice>> {
        Ok(Box::new(CpalInput::open(*format)?))
    }
}

impl OutputBackend for CpalBackend {
    fn open_output(&self, format: &PcmFormat) -> Result<Box<dyn OutputDevice>> {
        Ok(Box::new(CpalOutput::open(*format)?))
    }
}

/// Backends don't expose permission errors as a type; they show up in the message.
pub(crate) fn device_error(context: &str, err: impl std::fmt::Display) -> WaveError {
    let msg = format!("{context}: {err}");
    let lower = msg.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        WaveError::PermissionDenied(msg)
    } else {
        WaveError::DeviceUnavailable(msg)
    }
}

/// cpal streams are not `Send`, so each one is built and kept alive on its
/// own thread until `shutdown`.
pub(crate) struct StreamHost {
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StreamHost {
    pub(crate) fn spawn<F, T>(name: &str, build: F) -> Result<(Self, T)>
    where
        F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
        T: Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok((stream, info)) => {
                    let _ = ready_tx.send(Ok(info));
                    // park until shutdown or the owner is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok((
                Self {
                    stop_tx,
                    handle: Some(handle),
                },
                info,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(WaveError::DeviceUnavailable(format!("{name} exited during setup")))
            }
        }
    }

    pub(crate) fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for StreamHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_text_maps_to_permission_denied() {
        let e = device_error("open input", "Permission denied (os error 13)");
        assert!(matches!(e, WaveError::PermissionDenied(_)));
        let e = device_error("open input", "device busy");
        assert!(matches!(e, WaveError::DeviceUnavailable(_)));
    }
}
