// src/lib.rs

pub mod capture;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod format;
pub mod notify;
pub mod playback;
pub mod store;
pub mod sync;
pub mod waveform;

pub use capture::{CaptureEngine, CaptureState};
pub use config::WaveConfig;
pub use controller::{WaveController, WaveMode};
pub use error::{ErrorKind, Result, WaveError};
pub use notify::{ChannelListener, NullListener, WaveEvent, WaveListener};
pub use playback::{PlaybackCursor, PlaybackEngine, PlaybackState, PlaybackTick};
pub use store::{AudioClip, SampleStore};
pub use sync::{SyncLoop, TickOutcome};
pub use waveform::{ViewportState, WaveformModel};
