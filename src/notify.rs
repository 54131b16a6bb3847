// src/notify.rs

use std::sync::mpsc::Sender;

use crate::error::ErrorKind;

/// Outbound notifications to whatever draws the waveform.
/// Called from the capture thread as well as the controlling context.
pub trait WaveListener: Send + Sync {
    fn on_status(&self, _text: &str) {}
    /// Buckets from `first_index` onward changed or were appended.
    fn on_envelope_extended(&self, _first_index: usize, _buckets: &[f32]) {}
    fn on_cursor_moved(&self, _px: u64) {}
    fn on_redraw_requested(&self) {}
    fn on_playback_finished(&self) {}
    fn on_error(&self, _kind: ErrorKind, _detail: &str) {}
}

/// Discards everything.
pub struct NullListener;

impl WaveListener for NullListener {}

#[derive(Debug, Clone, PartialEq)]
pub enum WaveEvent {
    Status(String),
    EnvelopeExtended { first_index: usize, buckets: Vec<f32> },
    CursorMoved(u64),
    RedrawRequested,
    PlaybackFinished,
    Error { kind: ErrorKind, detail: String },
}

/// Forwards notifications as `WaveEvent`s so a UI thread can drain them in order.
pub struct ChannelListener {
    tx: Sender<WaveEvent>,
}

impl ChannelListener {
    pub fn new(tx: Sender<WaveEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: WaveEvent) {
        // receiver gone means nobody is drawing any more
        let _ = self.tx.send(event);
    }
}

impl WaveListener for ChannelListener {
    fn on_status(&self, text: &str) {
        self.send(WaveEvent::Status(text.to_string()));
    }

    fn on_envelope_extended(&self, first_index: usize, buckets: &[f32]) {
        self.send(WaveEvent::EnvelopeExtended {
            first_index,
            buckets: buckets.to_vec(),
        });
    }

    fn on_cursor_moved(&self, px: u64) {
        self.send(WaveEvent::CursorMoved(px));
    }

    fn on_redraw_requested(&self) {
        self.send(WaveEvent::RedrawRequested);
    }

    fn on_playback_finished(&self) {
        self.send(WaveEvent::PlaybackFinished);
    }

    fn on_error(&self, kind: ErrorKind, detail: &str) {
        self.send(WaveEvent::Error {
            kind,
            detail: detail.to_string(),
        });
    }
}
