// src/sync.rs

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::notify::WaveListener;
use crate::playback::{PlaybackEngine, PlaybackState};
use crate::waveform::WaveformModel;

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Loop inactive or the deadline has not passed.
    Idle,
    CursorMoved(u64),
    Finished,
    /// Playback left `Playing` by other means; the loop stopped.
    Stopped,
    Failed,
}

/// Fixed-period cursor driver. The owner calls `tick` when `due`; each tick
/// schedules the next one a full period after the time it was given, so a
/// stall never causes a burst of catch-up ticks.
#[derive(Debug, Clone)]
pub struct SyncLoop {
    period: Duration,
    active: bool,
    // None while active means "due now"
    next_deadline: Option<Instant>,
}

impl Default for SyncLoop {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_PERIOD)
    }
}

impl SyncLoop {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            active: false,
            next_deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Activate; the first tick is due immediately.
    pub fn start(&mut self) {
        self.active = true;
        self.next_deadline = None;
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.next_deadline = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn due(&self, now: Instant) -> bool {
        self.active && self.next_deadline.is_none_or(|d| now >= d)
    }

    /// How long the owner may sleep before the next tick, `None` when inactive.
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        if !self.active {
            return None;
        }
        Some(
            self.next_deadline
                .map_or(Duration::ZERO, |d| d.saturating_duration_since(now)),
        )
    }

    pub fn tick(
        &mut self,
        now: Instant,
        engine: &mut PlaybackEngine,
        model: &mut WaveformModel,
        listener: &dyn WaveListener,
    ) -> TickOutcome {
        if !self.due(now) {
            return TickOutcome::Idle;
        }

        let tick = match engine.poll() {
            Ok(t) => t,
            Err(e) => {
                warn!("playback failed: {e}");
                engine.stop();
                model.clear_cursor();
                self.stop();
                listener.on_error(e.kind(), &e.to_string());
                return TickOutcome::Failed;
            }
        };

        if tick.just_finished {
            model.clear_cursor();
            model.set_play_finished(true);
            self.stop();
            listener.on_playback_finished();
            return TickOutcome::Finished;
        }
        if engine.state() != PlaybackState::Playing {
            debug!("sync loop idle: playback is {:?}", engine.state());
            self.stop();
            return TickOutcome::Stopped;
        }

        let px = model.millisecs_to_pixels(tick.position_ms);
        model.set_playback_cursor_pixel(px);
        listener.on_cursor_moved(px);
        listener.on_redraw_requested();
        self.next_deadline = Some(now + self.period);
        TickOutcome::CursorMoved(px)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{ManualOutputBackend, OutputProbe, SimClock};
    use crate::error::ErrorKind;
    use crate::format::PcmFormat;
    use crate::notify::{ChannelListener, NullListener, WaveEvent};
    use crate::store::SampleStore;
    use std::sync::{mpsc, Arc};
    use std::thread;

    struct Rig {
        _dir: tempfile::TempDir,
        clock: SimClock,
        speaker: OutputProbe,
        engine: PlaybackEngine,
        model: WaveformModel,
    }

    fn playing(ms: u64) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.wav");
        let store = SampleStore::new();
        let format = PcmFormat::capture();
        let mut w = store.begin_write(&path, format).unwrap();
        w.append_pcm(&vec![500i16; format.ms_to_frames(ms) as usize]).unwrap();
        drop(w);

        let clock = SimClock::new();
        let backend = ManualOutputBackend::new(clock.clone()).with_capacity_ms(100);
        let speaker = backend.probe();
        let mut engine = PlaybackEngine::new(store, Arc::new(backend));
        engine.load(&path).unwrap();
        engine.start().unwrap();
        Rig {
            _dir: dir,
            clock,
            speaker,
            engine,
            model: WaveformModel::default(),
        }
    }

    #[test]
    fn reschedules_from_now_not_from_the_missed_deadline() {
        let mut r = playing(2_000);
        let mut sync = SyncLoop::default();
        let t0 = Instant::now();
        sync.start();
        let ms = Duration::from_millis;

        assert!(matches!(
            sync.tick(t0, &mut r.engine, &mut r.model, &NullListener),
            TickOutcome::CursorMoved(_)
        ));
        assert_eq!(
            sync.tick(t0 + ms(5), &mut r.engine, &mut r.model, &NullListener),
            TickOutcome::Idle
        );

        // a 95 ms stall yields one tick, then a full period of quiet
        let late = t0 + ms(95);
        r.clock.advance(95);
        assert!(matches!(
            sync.tick(late, &mut r.engine, &mut r.model, &NullListener),
            TickOutcome::CursorMoved(_)
        ));
        assert_eq!(sync.time_until_next(late + ms(4)), Some(ms(6)));
        for after in [0, 5, 9] {
            assert_eq!(
                sync.tick(late + ms(after), &mut r.engine, &mut r.model, &NullListener),
                TickOutcome::Idle
            );
        }
        assert!(matches!(
            sync.tick(late + ms(10), &mut r.engine, &mut r.model, &NullListener),
            TickOutcome::CursorMoved(_)
        ));
    }

    #[test]
    fn device_failure_is_reported_once_and_stops_the_loop() {
        let mut r = playing(2_000);
        let (tx, rx) = mpsc::channel();
        let listener = ChannelListener::new(tx);
        let mut sync = SyncLoop::default();
        sync.start();

        let mut now = Instant::now();
        assert!(matches!(
            sync.tick(now, &mut r.engine, &mut r.model, &listener),
            TickOutcome::CursorMoved(_)
        ));
        assert!(r.model.playback_cursor().is_some());

        r.speaker.unplug();
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            assert!(Instant::now() < deadline, "failure never surfaced");
            r.clock.advance(10);
            now += sync.period();
            match sync.tick(now, &mut r.engine, &mut r.model, &listener) {
                TickOutcome::CursorMoved(_) => thread::sleep(Duration::from_millis(2)),
                other => break other,
            }
        };

        assert_eq!(outcome, TickOutcome::Failed);
        assert!(!sync.is_active());
        assert_eq!(r.engine.state(), PlaybackState::Stopped);
        assert_eq!(r.model.playback_cursor(), None);
        assert!(!r.speaker.is_open());

        now += sync.period();
        assert_eq!(
            sync.tick(now, &mut r.engine, &mut r.model, &listener),
            TickOutcome::Idle
        );
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
    fn inactive_loop_is_never_due() {
        let mut sync = SyncLoop::default();
        let now = Instant::now();
        assert!(!sync.due(now));
        assert_eq!(sync.time_until_next(now), None);
        sync.start();
        sync.stop();
        assert!(!sync.due(now));
    }
}
