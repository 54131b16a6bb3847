// src/main.rs

use std::fmt::Write as FmtWrite;
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossterm::{
    cursor::MoveTo,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{
        disable_raw_mode, enable_raw_mode, BeginSynchronizedUpdate, Clear, ClearType,
        EndSynchronizedUpdate,
    },
};
use log::{warn, LevelFilter};

use wave_modules::device::CpalBackend;
use wave_modules::waveform::terminal::render_ascii;
use wave_modules::{ChannelListener, PlaybackState, WaveConfig, WaveController, WaveEvent, WaveMode};

/// Record from the microphone and play it back with a live waveform.
#[derive(Parser, Debug)]
#[command(name = "wave_cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Clip to record to and play from (defaults to <data_dir>/<file_stem>.wav)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Waveform width in columns
    #[arg(long)]
    width: Option<u32>,

    /// Initial zoom in columns per second
    #[arg(long)]
    zoom: Option<f64>,

    /// -v = info, -vv = debug, -vvv = trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

const FRAME: Duration = Duration::from_millis(50);
const SEEK_STEP_MS: u64 = 1_000;
const ZOOM_STEP: f64 = 1.5;

struct Ui {
    controller: WaveController,
    events: Receiver<WaveEvent>,
    clip_path: PathBuf,
    status: String,
    dirty: bool,
    draw_buffer: String,
}

impl Ui {
    fn report(&mut self, result: wave_modules::Result<()>) {
        if let Err(e) = result {
            warn!("{e}");
            self.status = e.to_string();
            self.dirty = true;
        }
    }

    /// Returns false to quit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        let c = &mut self.controller;
        let result = match code {
            KeyCode::Char('q') | KeyCode::Char('Q') => return false,
            KeyCode::Char('r') | KeyCode::Char('R') => {
                if c.is_recording() {
                    c.stop_recording()
                        .and_then(|_| c.load_clip(&self.clip_path))
                        .map(|_| ())
                } else {
                    c.start_recording(&self.clip_path)
                }
            }
            KeyCode::Char('p') | KeyCode::Char('P') => c.play(0),
            KeyCode::Char(' ') => match c.mode() {
                WaveMode::Playback(PlaybackState::Playing) => {
                    c.pause();
                    Ok(())
                }
                _ => c.resume(),
            },
            KeyCode::Left => {
                let at = c.playback_cursor().elapsed_ms;
                c.seek(at.saturating_sub(SEEK_STEP_MS)).map(|_| ())
            }
            KeyCode::Right => {
                let at = c.playback_cursor().elapsed_ms;
                c.seek(at + SEEK_STEP_MS).map(|_| ())
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let pps = c.model().lock().map(|m| m.viewport().pixels_per_second()).unwrap_or(100.0);
                c.set_zoom(pps * ZOOM_STEP)
            }
            KeyCode::Char('-') => {
                let pps = c.model().lock().map(|m| m.viewport().pixels_per_second()).unwrap_or(100.0);
                c.set_zoom(pps / ZOOM_STEP)
            }
            KeyCode::Char('[') | KeyCode::Char(']') => {
                let (scroll, half) = c
                    .model()
                    .lock()
                    .map(|m| (m.viewport().scroll_px(), m.viewport().visible_width() as u64 / 2))
                    .unwrap_or((0, 0));
                let to = if code == KeyCode::Char('[') {
                    scroll.saturating_sub(half)
                } else {
                    scroll + half
                };
                c.set_scroll(to);
                Ok(())
            }
            _ => Ok(()),
        };
        self.report(result);
        self.dirty = true;
        true
    }

    fn drain_events(&mut self) {
        for ev in self.events.try_iter() {
            match ev {
                WaveEvent::Status(text) => self.status = text,
                WaveEvent::Error { kind, detail } => self.status = format!("{kind}: {detail}"),
                WaveEvent::PlaybackFinished => self.status = "finished".to_string(),
                _ => {}
            }
            self.dirty = true;
        }
    }

    fn draw(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.dirty = false;

        let rows = {
            let model = self.controller.model();
            let model = model.lock().map_err(|_| anyhow::anyhow!("waveform model poisoned"))?;
            render_ascii(&model)
        };
        let cursor = self.controller.playback_cursor();

        self.draw_buffer.clear();
        let buf = &mut self.draw_buffer;
        writeln!(buf, "[R] Record/Stop | [P] Play | [SPACE] Pause/Resume | [<-/->] Seek | [+/-] Zoom | [[/]] Scroll | [Q] Quit\r")?;
        writeln!(
            buf,
            "{:?}  {:>6} / {:>6} ms  {}\r",
            self.controller.mode(),
            cursor.elapsed_ms,
            cursor.total_ms,
            self.status
        )?;
        for row in rows {
            writeln!(buf, "{row}\r")?;
        }

        let mut out = stdout();
        execute!(out, BeginSynchronizedUpdate, MoveTo(0, 0), Clear(ClearType::All))?;
        out.write_all(self.draw_buffer.as_bytes())?;
        execute!(out, EndSynchronizedUpdate)?;
        out.flush()?;
        Ok(())
    }
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Warn);
    builder.filter_module("wave_modules", args.log_level());
    builder.filter_module("wave_cli", args.log_level());
    builder.format_timestamp_millis().init();
}

fn load_config(args: &Args) -> anyhow::Result<WaveConfig> {
    let mut config = match &args.config {
        Some(path) => WaveConfig::load_from_disk(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => WaveConfig::default(),
    };
    if let Some(w) = args.width {
        config.visible_width = w;
    }
    if let Some(z) = args.zoom {
        config.pixels_per_second = z;
    }
    config.validate()?;
    Ok(config)
}

fn run(ui: &mut Ui) -> anyhow::Result<()> {
    loop {
        let now = Instant::now();
        let timeout = ui
            .controller
            .time_until_next_tick(now)
            .map_or(FRAME, |d| d.min(FRAME));

        if event::poll(timeout)? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind == KeyEventKind::Press {
                    if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
                        return Ok(());
                    }
                    if !ui.handle_key(ev.code) {
                        return Ok(());
                    }
                }
            }
        }

        ui.controller.run_tick(Instant::now());
        ui.drain_events();
        ui.draw()?;
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);
    let config = load_config(&args)?;
    let clip_path = args.file.clone().unwrap_or_else(|| config.recording_path());

    let (tx, rx) = mpsc::channel();
    let backend = Arc::new(CpalBackend);
    let mut controller = WaveController::new(
        config,
        backend.clone(),
        backend,
        Arc::new(ChannelListener::new(tx)),
    )?;

    let mut status = String::from("ready");
    if clip_path.exists() {
        if let Err(e) = controller.load_clip(&clip_path) {
            status = format!("could not load {}: {e}", clip_path.display());
        }
    }

    let mut ui = Ui {
        controller,
        events: rx,
        clip_path,
        status,
        dirty: true,
        draw_buffer: String::with_capacity(4096),
    };

    enable_raw_mode()?;
    let result = run(&mut ui);
    disable_raw_mode()?;
    println!();
    result
}
