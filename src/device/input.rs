// src/device/input.rs

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedBufferSize};
use log::{error, info};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::device::resample::StreamResampler;
use crate::device::{device_error, InputDevice, StreamHost};
use crate::error::{Result, WaveError};
use crate::format::{f32_to_i16, PcmFormat};

/// No audio for this long means the microphone went away.
const STALL_TIMEOUT: Duration = Duration::from_millis(500);
/// Floor for the per-read buffer: 20 ms at the capture format.
const MIN_READ_MS: u64 = 20;

struct StreamInfo {
    device_rate: u32,
    min_device_frames: Option<u32>,
}

/// Default microphone, delivered as mono i16 at the requested rate.
pub struct CpalInput {
    host: StreamHost,
    consumer: HeapCons<f32>,
    format: PcmFormat,
    device_rate: u32,
    min_buffer_bytes: usize,
    resampler: Option<StreamResampler>,
    staged: VecDeque<i16>,
    failed: Arc<Mutex<Option<String>>>,
    scratch: Vec<f32>,
}

impl CpalInput {
    pub fn open(format: PcmFormat) -> Result<Self> {
        if format.channels != 1 {
            return Err(WaveError::Format("capture is mono only".into()));
        }
        // about two seconds at 48 kHz
        let rb = HeapRb::<f32>::new(96_000);
        let (producer, consumer) = rb.split();
        let failed = Arc::new(Mutex::new(None));
        let failed_cb = failed.clone();
        let wanted_rate = format.sample_rate;

        let (host, info) = StreamHost::spawn("wave-input", move || {
            build_default_input(wanted_rate, producer, failed_cb)
        })?;

        let resampler = StreamResampler::new(info.device_rate, format.sample_rate, 1)?;
        let block = format.block_align();
        let floor = (format.ms_to_frames(MIN_READ_MS) as usize) * block;
        let from_device = info
            .min_device_frames
            .map(|f| f as u64 * format.sample_rate as u64 / info.device_rate as u64)
            .unwrap_or(0) as usize
            * block;

        info!(
            "input open: device {} Hz -> {} Hz mono{}",
            info.device_rate,
            format.sample_rate,
            if resampler.is_some() { " (resampled)" } else { "" }
        );

        Ok(Self {
            host,
            consumer,
            format,
            device_rate: info.device_rate,
            min_buffer_bytes: floor.max(from_device),
            resampler,
            staged: VecDeque::new(),
            failed,
            scratch: vec![0.0; 4096],
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    fn check_failed(&self) -> Result<()> {
        let slot = self.failed.lock().unwrap_or_else(|p| p.into_inner());
        match slot.as_ref() {
            Some(msg) => Err(device_error("input stream", msg)),
            None => Ok(()),
        }
    }

    /// Move whatever the callback produced into `staged` at the capture rate.
    fn pull(&mut self) -> Result<usize> {
        let popped = self.consumer.pop_slice(self.scratch.as_mut_slice());
        if popped == 0 {
            return Ok(0);
        }
        let converted = match self.resampler.as_mut() {
            Some(r) => r.process(&self.scratch[..popped])?,
            None => self.scratch[..popped].to_vec(),
        };
        self.staged.extend(converted.into_iter().map(f32_to_i16));
        Ok(popped)
    }
}

impl InputDevice for CpalInput {
    fn request_buffer(&mut self, min_hint: usize) -> usize {
        let block = self.format.block_align();
        let size = min_hint.max(self.min_buffer_bytes);
        size.div_ceil(block) * block
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let wanted = buf.len() / 2;
        let mut filled = 0usize;
        let mut last_data = Instant::now();

        while filled < wanted {
            self.check_failed()?;
            while filled < wanted {
                let Some(s) = self.staged.pop_front() else { break };
                buf[filled * 2..filled * 2 + 2].copy_from_slice(&s.to_le_bytes());
                filled += 1;
            }
            if filled == wanted {
                break;
            }
            if self.pull()? == 0 {
                if last_data.elapsed() >= STALL_TIMEOUT {
                    return Err(WaveError::DeviceUnavailable("input stalled".into()));
                }
                thread::sleep(Duration::from_millis(5));
            } else {
                last_data = Instant::now();
            }
        }
        Ok(filled * 2)
    }

    fn close(&mut self) {
        self.host.shutdown();
    }
}

/// Runs on the stream host thread. Prefers a native mono config at the
/// capture rate and falls back to the device default.
fn build_default_input(
    wanted_rate: u32,
    producer: HeapProd<f32>,
    failed: Arc<Mutex<Option<String>>>,
) -> Result<(Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| WaveError::DeviceUnavailable("no input device available".into()))?;

    let native = device
        .supported_input_configs()
        .map_err(|e| device_error("query input configs", e))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == SampleFormat::I16
                && c.min_sample_rate().0 <= wanted_rate
                && c.max_sample_rate().0 >= wanted_rate
        })
        .map(|c| c.with_sample_rate(cpal::SampleRate(wanted_rate)));

    let supported = match native {
        Some(c) => c,
        None => device
            .default_input_config()
            .map_err(|e| device_error("default input config", e))?,
    };

    let sample_format = supported.sample_format();
    let min_device_frames = match supported.buffer_size() {
        SupportedBufferSize::Range { min, .. } => Some(*min),
        SupportedBufferSize::Unknown => None,
    };
    let config: StreamConfig = supported.into();
    let device_rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, failed)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, producer, failed)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, producer, failed)?,
        other => {
            return Err(WaveError::DeviceUnavailable(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    };
    stream.play().map_err(|e| device_error("start input", e))?;

    Ok((
        stream,
        StreamInfo {
            device_rate,
            min_device_frames,
        },
    ))
}

/// Down-mix each frame to mono f32 and push it; drop when the ring is full.
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
    failed: Arc<Mutex<Option<String>>>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let err_fn = move |err: cpal::StreamError| {
        error!("input stream error: {err}");
        let mut slot = failed.lock().unwrap_or_else(|p| p.into_inner());
        slot.get_or_insert_with(|| err.to_string());
    };

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels.max(1)) {
                    let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
                    let _ = producer.try_push(sum / frame.len() as f32);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| device_error("open input", e))
}
