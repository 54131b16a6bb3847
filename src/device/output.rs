// src/device/output.rs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{error, info};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::device::resample::StreamResampler;
use crate::device::{device_error, dsp, OutputDevice, StreamHost};
use crate::error::{Result, WaveError};
use crate::format::{i16_to_f32, PcmFormat};

const RING_CAPACITY: usize = 131_072;

/// Consumer half of the ring plus the count of samples it has played.
/// The callback only ever `try_lock`s it; a seek holding the lock costs
/// one period of silence.
#[derive(Clone)]
struct PlayQueue {
    consumer: Arc<Mutex<HeapCons<f32>>>,
    played_samples: Arc<AtomicU64>,
}

impl PlayQueue {
    fn new(consumer: HeapCons<f32>) -> Self {
        Self {
            consumer: Arc::new(Mutex::new(consumer)),
            played_samples: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fill one device buffer. Underruns and pauses are silence.
    fn render<T: cpal::Sample + FromSample<f32>>(&self, playing: bool, data: &mut [T]) {
        let mut consumer = match self.consumer.try_lock() {
            Ok(c) => c,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => {
                data.iter_mut().for_each(|out| *out = T::from_sample(0.0));
                return;
            }
        };
        let mut popped = 0u64;
        for out in data.iter_mut() {
            let s = if playing {
                consumer.try_pop().inspect(|_| popped += 1).unwrap_or(0.0)
            } else {
                0.0
            };
            *out = T::from_sample(s);
        }
        if popped > 0 {
            self.played_samples.fetch_add(popped, Ordering::Relaxed);
        }
    }

    /// Drop everything queued and restart the played count.
    fn flush(&self) {
        let mut consumer = self.consumer.lock().unwrap_or_else(|p| p.into_inner());
        while consumer.try_pop().is_some() {}
        self.played_samples.store(0, Ordering::Relaxed);
    }

    fn played_samples(&self) -> u64 {
        self.played_samples.load(Ordering::Relaxed)
    }
}

/// State shared with the cpal callback.
#[derive(Clone)]
struct CallbackShared {
    playing: Arc<AtomicBool>,
    queue: PlayQueue,
    failed: Arc<Mutex<Option<String>>>,
}

struct StreamInfo {
    channels: usize,
    sample_rate: u32,
}

/// Default speaker. Source PCM is converted to the device layout before it
/// enters the ring; position counts samples the callback actually played.
pub struct CpalOutput {
    host: StreamHost,
    producer: HeapProd<f32>,
    shared: CallbackShared,
    source: PcmFormat,
    out_channels: usize,
    out_rate: u32,
    resampler: Option<StreamResampler>,
    pending: VecDeque<f32>,
    base_ms: u64,
}

impl CpalOutput {
    pub fn open(source: PcmFormat) -> Result<Self> {
        let rb = HeapRb::<f32>::new(RING_CAPACITY);
        let (producer, consumer) = rb.split();
        let shared = CallbackShared {
            playing: Arc::new(AtomicBool::new(false)),
            queue: PlayQueue::new(consumer),
            failed: Arc::new(Mutex::new(None)),
        };
        let shared_cb = shared.clone();

        let (host, info) =
            StreamHost::spawn("wave-output", move || build_default_output(shared_cb))?;
        let resampler = StreamResampler::new(source.sample_rate, info.sample_rate, info.channels)?;

        info!(
            "output open: {} Hz / {} ch -> device {} Hz / {} ch",
            source.sample_rate, source.channels, info.sample_rate, info.channels
        );

        Ok(Self {
            host,
            producer,
            shared,
            source,
            out_channels: info.channels,
            out_rate: info.sample_rate,
            resampler,
            pending: VecDeque::new(),
            base_ms: 0,
        })
    }

    fn check_failed(&self) -> Result<()> {
        let slot = self.shared.failed.lock().unwrap_or_else(|p| p.into_inner());
        match slot.as_ref() {
            Some(msg) => Err(device_error("output stream", msg)),
            None => Ok(()),
        }
    }

    fn drain_pending(&mut self) {
        let (a, b) = self.pending.as_slices();
        let mut pushed = self.producer.push_slice(a);
        if pushed == a.len() {
            pushed += self.producer.push_slice(b);
        }
        self.pending.drain(..pushed);
    }

    fn enqueue(&mut self, out: Vec<f32>) {
        self.pending.extend(out);
        self.drain_pending();
    }
}

impl OutputDevice for CpalOutput {
    fn write(&mut self, pcm: &[i16]) -> Result<usize> {
        self.check_failed()?;
        self.drain_pending();
        if !self.pending.is_empty() {
            return Ok(0);
        }

        let in_ch = self.source.channels as usize;
        let floats: Vec<f32> = pcm.iter().map(|&s| i16_to_f32(s)).collect();
        let mixed = dsp::updown_mix_interleaved(&floats, in_ch, self.out_channels);
        let out = match self.resampler.as_mut() {
            Some(r) => r.process(&mixed)?,
            None => mixed,
        };
        self.enqueue(out);
        Ok(pcm.len() / in_ch)
    }

    fn play(&mut self) -> Result<()> {
        self.check_failed()?;
        self.shared.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
    }

    fn seek(&mut self, ms: u64) {
        self.pending.clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
        self.shared.queue.flush();
        self.base_ms = ms;
    }

    fn position_ms(&mut self) -> u64 {
        let samples = self.shared.queue.played_samples();
        let frames = samples / self.out_channels.max(1) as u64;
        self.base_ms + frames * 1000 / self.out_rate.max(1) as u64
    }

    fn end_of_stream(&mut self) -> Result<()> {
        if let Some(r) = self.resampler.as_mut() {
            let tail = r.flush()?;
            self.enqueue(tail);
        }
        Ok(())
    }

    fn is_drained(&mut self) -> bool {
        self.drain_pending();
        self.pending.is_empty()
            && self.producer.occupied_len() == 0
            && self.resampler.as_ref().is_none_or(|r| r.staged_frames() == 0)
    }

    fn close(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
        self.host.shutdown();
    }
}

fn build_default_output(shared: CallbackShared) -> Result<(Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| WaveError::DeviceUnavailable("no output device available".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| device_error("default output config", e))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let info = StreamInfo {
        channels: config.channels as usize,
        sample_rate: config.sample_rate.0,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, shared)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, shared)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, shared)?,
        other => {
            return Err(WaveError::DeviceUnavailable(format!(
                "unsupported output sample format {other:?}"
            )))
        }
    };
    stream.play().map_err(|e| device_error("start output", e))?;
    Ok((stream, info))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: CallbackShared,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let failed = shared.failed.clone();
    let err_fn = move |err: cpal::StreamError| {
        error!("output stream error: {err}");
        let mut slot = failed.lock().unwrap_or_else(|p| p.into_inner());
        slot.get_or_insert_with(|| err.to_string());
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let playing = shared.playing.load(Ordering::Relaxed);
                shared.queue.render(playing, data);
            },
            err_fn,
            None,
        )
        .map_err(|e| device_error("open output", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(samples: &[f32]) -> (HeapProd<f32>, PlayQueue) {
        let (mut producer, consumer) = HeapRb::<f32>::new(64).split();
        producer.push_slice(samples);
        (producer, PlayQueue::new(consumer))
    }

    #[test]
    fn render_counts_only_what_was_played() {
        let (_producer, queue) = queue_with(&[0.5; 6]);
        let mut data = [1.0f32; 4];
        queue.render(false, &mut data);
        assert_eq!(data, [0.0; 4]);
        assert_eq!(queue.played_samples(), 0);

        queue.render(true, &mut data);
        queue.render(true, &mut data);
        assert_eq!(data, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(queue.played_samples(), 6);
    }

    #[test]
    fn flush_keeps_audio_queued_after_it() {
        let (mut producer, queue) = queue_with(&[0.1; 8]);
        let mut data = [0.0f32; 2];
        queue.render(true, &mut data);

        queue.flush();
        assert_eq!(queue.played_samples(), 0);
        // primed after the seek, must survive the next callback
        producer.push_slice(&[0.7; 4]);
        queue.render(true, &mut data);
        assert_eq!(data, [0.7, 0.7]);
        assert_eq!(queue.played_samples(), 2);
        assert_eq!(producer.occupied_len(), 2);
    }

    #[test]
    fn busy_queue_renders_silence() {
        let (_producer, queue) = queue_with(&[0.3; 4]);
        let held = queue.consumer.lock().unwrap();
        let mut data = [1.0f32; 2];
        queue.render(true, &mut data);
        drop(held);
        assert_eq!(data, [0.0, 0.0]);
        assert_eq!(queue.played_samples(), 0);
    }
}
