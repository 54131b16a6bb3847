// src/device/resample.rs

use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::device::dsp;
use crate::error::{Result, WaveError};

fn resample_error(err: impl std::fmt::Display) -> WaveError {
    WaveError::DeviceUnavailable(format!("resampler: {err}"))
}

/// Fixed-ratio sinc resampler fed with arbitrary-length interleaved blocks.
/// The filter latency is cut from the front and `flush` stops at
/// `round(frames_in * ratio)`, so output length tracks input length.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    stage_planar: Vec<Vec<f32>>,
    ratio: f64,
    frames_in: u64,
    frames_out: u64,
    delay_left: usize,
}

impl StreamResampler {
    /// `None` when the rates already match.
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Result<Option<Self>> {
        if src_rate == dst_rate {
            return Ok(None);
        }
        let ratio = dst_rate as f64 / src_rate as f64;
        let sinc_len = 256usize;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window,
        };
        let chunk_size = 1024;
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, channels)
            .map_err(resample_error)?;
        let delay_left = inner.output_delay();
        Ok(Some(Self {
            inner,
            stage_planar: vec![Vec::with_capacity(4096); channels],
            ratio,
            frames_in: 0,
            frames_out: 0,
            delay_left,
        }))
    }

    fn expected_frames(&self) -> u64 {
        (self.frames_in as f64 * self.ratio).round() as u64
    }

    /// Interleave one output block into `out`, minus any latency still owed.
    fn emit(&mut self, block: &[Vec<f32>], out: &mut Vec<f32>) {
        let frames = dsp::planar_len(block);
        let skip = self.delay_left.min(frames);
        self.delay_left -= skip;
        if skip == frames {
            return;
        }
        let kept: Vec<Vec<f32>> = block.iter().map(|lane| lane[skip..frames].to_vec()).collect();
        out.extend(dsp::interleave(&kept));
        self.frames_out += (frames - skip) as u64;
    }

    /// Resample whatever full chunks are available; the rest stays staged.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let before = dsp::planar_len(&self.stage_planar);
        dsp::append_interleaved_to_planar(interleaved, &mut self.stage_planar);
        self.frames_in += (dsp::planar_len(&self.stage_planar) - before) as u64;

        let mut out = Vec::new();
        loop {
            let need = self.inner.input_frames_next();
            if dsp::planar_len(&self.stage_planar) < need {
                break;
            }
            let in_block = dsp::take_from_planar(&mut self.stage_planar, need);
            let block = self.inner.process(&in_block, None).map_err(resample_error)?;
            self.emit(&block, &mut out);
        }
        Ok(out)
    }

    /// Push the staged remainder and the filter tail through, stopping at
    /// the output length that matches everything fed in.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        let have = dsp::planar_len(&self.stage_planar);
        if have > 0 {
            let in_block = dsp::take_from_planar(&mut self.stage_planar, have);
            let block = self
                .inner
                .process_partial(Some(in_block.as_slice()), None)
                .map_err(resample_error)?;
            self.emit(&block, &mut out);
        }

        let expected = self.expected_frames();
        while self.frames_out < expected {
            let before = self.frames_out;
            let tail = self
                .inner
                .process_partial::<Vec<f32>>(None, None)
                .map_err(resample_error)?;
            self.emit(&tail, &mut out);
            if self.frames_out == before && self.delay_left == 0 {
                break;
            }
        }

        if self.frames_out > expected {
            let extra = (self.frames_out - expected) as usize;
            let channels = self.stage_planar.len().max(1);
            out.truncate(out.len().saturating_sub(extra * channels));
            self.frames_out = expected;
        }
        Ok(out)
    }

    pub fn staged_frames(&self) -> usize {
        dsp::planar_len(&self.stage_planar)
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        for ch in &mut self.stage_planar {
            ch.clear();
        }
        self.frames_in = 0;
        self.frames_out = 0;
        self.delay_left = self.inner.output_delay();
    }
}
