// src/store/mod.rs

pub mod lease;

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, info, warn};

use crate::error::{Result, WaveError};
use crate::format::{bytes_to_i16, i16_to_bytes, PcmFormat};
use lease::{lease_key, Lease, LeaseKind, LeaseTable};

/// One recording on disk. `frames` counts samples per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub path: PathBuf,
    pub format: PcmFormat,
    pub frames: u64,
}

impl AudioClip {
    pub fn duration_ms(&self) -> u64 {
        self.format.frames_to_ms(self.frames)
    }
}

/// Owns clip files and hands out exclusive read/write leases on them.
#[derive(Clone, Default)]
pub struct SampleStore {
    leases: LeaseTable,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or truncate) `path` and write a provisional WAV header.
    pub fn begin_write(&self, path: &Path, format: PcmFormat) -> Result<WriteHandle> {
        if !format.is_supported() {
            return Err(WaveError::Format(format!(
                "cannot record {} ch / {} bit",
                format.channels, format.bits_per_sample
            )));
        }
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let lease = self.leases.acquire(lease_key(path)?, LeaseKind::Write)?;

        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            sample_format: SampleFormat::Int,
        };
        let file = File::create(path)?;
        let writer = WavWriter::new(BufWriter::new(file), spec)?;
        info!(
            "writing {} ({} Hz, {} ch)",
            path.display(),
            format.sample_rate,
            format.channels
        );

        Ok(WriteHandle {
            path: path.to_path_buf(),
            format,
            writer: Some(writer),
            pending: None,
            samples_written: 0,
            _lease: lease,
        })
    }

    /// Parse the header and take the read lease. Fails before any lease is
    /// kept if the header is malformed or the format unsupported.
    pub fn open_for_read(&self, path: &Path) -> Result<ReadHandle> {
        let lease = self.leases.acquire(lease_key(path)?, LeaseKind::Read)?;
        let file = File::open(path)?;
        let reader = WavReader::new(BufReader::new(file)).map_err(header_error)?;

        let spec = reader.spec();
        let format = PcmFormat::new(spec.sample_rate, spec.channels, spec.bits_per_sample);
        if spec.sample_format != SampleFormat::Int || !format.is_supported() {
            return Err(WaveError::Format(format!(
                "{}: {:?} {} ch / {} bit is not 16-bit mono/stereo PCM",
                path.display(),
                spec.sample_format,
                spec.channels,
                spec.bits_per_sample
            )));
        }

        let clip = AudioClip {
            path: path.to_path_buf(),
            format,
            frames: reader.duration() as u64,
        };
        debug!("opened {} ({} frames)", path.display(), clip.frames);
        Ok(ReadHandle {
            clip,
            reader,
            _lease: lease,
        })
    }

    pub fn lease_held(&self, path: &Path) -> Option<LeaseKind> {
        lease_key(path).ok().and_then(|key| self.leases.holder(&key))
    }
}

/// A header cut short reads as EOF inside hound; that is a format problem, not a disk one.
fn header_error(err: hound::Error) -> WaveError {
    match err {
        hound::Error::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            WaveError::Format("truncated WAV header".to_string())
        }
        other => other.into(),
    }
}

pub struct WriteHandle {
    path: PathBuf,
    format: PcmFormat,
    writer: Option<WavWriter<BufWriter<File>>>,
    // low byte of a sample split across two appends
    pending: Option<u8>,
    samples_written: u64,
    _lease: Lease,
}

impl WriteHandle {
    /// Append little-endian PCM bytes. Returns the whole samples that went
    /// to disk, including one joined from a byte carried over from the last call.
    pub fn append_samples(&mut self, bytes: &[u8]) -> Result<Vec<i16>> {
        let mut bytes = bytes;
        let mut carried = None;
        if let Some(lo) = self.pending.take() {
            match bytes.split_first() {
                Some((&hi, rest)) => {
                    carried = Some(i16::from_le_bytes([lo, hi]));
                    bytes = rest;
                }
                None => {
                    self.pending = Some(lo);
                    return Ok(Vec::new());
                }
            }
        }
        if bytes.len() % 2 == 1 {
            self.pending = bytes.last().copied();
        }

        let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
        samples.extend(carried);
        samples.extend(bytes_to_i16(bytes));
        self.append_pcm(&samples)?;
        Ok(samples)
    }

    pub fn append_pcm(&mut self, samples: &[i16]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| WaveError::invalid_state("clip already finalized"))?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Push buffered samples to disk and refresh the header sizes.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(w) = self.writer.as_mut() {
            w.flush()?;
        }
        Ok(())
    }

    /// Rewrite the header with the final sizes. Calling again is a no-op.
    pub fn finalize_write(&mut self) -> Result<AudioClip> {
        if let Some(w) = self.writer.take() {
            if self.pending.take().is_some() {
                warn!("{}: dropping a trailing half sample", self.path.display());
            }
            w.finalize()?;
            info!(
                "finalized {} ({} ms)",
                self.path.display(),
                self.clip().duration_ms()
            );
        }
        Ok(self.clip())
    }

    pub fn is_finalized(&self) -> bool {
        self.writer.is_none()
    }

    pub fn frames_written(&self) -> u64 {
        self.samples_written / self.format.channels as u64
    }

    pub fn clip(&self) -> AudioClip {
        AudioClip {
            path: self.path.clone(),
            format: self.format,
            frames: self.frames_written(),
        }
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        if let Err(e) = self.finalize_write() {
            warn!("{}: finalize on drop failed: {e}", self.path.display());
        }
    }
}

pub struct ReadHandle {
    clip: AudioClip,
    reader: WavReader<BufReader<File>>,
    _lease: Lease,
}

impl ReadHandle {
    pub fn clip(&self) -> &AudioClip {
        &self.clip
    }

    pub fn format(&self) -> PcmFormat {
        self.clip.format
    }

    /// Interleaved samples for `count` frames from `start_frame`.
    /// Short only at the end of the clip.
    pub fn read_pcm(&mut self, start_frame: u64, count: u64) -> Result<Vec<i16>> {
        let total = self.clip.frames;
        if start_frame >= total || count == 0 {
            return Ok(Vec::new());
        }
        let frames = count.min(total - start_frame);
        let channels = self.clip.format.channels as u64;

        // start_frame < total, which came from a u32
        self.reader.seek(start_frame as u32)?;
        let samples = self
            .reader
            .samples::<i16>()
            .take((frames * channels) as usize)
            .collect::<std::result::Result<Vec<i16>, hound::Error>>()?;
        Ok(samples)
    }

    pub fn read_range(&mut self, start_frame: u64, count: u64) -> Result<Vec<u8>> {
        Ok(i16_to_bytes(&self.read_pcm(start_frame, count)?))
    }
}
