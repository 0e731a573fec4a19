use crate::error::CaptureError;
use std::collections::VecDeque;

pub mod converters;
pub mod mic_config;
pub mod mic_cpal;
pub mod process_audio;
pub mod resampler;
pub mod wav_capture;

/// Sample layout a capture source delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn mono(sample_rate: u32) -> Self {
        AudioFormat { sample_rate, channels: 1 }
    }
}

/// Source of raw little-endian 16-bit PCM.
pub trait CaptureSource {
    fn format(&self) -> AudioFormat;

    /// Next block of bytes. `Ok(None)` ends the stream, an empty block means no data yet.
    fn read(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;
}

/// Replays scripted reads, for tests and offline runs.
#[derive(Debug)]
pub struct VecCapture {
    format: AudioFormat,
    reads: VecDeque<Result<Vec<u8>, CaptureError>>,
}

impl VecCapture {
    pub fn new(format: AudioFormat, reads: Vec<Vec<u8>>) -> Self {
        VecCapture {
            format,
            reads: reads.into_iter().map(Ok).collect(),
        }
    }

    /// Splits `bytes` into reads of `read_size` bytes.
    pub fn from_bytes(format: AudioFormat, bytes: &[u8], read_size: usize) -> Self {
        Self::new(format, bytes.chunks(read_size.max(1)).map(|c| c.to_vec()).collect())
    }

    pub fn push_error(&mut self, error: CaptureError) {
        self.reads.push_back(Err(error));
    }
}

impl CaptureSource for VecCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        self.reads.pop_front().transpose()
    }
}
