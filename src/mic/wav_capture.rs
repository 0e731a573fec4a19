use crate::error::CaptureError;
use crate::mic::{AudioFormat, CaptureSource};
use hound::{SampleFormat, WavReader};
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Replays a 16-bit PCM wav file. Reports the file's own format, so a file
/// recorded at another rate or in stereo is rejected by the pipeline.
pub struct WavCapture {
    reader: WavReader<BufReader<File>>,
    format: AudioFormat,
    read_samples: usize,
}

impl WavCapture {
    pub fn open(path: &Path, read_samples: usize) -> Result<Self, CaptureError> {
        info!("Reading file {:?}", path);
        let reader = WavReader::open(path).map_err(|e| CaptureError::Backend(e.to_string()))?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(CaptureError::Backend(format!(
                "{:?} is not 16-bit PCM ({:?}, {} bits)",
                path, spec.sample_format, spec.bits_per_sample
            )));
        }
        Ok(WavCapture {
            format: AudioFormat {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
            },
            reader,
            read_samples: read_samples.max(1),
        })
    }
}

impl CaptureSource for WavCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let mut bytes = Vec::with_capacity(self.read_samples * 2);
        for s in self.reader.samples::<i16>().take(self.read_samples) {
            let s = s.map_err(|e| CaptureError::DeviceLost(e.to_string()))?;
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(bytes))
        }
    }
}
