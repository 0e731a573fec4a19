use log::{debug, info};
use rubato::{FftFixedIn, Resampler};
use std::error::Error;
use std::fmt::{Debug, Formatter};

const RESAMPLER_CHUNK: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Mono resampler from the device rate to the classifier rate.
/// Input is buffered until a full resampler chunk is available.
pub struct MonoResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    pub input_rate: u32,
    pub output_rate: u32,
}

impl Debug for MonoResampler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!(
            "resample {} -> {}, chunk size {}, pending {}",
            self.input_rate,
            self.output_rate,
            self.chunk_for_resampling(),
            self.pending.len()
        ))
    }
}

pub fn make_resampler(input_rate: u32, output_rate: u32) -> Result<MonoResampler, Box<dyn Error>> {
    let inner = if input_rate == output_rate {
        info!("mic sample rate {} matches, no resampling", input_rate);
        None
    } else {
        let r = FftFixedIn::<f32>::new(input_rate as _, output_rate as _, RESAMPLER_CHUNK, SUB_CHUNKS, 1)?;
        debug!("mic sample rate {} resampled to {}", input_rate, output_rate);
        Some(r)
    };
    Ok(MonoResampler {
        inner,
        pending: Vec::with_capacity(RESAMPLER_CHUNK * 2),
        input_rate,
        output_rate,
    })
}

impl MonoResampler {
    pub fn chunk_for_resampling(&self) -> usize {
        self.inner.as_ref().map(|r| r.input_frames_next()).unwrap_or(1)
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feeds mono samples, returns whatever output is ready.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, String> {
        let resampler = match self.inner.as_mut() {
            None => return Ok(input.to_vec()),
            Some(r) => r,
        };
        self.pending.extend_from_slice(input);

        let mut out = vec![];
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[block], None) {
                Ok(mut resampled) => out.append(&mut resampled[0]),
                Err(e) => return Err(format!("Resampler process returned an error {}", e)),
            }
        }
        Ok(out)
    }
}
