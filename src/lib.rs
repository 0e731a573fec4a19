use crate::alert::{AlertSink, SystemClock};
use crate::config::{ListenConfig, SettingsStore};
use crate::error::PipelineError;
use crate::mic::mic_cpal::MicCapture;
use crate::model::tract_model::TractClassifier;
use crate::pipeline::{Pipeline, PipelineHandle, PipelineReport};
use hound::{SampleFormat, WavReader, WavSpec};
use log::{error, info};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tract_core::internal::{Graph, RunnableModel, TypedFact, TypedOp};

pub mod alert;
pub mod audio;
pub mod chunk;
pub mod config;
pub mod error;
pub mod gate;
pub mod mic;
pub mod model;
pub mod packer;
pub mod pipeline;
pub mod rms;
pub mod save;

pub const SAMPLE_RATE: u32 = 22050;
pub const CHUNK_SECS: u32 = 3;
pub const CHUNK_SAMPLES: usize = SAMPLE_RATE as usize * CHUNK_SECS as usize;
pub const CHUNK_BYTES: usize = CHUNK_SAMPLES * 2;
pub const COOLDOWN_MS: u64 = 5_000;

type ModelType = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Loads the model, opens the default microphone and listens until `handle` is stopped.
/// Model or microphone failures end the session before any audio is processed.
pub fn listen(
    model_path: &Path,
    config: ListenConfig,
    settings: Arc<dyn SettingsStore>,
    sink: Box<dyn AlertSink>,
    handle: PipelineHandle,
) -> Result<PipelineReport, PipelineError> {
    let classifier = TractClassifier::from_path(model_path, config.model_frames, config.mfcc.coefficients, config.class_count)
        .map_err(|e| {
            error!("CRITICAL: model load failed, not starting capture: {}", e);
            e
        })?;
    let pipeline =
        Pipeline::new(config, Box::new(classifier), settings, sink, Arc::new(SystemClock))?.with_handle(handle);
    let mic = MicCapture::open()?;
    info!("Listening on '{}'", mic.device_name());
    pipeline.run(mic)
}

/// Loads a 16-bit PCM wav file.
pub fn load_wav(path: &Path) -> Result<(Vec<i16>, WavSpec), Box<dyn Error>> {
    info!("Reading file {:?}", path);
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(format!("{:?} is not 16-bit PCM", path).into());
    }
    let data = reader.samples::<i16>().collect::<Result<Vec<i16>, _>>()?;
    Ok((data, spec))
}
