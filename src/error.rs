use thiserror::Error;

/// Microphone or capture source failures. Always fatal for the pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,
    #[error("unsupported capture format: {sample_rate} Hz, {channels} channel(s); expected {expected_rate} Hz mono")]
    UnsupportedFormat { sample_rate: u32, channels: u16, expected_rate: u32 },
    #[error("capture device lost: {0}")]
    DeviceLost(String),
    #[error("capture backend error: {0}")]
    Backend(String),
}

/// A capture read that does not hold a whole number of 16-bit samples.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed input: {len} bytes is not a whole number of 16-bit samples")]
pub struct MalformedInputError {
    pub len: usize,
}

#[derive(Debug, Error, PartialEq)]
pub enum ExtractionError {
    #[error("insufficient audio: {samples} samples is shorter than one {window}-sample window")]
    InsufficientAudio { samples: usize, window: usize },
    #[error("non-finite coefficient in frame {frame}")]
    NonFiniteCoefficient { frame: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("shape mismatch: expected {expected} coefficients per frame, got {actual}")]
pub struct ShapeError {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model run failed: {0}")]
    Run(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("can't read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("can't parse or optimise model: {0}")]
    Parse(String),
    /// `None` marks a symbolic or unknown declared dimension.
    #[error("model input shape {actual:?} does not match expected {expected:?}")]
    InputShape { expected: Vec<usize>, actual: Vec<Option<usize>> },
    #[error("model output shape {actual:?} does not match expected {expected:?}")]
    OutputShape { expected: Vec<usize>, actual: Option<Vec<usize>> },
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange { name: &'static str, value: f32, min: f32, max: f32 },
    #[error("settings store error: {0}")]
    Store(String),
}

/// Failure of a single chunk. Logged and skipped, the pipeline keeps running.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Failures that end the listening session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error("model/feature contract mismatch: {0}")]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("worker thread failed: {0}")]
    Worker(String),
}
