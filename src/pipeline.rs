//! Capture loop and classification worker.
//!
//! The capture loop runs on the caller's thread and owns the capture source:
//! read, assemble, enqueue. A single worker thread drains the queue in capture
//! order and runs extract → pack → classify → gate → dispatch per chunk.
//! The queue is bounded; when the worker falls behind the oldest chunks are
//! overwritten and counted as dropped.

use crate::alert::{Alert, AlertDispatcher, AlertSink, Clock};
use crate::audio::{FeatureExtractor, NormalizedSamples};
use crate::chunk::{AudioChunk, ChunkAssembler};
use crate::config::{ListenConfig, SettingsStore, Thresholds};
use crate::error::{CaptureError, ChunkError, PipelineError, ShapeError};
use crate::gate::gate;
use crate::mic::{AudioFormat, CaptureSource};
use crate::model::{ClassificationResult, Classifier, Label};
use crate::packer::pack;
use crate::rms::calculate_rms;
use crate::save::save_chunk_wav;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Lifecycle control shared with whoever owns the listening session.
#[derive(Debug, Clone, Default)]
pub struct PipelineHandle {
    token: CancellationToken,
    reload: Arc<AtomicBool>,
}

impl PipelineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops capture and lets the worker finish the chunk it is on.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Thresholds are re-read before the next chunk.
    pub fn reload_settings(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub result: ClassificationResult,
    pub final_label: Label,
    pub alert: Option<Alert>,
}

/// Worker side state: everything a chunk goes through after it leaves the queue.
pub struct ChunkProcessor {
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
    settings: Arc<dyn SettingsStore>,
    thresholds: Thresholds,
    dispatcher: AlertDispatcher,
    sink: Box<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    config: ListenConfig,
}

impl ChunkProcessor {
    /// Fails when the model's input does not match what the extractor produces.
    pub fn new(
        config: ListenConfig,
        classifier: Box<dyn Classifier>,
        settings: Arc<dyn SettingsStore>,
        sink: Box<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;
        if classifier.input_coeffs() != config.mfcc.coefficients {
            error!(
                "Model expects {} coefficients, extractor produces {}",
                classifier.input_coeffs(),
                config.mfcc.coefficients
            );
            return Err(PipelineError::Shape(ShapeError {
                expected: classifier.input_coeffs(),
                actual: config.mfcc.coefficients,
            }));
        }
        let frames = config.mfcc.frame_count(config.chunk_samples());
        if frames != classifier.input_frames() {
            info!(
                "Chunk yields {} frames, model takes {}; {}",
                frames,
                classifier.input_frames(),
                if frames < classifier.input_frames() { "zero padding" } else { "truncating" }
            );
        }
        let thresholds = settings.get();
        Ok(ChunkProcessor {
            extractor: FeatureExtractor::new(&config.mfcc),
            dispatcher: AlertDispatcher::new(config.cooldown_ms),
            classifier,
            settings,
            thresholds,
            sink,
            clock,
            config,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn reload_thresholds(&mut self) {
        self.thresholds = self.settings.get();
        debug!("Settings loaded: {:?}", self.thresholds);
    }

    /// Classifies one chunk and raises an alert if it survives the gate and the cooldown.
    pub fn process(&mut self, chunk: &AudioChunk) -> Result<ChunkOutcome, ChunkError> {
        let start = Instant::now();
        let normalized = NormalizedSamples::from_chunk(chunk);
        let rms = calculate_rms(normalized.samples());

        let features = self.extractor.extract_normalized(&normalized)?;
        let tensor = pack(&features, self.classifier.input_frames(), self.classifier.input_coeffs())?;
        let probabilities = self.classifier.classify(&tensor)?;

        let result = ClassificationResult::new(probabilities, rms);
        debug!(
            "Chunk {}: probs {:?}, initial label '{}', rms {}",
            chunk.sequence(),
            result.probabilities.0,
            result.predicted_label,
            rms
        );
        let final_label = gate(&result, &self.thresholds);
        info!("Chunk {} final classification '{}'", chunk.sequence(), final_label);

        let now_ms = self.clock.now_ms();
        let alert = self.dispatcher.dispatch(final_label, now_ms).map(|kind| {
            // pick up settings changed while idle before vibrating
            self.reload_thresholds();
            let vibration_ms = self.thresholds.vibration_duration_ms;
            let alert = Alert {
                kind,
                timestamp: Utc::now(),
                at_ms: now_ms,
                vibration: (vibration_ms > 0.0).then(|| Duration::from_millis(vibration_ms as u64)),
                chunk: chunk.sequence(),
            };
            self.sink.notify(&alert);
            if self.config.save_wavs {
                let probability = result.probabilities.get(final_label).unwrap_or(0.0);
                if let Err(e) =
                    save_chunk_wav(chunk, kind, probability, self.config.mfcc.sample_rate, &self.config.wav_dir)
                {
                    warn!("Error writing detection wav {:?}", e);
                }
            }
            alert
        });

        debug!("Chunk {} processed in {:?}", chunk.sequence(), start.elapsed());
        Ok(ChunkOutcome {
            result,
            final_label,
            alert,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub chunks_enqueued: u64,
    pub chunks_processed: u64,
    pub chunks_failed: u64,
    pub chunks_dropped: u64,
    pub malformed_reads: u64,
    pub alerts: u64,
}

#[derive(Debug, Default)]
struct WorkerStats {
    processed: u64,
    failed: u64,
    dropped: u64,
    alerts: u64,
}

#[derive(Debug, Default)]
struct CaptureStats {
    enqueued: u64,
    malformed: u64,
}

pub struct Pipeline {
    processor: ChunkProcessor,
    config: ListenConfig,
    handle: PipelineHandle,
}

impl Pipeline {
    pub fn new(
        config: ListenConfig,
        classifier: Box<dyn Classifier>,
        settings: Arc<dyn SettingsStore>,
        sink: Box<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let processor = ChunkProcessor::new(config.clone(), classifier, settings, sink, clock)?;
        Ok(Pipeline {
            processor,
            config,
            handle: PipelineHandle::new(),
        })
    }

    pub fn with_handle(mut self, handle: PipelineHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Runs until the source ends, the handle is stopped, or a fatal error occurs.
    /// The capture source is dropped, releasing the device, before this returns.
    pub fn run<C: CaptureSource>(self, mut capture: C) -> Result<PipelineReport, PipelineError> {
        let expected = AudioFormat::mono(self.config.mfcc.sample_rate);
        let format = capture.format();
        if format != expected {
            error!("Capture format {:?} does not match {:?}", format, expected);
            return Err(CaptureError::UnsupportedFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
                expected_rate: expected.sample_rate,
            }
            .into());
        }

        let Pipeline {
            mut processor,
            config,
            handle,
        } = self;
        processor.reload_thresholds();

        let (sender, receiver) = broadcast::channel::<AudioChunk>(config.queue_capacity);
        let worker_handle = handle.clone();
        let worker = thread::Builder::new()
            .name("chunk-worker".to_string())
            .spawn(move || worker_loop(processor, receiver, worker_handle))
            .map_err(|e| PipelineError::Worker(e.to_string()))?;

        info!("Starting capture loop, listening");
        let captured = capture_loop(&mut capture, &sender, &handle, config.chunk_samples());
        drop(capture);
        drop(sender);

        if captured.is_err() {
            // fatal: the worker only finishes what it is on
            handle.stop();
        }
        let worker_stats = worker
            .join()
            .map_err(|_| PipelineError::Worker("chunk worker panicked".to_string()))?;
        let capture_stats = captured?;

        let report = PipelineReport {
            chunks_enqueued: capture_stats.enqueued,
            chunks_processed: worker_stats.processed,
            chunks_failed: worker_stats.failed,
            chunks_dropped: worker_stats.dropped,
            malformed_reads: capture_stats.malformed,
            alerts: worker_stats.alerts,
        };
        info!("Listening stopped: {:?}", report);
        Ok(report)
    }
}

fn capture_loop<C: CaptureSource>(
    capture: &mut C,
    sender: &broadcast::Sender<AudioChunk>,
    handle: &PipelineHandle,
    chunk_samples: usize,
) -> Result<CaptureStats, CaptureError> {
    let mut assembler = ChunkAssembler::new(chunk_samples);
    let mut stats = CaptureStats::default();

    while !handle.is_stopped() {
        let bytes = match capture.read() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("Capture source ended, {} bytes left unassembled", assembler.pending_len());
                break;
            }
            Err(e) => {
                error!("Capture failed: {}", e);
                return Err(e);
            }
        };
        if bytes.is_empty() {
            continue;
        }
        match assembler.append(&bytes) {
            Ok(chunks) => {
                for chunk in chunks {
                    if sender.send(chunk).is_err() {
                        warn!("Chunk worker is gone, stopping capture");
                        return Ok(stats);
                    }
                    stats.enqueued += 1;
                }
            }
            Err(e) => {
                warn!("Dropping capture read: {}", e);
                stats.malformed += 1;
            }
        }
    }
    Ok(stats)
}

fn worker_loop(
    mut processor: ChunkProcessor,
    mut receiver: broadcast::Receiver<AudioChunk>,
    handle: PipelineHandle,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        match receiver.blocking_recv() {
            Ok(chunk) => {
                if handle.is_stopped() {
                    debug!("Stop requested, discarding queued chunk {}", chunk.sequence());
                    break;
                }
                if handle.take_reload() {
                    processor.reload_thresholds();
                }
                match processor.process(&chunk) {
                    Ok(outcome) => {
                        stats.processed += 1;
                        if outcome.alert.is_some() {
                            stats.alerts += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Chunk {} skipped: {}", chunk.sequence(), e);
                        stats.failed += 1;
                    }
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Worker fell behind, {} oldest chunks dropped", n);
                stats.dropped += n;
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Chunk worker finished: {:?}", stats);
    stats
}
