use crate::error::CaptureError;
use crate::mic::converters::{i16_to_f32, u16_to_f32};
use crate::mic::mic_config::find_best_config;
use crate::mic::process_audio::device_block_to_bytes;
use crate::mic::resampler::make_resampler;
use crate::mic::{AudioFormat, CaptureSource};
use crate::SAMPLE_RATE;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const CALLBACK_QUEUE: usize = 64;

type Block = Result<Vec<u8>, String>;

/// Default input device through cpal, delivered as 22050 Hz mono i16 bytes.
/// Dropping it stops the stream and releases the device.
pub struct MicCapture {
    stream: cpal::Stream,
    receiver: Receiver<Block>,
    dropped: Arc<AtomicUsize>,
    device_name: String,
}

impl MicCapture {
    pub fn default_mic_name() -> Result<String, String> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or("No mic available")?;
        device.name().map_err(|e| e.to_string())
    }

    pub fn open() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
        let device_name = device.name().map_err(|e| CaptureError::Backend(e.to_string()))?;
        debug!("Input device: {}", device_name);

        info!("Starting to find the best config");
        let (config, sample_format) = find_best_config(&device).map_err(|e| {
            warn!("Mic not compatible {}", e);
            CaptureError::Backend(e.to_string())
        })?;
        info!("Selected input config: {:?} {:?}", config, sample_format);

        let channels = config.channels as usize;
        let resampler =
            make_resampler(config.sample_rate.0, SAMPLE_RATE).map_err(|e| CaptureError::Backend(e.to_string()))?;

        let (sender, receiver) = bounded::<Block>(CALLBACK_QUEUE);
        let dropped = Arc::new(AtomicUsize::new(0));

        let err_sender = sender.clone();
        let err_fn = move |err: cpal::StreamError| {
            warn!("An error occurred on the input stream: {}", err);
            let _ = err_sender.try_send(Err(err.to_string()));
        };
        let timeout = Some(Duration::from_millis(80));

        let stream = match sample_format {
            SampleFormat::F32 => {
                let mut forward = forwarder(sender, dropped.clone(), channels, resampler);
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| forward(data, |s| s),
                    err_fn,
                    timeout,
                )
            }
            SampleFormat::I16 => {
                let mut forward = forwarder(sender, dropped.clone(), channels, resampler);
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| forward(data, |s| i16_to_f32(&s)),
                    err_fn,
                    timeout,
                )
            }
            SampleFormat::U16 => {
                let mut forward = forwarder(sender, dropped.clone(), channels, resampler);
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| forward(data, |s| u16_to_f32(&s)),
                    err_fn,
                    timeout,
                )
            }
            other => return Err(CaptureError::Backend(format!("Unsupported sample format {:?}", other))),
        }
        .map_err(|e| CaptureError::Backend(e.to_string()))?;

        stream.play().map_err(|e| CaptureError::Backend(e.to_string()))?;
        info!("Microphone '{}' started", device_name);

        Ok(MicCapture {
            stream,
            receiver,
            dropped,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Device blocks lost because `read` fell behind the callback.
    pub fn dropped_blocks(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Builds the per-callback closure: downmix, resample, encode, hand over without blocking.
fn forwarder<T: Copy>(
    sender: Sender<Block>,
    dropped: Arc<AtomicUsize>,
    channels: usize,
    mut resampler: crate::mic::resampler::MonoResampler,
) -> impl FnMut(&[T], fn(T) -> f32) + Send + 'static
where
    T: Send + 'static,
{
    move |data: &[T], convert: fn(T) -> f32| {
        let block = match device_block_to_bytes(data, channels, &mut resampler, convert) {
            Ok(bytes) if bytes.is_empty() => return,
            other => other,
        };
        if let Err(TrySendError::Full(_)) = sender.try_send(block) {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl CaptureSource for MicCapture {
    fn format(&self) -> AudioFormat {
        AudioFormat::mono(SAMPLE_RATE)
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        match self.receiver.recv_timeout(READ_TIMEOUT) {
            Ok(Ok(bytes)) => Ok(Some(bytes)),
            Ok(Err(e)) => Err(CaptureError::DeviceLost(e)),
            Err(RecvTimeoutError::Timeout) => Ok(Some(vec![])),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::DeviceLost("input stream closed".to_string())),
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            debug!("Pausing stream on release failed: {}", e);
        }
        let dropped = self.dropped_blocks();
        if dropped > 0 {
            warn!("{} microphone blocks were dropped", dropped);
        }
        info!("Microphone '{}' released", self.device_name);
    }
}
