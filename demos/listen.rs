use env_logger::Builder;
use log::{info, warn, LevelFilter};
use safesign_rs::alert::{LogSink, SystemClock};
use safesign_rs::config::{FileSettings, ListenConfig};
use safesign_rs::listen;
use safesign_rs::mic::mic_cpal::MicCapture;
use safesign_rs::mic::wav_capture::WavCapture;
use safesign_rs::model::tract_model::TractClassifier;
use safesign_rs::pipeline::{Pipeline, PipelineHandle};
use std::path::Path;
use std::sync::Arc;
use std::thread;

const SETTINGS_FILE: &str = "safesign.toml";

/// Listens on the default microphone, or replays a wav file, and logs road sound alerts.
///
/// Usage: listen <model.onnx> [<file.wav>]
fn main() -> Result<(), anyhow::Error> {
    Builder::new().filter_level(LevelFilter::Info).init();

    let args: Vec<String> = std::env::args().collect();
    let Some(model_path) = args.get(1) else {
        return Err(anyhow::anyhow!("usage: {} <model.onnx> [<file.wav>]", args[0]));
    };

    let config = ListenConfig::default();
    let settings = Arc::new(FileSettings::open(Path::new(SETTINGS_FILE)));
    info!("Settings from {:?}", settings.path());

    let report = match args.get(2) {
        Some(wav) => {
            let classifier =
                TractClassifier::from_path(Path::new(model_path), config.model_frames, config.mfcc.coefficients, config.class_count)?;
            let capture = WavCapture::open(Path::new(wav), 4096)?;
            Pipeline::new(config, Box::new(classifier), settings, Box::new(LogSink), Arc::new(SystemClock))?.run(capture)?
        }
        None => {
            let handle = PipelineHandle::new();
            let stopper = handle.clone();
            thread::spawn(move || {
                let mut input = String::new();
                let _ = std::io::stdin().read_line(&mut input);
                stopper.stop();
            });
            match MicCapture::default_mic_name() {
                Ok(name) => info!("Default input device: {}", name),
                Err(e) => warn!("Couldn't get mic device: {}", e),
            }
            println!("Listening for horns and sirens... Press Enter to stop.");
            listen(Path::new(model_path), config, settings, Box::new(LogSink), handle)?
        }
    };

    println!("Done: {:?}", report);
    Ok(())
}
