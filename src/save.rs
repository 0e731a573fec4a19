use crate::alert::AlertKind;
use crate::chunk::AudioChunk;
use chrono::Utc;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes the chunk behind an alert as a 16-bit mono wav and returns its path.
pub fn save_chunk_wav(
    chunk: &AudioChunk,
    kind: AlertKind,
    probability: f32,
    sample_rate: u32,
    dir_path: &Path,
) -> Result<PathBuf, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let ts = Utc::now().format("%y%m%d-%H%M%S").to_string();
    let prefix = match kind {
        AlertKind::Horn => "horn",
        AlertKind::Emergency => "emergency",
    };
    let detection_prc = (probability.clamp(0.0, 1.0) * 100.0) as u8;

    fs::create_dir_all(dir_path)?;
    let filename = dir_path.join(format!("{}_{}_{}_{}.wav", prefix, detection_prc, ts, chunk.sequence()));
    let mut writer = hound::WavWriter::create(&filename, spec)?;
    for s in chunk.samples() {
        writer.write_sample(*s)?;
    }
    writer.finalize()?;
    debug!("Recording saved to {:?}", filename);
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_wav;

    #[test]
    fn saved_chunk_reads_back() {
        let dir = std::env::temp_dir().join(format!("safesign-save-{}", std::process::id()));
        let chunk = AudioChunk::new(3, vec![0, 1000, -1000, i16::MAX]);
        let path = save_chunk_wav(&chunk, AlertKind::Emergency, 0.87, 22050, &dir).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("emergency_87_"));
        assert!(name.ends_with("_3.wav"));

        let (samples, spec) = load_wav(&path).unwrap();
        assert_eq!(samples, chunk.samples());
        assert_eq!(spec.sample_rate, 22050);

        let _ = fs::remove_dir_all(&dir);
    }
}
