use crate::error::SettingsError;
use crate::{CHUNK_SECS, COOLDOWN_MS, SAMPLE_RATE};
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const DEFAULT_CAR_HORN_RMS: f32 = 0.15;
pub const DEFAULT_EMERGENCY_RMS: f32 = 0.14;
pub const DEFAULT_VIBRATION_MS: f32 = 500.0;

pub const RMS_THRESHOLD_RANGE: (f32, f32) = (0.01, 0.5);
pub const VIBRATION_MS_RANGE: (f32, f32) = (100.0, 2000.0);

/// User tunable values. Read once per pipeline start and between chunks, never mid-chunk.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub car_horn_rms: f32,
    pub emergency_rms: f32,
    pub vibration_duration_ms: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            car_horn_rms: DEFAULT_CAR_HORN_RMS,
            emergency_rms: DEFAULT_EMERGENCY_RMS,
            vibration_duration_ms: DEFAULT_VIBRATION_MS,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("car_horn_rms", self.car_horn_rms, RMS_THRESHOLD_RANGE)?;
        check_range("emergency_rms", self.emergency_rms, RMS_THRESHOLD_RANGE)?;
        if self.vibration_duration_ms == 0.0 {
            // vibration off
            return Ok(());
        }
        check_range("vibration_duration_ms", self.vibration_duration_ms, VIBRATION_MS_RANGE)
    }
}

fn check_range(name: &'static str, value: f32, (min, max): (f32, f32)) -> Result<(), SettingsError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange { name, value, min, max })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MfccConfig {
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_size: usize,
    pub mel_filters: usize,
    pub coefficients: usize,
    pub lower_freq: f32,
    pub upper_freq: f32,
}

impl Default for MfccConfig {
    fn default() -> Self {
        MfccConfig {
            sample_rate: SAMPLE_RATE,
            window_size: 2048, // n_fft
            hop_size: 512,     // 75% overlap
            mel_filters: 128,
            coefficients: 20,
            lower_freq: 0.0,
            upper_freq: SAMPLE_RATE as f32 / 2.0,
        }
    }
}

impl MfccConfig {
    /// Number of frames a buffer of `samples` yields, 0 when shorter than one window.
    pub fn frame_count(&self, samples: usize) -> usize {
        if samples < self.window_size {
            0
        } else {
            (samples - self.window_size) / self.hop_size + 1
        }
    }
}

/// Construction time settings of the pipeline.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ListenConfig {
    pub chunk_secs: u32,
    pub mfcc: MfccConfig,
    pub model_frames: usize,
    pub class_count: usize,
    pub queue_capacity: usize,
    pub cooldown_ms: u64,
    pub save_wavs: bool,
    pub wav_dir: PathBuf,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            chunk_secs: CHUNK_SECS,
            mfcc: MfccConfig::default(),
            model_frames: 130,       // frames declared by the bundled 3-class model
            class_count: 3,          // car_horn, emergency_vehicle, traffic
            queue_capacity: 8,       // ~24 secs of audio before dropping oldest
            cooldown_ms: COOLDOWN_MS,
            save_wavs: false,        // true to keep the chunk behind every alert
            wav_dir: PathBuf::from("detections"),
        }
    }
}

impl ListenConfig {
    pub fn chunk_samples(&self) -> usize {
        self.mfcc.sample_rate as usize * self.chunk_secs as usize
    }

    pub fn validate(&self) -> Result<(), String> {
        let m = &self.mfcc;
        if m.window_size == 0 || m.hop_size == 0 {
            return Err("window and hop sizes must be positive".to_string());
        }
        if m.coefficients == 0 || m.coefficients > m.mel_filters {
            return Err(format!("{} coefficients needs 1..={} mel filters", m.coefficients, m.mel_filters));
        }
        if !(m.lower_freq >= 0.0 && m.lower_freq < m.upper_freq && m.upper_freq <= m.sample_rate as f32 / 2.0) {
            return Err(format!("invalid frequency range {}..{}", m.lower_freq, m.upper_freq));
        }
        if self.chunk_samples() < m.window_size {
            return Err("chunk is shorter than one analysis window".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue capacity must be at least 1".to_string());
        }
        if self.model_frames == 0 || self.class_count == 0 {
            return Err("model shape must be non-empty".to_string());
        }
        Ok(())
    }
}

/// Where the pipeline reads thresholds from.
pub trait SettingsStore: Send + Sync {
    fn get(&self) -> Thresholds;
    fn set(&self, thresholds: Thresholds) -> Result<(), SettingsError>;
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: RwLock<Thresholds>,
}

impl MemorySettings {
    pub fn new(thresholds: Thresholds) -> Self {
        MemorySettings { inner: RwLock::new(thresholds) }
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self) -> Thresholds {
        match self.inner.read() {
            Ok(t) => *t,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set(&self, thresholds: Thresholds) -> Result<(), SettingsError> {
        thresholds.validate()?;
        let mut t = self.inner.write().map_err(|e| SettingsError::Store(e.to_string()))?;
        *t = thresholds;
        Ok(())
    }
}

/// Thresholds persisted in a config file through confy.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    cached: RwLock<Thresholds>,
}

impl FileSettings {
    pub fn open(path: &Path) -> Self {
        let thresholds = load_thresholds(path);
        FileSettings {
            path: path.to_path_buf(),
            cached: RwLock::new(thresholds),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    /// Re-reads the file so values changed by another process are picked up.
    fn get(&self) -> Thresholds {
        match confy::load_path::<Thresholds>(&self.path) {
            Ok(t) if t.validate().is_ok() => {
                if let Ok(mut cached) = self.cached.write() {
                    *cached = t;
                }
                t
            }
            Ok(t) => {
                warn!("Ignoring out of range settings {:?} in {:?}", t, self.path);
                self.cached.read().map(|c| *c).unwrap_or_default()
            }
            Err(e) => {
                warn!("Can't load {:?}; error {}. Using last known settings", self.path, e);
                self.cached.read().map(|c| *c).unwrap_or_default()
            }
        }
    }

    fn set(&self, thresholds: Thresholds) -> Result<(), SettingsError> {
        thresholds.validate()?;
        confy::store_path(&self.path, thresholds).map_err(|e| SettingsError::Store(e.to_string()))?;
        let mut cached = self.cached.write().map_err(|e| SettingsError::Store(e.to_string()))?;
        *cached = thresholds;
        debug!("Settings stored to {:?}: {:?}", self.path, thresholds);
        Ok(())
    }
}

pub fn load_thresholds(config_file_name: &Path) -> Thresholds {
    match confy::load_path::<Thresholds>(config_file_name) {
        Ok(t) if t.validate().is_ok() => t,
        other => {
            match other {
                Ok(t) => warn!("Out of range settings {:?} in {:?}. Creating defaults", t, config_file_name),
                Err(e) => warn!("Can't load {:?}; error {}. Creating defaults", config_file_name, e),
            }
            let defaults = Thresholds::default();
            if let Err(e) = confy::store_path(config_file_name, defaults) {
                warn!("Can't store {:?}; error '{}'", config_file_name, e);
            }
            defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Thresholds::default().validate().is_ok());
        assert!(ListenConfig::default().validate().is_ok());
    }

    #[test]
    fn frame_count_law() {
        let m = MfccConfig::default();
        assert_eq!(m.frame_count(66150), 126);
        assert_eq!(m.frame_count(2048), 1);
        assert_eq!(m.frame_count(2047), 0);
    }

    #[test]
    fn memory_settings_rejects_out_of_range() {
        let store = MemorySettings::default();
        let bad = Thresholds { car_horn_rms: 0.9, ..Thresholds::default() };
        assert!(matches!(store.set(bad), Err(SettingsError::OutOfRange { name: "car_horn_rms", .. })));
        assert_eq!(store.get(), Thresholds::default());

        let good = Thresholds { emergency_rms: 0.30, ..Thresholds::default() };
        store.set(good).unwrap();
        assert_eq!(store.get().emergency_rms, 0.30);
    }

    #[test]
    fn vibration_range_checked() {
        let t = Thresholds { vibration_duration_ms: 50.0, ..Thresholds::default() };
        assert!(t.validate().is_err());
        let t = Thresholds { vibration_duration_ms: f32::NAN, ..Thresholds::default() };
        assert!(t.validate().is_err());
        let t = Thresholds { vibration_duration_ms: -1.0, ..Thresholds::default() };
        assert!(t.validate().is_err());
    }

    #[test]
    fn zero_vibration_disables_it() {
        let off = Thresholds { vibration_duration_ms: 0.0, ..Thresholds::default() };
        assert!(off.validate().is_ok());
        let store = MemorySettings::default();
        store.set(off).unwrap();
        assert_eq!(store.get().vibration_duration_ms, 0.0);
    }

    #[test]
    fn file_settings_round_trip() {
        let path = std::env::temp_dir().join(format!("safesign-settings-{}.toml", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let store = FileSettings::open(&path);
        assert_eq!(store.get(), Thresholds::default());

        let changed = Thresholds { car_horn_rms: 0.2, emergency_rms: 0.3, vibration_duration_ms: 900.0 };
        store.set(changed).unwrap();
        assert_eq!(FileSettings::open(&path).get(), changed);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_listen_config() {
        let mut c = ListenConfig::default();
        c.queue_capacity = 0;
        assert!(c.validate().is_err());

        let mut c = ListenConfig::default();
        c.mfcc.coefficients = 200;
        assert!(c.validate().is_err());
    }
}
