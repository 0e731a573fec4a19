use crate::SAMPLE_RATE;
use cpal::traits::DeviceTrait;
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info};

fn handled_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::I16 | SampleFormat::F32 | SampleFormat::U16)
}

fn supports_rate(config: &SupportedStreamConfigRange, rate: u32) -> bool {
    config.min_sample_rate().0 <= rate && config.max_sample_rate().0 >= rate
}

/// Picks the input config closest to what the classifier wants: mono at 22050 Hz.
/// Anything else is downmixed and resampled by the capture callback.
pub fn find_best_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), Box<dyn std::error::Error>> {
    let supported_configs: Vec<SupportedStreamConfigRange> = match device.supported_input_configs() {
        Ok(supported_configs) => supported_configs.filter(|c| handled_format(c.sample_format())).collect(),
        Err(e) => {
            error!("error getting supported_input_configs : {:?}", e);
            return Err(Box::new(e));
        }
    };

    for config in &supported_configs {
        debug!("Supported input config: {:?}", config);
    }

    let desired_sample_rate = SAMPLE_RATE;

    // mono at the model rate, i16 first since it needs no conversion
    for format in [SampleFormat::I16, SampleFormat::F32] {
        let exact = supported_configs
            .iter()
            .find(|c| c.channels() == 1 && c.sample_format() == format && supports_rate(c, desired_sample_rate));
        if let Some(config_range) = exact {
            let config = config_range.clone().with_sample_rate(SampleRate(desired_sample_rate));
            info!("Found desired configuration (22050 Hz, {:?}, mono)", format);
            return Ok((config.config(), format));
        }
    }

    // any channel count at the model rate
    if let Some(config_range) = supported_configs.iter().find(|c| supports_rate(c, desired_sample_rate)) {
        let config = config_range.clone().with_sample_rate(SampleRate(desired_sample_rate));
        debug!("Found {}-channel configuration at 22050 Hz", config_range.channels());
        return Ok((config.config(), config_range.sample_format()));
    }

    // mono at another rate, resampled later
    if let Some(config_range) = supported_configs.iter().find(|c| c.channels() == 1) {
        let config = config_range.clone().with_max_sample_rate();
        debug!("Found mono configuration with different sample rate {:?}", &config);
        return Ok((config.config(), config_range.sample_format()));
    }

    if let Some(config_range) = supported_configs.first() {
        let config = config_range.clone().with_max_sample_rate();
        debug!("Found configuration needing downmix and resampling {:?}", &config);
        return Ok((config.config(), config_range.sample_format()));
    }

    let default_config = device.default_input_config()?;
    debug!("Using default configuration {:?} ", default_config);
    Ok((default_config.config(), default_config.sample_format()))
}
