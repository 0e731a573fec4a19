pub fn f32_to_i16(sample: &f32) -> i16 {
    // Clamp the sample to the [-1.0, 1.0] range
    let clamped_sample = sample.clamp(-1.0, 1.0);

    // Scale and cast to i16
    (clamped_sample * 32767.0) as i16
}

pub fn i16_to_f32(sample: &i16) -> f32 {
    *sample as f32 / 32768.0
}

pub fn u16_to_f32(sample: &u16) -> f32 {
    (*sample as f32 - 32768.0) / 32768.0
}

/// Little-endian byte stream of the samples, the wire format of capture reads.
pub fn f32_to_le_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| f32_to_i16(s).to_le_bytes()).collect()
}
