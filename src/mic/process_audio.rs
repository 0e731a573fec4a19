use crate::mic::converters::f32_to_le_bytes;
use crate::mic::resampler::MonoResampler;

/// Averages interleaved frames down to one channel, converting each sample on the way.
pub fn downmix<T, F>(data: &[T], channels: usize, mut convert: F) -> Vec<f32>
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        return data.iter().copied().map(convert).collect();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().copied().map(&mut convert).sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Turns one device callback into classifier-ready bytes: mono, model rate, i16 LE.
pub fn device_block_to_bytes<T, F>(
    data: &[T],
    channels: usize,
    resampler: &mut MonoResampler,
    convert: F,
) -> Result<Vec<u8>, String>
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    let mono = downmix(data, channels, convert);
    let resampled = resampler.process(&mono)?;
    Ok(f32_to_le_bytes(&resampled))
}
