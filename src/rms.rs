/// Root-mean-square of the whole buffer, 0.0 for an empty buffer.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    // f64 accumulator, 66150 squares lose precision in f32
    let sum_of_squares: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum_of_squares / samples.len() as f64).sqrt() as f32
}

/// Largest absolute sample value.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |max, s| max.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use crate::rms::{calculate_rms, peak};
    use approx::assert_relative_eq;

    #[test]
    fn tst_rms_constant() {
        assert_relative_eq!(calculate_rms(&[0.5, -0.5, 0.5, -0.5]), 0.5);
    }

    #[test]
    fn tst_rms_empty() {
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn tst_rms_sine() {
        let sine: Vec<f32> = (0..22050).map(|i| (2.0 * std::f32::consts::PI * 441.0 * i as f32 / 22050.0).sin()).collect();
        assert_relative_eq!(calculate_rms(&sine), std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-4);
    }

    #[test]
    fn test_peak() {
        assert_eq!(peak(&[0.1, -0.7, 0.3]), 0.7);
        assert_eq!(peak(&[]), 0.0);
    }
}
