use crate::audio::FeatureMatrix;
use crate::error::ShapeError;
use log::trace;
use ndarray::{s, Array3};

/// Model input, batch x frames x coefficients.
pub type InputTensor = Array3<f32>;

/// Fits a feature matrix to the model's fixed `[1, frames, coeffs]` input.
/// Missing trailing frames are zero filled, extra trailing frames are cut.
/// The coefficient count is a hard contract and is never coerced.
pub fn pack(matrix: &FeatureMatrix, target_frames: usize, target_coeffs: usize) -> Result<InputTensor, ShapeError> {
    if matrix.coeff_count() != target_coeffs {
        return Err(ShapeError {
            expected: target_coeffs,
            actual: matrix.coeff_count(),
        });
    }
    let keep = matrix.frame_count().min(target_frames);
    if keep < target_frames {
        trace!("Padding {} frames with zeros", target_frames - keep);
    } else if matrix.frame_count() > target_frames {
        trace!("Truncating {} trailing frames", matrix.frame_count() - target_frames);
    }

    let mut tensor = Array3::<f32>::zeros((1, target_frames, target_coeffs));
    tensor
        .slice_mut(s![0, ..keep, ..])
        .assign(&matrix.as_array().slice(s![..keep, ..]));
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn matrix(frames: usize, coeffs: usize) -> FeatureMatrix {
        FeatureMatrix::new(Array2::from_shape_fn((frames, coeffs), |(f, c)| (f * 100 + c + 1) as f32))
    }

    #[test]
    fn pads_trailing_frames() {
        let m = matrix(126, 20);
        let t = pack(&m, 130, 20).unwrap();
        assert_eq!(t.dim(), (1, 130, 20));
        assert_eq!(t.slice(s![0, ..126, ..]), m.as_array().view());
        assert!(t.slice(s![0, 126.., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn truncates_keeping_earliest() {
        let m = matrix(140, 20);
        let t = pack(&m, 130, 20).unwrap();
        assert_eq!(t.slice(s![0, .., ..]), m.as_array().slice(s![..130, ..]));
    }

    #[test]
    fn exact_fit_is_copied() {
        let m = matrix(130, 20);
        let t = pack(&m, 130, 20).unwrap();
        assert_eq!(t.slice(s![0, .., ..]), m.as_array().view());
    }

    #[test]
    fn coefficient_mismatch_fails() {
        let m = matrix(126, 13);
        assert_eq!(pack(&m, 130, 20), Err(ShapeError { expected: 20, actual: 13 }));
    }

    #[test]
    fn row_major_by_frame() {
        let t = pack(&matrix(2, 3), 2, 3).unwrap();
        assert_eq!(t.as_slice().unwrap(), &[1.0, 2.0, 3.0, 101.0, 102.0, 103.0]);
    }
}
