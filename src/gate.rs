use crate::config::Thresholds;
use crate::model::{ClassificationResult, Label};
use log::{debug, info};

/// Re-checks horn and siren predictions against the chunk's RMS energy.
/// Quiet hits become `Background`; `Traffic` and `Background` pass through.
pub fn gate(result: &ClassificationResult, thresholds: &Thresholds) -> Label {
    let limit = match result.predicted_label {
        Label::CarHorn => thresholds.car_horn_rms,
        Label::EmergencyVehicle => thresholds.emergency_rms,
        other => return other,
    };
    debug!("Predicted '{}'. RMS {} threshold {}", result.predicted_label, result.rms_energy, limit);
    if result.rms_energy < limit {
        info!(
            "'{}' ignored due to low RMS ({} < {})",
            result.predicted_label, result.rms_energy, limit
        );
        Label::Background
    } else {
        result.predicted_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassProbabilities;

    fn result(label_probs: Vec<f32>, rms: f32) -> ClassificationResult {
        ClassificationResult::new(ClassProbabilities(label_probs), rms)
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            car_horn_rms: 0.15,
            emergency_rms: 0.30,
            vibration_duration_ms: 500.0,
        }
    }

    #[test]
    fn quiet_horn_becomes_background() {
        assert_eq!(gate(&result(vec![0.9, 0.05, 0.05], 0.149), &thresholds()), Label::Background);
    }

    #[test]
    fn horn_exactly_at_threshold_is_kept() {
        assert_eq!(gate(&result(vec![0.9, 0.05, 0.05], 0.15), &thresholds()), Label::CarHorn);
    }

    #[test]
    fn siren_uses_its_own_threshold() {
        assert_eq!(gate(&result(vec![0.1, 0.8, 0.1], 0.2), &thresholds()), Label::Background);
        assert_eq!(gate(&result(vec![0.1, 0.8, 0.1], 0.3), &thresholds()), Label::EmergencyVehicle);
    }

    #[test]
    fn traffic_is_never_gated() {
        assert_eq!(gate(&result(vec![0.1, 0.1, 0.8], 0.0), &thresholds()), Label::Traffic);
    }
}
