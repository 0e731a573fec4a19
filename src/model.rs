use crate::error::InferenceError;
use crate::packer::InputTensor;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod tract_model;

/// Model class order, fixed when the model was trained.
pub const CLASS_LABELS: [Label; 3] = [Label::CarHorn, Label::EmergencyVehicle, Label::Traffic];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    CarHorn,
    EmergencyVehicle,
    Traffic,
    Background,
}

impl Label {
    pub fn from_index(index: usize) -> Label {
        CLASS_LABELS.get(index).copied().unwrap_or(Label::Background)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::CarHorn => "car_horn",
            Label::EmergencyVehicle => "emergency_vehicle",
            Label::Traffic => "traffic",
            Label::Background => "background",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One probability per class, in model order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities(pub Vec<f32>);

impl ClassProbabilities {
    /// Index of the highest probability. Ties keep the lowest index, NaN never wins.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &p) in self.0.iter().enumerate() {
            if p.is_nan() {
                continue;
            }
            match best {
                Some((_, max)) if p <= max => {}
                _ => best = Some((i, p)),
            }
        }
        best.map(|(i, _)| i)
    }

    pub fn predicted_label(&self) -> Label {
        self.argmax().map(Label::from_index).unwrap_or(Label::Background)
    }

    pub fn get(&self, label: Label) -> Option<f32> {
        CLASS_LABELS.iter().position(|l| *l == label).and_then(|i| self.0.get(i).copied())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub predicted_label: Label,
    pub probabilities: ClassProbabilities,
    pub rms_energy: f32,
}

impl ClassificationResult {
    pub fn new(probabilities: ClassProbabilities, rms_energy: f32) -> Self {
        ClassificationResult {
            predicted_label: probabilities.predicted_label(),
            probabilities,
            rms_energy,
        }
    }
}

/// A loaded, read-only classification model.
pub trait Classifier: Send {
    /// Frames the model expects per input.
    fn input_frames(&self) -> usize;
    /// Coefficients per frame the model expects.
    fn input_coeffs(&self) -> usize;
    fn class_count(&self) -> usize;
    fn classify(&self, tensor: &InputTensor) -> Result<ClassProbabilities, InferenceError>;
}

/// Returns scripted probabilities, cycling through them call by call.
#[derive(Debug)]
pub struct ScriptedClassifier {
    frames: usize,
    coeffs: usize,
    script: Vec<Result<Vec<f32>, String>>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(frames: usize, coeffs: usize, probabilities: Vec<f32>) -> Self {
        Self::with_script(frames, coeffs, vec![Ok(probabilities)])
    }

    /// `Err` entries fail that call with an `InferenceError`.
    pub fn with_script(frames: usize, coeffs: usize, script: Vec<Result<Vec<f32>, String>>) -> Self {
        assert!(!script.is_empty(), "script must have at least one entry");
        ScriptedClassifier {
            frames,
            coeffs,
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for ScriptedClassifier {
    fn input_frames(&self) -> usize {
        self.frames
    }

    fn input_coeffs(&self) -> usize {
        self.coeffs
    }

    fn class_count(&self) -> usize {
        self.script.iter().find_map(|s| s.as_ref().ok().map(Vec::len)).unwrap_or(CLASS_LABELS.len())
    }

    fn classify(&self, tensor: &InputTensor) -> Result<ClassProbabilities, InferenceError> {
        if tensor.dim() != (1, self.frames, self.coeffs) {
            return Err(InferenceError::Run(format!("wrong input shape {:?}", tensor.dim())));
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script[call % self.script.len()] {
            Ok(p) => Ok(ClassProbabilities(p.clone())),
            Err(e) => Err(InferenceError::Run(e.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn argmax_picks_highest() {
        let p = ClassProbabilities(vec![0.1, 0.7, 0.2]);
        assert_eq!(p.argmax(), Some(1));
        assert_eq!(p.predicted_label(), Label::EmergencyVehicle);
    }

    #[test]
    fn argmax_ties_keep_first() {
        let p = ClassProbabilities(vec![0.4, 0.4, 0.2]);
        assert_eq!(p.predicted_label(), Label::CarHorn);
        let p = ClassProbabilities(vec![0.1, 0.45, 0.45]);
        assert_eq!(p.predicted_label(), Label::EmergencyVehicle);
    }

    #[test]
    fn empty_or_unknown_is_background() {
        assert_eq!(ClassProbabilities(vec![]).predicted_label(), Label::Background);
        assert_eq!(Label::from_index(7), Label::Background);
    }

    #[test]
    fn nan_never_wins() {
        let p = ClassProbabilities(vec![f32::NAN, 0.2, 0.1]);
        assert_eq!(p.predicted_label(), Label::EmergencyVehicle);
    }

    #[test]
    fn scripted_classifier_cycles() {
        let c = ScriptedClassifier::with_script(2, 3, vec![Ok(vec![1.0, 0.0, 0.0]), Err("boom".to_string())]);
        let t = Array3::zeros((1, 2, 3));
        assert_eq!(c.classify(&t).unwrap().predicted_label(), Label::CarHorn);
        assert!(c.classify(&t).is_err());
        assert!(c.classify(&t).is_ok());
        assert_eq!(c.calls(), 3);
        assert!(c.classify(&Array3::zeros((1, 3, 3))).is_err());
    }
}
