use crate::error::{InferenceError, ModelLoadError};
use crate::model::{ClassProbabilities, Classifier};
use crate::packer::InputTensor;
use crate::ModelType;
use log::{debug, info, trace};
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::infer::Factoid;

/// ONNX classifier run with tract. Loaded once, immutable afterwards.
#[derive(Debug)]
pub struct TractClassifier {
    model: ModelType,
    frames: usize,
    coeffs: usize,
    classes: usize,
}

impl TractClassifier {
    pub fn from_path(path: &Path, frames: usize, coeffs: usize, classes: usize) -> Result<Self, ModelLoadError> {
        info!("Loading model {:?}", path);
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes, frames, coeffs, classes)
    }

    /// Parses the model and checks its declared input against `[1, frames, coeffs]`.
    /// Symbolic input dimensions are pinned, the output must be `[1, classes]`.
    /// Any disagreement fails here, never per chunk.
    pub fn from_bytes(bytes: &[u8], frames: usize, coeffs: usize, classes: usize) -> Result<Self, ModelLoadError> {
        let mut rdr = Cursor::new(bytes);
        let model = tract_onnx::onnx()
            .model_for_read(&mut rdr)
            .map_err(|e| ModelLoadError::Parse(format!("{e:#}")))?;

        let expected_input = vec![1, frames, coeffs];
        if let Some(declared) = declared_input(&model) {
            debug!("Model declares input {:?}", declared);
            let matches = declared.len() == expected_input.len()
                && declared.iter().zip(&expected_input).all(|(d, e)| d.map_or(true, |d| d == *e));
            if !matches {
                return Err(ModelLoadError::InputShape {
                    expected: expected_input,
                    actual: declared,
                });
            }
        }

        let optimized = model
            .with_input_fact(0, f32::fact([1, frames, coeffs]).into())
            .and_then(|m| m.into_optimized())
            .map_err(|e| ModelLoadError::Parse(format!("{e:#}")))?;

        let expected = vec![1, classes];
        let actual = optimized
            .output_fact(0)
            .ok()
            .and_then(|f| f.shape.as_concrete().map(|s| s.to_vec()));
        if actual.as_ref() != Some(&expected) {
            return Err(ModelLoadError::OutputShape { expected, actual });
        }

        let model = optimized
            .into_runnable()
            .map_err(|e| ModelLoadError::Parse(format!("{e:#}")))?;
        info!("Model loaded: input [1, {}, {}], output [1, {}]", frames, coeffs, classes);

        Ok(TractClassifier {
            model,
            frames,
            coeffs,
            classes,
        })
    }
}

/// Input dimensions as the model declares them, `None` for symbolic ones.
/// Returns `None` when the rank itself is not declared.
fn declared_input(model: &InferenceModel) -> Option<Vec<Option<usize>>> {
    let fact = model.input_fact(0).ok()?;
    if fact.shape.is_open() {
        return None;
    }
    Some(
        fact.shape
            .dims()
            .map(|d| d.concretize().and_then(|d| d.to_i64().ok()).and_then(|d| usize::try_from(d).ok()))
            .collect(),
    )
}

impl Classifier for TractClassifier {
    fn input_frames(&self) -> usize {
        self.frames
    }

    fn input_coeffs(&self) -> usize {
        self.coeffs
    }

    fn class_count(&self) -> usize {
        self.classes
    }

    fn classify(&self, tensor: &InputTensor) -> Result<ClassProbabilities, InferenceError> {
        let start = Instant::now();
        let data = tensor
            .as_slice()
            .ok_or_else(|| InferenceError::Run("input tensor is not contiguous".to_string()))?;
        let input = Tensor::from_shape(&[1, self.frames, self.coeffs], data).map_err(|e| InferenceError::Run(e.to_string()))?;
        trace!("inputs size {:?}", input.shape());

        let out: TVec<TValue> = self.model.run(tvec!(input.into())).map_err(|e| InferenceError::Run(format!("{e:#}")))?;
        let first = out.first().ok_or_else(|| InferenceError::Output("model returned no outputs".to_string()))?;
        let view = first.to_array_view::<f32>().map_err(|e| InferenceError::Output(e.to_string()))?;
        let probabilities: Vec<f32> = view.iter().copied().collect();
        if probabilities.len() != self.classes {
            return Err(InferenceError::Output(format!(
                "expected {} probabilities, got {}",
                self.classes,
                probabilities.len()
            )));
        }
        debug!("Inference took {:?}", start.elapsed());
        Ok(ClassProbabilities(probabilities))
    }
}

/// Tiny ONNX model for tests: mean over frames, a fixed `[coeffs, classes]` MatMul
/// and a softmax. `frames: None` declares the frame dimension symbolically.
#[cfg(test)]
pub(crate) fn test_model_bytes(frames: Option<usize>, coeffs: usize, classes: usize) -> Vec<u8> {
    use prost::Message;
    use tract_onnx::pb::attribute_proto::AttributeType;
    use tract_onnx::pb::tensor_proto::DataType;
    use tract_onnx::pb::tensor_shape_proto::{dimension, Dimension};
    use tract_onnx::pb::*;

    let value_info = |name: &str, dims: Vec<dimension::Value>| ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto {
                    dim: dims
                        .into_iter()
                        .map(|v| Dimension {
                            value: Some(v),
                            ..Default::default()
                        })
                        .collect(),
                }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    };
    let frame_dim = match frames {
        Some(f) => dimension::Value::DimValue(f as i64),
        None => dimension::Value::DimParam("frames".to_string()),
    };
    let node = |op: &str, inputs: &[&str], output: &str, attribute: Vec<AttributeProto>| NodeProto {
        op_type: op.to_string(),
        name: output.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: vec![output.to_string()],
        attribute,
        ..Default::default()
    };

    let weights = TensorProto {
        name: "w".to_string(),
        dims: vec![coeffs as i64, classes as i64],
        data_type: DataType::Float as i32,
        float_data: (0..coeffs * classes).map(|i| (i as f32 * 0.37).sin()).collect(),
        ..Default::default()
    };
    let graph = GraphProto {
        name: "road_sounds".to_string(),
        node: vec![
            node(
                "ReduceMean",
                &["features"],
                "pooled",
                vec![
                    AttributeProto {
                        name: "axes".to_string(),
                        r#type: AttributeType::Ints as i32,
                        ints: vec![1],
                        ..Default::default()
                    },
                    AttributeProto {
                        name: "keepdims".to_string(),
                        r#type: AttributeType::Int as i32,
                        i: 0,
                        ..Default::default()
                    },
                ],
            ),
            node("MatMul", &["pooled", "w"], "logits", vec![]),
            node("Softmax", &["logits"], "probabilities", vec![]),
        ],
        initializer: vec![weights],
        input: vec![value_info(
            "features",
            vec![dimension::Value::DimValue(1), frame_dim, dimension::Value::DimValue(coeffs as i64)],
        )],
        output: vec![value_info(
            "probabilities",
            vec![dimension::Value::DimValue(1), dimension::Value::DimValue(classes as i64)],
        )],
        ..Default::default()
    };
    ModelProto {
        ir_version: 8,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        graph: Some(graph),
        ..Default::default()
    }
    .encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn features(frames: usize, coeffs: usize) -> InputTensor {
        Array3::from_shape_fn((1, frames, coeffs), |(_, f, c)| ((f * 7 + c * 3) % 11) as f32 * 0.1 - 0.5)
    }

    #[test]
    fn loads_matching_model() {
        let model = TractClassifier::from_bytes(&test_model_bytes(Some(130), 20, 3), 130, 20, 3).unwrap();
        assert_eq!(model.input_frames(), 130);
        assert_eq!(model.input_coeffs(), 20);
        assert_eq!(model.class_count(), 3);
    }

    #[test]
    fn symbolic_frame_count_is_pinned() {
        let model = TractClassifier::from_bytes(&test_model_bytes(None, 20, 3), 130, 20, 3).unwrap();
        let probs = model.classify(&features(130, 20)).unwrap();
        assert_eq!(probs.0.len(), 3);
    }

    #[test]
    fn declared_frame_count_mismatch_fails_to_load() {
        let err = TractClassifier::from_bytes(&test_model_bytes(Some(100), 20, 3), 130, 20, 3).unwrap_err();
        match err {
            ModelLoadError::InputShape { expected, actual } => {
                assert_eq!(expected, vec![1, 130, 20]);
                assert_eq!(actual, vec![Some(1), Some(100), Some(20)]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn declared_coeff_mismatch_fails_to_load() {
        let err = TractClassifier::from_bytes(&test_model_bytes(None, 13, 3), 130, 20, 3).unwrap_err();
        assert!(matches!(err, ModelLoadError::InputShape { .. }));
    }

    #[test]
    fn wrong_class_count_fails_to_load() {
        let err = TractClassifier::from_bytes(&test_model_bytes(Some(130), 20, 4), 130, 20, 3).unwrap_err();
        match err {
            ModelLoadError::OutputShape { expected, actual } => {
                assert_eq!(expected, vec![1, 3]);
                assert_eq!(actual, Some(vec![1, 4]));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn classify_is_repeatable() {
        let model = TractClassifier::from_bytes(&test_model_bytes(Some(130), 20, 3), 130, 20, 3).unwrap();
        let input = features(130, 20);
        let first = model.classify(&input).unwrap();
        let second = model.classify(&input).unwrap();
        assert!(first.0.iter().zip(&second.0).all(|(a, b)| a.to_bits() == b.to_bits()));
        assert_relative_eq!(first.0.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        assert!(first.0.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn garbage_bytes_fail_to_load() {
        let err = TractClassifier::from_bytes(b"definitely not onnx", 130, 20, 3).unwrap_err();
        assert!(matches!(err, ModelLoadError::Parse(_)));
    }

    #[test]
    fn missing_file_fails_to_load() {
        let err = TractClassifier::from_path(Path::new("/nonexistent/model.onnx"), 130, 20, 3).unwrap_err();
        assert!(matches!(err, ModelLoadError::Io(_)));
    }
}
