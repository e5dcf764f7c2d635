//! ONNX Runtime classifier backend.
//!
//! Feature-gated behind `onnx`. The model takes one `[1, n_features]` float
//! input and the score is the first element of the output booked under the
//! model identifier (or of the only output, for single-output models).

use std::path::Path;

use ort::session::Session;
use ort::value::Tensor;
use tc_core::{Classifier, Error, Result};

/// Classifier backed by an ONNX Runtime session.
pub struct OnnxClassifier {
    identifier: String,
    /// `Session::run` requires `&mut self`; scoring already does.
    session: Session,
    output_index: usize,
    n_features: usize,
    input: Vec<f32>,
}

impl OnnxClassifier {
    /// Load `path` and book its output `identifier`.
    pub fn load(path: &Path, identifier: &str, n_features: usize) -> Result<Self> {
        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| {
                Error::Configuration(format!("failed to load ONNX model {}: {e}", path.display()))
            })?;

        let outputs = session.outputs();
        let output_index = match outputs.iter().position(|o| o.name() == identifier) {
            Some(i) => i,
            None if outputs.len() == 1 => 0,
            None => {
                let names: Vec<&str> = outputs.iter().map(|o| o.name()).collect();
                return Err(Error::Configuration(format!(
                    "ONNX model {} has no output '{identifier}' (outputs: {})",
                    path.display(),
                    names.join(", ")
                )));
            }
        };

        tracing::debug!(path = %path.display(), identifier, n_features, "ONNX classifier loaded");
        Ok(Self {
            identifier: identifier.to_string(),
            session,
            output_index,
            n_features,
            input: vec![0.0; n_features],
        })
    }
}

impl Classifier for OnnxClassifier {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn evaluate(&mut self, features: &[f64]) -> Result<f64> {
        if features.len() != self.n_features {
            return Err(Error::Classifier(format!(
                "'{}' expects {} features, got {}",
                self.identifier,
                self.n_features,
                features.len()
            )));
        }
        for (dst, &src) in self.input.iter_mut().zip(features) {
            *dst = src as f32;
        }

        let tensor = Tensor::from_array((vec![1usize, self.n_features], self.input.clone()))
            .map_err(|e| Error::Classifier(format!("ONNX input tensor error: {e}")))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| Error::Classifier(format!("ONNX inference error: {e}")))?;
        let (_shape, data) = outputs[self.output_index]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Classifier(format!("ONNX output extraction error: {e}")))?;

        data.first().map(|&v| v as f64).ok_or_else(|| {
            Error::Classifier(format!("ONNX model '{}' returned an empty output", self.identifier))
        })
    }
}
