//! Linear (optionally squashed) classifier read from a JSON weight file.
//!
//! Weight file layout:
//!
//! ```json
//! {
//!   "name": "TrackLinear",
//!   "features": ["Track_pt", "Track_chi2"],
//!   "weights": [0.8, -0.3],
//!   "bias": 0.1,
//!   "activation": "sigmoid"
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tc_core::{Classifier, Error, Result};

/// Output transform applied to `w·x + b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Raw linear response.
    #[default]
    Identity,
    /// Logistic function, score in `(0, 1)`.
    Sigmoid,
    /// Hyperbolic tangent, score in `(-1, 1)`.
    Tanh,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }
}

/// On-disk weight file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModelFile {
    /// Model identifier.
    pub name: String,
    /// Feature names in weight order.
    pub features: Vec<String>,
    /// One weight per feature.
    pub weights: Vec<f64>,
    /// Intercept.
    #[serde(default)]
    pub bias: f64,
    /// Output transform.
    #[serde(default)]
    pub activation: Activation,
}

/// Linear classifier `activation(w·x + b)`.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    name: String,
    features: Vec<String>,
    weights: Vec<f64>,
    bias: f64,
    activation: Activation,
}

impl LinearClassifier {
    /// Build from an in-memory model description.
    pub fn from_model(model: LinearModelFile) -> Result<Self> {
        if model.features.is_empty() {
            return Err(Error::Configuration(format!("linear model '{}' has no features", model.name)));
        }
        if model.weights.len() != model.features.len() {
            return Err(Error::Configuration(format!(
                "linear model '{}': {} weights for {} features",
                model.name,
                model.weights.len(),
                model.features.len()
            )));
        }
        if !model.bias.is_finite() || model.weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::Configuration(format!(
                "linear model '{}' has non-finite coefficients",
                model.name
            )));
        }
        Ok(Self {
            name: model.name,
            features: model.features,
            weights: model.weights,
            bias: model.bias,
            activation: model.activation,
        })
    }

    /// Load the weight file at `path` and book it under `identifier`.
    ///
    /// The file's `name` must equal `identifier`.
    pub fn load(path: &Path, identifier: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("reading classifier model {}: {e}", path.display()))
        })?;
        let model: LinearModelFile = serde_json::from_str(&text).map_err(|e| {
            Error::Configuration(format!("parsing classifier model {}: {e}", path.display()))
        })?;
        if model.name != identifier {
            return Err(Error::Configuration(format!(
                "classifier model {} defines '{}', not '{identifier}'",
                path.display(),
                model.name
            )));
        }
        Self::from_model(model)
    }
}

impl Classifier for LinearClassifier {
    fn identifier(&self) -> &str {
        &self.name
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn feature_names(&self) -> Option<&[String]> {
        Some(&self.features)
    }

    fn evaluate(&mut self, features: &[f64]) -> Result<f64> {
        if features.len() != self.weights.len() {
            return Err(Error::Classifier(format!(
                "'{}' expects {} features, got {}",
                self.name,
                self.weights.len(),
                features.len()
            )));
        }
        let z = self.weights.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + self.bias;
        Ok(self.activation.apply(z))
    }
}
