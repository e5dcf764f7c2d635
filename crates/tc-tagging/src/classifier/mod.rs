//! Classifier-based track selection.
//!
//! A [`ClassifierSelector`] owns an ordered feature buffer matching the model's
//! feature order. Every call to [`ClassifierSelector::score`] first syncs the
//! buffer from the track, then hands the buffer to the classifier.

mod linear;
#[cfg(feature = "onnx")]
mod onnx;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tc_core::{Classifier, Error, FieldId, Result, Track, TrackSchema, TrackSelector};

pub use linear::{Activation, LinearClassifier, LinearModelFile};
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

/// Classifier stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Model file (`.json` linear weights, or `.onnx` with the `onnx` feature).
    pub path: PathBuf,
    /// Model identifier the classifier is booked under.
    pub name: String,
    /// Tracks pass if `score > threshold`.
    pub threshold: f64,
    /// Track fields fed to the model, in model order.
    pub features: Vec<String>,
}

/// Load a classifier backend chosen by file extension.
///
/// Missing files, unknown extensions and backends not compiled in are
/// configuration errors.
pub fn load_classifier(
    path: &Path,
    identifier: &str,
    n_features: usize,
) -> Result<Box<dyn Classifier>> {
    if !path.is_file() {
        return Err(Error::Configuration(format!(
            "classifier model {} does not exist",
            path.display()
        )));
    }
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("json") => Ok(Box::new(LinearClassifier::load(path, identifier)?)),
        #[cfg(feature = "onnx")]
        Some("onnx") => Ok(Box::new(OnnxClassifier::load(path, identifier, n_features)?)),
        #[cfg(not(feature = "onnx"))]
        Some("onnx") => {
            let _ = n_features;
            Err(Error::Configuration(format!(
                "classifier model {} needs the `onnx` feature",
                path.display()
            )))
        }
        _ => Err(Error::Configuration(format!(
            "unsupported classifier model format: {}",
            path.display()
        ))),
    }
}

/// Track selector passing tracks whose classifier score exceeds a threshold.
pub struct ClassifierSelector {
    identifier: String,
    features: Vec<String>,
    fields: Vec<FieldId>,
    buffer: Vec<f64>,
    classifier: Box<dyn Classifier>,
    threshold: f64,
}

impl std::fmt::Debug for ClassifierSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierSelector")
            .field("identifier", &self.identifier)
            .field("features", &self.features)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl ClassifierSelector {
    /// Load the configured model and bind its features to `schema`.
    pub fn from_config(config: &ClassifierConfig, schema: &TrackSchema) -> Result<Self> {
        let classifier = load_classifier(&config.path, &config.name, config.features.len())?;
        Self::new(config, schema, classifier)
    }

    /// Bind an already loaded classifier.
    ///
    /// Fails if a feature is not a track field, or if the model's feature count or
    /// recorded feature order differ from the configuration.
    pub fn new(
        config: &ClassifierConfig,
        schema: &TrackSchema,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self> {
        if config.features.is_empty() {
            return Err(Error::Configuration(format!(
                "classifier '{}' has no features configured",
                config.name
            )));
        }
        if config.threshold.is_nan() {
            return Err(Error::Configuration(format!(
                "classifier '{}' has a NaN threshold",
                config.name
            )));
        }
        let fields =
            config.features.iter().map(|f| schema.resolve(f)).collect::<Result<Vec<_>>>()?;

        if classifier.n_features() != config.features.len() {
            return Err(Error::Configuration(format!(
                "classifier '{}' expects {} features, {} configured",
                config.name,
                classifier.n_features(),
                config.features.len()
            )));
        }
        if let Some(names) = classifier.feature_names()
            && names != config.features.as_slice()
        {
            return Err(Error::Configuration(format!(
                "classifier '{}' feature order mismatch: model [{}], configured [{}]",
                config.name,
                names.join(", "),
                config.features.join(", ")
            )));
        }

        tracing::debug!(
            identifier = %config.name,
            n_features = fields.len(),
            threshold = config.threshold,
            "classifier selector built"
        );
        Ok(Self {
            identifier: config.name.clone(),
            features: config.features.clone(),
            buffer: vec![0.0; fields.len()],
            fields,
            classifier,
            threshold: config.threshold,
        })
    }

    /// Decision threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Feature names in model order.
    pub fn features(&self) -> &[String] {
        &self.features
    }

    fn sync(&mut self, track: &Track<'_>) {
        for (slot, &field) in self.buffer.iter_mut().zip(&self.fields) {
            *slot = track.value(field);
        }
    }

    /// Classifier score for `track`.
    pub fn score(&mut self, track: &Track<'_>) -> Result<f64> {
        self.sync(track);
        self.classifier.evaluate(&self.buffer)
    }
}

impl TrackSelector for ClassifierSelector {
    fn name(&self) -> &str {
        &self.identifier
    }

    fn evaluate(&mut self, track: &Track<'_>) -> Result<bool> {
        Ok(self.score(track)? > self.threshold)
    }
}
