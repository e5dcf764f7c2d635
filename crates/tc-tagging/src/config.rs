//! Tagging configuration file.
//!
//! ```json
//! {
//!   "significance_field": "Track_IPsig",
//!   "cuts": [ { "field": "Track_pt", "op": ">", "value": 1.0 } ],
//!   "classifier": {
//!     "path": "track_mva.json",
//!     "name": "TrackLinear",
//!     "threshold": 0.0,
//!     "features": ["Track_pt", "Track_chi2"]
//!   }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tc_core::{Error, Result};

use crate::classifier::ClassifierConfig;
use crate::cut::CutSpec;

/// Default name of the impact-parameter significance track field.
pub const DEFAULT_SIGNIFICANCE_FIELD: &str = "Track_IPsig";

fn default_significance_field() -> String {
    DEFAULT_SIGNIFICANCE_FIELD.to_string()
}

/// Selection and ranking configuration.
///
/// Both selection stages are optional; an absent stage lets every track through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaggingConfig {
    /// Track field used as the ranking key.
    #[serde(default = "default_significance_field")]
    pub significance_field: String,
    /// Cut stage, evaluated in order.
    #[serde(default)]
    pub cuts: Vec<CutSpec>,
    /// Classifier stage, evaluated after the cuts.
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self { significance_field: default_significance_field(), cuts: Vec::new(), classifier: None }
    }
}

impl TaggingConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid tagging config: {e}")))
    }

    /// Read a configuration file. A relative classifier path is resolved against
    /// the config file's directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("reading tagging config {}: {e}", path.display()))
        })?;
        let mut cfg = Self::from_json_str(&text)?;
        if let Some(clf) = cfg.classifier.as_mut()
            && clf.path.is_relative()
            && let Some(dir) = path.parent()
        {
            clf.path = dir.join(&clf.path);
        }
        Ok(cfg)
    }

    /// Append cuts after the configured ones.
    pub fn with_cuts(mut self, cuts: impl IntoIterator<Item = CutSpec>) -> Self {
        self.cuts.extend(cuts);
        self
    }

    /// Track fields the selection and ranking read, ordered by first occurrence:
    /// significance, cut fields, classifier features.
    pub fn required_track_fields(&self) -> Vec<String> {
        let mut fields = vec![self.significance_field.clone()];
        let cut_fields = self.cuts.iter().map(|c| &c.field);
        let clf_fields = self.classifier.iter().flat_map(|c| c.features.iter());
        for f in cut_fields.chain(clf_fields) {
            if !fields.contains(f) {
                fields.push(f.clone());
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cut::Comparator;
    use std::path::PathBuf;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg = TaggingConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, TaggingConfig::default());
        assert_eq!(cfg.required_track_fields(), vec!["Track_IPsig".to_string()]);
    }

    #[test]
    fn parses_full_config() {
        let cfg = TaggingConfig::from_json_str(
            r#"{
                "significance_field": "Track_IP2Dsig",
                "cuts": [
                    {"field": "Track_pt", "op": ">", "value": 1.0},
                    {"field": "Track_nHitAll", "op": "≥", "value": 8}
                ],
                "classifier": {
                    "path": "mva.json",
                    "name": "TrackLinear",
                    "threshold": 0.25,
                    "features": ["Track_chi2", "Track_pt"]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.cuts[1], CutSpec::new("Track_nHitAll", Comparator::Ge, 8.0));
        let clf = cfg.classifier.as_ref().unwrap();
        assert_eq!(clf.path, PathBuf::from("mva.json"));
        assert_eq!(
            cfg.required_track_fields(),
            vec!["Track_IP2Dsig", "Track_pt", "Track_nHitAll", "Track_chi2"]
        );
    }

    #[test]
    fn unknown_keys_and_bad_comparators_rejected() {
        assert!(TaggingConfig::from_json_str(r#"{"cutz": []}"#).is_err());
        let err = TaggingConfig::from_json_str(
            r#"{"cuts": [{"field": "Track_pt", "op": "=>", "value": 1.0}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn classifier_path_resolved_against_config_dir() {
        let dir = std::env::temp_dir().join(format!("tc_tagging_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tagging.json");
        std::fs::write(
            &path,
            r#"{"classifier": {"path": "m.json", "name": "m", "threshold": 0.0, "features": ["x"]}}"#,
        )
        .unwrap();
        let cfg = TaggingConfig::from_path(&path).unwrap();
        assert_eq!(cfg.classifier.unwrap().path, dir.join("m.json"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn with_cuts_appends() {
        let cfg = TaggingConfig::default()
            .with_cuts([CutSpec::new("Track_pt", Comparator::Gt, 1.0)])
            .with_cuts(["Track_chi2 < 5".parse::<CutSpec>().unwrap()]);
        assert_eq!(cfg.cuts.len(), 2);
        assert_eq!(cfg.cuts[1].field, "Track_chi2");
    }
}
