//! Capability traits for track-counting tagging
//!
//! Selection strategies, classifier backends and output sinks are plugged into
//! the tagging engine through these traits, so the engine never depends on a
//! concrete cut language, model format or storage format.

use crate::Result;
use crate::types::{JetTagRecord, Track};

/// Per-track pass/fail predicate.
///
/// `evaluate` takes `&mut self` because some selectors own mutable scratch
/// state (a classifier feature buffer). Concurrent use of one instance is thus
/// ruled out by the borrow checker; parallel callers build one selector per
/// worker.
pub trait TrackSelector: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Decide whether `track` passes.
    fn evaluate(&mut self, track: &Track<'_>) -> Result<bool>;
}

impl<S: TrackSelector + ?Sized> TrackSelector for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn evaluate(&mut self, track: &Track<'_>) -> Result<bool> {
        (**self).evaluate(track)
    }
}

/// Pre-trained scoring model over an ordered feature vector.
///
/// Loading is the backend's constructor (fallible, done once); this trait is the
/// evaluation entry point.
pub trait Classifier: Send {
    /// Model identifier the classifier was booked under.
    fn identifier(&self) -> &str;

    /// Number of features the model expects.
    fn n_features(&self) -> usize;

    /// Feature names in model order, when the model format records them.
    fn feature_names(&self) -> Option<&[String]> {
        None
    }

    /// Score one feature vector (`features.len() == n_features()`).
    fn evaluate(&mut self, features: &[f64]) -> Result<f64>;
}

/// Append-only destination for tagging records.
pub trait TagSink {
    /// Persist one record.
    fn append(&mut self, record: JetTagRecord) -> Result<()>;
}

impl TagSink for Vec<JetTagRecord> {
    fn append(&mut self, record: JetTagRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

impl<T: TagSink + ?Sized> TagSink for &mut T {
    fn append(&mut self, record: JetTagRecord) -> Result<()> {
        (**self).append(record)
    }
}
