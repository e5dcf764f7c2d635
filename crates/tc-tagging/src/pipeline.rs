//! Ordered, short-circuiting conjunction of track selectors.

use tc_core::{Result, Track, TrackSchema, TrackSelector};

use crate::classifier::ClassifierSelector;
use crate::config::TaggingConfig;
use crate::cut::CutSelector;

/// Effective per-track predicate: every stage must pass, in order.
///
/// An empty pipeline passes every track. A failing stage stops evaluation, so
/// later (typically more expensive) stages never see that track.
#[derive(Default)]
pub struct SelectionPipeline {
    stages: Vec<Box<dyn TrackSelector>>,
}

impl SelectionPipeline {
    /// Pipeline with no stages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configured stages: cuts first, then the classifier.
    ///
    /// All field names are resolved and the classifier model is loaded here, so
    /// any configuration error surfaces before a single event is processed.
    pub fn from_config(config: &TaggingConfig, schema: &TrackSchema) -> Result<Self> {
        let mut pipeline = Self::new();
        if !config.cuts.is_empty() {
            pipeline.push(CutSelector::new(&config.cuts, schema)?);
        }
        if let Some(clf) = &config.classifier {
            pipeline.push(ClassifierSelector::from_config(clf, schema)?);
        }
        Ok(pipeline)
    }

    /// Append a stage.
    pub fn push(&mut self, stage: impl TrackSelector + 'static) {
        self.stages.push(Box::new(stage));
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, stage: impl TrackSelector + 'static) -> Self {
        self.push(stage);
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// `true` if no stage is configured.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in evaluation order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// `true` if `track` passes every stage.
    pub fn evaluate(&mut self, track: &Track<'_>) -> Result<bool> {
        for stage in &mut self.stages {
            if !stage.evaluate(track)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for SelectionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionPipeline").field("stages", &self.stage_names()).finish()
    }
}
