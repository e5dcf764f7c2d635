//! # tc-tagging
//!
//! Track-counting b-jet tagging: per-track selection (cuts and an optional
//! classifier), ranking by impact-parameter significance and the IP / TCHE /
//! TCHP discriminants, with Parquet event input and record output.
//!
//! ```no_run
//! use std::path::Path;
//! use tc_tagging::{EventParquetReader, InputLayout, JetTaggingEngine, TaggingConfig};
//!
//! # fn main() -> tc_core::Result<()> {
//! let config = TaggingConfig::from_path(Path::new("tagging.json"))?;
//! let reader = EventParquetReader::open(
//!     &[Path::new("events.parquet").to_path_buf()],
//!     &config.required_track_fields(),
//!     InputLayout::default(),
//! )?;
//! let mut engine = JetTaggingEngine::from_config(&config, reader.schema().clone())?;
//! let mut records: Vec<tc_core::JetTagRecord> = Vec::new();
//! let summary = engine.run(reader, &mut records)?;
//! println!("{} of {} jets tagged", summary.tagged_jets, summary.jets);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod config;
pub mod cut;
pub mod engine;
pub mod event_parquet;
pub mod pipeline;
pub mod record_parquet;

pub use classifier::{
    Activation, ClassifierConfig, ClassifierSelector, LinearClassifier, LinearModelFile,
    load_classifier,
};
#[cfg(feature = "onnx")]
pub use classifier::OnnxClassifier;
pub use config::{DEFAULT_SIGNIFICANCE_FIELD, TaggingConfig};
pub use cut::{Comparator, CutSelector, CutSpec};
pub use engine::{JetTaggingEngine, ParallelTagger, RunSummary, discriminants, rank_tracks};
pub use event_parquet::{EventParquetReader, InputLayout, write_event_parquet};
pub use pipeline::SelectionPipeline;
pub use record_parquet::{ParquetTagWriter, read_tag_parquet};
