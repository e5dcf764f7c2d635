//! # tc-core
//!
//! Shared data model, error taxonomy and capability traits for track-counting
//! jet tagging (TCHE / TCHP).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Classifier, TagSink, TrackSelector};
pub use types::{
    Event, FieldId, Jet, JetAttributes, JetTagRecord, SENTINEL, SelectedTrack, Track,
    TrackColumns, TrackSchema,
};
