//! Event data model: track columns, jets and output records.
//!
//! Tracks and jets are index views into per-event structure-of-arrays storage.
//! Named track fields are resolved once into [`FieldId`] handles against a
//! [`TrackSchema`], so reading a field off a [`Track`] cannot fail.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Discriminant value meaning "not enough selected tracks".
pub const SENTINEL: f64 = -1e10;

/// Resolved handle to a named track field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(usize);

impl FieldId {
    /// Column position within the owning [`TrackSchema`].
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered set of named numeric track fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSchema {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl TrackSchema {
    /// Build a schema from field names. Duplicate names are rejected.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut by_name = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if by_name.insert(name.clone(), i).is_some() {
                return Err(Error::Configuration(format!("duplicate track field '{name}'")));
            }
        }
        Ok(Self { names, by_name })
    }

    /// Resolve a field name, failing with a configuration error if it is absent.
    pub fn resolve(&self, name: &str) -> Result<FieldId> {
        self.get(name).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown track field '{name}' (available: {})",
                self.names.join(", ")
            ))
        })
    }

    /// Look up a field name.
    pub fn get(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied().map(FieldId)
    }

    /// Name of a resolved field.
    pub fn name(&self, field: FieldId) -> &str {
        &self.names[field.0]
    }

    /// All field names in column order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Per-event track storage (one `Vec<f64>` per schema field).
#[derive(Debug, Clone)]
pub struct TrackColumns {
    schema: Arc<TrackSchema>,
    columns: Vec<Vec<f64>>,
    n_tracks: usize,
}

impl TrackColumns {
    /// Create track storage. Columns must follow schema order and share one length.
    pub fn new(schema: Arc<TrackSchema>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if columns.len() != schema.len() {
            return Err(Error::DataIntegrity(format!(
                "expected {} track columns, got {}",
                schema.len(),
                columns.len()
            )));
        }
        let n_tracks = columns.first().map(Vec::len).unwrap_or(0);
        for (name, col) in schema.names().iter().zip(&columns) {
            if col.len() != n_tracks {
                return Err(Error::DataIntegrity(format!(
                    "track column '{name}' has {} entries, expected {n_tracks}",
                    col.len()
                )));
            }
        }
        Ok(Self { schema, columns, n_tracks })
    }

    /// Convenience constructor building the schema from `(name, values)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let (names, columns): (Vec<String>, Vec<Vec<f64>>) =
            pairs.into_iter().map(|(n, c)| (n.into(), c)).unzip();
        Self::new(Arc::new(TrackSchema::new(names)?), columns)
    }

    /// Schema describing the columns.
    pub fn schema(&self) -> &Arc<TrackSchema> {
        &self.schema
    }

    /// Number of tracks in the event.
    pub fn len(&self) -> usize {
        self.n_tracks
    }

    /// `true` if the event has no tracks.
    pub fn is_empty(&self) -> bool {
        self.n_tracks == 0
    }

    /// Column for a resolved field.
    pub fn column(&self, field: FieldId) -> &[f64] {
        &self.columns[field.0]
    }

    /// Track view at `index`, or `None` if out of range.
    pub fn track(&self, index: usize) -> Option<Track<'_>> {
        (index < self.n_tracks).then_some(Track { columns: self, index })
    }
}

/// Immutable view of one track within its event.
#[derive(Debug, Clone, Copy)]
pub struct Track<'a> {
    columns: &'a TrackColumns,
    index: usize,
}

impl Track<'_> {
    /// Track index within the event.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Read a resolved field. `field` must come from this event's schema.
    #[inline]
    pub fn value(&self, field: FieldId) -> f64 {
        self.columns.columns[field.0][self.index]
    }
}

/// Jet scalars copied verbatim into the output record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JetAttributes {
    /// Transverse momentum.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuth.
    pub phi: f64,
    /// Generator-level transverse momentum.
    pub genpt: f64,
    /// Number of reconstructed tracks associated with the jet.
    pub ntracks: u32,
    /// Truth flavour label.
    pub flavour: i32,
}

/// A jet owning the half-open track range `[first_track, last_track)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Jet {
    /// Jet index within the event.
    pub index: usize,
    /// First track index (inclusive).
    pub first_track: usize,
    /// Last track index (exclusive).
    pub last_track: usize,
    /// Copied attributes.
    pub attributes: JetAttributes,
}

impl Jet {
    /// Validate the range against an event holding `n_tracks` tracks.
    pub fn track_range(&self, n_tracks: usize) -> Result<Range<usize>> {
        if self.first_track > self.last_track {
            return Err(Error::DataIntegrity(format!(
                "jet {}: first_track {} > last_track {}",
                self.index, self.first_track, self.last_track
            )));
        }
        if self.last_track > n_tracks {
            return Err(Error::DataIntegrity(format!(
                "jet {}: track range [{}, {}) exceeds event track count {n_tracks}",
                self.index, self.first_track, self.last_track
            )));
        }
        Ok(self.first_track..self.last_track)
    }
}

/// One event: its jets plus the track storage they index into.
#[derive(Debug, Clone)]
pub struct Event {
    /// Global entry number (unique across chained inputs).
    pub entry: u64,
    /// Jets in index order.
    pub jets: Vec<Jet>,
    /// Track columns.
    pub tracks: TrackColumns,
}

/// A track that passed selection, with its ranking key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedTrack {
    /// Track index within the event.
    pub index: usize,
    /// Impact-parameter significance.
    pub significance: f64,
}

/// Per-jet tagging output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JetTagRecord {
    /// Originating event entry.
    pub event: u64,
    /// Originating jet index.
    pub jet: usize,
    /// Copied jet attributes.
    pub attributes: JetAttributes,
    /// Number of tracks passing selection (always ≥ 1).
    pub n_selected_tracks: usize,
    /// Highest significance.
    pub ip: f64,
    /// Second-highest significance, or [`SENTINEL`].
    pub tche: f64,
    /// Third-highest significance, or [`SENTINEL`].
    pub tchp: f64,
}
