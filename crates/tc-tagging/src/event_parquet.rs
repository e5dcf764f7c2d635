//! Parquet event input.
//!
//! # Layout
//!
//! One row per event. Jet and track quantities are list columns; any numeric
//! element type is accepted and read as `f64`.
//!
//! | Column            | Arrow type       | Description                              |
//! |-------------------|------------------|------------------------------------------|
//! | `Jet_pt`          | `List<numeric>`  | jet transverse momentum                  |
//! | `Jet_eta`         | `List<numeric>`  | jet pseudorapidity                       |
//! | `Jet_phi`         | `List<numeric>`  | jet azimuth                              |
//! | `Jet_genpt`       | `List<numeric>`  | generator-level jet pt                   |
//! | `Jet_ntracks`     | `List<integer>`  | tracks associated with the jet           |
//! | `Jet_flavour`     | `List<integer>`  | truth flavour label                      |
//! | `Jet_nFirstTrack` | `List<integer>`  | first track index (inclusive)            |
//! | `Jet_nLastTrack`  | `List<integer>`  | last track index (exclusive)             |
//! | `Track_*`         | `List<numeric>`  | per-track fields, one entry per track    |
//!
//! Several files are read back to back as one chained input; event entry
//! numbers continue across files. Only the jet columns and the requested
//! track columns are decoded.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Builder, Int32Builder, ListBuilder, OffsetSizeTrait,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use tc_core::{Error, Event, Jet, JetAttributes, Result, TrackColumns, TrackSchema};

/// Rows decoded per Arrow batch.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Names of the per-jet input columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLayout {
    /// Jet transverse momentum.
    pub jet_pt: String,
    /// Jet pseudorapidity.
    pub jet_eta: String,
    /// Jet azimuth.
    pub jet_phi: String,
    /// Generator-level jet pt.
    pub jet_genpt: String,
    /// Track count stored with the jet.
    pub jet_ntracks: String,
    /// Truth flavour.
    pub jet_flavour: String,
    /// First track index.
    pub jet_first_track: String,
    /// Last track index (exclusive).
    pub jet_last_track: String,
}

impl Default for InputLayout {
    fn default() -> Self {
        Self {
            jet_pt: "Jet_pt".into(),
            jet_eta: "Jet_eta".into(),
            jet_phi: "Jet_phi".into(),
            jet_genpt: "Jet_genpt".into(),
            jet_ntracks: "Jet_ntracks".into(),
            jet_flavour: "Jet_flavour".into(),
            jet_first_track: "Jet_nFirstTrack".into(),
            jet_last_track: "Jet_nLastTrack".into(),
        }
    }
}

impl InputLayout {
    fn jet_columns(&self) -> [&str; 8] {
        [
            &self.jet_pt,
            &self.jet_eta,
            &self.jet_phi,
            &self.jet_genpt,
            &self.jet_ntracks,
            &self.jet_flavour,
            &self.jet_first_track,
            &self.jet_last_track,
        ]
    }
}

fn storage(path: &Path) -> impl Fn(parquet::errors::ParquetError) -> Error + '_ {
    move |e| Error::Storage(format!("{}: {e}", path.display()))
}

/// List column flattened to `f64` values plus row offsets.
struct ListColumn {
    offsets: Vec<usize>,
    values: Vec<f64>,
}

impl ListColumn {
    fn from_batch(batch: &RecordBatch, name: &str) -> Result<Self> {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| Error::Configuration(format!("input has no column '{name}'")))?;
        match array.data_type() {
            DataType::List(_) => Self::from_list::<i32>(array, name),
            DataType::LargeList(_) => Self::from_list::<i64>(array, name),
            other => Err(Error::Configuration(format!(
                "column '{name}' must be a list column, found {other:?}"
            ))),
        }
    }

    fn from_list<O: OffsetSizeTrait>(array: &ArrayRef, name: &str) -> Result<Self> {
        let list = array.as_list::<O>();
        if list.null_count() > 0 {
            return Err(Error::DataIntegrity(format!("column '{name}' has null rows")));
        }
        let values = cast(list.values(), &DataType::Float64).map_err(|e| {
            Error::Configuration(format!("column '{name}' is not numeric: {e}"))
        })?;
        let values = values.as_primitive::<Float64Type>();
        if values.null_count() > 0 {
            return Err(Error::DataIntegrity(format!("column '{name}' has null entries")));
        }
        Ok(Self {
            offsets: list.value_offsets().iter().map(|o| o.as_usize()).collect(),
            values: values.values().to_vec(),
        })
    }

    fn row(&self, i: usize) -> &[f64] {
        &self.values[self.offsets[i]..self.offsets[i + 1]]
    }
}

fn to_index(v: f64, what: &str) -> Result<usize> {
    if !v.is_finite() || v < 0.0 || v.fract() != 0.0 || v > u32::MAX as f64 {
        return Err(Error::DataIntegrity(format!("{what} must be a non-negative integer, got {v}")));
    }
    Ok(v as usize)
}

fn to_label(v: f64, what: &str) -> Result<i32> {
    if !v.is_finite() || v.fract() != 0.0 || v < i32::MIN as f64 || v > i32::MAX as f64 {
        return Err(Error::DataIntegrity(format!("{what} must be a 32-bit integer, got {v}")));
    }
    Ok(v as i32)
}

/// Decode one record batch into events numbered from `first_entry`.
fn decode_batch(
    batch: &RecordBatch,
    layout: &InputLayout,
    schema: &Arc<TrackSchema>,
    first_entry: u64,
) -> Result<Vec<Event>> {
    let [pt, eta, phi, genpt, ntracks, flavour, first, last] =
        layout.jet_columns().map(|name| ListColumn::from_batch(batch, name));
    let (pt, eta, phi, genpt) = (pt?, eta?, phi?, genpt?);
    let (ntracks, flavour, first, last) = (ntracks?, flavour?, first?, last?);
    let track_cols = schema
        .names()
        .iter()
        .map(|name| ListColumn::from_batch(batch, name))
        .collect::<Result<Vec<_>>>()?;

    let mut events = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let entry = first_entry + row as u64;
        let n_jets = pt.row(row).len();
        for (name, col) in layout.jet_columns().iter().zip([
            &pt, &eta, &phi, &genpt, &ntracks, &flavour, &first, &last,
        ]) {
            if col.row(row).len() != n_jets {
                return Err(Error::DataIntegrity(format!(
                    "event {entry}: '{name}' has {} entries for {n_jets} jets",
                    col.row(row).len()
                )));
            }
        }

        let jets = (0..n_jets)
            .map(|j| {
                let what = |col: &str| format!("event {entry}, jet {j}: {col}");
                let n = to_index(ntracks.row(row)[j], &what(layout.jet_ntracks.as_str()))?;
                let flav = to_label(flavour.row(row)[j], &what(layout.jet_flavour.as_str()))?;
                Ok(Jet {
                    index: j,
                    first_track: to_index(first.row(row)[j], &what(layout.jet_first_track.as_str()))?,
                    last_track: to_index(last.row(row)[j], &what(layout.jet_last_track.as_str()))?,
                    attributes: JetAttributes {
                        pt: pt.row(row)[j],
                        eta: eta.row(row)[j],
                        phi: phi.row(row)[j],
                        genpt: genpt.row(row)[j],
                        ntracks: n as u32,
                        flavour: flav,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let columns = track_cols.iter().map(|c| c.row(row).to_vec()).collect();
        let tracks = TrackColumns::new(schema.clone(), columns)
            .map_err(|e| Error::DataIntegrity(format!("event {entry}: {e}")))?;
        events.push(Event { entry, jets, tracks });
    }
    Ok(events)
}

/// Streaming reader over one or more chained Parquet event files.
pub struct EventParquetReader {
    files: VecDeque<PathBuf>,
    layout: InputLayout,
    schema: Arc<TrackSchema>,
    batch_size: usize,
    current: Option<ParquetRecordBatchReader>,
    pending: VecDeque<Event>,
    next_entry: u64,
}

impl EventParquetReader {
    /// Open `paths` for reading the given track fields.
    ///
    /// Every file must exist and carry all jet columns and every requested
    /// track field; this is checked for all files before any event is decoded.
    pub fn open(paths: &[PathBuf], track_fields: &[String], layout: InputLayout) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::Configuration("no input files given".into()));
        }
        let schema = Arc::new(TrackSchema::new(track_fields.iter().cloned())?);
        for path in paths {
            Self::builder(path, &layout, &schema)?;
        }
        tracing::info!(files = paths.len(), track_fields = ?schema.names(), "event input opened");
        Ok(Self {
            files: paths.iter().cloned().collect(),
            layout,
            schema,
            batch_size: DEFAULT_BATCH_SIZE,
            current: None,
            pending: VecDeque::new(),
            next_entry: 0,
        })
    }

    /// Rows decoded per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Track schema shared by every event this reader yields.
    pub fn schema(&self) -> &Arc<TrackSchema> {
        &self.schema
    }

    /// Total number of events across all inputs, from file metadata.
    pub fn total_events(&self) -> Result<u64> {
        let mut total = 0u64;
        for path in &self.files {
            let file = File::open(path)?;
            let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(storage(path))?;
            total += builder.metadata().file_metadata().num_rows() as u64;
        }
        Ok(total)
    }

    fn builder(
        path: &Path,
        layout: &InputLayout,
        schema: &TrackSchema,
    ) -> Result<ParquetRecordBatchReaderBuilder<File>> {
        if !path.is_file() {
            return Err(Error::Configuration(format!("input file {} does not exist", path.display())));
        }
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(storage(path))?;
        let arrow_schema = builder.schema().clone();
        let mut roots = Vec::new();
        for name in layout.jet_columns().into_iter().chain(schema.names().iter().map(String::as_str))
        {
            let idx = arrow_schema.index_of(name).map_err(|_| {
                Error::Configuration(format!("input {} has no column '{name}'", path.display()))
            })?;
            roots.push(idx);
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
        Ok(builder.with_projection(mask))
    }

    fn open_next_file(&mut self) -> Result<bool> {
        let Some(path) = self.files.pop_front() else {
            return Ok(false);
        };
        tracing::debug!(path = %path.display(), first_entry = self.next_entry, "reading input file");
        let reader = Self::builder(&path, &self.layout, &self.schema)?
            .with_batch_size(self.batch_size)
            .build()
            .map_err(storage(&path))?;
        self.current = Some(reader);
        Ok(true)
    }

    fn fill(&mut self) -> Result<bool> {
        loop {
            if self.current.is_none() && !self.open_next_file()? {
                return Ok(false);
            }
            let Some(reader) = self.current.as_mut() else {
                continue;
            };
            match reader.next() {
                Some(batch) => {
                    let batch = batch.map_err(|e| Error::Storage(e.to_string()))?;
                    let events = decode_batch(&batch, &self.layout, &self.schema, self.next_entry)?;
                    self.next_entry += batch.num_rows() as u64;
                    self.pending.extend(events);
                    if !self.pending.is_empty() {
                        return Ok(true);
                    }
                }
                None => self.current = None,
            }
        }
    }
}

impl Iterator for EventParquetReader {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.pending.pop_front() {
            return Some(Ok(event));
        }
        match self.fill() {
            Ok(true) => self.pending.pop_front().map(Ok),
            Ok(false) => None,
            Err(e) => {
                // stop after the first failure
                self.files.clear();
                self.current = None;
                Some(Err(e))
            }
        }
    }
}

/// Write events in the input layout read by [`EventParquetReader`].
///
/// All events must share one track schema.
pub fn write_event_parquet(events: &[Event], layout: &InputLayout, path: &Path) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(Error::Configuration("no events to write".into()));
    };
    let schema = first.tracks.schema().clone();

    let mut floats: Vec<ListBuilder<Float64Builder>> =
        (0..4 + schema.len()).map(|_| ListBuilder::new(Float64Builder::new())).collect();
    let mut ints: Vec<ListBuilder<Int32Builder>> =
        (0..4).map(|_| ListBuilder::new(Int32Builder::new())).collect();

    let to_i32 = |v: usize, what: &str| {
        i32::try_from(v).map_err(|_| Error::DataIntegrity(format!("{what} {v} exceeds i32")))
    };

    for event in events {
        if **event.tracks.schema() != *schema {
            return Err(Error::Configuration(format!(
                "event {}: track schema differs from the first event",
                event.entry
            )));
        }
        for jet in &event.jets {
            let a = &jet.attributes;
            for (b, v) in floats.iter_mut().zip([a.pt, a.eta, a.phi, a.genpt]) {
                b.values().append_value(v);
            }
            let ntracks = i32::try_from(a.ntracks).map_err(|_| {
                Error::DataIntegrity(format!("jet ntracks {} exceeds i32", a.ntracks))
            })?;
            let int_values = [
                ntracks,
                a.flavour,
                to_i32(jet.first_track, "first_track")?,
                to_i32(jet.last_track, "last_track")?,
            ];
            for (b, v) in ints.iter_mut().zip(int_values) {
                b.values().append_value(v);
            }
        }
        for (i, b) in floats[4..].iter_mut().enumerate() {
            let field = schema.resolve(&schema.names()[i])?;
            b.values().append_slice(event.tracks.column(field));
        }
        floats.iter_mut().for_each(|b| b.append(true));
        ints.iter_mut().for_each(|b| b.append(true));
    }

    let mut names: Vec<&str> = vec![
        layout.jet_pt.as_str(),
        layout.jet_eta.as_str(),
        layout.jet_phi.as_str(),
        layout.jet_genpt.as_str(),
    ];
    names.extend(schema.names().iter().map(String::as_str));
    let mut columns: Vec<(&str, ArrayRef)> =
        names.into_iter().zip(floats.iter_mut().map(|b| Arc::new(b.finish()) as ArrayRef)).collect();
    let int_names =
        [&layout.jet_ntracks, &layout.jet_flavour, &layout.jet_first_track, &layout.jet_last_track];
    columns.extend(
        int_names
            .into_iter()
            .map(String::as_str)
            .zip(ints.iter_mut().map(|b| Arc::new(b.finish()) as ArrayRef)),
    );

    let batch = RecordBatch::try_from_iter(columns)
        .map_err(|e| Error::Storage(format!("building event batch: {e}")))?;
    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
    let file = File::create(path)?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(storage(path))?;
    writer.write(&batch).map_err(storage(path))?;
    writer.close().map_err(storage(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tc_tagging_evt_{}_{name}", std::process::id()))
    }

    fn event(entry: u64, ipsig: Vec<f64>, pt: Vec<f64>, ranges: &[(usize, usize)]) -> Event {
        let tracks =
            TrackColumns::from_pairs([("Track_IPsig", ipsig), ("Track_pt", pt)]).unwrap();
        let jets = ranges
            .iter()
            .enumerate()
            .map(|(i, &(first, last))| Jet {
                index: i,
                first_track: first,
                last_track: last,
                attributes: JetAttributes {
                    pt: 30.0 + i as f64,
                    eta: 0.5,
                    phi: -1.0,
                    genpt: 28.0,
                    ntracks: (last - first) as u32,
                    flavour: 5,
                },
            })
            .collect();
        Event { entry, jets, tracks }
    }

    #[test]
    fn write_then_stream_back() {
        let path = tmp("roundtrip.parquet");
        let events = vec![
            event(0, vec![1.0, 8.0, -2.0, 4.0], vec![1.0, 2.0, 3.0, 4.0], &[(0, 2), (2, 4)]),
            event(1, vec![], vec![], &[]),
            event(2, vec![0.5], vec![9.0], &[(0, 1)]),
        ];
        write_event_parquet(&events, &InputLayout::default(), &path).unwrap();

        let fields = vec!["Track_IPsig".to_string()];
        let reader =
            EventParquetReader::open(&[path.clone()], &fields, InputLayout::default()).unwrap();
        assert_eq!(reader.total_events().unwrap(), 3);
        let back: Vec<Event> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0].jets, events[0].jets);
        assert_eq!(back[0].tracks.schema().names(), &["Track_IPsig".to_string()]);
        let ip = back[0].tracks.schema().resolve("Track_IPsig").unwrap();
        assert_eq!(back[0].tracks.column(ip), &[1.0, 8.0, -2.0, 4.0]);
        assert!(back[1].jets.is_empty());
        assert_eq!(back[2].entry, 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn chained_files_continue_entry_numbers() {
        let a = tmp("chain_a.parquet");
        let b = tmp("chain_b.parquet");
        let ev = |e| event(e, vec![1.0], vec![1.0], &[(0, 1)]);
        write_event_parquet(&[ev(0), ev(1)], &InputLayout::default(), &a).unwrap();
        write_event_parquet(&[ev(0)], &InputLayout::default(), &b).unwrap();

        let fields = vec!["Track_IPsig".to_string()];
        let entries: Vec<u64> = EventParquetReader::open(&[a.clone(), b.clone()], &fields, Default::default())
            .unwrap()
            .with_batch_size(1)
            .map(|e| e.unwrap().entry)
            .collect();
        assert_eq!(entries, vec![0, 1, 2]);
        std::fs::remove_file(&a).ok();
        std::fs::remove_file(&b).ok();
    }

    #[test]
    fn missing_track_column_is_configuration_error() {
        let path = tmp("missing_col.parquet");
        write_event_parquet(&[event(0, vec![1.0], vec![1.0], &[(0, 1)])], &Default::default(), &path)
            .unwrap();
        let fields = vec!["Track_IPsig".to_string(), "Track_chi2".to_string()];
        let err = EventParquetReader::open(&[path.clone()], &fields, Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("Track_chi2"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_rejected_up_front() {
        let fields = vec!["Track_IPsig".to_string()];
        let err = EventParquetReader::open(&[tmp("nope.parquet")], &fields, Default::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn index_conversion() {
        assert_eq!(to_index(3.0, "x").unwrap(), 3);
        assert!(to_index(-1.0, "x").is_err());
        assert!(to_index(1.5, "x").is_err());
        assert!(to_index(f64::NAN, "x").is_err());

        assert_eq!(to_label(-5.0, "x").unwrap(), -5);
        assert_eq!(to_label(i32::MIN as f64, "x").unwrap(), i32::MIN);
        assert!(to_label(3.5, "x").is_err());
        assert!(to_label(f64::INFINITY, "x").is_err());
        assert!(to_label(i32::MAX as f64 + 1.0, "x").is_err());
        assert!(to_label(-3.0e9, "x").is_err());
    }

    #[test]
    fn out_of_range_flavour_is_data_integrity_error() {
        let path = tmp("wide_flavour.parquet");
        let layout = InputLayout::default();
        let list = |v: f64| {
            let mut b = ListBuilder::new(Float64Builder::new());
            b.values().append_value(v);
            b.append(true);
            Arc::new(b.finish()) as ArrayRef
        };
        let columns: Vec<(&str, ArrayRef)> = vec![
            (layout.jet_pt.as_str(), list(30.0)),
            (layout.jet_eta.as_str(), list(0.1)),
            (layout.jet_phi.as_str(), list(0.2)),
            (layout.jet_genpt.as_str(), list(29.0)),
            (layout.jet_ntracks.as_str(), list(1.0)),
            (layout.jet_flavour.as_str(), list(5.0e9)),
            (layout.jet_first_track.as_str(), list(0.0)),
            (layout.jet_last_track.as_str(), list(1.0)),
            ("Track_IPsig", list(2.0)),
        ];
        let batch = RecordBatch::try_from_iter(columns).unwrap();
        let mut w = ArrowWriter::try_new(File::create(&path).unwrap(), batch.schema(), None).unwrap();
        w.write(&batch).unwrap();
        w.close().unwrap();

        let fields = vec!["Track_IPsig".to_string()];
        let mut reader = EventParquetReader::open(&[path.clone()], &fields, layout).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
        assert!(err.to_string().contains("Jet_flavour"));
        assert!(reader.next().is_none());
        std::fs::remove_file(&path).ok();
    }
}
