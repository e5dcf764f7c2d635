//! Parquet output of jet tagging records.
//!
//! One row per [`JetTagRecord`]:
//!
//! | Column           | Arrow type | Description                          |
//! |------------------|------------|--------------------------------------|
//! | `event`          | `UInt64`   | originating event entry              |
//! | `jet`            | `UInt32`   | jet index within the event           |
//! | `Jet_genpt`      | `Float64`  | generator-level jet pt               |
//! | `Jet_pt`         | `Float64`  | jet pt                               |
//! | `Jet_ntracks`    | `UInt32`   | tracks associated with the jet       |
//! | `Jet_eta`        | `Float64`  | jet pseudorapidity                   |
//! | `Jet_phi`        | `Float64`  | jet azimuth                          |
//! | `Jet_flavour`    | `Int32`    | truth flavour                        |
//! | `Jet_nseltracks` | `UInt32`   | tracks passing selection             |
//! | `Jet_Ip`         | `Float64`  | highest significance                 |
//! | `TCHE`           | `Float64`  | 2nd-highest significance or sentinel |
//! | `TCHP`           | `Float64`  | 3rd-highest significance or sentinel |

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, UInt32Array, UInt64Array};
use arrow::datatypes::{
    DataType, Field, Float64Type, Int32Type, Schema, SchemaRef, UInt32Type, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tc_core::{Error, JetAttributes, JetTagRecord, Result, TagSink};

/// Records buffered before a row group batch is written.
pub const DEFAULT_FLUSH_ROWS: usize = 8192;

/// Arrow schema of the record table.
pub fn record_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("event", DataType::UInt64, false),
        Field::new("jet", DataType::UInt32, false),
        Field::new("Jet_genpt", DataType::Float64, false),
        Field::new("Jet_pt", DataType::Float64, false),
        Field::new("Jet_ntracks", DataType::UInt32, false),
        Field::new("Jet_eta", DataType::Float64, false),
        Field::new("Jet_phi", DataType::Float64, false),
        Field::new("Jet_flavour", DataType::Int32, false),
        Field::new("Jet_nseltracks", DataType::UInt32, false),
        Field::new("Jet_Ip", DataType::Float64, false),
        Field::new("TCHE", DataType::Float64, false),
        Field::new("TCHP", DataType::Float64, false),
    ]))
}

fn to_u32(v: usize, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::DataIntegrity(format!("{what} {v} exceeds u32")))
}

/// Build a record batch from tagging records.
pub fn records_to_batch(records: &[JetTagRecord]) -> Result<RecordBatch> {
    let f64_col = |f: fn(&JetTagRecord) -> f64| -> ArrayRef {
        Arc::new(records.iter().map(f).collect::<Float64Array>())
    };
    let jets = records.iter().map(|r| to_u32(r.jet, "jet index")).collect::<Result<Vec<_>>>()?;
    let nsel = records
        .iter()
        .map(|r| to_u32(r.n_selected_tracks, "selected track count"))
        .collect::<Result<Vec<_>>>()?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(records.iter().map(|r| r.event).collect::<UInt64Array>()),
        Arc::new(UInt32Array::from(jets)),
        f64_col(|r| r.attributes.genpt),
        f64_col(|r| r.attributes.pt),
        Arc::new(records.iter().map(|r| r.attributes.ntracks).collect::<UInt32Array>()),
        f64_col(|r| r.attributes.eta),
        f64_col(|r| r.attributes.phi),
        Arc::new(records.iter().map(|r| r.attributes.flavour).collect::<Int32Array>()),
        Arc::new(UInt32Array::from(nsel)),
        f64_col(|r| r.ip),
        f64_col(|r| r.tche),
        f64_col(|r| r.tchp),
    ];
    RecordBatch::try_new(record_schema(), columns)
        .map_err(|e| Error::Storage(format!("building record batch: {e}")))
}

/// Append-only Parquet sink for tagging records.
pub struct ParquetTagWriter {
    path: PathBuf,
    writer: ArrowWriter<File>,
    buffer: Vec<JetTagRecord>,
    flush_rows: usize,
    written: u64,
}

impl ParquetTagWriter {
    /// Create (or truncate) `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
        let writer = ArrowWriter::try_new(file, record_schema(), Some(props))
            .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            buffer: Vec::with_capacity(DEFAULT_FLUSH_ROWS),
            flush_rows: DEFAULT_FLUSH_ROWS,
            written: 0,
        })
    }

    /// Records buffered per written batch.
    pub fn with_flush_rows(mut self, rows: usize) -> Self {
        self.flush_rows = rows.max(1);
        self
    }

    /// Records written so far (including buffered ones).
    pub fn len(&self) -> u64 {
        self.written + self.buffer.len() as u64
    }

    /// `true` if nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = records_to_batch(&self.buffer)?;
        self.writer
            .write(&batch)
            .map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))?;
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flush buffered records and close the file. Returns the record count.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        self.writer
            .close()
            .map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), records = self.written, "records written");
        Ok(self.written)
    }
}

impl TagSink for ParquetTagWriter {
    fn append(&mut self, record: JetTagRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.flush_rows {
            self.flush()?;
        }
        Ok(())
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str, expected: &DataType) -> Result<&'a ArrayRef> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| Error::Storage(format!("record table has no column '{name}'")))?;
    if col.data_type() != expected || col.null_count() > 0 {
        return Err(Error::Storage(format!(
            "record column '{name}' must be non-null {expected:?}, found {:?}",
            col.data_type()
        )));
    }
    Ok(col)
}

fn f64s<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a [f64]> {
    let values: &[f64] = column(batch, name, &DataType::Float64)?.as_primitive::<Float64Type>().values();
    Ok(values)
}

fn u32s<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a [u32]> {
    let values: &[u32] = column(batch, name, &DataType::UInt32)?.as_primitive::<UInt32Type>().values();
    Ok(values)
}

/// Read a record table written by [`ParquetTagWriter`].
pub fn read_tag_parquet(path: &Path) -> Result<Vec<JetTagRecord>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|b| b.build())
        .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| Error::Storage(e.to_string()))?;
        let b = &batch;
        let event = column(b, "event", &DataType::UInt64)?.as_primitive::<UInt64Type>().values();
        let flavour =
            column(b, "Jet_flavour", &DataType::Int32)?.as_primitive::<Int32Type>().values();
        let (jet, ntracks, nsel) =
            (u32s(b, "jet")?, u32s(b, "Jet_ntracks")?, u32s(b, "Jet_nseltracks")?);
        let (genpt, pt) = (f64s(b, "Jet_genpt")?, f64s(b, "Jet_pt")?);
        let (eta, phi) = (f64s(b, "Jet_eta")?, f64s(b, "Jet_phi")?);
        let (ip, tche, tchp) = (f64s(b, "Jet_Ip")?, f64s(b, "TCHE")?, f64s(b, "TCHP")?);

        for i in 0..batch.num_rows() {
            out.push(JetTagRecord {
                event: event[i],
                jet: jet[i] as usize,
                attributes: JetAttributes {
                    pt: pt[i],
                    eta: eta[i],
                    phi: phi[i],
                    genpt: genpt[i],
                    ntracks: ntracks[i],
                    flavour: flavour[i],
                },
                n_selected_tracks: nsel[i] as usize,
                ip: ip[i],
                tche: tche[i],
                tchp: tchp[i],
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SENTINEL;

    fn record(event: u64, jet: usize, n: usize) -> JetTagRecord {
        JetTagRecord {
            event,
            jet,
            attributes: JetAttributes {
                pt: 42.0,
                eta: -1.2,
                phi: 0.3,
                genpt: 40.0,
                ntracks: 6,
                flavour: -5,
            },
            n_selected_tracks: n,
            ip: 8.0,
            tche: if n > 1 { 4.0 } else { SENTINEL },
            tchp: SENTINEL,
        }
    }

    #[test]
    fn batch_schema_matches() {
        let batch = records_to_batch(&[record(0, 0, 1), record(0, 1, 2)]).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), record_schema());
    }

    #[test]
    fn writer_flushes_in_batches_and_reads_back() {
        let path =
            std::env::temp_dir().join(format!("tc_tagging_rec_{}.parquet", std::process::id()));
        let records: Vec<JetTagRecord> = (0..25).map(|i| record(i / 3, (i % 3) as usize, 2)).collect();

        let mut w = ParquetTagWriter::create(&path).unwrap().with_flush_rows(10);
        for r in &records {
            w.append(r.clone()).unwrap();
        }
        assert_eq!(w.len(), 25);
        assert_eq!(w.finish().unwrap(), 25);

        let back = read_tag_parquet(&path).unwrap();
        assert_eq!(back, records);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_output_is_a_valid_table() {
        let path = std::env::temp_dir()
            .join(format!("tc_tagging_rec_empty_{}.parquet", std::process::id()));
        let w = ParquetTagWriter::create(&path).unwrap();
        assert!(w.is_empty());
        assert_eq!(w.finish().unwrap(), 0);
        assert!(read_tag_parquet(&path).unwrap().is_empty());
        std::fs::remove_file(&path).ok();
    }
}
