//! Per-jet track ranking and TCHE / TCHP discriminants.

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tc_core::{
    Error, Event, FieldId, Jet, JetTagRecord, Result, SENTINEL, SelectedTrack, TagSink,
    TrackColumns, TrackSchema,
};

use crate::config::TaggingConfig;
use crate::pipeline::SelectionPipeline;

/// Default number of events between progress log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 1000;

/// Counters accumulated over a tagging run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Events processed.
    pub events: u64,
    /// Jets visited.
    pub jets: u64,
    /// Jets that produced a record (≥ 1 selected track).
    pub tagged_jets: u64,
    /// Tracks evaluated by the selection pipeline.
    pub tracks_seen: u64,
    /// Tracks passing the selection pipeline.
    pub tracks_selected: u64,
}

impl RunSummary {
    /// Add another summary's counters.
    pub fn merge(&mut self, other: &RunSummary) {
        self.events += other.events;
        self.jets += other.jets;
        self.tagged_jets += other.tagged_jets;
        self.tracks_seen += other.tracks_seen;
        self.tracks_selected += other.tracks_selected;
    }

    /// Counters accumulated since `earlier`.
    pub fn since(&self, earlier: &RunSummary) -> RunSummary {
        RunSummary {
            events: self.events - earlier.events,
            jets: self.jets - earlier.jets,
            tagged_jets: self.tagged_jets - earlier.tagged_jets,
            tracks_seen: self.tracks_seen - earlier.tracks_seen,
            tracks_selected: self.tracks_selected - earlier.tracks_selected,
        }
    }
}

/// Sort selected tracks by significance, descending.
///
/// The sort is stable: equal significances keep their input (ascending index)
/// order. Inputs must not contain NaN.
pub fn rank_tracks(selected: &mut [SelectedTrack]) {
    selected.sort_by(|a, b| b.significance.partial_cmp(&a.significance).unwrap_or(Ordering::Equal));
}

/// `(ip, tche, tchp)` read from a ranked list; `None` for an empty list.
pub fn discriminants(ranked: &[SelectedTrack]) -> Option<(f64, f64, f64)> {
    let at = |rank: usize| ranked.get(rank).map_or(SENTINEL, |t| t.significance);
    let ip = ranked.first()?.significance;
    Some((ip, at(1), at(2)))
}

/// Applies the selection pipeline to each jet's tracks and derives the
/// track-counting discriminants.
#[derive(Debug)]
pub struct JetTaggingEngine {
    pipeline: SelectionPipeline,
    schema: Arc<TrackSchema>,
    significance: FieldId,
    selected: Vec<SelectedTrack>,
    summary: RunSummary,
    progress_every: u64,
}

impl JetTaggingEngine {
    /// Create an engine ranking by `significance_field` of `schema`.
    pub fn new(
        pipeline: SelectionPipeline,
        schema: Arc<TrackSchema>,
        significance_field: &str,
    ) -> Result<Self> {
        let significance = schema.resolve(significance_field)?;
        Ok(Self {
            pipeline,
            schema,
            significance,
            selected: Vec::new(),
            summary: RunSummary::default(),
            progress_every: DEFAULT_PROGRESS_EVERY,
        })
    }

    /// Build the pipeline from `config` and bind it to `schema`.
    ///
    /// Every configuration error (unknown field, unloadable model) surfaces here.
    pub fn from_config(config: &TaggingConfig, schema: Arc<TrackSchema>) -> Result<Self> {
        let pipeline = SelectionPipeline::from_config(config, &schema)?;
        Self::new(pipeline, schema, &config.significance_field)
    }

    /// Log progress every `n` events (0 disables).
    pub fn with_progress_every(mut self, n: u64) -> Self {
        self.progress_every = n;
        self
    }

    /// Selection pipeline.
    pub fn pipeline(&self) -> &SelectionPipeline {
        &self.pipeline
    }

    /// Counters accumulated so far.
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Field handles are only valid for the schema they were resolved against.
    fn check_schema(&self, tracks: &TrackColumns, event: u64) -> Result<()> {
        let schema = tracks.schema();
        if Arc::ptr_eq(schema, &self.schema) || **schema == *self.schema {
            return Ok(());
        }
        Err(Error::Configuration(format!(
            "event {event}: track fields [{}] differ from the configured schema [{}]",
            schema.names().join(", "),
            self.schema.names().join(", ")
        )))
    }

    /// Tag one jet of an event whose tracks are `tracks`.
    ///
    /// Returns `Ok(None)` when no track survives selection.
    pub fn tag_jet(
        &mut self,
        tracks: &TrackColumns,
        event: u64,
        jet: &Jet,
    ) -> Result<Option<JetTagRecord>> {
        self.check_schema(tracks, event)?;
        let range = jet.track_range(tracks.len())?;
        if jet.attributes.ntracks as usize != range.len() {
            tracing::debug!(
                event,
                jet = jet.index,
                ntracks = jet.attributes.ntracks,
                range_len = range.len(),
                "jet track count differs from its track range"
            );
        }
        self.summary.jets += 1;
        self.summary.tracks_seen += range.len() as u64;

        self.selected.clear();
        for index in range {
            let track = tracks.track(index).ok_or_else(|| {
                Error::DataIntegrity(format!("event {event}: track {index} out of range"))
            })?;
            if !self.pipeline.evaluate(&track)? {
                continue;
            }
            let significance = track.value(self.significance);
            if significance.is_nan() {
                return Err(Error::DataIntegrity(format!(
                    "event {event}, jet {}: track {index} has NaN {}",
                    jet.index,
                    self.schema.name(self.significance)
                )));
            }
            self.selected.push(SelectedTrack { index, significance });
        }

        rank_tracks(&mut self.selected);
        let Some((ip, tche, tchp)) = discriminants(&self.selected) else {
            return Ok(None);
        };
        self.summary.tracks_selected += self.selected.len() as u64;
        self.summary.tagged_jets += 1;

        Ok(Some(JetTagRecord {
            event,
            jet: jet.index,
            attributes: jet.attributes,
            n_selected_tracks: self.selected.len(),
            ip,
            tche,
            tchp,
        }))
    }

    /// Tag every jet of `event`, appending records to `sink` in jet order.
    pub fn tag_event<S: TagSink + ?Sized>(&mut self, event: &Event, sink: &mut S) -> Result<()> {
        for jet in &event.jets {
            if let Some(record) = self.tag_jet(&event.tracks, event.entry, jet)? {
                sink.append(record)?;
            }
        }
        self.summary.events += 1;
        Ok(())
    }

    /// Tag a stream of events sequentially. The first error aborts the run;
    /// records already appended stay in the sink.
    pub fn run<I, S>(&mut self, events: I, sink: &mut S) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Event>>,
        S: TagSink + ?Sized,
    {
        tracing::info!(stages = ?self.pipeline.stage_names(), "tagging started");
        let start = self.summary;
        for event in events {
            self.tag_event(&event?, sink)?;
            let done = self.summary.events - start.events;
            if self.progress_every > 0 && done % self.progress_every == 0 {
                tracing::info!(events = done, "progress");
            }
        }
        let run = self.summary.since(&start);
        tracing::info!(
            events = run.events,
            jets = run.jets,
            tagged_jets = run.tagged_jets,
            "tagging finished"
        );
        Ok(run)
    }
}

/// Tags blocks of events across a rayon pool, one engine per worker.
///
/// Engines are never shared between workers, so each classifier feature buffer
/// has exactly one writer. Records come back in (event, jet) order.
#[derive(Debug)]
pub struct ParallelTagger {
    engines: Vec<JetTaggingEngine>,
    progress_every: u64,
}

impl ParallelTagger {
    /// Build `n_workers` engines (at least one) with `make_engine`.
    ///
    /// Engines are built up front, so configuration errors surface before any
    /// event is read.
    pub fn new<F>(n_workers: usize, make_engine: F) -> Result<Self>
    where
        F: Fn() -> Result<JetTaggingEngine>,
    {
        let engines = (0..n_workers.max(1))
            .map(|_| make_engine().map(|e| e.with_progress_every(0)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { engines, progress_every: DEFAULT_PROGRESS_EVERY })
    }

    /// Log progress roughly every `n` events (0 disables).
    pub fn with_progress_every(mut self, n: u64) -> Self {
        self.progress_every = n;
        self
    }

    /// Number of worker engines.
    pub fn n_workers(&self) -> usize {
        self.engines.len()
    }

    /// Tag a block of events in parallel.
    pub fn tag_block(&mut self, events: &[Event]) -> Result<Vec<JetTagRecord>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = events.len().div_ceil(self.engines.len());
        let parts = self
            .engines
            .par_iter_mut()
            .zip(events.par_chunks(chunk))
            .map(|(engine, chunk)| {
                let mut records: Vec<JetTagRecord> = Vec::new();
                for event in chunk {
                    engine.tag_event(event, &mut records)?;
                }
                Ok(records)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Counters summed over all workers.
    pub fn summary(&self) -> RunSummary {
        let mut total = RunSummary::default();
        for e in &self.engines {
            total.merge(&e.summary());
        }
        total
    }

    /// Read `events` in blocks of `block_size`, tag each block in parallel and
    /// append the records to `sink` in event order.
    pub fn run<I, S>(&mut self, events: I, sink: &mut S, block_size: usize) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Event>>,
        S: TagSink + ?Sized,
    {
        tracing::info!(
            workers = self.engines.len(),
            stages = ?self.engines[0].pipeline().stage_names(),
            "parallel tagging started"
        );
        let block_size = block_size.max(1);
        let start = self.summary();
        let mut last_logged = 0u64;
        let mut block = Vec::with_capacity(block_size);
        let mut events = events.into_iter();
        loop {
            block.clear();
            for event in events.by_ref().take(block_size) {
                block.push(event?);
            }
            if block.is_empty() {
                break;
            }
            for record in self.tag_block(&block)? {
                sink.append(record)?;
            }
            let done = self.summary().events - start.events;
            if self.progress_every > 0 && done / self.progress_every > last_logged {
                last_logged = done / self.progress_every;
                tracing::info!(events = done, "progress");
            }
        }
        let run = self.summary().since(&start);
        tracing::info!(
            events = run.events,
            jets = run.jets,
            tagged_jets = run.tagged_jets,
            "parallel tagging finished"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cut::{Comparator, CutSelector, CutSpec};
    use approx::assert_relative_eq;
    use tc_core::JetAttributes;

    fn jet(index: usize, first: usize, last: usize) -> Jet {
        Jet {
            index,
            first_track: first,
            last_track: last,
            attributes: JetAttributes { ntracks: (last - first) as u32, ..Default::default() },
        }
    }

    fn engine_for(tracks: &TrackColumns, pipeline: SelectionPipeline) -> JetTaggingEngine {
        JetTaggingEngine::new(pipeline, tracks.schema().clone(), "Track_IPsig").unwrap()
    }

    fn sel(index: usize, significance: f64) -> SelectedTrack {
        SelectedTrack { index, significance }
    }

    #[test]
    fn rank_is_stable_descending() {
        let mut v = vec![sel(2, 5.0), sel(7, 5.0), sel(1, 3.0)];
        rank_tracks(&mut v);
        assert_eq!(v.iter().map(|t| t.index).collect::<Vec<_>>(), vec![2, 7, 1]);
        assert_eq!(discriminants(&v), Some((5.0, 5.0, 3.0)));

        let mut v = vec![sel(0, 1.0), sel(1, 3.0), sel(2, 3.0), sel(3, 1.0)];
        rank_tracks(&mut v);
        assert_eq!(v.iter().map(|t| t.index).collect::<Vec<_>>(), vec![1, 2, 0, 3]);
    }

    #[test]
    fn signed_zero_ties_keep_order() {
        let mut v = vec![sel(0, -0.0), sel(1, 0.0)];
        rank_tracks(&mut v);
        assert_eq!(v[0].index, 0);
    }

    #[test]
    fn discriminant_sentinels() {
        assert_eq!(discriminants(&[]), None);
        assert_eq!(discriminants(&[sel(4, 2.5)]), Some((2.5, SENTINEL, SENTINEL)));
        assert_eq!(discriminants(&[sel(0, 3.0), sel(1, 2.0)]), Some((3.0, 2.0, SENTINEL)));
    }

    #[test]
    fn end_to_end_without_selection() {
        let tracks =
            TrackColumns::from_pairs([("Track_IPsig", vec![1.0, 8.0, -2.0, 4.0])]).unwrap();
        let mut engine = engine_for(&tracks, SelectionPipeline::new());
        let rec = engine.tag_jet(&tracks, 0, &jet(0, 0, 4)).unwrap().unwrap();
        assert_eq!(rec.n_selected_tracks, 4);
        assert_relative_eq!(rec.ip, 8.0);
        assert_relative_eq!(rec.tche, 4.0);
        assert_relative_eq!(rec.tchp, 1.0);
    }

    #[test]
    fn end_to_end_with_positive_significance_cut() {
        let tracks =
            TrackColumns::from_pairs([("Track_IPsig", vec![1.0, 8.0, -2.0, 4.0])]).unwrap();
        let cut = CutSelector::new(
            &[CutSpec::new("Track_IPsig", Comparator::Gt, 0.0)],
            tracks.schema(),
        )
        .unwrap();
        let mut engine = engine_for(&tracks, SelectionPipeline::new().with(cut));
        let rec = engine.tag_jet(&tracks, 0, &jet(0, 0, 4)).unwrap().unwrap();
        assert_eq!(rec.n_selected_tracks, 3);
        // three survivors fill all three ranks
        assert_eq!((rec.ip, rec.tche, rec.tchp), (8.0, 4.0, 1.0));
    }

    #[test]
    fn jets_without_survivors_emit_nothing() {
        let tracks = TrackColumns::from_pairs([("Track_IPsig", vec![-1.0, -3.0, 2.0])]).unwrap();
        let cut = CutSelector::new(
            &[CutSpec::new("Track_IPsig", Comparator::Gt, 0.0)],
            tracks.schema(),
        )
        .unwrap();
        let mut engine = engine_for(&tracks, SelectionPipeline::new().with(cut));
        assert!(engine.tag_jet(&tracks, 0, &jet(0, 0, 2)).unwrap().is_none());
        // empty range
        assert!(engine.tag_jet(&tracks, 0, &jet(1, 2, 2)).unwrap().is_none());
        let rec = engine.tag_jet(&tracks, 0, &jet(2, 2, 3)).unwrap().unwrap();
        assert_eq!((rec.ip, rec.tche, rec.tchp), (2.0, SENTINEL, SENTINEL));

        let s = engine.summary();
        assert_eq!((s.jets, s.tagged_jets, s.tracks_seen, s.tracks_selected), (3, 1, 3, 1));
    }

    #[test]
    fn invalid_ranges_are_data_integrity_errors() {
        let tracks = TrackColumns::from_pairs([("Track_IPsig", vec![1.0, 2.0])]).unwrap();
        let mut engine = engine_for(&tracks, SelectionPipeline::new());
        let mut backwards = jet(0, 0, 0);
        backwards.first_track = 2;
        backwards.last_track = 1;
        assert!(matches!(
            engine.tag_jet(&tracks, 0, &backwards),
            Err(Error::DataIntegrity(_))
        ));
        assert!(matches!(engine.tag_jet(&tracks, 0, &jet(0, 1, 3)), Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn nan_significance_on_selected_track_is_fatal() {
        let tracks = TrackColumns::from_pairs([("Track_IPsig", vec![1.0, f64::NAN])]).unwrap();
        let mut engine = engine_for(&tracks, SelectionPipeline::new());
        assert!(matches!(engine.tag_jet(&tracks, 3, &jet(0, 0, 2)), Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn unknown_significance_field() {
        let tracks = TrackColumns::from_pairs([("Track_pt", vec![1.0])]).unwrap();
        let err =
            JetTaggingEngine::new(SelectionPipeline::new(), tracks.schema().clone(), "Track_IPsig")
                .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn schema_mismatch_between_events_rejected() {
        let a = TrackColumns::from_pairs([("Track_IPsig", vec![1.0])]).unwrap();
        let b = TrackColumns::from_pairs([("Track_IPsig", vec![1.0]), ("Track_pt", vec![2.0])])
            .unwrap();
        let mut engine = engine_for(&a, SelectionPipeline::new());
        let event = Event { entry: 0, jets: vec![jet(0, 0, 1)], tracks: b };
        let mut sink: Vec<JetTagRecord> = Vec::new();
        assert!(matches!(engine.tag_event(&event, &mut sink), Err(Error::Configuration(_))));

        // structurally equal schema from a different Arc is fine
        let c = TrackColumns::from_pairs([("Track_IPsig", vec![3.0])]).unwrap();
        let event = Event { entry: 1, jets: vec![jet(0, 0, 1)], tracks: c };
        engine.tag_event(&event, &mut sink).unwrap();
        assert_eq!(sink.len(), 1);
    }
}
