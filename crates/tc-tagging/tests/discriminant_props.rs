use proptest::prelude::*;
use tc_core::{Jet, JetAttributes, SENTINEL, TrackColumns};
use tc_tagging::{Comparator, CutSelector, CutSpec, JetTaggingEngine, SelectionPipeline};

fn jet_over(n: usize) -> Jet {
    Jet {
        index: 0,
        first_track: 0,
        last_track: n,
        attributes: JetAttributes { ntracks: n as u32, ..Default::default() },
    }
}

proptest! {
    #[test]
    fn discriminants_are_ordered_order_statistics(
        sigs in prop::collection::vec(-50.0f64..50.0, 0..24),
        threshold in -10.0f64..10.0,
    ) {
        let tracks = TrackColumns::from_pairs([("Track_IPsig", sigs.clone())]).unwrap();
        let cut = CutSelector::new(
            &[CutSpec::new("Track_IPsig", Comparator::Gt, threshold)],
            tracks.schema(),
        )
        .unwrap();
        let mut engine = JetTaggingEngine::new(
            SelectionPipeline::new().with(cut),
            tracks.schema().clone(),
            "Track_IPsig",
        )
        .unwrap();

        let mut kept: Vec<f64> = sigs.iter().copied().filter(|&s| s > threshold).collect();
        kept.sort_by(|a, b| b.partial_cmp(a).unwrap());

        match engine.tag_jet(&tracks, 0, &jet_over(sigs.len())).unwrap() {
            None => prop_assert!(kept.is_empty()),
            Some(rec) => {
                prop_assert_eq!(rec.n_selected_tracks, kept.len());
                prop_assert!(rec.ip >= rec.tche && rec.tche >= rec.tchp);
                prop_assert_eq!(rec.ip, kept[0]);
                prop_assert_eq!(rec.tche, kept.get(1).copied().unwrap_or(SENTINEL));
                prop_assert_eq!(rec.tchp, kept.get(2).copied().unwrap_or(SENTINEL));
            }
        }
    }

    #[test]
    fn track_order_within_jet_does_not_matter(
        sigs in prop::collection::vec(-20.0f64..20.0, 1..16),
        rotate in 0usize..16,
    ) {
        let mut rotated = sigs.clone();
        let k = rotate % sigs.len();
        rotated.rotate_left(k);

        let tag = |values: Vec<f64>| {
            let n = values.len();
            let tracks = TrackColumns::from_pairs([("Track_IPsig", values)]).unwrap();
            let mut engine =
                JetTaggingEngine::new(SelectionPipeline::new(), tracks.schema().clone(), "Track_IPsig")
                    .unwrap();
            engine.tag_jet(&tracks, 0, &jet_over(n)).unwrap().unwrap()
        };
        let (a, b) = (tag(sigs), tag(rotated));
        prop_assert_eq!((a.ip, a.tche, a.tchp), (b.ip, b.tche, b.tchp));
    }
}
