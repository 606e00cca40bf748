//! Overlap search tests.

use cutmarks::{
    AdBlock, DecodedFrame, Histogram, Mark, MarkReason, MarkType, Marks, OverlapDetector,
    OverlapPosition, OverlapScan, OverlapSide,
};

/// A histogram with every sample in bin `bin`.
fn solid(bin: usize) -> Histogram {
    let mut bins = [0u32; 256];
    bins[bin] = 100_000;
    Histogram(bins)
}

fn feed(detector: &mut OverlapDetector, before: &[usize], after: &[usize]) -> Option<OverlapPosition> {
    for (index, &bin) in before.iter().enumerate() {
        assert_eq!(
            detector.process(1000 + index as u64, solid(bin), before.len(), OverlapSide::Before),
            None
        );
    }
    let mut result = None;
    for (index, &bin) in after.iter().enumerate() {
        result = detector.process(5000 + index as u64, solid(bin), after.len(), OverlapSide::After);
    }
    result
}

#[test]
fn histogram_of_luma_counts_visible_samples() {
    // rows are padded to three bytes; the padding is not counted
    let mut picture = DecodedFrame::from_luma(2, 2, vec![0, 0, 9, 7, 255, 9]);
    picture.linesizes[0] = 3;
    let histogram = Histogram::of_luma(&picture);
    assert_eq!(histogram.0[0], 2);
    assert_eq!(histogram.0[7], 1);
    assert_eq!(histogram.0[255], 1);
    assert_eq!(histogram.0.iter().sum::<u32>(), 4);
}

#[test]
fn distance_sums_bin_differences() {
    assert_eq!(solid(3).distance(&solid(3)), 0);
    assert_eq!(solid(3).distance(&solid(4)), 200_000);
    assert!(solid(3).is_similar(&solid(3), 1));
    assert!(!solid(3).is_similar(&solid(4), 50_000));
}

#[test]
fn finds_the_repeated_sequence() {
    let before = [10, 11, 12, 13, 14, 15, 16, 17, 18, 19];
    let after = [100, 101, 13, 14, 15, 16, 17, 18, 102, 103];
    let mut detector = OverlapDetector::new();
    assert_eq!(
        feed(&mut detector, &before, &after),
        Some(OverlapPosition {
            before: 1003,
            after: 5002
        })
    );
    // windows are dropped after a search
    assert_eq!(detector.collected(OverlapSide::Before), 0);
}

#[test]
fn short_runs_are_rejected() {
    let before = [10, 11, 12, 13, 14, 15, 16, 17, 18, 19];
    let after = [100, 101, 13, 14, 15, 16, 102, 103, 104, 105];
    let mut detector = OverlapDetector::new();
    assert_eq!(feed(&mut detector, &before, &after), None);
}

#[test]
fn five_similar_pairs_are_the_shortest_accepted_run() {
    let before = [10, 11, 12, 13, 14, 15, 16, 17, 18, 19];
    let after = [100, 101, 13, 14, 15, 16, 17, 102, 103, 104];
    let mut detector = OverlapDetector::new();
    assert_eq!(
        feed(&mut detector, &before, &after),
        Some(OverlapPosition {
            before: 1003,
            after: 5002
        })
    );
}

#[test]
fn longest_run_wins() {
    let before = [1, 2, 3, 4, 5, 6, 50, 60, 61, 62, 63, 64, 65, 66, 67];
    let after = [1, 2, 3, 4, 5, 6, 200, 60, 61, 62, 63, 64, 65, 66, 67];
    let mut detector = OverlapDetector::new();
    assert_eq!(
        feed(&mut detector, &before, &after),
        Some(OverlapPosition {
            before: 1007,
            after: 5007
        })
    );
}

#[test]
fn full_windows_ignore_extra_frames() {
    let mut detector = OverlapDetector::with_thresholds(1, 0);
    detector.process(1, solid(1), 2, OverlapSide::Before);
    detector.process(2, solid(2), 2, OverlapSide::Before);
    detector.process(3, solid(3), 2, OverlapSide::Before);
    assert_eq!(detector.collected(OverlapSide::Before), 2);

    assert_eq!(detector.process(10, solid(9), 2, OverlapSide::After), None);
    assert_eq!(detector.collected(OverlapSide::After), 1);
    assert_eq!(
        detector.process(11, solid(2), 2, OverlapSide::After),
        Some(OverlapPosition {
            before: 2,
            after: 11
        })
    );
}

// ── Scans over a whole recording ───────────────────────────────────

/// Brightness bin shown at `frame`: unique per frame, except for two
/// repeated stretches.
fn scene(frame: u64) -> usize {
    match frame {
        // repeats 13..=17 right after the first break
        30..=34 => frame as usize - 17,
        // repeats 26..=30 right after the second break
        47..=50 => frame as usize - 21,
        51 => 13,
        _ => frame as usize,
    }
}

/// Two breaks whose windows touch: the first block's "after" window
/// shares frames with the second block's "before" window.
fn close_blocks() -> Vec<AdBlock> {
    vec![
        AdBlock { stop: 20, start: 30 },
        AdBlock { stop: 35, start: 45 },
    ]
}

#[test]
fn ad_blocks_pair_stop_with_following_start() {
    let mut marks = Marks::new();
    for (mark_type, position) in [
        (MarkType::Common, 0),
        (MarkType::LogoStop, 100),
        (MarkType::LogoStart, 200),
        (MarkType::LogoStart, 250),
        (MarkType::AspectStop, 300),
        (MarkType::AspectStart, 400),
    ] {
        marks.add(Mark::new(mark_type, position, MarkReason::Text(String::new())));
    }
    assert_eq!(
        AdBlock::from_marks(&marks),
        vec![
            AdBlock { stop: 100, start: 200 },
            AdBlock { stop: 300, start: 400 },
        ]
    );
}

#[test]
fn adjacent_blocks_each_see_their_whole_windows() {
    let mut scan = OverlapScan::new(close_blocks(), 10);
    for frame in 0..60 {
        scan.feed(frame, || solid(scene(frame)));
    }
    assert!(scan.is_done());
    assert_eq!(
        scan.finish(),
        vec![
            Some(OverlapPosition {
                before: 13,
                after: 30
            }),
            Some(OverlapPosition {
                before: 26,
                after: 47
            }),
        ]
    );
}

#[test]
fn unfinished_windows_are_searched_at_the_end() {
    let mut scan = OverlapScan::new(close_blocks(), 10);
    // the recording ends inside the second block's "after" window
    for frame in 0..51 {
        scan.feed(frame, || solid(scene(frame)));
    }
    assert!(!scan.is_done());
    let results = scan.finish();
    assert_eq!(
        results[0],
        Some(OverlapPosition {
            before: 13,
            after: 30
        })
    );
    // only four of the five repeated frames were seen
    assert_eq!(results[1], None);
}

#[test]
fn histograms_are_only_built_for_windowed_frames() {
    let mut scan = OverlapScan::new(vec![AdBlock { stop: 20, start: 30 }], 5);
    let mut built = Vec::new();
    for frame in 0..40 {
        scan.feed(frame, || {
            built.push(frame);
            solid(scene(frame))
        });
    }
    assert_eq!(built, (15..20).chain(30..35).collect::<Vec<_>>());
}
