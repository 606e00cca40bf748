//! Histogram-based overlap search around ad blocks.
//!
//! Recordings often repeat a few seconds of the programme before and after
//! a commercial break. [`OverlapDetector`] collects brightness histograms
//! from a window before the break ("before") and a window after it
//! ("after") and looks for the longest run of consecutive similar pairs.
//! The first frames of that run are the splice points.

use std::ops::Range;

use crate::decoder::DecodedFrame;
use crate::marks::Marks;

/// Sum of absolute bin differences below which two frames are similar.
pub const SIMILAR_CUTOFF: u64 = 50_000;
/// A run must be longer than this many pairs to be accepted.
pub const SIMILAR_MAX_COUNT: usize = 4;

/// 256-bin luma histogram.
#[derive(Clone, PartialEq, Eq)]
pub struct Histogram(pub [u32; 256]);

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total: u64 = self.0.iter().map(|&count| u64::from(count)).sum();
        f.debug_struct("Histogram").field("samples", &total).finish()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self([0; 256])
    }
}

impl Histogram {
    /// Histogram of the visible luma plane.
    pub fn of_luma(picture: &DecodedFrame) -> Self {
        let mut histogram = Self::default();
        for y in 0..picture.height as usize {
            let Some(row) = picture.luma_row(y) else {
                break;
            };
            for &value in row {
                histogram.0[usize::from(value)] += 1;
            }
        }
        histogram
    }

    /// Sum of absolute per-bin differences.
    pub fn distance(&self, other: &Histogram) -> u64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(&a, &b)| u64::from(a.abs_diff(b)))
            .sum()
    }

    /// Whether the distance to `other` is below `cutoff`.
    pub fn is_similar(&self, other: &Histogram, cutoff: u64) -> bool {
        self.distance(other) < cutoff
    }
}

/// Splice points found by the overlap search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapPosition {
    /// Frame before the break where the repeated material begins.
    pub before: u64,
    /// Matching frame after the break.
    pub after: u64,
}

/// Which side of the break a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapSide {
    /// Frames leading up to the stop mark.
    Before,
    /// Frames following the start mark.
    After,
}

#[derive(Debug, Clone, Default)]
struct Window {
    capacity: usize,
    frames: Vec<(u64, Histogram)>,
}

impl Window {
    fn is_full(&self) -> bool {
        self.capacity > 0 && self.frames.len() >= self.capacity
    }
}

/// Collects before/after histograms and searches for the overlap.
#[derive(Debug, Clone)]
pub struct OverlapDetector {
    before: Window,
    after: Window,
    cutoff: u64,
    min_run: usize,
}

impl Default for OverlapDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlapDetector {
    /// A detector with the standard cutoff and run length.
    pub fn new() -> Self {
        Self::with_thresholds(SIMILAR_CUTOFF, SIMILAR_MAX_COUNT)
    }

    /// A detector with custom thresholds.
    pub fn with_thresholds(cutoff: u64, min_run: usize) -> Self {
        Self {
            before: Window::default(),
            after: Window::default(),
            cutoff,
            min_run,
        }
    }

    /// Drop both windows.
    pub fn clear(&mut self) {
        self.before = Window::default();
        self.after = Window::default();
    }

    /// Number of frames collected on `side`.
    pub fn collected(&self, side: OverlapSide) -> usize {
        match side {
            OverlapSide::Before => self.before.frames.len(),
            OverlapSide::After => self.after.frames.len(),
        }
    }

    /// Add one histogram to the window of `side`.
    ///
    /// `capacity` sizes the window on first use. Once the "after" window
    /// is full, the search runs and its result is returned; the windows
    /// are cleared either way.
    pub fn process(
        &mut self,
        frame_number: u64,
        histogram: Histogram,
        capacity: usize,
        side: OverlapSide,
    ) -> Option<OverlapPosition> {
        let window = match side {
            OverlapSide::Before => &mut self.before,
            OverlapSide::After => &mut self.after,
        };
        if window.capacity == 0 {
            window.capacity = capacity.max(1);
        }
        if window.is_full() {
            return None;
        }
        window.frames.push((frame_number, histogram));

        if side == OverlapSide::After && self.after.is_full() {
            let result = self.detect();
            self.clear();
            return result;
        }
        None
    }

    /// Search the collected windows.
    ///
    /// Pairs are scanned in nested ascending order. A run grows while each
    /// following "before" frame matches the "after" frame right behind the
    /// previous match; any dissimilar pair ends it. The first frames of
    /// the longest run longer than the minimum are returned.
    pub fn detect(&self) -> Option<OverlapPosition> {
        let mut best: Option<(usize, OverlapPosition)> = None;
        let mut run = 0;
        let mut run_start = None;
        let mut resume_at = 0;

        let mut close_run = |run: &mut usize, run_start: &mut Option<OverlapPosition>| {
            if *run > self.min_run
                && let Some(start) = *run_start
                && best.is_none_or(|(length, _)| *run > length)
            {
                best = Some((*run, start));
            }
            *run = 0;
            *run_start = None;
        };

        for (before_frame, before) in &self.before.frames {
            let mut after_index = resume_at;
            let mut matched = false;
            resume_at = 0;
            while let Some((after_frame, after)) = self.after.frames.get(after_index) {
                if before.is_similar(after, self.cutoff) {
                    if run == 0 {
                        run_start = Some(OverlapPosition {
                            before: *before_frame,
                            after: *after_frame,
                        });
                    }
                    run += 1;
                    resume_at = after_index + 1;
                    matched = true;
                    break;
                }
                close_run(&mut run, &mut run_start);
                after_index += 1;
            }
            if !matched {
                close_run(&mut run, &mut run_start);
            }
        }
        close_run(&mut run, &mut run_start);

        best.map(|(_, position)| position)
    }
}

/// One STOP→START pair of the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdBlock {
    /// Position of the stop mark opening the break.
    pub stop: u64,
    /// Position of the start mark closing it.
    pub start: u64,
}

impl AdBlock {
    /// Every stop mark directly followed by a start mark.
    pub fn from_marks(marks: &Marks) -> Vec<AdBlock> {
        let ordered: Vec<_> = marks.iter().collect();
        ordered
            .windows(2)
            .filter(|pair| pair[0].mark_type.is_stop() && pair[1].mark_type.is_start())
            .map(|pair| AdBlock {
                stop: pair[0].position,
                start: pair[1].position,
            })
            .collect()
    }

    fn before_range(&self, window: u64) -> Range<u64> {
        self.stop.saturating_sub(window)..self.stop
    }

    fn after_range(&self, window: u64) -> Range<u64> {
        self.start..self.start.saturating_add(window)
    }
}

/// Overlap search over every ad block in one pass of decoded pictures.
///
/// Each block owns its detector. A picture goes to every block whose
/// windows cover it, so blocks closer together than two windows still
/// see all of their frames.
#[derive(Debug)]
pub struct OverlapScan {
    window: u64,
    blocks: Vec<AdBlock>,
    detectors: Vec<OverlapDetector>,
    results: Vec<Option<Option<OverlapPosition>>>,
}

impl OverlapScan {
    /// Windows of `window` pictures on each side of every block.
    pub fn new(blocks: Vec<AdBlock>, window: u64) -> Self {
        Self {
            window: window.max(1),
            detectors: vec![OverlapDetector::new(); blocks.len()],
            results: vec![None; blocks.len()],
            blocks,
        }
    }

    pub fn blocks(&self) -> &[AdBlock] {
        &self.blocks
    }

    /// Whether every block has its result.
    pub fn is_done(&self) -> bool {
        self.results.iter().all(Option::is_some)
    }

    /// Offer picture `frame`; `histogram` is computed only when some open
    /// window wants the picture.
    pub fn feed(&mut self, frame: u64, histogram: impl FnOnce() -> Histogram) {
        let window = self.window;
        let capacity = window as usize;
        let mut compute = Some(histogram);
        let mut cached: Option<Histogram> = None;
        let mut picture = || {
            if cached.is_none() {
                cached = compute.take().map(|compute| compute());
            }
            cached.clone()
        };

        for ((block, detector), result) in self
            .blocks
            .iter()
            .zip(self.detectors.iter_mut())
            .zip(self.results.iter_mut())
        {
            if result.is_some() {
                continue;
            }
            let after = block.after_range(window);
            if frame >= after.end {
                *result = Some(detector.detect());
                detector.clear();
            } else if block.before_range(window).contains(&frame) {
                if let Some(histogram) = picture() {
                    detector.process(frame, histogram, capacity, OverlapSide::Before);
                }
            } else if after.contains(&frame)
                && let Some(histogram) = picture()
            {
                let closing = detector.collected(OverlapSide::After) + 1 >= capacity;
                let found = detector.process(frame, histogram, capacity, OverlapSide::After);
                if closing {
                    *result = Some(found);
                }
            }
        }
    }

    /// Results in block order; blocks whose windows never filled are
    /// searched with what was collected.
    pub fn finish(self) -> Vec<Option<OverlapPosition>> {
        self.results
            .into_iter()
            .zip(self.detectors)
            .map(|(result, detector)| result.unwrap_or_else(|| detector.detect()))
            .collect()
    }
}
