//! Progress reporting and cancellation support.
//!
//! The analyzer reports how far it has read through the recording's
//! segments to a [`ProgressCallback`] as [`ProgressInfo`] snapshots. A
//! [`CancellationToken`] is the abort flag a signal handler raises.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cutmarks::{
//!     AnalysisOptions, Analyzer, CutmarksError, ProgressCallback, ProgressInfo,
//! };
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("[{:?}] {pct:.1}% complete", info.operation);
//!         }
//!     }
//! }
//!
//! let options = AnalysisOptions::new().with_progress(Arc::new(PrintProgress));
//! let mut analyzer = Analyzer::open("/video/Show/2024-01-01.20.15.1-0.rec", options)?;
//! analyzer.run()?;
//! # Ok::<(), CutmarksError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// The kind of work currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// First pass over the recording segments.
    Analysis,
    /// Histogram pass around existing ad blocks.
    OverlapSearch,
}

/// Where a pass stands.
///
/// How often these arrive is set by
/// [`AnalysisOptions::with_batch_size`](crate::AnalysisOptions::with_batch_size).
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub operation: OperationType,
    /// Bytes read so far across all segments.
    pub current: u64,
    /// Summed segment sizes, when they could be stat'ed.
    pub total: Option<u64>,
    /// `current` over `total`, in percent.
    pub percentage: Option<f32>,
    pub elapsed: Duration,
    /// Extrapolated from the byte rate so far.
    pub estimated_remaining: Option<Duration>,
    /// Number of video frames counted so far.
    pub current_frame: Option<u64>,
}

/// Receiver of progress snapshots.
///
/// A callback only observes the run; stopping it goes through the
/// [`CancellationToken`] in the options.
pub trait ProgressCallback: Send + Sync {
    /// Called once per batch of chunks and once more at the end of a pass.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Default sink when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Shared abort flag for one analysis run.
///
/// The binary hands a clone to its signal task; the analyzer polls
/// [`is_cancelled`](CancellationToken::is_cancelled) between chunks and
/// when it moves to the next segment, and the index waiter polls it
/// between retries.
///
/// # Example
///
/// ```
/// use cutmarks::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handler = token.clone();
/// assert!(!token.is_cancelled());
///
/// handler.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; every clone sees it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counts consumed bytes for one pass and reports every `batch_size`
/// chunks.
pub(crate) struct ProgressTracker {
    sink: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total_bytes: Option<u64>,
    consumed: u64,
    batch_size: u64,
    pending_chunks: u64,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(
        sink: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total_bytes: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            sink,
            operation,
            total_bytes,
            consumed: 0,
            batch_size: batch_size.max(1),
            pending_chunks: 0,
            started: Instant::now(),
        }
    }

    /// Account for a chunk of `bytes`; `frames` is the running frame count.
    pub(crate) fn advance(&mut self, bytes: u64, frames: u64) {
        self.consumed += bytes;
        self.pending_chunks += 1;
        if self.pending_chunks == self.batch_size {
            self.pending_chunks = 0;
            self.emit(frames);
        }
    }

    /// Closing report, sent whether or not a batch is pending.
    pub(crate) fn finish(&mut self, frames: u64) {
        self.emit(frames);
    }

    fn emit(&self, frames: u64) {
        let elapsed = self.started.elapsed();
        let known_total = self.total_bytes.filter(|&total| total > 0);
        let fraction = known_total.map(|total| self.consumed as f64 / total as f64);
        let estimated_remaining = fraction.filter(|&f| f > 0.0).map(|f| {
            let left = (1.0 - f).max(0.0);
            elapsed.mul_f64(left / f)
        });

        self.sink.on_progress(&ProgressInfo {
            operation: self.operation,
            current: self.consumed,
            total: self.total_bytes,
            percentage: fraction.map(|f| (f * 100.0) as f32),
            elapsed,
            estimated_remaining,
            current_frame: Some(frames),
        });
    }
}
