//! The recording's frame index.
//!
//! The recorder writes one 8-byte record per video frame while the
//! recording runs. Its size therefore tells how far the recording has
//! grown, and its records tell which frames are independently decodable.
//!
//! Record layouts (little-endian):
//!
//! - transport stream `index`: 40-bit file offset, 7 reserved bits, an
//!   "independent" flag, 16-bit file number;
//! - program stream `index.vdr`: 32-bit file offset, 8-bit frame type
//!   (`1` = I-frame), 8-bit file number, 16 reserved bits.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use log::{debug, error};

use crate::error::CutmarksError;
use crate::progress::CancellationToken;
use crate::recording::RecordingFormat;

/// Size of one index record.
pub const INDEX_RECORD_SIZE: u64 = 8;
/// Frames the index must be ahead of the analysis before it stops waiting.
pub const INDEX_LEAD_FRAMES: u64 = 200;

const VDR_I_FRAME: u8 = 1;
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// One decoded index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the frame inside its segment.
    pub offset: u64,
    /// The frame is independently decodable.
    pub independent: bool,
    /// Segment number holding the frame.
    pub file_number: u16,
}

impl IndexEntry {
    /// Whether a cut may start at this frame.
    pub fn is_independent(&self) -> bool {
        self.independent
    }

    /// Decode a transport-stream index record.
    pub fn from_ts_record(record: [u8; 8]) -> Self {
        let value = u64::from_le_bytes(record);
        Self {
            offset: value & 0xFF_FFFF_FFFF,
            independent: (value >> 47) & 1 == 1,
            file_number: (value >> 48) as u16,
        }
    }

    /// Decode a program-stream index record.
    pub fn from_vdr_record(record: [u8; 8]) -> Self {
        let offset = i32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        Self {
            offset: u64::try_from(offset).unwrap_or(0),
            independent: record[4] == VDR_I_FRAME,
            file_number: u16::from(record[5]),
        }
    }
}

/// The index file of a recording.
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
    format: RecordingFormat,
}

impl IndexFile {
    /// An index at `path` in the given layout.
    pub fn new(path: impl Into<PathBuf>, format: RecordingFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Path of the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record layout.
    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    /// Number of frames indexed so far.
    pub fn frame_count(&self) -> Result<u64, CutmarksError> {
        Ok(fs::metadata(&self.path)?.len() / INDEX_RECORD_SIZE)
    }

    /// Decode every complete record.
    pub fn entries(&self) -> Result<Vec<IndexEntry>, CutmarksError> {
        let data = fs::read(&self.path).map_err(|error| CutmarksError::Index {
            path: self.path.clone(),
            reason: error.to_string(),
        })?;
        Ok(data
            .chunks_exact(INDEX_RECORD_SIZE as usize)
            .filter_map(|chunk| <[u8; 8]>::try_from(chunk).ok())
            .map(|record| match self.format {
                RecordingFormat::TransportStream => IndexEntry::from_ts_record(record),
                RecordingFormat::Vdr => IndexEntry::from_vdr_record(record),
            })
            .collect())
    }
}

/// How long to wait for a growing index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexWaitPolicy {
    /// Sleeps without progress before waiting is given up for good.
    pub retries: u32,
    /// Length of one sleep.
    pub delay: Duration,
    /// An index not modified for this long is not growing any more.
    pub stale_after: Duration,
}

impl Default for IndexWaitPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(10),
            stale_after: Duration::from_secs(10),
        }
    }
}

/// Outcome of one [`IndexWaiter::wait_for`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// The index is far enough ahead.
    Ready,
    /// No index file, or waiting was given up earlier.
    Unavailable,
    /// The index is behind but no longer growing.
    Stale,
    /// The retries were used up during this call.
    GaveUp,
    /// Cancellation was requested while sleeping.
    Cancelled,
}

/// Waits for a recording that is still being written.
#[derive(Debug)]
pub struct IndexWaiter {
    index: IndexFile,
    policy: IndexWaitPolicy,
    sleeps: u32,
    waited: Duration,
}

impl IndexWaiter {
    /// Wait on `index` with `policy`.
    pub fn new(index: IndexFile, policy: IndexWaitPolicy) -> Self {
        Self {
            index,
            policy,
            sleeps: 0,
            waited: Duration::ZERO,
        }
    }

    /// Total time spent sleeping.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Block until the index is [`INDEX_LEAD_FRAMES`] ahead of
    /// `frames_seen`, the index stops growing, or the retries run out.
    ///
    /// `before_sleep` runs ahead of every sleep so intermediate marks can
    /// be persisted.
    pub fn wait_for(
        &mut self,
        frames_seen: u64,
        token: &CancellationToken,
        mut before_sleep: impl FnMut(),
    ) -> IndexStatus {
        loop {
            if self.sleeps >= self.policy.retries {
                return IndexStatus::Unavailable;
            }
            let Ok(metadata) = fs::metadata(self.index.path()) else {
                return IndexStatus::Unavailable;
            };
            let available = metadata.len() / INDEX_RECORD_SIZE;
            if available >= frames_seen + INDEX_LEAD_FRAMES {
                self.sleeps = 0;
                return IndexStatus::Ready;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or_default();
            if age >= self.policy.stale_after {
                return IndexStatus::Stale;
            }

            debug!("index has {available} frames, waiting for more (seen {frames_seen})");
            before_sleep();
            if !sleep_unless_cancelled(self.policy.delay, token) {
                return IndexStatus::Cancelled;
            }
            self.waited += self.policy.delay;
            self.sleeps += 1;
            if self.sleeps >= self.policy.retries {
                error!(
                    "no new data after {} seconds, skipping wait!",
                    self.waited.as_secs()
                );
                return IndexStatus::GaveUp;
            }
        }
    }
}

/// Sleep for `duration` in short slices; `false` if cancelled meanwhile.
fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if token.is_cancelled() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
    !token.is_cancelled()
}
