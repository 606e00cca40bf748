//! Post-run validation.
//!
//! After the marks are saved, [`validate_marks`] checks every mark against
//! the recording's index (see [`IndexFile`](crate::IndexFile)) and
//! [`validate_context`] summarizes what was learned about the streams. The
//! results are collected in a [`ValidationReport`].
//!
//! # Example
//!
//! ```no_run
//! use cutmarks::{AnalysisOptions, Analyzer};
//!
//! let mut analyzer = Analyzer::open("/video/Show/2024-01-01.20.15.1-0.rec", AnalysisOptions::new())?;
//! let summary = analyzer.run()?;
//! if !summary.report.is_valid() {
//!     for error in &summary.report.errors {
//!         println!("Error: {error}");
//!     }
//! }
//! # Ok::<(), cutmarks::CutmarksError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::index::{IndexEntry, IndexFile};
use crate::marks::Marks;
use crate::recording::RecordingFormat;
use crate::stream_info::{StreamContext, VideoCodec};

/// Findings of the checks that run after the marks are written.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Stream summaries and index confirmations.
    pub info: Vec<String>,
    /// Guesses the run had to make, such as a default frame rate.
    pub warnings: Vec<String>,
    /// Marks a cutter would place at the wrong picture.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Whether the marks can be trusted for cutting. Warnings don't count.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of lines the report prints, not counting the empty notice.
    pub fn issue_count(&self) -> usize {
        self.info.len() + self.warnings.len() + self.errors.len()
    }

    /// Append every entry of `other`.
    pub fn merge(&mut self, other: ValidationReport) {
        self.info.extend(other.info);
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for item in &self.info {
            writeln!(f, "[INFO] {item}")?;
        }
        for item in &self.warnings {
            writeln!(f, "[WARN] {item}")?;
        }
        for item in &self.errors {
            writeln!(f, "[ERROR] {item}")?;
        }
        if self.issue_count() == 0 {
            writeln!(f, "No issues found.")?;
        }
        Ok(())
    }
}

/// Summarize the stream properties gathered during the run.
pub fn validate_context(context: &StreamContext, frames: u64) -> ValidationReport {
    let mut report = ValidationReport::default();
    let video = &context.video;

    // ── Video ──────────────────────────────────────────────────────
    if frames == 0 {
        report
            .errors
            .push("No video frames found in recording".to_string());
    }
    if video.width == 0 || video.height == 0 {
        report
            .warnings
            .push("Video dimensions unknown, no sequence header seen".to_string());
    }
    if video.frames_per_second <= 0.0 {
        report.warnings.push(
            "Video frame rate unknown, time-based thresholds used 25 fps".to_string(),
        );
    }
    report.info.push(format!(
        "Video: {} {}x{}{} @ {:.2} fps, aspect {}, {frames} frames",
        video
            .codec
            .map_or_else(|| "unknown".to_string(), |codec| codec.to_string()),
        video.width,
        video.height,
        if video.interlaced { "i" } else { "p" },
        video.frames_per_second,
        video.aspect_ratio,
    ));

    // ── Audio ──────────────────────────────────────────────────────
    if context.audio.channels > 0 {
        report.info.push(format!(
            "Audio: AC-3 {} channels @ {} Hz",
            context.audio.channels, context.audio.sample_rate
        ));
    }

    report
}

/// Check that every mark lands on an independently decodable frame.
///
/// `regenerate_index` only changes the advice given for program-stream
/// recordings; the repair tool itself is never run.
pub fn validate_marks(
    index: &IndexFile,
    marks: &Marks,
    codec: Option<VideoCodec>,
    regenerate_index: bool,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let entries = match index.entries() {
        Ok(entries) => entries,
        Err(error) => {
            report.warnings.push(format!("Index not checked: {error}"));
            return report;
        }
    };

    let mismatches: Vec<u64> = marks
        .iter()
        .map(|mark| mark.position)
        .filter(|&position| {
            !entries
                .get(position as usize)
                .is_some_and(IndexEntry::is_independent)
        })
        .collect();

    if mismatches.is_empty() {
        report
            .info
            .push(format!("Index matches all {} marks", marks.len()));
        return report;
    }

    for position in &mismatches {
        report
            .errors
            .push(format!("Mark at frame {position} is not an I-frame in the index"));
    }
    let advice = match (index.format(), codec) {
        (RecordingFormat::Vdr, Some(VideoCodec::H264)) => {
            "index doesn't match marks, sorry you're lost"
        }
        (RecordingFormat::Vdr, _) if regenerate_index => {
            "index doesn't match marks, regenerate it with genindex"
        }
        (RecordingFormat::Vdr, _) => "index doesn't match marks, please run genindex",
        (RecordingFormat::TransportStream, _) => {
            "index doesn't match marks, please recreate it"
        }
    };
    report.warnings.push(advice.to_string());
    report
}
