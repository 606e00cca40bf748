//! Marks, the mark timeline and the mark file.
//!
//! A [`Mark`] is a typed event at a frame position. Its reason is kept as
//! structured data ([`MarkReason`]) and only rendered to text when the
//! timeline is logged or written by [`MarkFile`].

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::CutmarksError;
use crate::stream_info::AspectRatio;

/// Family a mark type belongs to (the high nibble of its code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkCategory {
    /// Synthetic recording start/stop marks.
    Common,
    /// Channel logo appeared or disappeared.
    Logo,
    /// Horizontal black borders appeared or disappeared.
    Border,
    /// Display aspect ratio changed.
    Aspect,
    /// Audio channel layout changed.
    Channel,
}

/// Type of a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkType {
    /// Recording start or stop.
    Common,
    /// Logo appeared: broadcast content starts.
    LogoStart,
    /// Logo disappeared: broadcast content stops.
    LogoStop,
    /// Borders appeared.
    BorderStart,
    /// Borders disappeared.
    BorderStop,
    /// Aspect ratio switched to the broadcast's announced format.
    AspectStart,
    /// Aspect ratio switched away from the announced format.
    AspectStop,
    /// Aspect ratio changed while the announced format is unknown.
    AspectChange,
    /// Multichannel audio started.
    ChannelStart,
    /// Multichannel audio stopped.
    ChannelStop,
}

impl MarkType {
    const ALL: [MarkType; 10] = [
        MarkType::Common,
        MarkType::LogoStart,
        MarkType::LogoStop,
        MarkType::BorderStart,
        MarkType::BorderStop,
        MarkType::AspectStart,
        MarkType::AspectStop,
        MarkType::AspectChange,
        MarkType::ChannelStart,
        MarkType::ChannelStop,
    ];

    /// Numeric code; the high nibble is the category.
    pub fn code(self) -> u8 {
        match self {
            MarkType::Common => 0x01,
            MarkType::LogoStart => 0x11,
            MarkType::LogoStop => 0x12,
            MarkType::BorderStart => 0x21,
            MarkType::BorderStop => 0x22,
            MarkType::AspectChange => 0x30,
            MarkType::AspectStart => 0x31,
            MarkType::AspectStop => 0x32,
            MarkType::ChannelStart => 0x41,
            MarkType::ChannelStop => 0x42,
        }
    }

    /// Category shared by all types with the same high nibble.
    pub fn category(self) -> MarkCategory {
        match self.code() & 0xF0 {
            0x10 => MarkCategory::Logo,
            0x20 => MarkCategory::Border,
            0x30 => MarkCategory::Aspect,
            0x40 => MarkCategory::Channel,
            _ => MarkCategory::Common,
        }
    }

    /// Start-type marks open a broadcast segment.
    pub fn is_start(self) -> bool {
        matches!(
            self,
            MarkType::LogoStart
                | MarkType::BorderStart
                | MarkType::AspectStart
                | MarkType::ChannelStart
        )
    }

    /// Stop-type marks close a broadcast segment.
    pub fn is_stop(self) -> bool {
        matches!(
            self,
            MarkType::LogoStop | MarkType::BorderStop | MarkType::AspectStop | MarkType::ChannelStop
        )
    }

    /// Symbolic tag written to the mark file.
    pub fn tag(self) -> &'static str {
        match self {
            MarkType::Common => "COMMON",
            MarkType::LogoStart => "LOGO_START",
            MarkType::LogoStop => "LOGO_STOP",
            MarkType::BorderStart => "BORDER_START",
            MarkType::BorderStop => "BORDER_STOP",
            MarkType::AspectStart => "ASPECT_START",
            MarkType::AspectStop => "ASPECT_STOP",
            MarkType::AspectChange => "ASPECT_CHANGE",
            MarkType::ChannelStart => "CHANNEL_START",
            MarkType::ChannelStop => "CHANNEL_STOP",
        }
    }

    /// Inverse of [`tag`](MarkType::tag).
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.tag() == tag)
    }
}

impl Display for MarkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.tag())
    }
}

/// How a detected aspect ratio relates to the broadcast's announced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastAspect {
    /// New aspect equals the announced aspect.
    Matches,
    /// New aspect differs from the announced aspect.
    Differs,
    /// The broadcast aspect is not known.
    Unknown,
}

/// Why a mark was placed.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkReason {
    /// First analyzed frame.
    RecordingStart,
    /// Last analyzed I-frame.
    RecordingStop {
        /// Position of the stop mark.
        frame: u64,
    },
    /// Logo detector committed a start.
    LogoStart {
        /// First frame of the logo run.
        frame: u64,
    },
    /// Logo detector committed a stop.
    LogoStop {
        /// First frame without logo.
        frame: u64,
    },
    /// Border detector committed a start.
    BorderStart {
        /// First frame of the border run.
        frame: u64,
        /// Frame at which the run was confirmed.
        detected_at: u64,
    },
    /// Border detector committed a stop.
    BorderStop {
        /// Last frame with borders.
        frame: u64,
        /// Frame at which the borders were gone.
        detected_at: u64,
    },
    /// The display aspect changed.
    AspectChange {
        /// Previous aspect.
        from: AspectRatio,
        /// New aspect.
        to: AspectRatio,
        /// Mark position.
        frame: u64,
        /// Relation of `to` to the announced aspect.
        broadcast: BroadcastAspect,
    },
    /// The audio channel count changed.
    ChannelChange {
        /// Previous channel count.
        from: u16,
        /// New channel count.
        to: u16,
        /// Mark position.
        frame: u64,
    },
    /// Stop mark moved onto the last frame before a repeated sequence.
    OverlapBefore {
        /// New position.
        frame: u64,
    },
    /// Start mark moved onto the first frame after a repeated sequence.
    OverlapAfter {
        /// New position.
        frame: u64,
    },
    /// Free text read back from an existing mark file.
    Text(String),
}

impl Display for MarkReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MarkReason::RecordingStart => write!(f, "start of recording (0)"),
            MarkReason::RecordingStop { frame } => write!(f, "stop of recording ({frame})"),
            MarkReason::LogoStart { frame } => write!(f, "detected logo start ({frame})"),
            MarkReason::LogoStop { frame } => write!(f, "detected logo stop ({frame})"),
            MarkReason::BorderStart { frame, detected_at } => {
                write!(f, "detected start of horiz. borders ({frame} [{detected_at}])")
            }
            MarkReason::BorderStop { frame, detected_at } => {
                write!(f, "detected stop of horiz. borders ({frame} [{detected_at}])")
            }
            MarkReason::AspectChange {
                from,
                to,
                frame,
                broadcast,
            } => {
                let suffix = match broadcast {
                    BroadcastAspect::Matches => "*",
                    BroadcastAspect::Differs => "",
                    BroadcastAspect::Unknown => "?",
                };
                write!(f, "aspect ratio change from {from} to {to} ({frame}){suffix}")
            }
            MarkReason::ChannelChange { from, to, frame } => {
                write!(f, "audio channel change from {from} to {to} ({frame})")
            }
            MarkReason::OverlapBefore { frame } => write!(f, "detected overlap before ({frame})"),
            MarkReason::OverlapAfter { frame } => write!(f, "detected overlap after ({frame})"),
            MarkReason::Text(text) => f.write_str(text),
        }
    }
}

/// A typed event at a frame position.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    /// Kind of boundary.
    pub mark_type: MarkType,
    /// Frame index.
    pub position: u64,
    /// Structured explanation.
    pub reason: MarkReason,
}

impl Mark {
    /// Create a mark.
    pub fn new(mark_type: MarkType, position: u64, reason: MarkReason) -> Self {
        Self {
            mark_type,
            position,
            reason,
        }
    }

    /// Category of this mark's type.
    pub fn category(&self) -> MarkCategory {
        self.mark_type.category()
    }
}

/// Ordered timeline of marks, at most one per position.
#[derive(Debug, Clone, Default)]
pub struct Marks {
    entries: BTreeMap<u64, Mark>,
}

impl Marks {
    /// An empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of marks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `mark`, replacing whatever occupied its position.
    pub fn add(&mut self, mark: Mark) -> Option<Mark> {
        self.entries.insert(mark.position, mark)
    }

    /// Mark at exactly `position`.
    pub fn get(&self, position: u64) -> Option<&Mark> {
        self.entries.get(&position)
    }

    /// Mark with the lowest position.
    pub fn first(&self) -> Option<&Mark> {
        self.entries.values().next()
    }

    /// Mark with the highest position.
    pub fn last(&self) -> Option<&Mark> {
        self.entries.values().next_back()
    }

    /// First mark strictly after `position`.
    pub fn next_after(&self, position: u64) -> Option<&Mark> {
        self.entries
            .range(position.saturating_add(1)..)
            .next()
            .map(|(_, mark)| mark)
            .filter(|_| position < u64::MAX)
    }

    /// First mark of `mark_type` strictly after `position`.
    pub fn next_of_type(&self, position: u64, mark_type: MarkType) -> Option<&Mark> {
        if position == u64::MAX {
            return None;
        }
        self.entries
            .range(position + 1..)
            .map(|(_, mark)| mark)
            .find(|mark| mark.mark_type == mark_type)
    }

    /// Remove the mark at `position`.
    pub fn remove(&mut self, position: u64) -> Option<Mark> {
        self.entries.remove(&position)
    }

    /// Remove every mark of `mark_type`; returns how many were removed.
    pub fn remove_type(&mut self, mark_type: MarkType) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, mark| mark.mark_type != mark_type);
        before - self.entries.len()
    }

    /// Number of marks of exactly `mark_type`.
    pub fn count_type(&self, mark_type: MarkType) -> usize {
        self.entries
            .values()
            .filter(|mark| mark.mark_type == mark_type)
            .count()
    }

    /// Number of marks in `category`.
    pub fn count_category(&self, category: MarkCategory) -> usize {
        self.entries
            .values()
            .filter(|mark| mark.category() == category)
            .count()
    }

    /// Drop every mark.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Marks in position order.
    pub fn iter(&self) -> impl Iterator<Item = &Mark> {
        self.entries.values()
    }
}

/// Format `position` as `H:MM:SS.FF` where `FF` is the 1-based frame
/// within the second.
pub fn timecode(position: u64, fps: f64) -> String {
    let fps = if fps > 0.0 { fps } else { 25.0 };
    let seconds = (position as f64 + 0.5) / fps;
    let whole = seconds.trunc();
    let frame = ((seconds - whole) * fps) as u64 + 1;
    let whole = whole as u64;
    format!(
        "{}:{:02}:{:02}.{:02}",
        whole / 3600,
        (whole / 60) % 60,
        whole % 60,
        frame
    )
}

/// Parse `H:MM:SS.FF` (or `H:MM:SS`) back into a frame position.
pub fn parse_timecode(text: &str, fps: f64) -> Option<u64> {
    let fps = if fps > 0.0 { fps } else { 25.0 };
    let (clock, frame) = match text.split_once('.') {
        Some((clock, frame)) => (clock, frame.parse::<u64>().ok()?),
        None => (text, 1),
    };
    let mut fields = clock.split(':');
    let hours: u64 = fields.next()?.parse().ok()?;
    let minutes: u64 = fields.next()?.parse().ok()?;
    let seconds: u64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    let base = ((hours * 3600 + minutes * 60 + seconds) as f64 * fps).round() as u64;
    Some(base + frame.saturating_sub(1))
}

/// How positions are written to the mark file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkFormat {
    /// `H:MM:SS.FF` timecodes.
    #[default]
    Timecode,
    /// Raw frame numbers.
    Frames,
}

/// The on-disk mark file of a recording.
#[derive(Debug, Clone)]
pub struct MarkFile {
    path: PathBuf,
    format: MarkFormat,
}

impl MarkFile {
    /// A mark file at `path`.
    pub fn new(path: impl Into<PathBuf>, format: MarkFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Path of the mark file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the backup copy.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Move an existing mark file aside.
    ///
    /// Returns `false` when there was nothing to back up.
    pub fn backup(&self) -> Result<bool, CutmarksError> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::rename(&self.path, self.backup_path())?;
        Ok(true)
    }

    /// Render one line of the file.
    pub fn format_line(&self, mark: &Mark, fps: f64) -> String {
        let position = match self.format {
            MarkFormat::Timecode => timecode(mark.position, fps),
            MarkFormat::Frames => mark.position.to_string(),
        };
        format!("{position} {} {}", mark.mark_type.tag(), mark.reason)
    }

    /// Write the timeline atomically (temporary file, then rename).
    ///
    /// An empty timeline removes a stale file instead.
    pub fn save(&self, marks: &Marks, fps: f64) -> Result<(), CutmarksError> {
        if marks.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let mut temporary = self.path.as_os_str().to_owned();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        let file = File::create(&temporary)?;
        let mut writer = BufWriter::new(file);
        for mark in marks.iter() {
            writeln!(writer, "{}", self.format_line(mark, fps))?;
        }
        let file = writer.into_inner().map_err(|error| error.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temporary, &self.path)?;
        Ok(())
    }

    /// Read a mark file written in either position format.
    ///
    /// Lines that cannot be parsed are skipped.
    pub fn load(&self, fps: f64) -> Result<Marks, CutmarksError> {
        let content = fs::read_to_string(&self.path)?;
        let mut marks = Marks::new();
        for line in content.lines() {
            let line = line.trim();
            let (position, rest) = line.split_once(' ').unwrap_or((line, ""));
            let position = if position.contains(':') {
                parse_timecode(position, fps)
            } else {
                position.parse().ok()
            };
            let Some(position) = position else {
                continue;
            };
            let (mark_type, comment) = match rest.split_once(' ') {
                Some((tag, comment)) => match MarkType::from_tag(tag) {
                    Some(mark_type) => (mark_type, comment),
                    None => (MarkType::Common, rest),
                },
                None => match MarkType::from_tag(rest) {
                    Some(mark_type) => (mark_type, ""),
                    None => (MarkType::Common, rest),
                },
            };
            marks.add(Mark::new(
                mark_type,
                position,
                MarkReason::Text(comment.to_string()),
            ));
        }
        Ok(marks)
    }
}
