//! Recording directories: layout, info file and instance lock.
//!
//! Two on-disk layouts are understood. Transport-stream recordings store
//! `00001.ts`, `00002.ts`, ... next to `index` and `info`; older
//! program-stream recordings store `001.vdr`, ... next to `index.vdr` and
//! `info.vdr`.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info, warn};
use regex::Regex;

use crate::error::CutmarksError;
use crate::stream_info::{AspectRatio, RecordingTimers, VideoCodec};

/// Name of the lock file placed in the recording directory.
pub const PID_FILE_NAME: &str = "cutmarks.pid";

/// Container format of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    /// MPEG transport stream segments (`%05d.ts`).
    TransportStream,
    /// MPEG program stream segments (`%03d.vdr`).
    Vdr,
}

impl RecordingFormat {
    /// File name of segment `number` (1-based).
    pub fn segment_name(self, number: u32) -> String {
        match self {
            RecordingFormat::TransportStream => format!("{number:05}.ts"),
            RecordingFormat::Vdr => format!("{number:03}.vdr"),
        }
    }

    /// Highest segment number the format allows.
    pub fn max_segments(self) -> u32 {
        match self {
            RecordingFormat::TransportStream => 65535,
            RecordingFormat::Vdr => 999,
        }
    }

    /// Name of the index file.
    pub fn index_name(self) -> &'static str {
        match self {
            RecordingFormat::TransportStream => "index",
            RecordingFormat::Vdr => "index.vdr",
        }
    }

    /// Name of the info file.
    pub fn info_name(self) -> &'static str {
        match self {
            RecordingFormat::TransportStream => "info",
            RecordingFormat::Vdr => "info.vdr",
        }
    }

    /// Default name of the mark file.
    pub fn mark_file_name(self) -> &'static str {
        match self {
            RecordingFormat::TransportStream => "marks",
            RecordingFormat::Vdr => "marks.vdr",
        }
    }
}

/// A recording directory and its detected format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingLayout {
    directory: PathBuf,
    format: RecordingFormat,
}

impl RecordingLayout {
    /// Inspect `directory` and detect the recording format.
    pub fn detect<P: AsRef<Path>>(directory: P) -> Result<Self, CutmarksError> {
        let directory = directory.as_ref();
        let metadata =
            fs::metadata(directory).map_err(|error| CutmarksError::RecordingDirectory {
                path: directory.to_path_buf(),
                reason: error.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(CutmarksError::RecordingDirectory {
                path: directory.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let format = [RecordingFormat::TransportStream, RecordingFormat::Vdr]
            .into_iter()
            .find(|format| directory.join(format.segment_name(1)).is_file())
            .ok_or_else(|| CutmarksError::NoSegments(directory.to_path_buf()))?;
        debug!("{} recording in {}", format_label(format), directory.display());

        Ok(Self {
            directory: directory.to_path_buf(),
            format,
        })
    }

    /// The recording directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The detected format.
    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    /// Path of segment `number`.
    pub fn segment_path(&self, number: u32) -> PathBuf {
        self.directory.join(self.format.segment_name(number))
    }

    /// Path of the index file.
    pub fn index_path(&self) -> PathBuf {
        self.directory.join(self.format.index_name())
    }

    /// Path of the info file.
    pub fn info_path(&self) -> PathBuf {
        self.directory.join(self.format.info_name())
    }

    /// Existing segment files, in order, stopping at the first gap.
    pub fn segments(&self) -> Vec<PathBuf> {
        (1..=self.format.max_segments())
            .map(|number| self.segment_path(number))
            .take_while(|path| path.is_file())
            .collect()
    }

    /// Sum of the segment sizes in bytes.
    pub fn total_size(&self) -> u64 {
        self.segments()
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|metadata| metadata.len())
            .sum()
    }

    /// Codec family of a program-stream recording.
    ///
    /// The first PES packet of `001.vdr` is inspected: an H.264 stream
    /// starts its payload with an access unit delimiter followed by a
    /// 4-byte start code.
    pub fn probe_vdr_codec(&self) -> Result<VideoCodec, CutmarksError> {
        let mut head = [0u8; 32];
        File::open(self.segment_path(1))?.read_exact(&mut head)?;
        Ok(if is_h264_pes(&head) {
            VideoCodec::H264
        } else {
            VideoCodec::H262
        })
    }
}

fn format_label(format: RecordingFormat) -> &'static str {
    match format {
        RecordingFormat::TransportStream => "TS",
        RecordingFormat::Vdr => "VDR",
    }
}

fn is_h264_pes(head: &[u8; 32]) -> bool {
    if head[..3] != [0, 0, 1] || head[3] & 0xF0 != 0xE0 {
        return false;
    }
    let payload = 9 + usize::from(head[8]);
    if payload > 23 {
        return false;
    }
    let start = &head[payload..];
    start[..3] == [0, 0, 1] && start[5..9] == [0, 0, 0, 1]
}

/// Broadcast information read from the info file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingInfo {
    /// Channel identifier, dots replaced by underscores.
    pub channel_id: Option<String>,
    /// Broadcast title.
    pub title: Option<String>,
    /// Announced start as a Unix timestamp; `0` if unknown.
    pub start_time: i64,
    /// Announced length in seconds; `0` if unknown.
    pub length_secs: u64,
    /// Margins derived from the timer line.
    pub timers: Option<RecordingTimers>,
    /// Announced aspect ratio.
    pub aspect_ratio: Option<AspectRatio>,
    /// The AC-3 track is stereo only; channel analysis is pointless.
    pub disable_ac3: bool,
    /// The AC-3 track is multichannel; video decoding is not needed.
    pub disable_video_decoding: bool,
}

impl RecordingInfo {
    /// Read and parse an info file.
    ///
    /// `ignore_video` skips the video component line, `ignore_audio` the
    /// audio component line.
    pub fn load(path: &Path, ignore_video: bool, ignore_audio: bool) -> Result<Self, CutmarksError> {
        let content = fs::read(path)?;
        Ok(Self::parse(
            &String::from_utf8_lossy(&content),
            ignore_video,
            ignore_audio,
        ))
    }

    /// Parse info file content.
    pub fn parse(content: &str, ignore_video: bool, ignore_audio: bool) -> Self {
        let mut info = Self::default();
        for line in content.lines() {
            let Some(tag) = line.chars().next() else {
                continue;
            };
            let rest = line.get(1..).unwrap_or_default().trim();
            match tag {
                'C' => {
                    info.channel_id = rest
                        .split_whitespace()
                        .next()
                        .map(|id| id.replace('.', "_"));
                }
                'E' => {
                    let fields: Vec<&str> = rest.split_whitespace().collect();
                    let start = fields.get(1).and_then(|field| field.parse::<i64>().ok());
                    let length = fields.get(2).and_then(|field| field.parse::<u64>().ok());
                    (info.start_time, info.length_secs) = match (start, length) {
                        (Some(start), Some(length)) => (start, length),
                        _ => (0, 0),
                    };
                }
                'T' => {
                    let title: String = rest.chars().take(79).collect();
                    info.title = (!title.is_empty()).then_some(title);
                }
                '@' => {
                    if info.start_time != 0 && info.length_secs != 0 && info.timers.is_none() {
                        info.timers = Some(parse_timer_line(
                            rest,
                            info.start_time,
                            info.length_secs,
                        ));
                    }
                }
                'X' => info.parse_component(rest, ignore_video, ignore_audio),
                _ => {}
            }
        }
        info
    }

    fn parse_component(&mut self, rest: &str, ignore_video: bool, ignore_audio: bool) {
        let mut fields = rest.splitn(3, char::is_whitespace);
        let stream = fields.next().and_then(|field| field.parse::<u32>().ok());
        let kind = fields.next().and_then(|field| field.trim().parse::<u32>().ok());
        let description = fields.next().unwrap_or_default();

        match (stream, kind) {
            (Some(1), Some(kind)) if !ignore_video => {
                self.aspect_ratio = Some(if kind == 1 || kind == 5 {
                    AspectRatio::FOUR_THREE
                } else {
                    AspectRatio::SIXTEEN_NINE
                });
            }
            (Some(2), Some(5)) if !ignore_audio => {
                if description.contains('2') {
                    self.disable_ac3 = true;
                    info!("broadcast with DolbyDigital2.0, disabling AC3 decoding");
                }
                if description.contains('5') {
                    self.disable_video_decoding = true;
                    info!("broadcast with DolbyDigital5.1, disabling video decoding");
                }
            }
            _ => {}
        }
    }
}

/// `<start>N</start>` or `<stop>M</stop>` inside a timer line.
fn timer_field_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"<(start|stop)>\s*(-?\d+)\s*</(?:start|stop)>").ok())
        .as_ref()
}

/// Margins from the timer's start and stop times around the event.
fn parse_timer_line(line: &str, start_time: i64, length_secs: u64) -> RecordingTimers {
    let (mut timer_start, mut timer_stop) = (None, None);
    if let Some(pattern) = timer_field_pattern() {
        for captures in pattern.captures_iter(line) {
            let value = captures[2].parse::<i64>().ok();
            match &captures[1] {
                "start" => timer_start = timer_start.or(value),
                _ => timer_stop = timer_stop.or(value),
            }
        }
    }
    let pre_roll = timer_start.map_or(0, |timer_start| start_time - timer_start);
    let post_roll = timer_stop.map_or(0, |timer_stop| {
        timer_stop - start_time - length_secs as i64
    });
    RecordingTimers {
        pre_roll_secs: pre_roll.max(0) as u64,
        post_roll_secs: post_roll.max(0) as u64,
    }
}

/// Advisory lock held for the duration of one analysis.
///
/// The lock file contains the owner's process id. A stale file left by a
/// dead process is taken over.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Take the lock in `directory`.
    pub fn acquire(directory: &Path) -> Result<Self, CutmarksError> {
        let path = directory.join(PID_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(content) => {
                if let Ok(pid) = content.trim().parse::<u32>()
                    && pid != std::process::id()
                    && process_alive(pid)
                {
                    return Err(CutmarksError::DuplicateInstance { pid });
                }
                warn!("removing stale lock file {}", path.display());
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self { path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path)
            && error.kind() != ErrorKind::NotFound
        {
            warn!("cannot remove {}: {error}", self.path.display());
        }
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
