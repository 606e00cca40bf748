//! Per-recording stream state.
//!
//! [`StreamContext`] collects what the header parser learned about the
//! video and audio streams, what the info file says about the broadcast,
//! and the user overrides that gate each detector. The analysis driver
//! owns it and hands shared references to the detectors; only header
//! parsing, option handling and the mark engine write to it.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Display aspect ratio as a rational `num:den`.
///
/// `0:0` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AspectRatio {
    /// Numerator.
    pub num: u32,
    /// Denominator.
    pub den: u32,
}

impl AspectRatio {
    /// The narrow television format.
    pub const FOUR_THREE: AspectRatio = AspectRatio::new(4, 3);
    /// The wide television format.
    pub const SIXTEEN_NINE: AspectRatio = AspectRatio::new(16, 9);

    /// Build an aspect ratio from its two terms.
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Both terms are non-zero.
    pub fn is_known(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Whether switching from `previous` to `self` counts as an aspect
    /// change.
    ///
    /// Both terms must be known on either side and **both** the numerator
    /// and the denominator must differ.
    pub fn differs_from(&self, previous: &AspectRatio) -> bool {
        if !self.is_known() || !previous.is_known() {
            return false;
        }
        self.num != previous.num && self.den != previous.den
    }

    /// Reduce `num:den` by their greatest common divisor.
    pub fn reduced(num: u64, den: u64) -> Self {
        if num == 0 || den == 0 {
            return Self::default();
        }
        let (mut a, mut b) = (num, den);
        while b != 0 {
            (a, b) = (b, a % b);
        }
        let divisor = a.max(1);
        Self::new(
            u32::try_from(num / divisor).unwrap_or(u32::MAX),
            u32::try_from(den / divisor).unwrap_or(u32::MAX),
        )
    }
}

impl Display for AspectRatio {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.num, self.den)
    }
}

/// Coding type of a picture, as carried in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureType {
    /// Intra-coded picture.
    I,
    /// Predicted picture.
    P,
    /// Bidirectionally predicted picture.
    B,
    /// DC-only picture (H.262).
    D,
}

impl PictureType {
    /// Single-letter code used in debug logs.
    pub fn code(self) -> char {
        match self {
            PictureType::I => 'I',
            PictureType::P => 'P',
            PictureType::B => 'B',
            PictureType::D => 'D',
        }
    }
}

/// The two video codec families the header parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.262 / MPEG-2 video.
    H262,
    /// H.264 / AVC.
    H264,
}

impl Display for VideoCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VideoCodec::H262 => f.write_str("H262"),
            VideoCodec::H264 => f.write_str("H264"),
        }
    }
}

/// What the header parser learned about the video stream.
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    /// Codec family of the selected video stream.
    pub codec: Option<VideoCodec>,
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Frames per second; `0.0` while unknown.
    pub frames_per_second: f64,
    /// Current display aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Field-coded (interlaced) content.
    pub interlaced: bool,
    /// Type of the most recent picture header.
    pub picture_type: Option<PictureType>,
}

/// What the header parser learned about the audio stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioInfo {
    /// Channel count including LFE; `0` while unknown.
    pub channels: u16,
    /// Sample rate in Hz; `0` while unknown.
    pub sample_rate: u32,
}

/// Hints about the broadcast, read from the recording's info file.
#[derive(Debug, Clone, Default)]
pub struct BroadcastInfo {
    /// Channel identifier with dots replaced by underscores.
    pub channel_id: Option<String>,
    /// Broadcast title.
    pub title: Option<String>,
    /// Announced aspect ratio of the broadcast; unknown if not announced.
    pub aspect_ratio: AspectRatio,
    /// Announced length of the broadcast in seconds; `0` if unknown.
    pub length_secs: u64,
}

/// Pre-roll/post-roll margins around the broadcast, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingTimers {
    /// Seconds recorded before the announced broadcast start.
    pub pre_roll_secs: u64,
    /// Seconds recorded after the announced broadcast end.
    pub post_roll_secs: u64,
}

/// Per-recording context shared by the header parser, detectors and engine.
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// Video stream properties.
    pub video: VideoInfo,
    /// Audio stream properties.
    pub audio: AudioInfo,
    /// Broadcast hints.
    pub broadcast: BroadcastInfo,
    /// Pre-/post-roll margins.
    pub timers: RecordingTimers,
    /// Aspect ratio changes are not reported.
    pub ignore_aspect_ratio: bool,
    /// Logo detection is skipped.
    pub ignore_logo_detection: bool,
    /// Pictures are handed to the decoder.
    pub decode_video: bool,
    /// Audio headers are analyzed.
    pub decode_audio: bool,
}

impl Default for StreamContext {
    fn default() -> Self {
        Self {
            video: VideoInfo::default(),
            audio: AudioInfo::default(),
            broadcast: BroadcastInfo::default(),
            timers: RecordingTimers::default(),
            ignore_aspect_ratio: false,
            ignore_logo_detection: false,
            decode_video: true,
            decode_audio: true,
        }
    }
}

impl StreamContext {
    /// Frame rate as used for all time-based thresholds.
    pub fn fps(&self) -> f64 {
        self.video.frames_per_second
    }

    /// Convert a duration in seconds into a frame distance at the current
    /// frame rate.
    pub fn frames_for_secs(&self, secs: f64) -> i64 {
        (self.video.frames_per_second * secs) as i64
    }

    /// True when the picture height indicates HD material.
    pub fn is_hd(&self) -> bool {
        self.video.height > 576
    }
}
