//! Picture decoding through FFmpeg.
//!
//! [`FfmpegDecoder`] implements [`FrameDecoder`] for H.262 and H.264
//! elementary streams. The demultiplexer delivers one start-code unit at a
//! time; the decoder gathers units into access units and hands each
//! complete access unit to FFmpeg.
//!
//! FFmpeg has its own internal logging system, separate from the Rust
//! [`log`](https://crates.io/crates/log) crate. [`set_ffmpeg_log_level`]
//! tunes it without importing `ffmpeg-next` directly.
//!
//! This module is available when the `ffmpeg` feature is enabled.
//!
//! # Example
//!
//! ```no_run
//! use cutmarks::{FfmpegDecoder, FfmpegLogLevel, FrameDecoder, VideoCodec};
//!
//! cutmarks::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! let mut decoder = FfmpegDecoder::new(VideoCodec::H262)?;
//! let unit = [0u8, 0, 1, 0xB3];
//! let _ = decoder.decode_video(&unit);
//! # Ok::<(), cutmarks::CutmarksError>(())
//! ```

use ffmpeg_next::{
    Packet, codec, decoder::Video as VideoDecoder, format::Pixel, frame::Video as VideoFrame,
    util::log::Level,
};
use ffmpeg_sys_next::AVDiscard;
use log::debug;

use crate::decoder::{DecodedFrame, FrameDecoder, PlaneLayout};
use crate::error::CutmarksError;
use crate::stream_info::{AspectRatio, VideoCodec, VideoInfo};

const H264_NAL_AUD: u8 = 9;
const H262_PICTURE_START: u8 = 0x00;
const H262_SEQUENCE_HEADER: u8 = 0xB3;
const H262_GROUP_START: u8 = 0xB8;

/// Which pictures FFmpeg may skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSkip {
    /// Decode every picture.
    #[default]
    None,
    /// Decode key frames only.
    NonKey,
    /// Skip bidirectionally predicted pictures.
    Bidirectional,
}

/// H.262/H.264 decoder backed by FFmpeg.
pub struct FfmpegDecoder {
    codec: VideoCodec,
    decoder: VideoDecoder,
    access_unit: Vec<u8>,
    has_picture: bool,
    frame: VideoFrame,
    skip: Option<FrameSkip>,
}

impl std::fmt::Debug for FfmpegDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegDecoder")
            .field("codec", &self.codec)
            .field("buffered", &self.access_unit.len())
            .finish()
    }
}

impl FfmpegDecoder {
    /// Open a decoder for `codec`.
    pub fn new(codec: VideoCodec) -> Result<Self, CutmarksError> {
        ffmpeg_next::init()?;
        let id = match codec {
            VideoCodec::H262 => codec::Id::MPEG2VIDEO,
            VideoCodec::H264 => codec::Id::H264,
        };
        let found = ffmpeg_next::decoder::find(id)
            .ok_or_else(|| CutmarksError::VideoDecodeError(format!("no {codec} decoder")))?;
        let decoder = codec::context::Context::new_with_codec(found)
            .decoder()
            .video()?;
        debug!("opened {codec} decoder");
        Ok(Self {
            codec,
            decoder,
            access_unit: Vec::new(),
            has_picture: false,
            frame: VideoFrame::empty(),
            skip: None,
        })
    }

    /// Let FFmpeg skip some pictures.
    ///
    /// Without this, the skip mode is chosen once the stream's coding is
    /// known: key frames only for progressive H.264, no B-pictures
    /// otherwise.
    #[must_use]
    pub fn with_skip(mut self, skip: FrameSkip) -> Self {
        self.set_skip(skip);
        self
    }

    fn set_skip(&mut self, skip: FrameSkip) {
        let discard = match skip {
            FrameSkip::None => AVDiscard::AVDISCARD_DEFAULT,
            FrameSkip::NonKey => AVDiscard::AVDISCARD_NONKEY,
            FrameSkip::Bidirectional => AVDiscard::AVDISCARD_BIDIR,
        };
        // SAFETY: the context pointer is owned by `self.decoder` and valid
        // for its lifetime; `skip_frame` is a plain enum field.
        unsafe {
            (*self.decoder.as_mut_ptr()).skip_frame = discard;
        }
        self.skip = Some(skip);
    }

    /// The codec family being decoded.
    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn starts_access_unit(&self, unit: &[u8]) -> bool {
        let offset = match unit {
            [0, 0, 0, 1, ..] => 4,
            [0, 0, 1, ..] => 3,
            _ => return false,
        };
        let Some(&code) = unit.get(offset) else {
            return false;
        };
        match self.codec {
            VideoCodec::H264 => code & 0x1F == H264_NAL_AUD,
            VideoCodec::H262 => {
                self.has_picture
                    && matches!(
                        code,
                        H262_PICTURE_START | H262_SEQUENCE_HEADER | H262_GROUP_START
                    )
            }
        }
    }

    fn flush_access_unit(&mut self) -> Option<DecodedFrame> {
        if self.access_unit.is_empty() {
            return None;
        }
        let packet = Packet::copy(&self.access_unit);
        self.access_unit.clear();
        self.has_picture = false;
        if let Err(error) = self.decoder.send_packet(&packet) {
            debug!("decoder rejected access unit: {error}");
            return None;
        }
        let mut picture = None;
        while self.decoder.receive_frame(&mut self.frame).is_ok() {
            picture = Some(convert_frame(&self.frame));
        }
        picture
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn decode_video(&mut self, unit: &[u8]) -> Option<DecodedFrame> {
        let picture = if self.starts_access_unit(unit) {
            self.flush_access_unit()
        } else {
            None
        };
        if self.codec == VideoCodec::H262 && unit.get(3) == Some(&H262_PICTURE_START) {
            self.has_picture = true;
        }
        self.access_unit.extend_from_slice(unit);
        picture
    }

    fn configure(&mut self, video: &VideoInfo) {
        if self.skip.is_some() || video.picture_type.is_none() {
            return;
        }
        let skip = if self.codec == VideoCodec::H264 && !video.interlaced {
            FrameSkip::NonKey
        } else {
            FrameSkip::Bidirectional
        };
        debug!("decoder skips {skip:?} pictures");
        self.set_skip(skip);
    }

    fn reset(&mut self) {
        self.access_unit.clear();
        self.has_picture = false;
        self.decoder.flush();
    }
}

fn convert_frame(frame: &VideoFrame) -> DecodedFrame {
    let layout = match frame.format() {
        Pixel::YUV420P | Pixel::YUVJ420P | Pixel::YUV422P | Pixel::YUV444P => PlaneLayout::Planar8,
        _ => PlaneLayout::Other,
    };
    let planes = frame.planes();
    let sample_aspect = frame.aspect_ratio();
    let aspect_hint = (sample_aspect.numerator() > 0 && sample_aspect.denominator() > 0).then(|| {
        AspectRatio::reduced(
            u64::from(frame.width()) * sample_aspect.numerator() as u64,
            u64::from(frame.height()) * sample_aspect.denominator() as u64,
        )
    });
    DecodedFrame {
        planes: (0..planes).map(|plane| frame.data(plane).to_vec()).collect(),
        linesizes: (0..planes).map(|plane| frame.stride(plane)).collect(),
        width: frame.width(),
        height: frame.height(),
        layout,
        aspect_hint,
    }
}

/// FFmpeg internal log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants. Setting a level causes
/// FFmpeg to suppress all messages below that severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Only unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (default FFmpeg level).
    Warning,
    /// Informational messages.
    Info,
    /// Debugging messages.
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

/// Set the FFmpeg internal log verbosity level.
///
/// This controls what FFmpeg prints to stderr. It does **not** affect
/// Rust-side `log` crate output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}
