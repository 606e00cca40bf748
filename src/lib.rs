//! # cutmarks
//!
//! Find commercial breaks in broadcast recordings and write cut marks for
//! trimming tools.
//!
//! `cutmarks` reads a segmented recording (MPEG transport stream `00001.ts`
//! or legacy program stream `001.vdr`), recovers picture types, frame rate,
//! aspect ratio and audio channel layout from the codec headers, runs
//! logo, black-border and channel-change detectors, and fuses their noisy
//! events into an ordered timeline of marks.
//!
//! ## Quick Start
//!
//! ### Analyze a Recording
//!
//! ```no_run
//! use cutmarks::{AnalysisOptions, Analyzer};
//!
//! let mut analyzer = Analyzer::open("/video/Show/2024-01-01.20.15.1-0.rec", AnalysisOptions::new())?;
//! let summary = analyzer.run()?;
//! println!("{} marks written to {}", summary.marks.len(), summary.mark_file.display());
//! # Ok::<(), cutmarks::CutmarksError>(())
//! ```
//!
//! ### Inspect Headers Without a Recording
//!
//! ```
//! use cutmarks::{HeaderParser, StreamContext, VideoCodec, VideoHeader};
//!
//! let parser = HeaderParser::new(VideoCodec::H262);
//! let mut context = StreamContext::default();
//! // sequence header: 720x576, 16:9, 25 fps
//! let unit = [0, 0, 1, 0xB3, 0x2D, 0x02, 0x40, 0x33, 0xFF, 0xFF, 0xE0, 0x18];
//! assert!(matches!(
//!     parser.find_video_info(&mut context, &unit),
//!     Some(VideoHeader::Sequence(_))
//! ));
//! assert_eq!(context.video.width, 720);
//! ```
//!
//! ## Features
//!
//! - **Structural demultiplexing**: PAT/PMT validation, TS and PS payload
//!   reassembly into elementary-stream units
//! - **Header parsing**: H.262 and H.264 sequence/picture headers, AC-3
//!   sync frames
//! - **Detectors**: logo masks with Sobel edge matching, horizontal black
//!   borders, aspect-ratio and audio channel changes
//! - **Mark engine**: rule-based deduplication and final rating of the
//!   timeline
//! - **Overlap search**: histogram matching of repeated material around ad
//!   blocks
//! - **Growing recordings**: waits for the index while a recording is
//!   still being written
//! - **Progress & cancellation**: callbacks and a `CancellationToken`
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | `FfmpegDecoder` picture decoding (logo and border detection) |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! Without the `ffmpeg` feature the crate is pure Rust and only
//! header-level analysis (aspect ratio, channel changes) is available
//! unless a custom [`FrameDecoder`] is attached. With it, FFmpeg
//! development libraries must be installed.

pub mod analyzer;
pub mod audio;
pub mod bitreader;
pub mod border;
pub mod configuration;
pub mod decoder;
pub mod demux;
pub mod engine;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod headers;
pub mod index;
pub mod logo;
pub mod marks;
pub mod notify;
pub mod overlap;
pub mod progress;
pub mod recording;
pub mod stream_info;
pub mod transport;
pub mod validation;
pub mod video;

pub use analyzer::{AnalysisSummary, Analyzer, CHUNK_SIZE, VideoSource};
pub use audio::ChannelDetector;
pub use bitreader::BitReader;
pub use border::{BorderDetector, BorderEvent, BorderState};
pub use configuration::{AnalysisOptions, DEFAULT_LOGO_DIRECTORY, LogoExtractionRequest};
pub use decoder::{DecodedFrame, FrameDecoder, PlaneLayout};
pub use demux::{Demux, PayloadKind, PesStream};
pub use engine::{FALLBACK_FPS, MarkDecision, MarkEngine};
pub use error::CutmarksError;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegDecoder, FfmpegLogLevel, FrameSkip, set_ffmpeg_log_level};
pub use headers::{Ac3Header, HeaderParser, SequenceInfo, VideoHeader};
pub use index::{IndexEntry, IndexFile, IndexStatus, IndexWaitPolicy, IndexWaiter};
pub use logo::{
    LogoArea, LogoCorner, LogoDetector, LogoEvent, LogoExtraction, LogoMask, LogoState,
};
pub use marks::{
    BroadcastAspect, Mark, MarkCategory, MarkFile, MarkFormat, MarkReason, MarkType, Marks,
};
pub use notify::{BackgroundNotifier, LogNotifier, Notifier, NotifyEvent};
pub use overlap::{AdBlock, Histogram, OverlapDetector, OverlapPosition, OverlapScan, OverlapSide};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use recording::{PidLock, RecordingFormat, RecordingInfo, RecordingLayout};
pub use stream_info::{
    AspectRatio, AudioInfo, BroadcastInfo, PictureType, RecordingTimers, StreamContext,
    VideoCodec, VideoInfo,
};
pub use transport::ProgramMap;
pub use validation::ValidationReport;
pub use video::VideoAnalyzer;
