//! Analysis configuration.
//!
//! [`AnalysisOptions`] is a builder that threads detector switches, output
//! settings, progress callbacks and cancellation tokens into
//! [`Analyzer::open`](crate::Analyzer::open) without polluting every
//! function signature.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cutmarks::{AnalysisOptions, CancellationToken, ProgressCallback, ProgressInfo};
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?}: {} bytes done", info.operation, info.current);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = AnalysisOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_cancellation(token.clone())
//!     .with_backup_marks(true)
//!     .with_batch_size(16);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CutmarksError;
use crate::index::IndexWaitPolicy;
use crate::logo::{LOGO_MAX_HEIGHT, LOGO_MAX_WIDTH, LogoCorner};
use crate::marks::MarkFormat;
use crate::notify::Notifier;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Default directory holding logo masks.
pub const DEFAULT_LOGO_DIRECTORY: &str = "/var/lib/cutmarks";

/// Smallest window width accepted for logo extraction.
pub const MIN_EXTRACT_WIDTH: u32 = 50;
/// Smallest window height accepted for logo extraction.
pub const MIN_EXTRACT_HEIGHT: u32 = 20;

/// Which corner (and window size) to write edge maps for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoExtractionRequest {
    /// Corner to extract.
    pub corner: LogoCorner,
    /// Window width; the codec default when `None`.
    pub width: Option<u32>,
    /// Window height; the default when `None`.
    pub height: Option<u32>,
}

/// Configuration for one analysis run.
///
/// All fields have sensible defaults: a default-constructed value analyzes
/// video and audio, honours the info file and writes timecoded marks.
#[derive(Clone)]
pub struct AnalysisOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: CancellationToken,
    pub(crate) batch_size: u64,
    pub(crate) decode_video: bool,
    pub(crate) decode_audio: bool,
    pub(crate) ignore_video_info: bool,
    pub(crate) ignore_audio_info: bool,
    pub(crate) logo_directory: PathBuf,
    pub(crate) logo_extraction: Option<LogoExtractionRequest>,
    pub(crate) extraction_output: PathBuf,
    pub(crate) backup_marks: bool,
    pub(crate) mark_file: Option<String>,
    pub(crate) mark_format: MarkFormat,
    pub(crate) pre_roll_secs: Option<u64>,
    pub(crate) post_roll_secs: Option<u64>,
    pub(crate) use_pid_file: bool,
    pub(crate) overlap: bool,
    pub(crate) regenerate_index: bool,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
    pub(crate) index_wait: IndexWaitPolicy,
    pub(crate) frame_dump: Option<PathBuf>,
}

impl Debug for AnalysisOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AnalysisOptions")
            .field("decode_video", &self.decode_video)
            .field("decode_audio", &self.decode_audio)
            .field("ignore_video_info", &self.ignore_video_info)
            .field("ignore_audio_info", &self.ignore_audio_info)
            .field("logo_directory", &self.logo_directory)
            .field("logo_extraction", &self.logo_extraction)
            .field("backup_marks", &self.backup_marks)
            .field("mark_file", &self.mark_file)
            .field("mark_format", &self.mark_format)
            .field("pre_roll_secs", &self.pre_roll_secs)
            .field("post_roll_secs", &self.post_roll_secs)
            .field("overlap", &self.overlap)
            .field("has_notifier", &self.notifier.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: CancellationToken::new(),
            batch_size: 1,
            decode_video: true,
            decode_audio: true,
            ignore_video_info: false,
            ignore_audio_info: false,
            logo_directory: PathBuf::from(DEFAULT_LOGO_DIRECTORY),
            logo_extraction: None,
            extraction_output: std::env::temp_dir(),
            backup_marks: false,
            mark_file: None,
            mark_format: MarkFormat::Timecode,
            pre_roll_secs: None,
            post_roll_secs: None,
            use_pid_file: true,
            overlap: false,
            regenerate_index: false,
            notifier: None,
            index_wait: IndexWaitPolicy::default(),
            frame_dump: None,
        }
    }

    /// Attach a progress callback.
    ///
    /// The callback is invoked every [`batch_size`](AnalysisOptions::with_batch_size)
    /// chunks read from the recording.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, the analysis stops and returns
    /// [`CutmarksError::Cancelled`] without writing marks.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set how often the progress callback fires (every N chunks).
    ///
    /// Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Enable or disable picture decoding (logo and border detection).
    #[must_use]
    pub fn with_video_decoding(mut self, enabled: bool) -> Self {
        self.decode_video = enabled;
        self
    }

    /// Enable or disable AC-3 channel analysis.
    #[must_use]
    pub fn with_audio_decoding(mut self, enabled: bool) -> Self {
        self.decode_audio = enabled;
        self
    }

    /// Ignore the video component line of the info file.
    #[must_use]
    pub fn with_ignore_video_info(mut self, ignore: bool) -> Self {
        self.ignore_video_info = ignore;
        self
    }

    /// Ignore the audio component line of the info file.
    #[must_use]
    pub fn with_ignore_audio_info(mut self, ignore: bool) -> Self {
        self.ignore_audio_info = ignore;
        self
    }

    /// Directory holding the logo masks.
    #[must_use]
    pub fn with_logo_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.logo_directory = directory.into();
        self
    }

    /// Write edge maps of a corner instead of detecting logos.
    ///
    /// Forces video decoding on and both info hints off.
    #[must_use]
    pub fn with_logo_extraction(mut self, request: LogoExtractionRequest) -> Self {
        self.logo_extraction = Some(request);
        self.decode_video = true;
        self.ignore_video_info = true;
        self.ignore_audio_info = true;
        self
    }

    /// Directory edge maps are written to in extraction mode.
    #[must_use]
    pub fn with_extraction_output(mut self, directory: impl Into<PathBuf>) -> Self {
        self.extraction_output = directory.into();
        self
    }

    /// Move an existing mark file to `<name>.bak` before the run.
    #[must_use]
    pub fn with_backup_marks(mut self, backup: bool) -> Self {
        self.backup_marks = backup;
        self
    }

    /// Override the mark file name.
    #[must_use]
    pub fn with_mark_file(mut self, name: impl Into<String>) -> Self {
        self.mark_file = Some(name.into());
        self
    }

    /// Write timecodes or frame numbers.
    #[must_use]
    pub fn with_mark_format(mut self, format: MarkFormat) -> Self {
        self.mark_format = format;
        self
    }

    /// Seconds recorded before the broadcast starts; overrides the info file.
    #[must_use]
    pub fn with_pre_roll(mut self, secs: u64) -> Self {
        self.pre_roll_secs = Some(secs);
        self
    }

    /// Seconds recorded after the broadcast ends; overrides the info file.
    #[must_use]
    pub fn with_post_roll(mut self, secs: u64) -> Self {
        self.post_roll_secs = Some(secs);
        self
    }

    /// Whether to take the lock file in the recording directory.
    #[must_use]
    pub fn with_pid_file(mut self, enabled: bool) -> Self {
        self.use_pid_file = enabled;
        self
    }

    /// Run the overlap search around every ad block after the first pass.
    #[must_use]
    pub fn with_overlap_search(mut self, enabled: bool) -> Self {
        self.overlap = enabled;
        self
    }

    /// Advise index regeneration when marks do not match the index.
    #[must_use]
    pub fn with_regenerate_index(mut self, enabled: bool) -> Self {
        self.regenerate_index = enabled;
        self
    }

    /// Attach a notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Tune waiting for a recording that is still growing.
    #[must_use]
    pub fn with_index_wait(mut self, policy: IndexWaitPolicy) -> Self {
        self.index_wait = policy;
        self
    }

    /// Write every analyzed picture's luma plane as PNG into `directory`.
    #[must_use]
    pub fn with_frame_dump(mut self, directory: impl Into<PathBuf>) -> Self {
        self.frame_dump = Some(directory.into());
        self
    }

    /// The cancellation token threaded through the run.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), CutmarksError> {
        if let Some(request) = &self.logo_extraction {
            if let Some(width) = request.width
                && !(MIN_EXTRACT_WIDTH..=LOGO_MAX_WIDTH).contains(&width)
            {
                return Err(CutmarksError::InvalidOption {
                    option: "logo width",
                    value: width.to_string(),
                });
            }
            if let Some(height) = request.height
                && !(MIN_EXTRACT_HEIGHT..=LOGO_MAX_HEIGHT).contains(&height)
            {
                return Err(CutmarksError::InvalidOption {
                    option: "logo height",
                    value: height.to_string(),
                });
            }
        }
        if self.pre_roll_secs == Some(0) {
            return Err(CutmarksError::InvalidOption {
                option: "bstart",
                value: "0".to_string(),
            });
        }
        if self.post_roll_secs == Some(0) {
            return Err(CutmarksError::InvalidOption {
                option: "bstop",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
