//! Error types for the `cutmarks` crate.
//!
//! This module defines [`CutmarksError`], the unified error type returned by
//! the recording driver and its setup code. Low-level parsers never return
//! it: they report "not recognized" through `Option`/`bool` and leave the
//! decision to the caller.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

/// The unified error type for all fallible `cutmarks` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CutmarksError {
    /// The recording directory does not exist or is not a directory.
    #[error("Recording directory {path} is not accessible: {reason}")]
    RecordingDirectory {
        /// Path that was passed to [`crate::Analyzer::open`].
        path: PathBuf,
        /// Why the directory was rejected.
        reason: String,
    },

    /// Neither `00001.ts` nor `001.vdr` was found in the recording directory.
    #[error("No recording segments found in {0}")]
    NoSegments(PathBuf),

    /// The Program Association / Program Map tables failed validation.
    #[error("Invalid program tables: {reason}")]
    InvalidProgramTables {
        /// The first structural check that failed.
        reason: &'static str,
    },

    /// The recording does not carry a usable video stream.
    #[error("No video stream found in recording")]
    NoVideoStream,

    /// Another live process holds the lock file of this recording.
    #[error("Another instance (pid {pid}) is already processing this recording")]
    DuplicateInstance {
        /// Process id read from the lock file.
        pid: u32,
    },

    /// A logo mask file could not be parsed.
    #[error("Malformed logo mask {path}: {reason}")]
    LogoMask {
        /// Path of the offending mask file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// An option value was outside its accepted range.
    #[error("Invalid value for {option}: {value}")]
    InvalidOption {
        /// Name of the option.
        option: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The index artifact could not be interpreted.
    #[error("Index file {path} is unusable: {reason}")]
    Index {
        /// Path of the index file.
        path: PathBuf,
        /// Why the index was rejected.
        reason: String,
    },

    /// A picture could not be decoded.
    #[error("Failed to decode video: {0}")]
    VideoDecodeError(String),

    /// An error originating from the FFmpeg libraries.
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while writing frame dumps.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The run was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for CutmarksError {
    fn from(error: ffmpeg_next::Error) -> Self {
        CutmarksError::FfmpegError(error.to_string())
    }
}
