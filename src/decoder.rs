//! The seam between the analysis core and an external picture decoder.
//!
//! The core never performs transform or entropy decoding. It hands
//! elementary-stream units to a [`FrameDecoder`] and, when a picture comes
//! back, analyzes its planes. With the `ffmpeg` feature enabled,
//! [`FfmpegDecoder`](crate::FfmpegDecoder) provides an implementation.

use image::GrayImage;

use crate::stream_info::{AspectRatio, VideoInfo};

/// Memory layout of a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLayout {
    /// 8-bit planar YUV (luma plane followed by chroma planes).
    Planar8,
    /// Anything else; detectors that need luma skip such pictures.
    Other,
}

/// A decoded picture as delivered by the external decoder.
///
/// Planes are stored as owned buffers with their line sizes; rows may be
/// padded beyond `width`.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Up to four planes (luma first).
    pub planes: Vec<Vec<u8>>,
    /// Bytes per row of each plane.
    pub linesizes: Vec<usize>,
    /// Visible width of the luma plane.
    pub width: u32,
    /// Visible height of the luma plane.
    pub height: u32,
    /// Pixel layout of the planes.
    pub layout: PlaneLayout,
    /// Display aspect ratio reported by the decoder.
    pub aspect_hint: Option<AspectRatio>,
}

impl DecodedFrame {
    /// Build a luma-only frame from tightly packed rows.
    pub fn from_luma(width: u32, height: u32, luma: Vec<u8>) -> Self {
        Self {
            planes: vec![luma],
            linesizes: vec![width as usize],
            width,
            height,
            layout: PlaneLayout::Planar8,
            aspect_hint: None,
        }
    }

    /// Number of planes carried.
    pub fn plane_count(&self) -> usize {
        self.planes.len().min(self.linesizes.len())
    }

    /// Row stride of `plane`, `0` if the plane is absent.
    pub fn linesize(&self, plane: usize) -> usize {
        self.linesizes.get(plane).copied().unwrap_or(0)
    }

    /// Sample at column `x`, row `y` of `plane`.
    pub fn sample(&self, plane: usize, x: usize, y: usize) -> Option<u8> {
        let stride = self.linesize(plane);
        self.planes.get(plane)?.get(y * stride + x).copied()
    }

    /// Rows `y` of the luma plane restricted to the visible width.
    pub fn luma_row(&self, y: usize) -> Option<&[u8]> {
        let stride = self.linesize(0);
        let start = y * stride;
        self.planes
            .first()?
            .get(start..start + (self.width as usize).min(stride))
    }

    /// Copy the visible luma plane into an image buffer.
    pub fn luma_image(&self) -> Option<GrayImage> {
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height as usize {
            pixels.extend_from_slice(self.luma_row(y)?);
        }
        GrayImage::from_raw(self.width, self.height, pixels)
    }
}

/// An external decoder turning elementary-stream units into pictures.
pub trait FrameDecoder {
    /// Feed one elementary-stream unit.
    ///
    /// Returns a picture when the unit completed one; `None` is not an
    /// error, the unit is simply skipped.
    fn decode_video(&mut self, unit: &[u8]) -> Option<DecodedFrame>;

    /// Told about the stream whenever a picture header was parsed.
    ///
    /// Decoders may use it to drop pictures the analysis never looks at.
    fn configure(&mut self, _video: &VideoInfo) {}

    /// Forget buffered input before decoding restarts at the beginning of
    /// the recording.
    fn reset(&mut self) {}
}
