//! Channel logo detection.
//!
//! A logo mask is a binary edge picture of a channel's on-screen logo,
//! stored per channel and aspect ratio as up to four PGM planes. For every
//! analyzed picture, [`LogoDetector`] computes a thresholded Sobel edge map
//! of the corner the mask belongs to and counts the mask pixels that line
//! up with an edge. [`LogoArea`] turns the resulting ratio into start/stop
//! events with a hysteresis counter, so single noisy frames never flip the
//! state.
//!
//! # Example
//!
//! ```
//! use cutmarks::{LogoArea, LogoEvent, LogoState};
//!
//! let mut area = LogoArea::new();
//! // First frame without logo initializes the state.
//! assert_eq!(area.update(0, 0, 100), None);
//! assert_eq!(area.state(), LogoState::NoLogo);
//!
//! let events: Vec<_> = (1..=4).filter_map(|frame| area.update(frame, 90, 100)).collect();
//! assert_eq!(events, vec![LogoEvent::Start { frame: 1 }]);
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use log::{error, info, warn};

use crate::decoder::{DecodedFrame, PlaneLayout};
use crate::error::CutmarksError;
use crate::stream_info::{AspectRatio, StreamContext, VideoCodec};

/// Share of mask pixels that must match for "logo visible".
pub const LOGO_VMARK: f64 = 0.5;
/// Share of mask pixels below which the logo counts as gone.
pub const LOGO_IMARK: f64 = 0.15;
/// Frames the high ratio must persist before a start is committed.
pub const LOGO_VMAXCOUNT: u32 = 3;
/// Frames the low ratio must persist before a stop is committed.
pub const LOGO_IMAXCOUNT: u32 = 5;

/// Detection window width for SD material without a mask.
pub const LOGO_DEFAULT_WIDTH: u32 = 192;
/// Detection window width for H.264 material without a mask.
pub const LOGO_DEFAULT_HD_WIDTH: u32 = 288;
/// Detection window height without a mask.
pub const LOGO_DEFAULT_HEIGHT: u32 = 100;
/// Largest accepted mask width.
pub const LOGO_MAX_WIDTH: u32 = 480;
/// Largest accepted mask height.
pub const LOGO_MAX_HEIGHT: u32 = 200;

const SOBEL_BOUNDARY: u32 = 15;
const SOBEL_CUTOFF: i32 = 127;
/// Mean luma above which a one-plane result is inconclusive.
const MAX_SINGLE_PLANE_INTENSITY: u64 = 100;
const PLANES: usize = 4;

const GX: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const GY: [[i32; 3]; 3] = [[1, 2, 1], [0, 0, 0], [-1, -2, -1]];

/// Corner of the picture a logo sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogoCorner {
    /// Corner index 0.
    TopLeft,
    /// Corner index 1.
    TopRight,
    /// Corner index 2.
    BottomLeft,
    /// Corner index 3.
    BottomRight,
}

impl LogoCorner {
    /// Corner from its numeric index as stored in mask files.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(LogoCorner::TopLeft),
            1 => Some(LogoCorner::TopRight),
            2 => Some(LogoCorner::BottomLeft),
            3 => Some(LogoCorner::BottomRight),
            _ => None,
        }
    }

    /// Numeric index as stored in mask files.
    pub fn index(self) -> u8 {
        match self {
            LogoCorner::TopLeft => 0,
            LogoCorner::TopRight => 1,
            LogoCorner::BottomLeft => 2,
            LogoCorner::BottomRight => 3,
        }
    }

    /// Top-left origin of a `width`×`height` window in a picture of
    /// `picture_width`×`picture_height`.
    fn origin(
        self,
        picture_width: u32,
        picture_height: u32,
        width: u32,
        height: u32,
    ) -> Option<(u32, u32)> {
        let right = picture_width.checked_sub(width)?;
        let bottom = picture_height.checked_sub(height)?;
        Some(match self {
            LogoCorner::TopLeft => (0, 0),
            LogoCorner::TopRight => (right, 0),
            LogoCorner::BottomLeft => (0, bottom),
            LogoCorner::BottomRight => (right, bottom),
        })
    }
}

/// One plane of a stored logo mask.
///
/// Zero-valued pixels are part of the logo outline.
#[derive(Debug, Clone)]
pub struct LogoMask {
    /// Corner the mask belongs to.
    pub corner: LogoCorner,
    /// Mask pixels.
    pub pixels: GrayImage,
    /// Number of logo pixels used as the correlation denominator.
    pub mask_pixels: u64,
}

impl LogoMask {
    /// Load a mask plane; `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, CutmarksError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Self::parse(&data)
            .map(Some)
            .map_err(|reason| CutmarksError::LogoMask {
                path: path.to_path_buf(),
                reason,
            })
    }

    /// Parse a binary PGM with a `#C<corner> [<mask pixels>]` comment.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        let mut header = PgmHeader::new(data);
        if header.token() != Some(b"P5".as_slice()) {
            return Err("not a binary PGM (P5)".to_string());
        }
        let comment = header.comment().ok_or("missing #C corner comment")?;
        let mut fields = comment
            .strip_prefix("C")
            .ok_or("comment does not start with #C")?
            .split_whitespace();
        let corner: i64 = fields
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or("unreadable corner")?;
        let stored_pixels: Option<u64> = fields.next().and_then(|field| field.parse().ok());

        let width = header.number().ok_or("unreadable width")?;
        let height = header.number().ok_or("unreadable height")?;
        if header.number() != Some(255) {
            return Err("maximum value must be 255".to_string());
        }
        let corner = LogoCorner::from_index(corner).ok_or("corner out of range")?;
        if width == 0 || height == 0 || width > LOGO_MAX_WIDTH || height > LOGO_MAX_HEIGHT {
            return Err(format!("size {width}x{height} out of range"));
        }

        let start = header.body_offset();
        let length = width as usize * height as usize;
        let body = data
            .get(start..start + length)
            .ok_or("pixel data shorter than width*height")?;
        let pixels = GrayImage::from_raw(width, height, body.to_vec())
            .ok_or("pixel buffer does not match dimensions")?;
        let mask_pixels = match stored_pixels {
            Some(count) if count > 0 => count,
            _ => body.iter().filter(|&&pixel| pixel == 0).count() as u64,
        };

        Ok(Self {
            corner,
            pixels,
            mask_pixels,
        })
    }
}

/// Minimal tokenizer for the PGM header.
struct PgmHeader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PgmHeader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        while self
            .data
            .get(self.pos)
            .is_some_and(|byte| byte.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn token(&mut self) -> Option<&'a [u8]> {
        self.skip_whitespace();
        let start = self.pos;
        while self
            .data
            .get(self.pos)
            .is_some_and(|byte| !byte.is_ascii_whitespace())
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.data[start..self.pos])
    }

    fn comment(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        if self.data.get(self.pos) != Some(&b'#') {
            return None;
        }
        let start = self.pos + 1;
        let end = self.data[start..]
            .iter()
            .position(|&byte| byte == b'\n')
            .map_or(self.data.len(), |offset| start + offset);
        self.pos = end;
        std::str::from_utf8(&self.data[start..end]).ok()
    }

    fn number(&mut self) -> Option<u32> {
        std::str::from_utf8(self.token()?).ok()?.parse().ok()
    }

    /// Pixel data starts after exactly one whitespace byte.
    fn body_offset(&self) -> usize {
        self.pos + 1
    }
}

/// Write `pixels` as a binary PGM carrying the `#C<corner>` comment.
pub fn write_pgm(path: &Path, corner: LogoCorner, pixels: &GrayImage) -> Result<(), CutmarksError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write!(
        writer,
        "P5\n#C{}\n{} {}\n255\n",
        corner.index(),
        pixels.width(),
        pixels.height()
    )?;
    writer.write_all(pixels.as_raw())?;
    writer.flush()?;
    Ok(())
}

/// File name of mask plane `plane` for a channel and aspect ratio.
pub fn mask_file_name(channel: &str, aspect: AspectRatio, plane: usize) -> String {
    format!("{channel}-A{}_{}-P{plane}.pgm", aspect.num, aspect.den)
}

/// Committed logo state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoState {
    /// No frame evaluated yet.
    Uninitialized,
    /// Logo visible.
    Logo,
    /// Logo absent.
    NoLogo,
}

/// A committed logo transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoEvent {
    /// The logo appeared; `frame` is the first frame of the high run.
    Start {
        /// First frame with logo.
        frame: u64,
    },
    /// The logo vanished; `frame` is the first frame of the low run.
    Stop {
        /// First frame without logo.
        frame: u64,
    },
}

/// Hysteresis state machine over the per-frame correlation ratio.
#[derive(Debug, Clone)]
pub struct LogoArea {
    state: LogoState,
    counter: u32,
    pending_frame: u64,
}

impl Default for LogoArea {
    fn default() -> Self {
        Self::new()
    }
}

impl LogoArea {
    /// A fresh, uninitialized area.
    pub fn new() -> Self {
        Self {
            state: LogoState::Uninitialized,
            counter: 0,
            pending_frame: 0,
        }
    }

    /// Current committed state.
    pub fn state(&self) -> LogoState {
        self.state
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Feed the correlation of one frame: `matched` of `total` mask
    /// pixels lined up with an edge.
    pub fn update(&mut self, frame: u64, matched: u64, total: u64) -> Option<LogoEvent> {
        let matched = matched as f64;
        let high = total as f64 * LOGO_VMARK;
        let low = total as f64 * LOGO_IMARK;

        if self.state == LogoState::Uninitialized {
            self.state = if matched > high {
                LogoState::Logo
            } else {
                LogoState::NoLogo
            };
        }

        let mut event = None;
        if matched >= high {
            if self.state == LogoState::NoLogo {
                if self.counter >= LOGO_VMAXCOUNT {
                    self.state = LogoState::Logo;
                    self.counter = 0;
                    event = Some(LogoEvent::Start {
                        frame: self.pending_frame,
                    });
                } else {
                    if self.counter == 0 {
                        self.pending_frame = frame;
                    }
                    self.counter += 1;
                }
            } else {
                self.pending_frame = frame;
                self.counter = 0;
            }
        }

        if matched < low {
            if self.state == LogoState::Logo {
                if self.counter >= LOGO_IMAXCOUNT {
                    self.state = LogoState::NoLogo;
                    self.counter = 0;
                    event = Some(LogoEvent::Stop {
                        frame: self.pending_frame,
                    });
                } else {
                    if self.counter == 0 {
                        self.pending_frame = frame;
                    }
                    self.counter += 1;
                }
            } else {
                self.counter = 0;
            }
        }

        if matched < high && matched > low {
            self.counter = 0;
        }
        event
    }
}

/// Settings for writing edge maps instead of detecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoExtraction {
    /// Corner to extract.
    pub corner: LogoCorner,
    /// Window width override.
    pub width: Option<u32>,
    /// Window height override.
    pub height: Option<u32>,
    /// Directory the edge maps are written to.
    pub output: PathBuf,
}

struct PlaneResult {
    matched: u64,
    edges: GrayImage,
}

/// Logo detector for one recording.
#[derive(Debug)]
pub struct LogoDetector {
    directory: PathBuf,
    extraction: Option<LogoExtraction>,
    width: u32,
    height: u32,
    corner: Option<LogoCorner>,
    masks: [Option<LogoMask>; PLANES],
    loaded_for: Option<AspectRatio>,
    area: LogoArea,
    intensity: u64,
    reported_pixel_format: bool,
}

impl LogoDetector {
    /// Create a detector reading masks from `directory`.
    pub fn new(directory: impl Into<PathBuf>, codec: Option<VideoCodec>) -> Self {
        let width = match codec {
            Some(VideoCodec::H264) => LOGO_DEFAULT_HD_WIDTH,
            _ => LOGO_DEFAULT_WIDTH,
        };
        Self {
            directory: directory.into(),
            extraction: None,
            width,
            height: LOGO_DEFAULT_HEIGHT,
            corner: None,
            masks: Default::default(),
            loaded_for: None,
            area: LogoArea::new(),
            intensity: 0,
            reported_pixel_format: false,
        }
    }

    /// Write edge maps of `extraction.corner` instead of detecting.
    #[must_use]
    pub fn with_extraction(mut self, extraction: LogoExtraction) -> Self {
        self.extraction = Some(extraction);
        self
    }

    /// Committed state of the hysteresis machine.
    pub fn state(&self) -> LogoState {
        self.area.state()
    }

    /// Whether at least one mask plane is loaded.
    pub fn has_mask(&self) -> bool {
        self.masks.iter().any(Option::is_some)
    }

    /// Reset the hysteresis state.
    pub fn clear(&mut self) {
        self.area.clear();
    }

    /// Analyze one picture.
    pub fn process(
        &mut self,
        context: &StreamContext,
        picture: &DecodedFrame,
        frame_number: u64,
    ) -> Option<LogoEvent> {
        if picture.width == 0 || picture.height == 0 {
            return None;
        }
        let channel = context.broadcast.channel_id.as_deref()?;
        let aspect = context.video.aspect_ratio;

        if let Some(extraction) = &self.extraction {
            self.corner = Some(extraction.corner);
            if let Some(width) = extraction.width {
                self.width = width;
            }
            if let Some(height) = extraction.height {
                self.height = height;
            }
        } else if self.loaded_for != Some(aspect) {
            self.load_masks(channel, aspect);
        }

        self.detect(picture, channel, aspect, frame_number)
    }

    fn load_masks(&mut self, channel: &str, aspect: AspectRatio) {
        self.corner = None;
        self.area.clear();
        for plane in 0..PLANES {
            let path = self.directory.join(mask_file_name(channel, aspect, plane));
            self.masks[plane] = match LogoMask::load(&path) {
                Ok(Some(mask)) => {
                    if plane == 0 {
                        self.width = mask.pixels.width();
                        self.height = mask.pixels.height();
                    }
                    self.corner = Some(mask.corner);
                    Some(mask)
                }
                Ok(None) => {
                    if plane == 0 {
                        info!("no logo for {channel}-A{}_{}", aspect.num, aspect.den);
                    }
                    None
                }
                Err(CutmarksError::LogoMask { path, reason }) => {
                    error!("format error in {}: {reason}", path.display());
                    None
                }
                Err(other) => {
                    error!("cannot load {}: {other}", path.display());
                    None
                }
            };
        }
        self.loaded_for = Some(aspect);
    }

    fn detect(
        &mut self,
        picture: &DecodedFrame,
        channel: &str,
        aspect: AspectRatio,
        frame_number: u64,
    ) -> Option<LogoEvent> {
        let extract = self.extraction.is_some();
        let mut matched = 0;
        let mut total = 0;
        let mut processed = 0;

        for plane in 0..PLANES {
            if self.masks[plane].is_none() && !extract {
                continue;
            }
            let Some(result) = self.sobel_plane(picture, plane) else {
                continue;
            };
            processed += 1;
            if let Some(extraction) = &self.extraction {
                let name = format!(
                    "{frame_number:06}-{channel}-A{}_{}-P{plane}.pgm",
                    aspect.num, aspect.den
                );
                let path = extraction.output.join(name);
                if let Err(error) = write_pgm(&path, extraction.corner, &result.edges) {
                    warn!("cannot write {}: {error}", path.display());
                }
            } else if let Some(mask) = &self.masks[plane] {
                matched += result.matched;
                total += mask.mask_pixels;
            }
        }

        if extract || processed == 0 {
            return None;
        }
        if processed == 1 && self.intensity > MAX_SINGLE_PLANE_INTENSITY {
            return None;
        }
        self.area.update(frame_number, matched, total)
    }

    fn sobel_plane(&mut self, picture: &DecodedFrame, plane: usize) -> Option<PlaneResult> {
        if plane >= picture.plane_count() || picture.linesize(plane) == 0 {
            return None;
        }
        if picture.layout != PlaneLayout::Planar8 {
            if !self.reported_pixel_format {
                error!("unsupported pixel format, logo detection skipped");
                self.reported_pixel_format = true;
            }
            return None;
        }
        let corner = self.corner?;
        let (x0, y0) = corner.origin(picture.width, picture.height, self.width, self.height)?;

        let (divisor, boundary, cutoff) = if plane == 0 {
            (1, SOBEL_BOUNDARY, SOBEL_CUTOFF)
        } else {
            (2, SOBEL_BOUNDARY / 2, SOBEL_CUTOFF / 2)
        };
        let (x0, y0) = (x0 / divisor, y0 / divisor);
        let (width, height) = (self.width / divisor, self.height / divisor);
        let (x1, y1) = (x0 + width, y0 + height);
        let mask = self.masks[plane].as_ref().map(|mask| &mask.pixels);

        let mut edges = GrayImage::new(width, height);
        let mut matched = 0;
        let mut intensity = 0u64;

        for y in y0..y1 {
            for x in x0..x1 {
                if plane == 0 {
                    intensity += u64::from(picture.sample(0, x as usize, y as usize).unwrap_or(0));
                }
                let inside = y >= y0 + boundary
                    && y <= y1.saturating_sub(boundary)
                    && x >= x0 + boundary
                    && x <= x1.saturating_sub(boundary);
                let magnitude = if inside {
                    gradient(picture, plane, x as usize, y as usize)
                } else {
                    0
                };
                let value = if magnitude >= cutoff { 0 } else { 255 };
                edges.put_pixel(x - x0, y - y0, Luma([value]));

                let mask_value = mask
                    .and_then(|mask| mask.get_pixel_checked(x - x0, y - y0))
                    .map_or(255, |pixel| pixel.0[0]);
                if (u16::from(mask_value) + u16::from(value)) & 0xFF == 0 {
                    matched += 1;
                }
            }
        }
        if plane == 0 {
            self.intensity = intensity / (u64::from(width) * u64::from(height)).max(1);
        }
        Some(PlaneResult { matched, edges })
    }
}

/// `|Gx| + |Gy|` at (`x`, `y`).
fn gradient(picture: &DecodedFrame, plane: usize, x: usize, y: usize) -> i32 {
    let mut sum_x = 0;
    let mut sum_y = 0;
    for i in 0..3 {
        for j in 0..3 {
            let sample = picture
                .sample(plane, (x + i).saturating_sub(1), (y + j).saturating_sub(1))
                .map_or(0, i32::from);
            sum_x += sample * GX[i][j];
            sum_y += sample * GY[i][j];
        }
    }
    sum_x.abs() + sum_y.abs()
}
