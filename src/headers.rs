//! Codec header parsing without picture decoding.
//!
//! The parsers in this module look at one elementary-stream unit at a time
//! and recover picture type, frame geometry, frame rate, aspect ratio and
//! audio channel layout straight from the sequence/picture headers. They
//! are pure: each returns a description of the header or `None`, and
//! [`HeaderParser`] applies a successful result to the
//! [`StreamContext`]. A unit that is not recognized leaves the context
//! untouched.

use crate::bitreader::BitReader;
use crate::stream_info::{AspectRatio, PictureType, StreamContext, VideoCodec};

const NAL_SPS: u8 = 7;
const NAL_AUD: u8 = 9;

/// Profiles whose SPS carries the chroma/bit-depth/scaling block.
const HIGH_PROFILES: [u8; 7] = [100, 110, 122, 244, 44, 83, 86];

/// Geometry and timing recovered from a sequence-level header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceInfo {
    /// Width in pixels after cropping.
    pub width: u32,
    /// Height in pixels after cropping.
    pub height: u32,
    /// Frame rate, if the header carries timing information.
    pub frames_per_second: Option<f64>,
    /// Aspect ratio, if the header carries one.
    pub aspect_ratio: Option<AspectRatio>,
    /// Field-coded content.
    pub interlaced: bool,
}

/// Result of parsing a video unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoHeader {
    /// A picture (or access unit delimiter): counts as one frame.
    Picture(PictureType),
    /// A sequence header or parameter set.
    Sequence(SequenceInfo),
}

/// Fields of an AC-3 sync frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ac3Header {
    /// Channel count including the LFE channel.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Audio coding mode (`acmod`).
    pub coding_mode: u8,
    /// Whether the LFE channel is present.
    pub lfe: bool,
}

/// Locate the NAL/start-code payload of an elementary unit.
///
/// Returns the offset of the first byte after a leading `00 00 01` or
/// `00 00 00 01` start code.
pub fn payload_offset(unit: &[u8]) -> Option<usize> {
    match unit {
        [0, 0, 0, 1, ..] => Some(4),
        [0, 0, 1, ..] => Some(3),
        _ => None,
    }
}

/// Remove emulation-prevention bytes (`00 00 03` → `00 00`).
pub fn unescape_nal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 3 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// Parse an H.264 unit (access unit delimiter or sequence parameter set).
pub fn parse_h264(unit: &[u8]) -> Option<VideoHeader> {
    let offset = payload_offset(unit)?;
    let nal_type = unit.get(offset)? & 0x1F;
    match nal_type {
        NAL_AUD => {
            let primary_pic_type = unit.get(offset + 1)? >> 5;
            let picture = match primary_pic_type {
                0 | 3 | 5 => PictureType::I,
                1 | 4 | 6 => PictureType::P,
                2 | 7 => PictureType::B,
                _ => return None,
            };
            Some(VideoHeader::Picture(picture))
        }
        NAL_SPS => {
            let rbsp = unescape_nal(unit.get(offset + 1..)?);
            parse_h264_sps(&rbsp).map(VideoHeader::Sequence)
        }
        _ => None,
    }
}

/// Parse the RBSP of an H.264 sequence parameter set (after the NAL header).
pub fn parse_h264_sps(rbsp: &[u8]) -> Option<SequenceInfo> {
    let mut bits = BitReader::new(rbsp);

    let profile_idc = bits.read_u8()?;
    bits.skip_bits(8)?; // constraint flags
    bits.skip_bits(8)?; // level_idc
    bits.read_ue()?; // seq_parameter_set_id

    if HIGH_PROFILES.contains(&profile_idc) {
        if bits.read_ue()? == 3 {
            bits.skip_bits(1)?; // separate_colour_plane_flag
        }
        bits.read_ue()?; // bit_depth_luma_minus8
        bits.read_ue()?; // bit_depth_chroma_minus8
        bits.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if bits.read_flag()? {
            for list in 0..8 {
                if bits.read_flag()? {
                    skip_scaling_list(&mut bits, if list < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    bits.read_ue()?; // log2_max_frame_num_minus4
    match bits.read_ue()? {
        0 => {
            bits.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            bits.skip_bits(1)?; // delta_pic_order_always_zero_flag
            bits.read_se()?; // offset_for_non_ref_pic
            bits.read_se()?; // offset_for_top_to_bottom_field
            let cycle = bits.read_ue()?;
            for _ in 0..cycle {
                bits.read_se()?;
            }
        }
        _ => {}
    }
    bits.read_ue()?; // max_num_ref_frames
    bits.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let width_mbs = u64::from(bits.read_ue()?) + 1;
    let height_map_units = u64::from(bits.read_ue()?) + 1;
    let frame_mbs_only = bits.read_flag()?;

    let mut width = width_mbs * 16;
    let mut height = height_map_units * 16 * if frame_mbs_only { 1 } else { 2 };
    if !frame_mbs_only {
        bits.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    bits.skip_bits(1)?; // direct_8x8_inference_flag

    if bits.read_flag()? {
        let left = u64::from(bits.read_ue()?);
        let right = u64::from(bits.read_ue()?);
        let top = u64::from(bits.read_ue()?);
        let bottom = u64::from(bits.read_ue()?);
        width = width.checked_sub(2 * (left + right))?;
        let vertical_unit = if frame_mbs_only { 2 } else { 4 };
        height = height.checked_sub(vertical_unit * (top + bottom))?;
    }

    let width = u32::try_from(width).ok()?;
    let height = u32::try_from(height).ok()?;
    let (aspect_idc, frames_per_second) = read_vui(&mut bits);

    Some(SequenceInfo {
        width,
        height,
        frames_per_second,
        aspect_ratio: aspect_idc.and_then(|idc| h264_aspect_ratio(idc, width, height)),
        interlaced: !frame_mbs_only,
    })
}

fn skip_scaling_list(bits: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            next = (last + bits.read_se()?) & 0xFF;
        }
        if next != 0 {
            last = next;
        }
    }
    Some(())
}

/// Read the VUI fields up to the timing info.
///
/// A truncated VUI keeps whatever was read before the end of the buffer.
fn read_vui(bits: &mut BitReader<'_>) -> (Option<u8>, Option<f64>) {
    let mut aspect_idc = None;
    let mut frames_per_second = None;

    let mut read = || -> Option<()> {
        if !bits.read_flag()? {
            return Some(());
        }
        if bits.read_flag()? {
            let idc = bits.read_u8()?;
            aspect_idc = Some(idc);
            if idc == 255 {
                bits.skip_bits(32)?; // sar_width, sar_height
            }
        }
        if bits.read_flag()? {
            bits.skip_bits(1)?; // overscan_appropriate_flag
        }
        if bits.read_flag()? {
            bits.skip_bits(4)?; // video_format, video_full_range_flag
            if bits.read_flag()? {
                bits.skip_bits(24)?; // colour description
            }
        }
        if bits.read_flag()? {
            bits.read_ue()?;
            bits.read_ue()?;
        }
        if bits.read_flag()? {
            let num_units_in_tick = bits.read_u32()?;
            let time_scale = bits.read_u32()?;
            if num_units_in_tick > 0 {
                frames_per_second =
                    Some(f64::from(time_scale) / (2.0 * f64::from(num_units_in_tick)));
            }
        }
        Some(())
    };
    let _ = read();

    (aspect_idc, frames_per_second)
}

/// Map an H.264 `aspect_ratio_idc` to a ratio.
///
/// Square pixels on the common HD rasters are reported as their display
/// aspect.
pub fn h264_aspect_ratio(idc: u8, width: u32, height: u32) -> Option<AspectRatio> {
    let ratio = match idc {
        1 => match (width, height) {
            (1920, 1080) | (1280, 720) => AspectRatio::SIXTEEN_NINE,
            (960, 720) => AspectRatio::FOUR_THREE,
            _ => AspectRatio::new(1, 1),
        },
        2 => AspectRatio::new(12, 31),
        3 => AspectRatio::new(10, 11),
        4 => AspectRatio::new(16, 11),
        5 => AspectRatio::new(40, 33),
        6 => AspectRatio::new(24, 11),
        7 => AspectRatio::new(20, 11),
        8 => AspectRatio::new(32, 11),
        9 => AspectRatio::new(80, 33),
        10 => AspectRatio::new(18, 11),
        11 => AspectRatio::new(15, 11),
        12 => AspectRatio::new(64, 33),
        13 => AspectRatio::new(160, 99),
        14 => AspectRatio::FOUR_THREE,
        15 => AspectRatio::new(3, 2),
        16 => AspectRatio::new(2, 1),
        _ => return None,
    };
    Some(ratio)
}

/// Parse an H.262 unit (picture header or sequence header).
///
/// Picture headers are only accepted once the frame height is known, i.e.
/// after the first sequence header.
pub fn parse_h262(unit: &[u8], height_known: bool) -> Option<VideoHeader> {
    let header = unit.get(..8)?;
    if header[..3] != [0, 0, 1] {
        return None;
    }
    match header[3] {
        0x00 => {
            if !height_known {
                return None;
            }
            let picture = match (header[5] >> 3) & 0x07 {
                1 => PictureType::I,
                2 => PictureType::P,
                3 => PictureType::B,
                4 => PictureType::D,
                _ => return None,
            };
            Some(VideoHeader::Picture(picture))
        }
        0xB3 => {
            let width = (u32::from(header[4]) << 4) | (u32::from(header[5]) >> 4);
            let height = (u32::from(header[5] & 0x0F) << 8) | u32::from(header[6]);
            let aspect_ratio = match header[7] >> 4 {
                1 => Some(AspectRatio::new(1, 1)),
                2 => Some(AspectRatio::FOUR_THREE),
                3 => Some(AspectRatio::SIXTEEN_NINE),
                4 => Some(AspectRatio::new(11, 5)),
                _ => None,
            };
            let frames_per_second = match header[7] & 0x0F {
                1 => Some(24000.0 / 1001.0),
                2 => Some(24.0),
                3 => Some(25.0),
                4 => Some(30000.0 / 1001.0),
                5 => Some(30.0),
                6 => Some(50.0),
                7 => Some(60000.0 / 1001.0),
                8 => Some(60.0),
                _ => None,
            };
            Some(VideoHeader::Sequence(SequenceInfo {
                width,
                height,
                frames_per_second,
                aspect_ratio,
                interlaced: false,
            }))
        }
        _ => None,
    }
}

/// Parse an AC-3 sync frame header.
///
/// Reserved sample-rate and frame-size codes are rejected without error;
/// not every unit starts on a valid header.
pub fn parse_ac3(unit: &[u8]) -> Option<Ac3Header> {
    let header = unit.get(..7)?;
    if header[0] != 0x0B || header[1] != 0x77 {
        return None;
    }
    let frame_size_code = header[4] & 0x3F;
    let sample_rate = match header[4] >> 6 {
        0 => 48_000,
        1 => 44_100,
        2 => 32_000,
        _ => return None,
    };
    if frame_size_code >= 38 {
        return None;
    }

    let coding_mode = header[6] >> 5;
    let mix_field = header[6] & 0x1F;
    let (base_channels, lfe_mask): (u16, u8) = match coding_mode {
        0 => (2, 0x10),
        1 => (1, 0x10),
        2 => (2, 0x04),
        3 => (3, 0x04),
        4 => (3, 0x04),
        5 => (4, 0x01),
        6 => (4, 0x04),
        _ => (5, 0x01),
    };
    let lfe = mix_field & lfe_mask == lfe_mask;

    Some(Ac3Header {
        channels: base_channels + u16::from(lfe),
        sample_rate,
        coding_mode,
        lfe,
    })
}

/// Applies parsed headers of the selected codec family to a [`StreamContext`].
#[derive(Debug, Clone, Copy)]
pub struct HeaderParser {
    codec: VideoCodec,
}

impl HeaderParser {
    /// Create a parser for the given video codec family.
    pub fn new(codec: VideoCodec) -> Self {
        Self { codec }
    }

    /// The codec family this parser was built for.
    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Parse a video unit and record what it carries in `context`.
    ///
    /// Returns the parsed header; `None` means the unit was not recognized
    /// and `context` was not touched.
    pub fn find_video_info(
        &self,
        context: &mut StreamContext,
        unit: &[u8],
    ) -> Option<VideoHeader> {
        let header = match self.codec {
            VideoCodec::H264 => parse_h264(unit)?,
            VideoCodec::H262 => parse_h262(unit, context.video.height != 0)?,
        };

        match header {
            VideoHeader::Picture(picture) => {
                context.video.picture_type = Some(picture);
            }
            VideoHeader::Sequence(sequence) => {
                context.video.codec = Some(self.codec);
                context.video.width = sequence.width;
                context.video.height = sequence.height;
                context.video.interlaced = sequence.interlaced;
                if let Some(fps) = sequence.frames_per_second {
                    context.video.frames_per_second = fps;
                }
                if let Some(aspect) = sequence.aspect_ratio {
                    context.video.aspect_ratio = aspect;
                }
            }
        }
        Some(header)
    }

    /// Parse an AC-3 unit and record its channel layout in `context`.
    pub fn find_ac3_info(&self, context: &mut StreamContext, unit: &[u8]) -> Option<Ac3Header> {
        let header = parse_ac3(unit)?;
        context.audio.channels = header.channels;
        context.audio.sample_rate = header.sample_rate;
        Some(header)
    }
}
