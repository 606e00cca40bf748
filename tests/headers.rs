//! Codec header parsing tests.

mod common;

use common::*;
use cutmarks::headers::{parse_ac3, parse_h262, parse_h264, unescape_nal};
use cutmarks::{
    AspectRatio, HeaderParser, PictureType, StreamContext, VideoCodec, VideoHeader,
};

/// Pack a string of `0`/`1` digits (spaces ignored) MSB first, with the
/// RBSP stop bit appended.
fn rbsp(pattern: &str) -> Vec<u8> {
    let mut bits: Vec<u8> = pattern
        .bytes()
        .filter(|b| *b == b'0' || *b == b'1')
        .map(|b| b - b'0')
        .collect();
    bits.push(1);
    while bits.len() % 8 != 0 {
        bits.push(0);
    }
    bits.chunks(8)
        .map(|byte| byte.iter().fold(0u8, |acc, bit| (acc << 1) | bit))
        .collect()
}

/// Main-profile SPS for 1920x1080 progressive at 25 fps with square pixels.
fn sps_1080p25() -> Vec<u8> {
    let mut unit = vec![0, 0, 0, 1, 0x67, 0x4D, 0x40, 0x28];
    let fields = format!(
        "1 1 1 1 010 0 {width} {height} 1 1 1 1 1 1 00101 1 1 00000001 0 0 0 1 {tick:032b} {scale:032b}",
        // ue(119): 120 mbs wide
        width = "0000001111000",
        // ue(67): 68 map units high, cropped by 8 lines
        height = "0000001000100",
        tick = 1,
        scale = 50,
    );
    unit.extend(rbsp(&fields));
    unit
}

// ── H.262 ──────────────────────────────────────────────────────────

#[test]
fn h262_sequence_header() {
    match parse_h262(&h262_sequence(3), false) {
        Some(VideoHeader::Sequence(sequence)) => {
            assert_eq!((sequence.width, sequence.height), (720, 576));
            assert_eq!(sequence.frames_per_second, Some(25.0));
            assert_eq!(sequence.aspect_ratio, Some(AspectRatio::SIXTEEN_NINE));
        }
        other => panic!("unexpected {other:?}"),
    }
    match parse_h262(&h262_sequence(2), false) {
        Some(VideoHeader::Sequence(sequence)) => {
            assert_eq!(sequence.aspect_ratio, Some(AspectRatio::FOUR_THREE));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn h262_picture_types() {
    assert_eq!(
        parse_h262(&h262_picture(1), true),
        Some(VideoHeader::Picture(PictureType::I))
    );
    assert_eq!(
        parse_h262(&h262_picture(2), true),
        Some(VideoHeader::Picture(PictureType::P))
    );
    assert_eq!(
        parse_h262(&h262_picture(3), true),
        Some(VideoHeader::Picture(PictureType::B))
    );
    assert_eq!(parse_h262(&h262_picture(0), true), None);
}

#[test]
fn h262_pictures_wait_for_a_sequence_header() {
    let parser = HeaderParser::new(VideoCodec::H262);
    let mut context = StreamContext::default();

    assert_eq!(parser.find_video_info(&mut context, &h262_picture(1)), None);
    assert_eq!(context.video.picture_type, None);

    parser.find_video_info(&mut context, &h262_sequence(2));
    assert_eq!(context.video.codec, Some(VideoCodec::H262));
    assert_eq!(context.video.height, 576);
    assert_eq!(context.fps(), 25.0);
    assert_eq!(context.video.aspect_ratio, AspectRatio::FOUR_THREE);
    assert!(!context.is_hd());

    parser.find_video_info(&mut context, &h262_picture(1));
    assert_eq!(context.video.picture_type, Some(PictureType::I));
}

#[test]
fn h262_ignores_slices_and_short_units() {
    assert_eq!(parse_h262(&h262_slice(), true), None);
    assert_eq!(parse_h262(&[0, 0, 1, 0xB3], true), None);
    assert_eq!(parse_h262(&[1, 2, 3, 4, 5, 6, 7, 8], true), None);
}

// ── H.264 ──────────────────────────────────────────────────────────

#[test]
fn h264_access_unit_delimiter() {
    let aud = |primary: u8| vec![0, 0, 0, 1, 0x09, (primary << 5) | 0x10];
    assert_eq!(parse_h264(&aud(0)), Some(VideoHeader::Picture(PictureType::I)));
    assert_eq!(parse_h264(&aud(1)), Some(VideoHeader::Picture(PictureType::P)));
    assert_eq!(parse_h264(&aud(2)), Some(VideoHeader::Picture(PictureType::B)));
    assert_eq!(parse_h264(&aud(7)), Some(VideoHeader::Picture(PictureType::B)));
}

#[test]
fn h264_sequence_parameter_set() {
    let parser = HeaderParser::new(VideoCodec::H264);
    let mut context = StreamContext::default();
    let header = parser.find_video_info(&mut context, &sps_1080p25());

    assert!(matches!(header, Some(VideoHeader::Sequence(_))));
    assert_eq!(context.video.width, 1920);
    assert_eq!(context.video.height, 1080);
    assert!(!context.video.interlaced);
    assert_eq!(context.fps(), 25.0);
    assert_eq!(context.video.aspect_ratio, AspectRatio::SIXTEEN_NINE);
    assert!(context.is_hd());
}

#[test]
fn h264_truncated_sps_leaves_context_untouched() {
    let parser = HeaderParser::new(VideoCodec::H264);
    let mut context = StreamContext::default();
    let unit = sps_1080p25();
    assert_eq!(parser.find_video_info(&mut context, &unit[..9]), None);
    assert_eq!(context.video.width, 0);
    assert_eq!(context.video.codec, None);
}

#[test]
fn h264_ignores_slice_units() {
    assert_eq!(parse_h264(&[0, 0, 0, 1, 0x65, 0x88, 0x84]), None);
    assert_eq!(parse_h264(&[0x65, 0x88]), None);
}

#[test]
fn unescapes_emulation_prevention_bytes() {
    assert_eq!(unescape_nal(&[0x12, 0, 0, 3, 1, 0, 0, 3]), vec![0x12, 0, 0, 1, 0, 0]);
    assert_eq!(unescape_nal(&[0, 3, 0, 0, 2]), vec![0, 3, 0, 0, 2]);
}

// ── AC-3 ───────────────────────────────────────────────────────────

#[test]
fn ac3_channel_layouts() {
    let surround = parse_ac3(&ac3_frame(7, true)).unwrap();
    assert_eq!(surround.channels, 6);
    assert_eq!(surround.sample_rate, 48_000);
    assert!(surround.lfe);

    let stereo = parse_ac3(&ac3_frame(2, false)).unwrap();
    assert_eq!(stereo.channels, 2);
    assert!(!stereo.lfe);

    let mono = parse_ac3(&ac3_frame(1, false)).unwrap();
    assert_eq!(mono.channels, 1);
}

#[test]
fn ac3_rejects_reserved_codes() {
    let mut frame = ac3_frame(2, false);
    frame[4] = 0xC0 | 0x14;
    assert_eq!(parse_ac3(&frame), None);

    let mut frame = ac3_frame(2, false);
    frame[4] = 38;
    assert_eq!(parse_ac3(&frame), None);

    assert_eq!(parse_ac3(&[0x0B, 0x77, 0, 0]), None);
    assert_eq!(parse_ac3(&h262_sequence(2)), None);
}

#[test]
fn ac3_updates_audio_context() {
    let parser = HeaderParser::new(VideoCodec::H262);
    let mut context = StreamContext::default();
    parser.find_ac3_info(&mut context, &ac3_frame(7, true));
    assert_eq!(context.audio.channels, 6);
    assert_eq!(context.audio.sample_rate, 48_000);

    parser.find_ac3_info(&mut context, &[0xFF; 8]);
    assert_eq!(context.audio.channels, 6);
}
