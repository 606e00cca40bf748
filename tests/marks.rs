//! Mark timeline and mark file tests.

use std::fs;

use cutmarks::marks::{parse_timecode, timecode};
use cutmarks::{
    AspectRatio, BroadcastAspect, Mark, MarkCategory, MarkFile, MarkFormat, MarkReason, MarkType,
    Marks,
};

fn mark(mark_type: MarkType, position: u64) -> Mark {
    Mark::new(mark_type, position, MarkReason::Text(String::new()))
}

// ── Types ──────────────────────────────────────────────────────────

#[test]
fn type_codes_share_the_category_nibble() {
    assert_eq!(MarkType::LogoStart.category(), MarkCategory::Logo);
    assert_eq!(MarkType::BorderStop.category(), MarkCategory::Border);
    assert_eq!(MarkType::AspectChange.category(), MarkCategory::Aspect);
    assert_eq!(MarkType::ChannelStart.category(), MarkCategory::Channel);
    assert_eq!(MarkType::Common.category(), MarkCategory::Common);
    assert_eq!(MarkType::AspectChange.code(), 0x30);
}

#[test]
fn start_and_stop_classification() {
    assert!(MarkType::LogoStart.is_start());
    assert!(MarkType::ChannelStop.is_stop());
    assert!(!MarkType::AspectChange.is_start());
    assert!(!MarkType::AspectChange.is_stop());
    assert!(!MarkType::Common.is_start());
}

#[test]
fn tags_round_trip() {
    for tag in ["COMMON", "LOGO_STOP", "BORDER_START", "ASPECT_CHANGE", "CHANNEL_STOP"] {
        assert_eq!(MarkType::from_tag(tag).map(MarkType::tag), Some(tag));
    }
    assert_eq!(MarkType::from_tag("logo_start"), None);
}

#[test]
fn reason_text() {
    let reason = MarkReason::AspectChange {
        from: AspectRatio::FOUR_THREE,
        to: AspectRatio::SIXTEEN_NINE,
        frame: 1500,
        broadcast: BroadcastAspect::Matches,
    };
    assert_eq!(reason.to_string(), "aspect ratio change from 4:3 to 16:9 (1500)*");
    assert_eq!(
        MarkReason::BorderStart {
            frame: 100,
            detected_at: 160
        }
        .to_string(),
        "detected start of horiz. borders (100 [160])"
    );
    assert_eq!(
        MarkReason::ChannelChange {
            from: 2,
            to: 6,
            frame: 9
        }
        .to_string(),
        "audio channel change from 2 to 6 (9)"
    );
}

// ── Timeline ───────────────────────────────────────────────────────

#[test]
fn timeline_is_ordered_with_one_mark_per_position() {
    let mut marks = Marks::new();
    marks.add(mark(MarkType::LogoStop, 500));
    marks.add(mark(MarkType::Common, 0));
    marks.add(mark(MarkType::LogoStart, 200));
    let replaced = marks.add(mark(MarkType::BorderStart, 200));

    assert_eq!(replaced.map(|m| m.mark_type), Some(MarkType::LogoStart));
    let positions: Vec<_> = marks.iter().map(|m| m.position).collect();
    assert_eq!(positions, vec![0, 200, 500]);
    assert_eq!(marks.first().map(|m| m.position), Some(0));
    assert_eq!(marks.last().map(|m| m.position), Some(500));
}

#[test]
fn navigation_helpers() {
    let mut marks = Marks::new();
    for (mark_type, position) in [
        (MarkType::Common, 0),
        (MarkType::AspectChange, 100),
        (MarkType::LogoStop, 150),
        (MarkType::AspectChange, 400),
    ] {
        marks.add(mark(mark_type, position));
    }
    assert_eq!(marks.next_after(0).map(|m| m.position), Some(100));
    assert_eq!(marks.next_after(400).map(|m| m.position), None);
    assert_eq!(
        marks
            .next_of_type(100, MarkType::AspectChange)
            .map(|m| m.position),
        Some(400)
    );
    assert_eq!(marks.count_category(MarkCategory::Aspect), 2);
    assert_eq!(marks.remove_type(MarkType::AspectChange), 2);
    assert_eq!(marks.len(), 2);
    marks.clear();
    assert!(marks.is_empty());
}

// ── Timecodes ──────────────────────────────────────────────────────

#[test]
fn timecode_uses_one_based_frames() {
    assert_eq!(timecode(0, 25.0), "0:00:00.01");
    assert_eq!(timecode(24, 25.0), "0:00:00.25");
    assert_eq!(timecode(37, 25.0), "0:00:01.13");
    assert_eq!(timecode(90_050, 25.0), "1:00:02.01");
}

#[test]
fn timecode_falls_back_to_25_fps() {
    assert_eq!(timecode(50, 0.0), timecode(50, 25.0));
}

#[test]
fn parse_timecode_inverts_timecode() {
    for position in [0, 1, 24, 25, 37, 1499, 90_050] {
        assert_eq!(parse_timecode(&timecode(position, 25.0), 25.0), Some(position));
    }
    assert_eq!(parse_timecode("0:01:00", 25.0), Some(1500));
    assert_eq!(parse_timecode("0:61:00.01", 25.0), None);
    assert_eq!(parse_timecode("garbage", 25.0), None);
}

// ── Mark file ──────────────────────────────────────────────────────

fn sample_marks() -> Marks {
    let mut marks = Marks::new();
    marks.add(Mark::new(MarkType::Common, 0, MarkReason::RecordingStart));
    marks.add(Mark::new(
        MarkType::LogoStop,
        7512,
        MarkReason::LogoStop { frame: 7512 },
    ));
    marks.add(Mark::new(
        MarkType::LogoStart,
        16_020,
        MarkReason::LogoStart { frame: 16_020 },
    ));
    marks
}

#[test]
fn saves_timecode_lines() {
    let dir = tempfile::tempdir().unwrap();
    let file = MarkFile::new(dir.path().join("marks"), MarkFormat::Timecode);
    file.save(&sample_marks(), 25.0).unwrap();

    let content = fs::read_to_string(file.path()).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "0:00:00.01 COMMON start of recording (0)",
            "0:05:00.13 LOGO_STOP detected logo stop (7512)",
            "0:10:40.21 LOGO_START detected logo start (16020)",
        ]
    );
    assert!(!dir.path().join("marks.tmp").exists());
}

#[test]
fn loads_both_position_formats() {
    let dir = tempfile::tempdir().unwrap();
    for format in [MarkFormat::Timecode, MarkFormat::Frames] {
        let file = MarkFile::new(dir.path().join("marks"), format);
        file.save(&sample_marks(), 25.0).unwrap();
        let loaded = file.load(25.0).unwrap();

        let summary: Vec<_> = loaded.iter().map(|m| (m.position, m.mark_type)).collect();
        assert_eq!(
            summary,
            vec![
                (0, MarkType::Common),
                (7512, MarkType::LogoStop),
                (16_020, MarkType::LogoStart),
            ]
        );
        assert_eq!(
            loaded.get(7512).map(|m| m.reason.to_string()),
            Some("detected logo stop (7512)".to_string())
        );
    }
}

#[test]
fn load_skips_unparsable_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("marks");
    fs::write(&path, "not a mark\n\n0:00:02.01 some comment\n3000\n").unwrap();
    let loaded = MarkFile::new(&path, MarkFormat::Timecode).load(25.0).unwrap();

    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.get(50).map(|m| m.mark_type), Some(MarkType::Common));
    assert_eq!(
        loaded.get(50).map(|m| m.reason.to_string()),
        Some("some comment".to_string())
    );
    assert!(loaded.get(3000).is_some());
}

#[test]
fn empty_timeline_removes_stale_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = MarkFile::new(dir.path().join("marks"), MarkFormat::Timecode);
    file.save(&sample_marks(), 25.0).unwrap();
    file.save(&Marks::new(), 25.0).unwrap();
    assert!(!file.path().exists());
}

#[test]
fn backup_moves_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = MarkFile::new(dir.path().join("marks"), MarkFormat::Timecode);
    assert!(!file.backup().unwrap());

    file.save(&sample_marks(), 25.0).unwrap();
    assert!(file.backup().unwrap());
    assert!(!file.path().exists());
    assert_eq!(file.backup_path(), dir.path().join("marks.bak"));
    assert!(file.backup_path().exists());
}
