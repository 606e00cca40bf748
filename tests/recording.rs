//! Recording directory tests: layout detection, info file, pid lock.

mod common;

use std::fs;

use cutmarks::recording::PID_FILE_NAME;
use cutmarks::{
    AspectRatio, CutmarksError, PidLock, RecordingFormat, RecordingInfo, RecordingLayout,
    RecordingTimers, VideoCodec,
};
use tempfile::tempdir;

// ── Layout ─────────────────────────────────────────────────────────

#[test]
fn format_file_names() {
    assert_eq!(RecordingFormat::TransportStream.segment_name(7), "00007.ts");
    assert_eq!(RecordingFormat::Vdr.segment_name(7), "007.vdr");
    assert_eq!(RecordingFormat::TransportStream.index_name(), "index");
    assert_eq!(RecordingFormat::Vdr.index_name(), "index.vdr");
    assert_eq!(RecordingFormat::Vdr.info_name(), "info.vdr");
    assert_eq!(RecordingFormat::TransportStream.mark_file_name(), "marks");
    assert_eq!(RecordingFormat::Vdr.mark_file_name(), "marks.vdr");
}

#[test]
fn detects_transport_stream_recording() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("00001.ts"), [0u8; 376]).unwrap();
    fs::write(dir.path().join("00002.ts"), [0u8; 188]).unwrap();

    let layout = RecordingLayout::detect(dir.path()).unwrap();
    assert_eq!(layout.format(), RecordingFormat::TransportStream);
    assert_eq!(layout.segments().len(), 2);
    assert_eq!(layout.total_size(), 564);
    assert_eq!(layout.index_path(), dir.path().join("index"));
    assert_eq!(layout.info_path(), dir.path().join("info"));
}

#[test]
fn detects_vdr_recording() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("001.vdr"), [0u8; 64]).unwrap();

    let layout = RecordingLayout::detect(dir.path()).unwrap();
    assert_eq!(layout.format(), RecordingFormat::Vdr);
    assert_eq!(layout.segment_path(2), dir.path().join("002.vdr"));
    assert_eq!(layout.index_path(), dir.path().join("index.vdr"));
}

#[test]
fn segments_stop_at_the_first_gap() {
    let dir = tempdir().unwrap();
    for name in ["00001.ts", "00002.ts", "00004.ts"] {
        fs::write(dir.path().join(name), [0u8; 188]).unwrap();
    }
    let layout = RecordingLayout::detect(dir.path()).unwrap();
    let segments = layout.segments();
    assert_eq!(segments.len(), 2);
    assert!(segments[1].ends_with("00002.ts"));
}

#[test]
fn directory_without_segments_is_rejected() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("info"), "T Title\n").unwrap();
    assert!(matches!(
        RecordingLayout::detect(dir.path()),
        Err(CutmarksError::NoSegments(_))
    ));
}

#[test]
fn missing_directory_is_rejected() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("gone.rec");
    assert!(matches!(
        RecordingLayout::detect(&missing),
        Err(CutmarksError::RecordingDirectory { .. })
    ));

    let file = dir.path().join("plain");
    fs::write(&file, b"x").unwrap();
    assert!(matches!(
        RecordingLayout::detect(&file),
        Err(CutmarksError::RecordingDirectory { .. })
    ));
}

#[test]
fn probes_vdr_codec_from_first_pes() {
    let dir = tempdir().unwrap();
    let mut h264 = common::pes(0xE0, &[0, 0, 1, 0x09, 0x10, 0, 0, 0, 1, 0x67], false);
    h264.resize(64, 0xFF);
    fs::write(dir.path().join("001.vdr"), &h264).unwrap();
    let layout = RecordingLayout::detect(dir.path()).unwrap();
    assert_eq!(layout.probe_vdr_codec().unwrap(), VideoCodec::H264);

    let mut h262 = common::pes(0xE0, &common::h262_sequence(3), false);
    h262.resize(64, 0xFF);
    fs::write(dir.path().join("001.vdr"), &h262).unwrap();
    assert_eq!(layout.probe_vdr_codec().unwrap(), VideoCodec::H262);
}

// ── Info file ──────────────────────────────────────────────────────

const INFO: &str = "C S19.2E-1-1019-10301 Das Erste HD\n\
                    E 4711 1700000000 5400 4E 10\n\
                    T Tatort\n\
                    S Der Fall\n\
                    X 1 03 deu 16:9\n\
                    X 2 03 deu stereo\n";

#[test]
fn parses_channel_title_and_event() {
    let info = RecordingInfo::parse(INFO, false, false);
    assert_eq!(info.channel_id.as_deref(), Some("S19_2E-1-1019-10301"));
    assert_eq!(info.title.as_deref(), Some("Tatort"));
    assert_eq!(info.start_time, 1_700_000_000);
    assert_eq!(info.length_secs, 5400);
    assert_eq!(info.aspect_ratio, Some(AspectRatio::SIXTEEN_NINE));
    assert!(info.timers.is_none());
    assert!(!info.disable_ac3);
    assert!(!info.disable_video_decoding);
}

#[test]
fn four_three_component_kinds() {
    for kind in ["01", "05"] {
        let info = RecordingInfo::parse(&format!("X 1 {kind} deu 4:3\n"), false, false);
        assert_eq!(info.aspect_ratio, Some(AspectRatio::FOUR_THREE), "kind {kind}");
    }
    let info = RecordingInfo::parse("X 1 07 deu\n", false, false);
    assert_eq!(info.aspect_ratio, Some(AspectRatio::SIXTEEN_NINE));
}

#[test]
fn ignored_video_component_leaves_aspect_unknown() {
    let info = RecordingInfo::parse(INFO, true, false);
    assert_eq!(info.aspect_ratio, None);
}

#[test]
fn dolby_audio_components() {
    let stereo = RecordingInfo::parse("X 2 05 deu Dolby Digital 2.0\n", false, false);
    assert!(stereo.disable_ac3);
    assert!(!stereo.disable_video_decoding);

    let surround = RecordingInfo::parse("X 2 05 deu Dolby Digital 5.1\n", false, false);
    assert!(surround.disable_video_decoding);

    let ignored = RecordingInfo::parse("X 2 05 deu Dolby Digital 5.1\n", false, true);
    assert!(!ignored.disable_video_decoding);
}

#[test]
fn long_titles_are_truncated() {
    let title = "x".repeat(120);
    let info = RecordingInfo::parse(&format!("T {title}\n"), false, false);
    assert_eq!(info.title.map(|title| title.len()), Some(79));
}

#[test]
fn malformed_event_line_resets_times() {
    let info = RecordingInfo::parse("E 1 soon\n", false, false);
    assert_eq!(info.start_time, 0);
    assert_eq!(info.length_secs, 0);
}

#[test]
fn timer_line_gives_margins() {
    let content = "E 1 1000 3600\n@ <epgsearch><start>700</start><stop>4900</stop></epgsearch>\n";
    let info = RecordingInfo::parse(content, false, false);
    assert_eq!(
        info.timers,
        Some(RecordingTimers {
            pre_roll_secs: 300,
            post_roll_secs: 300,
        })
    );
}

#[test]
fn timer_fields_are_found_in_any_order_among_other_tags() {
    let content = "E 1 1000 3600\n\
                   @ <epgsearch><channel>5</channel><stop> 4900 </stop><start>700</start></epgsearch>\n";
    let info = RecordingInfo::parse(content, false, false);
    assert_eq!(
        info.timers,
        Some(RecordingTimers {
            pre_roll_secs: 300,
            post_roll_secs: 300,
        })
    );
}

#[test]
fn non_numeric_timer_field_counts_as_missing() {
    let content = "E 1 1000 3600\n@ <start>soon</start><stop>4900</stop>\n";
    let info = RecordingInfo::parse(content, false, false);
    assert_eq!(
        info.timers,
        Some(RecordingTimers {
            pre_roll_secs: 0,
            post_roll_secs: 300,
        })
    );
}

#[test]
fn timer_line_before_event_is_ignored() {
    let content = "@ <start>700</start><stop>4900</stop>\nE 1 1000 3600\n";
    let info = RecordingInfo::parse(content, false, false);
    assert!(info.timers.is_none());
}

#[test]
fn timer_started_late_has_no_pre_roll() {
    let content = "E 1 1000 3600\n@ <start>1200</start>\n";
    let info = RecordingInfo::parse(content, false, false);
    assert_eq!(
        info.timers,
        Some(RecordingTimers {
            pre_roll_secs: 0,
            post_roll_secs: 0,
        })
    );
}

#[test]
fn load_reads_the_file() {
    let dir = tempdir().unwrap();
    common::write_info(dir.path(), INFO);
    let info = RecordingInfo::load(&dir.path().join("info"), false, false).unwrap();
    assert_eq!(info.title.as_deref(), Some("Tatort"));

    assert!(RecordingInfo::load(&dir.path().join("info.vdr"), false, false).is_err());
}

// ── Pid lock ───────────────────────────────────────────────────────

#[test]
fn lock_file_holds_our_pid_and_is_removed_on_drop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(PID_FILE_NAME);
    {
        let lock = PidLock::acquire(dir.path()).unwrap();
        assert_eq!(lock.path(), path);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }
    assert!(!path.exists());
}

#[test]
fn live_foreign_lock_is_a_duplicate_instance() {
    let dir = tempdir().unwrap();
    // pid 1 always exists
    fs::write(dir.path().join(PID_FILE_NAME), "1\n").unwrap();
    match PidLock::acquire(dir.path()) {
        Err(CutmarksError::DuplicateInstance { pid }) => assert_eq!(pid, 1),
        other => panic!("expected a duplicate instance, got {other:?}"),
    }
}

#[test]
fn stale_lock_is_taken_over() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(PID_FILE_NAME), "4000000000\n").unwrap();
    let lock = PidLock::acquire(dir.path()).unwrap();
    let content = fs::read_to_string(lock.path()).unwrap();
    assert_eq!(content.trim(), std::process::id().to_string());

    fs::write(lock.path(), "not a pid").unwrap();
    drop(lock);
    assert!(PidLock::acquire(dir.path()).is_ok());
}
