//! Black border detector tests.

use cutmarks::border::has_borders;
use cutmarks::{AspectRatio, BorderDetector, BorderEvent, BorderState, DecodedFrame, StreamContext};

const FPS: f64 = 25.0;
/// Four minutes at 25 fps.
const MIN_FRAMES: u64 = 6000;

fn letterboxed(bars: bool) -> DecodedFrame {
    let (width, height) = (720usize, 576usize);
    let mut luma = vec![128u8; width * height];
    if bars {
        for y in (0..72).chain(height - 72..height) {
            luma[y * width..(y + 1) * width].fill(16);
        }
    }
    DecodedFrame::from_luma(width as u32, height as u32, luma)
}

#[test]
fn recognizes_black_bars() {
    assert_eq!(has_borders(&letterboxed(true)), Some(true));
    assert_eq!(has_borders(&letterboxed(false)), Some(false));
}

#[test]
fn one_dark_strip_is_not_enough() {
    let mut picture = letterboxed(true);
    // brighten the top strip only
    picture.planes[0][10 * 720..30 * 720].fill(200);
    assert_eq!(has_borders(&picture), Some(false));
}

#[test]
fn tiny_pictures_cannot_be_sampled() {
    let picture = DecodedFrame::from_luma(16, 20, vec![0; 16 * 20]);
    assert_eq!(has_borders(&picture), None);
}

#[test]
fn first_run_only_initializes_the_state() {
    let mut detector = BorderDetector::new();
    assert_eq!(detector.update(0, true, FPS), None);
    assert_eq!(detector.update(MIN_FRAMES, true, FPS), None);
    assert_eq!(detector.state(), BorderState::Uninitialized);
    assert_eq!(detector.update(MIN_FRAMES + 1, true, FPS), None);
    assert_eq!(detector.state(), BorderState::Border);
}

#[test]
fn commits_stop_and_start() {
    let mut detector = BorderDetector::new();
    detector.update(0, true, FPS);
    detector.update(MIN_FRAMES + 1, true, FPS);
    detector.update(6500, true, FPS);

    assert_eq!(
        detector.update(6512, false, FPS),
        Some(BorderEvent::Stop {
            frame: 6500,
            detected_at: 6512
        })
    );
    assert_eq!(detector.state(), BorderState::NoBorder);

    assert_eq!(detector.update(8000, true, FPS), None);
    assert_eq!(detector.update(8000 + MIN_FRAMES, true, FPS), None);
    assert_eq!(
        detector.update(8000 + MIN_FRAMES + 12, true, FPS),
        Some(BorderEvent::Start {
            frame: 8000,
            detected_at: 8000 + MIN_FRAMES + 12
        })
    );
}

#[test]
fn short_runs_are_forgotten() {
    let mut detector = BorderDetector::new();
    assert_eq!(detector.update(0, false, FPS), None);
    assert_eq!(detector.state(), BorderState::NoBorder);
    detector.update(100, true, FPS);
    assert_eq!(detector.update(200, false, FPS), None);
    // the run restarts from the next bordered frame
    detector.update(300, true, FPS);
    assert_eq!(detector.update(300 + MIN_FRAMES, true, FPS), None);
    assert!(matches!(
        detector.update(301 + MIN_FRAMES, true, FPS),
        Some(BorderEvent::Start { frame: 300, .. })
    ));
}

#[test]
fn skips_narrow_aspect_and_unknown_frame_rate() {
    let mut context = StreamContext::default();
    context.video.aspect_ratio = AspectRatio::SIXTEEN_NINE;
    let mut detector = BorderDetector::new();
    assert_eq!(detector.process(&context, &letterboxed(true), 0), None);

    context.video.frames_per_second = FPS;
    context.video.aspect_ratio = AspectRatio::FOUR_THREE;
    assert_eq!(detector.process(&context, &letterboxed(true), 1), None);

    context.video.aspect_ratio = AspectRatio::SIXTEEN_NINE;
    detector.process(&context, &letterboxed(false), 2);
    assert_eq!(detector.state(), BorderState::NoBorder);
}
